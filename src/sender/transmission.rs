use super::HttpClient;
use super::multipart::MultipartUpload;
use crate::device::user_data::PICTURE_PATH_PARAM;
use futures::future::BoxFuture;
use reqwest::StatusCode;
use reqwest::header::{CONTENT_TYPE, HeaderValue};
use std::path::PathBuf;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Parameter whose presence switches a request to a POST body.
pub const CRASH_MARKER: &str = "&crash=";

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

#[derive(Error, Debug)]
pub enum TransmissionError {
    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Attachment error: {0}")]
    Attachment(#[from] std::io::Error),
    #[error("Invalid header value: {0}")]
    InvalidHeaderValue(String),
}

/// Result of exactly one request/response exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransmitOutcome {
    Success,
    /// Non-2xx status, or a body that did not report success.
    ServerRejected { status: u16 },
    /// Connect, TLS, write, read or attachment failure.
    TransportFailure { reason: String },
}

impl TransmitOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TransmitOutcome::Success)
    }
}

impl From<TransmissionError> for TransmitOutcome {
    fn from(error: TransmissionError) -> Self {
        TransmitOutcome::TransportFailure {
            reason: error.to_string(),
        }
    }
}

/// One wire request in, one outcome out.
pub trait Transmit: Send + Sync {
    fn transmit<'a>(&'a self, request: &'a str) -> BoxFuture<'a, TransmitOutcome>;
}

/// How a wire request is put on the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Encoding {
    /// Multipart upload of a local file; the remaining pairs ride on the URL.
    Multipart { picture_path: PathBuf, query: String },
    /// POST with the whole parameter string as the body.
    PostBody,
    /// GET with the parameter string as the query.
    Query,
}

impl Encoding {
    pub fn select(request: &str) -> Self {
        if let (Some(picture_path), query) = split_picture_path(request) {
            return Encoding::Multipart {
                picture_path: PathBuf::from(picture_path),
                query,
            };
        }
        if request.contains(CRASH_MARKER) {
            Encoding::PostBody
        } else {
            Encoding::Query
        }
    }
}

/// Separates a non-empty `picturePath` pair from the rest of the request.
pub fn split_picture_path(request: &str) -> (Option<String>, String) {
    let mut picture_path = None;
    let mut rest = Vec::new();

    for pair in request.split('&') {
        let name = pair.split('=').next().unwrap_or_default();
        if name == PICTURE_PATH_PARAM && picture_path.is_none() {
            let value = url::form_urlencoded::parse(pair.as_bytes())
                .next()
                .map(|(_, v)| v.into_owned())
                .unwrap_or_default();
            if !value.is_empty() {
                picture_path = Some(value);
                continue;
            }
        }
        rest.push(pair);
    }

    (picture_path, rest.join("&"))
}

/// Maps a completed exchange onto an outcome.
///
/// Non-2xx is a rejection regardless of body. A 2xx with an empty body is a
/// success. Otherwise the body must be a JSON object whose `result` equals
/// "success" ignoring case.
pub fn classify(status: StatusCode, body: &str) -> TransmitOutcome {
    let rejected = TransmitOutcome::ServerRejected {
        status: status.as_u16(),
    };

    if !status.is_success() {
        return rejected;
    }
    if body.is_empty() {
        return TransmitOutcome::Success;
    }

    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(serde_json::Value::Object(response)) => {
            let reported = response
                .get("result")
                .and_then(|r| r.as_str())
                .unwrap_or_default();
            if reported.eq_ignore_ascii_case("success") {
                TransmitOutcome::Success
            } else {
                rejected
            }
        }
        _ => rejected,
    }
}

/// Performs exchanges against the collector with the configured client.
#[derive(Clone)]
pub struct HttpTransmitter {
    pub client: HttpClient,
}

impl HttpTransmitter {
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }

    pub async fn send(&self, request: &str) -> TransmitOutcome {
        let start = Instant::now();
        let encoding = Encoding::select(request);

        let outcome = match self.exchange(request, &encoding).await {
            Ok((status, body)) => {
                let outcome = classify(status, &body);
                if let TransmitOutcome::ServerRejected { status } = outcome {
                    warn!("Collector did not accept request (HTTP {}): {}", status, body);
                }
                outcome
            }
            Err(e) => {
                warn!("Failed to submit request: {}", e);
                e.into()
            }
        };

        self.client.stats.record_request(outcome.is_success());
        if outcome.is_success() {
            info!("Request accepted in {:?}", start.elapsed());
            debug!("ok -> {}", request);
        }

        outcome
    }

    async fn exchange(
        &self,
        request: &str,
        encoding: &Encoding,
    ) -> Result<(StatusCode, String), TransmissionError> {
        let builder = match encoding {
            Encoding::Multipart {
                picture_path,
                query,
            } => {
                debug!("Uploading attachment {}", picture_path.display());
                let upload = MultipartUpload::from_file(picture_path).await?;
                let content_type = HeaderValue::from_str(&upload.content_type())
                    .map_err(|e| TransmissionError::InvalidHeaderValue(e.to_string()))?;
                self.client
                    .client
                    .post(self.client.event_url_with_query(query))
                    .header(CONTENT_TYPE, content_type)
                    .body(upload.into_body())
            }
            Encoding::PostBody => {
                debug!("Using POST because of crash payload");
                self.client
                    .client
                    .post(self.client.event_url().clone())
                    .header(CONTENT_TYPE, HeaderValue::from_static(FORM_CONTENT_TYPE))
                    .body(request.to_string())
            }
            Encoding::Query => self
                .client
                .client
                .get(self.client.event_url_with_query(request)),
        };

        // The response is consumed in full, which releases the connection.
        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;
        Ok((status, body))
    }
}

impl Transmit for HttpTransmitter {
    fn transmit<'a>(&'a self, request: &'a str) -> BoxFuture<'a, TransmitOutcome> {
        Box::pin(self.send(request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_status() {
        assert_eq!(
            classify(StatusCode::INTERNAL_SERVER_ERROR, r#"{"result":"Success"}"#),
            TransmitOutcome::ServerRejected { status: 500 }
        );
        assert_eq!(
            classify(StatusCode::NOT_FOUND, ""),
            TransmitOutcome::ServerRejected { status: 404 }
        );
        assert_eq!(classify(StatusCode::NO_CONTENT, ""), TransmitOutcome::Success);
    }

    #[test]
    fn test_classify_body() {
        assert!(classify(StatusCode::OK, r#"{"result":"Success"}"#).is_success());
        assert!(classify(StatusCode::OK, r#"{"result":"SUCCESS","extra":1}"#).is_success());
        assert!(!classify(StatusCode::OK, r#"{"result":"error"}"#).is_success());
        assert!(!classify(StatusCode::OK, r#"{"status":"success"}"#).is_success());
        assert!(!classify(StatusCode::OK, r#"["success"]"#).is_success());
        assert!(!classify(StatusCode::OK, "OK").is_success());
    }

    #[test]
    fn test_select_query() {
        assert_eq!(
            Encoding::select("app_key=k&timestamp=1&events=%5B%5D"),
            Encoding::Query
        );
    }

    #[test]
    fn test_select_crash_post() {
        assert_eq!(
            Encoding::select("app_key=k&timestamp=1&sdk_version=1.0&crash=%7B%7D"),
            Encoding::PostBody
        );
    }

    #[test]
    fn test_select_multipart_wins_over_crash() {
        let encoding =
            Encoding::select("app_key=k&user_details=%7B%7D&picturePath=%2Ftmp%2Fa+b.png&crash=x");
        assert_eq!(
            encoding,
            Encoding::Multipart {
                picture_path: PathBuf::from("/tmp/a b.png"),
                query: "app_key=k&user_details=%7B%7D&crash=x".to_string(),
            }
        );
    }

    #[test]
    fn test_empty_picture_path_is_not_a_marker() {
        let (path, rest) = split_picture_path("app_key=k&picturePath=&timestamp=1");
        assert_eq!(path, None);
        assert_eq!(rest, "app_key=k&picturePath=&timestamp=1");
    }

    #[test]
    fn test_transport_error_collapses() {
        let outcome: TransmitOutcome = TransmissionError::Attachment(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "missing",
        ))
        .into();
        assert!(matches!(outcome, TransmitOutcome::TransportFailure { .. }));
    }
}
