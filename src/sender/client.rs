use reqwest::{Certificate, Client, ClientBuilder};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Connect and read timeouts are fixed for every exchange.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
pub const READ_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Invalid pinned certificate: {0}")]
    InvalidCertificate(String),
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub endpoint: String,
    pub event_path: String,
    /// PEM-encoded certificates. When non-empty, only these are trusted.
    pub pinned_certificates: Vec<Vec<u8>>,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://rask-telemetry-collector:9700".to_string(),
            event_path: "a".to_string(),
            pinned_certificates: Vec::new(),
            connect_timeout: CONNECT_TIMEOUT,
            read_timeout: READ_TIMEOUT,
            user_agent: format!("rask-telemetry/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionStats {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
}

#[derive(Debug, Default)]
pub struct ClientStats {
    total_requests: AtomicU64,
    successful_requests: AtomicU64,
    failed_requests: AtomicU64,
}

impl ClientStats {
    pub fn record_request(&self, success: bool) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if success {
            self.successful_requests.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// reqwest client bound to one collector URL.
#[derive(Debug, Clone)]
pub struct HttpClient {
    pub client: Client,
    pub config: ClientConfig,
    event_url: Url,
    pub stats: Arc<ClientStats>,
}

impl HttpClient {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let event_url = Self::build_event_url(&config.endpoint, &config.event_path)?;

        let mut client_builder = ClientBuilder::new()
            .connect_timeout(config.connect_timeout)
            .read_timeout(config.read_timeout)
            .user_agent(&config.user_agent);

        if !config.pinned_certificates.is_empty() {
            if event_url.scheme() != "https" {
                return Err(ClientError::InvalidConfiguration(
                    "Pinned certificates require an https endpoint".to_string(),
                ));
            }

            client_builder = client_builder
                .tls_built_in_root_certs(false)
                .https_only(true);

            for pem in &config.pinned_certificates {
                for certificate in Self::parse_pinned(pem)? {
                    client_builder = client_builder.add_root_certificate(certificate);
                }
            }
        }

        let client = client_builder.build().map_err(|e| {
            ClientError::InvalidConfiguration(format!("Failed to build HTTP client: {e}"))
        })?;

        Ok(Self {
            client,
            config,
            event_url,
            stats: Arc::new(ClientStats::default()),
        })
    }

    /// Parses every certificate in a PEM document. A document without any
    /// certificate would pin nothing, so it is rejected too.
    fn parse_pinned(pem: &[u8]) -> Result<Vec<Certificate>, ClientError> {
        let certificates = Certificate::from_pem_bundle(pem)
            .map_err(|e| ClientError::InvalidCertificate(e.to_string()))?;
        if certificates.is_empty() {
            return Err(ClientError::InvalidCertificate(
                "No certificate found in PEM document".to_string(),
            ));
        }
        Ok(certificates)
    }

    /// `<endpoint>/<event-path>` without a query.
    pub fn event_url(&self) -> &Url {
        &self.event_url
    }

    /// `<endpoint>/<event-path>?<query>`.
    pub fn event_url_with_query(&self, query: &str) -> Url {
        let mut url = self.event_url.clone();
        if query.is_empty() {
            url.set_query(None);
        } else {
            url.set_query(Some(query));
        }
        url
    }

    pub fn pinning_enabled(&self) -> bool {
        !self.config.pinned_certificates.is_empty()
    }

    pub fn connection_stats(&self) -> ConnectionStats {
        ConnectionStats {
            total_requests: self.stats.total_requests.load(Ordering::Relaxed),
            successful_requests: self.stats.successful_requests.load(Ordering::Relaxed),
            failed_requests: self.stats.failed_requests.load(Ordering::Relaxed),
        }
    }

    fn build_event_url(endpoint: &str, event_path: &str) -> Result<Url, ClientError> {
        let raw = format!(
            "{}/{}",
            endpoint.trim_end_matches('/'),
            event_path.trim_start_matches('/')
        );
        Url::parse(&raw)
            .map_err(|e| ClientError::InvalidConfiguration(format!("Invalid endpoint URL: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_url_joins_path() {
        let client = HttpClient::new(ClientConfig {
            endpoint: "http://collector.local:9700/".to_string(),
            event_path: "/a".to_string(),
            ..ClientConfig::default()
        })
        .unwrap();

        assert_eq!(client.event_url().as_str(), "http://collector.local:9700/a");
        assert_eq!(
            client.event_url_with_query("app_key=k&timestamp=1").as_str(),
            "http://collector.local:9700/a?app_key=k&timestamp=1"
        );
    }

    #[test]
    fn test_invalid_endpoint_rejected() {
        let result = HttpClient::new(ClientConfig {
            endpoint: "not a url".to_string(),
            ..ClientConfig::default()
        });
        assert!(matches!(result, Err(ClientError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_pinning_rejects_plain_http() {
        let result = HttpClient::new(ClientConfig {
            endpoint: "http://collector.local".to_string(),
            pinned_certificates: vec![b"-----BEGIN CERTIFICATE-----".to_vec()],
            ..ClientConfig::default()
        });
        assert!(matches!(result, Err(ClientError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_malformed_pinned_certificate_rejected() {
        let malformed: [&[u8]; 2] = [
            b"-----BEGIN CERTIFICATE-----\nnot base64 at all!\n-----END CERTIFICATE-----\n",
            b"just some bytes",
        ];

        for pem in malformed {
            let result = HttpClient::new(ClientConfig {
                endpoint: "https://collector.local".to_string(),
                pinned_certificates: vec![pem.to_vec()],
                ..ClientConfig::default()
            });
            assert!(
                matches!(result, Err(ClientError::InvalidCertificate(_))),
                "accepted {:?}",
                String::from_utf8_lossy(pem)
            );
        }
    }

    #[test]
    fn test_pinned_certificate_accepted() {
        let key = rcgen::KeyPair::generate().unwrap();
        let mut params = rcgen::CertificateParams::default();
        params
            .distinguished_name
            .push(rcgen::DnType::CommonName, "collector-ca");
        params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
        let ca = params.self_signed(&key).unwrap();

        let client = HttpClient::new(ClientConfig {
            endpoint: "https://collector.local".to_string(),
            pinned_certificates: vec![ca.pem().into_bytes()],
            ..ClientConfig::default()
        })
        .unwrap();
        assert_eq!(client.event_url().scheme(), "https");
    }

    #[test]
    fn test_stats_accumulate() {
        let client = HttpClient::new(ClientConfig::default()).unwrap();
        client.stats.record_request(true);
        client.stats.record_request(false);

        let stats = client.connection_stats();
        assert_eq!(stats.total_requests, 2);
        assert_eq!(stats.successful_requests, 1);
        assert_eq!(stats.failed_requests, 1);
    }
}
