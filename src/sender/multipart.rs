//! Single-file multipart/form-data bodies for attachment uploads.

use bytes::Bytes;
use mime_guess::Mime;
use std::path::Path;

const CRLF: &str = "\r\n";
const FIELD_NAME: &str = "binaryFile";

/// A one-part multipart body carrying a file's raw bytes.
#[derive(Debug, Clone)]
pub struct MultipartUpload {
    boundary: String,
    body: Vec<u8>,
}

impl MultipartUpload {
    pub fn new(file_name: &str, contents: &[u8], boundary: impl Into<String>) -> Self {
        let boundary = boundary.into();
        let mut body = Vec::with_capacity(contents.len() + 256);

        let header = format!(
            "--{boundary}{CRLF}\
             Content-Disposition: form-data; name=\"{FIELD_NAME}\"; filename=\"{file_name}\"{CRLF}\
             Content-Type: {content_type}{CRLF}\
             Content-Transfer-Encoding: binary{CRLF}{CRLF}",
            content_type = guess_content_type(file_name),
        );
        body.extend_from_slice(header.as_bytes());
        body.extend_from_slice(contents);
        body.extend_from_slice(format!("{CRLF}--{boundary}--{CRLF}").as_bytes());

        Self { boundary, body }
    }

    /// Reads `path` and wraps it with a boundary derived from the current time.
    pub async fn from_file(path: &Path) -> std::io::Result<Self> {
        let contents = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self::new(&file_name, &contents, time_boundary()))
    }

    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    pub fn into_body(self) -> Bytes {
        Bytes::from(self.body)
    }
}

/// Lowercase hex of the current epoch milliseconds.
pub fn time_boundary() -> String {
    format!("{:x}", chrono::Utc::now().timestamp_millis())
}

/// Content type guessed from the file extension.
pub fn guess_content_type(file_name: &str) -> Mime {
    mime_guess::from_path(file_name).first_or_octet_stream()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_layout() {
        let upload = MultipartUpload::new("avatar.png", b"\x89PNG", "18b1f0c2a7e");
        let body = upload.clone().into_body();

        let expected_head = "--18b1f0c2a7e\r\n\
            Content-Disposition: form-data; name=\"binaryFile\"; filename=\"avatar.png\"\r\n\
            Content-Type: image/png\r\n\
            Content-Transfer-Encoding: binary\r\n\r\n";
        assert!(body.starts_with(expected_head.as_bytes()));
        assert!(body.ends_with(b"\x89PNG\r\n--18b1f0c2a7e--\r\n"));
        assert_eq!(
            upload.content_type(),
            "multipart/form-data; boundary=18b1f0c2a7e"
        );
    }

    #[test]
    fn test_guess_content_type() {
        assert_eq!(guess_content_type("photo.JPG").essence_str(), "image/jpeg");
        assert_eq!(guess_content_type("notes.txt").essence_str(), "text/plain");
        assert_eq!(guess_content_type("clip.mp4").essence_str(), "video/mp4");
        assert_eq!(
            guess_content_type("blob").essence_str(),
            "application/octet-stream"
        );
    }

    #[test]
    fn test_time_boundary_is_hex() {
        let boundary = time_boundary();
        assert!(!boundary.is_empty());
        assert!(boundary.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn test_from_file_reads_contents() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("note.txt");
        std::fs::write(&path, b"hello").unwrap();

        let upload = MultipartUpload::from_file(&path).await.unwrap();
        let body = String::from_utf8(upload.into_body().to_vec()).unwrap();
        assert!(body.contains("filename=\"note.txt\""));
        assert!(body.contains("Content-Type: text/plain"));
        assert!(body.contains("\r\n\r\nhello\r\n"));
    }

    #[tokio::test]
    async fn test_from_missing_file_fails() {
        let result = MultipartUpload::from_file(Path::new("/nonexistent/rask/picture.png")).await;
        assert!(result.is_err());
    }
}
