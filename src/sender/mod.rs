//! HTTP side of the pipeline: client construction, wire encodings and
//! response classification.

pub mod client;
pub mod multipart;
pub mod transmission;

pub use client::{ClientConfig, ClientError, ConnectionStats, HttpClient};
pub use multipart::MultipartUpload;
pub use transmission::{
    CRASH_MARKER, Encoding, HttpTransmitter, Transmit, TransmissionError, TransmitOutcome, classify,
};
