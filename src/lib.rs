#![warn(rust_2024_compatibility)]
// Specific pedantic lints enforced (not blanket allow):
#![deny(
    clippy::explicit_iter_loop,
    clippy::manual_let_else,
    clippy::semicolon_if_nothing_returned,
    clippy::inconsistent_struct_constructor
)]
// Noisy pedantic lints suppressed with justification:
#![allow(
    clippy::cast_lossless,            // Infallible casts are clear enough with `as`
    clippy::cast_possible_truncation, // Safe within realistic value bounds (durations, counts)
    clippy::cast_sign_loss,           // Safe where values are known non-negative
    clippy::missing_errors_doc,       // Internal API
    clippy::missing_panics_doc,       // Internal API
    clippy::module_name_repetitions,  // e.g. DispatchStats in dispatch module
    clippy::must_use_candidate,       // Annotated selectively on critical APIs
    clippy::doc_markdown              // Internal API
)]

pub mod app;
pub mod buffer;
pub mod client;
pub mod device;
pub mod dispatch;
pub mod domain;
pub mod queue;
pub mod sender;
pub mod store;

pub use app::{App, Config};
pub use buffer::{EncodedBatch, EventBuffer};
pub use client::{Telemetry, TelemetryBuilder};
pub use dispatch::{DispatchStats, Dispatcher, PassOutcome, PassReport};
pub use domain::{DeviceIdType, DeviceIdentity, Event, Segmentation, TelemetryError};
pub use queue::RequestQueue;
pub use sender::{HttpTransmitter, Transmit, TransmitOutcome};
pub use store::{MemoryStore, RequestStore};
#[cfg(feature = "sled-store")]
pub use store::SledStore;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Reported to the collector as `sdk_version`.
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");
