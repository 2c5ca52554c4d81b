//! Domain layer for rask-telemetry.
//!
//! Contains the canonical types shared across all modules:
//! - `Event`: a single buffered usage event
//! - `DeviceIdType` / `DeviceIdentity`: identifier snapshot injected at dispatch
//! - `TelemetryError`: Top-level error type

pub mod error;
pub mod event;
pub mod identity;

pub use error::TelemetryError;
pub use event::{Event, Segmentation};
pub use identity::{DeviceIdType, DeviceIdentity, effective_type};
