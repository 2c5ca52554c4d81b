//! Durable ordered store of pending requests, buffered events and preferences.
//!
//! The dispatcher is the single consumer of the connection list; producers on
//! arbitrary threads append concurrently. Implementations serialize compound
//! operations internally.

pub mod memory;
#[cfg(feature = "sled-store")]
pub mod sled_store;

pub use memory::MemoryStore;
#[cfg(feature = "sled-store")]
pub use sled_store::SledStore;

use crate::domain::Event;
use thiserror::Error;

/// Preference key holding the timestamp of the most recent session begin.
pub const BEGIN_SESSION_PREFERENCE: &str = "rask.telemetry.beginSession";

#[derive(Error, Debug)]
pub enum StoreError {
    #[cfg(feature = "sled-store")]
    #[error("Sled error: {0}")]
    Sled(#[from] sled::Error),
    #[error("Encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

pub trait RequestStore: Send + Sync {
    /// Appends a request at the tail of the queue.
    fn add_connection(&self, request: &str) -> Result<(), StoreError>;

    /// All pending requests, oldest first.
    fn connections(&self) -> Result<Vec<String>, StoreError>;

    /// The oldest pending request, read fresh from the store.
    fn first_connection(&self) -> Result<Option<String>, StoreError>;

    /// Removes the oldest entry byte-identical to `request`.
    /// Returns whether an entry was removed.
    fn remove_connection(&self, request: &str) -> Result<bool, StoreError>;

    fn connection_count(&self) -> Result<usize, StoreError>;

    fn is_empty_connections(&self) -> Result<bool, StoreError> {
        Ok(self.connection_count()? == 0)
    }

    fn add_event(&self, event: Event) -> Result<(), StoreError>;

    /// Reads and clears every buffered event as one atomic step.
    fn take_events(&self) -> Result<Vec<Event>, StoreError>;

    fn event_count(&self) -> Result<usize, StoreError>;

    fn preference(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Sets a preference; `None` deletes it.
    fn set_preference(&self, key: &str, value: Option<&str>) -> Result<(), StoreError>;
}

/// The begin-session anchor used to build session identifiers.
/// Empty until the first session has begun.
pub fn begin_session_anchor(store: &dyn RequestStore) -> Result<String, StoreError> {
    Ok(store.preference(BEGIN_SESSION_PREFERENCE)?.unwrap_or_default())
}
