use super::{RequestStore, StoreError};
use crate::domain::Event;
use parking_lot::Mutex;
use std::path::Path;
use tracing::{debug, warn};

const CONNECTIONS_TREE: &str = "connections";
const EVENTS_TREE: &str = "events";
const PREFERENCES_TREE: &str = "preferences";

/// Durable store backed by sled.
///
/// Connection and event keys are big-endian ids from `Db::generate_id`, which
/// is monotonic across restarts, so tree iteration order is insertion order.
pub struct SledStore {
    db: sled::Db,
    connections: sled::Tree,
    events: sled::Tree,
    preferences: sled::Tree,
    // Serializes read-then-remove sequences against each other.
    write_lock: Mutex<()>,
}

impl SledStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::open(path.as_ref())?;
        Self::from_db(db)
    }

    /// Opens a throwaway store that is deleted on drop.
    pub fn temporary() -> Result<Self, StoreError> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> Result<Self, StoreError> {
        let connections = db.open_tree(CONNECTIONS_TREE)?;
        let events = db.open_tree(EVENTS_TREE)?;
        let preferences = db.open_tree(PREFERENCES_TREE)?;

        debug!(
            "Opened request store ({} pending requests, {} buffered events)",
            connections.len(),
            events.len()
        );

        Ok(Self {
            db,
            connections,
            events,
            preferences,
            write_lock: Mutex::new(()),
        })
    }

    fn next_key(&self) -> Result<[u8; 8], StoreError> {
        Ok(self.db.generate_id()?.to_be_bytes())
    }

    fn decode(value: &[u8]) -> String {
        String::from_utf8_lossy(value).into_owned()
    }
}

impl RequestStore for SledStore {
    fn add_connection(&self, request: &str) -> Result<(), StoreError> {
        let key = self.next_key()?;
        self.connections.insert(key, request.as_bytes())?;
        self.connections.flush()?;
        Ok(())
    }

    fn connections(&self) -> Result<Vec<String>, StoreError> {
        self.connections
            .iter()
            .values()
            .map(|value| Ok(Self::decode(&value?)))
            .collect()
    }

    fn first_connection(&self) -> Result<Option<String>, StoreError> {
        Ok(self.connections.first()?.map(|(_, value)| Self::decode(&value)))
    }

    fn remove_connection(&self, request: &str) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock();

        for entry in self.connections.iter() {
            let (key, value) = entry?;
            if value.as_ref() == request.as_bytes() {
                self.connections.remove(key)?;
                self.connections.flush()?;
                return Ok(true);
            }
        }

        Ok(false)
    }

    fn connection_count(&self) -> Result<usize, StoreError> {
        Ok(self.connections.len())
    }

    fn is_empty_connections(&self) -> Result<bool, StoreError> {
        Ok(self.connections.is_empty())
    }

    fn add_event(&self, event: Event) -> Result<(), StoreError> {
        let key = self.next_key()?;
        let encoded = serde_json::to_vec(&event)?;
        self.events.insert(key, encoded)?;
        self.events.flush()?;
        Ok(())
    }

    fn take_events(&self) -> Result<Vec<Event>, StoreError> {
        let _guard = self.write_lock.lock();

        let mut taken = Vec::new();
        let mut removal = sled::Batch::default();

        for entry in self.events.iter() {
            let (key, value) = entry?;
            match serde_json::from_slice::<serde_json::Value>(&value) {
                Ok(json) => match Event::from_json(&json) {
                    Some(event) => taken.push(event),
                    None => warn!("Dropping malformed buffered event: {}", json),
                },
                Err(e) => warn!("Dropping undecodable buffered event: {}", e),
            }
            // Only the keys read here are removed; events appended meanwhile
            // stay for the next flush.
            removal.remove(key);
        }

        self.events.apply_batch(removal)?;
        self.events.flush()?;
        Ok(taken)
    }

    fn event_count(&self) -> Result<usize, StoreError> {
        Ok(self.events.len())
    }

    fn preference(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.preferences.get(key)?.map(|value| Self::decode(&value)))
    }

    fn set_preference(&self, key: &str, value: Option<&str>) -> Result<(), StoreError> {
        match value {
            Some(v) => {
                self.preferences.insert(key, v.as_bytes())?;
            }
            None => {
                self.preferences.remove(key)?;
            }
        }
        self.preferences.flush()?;
        Ok(())
    }
}
