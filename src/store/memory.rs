use super::{RequestStore, StoreError};
use crate::domain::Event;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

/// Process-local store. Nothing survives a restart; used when no store path is
/// configured and throughout the tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryStoreInner>,
}

#[derive(Debug, Default)]
struct MemoryStoreInner {
    connections: VecDeque<String>,
    events: Vec<Event>,
    preferences: HashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RequestStore for MemoryStore {
    fn add_connection(&self, request: &str) -> Result<(), StoreError> {
        self.inner.lock().connections.push_back(request.to_string());
        Ok(())
    }

    fn connections(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.inner.lock().connections.iter().cloned().collect())
    }

    fn first_connection(&self) -> Result<Option<String>, StoreError> {
        Ok(self.inner.lock().connections.front().cloned())
    }

    fn remove_connection(&self, request: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock();
        match inner.connections.iter().position(|c| c == request) {
            Some(index) => {
                inner.connections.remove(index);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn connection_count(&self) -> Result<usize, StoreError> {
        Ok(self.inner.lock().connections.len())
    }

    fn add_event(&self, event: Event) -> Result<(), StoreError> {
        self.inner.lock().events.push(event);
        Ok(())
    }

    fn take_events(&self) -> Result<Vec<Event>, StoreError> {
        Ok(std::mem::take(&mut self.inner.lock().events))
    }

    fn event_count(&self) -> Result<usize, StoreError> {
        Ok(self.inner.lock().events.len())
    }

    fn preference(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.inner.lock().preferences.get(key).cloned())
    }

    fn set_preference(&self, key: &str, value: Option<&str>) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        match value {
            Some(v) => {
                inner.preferences.insert(key.to_string(), v.to_string());
            }
            None => {
                inner.preferences.remove(key);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connections_are_fifo() {
        let store = MemoryStore::new();
        store.add_connection("a=1").unwrap();
        store.add_connection("a=2").unwrap();
        store.add_connection("a=3").unwrap();

        assert_eq!(store.first_connection().unwrap().as_deref(), Some("a=1"));
        assert!(store.remove_connection("a=1").unwrap());
        assert_eq!(store.connections().unwrap(), vec!["a=2", "a=3"]);
    }

    #[test]
    fn test_remove_only_first_duplicate() {
        let store = MemoryStore::new();
        store.add_connection("same").unwrap();
        store.add_connection("other").unwrap();
        store.add_connection("same").unwrap();

        store.remove_connection("same").unwrap();
        assert_eq!(store.connections().unwrap(), vec!["other", "same"]);
        assert!(!store.remove_connection("missing").unwrap());
    }

    #[test]
    fn test_take_events_clears() {
        let store = MemoryStore::new();
        store.add_event(Event::new("a", None, 1, None, 0, 0, 0)).unwrap();
        store.add_event(Event::new("b", None, 1, None, 0, 0, 0)).unwrap();

        let taken = store.take_events().unwrap();
        assert_eq!(taken.len(), 2);
        assert_eq!(store.event_count().unwrap(), 0);
        assert!(store.take_events().unwrap().is_empty());
    }

    #[test]
    fn test_preferences() {
        let store = MemoryStore::new();
        assert_eq!(store.preference("k").unwrap(), None);
        store.set_preference("k", Some("v")).unwrap();
        assert_eq!(store.preference("k").unwrap().as_deref(), Some("v"));
        store.set_preference("k", None).unwrap();
        assert_eq!(store.preference("k").unwrap(), None);
    }
}
