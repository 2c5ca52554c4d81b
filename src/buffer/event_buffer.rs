use crate::domain::{Event, Segmentation, TelemetryError};
use crate::queue::clock::Clock;
use crate::store::{RequestStore, StoreError};
use std::sync::Arc;
use tracing::{debug, warn};

/// URL-encoded JSON array of flushed events. Empty means nothing to send.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncodedBatch {
    encoded: String,
    event_count: usize,
}

impl EncodedBatch {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_events(events: &[Event]) -> Self {
        if events.is_empty() {
            return Self::empty();
        }

        // Serialized straight from the structs to keep field order.
        let json = serde_json::to_string(events).unwrap_or_else(|_| "[]".to_string());
        Self {
            encoded: url::form_urlencoded::byte_serialize(json.as_bytes()).collect(),
            event_count: events.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.event_count == 0
    }

    pub fn event_count(&self) -> usize {
        self.event_count
    }

    pub fn as_str(&self) -> &str {
        &self.encoded
    }
}

/// Accumulates events in the store until they are flushed as one batch.
pub struct EventBuffer {
    store: Arc<dyn RequestStore>,
    clock: Arc<dyn Clock>,
}

impl EventBuffer {
    pub fn new(store: Arc<dyn RequestStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Stamps and stores one event. `sum` is dropped when not finite.
    pub fn record_event(
        &self,
        key: &str,
        segmentation: Option<Segmentation>,
        count: u32,
        sum: f64,
    ) -> Result<(), TelemetryError> {
        if key.is_empty() {
            return Err(TelemetryError::invalid_argument(
                "Event key must not be empty",
            ));
        }

        let stamp = self.clock.now();
        let event = Event::new(
            key,
            segmentation,
            count,
            Some(sum),
            stamp.timestamp,
            stamp.hour,
            stamp.dow,
        );
        self.store.add_event(event)?;
        Ok(())
    }

    fn take_batch(&self) -> Result<(Vec<Event>, EncodedBatch), StoreError> {
        let events = self.store.take_events()?;
        let batch = EncodedBatch::from_events(&events);
        if !batch.is_empty() {
            debug!("Flushed {} buffered events", batch.event_count());
        }
        Ok((events, batch))
    }

    /// Takes every buffered event in one step and encodes them.
    pub fn flush(&self) -> Result<EncodedBatch, StoreError> {
        Ok(self.take_batch()?.1)
    }

    /// Takes every buffered event and hands the batch to `enqueue`. If that
    /// fails the taken events are put back, behind any recorded meanwhile.
    pub fn flush_into<F>(&self, enqueue: F) -> Result<(), TelemetryError>
    where
        F: FnOnce(&EncodedBatch) -> Result<(), TelemetryError>,
    {
        let (events, batch) = self.take_batch()?;

        if let Err(e) = enqueue(&batch) {
            warn!("Returning {} events to the buffer: {}", events.len(), e);
            for event in events {
                self.store.add_event(event)?;
            }
            return Err(e);
        }
        Ok(())
    }

    pub fn size(&self) -> Result<usize, StoreError> {
        self.store.event_count()
    }
}
