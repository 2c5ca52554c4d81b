//! Builds the parameter string for each telemetry operation, appends it to
//! the request store and wakes the dispatcher.

pub mod clock;
pub mod params;

pub use clock::{Clock, FixedClock, Stamp, SystemClock};
pub use params::{QueryBuilder, form_encode};

use crate::SDK_VERSION;
use crate::app::config::{Config, Mode};
use crate::buffer::EncodedBatch;
use crate::device::{CrashDetails, DeviceFacts, UserData};
use crate::dispatch::Dispatcher;
use crate::domain::TelemetryError;
use crate::store::{BEGIN_SESSION_PREFERENCE, RequestStore};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

pub struct RequestQueue {
    config: Arc<Config>,
    store: Arc<dyn RequestStore>,
    facts: Arc<dyn DeviceFacts>,
    crash: Arc<CrashDetails>,
    clock: Arc<dyn Clock>,
    dispatcher: Dispatcher,
}

impl RequestQueue {
    pub fn new(
        config: Arc<Config>,
        store: Arc<dyn RequestStore>,
        facts: Arc<dyn DeviceFacts>,
        crash: Arc<CrashDetails>,
        clock: Arc<dyn Clock>,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            config,
            store,
            facts,
            crash,
            clock,
            dispatcher,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn check_internal_state(&self) -> Result<(), TelemetryError> {
        self.config.check_internal_state()?;
        Ok(())
    }

    fn base(&self, timestamp: i64) -> QueryBuilder {
        QueryBuilder::new()
            .param("app_key", &self.config.app_key)
            .raw("timestamp", timestamp)
    }

    fn enqueue(&self, request: String) -> Result<(), TelemetryError> {
        self.store.add_connection(&request)?;
        debug!("Queued request: {}", request);
        self.dispatcher.wake();
        Ok(())
    }

    pub fn begin_session(&self) -> Result<(), TelemetryError> {
        self.check_internal_state()?;
        let stamp = self.clock.now();

        let mut query = self
            .base(stamp.timestamp)
            .raw("begin_session", 1)
            .param("sdk_version", SDK_VERSION);
        if let Some(ip) = self.facts.ip_address() {
            query = query.param("ip_address", &ip);
        }
        let request = query
            .raw("test_mode", self.config.mode.test_mode_flag())
            .raw("metrics", self.facts.metrics().to_encoded_json())
            .build();

        self.store
            .set_preference(BEGIN_SESSION_PREFERENCE, Some(&stamp.timestamp.to_string()))?;
        self.enqueue(request)
    }

    /// Reports `duration` more seconds of session time. Zero is a no-op.
    pub fn update_session(&self, duration: u64) -> Result<(), TelemetryError> {
        self.check_internal_state()?;
        if duration == 0 {
            return Ok(());
        }

        let request = self
            .base(self.clock.now().timestamp)
            .raw("test_mode", self.config.mode.test_mode_flag())
            .raw("session_duration", duration)
            .build();
        self.enqueue(request)
    }

    pub fn end_session(&self, duration: u64) -> Result<(), TelemetryError> {
        self.check_internal_state()?;

        let mut query = self
            .base(self.clock.now().timestamp)
            .raw("test_mode", self.config.mode.test_mode_flag())
            .raw("end_session", 1);
        if duration > 0 {
            query = query.raw("session_duration", duration);
        }
        self.enqueue(query.build())
    }

    /// Registers a push token after the configured delay. The returned task
    /// completes once the request has been queued.
    pub fn token_session(
        &self,
        token: &str,
        mode: Mode,
    ) -> Result<JoinHandle<()>, TelemetryError> {
        self.check_internal_state()?;
        let stamp = self.clock.now();

        let request = self
            .base(stamp.timestamp)
            .raw("hour", stamp.hour)
            .raw("dow", stamp.dow)
            .raw("token_session", 1)
            .param("push_token", token)
            .raw("test_mode", mode.test_mode_flag())
            .param("locale", &self.facts.metrics().locale)
            .build();

        let delay = self.config.token_session_delay;
        let store = Arc::clone(&self.store);
        let dispatcher = self.dispatcher.clone();

        Ok(self.dispatcher.runtime().spawn(async move {
            tokio::time::sleep(delay).await;
            match store.add_connection(&request) {
                Ok(()) => {
                    debug!("Queued token session");
                    dispatcher.wake();
                }
                Err(e) => error!("Failed to queue token session: {}", e),
            }
        }))
    }

    pub fn send_user_data(&self, user: &UserData) -> Result<(), TelemetryError> {
        self.check_internal_state()?;
        let fragment = user.to_request_fragment();
        if fragment.is_empty() {
            return Ok(());
        }

        let stamp = self.clock.now();
        let request = self
            .base(stamp.timestamp)
            .raw("hour", stamp.hour)
            .raw("dow", stamp.dow)
            .fragment(&fragment)
            .build();
        self.enqueue(request)
    }

    /// `referrer` is a pre-encoded parameter fragment such as
    /// `campaign_id=spring&campaign_user=42`.
    pub fn send_referrer_data(&self, referrer: &str) -> Result<(), TelemetryError> {
        self.check_internal_state()?;
        let referrer = referrer.trim_start_matches('&');
        if referrer.is_empty() {
            return Ok(());
        }

        let request = self
            .base(self.clock.now().timestamp)
            .raw("test_mode", self.config.mode.test_mode_flag())
            .fragment(&format!("&{referrer}"))
            .build();
        self.enqueue(request)
    }

    pub fn send_crash_report(&self, error: &str, nonfatal: bool) -> Result<(), TelemetryError> {
        self.check_internal_state()?;
        if error.is_empty() {
            return Ok(());
        }

        let stamp = self.clock.now();
        let crash = self
            .crash
            .crash_data(&self.facts.metrics(), error, nonfatal);
        let request = self
            .base(stamp.timestamp)
            .raw("test_mode", self.config.mode.test_mode_flag())
            .raw("hour", stamp.hour)
            .raw("dow", stamp.dow)
            .param("sdk_version", SDK_VERSION)
            .raw("crash", crash)
            .build();
        self.enqueue(request)
    }

    pub fn record_events(&self, batch: &EncodedBatch) -> Result<(), TelemetryError> {
        self.check_internal_state()?;
        if batch.is_empty() {
            return Ok(());
        }

        let request = self
            .base(self.clock.now().timestamp)
            .raw("test_mode", self.config.mode.test_mode_flag())
            .raw("events", batch.as_str())
            .build();
        self.enqueue(request)
    }

    pub fn record_location(&self, batch: &EncodedBatch) -> Result<(), TelemetryError> {
        self.check_internal_state()?;
        if batch.is_empty() {
            return Ok(());
        }

        let stamp = self.clock.now();
        let request = self
            .base(stamp.timestamp)
            .raw("hour", stamp.hour)
            .raw("dow", stamp.dow)
            .raw("events", batch.as_str())
            .build();
        self.enqueue(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceMetrics, MockDeviceFacts};
    use crate::domain::{DeviceIdType, DeviceIdentity, Event};
    use crate::sender::{Transmit, TransmitOutcome};
    use crate::store::MemoryStore;
    use futures::future::BoxFuture;

    /// Never completes an exchange, so queued requests stay put.
    struct RejectingTransmitter;

    impl Transmit for RejectingTransmitter {
        fn transmit<'a>(&'a self, _request: &'a str) -> BoxFuture<'a, TransmitOutcome> {
            Box::pin(async { TransmitOutcome::ServerRejected { status: 503 } })
        }
    }

    fn facts() -> MockDeviceFacts {
        let mut facts = MockDeviceFacts::new();
        facts
            .expect_ip_address()
            .return_const(Some("10.1.2.3".to_string()));
        facts.expect_metrics().returning(|| DeviceMetrics {
            os: "linux".to_string(),
            locale: "en_US".to_string(),
            ..DeviceMetrics::default()
        });
        facts
    }

    fn queue_with(config: Config) -> (RequestQueue, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let dispatcher = Dispatcher::on_current_runtime(
            store.clone(),
            // Unresolved, so nothing leaves the store during these tests.
            Arc::new(DeviceIdentity::unresolved(DeviceIdType::AdvertisingId)),
            Arc::new(RejectingTransmitter),
        )
        .unwrap();
        let queue = RequestQueue::new(
            Arc::new(config),
            store.clone(),
            Arc::new(facts()),
            Arc::new(CrashDetails::new()),
            Arc::new(FixedClock::new(1_700_000_000, 14, 3)),
            dispatcher,
        );
        (queue, store)
    }

    fn queue() -> (RequestQueue, Arc<MemoryStore>) {
        queue_with(Config {
            app_key: "abc".to_string(),
            endpoint: "https://collector.example.com".to_string(),
            ..Config::default()
        })
    }

    #[tokio::test]
    async fn test_begin_session_payload() {
        let (queue, store) = queue();
        queue.begin_session().unwrap();

        let requests = store.connections().unwrap();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].starts_with(
            "app_key=abc&timestamp=1700000000&begin_session=1&sdk_version="
        ));
        assert!(requests[0].contains("&ip_address=10.1.2.3&test_mode=0&metrics=%7B"));
        assert_eq!(
            store.preference(BEGIN_SESSION_PREFERENCE).unwrap().as_deref(),
            Some("1700000000")
        );
    }

    #[tokio::test]
    async fn test_update_session_skips_zero() {
        let (queue, store) = queue();
        queue.update_session(0).unwrap();
        assert!(store.is_empty_connections().unwrap());

        queue.update_session(30).unwrap();
        assert_eq!(
            store.connections().unwrap(),
            vec!["app_key=abc&timestamp=1700000000&test_mode=0&session_duration=30"]
        );
    }

    #[tokio::test]
    async fn test_end_session_always_emitted() {
        let (queue, store) = queue();
        queue.end_session(0).unwrap();
        queue.end_session(12).unwrap();
        assert_eq!(
            store.connections().unwrap(),
            vec![
                "app_key=abc&timestamp=1700000000&test_mode=0&end_session=1",
                "app_key=abc&timestamp=1700000000&test_mode=0&end_session=1&session_duration=12",
            ]
        );
    }

    #[tokio::test]
    async fn test_test_mode_flag() {
        let (queue, store) = queue_with(Config {
            app_key: "abc".to_string(),
            mode: Mode::Test,
            ..Config::default()
        });
        queue.update_session(5).unwrap();
        assert!(store.connections().unwrap()[0].contains("&test_mode=2&"));
    }

    #[tokio::test]
    async fn test_empty_payloads_are_not_queued() {
        let (queue, store) = queue();
        queue.send_user_data(&UserData::default()).unwrap();
        queue.send_referrer_data("").unwrap();
        queue.send_crash_report("", true).unwrap();
        queue.record_events(&EncodedBatch::empty()).unwrap();
        queue.record_location(&EncodedBatch::empty()).unwrap();
        assert!(store.is_empty_connections().unwrap());
    }

    #[tokio::test]
    async fn test_record_events_payload() {
        let (queue, store) = queue();
        let event = Event::new("purchase", None, 1, Some(9.99), 1_700_000_000, 14, 3);
        queue
            .record_events(&EncodedBatch::from_events(&[event]))
            .unwrap();

        let request = &store.connections().unwrap()[0];
        assert!(request.starts_with("app_key=abc&timestamp=1700000000&test_mode=0&events=%5B%7B"));
    }

    #[tokio::test]
    async fn test_crash_report_carries_marker() {
        let (queue, store) = queue();
        queue.send_crash_report("boom\nat main", false).unwrap();

        let request = &store.connections().unwrap()[0];
        assert!(request.starts_with("app_key=abc&timestamp=1700000000&test_mode=0&hour=14&dow=3&sdk_version="));
        assert!(request.contains(crate::sender::CRASH_MARKER));
    }

    #[tokio::test]
    async fn test_user_data_and_referrer() {
        let (queue, store) = queue();
        queue
            .send_user_data(&UserData {
                name: Some("Ada".to_string()),
                ..UserData::default()
            })
            .unwrap();
        queue.send_referrer_data("&campaign_id=spring").unwrap();

        let requests = store.connections().unwrap();
        assert_eq!(
            requests[0],
            "app_key=abc&timestamp=1700000000&hour=14&dow=3&user_details=%7B%22name%22%3A%22Ada%22%7D"
        );
        assert_eq!(
            requests[1],
            "app_key=abc&timestamp=1700000000&test_mode=0&campaign_id=spring"
        );
    }

    #[tokio::test]
    async fn test_preconditions_fail_fast() {
        let (queue, store) = queue_with(Config::default());
        let result = queue.begin_session();
        assert!(matches!(result, Err(TelemetryError::Configuration(_))));
        assert!(store.is_empty_connections().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_session_is_delayed() {
        let (queue, store) = queue();
        let handle = queue.token_session("tok en", Mode::Test).unwrap();

        tokio::task::yield_now().await;
        assert!(store.is_empty_connections().unwrap());

        handle.await.unwrap();
        assert_eq!(
            store.connections().unwrap(),
            vec![
                "app_key=abc&timestamp=1700000000&hour=14&dow=3&token_session=1\
                 &push_token=tok+en&test_mode=2&locale=en_US"
            ]
        );
    }
}
