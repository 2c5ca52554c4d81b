//! Application-facing facade: lifecycle signals, periodic session updates
//! and event flushing on top of the request pipeline.

use crate::app::config::Config;
use crate::buffer::{EncodedBatch, EventBuffer};
use crate::device::{
    CrashDetails, DeviceFacts, DeviceId, DurableIdSource, HostDeviceFacts, IdentityProvider,
    UserData,
};
use crate::dispatch::Dispatcher;
use crate::domain::{DeviceIdType, Event, Segmentation, TelemetryError};
use crate::queue::{Clock, RequestQueue, SystemClock};
use crate::sender::{HttpClient, HttpTransmitter, Transmit};
use crate::store::{MemoryStore, RequestStore};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Key of the event carrying a location fix.
pub const LOCATION_EVENT_KEY: &str = "_location";

#[derive(Debug, Default)]
struct SessionState {
    activity_count: u32,
    last_report: Option<Instant>,
}

impl SessionState {
    /// Whole seconds since the last duration report, rounded to nearest.
    fn elapsed_seconds(&self, now: Instant) -> u64 {
        let elapsed = self
            .last_report
            .map(|at| now.duration_since(at).as_millis())
            .unwrap_or(0);
        ((elapsed + 500) / 1000) as u64
    }

    fn take_elapsed_seconds(&mut self) -> u64 {
        let now = Instant::now();
        let elapsed = self.elapsed_seconds(now);
        self.last_report = Some(now);
        elapsed
    }
}

pub struct TelemetryBuilder {
    config: Config,
    store: Option<Arc<dyn RequestStore>>,
    facts: Option<Arc<dyn DeviceFacts>>,
    transmitter: Option<Arc<dyn Transmit>>,
    clock: Option<Arc<dyn Clock>>,
    device_id: Option<DeviceId>,
    durable_source: Option<Arc<dyn DurableIdSource>>,
    runtime: Option<Handle>,
}

impl TelemetryBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            store: None,
            facts: None,
            transmitter: None,
            clock: None,
            device_id: None,
            durable_source: None,
            runtime: None,
        }
    }

    pub fn store(mut self, store: Arc<dyn RequestStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn device_facts(mut self, facts: Arc<dyn DeviceFacts>) -> Self {
        self.facts = Some(facts);
        self
    }

    pub fn transmitter(mut self, transmitter: Arc<dyn Transmit>) -> Self {
        self.transmitter = Some(transmitter);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn device_id(mut self, device_id: DeviceId) -> Self {
        self.device_id = Some(device_id);
        self
    }

    /// Replaces the generated-UUID source behind the `OpenUdid` strategy.
    pub fn durable_id_source(mut self, source: Arc<dyn DurableIdSource>) -> Self {
        self.durable_source = Some(source);
        self
    }

    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn build(self) -> Result<Arc<Telemetry>, TelemetryError> {
        let config = Arc::new(self.config);
        config.check_internal_state()?;

        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current()
                .map_err(|e| TelemetryError::Initialization(format!("No tokio runtime: {e}")))?,
        };

        let store = match self.store {
            Some(store) => store,
            None => open_store(&config)?,
        };

        let transmitter: Arc<dyn Transmit> = match self.transmitter {
            Some(transmitter) => transmitter,
            None => {
                let client = HttpClient::new(config.client_config()?)
                    .map_err(|e| TelemetryError::Initialization(e.to_string()))?;
                Arc::new(HttpTransmitter::new(client))
            }
        };

        let device_id = match self.device_id {
            Some(device_id) => device_id,
            None => match &config.device_id {
                Some(id) => DeviceId::developer_supplied(id.clone())?,
                None => DeviceId::new(config.device_id_type.into())?,
            },
        };
        let device_id = match self.durable_source {
            Some(source) => device_id.with_durable_source(source),
            None => device_id,
        };
        device_id.init(store.as_ref())?;
        let device_id = Arc::new(device_id);

        let facts = self
            .facts
            .unwrap_or_else(|| Arc::new(HostDeviceFacts::new(config.app_version.clone())));
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock::new()));
        let crash = Arc::new(CrashDetails::new());

        let dispatcher = Dispatcher::new(
            Arc::clone(&store),
            Arc::clone(&device_id) as Arc<dyn IdentityProvider>,
            transmitter,
            runtime,
        );
        let queue = RequestQueue::new(
            Arc::clone(&config),
            Arc::clone(&store),
            facts,
            Arc::clone(&crash),
            Arc::clone(&clock),
            dispatcher.clone(),
        );

        let telemetry = Arc::new(Telemetry {
            events: EventBuffer::new(Arc::clone(&store), Arc::clone(&clock)),
            config,
            store,
            device_id,
            crash,
            clock,
            queue,
            dispatcher,
            session: Mutex::new(SessionState::default()),
            timer: CancellationToken::new(),
        });
        telemetry.spawn_session_timer();

        info!(
            "Telemetry initialized (endpoint={}, pending={})",
            telemetry.config.endpoint,
            telemetry.pending_requests().unwrap_or(0)
        );

        // Requests persisted by an earlier run go out as soon as possible.
        telemetry.dispatcher.wake();
        Ok(telemetry)
    }
}

/// Opens the sled store at `store_path`, or an in-memory one when unset.
pub fn open_store(config: &Config) -> Result<Arc<dyn RequestStore>, TelemetryError> {
    match &config.store_path {
        #[cfg(feature = "sled-store")]
        Some(path) => Ok(Arc::new(crate::store::SledStore::open(path)?)),
        #[cfg(not(feature = "sled-store"))]
        Some(path) => {
            warn!(
                "Durable store support is disabled, ignoring store path {}",
                path.display()
            );
            Ok(Arc::new(MemoryStore::new()))
        }
        None => Ok(Arc::new(MemoryStore::new())),
    }
}

pub struct Telemetry {
    config: Arc<Config>,
    store: Arc<dyn RequestStore>,
    device_id: Arc<DeviceId>,
    events: EventBuffer,
    crash: Arc<CrashDetails>,
    clock: Arc<dyn Clock>,
    queue: RequestQueue,
    dispatcher: Dispatcher,
    session: Mutex<SessionState>,
    timer: CancellationToken,
}

impl Telemetry {
    pub fn builder(config: Config) -> TelemetryBuilder {
        TelemetryBuilder::new(config)
    }

    fn spawn_session_timer(self: &Arc<Self>) {
        let telemetry: Weak<Self> = Arc::downgrade(self);
        let cancel = self.timer.clone();
        let period = self.config.session_update_interval;
        if period.is_zero() {
            warn!("Session update interval is zero, periodic updates disabled");
            return;
        }

        self.dispatcher.runtime().spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Session timer stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        let Some(telemetry) = telemetry.upgrade() else {
                            break;
                        };
                        if let Err(e) = telemetry.on_timer() {
                            warn!("Session update failed: {}", e);
                        }
                    }
                }
            }
        });
    }

    /// Periodic tick: report session time and flush buffered events while
    /// a session is active.
    pub fn on_timer(&self) -> Result<(), TelemetryError> {
        let mut session = self.session.lock();
        if session.activity_count == 0 {
            return Ok(());
        }

        self.queue.update_session(session.take_elapsed_seconds())?;
        self.flush_events()
    }

    /// A view became visible. The first one begins a session.
    pub fn on_visible(&self, name: &str) -> Result<(), TelemetryError> {
        let mut session = self.session.lock();
        debug!("Visible: {}", name);

        if session.activity_count == 0 {
            session.last_report = Some(Instant::now());
            self.queue.begin_session()?;
        }
        session.activity_count += 1;
        Ok(())
    }

    /// A view was hidden. The last one ends the session.
    pub fn on_hidden(&self, name: &str) -> Result<(), TelemetryError> {
        let mut session = self.session.lock();
        debug!("Hidden: {}", name);

        if session.activity_count == 0 {
            return Err(TelemetryError::invalid_argument(format!(
                "on_hidden('{name}') without a matching on_visible"
            )));
        }

        // The count only drops once the session end is queued, so a failed
        // call can be retried.
        if session.activity_count == 1 {
            self.flush_events()?;
            self.queue
                .end_session(session.elapsed_seconds(Instant::now()))?;
            session.last_report = None;
        }
        session.activity_count -= 1;
        Ok(())
    }

    pub fn is_session_active(&self) -> bool {
        self.session.lock().activity_count > 0
    }

    pub fn record_event(&self, key: &str, count: u32) -> Result<(), TelemetryError> {
        self.record_event_with(key, None, count, 0.0)
    }

    pub fn record_event_with(
        &self,
        key: &str,
        segmentation: Option<Segmentation>,
        count: u32,
        sum: f64,
    ) -> Result<(), TelemetryError> {
        self.events.record_event(key, segmentation, count, sum)?;
        if self.events.size()? >= self.config.event_flush_threshold {
            self.flush_events()?;
        }
        Ok(())
    }

    /// Moves every buffered event into one queued request. The events stay
    /// buffered if the request cannot be queued.
    pub fn flush_events(&self) -> Result<(), TelemetryError> {
        self.events
            .flush_into(|batch| self.queue.record_events(batch))
    }

    pub fn record_location(&self, latitude: f64, longitude: f64) -> Result<(), TelemetryError> {
        if !latitude.is_finite() || !longitude.is_finite() {
            return Err(TelemetryError::invalid_argument(format!(
                "Invalid location {latitude},{longitude}"
            )));
        }

        let stamp = self.clock.now();
        let segmentation = Segmentation::from([
            ("latitude".to_string(), latitude.to_string()),
            ("longitude".to_string(), longitude.to_string()),
        ]);
        let event = Event::new(
            LOCATION_EVENT_KEY,
            Some(segmentation),
            1,
            None,
            stamp.timestamp,
            stamp.hour,
            stamp.dow,
        );
        self.queue
            .record_location(&EncodedBatch::from_events(&[event]))
    }

    pub fn send_user_data(&self, user: &UserData) -> Result<(), TelemetryError> {
        self.queue.send_user_data(user)
    }

    pub fn send_referrer_data(&self, referrer: &str) -> Result<(), TelemetryError> {
        self.queue.send_referrer_data(referrer)
    }

    pub fn add_crash_log(&self, record: impl Into<String>) {
        self.crash.add_log(record);
    }

    pub fn set_crash_segments(&self, segments: Segmentation) {
        self.crash.set_custom_segments(segments);
    }

    pub fn record_crash(&self, error: &str, nonfatal: bool) -> Result<(), TelemetryError> {
        self.queue.send_crash_report(error, nonfatal)
    }

    pub fn register_push_token(&self, token: &str) -> Result<JoinHandle<()>, TelemetryError> {
        self.queue
            .token_session(token, self.config.messaging_mode)
    }

    /// Supplies an identifier resolved by the platform, releasing any
    /// requests held back for lack of one.
    pub fn set_device_id(&self, id_type: DeviceIdType, id: &str) -> Result<(), TelemetryError> {
        if id.is_empty() {
            return Err(TelemetryError::invalid_argument("Device id must not be empty"));
        }
        self.device_id.set_id(id_type, id);
        self.dispatcher.wake();
        Ok(())
    }

    pub fn switch_device_id_type(&self, id_type: DeviceIdType) -> Result<(), TelemetryError> {
        self.device_id.switch_to_type(id_type, self.store.as_ref())?;
        self.dispatcher.wake();
        Ok(())
    }

    pub fn device_id(&self) -> Option<String> {
        self.device_id.id()
    }

    pub fn pending_requests(&self) -> Result<usize, TelemetryError> {
        Ok(self.store.connection_count()?)
    }

    pub fn buffered_events(&self) -> Result<usize, TelemetryError> {
        Ok(self.events.size()?)
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Stops the session timer. Queued requests stay in the store.
    pub fn shutdown(&self) {
        if !self.timer.is_cancelled() {
            info!("Shutting down telemetry");
            self.timer.cancel();
        }
    }
}

impl Drop for Telemetry {
    fn drop(&mut self) {
        self.timer.cancel();
    }
}
