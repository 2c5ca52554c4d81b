//! Single-flight drain of the request store.
//!
//! At most one worker runs at a time. A wake while a worker is active is
//! coalesced: the worker re-reads the store and the device identity before
//! it goes idle, under the same lock as the transition to idle, so an entry
//! appended or an id resolved concurrently is either seen by the worker or
//! starts a new pass.

mod worker;

use crate::device::IdentityProvider;
use crate::domain::TelemetryError;
use crate::sender::{Transmit, TransmitOutcome};
use crate::store::RequestStore;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tracing::{debug, error};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DispatchState {
    Idle,
    Draining,
}

/// Why a pass ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    /// The store was found empty.
    Drained,
    /// The head request was not accepted; it stays queued.
    Stalled(TransmitOutcome),
    /// No device identifier yet; nothing was sent.
    IdentityUnresolved,
    StoreFailure(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassReport {
    pub sent: usize,
    pub outcome: PassOutcome,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub passes: u64,
    pub sent: u64,
    pub failures: u64,
}

#[derive(Debug, Default)]
struct StatsCounters {
    passes: AtomicU64,
    sent: AtomicU64,
    failures: AtomicU64,
}

struct DispatcherInner {
    store: Arc<dyn RequestStore>,
    identity: Arc<dyn IdentityProvider>,
    transmitter: Arc<dyn Transmit>,
    runtime: Handle,
    state: Mutex<DispatchState>,
    idle: Notify,
    counters: StatsCounters,
    last_pass: Mutex<Option<PassReport>>,
}

impl DispatcherInner {
    fn record(&self, report: &PassReport) {
        self.counters.passes.fetch_add(1, Ordering::Relaxed);
        self.counters
            .sent
            .fetch_add(report.sent as u64, Ordering::Relaxed);
        if matches!(
            report.outcome,
            PassOutcome::Stalled(_) | PassOutcome::StoreFailure(_)
        ) {
            self.counters.failures.fetch_add(1, Ordering::Relaxed);
        }
        *self.last_pass.lock() = Some(report.clone());
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn RequestStore>,
        identity: Arc<dyn IdentityProvider>,
        transmitter: Arc<dyn Transmit>,
        runtime: Handle,
    ) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                store,
                identity,
                transmitter,
                runtime,
                state: Mutex::new(DispatchState::Idle),
                idle: Notify::new(),
                counters: StatsCounters::default(),
                last_pass: Mutex::new(None),
            }),
        }
    }

    /// Binds to the runtime the caller is running on.
    pub fn on_current_runtime(
        store: Arc<dyn RequestStore>,
        identity: Arc<dyn IdentityProvider>,
        transmitter: Arc<dyn Transmit>,
    ) -> Result<Self, TelemetryError> {
        let runtime = Handle::try_current()
            .map_err(|e| TelemetryError::Initialization(format!("No tokio runtime: {e}")))?;
        Ok(Self::new(store, identity, transmitter, runtime))
    }

    /// Starts a pass unless one is running or there is nothing to send.
    /// Never blocks on network I/O.
    pub fn wake(&self) {
        let mut state = self.inner.state.lock();
        if *state == DispatchState::Draining {
            debug!("Dispatch pass already running, wake coalesced");
            return;
        }

        match self.inner.store.is_empty_connections() {
            Ok(true) => return,
            Ok(false) => {}
            Err(e) => {
                error!("Cannot read request store: {}", e);
                return;
            }
        }

        *state = DispatchState::Draining;
        drop(state);

        let inner = Arc::clone(&self.inner);
        self.inner.runtime.spawn(async move {
            worker::run_pass(inner).await;
        });
    }

    pub fn is_draining(&self) -> bool {
        *self.inner.state.lock() == DispatchState::Draining
    }

    /// Resolves once no pass is running.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if !self.is_draining() {
                return;
            }
            notified.await;
        }
    }

    pub fn stats(&self) -> DispatchStats {
        let counters = &self.inner.counters;
        DispatchStats {
            passes: counters.passes.load(Ordering::Relaxed),
            sent: counters.sent.load(Ordering::Relaxed),
            failures: counters.failures.load(Ordering::Relaxed),
        }
    }

    pub fn last_pass(&self) -> Option<PassReport> {
        self.inner.last_pass.lock().clone()
    }

    pub fn runtime(&self) -> &Handle {
        &self.inner.runtime
    }

    pub fn store(&self) -> &Arc<dyn RequestStore> {
        &self.inner.store
    }
}
