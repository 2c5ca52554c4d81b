use super::{DispatchState, DispatcherInner, PassOutcome, PassReport};
use crate::queue::params::form_encode;
use crate::store::begin_session_anchor;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Returns the dispatcher to idle when a pass ends, including by panic.
struct PassGuard<'a> {
    inner: &'a DispatcherInner,
    released: bool,
}

impl<'a> PassGuard<'a> {
    fn new(inner: &'a DispatcherInner) -> Self {
        Self {
            inner,
            released: false,
        }
    }
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        if !self.released {
            *self.inner.state.lock() = DispatchState::Idle;
        }
        self.inner.idle.notify_waiters();
    }
}

/// Appends the device and session identifiers to a stored request.
pub(super) fn wire_request(request: &str, device_id: &str, anchor: &str) -> String {
    format!(
        "{}&device_id={}&session_id={}",
        request,
        form_encode(device_id),
        form_encode(&format!("{anchor}{device_id}"))
    )
}

pub(super) async fn run_pass(inner: Arc<DispatcherInner>) -> PassReport {
    let start = Instant::now();
    let mut guard = PassGuard::new(&inner);
    let mut identity = inner.identity.snapshot();
    let mut sent = 0;

    debug!("Dispatch pass started");

    let outcome = loop {
        // Empty check and transition to idle share the state lock with wake().
        let head = {
            let mut state = inner.state.lock();
            match inner.store.first_connection() {
                Ok(Some(head)) => head,
                Ok(None) => {
                    // Stats land before waiters can observe the idle state.
                    inner.record(&PassReport {
                        sent,
                        outcome: PassOutcome::Drained,
                    });
                    *state = DispatchState::Idle;
                    guard.released = true;
                    break PassOutcome::Drained;
                }
                Err(e) => {
                    error!("Failed to read pending requests: {}", e);
                    break PassOutcome::StoreFailure(e.to_string());
                }
            }
        };

        let Some(device_id) = identity.id().map(str::to_string) else {
            // Same lock as wake(): an id set after this re-check finds the
            // dispatcher idle and starts its own pass.
            let mut state = inner.state.lock();
            identity = inner.identity.snapshot();
            if identity.is_resolved() {
                debug!("Device id resolved during the pass, continuing");
                continue;
            }
            info!("No device id available yet, holding back request {}", head);
            inner.record(&PassReport {
                sent,
                outcome: PassOutcome::IdentityUnresolved,
            });
            *state = DispatchState::Idle;
            guard.released = true;
            break PassOutcome::IdentityUnresolved;
        };

        let anchor = match begin_session_anchor(inner.store.as_ref()) {
            Ok(anchor) => anchor,
            Err(e) => {
                error!("Failed to read session anchor: {}", e);
                break PassOutcome::StoreFailure(e.to_string());
            }
        };

        let request = wire_request(&head, &device_id, &anchor);
        debug!("Submitting request: {}", request);

        let result = inner.transmitter.transmit(&request).await;
        if !result.is_success() {
            warn!("Dispatch pass stopped after {} sent: {:?}", sent, result);
            break PassOutcome::Stalled(result);
        }

        match inner.store.remove_connection(&head) {
            Ok(true) => sent += 1,
            Ok(false) => {
                warn!("Sent request was already gone from the store: {}", head);
                sent += 1;
            }
            Err(e) => {
                error!("Failed to retire sent request: {}", e);
                break PassOutcome::StoreFailure(e.to_string());
            }
        }
    };

    let report = PassReport { sent, outcome };
    if !guard.released {
        inner.record(&report);
    }

    if report.outcome == PassOutcome::Drained {
        info!(
            "Dispatch pass drained the queue ({} sent in {:?})",
            report.sent,
            start.elapsed()
        );
    } else {
        info!(
            "Dispatch pass ended with {} sent: {:?}",
            report.sent, report.outcome
        );
    }

    drop(guard);
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_request_appends_identifiers() {
        assert_eq!(
            wire_request("app_key=k&timestamp=1", "dev-1", "1700000000"),
            "app_key=k&timestamp=1&device_id=dev-1&session_id=1700000000dev-1"
        );
    }

    #[test]
    fn test_wire_request_encodes_identifiers() {
        assert_eq!(
            wire_request("app_key=k", "a b&c", ""),
            "app_key=k&device_id=a+b%26c&session_id=a+b%26c"
        );
    }
}
