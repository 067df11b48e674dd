//! Debounced, fire-and-forget liveness probes.
//!
//! A probe never evicts a record and never reports back to the caller that
//! triggered it. Outcomes are only logged and kept for [`ProbeSnapshot`].

use crate::connection::TenantConnection;
use crate::key::TenantKey;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// Result of the most recent probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The connection answered the ping.
    Healthy,
    /// The ping returned an error.
    Failed(String),
    /// The ping did not finish within the probe timeout.
    TimedOut,
}

impl ProbeOutcome {
    /// Whether the probe succeeded.
    pub fn is_healthy(&self) -> bool {
        matches!(self, ProbeOutcome::Healthy)
    }
}

/// Read-only view of a record's probe state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeSnapshot {
    /// When the last probe completed. `None` until the first one finishes.
    pub last_verified_at: Option<Instant>,
    /// Outcome of the last completed probe.
    pub last_outcome: Option<ProbeOutcome>,
    /// Failed or timed-out probes since the last healthy one.
    pub consecutive_failures: u32,
    /// Completed probes.
    pub probes: u64,
    /// A probe is currently running.
    pub in_flight: bool,
}

#[derive(Debug, Default)]
struct ProbeHistory {
    last_verified_at: Option<Instant>,
    last_outcome: Option<ProbeOutcome>,
    consecutive_failures: u32,
    probes: u64,
}

/// Per-record probe bookkeeping, shared with the background task.
#[derive(Debug, Default)]
pub(crate) struct ProbeState {
    in_flight: AtomicBool,
    history: Mutex<ProbeHistory>,
}

impl ProbeState {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Claim the right to run a probe. Succeeds only if no probe is running
    /// and `interval` has passed since the last one completed.
    fn try_begin(&self, interval: Duration) -> bool {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        let due = self
            .history
            .lock()
            .last_verified_at
            .is_none_or(|at| at.elapsed() >= interval);

        if !due {
            self.in_flight.store(false, Ordering::Release);
        }
        due
    }

    /// Record the outcome and release the in-flight flag.
    fn finish(&self, outcome: ProbeOutcome) {
        {
            let mut history = self.history.lock();
            history.last_verified_at = Some(Instant::now());
            history.probes += 1;
            if outcome.is_healthy() {
                history.consecutive_failures = 0;
            } else {
                history.consecutive_failures += 1;
            }
            history.last_outcome = Some(outcome);
        }
        self.in_flight.store(false, Ordering::Release);
    }

    pub(crate) fn snapshot(&self) -> ProbeSnapshot {
        let history = self.history.lock();
        ProbeSnapshot {
            last_verified_at: history.last_verified_at,
            last_outcome: history.last_outcome.clone(),
            consecutive_failures: history.consecutive_failures,
            probes: history.probes,
            in_flight: self.in_flight.load(Ordering::Acquire),
        }
    }
}

/// Start a background probe for `connection` if one is due.
///
/// Returns immediately; the probe runs on its own task with its own timeout.
pub(crate) fn schedule<C: TenantConnection>(
    key: &TenantKey,
    connection: &Arc<C>,
    state: &Arc<ProbeState>,
    interval: Duration,
    timeout: Duration,
) -> bool {
    if !state.try_begin(interval) {
        return false;
    }

    let key = key.clone();
    let connection = Arc::clone(connection);
    let state = Arc::clone(state);

    tokio::spawn(async move {
        let outcome = match tokio::time::timeout(timeout, connection.ping()).await {
            Ok(Ok(())) => ProbeOutcome::Healthy,
            Ok(Err(e)) => {
                tracing::warn!(tenant = %key, error = %e, "Tenant connection probe failed");
                ProbeOutcome::Failed(e.to_string())
            }
            Err(_) => {
                tracing::warn!(tenant = %key, timeout = ?timeout, "Tenant connection probe timed out");
                ProbeOutcome::TimedOut
            }
        };
        tracing::trace!(tenant = %key, outcome = ?outcome, "Tenant connection probe finished");
        state.finish(outcome);
    });

    true
}
