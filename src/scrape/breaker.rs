use crate::scrape::error::ScrapeError;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Circuit state of a target, visible for logging and tests.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Circuit {
    Closed,
    Open,
    HalfOpen,
}

/// Breaker tuning, shared by every target of a scheduler.
#[derive(Clone, Copy, Debug)]
pub struct BreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// How long the circuit stays open before a half-open probe.
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 10,
            cooldown: Duration::from_secs(30),
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    circuit: Circuit,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    last_success: Option<Instant>,
}

/// Per-target failure-count/half-open state machine guarding
/// connection attempts.
///
/// A downed database must not cost every concurrent scrape a full
/// connect/auth timeout: after `failure_threshold` consecutive
/// failures the circuit opens and callers are short-circuited with
/// [`ScrapeError::ConnectFailed`] without any network attempt. Once
/// the cooldown elapses exactly one caller probes (half-open);
/// everyone else waits on that probe's outcome instead of issuing
/// their own.
pub struct CircuitBreaker {
    server: String,
    config: BreakerConfig,
    state: Mutex<BreakerState>,
    // Serializes probes: at most one in-flight connection attempt per
    // target, no matter how many scrapes arrive concurrently.
    probe_gate: tokio::sync::Mutex<()>,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(server: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            server: server.into(),
            config,
            state: Mutex::new(BreakerState {
                circuit: Circuit::Closed,
                consecutive_failures: 0,
                opened_at: None,
                last_success: None,
            }),
            probe_gate: tokio::sync::Mutex::new(()),
        }
    }

    /// Runs `probe` under the breaker.
    ///
    /// # Errors
    ///
    /// Returns [`ScrapeError::ConnectFailed`] immediately while the
    /// circuit is open, or the probe's own error after recording the
    /// failure.
    pub async fn call<F, Fut>(&self, probe: F) -> Result<(), ScrapeError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), ScrapeError>>,
    {
        if self.short_circuits() {
            return Err(self.open_error());
        }

        let entered = Instant::now();
        let _gate = self.probe_gate.lock().await;

        // Re-check after waiting: the probe we queued behind may have
        // re-opened the circuit or already proven the target healthy.
        if self.short_circuits() {
            return Err(self.open_error());
        }
        if self.succeeded_since(entered) {
            return Ok(());
        }

        match probe().await {
            Ok(()) => {
                self.record_success();
                Ok(())
            }
            Err(err) => {
                self.record_failure();
                Err(err)
            }
        }
    }

    /// Current circuit, after applying cooldown expiry.
    #[must_use]
    pub fn circuit(&self) -> Circuit {
        let _ = self.short_circuits();
        self.lock_state().circuit
    }

    fn open_error(&self) -> ScrapeError {
        ScrapeError::connect(&self.server, "circuit breaker open")
    }

    /// True while the circuit is open and cooling down. Transitions
    /// Open -> HalfOpen once the cooldown elapses.
    fn short_circuits(&self) -> bool {
        let mut state = self.lock_state();
        if state.circuit != Circuit::Open {
            return false;
        }
        let cooled_down = state
            .opened_at
            .is_some_and(|at| at.elapsed() >= self.config.cooldown);
        if cooled_down {
            debug!(server = %self.server, "circuit breaker cooldown elapsed, half-open");
            state.circuit = Circuit::HalfOpen;
            return false;
        }
        true
    }

    fn succeeded_since(&self, entered: Instant) -> bool {
        let state = self.lock_state();
        state.circuit == Circuit::Closed && state.last_success.is_some_and(|at| at >= entered)
    }

    fn record_success(&self) {
        let mut state = self.lock_state();
        state.circuit = Circuit::Closed;
        state.consecutive_failures = 0;
        state.opened_at = None;
        state.last_success = Some(Instant::now());
    }

    fn record_failure(&self) {
        let mut state = self.lock_state();
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        let opens = state.circuit == Circuit::HalfOpen
            || state.consecutive_failures >= self.config.failure_threshold;
        if opens {
            if state.circuit != Circuit::Open {
                warn!(
                    server = %self.server,
                    failures = state.consecutive_failures,
                    cooldown = ?self.config.cooldown,
                    "circuit breaker opened"
                );
            }
            state.circuit = Circuit::Open;
            state.opened_at = Some(Instant::now());
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, BreakerState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
