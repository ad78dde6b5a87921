//! Per-provider circuit breaker.
//!
//! Closed -> open after enough consecutive failures inside the window;
//! open -> half-open after the cool-down, allowing a single probe;
//! probe success closes the circuit, probe failure re-opens it.
//!
//! Callers ask `permit()` before every outbound call and report the outcome
//! with `record()`. A caller refused by `permit()` must neither call the
//! provider nor record a failure.

use std::collections::{BTreeSet, HashMap};
use std::time::Instant;

use parking_lot::RwLock;
use tracing::{info, warn};

use crate::config::BreakerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    Success,
    Failure,
    /// The call never completed (cancellation, auth latch). Releases a
    /// half-open probe slot without touching the counters.
    Abandoned,
}

#[derive(Debug, Clone)]
struct Entry {
    failures: u32,
    state: CircuitState,
    last_failure: Option<Instant>,
    opened_at: Option<Instant>,
    /// True while the single half-open probe is outstanding.
    probe_in_flight: bool,
}

impl Default for Entry {
    fn default() -> Self {
        Self {
            failures: 0,
            state: CircuitState::Closed,
            last_failure: None,
            opened_at: None,
            probe_in_flight: false,
        }
    }
}

pub struct CircuitBreaker {
    config: BreakerConfig,
    entries: RwLock<HashMap<String, Entry>>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// May a call to `provider` proceed right now?
    pub fn permit(&self, provider: &str) -> bool {
        let mut entries = self.entries.write();
        let entry = entries.entry(provider.to_string()).or_default();

        match entry.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let cooled = entry
                    .opened_at
                    .map(|at| at.elapsed() >= self.config.cooldown)
                    .unwrap_or(true);
                if cooled {
                    entry.state = CircuitState::HalfOpen;
                    entry.probe_in_flight = true;
                    info!(provider, "circuit half-open, allowing probe");
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if entry.probe_in_flight {
                    false
                } else {
                    entry.probe_in_flight = true;
                    true
                }
            }
        }
    }

    /// Report the outcome of a permitted call.
    pub fn record(&self, provider: &str, outcome: CallOutcome) {
        let mut entries = self.entries.write();
        let entry = entries.entry(provider.to_string()).or_default();

        match outcome {
            CallOutcome::Success => match entry.state {
                CircuitState::HalfOpen => {
                    info!(provider, "probe succeeded, circuit closed");
                    *entry = Entry::default();
                }
                CircuitState::Closed => {
                    entry.failures = 0;
                }
                CircuitState::Open => {}
            },
            CallOutcome::Abandoned => {
                if entry.state == CircuitState::HalfOpen {
                    entry.probe_in_flight = false;
                }
            }
            CallOutcome::Failure => {
                if entry.state == CircuitState::HalfOpen {
                    warn!(provider, "probe failed, circuit re-opened");
                    entry.state = CircuitState::Open;
                    entry.opened_at = Some(Instant::now());
                    entry.probe_in_flight = false;
                    entry.last_failure = Some(Instant::now());
                    return;
                }

                // Failures outside the window do not accumulate.
                if let Some(last) = entry.last_failure {
                    if last.elapsed() > self.config.failure_window {
                        entry.failures = 0;
                    }
                }

                entry.failures += 1;
                entry.last_failure = Some(Instant::now());

                if entry.failures >= self.config.failure_threshold
                    && entry.state == CircuitState::Closed
                {
                    warn!(provider, failures = entry.failures, "circuit opened");
                    entry.state = CircuitState::Open;
                    entry.opened_at = Some(Instant::now());
                }
            }
        }
    }

    pub fn state(&self, provider: &str) -> CircuitState {
        self.entries
            .read()
            .get(provider)
            .map(|e| e.state)
            .unwrap_or(CircuitState::Closed)
    }

    #[inline]
    pub fn is_open(&self, provider: &str) -> bool {
        self.state(provider) == CircuitState::Open
    }

    pub fn failure_count(&self, provider: &str) -> u32 {
        self.entries
            .read()
            .get(provider)
            .map(|e| e.failures)
            .unwrap_or(0)
    }

    /// Providers whose circuit is currently open.
    pub fn tripped(&self) -> BTreeSet<String> {
        self.entries
            .read()
            .iter()
            .filter(|(_, e)| e.state == CircuitState::Open)
            .map(|(p, _)| p.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn breaker(threshold: u32, cooldown_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(BreakerConfig {
            failure_threshold: threshold,
            failure_window: Duration::from_secs(60),
            cooldown: Duration::from_millis(cooldown_ms),
        })
    }

    #[test]
    fn opens_after_threshold_failures() {
        let b = breaker(3, 60_000);
        for _ in 0..2 {
            assert!(b.permit("p"));
            b.record("p", CallOutcome::Failure);
        }
        assert_eq!(b.state("p"), CircuitState::Closed);

        assert!(b.permit("p"));
        b.record("p", CallOutcome::Failure);
        assert_eq!(b.state("p"), CircuitState::Open);
        assert!(!b.permit("p"));
        assert!(b.tripped().contains("p"));
    }

    #[test]
    fn success_resets_consecutive_failures() {
        let b = breaker(3, 60_000);
        b.record("p", CallOutcome::Failure);
        b.record("p", CallOutcome::Failure);
        b.record("p", CallOutcome::Success);
        b.record("p", CallOutcome::Failure);
        b.record("p", CallOutcome::Failure);
        assert_eq!(b.state("p"), CircuitState::Closed);
    }

    #[test]
    fn half_open_allows_single_probe_then_closes_on_success() {
        let b = breaker(1, 0);
        assert!(b.permit("p"));
        b.record("p", CallOutcome::Failure);
        assert_eq!(b.state("p"), CircuitState::Open);

        // Cool-down of zero: the next permit is the probe.
        assert!(b.permit("p"));
        assert_eq!(b.state("p"), CircuitState::HalfOpen);
        // No second probe while the first is outstanding.
        assert!(!b.permit("p"));

        b.record("p", CallOutcome::Success);
        assert_eq!(b.state("p"), CircuitState::Closed);
        assert_eq!(b.failure_count("p"), 0);
    }

    #[test]
    fn probe_failure_reopens() {
        let b = breaker(1, 0);
        b.permit("p");
        b.record("p", CallOutcome::Failure);

        assert!(b.permit("p"));
        b.record("p", CallOutcome::Failure);
        assert_eq!(b.state("p"), CircuitState::Open);
    }

    #[test]
    fn unknown_provider_is_closed() {
        let b = breaker(3, 1000);
        assert_eq!(b.state("nobody"), CircuitState::Closed);
        assert!(b.permit("nobody"));
    }
}
