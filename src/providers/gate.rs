//! Per-provider rate-limit gate.
//!
//! Bounds in-flight concurrency with a semaphore and enforces a minimum
//! spacing between the start of consecutive outbound calls. Callers hold the
//! returned permit for the duration of the call.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::trace;

use crate::config::ProviderLimits;

use super::error::ProviderError;

struct Lane {
    sem: Arc<Semaphore>,
    min_spacing: Duration,
    /// Earliest instant the next call may start.
    next_start: tokio::sync::Mutex<Option<Instant>>,
}

/// Held while an outbound call is in flight; dropping it frees the slot.
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
}

pub struct RateLimitGate {
    limits: HashMap<String, ProviderLimits>,
    lanes: RwLock<HashMap<String, Arc<Lane>>>,
}

impl RateLimitGate {
    pub fn new(limits: HashMap<String, ProviderLimits>) -> Self {
        Self {
            limits,
            lanes: RwLock::new(HashMap::new()),
        }
    }

    fn lane(&self, provider: &str) -> Arc<Lane> {
        if let Some(lane) = self.lanes.read().get(provider) {
            return lane.clone();
        }

        let limits = self
            .limits
            .get(provider)
            .cloned()
            .unwrap_or_else(ProviderLimits::free);

        let mut lanes = self.lanes.write();
        lanes
            .entry(provider.to_string())
            .or_insert_with(|| {
                Arc::new(Lane {
                    sem: Arc::new(Semaphore::new(limits.max_concurrency.max(1))),
                    min_spacing: limits.min_spacing,
                    next_start: tokio::sync::Mutex::new(None),
                })
            })
            .clone()
    }

    /// Acquire a permit for `provider`, suspending until both a concurrency
    /// slot and the spacing window allow the call to start.
    pub async fn acquire(&self, provider: &str) -> Result<GatePermit, ProviderError> {
        let lane = self.lane(provider);

        let permit = lane
            .sem
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ProviderError::Cancelled)?;

        let mut next_start = lane.next_start.lock().await;
        let now = Instant::now();
        if let Some(at) = *next_start {
            if at > now {
                trace!(provider, wait_ms = (at - now).as_millis() as u64, "gate spacing");
                tokio::time::sleep_until(at).await;
            }
        }
        *next_start = Some(Instant::now() + lane.min_spacing);
        drop(next_start);

        Ok(GatePermit { _permit: permit })
    }
}
