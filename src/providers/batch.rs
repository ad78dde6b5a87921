//! Batch-vs-individual request planner.
//!
//! Splits a key list into provider-sized chunks, prefers batch endpoints,
//! and falls back to individual calls when a batch fails. Every outbound
//! call goes through the gate and the breaker; a `CircuitOpen` aborts the
//! plan and returns whatever was gathered with `partial = true`.
//!
//! The planner does not interpret responses; it returns raw per-key records.

use std::collections::HashMap;
use std::future::Future;

use futures_util::{stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::ProviderLimits;
use crate::models::OhlcvCandle;

use super::adapter::{FieldSet, PartialRecord, ProviderAdapter, Timeframe};
use super::breaker::{CallOutcome, CircuitBreaker};
use super::error::ProviderError;
use super::gate::RateLimitGate;

/// What a plan produced, plus the accounting the cost tracker needs.
#[derive(Debug)]
pub struct BatchOutcome<T> {
    pub records: HashMap<String, T>,
    /// True when the plan aborted early (circuit open, cancellation, auth).
    pub partial: bool,
    pub batch_calls: u64,
    pub individual_calls: u64,
    /// Responses that arrived but could not be decoded.
    pub parse_errors: u64,
    /// The provider rejected our credentials; skip it for the cycle.
    pub auth_failed: bool,
}

impl<T> BatchOutcome<T> {
    fn new() -> Self {
        Self {
            records: HashMap::new(),
            partial: false,
            batch_calls: 0,
            individual_calls: 0,
            parse_errors: 0,
            auth_failed: false,
        }
    }
}

pub struct BatchPlanner<'a> {
    gate: &'a RateLimitGate,
    breaker: &'a CircuitBreaker,
    limits: ProviderLimits,
}

impl<'a> BatchPlanner<'a> {
    pub fn new(gate: &'a RateLimitGate, breaker: &'a CircuitBreaker, limits: ProviderLimits) -> Self {
        Self {
            gate,
            breaker,
            limits,
        }
    }

    /// One guarded outbound call: breaker permit, gate permit, timeout,
    /// cancellation, then outcome recording.
    async fn call<T, Fut>(
        &self,
        provider: &str,
        cancel: &CancellationToken,
        f: impl FnOnce() -> Fut,
    ) -> Result<T, ProviderError>
    where
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        if !self.breaker.permit(provider) {
            return Err(ProviderError::CircuitOpen(provider.to_string()));
        }

        let permit = tokio::select! {
            _ = cancel.cancelled() => {
                self.breaker.record(provider, CallOutcome::Abandoned);
                return Err(ProviderError::Cancelled);
            }
            p = self.gate.acquire(provider) => p?,
        };

        let result = tokio::select! {
            _ = cancel.cancelled() => Err(ProviderError::Cancelled),
            res = tokio::time::timeout(self.limits.timeout, f()) => match res {
                Ok(r) => r,
                Err(_) => Err(ProviderError::Timeout),
            },
        };
        drop(permit);

        let outcome = match &result {
            Ok(_) => CallOutcome::Success,
            Err(e) if e.counts_toward_breaker() => CallOutcome::Failure,
            Err(ProviderError::Cancelled) | Err(ProviderError::Auth) => CallOutcome::Abandoned,
            // NotFound / Parse prove the provider is alive.
            Err(_) => CallOutcome::Success,
        };
        self.breaker.record(provider, outcome);

        result
    }

    /// Fetch partial records for `keys`, batching where the provider allows.
    pub async fn fetch_records(
        &self,
        adapter: &dyn ProviderAdapter,
        keys: &[String],
        fields: FieldSet,
        cancel: &CancellationToken,
        parallelism: usize,
    ) -> BatchOutcome<PartialRecord> {
        let provider = adapter.name();
        let mut out = BatchOutcome::new();

        for chunk in keys.chunks(self.limits.batch_size.max(1)) {
            if cancel.is_cancelled() {
                out.partial = true;
                break;
            }

            if adapter.supports_batch() {
                match self
                    .call(provider, cancel, || adapter.batch_fetch(chunk, fields))
                    .await
                {
                    Ok(map) => {
                        out.batch_calls += 1;
                        out.records.extend(map);
                        continue;
                    }
                    Err(ProviderError::CircuitOpen(_)) | Err(ProviderError::Cancelled) => {
                        out.partial = true;
                        break;
                    }
                    Err(ProviderError::Auth) => {
                        out.auth_failed = true;
                        out.partial = true;
                        break;
                    }
                    Err(e) => {
                        if matches!(e, ProviderError::Parse(_)) {
                            out.parse_errors += 1;
                        }
                        warn!(provider, error = %e, "batch fetch failed, falling back to individual calls");
                    }
                }
            }

            let aborted = self
                .individual_records(adapter, chunk, fields, cancel, parallelism, &mut out)
                .await;
            if aborted {
                out.partial = true;
                break;
            }
        }

        debug!(
            provider,
            keys = keys.len(),
            got = out.records.len(),
            batch_calls = out.batch_calls,
            individual_calls = out.individual_calls,
            partial = out.partial,
            "record plan done"
        );
        out
    }

    async fn individual_records(
        &self,
        adapter: &dyn ProviderAdapter,
        chunk: &[String],
        fields: FieldSet,
        cancel: &CancellationToken,
        parallelism: usize,
        out: &mut BatchOutcome<PartialRecord>,
    ) -> bool {
        let provider = adapter.name();

        let results: Vec<(String, Result<Option<PartialRecord>, ProviderError>)> =
            stream::iter(chunk.iter().cloned())
                .map(|key| async move {
                    let res = self
                        .call(provider, cancel, || adapter.single_fetch(&key, fields))
                        .await;
                    (key, res)
                })
                .buffer_unordered(parallelism.max(1))
                .collect()
                .await;

        let mut aborted = false;
        for (key, res) in results {
            match res {
                Ok(Some(rec)) => {
                    out.individual_calls += 1;
                    out.records.insert(key, rec);
                }
                Ok(None) | Err(ProviderError::NotFound) => {
                    out.individual_calls += 1;
                }
                Err(ProviderError::CircuitOpen(_)) => {
                    aborted = true;
                }
                Err(ProviderError::Cancelled) => {
                    aborted = true;
                }
                Err(ProviderError::Auth) => {
                    out.auth_failed = true;
                    aborted = true;
                }
                Err(e) => {
                    out.individual_calls += 1;
                    if matches!(e, ProviderError::Parse(_)) {
                        out.parse_errors += 1;
                    }
                    warn!(provider, token = %key, error = %e, "individual fetch failed");
                }
            }
        }
        aborted
    }

    /// Fetch normalized candles for `keys` at one timeframe.
    pub async fn fetch_ohlcv(
        &self,
        adapter: &dyn ProviderAdapter,
        keys: &[String],
        timeframe: Timeframe,
        limit: usize,
        cancel: &CancellationToken,
        parallelism: usize,
    ) -> BatchOutcome<Vec<OhlcvCandle>> {
        let provider = adapter.name();
        let mut out = BatchOutcome::new();

        for chunk in keys.chunks(self.limits.batch_size.max(1)) {
            if cancel.is_cancelled() {
                out.partial = true;
                break;
            }

            if adapter.supports_ohlcv_batch() {
                match self
                    .call(provider, cancel, || {
                        adapter.ohlcv_batch_fetch(chunk, timeframe, limit)
                    })
                    .await
                {
                    Ok(map) => {
                        out.batch_calls += 1;
                        out.records.extend(map);
                        continue;
                    }
                    Err(ProviderError::CircuitOpen(_)) | Err(ProviderError::Cancelled) => {
                        out.partial = true;
                        break;
                    }
                    Err(ProviderError::Auth) => {
                        out.auth_failed = true;
                        out.partial = true;
                        break;
                    }
                    Err(e) => {
                        if matches!(e, ProviderError::Parse(_)) {
                            out.parse_errors += 1;
                        }
                        warn!(provider, error = %e, "batch ohlcv failed, falling back to individual calls");
                    }
                }
            }

            let results: Vec<(String, Result<Option<Vec<OhlcvCandle>>, ProviderError>)> =
                stream::iter(chunk.iter().cloned())
                    .map(|key| async move {
                        let res = self
                            .call(provider, cancel, || {
                                adapter.ohlcv_fetch(&key, timeframe, limit)
                            })
                            .await;
                        (key, res)
                    })
                    .buffer_unordered(parallelism.max(1))
                    .collect()
                    .await;

            let mut aborted = false;
            for (key, res) in results {
                match res {
                    Ok(Some(candles)) => {
                        out.individual_calls += 1;
                        out.records.insert(key, candles);
                    }
                    Ok(None) | Err(ProviderError::NotFound) => {
                        out.individual_calls += 1;
                    }
                    Err(ProviderError::CircuitOpen(_)) | Err(ProviderError::Cancelled) => {
                        aborted = true;
                    }
                    Err(ProviderError::Auth) => {
                        out.auth_failed = true;
                        aborted = true;
                    }
                    Err(e) => {
                        out.individual_calls += 1;
                        if matches!(e, ProviderError::Parse(_)) {
                            out.parse_errors += 1;
                        }
                        warn!(provider, token = %key, timeframe = timeframe.as_str(), error = %e, "ohlcv fetch failed");
                    }
                }
            }
            if aborted {
                out.partial = true;
                break;
            }
        }

        out
    }
}
