//! Pipeline controller.
//!
//! Owns the core context (gate, breaker, cost tracker, caches, provider
//! registry) and runs one cycle at a time: intake and pre-filter, the four
//! stages in strict order, adaptive expensive-stage width under breaker
//! pressure, the cycle budget, and the cost report.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{EngineConfig, PROVIDER_METADATA, PROVIDER_OHLCV, PROVIDER_SECURITY};
use crate::models::{Candidate, CycleOutput, DataQuality, DiscoveryRecord};
use crate::providers::{BatchPlanner, CircuitBreaker, ProviderRegistry, RateLimitGate};
use crate::storage::AlertedSet;

use super::cost::CostTracker;
use super::enhanced::{self, EnhancedProviders};
use super::enrichment::EnrichmentCache;
use super::{triage, validation, velocity};

/// TTL for warm-cycle provider response caching.
const CACHE_TTL: Duration = Duration::from_secs(300);

/// Everything the stages need, passed explicitly instead of living in
/// module-level singletons. The controller owns it; stages borrow it.
pub struct CoreContext {
    pub config: EngineConfig,
    pub gate: RateLimitGate,
    pub breaker: CircuitBreaker,
    pub cost: CostTracker,
    pub registry: ProviderRegistry,
    pub cache: EnrichmentCache,
}

impl CoreContext {
    pub fn new(config: EngineConfig, registry: ProviderRegistry) -> Self {
        let gate = RateLimitGate::new(config.providers.clone());
        let breaker = CircuitBreaker::new(config.breaker.clone());
        Self {
            config,
            gate,
            breaker,
            cost: CostTracker::new(),
            registry,
            cache: EnrichmentCache::new(CACHE_TTL),
        }
    }

    fn planner_for(&self, provider: &str) -> BatchPlanner<'_> {
        BatchPlanner::new(&self.gate, &self.breaker, self.config.limits(provider))
    }
}

#[derive(Debug, Error)]
#[error("a scan cycle is already running")]
pub struct CycleBusy;

pub struct PipelineController {
    ctx: CoreContext,
    alerted: Arc<dyn AlertedSet>,
    cycle_lock: tokio::sync::Mutex<()>,
}

impl PipelineController {
    pub fn new(ctx: CoreContext, alerted: Arc<dyn AlertedSet>) -> Self {
        Self {
            ctx,
            alerted,
            cycle_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn context(&self) -> &CoreContext {
        &self.ctx
    }

    /// Run a cycle, waiting for any in-flight cycle to finish first.
    pub async fn run_cycle(&self, discovery: Vec<DiscoveryRecord>) -> CycleOutput {
        let _guard = self.cycle_lock.lock().await;
        self.cycle_inner(discovery).await
    }

    /// Run a cycle, rejecting the call if one is already in flight.
    pub async fn try_run_cycle(
        &self,
        discovery: Vec<DiscoveryRecord>,
    ) -> Result<CycleOutput, CycleBusy> {
        let Ok(_guard) = self.cycle_lock.try_lock() else {
            return Err(CycleBusy);
        };
        Ok(self.cycle_inner(discovery).await)
    }

    async fn cycle_inner(&self, discovery: Vec<DiscoveryRecord>) -> CycleOutput {
        let ctx = &self.ctx;
        let started = Instant::now();

        let cancel = CancellationToken::new();
        let watchdog = {
            let cancel = cancel.clone();
            let budget = ctx.config.cycle_budget;
            tokio::spawn(async move {
                tokio::time::sleep(budget).await;
                warn!("cycle budget exhausted, cancelling in-flight work");
                cancel.cancel();
            })
        };

        let pool = self.intake(discovery);
        let pool_count = pool.len();

        // Stage 1: pure triage.
        let stage1 = triage::run(pool, &ctx.config.stages, ctx.config.stages.stage1_cap);
        let s1 = stage1.len() as u64;

        // Providers latched dead for the rest of the cycle on auth failure.
        let mut dead: HashSet<String> = HashSet::new();

        // Stage 2: batch enrichment.
        let stage2 = if cancel.is_cancelled() {
            let (output, report) = self.finish_early(stage1, pool_count, s1, started);
            watchdog.abort();
            return CycleOutput {
                ranked_candidates: output,
                cost_report: report,
            };
        } else {
            let metadata_arc = ctx.registry.get(PROVIDER_METADATA);
            let security_arc = ctx.registry.get(PROVIDER_SECURITY);
            let providers = EnhancedProviders {
                metadata: metadata_arc
                    .as_deref()
                    .map(|a| (a, ctx.planner_for(PROVIDER_METADATA))),
                security: security_arc
                    .as_deref()
                    .map(|a| (a, ctx.planner_for(PROVIDER_SECURITY))),
            };

            let result = enhanced::run(
                stage1,
                providers,
                &ctx.cache,
                &ctx.config.stages,
                &cancel,
            )
            .await;

            for outcome in &result.outcomes {
                ctx.cost.add_batch_calls(outcome.batch_calls);
                ctx.cost.add_individual_calls(outcome.individual_calls);
                ctx.cost.add_cache_hits(outcome.cache_hits);
                ctx.cost.add_cache_misses(outcome.cache_misses);
                ctx.cost.add_parse_errors(outcome.parse_errors);
                if outcome.auth_failed {
                    warn!(provider = %outcome.provider, "auth rejected, provider dead for this cycle");
                    dead.insert(outcome.provider.clone());
                }
            }
            result.survivors
        };
        let s2 = stage2.len() as u64;

        // Stage 3: validation rubric, with the expensive-stage width
        // tightened under breaker pressure.
        let cap = self.adaptive_stage4_width();
        let stage3 = validation::run(
            stage2,
            ctx.config.stages.validation_threshold,
            cap,
        );
        let s3 = stage3.len() as u64;

        // Every candidate that entered the cycle but stops short of Stage 4
        // saves the two per-timeframe expensive calls.
        ctx.cost
            .add_expensive_saved(2 * (pool_count as u64).saturating_sub(s3));

        if cancel.is_cancelled() {
            let mut survivors = stage3;
            for c in survivors.iter_mut() {
                finalize_budget_exhausted(c);
            }
            velocity::rank(&mut survivors);
            ctx.cost.set_stage_counts(s1, s2, s3, survivors.len() as u64);
            let report = ctx
                .cost
                .report(started.elapsed().as_millis() as u64, ctx.breaker.tripped());
            watchdog.abort();
            return CycleOutput {
                ranked_candidates: survivors,
                cost_report: report,
            };
        }

        // Stage 4: expensive velocity scoring.
        let ohlcv_arc = ctx
            .registry
            .get(PROVIDER_OHLCV)
            .filter(|_| !dead.contains(PROVIDER_OHLCV));
        let ohlcv = ohlcv_arc
            .as_deref()
            .map(|a| (a, ctx.planner_for(PROVIDER_OHLCV)));

        let vr = velocity::run(
            stage3,
            ohlcv,
            &ctx.cache,
            &cancel,
            ctx.config.flags.force_basic_scoring,
            ctx.config.stages.stage4_parallelism,
        )
        .await;

        ctx.cost.add_expensive_made(vr.expensive_made);
        ctx.cost.add_batch_calls(vr.batch_calls);
        ctx.cost.add_individual_calls(vr.individual_calls);
        ctx.cost.add_cache_hits(vr.cache_hits);
        ctx.cost.add_cache_misses(vr.cache_misses);
        ctx.cost.add_parse_errors(vr.parse_errors);

        let emitted = vr.candidates;
        ctx.cost
            .set_stage_counts(s1, s2, s3, emitted.len() as u64);

        watchdog.abort();
        let report = ctx
            .cost
            .report(started.elapsed().as_millis() as u64, ctx.breaker.tripped());

        info!(
            discovered = pool_count,
            emitted = emitted.len(),
            savings_pct = report.savings_pct,
            wall_clock_ms = report.wall_clock_ms,
            "cycle complete"
        );

        CycleOutput {
            ranked_candidates: emitted,
            cost_report: report,
        }
    }

    /// Intake: dedup, alerted-set suppression, and the cheap pre-filter.
    fn intake(&self, discovery: Vec<DiscoveryRecord>) -> Vec<Candidate> {
        let ctx = &self.ctx;
        let mut seen: HashSet<String> = HashSet::with_capacity(discovery.len());
        let mut pool = Vec::with_capacity(discovery.len());

        for rec in discovery {
            if rec.token_key.trim().is_empty() || rec.symbol.trim().is_empty() {
                ctx.cost.inc_discovery_dropped();
                continue;
            }
            if ctx.config.flags.disabled_sources.contains(&rec.source) {
                ctx.cost.inc_prefilter_dropped();
                continue;
            }
            if !seen.insert(rec.token_key.clone()) {
                ctx.cost.inc_discovery_dropped();
                continue;
            }
            if self.alerted.contains(&rec.token_key) {
                ctx.cost.inc_already_alerted_dropped();
                continue;
            }

            let candidate = Candidate::from_discovery(rec);
            let cap_ok = candidate.market_cap.map_or(true, |mc| mc <= 5_000_000.0);
            let volume_ok = candidate.volume_24h.map_or(true, |v| v >= 100.0);
            if !cap_ok || !volume_ok {
                ctx.cost.inc_prefilter_dropped();
                continue;
            }
            pool.push(candidate);
        }

        debug!(pool = pool.len(), "intake done");
        pool
    }

    /// Width of the expensive stage under current breaker pressure.
    fn adaptive_stage4_width(&self) -> usize {
        let ctx = &self.ctx;
        let base = ctx.config.stages.stage4_width;
        let failures = ctx.breaker.failure_count(PROVIDER_OHLCV);
        if ctx.breaker.is_open(PROVIDER_OHLCV) || failures > 0 {
            let width = base
                .saturating_sub(2 * failures as usize)
                .max(ctx.config.stages.stage4_floor);
            debug!(base, failures, width, "tightening expensive-stage width");
            width
        } else {
            base
        }
    }

    /// Budget ran out before the pipeline reached Stage 2; emit whatever
    /// triage produced, flagged partial.
    fn finish_early(
        &self,
        mut survivors: Vec<Candidate>,
        pool_count: usize,
        s1: u64,
        started: Instant,
    ) -> (Vec<Candidate>, crate::models::CostReport) {
        let ctx = &self.ctx;
        ctx.cost.add_expensive_saved(2 * pool_count as u64);
        for c in survivors.iter_mut() {
            finalize_budget_exhausted(c);
        }
        velocity::rank(&mut survivors);
        ctx.cost.set_stage_counts(s1, 0, 0, survivors.len() as u64);
        let report = ctx
            .cost
            .report(started.elapsed().as_millis() as u64, ctx.breaker.tripped());
        (survivors, report)
    }
}

/// A candidate stranded by the cycle budget keeps its best cheap score.
fn finalize_budget_exhausted(c: &mut Candidate) {
    c.final_score = Some(c.ranking_score());
    c.data_quality = DataQuality::Partial;
}
