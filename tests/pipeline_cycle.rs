//! End-to-end cycle tests.
//!
//! Drives the full pipeline through mock provider adapters: the sweet-spot
//! graduate, the imminent bonding token, low-quality trending rejects,
//! alerted-set suppression, provider outages tripping the breaker, and
//! budget exhaustion.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use gemscout::config::{
    EngineConfig, ProviderLimits, PROVIDER_METADATA, PROVIDER_OHLCV, PROVIDER_SECURITY,
};
use gemscout::models::{
    Confidence, CycleOutput, DataQuality, DiscoveryRecord, OhlcvCandle, Stage, TokenSource,
};
use gemscout::pipeline::{CoreContext, PipelineController};
use gemscout::providers::{
    FieldSet, PartialRecord, ProviderAdapter, ProviderError, ProviderRegistry, Timeframe,
};
use gemscout::storage::{AlertedSet, MemoryAlertedSet};

const GRAD_KEY: &str = "7xKXtg2CW87d97TXJSDpbD5jBkheTqA83TZRuJosgAsU";
const BOND_KEY: &str = "9WzDXwBbmkg8ZTbNMqUxvQRAyrZzDsGYdLVL9zYtAWWM";

/// Scriptable provider double.
#[derive(Default)]
struct MockAdapter {
    name: String,
    supports_batch: bool,
    supports_ohlcv_batch: bool,
    records: HashMap<String, PartialRecord>,
    candles: HashMap<(String, Timeframe), Vec<OhlcvCandle>>,
    /// Fail every call with this class.
    fail_with: Option<ProviderError>,
    /// Latency injected into every OHLCV call.
    ohlcv_delay: Duration,
}

impl MockAdapter {
    fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }
}

#[async_trait]
impl ProviderAdapter for MockAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports_batch(&self) -> bool {
        self.supports_batch
    }

    fn supports_ohlcv_batch(&self) -> bool {
        self.supports_ohlcv_batch
    }

    async fn batch_fetch(
        &self,
        keys: &[String],
        _fields: FieldSet,
    ) -> Result<HashMap<String, PartialRecord>, ProviderError> {
        if let Some(err) = &self.fail_with {
            return Err(err.clone());
        }
        Ok(keys
            .iter()
            .filter_map(|k| self.records.get(k).map(|r| (k.clone(), r.clone())))
            .collect())
    }

    async fn single_fetch(
        &self,
        key: &str,
        _fields: FieldSet,
    ) -> Result<Option<PartialRecord>, ProviderError> {
        if let Some(err) = &self.fail_with {
            return Err(err.clone());
        }
        Ok(self.records.get(key).cloned())
    }

    async fn ohlcv_fetch(
        &self,
        key: &str,
        timeframe: Timeframe,
        _limit: usize,
    ) -> Result<Option<Vec<OhlcvCandle>>, ProviderError> {
        if !self.ohlcv_delay.is_zero() {
            tokio::time::sleep(self.ohlcv_delay).await;
        }
        if let Some(err) = &self.fail_with {
            return Err(err.clone());
        }
        Ok(self.candles.get(&(key.to_string(), timeframe)).cloned())
    }

    async fn ohlcv_batch_fetch(
        &self,
        keys: &[String],
        timeframe: Timeframe,
        _limit: usize,
    ) -> Result<HashMap<String, Vec<OhlcvCandle>>, ProviderError> {
        if !self.ohlcv_delay.is_zero() {
            tokio::time::sleep(self.ohlcv_delay).await;
        }
        if let Some(err) = &self.fail_with {
            return Err(err.clone());
        }
        Ok(keys
            .iter()
            .filter_map(|k| {
                self.candles
                    .get(&(k.clone(), timeframe))
                    .map(|c| (k.clone(), c.clone()))
            })
            .collect())
    }
}

fn candles(closes: &[f64], volume: f64) -> Vec<OhlcvCandle> {
    closes
        .iter()
        .enumerate()
        .map(|(i, close)| OhlcvCandle {
            open: *close,
            high: close * 1.02,
            low: close * 0.98,
            close: *close,
            volume,
            unix_time: 1_700_000_000 + i as i64 * 900,
        })
        .collect()
}

fn active_candles(adapter: &mut MockAdapter, key: &str) {
    adapter.candles.insert(
        (key.to_string(), Timeframe::M15),
        candles(&[1.00, 1.02, 1.05, 1.10], 3_000.0),
    );
    adapter.candles.insert(
        (key.to_string(), Timeframe::M30),
        candles(&[0.95, 1.00, 1.04, 1.08], 2_400.0),
    );
}

/// Fast limits so tests never wait on gate spacing.
fn test_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    for limits in config.providers.values_mut() {
        *limits = ProviderLimits {
            max_concurrency: limits.max_concurrency,
            min_spacing: Duration::from_millis(1),
            batch_size: limits.batch_size,
            timeout: Duration::from_secs(5),
        };
    }
    config
}

fn controller_with(
    config: EngineConfig,
    adapters: Vec<MockAdapter>,
    alerted: Arc<dyn AlertedSet>,
) -> PipelineController {
    let mut registry = ProviderRegistry::new();
    for adapter in adapters {
        registry.register(Arc::new(adapter));
    }
    PipelineController::new(CoreContext::new(config, registry), alerted)
}

fn graduate_record() -> DiscoveryRecord {
    DiscoveryRecord {
        token_key: GRAD_KEY.into(),
        symbol: "FRSH".into(),
        display_name: Some("Fresh Graduate".into()),
        source: TokenSource::Graduated,
        discovery_time: Utc::now(),
        estimated_age_minutes: Some(30.0),
        market_cap: Some(150_000.0),
        price: Some(0.0015),
        liquidity: Some(60_000.0),
        volume_24h: Some(120_000.0),
        trades_24h: Some(250),
        holder_count: Some(300),
        bonding_curve_progress: Some(100.0),
        hours_since_graduation: Some(0.5),
        sol_raised_current: None,
    }
}

fn bonding_record() -> DiscoveryRecord {
    DiscoveryRecord {
        token_key: BOND_KEY.into(),
        symbol: "BOND".into(),
        display_name: None,
        source: TokenSource::Bonding,
        discovery_time: Utc::now(),
        estimated_age_minutes: Some(45.0),
        market_cap: Some(60_000.0),
        price: None,
        liquidity: Some(20_000.0),
        volume_24h: Some(80_000.0),
        trades_24h: None,
        holder_count: None,
        bonding_curve_progress: Some(96.0),
        hours_since_graduation: None,
        sol_raised_current: None,
    }
}

/// Invariants that must hold for every cycle.
fn assert_cycle_invariants(output: &CycleOutput, config: &EngineConfig) {
    let report = &output.cost_report;
    assert!(report.stage1_count <= config.stages.stage1_cap as u64);
    assert!(report.stage2_count <= config.stages.stage2_cap as u64);
    assert!(report.stage3_count <= config.stages.stage4_width as u64);
    assert!(report.expensive_calls_made <= 2 * report.stage3_count);

    let mut seen = std::collections::HashSet::new();
    for c in &output.ranked_candidates {
        assert!(seen.insert(c.token_key.clone()), "duplicate emitted key");
        let score = c.final_score.expect("emitted without final score");
        assert!((0.0..=100.0).contains(&score));
        assert!(c.stage >= Stage::Validated);
    }
}

#[tokio::test]
async fn fresh_graduate_passes_all_stages() {
    let mut ohlcv = MockAdapter::named(PROVIDER_OHLCV);
    ohlcv.supports_ohlcv_batch = true;
    active_candles(&mut ohlcv, GRAD_KEY);

    let config = test_config();
    let controller = controller_with(
        config.clone(),
        vec![ohlcv],
        Arc::new(MemoryAlertedSet::new()),
    );

    let output = controller.run_cycle(vec![graduate_record()]).await;
    assert_cycle_invariants(&output, &config);

    assert_eq!(output.ranked_candidates.len(), 1);
    let c = &output.ranked_candidates[0];
    assert_eq!(c.stage, Stage::Velocity);
    assert_eq!(c.data_quality, DataQuality::High);

    let score = c.final_score.unwrap();
    assert!(
        (65.0..=90.0).contains(&score),
        "expected sweet-spot conviction, got {score}"
    );
    assert!(matches!(
        c.confidence,
        Some(Confidence::EarlyDetection) | Some(Confidence::High)
    ));

    // 15m/30m velocity fields derived from the stubbed candles.
    assert!(c.velocity.volume_15m.unwrap() > 0.0);
    assert!(c.velocity.price_change_30m.unwrap() > 0.0);

    // One batch per timeframe; two expensive units for one candidate.
    assert_eq!(output.cost_report.expensive_calls_made, 2);
}

#[tokio::test]
async fn bonding_imminent_is_promoted_to_the_expensive_stage() {
    let mut metadata = MockAdapter::named(PROVIDER_METADATA);
    metadata.supports_batch = true;
    metadata.records.insert(
        BOND_KEY.into(),
        PartialRecord {
            trades_24h: Some(600),
            holder_count: Some(150),
            verified: true,
            ..Default::default()
        },
    );

    let mut security = MockAdapter::named(PROVIDER_SECURITY);
    security.records.insert(
        BOND_KEY.into(),
        PartialRecord {
            security_score: Some(70.0),
            ..Default::default()
        },
    );

    let mut ohlcv = MockAdapter::named(PROVIDER_OHLCV);
    ohlcv.supports_ohlcv_batch = true;
    active_candles(&mut ohlcv, BOND_KEY);

    let config = test_config();
    let controller = controller_with(
        config.clone(),
        vec![metadata, security, ohlcv],
        Arc::new(MemoryAlertedSet::new()),
    );

    let output = controller.run_cycle(vec![bonding_record()]).await;
    assert_cycle_invariants(&output, &config);

    assert_eq!(output.ranked_candidates.len(), 1);
    let c = &output.ranked_candidates[0];
    assert!(c.discovery_score.unwrap() >= 70.0);
    assert!(c.validation_score.unwrap() >= 55.0);
    assert_eq!(c.stage, Stage::Velocity);
    // The enriched fields came from the mocks, with attestation recorded.
    assert_eq!(c.trades_24h, Some(600));
    assert!(c.attested_by.contains(PROVIDER_METADATA));
    assert!(c.attested_by.contains(PROVIDER_SECURITY));
}

#[tokio::test]
async fn low_quality_trending_token_dies_at_stage_two() {
    let metadata = MockAdapter::named(PROVIDER_METADATA); // knows nothing
    let config = test_config();
    let controller = controller_with(
        config.clone(),
        vec![metadata],
        Arc::new(MemoryAlertedSet::new()),
    );

    let record = DiscoveryRecord {
        token_key: "lowq-token".into(),
        symbol: "LOWQ".into(),
        display_name: None,
        source: TokenSource::Trending,
        discovery_time: Utc::now(),
        estimated_age_minutes: Some(2_000.0),
        market_cap: Some(500.0),
        price: None,
        liquidity: None,
        volume_24h: Some(120.0),
        trades_24h: None,
        holder_count: None,
        bonding_curve_progress: None,
        hours_since_graduation: None,
        sol_raised_current: None,
    };

    let output = controller.run_cycle(vec![record]).await;
    assert_cycle_invariants(&output, &config);

    // Admitted by triage (trending flat credit) but never clears the
    // enhanced threshold with no enrichment bonus.
    assert_eq!(output.cost_report.stage1_count, 1);
    assert_eq!(output.cost_report.stage2_count, 0);
    assert!(output.ranked_candidates.is_empty());
}

#[tokio::test]
async fn already_alerted_token_is_suppressed() {
    let mut ohlcv = MockAdapter::named(PROVIDER_OHLCV);
    ohlcv.supports_ohlcv_batch = true;
    active_candles(&mut ohlcv, GRAD_KEY);

    let alerted = Arc::new(MemoryAlertedSet::new());
    alerted.add(GRAD_KEY, Duration::from_secs(7 * 24 * 3600));

    let config = test_config();
    let controller = controller_with(config.clone(), vec![ohlcv], alerted);

    let output = controller.run_cycle(vec![graduate_record()]).await;
    assert_cycle_invariants(&output, &config);

    assert!(output.ranked_candidates.is_empty());
    assert_eq!(output.cost_report.already_alerted_dropped, 1);
    assert_eq!(output.cost_report.expensive_calls_made, 0);
}

#[tokio::test]
async fn ohlcv_outage_trips_the_breaker_and_falls_back_to_validation() {
    let mut ohlcv = MockAdapter::named(PROVIDER_OHLCV);
    ohlcv.supports_ohlcv_batch = true;
    ohlcv.fail_with = Some(ProviderError::Server("503".into()));

    let mut metadata = MockAdapter::named(PROVIDER_METADATA);
    metadata.supports_batch = true;
    metadata.records.insert(
        BOND_KEY.into(),
        PartialRecord {
            trades_24h: Some(600),
            holder_count: Some(150),
            security_score: Some(70.0),
            verified: true,
            ..Default::default()
        },
    );

    let config = test_config();
    let controller = controller_with(
        config.clone(),
        vec![ohlcv, metadata],
        Arc::new(MemoryAlertedSet::new()),
    );

    let output = controller
        .run_cycle(vec![graduate_record(), bonding_record()])
        .await;
    assert_cycle_invariants(&output, &config);

    assert_eq!(output.ranked_candidates.len(), 2);
    for c in &output.ranked_candidates {
        assert_eq!(c.data_quality, DataQuality::Partial);
        assert_eq!(c.final_score, c.validation_score);
    }
    assert!(output.cost_report.breaker_tripped.contains(PROVIDER_OHLCV));
}

#[tokio::test]
async fn auth_rejection_stops_after_the_first_timeframe() {
    let mut ohlcv = MockAdapter::named(PROVIDER_OHLCV);
    ohlcv.supports_ohlcv_batch = true;
    ohlcv.fail_with = Some(ProviderError::Auth);

    let config = test_config();
    let controller = controller_with(
        config.clone(),
        vec![ohlcv],
        Arc::new(MemoryAlertedSet::new()),
    );

    let output = controller.run_cycle(vec![graduate_record()]).await;
    assert_cycle_invariants(&output, &config);

    // Only the 15m units were attempted; the 30m plan never went out.
    assert_eq!(output.cost_report.expensive_calls_made, 1);
    let c = &output.ranked_candidates[0];
    assert_eq!(c.data_quality, DataQuality::Partial);
    assert_eq!(c.final_score, c.validation_score);
    // Auth never counts toward the breaker.
    assert!(output.cost_report.breaker_tripped.is_empty());
}

#[tokio::test(start_paused = true)]
async fn budget_exhaustion_emits_validation_fallbacks() {
    let mut ohlcv = MockAdapter::named(PROVIDER_OHLCV);
    ohlcv.supports_ohlcv_batch = true;
    active_candles(&mut ohlcv, GRAD_KEY);
    ohlcv.ohlcv_delay = Duration::from_secs(2);

    let mut config = test_config();
    config.cycle_budget = Duration::from_secs(1);

    let controller = controller_with(
        config.clone(),
        vec![ohlcv],
        Arc::new(MemoryAlertedSet::new()),
    );

    let started = tokio::time::Instant::now();
    let output = controller.run_cycle(vec![graduate_record()]).await;
    let elapsed = started.elapsed();
    assert_cycle_invariants(&output, &config);

    // The watchdog fires at 1s; in-flight calls observe it and abort.
    assert!(elapsed <= Duration::from_millis(1_300), "took {elapsed:?}");
    assert_eq!(output.ranked_candidates.len(), 1);
    let c = &output.ranked_candidates[0];
    assert_eq!(c.data_quality, DataQuality::Partial);
    assert_eq!(c.final_score, c.validation_score);
}

#[tokio::test]
async fn warm_cache_reruns_are_deterministic_and_cheap() {
    let mut ohlcv = MockAdapter::named(PROVIDER_OHLCV);
    ohlcv.supports_ohlcv_batch = true;
    active_candles(&mut ohlcv, GRAD_KEY);
    active_candles(&mut ohlcv, BOND_KEY);

    let mut metadata = MockAdapter::named(PROVIDER_METADATA);
    metadata.supports_batch = true;
    metadata.records.insert(
        BOND_KEY.into(),
        PartialRecord {
            trades_24h: Some(600),
            holder_count: Some(150),
            security_score: Some(70.0),
            verified: true,
            ..Default::default()
        },
    );

    let config = test_config();
    let controller = controller_with(
        config.clone(),
        vec![ohlcv, metadata],
        Arc::new(MemoryAlertedSet::new()),
    );

    let discovery = vec![graduate_record(), bonding_record()];
    let first = controller.run_cycle(discovery.clone()).await;
    let second = controller.run_cycle(discovery).await;
    assert_cycle_invariants(&second, &config);

    let first_keys: Vec<_> = first
        .ranked_candidates
        .iter()
        .map(|c| c.token_key.clone())
        .collect();
    let second_keys: Vec<_> = second
        .ranked_candidates
        .iter()
        .map(|c| c.token_key.clone())
        .collect();
    assert_eq!(first_keys, second_keys);

    // The second cycle was served from the warm cache.
    assert!(second.cost_report.cache_hits > first.cost_report.cache_hits);
    assert_eq!(
        second.cost_report.expensive_calls_made,
        first.cost_report.expensive_calls_made
    );
}

#[tokio::test]
async fn stage_caps_bound_a_noisy_discovery_batch() {
    let config = test_config();
    let controller = controller_with(
        config.clone(),
        vec![],
        Arc::new(MemoryAlertedSet::new()),
    );

    let mut discovery = Vec::new();
    for i in 0..60 {
        let mut rec = graduate_record();
        rec.token_key = format!("{}{:02}", &GRAD_KEY[..42], i);
        rec.symbol = format!("G{i}");
        discovery.push(rec);
    }

    let output = controller.run_cycle(discovery).await;
    assert_cycle_invariants(&output, &config);

    assert_eq!(output.cost_report.stage1_count, 35);
    assert!(output.cost_report.stage2_count <= 25);
    assert!(output.cost_report.stage3_count <= 10);
    // With no OHLCV provider, everything emitted is a validation fallback.
    assert!(output
        .ranked_candidates
        .iter()
        .all(|c| c.data_quality == DataQuality::Partial));
    // Narrowing 60 candidates to the expensive width saves the bulk of the
    // hypothetical short-timeframe calls.
    assert!(output.cost_report.savings_pct > 0.8);
}
