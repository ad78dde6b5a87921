//! Engine configuration.
//!
//! Everything is optional with documented defaults; hosts override via the
//! environment (a `.env` file is honored by the binary) or by mutating the
//! structs directly before building the engine.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::models::TokenSource;

/// Well-known provider names. Providers are addressed by string so hosts can
/// register their own adapters; these are the defaults the engine ships with.
pub const PROVIDER_OHLCV: &str = "birdeye";
pub const PROVIDER_METADATA: &str = "moralis";
pub const PROVIDER_SEARCH: &str = "dexscreener";
pub const PROVIDER_SECURITY: &str = "rugcheck";

/// Per-provider limits enforced by the gate and the batch planner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderLimits {
    /// Max in-flight calls.
    pub max_concurrency: usize,
    /// Minimum spacing between the start of consecutive calls.
    #[serde(with = "duration_ms")]
    pub min_spacing: Duration,
    /// Max keys per batch request.
    pub batch_size: usize,
    /// Per-call timeout.
    #[serde(with = "duration_ms")]
    pub timeout: Duration,
}

impl ProviderLimits {
    /// Paid premium class (expensive OHLCV).
    pub fn paid_premium() -> Self {
        Self {
            max_concurrency: 2,
            min_spacing: Duration::from_millis(300),
            batch_size: 20,
            timeout: Duration::from_secs(30),
        }
    }

    /// Paid standard class (metadata, trending).
    pub fn paid_standard() -> Self {
        Self {
            max_concurrency: 3,
            min_spacing: Duration::from_millis(100),
            batch_size: 30,
            timeout: Duration::from_secs(20),
        }
    }

    /// Free class (public search, token lists).
    pub fn free() -> Self {
        Self {
            max_concurrency: 5,
            min_spacing: Duration::from_millis(50),
            batch_size: 30,
            timeout: Duration::from_secs(12),
        }
    }
}

/// Circuit breaker tuning, shared by all providers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures within `failure_window` that open the circuit.
    pub failure_threshold: u32,
    #[serde(with = "duration_ms")]
    pub failure_window: Duration,
    /// Cool-down before a half-open probe is allowed.
    #[serde(with = "duration_ms")]
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_window: Duration::from_secs(60),
            cooldown: Duration::from_secs(30),
        }
    }
}

/// Stage caps and admission thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    pub stage1_cap: usize,
    pub stage2_cap: usize,
    /// Stage-3 output cap, i.e. the width of the expensive stage.
    pub stage4_width: usize,
    /// Adaptive floor for the Stage-4 width under breaker pressure.
    pub stage4_floor: usize,
    /// Stage-3 admission threshold on the validation score.
    pub validation_threshold: f64,
    /// Bounded parallelism for Stage-4 individual-call fallbacks.
    pub stage4_parallelism: usize,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            stage1_cap: 35,
            stage2_cap: 25,
            stage4_width: 10,
            stage4_floor: 5,
            validation_threshold: 35.0,
            stage4_parallelism: 3,
        }
    }
}

impl StageConfig {
    /// Stage-1 admission threshold per source.
    pub fn triage_threshold(&self, source: TokenSource) -> f64 {
        match source {
            TokenSource::Bonding => 30.0,
            TokenSource::Graduated => 25.0,
            TokenSource::Trending => 30.0,
            _ => 20.0,
        }
    }
}

/// Feature flags, mostly for testing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeatureFlags {
    /// Force the basic (no short-timeframe) composition at Stage 4.
    pub force_basic_scoring: bool,
    /// Sources to drop at the controller pre-filter.
    pub disabled_sources: Vec<TokenSource>,
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub providers: HashMap<String, ProviderLimits>,
    pub breaker: BreakerConfig,
    pub stages: StageConfig,
    /// Per-cycle wall-clock budget.
    #[serde(with = "duration_ms")]
    pub cycle_budget: Duration,
    /// TTL written into the alerted set for emitted candidates.
    #[serde(with = "duration_ms")]
    pub alert_ttl: Duration,
    pub flags: FeatureFlags,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let mut providers = HashMap::new();
        providers.insert(PROVIDER_OHLCV.to_string(), ProviderLimits::paid_premium());
        providers.insert(PROVIDER_METADATA.to_string(), ProviderLimits::paid_standard());
        providers.insert(PROVIDER_SEARCH.to_string(), ProviderLimits::free());
        providers.insert(PROVIDER_SECURITY.to_string(), ProviderLimits::free());

        Self {
            providers,
            breaker: BreakerConfig::default(),
            stages: StageConfig::default(),
            cycle_budget: Duration::from_secs(120),
            alert_ttl: Duration::from_secs(7 * 24 * 3600),
            flags: FeatureFlags::default(),
        }
    }
}

impl EngineConfig {
    /// Defaults overlaid with environment variables.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Some(secs) = env_parse::<u64>("GEMSCOUT_CYCLE_BUDGET_SECS") {
            cfg.cycle_budget = Duration::from_secs(secs);
        }
        if let Some(days) = env_parse::<u64>("GEMSCOUT_ALERT_TTL_DAYS") {
            cfg.alert_ttl = Duration::from_secs(days * 24 * 3600);
        }
        if let Some(n) = env_parse::<u32>("GEMSCOUT_BREAKER_FAILURES") {
            cfg.breaker.failure_threshold = n.max(1);
        }
        if let Some(secs) = env_parse::<u64>("GEMSCOUT_BREAKER_COOLDOWN_SECS") {
            cfg.breaker.cooldown = Duration::from_secs(secs);
        }
        if let Some(width) = env_parse::<usize>("GEMSCOUT_STAGE4_WIDTH") {
            cfg.stages.stage4_width = width.max(1);
        }
        if std::env::var("GEMSCOUT_FORCE_BASIC_SCORING")
            .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "on" | "ON"))
            .unwrap_or(false)
        {
            cfg.flags.force_basic_scoring = true;
        }

        cfg
    }

    /// Limits for `provider`, falling back to the free class.
    pub fn limits(&self, provider: &str) -> ProviderLimits {
        self.providers
            .get(provider)
            .cloned()
            .unwrap_or_else(ProviderLimits::free)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse::<T>().ok())
}

/// Durations serialize as integer milliseconds.
mod duration_ms {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let ms = u64::deserialize(d)?;
        Ok(Duration::from_millis(ms))
    }
}
