//! Core data model for the discovery pipeline.
//!
//! A `Candidate` is the single record flowing through the four stages. It is
//! created from a discovery record, mutated only by the stage that currently
//! owns it, and discarded at end of cycle unless the controller emits it.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a candidate was discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenSource {
    Trending,
    Graduated,
    Bonding,
    EcosystemBonding,
    LiveEvent,
}

impl TokenSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenSource::Trending => "trending",
            TokenSource::Graduated => "graduated",
            TokenSource::Bonding => "bonding",
            TokenSource::EcosystemBonding => "ecosystem_bonding",
            TokenSource::LiveEvent => "live_event",
        }
    }

    /// Tie-break priority: lower sorts first when scores are equal.
    #[inline]
    pub fn priority(&self) -> u8 {
        match self {
            TokenSource::Bonding => 0,
            TokenSource::Graduated => 1,
            TokenSource::Trending => 2,
            TokenSource::EcosystemBonding => 3,
            TokenSource::LiveEvent => 4,
        }
    }
}

/// Furthest pipeline stage a candidate has reached. Never regresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Discovered,
    Triage,
    Enhanced,
    Validated,
    Velocity,
}

/// Honeypot assessment from security providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HoneypotRisk {
    Low,
    Medium,
    High,
    Unknown,
}

/// Diagnostic flag describing how complete a candidate's data is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataQuality {
    High,
    Low,
    Partial,
}

impl DataQuality {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataQuality::High => "high",
            DataQuality::Low => "low",
            DataQuality::Partial => "partial",
        }
    }
}

/// Age-aware confidence label attached to the final score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Confidence {
    EarlyDetection,
    High,
    Medium,
    Low,
    VeryLow,
}

impl Confidence {
    /// Multiplicative adjustment applied to the final score.
    #[inline]
    pub fn multiplier(&self) -> f64 {
        match self {
            Confidence::EarlyDetection => 1.05,
            Confidence::High => 1.02,
            Confidence::Medium => 0.98,
            Confidence::Low => 0.95,
            Confidence::VeryLow => 0.90,
        }
    }
}

/// One normalized OHLCV candle. Adapters own response-shape normalization;
/// the core only ever sees this form.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OhlcvCandle {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub unix_time: i64,
}

/// Raw discovery output handed to the controller by source connectors.
///
/// Records missing a mandatory key fail deserialization upstream or are
/// dropped by the controller with a counter increment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryRecord {
    pub token_key: String,
    pub symbol: String,
    #[serde(default)]
    pub display_name: Option<String>,
    pub source: TokenSource,
    pub discovery_time: DateTime<Utc>,

    #[serde(default)]
    pub estimated_age_minutes: Option<f64>,
    #[serde(default)]
    pub market_cap: Option<f64>,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub liquidity: Option<f64>,
    #[serde(default)]
    pub volume_24h: Option<f64>,
    #[serde(default)]
    pub trades_24h: Option<u64>,
    #[serde(default)]
    pub holder_count: Option<u64>,

    #[serde(default)]
    pub bonding_curve_progress: Option<f64>,
    #[serde(default)]
    pub hours_since_graduation: Option<f64>,
    #[serde(default)]
    pub sol_raised_current: Option<f64>,
}

/// Short-timeframe velocity fields, populated only at Stage 4.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VelocitySnapshot {
    pub volume_5m: Option<f64>,
    pub volume_15m: Option<f64>,
    pub volume_30m: Option<f64>,
    pub volume_1h: Option<f64>,
    pub volume_6h: Option<f64>,

    pub price_change_5m: Option<f64>,
    pub price_change_15m: Option<f64>,
    pub price_change_30m: Option<f64>,
    pub price_change_1h: Option<f64>,
    pub price_change_6h: Option<f64>,
    pub price_change_24h: Option<f64>,

    pub trades_5m: Option<f64>,
    pub trades_15m: Option<f64>,
    pub trades_30m: Option<f64>,
    pub trades_1h: Option<f64>,
}

/// Security posture merged in from security providers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityProfile {
    pub security_score: Option<f64>,
    pub dev_holding_pct: Option<f64>,
    pub honeypot_risk: HoneypotRisk,
    pub liquidity_locked: Option<bool>,
    pub verified_contract: Option<bool>,
}

impl Default for SecurityProfile {
    fn default() -> Self {
        Self {
            security_score: None,
            dev_holding_pct: None,
            honeypot_risk: HoneypotRisk::Unknown,
            liquidity_locked: None,
            verified_contract: None,
        }
    }
}

/// Who wrote a merged field, and with what authority. Used by the
/// enrichment merge to arbitrate between providers.
#[derive(Debug, Clone)]
pub struct FieldMeta {
    pub provider: String,
    pub fetched_at: i64,
    pub verified: bool,
    pub from_batch: bool,
}

/// Per-field write records for a candidate's merged fields.
#[derive(Debug, Clone, Default)]
pub struct Provenance(pub std::collections::HashMap<&'static str, FieldMeta>);

/// Per-candidate breakdown of the final composition, kept for alerting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub platform: f64,
    pub momentum: f64,
    pub safety: f64,
    pub validation: f64,
    /// True when the short-timeframe inputs were unavailable and the basic
    /// composition variant was used.
    pub basic: bool,
}

/// The record flowing through the pipeline. `token_key` is the on-chain
/// address and is unique within a cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub token_key: String,
    pub symbol: String,
    pub display_name: Option<String>,
    pub source: TokenSource,

    pub discovery_time: DateTime<Utc>,
    pub estimated_age_minutes: Option<f64>,

    pub market_cap: Option<f64>,
    pub price: Option<f64>,
    pub liquidity: Option<f64>,
    pub volume_24h: Option<f64>,
    pub trades_24h: Option<u64>,
    pub holder_count: Option<u64>,
    pub unique_traders_24h: Option<u64>,

    pub bonding_curve_progress: Option<f64>,
    pub hours_since_graduation: Option<f64>,
    pub sol_raised_current: Option<f64>,

    pub velocity: VelocitySnapshot,
    pub security: SecurityProfile,

    /// Providers that returned data for this token. Drives the
    /// cross-platform validation bonus; ordered for deterministic output.
    pub attested_by: BTreeSet<String>,

    pub discovery_score: Option<f64>,
    pub enhanced_score: Option<f64>,
    pub validation_score: Option<f64>,
    pub final_score: Option<f64>,
    pub breakdown: Option<ScoreBreakdown>,
    pub confidence: Option<Confidence>,

    pub stage: Stage,
    pub enrichment_timestamp: Option<i64>,
    pub data_quality: DataQuality,

    /// Merge bookkeeping; not part of the emitted record.
    #[serde(skip)]
    pub provenance: Provenance,
}

impl Candidate {
    pub fn from_discovery(rec: DiscoveryRecord) -> Self {
        // data_quality starts "high" iff market cap is known and non-zero.
        let data_quality = match rec.market_cap {
            Some(mc) if mc > 0.0 => DataQuality::High,
            _ => DataQuality::Low,
        };

        Self {
            token_key: rec.token_key,
            symbol: rec.symbol,
            display_name: rec.display_name,
            source: rec.source,
            discovery_time: rec.discovery_time,
            estimated_age_minutes: rec.estimated_age_minutes,
            market_cap: rec.market_cap,
            price: rec.price,
            liquidity: rec.liquidity,
            volume_24h: rec.volume_24h,
            trades_24h: rec.trades_24h,
            holder_count: rec.holder_count,
            unique_traders_24h: None,
            bonding_curve_progress: rec.bonding_curve_progress,
            hours_since_graduation: rec.hours_since_graduation,
            sol_raised_current: rec.sol_raised_current,
            velocity: VelocitySnapshot::default(),
            security: SecurityProfile::default(),
            attested_by: BTreeSet::new(),
            discovery_score: None,
            enhanced_score: None,
            validation_score: None,
            final_score: None,
            breakdown: None,
            confidence: None,
            stage: Stage::Discovered,
            enrichment_timestamp: None,
            data_quality,
            provenance: Provenance::default(),
        }
    }

    /// Best-effort token age in minutes at `now`.
    ///
    /// Preference order: explicit estimate, hours since graduation, then the
    /// discovery timestamp.
    pub fn age_minutes(&self, now: DateTime<Utc>) -> f64 {
        if let Some(est) = self.estimated_age_minutes {
            return est.max(0.0);
        }
        if let Some(h) = self.hours_since_graduation {
            return (h * 60.0).max(0.0);
        }
        let elapsed = now.signed_duration_since(self.discovery_time);
        (elapsed.num_seconds() as f64 / 60.0).max(0.0)
    }

    /// Advance `stage`, never regressing.
    #[inline]
    pub fn advance_stage(&mut self, stage: Stage) {
        if stage > self.stage {
            self.stage = stage;
        }
    }

    /// Score used for ranking wherever the candidate exited the pipeline.
    #[inline]
    pub fn ranking_score(&self) -> f64 {
        self.final_score
            .or(self.validation_score)
            .or(self.enhanced_score)
            .or(self.discovery_score)
            .unwrap_or(0.0)
    }
}

/// Counters kept for the life of the controller plus per-cycle derived
/// figures. Emitted verbatim in the cost report.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CostReport {
    pub stage1_count: u64,
    pub stage2_count: u64,
    pub stage3_count: u64,
    pub stage4_count: u64,

    pub expensive_calls_made: u64,
    pub expensive_calls_saved: u64,
    pub batch_calls: u64,
    pub individual_calls: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,

    pub parse_errors: u64,
    pub discovery_dropped: u64,
    pub prefilter_dropped: u64,
    pub already_alerted_dropped: u64,

    /// saved / (saved + made); 0 when no expensive traffic was possible.
    pub savings_pct: f64,
    /// Providers whose breaker was open at cycle end.
    pub breaker_tripped: BTreeSet<String>,
    pub wall_clock_ms: u64,
}

/// Everything a cycle hands back to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct CycleOutput {
    pub ranked_candidates: Vec<Candidate>,
    pub cost_report: CostReport,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(source: TokenSource) -> DiscoveryRecord {
        DiscoveryRecord {
            token_key: "So11111111111111111111111111111111111111112".into(),
            symbol: "TEST".into(),
            display_name: None,
            source,
            discovery_time: Utc::now(),
            estimated_age_minutes: None,
            market_cap: Some(120_000.0),
            price: None,
            liquidity: None,
            volume_24h: None,
            trades_24h: None,
            holder_count: None,
            bonding_curve_progress: None,
            hours_since_graduation: None,
            sol_raised_current: None,
        }
    }

    #[test]
    fn stage_never_regresses() {
        let mut c = Candidate::from_discovery(record(TokenSource::Bonding));
        c.advance_stage(Stage::Validated);
        c.advance_stage(Stage::Triage);
        assert_eq!(c.stage, Stage::Validated);
    }

    #[test]
    fn age_prefers_explicit_estimate() {
        let mut rec = record(TokenSource::Graduated);
        rec.estimated_age_minutes = Some(12.0);
        rec.hours_since_graduation = Some(4.0);
        let c = Candidate::from_discovery(rec);
        assert_eq!(c.age_minutes(Utc::now()), 12.0);
    }

    #[test]
    fn age_falls_back_to_graduation_hours() {
        let mut rec = record(TokenSource::Graduated);
        rec.hours_since_graduation = Some(2.0);
        let c = Candidate::from_discovery(rec);
        assert_eq!(c.age_minutes(Utc::now()), 120.0);
    }

    #[test]
    fn data_quality_tracks_market_cap() {
        let mut rec = record(TokenSource::Bonding);
        rec.market_cap = None;
        assert_eq!(
            Candidate::from_discovery(rec).data_quality,
            DataQuality::Low
        );
        assert_eq!(
            Candidate::from_discovery(record(TokenSource::Bonding)).data_quality,
            DataQuality::High
        );
    }

    #[test]
    fn source_priority_orders_bonding_first() {
        assert!(TokenSource::Bonding.priority() < TokenSource::Graduated.priority());
        assert!(TokenSource::Graduated.priority() < TokenSource::Trending.priority());
        assert!(TokenSource::Trending.priority() < TokenSource::EcosystemBonding.priority());
    }
}
