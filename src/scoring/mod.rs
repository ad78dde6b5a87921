//! Pure scoring library.
//!
//! Sub-score bands sum to 125 (platform 50, momentum 38, safety 25,
//! cross-platform 12), which puts their nominal shares at 40/30/20/10 of
//! the conviction scale. The composed total is clamped to [0, 100].
//! Nothing in this module suspends.

pub mod confidence;
pub mod momentum;
pub mod platform;
pub mod safety;

use crate::models::{Candidate, ScoreBreakdown};

pub use confidence::{assess as assess_confidence, coverage};
pub use momentum::{activity_surge, momentum_cascade, momentum_score, volume_acceleration};
pub use platform::platform_score;
pub use safety::safety_score;

/// Providers whose attestation carries extra weight.
const PREMIUM_PROVIDERS: [&str; 2] = [crate::config::PROVIDER_OHLCV, crate::config::PROVIDER_METADATA];

/// Cross-platform validation bonus (0-12).
pub fn cross_platform_bonus(c: &Candidate) -> f64 {
    let attestations = c.attested_by.len();
    let base = if attestations >= 4 {
        8.0
    } else if attestations >= 2 {
        5.0
    } else if attestations >= 1 {
        2.0
    } else {
        0.0
    };

    let premium = PREMIUM_PROVIDERS
        .iter()
        .filter(|p| c.attested_by.contains(**p))
        .count() as f64
        * 2.0;

    (base + premium.min(4.0)).clamp(0.0, 12.0)
}

/// Compose the conviction score. `basic` masks the 15m/30m inputs so the
/// cheap stages can produce preliminary scores.
pub fn compose(c: &Candidate, age_minutes: f64, basic: bool) -> (f64, ScoreBreakdown) {
    let breakdown = ScoreBreakdown {
        platform: platform_score(c, age_minutes),
        momentum: momentum_score(c, basic),
        safety: safety_score(c),
        validation: cross_platform_bonus(c),
        basic,
    };

    let total = (breakdown.platform + breakdown.momentum + breakdown.safety + breakdown.validation)
        .clamp(0.0, 100.0);

    (total, breakdown)
}
