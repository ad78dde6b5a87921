//! Platform sub-score (0-50).
//!
//! Source base, market-cap velocity, curve progression, freshness, and
//! graduation timing, decayed by token age.

use crate::models::{Candidate, TokenSource};

fn source_base(source: TokenSource) -> f64 {
    match source {
        TokenSource::Trending => 6.0,
        TokenSource::Graduated => 8.0,
        TokenSource::Bonding => 15.0,
        TokenSource::EcosystemBonding => 12.0,
        TokenSource::LiveEvent => 6.0,
    }
}

/// Bonus on estimated market-cap accumulation per hour of existence.
fn velocity_bonus(c: &Candidate, age_minutes: f64) -> f64 {
    let Some(mc) = c.market_cap else { return 0.0 };
    if mc <= 0.0 {
        return 0.0;
    }
    let hours = (age_minutes.max(1.0)) / 60.0;
    let usd_per_hour = mc / hours;
    match usd_per_hour {
        v if v >= 5000.0 => 12.0,
        v if v >= 2000.0 => 10.0,
        v if v >= 500.0 => 6.0,
        v if v >= 100.0 => 3.0,
        _ => 0.0,
    }
}

/// Source-specific progression along the listing lifecycle.
fn progression_bonus(c: &Candidate) -> f64 {
    match c.source {
        TokenSource::Bonding | TokenSource::Graduated => match c.bonding_curve_progress {
            Some(p) if p >= 95.0 => 10.0,
            Some(p) if p >= 85.0 => 8.0,
            Some(p) if p >= 70.0 => 6.0,
            Some(p) if p >= 50.0 => 4.0,
            Some(p) if p >= 25.0 => 2.0,
            _ => 0.0,
        },
        TokenSource::EcosystemBonding => match c.sol_raised_current {
            Some(s) if s >= 75.0 => 10.0,
            Some(s) if s >= 50.0 => 8.0,
            Some(s) if s >= 25.0 => 5.0,
            Some(s) if s >= 10.0 => 2.0,
            _ => 0.0,
        },
        _ => 0.0,
    }
}

fn age_bonus(age_minutes: f64) -> f64 {
    match age_minutes {
        a if a <= 5.0 => 6.0,
        a if a <= 15.0 => 5.0,
        a if a <= 30.0 => 4.0,
        a if a <= 60.0 => 3.0,
        a if a <= 180.0 => 1.0,
        _ => 0.0,
    }
}

/// Entries close to graduation are already priced; mid-curve entries are the
/// sweet spot.
fn graduation_timing_bonus(c: &Candidate) -> f64 {
    let Some(p) = c.bonding_curve_progress else {
        return 0.0;
    };
    if p >= 85.0 {
        -3.0
    } else if p >= 80.0 {
        1.0
    } else if p >= 50.0 {
        4.0
    } else if p >= 25.0 {
        2.0
    } else {
        0.0
    }
}

fn age_decay(age_minutes: f64) -> f64 {
    match age_minutes {
        a if a <= 60.0 => 1.0,
        a if a <= 360.0 => 0.95,
        a if a <= 1440.0 => 0.85,
        _ => 0.70,
    }
}

pub fn platform_score(c: &Candidate, age_minutes: f64) -> f64 {
    let sum = source_base(c.source)
        + velocity_bonus(c, age_minutes)
        + progression_bonus(c)
        + age_bonus(age_minutes)
        + graduation_timing_bonus(c);

    (sum.max(0.0) * age_decay(age_minutes)).clamp(0.0, 50.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DiscoveryRecord;
    use chrono::Utc;

    fn candidate(source: TokenSource) -> Candidate {
        Candidate::from_discovery(DiscoveryRecord {
            token_key: "k".into(),
            symbol: "S".into(),
            display_name: None,
            source,
            discovery_time: Utc::now(),
            estimated_age_minutes: None,
            market_cap: None,
            price: None,
            liquidity: None,
            volume_24h: None,
            trades_24h: None,
            holder_count: None,
            bonding_curve_progress: None,
            hours_since_graduation: None,
            sol_raised_current: None,
        })
    }

    #[test]
    fn bonding_base_beats_trending() {
        let b = candidate(TokenSource::Bonding);
        let t = candidate(TokenSource::Trending);
        assert!(platform_score(&b, 30.0) > platform_score(&t, 30.0));
    }

    #[test]
    fn near_graduation_is_penalized_on_timing() {
        let mut mid = candidate(TokenSource::Bonding);
        mid.bonding_curve_progress = Some(65.0);
        let mut late = candidate(TokenSource::Bonding);
        late.bonding_curve_progress = Some(97.0);

        // Late entries keep a higher progression bonus but lose the timing
        // bonus; the deltas must reflect +4 vs -3.
        assert_eq!(graduation_timing_bonus(&mid), 4.0);
        assert_eq!(graduation_timing_bonus(&late), -3.0);
    }

    #[test]
    fn age_decay_reduces_stale_tokens() {
        let mut c = candidate(TokenSource::Graduated);
        c.market_cap = Some(200_000.0);
        let fresh = platform_score(&c, 30.0);
        let stale = platform_score(&c, 3000.0);
        assert!(fresh > stale);
    }

    #[test]
    fn score_is_clamped_to_band() {
        let mut c = candidate(TokenSource::Bonding);
        c.market_cap = Some(10_000_000.0);
        c.bonding_curve_progress = Some(79.0);
        let s = platform_score(&c, 3.0);
        assert!(s >= 0.0 && s <= 50.0);
    }
}
