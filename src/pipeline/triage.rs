//! Stage 1: source-aware triage.
//!
//! Scores only what discovery already delivered; makes no outbound calls.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::config::StageConfig;
use crate::models::{Candidate, Stage, TokenSource};

const PLACEHOLDER_SYMBOLS: [&str; 6] = ["UNKNOWN", "TOKEN", "NULL", "N/A", "TBD", "???"];

const BASE58_ALPHABET: &str = "123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

/// Plausible on-chain address: base58, mint-sized.
fn valid_address_shape(key: &str) -> bool {
    (32..=44).contains(&key.len()) && key.chars().all(|c| BASE58_ALPHABET.contains(c))
}

fn reasonable_symbol(symbol: &str) -> bool {
    !symbol.is_empty()
        && symbol.len() <= 10
        && !PLACEHOLDER_SYMBOLS.contains(&symbol.to_ascii_uppercase().as_str())
}

fn graduated_score(c: &Candidate, now: DateTime<Utc>) -> f64 {
    let mut score = 0.0;

    let hours = c
        .hours_since_graduation
        .unwrap_or_else(|| c.age_minutes(now) / 60.0);
    score += match hours {
        h if h <= 1.0 => 40.0,
        h if h <= 6.0 => 25.0,
        h if h <= 12.0 => 15.0,
        _ => 0.0,
    };

    score += match c.market_cap {
        Some(mc) if (50_000.0..=2_000_000.0).contains(&mc) => 20.0,
        Some(mc) if (10_000.0..50_000.0).contains(&mc) => 15.0,
        Some(mc) if mc > 2_000_000.0 => 5.0,
        _ => 0.0,
    };

    score += match c.liquidity {
        Some(l) if l > 50_000.0 => 15.0,
        Some(l) if l > 10_000.0 => 10.0,
        Some(l) if l > 1_000.0 => 5.0,
        _ => 0.0,
    };

    score
}

fn bonding_score(c: &Candidate) -> f64 {
    let mut score = 0.0;

    score += match c.bonding_curve_progress {
        Some(p) if p >= 95.0 => 50.0,
        Some(p) if p >= 90.0 => 35.0,
        Some(p) if p >= 85.0 => 25.0,
        Some(p) if p >= 75.0 => 15.0,
        Some(p) if p >= 50.0 => 10.0,
        _ => 0.0,
    };

    score += match c.market_cap {
        Some(mc) if (5_000.0..=500_000.0).contains(&mc) => 15.0,
        Some(mc) if mc > 0.0 && mc < 5_000.0 => 10.0,
        _ => 0.0,
    };

    score
}

fn ecosystem_score(c: &Candidate) -> f64 {
    let sol_bonus = match c.sol_raised_current {
        Some(s) if s > 50.0 => 10.0,
        _ => 0.0,
    };
    20.0 + sol_bonus
}

/// Stage-1 score from discovery data alone.
pub fn discovery_score(c: &Candidate, now: DateTime<Utc>) -> f64 {
    let source_score = match c.source {
        TokenSource::Graduated => graduated_score(c, now),
        TokenSource::Bonding => bonding_score(c),
        // Trending lists are already market-validated.
        TokenSource::Trending => 30.0,
        TokenSource::EcosystemBonding => ecosystem_score(c),
        TokenSource::LiveEvent => 0.0,
    };

    let mut universal = 0.0;
    if valid_address_shape(&c.token_key) {
        universal += 5.0;
    }
    if reasonable_symbol(&c.symbol) {
        universal += 3.0;
    }
    universal += match c.age_minutes(now) {
        a if a <= 60.0 => 8.0,
        a if a <= 360.0 => 5.0,
        a if a <= 1440.0 => 2.0,
        _ => 0.0,
    };

    source_score + universal
}

/// Run triage: score, admit per source threshold, cap the survivor list.
pub fn run(mut candidates: Vec<Candidate>, stages: &StageConfig, cap: usize) -> Vec<Candidate> {
    let now = Utc::now();
    let input = candidates.len();

    for c in candidates.iter_mut() {
        let score = discovery_score(c, now);
        c.discovery_score = Some(score);
        c.advance_stage(Stage::Triage);
    }

    candidates.retain(|c| {
        c.discovery_score.unwrap_or(0.0) >= stages.triage_threshold(c.source)
    });

    candidates.sort_by(|a, b| {
        let sa = a.discovery_score.unwrap_or(0.0);
        let sb = b.discovery_score.unwrap_or(0.0);
        sb.partial_cmp(&sa)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.source.priority().cmp(&b.source.priority()))
            .then(a.token_key.cmp(&b.token_key))
    });
    candidates.truncate(cap);

    debug!(input, survivors = candidates.len(), "triage done");
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DiscoveryRecord;

    const GOOD_KEY: &str = "7xKXtg2CW87d97TXJSDpbD5jBkheTqA83TZRuJosgAsU";

    fn record(source: TokenSource) -> DiscoveryRecord {
        DiscoveryRecord {
            token_key: GOOD_KEY.into(),
            symbol: "GEM".into(),
            display_name: None,
            source,
            discovery_time: Utc::now(),
            estimated_age_minutes: Some(30.0),
            market_cap: None,
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
    fn imminent_bonding_scores_high() {
        let mut rec = record(TokenSource::Bonding);
        rec.bonding_curve_progress = Some(96.0);
        rec.market_cap = Some(60_000.0);
        let c = Candidate::from_discovery(rec);
        // 50 (proximity) + 15 (mcap) + 5 + 3 + 8 (universal)
        assert!(discovery_score(&c, Utc::now()) >= 70.0);
    }

    #[test]
    fn fresh_graduate_beats_stale_graduate() {
        let mut fresh = record(TokenSource::Graduated);
        fresh.hours_since_graduation = Some(0.5);
        fresh.market_cap = Some(150_000.0);
        fresh.liquidity = Some(60_000.0);

        let mut stale = fresh.clone();
        stale.hours_since_graduation = Some(20.0);
        stale.estimated_age_minutes = Some(1200.0);

        let now = Utc::now();
        let f = discovery_score(&Candidate::from_discovery(fresh), now);
        let s = discovery_score(&Candidate::from_discovery(stale), now);
        assert!(f > s + 30.0);
    }

    #[test]
    fn trending_gets_flat_validation_credit() {
        let c = Candidate::from_discovery(record(TokenSource::Trending));
        // 30 + 5 + 3 + 8
        assert_eq!(discovery_score(&c, Utc::now()), 46.0);
    }

    #[test]
    fn placeholder_symbols_lose_the_bonus() {
        let mut rec = record(TokenSource::Trending);
        rec.symbol = "UNKNOWN".into();
        let c = Candidate::from_discovery(rec);
        assert_eq!(discovery_score(&c, Utc::now()), 43.0);
    }

    #[test]
    fn thresholds_gate_admission_per_source() {
        let stages = StageConfig::default();

        // A bare ecosystem-bonding token: 20 + 16 universal = 36, above its
        // threshold of 20.
        let eco = Candidate::from_discovery(record(TokenSource::EcosystemBonding));
        // A bonding token with no curve data: 0 + 16 = 16, below 30.
        let bare_bonding = Candidate::from_discovery(record(TokenSource::Bonding));

        let out = run(vec![eco, bare_bonding], &stages, 35);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].source, TokenSource::EcosystemBonding);
        assert_eq!(out[0].stage, Stage::Triage);
    }

    #[test]
    fn cap_keeps_the_top_scores() {
        let mut batch = Vec::new();
        for i in 0..40 {
            let mut rec = record(TokenSource::Trending);
            rec.token_key = format!("{}{:02}", &GOOD_KEY[..42], i % 100);
            batch.push(Candidate::from_discovery(rec));
        }
        let out = run(batch, &StageConfig::default(), 35);
        assert_eq!(out.len(), 35);
    }

    #[test]
    fn ties_break_on_source_priority_then_key() {
        let mut a = record(TokenSource::EcosystemBonding);
        a.sol_raised_current = Some(60.0); // 30 + 16 = 46
        let b = record(TokenSource::Trending); // 46

        let out = run(
            vec![
                Candidate::from_discovery(a),
                Candidate::from_discovery(b),
            ],
            &StageConfig::default(),
            35,
        );
        assert_eq!(out.len(), 2);
        // Equal scores: trending outranks ecosystem-bonding.
        assert_eq!(out[0].source, TokenSource::Trending);
    }
}
