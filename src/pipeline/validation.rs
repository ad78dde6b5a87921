//! Stage 3: market validation.
//!
//! Pure rubric over market cap, liquidity, 24h volume, and 24h trade count.
//! No short-timeframe data is fetched here; this stage exists to keep weak
//! candidates away from the expensive stage.

use tracing::debug;

use crate::models::{Candidate, Stage};

fn market_cap_points(c: &Candidate) -> f64 {
    match c.market_cap {
        Some(mc) if (50_000.0..=5_000_000.0).contains(&mc) => 30.0,
        Some(mc) if (10_000.0..50_000.0).contains(&mc) => 25.0,
        Some(mc) if mc > 5_000_000.0 => 15.0,
        _ => 0.0,
    }
}

fn liquidity_points(c: &Candidate) -> f64 {
    match c.liquidity {
        Some(l) if l > 100_000.0 => 25.0,
        Some(l) if l > 50_000.0 => 20.0,
        Some(l) if l > 10_000.0 => 10.0,
        _ => 0.0,
    }
}

fn volume_points(c: &Candidate) -> f64 {
    match c.volume_24h {
        Some(v) if v > 500_000.0 => 25.0,
        Some(v) if v > 100_000.0 => 20.0,
        Some(v) if v > 10_000.0 => 10.0,
        _ => 0.0,
    }
}

fn activity_points(c: &Candidate) -> f64 {
    match c.trades_24h {
        Some(t) if t > 1000 => 20.0,
        Some(t) if t > 500 => 15.0,
        Some(t) if t > 100 => 10.0,
        _ => 0.0,
    }
}

/// Validation rubric, 0-100.
pub fn validation_score(c: &Candidate) -> f64 {
    (market_cap_points(c) + liquidity_points(c) + volume_points(c) + activity_points(c))
        .clamp(0.0, 100.0)
}

/// Run validation with the (possibly breaker-tightened) expensive-stage
/// width as `cap`.
pub fn run(mut candidates: Vec<Candidate>, threshold: f64, cap: usize) -> Vec<Candidate> {
    let input = candidates.len();

    for c in candidates.iter_mut() {
        if c.validation_score.is_none() {
            c.validation_score = Some(validation_score(c));
        }
        c.advance_stage(Stage::Validated);
    }

    candidates.retain(|c| c.validation_score.unwrap_or(0.0) >= threshold);

    candidates.sort_by(|a, b| {
        let sa = a.validation_score.unwrap_or(0.0);
        let sb = b.validation_score.unwrap_or(0.0);
        sb.partial_cmp(&sa)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.token_key.cmp(&b.token_key))
    });
    candidates.truncate(cap);

    debug!(input, survivors = candidates.len(), cap, "market validation done");
    candidates
}
