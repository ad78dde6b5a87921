//! Safety sub-score (0-25): contract posture averaged with liquidity
//! quality.

use crate::models::{Candidate, HoneypotRisk};

fn behavior_score(c: &Candidate) -> f64 {
    let s = &c.security;
    let mut score: f64 = 0.6;

    if s.verified_contract == Some(true) {
        score += 0.15;
    }
    if s.liquidity_locked == Some(true) {
        score += 0.15;
    }
    match s.dev_holding_pct {
        Some(p) if p < 5.0 => score += 0.10,
        Some(p) if p > 20.0 => score -= 0.20,
        _ => {}
    }
    match s.honeypot_risk {
        HoneypotRisk::Low => score += 0.10,
        HoneypotRisk::High => score -= 0.30,
        _ => {}
    }

    score.clamp(0.0, 1.0)
}

fn liquidity_quality(c: &Candidate) -> f64 {
    let ratio = match (c.liquidity, c.market_cap) {
        (Some(l), Some(mc)) if mc > 0.0 => (l / mc).clamp(0.0, 1.0),
        _ => return 0.3,
    };
    if ratio > 0.3 {
        1.0
    } else if ratio > 0.1 {
        0.8
    } else if ratio > 0.05 {
        0.6
    } else {
        0.3
    }
}

pub fn safety_score(c: &Candidate) -> f64 {
    ((behavior_score(c) + liquidity_quality(c)) / 2.0 * 25.0).clamp(0.0, 25.0)
}
