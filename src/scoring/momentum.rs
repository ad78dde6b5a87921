//! Momentum sub-score (0-38): volume acceleration, price-change cascade,
//! and trading-activity surge over the short timeframes.
//!
//! Null inputs contribute zero, never NaN.

use crate::models::{Candidate, VelocitySnapshot};

/// Volume acceleration (0-15).
///
/// Short ratio compares the 15m window against half the 30m window; medium
/// ratio compares 1h against a sixth of 6h. Raw bonuses top out at 0.25 and
/// are rescaled onto the band.
pub fn volume_acceleration(v: &VelocitySnapshot) -> f64 {
    let short_ratio = match (v.volume_15m, v.volume_30m) {
        (Some(a), Some(b)) if b > 0.0 => a / (b / 2.0),
        _ => 0.0,
    };
    let short_bonus: f64 = match short_ratio {
        r if r > 3.0 => 0.15,
        r if r > 2.0 => 0.12,
        r if r > 1.5 => 0.08,
        _ => 0.0,
    };

    let medium_ratio = match (v.volume_1h, v.volume_6h) {
        (Some(a), Some(b)) if b > 0.0 => a / (b / 6.0),
        _ => 0.0,
    };
    let medium_bonus: f64 = match medium_ratio {
        r if r > 2.0 => 0.10,
        r if r > 1.5 => 0.07,
        r if r > 1.2 => 0.04,
        _ => 0.0,
    };

    ((short_bonus + medium_bonus) / 0.25 * 15.0).clamp(0.0, 15.0)
}

/// Momentum cascade (0-13).
///
/// Signed price changes weighted toward the short end, plus a reward when at
/// least two short timeframes agree on an up-move.
pub fn momentum_cascade(v: &VelocitySnapshot) -> f64 {
    const WEIGHTS: [f64; 6] = [0.30, 0.25, 0.20, 0.15, 0.06, 0.04];
    let changes = [
        v.price_change_5m,
        v.price_change_15m,
        v.price_change_30m,
        v.price_change_1h,
        v.price_change_6h,
        v.price_change_24h,
    ];

    let weighted: f64 = changes
        .iter()
        .zip(WEIGHTS)
        .map(|(c, w)| w * c.unwrap_or(0.0).clamp(-100.0, 100.0))
        .sum();

    // +25% weighted move saturates the base.
    let base = (weighted / 25.0 * 10.0).clamp(0.0, 10.0);

    let shorts = [v.price_change_5m, v.price_change_15m, v.price_change_30m];
    let rising = shorts
        .iter()
        .filter(|c| c.map_or(false, |x| x > 0.0))
        .count();
    let agreement = if rising >= 2 { 3.0 } else { 0.0 };

    (base + agreement).clamp(0.0, 13.0)
}

/// Activity surge (0-10).
///
/// Rewards a short-term trade rate above the 24h average, the 24h trade
/// base, and a broad trader set.
pub fn activity_surge(c: &Candidate) -> f64 {
    let v = &c.velocity;

    let short_rate = v
        .trades_15m
        .map(|t| t / 15.0)
        .or_else(|| v.trades_30m.map(|t| t / 30.0))
        .or_else(|| v.trades_1h.map(|t| t / 60.0));

    let surge = match (short_rate, c.trades_24h) {
        (Some(rate), Some(t24)) if t24 > 0 => {
            let avg_rate = t24 as f64 / 1440.0;
            if avg_rate <= 0.0 {
                0.0
            } else {
                match rate / avg_rate {
                    r if r >= 3.0 => 6.0,
                    r if r >= 2.0 => 4.0,
                    r if r >= 1.5 => 2.0,
                    _ => 0.0,
                }
            }
        }
        _ => 0.0,
    };

    let base: f64 = match c.trades_24h {
        Some(t) if t >= 1000 => 2.0,
        Some(t) if t >= 200 => 1.0,
        _ => 0.0,
    };

    let traders: f64 = match c.unique_traders_24h {
        Some(u) if u >= 500 => 2.0,
        Some(u) if u >= 100 => 1.0,
        _ => 0.0,
    };

    (surge + base + traders).clamp(0.0, 10.0)
}

/// Full momentum composite. The basic variant masks the 15m/30m inputs so
/// Stages 2-3 can score without expensive data.
pub fn momentum_score(c: &Candidate, basic: bool) -> f64 {
    if basic {
        let mut masked = c.clone();
        masked.velocity.volume_15m = None;
        masked.velocity.volume_30m = None;
        masked.velocity.price_change_15m = None;
        masked.velocity.price_change_30m = None;
        masked.velocity.trades_15m = None;
        masked.velocity.trades_30m = None;
        return volume_acceleration(&masked.velocity)
            + momentum_cascade(&masked.velocity)
            + activity_surge(&masked);
    }

    volume_acceleration(&c.velocity) + momentum_cascade(&c.velocity) + activity_surge(c)
}
