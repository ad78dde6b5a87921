//! Age-aware confidence.
//!
//! Very new tokens cannot have dense short-timeframe history; grading them
//! on coverage alone would punish exactly the candidates the engine exists
//! to find. Confidence bands therefore widen with age, and genuinely active
//! newborns earn a small boost instead.

use crate::models::{Candidate, Confidence, VelocitySnapshot};

/// Fraction of the expected short-timeframe fields that are populated.
pub fn coverage(v: &VelocitySnapshot) -> f64 {
    let fields = [
        v.volume_5m.is_some(),
        v.volume_15m.is_some(),
        v.volume_30m.is_some(),
        v.volume_1h.is_some(),
        v.volume_6h.is_some(),
        v.price_change_5m.is_some(),
        v.price_change_15m.is_some(),
        v.price_change_30m.is_some(),
        v.price_change_1h.is_some(),
        v.price_change_6h.is_some(),
        v.price_change_24h.is_some(),
        v.trades_5m.is_some(),
        v.trades_15m.is_some(),
        v.trades_30m.is_some(),
        v.trades_1h.is_some(),
    ];
    let populated = fields.iter().filter(|b| **b).count();
    populated as f64 / fields.len() as f64
}

/// Meaningful activity for a newborn: the two shortest populated windows
/// both carry volume, and their price moves agree in direction.
fn early_activity(v: &VelocitySnapshot) -> bool {
    let vols = [v.volume_5m, v.volume_15m, v.volume_30m];
    let active = vols
        .iter()
        .filter(|x| x.map_or(false, |a| a > 0.0))
        .count();
    if active < 2 {
        return false;
    }

    let changes: Vec<f64> = [v.price_change_5m, v.price_change_15m, v.price_change_30m]
        .iter()
        .filter_map(|c| *c)
        .filter(|c| *c != 0.0)
        .collect();
    if changes.len() < 2 {
        return false;
    }
    let positive = changes.iter().filter(|c| **c > 0.0).count();
    positive >= 2 || positive == 0
}

/// Assess the confidence label for a candidate at `age_minutes`.
pub fn assess(c: &Candidate, age_minutes: f64) -> Confidence {
    let cov = coverage(&c.velocity);

    if age_minutes <= 30.0 {
        if early_activity(&c.velocity) {
            Confidence::EarlyDetection
        } else {
            Confidence::Medium
        }
    } else if age_minutes <= 120.0 {
        if cov >= 0.50 {
            Confidence::High
        } else if cov >= 0.30 {
            Confidence::Medium
        } else {
            Confidence::Low
        }
    } else if age_minutes <= 720.0 {
        if cov >= 0.67 {
            Confidence::High
        } else if cov >= 0.50 {
            Confidence::Medium
        } else {
            Confidence::Low
        }
    } else if cov < 0.33 {
        Confidence::VeryLow
    } else if cov >= 0.83 {
        Confidence::High
    } else if cov >= 0.67 {
        Confidence::Medium
    } else {
        Confidence::Low
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DiscoveryRecord, TokenSource};
    use chrono::Utc;

    fn candidate() -> Candidate {
        Candidate::from_discovery(DiscoveryRecord {
            token_key: "k".into(),
            symbol: "S".into(),
            display_name: None,
            source: TokenSource::Bonding,
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

    fn active_velocity() -> VelocitySnapshot {
        let mut v = VelocitySnapshot::default();
        v.volume_15m = Some(3000.0);
        v.volume_30m = Some(2500.0);
        v.price_change_15m = Some(5.0);
        v.price_change_30m = Some(4.0);
        v.trades_15m = Some(40.0);
        v.trades_30m = Some(60.0);
        v
    }

    #[test]
    fn active_newborn_earns_early_detection() {
        let mut c = candidate();
        c.velocity = active_velocity();
        assert_eq!(assess(&c, 20.0), Confidence::EarlyDetection);
        assert!(Confidence::EarlyDetection.multiplier() > 1.0);
    }

    #[test]
    fn quiet_newborn_stays_medium() {
        let c = candidate();
        assert_eq!(assess(&c, 20.0), Confidence::Medium);
    }

    #[test]
    fn disagreeing_moves_block_early_detection() {
        let mut c = candidate();
        c.velocity = active_velocity();
        c.velocity.price_change_15m = Some(5.0);
        c.velocity.price_change_30m = Some(-5.0);
        assert_eq!(assess(&c, 20.0), Confidence::Medium);
    }

    #[test]
    fn young_token_bands_on_coverage() {
        let mut c = candidate();
        c.velocity = active_velocity(); // 6 of 15 fields -> 0.4
        assert_eq!(assess(&c, 90.0), Confidence::Medium);

        c.velocity = VelocitySnapshot::default();
        assert_eq!(assess(&c, 90.0), Confidence::Low);
    }

    #[test]
    fn old_sparse_token_is_very_low() {
        let c = candidate();
        assert_eq!(assess(&c, 1500.0), Confidence::VeryLow);
        assert!(Confidence::VeryLow.multiplier() < 1.0);
    }

    #[test]
    fn coverage_counts_fifteen_fields() {
        let v = active_velocity();
        assert!((coverage(&v) - 0.4).abs() < 1e-9);
        assert_eq!(coverage(&VelocitySnapshot::default()), 0.0);
    }
}
