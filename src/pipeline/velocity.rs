//! Stage 4: velocity scoring.
//!
//! The only stage allowed to touch the expensive short-timeframe endpoint.
//! Survivors get 15m and 30m candle history, derived velocity fields, the
//! full conviction composition, and the age-aware confidence adjustment.
//! Candidates whose data never arrived fall back to their validation score
//! and rank below every completed candidate.

use std::collections::HashMap;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::models::{Candidate, DataQuality, OhlcvCandle, Stage};
use crate::providers::{BatchPlanner, ProviderAdapter, Timeframe};
use crate::scoring;

use super::enrichment::EnrichmentCache;

const CANDLES_PER_TIMEFRAME: usize = 20;
/// Assumed trade size when the 24h figures cannot calibrate one.
const FALLBACK_TRADE_USD: f64 = 400.0;

#[derive(Debug, Default)]
pub struct VelocityResult {
    pub candidates: Vec<Candidate>,
    pub expensive_made: u64,
    pub batch_calls: u64,
    pub individual_calls: u64,
    pub parse_errors: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub auth_failed: bool,
    pub partial: bool,
}

/// Mean volume of the latest candles, last-over-previous close change, and
/// a volume-derived trade estimate.
fn apply_candles(c: &mut Candidate, timeframe: Timeframe, candles: &[OhlcvCandle]) {
    let mut sorted: Vec<&OhlcvCandle> = candles.iter().collect();
    sorted.sort_by_key(|k| k.unix_time);
    if sorted.is_empty() {
        return;
    }

    let tail = &sorted[sorted.len().saturating_sub(3)..];
    let volume = tail.iter().map(|k| k.volume).sum::<f64>() / tail.len() as f64;

    let price_change = if sorted.len() >= 2 {
        let prev = sorted[sorted.len() - 2];
        let last = sorted[sorted.len() - 1];
        (prev.close > 0.0).then(|| (last.close - prev.close) / prev.close * 100.0)
    } else {
        None
    };

    let per_trade = match (c.volume_24h, c.trades_24h) {
        (Some(v), Some(t)) if v > 0.0 && t > 0 => v / t as f64,
        _ => FALLBACK_TRADE_USD,
    };
    let trades = (per_trade > 0.0).then(|| volume / per_trade);

    match timeframe {
        Timeframe::M15 => {
            c.velocity.volume_15m = Some(volume);
            c.velocity.price_change_15m = price_change;
            c.velocity.trades_15m = trades;
        }
        Timeframe::M30 => {
            c.velocity.volume_30m = Some(volume);
            c.velocity.price_change_30m = price_change;
            c.velocity.trades_30m = trades;
        }
        _ => {}
    }
}

fn finalize_scored(c: &mut Candidate, basic: bool) {
    let age = c.age_minutes(Utc::now());
    let (score, breakdown) = scoring::compose(c, age, basic);
    let confidence = scoring::assess_confidence(c, age);
    c.final_score = Some((score * confidence.multiplier()).clamp(0.0, 100.0));
    c.breakdown = Some(breakdown);
    c.confidence = Some(confidence);
    c.advance_stage(Stage::Velocity);
}

fn finalize_partial(c: &mut Candidate) {
    c.final_score = Some(c.validation_score.unwrap_or(0.0));
    c.data_quality = DataQuality::Partial;
}

/// Completed velocity scores rank above validation fallbacks; within each
/// band, score descending with the token key as the deterministic tie-break.
pub fn rank(candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| {
        let a_partial = a.data_quality == DataQuality::Partial;
        let b_partial = b.data_quality == DataQuality::Partial;
        a_partial
            .cmp(&b_partial)
            .then_with(|| {
                let sa = a.final_score.unwrap_or(0.0);
                let sb = b.final_score.unwrap_or(0.0);
                sb.partial_cmp(&sa).unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| a.token_key.cmp(&b.token_key))
    });
}

pub async fn run(
    mut candidates: Vec<Candidate>,
    ohlcv: Option<(&dyn ProviderAdapter, BatchPlanner<'_>)>,
    cache: &EnrichmentCache,
    cancel: &CancellationToken,
    force_basic: bool,
    parallelism: usize,
) -> VelocityResult {
    let mut result = VelocityResult::default();
    let input = candidates.len();

    if force_basic {
        for c in candidates.iter_mut() {
            finalize_scored(c, true);
        }
        rank(&mut candidates);
        result.candidates = candidates;
        return result;
    }

    let Some((adapter, planner)) = ohlcv else {
        warn!("no ohlcv provider registered, emitting validation fallbacks");
        for c in candidates.iter_mut() {
            finalize_partial(c);
        }
        rank(&mut candidates);
        result.candidates = candidates;
        result.partial = true;
        return result;
    };

    let provider = adapter.name().to_string();
    let keys: Vec<String> = candidates.iter().map(|c| c.token_key.clone()).collect();
    let mut by_key: HashMap<String, HashMap<Timeframe, Vec<OhlcvCandle>>> = HashMap::new();

    for timeframe in [Timeframe::M15, Timeframe::M30] {
        if cancel.is_cancelled() {
            result.partial = true;
            break;
        }

        let mut to_fetch = Vec::with_capacity(keys.len());
        for key in &keys {
            match cache.get_candles(&provider, key, timeframe) {
                Some(candles) => {
                    result.cache_hits += 1;
                    by_key.entry(key.clone()).or_default().insert(timeframe, candles);
                }
                None => {
                    result.cache_misses += 1;
                    to_fetch.push(key.clone());
                }
            }
        }
        if to_fetch.is_empty() {
            continue;
        }

        // Every short-timeframe fetch is an expensive unit, batched or not.
        result.expensive_made += to_fetch.len() as u64;

        let out = planner
            .fetch_ohlcv(
                adapter,
                &to_fetch,
                timeframe,
                CANDLES_PER_TIMEFRAME,
                cancel,
                parallelism,
            )
            .await;

        result.batch_calls += out.batch_calls;
        result.individual_calls += out.individual_calls;
        result.parse_errors += out.parse_errors;
        result.partial |= out.partial;
        result.auth_failed |= out.auth_failed;

        for (key, candles) in out.records {
            cache.put_candles(&provider, &key, timeframe, candles.clone());
            by_key.entry(key).or_default().insert(timeframe, candles);
        }

        // Auth rejection is fatal for the provider for the rest of the
        // cycle; do not issue the remaining timeframe.
        if result.auth_failed {
            warn!(provider = %provider, "auth rejected, skipping remaining timeframes");
            break;
        }
    }

    for c in candidates.iter_mut() {
        let frames = by_key.get(&c.token_key);
        let got_any = frames.map(|f| !f.is_empty()).unwrap_or(false);

        if !got_any {
            finalize_partial(c);
            continue;
        }

        if let Some(frames) = frames {
            for (timeframe, candles) in frames {
                apply_candles(c, *timeframe, candles);
            }
        }
        finalize_scored(c, false);
    }

    rank(&mut candidates);
    debug!(
        input,
        scored = candidates.iter().filter(|c| c.stage == Stage::Velocity).count(),
        expensive_made = result.expensive_made,
        "velocity scoring done"
    );
    result.candidates = candidates;
    result
}
