//! Stage 2: enhanced analysis.
//!
//! Batch-enriches survivors that are missing medium-cost fields, then adds
//! enrichment bonuses on top of the triage score.

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::StageConfig;
use crate::models::{Candidate, DataQuality, Stage, TokenSource};
use crate::providers::{BatchPlanner, FieldSet, ProviderAdapter};

use super::enrichment::{enrich_candidates, EnrichOutcome, EnrichmentCache};

/// Additive bonus from the enriched medium-cost fields.
pub fn enrichment_bonus(c: &Candidate) -> f64 {
    let mut bonus = 0.0;

    bonus += match c.volume_24h {
        Some(v) if v > 100_000.0 => 15.0,
        Some(v) if v > 50_000.0 => 10.0,
        Some(v) if v > 10_000.0 => 5.0,
        _ => 0.0,
    };

    bonus += match c.trades_24h {
        Some(t) if t > 500 => 10.0,
        Some(t) if t > 100 => 5.0,
        _ => 0.0,
    };

    bonus += match c.holder_count {
        Some(h) if h > 200 => 10.0,
        Some(h) if h > 50 => 5.0,
        _ => 0.0,
    };

    bonus += match c.security.security_score {
        Some(s) if s > 80.0 => 8.0,
        Some(s) if s > 60.0 => 4.0,
        _ => 0.0,
    };

    bonus
}

fn admission_threshold(c: &Candidate) -> f64 {
    match (c.source, c.data_quality) {
        (TokenSource::Bonding, DataQuality::High) => 45.0,
        (TokenSource::Graduated, DataQuality::High) => 40.0,
        (TokenSource::Trending, _) => 35.0,
        _ => 35.0,
    }
}

fn needs_enrichment(c: &Candidate) -> bool {
    c.volume_24h.is_none()
        || c.trades_24h.is_none()
        || c.holder_count.is_none()
        || c.security.security_score.is_none()
}

/// Providers consulted by this stage, in merge order.
pub struct EnhancedProviders<'a> {
    pub metadata: Option<(&'a dyn ProviderAdapter, BatchPlanner<'a>)>,
    pub security: Option<(&'a dyn ProviderAdapter, BatchPlanner<'a>)>,
}

pub struct EnhancedResult {
    pub survivors: Vec<Candidate>,
    pub outcomes: Vec<EnrichOutcome>,
}

pub async fn run(
    mut candidates: Vec<Candidate>,
    providers: EnhancedProviders<'_>,
    cache: &EnrichmentCache,
    stages: &StageConfig,
    cancel: &CancellationToken,
) -> EnhancedResult {
    let input = candidates.len();
    let keys: Vec<String> = candidates
        .iter()
        .filter(|c| needs_enrichment(c))
        .map(|c| c.token_key.clone())
        .collect();

    let mut outcomes = Vec::new();
    let mut enriched_any: std::collections::HashSet<String> = std::collections::HashSet::new();
    let mut attempted = false;

    if !keys.is_empty() {
        if let Some((adapter, planner)) = &providers.metadata {
            attempted = true;
            let out = enrich_candidates(
                planner,
                *adapter,
                cache,
                &mut candidates,
                &keys,
                FieldSet::market_activity(),
                cancel,
                keys.len().max(1),
            )
            .await;
            enriched_any.extend(out.enriched_keys.iter().cloned());
            outcomes.push(out);
        }

        if let Some((adapter, planner)) = &providers.security {
            attempted = true;
            let out = enrich_candidates(
                planner,
                *adapter,
                cache,
                &mut candidates,
                &keys,
                FieldSet::security_only(),
                cancel,
                keys.len().max(1),
            )
            .await;
            enriched_any.extend(out.enriched_keys.iter().cloned());
            outcomes.push(out);
        }
    }

    for c in candidates.iter_mut() {
        // Enrichment failing at every provider leaves the candidate usable
        // but flagged.
        let wanted = keys.contains(&c.token_key);
        if attempted && wanted && !enriched_any.contains(&c.token_key) {
            c.data_quality = DataQuality::Low;
        } else {
            c.data_quality = match c.market_cap {
                Some(mc) if mc > 0.0 => DataQuality::High,
                _ => DataQuality::Low,
            };
        }

        let base = c.discovery_score.unwrap_or(0.0);
        if c.enhanced_score.is_none() {
            c.enhanced_score = Some(base + enrichment_bonus(c));
        }
        c.advance_stage(Stage::Enhanced);
    }

    candidates.retain(|c| c.enhanced_score.unwrap_or(0.0) >= admission_threshold(c));

    candidates.sort_by(|a, b| {
        let sa = a.enhanced_score.unwrap_or(0.0);
        let sb = b.enhanced_score.unwrap_or(0.0);
        sb.partial_cmp(&sa)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.token_key.cmp(&b.token_key))
    });
    candidates.truncate(stages.stage2_cap);

    debug!(input, survivors = candidates.len(), "enhanced analysis done");
    EnhancedResult {
        survivors: candidates,
        outcomes,
    }
}
