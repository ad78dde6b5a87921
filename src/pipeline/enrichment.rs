//! Enrichment fetcher.
//!
//! Pulls provider fields for a set of candidates through the batch planner
//! and merges them under a fixed precedence:
//!
//! 1. a newer record from the same provider replaces its older one,
//! 2. a verified or batch-attested record replaces an unattested one,
//! 3. any non-null value fills a sentinel,
//!
//! with ties resolving to the first writer. Values carried in from discovery
//! count as first writers with no attestation.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::models::{Candidate, FieldMeta, OhlcvCandle};
use crate::providers::{
    BatchPlanner, FieldSet, PartialRecord, ProviderAdapter, Timeframe,
};

/// Warm-cycle cache for provider responses, keyed per provider.
pub struct EnrichmentCache {
    records: RwLock<HashMap<(String, String), (PartialRecord, Instant)>>,
    candles: RwLock<HashMap<(String, String, Timeframe), (Vec<OhlcvCandle>, Instant)>>,
    ttl: Duration,
}

impl EnrichmentCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            candles: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub fn get_record(&self, provider: &str, key: &str) -> Option<PartialRecord> {
        let records = self.records.read();
        let (rec, at) = records.get(&(provider.to_string(), key.to_string()))?;
        (at.elapsed() <= self.ttl).then(|| rec.clone())
    }

    pub fn put_record(&self, provider: &str, key: &str, rec: PartialRecord) {
        self.records
            .write()
            .insert((provider.to_string(), key.to_string()), (rec, Instant::now()));
    }

    pub fn get_candles(
        &self,
        provider: &str,
        key: &str,
        timeframe: Timeframe,
    ) -> Option<Vec<OhlcvCandle>> {
        let candles = self.candles.read();
        let (c, at) = candles.get(&(provider.to_string(), key.to_string(), timeframe))?;
        (at.elapsed() <= self.ttl).then(|| c.clone())
    }

    pub fn put_candles(
        &self,
        provider: &str,
        key: &str,
        timeframe: Timeframe,
        candles: Vec<OhlcvCandle>,
    ) {
        self.candles.write().insert(
            (provider.to_string(), key.to_string(), timeframe),
            (candles, Instant::now()),
        );
    }
}

/// What one enrichment pass did, for the cost tracker and the controller.
#[derive(Debug, Default)]
pub struct EnrichOutcome {
    pub provider: String,
    /// Keys that received at least one field.
    pub enriched_keys: Vec<String>,
    pub batch_calls: u64,
    pub individual_calls: u64,
    pub parse_errors: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub partial: bool,
    pub auth_failed: bool,
}

fn authority(meta: &FieldMeta) -> bool {
    meta.verified || meta.from_batch
}

/// Should `incoming` replace what `existing` wrote?
fn should_write(existing: Option<&FieldMeta>, incoming: &FieldMeta) -> bool {
    match existing {
        None => true,
        Some(prev) if prev.provider == incoming.provider => {
            incoming.fetched_at > prev.fetched_at
        }
        Some(prev) => authority(incoming) && !authority(prev),
    }
}

macro_rules! merge_field {
    ($cand:expr, $rec:expr, $meta:expr, $field:ident) => {
        if $rec.$field.is_some() {
            let existing = $cand.provenance.0.get(stringify!($field));
            // A discovery-supplied value with no provenance is a first
            // writer without attestation.
            let discovery_holds =
                existing.is_none() && $cand.$field.is_some() && !authority($meta);
            if !discovery_holds && should_write(existing, $meta) {
                $cand.$field = $rec.$field.clone();
                $cand.provenance.0.insert(stringify!($field), $meta.clone());
            }
        }
    };
}

macro_rules! merge_security_field {
    ($cand:expr, $rec:expr, $meta:expr, $field:ident) => {
        if $rec.$field.is_some() {
            let existing = $cand.provenance.0.get(stringify!($field));
            let discovery_holds =
                existing.is_none() && $cand.security.$field.is_some() && !authority($meta);
            if !discovery_holds && should_write(existing, $meta) {
                $cand.security.$field = $rec.$field.clone();
                $cand.provenance.0.insert(stringify!($field), $meta.clone());
            }
        }
    };
}

/// Merge one provider record into a candidate.
pub fn merge_partial(candidate: &mut Candidate, rec: &PartialRecord, meta: &FieldMeta) {
    merge_field!(candidate, rec, meta, market_cap);
    merge_field!(candidate, rec, meta, price);
    merge_field!(candidate, rec, meta, liquidity);
    merge_field!(candidate, rec, meta, volume_24h);
    merge_field!(candidate, rec, meta, trades_24h);
    merge_field!(candidate, rec, meta, holder_count);
    merge_field!(candidate, rec, meta, unique_traders_24h);

    merge_security_field!(candidate, rec, meta, security_score);
    merge_security_field!(candidate, rec, meta, dev_holding_pct);
    merge_security_field!(candidate, rec, meta, liquidity_locked);
    merge_security_field!(candidate, rec, meta, verified_contract);

    if let Some(risk) = rec.honeypot_risk {
        let existing = candidate.provenance.0.get("honeypot_risk");
        if should_write(existing, meta) {
            candidate.security.honeypot_risk = risk;
            candidate.provenance.0.insert("honeypot_risk", meta.clone());
        }
    }

    if let Some(name) = &rec.display_name {
        if candidate.display_name.is_none() {
            candidate.display_name = Some(name.clone());
        }
    }

    candidate.attested_by.insert(meta.provider.clone());
    candidate.enrichment_timestamp = Some(meta.fetched_at);
}

/// Fetch `fields` for every candidate in `keys` order and merge the results.
///
/// Candidates not listed in `keys` are left untouched.
pub async fn enrich_candidates(
    planner: &BatchPlanner<'_>,
    adapter: &dyn ProviderAdapter,
    cache: &EnrichmentCache,
    candidates: &mut [Candidate],
    keys: &[String],
    fields: FieldSet,
    cancel: &CancellationToken,
    parallelism: usize,
) -> EnrichOutcome {
    let provider = adapter.name().to_string();
    let mut out = EnrichOutcome {
        provider: provider.clone(),
        ..Default::default()
    };

    // Serve what we can from the cache and only plan the rest.
    let mut cached: HashMap<String, PartialRecord> = HashMap::new();
    let mut to_fetch: Vec<String> = Vec::with_capacity(keys.len());
    for key in keys {
        match cache.get_record(&provider, key) {
            Some(rec) => {
                cached.insert(key.clone(), rec);
                out.cache_hits += 1;
            }
            None => {
                to_fetch.push(key.clone());
                out.cache_misses += 1;
            }
        }
    }

    let fetched = if to_fetch.is_empty() {
        None
    } else {
        Some(
            planner
                .fetch_records(adapter, &to_fetch, fields, cancel, parallelism)
                .await,
        )
    };

    let from_batch = fetched.as_ref().map(|f| f.batch_calls > 0).unwrap_or(false);
    if let Some(f) = &fetched {
        out.batch_calls = f.batch_calls;
        out.individual_calls = f.individual_calls;
        out.parse_errors = f.parse_errors;
        out.partial = f.partial;
        out.auth_failed = f.auth_failed;
    }

    let now = Utc::now().timestamp();
    for candidate in candidates.iter_mut() {
        let rec = cached.get(&candidate.token_key).or_else(|| {
            fetched
                .as_ref()
                .and_then(|f| f.records.get(&candidate.token_key))
        });
        let Some(rec) = rec else { continue };

        let meta = FieldMeta {
            provider: provider.clone(),
            fetched_at: now,
            verified: rec.verified,
            from_batch,
        };
        merge_partial(candidate, rec, &meta);
        out.enriched_keys.push(candidate.token_key.clone());
    }

    // Remember fresh responses for the next pass.
    if let Some(f) = fetched {
        for (key, rec) in f.records {
            cache.put_record(&provider, &key, rec);
        }
    }

    debug!(
        provider = %provider,
        requested = keys.len(),
        enriched = out.enriched_keys.len(),
        cache_hits = out.cache_hits,
        "enrichment pass done"
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DiscoveryRecord, TokenSource};

    fn candidate() -> Candidate {
        Candidate::from_discovery(DiscoveryRecord {
            token_key: "tok".into(),
            symbol: "S".into(),
            display_name: None,
            source: TokenSource::Graduated,
            discovery_time: Utc::now(),
            estimated_age_minutes: None,
            market_cap: Some(50_000.0),
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

    fn meta(provider: &str, at: i64, verified: bool) -> FieldMeta {
        FieldMeta {
            provider: provider.into(),
            fetched_at: at,
            verified,
            from_batch: false,
        }
    }

    #[test]
    fn non_null_fills_sentinel() {
        let mut c = candidate();
        let rec = PartialRecord {
            liquidity: Some(12_000.0),
            ..Default::default()
        };
        merge_partial(&mut c, &rec, &meta("moralis", 10, false));
        assert_eq!(c.liquidity, Some(12_000.0));
        assert!(c.attested_by.contains("moralis"));
    }

    #[test]
    fn discovery_value_survives_unattested_overwrite() {
        let mut c = candidate();
        let rec = PartialRecord {
            market_cap: Some(999.0),
            ..Default::default()
        };
        merge_partial(&mut c, &rec, &meta("dexscreener", 10, false));
        assert_eq!(c.market_cap, Some(50_000.0));
    }

    #[test]
    fn verified_record_beats_discovery_value() {
        let mut c = candidate();
        let rec = PartialRecord {
            market_cap: Some(62_000.0),
            verified: true,
            ..Default::default()
        };
        merge_partial(&mut c, &rec, &meta("moralis", 10, true));
        assert_eq!(c.market_cap, Some(62_000.0));
    }

    #[test]
    fn same_provider_newer_timestamp_wins() {
        let mut c = candidate();
        let first = PartialRecord {
            volume_24h: Some(100.0),
            ..Default::default()
        };
        let second = PartialRecord {
            volume_24h: Some(200.0),
            ..Default::default()
        };
        merge_partial(&mut c, &first, &meta("moralis", 10, false));
        merge_partial(&mut c, &second, &meta("moralis", 20, false));
        assert_eq!(c.volume_24h, Some(200.0));

        // Stale data from the same provider does not roll back.
        let stale = PartialRecord {
            volume_24h: Some(50.0),
            ..Default::default()
        };
        merge_partial(&mut c, &stale, &meta("moralis", 5, false));
        assert_eq!(c.volume_24h, Some(200.0));
    }

    #[test]
    fn cross_provider_tie_keeps_first_writer() {
        let mut c = candidate();
        let a = PartialRecord {
            holder_count: Some(100),
            ..Default::default()
        };
        let b = PartialRecord {
            holder_count: Some(900),
            ..Default::default()
        };
        merge_partial(&mut c, &a, &meta("dexscreener", 10, false));
        merge_partial(&mut c, &b, &meta("moralis", 20, false));
        assert_eq!(c.holder_count, Some(100));

        // But an attested record takes the field.
        let v = PartialRecord {
            holder_count: Some(500),
            verified: true,
            ..Default::default()
        };
        merge_partial(&mut c, &v, &meta("moralis", 30, true));
        assert_eq!(c.holder_count, Some(500));
    }

    #[test]
    fn cache_expires_after_ttl() {
        let cache = EnrichmentCache::new(Duration::from_millis(0));
        cache.put_record(
            "moralis",
            "tok",
            PartialRecord {
                price: Some(1.0),
                ..Default::default()
            },
        );
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get_record("moralis", "tok").is_none());
    }
}
