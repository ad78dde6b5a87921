//! Cost accounting.
//!
//! Counters live for the life of the controller; each increment is a single
//! atomic step. The per-cycle survivor counts and wall clock are folded in
//! when a report is cut.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::models::CostReport;

#[derive(Debug, Default)]
pub struct CostTracker {
    stage1_count: AtomicU64,
    stage2_count: AtomicU64,
    stage3_count: AtomicU64,
    stage4_count: AtomicU64,

    expensive_calls_made: AtomicU64,
    expensive_calls_saved: AtomicU64,
    batch_calls: AtomicU64,
    individual_calls: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,

    parse_errors: AtomicU64,
    discovery_dropped: AtomicU64,
    prefilter_dropped: AtomicU64,
    already_alerted_dropped: AtomicU64,
}

impl CostTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_stage_counts(&self, s1: u64, s2: u64, s3: u64, s4: u64) {
        self.stage1_count.store(s1, Ordering::Relaxed);
        self.stage2_count.store(s2, Ordering::Relaxed);
        self.stage3_count.store(s3, Ordering::Relaxed);
        self.stage4_count.store(s4, Ordering::Relaxed);
    }

    pub fn add_expensive_made(&self, n: u64) {
        self.expensive_calls_made.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_expensive_saved(&self, n: u64) {
        self.expensive_calls_saved.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_batch_calls(&self, n: u64) {
        self.batch_calls.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_individual_calls(&self, n: u64) {
        self.individual_calls.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_cache_hits(&self, n: u64) {
        self.cache_hits.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_cache_misses(&self, n: u64) {
        self.cache_misses.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_parse_errors(&self, n: u64) {
        self.parse_errors.fetch_add(n, Ordering::Relaxed);
    }

    pub fn inc_discovery_dropped(&self) {
        self.discovery_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_prefilter_dropped(&self) {
        self.prefilter_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_already_alerted_dropped(&self) {
        self.already_alerted_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn expensive_calls_made(&self) -> u64 {
        self.expensive_calls_made.load(Ordering::Relaxed)
    }

    /// Snapshot every counter into a report.
    pub fn report(&self, wall_clock_ms: u64, breaker_tripped: BTreeSet<String>) -> CostReport {
        let made = self.expensive_calls_made.load(Ordering::Relaxed);
        let saved = self.expensive_calls_saved.load(Ordering::Relaxed);
        let savings_pct = if made + saved == 0 {
            0.0
        } else {
            saved as f64 / (made + saved) as f64
        };

        CostReport {
            stage1_count: self.stage1_count.load(Ordering::Relaxed),
            stage2_count: self.stage2_count.load(Ordering::Relaxed),
            stage3_count: self.stage3_count.load(Ordering::Relaxed),
            stage4_count: self.stage4_count.load(Ordering::Relaxed),
            expensive_calls_made: made,
            expensive_calls_saved: saved,
            batch_calls: self.batch_calls.load(Ordering::Relaxed),
            individual_calls: self.individual_calls.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            parse_errors: self.parse_errors.load(Ordering::Relaxed),
            discovery_dropped: self.discovery_dropped.load(Ordering::Relaxed),
            prefilter_dropped: self.prefilter_dropped.load(Ordering::Relaxed),
            already_alerted_dropped: self.already_alerted_dropped.load(Ordering::Relaxed),
            savings_pct,
            breaker_tripped,
            wall_clock_ms,
        }
    }
}
