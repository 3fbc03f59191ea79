//! [`BucketDistributionCache`]: a lazily-generated, per-mode sorted outcome
//! index with pre-computed odds strings, backing `bucket_distribution`
//! queries. Tri-state per mode to prevent duplicated generation under load
//! (§3, §4.2, §5).

use super::stats::format_odds;
use super::table::LookupTable;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedOutcome {
    pub sim_id: i64,
    pub payout: u64,
    pub weight: u64,
    pub odds: String,
}

#[derive(Clone)]
enum Entry {
    Generating,
    Present(std::sync::Arc<Vec<CachedOutcome>>),
}

/// Generated on first miss, held until a reload or weight rewrite invalidates it.
#[derive(Default)]
pub struct BucketDistributionCache {
    by_mode: RwLock<HashMap<String, Entry>>,
}

impl BucketDistributionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn invalidate(&self, mode: &str) {
        self.by_mode.write().remove(&mode.to_ascii_lowercase());
    }

    pub fn invalidate_all(&self) {
        self.by_mode.write().clear();
    }

    pub fn is_present(&self, mode: &str) -> bool {
        matches!(
            self.by_mode.read().get(&mode.to_ascii_lowercase()),
            Some(Entry::Present(_))
        )
    }

    /// Returns the sorted-by-payout outcome index for `mode`, generating it
    /// synchronously on first miss. Concurrent generation for the same mode
    /// is coalesced by the `Generating` sentinel: a second caller that
    /// observes it simply falls back to direct (uncached) computation for
    /// that one call, per §7 "bucket cache generation failures fall back to
    /// direct computation".
    pub fn get_or_build(&self, table: &LookupTable) -> std::sync::Arc<Vec<CachedOutcome>> {
        let key = table.mode.to_ascii_lowercase();

        if let Some(Entry::Present(existing)) = self.by_mode.read().get(&key) {
            return existing.clone();
        }

        {
            let mut guard = self.by_mode.write();
            match guard.get(&key) {
                Some(Entry::Present(existing)) => return existing.clone(),
                Some(Entry::Generating) => {
                    // Another caller is already building it; compute directly without
                    // claiming the slot, rather than blocking.
                    drop(guard);
                    return std::sync::Arc::new(build(table));
                }
                None => {
                    guard.insert(key.clone(), Entry::Generating);
                }
            }
        }

        let built = std::sync::Arc::new(build(table));
        self.by_mode
            .write()
            .insert(key, Entry::Present(built.clone()));
        built
    }
}

fn build(table: &LookupTable) -> Vec<CachedOutcome> {
    let total = table.total_weight() as f64;
    let mut outcomes: Vec<CachedOutcome> = table
        .outcomes
        .iter()
        .map(|o| CachedOutcome {
            sim_id: o.sim_id,
            payout: o.payout,
            weight: o.weight,
            odds: format_odds(if total > 0.0 { o.weight as f64 / total } else { 0.0 }),
        })
        .collect();
    outcomes.sort_by_key(|o| o.payout);
    outcomes
}

/// A page of outcomes whose payout falls in `[range_start, range_end)`,
/// display-multiplier units (i.e. not ×100).
pub fn paginate(
    cache: &BucketDistributionCache,
    table: &LookupTable,
    range_start: f64,
    range_end: f64,
    offset: usize,
    limit: usize,
) -> Vec<CachedOutcome> {
    let lo = (range_start * 100.0).round() as u64;
    let hi = (range_end * 100.0).round() as u64;
    let all = cache.get_or_build(table);
    all.iter()
        .filter(|o| o.payout >= lo && o.payout < hi)
        .skip(offset)
        .take(limit)
        .cloned()
        .collect()
}
