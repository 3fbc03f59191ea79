//! Derived Statistics, payout-bucket histograms, and the shared odds-string
//! formatter (§3, §4.2).

use super::table::LookupTable;
use serde::{Deserialize, Serialize};

fn round4(x: f64) -> f64 {
    (x * 10_000.0).round() / 10_000.0
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Statistics recomputed from a table; cheap enough to cache per table version.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DerivedStatistics {
    pub rtp: f64,
    pub hit_rate: f64,
    pub zero_payout_rate: f64,
    pub mean: f64,
    pub variance: f64,
    pub std_dev: f64,
    pub volatility: f64,
    pub weighted_median: f64,
    pub min_nonzero_payout: Option<f64>,
    pub max_payout: f64,
}

/// Computes the Derived Statistics set deterministically. Rates/ratios are
/// rounded to 4 decimals, payout values to 2 decimals.
pub fn analyze(table: &LookupTable) -> DerivedStatistics {
    let total_weight = table.total_weight() as f64;

    let hit_weight: u64 = table
        .outcomes
        .iter()
        .filter(|o| o.payout > 0)
        .map(|o| o.weight)
        .sum();
    let hit_rate = if total_weight > 0.0 {
        hit_weight as f64 / total_weight
    } else {
        0.0
    };

    let mean_payout_dollars: f64 = if total_weight > 0.0 {
        table
            .outcomes
            .iter()
            .map(|o| (o.weight as f64) * (o.payout as f64 / 100.0))
            .sum::<f64>()
            / total_weight
    } else {
        0.0
    };

    let variance = if total_weight > 0.0 {
        table
            .outcomes
            .iter()
            .map(|o| {
                let d = (o.payout as f64 / 100.0) - mean_payout_dollars;
                (o.weight as f64) * d * d
            })
            .sum::<f64>()
            / total_weight
    } else {
        0.0
    };
    let std_dev = variance.sqrt();
    let volatility = if mean_payout_dollars > 0.0 {
        std_dev / mean_payout_dollars
    } else {
        0.0
    };

    let rtp = if table.cost > 0.0 {
        mean_payout_dollars / table.cost
    } else {
        0.0
    };

    let weighted_median = weighted_median_payout(table, total_weight);

    let min_nonzero_payout = table
        .outcomes
        .iter()
        .filter(|o| o.payout > 0)
        .map(|o| o.payout)
        .min()
        .map(|p| p as f64 / 100.0);

    let max_payout = table
        .outcomes
        .iter()
        .map(|o| o.payout)
        .max()
        .unwrap_or(0) as f64
        / 100.0;

    DerivedStatistics {
        rtp: round4(rtp),
        hit_rate: round4(hit_rate),
        zero_payout_rate: round4(1.0 - hit_rate),
        mean: round2(mean_payout_dollars),
        variance: round4(variance),
        std_dev: round4(std_dev),
        volatility: round4(volatility),
        weighted_median: round2(weighted_median),
        min_nonzero_payout: min_nonzero_payout.map(round2),
        max_payout: round2(max_payout),
    }
}

fn weighted_median_payout(table: &LookupTable, total_weight: f64) -> f64 {
    if total_weight <= 0.0 {
        return 0.0;
    }
    let mut sorted: Vec<&super::table::Outcome> = table.outcomes.iter().collect();
    sorted.sort_by_key(|o| o.payout);

    let half = total_weight / 2.0;
    let mut cumulative = 0.0;
    for o in sorted {
        cumulative += o.weight as f64;
        if cumulative >= half {
            return o.payout as f64 / 100.0;
        }
    }
    0.0
}

/// One record of [`build_distribution`]: all outcomes sharing an exact payout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutDistributionEntry {
    pub payout: f64,
    pub total_weight: u64,
    pub count: usize,
    pub odds: String,
    pub sample_sim_ids: Vec<i64>,
}

/// Groups outcomes by exact payout; one record per distinct payout.
pub fn build_distribution(table: &LookupTable) -> Vec<PayoutDistributionEntry> {
    use std::collections::BTreeMap;

    let mut groups: BTreeMap<u64, (u64, usize, Vec<i64>)> = BTreeMap::new();
    for o in &table.outcomes {
        let entry = groups.entry(o.payout).or_insert((0, 0, Vec::new()));
        entry.0 += o.weight;
        entry.1 += 1;
        if entry.2.len() < 10 {
            entry.2.push(o.sim_id);
        }
    }

    let total = table.total_weight() as f64;
    groups
        .into_iter()
        .map(|(payout, (weight, count, sample_sim_ids))| {
            let p = if total > 0.0 { weight as f64 / total } else { 0.0 };
            PayoutDistributionEntry {
                payout: round2(payout as f64 / 100.0),
                total_weight: weight,
                count,
                odds: format_odds(p),
                sample_sim_ids,
            }
        })
        .collect()
}

/// Renders a probability as "1 in N", with K/M/B suffixes on N at 10³/10⁶/10⁹.
pub fn format_odds(p: f64) -> String {
    if !(p.is_finite()) || p <= 0.0 {
        return "never".to_string();
    }
    if p >= 1.0 {
        return "always".to_string();
    }
    let n = 1.0 / p;
    let rendered = if n >= 1_000_000_000.0 {
        format!("{:.2}B", n / 1_000_000_000.0)
    } else if n >= 1_000_000.0 {
        format!("{:.2}M", n / 1_000_000.0)
    } else if n >= 1_000.0 {
        format!("{:.2}K", n / 1_000.0)
    } else {
        format!("{:.0}", n)
    };
    format!("1 in {rendered}")
}

/// One non-empty bucket of the payout histogram: `[start, end)` in display
/// multiplier units, plus total weight and outcome count.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutBucket {
    pub range_start: f64,
    pub range_end: f64,
    pub total_weight: u64,
    pub count: usize,
}

/// 1-2-5 logarithmic ladder boundaries (in display multiplier units) plus a
/// dedicated zero bucket; empty buckets are removed.
pub fn payout_bucket_histogram(table: &LookupTable) -> Vec<PayoutBucket> {
    let ladder = ladder_boundaries(table.outcomes.iter().map(|o| o.payout).max().unwrap_or(0));

    let mut buckets: Vec<PayoutBucket> = Vec::new();

    let zero_weight: u64 = table.outcomes.iter().filter(|o| o.payout == 0).map(|o| o.weight).sum();
    let zero_count = table.outcomes.iter().filter(|o| o.payout == 0).count();
    if zero_count > 0 {
        buckets.push(PayoutBucket {
            range_start: 0.0,
            range_end: 0.0,
            total_weight: zero_weight,
            count: zero_count,
        });
    }

    for window in ladder.windows(2) {
        let (lo, hi) = (window[0], window[1]);
        let lo_raw = (lo * 100.0).round() as u64;
        let hi_raw = (hi * 100.0).round() as u64;
        let matching: Vec<_> = table
            .outcomes
            .iter()
            .filter(|o| o.payout > 0 && o.payout >= lo_raw && o.payout < hi_raw)
            .collect();
        if matching.is_empty() {
            continue;
        }
        buckets.push(PayoutBucket {
            range_start: lo,
            range_end: hi,
            total_weight: matching.iter().map(|o| o.weight).sum(),
            count: matching.len(),
        });
    }

    buckets
}

/// Builds `1, 2, 5, 10, 20, 50, ...` boundaries (display multiplier units)
/// up through the first boundary exceeding `max_payout`.
fn ladder_boundaries(max_payout_raw: u64) -> Vec<f64> {
    let max_payout = max_payout_raw as f64 / 100.0;
    let mut boundaries = vec![0.0];
    let steps = [1.0, 2.0, 5.0];
    let mut magnitude = 1.0_f64;
    'outer: loop {
        for s in steps {
            let v = s * magnitude;
            boundaries.push(v);
            if v > max_payout {
                break 'outer;
            }
        }
        magnitude *= 10.0;
    }
    boundaries
}

#[cfg(test)]
mod tests {
    use super::super::table::LookupTable;
    use super::*;

    fn scenario_a() -> LookupTable {
        LookupTable::from_csv_str("base", 1.0, "0,50,0\n1,30,200\n2,20,1000\n").unwrap()
    }

    #[test]
    fn scenario_a_statistics() {
        let t = scenario_a();
        let s = analyze(&t);
        assert_eq!(s.hit_rate, 0.5);
        assert_eq!(s.rtp, 2.6);
        assert_eq!(s.max_payout, 10.0);
        assert_eq!(s.min_nonzero_payout, Some(2.0));
    }

    #[test]
    fn scenario_b_rewrite_then_analyze() {
        let mut t = scenario_a();
        t.rewrite_weights(&[10, 10, 10]).unwrap();
        let s = analyze(&t);
        assert!((s.hit_rate - 0.6667).abs() < 1e-3);
        assert_eq!(s.rtp, 4.0);
    }

    #[test]
    fn distribution_groups_by_exact_payout() {
        let t = scenario_a();
        let dist = build_distribution(&t);
        assert_eq!(dist.len(), 3);
        assert_eq!(dist[0].payout, 0.0);
        assert_eq!(dist[0].total_weight, 50);
    }

    #[test]
    fn odds_formatting_suffixes() {
        assert_eq!(format_odds(0.5), "1 in 2");
        assert_eq!(format_odds(1.0 / 1500.0), "1 in 1.50K");
        assert_eq!(format_odds(1.0 / 2_500_000.0), "1 in 2.50M");
    }

    #[test]
    fn histogram_has_zero_and_nonempty_buckets_only() {
        let t = scenario_a();
        let buckets = payout_bucket_histogram(&t);
        assert!(buckets.iter().any(|b| b.range_start == 0.0 && b.range_end == 0.0));
        assert!(buckets.iter().all(|b| b.count > 0));
    }
}
