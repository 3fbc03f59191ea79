//! Compliance Checker (§4.10): a stateless rule pass over a table and its
//! Derived Statistics. Pure function of the LUT Store's snapshot: no
//! persistence, no mutation, nothing cached.

use crate::lut::{DerivedStatistics, LutStore, PayoutBucket};
use serde::{Deserialize, Serialize};

const RTP_MIN: f64 = 0.90;
const RTP_MAX: f64 = 0.98;
const CROSS_MODE_RTP_TOLERANCE: f64 = 0.005;
const MAX_SPIN_BUDGET_NUMERATOR: f64 = 20_000_000.0;
const BASE_MODE_COST_CEILING: f64 = 2.0;
const HIT_RATE_MIN: f64 = 0.05;
const HIT_RATE_MAX: f64 = 0.33;
const MIN_DISTINCT_PAYOUTS: usize = 10;
const MOST_FREQUENT_OUTCOME_CEILING: f64 = 0.01;
const ZERO_PAYOUT_RATE_CEILING: f64 = 0.90;
const VOLATILITY_INFO_CEILING: f64 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleFinding {
    pub rule: String,
    pub severity: Severity,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeComplianceReport {
    pub mode: String,
    pub passed: bool,
    pub findings: Vec<RuleFinding>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceReport {
    pub modes: Vec<ModeComplianceReport>,
    pub all_passed: bool,
}

pub struct ComplianceChecker<'a> {
    lut: &'a LutStore,
}

impl<'a> ComplianceChecker<'a> {
    pub fn new(lut: &'a LutStore) -> Self {
        Self { lut }
    }

    /// Checks every mode in the store, cross-referencing RTP against the
    /// mode named `base` if present, else the mode with the highest RTP.
    pub fn check_all(&self) -> crate::error::Result<ComplianceReport> {
        let modes = self.lut.list_modes();
        self.check(&modes)
    }

    pub fn check(&self, modes: &[String]) -> crate::error::Result<ComplianceReport> {
        let stats = self.lut.compare(modes)?;

        let reference_rtp = stats
            .get("base")
            .map(|s| s.rtp)
            .or_else(|| stats.values().map(|s| s.rtp).fold(None, |acc, rtp| match acc {
                Some(best) if best >= rtp => Some(best),
                _ => Some(rtp),
            }));

        let mut reports = Vec::with_capacity(modes.len());
        for mode in modes {
            let table = self.lut.get_table(mode)?;
            let s = stats.get(mode).copied().unwrap_or_else(|| crate::lut::analyze(&table));
            let buckets = self.lut.payout_bucket_histogram(mode)?;
            let findings = check_mode(mode, &table.cost, &table.outcomes.len(), reference_rtp, &s, &buckets, &table);
            let passed = !findings.iter().any(|f| f.severity == Severity::Error);
            reports.push(ModeComplianceReport {
                mode: mode.clone(),
                passed,
                findings,
            });
        }

        let all_passed = reports.iter().all(|r| r.passed);
        Ok(ComplianceReport { modes: reports, all_passed })
    }
}

fn check_mode(
    mode: &str,
    cost: &f64,
    outcome_count: &usize,
    reference_rtp: Option<f64>,
    stats: &DerivedStatistics,
    buckets: &[PayoutBucket],
    table: &crate::lut::LookupTable,
) -> Vec<RuleFinding> {
    let mut findings = Vec::new();
    let cost = *cost;

    if stats.rtp < RTP_MIN || stats.rtp > RTP_MAX {
        findings.push(RuleFinding {
            rule: "rtp_range".into(),
            severity: Severity::Error,
            message: format!("rtp {:.4} outside [{RTP_MIN}, {RTP_MAX}]", stats.rtp),
        });
    }

    if let Some(reference) = reference_rtp {
        let deviation = (stats.rtp - reference).abs();
        if deviation > CROSS_MODE_RTP_TOLERANCE {
            findings.push(RuleFinding {
                rule: "cross_mode_rtp_variation".into(),
                severity: Severity::Error,
                message: format!(
                    "rtp {:.4} deviates {:.4} from reference {:.4} (tolerance {CROSS_MODE_RTP_TOLERANCE})",
                    stats.rtp, deviation, reference
                ),
            });
        }
    }

    let max_payout_multiplier = stats.max_payout;
    if cost > 0.0 {
        let spin_budget = MAX_SPIN_BUDGET_NUMERATOR / cost;
        let expected_spins_to_hit_max = if max_payout_multiplier > 0.0 {
            max_win_expected_spins(table, max_payout_multiplier)
        } else {
            0.0
        };
        if expected_spins_to_hit_max > spin_budget {
            findings.push(RuleFinding {
                rule: "max_win_attainability".into(),
                severity: Severity::Error,
                message: format!(
                    "expected {expected_spins_to_hit_max:.0} spins to reach max payout exceeds budget of {spin_budget:.0}"
                ),
            });
        }
    }

    if cost <= BASE_MODE_COST_CEILING && (stats.hit_rate < HIT_RATE_MIN || stats.hit_rate > HIT_RATE_MAX) {
        findings.push(RuleFinding {
            rule: "base_mode_hit_rate".into(),
            severity: Severity::Warning,
            message: format!("hit_rate {:.4} outside [{HIT_RATE_MIN}, {HIT_RATE_MAX}] for a base mode", stats.hit_rate),
        });
    }

    if let Some(gap) = find_bucket_ladder_gap(buckets) {
        findings.push(RuleFinding {
            rule: "bucket_ladder_gap".into(),
            severity: Severity::Warning,
            message: format!("empty bucket between non-empty buckets at range starting {gap}"),
        });
    }

    let distinct_payouts = table
        .outcomes
        .iter()
        .map(|o| o.payout)
        .collect::<std::collections::HashSet<_>>()
        .len();
    if distinct_payouts < MIN_DISTINCT_PAYOUTS {
        findings.push(RuleFinding {
            rule: "distinct_payout_count".into(),
            severity: Severity::Warning,
            message: format!("only {distinct_payouts} distinct payouts, want at least {MIN_DISTINCT_PAYOUTS}"),
        });
    }

    if let Some(freq) = most_frequent_nonzero_outcome_probability(table) {
        if freq >= MOST_FREQUENT_OUTCOME_CEILING {
            findings.push(RuleFinding {
                rule: "most_frequent_outcome_probability".into(),
                severity: Severity::Warning,
                message: format!("most frequent non-zero outcome has probability {freq:.4}, want < {MOST_FREQUENT_OUTCOME_CEILING}"),
            });
        }
    }

    if stats.zero_payout_rate > ZERO_PAYOUT_RATE_CEILING {
        findings.push(RuleFinding {
            rule: "zero_payout_rate".into(),
            severity: Severity::Error,
            message: format!("zero_payout_rate {:.4} exceeds {ZERO_PAYOUT_RATE_CEILING}", stats.zero_payout_rate),
        });
    }

    if stats.volatility >= VOLATILITY_INFO_CEILING {
        findings.push(RuleFinding {
            rule: "volatility".into(),
            severity: Severity::Info,
            message: format!("volatility {:.2} at or above informational threshold {VOLATILITY_INFO_CEILING}", stats.volatility),
        });
    }

    let _ = (mode, outcome_count);
    findings
}

/// Expected number of spins before drawing the outcome with the highest
/// payout, i.e. `1 / P(max payout)`.
fn max_win_expected_spins(table: &crate::lut::LookupTable, max_payout_multiplier: f64) -> f64 {
    let max_payout_raw = (max_payout_multiplier * 100.0).round() as u64;
    let total = table.total_weight() as f64;
    if total == 0.0 {
        return f64::INFINITY;
    }
    let max_weight: u64 = table
        .outcomes
        .iter()
        .filter(|o| o.payout == max_payout_raw)
        .map(|o| o.weight)
        .sum();
    if max_weight == 0 {
        return f64::INFINITY;
    }
    total / max_weight as f64
}

fn most_frequent_nonzero_outcome_probability(table: &crate::lut::LookupTable) -> Option<f64> {
    let total = table.total_weight() as f64;
    if total == 0.0 {
        return None;
    }
    table
        .outcomes
        .iter()
        .filter(|o| o.payout > 0)
        .map(|o| o.weight as f64 / total)
        .fold(None, |acc, p| match acc {
            Some(best) if best >= p => Some(best),
            _ => Some(p),
        })
}

fn find_bucket_ladder_gap(buckets: &[PayoutBucket]) -> Option<f64> {
    buckets
        .windows(3)
        .find(|w| w[0].count > 0 && w[1].count == 0 && w[2].count > 0)
        .map(|w| w[1].range_start)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lut::LutStore;

    fn lut(outcomes_csv: &str) -> LutStore {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("index.json"),
            r#"{"modes":[{"name":"base","cost":1.0,"weights":"base.csv"}]}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("base.csv"), outcomes_csv).unwrap();
        // LutStore::open parses everything into memory eagerly, so the
        // directory can be dropped once open() returns.
        LutStore::open(dir.path()).unwrap()
    }

    #[test]
    fn flags_rtp_out_of_band() {
        let store = lut("0,50,0\n1,50,500\n");
        let checker = ComplianceChecker::new(&store);
        let report = checker.check_all().unwrap();
        let base = &report.modes[0];
        assert!(base.findings.iter().any(|f| f.rule == "rtp_range" && f.severity == Severity::Error));
    }

    #[test]
    fn flags_zero_payout_rate_too_high() {
        let store = lut("0,99,0\n1,1,9700\n");
        let checker = ComplianceChecker::new(&store);
        let report = checker.check_all().unwrap();
        let base = &report.modes[0];
        assert!(base.findings.iter().any(|f| f.rule == "zero_payout_rate"));
    }

    #[test]
    fn compliant_table_passes_with_no_errors() {
        let mut rows = String::new();
        for i in 0..12u64 {
            rows.push_str(&format!("{i},100,{}\n", i * 10));
        }
        rows.push_str("900,1,20000\n");
        let store = lut(&rows);
        let checker = ComplianceChecker::new(&store);
        let report = checker.check_all().unwrap();
        let base = &report.modes[0];
        assert!(!base.findings.iter().any(|f| f.severity == Severity::Error), "{:?}", base.findings);
    }

    #[test]
    fn flags_too_few_distinct_payouts() {
        let store = lut("0,50,0\n1,50,150\n");
        let checker = ComplianceChecker::new(&store);
        let report = checker.check_all().unwrap();
        let base = &report.modes[0];
        assert!(base.findings.iter().any(|f| f.rule == "distinct_payout_count"));
    }
}
