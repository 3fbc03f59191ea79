//! Single-Mode Simulator: runs `trials` independent trials of `spins` draws
//! each against one mode's table, checking per-`sᵢ` convergence to a target
//! RTP at a list of test spin counts (§4.8). Each trial gets its own RNG,
//! seeded from a shared master RNG so a whole run is reproducible from one
//! seed while trials stay independent.

use super::metrics::{mean, std_dev};
use crate::error::{LutError, Result};
use crate::lut::{LookupTable, LutStore};
use crate::sampler::WeightedSampler;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Spin cap applied when `quick` is set, so an interactive "does this look
/// right" check never runs a full-size trial.
const QUICK_SPIN_CAP: usize = 10_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SingleModeRequest {
    pub mode: String,
    pub trials: usize,
    pub spins_per_trial: usize,
    pub target_rtp: f64,
    /// Spin counts `[s₁ … sₖ]` at which each trial's running RTP is checked
    /// against `target_rtp`.
    #[serde(default)]
    pub test_spin_counts: Vec<usize>,
    /// Weights `[w₁ … wₖ]` matching `test_spin_counts`, combined into
    /// `weighted_score` as `Σ wᵢ · success_rate(sᵢ)`.
    #[serde(default)]
    pub weights: Vec<f64>,
    /// Runs a single trial with a running RTP/balance track instead, capped
    /// at `QUICK_SPIN_CAP` spins.
    #[serde(default)]
    pub quick: bool,
    /// Master seed; omitted means a fresh entropy-seeded run.
    #[serde(default)]
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TrialResult {
    pub rtp: f64,
    pub spins: usize,
}

/// One `test_spin_counts` entry's observed success rate across all trials.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SpinCountSuccessRate {
    pub spin_count: usize,
    /// Fraction of trials whose RTP over the first `spin_count` spins was
    /// at or above `target_rtp`.
    pub success_rate: f64,
}

/// Spin-by-spin running RTP and net-balance track from the `quick` variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuickRun {
    pub running_rtp: Vec<f64>,
    pub running_balance_minor: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SingleModeResult {
    pub mode: String,
    pub trials: usize,
    pub spins_per_trial: usize,
    pub target_rtp: f64,
    pub mean_rtp: f64,
    pub std_dev_rtp: f64,
    pub success_rates: Vec<SpinCountSuccessRate>,
    /// `Σᵢ wᵢ · success_rate(sᵢ)`; `0.0` when `test_spin_counts` is empty.
    pub weighted_score: f64,
    pub trial_results: Vec<TrialResult>,
    pub quick_run: Option<QuickRun>,
}

pub struct SingleModeSimulator {
    lut: Arc<LutStore>,
}

impl SingleModeSimulator {
    pub fn new(lut: Arc<LutStore>) -> Self {
        Self { lut }
    }

    pub fn run(&self, req: SingleModeRequest) -> Result<SingleModeResult> {
        if !req.weights.is_empty() && req.weights.len() != req.test_spin_counts.len() {
            return Err(LutError::validation(format!(
                "weights ({}) and test_spin_counts ({}) must have the same length",
                req.weights.len(),
                req.test_spin_counts.len()
            )));
        }

        let table = self.lut.get_table(&req.mode)?;
        let sampler = WeightedSampler::from_table(&table)?;

        if req.quick {
            return Ok(Self::run_quick(&req, &table, &sampler));
        }

        let spins = req.spins_per_trial;

        // Sorted by spin count so each trial's single pass can check them
        // off in order; `orig_idx` maps back to the caller's own ordering.
        let mut checks: Vec<(usize, usize)> = req
            .test_spin_counts
            .iter()
            .enumerate()
            .map(|(orig_idx, &s)| (s.clamp(1, spins.max(1)), orig_idx))
            .collect();
        checks.sort_by_key(|&(s, _)| s);

        let master = Mutex::new(match req.seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        });
        let seeds: Vec<u64> = (0..req.trials).map(|_| master.lock().gen()).collect();

        let trial_data: Vec<(f64, Vec<f64>)> = seeds
            .par_iter()
            .map(|&seed| {
                let mut rng = StdRng::seed_from_u64(seed);
                let mut cum_payout_raw = 0u64;
                let mut per_check_rtp = vec![0.0; checks.len()];
                let mut check_pos = 0usize;

                for i in 0..spins {
                    cum_payout_raw += sampler.sample(&mut rng).payout;
                    let spin_no = i + 1;
                    while check_pos < checks.len() && checks[check_pos].0 == spin_no {
                        let wagered = table.cost * spin_no as f64;
                        let rtp = if wagered > 0.0 {
                            (cum_payout_raw as f64 / 100.0) / wagered
                        } else {
                            0.0
                        };
                        per_check_rtp[check_pos] = rtp;
                        check_pos += 1;
                    }
                }

                let wagered_total = table.cost * spins as f64;
                let rtp = if wagered_total > 0.0 {
                    (cum_payout_raw as f64 / 100.0) / wagered_total
                } else {
                    0.0
                };
                (rtp, per_check_rtp)
            })
            .collect();

        let trial_results: Vec<TrialResult> = trial_data.iter().map(|(rtp, _)| TrialResult { rtp: *rtp, spins }).collect();
        let rtps: Vec<f64> = trial_results.iter().map(|t| t.rtp).collect();
        let mean_rtp = mean(&rtps);
        let std_dev_rtp = std_dev(&rtps);

        let trials = req.trials.max(1);
        let mut success_rates = vec![SpinCountSuccessRate { spin_count: 0, success_rate: 0.0 }; checks.len()];
        for &(spin_count, orig_idx) in &checks {
            let successes = trial_data.iter().filter(|(_, per_check)| per_check[orig_idx] >= req.target_rtp).count();
            success_rates[orig_idx] = SpinCountSuccessRate {
                spin_count,
                success_rate: successes as f64 / trials as f64,
            };
        }

        let weighted_score = req
            .weights
            .iter()
            .zip(success_rates.iter())
            .map(|(w, s)| w * s.success_rate)
            .sum();

        Ok(SingleModeResult {
            mode: req.mode,
            trials: req.trials,
            spins_per_trial: spins,
            target_rtp: req.target_rtp,
            mean_rtp,
            std_dev_rtp,
            success_rates,
            weighted_score,
            trial_results,
            quick_run: None,
        })
    }

    fn run_quick(req: &SingleModeRequest, table: &LookupTable, sampler: &WeightedSampler) -> SingleModeResult {
        let spins = req.spins_per_trial.min(QUICK_SPIN_CAP);
        let mut rng = match req.seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };

        let bet_minor = (table.cost * 100.0).round() as i64;
        let mut running_rtp = Vec::with_capacity(spins);
        let mut running_balance_minor = Vec::with_capacity(spins);
        let mut cum_payout_raw = 0u64;
        let mut balance = 0i64;

        for i in 0..spins {
            let outcome = sampler.sample(&mut rng);
            cum_payout_raw += outcome.payout;
            let win_minor = (bet_minor as f64 * outcome.payout as f64 / 100.0).round() as i64;
            balance += win_minor - bet_minor;

            let spin_no = i + 1;
            let wagered = table.cost * spin_no as f64;
            let rtp = if wagered > 0.0 {
                (cum_payout_raw as f64 / 100.0) / wagered
            } else {
                0.0
            };
            running_rtp.push(rtp);
            running_balance_minor.push(balance);
        }

        let final_rtp = running_rtp.last().copied().unwrap_or(0.0);

        SingleModeResult {
            mode: req.mode.clone(),
            trials: 1,
            spins_per_trial: spins,
            target_rtp: req.target_rtp,
            mean_rtp: final_rtp,
            std_dev_rtp: 0.0,
            success_rates: Vec::new(),
            weighted_score: 0.0,
            trial_results: vec![TrialResult { rtp: final_rtp, spins }],
            quick_run: Some(QuickRun {
                running_rtp,
                running_balance_minor,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lut() -> Arc<LutStore> {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("index.json"),
            r#"{"modes":[{"name":"base","cost":1.0,"weights":"base.csv"}]}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("base.csv"), "0,50,0\n1,30,200\n2,20,1000\n").unwrap();
        Arc::new(LutStore::open(dir.path()).unwrap())
    }

    #[test]
    fn converges_near_table_rtp_with_fixed_seed() {
        let sim = SingleModeSimulator::new(lut());
        let result = sim
            .run(SingleModeRequest {
                mode: "base".into(),
                trials: 50,
                spins_per_trial: 5_000,
                target_rtp: 2.6,
                test_spin_counts: vec![],
                weights: vec![],
                quick: false,
                seed: Some(1),
            })
            .unwrap();
        assert!((result.mean_rtp - 2.6).abs() < 0.1, "mean_rtp {}", result.mean_rtp);
        assert_eq!(result.trial_results.len(), 50);
    }

    #[test]
    fn quick_mode_caps_spins() {
        let sim = SingleModeSimulator::new(lut());
        let result = sim
            .run(SingleModeRequest {
                mode: "base".into(),
                trials: 2,
                spins_per_trial: 50_000,
                target_rtp: 2.6,
                test_spin_counts: vec![],
                weights: vec![],
                quick: true,
                seed: Some(1),
            })
            .unwrap();
        assert_eq!(result.spins_per_trial, 10_000);
        let quick = result.quick_run.unwrap();
        assert_eq!(quick.running_rtp.len(), 10_000);
        assert_eq!(quick.running_balance_minor.len(), 10_000);
    }

    #[test]
    fn zero_target_rtp_scores_zero_when_no_test_spin_counts() {
        let sim = SingleModeSimulator::new(lut());
        let result = sim
            .run(SingleModeRequest {
                mode: "base".into(),
                trials: 1,
                spins_per_trial: 1,
                target_rtp: 0.0,
                test_spin_counts: vec![],
                weights: vec![],
                quick: false,
                seed: Some(1),
            })
            .unwrap();
        assert_eq!(result.weighted_score, 0.0);
        assert!(result.success_rates.is_empty());
    }

    #[test]
    fn per_spin_count_success_rate_and_weighted_score() {
        let sim = SingleModeSimulator::new(lut());
        let result = sim
            .run(SingleModeRequest {
                mode: "base".into(),
                trials: 100,
                spins_per_trial: 2_000,
                target_rtp: 2.6,
                test_spin_counts: vec![500, 2_000],
                weights: vec![0.25, 0.75],
                quick: false,
                seed: Some(7),
            })
            .unwrap();

        assert_eq!(result.success_rates.len(), 2);
        assert_eq!(result.success_rates[0].spin_count, 500);
        assert_eq!(result.success_rates[1].spin_count, 2_000);
        for sr in &result.success_rates {
            assert!((0.0..=1.0).contains(&sr.success_rate));
        }
        let expected = 0.25 * result.success_rates[0].success_rate + 0.75 * result.success_rates[1].success_rate;
        assert!((result.weighted_score - expected).abs() < 1e-9);
    }

    #[test]
    fn mismatched_weights_and_spin_counts_rejected() {
        let sim = SingleModeSimulator::new(lut());
        let result = sim.run(SingleModeRequest {
            mode: "base".into(),
            trials: 1,
            spins_per_trial: 10,
            target_rtp: 2.6,
            test_spin_counts: vec![1, 2],
            weights: vec![1.0],
            quick: false,
            seed: Some(1),
        });
        assert!(result.is_err());
    }
}
