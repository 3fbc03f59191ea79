//! Crowd Simulator: simulates `players` independent bankrolls over
//! `spins_per_player` spins each, tracking drawdown, streaks, and danger
//! spins, then reports a probability-of-profit curve, a percentile balance
//! curve, and a composite risk score (§4.9). Batches of ~100 players run on
//! a blocking thread (rayon fan-out inside), with progress published on the
//! hub between batches. The rayon/tokio hybrid keeps the async runtime's
//! worker threads free while CPU-bound sampling happens elsewhere.

use super::metrics::{mean, median, percentile};
use crate::error::Result;
use crate::hub::{Hub, HubEventKind, HubMessage};
use crate::lut::LutStore;
use crate::sampler::WeightedSampler;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

const PROGRESS_BATCH: usize = 100;
/// Number of equi-spaced checkpoints sampled for the percentile balance
/// curve, not counting the terminal spin (§4.9: "~30 equi-spaced spins
/// plus the terminal spin").
const CURVE_CHECKPOINTS: usize = 30;

fn default_big_win_multiplier() -> f64 {
    10.0
}

fn default_danger_fraction() -> f64 {
    0.1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrowdRequest {
    pub mode: String,
    pub players: usize,
    pub spins_per_player: usize,
    pub starting_balance_minor: i64,
    pub bet_minor: i64,
    /// Normalized payout multiplier (`payout/100 / cost`) at or above this
    /// counts as a "big win" for `first_big_win_spin` (glossary default 10×).
    #[serde(default = "default_big_win_multiplier")]
    pub big_win_multiplier: f64,
    /// A spin whose balance falls below `starting_balance_minor *
    /// danger_fraction` counts toward `danger_spins`.
    #[serde(default = "default_danger_fraction")]
    pub danger_fraction: f64,
    /// Retains each player's full per-spin balance track in the result.
    /// `O(players * spins_per_player)` memory; off by default.
    #[serde(default)]
    pub keep_balance_history: bool,
}

/// Mean/median/p10/p90 over one per-player metric across the crowd.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Stat {
    pub mean: f64,
    pub median: f64,
    pub p10: f64,
    pub p90: f64,
}

fn stat(xs: &[f64]) -> Stat {
    Stat {
        mean: mean(xs),
        median: median(xs),
        p10: percentile(xs, 10.0),
        p90: percentile(xs, 90.0),
    }
}

/// One point of the percentile balance curve (§4.9).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BalanceCurvePoint {
    pub spin_index: usize,
    pub p10_minor: f64,
    pub p50_minor: f64,
    pub p90_minor: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTag {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone)]
struct PlayerOutcome {
    final_balance_minor: i64,
    peak_balance_minor: i64,
    min_balance_minor: i64,
    max_drawdown_minor: i64,
    longest_win_streak: u32,
    longest_losing_streak: u32,
    wins: u32,
    losses: u32,
    first_big_win_spin: Option<usize>,
    danger_spins: u32,
    total_wagered_minor: i64,
    total_won_minor: i64,
    multiplier_sum: f64,
    multiplier_count: u32,
    busted: bool,
    balance_history: Option<Vec<i64>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrowdResult {
    pub players: usize,
    pub spins_per_player: usize,
    pub probability_of_profit: f64,
    pub probability_of_profit_curve: Vec<f64>,
    pub percentile_balance_curve: Vec<BalanceCurvePoint>,
    pub bust_rate: f64,
    pub mean_final_balance_minor: f64,
    pub p10_final_balance_minor: f64,
    pub p50_final_balance_minor: f64,
    pub p90_final_balance_minor: f64,
    pub peak_balance_minor: Stat,
    pub min_balance_minor: Stat,
    pub drawdown_minor: Stat,
    pub danger_spins: Stat,
    pub win_streak: Stat,
    pub loss_streak: Stat,
    /// Fraction of players who recorded at least one "big win" spin.
    pub big_win_rate: f64,
    /// Stats over `first_big_win_spin`, computed only across players who had one.
    pub first_big_win_spin: Stat,
    /// Mean of `(payout/100) / cost` over every spin actually played.
    pub cost_normalized_payout_multiplier: f64,
    pub theoretical_rtp: f64,
    pub actual_rtp: f64,
    pub rtp_deviation: f64,
    pub risk_tag: RiskTag,
    /// `0.4·PoP + 0.3·(1 − bust_rate) + 0.3·(1 − mean_drawdown/initial_balance)`.
    pub composite_weighted_score: f64,
    /// Present only when `keep_balance_history` was set; one entry per player.
    pub balance_history: Option<Vec<Vec<i64>>>,
}

pub struct CrowdSimulator {
    lut: Arc<LutStore>,
    hub: Hub,
}

impl CrowdSimulator {
    pub fn new(lut: Arc<LutStore>, hub: Hub) -> Self {
        Self { lut, hub }
    }

    pub async fn run(&self, req: CrowdRequest) -> Result<CrowdResult> {
        let table = self.lut.get_table(&req.mode)?;
        let cost = table.cost;
        let theoretical_rtp = self.lut.analyze(&req.mode)?.rtp;
        let sampler = Arc::new(WeightedSampler::from_table(&table)?);
        let checkpoints = Arc::new(checkpoint_spins(req.spins_per_player));

        let mut outcomes: Vec<PlayerOutcome> = Vec::with_capacity(req.players);
        let mut profit_count = vec![0u64; req.spins_per_player];
        let mut checkpoint_balances: Vec<Vec<f64>> = vec![Vec::with_capacity(req.players); checkpoints.len()];
        let mut done = 0usize;

        while done < req.players {
            let batch_len = PROGRESS_BATCH.min(req.players - done);
            let sampler = sampler.clone();
            let checkpoints = checkpoints.clone();
            let bet_minor = req.bet_minor;
            let starting_balance = req.starting_balance_minor;
            let spins = req.spins_per_player;
            let big_win_multiplier = req.big_win_multiplier;
            let danger_fraction = req.danger_fraction;
            let keep_history = req.keep_balance_history;

            let batch = tokio::task::spawn_blocking(move || {
                (0..batch_len)
                    .into_par_iter()
                    .map(|_| {
                        simulate_player(
                            &sampler,
                            bet_minor,
                            starting_balance,
                            spins,
                            cost,
                            big_win_multiplier,
                            danger_fraction,
                            &checkpoints,
                            keep_history,
                        )
                    })
                    .collect::<Vec<_>>()
            })
            .await
            .map_err(|e| crate::error::LutError::state(format!("crowd simulation task panicked: {e}")))?;

            for (outcome, profit_flags, checkpoint_vals) in batch {
                for (i, &profitable) in profit_flags.iter().enumerate() {
                    if profitable {
                        profit_count[i] += 1;
                    }
                }
                for (ci, balance) in checkpoint_vals.into_iter().enumerate() {
                    checkpoint_balances[ci].push(balance as f64);
                }
                outcomes.push(outcome);
            }
            done += batch_len;

            self.hub.broadcast(HubMessage::new(
                HubEventKind::SimulatorProgress,
                Some(req.mode.clone()),
                json!({ "players_done": done, "players_total": req.players }),
            ));
        }

        Ok(summarize(&req, &outcomes, &profit_count, &checkpoints, &checkpoint_balances, theoretical_rtp))
    }
}

/// Equi-spaced spin numbers (1-based) sampled for the percentile balance
/// curve, always ending on the terminal spin.
fn checkpoint_spins(spins_per_player: usize) -> Vec<usize> {
    if spins_per_player == 0 {
        return Vec::new();
    }
    let n = CURVE_CHECKPOINTS.min(spins_per_player);
    let mut spins: Vec<usize> = (1..=n)
        .map(|i| (((i as f64) / (n as f64)) * spins_per_player as f64).ceil() as usize)
        .map(|s| s.clamp(1, spins_per_player))
        .collect();
    spins.dedup();
    if spins.last() != Some(&spins_per_player) {
        spins.push(spins_per_player);
    }
    spins
}

#[allow(clippy::too_many_arguments)]
fn simulate_player(
    sampler: &WeightedSampler,
    bet_minor: i64,
    starting_balance: i64,
    spins: usize,
    cost: f64,
    big_win_multiplier: f64,
    danger_fraction: f64,
    checkpoints: &[usize],
    keep_history: bool,
) -> (PlayerOutcome, Vec<bool>, Vec<i64>) {
    let mut rng = StdRng::from_entropy();
    let mut balance = starting_balance;
    let mut peak = starting_balance;
    let mut min_balance = starting_balance;
    let mut max_drawdown = 0i64;
    let mut streak = 0i32;
    let mut longest_win_streak = 0u32;
    let mut longest_losing_streak = 0u32;
    let mut wins = 0u32;
    let mut losses = 0u32;
    let mut first_big_win_spin = None;
    let mut danger_spins = 0u32;
    let mut total_wagered = 0i64;
    let mut total_won = 0i64;
    let mut multiplier_sum = 0.0f64;
    let mut multiplier_count = 0u32;
    let mut busted = false;

    let danger_floor = (starting_balance as f64 * danger_fraction) as i64;
    let mut profit_flags = Vec::with_capacity(spins);
    let mut checkpoint_vals = Vec::with_capacity(checkpoints.len());
    let mut checkpoint_pos = 0usize;
    let mut history = keep_history.then(|| Vec::with_capacity(spins));

    for i in 0..spins {
        let spin_no = i + 1;

        if !busted && balance < bet_minor {
            busted = true;
        }

        if !busted {
            let outcome = sampler.sample(&mut rng);
            let win_minor = (bet_minor as f64 * outcome.payout as f64 / 100.0).round() as i64;
            balance = balance - bet_minor + win_minor;
            total_wagered += bet_minor;
            total_won += win_minor;

            let multiplier = (outcome.payout as f64 / 100.0) / cost;
            multiplier_sum += multiplier;
            multiplier_count += 1;
            if first_big_win_spin.is_none() && multiplier >= big_win_multiplier {
                first_big_win_spin = Some(spin_no);
            }

            if win_minor > 0 {
                wins += 1;
                streak = if streak >= 0 { streak + 1 } else { 1 };
                longest_win_streak = longest_win_streak.max(streak.max(0) as u32);
            } else {
                losses += 1;
                streak = if streak <= 0 { streak - 1 } else { -1 };
                longest_losing_streak = longest_losing_streak.max((-streak).max(0) as u32);
            }

            peak = peak.max(balance);
            min_balance = min_balance.min(balance);
            max_drawdown = max_drawdown.max(peak - balance);
        }

        if balance < danger_floor {
            danger_spins += 1;
        }

        profit_flags.push(balance >= starting_balance);
        if let Some(h) = history.as_mut() {
            h.push(balance);
        }
        if checkpoint_pos < checkpoints.len() && checkpoints[checkpoint_pos] == spin_no {
            checkpoint_vals.push(balance);
            checkpoint_pos += 1;
        }
    }

    let outcome = PlayerOutcome {
        final_balance_minor: balance,
        peak_balance_minor: peak,
        min_balance_minor: min_balance,
        max_drawdown_minor: max_drawdown,
        longest_win_streak,
        longest_losing_streak,
        wins,
        losses,
        first_big_win_spin,
        danger_spins,
        total_wagered_minor: total_wagered,
        total_won_minor: total_won,
        multiplier_sum,
        multiplier_count,
        busted,
        balance_history: history,
    };

    (outcome, profit_flags, checkpoint_vals)
}

fn summarize(
    req: &CrowdRequest,
    outcomes: &[PlayerOutcome],
    profit_count: &[u64],
    checkpoints: &[usize],
    checkpoint_balances: &[Vec<f64>],
    theoretical_rtp: f64,
) -> CrowdResult {
    let n = outcomes.len().max(1) as f64;

    let final_balances: Vec<f64> = outcomes.iter().map(|o| o.final_balance_minor as f64).collect();
    let peaks: Vec<f64> = outcomes.iter().map(|o| o.peak_balance_minor as f64).collect();
    let mins: Vec<f64> = outcomes.iter().map(|o| o.min_balance_minor as f64).collect();
    let drawdowns: Vec<f64> = outcomes.iter().map(|o| o.max_drawdown_minor as f64).collect();
    let danger: Vec<f64> = outcomes.iter().map(|o| o.danger_spins as f64).collect();
    let win_streaks: Vec<f64> = outcomes.iter().map(|o| o.longest_win_streak as f64).collect();
    let loss_streaks: Vec<f64> = outcomes.iter().map(|o| o.longest_losing_streak as f64).collect();
    let big_wins: Vec<f64> = outcomes.iter().filter_map(|o| o.first_big_win_spin).map(|s| s as f64).collect();

    let profitable = outcomes.iter().filter(|o| o.final_balance_minor as f64 >= req.starting_balance_minor as f64).count();
    let busted = outcomes.iter().filter(|o| o.busted).count();

    let probability_of_profit_curve: Vec<f64> = profit_count.iter().map(|&c| c as f64 / n).collect();
    let probability_of_profit = probability_of_profit_curve.last().copied().unwrap_or(0.0);

    let percentile_balance_curve: Vec<BalanceCurvePoint> = checkpoints
        .iter()
        .zip(checkpoint_balances.iter())
        .map(|(&spin_index, balances)| BalanceCurvePoint {
            spin_index,
            p10_minor: percentile(balances, 10.0),
            p50_minor: percentile(balances, 50.0),
            p90_minor: percentile(balances, 90.0),
        })
        .collect();

    let total_wagered: i64 = outcomes.iter().map(|o| o.total_wagered_minor).sum();
    let total_won: i64 = outcomes.iter().map(|o| o.total_won_minor).sum();
    let actual_rtp = if total_wagered > 0 {
        total_won as f64 / total_wagered as f64
    } else {
        0.0
    };

    let multiplier_sum: f64 = outcomes.iter().map(|o| o.multiplier_sum).sum();
    let multiplier_count: u32 = outcomes.iter().map(|o| o.multiplier_count).sum();
    let cost_normalized_payout_multiplier = if multiplier_count > 0 {
        multiplier_sum / multiplier_count as f64
    } else {
        0.0
    };

    let bust_rate = busted as f64 / n;
    let mean_drawdown = mean(&drawdowns);
    let drawdown_fraction = if req.starting_balance_minor > 0 {
        (mean_drawdown / req.starting_balance_minor as f64).min(1.0)
    } else {
        0.0
    };
    let composite_weighted_score = (0.4 * probability_of_profit + 0.3 * (1.0 - bust_rate) + 0.3 * (1.0 - drawdown_fraction)).clamp(0.0, 1.0);

    let risk_tag = if probability_of_profit >= 0.6 && bust_rate < 0.1 {
        RiskTag::Low
    } else if probability_of_profit < 0.3 || bust_rate > 0.4 {
        RiskTag::High
    } else {
        RiskTag::Medium
    };

    let balance_history = if req.keep_balance_history {
        Some(outcomes.iter().map(|o| o.balance_history.clone().unwrap_or_default()).collect())
    } else {
        None
    };

    CrowdResult {
        players: outcomes.len(),
        spins_per_player: req.spins_per_player,
        probability_of_profit,
        probability_of_profit_curve,
        percentile_balance_curve,
        bust_rate,
        mean_final_balance_minor: mean(&final_balances),
        p10_final_balance_minor: percentile(&final_balances, 10.0),
        p50_final_balance_minor: percentile(&final_balances, 50.0),
        p90_final_balance_minor: percentile(&final_balances, 90.0),
        peak_balance_minor: stat(&peaks),
        min_balance_minor: stat(&mins),
        drawdown_minor: stat(&drawdowns),
        danger_spins: stat(&danger),
        win_streak: stat(&win_streaks),
        loss_streak: stat(&loss_streaks),
        big_win_rate: big_wins.len() as f64 / n,
        first_big_win_spin: stat(&big_wins),
        cost_normalized_payout_multiplier,
        theoretical_rtp,
        actual_rtp,
        rtp_deviation: actual_rtp - theoretical_rtp,
        risk_tag,
        composite_weighted_score,
        balance_history,
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

    fn request() -> CrowdRequest {
        CrowdRequest {
            mode: "base".into(),
            players: 150,
            spins_per_player: 20,
            starting_balance_minor: 10_000,
            bet_minor: 100,
            big_win_multiplier: default_big_win_multiplier(),
            danger_fraction: default_danger_fraction(),
            keep_balance_history: false,
        }
    }

    #[tokio::test]
    async fn runs_full_crowd_and_publishes_progress() {
        let hub = Hub::new(32, 32);
        let mut sub = hub.subscribe();
        let sim = CrowdSimulator::new(lut(), hub);

        let result = sim.run(request()).await.unwrap();

        assert_eq!(result.players, 150);
        assert!(result.probability_of_profit >= 0.0 && result.probability_of_profit <= 1.0);
        assert_eq!(result.probability_of_profit_curve.len(), 20);
        assert!(!result.percentile_balance_curve.is_empty());
        assert_eq!(result.percentile_balance_curve.last().unwrap().spin_index, 20);
        assert!(result.balance_history.is_none());

        let mut progress_events = 0;
        while let Ok(msg) = sub.try_recv() {
            if msg.kind == HubEventKind::SimulatorProgress {
                progress_events += 1;
            }
        }
        assert_eq!(progress_events, 2);
    }

    #[tokio::test]
    async fn keeps_balance_history_when_requested() {
        let hub = Hub::new(16, 16);
        let sim = CrowdSimulator::new(lut(), hub);
        let mut req = request();
        req.players = 5;
        req.keep_balance_history = true;

        let result = sim.run(req).await.unwrap();
        let history = result.balance_history.unwrap();
        assert_eq!(history.len(), 5);
        assert_eq!(history[0].len(), 20);
    }

    #[tokio::test]
    async fn risk_tag_and_score_are_bounded() {
        let hub = Hub::new(16, 16);
        let sim = CrowdSimulator::new(lut(), hub);
        let result = sim.run(request()).await.unwrap();
        assert!(matches!(result.risk_tag, RiskTag::Low | RiskTag::Medium | RiskTag::High));
        assert!((0.0..=1.0).contains(&result.composite_weighted_score));
    }

    #[test]
    fn checkpoint_spins_always_ends_on_terminal_spin() {
        let spins = checkpoint_spins(5);
        assert_eq!(*spins.last().unwrap(), 5);
        let spins = checkpoint_spins(1_000);
        assert_eq!(*spins.last().unwrap(), 1_000);
        assert!(spins.len() <= CURVE_CHECKPOINTS);
    }
}
