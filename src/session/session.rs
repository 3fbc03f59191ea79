//! One player's in-memory session: balance, bounded round history, forced
//! outcomes, and RTP bias (§4.7, §4.8).

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use uuid::Uuid;

/// One completed spin, retained in the session's bounded history ring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Round {
    pub sim_id: i64,
    pub mode: String,
    pub bet_minor: i64,
    pub win_minor: i64,
    pub balance_after: i64,
    pub at: DateTime<Utc>,
    /// The book event behind this draw, when the mode has an event book and
    /// the sim_id's line was found (`None` for books-free modes or a sim_id
    /// with no recorded line).
    pub event: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    pub spins: u64,
    pub total_wagered_minor: i64,
    pub total_won_minor: i64,
}

impl Default for SessionStats {
    fn default() -> Self {
        Self {
            spins: 0,
            total_wagered_minor: 0,
            total_won_minor: 0,
        }
    }
}

/// A session's full state. `rng` is not [`Clone`]/[`Serialize`]; callers
/// that need a wire view should use [`Session::snapshot`].
pub struct Session {
    pub id: Uuid,
    pub balance_minor: i64,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    pub history: VecDeque<Round>,
    pub forced_sim_id: HashMap<String, i64>,
    pub rtp_bias: f64,
    pub stats: SessionStats,
    pub(crate) rng: StdRng,
    history_cap: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub id: Uuid,
    pub balance_minor: i64,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    pub rtp_bias: f64,
    pub stats: SessionStats,
    pub history: Vec<Round>,
}

impl Session {
    pub fn new(starting_balance_minor: i64, history_cap: usize) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            balance_minor: starting_balance_minor,
            created_at: now,
            last_active: now,
            history: VecDeque::with_capacity(history_cap.min(1024)),
            forced_sim_id: HashMap::new(),
            rtp_bias: 0.0,
            stats: SessionStats::default(),
            rng: StdRng::from_entropy(),
            history_cap,
        }
    }

    pub fn touch(&mut self) {
        self.last_active = Utc::now();
    }

    pub fn is_idle(&self, max_age_secs: u64) -> bool {
        let age = Utc::now().signed_duration_since(self.last_active);
        age.num_seconds().max(0) as u64 > max_age_secs
    }

    pub fn push_round(&mut self, round: Round) {
        self.stats.spins += 1;
        self.stats.total_wagered_minor += round.bet_minor;
        self.stats.total_won_minor += round.win_minor;
        if self.history.len() >= self.history_cap {
            self.history.pop_front();
        }
        self.history.push_back(round);
    }

    pub fn record_stats_only(&mut self, bet_minor: i64, win_minor: i64) {
        self.stats.spins += 1;
        self.stats.total_wagered_minor += bet_minor;
        self.stats.total_won_minor += win_minor;
    }

    pub fn set_rtp_bias(&mut self, bias: f64, bounds: (f64, f64)) {
        self.rtp_bias = bias.clamp(bounds.0, bounds.1);
    }

    pub fn force_next(&mut self, mode: &str, sim_id: i64) {
        self.forced_sim_id.insert(mode.to_ascii_lowercase(), sim_id);
    }

    pub fn take_forced(&mut self, mode: &str) -> Option<i64> {
        self.forced_sim_id.remove(&mode.to_ascii_lowercase())
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    pub fn clear_stats(&mut self) {
        self.stats = SessionStats::default();
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id,
            balance_minor: self.balance_minor,
            created_at: self.created_at,
            last_active: self.last_active,
            rtp_bias: self.rtp_bias,
            stats: self.stats.clone(),
            history: self.history.iter().cloned().collect(),
        }
    }
}
