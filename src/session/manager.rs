//! [`SessionManager`]: owns every live session and the sampling path that
//! turns a play request into a round (§4.7, §4.8).

use super::session::{Round, Session, SessionSnapshot};
use crate::config::LibraryConfig;
use crate::error::{LutError, Result};
use crate::events::EventsStore;
use crate::hub::{Hub, HubEventKind, HubMessage};
use crate::lut::{LookupTable, LutStore};
use crate::sampler::WeightedSampler;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayResult {
    pub session: SessionSnapshot,
    pub round: Round,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayResult {
    pub outcome: crate::lut::Outcome,
    pub event: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchPlayResult {
    pub session: SessionSnapshot,
    pub spins: u64,
    pub total_wagered_minor: i64,
    pub total_won_minor: i64,
    /// Populated only when `spins <= 1000`; larger batches only update aggregates.
    pub rounds: Vec<Round>,
}

/// One mode's cached sampler, tagged with the table `Arc` it was built from
/// so a `rewrite_weights`/`reload` swap is detected without an explicit
/// invalidation call.
struct CachedSampler {
    table_ptr: *const LookupTable,
    sampler: Arc<WeightedSampler>,
}

// Safety: `table_ptr` is only ever compared for identity against a live
// `Arc<LookupTable>` held elsewhere; it is never dereferenced.
unsafe impl Send for CachedSampler {}
unsafe impl Sync for CachedSampler {}

pub struct SessionManager {
    config: LibraryConfig,
    lut: Arc<LutStore>,
    events: Arc<EventsStore>,
    hub: Hub,
    sessions: RwLock<HashMap<Uuid, Session>>,
    samplers: RwLock<HashMap<String, CachedSampler>>,
}

impl SessionManager {
    pub fn new(config: LibraryConfig, lut: Arc<LutStore>, events: Arc<EventsStore>, hub: Hub) -> Self {
        Self {
            config,
            lut,
            events,
            hub,
            sessions: RwLock::new(HashMap::new()),
            samplers: RwLock::new(HashMap::new()),
        }
    }

    /// Fetches the book event behind `outcome`'s sim_id, if `mode` has an
    /// event book and the line exists. A missing book or unindexable sim_id
    /// is not an error; plenty of modes play with weights alone (§4.2).
    fn event_for(&self, mode: &str, table: &LookupTable, sim_id: i64) -> Option<Value> {
        let path = self.lut.events_path(mode).ok().flatten()?;
        let line_index = table.line_index(sim_id)?;
        self.events.get_event(mode, &path, line_index).ok().flatten()
    }

    fn sampler_for(&self, table: &Arc<LookupTable>) -> Result<Arc<WeightedSampler>> {
        let key = table.mode.to_ascii_lowercase();
        let ptr = Arc::as_ptr(table);

        if let Some(cached) = self.samplers.read().get(&key) {
            if cached.table_ptr == ptr {
                return Ok(cached.sampler.clone());
            }
        }

        let sampler = Arc::new(WeightedSampler::from_table(table)?);
        self.samplers.write().insert(
            key,
            CachedSampler {
                table_ptr: ptr,
                sampler: sampler.clone(),
            },
        );
        Ok(sampler)
    }

    /// Looks up an existing session, or creates one with the configured
    /// starting balance if `id` is `None` or unknown.
    pub fn get_or_create(&self, id: Option<Uuid>) -> SessionSnapshot {
        let mut sessions = self.sessions.write();
        if let Some(id) = id {
            if let Some(s) = sessions.get_mut(&id) {
                s.touch();
                return s.snapshot();
            }
        }
        let session = Session::new(self.config.default_starting_balance, self.config.session_history_len);
        let snapshot = session.snapshot();
        sessions.insert(session.id, session);
        snapshot
    }

    pub fn get(&self, id: Uuid) -> Option<SessionSnapshot> {
        self.sessions.read().get(&id).map(Session::snapshot)
    }

    /// Plays one spin: draws an outcome (forced, if one is pending for this
    /// mode; otherwise RTP-bias-sampled), settles the bet against the
    /// session balance, and records the round.
    pub fn play(&self, id: Uuid, mode: &str, bet_multiplier: f64) -> Result<PlayResult> {
        let table = self.lut.get_table(mode)?;
        let sampler = self.sampler_for(&table)?;

        let bet_minor = (table.cost * bet_multiplier * 100.0).round() as i64;
        if bet_minor <= 0 {
            return Err(LutError::validation("bet must be positive"));
        }

        let mut sessions = self.sessions.write();
        let session = sessions
            .get_mut(&id)
            .ok_or_else(|| LutError::not_found(format!("session {id}")))?;
        session.touch();

        if session.balance_minor < bet_minor {
            return Err(LutError::validation("insufficient balance"));
        }

        let outcome = match session.take_forced(mode) {
            Some(sim_id) => table
                .outcome_for_sim_id(sim_id)
                .copied()
                .ok_or_else(|| LutError::not_found(format!("sim_id {sim_id} in mode {mode:?}")))?,
            None => sampler.sample_biased(&mut session.rng, session.rtp_bias),
        };

        let win_minor = (bet_minor as f64 * outcome.payout as f64 / 100.0).round() as i64;
        session.balance_minor = session.balance_minor - bet_minor + win_minor;

        let round = Round {
            sim_id: outcome.sim_id,
            mode: mode.to_string(),
            bet_minor,
            win_minor,
            balance_after: session.balance_minor,
            at: chrono::Utc::now(),
            event: self.event_for(mode, &table, outcome.sim_id),
        };
        session.push_round(round.clone());
        let snapshot = session.snapshot();
        let active = sessions.len();
        drop(sessions);

        self.hub.broadcast(HubMessage::new(
            HubEventKind::LgsSessionsUpdate,
            Some(mode.to_string()),
            json!({ "active_sessions": active, "session_id": id, "spins": snapshot.stats.spins }),
        ));

        Ok(PlayResult {
            session: snapshot,
            round,
        })
    }

    /// Plays `spins` rounds back to back. Per-round history is only kept
    /// when `spins <= 1000`; larger batches update only the aggregate
    /// stats, to bound memory for stress-test-sized batches.
    pub fn batch_play(&self, id: Uuid, mode: &str, bet_multiplier: f64, spins: u64) -> Result<BatchPlayResult> {
        let table = self.lut.get_table(mode)?;
        let sampler = self.sampler_for(&table)?;
        let bet_minor = (table.cost * bet_multiplier * 100.0).round() as i64;
        if bet_minor <= 0 {
            return Err(LutError::validation("bet must be positive"));
        }

        let keep_rounds = spins <= 1000;
        let mut rounds = Vec::new();

        let mut sessions = self.sessions.write();
        let session = sessions
            .get_mut(&id)
            .ok_or_else(|| LutError::not_found(format!("session {id}")))?;
        session.touch();

        let mut total_wagered = 0i64;
        let mut total_won = 0i64;
        let mut actual_spins = 0u64;

        for _ in 0..spins {
            if session.balance_minor < bet_minor {
                break;
            }
            actual_spins += 1;
            let forced = session.take_forced(mode);
            let outcome = match forced {
                Some(sim_id) => match table.outcome_for_sim_id(sim_id) {
                    Some(o) => *o,
                    None => break,
                },
                None => sampler.sample_biased(&mut session.rng, session.rtp_bias),
            };
            let win_minor = (bet_minor as f64 * outcome.payout as f64 / 100.0).round() as i64;
            session.balance_minor = session.balance_minor - bet_minor + win_minor;
            total_wagered += bet_minor;
            total_won += win_minor;

            if keep_rounds {
                let round = Round {
                    sim_id: outcome.sim_id,
                    mode: mode.to_string(),
                    bet_minor,
                    win_minor,
                    balance_after: session.balance_minor,
                    at: chrono::Utc::now(),
                    event: self.event_for(mode, &table, outcome.sim_id),
                };
                session.push_round(round.clone());
                rounds.push(round);
            } else {
                session.record_stats_only(bet_minor, win_minor);
            }
        }

        let snapshot = session.snapshot();
        let active = sessions.len();
        drop(sessions);

        self.hub.broadcast(HubMessage::new(
            HubEventKind::LgsSessionsUpdate,
            Some(mode.to_string()),
            json!({ "active_sessions": active, "session_id": id, "spins": actual_spins }),
        ));

        Ok(BatchPlayResult {
            session: snapshot,
            spins: actual_spins,
            total_wagered_minor: total_wagered,
            total_won_minor: total_won,
            rounds,
        })
    }

    pub fn force_outcome(&self, id: Uuid, mode: &str, sim_id: i64) -> Result<()> {
        let mut sessions = self.sessions.write();
        let session = sessions
            .get_mut(&id)
            .ok_or_else(|| LutError::not_found(format!("session {id}")))?;
        session.force_next(mode, sim_id);
        Ok(())
    }

    pub fn set_rtp_bias(&self, id: Uuid, bias: f64) -> Result<()> {
        let mut sessions = self.sessions.write();
        let session = sessions
            .get_mut(&id)
            .ok_or_else(|| LutError::not_found(format!("session {id}")))?;
        session.set_rtp_bias(bias, self.config.rtp_bias_bounds);
        Ok(())
    }

    pub fn clear_history(&self, id: Uuid) -> Result<()> {
        self.with_session_mut(id, Session::clear_history)
    }

    pub fn clear_stats(&self, id: Uuid) -> Result<()> {
        self.with_session_mut(id, Session::clear_stats)
    }

    pub fn reset_balance(&self, id: Uuid) -> Result<()> {
        let default_balance = self.config.default_starting_balance;
        self.with_session_mut(id, move |s| s.balance_minor = default_balance)
    }

    pub fn set_balance(&self, id: Uuid, balance_minor: i64) -> Result<()> {
        self.with_session_mut(id, move |s| s.balance_minor = balance_minor)
    }

    fn with_session_mut(&self, id: Uuid, f: impl FnOnce(&mut Session)) -> Result<()> {
        let mut sessions = self.sessions.write();
        let session = sessions
            .get_mut(&id)
            .ok_or_else(|| LutError::not_found(format!("session {id}")))?;
        f(session);
        Ok(())
    }

    /// Sweeps sessions idle longer than `session_max_age_secs`, returning
    /// how many were removed. Intended to run on a periodic tick owned by
    /// the embedding application.
    pub fn cleanup_inactive(&self) -> usize {
        let max_age = self.config.session_max_age_secs;
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_idle(max_age));
        let removed = before - sessions.len();
        if removed > 0 {
            self.hub.broadcast(HubMessage::new(
                HubEventKind::LgsSessionsUpdate,
                None,
                json!({ "active_sessions": sessions.len(), "removed": removed }),
            ));
        }
        removed
    }

    pub fn active_session_count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Read-only replay of a known `sim_id` in `mode`: the outcome the table
    /// would have produced and its underlying book event, if any, without
    /// touching any session state.
    pub fn replay(&self, mode: &str, sim_id: i64) -> Result<ReplayResult> {
        let table = self.lut.get_table(mode)?;
        let outcome = table
            .outcome_for_sim_id(sim_id)
            .copied()
            .ok_or_else(|| LutError::not_found(format!("sim_id {sim_id} in mode {mode:?}")))?;
        let event = self.event_for(mode, &table, sim_id);
        Ok(ReplayResult { outcome, event })
    }
}
