//! [`LookupTable`] and [`Outcome`]: the parsed, in-memory form of one
//! mode's CSV weights file (§3, §4.2).

use crate::error::{LutError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One row of a weights table: a simulation outcome with its draw weight
/// and payout (multiplier × 100).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub sim_id: i64,
    pub weight: u64,
    /// Multiplier × 100; 150 ≡ 1.50×.
    pub payout: u64,
}

/// One mode's weights table. Outcomes never mutate individually, only
/// wholesale replacement via [`crate::lut::LutStore::rewrite_weights`].
#[derive(Debug, Clone)]
pub struct LookupTable {
    pub mode: String,
    /// Bet multiplier required to play this mode (base mode is typically 1.0).
    pub cost: f64,
    /// Minimum observed `sim_id`; origin for `line_index = sim_id - sim_id_offset`.
    pub sim_id_offset: i64,
    /// Load order is preserved; callers (bucket cache) assume index stability.
    pub outcomes: Vec<Outcome>,
    total_weight: u64,
}

/// One `sim_id,weight,payout` row, deserialized straight off a header-less
/// `csv::Reader` rather than hand-split.
#[derive(Debug, Deserialize)]
struct CsvRow {
    sim_id: i64,
    weight: u64,
    payout: u64,
}

impl LookupTable {
    /// Parses a header-less `sim_id,weight,payout` CSV. Rejects rows with the
    /// wrong arity or non-integer fields; blank lines are skipped.
    pub fn from_csv_path(mode: impl Into<String>, cost: f64, path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::open(path.as_ref())
            .map_err(|e| LutError::io(format!("{}: {e}", path.as_ref().display())))?;
        let mode = mode.into();
        let reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(file);
        Self::from_csv_reader(mode, cost, reader)
    }

    pub fn from_csv_str(mode: impl Into<String>, cost: f64, text: &str) -> Result<Self> {
        let mode = mode.into();
        let reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(text.as_bytes());
        Self::from_csv_reader(mode, cost, reader)
    }

    /// `flexible(true)` lets blank lines through as short/empty records so we
    /// can skip them ourselves and still reject any genuinely malformed row
    /// by its field count, rather than leaning on the reader's own arity check.
    fn from_csv_reader<R: std::io::Read>(mode: String, cost: f64, mut reader: csv::Reader<R>) -> Result<Self> {
        let mut outcomes = Vec::new();

        for (lineno, record) in reader.records().enumerate() {
            let record = record.map_err(|e| LutError::validation(format!("{mode}: line {}: {e}", lineno + 1)))?;
            if record.iter().all(|f| f.is_empty()) {
                continue;
            }
            if record.len() != 3 {
                return Err(LutError::validation(format!(
                    "{mode}: line {}: expected 3 fields, got {}",
                    lineno + 1,
                    record.len()
                )));
            }
            let row: CsvRow = record
                .deserialize(None)
                .map_err(|e| LutError::validation(format!("{mode}: line {}: {e}", lineno + 1)))?;
            outcomes.push(Outcome {
                sim_id: row.sim_id,
                weight: row.weight,
                payout: row.payout,
            });
        }

        Self::from_outcomes(mode, cost, outcomes)
    }

    pub fn from_outcomes(mode: impl Into<String>, cost: f64, outcomes: Vec<Outcome>) -> Result<Self> {
        let mode = mode.into();
        let sim_id_offset = outcomes.iter().map(|o| o.sim_id).min().unwrap_or(0);
        let total_weight: u64 = outcomes.iter().map(|o| o.weight).sum();

        Ok(Self {
            mode,
            cost,
            sim_id_offset,
            outcomes,
            total_weight,
        })
    }

    pub fn total_weight(&self) -> u64 {
        self.total_weight
    }

    pub fn is_queryable(&self) -> bool {
        self.total_weight > 0
    }

    pub fn line_index(&self, sim_id: i64) -> Option<usize> {
        let idx = sim_id - self.sim_id_offset;
        if idx < 0 {
            None
        } else {
            Some(idx as usize)
        }
    }

    pub fn outcome_for_sim_id(&self, sim_id: i64) -> Option<&Outcome> {
        self.outcomes.iter().find(|o| o.sim_id == sim_id)
    }

    /// Replaces weights in load order. `new_weights.len()` must equal `outcomes.len()`.
    pub fn rewrite_weights(&mut self, new_weights: &[u64]) -> Result<()> {
        if new_weights.len() != self.outcomes.len() {
            return Err(LutError::validation(format!(
                "{}: expected {} weights, got {}",
                self.mode,
                self.outcomes.len(),
                new_weights.len()
            )));
        }
        for (outcome, &w) in self.outcomes.iter_mut().zip(new_weights) {
            outcome.weight = w;
        }
        self.total_weight = self.outcomes.iter().map(|o| o.weight).sum();
        Ok(())
    }

    /// Renders the table back to the `sim_id,weight,payout` CSV text it was parsed from.
    pub fn to_csv_string(&self) -> String {
        let mut out = String::new();
        for o in &self.outcomes {
            out.push_str(&format!("{},{},{}\n", o.sim_id, o.weight, o.payout));
        }
        out
    }
}
