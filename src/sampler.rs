//! Weighted outcome sampling (§4.2 "sample", §4.8 RTP bias).
//!
//! Two paths share one [`WeightedSampler`]: the integer path draws an
//! outcome proportional to its raw weight via a precomputed cumulative-sum
//! binary search; the biased path re-weights every outcome by a payout-biased
//! floating-point factor before the same binary search, used when a session
//! carries a non-zero `rtp_bias`.

use crate::error::{LutError, Result};
use crate::lut::{LookupTable, Outcome};
use parking_lot::RwLock;
use rand::Rng;

/// Precomputed draw structure for one table. Cheap to rebuild on reload;
/// callers hold one per loaded mode.
pub struct WeightedSampler {
    outcomes: Vec<Outcome>,
    cumulative: Vec<u64>,
    total: u64,
    biased_cache: RwLock<Option<(i64, Vec<f64>)>>,
}

impl WeightedSampler {
    pub fn from_table(table: &LookupTable) -> Result<Self> {
        if !table.is_queryable() {
            return Err(LutError::state(format!("{}: table has zero total weight", table.mode)));
        }
        let mut running = 0u64;
        let mut cumulative = Vec::with_capacity(table.outcomes.len());
        for o in &table.outcomes {
            running = running
                .checked_add(o.weight)
                .ok_or_else(|| LutError::overflow(format!("{}: cumulative weight overflow", table.mode)))?;
            cumulative.push(running);
        }
        Ok(Self {
            outcomes: table.outcomes.clone(),
            cumulative,
            total: running,
            biased_cache: RwLock::new(None),
        })
    }

    /// Draws an outcome proportional to its raw integer weight.
    pub fn sample(&self, rng: &mut impl Rng) -> Outcome {
        let draw = rng.gen_range(0..self.total);
        let idx = self.cumulative.partition_point(|&c| c <= draw);
        self.outcomes[idx.min(self.outcomes.len() - 1)]
    }

    /// Draws an outcome proportional to `weight * factor(payout)^bias`, where
    /// `factor` is `0.5` for a zero payout and `1 + payout/100` otherwise.
    /// `bias == 0.0` is equivalent to [`Self::sample`] and takes that faster
    /// path directly. The re-weighted cumulative table is cached by the last
    /// bias value used, since a session's bias changes far less often than it
    /// samples.
    pub fn sample_biased(&self, rng: &mut impl Rng, bias: f64) -> Outcome {
        if bias == 0.0 {
            return self.sample(rng);
        }
        let bias_key = (bias * 1_000_000.0).round() as i64;

        if let Some((cached_key, table)) = self.biased_cache.read().as_ref() {
            if *cached_key == bias_key {
                return self.draw_from_biased(rng, table);
            }
        }

        let table = self.build_biased_cumulative(bias);
        let outcome = self.draw_from_biased(rng, &table);
        *self.biased_cache.write() = Some((bias_key, table));
        outcome
    }

    fn build_biased_cumulative(&self, bias: f64) -> Vec<f64> {
        let mut running = 0.0f64;
        let mut out = Vec::with_capacity(self.outcomes.len());
        for o in &self.outcomes {
            let factor = if o.payout == 0 {
                0.5f64.powf(bias)
            } else {
                (1.0 + o.payout as f64 / 100.0).powf(bias)
            };
            running += o.weight as f64 * factor;
            out.push(running);
        }
        out
    }

    fn draw_from_biased(&self, rng: &mut impl Rng, cumulative: &[f64]) -> Outcome {
        let total = *cumulative.last().unwrap_or(&0.0);
        if total <= 0.0 {
            return self.sample(rng);
        }
        let draw = rng.gen_range(0.0..total);
        let idx = cumulative.partition_point(|&c| c <= draw);
        self.outcomes[idx.min(self.outcomes.len() - 1)]
    }

    pub fn outcome_count(&self) -> usize {
        self.outcomes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn table() -> LookupTable {
        LookupTable::from_csv_str("base", 1.0, "0,50,0\n1,30,200\n2,20,1000\n").unwrap()
    }

    #[test]
    fn rejects_zero_weight_table() {
        let t = LookupTable::from_outcomes("empty", 1.0, vec![]).unwrap();
        assert!(WeightedSampler::from_table(&t).is_err());
    }

    #[test]
    fn sample_converges_to_weight_proportions() {
        let t = table();
        let sampler = WeightedSampler::from_table(&t).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let mut zero_hits = 0;
        let n = 20_000;
        for _ in 0..n {
            if sampler.sample(&mut rng).payout == 0 {
                zero_hits += 1;
            }
        }
        let observed = zero_hits as f64 / n as f64;
        assert!((observed - 0.5).abs() < 0.02, "observed {observed}");
    }

    #[test]
    fn zero_bias_matches_unbiased_distribution() {
        let t = table();
        let sampler = WeightedSampler::from_table(&t).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..100 {
            let o = sampler.sample_biased(&mut rng, 0.0);
            assert!(t.outcomes.contains(&o));
        }
    }

    #[test]
    fn positive_bias_favors_higher_payouts() {
        let t = table();
        let sampler = WeightedSampler::from_table(&t).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(99);
        let mut hit_weighted = 0;
        let n = 20_000;
        for _ in 0..n {
            if sampler.sample_biased(&mut rng, 2.0).payout > 0 {
                hit_weighted += 1;
            }
        }
        let biased_hit_rate = hit_weighted as f64 / n as f64;
        assert!(biased_hit_rate > 0.5, "biased_hit_rate {biased_hit_rate}");
    }

    #[test]
    fn negative_bias_favors_zero_payout() {
        let t = table();
        let sampler = WeightedSampler::from_table(&t).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(123);
        let mut zero_hits = 0;
        let n = 20_000;
        for _ in 0..n {
            if sampler.sample_biased(&mut rng, -2.0).payout == 0 {
                zero_hits += 1;
            }
        }
        let observed = zero_hits as f64 / n as f64;
        assert!(observed > 0.5, "observed {observed}");
    }
}
