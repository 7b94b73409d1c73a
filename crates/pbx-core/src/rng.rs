//! Per-participant random streams.

use std::hash::Hasher;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use siphasher::sip::SipHasher13;

/// Random stream owned by exactly one participant.
///
/// The coordinator and every worker seed their own handle from the master
/// seed and their rank, so no draw order is shared across threads.
#[derive(Debug, Clone)]
pub struct RngHandle {
    rng: StdRng,
}

impl RngHandle {
    /// Seeds a handle directly.
    pub fn from_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Stream of participant `rank` (0 is the coordinator).
    pub fn for_rank(master_seed: u64, rank: usize) -> Self {
        Self::from_seed(derive_substream_seed(master_seed, rank as u64))
    }

    /// Uniform draw in `[0, 1)`.
    pub fn uniform(&mut self) -> f64 {
        self.rng.gen::<f64>()
    }

    /// Uniform index in `0..n`; `n` must be positive.
    pub fn index(&mut self, n: usize) -> usize {
        self.rng.gen_range(0..n)
    }

    /// Uniformly shuffled `0..n`.
    pub fn permutation(&mut self, n: usize) -> Vec<usize> {
        let mut order: Vec<usize> = (0..n).collect();
        order.shuffle(&mut self.rng);
        order
    }

    /// Underlying generator, for `rand_distr` samplers.
    pub fn inner_mut(&mut self) -> &mut StdRng {
        &mut self.rng
    }
}

/// SipHash-1-3 (zero keys) of `(master_seed, substream)`; stable across platforms.
pub fn derive_substream_seed(master_seed: u64, substream: u64) -> u64 {
    let mut hasher = SipHasher13::new_with_keys(0, 0);
    hasher.write_u64(master_seed);
    hasher.write_u64(substream);
    hasher.finish()
}
