use pbx_core::derive_substream_seed;

const COORDINATOR_MOVES: u64 = 0xC0DE_0000_0000_0000;
const STEPPING_RANKS: u64 = 0x5E55_1000_0000_0000;

/// Seed of the persistent stream owned by `rank` (0 is the coordinator).
pub fn rank_seed(master_seed: u64, rank: usize) -> u64 {
    derive_substream_seed(master_seed, rank as u64)
}

/// Seed for the coordinator-side moves of one cycle.
pub fn cycle_seed(master_seed: u64, cycle: usize) -> u64 {
    derive_substream_seed(master_seed ^ COORDINATOR_MOVES, cycle as u64)
}

/// Seed for drawing the stepping permutations of a session.
pub fn stepping_seed(master_seed: u64) -> u64 {
    derive_substream_seed(master_seed ^ STEPPING_RANKS, 0)
}

/// Seed for drawing the starting state of a run.
pub fn initial_state_seed(master_seed: u64) -> u64 {
    derive_substream_seed(master_seed ^ COORDINATOR_MOVES, u64::MAX)
}
