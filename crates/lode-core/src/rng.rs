//! The deterministic simulation RNG.
//!
//! All random consumers inside a tick draw from [`GameRng`]; no other
//! entropy source is permitted. The generator is a splitmix64 stream
//! whose 64-bit state *is* its seed, so the recorder and the save format
//! can capture and restore it exactly with a single integer.
//!
//! Bulk consumers (e.g. PRD rolls over many entities) fork a ChaCha8
//! stream derived from the main state via [`GameRng::fork_stream`],
//! advancing the parent exactly once regardless of how many values the
//! fork draws.

use rand_chacha::rand_core::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// splitmix64 increment (golden-ratio constant).
const GAMMA: u64 = 0x9E37_79B9_7F4A_7C15;

/// Deterministic, exactly-restorable simulation RNG.
///
/// `state` advances by a fixed increment per draw and the output is a
/// bijective mix of the state, so `seed()` at any point fully determines
/// the remaining stream.
#[derive(Clone, Debug)]
pub struct GameRng {
    state: u64,
    initial: u64,
}

impl GameRng {
    /// Create a generator seeded with `seed`.
    ///
    /// The seed is also recorded as the *initial* seed restored by
    /// [`reset()`](Self::reset).
    pub fn new(seed: u64) -> Self {
        Self {
            state: seed,
            initial: seed,
        }
    }

    /// The current seed-state. Restoring this value with
    /// [`reseed()`](Self::reseed) reproduces the remaining stream.
    pub fn seed(&self) -> u64 {
        self.state
    }

    /// The initial seed captured at construction or the last
    /// [`rebase()`](Self::rebase).
    pub fn initial_seed(&self) -> u64 {
        self.initial
    }

    /// Set the current seed-state without touching the initial seed.
    ///
    /// Used by the replay engine to bracket recorded executions.
    pub fn reseed(&mut self, seed: u64) {
        self.state = seed;
    }

    /// Set both the current and the initial seed.
    ///
    /// Used at runtime start and on hydrate, where the restored seed
    /// becomes the new reset point.
    pub fn rebase(&mut self, seed: u64) {
        self.state = seed;
        self.initial = seed;
    }

    /// Restore the initial seed recorded at runtime start.
    pub fn reset(&mut self) {
        self.state = self.initial;
    }

    /// Next raw 64-bit output word.
    ///
    /// Inherent (not just via [`RngCore`]) so callers need no trait
    /// import for the common case.
    pub fn next_u64(&mut self) -> u64 {
        self.advance()
    }

    /// Uniform draw in `[0, 1)` with 53 bits of precision.
    pub fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
    }

    /// Uniform draw in `[0, bound)` via rejection-free multiply-shift.
    ///
    /// Returns 0 when `bound` is 0.
    pub fn next_below(&mut self, bound: u64) -> u64 {
        if bound == 0 {
            return 0;
        }
        ((self.next_u64() as u128 * bound as u128) >> 64) as u64
    }

    /// Fork an independent ChaCha8 stream for bulk draws.
    ///
    /// The parent state advances exactly once, so the number of values
    /// drawn from the fork does not affect the parent stream.
    pub fn fork_stream(&mut self) -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(self.next_u64())
    }

    /// Advance the state and produce the next output word.
    fn advance(&mut self) -> u64 {
        self.state = self.state.wrapping_add(GAMMA);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }
}

impl RngCore for GameRng {
    fn next_u32(&mut self) -> u32 {
        (self.advance() >> 32) as u32
    }

    fn next_u64(&mut self) -> u64 {
        self.advance()
    }

    fn fill_bytes(&mut self, dst: &mut [u8]) {
        for chunk in dst.chunks_mut(8) {
            let word = self.advance().to_le_bytes();
            chunk.copy_from_slice(&word[..chunk.len()]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_stream() {
        let mut a = GameRng::new(42);
        let mut b = GameRng::new(42);
        for _ in 0..100 {
            assert_eq!(a.next_u64(), b.next_u64());
        }
    }

    #[test]
    fn different_seeds_diverge() {
        let mut a = GameRng::new(1);
        let mut b = GameRng::new(2);
        assert_ne!(a.next_u64(), b.next_u64());
    }

    #[test]
    fn seed_captures_remaining_stream() {
        let mut a = GameRng::new(7);
        for _ in 0..10 {
            a.next_u64();
        }
        let mid = a.seed();
        let tail: Vec<u64> = (0..10).map(|_| a.next_u64()).collect();

        let mut b = GameRng::new(0);
        b.reseed(mid);
        let replayed: Vec<u64> = (0..10).map(|_| b.next_u64()).collect();
        assert_eq!(tail, replayed);
    }

    #[test]
    fn reset_restores_initial_seed() {
        let mut rng = GameRng::new(99);
        let first = rng.next_u64();
        rng.next_u64();
        rng.reset();
        assert_eq!(rng.seed(), 99);
        assert_eq!(rng.next_u64(), first);
    }

    #[test]
    fn rebase_moves_the_reset_point() {
        let mut rng = GameRng::new(1);
        rng.rebase(500);
        rng.next_u64();
        rng.reset();
        assert_eq!(rng.seed(), 500);
        assert_eq!(rng.initial_seed(), 500);
    }

    #[test]
    fn next_f64_is_in_unit_interval() {
        let mut rng = GameRng::new(3);
        for _ in 0..1000 {
            let v = rng.next_f64();
            assert!((0.0..1.0).contains(&v));
        }
    }

    #[test]
    fn next_below_respects_bound() {
        let mut rng = GameRng::new(11);
        for _ in 0..1000 {
            assert!(rng.next_below(10) < 10);
        }
        assert_eq!(rng.next_below(0), 0);
        assert_eq!(rng.next_below(1), 0);
    }

    #[test]
    fn fork_advances_parent_exactly_once() {
        let mut a = GameRng::new(5);
        let mut b = GameRng::new(5);

        let mut fork = a.fork_stream();
        // Draw many values from the fork; the parent must not move.
        for _ in 0..50 {
            fork.next_u64();
        }

        b.next_u64(); // mirror the single advance consumed by the fork
        assert_eq!(a.seed(), b.seed());
        assert_eq!(a.next_u64(), b.next_u64());
    }

    #[test]
    fn fork_is_deterministic() {
        let mut a = GameRng::new(5);
        let mut b = GameRng::new(5);
        let va: Vec<u64> = {
            let mut f = a.fork_stream();
            (0..8).map(|_| f.next_u64()).collect()
        };
        let vb: Vec<u64> = {
            let mut f = b.fork_stream();
            (0..8).map(|_| f.next_u64()).collect()
        };
        assert_eq!(va, vb);
    }

    #[test]
    fn fill_bytes_covers_partial_chunks() {
        let mut rng = GameRng::new(8);
        let mut buf = [0u8; 13];
        rng.fill_bytes(&mut buf);
        // 13 bytes = one full word + 5 bytes of the next; just verify
        // determinism against a fresh generator.
        let mut rng2 = GameRng::new(8);
        let mut buf2 = [0u8; 13];
        rng2.fill_bytes(&mut buf2);
        assert_eq!(buf, buf2);
    }
}
