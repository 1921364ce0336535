use std::f32::consts::TAU;

use serde::{Deserialize, Serialize};

const GOLDEN_GAMMA: u32 = 0x6D2B_79F5;
const UNIT_SCALE: f32 = 1.0 / 16_777_216.0;

/// Deterministic random stream shared by every consumer in a simulation.
///
/// The generator is a 32-bit mulberry-style mixer: a Weyl increment followed
/// by xorshift/multiply rounds. Identical seeds and identical call sequences
/// yield identical outputs on every platform since only wrapping integer
/// arithmetic touches the state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeededRandom {
    seed: u32,
    state: u32,
}

impl SeededRandom {
    pub fn new(seed: u32) -> Self {
        Self { seed, state: seed }
    }

    /// Returns the seed the stream was last (re)seeded with.
    pub fn seed(&self) -> u32 {
        self.seed
    }

    /// Restarts the stream from `seed`.
    pub fn set_seed(&mut self, seed: u32) {
        self.seed = seed;
        self.state = seed;
    }

    /// Raw generator state, used by checkpoints.
    pub fn state(&self) -> u32 {
        self.state
    }

    pub fn set_state(&mut self, state: u32) {
        self.state = state;
    }

    /// Raw 32-bit draw; advances the stream exactly like [`Self::next`].
    pub(crate) fn next_u32(&mut self) -> u32 {
        self.state = self.state.wrapping_add(GOLDEN_GAMMA);
        let mut t = self.state;
        t = (t ^ (t >> 15)).wrapping_mul(t | 1);
        t ^= t.wrapping_add((t ^ (t >> 7)).wrapping_mul(t | 61));
        t ^ (t >> 14)
    }

    /// Uniform value in `[0, 1)`. Only the top 24 bits are used so the
    /// result is exactly representable as `f32` and never rounds up to 1.
    pub fn next(&mut self) -> f32 {
        (self.next_u32() >> 8) as f32 * UNIT_SCALE
    }

    /// Uniform value in `[min, max)`.
    pub fn range(&mut self, min: f32, max: f32) -> f32 {
        min + self.next() * (max - min)
    }

    /// Uniform integer in `[min, max]`, both ends inclusive.
    pub fn int(&mut self, min: i32, max: i32) -> i32 {
        if max <= min {
            // Still consume a draw so call sequences stay aligned.
            self.next();
            return min;
        }
        let span = (max as i64 - min as i64 + 1) as f64;
        let offset = (self.next() as f64 * span).floor() as i64;
        (min as i64 + offset) as i32
    }

    /// `base` perturbed uniformly by up to `spread` in either direction.
    pub fn variance(&mut self, base: f32, spread: f32) -> f32 {
        base + (self.next() - 0.5) * 2.0 * spread
    }

    /// `true` with probability `p`.
    pub fn bool(&mut self, p: f32) -> bool {
        self.next() < p
    }

    /// Uniform angle in `[0, 2π)` radians.
    pub fn angle(&mut self) -> f32 {
        let angle = self.next() * TAU;
        if angle >= TAU {
            0.0
        } else {
            angle
        }
    }
}

impl Default for SeededRandom {
    fn default() -> Self {
        Self::new(12_345)
    }
}
