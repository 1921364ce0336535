use noise::{NoiseFn, Perlin};

use crate::SeededRandom;

/// Most octaves a turbulence field may sum per sample.
pub const MAX_OCTAVES: u32 = 8;

/// 2D Perlin noise seeded from the shared [`SeededRandom`], so reseeding the
/// random source and rebuilding the field keeps both in lockstep.
#[derive(Debug, Clone)]
pub struct NoiseField {
    seed: u32,
    perlin: Perlin,
}

impl NoiseField {
    /// Builds a field, consuming one draw from `rng`.
    pub fn new(rng: &mut SeededRandom) -> Self {
        let seed = rng.next_u32();
        Self {
            seed,
            perlin: Perlin::new(seed),
        }
    }

    /// Seed drawn for the current permutation table.
    pub fn seed(&self) -> u32 {
        self.seed
    }

    /// Rebuilds the permutation table from the current state of `rng`.
    pub fn reseed(&mut self, rng: &mut SeededRandom) {
        *self = Self::new(rng);
    }

    /// Samples the field at `(x, y)`. The result lies in `[-1, 1]`.
    pub fn sample(&self, x: f32, y: f32) -> f32 {
        let value = self.perlin.get([f64::from(x), f64::from(y)]) as f32;
        if value.is_finite() {
            value.clamp(-1.0, 1.0)
        } else {
            0.0
        }
    }

    /// Sum of `octaves` samples at doubling frequency and halving amplitude,
    /// renormalised back into `[-1, 1]`. `octaves` is clamped to
    /// `1..=MAX_OCTAVES`.
    pub fn fractal(&self, x: f32, y: f32, octaves: u32) -> f32 {
        let octaves = octaves.clamp(1, MAX_OCTAVES);
        let mut total = 0.0;
        let mut amplitude = 1.0;
        let mut frequency = 1.0;
        let mut norm = 0.0;
        for _ in 0..octaves {
            total += self.sample(x * frequency, y * frequency) * amplitude;
            norm += amplitude;
            amplitude *= 0.5;
            frequency *= 2.0;
        }
        (total / norm).clamp(-1.0, 1.0)
    }
}
