//! Exportable simulation state for scrubbing and resumption.
//!
//! A checkpoint holds every live particle plus the counters, accumulators and
//! random-stream state needed to resume stepping with bit-identical results.
//! Trails and collision counters are not stored and restart empty.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use glam::Vec2;
use serde::{Deserialize, Serialize};

use crate::emitter::SplineCursor;
use crate::{Particle, ParticleSimError, Result};

/// Largest particle id a checkpoint may carry: integers up to 2^53 stay exact
/// in every JSON reader, and the gap to `u64::MAX` keeps id allocation from
/// overflowing after a restore.
pub const MAX_PARTICLE_ID: u64 = (1 << 53) - 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticleRecord {
    pub id: u64,
    pub position: Vec2,
    pub velocity: Vec2,
    pub age: f32,
    pub lifetime: f32,
    pub size: f32,
    pub color: [f32; 4],
    #[serde(default)]
    pub rotation: f32,
    pub emitter_id: String,
    /// Falls back to `size` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_size: Option<f32>,
    /// Falls back to `color` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_color: Option<[f32; 4]>,
    #[serde(default)]
    pub angular_velocity: f32,
    #[serde(default)]
    pub sprite_index: u32,
    #[serde(default)]
    pub is_sub_particle: bool,
}

impl ParticleRecord {
    pub fn from_particle(particle: &Particle) -> Self {
        Self {
            id: particle.id,
            position: particle.position,
            velocity: particle.velocity,
            age: particle.age,
            lifetime: particle.lifetime,
            size: particle.size,
            color: particle.color,
            rotation: particle.rotation,
            emitter_id: particle.emitter_id.clone(),
            base_size: Some(particle.base_size),
            base_color: Some(particle.base_color),
            angular_velocity: particle.angular_velocity,
            sprite_index: particle.sprite_index,
            is_sub_particle: particle.is_sub_particle,
        }
    }

    /// Writes the record into `slot`, a blank record taken from the pool.
    pub fn fill(&self, mut slot: Particle) -> Particle {
        slot.id = self.id;
        slot.position = self.position;
        slot.previous_position = self.position;
        slot.velocity = self.velocity;
        slot.age = self.age;
        slot.lifetime = self.lifetime;
        slot.size = self.size;
        slot.base_size = self.base_size.unwrap_or(self.size);
        slot.color = self.color;
        slot.base_color = self.base_color.unwrap_or(self.color);
        slot.rotation = self.rotation;
        slot.angular_velocity = self.angular_velocity;
        slot.sprite_index = self.sprite_index;
        slot.is_sub_particle = self.is_sub_particle;
        slot.collision_count = 0;
        slot.trail.clear();
        slot.emitter_id.clear();
        slot.emitter_id.push_str(&self.emitter_id);
        slot
    }

    fn validate(&self, index: usize) -> Result<()> {
        let finite = self.position.is_finite()
            && self.velocity.is_finite()
            && self.age.is_finite()
            && self.lifetime.is_finite()
            && self.size.is_finite()
            && self.rotation.is_finite()
            && self.angular_velocity.is_finite()
            && self.color.iter().all(|c| c.is_finite())
            && self.base_size.map_or(true, f32::is_finite)
            && self
                .base_color
                .map_or(true, |color| color.iter().all(|c| c.is_finite()));
        if !finite {
            return Err(ParticleSimError::invalid_checkpoint(
                index,
                "non-finite value",
            ));
        }
        if self.id > MAX_PARTICLE_ID {
            return Err(ParticleSimError::invalid_checkpoint(
                index,
                format!("particle id {} exceeds {MAX_PARTICLE_ID}", self.id),
            ));
        }
        if self.lifetime <= 0.0 {
            return Err(ParticleSimError::invalid_checkpoint(
                index,
                format!("lifetime must be positive, got {}", self.lifetime),
            ));
        }
        if self.age < 0.0 {
            return Err(ParticleSimError::invalid_checkpoint(
                index,
                format!("age must not be negative, got {}", self.age),
            ));
        }
        if self.size < 0.0 || self.base_size.is_some_and(|size| size < 0.0) {
            return Err(ParticleSimError::invalid_checkpoint(index, "negative size"));
        }
        Ok(())
    }
}

/// Full restorable state of one simulation at a frame boundary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationCheckpoint {
    pub frame: u64,
    #[serde(default)]
    pub time: f32,
    /// Seed the random stream was created from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rng_state: Option<u32>,
    /// Identity counter at export; restore never hands out a lower id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_id: Option<u64>,
    #[serde(default)]
    pub emission_accumulators: BTreeMap<String, f32>,
    #[serde(default)]
    pub burst_timers: BTreeMap<String, f32>,
    #[serde(default)]
    pub pending_bursts: BTreeMap<String, u32>,
    #[serde(default)]
    pub spline_cursors: BTreeMap<String, SplineCursor>,
    pub particles: Vec<ParticleRecord>,
}

impl SimulationCheckpoint {
    /// Rejects malformed records before any simulation state is touched.
    pub fn validate(&self, max_particles: usize) -> Result<()> {
        if !self.time.is_finite() {
            return Err(ParticleSimError::msg("checkpoint time is not finite"));
        }
        if let Some(next_id) = self.next_id.filter(|id| *id > MAX_PARTICLE_ID + 1) {
            return Err(ParticleSimError::msg(format!(
                "checkpoint nextId {next_id} exceeds {}",
                MAX_PARTICLE_ID + 1
            )));
        }
        let mut seen = BTreeSet::new();
        for (index, record) in self.particles.iter().enumerate() {
            if index >= max_particles {
                return Err(ParticleSimError::invalid_checkpoint(
                    index,
                    format!("exceeds the particle cap of {max_particles}"),
                ));
            }
            record.validate(index)?;
            if !seen.insert(record.id) {
                return Err(ParticleSimError::invalid_checkpoint(
                    index,
                    format!("duplicate particle id {}", record.id),
                ));
            }
        }
        Ok(())
    }

    /// Identity counter implied by the records and the stored `next_id`.
    pub fn resolved_next_id(&self) -> u64 {
        let after_max = self
            .particles
            .iter()
            .map(|record| record.id.saturating_add(1))
            .max()
            .unwrap_or(0);
        after_max.max(self.next_id.unwrap_or(0))
    }

    pub fn from_json_str(source: &str) -> Result<Self> {
        Ok(serde_json::from_str(source)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_json_str(&source)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn write_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = std::fs::File::create(path)?;
        serde_json::to_writer_pretty(std::io::BufWriter::new(file), self)?;
        Ok(())
    }
}
