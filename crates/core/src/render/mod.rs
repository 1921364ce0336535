//! Read-only views handed to the rasterizer.
//!
//! The core never draws; it exposes the live particle set as plain records
//! plus the proximity connections used for line rendering.

use glam::Vec2;
use serde::{Deserialize, Serialize};

use crate::collision::SpatialHash;
use crate::forces::DISTANCE_EPSILON;
use crate::{Particle, Result};

/// One particle as the rasterizer sees it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticleView {
    pub id: u64,
    pub emitter_id: String,
    pub position: Vec2,
    pub previous_position: Vec2,
    pub size: f32,
    pub color: [f32; 4],
    pub rotation: f32,
    pub sprite_index: u32,
    pub normalized_age: f32,
    /// Oldest sample first.
    pub trail: Vec<Vec2>,
}

impl From<&Particle> for ParticleView {
    fn from(particle: &Particle) -> Self {
        Self {
            id: particle.id,
            emitter_id: particle.emitter_id.clone(),
            position: particle.position,
            previous_position: particle.previous_position,
            size: particle.size,
            color: particle.color,
            rotation: particle.rotation,
            sprite_index: particle.sprite_index,
            normalized_age: particle.normalized_age(),
            trail: particle.trail.iter().copied().collect(),
        }
    }
}

/// Live particles at a frame boundary, in spawn order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderSnapshot {
    pub frame: u64,
    pub time: f32,
    pub particles: Vec<ParticleView>,
}

impl RenderSnapshot {
    pub fn capture(frame: u64, time: f32, particles: &[Particle]) -> Self {
        Self {
            frame,
            time,
            particles: particles.iter().map(ParticleView::from).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.particles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionConfig {
    pub enabled: bool,
    /// Normalized distance under which two particles are linked.
    pub max_distance: f32,
    pub max_per_particle: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_distance: 0.1,
            max_per_particle: 3,
        }
    }
}

/// A line between two particles, identified by particle id.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub a: u64,
    pub b: u64,
    pub distance: f32,
    /// `1` when touching, fading to `0` at `max_distance`.
    pub alpha: f32,
}

/// Particle pairs closer than `max_distance`, each pair once, with at most
/// `max_per_particle` lines touching any particle. Pairs are visited in
/// ascending index order so the result is stable across runs.
pub fn find_connections(particles: &[Particle], config: &ConnectionConfig) -> Vec<Connection> {
    if !config.enabled || config.max_per_particle == 0 || config.max_distance <= DISTANCE_EPSILON
    {
        return Vec::new();
    }

    let mut hash = SpatialHash::new(config.max_distance);
    hash.rebuild(
        config.max_distance,
        particles.iter().enumerate().map(|(index, p)| (index, p.position)),
    );

    let max_sq = config.max_distance * config.max_distance;
    let mut degree = vec![0usize; particles.len()];
    let mut candidates = Vec::new();
    let mut connections = Vec::new();

    for (i, a) in particles.iter().enumerate() {
        if degree[i] >= config.max_per_particle {
            continue;
        }
        candidates.clear();
        candidates.extend(hash.neighbours(hash.cell_of(a.position)).filter(|j| *j > i));
        candidates.sort_unstable();

        for &j in &candidates {
            if degree[i] >= config.max_per_particle {
                break;
            }
            if degree[j] >= config.max_per_particle {
                continue;
            }
            let b = &particles[j];
            let distance_sq = a.position.distance_squared(b.position);
            if distance_sq >= max_sq {
                continue;
            }
            let distance = distance_sq.sqrt();
            degree[i] += 1;
            degree[j] += 1;
            connections.push(Connection {
                a: a.id,
                b: b.id,
                distance,
                alpha: 1.0 - distance / config.max_distance,
            });
        }
    }
    connections
}
