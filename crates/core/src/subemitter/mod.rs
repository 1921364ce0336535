use std::collections::BTreeMap;

use glam::Vec2;
use serde::{Deserialize, Serialize};

use crate::forces::DISTANCE_EPSILON;
use crate::{Particle, ParticlePool, SeededRandom};

/// Parent filter value matching particles of every emitter.
pub const ANY_EMITTER: &str = "*";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SubEmitterTrigger {
    #[default]
    Death,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SubEmitterConfig {
    pub id: String,
    pub enabled: bool,
    pub trigger: SubEmitterTrigger,
    /// Emitter id whose particles trigger this sub-emitter, or `*`.
    pub parent_emitter_id: String,
    pub spawn_count: u32,
    /// Fraction of the parent's velocity added to each child.
    pub inherit_velocity: f32,
    /// Full cone in degrees around the parent's heading.
    pub spread: f32,
    pub speed: f32,
    pub speed_variance: f32,
    pub size: f32,
    pub size_variance: f32,
    pub lifetime: f32,
    pub lifetime_variance: f32,
    /// Child color; `None` reuses the parent's current color.
    pub color: Option<[f32; 4]>,
    /// Per-channel RGB jitter, `0..=255`.
    pub color_variance: f32,
}

impl Default for SubEmitterConfig {
    fn default() -> Self {
        Self {
            id: "sub".to_string(),
            enabled: true,
            trigger: SubEmitterTrigger::Death,
            parent_emitter_id: ANY_EMITTER.to_string(),
            spawn_count: 5,
            inherit_velocity: 0.3,
            spread: 360.0,
            speed: 120.0,
            speed_variance: 40.0,
            size: 4.0,
            size_variance: 1.0,
            lifetime: 20.0,
            lifetime_variance: 5.0,
            color: None,
            color_variance: 10.0,
        }
    }
}

impl SubEmitterConfig {
    pub fn matches(&self, emitter_id: &str) -> bool {
        self.parent_emitter_id == ANY_EMITTER || self.parent_emitter_id == emitter_id
    }
}

/// Where cascade children go and how many may still be created this tick.
pub struct CascadeTarget<'a> {
    pub pool: &'a mut ParticlePool,
    pub next_id: &'a mut u64,
    pub max_particles: usize,
    pub unit_scale: f32,
}

/// Spawns the children of a dying particle. Sub-particles never cascade, so
/// the depth is exactly one. Returns the number of children created.
pub fn on_parent_death(
    configs: &BTreeMap<String, SubEmitterConfig>,
    parent: &Particle,
    rng: &mut SeededRandom,
    target: &mut CascadeTarget<'_>,
) -> usize {
    if parent.is_sub_particle {
        return 0;
    }

    let heading = if parent.velocity.length_squared() > DISTANCE_EPSILON * DISTANCE_EPSILON {
        parent.velocity.y.atan2(parent.velocity.x)
    } else {
        0.0
    };

    let mut spawned = 0;
    for config in configs.values() {
        if !config.enabled
            || config.trigger != SubEmitterTrigger::Death
            || !config.matches(&parent.emitter_id)
        {
            continue;
        }
        for _ in 0..config.spawn_count {
            if target.pool.len() >= target.max_particles {
                return spawned;
            }
            let child = spawn_child(config, parent, heading, rng, target);
            target.pool.push_live(child);
            spawned += 1;
        }
    }
    spawned
}

fn spawn_child(
    config: &SubEmitterConfig,
    parent: &Particle,
    heading: f32,
    rng: &mut SeededRandom,
    target: &mut CascadeTarget<'_>,
) -> Particle {
    let angle = heading + (rng.next() - 0.5) * config.spread.to_radians();
    let speed = rng.variance(config.speed, config.speed_variance).max(0.0) * target.unit_scale;
    let size = rng.variance(config.size, config.size_variance).max(0.1);
    let lifetime = rng.variance(config.lifetime, config.lifetime_variance).max(1.0);

    let mut color = config.color.unwrap_or(parent.color);
    for channel in color.iter_mut().take(3) {
        *channel = (*channel + rng.variance(0.0, config.color_variance)).clamp(0.0, 255.0);
    }

    let id = *target.next_id;
    *target.next_id += 1;

    let mut child = target.pool.acquire();
    child.id = id;
    child.position = parent.position;
    child.previous_position = parent.position;
    child.velocity = Vec2::from_angle(angle) * speed + parent.velocity * config.inherit_velocity;
    child.age = 0.0;
    child.lifetime = lifetime;
    child.size = size;
    child.base_size = size;
    child.color = color;
    child.base_color = color;
    child.emitter_id.push_str(&config.id);
    child.is_sub_particle = true;
    child
}
