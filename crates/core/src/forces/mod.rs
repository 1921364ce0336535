//! Force field evaluators.
//!
//! Every field contributes an additive acceleration, so evaluation order only
//! matters for floating point reproducibility: wells, then vortices, then
//! attractors, then turbulence, each collection in id order.

use std::collections::BTreeMap;
use std::f32::consts::TAU;

use glam::Vec2;
use serde::{Deserialize, Serialize};

use crate::{NoiseField, Particle};

/// Distances below this skip the field for the particle on that tick.
pub const DISTANCE_EPSILON: f32 = 1e-6;

/// Maps a field-local unit offset into the region where the chaotic system
/// produces interesting flow.
const ATTRACTOR_SPACE: f32 = 20.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Falloff {
    None,
    #[default]
    Linear,
    Quadratic,
}

impl Falloff {
    /// Strength multiplier at `distance` inside a field of `radius`.
    pub fn factor(self, distance: f32, radius: f32) -> f32 {
        let edge = (1.0 - distance / radius).clamp(0.0, 1.0);
        match self {
            Falloff::None => 1.0,
            Falloff::Linear => edge,
            Falloff::Quadratic => edge * edge,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GravityWell {
    pub id: String,
    pub enabled: bool,
    pub position: Vec2,
    /// Pixels per tick²; negative values repel.
    pub strength: f32,
    pub radius: f32,
    pub falloff: Falloff,
}

impl Default for GravityWell {
    fn default() -> Self {
        Self {
            id: "well".to_string(),
            enabled: true,
            position: Vec2::new(0.5, 0.5),
            strength: 5.0,
            radius: 0.3,
            falloff: Falloff::Linear,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Vortex {
    pub id: String,
    pub enabled: bool,
    pub position: Vec2,
    pub strength: f32,
    pub radius: f32,
    /// Multiplier on the tangential push; negative spins the other way.
    pub rotation_speed: f32,
    /// Pixels per tick² pulled toward the centre at the core.
    pub inward_pull: f32,
}

impl Default for Vortex {
    fn default() -> Self {
        Self {
            id: "vortex".to_string(),
            enabled: true,
            position: Vec2::new(0.5, 0.5),
            strength: 5.0,
            radius: 0.3,
            rotation_speed: 1.0,
            inward_pull: 0.0,
        }
    }
}

/// Lorenz-style strange attractor evaluated in coordinates local to the field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Attractor {
    pub id: String,
    pub enabled: bool,
    pub position: Vec2,
    pub sigma: f32,
    pub rho: f32,
    pub beta: f32,
    pub strength: f32,
    pub radius: f32,
}

impl Default for Attractor {
    fn default() -> Self {
        Self {
            id: "attractor".to_string(),
            enabled: true,
            position: Vec2::new(0.5, 0.5),
            sigma: 10.0,
            rho: 28.0,
            beta: 8.0 / 3.0,
            strength: 3.0,
            radius: 0.4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Turbulence {
    pub id: String,
    pub enabled: bool,
    /// Noise frequency per normalized unit.
    pub scale: f32,
    pub strength: f32,
    /// Noise-space drift per tick.
    pub evolution_speed: f32,
    pub octaves: u32,
}

impl Default for Turbulence {
    fn default() -> Self {
        Self {
            id: "turbulence".to_string(),
            enabled: true,
            scale: 4.0,
            strength: 2.0,
            evolution_speed: 0.01,
            octaves: 1,
        }
    }
}

/// Per-tick values shared by every field evaluation.
#[derive(Debug, Clone, Copy)]
pub struct FieldEnvironment<'a> {
    pub noise: &'a NoiseField,
    /// Simulated time in ticks.
    pub time: f32,
    pub dt: f32,
    /// Converts pixel-valued strengths into normalized units.
    pub unit_scale: f32,
    /// Driver override replacing every turbulence field's strength.
    pub turbulence_strength: Option<f32>,
}

pub const GRAVITY_WELL: &str = "gravity well";
pub const VORTEX: &str = "vortex";
pub const ATTRACTOR: &str = "attractor";
pub const TURBULENCE: &str = "turbulence";

/// All registered force fields, keyed by id. Ids are unique across kinds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ForceFields {
    pub gravity_wells: BTreeMap<String, GravityWell>,
    pub vortices: BTreeMap<String, Vortex>,
    pub attractors: BTreeMap<String, Attractor>,
    pub turbulence: BTreeMap<String, Turbulence>,
}

impl ForceFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_gravity_well(&mut self, well: GravityWell) {
        self.gravity_wells.insert(well.id.clone(), well);
    }

    pub fn upsert_vortex(&mut self, vortex: Vortex) {
        self.vortices.insert(vortex.id.clone(), vortex);
    }

    pub fn upsert_attractor(&mut self, attractor: Attractor) {
        self.attractors.insert(attractor.id.clone(), attractor);
    }

    pub fn upsert_turbulence(&mut self, turbulence: Turbulence) {
        self.turbulence.insert(turbulence.id.clone(), turbulence);
    }

    /// Kind of the field registered under `id`, if any.
    pub fn kind_of(&self, id: &str) -> Option<&'static str> {
        if self.gravity_wells.contains_key(id) {
            Some(GRAVITY_WELL)
        } else if self.vortices.contains_key(id) {
            Some(VORTEX)
        } else if self.attractors.contains_key(id) {
            Some(ATTRACTOR)
        } else if self.turbulence.contains_key(id) {
            Some(TURBULENCE)
        } else {
            None
        }
    }

    /// Removes the field with `id` from whichever collection holds it.
    pub fn remove(&mut self, id: &str) -> bool {
        self.gravity_wells.remove(id).is_some()
            | self.vortices.remove(id).is_some()
            | self.attractors.remove(id).is_some()
            | self.turbulence.remove(id).is_some()
    }

    /// Enables or disables the field with `id`; returns `false` if unknown.
    pub fn set_enabled(&mut self, id: &str, enabled: bool) -> bool {
        let mut found = false;
        if let Some(field) = self.gravity_wells.get_mut(id) {
            field.enabled = enabled;
            found = true;
        }
        if let Some(field) = self.vortices.get_mut(id) {
            field.enabled = enabled;
            found = true;
        }
        if let Some(field) = self.attractors.get_mut(id) {
            field.enabled = enabled;
            found = true;
        }
        if let Some(field) = self.turbulence.get_mut(id) {
            field.enabled = enabled;
            found = true;
        }
        found
    }

    pub fn is_empty(&self) -> bool {
        self.gravity_wells.is_empty()
            && self.vortices.is_empty()
            && self.attractors.is_empty()
            && self.turbulence.is_empty()
    }

    /// Adds every enabled field's contribution to the particle's velocity.
    pub fn apply(&self, particle: &mut Particle, env: &FieldEnvironment<'_>) {
        for well in self.gravity_wells.values().filter(|f| f.enabled) {
            particle.velocity += gravity_well_acceleration(well, particle.position, env) * env.dt;
        }
        for vortex in self.vortices.values().filter(|f| f.enabled) {
            particle.velocity += vortex_acceleration(vortex, particle.position, env) * env.dt;
        }
        for attractor in self.attractors.values().filter(|f| f.enabled) {
            particle.velocity +=
                attractor_acceleration(attractor, particle.position, env) * env.dt;
        }
        for turbulence in self.turbulence.values().filter(|f| f.enabled) {
            particle.velocity +=
                turbulence_acceleration(turbulence, particle.position, env) * env.dt;
        }
    }
}

pub fn gravity_well_acceleration(
    well: &GravityWell,
    position: Vec2,
    env: &FieldEnvironment<'_>,
) -> Vec2 {
    let to_center = well.position - position;
    let distance = to_center.length();
    if distance < DISTANCE_EPSILON || distance > well.radius {
        return Vec2::ZERO;
    }
    let factor = well.falloff.factor(distance, well.radius);
    to_center / distance * well.strength * factor * env.unit_scale
}

pub fn vortex_acceleration(vortex: &Vortex, position: Vec2, env: &FieldEnvironment<'_>) -> Vec2 {
    let offset = position - vortex.position;
    let distance = offset.length();
    if distance < DISTANCE_EPSILON || distance > vortex.radius {
        return Vec2::ZERO;
    }
    let radial = offset / distance;
    let influence = 1.0 - distance / vortex.radius;
    let tangential = radial.perp() * vortex.strength * vortex.rotation_speed * influence;
    let inward = -radial * vortex.inward_pull * influence;
    (tangential + inward) * env.unit_scale
}

pub fn attractor_acceleration(
    attractor: &Attractor,
    position: Vec2,
    env: &FieldEnvironment<'_>,
) -> Vec2 {
    let offset = position - attractor.position;
    let distance = offset.length();
    if distance < DISTANCE_EPSILON || distance > attractor.radius {
        return Vec2::ZERO;
    }
    let local = offset / attractor.radius * ATTRACTOR_SPACE;
    // The frame plane carries x and y; the radial distance stands in for z.
    let (x, y, z) = (local.x, local.y, local.length());
    let dx = attractor.sigma * (y - x);
    let dy = x * (attractor.rho - z) - y;
    let dz = x * y - attractor.beta * z;

    let flow = Vec2::new(dx, dy) + offset / distance * dz;
    let magnitude = flow.length();
    if !magnitude.is_finite() || magnitude < DISTANCE_EPSILON {
        return Vec2::ZERO;
    }
    let influence = 1.0 - distance / attractor.radius;
    flow / magnitude * attractor.strength * influence * env.unit_scale
}

pub fn turbulence_acceleration(
    turbulence: &Turbulence,
    position: Vec2,
    env: &FieldEnvironment<'_>,
) -> Vec2 {
    let drift = env.time * turbulence.evolution_speed;
    let value = env.noise.fractal(
        position.x * turbulence.scale + drift,
        position.y * turbulence.scale - drift,
        turbulence.octaves,
    );
    let strength = env.turbulence_strength.unwrap_or(turbulence.strength);
    Vec2::from_angle(value * TAU) * strength * env.unit_scale
}
