use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::collision::CollisionConfig;
use crate::drivers::{DriverMapping, DriverUpdate};
use crate::emitter::EmitterConfig;
use crate::forces::{Attractor, ForceFields, GravityWell, Turbulence, Vortex};
use crate::modulation::Modulation;
use crate::noise::MAX_OCTAVES;
use crate::particle::{DEFAULT_POOL_CAPACITY, MAX_TRAIL_LENGTH};
use crate::render::ConnectionConfig;
use crate::subemitter::SubEmitterConfig;
use crate::{ParticleSimError, Result};

/// What happens when a particle leaves the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BoundaryMode {
    /// Reflect off the frame edge, losing some speed.
    Bounce,
    /// Die once well outside the frame.
    #[default]
    Kill,
    /// Re-enter from the opposite edge.
    Wrap,
}

/// System-wide simulation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SimulationConfig {
    pub seed: u32,
    pub max_particles: usize,
    /// Retired particle records kept for reuse.
    pub pool_capacity: usize,
    /// Downward acceleration in pixels per tick².
    pub gravity: f32,
    pub wind_strength: f32,
    /// Degrees, same convention as emitter directions.
    pub wind_direction: f32,
    /// Fraction of velocity lost per tick.
    pub friction: f32,
    pub boundary: BoundaryMode,
    /// Pixels spanning the normalized unit; converts pixel-valued
    /// speeds, sizes and strengths into frame space.
    pub pixels_per_unit: f32,
    pub trail_length: usize,
    pub connections: ConnectionConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 12_345,
            max_particles: 10_000,
            pool_capacity: DEFAULT_POOL_CAPACITY,
            gravity: 0.0,
            wind_strength: 0.0,
            wind_direction: 0.0,
            friction: 0.0,
            boundary: BoundaryMode::Kill,
            pixels_per_unit: 1920.0,
            trail_length: MAX_TRAIL_LENGTH,
            connections: ConnectionConfig::default(),
        }
    }
}

impl SimulationConfig {
    /// Multiplier turning pixel values into normalized frame units.
    pub fn unit_scale(&self) -> f32 {
        1.0 / self.pixels_per_unit
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_particles == 0 {
            return Err(ParticleSimError::invalid_config("maxParticles must be positive"));
        }
        if !(self.pixels_per_unit.is_finite() && self.pixels_per_unit > 0.0) {
            return Err(ParticleSimError::invalid_config(
                "pixelsPerUnit must be a positive number",
            ));
        }
        if self.trail_length > MAX_TRAIL_LENGTH {
            return Err(ParticleSimError::invalid_config(format!(
                "trailLength may not exceed {MAX_TRAIL_LENGTH}"
            )));
        }
        ensure_finite(
            "simulation",
            &[
                self.gravity,
                self.wind_strength,
                self.wind_direction,
                self.friction,
                self.connections.max_distance,
            ],
        )
    }
}

/// Everything needed to build one particle layer's simulation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ParticleLayerConfig {
    pub simulation: SimulationConfig,
    pub emitters: Vec<EmitterConfig>,
    pub gravity_wells: Vec<GravityWell>,
    pub vortices: Vec<Vortex>,
    pub attractors: Vec<Attractor>,
    pub turbulence: Vec<Turbulence>,
    pub sub_emitters: Vec<SubEmitterConfig>,
    pub modulations: Vec<Modulation>,
    pub collision: CollisionConfig,
    /// Static overrides applied before the first tick.
    pub drivers: Vec<DriverUpdate>,
    /// Routes named external features (audio levels and the like) to drivers.
    pub driver_mappings: Vec<DriverMapping>,
}

impl ParticleLayerConfig {
    pub fn from_json_str(source: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        tracing::debug!(?path, "loading particle layer config");
        let source = std::fs::read_to_string(path)?;
        Self::from_json_str(&source)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn force_fields(&self) -> ForceFields {
        let mut fields = ForceFields::new();
        for well in &self.gravity_wells {
            fields.upsert_gravity_well(well.clone());
        }
        for vortex in &self.vortices {
            fields.upsert_vortex(vortex.clone());
        }
        for attractor in &self.attractors {
            fields.upsert_attractor(attractor.clone());
        }
        for turbulence in &self.turbulence {
            fields.upsert_turbulence(turbulence.clone());
        }
        fields
    }

    pub fn validate(&self) -> Result<()> {
        self.simulation.validate()?;

        if !(self.collision.cell_size.is_finite() && self.collision.cell_size > 0.0) {
            return Err(ParticleSimError::invalid_config(
                "collision cellSize must be a positive number",
            ));
        }

        unique_ids("emitter", self.emitters.iter().map(|e| e.id.as_str()))?;
        // Force fields share one id space: updates address them by id alone.
        unique_ids(
            "force field",
            self.gravity_wells
                .iter()
                .map(|f| f.id.as_str())
                .chain(self.vortices.iter().map(|f| f.id.as_str()))
                .chain(self.attractors.iter().map(|f| f.id.as_str()))
                .chain(self.turbulence.iter().map(|f| f.id.as_str())),
        )?;
        unique_ids("sub-emitter", self.sub_emitters.iter().map(|s| s.id.as_str()))?;

        for emitter in &self.emitters {
            ensure_finite(
                &emitter.id,
                &[
                    emitter.position.x,
                    emitter.position.y,
                    emitter.direction,
                    emitter.spread,
                    emitter.speed,
                    emitter.speed_variance,
                    emitter.size,
                    emitter.size_variance,
                    emitter.lifetime,
                    emitter.lifetime_variance,
                    emitter.emission_rate,
                    emitter.burst_interval,
                ],
            )?;
            if emitter.emission_rate < 0.0 {
                return Err(ParticleSimError::invalid_config(format!(
                    "emitter `{}` has a negative emission rate",
                    emitter.id
                )));
            }
        }
        for well in &self.gravity_wells {
            ensure_finite(
                &well.id,
                &[well.position.x, well.position.y, well.strength, well.radius],
            )?;
        }
        for vortex in &self.vortices {
            ensure_finite(
                &vortex.id,
                &[
                    vortex.position.x,
                    vortex.position.y,
                    vortex.strength,
                    vortex.radius,
                    vortex.rotation_speed,
                    vortex.inward_pull,
                ],
            )?;
        }
        for attractor in &self.attractors {
            ensure_finite(
                &attractor.id,
                &[
                    attractor.position.x,
                    attractor.position.y,
                    attractor.sigma,
                    attractor.rho,
                    attractor.beta,
                    attractor.strength,
                    attractor.radius,
                ],
            )?;
        }
        for turbulence in &self.turbulence {
            ensure_finite(
                &turbulence.id,
                &[turbulence.scale, turbulence.strength, turbulence.evolution_speed],
            )?;
            if turbulence.octaves > MAX_OCTAVES {
                return Err(ParticleSimError::invalid_config(format!(
                    "turbulence `{}` may not use more than {MAX_OCTAVES} octaves",
                    turbulence.id
                )));
            }
        }
        for update in &self.drivers {
            ensure_finite(&update.scope, &[update.value])?;
        }
        Ok(())
    }
}

fn unique_ids<'a>(kind: &str, ids: impl Iterator<Item = &'a str>) -> Result<()> {
    let mut seen = BTreeSet::new();
    for id in ids {
        if id.is_empty() {
            return Err(ParticleSimError::invalid_config(format!("{kind} with an empty id")));
        }
        if !seen.insert(id) {
            return Err(ParticleSimError::invalid_config(format!(
                "duplicate {kind} id `{id}`"
            )));
        }
    }
    Ok(())
}

fn ensure_finite(owner: &str, values: &[f32]) -> Result<()> {
    if values.iter().all(|value| value.is_finite()) {
        Ok(())
    } else {
        Err(ParticleSimError::invalid_config(format!(
            "`{owner}` contains a non-finite number"
        )))
    }
}
