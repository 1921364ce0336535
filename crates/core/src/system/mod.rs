//! The particle lifecycle manager.
//!
//! A [`ParticleSystem`] owns one layer's configuration, particles, random
//! stream and per-emitter counters. Each [`ParticleSystem::step`] runs the
//! phases in a fixed order:
//!
//! 1. resolve driver overrides,
//! 2. integrate every live particle in spawn order,
//! 3. environment then particle-particle collision,
//! 4. retire the dead, cascading sub-emitters for non-sub particles,
//! 5. emit new particles per emitter in id order.
//!
//! Particles created in phases 4 and 5 are first integrated on the next tick.

use std::collections::BTreeMap;

use glam::Vec2;
use tracing::{debug, trace, warn};

use crate::checkpoint::{ParticleRecord, SimulationCheckpoint};
use crate::collision::{resolve_environment, resolve_particles, CollisionConfig, SpatialHash};
use crate::config::{BoundaryMode, ParticleLayerConfig, SimulationConfig};
use crate::drivers::{DriverMapping, DriverMatrix, DriverTarget};
use crate::emitter::{
    resolve_spawn_point, EmissionPointCache, EmitterConfig, GeometryContext, GeometryProviders,
    SplineCursor, SpriteAnimation, SpriteConfig,
};
use crate::forces::{
    self, Attractor, FieldEnvironment, ForceFields, GravityWell, Turbulence, Vortex,
};
use crate::modulation::{apply_modulations, Modulation};
use crate::noise::MAX_OCTAVES;
use crate::render::{find_connections, Connection, RenderSnapshot};
use crate::subemitter::{on_parent_death, CascadeTarget, SubEmitterConfig, ANY_EMITTER};
use crate::{NoiseField, Particle, ParticlePool, ParticleSimError, Result, SeededRandom};

/// Velocity kept after reflecting off the frame edge in bounce mode.
pub const BOUNDARY_BOUNCE_DAMPING: f32 = 0.8;

/// How far outside the frame a particle may travel before kill mode removes it.
pub const KILL_MARGIN: f32 = 0.5;

/// Counts gathered during one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickStats {
    pub spawned: usize,
    pub died: usize,
    pub cascaded: usize,
    pub collisions: usize,
}

/// System-wide values for one tick after driver overrides.
#[derive(Debug, Clone, Copy)]
struct TickGlobals {
    gravity: f32,
    wind: Vec2,
    friction: f32,
    turbulence_strength: Option<f32>,
}

/// Emitter values for one tick after driver overrides.
#[derive(Debug, Clone, Copy)]
struct EmitterOverrides {
    speed: f32,
    size: f32,
    lifetime: f32,
}

/// Deterministic simulation of one particle layer.
#[derive(Debug)]
pub struct ParticleSystem {
    config: SimulationConfig,
    rng: SeededRandom,
    noise: NoiseField,
    emitters: BTreeMap<String, EmitterConfig>,
    fields: ForceFields,
    sub_emitters: BTreeMap<String, SubEmitterConfig>,
    modulations: Vec<Modulation>,
    collision: CollisionConfig,
    drivers: DriverMatrix,
    driver_mappings: Vec<DriverMapping>,
    providers: GeometryProviders,
    point_cache: EmissionPointCache,
    pool: ParticlePool,
    accumulators: BTreeMap<String, f32>,
    burst_timers: BTreeMap<String, f32>,
    pending_bursts: BTreeMap<String, u32>,
    spline_cursors: BTreeMap<String, SplineCursor>,
    hash: SpatialHash,
    dying: Vec<Particle>,
    next_id: u64,
    frame: u64,
    time: f32,
}

impl ParticleSystem {
    pub fn new(config: SimulationConfig) -> Self {
        let mut rng = SeededRandom::new(config.seed);
        let noise = NoiseField::new(&mut rng);
        Self {
            pool: ParticlePool::new(config.pool_capacity),
            hash: SpatialHash::default(),
            rng,
            noise,
            config,
            emitters: BTreeMap::new(),
            fields: ForceFields::new(),
            sub_emitters: BTreeMap::new(),
            modulations: Vec::new(),
            collision: CollisionConfig::default(),
            drivers: DriverMatrix::new(),
            driver_mappings: Vec::new(),
            providers: GeometryProviders::new(),
            point_cache: EmissionPointCache::new(),
            accumulators: BTreeMap::new(),
            burst_timers: BTreeMap::new(),
            pending_bursts: BTreeMap::new(),
            spline_cursors: BTreeMap::new(),
            dying: Vec::new(),
            next_id: 0,
            frame: 0,
            time: 0.0,
        }
    }

    /// Builds a system from a validated layer document.
    pub fn from_layer(layer: &ParticleLayerConfig) -> Result<Self> {
        layer.validate()?;
        let mut system = Self::new(layer.simulation.clone());
        for emitter in &layer.emitters {
            system.upsert_emitter(emitter.clone());
        }
        system.fields = layer.force_fields();
        for sub in &layer.sub_emitters {
            system.upsert_sub_emitter(sub.clone());
        }
        system.modulations = layer.modulations.clone();
        system.collision = layer.collision.clone();
        system.drivers.apply_updates(layer.drivers.clone());
        system.driver_mappings = layer.driver_mappings.clone();
        debug!(
            emitters = system.emitters.len(),
            sub_emitters = system.sub_emitters.len(),
            seed = system.config.seed,
            "particle system created"
        );
        Ok(system)
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Simulated time in ticks.
    pub fn time(&self) -> f32 {
        self.time
    }

    pub fn seed(&self) -> u32 {
        self.rng.seed()
    }

    pub fn particle_count(&self) -> usize {
        self.pool.len()
    }

    /// Live particles in spawn order.
    pub fn particles(&self) -> &[Particle] {
        self.pool.live()
    }

    /// Retired records waiting for reuse.
    pub fn pooled_count(&self) -> usize {
        self.pool.pooled()
    }

    pub fn emitter(&self, id: &str) -> Option<&EmitterConfig> {
        self.emitters.get(id)
    }

    pub fn emitters(&self) -> impl Iterator<Item = &EmitterConfig> {
        self.emitters.values()
    }

    pub fn force_fields(&self) -> &ForceFields {
        &self.fields
    }

    pub fn drivers(&self) -> &DriverMatrix {
        &self.drivers
    }

    pub fn drivers_mut(&mut self) -> &mut DriverMatrix {
        &mut self.drivers
    }

    // Configuration updates.

    /// Replaces the system-wide settings. A changed seed reseeds the random
    /// stream; live particles are kept.
    pub fn set_simulation(&mut self, config: SimulationConfig) -> Result<()> {
        config.validate()?;
        let reseed = config.seed != self.rng.seed();
        self.pool.set_capacity(config.pool_capacity);
        let seed = config.seed;
        self.config = config;
        if reseed {
            self.set_seed(seed);
        }
        self.enforce_particle_cap();
        debug!("simulation settings updated");
        Ok(())
    }

    pub fn set_boundary(&mut self, boundary: BoundaryMode) {
        self.config.boundary = boundary;
    }

    /// Changes the particle cap. Returns how many particles were retired to
    /// fit under a lowered cap.
    pub fn set_max_particles(&mut self, max_particles: usize) -> usize {
        self.config.max_particles = max_particles;
        self.enforce_particle_cap()
    }

    /// Retires the oldest particles through the normal death path until the
    /// live count fits the cap. The cascade of those deaths finds no room.
    fn enforce_particle_cap(&mut self) -> usize {
        let live = self.pool.live_mut();
        let excess = live.len().saturating_sub(self.config.max_particles);
        if excess == 0 {
            return 0;
        }
        for particle in &mut live[..excess] {
            particle.kill();
        }
        let (died, _) = self.retire_dead(self.config.unit_scale());
        debug!(retired = died, cap = self.config.max_particles, "particle cap lowered");
        died
    }

    pub fn upsert_emitter(&mut self, emitter: EmitterConfig) {
        debug!(emitter = %emitter.id, "emitter updated");
        self.emitters.insert(emitter.id.clone(), emitter);
    }

    /// Removes an emitter and its counters. Its live particles keep running.
    pub fn remove_emitter(&mut self, id: &str) -> Result<EmitterConfig> {
        let removed = self
            .emitters
            .remove(id)
            .ok_or_else(|| ParticleSimError::UnknownEmitter(id.to_string()))?;
        self.accumulators.remove(id);
        self.burst_timers.remove(id);
        self.pending_bursts.remove(id);
        self.spline_cursors.remove(id);
        debug!(emitter = id, "emitter removed");
        Ok(removed)
    }

    pub fn set_emitter_enabled(&mut self, id: &str, enabled: bool) -> Result<()> {
        let emitter = self
            .emitters
            .get_mut(id)
            .ok_or_else(|| ParticleSimError::UnknownEmitter(id.to_string()))?;
        emitter.enabled = enabled;
        Ok(())
    }

    /// Queues `count` extra particles for the next emission phase.
    pub fn trigger_burst(&mut self, emitter_id: &str, count: u32) -> Result<()> {
        if !self.emitters.contains_key(emitter_id) {
            return Err(ParticleSimError::UnknownEmitter(emitter_id.to_string()));
        }
        let pending = self.pending_bursts.entry(emitter_id.to_string()).or_insert(0);
        *pending = pending.saturating_add(count);
        debug!(emitter = emitter_id, count, "burst queued");
        Ok(())
    }

    pub fn upsert_gravity_well(&mut self, well: GravityWell) -> Result<()> {
        self.claim_field_id(&well.id, forces::GRAVITY_WELL)?;
        debug!(field = %well.id, "gravity well updated");
        self.fields.upsert_gravity_well(well);
        Ok(())
    }

    pub fn upsert_vortex(&mut self, vortex: Vortex) -> Result<()> {
        self.claim_field_id(&vortex.id, forces::VORTEX)?;
        debug!(field = %vortex.id, "vortex updated");
        self.fields.upsert_vortex(vortex);
        Ok(())
    }

    pub fn upsert_attractor(&mut self, attractor: Attractor) -> Result<()> {
        self.claim_field_id(&attractor.id, forces::ATTRACTOR)?;
        debug!(field = %attractor.id, "attractor updated");
        self.fields.upsert_attractor(attractor);
        Ok(())
    }

    pub fn upsert_turbulence(&mut self, turbulence: Turbulence) -> Result<()> {
        self.claim_field_id(&turbulence.id, forces::TURBULENCE)?;
        if turbulence.octaves > MAX_OCTAVES {
            return Err(ParticleSimError::invalid_config(format!(
                "turbulence `{}` may not use more than {MAX_OCTAVES} octaves",
                turbulence.id
            )));
        }
        debug!(field = %turbulence.id, "turbulence updated");
        self.fields.upsert_turbulence(turbulence);
        Ok(())
    }

    /// Force fields share one id space; an id may only be replaced by a
    /// field of the same kind.
    fn claim_field_id(&self, id: &str, kind: &'static str) -> Result<()> {
        if id.is_empty() {
            return Err(ParticleSimError::invalid_config(format!("{kind} with an empty id")));
        }
        match self.fields.kind_of(id) {
            Some(existing) if existing != kind => Err(ParticleSimError::invalid_config(
                format!("force field id `{id}` already belongs to a {existing}"),
            )),
            _ => Ok(()),
        }
    }

    pub fn remove_field(&mut self, id: &str) -> Result<()> {
        if self.fields.remove(id) {
            debug!(field = id, "force field removed");
            Ok(())
        } else {
            Err(ParticleSimError::UnknownField(id.to_string()))
        }
    }

    pub fn set_field_enabled(&mut self, id: &str, enabled: bool) -> Result<()> {
        if self.fields.set_enabled(id, enabled) {
            Ok(())
        } else {
            Err(ParticleSimError::UnknownField(id.to_string()))
        }
    }

    pub fn upsert_sub_emitter(&mut self, sub: SubEmitterConfig) {
        debug!(sub_emitter = %sub.id, "sub-emitter updated");
        self.sub_emitters.insert(sub.id.clone(), sub);
    }

    pub fn remove_sub_emitter(&mut self, id: &str) -> Result<SubEmitterConfig> {
        self.sub_emitters
            .remove(id)
            .ok_or_else(|| ParticleSimError::UnknownField(id.to_string()))
    }

    pub fn set_modulations(&mut self, modulations: Vec<Modulation>) {
        self.modulations = modulations;
    }

    pub fn add_modulation(&mut self, modulation: Modulation) {
        self.modulations.push(modulation);
    }

    pub fn set_collision(&mut self, collision: CollisionConfig) {
        self.collision = collision;
    }

    pub fn set_drivers(&mut self, drivers: DriverMatrix) {
        self.drivers = drivers;
    }

    pub fn set_driver_mappings(&mut self, mappings: Vec<DriverMapping>) {
        self.driver_mappings = mappings;
    }

    /// Routes the latest external feature values through the driver mappings.
    pub fn apply_driver_features(&mut self, features: &BTreeMap<String, f32>) {
        self.drivers.apply_features(&self.driver_mappings, features);
    }

    /// Swaps the geometry providers and drops every cached emission point.
    pub fn set_providers(&mut self, providers: GeometryProviders) {
        self.providers = providers;
        self.point_cache.invalidate(None);
    }

    /// Drops cached emission points for `layer_id`, or all with `None`.
    pub fn invalidate_emission_cache(&mut self, layer_id: Option<&str>) {
        debug!(?layer_id, "emission point cache invalidated");
        self.point_cache.invalidate(layer_id);
    }

    /// Reseeds the random stream and rebuilds the noise table from it.
    pub fn set_seed(&mut self, seed: u32) {
        self.config.seed = seed;
        self.rng.set_seed(seed);
        self.noise.reseed(&mut self.rng);
        debug!(seed, "random stream reseeded");
    }

    /// Returns to the freshly constructed state for the current seed,
    /// keeping configuration and drivers.
    pub fn reset(&mut self) {
        self.pool.clear();
        self.accumulators.clear();
        self.burst_timers.clear();
        self.pending_bursts.clear();
        self.spline_cursors.clear();
        self.next_id = 0;
        self.frame = 0;
        self.time = 0.0;
        let seed = self.config.seed;
        self.set_seed(seed);
    }

    // Simulation.

    /// Advances the simulation by `dt` ticks.
    pub fn step(&mut self, dt: f32) -> TickStats {
        let mut stats = TickStats::default();
        if !dt.is_finite() || dt < 0.0 {
            warn!(dt, "ignoring step with invalid delta time");
            return stats;
        }

        let unit_scale = self.config.unit_scale();
        let globals = self.resolve_globals();
        self.integrate(dt, unit_scale, globals);

        let live = self.pool.live_mut();
        stats.collisions += resolve_environment(live, &self.collision);
        stats.collisions += resolve_particles(live, &self.collision, &mut self.hash, unit_scale);

        let (died, cascaded) = self.retire_dead(unit_scale);
        stats.died = died;
        stats.cascaded = cascaded;

        stats.spawned = self.emit(dt, unit_scale);

        self.frame += 1;
        self.time += dt;
        trace!(
            frame = self.frame,
            live = self.pool.len(),
            spawned = stats.spawned,
            died = stats.died,
            cascaded = stats.cascaded,
            collisions = stats.collisions,
            "tick complete"
        );
        stats
    }

    fn resolve_globals(&self) -> TickGlobals {
        let drivers = &self.drivers;
        let wind_strength = drivers.value_or(
            ANY_EMITTER,
            DriverTarget::WindStrength,
            self.config.wind_strength,
        );
        let wind_direction = drivers.value_or(
            ANY_EMITTER,
            DriverTarget::WindDirection,
            self.config.wind_direction,
        );
        TickGlobals {
            gravity: drivers.value_or(ANY_EMITTER, DriverTarget::Gravity, self.config.gravity),
            wind: Vec2::from_angle(wind_direction.to_radians()) * wind_strength,
            friction: drivers.value_or(ANY_EMITTER, DriverTarget::Friction, self.config.friction),
            turbulence_strength: drivers.resolve(ANY_EMITTER, DriverTarget::TurbulenceStrength),
        }
    }

    fn integrate(&mut self, dt: f32, unit_scale: f32, globals: TickGlobals) {
        let Self {
            config,
            rng,
            noise,
            emitters,
            fields,
            modulations,
            pool,
            time,
            ..
        } = self;

        let env = FieldEnvironment {
            noise: &*noise,
            time: *time,
            dt,
            unit_scale,
            turbulence_strength: globals.turbulence_strength,
        };
        let gravity = Vec2::new(0.0, globals.gravity) * unit_scale * dt;
        let wind = globals.wind * unit_scale * dt;
        let drag = (1.0 - globals.friction * dt).max(0.0);

        for particle in pool.live_mut() {
            particle.previous_position = particle.position;
            particle.push_trail(config.trail_length);

            particle.velocity += gravity;
            particle.velocity += wind;
            fields.apply(particle, &env);
            particle.velocity *= drag;

            if let Some(sprite) = emitters
                .get(&particle.emitter_id)
                .and_then(|emitter| emitter.sprite.as_ref())
            {
                animate_sprite(particle, sprite, rng, dt);
            }

            particle.position += particle.velocity * dt;
            apply_boundary(particle, config.boundary);
            apply_modulations(modulations, particle, unit_scale);
            particle.age += dt;
        }
    }

    /// Removes dead particles in spawn order. Returns `(died, cascaded)`.
    fn retire_dead(&mut self, unit_scale: f32) -> (usize, usize) {
        let mut dying = std::mem::take(&mut self.dying);
        self.pool.drain_dead_into(&mut dying);
        let died = dying.len();
        let mut cascaded = 0;

        for particle in dying.drain(..) {
            if !particle.is_sub_particle && !self.sub_emitters.is_empty() {
                let mut target = CascadeTarget {
                    pool: &mut self.pool,
                    next_id: &mut self.next_id,
                    max_particles: self.config.max_particles,
                    unit_scale,
                };
                cascaded +=
                    on_parent_death(&self.sub_emitters, &particle, &mut self.rng, &mut target);
            }
            self.pool.recycle(particle);
        }

        self.dying = dying;
        (died, cascaded)
    }

    fn emit(&mut self, dt: f32, unit_scale: f32) -> usize {
        let Self {
            config,
            rng,
            emitters,
            drivers,
            providers,
            point_cache,
            pool,
            accumulators,
            burst_timers,
            pending_bursts,
            spline_cursors,
            next_id,
            frame,
            ..
        } = self;

        let mut spawned = 0;
        for (id, emitter) in emitters.iter() {
            if !emitter.enabled {
                continue;
            }

            let mut count = pending_bursts.remove(id).unwrap_or(0) as usize;
            if emitter.burst_count > 0 && emitter.burst_interval > 0.0 {
                let timer = burst_timers.entry(id.clone()).or_insert(0.0);
                *timer += dt;
                let fired = (*timer / emitter.burst_interval).floor();
                if fired >= 1.0 {
                    *timer -= fired * emitter.burst_interval;
                    let burst = (fired as usize).saturating_mul(emitter.burst_count as usize);
                    count = count.saturating_add(burst);
                }
            }

            let rate = drivers
                .value_or(id, DriverTarget::EmissionRate, emitter.emission_rate)
                .max(0.0);
            let accumulator = accumulators.entry(id.clone()).or_insert(0.0);
            *accumulator += rate * dt;
            let whole = accumulator.floor();
            *accumulator -= whole;
            count = count.saturating_add(whole as usize);

            if count == 0 {
                continue;
            }

            let room = config.max_particles.saturating_sub(pool.len());
            if count > room {
                trace!(emitter = %id, requested = count, room, "particle cap reached");
                count = room;
            }

            let overrides = EmitterOverrides {
                speed: drivers.value_or(id, DriverTarget::Speed, emitter.speed),
                size: drivers.value_or(id, DriverTarget::Size, emitter.size),
                lifetime: drivers.value_or(id, DriverTarget::Lifetime, emitter.lifetime),
            };
            let mut geometry = GeometryContext {
                providers: &*providers,
                cache: &mut *point_cache,
                cursors: &mut *spline_cursors,
                frame: *frame,
            };

            for _ in 0..count {
                let slot = pool.acquire();
                let particle = spawn_particle(
                    emitter,
                    &overrides,
                    rng,
                    &mut geometry,
                    slot,
                    next_id,
                    unit_scale,
                );
                pool.push_live(particle);
            }
            spawned += count;
        }
        spawned
    }

    // Rasterizer boundary.

    pub fn snapshot(&self) -> RenderSnapshot {
        RenderSnapshot::capture(self.frame, self.time, self.pool.live())
    }

    /// Proximity links for the configured [`crate::render::ConnectionConfig`].
    pub fn connections(&self) -> Vec<Connection> {
        find_connections(self.pool.live(), &self.config.connections)
    }

    // Checkpoints.

    pub fn export_checkpoint(&self) -> SimulationCheckpoint {
        SimulationCheckpoint {
            frame: self.frame,
            time: self.time,
            seed: Some(self.rng.seed()),
            rng_state: Some(self.rng.state()),
            next_id: Some(self.next_id),
            emission_accumulators: self.accumulators.clone(),
            burst_timers: self.burst_timers.clone(),
            pending_bursts: self.pending_bursts.clone(),
            spline_cursors: self.spline_cursors.clone(),
            particles: self.pool.live().iter().map(ParticleRecord::from_particle).collect(),
        }
    }

    /// Rebuilds the live set from `checkpoint`. Nothing changes when the
    /// checkpoint fails validation. Trails and collision counters restart.
    pub fn restore(&mut self, checkpoint: &SimulationCheckpoint) -> Result<()> {
        checkpoint.validate(self.config.max_particles)?;

        if let Some(seed) = checkpoint.seed {
            if seed != self.rng.seed() {
                self.set_seed(seed);
            }
        }
        if let Some(state) = checkpoint.rng_state {
            self.rng.set_state(state);
        }

        self.pool.clear();
        for record in &checkpoint.particles {
            let particle = record.fill(self.pool.acquire());
            self.pool.push_live(particle);
        }

        self.next_id = checkpoint.resolved_next_id();
        self.frame = checkpoint.frame;
        self.time = checkpoint.time;
        self.accumulators = checkpoint.emission_accumulators.clone();
        self.burst_timers = checkpoint.burst_timers.clone();
        self.pending_bursts = checkpoint.pending_bursts.clone();
        self.spline_cursors = checkpoint.spline_cursors.clone();

        debug!(
            frame = self.frame,
            particles = self.pool.len(),
            next_id = self.next_id,
            "checkpoint restored"
        );
        Ok(())
    }
}

fn spawn_particle(
    emitter: &EmitterConfig,
    overrides: &EmitterOverrides,
    rng: &mut SeededRandom,
    geometry: &mut GeometryContext<'_>,
    mut particle: Particle,
    next_id: &mut u64,
    unit_scale: f32,
) -> Particle {
    let spawn = resolve_spawn_point(emitter, rng, geometry);
    let heading = spawn.direction.unwrap_or_else(|| emitter.direction_radians());
    let angle = heading + (rng.next() - 0.5) * emitter.spread.to_radians();
    let speed = rng.variance(overrides.speed, emitter.speed_variance).max(0.0) * unit_scale;
    let size = rng.variance(overrides.size, emitter.size_variance).max(0.1);
    let lifetime = rng
        .variance(overrides.lifetime, emitter.lifetime_variance)
        .max(1.0);

    particle.id = *next_id;
    *next_id += 1;
    particle.position = spawn.position;
    particle.previous_position = spawn.position;
    particle.velocity = Vec2::from_angle(angle) * speed;
    particle.age = 0.0;
    particle.lifetime = lifetime;
    particle.size = size;
    particle.base_size = size;
    particle.color = emitter.color;
    particle.base_color = emitter.color;
    particle.emitter_id.push_str(&emitter.id);

    if let Some(sprite) = &emitter.sprite {
        if sprite.rotation_enabled {
            particle.rotation = rng.angle();
            particle.angular_velocity = rng
                .variance(sprite.angular_velocity, sprite.angular_velocity_variance)
                .to_radians();
        }
        if sprite.random_start_frame || sprite.animation == SpriteAnimation::Random {
            particle.sprite_index = random_frame(sprite, rng);
        }
    }
    particle
}

fn random_frame(sprite: &SpriteConfig, rng: &mut SeededRandom) -> u32 {
    let last = sprite.frame_count.saturating_sub(1).min(i32::MAX as u32) as i32;
    rng.int(0, last).max(0) as u32
}

fn animate_sprite(
    particle: &mut Particle,
    sprite: &SpriteConfig,
    rng: &mut SeededRandom,
    dt: f32,
) {
    particle.rotation += particle.angular_velocity * dt;
    particle.sprite_index = match sprite.animation {
        SpriteAnimation::Random => {
            if rng.bool(sprite.random_change_chance) {
                random_frame(sprite, rng)
            } else {
                particle.sprite_index
            }
        }
        _ => sprite.frame_for_age(particle.age, particle.sprite_index),
    };
}

fn apply_boundary(particle: &mut Particle, boundary: BoundaryMode) {
    match boundary {
        BoundaryMode::Bounce => {
            let Vec2 { x, y } = particle.position;
            if !(0.0..=1.0).contains(&x) {
                particle.velocity.x = -particle.velocity.x * BOUNDARY_BOUNCE_DAMPING;
                particle.position.x = x.clamp(0.0, 1.0);
            }
            if !(0.0..=1.0).contains(&y) {
                particle.velocity.y = -particle.velocity.y * BOUNDARY_BOUNCE_DAMPING;
                particle.position.y = y.clamp(0.0, 1.0);
            }
        }
        BoundaryMode::Kill => {
            let low = -KILL_MARGIN;
            let high = 1.0 + KILL_MARGIN;
            let Vec2 { x, y } = particle.position;
            if x < low || x > high || y < low || y > high || !x.is_finite() || !y.is_finite() {
                particle.kill();
            }
        }
        BoundaryMode::Wrap => {
            let wrapped = Vec2::new(
                particle.position.x.rem_euclid(1.0),
                particle.position.y.rem_euclid(1.0),
            );
            if wrapped != particle.position {
                particle.position = wrapped;
                particle.previous_position = wrapped;
                particle.trail.clear();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::DriverUpdate;
    use crate::emitter::EmitterShape;

    fn still_emitter(id: &str, lifetime: f32) -> EmitterConfig {
        EmitterConfig {
            speed: 0.0,
            speed_variance: 0.0,
            lifetime,
            lifetime_variance: 0.0,
            emission_rate: 0.0,
            ..EmitterConfig::new(id)
        }
    }

    fn system_with(emitter: EmitterConfig) -> ParticleSystem {
        let mut system = ParticleSystem::new(SimulationConfig::default());
        system.upsert_emitter(emitter);
        system
    }

    #[test]
    fn fractional_rates_accumulate() {
        let mut system = system_with(still_emitter("a", 100.0).with_rate(0.25));
        let spawned: Vec<usize> = (0..8).map(|_| system.step(1.0).spawned).collect();
        assert_eq!(spawned, vec![0, 0, 0, 1, 0, 0, 0, 1]);
    }

    #[test]
    fn ids_increase_monotonically() {
        let mut system = system_with(still_emitter("a", 100.0).with_rate(3.0));
        for _ in 0..4 {
            system.step(1.0);
        }
        let ids: Vec<u64> = system.particles().iter().map(|p| p.id).collect();
        assert_eq!(ids, (0..12).collect::<Vec<_>>());
    }

    #[test]
    fn cap_stops_spawning() {
        let mut system = system_with(still_emitter("a", 100.0).with_rate(50.0));
        system.set_max_particles(120);
        for _ in 0..5 {
            system.step(1.0);
            assert!(system.particle_count() <= 120);
        }
        assert_eq!(system.particle_count(), 120);
    }

    #[test]
    fn lowering_the_cap_retires_the_oldest() {
        let mut system = system_with(still_emitter("a", 100.0).with_rate(50.0));
        system.upsert_sub_emitter(SubEmitterConfig::default());
        for _ in 0..3 {
            system.step(1.0);
        }
        assert_eq!(system.particle_count(), 150);

        assert_eq!(system.set_max_particles(20), 130);
        assert_eq!(system.particle_count(), 20);
        assert!(system.particles().iter().all(|p| p.id >= 130 && !p.is_sub_particle));

        system.step(1.0);
        assert!(system.particle_count() <= 20);
        assert_eq!(system.set_max_particles(40), 0);
    }

    #[test]
    fn replacing_simulation_settings_enforces_the_cap() {
        let mut system = system_with(still_emitter("a", 100.0).with_rate(10.0));
        for _ in 0..4 {
            system.step(1.0);
        }
        system
            .set_simulation(SimulationConfig {
                max_particles: 15,
                ..SimulationConfig::default()
            })
            .unwrap();
        assert_eq!(system.particle_count(), 15);
        assert_eq!(system.particles()[0].id, 25);
    }

    #[test]
    fn queued_burst_spawns_once() {
        let mut system = system_with(still_emitter("a", 100.0));
        system.trigger_burst("a", 7).unwrap();
        assert_eq!(system.step(1.0).spawned, 7);
        assert_eq!(system.step(1.0).spawned, 0);
        assert!(matches!(
            system.trigger_burst("missing", 1),
            Err(ParticleSimError::UnknownEmitter(_))
        ));
    }

    #[test]
    fn periodic_bursts_follow_interval() {
        let mut system = system_with(EmitterConfig {
            burst_count: 4,
            burst_interval: 3.0,
            ..still_emitter("a", 100.0)
        });
        let spawned: Vec<usize> = (0..6).map(|_| system.step(1.0).spawned).collect();
        assert_eq!(spawned, vec![0, 0, 4, 0, 0, 4]);
    }

    #[test]
    fn dead_particles_return_to_pool() {
        let mut system = system_with(still_emitter("a", 2.0));
        system.trigger_burst("a", 3).unwrap();
        system.step(1.0);
        for _ in 0..3 {
            system.step(1.0);
        }
        assert_eq!(system.particle_count(), 0);
        assert_eq!(system.pooled_count(), 3);
    }

    #[test]
    fn gravity_accelerates_downwards() {
        let mut config = SimulationConfig {
            gravity: 1920.0 * 0.001,
            boundary: BoundaryMode::Bounce,
            ..SimulationConfig::default()
        };
        config.trail_length = 0;
        let mut system = ParticleSystem::new(config);
        system.upsert_emitter(still_emitter("a", 100.0));
        system.trigger_burst("a", 1).unwrap();
        system.step(1.0);
        system.step(1.0);
        let particle = &system.particles()[0];
        assert!((particle.velocity.y - 0.001).abs() < 1e-7);
        assert!(particle.position.y > 0.5);
    }

    #[test]
    fn driver_overrides_emission_rate() {
        let mut system = system_with(still_emitter("a", 100.0).with_rate(1.0));
        system
            .drivers_mut()
            .push(DriverUpdate::for_emitter("a", DriverTarget::EmissionRate, 5.0));
        assert_eq!(system.step(1.0).spawned, 5);
    }

    #[test]
    fn wrap_boundary_reenters_and_clears_trail() {
        let mut particle = Particle {
            position: Vec2::new(1.2, -0.1),
            ..Particle::default()
        };
        particle.trail.push_back(Vec2::new(0.9, 0.1));
        apply_boundary(&mut particle, BoundaryMode::Wrap);
        assert!((particle.position - Vec2::new(0.2, 0.9)).length() < 1e-5);
        assert!(particle.trail.is_empty());
        assert_eq!(particle.previous_position, particle.position);
    }

    #[test]
    fn bounce_boundary_reflects_and_clamps() {
        let mut particle = Particle {
            position: Vec2::new(1.1, 0.5),
            velocity: Vec2::new(0.1, 0.0),
            ..Particle::default()
        };
        apply_boundary(&mut particle, BoundaryMode::Bounce);
        assert_eq!(particle.position.x, 1.0);
        assert!((particle.velocity.x + 0.08).abs() < 1e-6);
    }

    #[test]
    fn kill_boundary_uses_margin() {
        let mut inside = Particle {
            position: Vec2::new(1.4, -0.4),
            lifetime: 10.0,
            ..Particle::default()
        };
        apply_boundary(&mut inside, BoundaryMode::Kill);
        assert!(!inside.is_dead());

        let mut outside = Particle {
            position: Vec2::new(1.6, 0.5),
            lifetime: 10.0,
            ..Particle::default()
        };
        apply_boundary(&mut outside, BoundaryMode::Kill);
        assert!(outside.is_dead());
    }

    #[test]
    fn cascade_spawns_on_death() {
        let mut system = system_with(still_emitter("a", 1.0));
        system.upsert_sub_emitter(SubEmitterConfig {
            spawn_count: 3,
            lifetime: 50.0,
            ..SubEmitterConfig::default()
        });
        system.trigger_burst("a", 2).unwrap();
        system.step(1.0);
        system.step(1.0);
        let stats = system.step(1.0);
        assert_eq!(stats.died, 2);
        assert_eq!(stats.cascaded, 6);
        assert!(system.particles().iter().all(|p| p.is_sub_particle));
    }

    #[test]
    fn restore_rejects_bad_checkpoint_without_side_effects() {
        let mut system = system_with(still_emitter("a", 100.0).with_rate(2.0));
        system.step(1.0);
        let mut checkpoint = system.export_checkpoint();
        checkpoint.particles[1].id = checkpoint.particles[0].id;
        assert!(system.restore(&checkpoint).is_err());
        assert_eq!(system.particle_count(), 2);
        assert_eq!(system.frame(), 1);
    }

    #[test]
    fn reset_returns_to_seed_state() {
        let mut system = system_with(EmitterConfig::new("a").with_shape(EmitterShape::Circle {
            radius: 0.1,
            edge_only: false,
        }));
        for _ in 0..3 {
            system.step(1.0);
        }
        let first = system.snapshot().to_json().unwrap();
        system.reset();
        assert_eq!(system.particle_count(), 0);
        for _ in 0..3 {
            system.step(1.0);
        }
        assert_eq!(system.snapshot().to_json().unwrap(), first);
    }

    #[test]
    fn unknown_ids_are_reported() {
        let mut system = ParticleSystem::new(SimulationConfig::default());
        assert!(matches!(
            system.remove_emitter("nope"),
            Err(ParticleSimError::UnknownEmitter(_))
        ));
        assert!(matches!(
            system.remove_field("nope"),
            Err(ParticleSimError::UnknownField(_))
        ));
        assert!(system.set_field_enabled("nope", false).is_err());
    }

    #[test]
    fn field_ids_are_unique_across_kinds() {
        let mut system = ParticleSystem::new(SimulationConfig::default());
        system
            .upsert_gravity_well(GravityWell {
                id: "f".to_string(),
                ..GravityWell::default()
            })
            .unwrap();
        let clash = system.upsert_vortex(Vortex {
            id: "f".to_string(),
            ..Vortex::default()
        });
        assert!(matches!(clash, Err(ParticleSimError::InvalidConfig(_))));
        assert!(system.force_fields().vortices.is_empty());

        system
            .upsert_gravity_well(GravityWell {
                id: "f".to_string(),
                strength: 3.0,
                ..GravityWell::default()
            })
            .unwrap();
        assert_eq!(system.force_fields().gravity_wells["f"].strength, 3.0);

        let too_many_octaves = system.upsert_turbulence(Turbulence {
            octaves: 64,
            ..Turbulence::default()
        });
        assert!(too_many_octaves.is_err());
    }

    fn sprite_emitter(sprite: SpriteConfig) -> EmitterConfig {
        EmitterConfig {
            sprite: Some(sprite),
            ..still_emitter("s", 100.0)
        }
    }

    #[test]
    fn rotation_advances_by_angular_velocity() {
        let mut system = system_with(sprite_emitter(SpriteConfig {
            rotation_enabled: true,
            angular_velocity: 10.0,
            angular_velocity_variance: 0.0,
            ..SpriteConfig::default()
        }));
        system.trigger_burst("s", 1).unwrap();
        system.step(1.0);
        let spawned = system.particles()[0].clone();
        assert!((spawned.angular_velocity - 10.0_f32.to_radians()).abs() < 1e-6);
        assert!((0.0..std::f32::consts::TAU).contains(&spawned.rotation));

        system.step(2.0);
        let rotated = &system.particles()[0];
        let expected = spawned.rotation + spawned.angular_velocity * 2.0;
        assert!((rotated.rotation - expected).abs() < 1e-5);
    }

    #[test]
    fn loop_and_once_frames_follow_age() {
        let sprite = |animation| SpriteConfig {
            frame_count: 4,
            frame_rate: 1.0,
            animation,
            ..SpriteConfig::default()
        };
        let mut looping = system_with(sprite_emitter(sprite(SpriteAnimation::Loop)));
        let mut once = system_with(sprite_emitter(sprite(SpriteAnimation::Once)));
        for system in [&mut looping, &mut once] {
            system.trigger_burst("s", 1).unwrap();
            // Spawn tick plus six updates; the last update sees age 5.
            for _ in 0..7 {
                system.step(1.0);
            }
        }
        assert_eq!(looping.particles()[0].sprite_index, 1);
        assert_eq!(once.particles()[0].sprite_index, 3);
    }

    #[test]
    fn random_frames_draw_from_the_stream() {
        let mut system = system_with(sprite_emitter(SpriteConfig {
            frame_count: 8,
            animation: SpriteAnimation::Random,
            random_change_chance: 1.0,
            ..SpriteConfig::default()
        }));
        system.trigger_burst("s", 1).unwrap();
        system.step(1.0);

        let mut frames = Vec::new();
        for _ in 0..12 {
            let before = system.export_checkpoint().rng_state;
            system.step(1.0);
            assert_ne!(system.export_checkpoint().rng_state, before);
            frames.push(system.particles()[0].sprite_index);
        }
        assert!(frames.iter().all(|frame| *frame < 8));
        assert!(frames.windows(2).any(|pair| pair[0] != pair[1]));
    }

    #[test]
    fn invalid_delta_is_ignored() {
        let mut system = system_with(still_emitter("a", 10.0).with_rate(1.0));
        system.step(f32::NAN);
        system.step(-1.0);
        assert_eq!(system.frame(), 0);
        assert_eq!(system.particle_count(), 0);
    }
}
