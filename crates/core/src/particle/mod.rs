use std::collections::VecDeque;

use glam::Vec2;

/// Upper bound on the number of trail samples kept per particle.
pub const MAX_TRAIL_LENGTH: usize = 20;

/// Default number of retired particle records kept for reuse.
pub const DEFAULT_POOL_CAPACITY: usize = 10_000;

/// A single simulated particle.
///
/// Positions are in normalized frame space, velocities in normalized units
/// per tick, sizes in pixels and colors in `0..=255` per channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Particle {
    pub id: u64,
    pub position: Vec2,
    pub previous_position: Vec2,
    pub velocity: Vec2,
    pub age: f32,
    pub lifetime: f32,
    pub size: f32,
    pub base_size: f32,
    pub color: [f32; 4],
    pub base_color: [f32; 4],
    /// Weak back-reference to the owning emitter (or sub-emitter) id.
    pub emitter_id: String,
    pub is_sub_particle: bool,
    pub rotation: f32,
    pub angular_velocity: f32,
    pub sprite_index: u32,
    pub collision_count: u32,
    pub trail: VecDeque<Vec2>,
}

impl Default for Particle {
    fn default() -> Self {
        Self {
            id: 0,
            position: Vec2::ZERO,
            previous_position: Vec2::ZERO,
            velocity: Vec2::ZERO,
            age: 0.0,
            lifetime: 1.0,
            size: 1.0,
            base_size: 1.0,
            color: [255.0; 4],
            base_color: [255.0; 4],
            emitter_id: String::new(),
            is_sub_particle: false,
            rotation: 0.0,
            angular_velocity: 0.0,
            sprite_index: 0,
            collision_count: 0,
            trail: VecDeque::new(),
        }
    }
}

impl Particle {
    /// A particle dies exactly when its age exceeds its lifetime.
    pub fn is_dead(&self) -> bool {
        self.age > self.lifetime
    }

    /// Forces death on the current tick. The age becomes infinite so the
    /// particle is dead for any finite lifetime.
    pub fn kill(&mut self) {
        self.age = f32::INFINITY;
    }

    /// `age / lifetime` clamped to `[0, 1]`.
    pub fn normalized_age(&self) -> f32 {
        if self.lifetime <= f32::EPSILON {
            return 1.0;
        }
        (self.age / self.lifetime).clamp(0.0, 1.0)
    }

    /// Records the current position as a trail sample, dropping the oldest
    /// sample once `limit` (at most [`MAX_TRAIL_LENGTH`]) is reached.
    pub fn push_trail(&mut self, limit: usize) {
        let limit = limit.min(MAX_TRAIL_LENGTH);
        if limit == 0 {
            return;
        }
        while self.trail.len() >= limit {
            self.trail.pop_front();
        }
        self.trail.push_back(self.position);
    }

    /// Clears per-particle state while keeping heap allocations for reuse.
    fn scrub(&mut self) {
        let mut trail = std::mem::take(&mut self.trail);
        let mut emitter_id = std::mem::take(&mut self.emitter_id);
        trail.clear();
        emitter_id.clear();
        *self = Self {
            trail,
            emitter_id,
            ..Self::default()
        };
    }
}

/// Owns the live particle set plus a capped stash of retired records.
///
/// Live particles stay in spawn order, which is the iteration order of every
/// tick phase; collision and render queries address them by index.
#[derive(Debug)]
pub struct ParticlePool {
    live: Vec<Particle>,
    recycled: Vec<Particle>,
    capacity: usize,
}

impl ParticlePool {
    pub fn new(capacity: usize) -> Self {
        Self {
            live: Vec::new(),
            recycled: Vec::new(),
            capacity,
        }
    }

    /// Maximum number of retired records kept for reuse.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
        self.recycled.truncate(capacity);
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Number of retired records currently waiting for reuse.
    pub fn pooled(&self) -> usize {
        self.recycled.len()
    }

    pub fn live(&self) -> &[Particle] {
        &self.live
    }

    pub fn live_mut(&mut self) -> &mut [Particle] {
        &mut self.live
    }

    /// Hands out a blank record, reusing a retired one when available.
    pub fn acquire(&mut self) -> Particle {
        self.recycled.pop().unwrap_or_default()
    }

    pub fn push_live(&mut self, particle: Particle) {
        self.live.push(particle);
    }

    /// Returns a record to the pool, or drops it when the pool is full.
    pub fn recycle(&mut self, mut particle: Particle) {
        if self.recycled.len() < self.capacity {
            particle.scrub();
            self.recycled.push(particle);
        }
    }

    /// Moves every dead particle into `out`, preserving the relative order of
    /// both the survivors and the dead.
    pub fn drain_dead_into(&mut self, out: &mut Vec<Particle>) {
        let mut write = 0;
        for read in 0..self.live.len() {
            if self.live[read].is_dead() {
                continue;
            }
            if write != read {
                self.live.swap(write, read);
            }
            write += 1;
        }
        if write == self.live.len() {
            return;
        }
        // Dead particles now sit in `live[write..]` but not in spawn order.
        let mut dead: Vec<Particle> = self.live.drain(write..).collect();
        dead.sort_by_key(|particle| particle.id);
        out.extend(dead);
    }

    /// Retires every live particle.
    pub fn clear(&mut self) {
        let live = std::mem::take(&mut self.live);
        for particle in live {
            self.recycle(particle);
        }
    }
}

impl Default for ParticlePool {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_CAPACITY)
    }
}
