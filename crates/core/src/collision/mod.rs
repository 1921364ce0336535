use std::collections::HashMap;

use glam::Vec2;
use serde::{Deserialize, Serialize};

use crate::forces::DISTANCE_EPSILON;
use crate::Particle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CollisionResponse {
    #[default]
    Bounce,
    /// The larger particle takes the smaller one's area; the smaller dies.
    Absorb,
    /// Both particles die on contact.
    Explode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CollisionConfig {
    pub enabled: bool,
    pub particle_collision: bool,
    pub response: CollisionResponse,
    /// Fraction of the normal relative velocity kept by a bounce (1 = elastic).
    pub damping: f32,
    /// Scales the size-derived collision radius.
    pub radius_multiplier: f32,
    /// Planes in normalized frame space; `None` disables the plane.
    pub floor: Option<f32>,
    pub ceiling: Option<f32>,
    pub left_wall: Option<f32>,
    pub right_wall: Option<f32>,
    pub bounciness: f32,
    /// Fraction of tangential velocity removed on each environment contact.
    pub friction: f32,
    /// Spatial hash cell edge in normalized units.
    pub cell_size: f32,
}

impl Default for CollisionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            particle_collision: false,
            response: CollisionResponse::Bounce,
            damping: 0.8,
            radius_multiplier: 1.0,
            floor: None,
            ceiling: None,
            left_wall: None,
            right_wall: None,
            bounciness: 0.6,
            friction: 0.1,
            cell_size: 0.05,
        }
    }
}

impl CollisionConfig {
    fn has_environment(&self) -> bool {
        self.floor.is_some()
            || self.ceiling.is_some()
            || self.left_wall.is_some()
            || self.right_wall.is_some()
    }
}

/// Uniform grid over normalized positions. Buckets hold particle indices in
/// ascending order, and only lookups touch the map, so traversal order never
/// depends on hashing.
#[derive(Debug, Default)]
pub struct SpatialHash {
    cell_size: f32,
    buckets: HashMap<(i32, i32), Vec<usize>>,
}

const NEIGHBOUR_OFFSETS: [(i32, i32); 9] = [
    (-1, -1),
    (0, -1),
    (1, -1),
    (-1, 0),
    (0, 0),
    (1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
];

impl SpatialHash {
    pub fn new(cell_size: f32) -> Self {
        Self {
            cell_size,
            buckets: HashMap::new(),
        }
    }

    pub fn cell_of(&self, position: Vec2) -> (i32, i32) {
        let size = self.cell_size.max(DISTANCE_EPSILON);
        (
            (position.x / size).floor() as i32,
            (position.y / size).floor() as i32,
        )
    }

    /// Re-buckets `positions`; empty buckets keep their allocation.
    pub fn rebuild<I>(&mut self, cell_size: f32, positions: I)
    where
        I: IntoIterator<Item = (usize, Vec2)>,
    {
        self.cell_size = cell_size;
        for bucket in self.buckets.values_mut() {
            bucket.clear();
        }
        for (index, position) in positions {
            let cell = self.cell_of(position);
            self.buckets.entry(cell).or_default().push(index);
        }
    }

    /// Indices in the 3x3 block of cells around `cell`, cell by cell.
    pub fn neighbours(&self, cell: (i32, i32)) -> impl Iterator<Item = usize> + '_ {
        NEIGHBOUR_OFFSETS.iter().flat_map(move |(dx, dy)| {
            self.buckets
                .get(&(cell.0 + dx, cell.1 + dy))
                .map(|bucket| bucket.as_slice())
                .unwrap_or(&[])
                .iter()
                .copied()
        })
    }
}

/// Clamps particles against the configured planes. Returns the number of contacts.
pub fn resolve_environment(particles: &mut [Particle], config: &CollisionConfig) -> usize {
    if !config.enabled || !config.has_environment() {
        return 0;
    }
    let keep = 1.0 - config.friction.clamp(0.0, 1.0);
    let mut contacts = 0;
    for particle in particles.iter_mut().filter(|p| !p.is_dead()) {
        let mut hit = false;
        if let Some(floor) = config.floor {
            if particle.position.y > floor {
                particle.position.y = floor;
                if particle.velocity.y > 0.0 {
                    particle.velocity.y = -particle.velocity.y * config.bounciness;
                }
                particle.velocity.x *= keep;
                hit = true;
            }
        }
        if let Some(ceiling) = config.ceiling {
            if particle.position.y < ceiling {
                particle.position.y = ceiling;
                if particle.velocity.y < 0.0 {
                    particle.velocity.y = -particle.velocity.y * config.bounciness;
                }
                particle.velocity.x *= keep;
                hit = true;
            }
        }
        if let Some(left) = config.left_wall {
            if particle.position.x < left {
                particle.position.x = left;
                if particle.velocity.x < 0.0 {
                    particle.velocity.x = -particle.velocity.x * config.bounciness;
                }
                particle.velocity.y *= keep;
                hit = true;
            }
        }
        if let Some(right) = config.right_wall {
            if particle.position.x > right {
                particle.position.x = right;
                if particle.velocity.x > 0.0 {
                    particle.velocity.x = -particle.velocity.x * config.bounciness;
                }
                particle.velocity.y *= keep;
                hit = true;
            }
        }
        if hit {
            particle.collision_count += 1;
            contacts += 1;
        }
    }
    contacts
}

/// Detects and responds to particle-particle overlaps. Each unordered pair is
/// tested at most once, in ascending index order. Returns the number of
/// collisions handled.
pub fn resolve_particles(
    particles: &mut [Particle],
    config: &CollisionConfig,
    hash: &mut SpatialHash,
    unit_scale: f32,
) -> usize {
    if !config.enabled || !config.particle_collision || particles.len() < 2 {
        return 0;
    }

    hash.rebuild(
        config.cell_size,
        particles
            .iter()
            .enumerate()
            .filter(|(_, p)| !p.is_dead())
            .map(|(index, p)| (index, p.position)),
    );

    let radius_scale = 0.5 * config.radius_multiplier * unit_scale;
    let mut collisions = 0;
    let mut candidates = Vec::new();

    for i in 0..particles.len() {
        if particles[i].is_dead() {
            continue;
        }
        candidates.clear();
        let cell = hash.cell_of(particles[i].position);
        candidates.extend(hash.neighbours(cell).filter(|j| *j > i));
        candidates.sort_unstable();

        for &j in &candidates {
            let (a, b) = pair_mut(particles, i, j);
            if a.is_dead() {
                break;
            }
            if b.is_dead() {
                continue;
            }

            let reach = (a.size + b.size) * radius_scale;
            let delta = b.position - a.position;
            let distance_sq = delta.length_squared();
            if distance_sq >= reach * reach {
                continue;
            }

            collisions += 1;
            a.collision_count += 1;
            b.collision_count += 1;

            match config.response {
                CollisionResponse::Bounce => {
                    bounce(a, b, delta, distance_sq, reach, config.damping)
                }
                CollisionResponse::Absorb => absorb(a, b),
                CollisionResponse::Explode => {
                    a.kill();
                    b.kill();
                }
            }
        }
    }

    collisions
}

fn pair_mut(particles: &mut [Particle], i: usize, j: usize) -> (&mut Particle, &mut Particle) {
    debug_assert!(i < j);
    let (head, tail) = particles.split_at_mut(j);
    (&mut head[i], &mut tail[0])
}

fn bounce(
    a: &mut Particle,
    b: &mut Particle,
    delta: Vec2,
    distance_sq: f32,
    reach: f32,
    damping: f32,
) {
    let distance = distance_sq.sqrt();
    if distance < DISTANCE_EPSILON {
        return;
    }
    let normal = delta / distance;
    let approach = (a.velocity - b.velocity).dot(normal);
    if approach > 0.0 {
        let impulse = approach * (1.0 + damping) * 0.5;
        a.velocity -= normal * impulse;
        b.velocity += normal * impulse;
    }
    let push = normal * (reach - distance) * 0.5;
    a.position -= push;
    b.position += push;
}

fn absorb(a: &mut Particle, b: &mut Particle) {
    let (big, small) = if b.size > a.size { (b, a) } else { (a, b) };
    big.size = (big.size * big.size + small.size * small.size).sqrt();
    big.base_size = (big.base_size * big.base_size + small.base_size * small.base_size).sqrt();
    small.kill();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn particle(id: u64, x: f32, vx: f32, size: f32) -> Particle {
        Particle {
            id,
            position: Vec2::new(x, 0.5),
            velocity: Vec2::new(vx, 0.0),
            size,
            base_size: size,
            lifetime: 100.0,
            ..Particle::default()
        }
    }

    fn config(response: CollisionResponse) -> CollisionConfig {
        CollisionConfig {
            enabled: true,
            particle_collision: true,
            response,
            ..CollisionConfig::default()
        }
    }

    #[test]
    fn bounce_exchanges_equal_and_opposite_momentum() {
        let mut particles = vec![particle(0, 0.50, 0.01, 10.0), particle(1, 0.505, -0.02, 10.0)];
        let before: Vec<Vec2> = particles.iter().map(|p| p.velocity).collect();
        let mut hash = SpatialHash::default();

        let cfg = config(CollisionResponse::Bounce);
        let hits = resolve_particles(&mut particles, &cfg, &mut hash, 1.0 / 1920.0);
        assert_eq!(hits, 1);

        let delta_a = particles[0].velocity - before[0];
        let delta_b = particles[1].velocity - before[1];
        assert!((delta_a + delta_b).length() < 1e-7);
        assert!(delta_a.x < 0.0);
        assert!(particles[0].position.x < 0.50);
        assert!(particles[1].position.x > 0.505);
        assert_eq!(particles[0].collision_count, 1);
    }

    #[test]
    fn elastic_bounce_swaps_normal_velocity() {
        let mut particles = vec![particle(0, 0.50, 0.01, 10.0), particle(1, 0.505, -0.01, 10.0)];
        let mut cfg = config(CollisionResponse::Bounce);
        cfg.damping = 1.0;
        resolve_particles(&mut particles, &cfg, &mut SpatialHash::default(), 1.0 / 1920.0);
        assert!((particles[0].velocity.x + 0.01).abs() < 1e-7);
        assert!((particles[1].velocity.x - 0.01).abs() < 1e-7);
    }

    #[test]
    fn distant_particles_do_not_collide() {
        let mut particles = vec![particle(0, 0.1, 0.0, 10.0), particle(1, 0.9, 0.0, 10.0)];
        let hits = resolve_particles(
            &mut particles,
            &config(CollisionResponse::Explode),
            &mut SpatialHash::default(),
            1.0 / 1920.0,
        );
        assert_eq!(hits, 0);
        assert!(particles.iter().all(|p| !p.is_dead()));
    }

    #[test]
    fn absorb_grows_larger_and_kills_smaller() {
        let mut particles = vec![particle(0, 0.5, 0.0, 3.0), particle(1, 0.501, 0.0, 4.0)];
        resolve_particles(
            &mut particles,
            &config(CollisionResponse::Absorb),
            &mut SpatialHash::default(),
            1.0 / 1920.0,
        );
        assert!(particles[0].is_dead());
        assert!(!particles[1].is_dead());
        assert!((particles[1].size - 5.0).abs() < 1e-5);
    }

    #[test]
    fn explode_kills_both() {
        let mut particles = vec![particle(0, 0.5, 0.0, 8.0), particle(1, 0.501, 0.0, 8.0)];
        resolve_particles(
            &mut particles,
            &config(CollisionResponse::Explode),
            &mut SpatialHash::default(),
            1.0 / 1920.0,
        );
        assert!(particles.iter().all(Particle::is_dead));
    }

    #[test]
    fn explode_kills_particles_with_huge_lifetimes() {
        let mut particles = vec![particle(0, 0.5, 0.0, 8.0), particle(1, 0.501, 0.0, 8.0)];
        for p in &mut particles {
            p.lifetime = 1.0e8;
            p.age = 12.0;
        }
        let hits = resolve_particles(
            &mut particles,
            &config(CollisionResponse::Explode),
            &mut SpatialHash::default(),
            1.0 / 1920.0,
        );
        assert_eq!(hits, 1);
        assert!(particles.iter().all(Particle::is_dead));
    }

    #[test]
    fn partners_are_visited_in_index_order_across_cells() {
        let at = |id: u64, x: f32, y: f32, size: f32| Particle {
            position: Vec2::new(x, y),
            ..particle(id, 0.0, 0.0, size)
        };
        // Particle 2 sits in the row above particle 0, so its cell is
        // enumerated before the cell of particle 1.
        let mut particles = vec![
            at(0, 0.505, 0.505, 2.0),
            at(1, 0.515, 0.505, 3.0),
            at(2, 0.505, 0.495, 3.0),
        ];
        let mut cfg = config(CollisionResponse::Absorb);
        cfg.cell_size = 0.01;
        resolve_particles(&mut particles, &cfg, &mut SpatialHash::default(), 1.0);

        assert!(particles[0].is_dead());
        assert!(!particles[1].is_dead());
        assert!(particles[2].is_dead());
    }

    #[test]
    fn each_pair_is_tested_once() {
        // Three particles stacked in one cell: three unordered pairs.
        let mut particles = vec![
            particle(0, 0.500, 0.0, 40.0),
            particle(1, 0.501, 0.0, 40.0),
            particle(2, 0.502, 0.0, 40.0),
        ];
        let hits = resolve_particles(
            &mut particles,
            &config(CollisionResponse::Bounce),
            &mut SpatialHash::default(),
            1.0 / 1920.0,
        );
        assert_eq!(hits, 3);
        assert_eq!(particles[1].collision_count, 2);
    }

    #[test]
    fn disabled_config_is_a_no_op() {
        let mut particles = vec![particle(0, 0.5, 0.0, 8.0), particle(1, 0.5, 0.0, 8.0)];
        let cfg = CollisionConfig::default();
        let mut hash = SpatialHash::default();
        assert_eq!(resolve_particles(&mut particles, &cfg, &mut hash, 1.0), 0);
        assert_eq!(resolve_environment(&mut particles, &cfg), 0);
    }

    #[test]
    fn floor_reflects_and_applies_friction() {
        let mut particles = vec![Particle {
            position: Vec2::new(0.5, 0.95),
            velocity: Vec2::new(0.02, 0.05),
            lifetime: 10.0,
            ..Particle::default()
        }];
        let cfg = CollisionConfig {
            enabled: true,
            floor: Some(0.9),
            bounciness: 0.5,
            friction: 0.25,
            ..CollisionConfig::default()
        };
        assert_eq!(resolve_environment(&mut particles, &cfg), 1);
        let p = &particles[0];
        assert_eq!(p.position.y, 0.9);
        assert!((p.velocity.y + 0.025).abs() < 1e-7);
        assert!((p.velocity.x - 0.015).abs() < 1e-7);
    }

    #[test]
    fn walls_clamp_horizontally() {
        let mut particles = vec![Particle {
            position: Vec2::new(-0.1, 0.5),
            velocity: Vec2::new(-0.04, 0.0),
            lifetime: 10.0,
            ..Particle::default()
        }];
        let cfg = CollisionConfig {
            enabled: true,
            left_wall: Some(0.0),
            right_wall: Some(1.0),
            bounciness: 1.0,
            ..CollisionConfig::default()
        };
        resolve_environment(&mut particles, &cfg);
        assert_eq!(particles[0].position.x, 0.0);
        assert!((particles[0].velocity.x - 0.04).abs() < 1e-7);
    }

    #[test]
    fn hash_neighbourhood_covers_adjacent_cells() {
        let mut hash = SpatialHash::new(0.1);
        hash.rebuild(
            0.1,
            vec![
                (0, Vec2::new(0.05, 0.05)),
                (1, Vec2::new(0.15, 0.15)),
                (2, Vec2::new(0.35, 0.05)),
            ],
        );
        let found: Vec<usize> = hash.neighbours(hash.cell_of(Vec2::new(0.05, 0.05))).collect();
        assert_eq!(found, vec![0, 1]);
    }
}
