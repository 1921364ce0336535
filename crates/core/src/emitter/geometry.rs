use std::collections::BTreeMap;
use std::f32::consts::PI;

use glam::Vec2;

use super::provider::{collect_points, CacheKey, PixelKind};
use super::{
    EmissionPointCache, EmitterConfig, EmitterShape, GeometryProviders, PixelEmission,
    SplineCursor, SplineEmission, SplineEmitMode,
};
use crate::SeededRandom;

const SPHERE_REJECTION_ATTEMPTS: usize = 64;
const TANGENT_EPSILON: f32 = 1e-6;

/// Where a new particle appears, plus an optional emission direction (in
/// radians) implied by the geometry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpawnPoint {
    pub position: Vec2,
    pub direction: Option<f32>,
}

impl SpawnPoint {
    fn at(position: Vec2) -> Self {
        Self {
            position,
            direction: None,
        }
    }
}

/// Mutable state and collaborators the resolver needs beyond the emitter.
pub struct GeometryContext<'a> {
    pub providers: &'a GeometryProviders,
    pub cache: &'a mut EmissionPointCache,
    pub cursors: &'a mut BTreeMap<String, SplineCursor>,
    pub frame: u64,
}

/// Computes a spawn point for `emitter`.
///
/// Every random draw comes from `rng` in a fixed order per shape; reordering
/// them changes simulation output.
pub fn resolve_spawn_point(
    emitter: &EmitterConfig,
    rng: &mut SeededRandom,
    ctx: &mut GeometryContext<'_>,
) -> SpawnPoint {
    let center = emitter.position;
    match &emitter.shape {
        EmitterShape::Point => SpawnPoint::at(center),
        EmitterShape::Line { width } => {
            let facing = emitter.direction_radians();
            let normal = Vec2::new(-facing.sin(), facing.cos());
            let offset = rng.range(-0.5, 0.5) * width;
            SpawnPoint::at(center + normal * offset)
        }
        EmitterShape::Circle { radius, edge_only } => {
            let angle = rng.angle();
            let distance = if *edge_only {
                *radius
            } else {
                radius * rng.next().sqrt()
            };
            SpawnPoint::at(center + Vec2::from_angle(angle) * distance)
        }
        EmitterShape::Ring {
            inner_radius,
            outer_radius,
        } => {
            let angle = rng.angle();
            let inner_sq = inner_radius * inner_radius;
            let outer_sq = outer_radius * outer_radius;
            let distance = (rng.next() * (outer_sq - inner_sq) + inner_sq).sqrt();
            SpawnPoint::at(center + Vec2::from_angle(angle) * distance)
        }
        EmitterShape::Box {
            width,
            height,
            edge_only,
        } => {
            if *edge_only {
                SpawnPoint::at(center + box_perimeter_point(*width, *height, rng.next()))
            } else {
                let x = rng.range(-0.5, 0.5) * width;
                let y = rng.range(-0.5, 0.5) * height;
                SpawnPoint::at(center + Vec2::new(x, y))
            }
        }
        EmitterShape::Sphere { radius, edge_only } => {
            let local = if *edge_only {
                let theta = rng.angle();
                let phi = (2.0 * rng.next() - 1.0).clamp(-1.0, 1.0).acos();
                Vec2::new(phi.sin() * theta.cos(), phi.sin() * theta.sin())
            } else {
                sample_unit_ball(rng)
            };
            SpawnPoint::at(center + local * *radius)
        }
        EmitterShape::Cone { length, angle } => {
            let facing = emitter.direction_radians();
            let half = angle.to_radians();
            let distance = rng.next() * length;
            let sweep = rng.range(-half, half);
            let local = Vec2::from_angle(sweep) * distance;
            let rotated = Vec2::from_angle(facing).rotate(local);
            SpawnPoint {
                position: center + rotated,
                direction: Some(facing + sweep),
            }
        }
        EmitterShape::Spline(spline) => resolve_spline(emitter, spline, rng, ctx),
        EmitterShape::DepthMap(params) => {
            resolve_pixels(emitter, PixelKind::DepthMap, params, rng, ctx)
        }
        EmitterShape::Mask(params) => resolve_pixels(emitter, PixelKind::Mask, params, rng, ctx),
        EmitterShape::Image(params) => resolve_pixels(emitter, PixelKind::Image, params, rng, ctx),
        EmitterShape::DepthEdge(params) => {
            resolve_pixels(emitter, PixelKind::DepthEdge, params, rng, ctx)
        }
    }
}

/// Point at fraction `u` of the way around a `width` x `height` rectangle,
/// walking top, right, bottom, then left edge.
fn box_perimeter_point(width: f32, height: f32, u: f32) -> Vec2 {
    let perimeter = 2.0 * (width + height);
    let mut d = u * perimeter;
    let (hw, hh) = (width * 0.5, height * 0.5);
    if d < width {
        return Vec2::new(-hw + d, -hh);
    }
    d -= width;
    if d < height {
        return Vec2::new(hw, -hh + d);
    }
    d -= height;
    if d < width {
        return Vec2::new(hw - d, hh);
    }
    d -= width;
    Vec2::new(-hw, (hh - d).max(-hh))
}

fn sample_unit_ball(rng: &mut SeededRandom) -> Vec2 {
    for _ in 0..SPHERE_REJECTION_ATTEMPTS {
        let x = rng.range(-1.0, 1.0);
        let y = rng.range(-1.0, 1.0);
        let z = rng.range(-1.0, 1.0);
        if x * x + y * y + z * z <= 1.0 {
            return Vec2::new(x, y);
        }
    }
    Vec2::ZERO
}

fn resolve_spline(
    emitter: &EmitterConfig,
    spline: &SplineEmission,
    rng: &mut SeededRandom,
    ctx: &mut GeometryContext<'_>,
) -> SpawnPoint {
    let providers = ctx.providers;
    let Some(provider) = providers.spline.as_deref() else {
        return SpawnPoint::at(emitter.position);
    };

    let t = match spline.mode {
        SplineEmitMode::Start => 0.0,
        SplineEmitMode::End => 1.0,
        SplineEmitMode::Random => rng.next(),
        SplineEmitMode::Uniform => {
            let slots = spline.uniform_slots.max(1);
            let cursor = ctx.cursors.entry(emitter.id.clone()).or_default();
            let slot = cursor.slot % slots;
            cursor.slot = (slot + 1) % slots;
            if slots == 1 {
                0.0
            } else {
                slot as f32 / (slots - 1) as f32
            }
        }
        SplineEmitMode::Sequential => {
            let cursor = ctx.cursors.entry(emitter.id.clone()).or_default();
            let t = cursor.position;
            let mut next = cursor.position + spline.sequential_speed;
            if next >= 1.0 {
                next -= next.floor();
            }
            cursor.position = next;
            t
        }
    };

    let Some(sample) = provider.sample(&spline.layer_id, t, ctx.frame) else {
        return SpawnPoint::at(emitter.position);
    };

    let tangent = if sample.tangent.length_squared() > TANGENT_EPSILON {
        sample.tangent.normalize()
    } else {
        Vec2::X
    };
    let normal = tangent.perp();
    let position = sample.point + normal * spline.offset;

    let direction = if spline.align_to_tangent {
        let mut angle = tangent.y.atan2(tangent.x);
        if spline.bidirectional && rng.bool(0.5) {
            angle += PI;
        }
        Some(angle)
    } else {
        None
    };

    SpawnPoint {
        position,
        direction,
    }
}

fn resolve_pixels(
    emitter: &EmitterConfig,
    kind: PixelKind,
    params: &PixelEmission,
    rng: &mut SeededRandom,
    ctx: &mut GeometryContext<'_>,
) -> SpawnPoint {
    let providers = ctx.providers;
    let provider = match kind {
        PixelKind::DepthMap | PixelKind::DepthEdge => providers.depth.as_deref(),
        PixelKind::Mask | PixelKind::Image => providers.mask.as_deref(),
    };
    let Some(provider) = provider else {
        return SpawnPoint::at(emitter.position);
    };

    let key = CacheKey {
        kind,
        layer_id: params.layer_id.clone(),
        threshold_bits: params.threshold.to_bits(),
        max_bits: params.max.to_bits(),
        sample_step: params.sample_step,
    };
    let frame = ctx.frame;
    let points = ctx.cache.get_or_build(key, || {
        provider
            .sample(&params.layer_id, frame)
            .map(|buffer| {
                collect_points(kind, &buffer, params.threshold, params.max, params.sample_step)
            })
            .unwrap_or_default()
    });

    if points.is_empty() {
        return SpawnPoint::at(emitter.position);
    }
    let index = rng.int(0, points.len() as i32 - 1) as usize;
    SpawnPoint::at(points[index.min(points.len() - 1)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emitter::{PixelBuffer, SplineSample};

    struct Harness {
        providers: GeometryProviders,
        cache: EmissionPointCache,
        cursors: BTreeMap<String, SplineCursor>,
    }

    impl Harness {
        fn new(providers: GeometryProviders) -> Self {
            Self {
                providers,
                cache: EmissionPointCache::new(),
                cursors: BTreeMap::new(),
            }
        }

        fn resolve(&mut self, emitter: &EmitterConfig, rng: &mut SeededRandom) -> SpawnPoint {
            let mut ctx = GeometryContext {
                providers: &self.providers,
                cache: &mut self.cache,
                cursors: &mut self.cursors,
                frame: 0,
            };
            resolve_spawn_point(emitter, rng, &mut ctx)
        }
    }

    fn emitter(shape: EmitterShape) -> EmitterConfig {
        EmitterConfig::new("e").with_shape(shape)
    }

    fn horizontal_line(_layer: &str, t: f32, _frame: u64) -> Option<SplineSample> {
        Some(SplineSample {
            point: Vec2::new(t, 0.5),
            tangent: Vec2::X,
            length: 1.0,
        })
    }

    #[test]
    fn point_is_verbatim() {
        let mut harness = Harness::new(GeometryProviders::new());
        let mut rng = SeededRandom::new(1);
        let spawn = harness.resolve(&emitter(EmitterShape::Point), &mut rng);
        assert_eq!(spawn.position, Vec2::new(0.5, 0.5));
        assert_eq!(spawn.direction, None);
    }

    #[test]
    fn filled_circle_samples_stay_inside_radius() {
        let mut harness = Harness::new(GeometryProviders::new());
        let mut rng = SeededRandom::new(12_345);
        let e = emitter(EmitterShape::Circle {
            radius: 0.2,
            edge_only: false,
        });
        for _ in 0..10_000 {
            let spawn = harness.resolve(&e, &mut rng);
            assert!(spawn.position.distance(e.position) <= 0.2 + 1e-6);
        }
    }

    #[test]
    fn circle_edge_lies_on_radius() {
        let mut harness = Harness::new(GeometryProviders::new());
        let mut rng = SeededRandom::new(4);
        let e = emitter(EmitterShape::Circle {
            radius: 0.25,
            edge_only: true,
        });
        for _ in 0..1_000 {
            let d = harness.resolve(&e, &mut rng).position.distance(e.position);
            assert!((d - 0.25).abs() < 1e-4);
        }
    }

    #[test]
    fn ring_samples_stay_between_radii() {
        let mut harness = Harness::new(GeometryProviders::new());
        let mut rng = SeededRandom::new(12_345);
        let e = emitter(EmitterShape::Ring {
            inner_radius: 0.1,
            outer_radius: 0.3,
        });
        for _ in 0..10_000 {
            let d = harness.resolve(&e, &mut rng).position.distance(e.position);
            assert!(d >= 0.1 - 1e-5 && d <= 0.3 + 1e-5, "distance {d}");
        }
    }

    #[test]
    fn box_edge_samples_touch_the_perimeter() {
        let mut harness = Harness::new(GeometryProviders::new());
        let mut rng = SeededRandom::new(9);
        let e = emitter(EmitterShape::Box {
            width: 0.4,
            height: 0.2,
            edge_only: true,
        });
        for _ in 0..2_000 {
            let local = harness.resolve(&e, &mut rng).position - e.position;
            let on_vertical = (local.x.abs() - 0.2).abs() < 1e-4;
            let on_horizontal = (local.y.abs() - 0.1).abs() < 1e-4;
            assert!(on_vertical || on_horizontal, "{local:?}");
            assert!(local.x.abs() <= 0.2 + 1e-4 && local.y.abs() <= 0.1 + 1e-4);
        }
    }

    #[test]
    fn filled_box_stays_inside() {
        let mut harness = Harness::new(GeometryProviders::new());
        let mut rng = SeededRandom::new(10);
        let e = emitter(EmitterShape::Box {
            width: 0.4,
            height: 0.2,
            edge_only: false,
        });
        for _ in 0..2_000 {
            let local = harness.resolve(&e, &mut rng).position - e.position;
            assert!(local.x.abs() <= 0.2 && local.y.abs() <= 0.1);
        }
    }

    #[test]
    fn sphere_projection_stays_inside_radius() {
        let mut harness = Harness::new(GeometryProviders::new());
        let mut rng = SeededRandom::new(21);
        for edge_only in [false, true] {
            let e = emitter(EmitterShape::Sphere {
                radius: 0.1,
                edge_only,
            });
            for _ in 0..2_000 {
                let d = harness.resolve(&e, &mut rng).position.distance(e.position);
                assert!(d <= 0.1 + 1e-5);
            }
        }
    }

    #[test]
    fn line_is_perpendicular_to_facing() {
        let mut harness = Harness::new(GeometryProviders::new());
        let mut rng = SeededRandom::new(2);
        let mut e = emitter(EmitterShape::Line { width: 0.5 });
        e.direction = 0.0;
        for _ in 0..500 {
            let local = harness.resolve(&e, &mut rng).position - e.position;
            assert!(local.x.abs() < 1e-5);
            assert!(local.y.abs() <= 0.25);
        }
    }

    #[test]
    fn cone_opens_along_facing_direction() {
        let mut harness = Harness::new(GeometryProviders::new());
        let mut rng = SeededRandom::new(6);
        let mut e = emitter(EmitterShape::Cone {
            length: 0.2,
            angle: 20.0,
        });
        e.direction = 0.0;
        for _ in 0..1_000 {
            let spawn = harness.resolve(&e, &mut rng);
            let local = spawn.position - e.position;
            assert!(local.x >= -1e-6);
            assert!(local.length() <= 0.2 + 1e-5);
            let direction = spawn.direction.unwrap();
            assert!(direction.abs() <= 20f32.to_radians() + 1e-5);
        }
    }

    #[test]
    fn spline_without_provider_falls_back_to_position() {
        let mut harness = Harness::new(GeometryProviders::new());
        let mut rng = SeededRandom::new(3);
        let e = emitter(EmitterShape::Spline(SplineEmission::default()));
        let spawn = harness.resolve(&e, &mut rng);
        assert_eq!(spawn.position, e.position);
        assert_eq!(spawn.direction, None);
    }

    #[test]
    fn sequential_spline_cursor_advances_and_wraps() {
        let mut harness = Harness::new(GeometryProviders::new().with_spline(horizontal_line));
        let mut rng = SeededRandom::new(3);
        let e = emitter(EmitterShape::Spline(SplineEmission {
            mode: SplineEmitMode::Sequential,
            sequential_speed: 0.4,
            ..SplineEmission::default()
        }));

        let xs: Vec<f32> = (0..4).map(|_| harness.resolve(&e, &mut rng).position.x).collect();
        assert!((xs[0] - 0.0).abs() < 1e-6);
        assert!((xs[1] - 0.4).abs() < 1e-6);
        assert!((xs[2] - 0.8).abs() < 1e-6);
        assert!((xs[3] - 0.2).abs() < 1e-5);
        assert!(harness.cursors.contains_key("e"));
    }

    #[test]
    fn uniform_spline_cycles_slots() {
        let mut harness = Harness::new(GeometryProviders::new().with_spline(horizontal_line));
        let mut rng = SeededRandom::new(3);
        let e = emitter(EmitterShape::Spline(SplineEmission {
            mode: SplineEmitMode::Uniform,
            uniform_slots: 3,
            ..SplineEmission::default()
        }));
        let xs: Vec<f32> = (0..4).map(|_| harness.resolve(&e, &mut rng).position.x).collect();
        assert_eq!(xs, vec![0.0, 0.5, 1.0, 0.0]);
    }

    #[test]
    fn spline_offset_and_tangent_direction() {
        let mut harness = Harness::new(GeometryProviders::new().with_spline(horizontal_line));
        let mut rng = SeededRandom::new(3);
        let e = emitter(EmitterShape::Spline(SplineEmission {
            mode: SplineEmitMode::Start,
            offset: 0.1,
            align_to_tangent: true,
            ..SplineEmission::default()
        }));
        let spawn = harness.resolve(&e, &mut rng);
        assert!((spawn.position.y - 0.6).abs() < 1e-6);
        assert_eq!(spawn.direction, Some(0.0));
    }

    #[test]
    fn bidirectional_spline_flips_some_emissions() {
        let mut harness = Harness::new(GeometryProviders::new().with_spline(horizontal_line));
        let mut rng = SeededRandom::new(8);
        let e = emitter(EmitterShape::Spline(SplineEmission {
            align_to_tangent: true,
            bidirectional: true,
            ..SplineEmission::default()
        }));
        let flipped = (0..200)
            .filter(|_| harness.resolve(&e, &mut rng).direction.unwrap() > 1.0)
            .count();
        assert!(flipped > 50 && flipped < 150);
    }

    #[test]
    fn mask_emission_uses_cached_points() {
        let mask = |_layer: &str, _frame: u64| {
            let mut data = vec![0u8; 4 * 4];
            data[0] = 255;
            PixelBuffer::new(4, 4, 1, data).ok()
        };
        let mut harness = Harness::new(GeometryProviders::new().with_mask(mask));
        let mut rng = SeededRandom::new(1);
        let e = emitter(EmitterShape::Mask(PixelEmission {
            layer_id: "matte".to_string(),
            sample_step: 1,
            ..PixelEmission::default()
        }));
        for _ in 0..10 {
            let spawn = harness.resolve(&e, &mut rng);
            assert_eq!(spawn.position, Vec2::new(0.125, 0.125));
        }
        assert_eq!(harness.cache.len(), 1);
    }

    #[test]
    fn depth_shape_without_provider_falls_back() {
        let mut harness = Harness::new(GeometryProviders::new());
        let mut rng = SeededRandom::new(1);
        let e = emitter(EmitterShape::DepthMap(PixelEmission::default()));
        assert_eq!(harness.resolve(&e, &mut rng).position, e.position);
    }

    #[test]
    fn same_seed_same_samples() {
        let e = emitter(EmitterShape::Ring {
            inner_radius: 0.05,
            outer_radius: 0.2,
        });
        let mut a = Harness::new(GeometryProviders::new());
        let mut b = Harness::new(GeometryProviders::new());
        let mut rng_a = SeededRandom::new(77);
        let mut rng_b = SeededRandom::new(77);
        for _ in 0..100 {
            assert_eq!(a.resolve(&e, &mut rng_a), b.resolve(&e, &mut rng_b));
        }
    }
}
