//! Emitter configuration and spawn-point resolution.
//!
//! An emitter is an immutable-per-tick description of where particles appear
//! and how they start moving. Shape parameters live on the [`EmitterShape`]
//! variant that needs them.

mod geometry;
mod provider;

use glam::Vec2;
use serde::{Deserialize, Serialize};

pub use geometry::{resolve_spawn_point, GeometryContext, SpawnPoint};
pub use provider::{
    EmissionPointCache, GeometryProviders, PixelBuffer, PixelProvider, SplineProvider,
    SplineSample,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EmitterConfig {
    pub id: String,
    pub enabled: bool,
    /// Normalized frame position.
    pub position: Vec2,
    /// Facing direction in degrees; 0 is +x, 90 is +y (screen down).
    pub direction: f32,
    /// Full spread cone in degrees, centred on the facing direction.
    pub spread: f32,
    /// Initial speed in pixels per tick.
    pub speed: f32,
    pub speed_variance: f32,
    /// Particle size in pixels.
    pub size: f32,
    pub size_variance: f32,
    /// Lifetime in ticks.
    pub lifetime: f32,
    pub lifetime_variance: f32,
    /// RGBA, each channel `0..=255`.
    pub color: [f32; 4],
    /// Particles per tick; fractional rates accumulate across ticks.
    pub emission_rate: f32,
    /// Particles released every `burst_interval` ticks in addition to the rate.
    pub burst_count: u32,
    /// Ticks between bursts; `0` disables periodic bursts.
    pub burst_interval: f32,
    pub shape: EmitterShape,
    pub sprite: Option<SpriteConfig>,
}

impl Default for EmitterConfig {
    fn default() -> Self {
        Self {
            id: "emitter".to_string(),
            enabled: true,
            position: Vec2::new(0.5, 0.5),
            direction: 270.0,
            spread: 30.0,
            speed: 330.0,
            speed_variance: 50.0,
            size: 8.0,
            size_variance: 2.0,
            lifetime: 60.0,
            lifetime_variance: 10.0,
            color: [255.0, 255.0, 255.0, 255.0],
            emission_rate: 10.0,
            burst_count: 0,
            burst_interval: 0.0,
            shape: EmitterShape::Point,
            sprite: None,
        }
    }
}

impl EmitterConfig {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn with_position(mut self, position: Vec2) -> Self {
        self.position = position;
        self
    }

    pub fn with_rate(mut self, emission_rate: f32) -> Self {
        self.emission_rate = emission_rate;
        self
    }

    pub fn with_shape(mut self, shape: EmitterShape) -> Self {
        self.shape = shape;
        self
    }

    /// Facing direction in radians.
    pub fn direction_radians(&self) -> f32 {
        self.direction.to_radians()
    }
}

/// Emission geometry, one variant per shape.
///
/// Extents are normalized frame units; angles are degrees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum EmitterShape {
    Point,
    /// Segment of length `width` centred on the emitter, perpendicular to
    /// its facing direction.
    Line { width: f32 },
    Circle {
        radius: f32,
        #[serde(default)]
        edge_only: bool,
    },
    Ring { inner_radius: f32, outer_radius: f32 },
    Box {
        width: f32,
        height: f32,
        #[serde(default)]
        edge_only: bool,
    },
    /// Sphere projected onto the frame plane; `edge_only` samples the surface.
    Sphere {
        radius: f32,
        #[serde(default)]
        edge_only: bool,
    },
    /// Sector of `length` with half-angle `angle`, opening along the facing direction.
    Cone { length: f32, angle: f32 },
    Spline(SplineEmission),
    DepthMap(PixelEmission),
    Mask(PixelEmission),
    Image(PixelEmission),
    DepthEdge(PixelEmission),
}

impl Default for EmitterShape {
    fn default() -> Self {
        Self::Point
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SplineEmitMode {
    Start,
    End,
    Random,
    /// Cycles through `uniform_slots` evenly spaced positions.
    Uniform,
    /// Walks a per-emitter cursor forward by `sequential_speed`, wrapping at 1.
    Sequential,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SplineEmission {
    pub layer_id: String,
    pub mode: SplineEmitMode,
    pub uniform_slots: u32,
    pub sequential_speed: f32,
    /// Perpendicular offset from the path, normalized units.
    pub offset: f32,
    /// Emit along the path tangent instead of the emitter direction.
    pub align_to_tangent: bool,
    /// With `align_to_tangent`, flip half of the emissions to the opposite way.
    pub bidirectional: bool,
}

impl Default for SplineEmission {
    fn default() -> Self {
        Self {
            layer_id: String::new(),
            mode: SplineEmitMode::Random,
            uniform_slots: 10,
            sequential_speed: 0.01,
            offset: 0.0,
            align_to_tangent: false,
            bidirectional: false,
        }
    }
}

/// Parameters for shapes backed by a pixel provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PixelEmission {
    pub layer_id: String,
    /// Lower acceptance bound in `[0, 1]` (depth band start, mask/luma cutoff,
    /// or minimum depth gradient for edges).
    pub threshold: f32,
    /// Upper acceptance bound; only the depth band uses it.
    pub max: f32,
    /// Pixel stride used when pre-sampling candidate points.
    pub sample_step: u32,
}

impl Default for PixelEmission {
    fn default() -> Self {
        Self {
            layer_id: String::new(),
            threshold: 0.5,
            max: 1.0,
            sample_step: 4,
        }
    }
}

/// Persistent per-emitter state for spline emission.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SplineCursor {
    pub position: f32,
    pub slot: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SpriteAnimation {
    Static,
    Loop,
    Once,
    /// Jumps to a random frame with `random_change_chance` per tick.
    Random,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SpriteConfig {
    pub frame_count: u32,
    pub animation: SpriteAnimation,
    /// Frames advanced per tick for `loop` and `once`.
    pub frame_rate: f32,
    pub random_change_chance: f32,
    pub random_start_frame: bool,
    pub rotation_enabled: bool,
    /// Degrees per tick.
    pub angular_velocity: f32,
    pub angular_velocity_variance: f32,
}

impl Default for SpriteConfig {
    fn default() -> Self {
        Self {
            frame_count: 1,
            animation: SpriteAnimation::Static,
            frame_rate: 0.5,
            random_change_chance: 0.1,
            random_start_frame: false,
            rotation_enabled: false,
            angular_velocity: 0.0,
            angular_velocity_variance: 0.0,
        }
    }
}

impl SpriteConfig {
    /// Sprite frame for a particle of the given age, for the deterministic
    /// animation modes. `Random` and `Static` keep `current`.
    pub fn frame_for_age(&self, age: f32, current: u32) -> u32 {
        if self.frame_count <= 1 {
            return 0;
        }
        let advanced = (age * self.frame_rate).max(0.0).floor() as u32;
        match self.animation {
            SpriteAnimation::Loop => advanced % self.frame_count,
            SpriteAnimation::Once => advanced.min(self.frame_count - 1),
            SpriteAnimation::Static | SpriteAnimation::Random => current,
        }
    }
}
