//! Deterministic particle simulation engine for the motion graphics compositor.
//!
//! Each module owns one subsystem (random source, noise, emitter geometry,
//! force fields, collision, sub-emitters, modulation, checkpoints) and
//! [`ParticleSystem`] ties them together into a tick-based simulation. The
//! same seed, configuration and delta-time sequence always reproduce the same
//! particle state, which is what makes timeline scrubbing through
//! [`ScrubTimeline`] possible.

pub mod checkpoint;
pub mod collision;
pub mod config;
pub mod drivers;
pub mod emitter;
pub mod error;
pub mod forces;
pub mod modulation;
pub mod noise;
pub mod particle;
pub mod random;
pub mod render;
pub mod subemitter;
pub mod system;
pub mod timeline;

pub use checkpoint::{ParticleRecord, SimulationCheckpoint};
pub use collision::{CollisionConfig, CollisionResponse, SpatialHash};
pub use config::{BoundaryMode, ParticleLayerConfig, SimulationConfig};
pub use drivers::{DriverMapping, DriverMatrix, DriverTarget, DriverUpdate};
pub use emitter::{
    EmitterConfig, EmitterShape, GeometryProviders, PixelBuffer, PixelEmission, SplineEmission,
    SplineEmitMode, SplineSample, SpriteAnimation, SpriteConfig,
};
pub use error::{ParticleSimError, Result};
pub use forces::{Attractor, Falloff, ForceFields, GravityWell, Turbulence, Vortex};
pub use modulation::{Easing, Modulation, ModulationTarget};
pub use noise::NoiseField;
pub use particle::{Particle, ParticlePool};
pub use random::SeededRandom;
pub use render::{Connection, ConnectionConfig, ParticleView, RenderSnapshot};
pub use subemitter::{SubEmitterConfig, SubEmitterTrigger};
pub use system::{ParticleSystem, TickStats};
pub use timeline::{FixedStepClock, PlaybackClock, ScrubTimeline};
