use std::collections::BTreeMap;

use tracing::debug;

use crate::checkpoint::SimulationCheckpoint;
use crate::{ParticleSimError, ParticleSystem, Result};

/// Most ticks [`FixedStepClock::advance`] will report for one wall-clock delta.
pub const MAX_STEPS_PER_ADVANCE: u32 = 8;

/// Frame counter for a fixed frame rate.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackClock {
    fps: f32,
    frame: u64,
}

impl PlaybackClock {
    pub fn new(fps: f32) -> Self {
        Self {
            fps: if fps.is_finite() && fps > 0.0 { fps } else { 30.0 },
            frame: 0,
        }
    }

    pub fn fps(&self) -> f32 {
        self.fps
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn reset(&mut self) {
        self.frame = 0;
    }

    pub fn advance(&mut self, frames: u64) {
        self.frame = self.frame.saturating_add(frames);
    }

    pub fn seek(&mut self, frame: u64) {
        self.frame = frame;
    }

    pub fn time_seconds(&self) -> f32 {
        self.seconds_at(self.frame)
    }

    pub fn seconds_at(&self, frame: u64) -> f32 {
        frame as f32 / self.fps
    }

    /// Frame shown at `seconds`; negative times clamp to frame 0.
    pub fn frame_at(&self, seconds: f32) -> u64 {
        (seconds.max(0.0) * self.fps).floor() as u64
    }
}

impl Default for PlaybackClock {
    fn default() -> Self {
        Self::new(30.0)
    }
}

/// Converts variable wall-clock deltas into whole simulation ticks.
#[derive(Debug, Clone, PartialEq)]
pub struct FixedStepClock {
    step_seconds: f32,
    accumulator: f32,
    max_steps: u32,
}

impl FixedStepClock {
    pub fn new(step_seconds: f32) -> Self {
        Self {
            step_seconds: step_seconds.max(f32::EPSILON),
            accumulator: 0.0,
            max_steps: MAX_STEPS_PER_ADVANCE,
        }
    }

    pub fn with_max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }

    pub fn step_seconds(&self) -> f32 {
        self.step_seconds
    }

    /// Fraction of a step left over, for render interpolation.
    pub fn alpha(&self) -> f32 {
        self.accumulator / self.step_seconds
    }

    pub fn reset(&mut self) {
        self.accumulator = 0.0;
    }

    /// Adds `delta_seconds` and returns how many ticks to run. Time beyond
    /// the step limit is dropped rather than carried into later frames.
    pub fn advance(&mut self, delta_seconds: f32) -> u32 {
        if !delta_seconds.is_finite() || delta_seconds <= 0.0 {
            return 0;
        }
        self.accumulator += delta_seconds;
        let mut steps = 0;
        while self.accumulator >= self.step_seconds && steps < self.max_steps {
            self.accumulator -= self.step_seconds;
            steps += 1;
        }
        if steps == self.max_steps && self.accumulator >= self.step_seconds {
            self.accumulator %= self.step_seconds;
        }
        steps
    }
}

/// Checkpoint cache that lets a host jump to any frame without replaying
/// from frame zero.
///
/// Checkpoints are kept at frame zero and every `interval` frames reached
/// while seeking. Any configuration change invalidates cached frames after
/// the change; call [`ScrubTimeline::invalidate_after`] when that happens.
#[derive(Debug, Clone)]
pub struct ScrubTimeline {
    interval: u64,
    checkpoints: BTreeMap<u64, SimulationCheckpoint>,
}

impl ScrubTimeline {
    pub fn new(interval: u64) -> Self {
        Self {
            interval: interval.max(1),
            checkpoints: BTreeMap::new(),
        }
    }

    pub fn interval(&self) -> u64 {
        self.interval
    }

    pub fn len(&self) -> usize {
        self.checkpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checkpoints.is_empty()
    }

    pub fn frames(&self) -> impl Iterator<Item = u64> + '_ {
        self.checkpoints.keys().copied()
    }

    pub fn checkpoint(&self, frame: u64) -> Option<&SimulationCheckpoint> {
        self.checkpoints.get(&frame)
    }

    /// Stores the system's current state under its frame number.
    pub fn capture(&mut self, system: &ParticleSystem) {
        self.checkpoints
            .insert(system.frame(), system.export_checkpoint());
    }

    pub fn clear(&mut self) {
        self.checkpoints.clear();
    }

    /// Drops checkpoints later than `frame`.
    pub fn invalidate_after(&mut self, frame: u64) {
        self.checkpoints.retain(|cached, _| *cached <= frame);
    }

    /// Brings `system` to `target` by restoring the closest checkpoint at or
    /// before it and stepping forward with `dt`. Stepping continues from the
    /// current state instead when that is closer.
    pub fn seek(&mut self, system: &mut ParticleSystem, target: u64, dt: f32) -> Result<()> {
        if !dt.is_finite() || dt < 0.0 {
            return Err(ParticleSimError::msg(format!("cannot seek with delta time {dt}")));
        }
        if system.frame() == 0 && !self.checkpoints.contains_key(&0) {
            self.capture(system);
        }

        let current = system.frame();
        let nearest = self
            .checkpoints
            .range(..=target)
            .next_back()
            .map(|(frame, _)| *frame);

        match nearest {
            Some(frame) if current <= target && current >= frame => {}
            Some(frame) => {
                if let Some(checkpoint) = self.checkpoints.get(&frame) {
                    system.restore(checkpoint)?;
                }
            }
            None if current <= target => {}
            None => {
                system.reset();
                self.capture(system);
            }
        }

        let start = system.frame();
        while system.frame() < target {
            system.step(dt);
            let frame = system.frame();
            if frame % self.interval == 0 && !self.checkpoints.contains_key(&frame) {
                self.capture(system);
            }
        }
        debug!(from = start, target, cached = self.checkpoints.len(), "seek complete");
        Ok(())
    }
}

impl Default for ScrubTimeline {
    fn default() -> Self {
        Self::new(30)
    }
}
