use std::collections::HashMap;

use glam::Vec2;

use crate::{ParticleSimError, Result};

/// Point on an external path at parametric position `t`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplineSample {
    /// Normalized frame position.
    pub point: Vec2,
    pub tangent: Vec2,
    /// Total path length, normalized units.
    pub length: f32,
}

/// Synchronous path query supplied by the host.
pub trait SplineProvider: Send + Sync {
    fn sample(&self, layer_id: &str, t: f32, frame: u64) -> Option<SplineSample>;
}

impl<F> SplineProvider for F
where
    F: Fn(&str, f32, u64) -> Option<SplineSample> + Send + Sync,
{
    fn sample(&self, layer_id: &str, t: f32, frame: u64) -> Option<SplineSample> {
        self(layer_id, t, frame)
    }
}

/// Synchronous depth or mask buffer query supplied by the host.
pub trait PixelProvider: Send + Sync {
    fn sample(&self, layer_id: &str, frame: u64) -> Option<PixelBuffer>;
}

impl<F> PixelProvider for F
where
    F: Fn(&str, u64) -> Option<PixelBuffer> + Send + Sync,
{
    fn sample(&self, layer_id: &str, frame: u64) -> Option<PixelBuffer> {
        self(layer_id, frame)
    }
}

/// Row-major 8-bit pixel data with one (grey) or four (RGBA) channels.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    channels: u8,
    data: Vec<u8>,
}

impl PixelBuffer {
    pub fn new(width: u32, height: u32, channels: u8, data: Vec<u8>) -> Result<Self> {
        if channels != 1 && channels != 4 {
            return Err(ParticleSimError::msg(format!(
                "pixel buffers need 1 or 4 channels, got {channels}"
            )));
        }
        let expected = width as usize * height as usize * channels as usize;
        if data.len() != expected {
            return Err(ParticleSimError::msg(format!(
                "pixel buffer of {width}x{height}x{channels} needs {expected} bytes, got {}",
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            channels,
            data,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    fn channel(&self, x: u32, y: u32, channel: u8) -> f32 {
        let channel = channel.min(self.channels - 1) as usize;
        let index = (y as usize * self.width as usize + x as usize) * self.channels as usize;
        self.data[index + channel] as f32 / 255.0
    }

    /// First channel; depth maps store depth there.
    pub fn value(&self, x: u32, y: u32) -> f32 {
        self.channel(x, y, 0)
    }

    /// Alpha for RGBA buffers, the grey value otherwise.
    pub fn alpha(&self, x: u32, y: u32) -> f32 {
        self.channel(x, y, 3)
    }

    /// Rec. 709 luma.
    pub fn luminance(&self, x: u32, y: u32) -> f32 {
        if self.channels == 1 {
            return self.value(x, y);
        }
        0.2126 * self.channel(x, y, 0)
            + 0.7152 * self.channel(x, y, 1)
            + 0.0722 * self.channel(x, y, 2)
    }

    /// Pixel centre in normalized frame coordinates.
    pub fn normalized(&self, x: u32, y: u32) -> Vec2 {
        Vec2::new(
            (x as f32 + 0.5) / self.width.max(1) as f32,
            (y as f32 + 0.5) / self.height.max(1) as f32,
        )
    }
}

/// External collaborators consulted by the geometry resolver. Any of them
/// may be absent; shapes that need a missing provider fall back to the
/// emitter's own position.
#[derive(Default)]
pub struct GeometryProviders {
    pub spline: Option<Box<dyn SplineProvider>>,
    pub depth: Option<Box<dyn PixelProvider>>,
    pub mask: Option<Box<dyn PixelProvider>>,
}

impl GeometryProviders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_spline(mut self, provider: impl SplineProvider + 'static) -> Self {
        self.spline = Some(Box::new(provider));
        self
    }

    pub fn with_depth(mut self, provider: impl PixelProvider + 'static) -> Self {
        self.depth = Some(Box::new(provider));
        self
    }

    pub fn with_mask(mut self, provider: impl PixelProvider + 'static) -> Self {
        self.mask = Some(Box::new(provider));
        self
    }
}

impl std::fmt::Debug for GeometryProviders {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeometryProviders")
            .field("spline", &self.spline.is_some())
            .field("depth", &self.depth.is_some())
            .field("mask", &self.mask.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum PixelKind {
    DepthMap,
    Mask,
    Image,
    DepthEdge,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct CacheKey {
    pub kind: PixelKind,
    pub layer_id: String,
    pub threshold_bits: u32,
    pub max_bits: u32,
    pub sample_step: u32,
}

/// Pre-sampled emission points for pixel-backed shapes, keyed by source and
/// sampling parameters. Entries stay valid until explicitly invalidated.
#[derive(Debug, Default)]
pub struct EmissionPointCache {
    points: HashMap<CacheKey, Vec<Vec2>>,
}

impl EmissionPointCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub(crate) fn get_or_build<F>(&mut self, key: CacheKey, build: F) -> &[Vec2]
    where
        F: FnOnce() -> Vec<Vec2>,
    {
        self.points.entry(key).or_insert_with(build)
    }

    /// Drops cached points for one layer, or for every layer with `None`.
    pub fn invalidate(&mut self, layer_id: Option<&str>) {
        match layer_id {
            Some(layer) => self.points.retain(|key, _| key.layer_id != layer),
            None => self.points.clear(),
        }
    }
}

pub(crate) fn collect_points(
    kind: PixelKind,
    buffer: &PixelBuffer,
    threshold: f32,
    max: f32,
    sample_step: u32,
) -> Vec<Vec2> {
    let step = sample_step.max(1) as usize;
    let mut points = Vec::new();
    for y in (0..buffer.height()).step_by(step) {
        for x in (0..buffer.width()).step_by(step) {
            let accepted = match kind {
                PixelKind::DepthMap => {
                    let depth = buffer.value(x, y);
                    depth >= threshold && depth <= max
                }
                PixelKind::Mask => buffer.alpha(x, y) >= threshold,
                PixelKind::Image => buffer.luminance(x, y) >= threshold,
                PixelKind::DepthEdge => depth_gradient(buffer, x, y) >= threshold,
            };
            if accepted {
                points.push(buffer.normalized(x, y));
            }
        }
    }
    points
}

fn depth_gradient(buffer: &PixelBuffer, x: u32, y: u32) -> f32 {
    let here = buffer.value(x, y);
    let right = if x + 1 < buffer.width() {
        (buffer.value(x + 1, y) - here).abs()
    } else {
        0.0
    };
    let below = if y + 1 < buffer.height() {
        (buffer.value(x, y + 1) - here).abs()
    } else {
        0.0
    };
    right.max(below)
}
