use std::f32::consts::{PI, TAU};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::forces::DISTANCE_EPSILON;
use crate::subemitter::ANY_EMITTER;
use crate::{Particle, ParticleSimError};

/// Named easing curves mapping `[0, 1]` onto (roughly) `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Easing {
    #[default]
    Linear,
    EaseInQuad,
    EaseOutQuad,
    EaseInOutQuad,
    EaseInCubic,
    EaseOutCubic,
    EaseInOutCubic,
    EaseInSine,
    EaseOutSine,
    EaseInOutSine,
    EaseInExpo,
    EaseOutExpo,
    EaseInOutExpo,
    EaseInBack,
    EaseOutBack,
    EaseOutElastic,
    EaseOutBounce,
}

impl Easing {
    pub fn apply(self, t: f32) -> f32 {
        let t = t.clamp(0.0, 1.0);
        match self {
            Easing::Linear => t,
            Easing::EaseInQuad => t * t,
            Easing::EaseOutQuad => 1.0 - (1.0 - t) * (1.0 - t),
            Easing::EaseInOutQuad => {
                if t < 0.5 {
                    2.0 * t * t
                } else {
                    1.0 - (-2.0 * t + 2.0).powi(2) / 2.0
                }
            }
            Easing::EaseInCubic => t * t * t,
            Easing::EaseOutCubic => 1.0 - (1.0 - t).powi(3),
            Easing::EaseInOutCubic => {
                if t < 0.5 {
                    4.0 * t * t * t
                } else {
                    1.0 - (-2.0 * t + 2.0).powi(3) / 2.0
                }
            }
            Easing::EaseInSine => 1.0 - (t * PI / 2.0).cos(),
            Easing::EaseOutSine => (t * PI / 2.0).sin(),
            Easing::EaseInOutSine => -((PI * t).cos() - 1.0) / 2.0,
            Easing::EaseInExpo => {
                if t == 0.0 {
                    0.0
                } else {
                    2f32.powf(10.0 * t - 10.0)
                }
            }
            Easing::EaseOutExpo => {
                if t == 1.0 {
                    1.0
                } else {
                    1.0 - 2f32.powf(-10.0 * t)
                }
            }
            Easing::EaseInOutExpo => {
                if t == 0.0 || t == 1.0 {
                    t
                } else if t < 0.5 {
                    2f32.powf(20.0 * t - 10.0) / 2.0
                } else {
                    (2.0 - 2f32.powf(-20.0 * t + 10.0)) / 2.0
                }
            }
            Easing::EaseInBack => {
                const C1: f32 = 1.70158;
                const C3: f32 = C1 + 1.0;
                C3 * t * t * t - C1 * t * t
            }
            Easing::EaseOutBack => {
                const C1: f32 = 1.70158;
                const C3: f32 = C1 + 1.0;
                1.0 + C3 * (t - 1.0).powi(3) + C1 * (t - 1.0).powi(2)
            }
            Easing::EaseOutElastic => {
                if t == 0.0 || t == 1.0 {
                    t
                } else {
                    2f32.powf(-10.0 * t) * ((t * 10.0 - 0.75) * (TAU / 3.0)).sin() + 1.0
                }
            }
            Easing::EaseOutBounce => ease_out_bounce(t),
        }
    }
}

fn ease_out_bounce(t: f32) -> f32 {
    const N1: f32 = 7.5625;
    const D1: f32 = 2.75;
    if t < 1.0 / D1 {
        N1 * t * t
    } else if t < 2.0 / D1 {
        let t = t - 1.5 / D1;
        N1 * t * t + 0.75
    } else if t < 2.5 / D1 {
        let t = t - 2.25 / D1;
        N1 * t * t + 0.9375
    } else {
        let t = t - 2.625 / D1;
        N1 * t * t + 0.984375
    }
}

impl FromStr for Easing {
    type Err = ParticleSimError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(name.to_string()))
            .map_err(|_| ParticleSimError::msg(format!("unknown easing `{name}`")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ModulationTarget {
    /// Multiplies the base size.
    Size,
    /// Sets the speed in pixels per tick, keeping the heading.
    Speed,
    /// Multiplies the base alpha.
    Opacity,
    /// Replaces a color channel with a `0..=255` value.
    ColorR,
    ColorG,
    ColorB,
}

/// Eases one particle property from `start` to `end` over the particle's life.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Modulation {
    /// Emitter whose particles are affected, or `*`.
    #[serde(default = "any_emitter")]
    pub emitter_id: String,
    pub target: ModulationTarget,
    pub start: f32,
    pub end: f32,
    #[serde(default)]
    pub easing: Easing,
}

fn any_emitter() -> String {
    ANY_EMITTER.to_string()
}

impl Modulation {
    pub fn new(target: ModulationTarget, start: f32, end: f32, easing: Easing) -> Self {
        Self {
            emitter_id: any_emitter(),
            target,
            start,
            end,
            easing,
        }
    }

    pub fn for_emitter(mut self, emitter_id: impl Into<String>) -> Self {
        self.emitter_id = emitter_id.into();
        self
    }

    pub fn matches(&self, emitter_id: &str) -> bool {
        self.emitter_id == ANY_EMITTER || self.emitter_id == emitter_id
    }

    pub fn value_at(&self, normalized_age: f32) -> f32 {
        let eased = self.easing.apply(normalized_age);
        self.start + (self.end - self.start) * eased
    }
}

/// Applies every matching modulation to `particle`, in list order.
pub fn apply_modulations(modulations: &[Modulation], particle: &mut Particle, unit_scale: f32) {
    if modulations.is_empty() {
        return;
    }
    let t = particle.normalized_age();
    for modulation in modulations.iter().filter(|m| m.matches(&particle.emitter_id)) {
        let value = modulation.value_at(t);
        match modulation.target {
            ModulationTarget::Size => particle.size = particle.base_size * value,
            ModulationTarget::Speed => {
                let current = particle.velocity.length();
                if current > DISTANCE_EPSILON {
                    particle.velocity *= value * unit_scale / current;
                }
            }
            ModulationTarget::Opacity => {
                particle.color[3] = (particle.base_color[3] * value).clamp(0.0, 255.0)
            }
            ModulationTarget::ColorR => particle.color[0] = value.clamp(0.0, 255.0),
            ModulationTarget::ColorG => particle.color[1] = value.clamp(0.0, 255.0),
            ModulationTarget::ColorB => particle.color[2] = value.clamp(0.0, 255.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec2;

    use super::*;

    const ALL: [Easing; 17] = [
        Easing::Linear,
        Easing::EaseInQuad,
        Easing::EaseOutQuad,
        Easing::EaseInOutQuad,
        Easing::EaseInCubic,
        Easing::EaseOutCubic,
        Easing::EaseInOutCubic,
        Easing::EaseInSine,
        Easing::EaseOutSine,
        Easing::EaseInOutSine,
        Easing::EaseInExpo,
        Easing::EaseOutExpo,
        Easing::EaseInOutExpo,
        Easing::EaseInBack,
        Easing::EaseOutBack,
        Easing::EaseOutElastic,
        Easing::EaseOutBounce,
    ];

    #[test]
    fn easings_hit_their_endpoints() {
        for easing in ALL {
            assert!(easing.apply(0.0).abs() < 1e-3, "{easing:?} at 0");
            assert!((easing.apply(1.0) - 1.0).abs() < 1e-3, "{easing:?} at 1");
        }
    }

    #[test]
    fn parses_easing_names() {
        assert_eq!("easeInOutCubic".parse::<Easing>().unwrap(), Easing::EaseInOutCubic);
        assert_eq!("linear".parse::<Easing>().unwrap(), Easing::Linear);
        assert!("wobble".parse::<Easing>().is_err());
    }

    fn aged(age: f32) -> Particle {
        Particle {
            age,
            lifetime: 10.0,
            size: 8.0,
            base_size: 8.0,
            velocity: Vec2::new(3.0, 4.0),
            emitter_id: "main".to_string(),
            ..Particle::default()
        }
    }

    #[test]
    fn size_scales_base_size_over_life() {
        let modulations = vec![Modulation::new(ModulationTarget::Size, 1.0, 0.0, Easing::Linear)];
        let mut particle = aged(5.0);
        apply_modulations(&modulations, &mut particle, 1.0);
        assert!((particle.size - 4.0).abs() < 1e-6);
    }

    #[test]
    fn speed_keeps_direction() {
        let modulations = vec![Modulation::new(
            ModulationTarget::Speed,
            10.0,
            10.0,
            Easing::Linear,
        )];
        let mut particle = aged(2.0);
        apply_modulations(&modulations, &mut particle, 1.0);
        assert!((particle.velocity - Vec2::new(6.0, 8.0)).length() < 1e-5);
    }

    #[test]
    fn opacity_and_color_channels() {
        let modulations = vec![
            Modulation::new(ModulationTarget::Opacity, 1.0, 0.0, Easing::Linear),
            Modulation::new(ModulationTarget::ColorG, 0.0, 200.0, Easing::Linear),
        ];
        let mut particle = aged(10.0);
        apply_modulations(&modulations, &mut particle, 1.0);
        assert_eq!(particle.color[3], 0.0);
        assert_eq!(particle.color[1], 200.0);
    }

    #[test]
    fn emitter_filter_is_respected() {
        let modulations = vec![
            Modulation::new(ModulationTarget::Size, 2.0, 2.0, Easing::Linear).for_emitter("other")
        ];
        let mut particle = aged(1.0);
        apply_modulations(&modulations, &mut particle, 1.0);
        assert_eq!(particle.size, 8.0);
    }

    #[test]
    fn deserializes_with_wildcard_default() {
        let json = r#"{"target":"colorR","start":0,"end":255,"easing":"easeOutQuad"}"#;
        let modulation: Modulation = serde_json::from_str(json).unwrap();
        assert_eq!(modulation.emitter_id, "*");
        assert_eq!(modulation.target, ModulationTarget::ColorR);
        assert_eq!(modulation.easing, Easing::EaseOutQuad);
    }
}
