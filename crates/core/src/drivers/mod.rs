use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::subemitter::ANY_EMITTER;

/// Configuration value a driver may override for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DriverTarget {
    EmissionRate,
    Speed,
    Size,
    Lifetime,
    Gravity,
    WindStrength,
    WindDirection,
    Friction,
    TurbulenceStrength,
}

/// Concrete override routed to an emitter id or to `*`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverUpdate {
    pub scope: String,
    pub target: DriverTarget,
    pub value: f32,
}

impl DriverUpdate {
    pub fn global(target: DriverTarget, value: f32) -> Self {
        Self {
            scope: ANY_EMITTER.to_string(),
            target,
            value,
        }
    }

    pub fn for_emitter(scope: impl Into<String>, target: DriverTarget, value: f32) -> Self {
        Self {
            scope: scope.into(),
            target,
            value,
        }
    }
}

/// Describes how an externally supplied feature (an audio band level, a beat
/// confidence, ...) should be routed to a driver target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverMapping {
    pub source: String,
    #[serde(default = "any_scope")]
    pub scope: String,
    pub target: DriverTarget,
    #[serde(default = "unit_gain")]
    pub gain: f32,
    #[serde(default)]
    pub offset: f32,
}

fn any_scope() -> String {
    ANY_EMITTER.to_string()
}

fn unit_gain() -> f32 {
    1.0
}

/// Active overrides, consulted once per tick in place of static configuration.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverMatrix {
    updates: Vec<DriverUpdate>,
}

impl DriverMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.updates.clear();
    }

    pub fn updates(&self) -> &[DriverUpdate] {
        &self.updates
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    /// Inserts or replaces the override for `update.scope` and `update.target`.
    pub fn push(&mut self, update: DriverUpdate) {
        match self
            .updates
            .iter_mut()
            .find(|existing| existing.scope == update.scope && existing.target == update.target)
        {
            Some(existing) => existing.value = update.value,
            None => self.updates.push(update),
        }
    }

    pub fn remove(&mut self, scope: &str, target: DriverTarget) {
        self.updates
            .retain(|update| !(update.scope == scope && update.target == target));
    }

    /// Replaces every override with `updates`.
    pub fn apply_updates(&mut self, updates: Vec<DriverUpdate>) {
        self.clear();
        for update in updates {
            self.push(update);
        }
    }

    /// Recomputes the overrides produced by `mappings` from the latest
    /// feature values. Mappings whose source is missing are skipped.
    pub fn apply_features(&mut self, mappings: &[DriverMapping], features: &BTreeMap<String, f32>) {
        for mapping in mappings {
            if let Some(value) = features.get(&mapping.source) {
                self.push(DriverUpdate {
                    scope: mapping.scope.clone(),
                    target: mapping.target,
                    value: value * mapping.gain + mapping.offset,
                });
            }
        }
    }

    /// Emitter-scoped override first, then the `*` override.
    pub fn resolve(&self, scope: &str, target: DriverTarget) -> Option<f32> {
        self.lookup(scope, target)
            .or_else(|| self.lookup(ANY_EMITTER, target))
    }

    /// `resolve`, falling back to the static configuration value.
    pub fn value_or(&self, scope: &str, target: DriverTarget, fallback: f32) -> f32 {
        self.resolve(scope, target).unwrap_or(fallback)
    }

    fn lookup(&self, scope: &str, target: DriverTarget) -> Option<f32> {
        self.updates
            .iter()
            .find(|update| update.scope == scope && update.target == target)
            .map(|update| update.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emitter_scope_beats_global() {
        let mut drivers = DriverMatrix::new();
        drivers.push(DriverUpdate::global(DriverTarget::EmissionRate, 5.0));
        drivers.push(DriverUpdate::for_emitter("sparks", DriverTarget::EmissionRate, 50.0));

        assert_eq!(drivers.resolve("sparks", DriverTarget::EmissionRate), Some(50.0));
        assert_eq!(drivers.resolve("smoke", DriverTarget::EmissionRate), Some(5.0));
        assert_eq!(drivers.resolve("smoke", DriverTarget::Speed), None);
        assert_eq!(drivers.value_or("smoke", DriverTarget::Speed, 3.0), 3.0);
    }

    #[test]
    fn push_replaces_existing_override() {
        let mut drivers = DriverMatrix::new();
        drivers.push(DriverUpdate::global(DriverTarget::Gravity, 1.0));
        drivers.push(DriverUpdate::global(DriverTarget::Gravity, 2.0));
        assert_eq!(drivers.updates().len(), 1);
        assert_eq!(drivers.resolve("*", DriverTarget::Gravity), Some(2.0));

        drivers.remove("*", DriverTarget::Gravity);
        assert!(drivers.is_empty());
    }

    #[test]
    fn features_route_through_mappings() {
        let mappings = vec![DriverMapping {
            source: "bass".to_string(),
            scope: "sparks".to_string(),
            target: DriverTarget::EmissionRate,
            gain: 20.0,
            offset: 1.0,
        }];
        let mut features = BTreeMap::new();
        features.insert("bass".to_string(), 0.5);

        let mut drivers = DriverMatrix::new();
        drivers.apply_features(&mappings, &features);
        assert_eq!(drivers.resolve("sparks", DriverTarget::EmissionRate), Some(11.0));

        drivers.apply_features(&mappings, &BTreeMap::new());
        assert_eq!(drivers.resolve("sparks", DriverTarget::EmissionRate), Some(11.0));
    }

    #[test]
    fn mapping_defaults_from_json() {
        let mapping: DriverMapping =
            serde_json::from_str(r#"{"source":"rms","target":"windStrength"}"#).unwrap();
        assert_eq!(mapping.scope, "*");
        assert_eq!(mapping.gain, 1.0);
        assert_eq!(mapping.offset, 0.0);
    }
}
