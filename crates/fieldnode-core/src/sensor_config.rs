use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use serde_json::Value;

use crate::config::NodeConfig;
use crate::sensor::SensorKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigOrigin {
    Defaults,
    Storage,
    Backend,
    Push,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ValueBounds {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl ValueBounds {
    pub fn is_empty(&self) -> bool {
        self.min.is_none() && self.max.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Audit {
    pub created_by: Option<String>,
    pub modified_by: Option<String>,
    pub created_at: Option<String>,
    pub modified_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SensorConfig {
    pub sensor_id: Option<i32>,
    pub sampling_interval_seconds: u32,
    pub enabled: bool,
    pub configured: bool,
    pub value_bounds: ValueBounds,
    pub audit: Audit,
    pub origin: ConfigOrigin,
}

impl SensorConfig {
    pub fn defaults(kind: SensorKind, config: &NodeConfig) -> Self {
        Self {
            sensor_id: Some(config.device.default_id(kind)),
            sampling_interval_seconds: config.timing.default_interval_secs.max(1),
            enabled: true,
            configured: false,
            value_bounds: ValueBounds::default(),
            audit: Audit::default(),
            origin: ConfigOrigin::Defaults,
        }
    }

    pub fn apply(&mut self, patch: &ConfigPatch, origin: ConfigOrigin) -> ConfigChange {
        let mut change = ConfigChange::default();

        if let Some(id) = patch.sensor_id {
            if self.sensor_id != Some(id) {
                self.sensor_id = Some(id);
                change.id = true;
            }
        }
        if let Some(interval) = patch.interval_seconds.filter(|secs| *secs > 0) {
            if self.sampling_interval_seconds != interval {
                self.sampling_interval_seconds = interval;
                change.interval = true;
            }
        }
        if let Some(enabled) = patch.enabled {
            if self.enabled != enabled {
                self.enabled = enabled;
                change.enabled = true;
            }
        }
        if let Some(min) = patch.min_value {
            if self.value_bounds.min != min {
                self.value_bounds.min = min;
                change.bounds = true;
            }
        }
        if let Some(max) = patch.max_value {
            if self.value_bounds.max != max {
                self.value_bounds.max = max;
                change.bounds = true;
            }
        }

        let audit = &patch.audit;
        for (target, value) in [
            (&mut self.audit.created_by, &audit.created_by),
            (&mut self.audit.modified_by, &audit.modified_by),
            (&mut self.audit.created_at, &audit.created_at),
            (&mut self.audit.modified_at, &audit.modified_at),
        ] {
            if value.is_some() && target != value {
                target.clone_from(value);
                change.audit = true;
            }
        }

        if !patch.is_empty() {
            self.configured = true;
            self.origin = origin;
        }
        change
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConfigChange {
    pub id: bool,
    pub interval: bool,
    pub enabled: bool,
    pub bounds: bool,
    pub audit: bool,
}

impl ConfigChange {
    pub fn any(&self) -> bool {
        self.id || self.interval || self.enabled || self.bounds || self.audit
    }
}

/// Bounds use a nested option: `Some(None)` clears the bound, `None` leaves
/// it untouched.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConfigPatch {
    pub sensor_id: Option<i32>,
    pub interval_seconds: Option<u32>,
    pub enabled: Option<bool>,
    pub min_value: Option<Option<f64>>,
    pub max_value: Option<Option<f64>>,
    pub audit: Audit,
}

impl ConfigPatch {
    pub fn is_empty(&self) -> bool {
        self.sensor_id.is_none()
            && self.interval_seconds.is_none()
            && self.enabled.is_none()
            && self.min_value.is_none()
            && self.max_value.is_none()
            && self.audit == Audit::default()
    }

    pub fn from_json(value: &Value) -> ConfigPatch {
        let Some(object) = value.as_object() else {
            return ConfigPatch::default();
        };

        let interval = object
            .get("interval_seconds")
            .or_else(|| object.get("interval_s"))
            .and_then(Value::as_u64)
            .filter(|secs| *secs > 0)
            .and_then(|secs| u32::try_from(secs).ok());

        ConfigPatch {
            sensor_id: object
                .get("id_sensor")
                .and_then(Value::as_i64)
                .and_then(|id| i32::try_from(id).ok()),
            interval_seconds: interval,
            enabled: object.get("state").and_then(parse_state),
            min_value: object.get("min_value").map(Value::as_f64),
            max_value: object.get("max_value").map(Value::as_f64),
            audit: Audit {
                created_by: object.get("id_user_created").and_then(text),
                modified_by: object.get("id_user_modified").and_then(text),
                created_at: object.get("created_at").and_then(text),
                modified_at: object.get("modified_at").and_then(text),
            },
        }
    }
}

fn parse_state(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(enabled) => Some(*enabled),
        Value::String(state) => Some(state.eq_ignore_ascii_case("active")),
        Value::Number(n) => n.as_i64().map(|v| v != 0),
        _ => None,
    }
}

fn text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[derive(Debug)]
pub struct SensorConfigs {
    configs: RwLock<BTreeMap<SensorKind, SensorConfig>>,
}

impl SensorConfigs {
    pub fn new(config: &NodeConfig) -> (Arc<SensorConfigs>, ConfigWriter) {
        let configs = SensorKind::ALL
            .into_iter()
            .map(|kind| (kind, SensorConfig::defaults(kind, config)))
            .collect();
        let store = Arc::new(SensorConfigs {
            configs: RwLock::new(configs),
        });
        let writer = ConfigWriter { store: store.clone() };
        (store, writer)
    }

    pub fn get(&self, kind: SensorKind) -> Option<SensorConfig> {
        self.configs
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&kind)
            .cloned()
    }

    pub fn sensor_ids(&self) -> Vec<i32> {
        self.configs
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .filter_map(|config| config.sensor_id)
            .collect()
    }
}

/// Exclusive write access to [`SensorConfigs`]. Not `Clone`: held by the
/// sensor-configuration worker during startup, then moved to the
/// configuration-ingest worker.
#[derive(Debug)]
pub struct ConfigWriter {
    store: Arc<SensorConfigs>,
}

impl ConfigWriter {
    pub fn store(&self) -> &Arc<SensorConfigs> {
        &self.store
    }

    pub fn get(&self, kind: SensorKind) -> Option<SensorConfig> {
        self.store.get(kind)
    }

    pub fn replace(&mut self, kind: SensorKind, config: SensorConfig) {
        self.store
            .configs
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(kind, config);
    }

    pub fn apply(
        &mut self,
        kind: SensorKind,
        patch: &ConfigPatch,
        origin: ConfigOrigin,
    ) -> Option<(SensorConfig, ConfigChange)> {
        let mut configs = self
            .store
            .configs
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let config = configs.get_mut(&kind)?;
        let change = config.apply(patch, origin);
        Some((config.clone(), change))
    }
}
