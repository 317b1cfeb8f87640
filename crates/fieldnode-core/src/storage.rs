use std::sync::Mutex;

use crate::hal::{KvStore, KvValue, Namespaces, StorageError, WifiCredentials};
use crate::sensor::SensorKind;
use crate::sensor_config::{ConfigOrigin, SensorConfig, ValueBounds};

pub const WIFI_NAMESPACE: &str = "wifi";
pub const SENSOR_CONFIG_NAMESPACE: &str = "sensor_cfg";
pub const SENSOR_IDS_NAMESPACE: &str = "sensor_ids";

fn key(kind: SensorKind, field: &str) -> String {
    format!("{}_{}", kind.storage_prefix(), field)
}

pub fn load_credentials(store: &dyn KvStore) -> Result<Option<WifiCredentials>, StorageError> {
    let ssid = store.get(WIFI_NAMESPACE, "ssid")?;
    let pass = store.get(WIFI_NAMESPACE, "pass")?;
    let (Some(ssid), Some(pass)) = (ssid, pass) else {
        return Ok(None);
    };
    match (ssid.as_str(), pass.as_str()) {
        (Some(ssid), Some(pass)) if !ssid.is_empty() => Ok(Some(WifiCredentials {
            ssid: ssid.to_string(),
            pass: pass.to_string(),
        })),
        _ => Ok(None),
    }
}

pub fn save_credentials(store: &dyn KvStore, credentials: &WifiCredentials) -> Result<(), StorageError> {
    store.set(WIFI_NAMESPACE, "ssid", KvValue::Text(credentials.ssid.clone()))?;
    store.set(WIFI_NAMESPACE, "pass", KvValue::Text(credentials.pass.clone()))
}

pub fn load_sensor_config(
    store: &dyn KvStore,
    kind: SensorKind,
    defaults: &SensorConfig,
) -> Result<Option<SensorConfig>, StorageError> {
    let loaded = store
        .get(SENSOR_CONFIG_NAMESPACE, &key(kind, "loaded"))?
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    if !loaded {
        return Ok(None);
    }

    let get = |field: &str| store.get(SENSOR_CONFIG_NAMESPACE, &key(kind, field));
    let mut config = defaults.clone();
    if let Some(id) = get("id")?.and_then(|v| v.as_i64()).and_then(|id| i32::try_from(id).ok()) {
        config.sensor_id = (id > 0).then_some(id);
    }
    if let Some(interval) = get("interval")?
        .and_then(|v| v.as_i64())
        .and_then(|secs| u32::try_from(secs).ok())
        .filter(|secs| *secs > 0)
    {
        config.sampling_interval_seconds = interval;
    }
    if let Some(enabled) = get("state")?.and_then(|v| v.as_bool()) {
        config.enabled = enabled;
    }
    config.value_bounds = ValueBounds {
        min: get("min")?.and_then(|v| v.as_f64()),
        max: get("max")?.and_then(|v| v.as_f64()),
    };
    config.configured = true;
    config.origin = ConfigOrigin::Storage;
    Ok(Some(config))
}

pub fn save_sensor_config(store: &dyn KvStore, kind: SensorKind, config: &SensorConfig) -> Result<(), StorageError> {
    let ns = SENSOR_CONFIG_NAMESPACE;
    store.set(ns, &key(kind, "id"), KvValue::Int(i64::from(config.sensor_id.unwrap_or(0))))?;
    store.set(ns, &key(kind, "interval"), KvValue::Int(i64::from(config.sampling_interval_seconds)))?;
    store.set(ns, &key(kind, "state"), KvValue::Bool(config.enabled))?;
    match config.value_bounds.max {
        Some(max) => store.set(ns, &key(kind, "max"), KvValue::Float(max))?,
        None => store.erase(ns, &key(kind, "max"))?,
    }
    match config.value_bounds.min {
        Some(min) => store.set(ns, &key(kind, "min"), KvValue::Float(min))?,
        None => store.erase(ns, &key(kind, "min"))?,
    }
    store.set(ns, &key(kind, "loaded"), KvValue::Bool(true))?;
    store.commit()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    pub sensor_id: i32,
    pub registered: bool,
}

pub fn load_registration(store: &dyn KvStore, kind: SensorKind) -> Result<Option<Registration>, StorageError> {
    let id = store
        .get(SENSOR_IDS_NAMESPACE, &key(kind, "id"))?
        .and_then(|v| v.as_i64())
        .and_then(|id| i32::try_from(id).ok());
    let registered = store
        .get(SENSOR_IDS_NAMESPACE, &key(kind, "registered"))?
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    Ok(id.map(|sensor_id| Registration { sensor_id, registered }))
}

pub fn save_registration(store: &dyn KvStore, kind: SensorKind, sensor_id: i32) -> Result<(), StorageError> {
    store.set(SENSOR_IDS_NAMESPACE, &key(kind, "id"), KvValue::Int(i64::from(sensor_id)))?;
    store.set(SENSOR_IDS_NAMESPACE, &key(kind, "registered"), KvValue::Bool(true))?;
    store.commit()
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    working: Mutex<Namespaces>,
    committed: Mutex<Namespaces>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn committed(&self) -> Namespaces {
        self.committed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn working(&self) -> std::sync::MutexGuard<'_, Namespaces> {
        self.working.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl KvStore for MemoryStore {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<KvValue>, StorageError> {
        Ok(self
            .working()
            .get(namespace)
            .and_then(|entries| entries.get(key))
            .cloned())
    }

    fn set(&self, namespace: &str, key: &str, value: KvValue) -> Result<(), StorageError> {
        self.working()
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    fn erase(&self, namespace: &str, key: &str) -> Result<(), StorageError> {
        if let Some(entries) = self.working().get_mut(namespace) {
            entries.remove(key);
        }
        Ok(())
    }

    fn commit(&self) -> Result<(), StorageError> {
        let snapshot = self.working().clone();
        *self
            .committed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = snapshot;
        Ok(())
    }
}
