use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::sensor::SensorKind;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {reason}")]
    Read { path: String, reason: String },
    #[error("failed to parse config: {0}")]
    Parse(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub device: DeviceConfig,
    pub backend: BackendConfig,
    pub mqtt: MqttConfig,
    pub wifi: WifiConfig,
    pub calibration: CalibrationConfig,
    pub timing: TimingConfig,
    pub limits: LimitsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub client_id: String,
    pub humidity_serial: String,
    pub light_serial: String,
    pub humidity_default_id: i32,
    pub light_default_id: i32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            client_id: "fieldnode-c3".to_string(),
            humidity_serial: "0x001C".to_string(),
            light_serial: "0x001D".to_string(),
            humidity_default_id: 8,
            light_default_id: 9,
        }
    }
}

impl DeviceConfig {
    pub fn serial(&self, kind: SensorKind) -> &str {
        match kind {
            SensorKind::Humidity => &self.humidity_serial,
            SensorKind::Light => &self.light_serial,
        }
    }

    pub fn default_id(&self, kind: SensorKind) -> i32 {
        match kind {
            SensorKind::Humidity => self.humidity_default_id,
            SensorKind::Light => self.light_default_id,
        }
    }

    pub fn kind_for_serial(&self, serial: &str) -> Option<SensorKind> {
        SensorKind::ALL.into_iter().find(|kind| self.serial(*kind) == serial)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub data_url: String,
    pub config_url: String,
    pub error_log_url: String,
    pub timeout_ms: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            data_url: "https://ong-controller.vercel.app/api/v1/process-data".to_string(),
            config_url: "https://ong-controller.vercel.app/api/v1/sensors/serial/".to_string(),
            error_log_url: "https://ong-controller.vercel.app/api/v1/error-logs".to_string(),
            timeout_ms: 20_000,
        }
    }
}

impl BackendConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn config_url_for(&self, serial: &str) -> String {
        format!("{}{}", self.config_url, serial)
    }

    pub fn rebase(&mut self, base: &str) {
        let base = base.trim_end_matches('/');
        for url in [&mut self.data_url, &mut self.config_url, &mut self.error_log_url] {
            if let Some(path_start) = url
                .find("://")
                .and_then(|scheme_end| url[scheme_end + 3..].find('/').map(|p| p + scheme_end + 3))
            {
                *url = format!("{base}{}", &url[path_start..]);
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub broker_url: String,
    pub keep_alive_secs: u64,
    pub namespace: String,
    pub status_topic: String,
    pub status_every_secs: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker_url: "mqtt://127.0.0.1:1883".to_string(),
            keep_alive_secs: 30,
            namespace: "ong".to_string(),
            status_topic: "ong/esp32/status".to_string(),
            status_every_secs: 60,
        }
    }
}

impl MqttConfig {
    pub fn broker_endpoint(&self) -> Result<(String, u16), ConfigError> {
        let invalid = |reason: &str| ConfigError::Parse(format!("broker url {}: {reason}", self.broker_url));
        let rest = self
            .broker_url
            .strip_prefix("mqtt://")
            .or_else(|| self.broker_url.strip_prefix("tcp://"))
            .ok_or_else(|| invalid("expected mqtt:// scheme"))?;
        let authority = rest.trim_end_matches('/');
        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => (host, port.parse::<u16>().map_err(|_| invalid("bad port"))?),
            None => (authority, 1883),
        };
        if host.is_empty() || host.contains('/') {
            return Err(invalid("missing host"));
        }
        Ok((host.to_string(), port))
    }

    pub fn config_topic(&self, serial: &str) -> String {
        format!("{}/sensor/{}/config", self.namespace, serial)
    }

    pub fn serial_from_topic<'a>(&self, topic: &'a str) -> Option<&'a str> {
        let rest = topic.strip_prefix(self.namespace.as_str())?;
        let rest = rest.strip_prefix("/sensor/")?;
        let serial = rest.strip_suffix("/config")?;
        if serial.is_empty() || serial.contains('/') {
            return None;
        }
        Some(serial)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WifiConfig {
    pub ssid: String,
    pub pass: String,
    pub max_retry: u32,
    pub attempt_timeout_secs: u64,
    pub retry_delay_ms: u64,
    pub cooldown_secs: u64,
    pub poll_secs: u64,
}

impl Default for WifiConfig {
    fn default() -> Self {
        Self {
            ssid: "fieldnode-setup".to_string(),
            pass: "12345678".to_string(),
            max_retry: 5,
            attempt_timeout_secs: 10,
            retry_delay_ms: 2_000,
            cooldown_secs: 30,
            poll_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    pub humidity_wet: u16,
    pub humidity_dry: u16,
    pub light_dark: u16,
    pub light_bright: u16,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            humidity_wet: 1200,
            humidity_dry: 2800,
            light_dark: 200,
            light_bright: 3800,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub sample_period_secs: u64,
    pub default_interval_secs: u32,
    pub post_interval_secs: u64,
    pub read_retry_delay_ms: u64,
    pub initial_check_gate_secs: u64,
    pub network_gate_secs: u64,
    pub sensor_config_gate_secs: u64,
    pub supervisor_recv_secs: u64,
    pub liveness_secs: u64,
    pub pipeline_wait_secs: u64,
    pub dedup_window_secs: u64,
    pub dedup_sweep_secs: u64,
    pub pipeline_stats_secs: u64,
    pub http_stats_secs: u64,
    pub storage_commit_secs: u64,
    pub storage_heartbeat_secs: u64,
    pub backoff_stages_secs: Vec<u64>,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            sample_period_secs: 5,
            default_interval_secs: 5,
            post_interval_secs: 60,
            read_retry_delay_ms: 100,
            initial_check_gate_secs: 10,
            network_gate_secs: 30,
            sensor_config_gate_secs: 15,
            supervisor_recv_secs: 5,
            liveness_secs: 30,
            pipeline_wait_secs: 10,
            dedup_window_secs: 600,
            dedup_sweep_secs: 600,
            pipeline_stats_secs: 300,
            http_stats_secs: 600,
            storage_commit_secs: 1,
            storage_heartbeat_secs: 60,
            backoff_stages_secs: vec![5 * 60, 10 * 60, 30 * 60],
        }
    }
}

impl TimingConfig {
    pub fn sample_period(&self) -> Duration {
        Duration::from_secs(self.sample_period_secs.max(1))
    }

    pub fn backoff_stages(&self) -> Vec<Duration> {
        self.backoff_stages_secs
            .iter()
            .map(|secs| Duration::from_secs(*secs))
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub sensor_queue: usize,
    pub error_queue: usize,
    pub retry_queue: usize,
    pub supervisor_queue: usize,
    pub status_queue: usize,
    pub dedup_capacity: usize,
    pub read_attempts: u32,
    pub failure_threshold: u32,
    pub retry_drain: usize,
    pub forced_retry_drain: usize,
    pub min_free_heap: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            sensor_queue: 5,
            error_queue: 50,
            retry_queue: 50,
            supervisor_queue: 10,
            status_queue: 8,
            dedup_capacity: 20,
            read_attempts: 3,
            failure_threshold: 3,
            retry_drain: 5,
            forced_retry_drain: 20,
            min_free_heap: 50_000,
        }
    }
}

impl NodeConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|err| ConfigError::Read {
            path: path.display().to_string(),
            reason: err.to_string(),
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))
    }

    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            info!("no config file given, using compiled-in defaults");
            return Self::default();
        };

        match Self::load(path) {
            Ok(config) => {
                info!(path = %path.display(), "configuration loaded");
                config
            }
            Err(err) => {
                warn!(%err, "falling back to compiled-in defaults");
                Self::default()
            }
        }
    }
}
