use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

use crate::context::NodeContext;
use crate::error_event::Severity;
use crate::hal::{HttpResponse, TransportError};
use crate::sensor::{SensorKind, SensorReading};
use crate::sensor_config::{ConfigOrigin, ConfigPatch};
use crate::status::SystemState;
use crate::worker::{PauseGate, WorkerKind};
use crate::workers::ingest::PatchRequest;

pub const HTTP_SEND_FAILED: &str = "HTTP_SEND_FAILED";

pub fn reading_payload(reading: &SensorReading, sensor_id: i32, uptime_ms: u64) -> Value {
    json!({
        "value": reading.kind.format_value(reading.converted_value),
        "unit": reading.kind.unit(),
        "type": reading.kind.as_str(),
        "id_sensor": sensor_id,
        "raw_value": reading.raw_sample,
        "timestamp": uptime_ms,
    })
}

/// Configuration carried back in a data response: a `sensorConfig` object,
/// or a bare root-level `interval_seconds` from older backends.
pub fn response_patch(body: &str) -> Option<ConfigPatch> {
    let json: Value = serde_json::from_str(body).ok()?;
    let patch = match json.get("sensorConfig") {
        Some(nested) if nested.is_object() => ConfigPatch::from_json(nested),
        _ => ConfigPatch {
            interval_seconds: ConfigPatch::from_json(&json).interval_seconds,
            ..ConfigPatch::default()
        },
    };
    (!patch.is_empty()).then_some(patch)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportOutcome {
    Sent,
    Failed,
    Idle,
}

pub struct ReportingWorker {
    ctx: Arc<NodeContext>,
    validated: BTreeSet<SensorKind>,
    successes: u64,
    failures: u64,
    last_stats: Instant,
}

impl ReportingWorker {
    pub fn new(ctx: Arc<NodeContext>) -> Self {
        Self {
            ctx,
            validated: BTreeSet::new(),
            successes: 0,
            failures: 0,
            last_stats: Instant::now(),
        }
    }

    pub fn counts(&self) -> (u64, u64) {
        (self.successes, self.failures)
    }

    pub async fn run(mut self, gate: PauseGate) {
        info!(url = %self.ctx.config.backend.data_url, "reporting started");
        loop {
            gate.checkpoint().await;
            self.step().await;
        }
    }

    pub async fn step(&mut self) -> ReportOutcome {
        let wait = Duration::from_secs(self.ctx.config.timing.post_interval_secs.max(1));
        let outcome = match self.ctx.readings.recv_timeout(wait).await {
            Some(reading) if reading.valid => self.report(reading).await,
            Some(reading) => {
                warn!(sensor = %reading.kind, "invalid reading discarded");
                ReportOutcome::Idle
            }
            None => {
                debug!("no reading within post interval");
                ReportOutcome::Idle
            }
        };
        self.maybe_log_stats();
        outcome
    }

    async fn report(&mut self, reading: SensorReading) -> ReportOutcome {
        let kind = reading.kind;
        if self.validated.insert(kind) {
            self.validate(kind).await;
        }

        let sensor_id = self
            .ctx
            .configs
            .get(kind)
            .and_then(|config| config.sensor_id)
            .unwrap_or_else(|| self.ctx.config.device.default_id(kind));
        let payload = reading_payload(&reading, sensor_id, self.ctx.uptime_ms());
        debug!(sensor = %kind, %payload, "posting reading");

        match self.post(&payload).await {
            Ok(response) => {
                self.successes += 1;
                self.ctx.backoff.record_success();
                self.ctx.status.set(SystemState::HttpSend);
                self.ctx
                    .supervisor
                    .send_heartbeat(WorkerKind::Reporting, format!("{kind} reading sent"));
                if let Some(patch) = response_patch(&response.body) {
                    info!(sensor = %kind, ?patch, "configuration received in response");
                    let request = PatchRequest {
                        kind,
                        patch,
                        origin: ConfigOrigin::Backend,
                    };
                    if self.ctx.patches.try_send(request).is_err() {
                        warn!(sensor = %kind, "configuration inbox full, response patch dropped");
                    }
                }
                ReportOutcome::Sent
            }
            Err(err) => {
                self.failures += 1;
                warn!(sensor = %kind, %err, "reading not delivered");
                self.ctx.status.set(SystemState::Error);
                self.ctx
                    .supervisor
                    .report_error(WorkerKind::Reporting, HTTP_SEND_FAILED, format!("{kind}: {err}"));
                let event = self
                    .ctx
                    .sensor_event(kind, HTTP_SEND_FAILED, Severity::Warning, err.to_string());
                let _ = self.ctx.errors.submit(event);
                if let Some(pause) = self.ctx.backoff.record_failure().await {
                    info!(paused_s = pause.as_secs(), "reporting resumed after backoff");
                }
                ReportOutcome::Failed
            }
        }
    }

    async fn post(&self, payload: &Value) -> Result<HttpResponse, TransportError> {
        let url = &self.ctx.config.backend.data_url;
        let response = timeout(self.ctx.config.backend.timeout(), self.ctx.http.post_json(url, payload))
            .await
            .map_err(|_| TransportError::Timeout)??;
        if response.is_success() {
            Ok(response)
        } else {
            Err(TransportError::Io(format!("status {}", response.status)))
        }
    }

    async fn validate(&self, kind: SensorKind) {
        let serial = self.ctx.config.device.serial(kind);
        let url = self.ctx.config.backend.config_url_for(serial);
        match timeout(self.ctx.config.backend.timeout(), self.ctx.http.get(&url)).await {
            Ok(Ok(response)) if response.is_success() => info!(sensor = %kind, serial, "sensor serial validated"),
            Ok(Ok(response)) => {
                info!(sensor = %kind, serial, status = response.status, "serial validation skipped")
            }
            Ok(Err(err)) => info!(sensor = %kind, serial, %err, "serial validation skipped"),
            Err(_) => info!(sensor = %kind, serial, "serial validation timed out"),
        }
    }

    fn maybe_log_stats(&mut self) {
        let every = Duration::from_secs(self.ctx.config.timing.http_stats_secs);
        if self.last_stats.elapsed() < every {
            return;
        }
        self.last_stats = Instant::now();
        let total = self.successes + self.failures;
        let rate = if total > 0 {
            self.successes as f64 * 100.0 / total as f64
        } else {
            0.0
        };
        info!(ok = self.successes, failed = self.failures, rate, "reporting stats");
        self.ctx
            .supervisor
            .send_heartbeat(WorkerKind::Reporting, format!("HTTP {rate:.1}% OK"));
    }
}
