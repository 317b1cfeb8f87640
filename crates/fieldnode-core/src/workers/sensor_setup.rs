use std::sync::Arc;

use serde_json::{json, Value};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config_sync::ConfigUpdate;
use crate::context::NodeContext;
use crate::error_event::Severity;
use crate::hal::TransportError;
use crate::sensor::SensorKind;
use crate::sensor_config::{ConfigOrigin, ConfigPatch, ConfigWriter, SensorConfig};
use crate::startup::GateSignal;
use crate::status::SystemState;
use crate::storage;
use crate::worker::WorkerKind;

pub const CONFIG_FETCH_FAILED: &str = "CONFIG_FETCH_FAILED";

pub async fn run(ctx: Arc<NodeContext>, mut writer: ConfigWriter, gate: Option<GateSignal>) -> ConfigWriter {
    ctx.status.set(SystemState::Config);
    for kind in SensorKind::ALL {
        let config = load_one(&ctx, &mut writer, kind).await;
        info!(
            sensor = %kind,
            id = ?config.sensor_id,
            interval_s = config.sampling_interval_seconds,
            enabled = config.enabled,
            origin = ?config.origin,
            "sensor configuration ready"
        );
        ctx.sync.push(ConfigUpdate {
            kind,
            new_interval_seconds: config.sampling_interval_seconds,
            apply: true,
        });
    }
    ctx.supervisor
        .send_status(WorkerKind::SensorConfig, "sensor configuration loaded");
    if let Some(gate) = gate {
        gate.complete();
    }
    writer
}

async fn load_one(ctx: &NodeContext, writer: &mut ConfigWriter, kind: SensorKind) -> SensorConfig {
    let defaults = SensorConfig::defaults(kind, &ctx.config);
    let stored = match storage::load_sensor_config(ctx.store.as_ref(), kind, &defaults) {
        Ok(stored) => stored,
        Err(err) => {
            warn!(sensor = %kind, %err, "stored configuration unreadable");
            None
        }
    };
    let base = match stored {
        Some(stored) => stored,
        None => with_registration(ctx, kind, defaults),
    };
    writer.replace(kind, base.clone());

    if !ctx.connectivity.is_connected() {
        if !base.configured {
            info!(sensor = %kind, "offline and nothing stored, using compiled defaults");
        }
        return base;
    }

    match fetch(ctx, kind).await {
        Ok(body) => {
            let patch = ConfigPatch::from_json(&body);
            if let Some(description) = body.get("description").and_then(Value::as_str) {
                debug!(sensor = %kind, description, "backend description");
            }
            let Some((config, _)) = writer.apply(kind, &patch, ConfigOrigin::Backend) else {
                return base;
            };
            if let Err(err) = storage::save_sensor_config(ctx.store.as_ref(), kind, &config) {
                warn!(sensor = %kind, %err, "could not persist fetched configuration");
            }
            if let Some(id) = config.sensor_id {
                if let Err(err) = storage::save_registration(ctx.store.as_ref(), kind, id) {
                    warn!(sensor = %kind, %err, "could not persist registration");
                }
            }
            config
        }
        Err(err) => {
            warn!(sensor = %kind, %err, "configuration fetch failed");
            ctx.supervisor
                .report_error(WorkerKind::SensorConfig, CONFIG_FETCH_FAILED, format!("{kind}: {err}"));
            let event = ctx
                .sensor_event(kind, CONFIG_FETCH_FAILED, Severity::Warning, err.to_string())
                .with_details(json!({"serial": ctx.config.device.serial(kind)}));
            let _ = ctx.errors.submit(event);
            base
        }
    }
}

fn with_registration(ctx: &NodeContext, kind: SensorKind, mut defaults: SensorConfig) -> SensorConfig {
    match storage::load_registration(ctx.store.as_ref(), kind) {
        Ok(Some(registration)) if registration.registered => {
            debug!(sensor = %kind, id = registration.sensor_id, "using registered sensor id");
            defaults.sensor_id = Some(registration.sensor_id);
        }
        Ok(_) => {}
        Err(err) => warn!(sensor = %kind, %err, "stored registration unreadable"),
    }
    defaults
}

async fn fetch(ctx: &NodeContext, kind: SensorKind) -> Result<Value, TransportError> {
    let url = ctx.config.backend.config_url_for(ctx.config.device.serial(kind));
    let response = timeout(ctx.config.backend.timeout(), ctx.http.get(&url))
        .await
        .map_err(|_| TransportError::Timeout)??;
    if !response.is_success() {
        return Err(TransportError::Io(format!("status {}", response.status)));
    }
    serde_json::from_str(&response.body).map_err(|err| TransportError::Payload(err.to_string()))
}
