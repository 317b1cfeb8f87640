use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config_sync::ConfigUpdate;
use crate::context::NodeContext;
use crate::error_event::Severity;
use crate::hal::{MqttMessage, MqttTransport, TransportError};
use crate::sensor::SensorKind;
use crate::sensor_config::{ConfigChange, ConfigOrigin, ConfigPatch, ConfigWriter, SensorConfig};
use crate::storage;
use crate::worker::{PauseGate, WorkerKind};

pub const MQTT_PAYLOAD_INVALID: &str = "MQTT_PAYLOAD_INVALID";
pub const CONFIG_PERSIST_FAILED: &str = "CONFIG_PERSIST_FAILED";

#[derive(Debug, Clone, PartialEq)]
pub struct PatchRequest {
    pub kind: SensorKind,
    pub patch: ConfigPatch,
    pub origin: ConfigOrigin,
}

pub fn status_payload(ctx: &NodeContext) -> Value {
    json!({
        "client_id": ctx.config.device.client_id,
        "status": "online",
        "humidity_serial": ctx.config.device.humidity_serial,
        "light_serial": ctx.config.device.light_serial,
    })
}

pub async fn connect_broker(mqtt: &mut dyn MqttTransport, ctx: &NodeContext) -> Result<(), TransportError> {
    mqtt.connect().await?;
    for kind in SensorKind::ALL {
        let topic = ctx.config.mqtt.config_topic(ctx.config.device.serial(kind));
        mqtt.subscribe(&topic).await?;
        debug!(%topic, "subscribed");
    }
    let status = status_payload(ctx).to_string();
    mqtt.publish(&ctx.config.mqtt.status_topic, status.as_bytes()).await?;
    info!("broker connected");
    Ok(())
}

pub struct ConfigAuthority {
    ctx: Arc<NodeContext>,
    writer: ConfigWriter,
}

impl ConfigAuthority {
    pub fn new(ctx: Arc<NodeContext>, writer: ConfigWriter) -> Self {
        Self { ctx, writer }
    }

    pub fn writer(&self) -> &ConfigWriter {
        &self.writer
    }

    pub fn apply(&mut self, request: &PatchRequest) -> Option<SensorConfig> {
        let (config, change) = self.writer.apply(request.kind, &request.patch, request.origin)?;
        if !change.any() {
            debug!(sensor = %request.kind, "configuration unchanged");
            return None;
        }
        info!(
            sensor = %request.kind,
            origin = ?request.origin,
            id = ?config.sensor_id,
            interval_s = config.sampling_interval_seconds,
            enabled = config.enabled,
            "configuration updated"
        );
        self.persist(request.kind, &config, change);
        if change.interval {
            self.ctx.sync.push(ConfigUpdate {
                kind: request.kind,
                new_interval_seconds: config.sampling_interval_seconds,
                apply: true,
            });
        }
        Some(config)
    }

    pub fn handle_message(&mut self, message: &MqttMessage) -> Option<SensorConfig> {
        let mqtt = &self.ctx.config.mqtt;
        let Some(kind) = mqtt
            .serial_from_topic(&message.topic)
            .and_then(|serial| self.ctx.config.device.kind_for_serial(serial))
        else {
            debug!(topic = %message.topic, "message for unknown topic ignored");
            return None;
        };

        let payload: Value = match serde_json::from_slice(&message.payload) {
            Ok(value @ Value::Object(_)) => value,
            Ok(_) | Err(_) => {
                warn!(topic = %message.topic, "configuration payload is not a JSON object");
                self.ctx.supervisor.report_error(
                    WorkerKind::ConfigIngest,
                    MQTT_PAYLOAD_INVALID,
                    format!("bad payload on {}", message.topic),
                );
                let event = self
                    .ctx
                    .sensor_event(kind, MQTT_PAYLOAD_INVALID, Severity::Warning, "invalid configuration payload")
                    .with_details(json!({"topic": message.topic, "bytes": message.payload.len()}));
                let _ = self.ctx.errors.submit(event);
                return None;
            }
        };

        self.apply(&PatchRequest {
            kind,
            patch: ConfigPatch::from_json(&payload),
            origin: ConfigOrigin::Push,
        })
    }

    fn persist(&self, kind: SensorKind, config: &SensorConfig, change: ConfigChange) {
        let store = self.ctx.store.as_ref();
        let mut result = storage::save_sensor_config(store, kind, config);
        if change.id {
            if let Some(id) = config.sensor_id {
                result = result.and_then(|()| storage::save_registration(store, kind, id));
            }
        }
        if let Err(err) = result {
            warn!(sensor = %kind, %err, "configuration not persisted");
            self.ctx.supervisor.report_error(
                WorkerKind::ConfigIngest,
                CONFIG_PERSIST_FAILED,
                format!("{kind}: {err}"),
            );
        }
    }
}

pub struct IngestWorker {
    ctx: Arc<NodeContext>,
    writer: oneshot::Receiver<ConfigWriter>,
    patches: mpsc::Receiver<PatchRequest>,
    mqtt: Option<Box<dyn MqttTransport>>,
    broker_up: bool,
}

impl IngestWorker {
    pub fn new(
        ctx: Arc<NodeContext>,
        writer: oneshot::Receiver<ConfigWriter>,
        patches: mpsc::Receiver<PatchRequest>,
        mqtt: Option<Box<dyn MqttTransport>>,
        broker_up: bool,
    ) -> Self {
        Self {
            ctx,
            writer,
            patches,
            mqtt,
            broker_up,
        }
    }

    pub async fn run(self, gate: PauseGate) {
        let IngestWorker {
            ctx,
            writer,
            mut patches,
            mut mqtt,
            mut broker_up,
        } = self;

        // Patches queue up until the startup loader hands over the writer.
        let Ok(writer) = writer.await else {
            warn!("configuration writer never handed over, ingest stopped");
            return;
        };
        let mut authority = ConfigAuthority::new(ctx.clone(), writer);
        info!(broker = broker_up, "configuration ingest running");

        let mut status_tick = interval(Duration::from_secs(ctx.config.mqtt.status_every_secs.max(1)));
        status_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        status_tick.tick().await;
        let mut inbox_open = true;

        loop {
            gate.checkpoint().await;
            tokio::select! {
                request = patches.recv(), if inbox_open => match request {
                    Some(request) => {
                        authority.apply(&request);
                    }
                    None => {
                        debug!("patch inbox closed");
                        inbox_open = false;
                    }
                },
                inbound = next_inbound(&mut mqtt), if broker_up => match inbound {
                    Ok(Some(message)) => {
                        authority.handle_message(&message);
                    }
                    Ok(None) => {
                        warn!("broker session ended");
                        broker_up = false;
                    }
                    Err(err) => {
                        warn!(%err, "broker receive failed");
                        broker_up = false;
                    }
                },
                _ = status_tick.tick() => {
                    broker_up = publish_or_reconnect(&mut mqtt, &ctx, broker_up).await;
                }
            }
        }
    }
}

async fn next_inbound(mqtt: &mut Option<Box<dyn MqttTransport>>) -> Result<Option<MqttMessage>, TransportError> {
    match mqtt.as_mut() {
        Some(mqtt) => mqtt.next_message().await,
        None => std::future::pending().await,
    }
}

async fn publish_or_reconnect(mqtt: &mut Option<Box<dyn MqttTransport>>, ctx: &NodeContext, broker_up: bool) -> bool {
    let Some(client) = mqtt.as_mut() else {
        return false;
    };
    let limit = ctx.config.backend.timeout();
    if broker_up && client.is_connected() {
        let status = status_payload(ctx).to_string();
        match timeout(limit, client.publish(&ctx.config.mqtt.status_topic, status.as_bytes())).await {
            Ok(Ok(())) => {
                ctx.supervisor.send_heartbeat(WorkerKind::ConfigIngest, "status published");
                return true;
            }
            Ok(Err(err)) => warn!(%err, "status publish failed"),
            Err(_) => warn!("status publish timed out"),
        }
    }
    match timeout(limit, connect_broker(client.as_mut(), ctx)).await {
        Ok(Ok(())) => true,
        Ok(Err(err)) => {
            debug!(%err, "broker reconnect failed");
            false
        }
        Err(_) => {
            debug!("broker reconnect timed out");
            false
        }
    }
}
