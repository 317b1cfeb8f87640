use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::backoff::BackoffController;
use crate::config::NodeConfig;
use crate::config_sync::ConfigSyncChannel;
use crate::connectivity::Connectivity;
use crate::dedup::ErrorDeduplicator;
use crate::error_event::{ErrorEvent, ErrorSource, Severity};
use crate::hal::{AnalogFrontend, HttpTransport, KvStore, MqttTransport, Network, ResourceProbe, StatusSink};
use crate::queue::FreshQueue;
use crate::reporter::{ErrorReporter, ErrorReportingPipeline, PipelineSettings};
use crate::sensor::{SensorKind, SensorReading};
use crate::sensor_config::{ConfigWriter, SensorConfigs};
use crate::status::{StatusLed, SystemState};
use crate::supervisor::{HealthSupervisor, SupervisorHandle};
use crate::worker::WorkerRegistry;
use crate::workers::ingest::PatchRequest;
use crate::workers::maintenance::StorageRequest;

const PATCH_QUEUE: usize = 8;
const STORAGE_QUEUE: usize = 8;

pub struct Collaborators {
    pub adc: Arc<dyn AnalogFrontend>,
    pub network: Arc<dyn Network>,
    pub http: Arc<dyn HttpTransport>,
    pub mqtt: Option<Box<dyn MqttTransport>>,
    pub store: Arc<dyn KvStore>,
    pub status_sink: Option<Box<dyn StatusSink>>,
    pub probe: Arc<dyn ResourceProbe>,
}

pub struct NodeContext {
    pub config: NodeConfig,
    pub started: Instant,
    pub configs: Arc<SensorConfigs>,
    pub sync: ConfigSyncChannel,
    pub readings: FreshQueue<SensorReading>,
    pub connectivity: Arc<Connectivity>,
    pub supervisor: SupervisorHandle,
    pub status: StatusLed,
    pub errors: ErrorReporter,
    pub backoff: BackoffController,
    pub registry: Arc<WorkerRegistry>,
    pub patches: mpsc::Sender<PatchRequest>,
    pub storage_requests: mpsc::Sender<StorageRequest>,
    pub adc: Arc<dyn AnalogFrontend>,
    pub network: Arc<dyn Network>,
    pub http: Arc<dyn HttpTransport>,
    pub store: Arc<dyn KvStore>,
    pub probe: Arc<dyn ResourceProbe>,
}

pub struct NodeParts {
    pub supervisor: Option<HealthSupervisor>,
    pub indicator: Option<mpsc::Receiver<SystemState>>,
    pub status_sink: Option<Box<dyn StatusSink>>,
    pub pipeline: Option<ErrorReportingPipeline>,
    pub patches: Option<mpsc::Receiver<PatchRequest>>,
    pub storage_requests: Option<mpsc::Receiver<StorageRequest>>,
    pub writer: Option<ConfigWriter>,
    pub writer_tx: Option<oneshot::Sender<ConfigWriter>>,
    pub writer_rx: Option<oneshot::Receiver<ConfigWriter>>,
    pub mqtt: Option<Box<dyn MqttTransport>>,
}

impl NodeContext {
    pub fn build(config: NodeConfig, collaborators: Collaborators) -> (Arc<NodeContext>, NodeParts) {
        let limits = &config.limits;
        let timing = &config.timing;

        let (status, indicator_rx) = StatusLed::channel(limits.status_queue);
        let (supervisor, supervisor_handle) = HealthSupervisor::new(
            limits.supervisor_queue,
            collaborators.probe.clone(),
            status.clone(),
            Duration::from_secs(timing.supervisor_recv_secs),
            Duration::from_secs(timing.liveness_secs),
        );

        let connectivity = Arc::new(Connectivity::new());
        let (pipeline, errors) = ErrorReportingPipeline::new(
            limits.error_queue,
            ErrorDeduplicator::new(limits.dedup_capacity, Duration::from_secs(timing.dedup_window_secs)),
            collaborators.http.clone(),
            connectivity.clone(),
            PipelineSettings {
                url: config.backend.error_log_url.clone(),
                request_timeout: config.backend.timeout(),
                wait: Duration::from_secs(timing.pipeline_wait_secs),
                retry_capacity: limits.retry_queue,
                retry_drain: limits.retry_drain,
                forced_retry_drain: limits.forced_retry_drain,
                sweep_every: Duration::from_secs(timing.dedup_sweep_secs),
                stats_every: Duration::from_secs(timing.pipeline_stats_secs),
                device_serial: config.device.client_id.clone(),
            },
        );

        let registry = Arc::new(WorkerRegistry::new());
        let backoff = BackoffController::new(timing.backoff_stages(), limits.failure_threshold, registry.clone());
        let (configs, writer) = SensorConfigs::new(&config);
        let (patch_tx, patch_rx) = mpsc::channel(PATCH_QUEUE);
        let (storage_tx, storage_rx) = mpsc::channel(STORAGE_QUEUE);
        let readings = FreshQueue::new(limits.sensor_queue);
        let (writer_tx, writer_rx) = oneshot::channel();

        let ctx = Arc::new(NodeContext {
            started: Instant::now(),
            configs,
            sync: ConfigSyncChannel::new(),
            readings,
            connectivity,
            supervisor: supervisor_handle,
            status,
            errors,
            backoff,
            registry,
            patches: patch_tx,
            storage_requests: storage_tx,
            adc: collaborators.adc,
            network: collaborators.network,
            http: collaborators.http,
            store: collaborators.store,
            probe: collaborators.probe,
            config,
        });

        let parts = NodeParts {
            supervisor: Some(supervisor),
            indicator: Some(indicator_rx),
            status_sink: collaborators.status_sink,
            pipeline: Some(pipeline),
            patches: Some(patch_rx),
            storage_requests: Some(storage_rx),
            writer: Some(writer),
            writer_tx: Some(writer_tx),
            writer_rx: Some(writer_rx),
            mqtt: collaborators.mqtt,
        };
        (ctx, parts)
    }

    pub fn sensor_event(
        &self,
        kind: SensorKind,
        error_code: &str,
        severity: Severity,
        message: impl Into<String>,
    ) -> ErrorEvent {
        let id = self.configs.get(kind).and_then(|config| config.sensor_id);
        ErrorEvent::new(ErrorSource::Sensor(id), error_code, severity, message)
            .with_origin(String::new(), self.config.device.serial(kind))
    }

    pub fn submit_system_error(&self, error_code: &str, severity: Severity, message: &str, details: Value) {
        let ids = self.configs.sensor_ids();
        if ids.is_empty() {
            let event = ErrorEvent::new(ErrorSource::System, error_code, severity, message).with_details(details);
            let _ = self.errors.submit(event);
            return;
        }
        for event in ErrorEvent::system_for_sensors(&ids, error_code, severity, message, details) {
            // Drops are counted by the reporter.
            let _ = self.errors.submit(event);
        }
    }

    pub fn uptime_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}
