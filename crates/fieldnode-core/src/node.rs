use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::config::NodeConfig;
use crate::context::{Collaborators, NodeContext, NodeParts};
use crate::hal::WifiCredentials;
use crate::sensor::SensorKind;
use crate::startup::{
    default_plan, Fallback, GateSignal, Stage, StageFailure, StageLauncher, StartupError, StartupReport,
    StartupSequencer,
};
use crate::status::{StatusIndicator, SystemState};
use crate::storage;
use crate::worker::WorkerKind;
use crate::workers::ingest::{connect_broker, IngestWorker};
use crate::workers::maintenance::{MaintenanceWorker, StorageRequest};
use crate::workers::reporting::ReportingWorker;
use crate::workers::sampling::SamplingWorker;
use crate::workers::{initial_check, network, sensor_setup};

pub const EXIT_RESTART: i32 = 75;

pub struct NodeRuntime {
    ctx: Arc<NodeContext>,
    parts: NodeParts,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl NodeRuntime {
    pub fn new(config: NodeConfig, collaborators: Collaborators) -> Self {
        let (ctx, parts) = NodeContext::build(config, collaborators);
        Self {
            ctx,
            parts,
            tasks: Vec::new(),
        }
    }

    pub fn context(&self) -> &Arc<NodeContext> {
        &self.ctx
    }

    pub fn workers(&self) -> Vec<&'static str> {
        self.tasks.iter().map(|(name, _)| *name).collect()
    }

    pub fn provision(&self, credentials: WifiCredentials) -> bool {
        self.ctx
            .storage_requests
            .try_send(StorageRequest::SaveCredentials(credentials))
            .is_ok()
    }

    pub async fn start(&mut self) -> Result<StartupReport, StartupError> {
        let sequencer = StartupSequencer::new(default_plan(&self.ctx.config.timing));
        sequencer.run(self).await
    }

    pub async fn run(mut self) {
        let Some(supervisor) = self.parts.supervisor.take() else {
            warn!("supervisor already taken");
            return;
        };
        supervisor.run().await;
    }

    pub fn shutdown(&mut self) {
        for (name, task) in self.tasks.drain(..) {
            task.abort();
            info!(worker = name, "worker stopped");
        }
    }

    fn spawn<F>(&mut self, name: &'static str, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.push((name, tokio::spawn(task)));
    }

    fn missing(what: &str) -> StageFailure {
        StageFailure(format!("{what} unavailable"))
    }

    fn require_gate(gate: Option<GateSignal>) -> Result<GateSignal, StageFailure> {
        gate.ok_or_else(|| Self::missing("stage gate"))
    }

    fn open_storage(&self) -> Result<(), StageFailure> {
        let credentials =
            storage::load_credentials(self.ctx.store.as_ref()).map_err(|err| StageFailure(err.to_string()))?;
        info!(provisioned = credentials.is_some(), "storage opened");
        Ok(())
    }

    fn launch_status_indicator(&mut self) -> Result<(), StageFailure> {
        let rx = self.parts.indicator.take().ok_or_else(|| Self::missing("status channel"))?;
        let sink = self
            .parts
            .status_sink
            .take()
            .ok_or_else(|| Self::missing("status indicator"))?;
        let indicator = StatusIndicator::new(rx, sink, self.ctx.registry.register(WorkerKind::StatusIndicator));
        self.spawn("status_indicator", indicator.run());
        self.ctx.status.set(SystemState::Init);
        Ok(())
    }

    fn launch_sensor_config(&mut self, gate: Option<GateSignal>) -> Result<(), StageFailure> {
        let writer = self.parts.writer.take().ok_or_else(|| Self::missing("configuration writer"))?;
        let handoff = self.parts.writer_tx.take().ok_or_else(|| Self::missing("writer handoff"))?;
        let ctx = self.ctx.clone();
        self.spawn("sensor_config", async move {
            let writer = sensor_setup::run(ctx, writer, gate).await;
            if handoff.send(writer).is_err() {
                warn!("configuration ingest gone, writer dropped");
            }
        });
        Ok(())
    }

    fn launch_reporting(&mut self) -> Result<(), StageFailure> {
        let pipeline = self.parts.pipeline.take().ok_or_else(|| Self::missing("error pipeline"))?;
        self.spawn("error_pipeline", pipeline.run(self.ctx.registry.register(WorkerKind::ErrorPipeline)));
        let reporting = ReportingWorker::new(self.ctx.clone());
        self.spawn("reporting", reporting.run(self.ctx.registry.register(WorkerKind::Reporting)));
        Ok(())
    }

    async fn launch_config_ingest(&mut self) -> Result<(), StageFailure> {
        let patches = self.parts.patches.take().ok_or_else(|| Self::missing("patch inbox"))?;
        let writer = self.parts.writer_rx.take().ok_or_else(|| Self::missing("writer handoff"))?;
        let mut mqtt = self.parts.mqtt.take();

        let connected = match mqtt.as_mut() {
            Some(client) => {
                match timeout(self.ctx.config.backend.timeout(), connect_broker(client.as_mut(), &self.ctx)).await {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(err)) => Err(StageFailure(format!("broker connect failed: {err}"))),
                    Err(_) => Err(StageFailure("broker connect timed out".to_string())),
                }
            }
            None => Err(Self::missing("broker")),
        };

        // Backend response patches still need a writer, so the worker runs
        // even without a broker.
        let worker = IngestWorker::new(self.ctx.clone(), writer, patches, mqtt, connected.is_ok());
        self.spawn("config_ingest", worker.run(self.ctx.registry.register(WorkerKind::ConfigIngest)));
        connected
    }

    fn launch_storage_maintenance(&mut self) -> Result<(), StageFailure> {
        let requests = self
            .parts
            .storage_requests
            .take()
            .ok_or_else(|| Self::missing("storage inbox"))?;
        let worker = MaintenanceWorker::new(self.ctx.clone(), requests);
        worker.open().map_err(|err| StageFailure(err.to_string()))?;
        self.spawn(
            "storage_maintenance",
            worker.run(self.ctx.registry.register(WorkerKind::StorageMaintenance)),
        );
        Ok(())
    }
}

#[async_trait]
impl StageLauncher for NodeRuntime {
    async fn launch(&mut self, stage: Stage, gate: Option<GateSignal>) -> Result<(), StageFailure> {
        match stage {
            Stage::Storage => self.open_storage(),
            Stage::StatusIndicator => self.launch_status_indicator(),
            Stage::InitialCheck => {
                let gate = Self::require_gate(gate)?;
                let ctx = self.ctx.clone();
                self.spawn("initial_check", async move {
                    let report = initial_check::run(ctx, gate).await;
                    info!(
                        ok = report.channels_ok.len(),
                        failed = report.channels_failed.len(),
                        memory_low = report.memory_low,
                        "initial check finished"
                    );
                });
                Ok(())
            }
            Stage::Network => {
                let pause = self.ctx.registry.register(WorkerKind::Network);
                self.spawn("network", network::run(self.ctx.clone(), gate, pause));
                Ok(())
            }
            Stage::SensorConfig => self.launch_sensor_config(gate),
            Stage::Sampling => {
                for kind in SensorKind::ALL {
                    let worker = SamplingWorker::new(kind, self.ctx.clone());
                    let pause = self.ctx.registry.register(WorkerKind::Sampling);
                    self.spawn(kind.as_str(), worker.run(pause));
                }
                Ok(())
            }
            Stage::Reporting => self.launch_reporting(),
            Stage::ConfigIngest => self.launch_config_ingest().await,
            Stage::StorageMaintenance => self.launch_storage_maintenance(),
        }
    }

    async fn apply_fallback(&mut self, stage: Stage, fallback: Fallback) {
        match fallback {
            Fallback::RelyOnWorkerRetry => {
                warn!(%stage, "continuing offline, worker keeps retrying");
                self.ctx.status.set(SystemState::WaitingWifi);
                self.ctx
                    .supervisor
                    .send_status(WorkerKind::Supervisor, format!("{stage} not ready, continuing"));
            }
            Fallback::CompiledDefaults => {
                // Configs start out as defaults; the loader overwrites them when it finishes.
                warn!(%stage, "continuing with compiled-in sensor defaults");
            }
        }
    }

    async fn ready(&mut self) {
        info!(workers = self.tasks.len(), "system ready");
        self.ctx.supervisor.send_status(WorkerKind::Supervisor, "system ready");
    }
}
