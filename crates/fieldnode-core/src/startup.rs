use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::config::TimingConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Storage,
    StatusIndicator,
    InitialCheck,
    Network,
    SensorConfig,
    Sampling,
    Reporting,
    ConfigIngest,
    StorageMaintenance,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Storage => "storage",
            Stage::StatusIndicator => "status_indicator",
            Stage::InitialCheck => "initial_check",
            Stage::Network => "network",
            Stage::SensorConfig => "sensor_config",
            Stage::Sampling => "sampling",
            Stage::Reporting => "reporting",
            Stage::ConfigIngest => "config_ingest",
            Stage::StorageMaintenance => "storage_maintenance",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fallback {
    RelyOnWorkerRetry,
    CompiledDefaults,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutPolicy {
    Fatal,
    Continue(Fallback),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    Fatal,
    BestEffort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageSpec {
    pub stage: Stage,
    pub gate: Option<Duration>,
    pub on_timeout: TimeoutPolicy,
    pub on_failure: FailurePolicy,
}

impl StageSpec {
    const fn ungated(stage: Stage, on_failure: FailurePolicy) -> Self {
        Self {
            stage,
            gate: None,
            on_timeout: TimeoutPolicy::Fatal,
            on_failure,
        }
    }

    const fn gated(stage: Stage, gate: Duration, on_timeout: TimeoutPolicy) -> Self {
        Self {
            stage,
            gate: Some(gate),
            on_timeout,
            on_failure: FailurePolicy::Fatal,
        }
    }
}

pub fn default_plan(timing: &TimingConfig) -> Vec<StageSpec> {
    vec![
        StageSpec::ungated(Stage::Storage, FailurePolicy::Fatal),
        StageSpec::ungated(Stage::StatusIndicator, FailurePolicy::Fatal),
        StageSpec::gated(
            Stage::InitialCheck,
            Duration::from_secs(timing.initial_check_gate_secs),
            TimeoutPolicy::Fatal,
        ),
        StageSpec::gated(
            Stage::Network,
            Duration::from_secs(timing.network_gate_secs),
            TimeoutPolicy::Continue(Fallback::RelyOnWorkerRetry),
        ),
        StageSpec::gated(
            Stage::SensorConfig,
            Duration::from_secs(timing.sensor_config_gate_secs),
            TimeoutPolicy::Continue(Fallback::CompiledDefaults),
        ),
        StageSpec::ungated(Stage::Sampling, FailurePolicy::Fatal),
        StageSpec::ungated(Stage::Reporting, FailurePolicy::Fatal),
        StageSpec::ungated(Stage::ConfigIngest, FailurePolicy::BestEffort),
        StageSpec::ungated(Stage::StorageMaintenance, FailurePolicy::Fatal),
    ]
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StartupError {
    #[error("fatal failure in stage {stage}: {reason}")]
    Fatal { stage: Stage, reason: String },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct StageFailure(pub String);

#[derive(Debug)]
pub struct GateSignal {
    stage: Stage,
    tx: oneshot::Sender<()>,
}

impl GateSignal {
    pub fn pair(stage: Stage) -> (GateSignal, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (GateSignal { stage, tx }, rx)
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn complete(self) {
        // The sequencer may have timed out and moved on already.
        let _ = self.tx.send(());
    }
}

#[async_trait]
pub trait StageLauncher: Send {
    async fn launch(&mut self, stage: Stage, gate: Option<GateSignal>) -> Result<(), StageFailure>;

    async fn apply_fallback(&mut self, stage: Stage, fallback: Fallback);

    async fn ready(&mut self) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartupEvent {
    Started(Stage),
    Completed(Stage),
    TimedOut(Stage),
    FellBack(Stage, Fallback),
    Failed(Stage, String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartupReport {
    pub trace: Vec<StartupEvent>,
}

impl StartupReport {
    pub fn position(&self, event: &StartupEvent) -> Option<usize> {
        self.trace.iter().position(|e| e == event)
    }

    pub fn happened_before(&self, first: &StartupEvent, second: &StartupEvent) -> bool {
        match (self.position(first), self.position(second)) {
            (Some(a), Some(b)) => a < b,
            _ => false,
        }
    }

    pub fn fallbacks(&self) -> Vec<(Stage, Fallback)> {
        self.trace
            .iter()
            .filter_map(|event| match event {
                StartupEvent::FellBack(stage, fallback) => Some((*stage, *fallback)),
                _ => None,
            })
            .collect()
    }
}

pub struct StartupSequencer {
    plan: Vec<StageSpec>,
}

impl StartupSequencer {
    pub fn new(plan: Vec<StageSpec>) -> Self {
        Self { plan }
    }

    pub fn plan(&self) -> &[StageSpec] {
        &self.plan
    }

    /// Runs every stage strictly in order. A stage never starts before the
    /// previous gated stage completed or timed out.
    pub async fn run<L: StageLauncher + ?Sized>(&self, launcher: &mut L) -> Result<StartupReport, StartupError> {
        let mut report = StartupReport::default();

        for spec in &self.plan {
            let stage = spec.stage;
            info!(%stage, "starting stage");
            report.trace.push(StartupEvent::Started(stage));

            let (gate, done) = match spec.gate {
                Some(_) => {
                    let (gate, rx) = GateSignal::pair(stage);
                    (Some(gate), Some(rx))
                }
                None => (None, None),
            };

            if let Err(failure) = launcher.launch(stage, gate).await {
                report.trace.push(StartupEvent::Failed(stage, failure.0.clone()));
                match spec.on_failure {
                    FailurePolicy::Fatal => {
                        error!(%stage, reason = %failure, "stage failed");
                        return Err(StartupError::Fatal {
                            stage,
                            reason: failure.0,
                        });
                    }
                    FailurePolicy::BestEffort => {
                        warn!(%stage, reason = %failure, "optional stage failed, continuing");
                        continue;
                    }
                }
            }

            let (Some(limit), Some(done)) = (spec.gate, done) else {
                report.trace.push(StartupEvent::Completed(stage));
                continue;
            };

            match timeout(limit, done).await {
                Ok(Ok(())) => {
                    info!(%stage, "stage ready");
                    report.trace.push(StartupEvent::Completed(stage));
                }
                outcome => {
                    if matches!(outcome, Ok(Err(_))) {
                        warn!(%stage, "stage dropped its gate without signalling");
                    } else {
                        warn!(%stage, limit_s = limit.as_secs(), "stage gate timed out");
                    }
                    report.trace.push(StartupEvent::TimedOut(stage));
                    match spec.on_timeout {
                        TimeoutPolicy::Fatal => {
                            error!(%stage, "gate timeout is fatal");
                            return Err(StartupError::Fatal {
                                stage,
                                reason: "gate timed out".to_string(),
                            });
                        }
                        TimeoutPolicy::Continue(fallback) => {
                            info!(%stage, ?fallback, "continuing with fallback");
                            launcher.apply_fallback(stage, fallback).await;
                            report.trace.push(StartupEvent::FellBack(stage, fallback));
                        }
                    }
                }
            }
        }

        launcher.ready().await;
        info!(stages = self.plan.len(), "startup complete");
        Ok(report)
    }
}
