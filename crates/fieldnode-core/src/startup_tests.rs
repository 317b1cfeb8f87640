use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{sleep, Instant};

use crate::config::TimingConfig;
use crate::startup::{
    default_plan, Fallback, GateSignal, Stage, StageFailure, StageLauncher, StartupError, StartupEvent,
    StartupSequencer,
};

#[derive(Clone, Copy)]
enum GateBehavior {
    After(Duration),
    Never,
}

#[derive(Default)]
struct ScriptedLauncher {
    gates: HashMap<Stage, GateBehavior>,
    failing: Vec<Stage>,
    held: Vec<GateSignal>,
    launched: Vec<(Stage, Instant)>,
    fallbacks: Vec<(Stage, Fallback)>,
    ready: bool,
}

impl ScriptedLauncher {
    fn gate(mut self, stage: Stage, behavior: GateBehavior) -> Self {
        self.gates.insert(stage, behavior);
        self
    }

    fn failing(mut self, stage: Stage) -> Self {
        self.failing.push(stage);
        self
    }
}

#[async_trait]
impl StageLauncher for ScriptedLauncher {
    async fn launch(&mut self, stage: Stage, gate: Option<GateSignal>) -> Result<(), StageFailure> {
        self.launched.push((stage, Instant::now()));
        if self.failing.contains(&stage) {
            return Err(StageFailure(format!("{stage} broke")));
        }
        if let Some(gate) = gate {
            match self.gates.get(&stage).copied().unwrap_or(GateBehavior::After(Duration::ZERO)) {
                GateBehavior::After(delay) => {
                    tokio::spawn(async move {
                        sleep(delay).await;
                        gate.complete();
                    });
                }
                GateBehavior::Never => self.held.push(gate),
            }
        }
        Ok(())
    }

    async fn apply_fallback(&mut self, stage: Stage, fallback: Fallback) {
        self.fallbacks.push((stage, fallback));
    }

    async fn ready(&mut self) {
        self.ready = true;
    }
}

fn sequencer() -> StartupSequencer {
    StartupSequencer::new(default_plan(&TimingConfig::default()))
}

#[tokio::test(start_paused = true)]
async fn stages_start_in_declared_order() {
    // Arrange
    let mut launcher = ScriptedLauncher::default()
        .gate(Stage::InitialCheck, GateBehavior::After(Duration::from_secs(2)))
        .gate(Stage::Network, GateBehavior::After(Duration::from_secs(7)))
        .gate(Stage::SensorConfig, GateBehavior::After(Duration::from_millis(10)));

    // Act
    let report = sequencer().run(&mut launcher).await.expect("startup succeeds");

    // Assert
    let order: Vec<Stage> = launcher.launched.iter().map(|(stage, _)| *stage).collect();
    assert_eq!(
        order,
        vec![
            Stage::Storage,
            Stage::StatusIndicator,
            Stage::InitialCheck,
            Stage::Network,
            Stage::SensorConfig,
            Stage::Sampling,
            Stage::Reporting,
            Stage::ConfigIngest,
            Stage::StorageMaintenance,
        ]
    );
    assert!(report.happened_before(
        &StartupEvent::Completed(Stage::Storage),
        &StartupEvent::Started(Stage::Network)
    ));
    assert!(report.happened_before(
        &StartupEvent::Started(Stage::Network),
        &StartupEvent::Started(Stage::SensorConfig)
    ));
    assert!(report.happened_before(
        &StartupEvent::Completed(Stage::Network),
        &StartupEvent::Started(Stage::SensorConfig)
    ));
    assert!(report.fallbacks().is_empty());
    assert!(launcher.ready);
}

#[tokio::test(start_paused = true)]
async fn sensor_config_waits_for_network_gate() {
    // Arrange
    let mut launcher =
        ScriptedLauncher::default().gate(Stage::Network, GateBehavior::After(Duration::from_secs(12)));

    // Act
    sequencer().run(&mut launcher).await.expect("startup succeeds");

    // Assert
    let at = |stage: Stage| {
        launcher
            .launched
            .iter()
            .find(|(s, _)| *s == stage)
            .map(|(_, at)| *at)
            .expect("stage launched")
    };
    assert_eq!(at(Stage::SensorConfig) - at(Stage::Network), Duration::from_secs(12));
}

#[tokio::test(start_paused = true)]
async fn network_timeout_falls_back_to_worker_retry() {
    // Arrange
    let mut launcher = ScriptedLauncher::default().gate(Stage::Network, GateBehavior::Never);
    let started = Instant::now();

    // Act
    let report = sequencer().run(&mut launcher).await.expect("network timeout is not fatal");

    // Assert
    assert_eq!(started.elapsed(), Duration::from_secs(30));
    assert!(report.position(&StartupEvent::TimedOut(Stage::Network)).is_some());
    assert_eq!(launcher.fallbacks, vec![(Stage::Network, Fallback::RelyOnWorkerRetry)]);
    assert!(launcher.ready);
}

#[tokio::test(start_paused = true)]
async fn sensor_config_timeout_uses_compiled_defaults() {
    // Arrange
    let mut launcher = ScriptedLauncher::default().gate(Stage::SensorConfig, GateBehavior::Never);

    // Act
    let report = sequencer().run(&mut launcher).await.expect("config timeout is not fatal");

    // Assert
    assert_eq!(report.fallbacks(), vec![(Stage::SensorConfig, Fallback::CompiledDefaults)]);
    assert!(report.happened_before(
        &StartupEvent::FellBack(Stage::SensorConfig, Fallback::CompiledDefaults),
        &StartupEvent::Started(Stage::Sampling)
    ));
}

#[tokio::test(start_paused = true)]
async fn initial_check_timeout_is_fatal() {
    // Arrange
    let mut launcher = ScriptedLauncher::default().gate(Stage::InitialCheck, GateBehavior::Never);

    // Act
    let result = sequencer().run(&mut launcher).await;

    // Assert
    assert!(matches!(result, Err(StartupError::Fatal { stage: Stage::InitialCheck, .. })));
    assert!(!launcher.launched.iter().any(|(stage, _)| *stage == Stage::Network));
    assert!(!launcher.ready);
}

#[tokio::test(start_paused = true)]
async fn storage_failure_is_fatal_before_anything_else_starts() {
    // Arrange
    let mut launcher = ScriptedLauncher::default().failing(Stage::Storage);

    // Act
    let result = sequencer().run(&mut launcher).await;

    // Assert
    assert_eq!(
        result,
        Err(StartupError::Fatal {
            stage: Stage::Storage,
            reason: "storage broke".to_string()
        })
    );
    assert_eq!(launcher.launched.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn config_ingest_failure_is_tolerated() {
    // Arrange
    let mut launcher = ScriptedLauncher::default().failing(Stage::ConfigIngest);

    // Act
    let report = sequencer().run(&mut launcher).await.expect("ingest is best effort");

    // Assert
    assert!(report
        .position(&StartupEvent::Failed(Stage::ConfigIngest, "config_ingest broke".to_string()))
        .is_some());
    assert!(report.happened_before(
        &StartupEvent::Failed(Stage::ConfigIngest, "config_ingest broke".to_string()),
        &StartupEvent::Completed(Stage::StorageMaintenance)
    ));
}

#[tokio::test(start_paused = true)]
async fn maintenance_failure_is_fatal() {
    // Arrange
    let mut launcher = ScriptedLauncher::default().failing(Stage::StorageMaintenance);

    // Act
    let result = sequencer().run(&mut launcher).await;

    // Assert
    assert!(matches!(result, Err(StartupError::Fatal { stage: Stage::StorageMaintenance, .. })));
}
