use std::collections::BTreeMap;
use std::fmt;
use std::sync::Mutex;

use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WorkerKind {
    Supervisor,
    StatusIndicator,
    InitialCheck,
    Network,
    SensorConfig,
    Sampling,
    Reporting,
    ErrorPipeline,
    ConfigIngest,
    StorageMaintenance,
}

impl WorkerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkerKind::Supervisor => "supervisor",
            WorkerKind::StatusIndicator => "status_indicator",
            WorkerKind::InitialCheck => "initial_check",
            WorkerKind::Network => "network",
            WorkerKind::SensorConfig => "sensor_config",
            WorkerKind::Sampling => "sampling",
            WorkerKind::Reporting => "reporting",
            WorkerKind::ErrorPipeline => "error_pipeline",
            WorkerKind::ConfigIngest => "config_ingest",
            WorkerKind::StorageMaintenance => "storage_maintenance",
        }
    }

    pub fn exempt_from_backoff(self) -> bool {
        matches!(self, WorkerKind::Supervisor | WorkerKind::StatusIndicator)
    }
}

impl fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct PauseGate {
    kind: WorkerKind,
    rx: watch::Receiver<bool>,
}

impl PauseGate {
    pub fn kind(&self) -> WorkerKind {
        self.kind
    }

    pub fn is_paused(&self) -> bool {
        *self.rx.borrow()
    }

    pub async fn checkpoint(&self) {
        let mut rx = self.rx.clone();
        // A dropped registry means nobody can pause us anymore.
        let _ = rx.wait_for(|paused| !*paused).await;
    }
}

#[derive(Debug, Default)]
pub struct WorkerRegistry {
    gates: Mutex<BTreeMap<WorkerKind, watch::Sender<bool>>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, kind: WorkerKind) -> PauseGate {
        let mut gates = self.lock();
        let tx = gates.entry(kind).or_insert_with(|| watch::channel(false).0);
        PauseGate {
            kind,
            rx: tx.subscribe(),
        }
    }

    pub fn suspend_all(&self) -> Vec<WorkerKind> {
        let gates = self.lock();
        gates
            .iter()
            .filter(|(kind, _)| !kind.exempt_from_backoff())
            .map(|(kind, tx)| {
                tx.send_replace(true);
                *kind
            })
            .collect()
    }

    pub fn resume_all(&self) {
        for tx in self.lock().values() {
            tx.send_replace(false);
        }
    }

    pub fn is_suspended(&self, kind: WorkerKind) -> bool {
        self.lock().get(&kind).map(|tx| *tx.borrow()).unwrap_or(false)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<WorkerKind, watch::Sender<bool>>> {
        self.gates.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
