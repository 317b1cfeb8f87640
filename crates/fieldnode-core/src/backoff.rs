use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::sleep;
use tracing::{info, warn};

use crate::worker::WorkerRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BackoffState {
    pub stage: usize,
    pub consecutive_failures: u32,
}

#[derive(Debug)]
pub struct BackoffController {
    stages: Vec<Duration>,
    threshold: u32,
    state: Mutex<BackoffState>,
    registry: Arc<WorkerRegistry>,
}

impl BackoffController {
    pub fn new(stages: Vec<Duration>, threshold: u32, registry: Arc<WorkerRegistry>) -> Self {
        let stages = if stages.is_empty() {
            vec![Duration::from_secs(300)]
        } else {
            stages
        };
        Self {
            stages,
            threshold: threshold.max(1),
            state: Mutex::new(BackoffState::default()),
            registry,
        }
    }

    pub fn state(&self) -> BackoffState {
        *self.lock()
    }

    pub fn stage(&self) -> usize {
        self.lock().stage
    }

    pub fn max_stage(&self) -> usize {
        self.stages.len() - 1
    }

    pub fn backoff_duration(&self, stage: usize) -> Duration {
        self.stages[stage.min(self.max_stage())]
    }

    /// Records one failed transmission. Returns the pause that was served
    /// when this failure crossed the threshold.
    pub async fn record_failure(&self) -> Option<Duration> {
        let (stage, pause) = {
            let mut state = self.lock();
            state.consecutive_failures += 1;
            if state.consecutive_failures < self.threshold {
                return None;
            }
            state.consecutive_failures = 0;
            (state.stage, self.backoff_duration(state.stage))
        };

        let suspended = self.registry.suspend_all();
        warn!(
            stage,
            pause_s = pause.as_secs(),
            workers = suspended.len(),
            "transmission failing, suspending workers"
        );

        sleep(pause).await;

        self.registry.resume_all();
        let next = {
            let mut state = self.lock();
            state.stage = (state.stage + 1).min(self.max_stage());
            state.stage
        };
        info!(next_stage = next, "backoff pause over, workers resumed");
        Some(pause)
    }

    pub fn record_success(&self) {
        let mut state = self.lock();
        if state.stage != 0 {
            info!(from_stage = state.stage, "transmission recovered, backoff reset");
        }
        *state = BackoffState::default();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BackoffState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
