use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, error, info};

use crate::hal::ResourceProbe;
use crate::status::{StatusLed, SystemState};
use crate::worker::WorkerKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Heartbeat,
    ErrorReport,
    StatusUpdate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Diagnostics {
    pub free_heap: Option<u64>,
    pub free_stack: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct SupervisorMessage {
    pub kind: MessageKind,
    pub source: WorkerKind,
    pub error_code: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub diagnostics: Diagnostics,
}

#[derive(Clone)]
pub struct SupervisorHandle {
    tx: mpsc::Sender<SupervisorMessage>,
    probe: Arc<dyn ResourceProbe>,
    dropped: Arc<AtomicU64>,
}

impl SupervisorHandle {
    pub fn send_heartbeat(&self, source: WorkerKind, message: impl Into<String>) {
        self.post(MessageKind::Heartbeat, source, None, message.into());
    }

    pub fn report_error(&self, source: WorkerKind, error_code: &str, message: impl Into<String>) {
        self.post(MessageKind::ErrorReport, source, Some(error_code.to_string()), message.into());
    }

    pub fn send_status(&self, source: WorkerKind, message: impl Into<String>) {
        self.post(MessageKind::StatusUpdate, source, None, message.into());
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn post(&self, kind: MessageKind, source: WorkerKind, error_code: Option<String>, message: String) {
        let msg = SupervisorMessage {
            kind,
            source,
            error_code,
            timestamp: Utc::now(),
            message,
            diagnostics: Diagnostics {
                free_heap: self.probe.free_heap(),
                free_stack: self.probe.free_stack(),
            },
        };
        if self.tx.try_send(msg).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Handled(MessageKind),
    Idle,
    Liveness,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SupervisorStats {
    pub heartbeats: u64,
    pub errors: u64,
    pub status_updates: u64,
}

pub struct HealthSupervisor {
    rx: mpsc::Receiver<SupervisorMessage>,
    status: StatusLed,
    recv_timeout: Duration,
    liveness_every: Duration,
    last_liveness: Instant,
    closed: bool,
    stats: SupervisorStats,
}

impl HealthSupervisor {
    pub fn new(
        capacity: usize,
        probe: Arc<dyn ResourceProbe>,
        status: StatusLed,
        recv_timeout: Duration,
        liveness_every: Duration,
    ) -> (HealthSupervisor, SupervisorHandle) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = SupervisorHandle {
            tx,
            probe,
            dropped: Arc::new(AtomicU64::new(0)),
        };
        let supervisor = HealthSupervisor {
            rx,
            status,
            recv_timeout,
            liveness_every,
            last_liveness: Instant::now(),
            closed: false,
            stats: SupervisorStats::default(),
        };
        (supervisor, handle)
    }

    pub fn stats(&self) -> SupervisorStats {
        self.stats
    }

    pub async fn step(&mut self) -> StepOutcome {
        let received = if self.closed {
            sleep(self.recv_timeout).await;
            None
        } else {
            match timeout(self.recv_timeout, self.rx.recv()).await {
                Ok(Some(msg)) => Some(msg),
                Ok(None) => {
                    self.closed = true;
                    None
                }
                Err(_) => None,
            }
        };

        match received {
            Some(msg) => {
                let kind = msg.kind;
                self.handle(msg);
                StepOutcome::Handled(kind)
            }
            None => self.idle(),
        }
    }

    pub async fn run(mut self) {
        info!("system ready, supervisor running");
        self.status.set(SystemState::Ready);
        loop {
            self.step().await;
        }
    }

    fn handle(&mut self, msg: SupervisorMessage) {
        let source = msg.source.as_str();
        match msg.kind {
            MessageKind::ErrorReport => {
                self.stats.errors += 1;
                error!(
                    worker = source,
                    code = msg.error_code.as_deref().unwrap_or("-"),
                    free_heap = msg.diagnostics.free_heap,
                    "{}",
                    msg.message
                );
                self.status.set(SystemState::Error);
            }
            MessageKind::Heartbeat => {
                self.stats.heartbeats += 1;
                debug!(worker = source, "heartbeat: {}", msg.message);
                match msg.source {
                    WorkerKind::Sampling => self.status.set(SystemState::SensorRead),
                    WorkerKind::Reporting => self.status.set(SystemState::HttpSend),
                    _ => {}
                }
            }
            MessageKind::StatusUpdate => {
                self.stats.status_updates += 1;
                info!(worker = source, "{}", msg.message);
            }
        }
    }

    fn idle(&mut self) -> StepOutcome {
        if self.last_liveness.elapsed() < self.liveness_every {
            return StepOutcome::Idle;
        }
        self.last_liveness = Instant::now();
        info!(
            heartbeats = self.stats.heartbeats,
            errors = self.stats.errors,
            status_updates = self.stats.status_updates,
            "supervisor alive"
        );
        self.status.set(SystemState::Ready);
        StepOutcome::Liveness
    }
}
