use std::f32::consts::PI;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::hal::{Rgb, StatusSink};
use crate::worker::PauseGate;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemState {
    Init,
    Wifi,
    Config,
    WaitingWifi,
    Ready,
    SensorRead,
    HttpSend,
    Error,
    Warning,
}

impl SystemState {
    pub fn color(self) -> Rgb {
        match self {
            SystemState::Init => Rgb(255, 255, 0),
            SystemState::Wifi | SystemState::Config | SystemState::WaitingWifi => Rgb(0, 0, 255),
            SystemState::Ready | SystemState::SensorRead | SystemState::HttpSend => Rgb(0, 255, 0),
            SystemState::Error => Rgb(255, 0, 0),
            SystemState::Warning => Rgb(200, 100, 0),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StatusLed {
    tx: mpsc::Sender<SystemState>,
    dropped: Arc<AtomicU64>,
}

impl StatusLed {
    pub fn channel(capacity: usize) -> (StatusLed, mpsc::Receiver<SystemState>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            StatusLed {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    pub fn set(&self, state: SystemState) {
        if self.tx.try_send(state).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

pub const INIT_HOLD: Duration = Duration::from_secs(4);
const FRAME: Duration = Duration::from_millis(50);

pub fn heartbeat_brightness(elapsed: Duration) -> u8 {
    let phase = (elapsed.as_secs_f32() * 2.0 * PI).sin();
    let level = 0.55 + 0.45 * phase;
    (level * 255.0).round().clamp(25.0, 255.0) as u8
}

pub struct StatusIndicator {
    rx: mpsc::Receiver<SystemState>,
    sink: Box<dyn StatusSink>,
    gate: PauseGate,
    started: Instant,
    current: SystemState,
    requested: SystemState,
    sink_failed: bool,
}

impl StatusIndicator {
    pub fn new(rx: mpsc::Receiver<SystemState>, sink: Box<dyn StatusSink>, gate: PauseGate) -> Self {
        Self {
            rx,
            sink,
            gate,
            started: Instant::now(),
            current: SystemState::Init,
            requested: SystemState::Init,
            sink_failed: false,
        }
    }

    pub fn current(&self) -> SystemState {
        self.current
    }

    /// Takes pending requests and returns the state to show. `Init` is held
    /// for the first few seconds whatever is requested.
    pub fn poll_state(&mut self) -> SystemState {
        while let Ok(state) = self.rx.try_recv() {
            self.requested = state;
        }
        let next = if self.started.elapsed() < INIT_HOLD {
            SystemState::Init
        } else {
            self.requested
        };
        if next != self.current {
            debug!(from = ?self.current, to = ?next, "status indicator");
            self.current = next;
        }
        next
    }

    pub fn render(&mut self) {
        let state = self.poll_state();
        let color = state.color().scaled(heartbeat_brightness(self.started.elapsed()));
        match self.sink.show(color) {
            Ok(()) => self.sink_failed = false,
            Err(err) if !self.sink_failed => {
                warn!(%err, "status indicator write failed");
                self.sink_failed = true;
            }
            Err(_) => {}
        }
    }

    pub async fn run(mut self) {
        let mut frames = interval(FRAME);
        frames.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            frames.tick().await;
            self.gate.checkpoint().await;
            self.render();
        }
    }
}
