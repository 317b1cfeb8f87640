use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, Notify};
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

use crate::connectivity::Connectivity;
use crate::dedup::ErrorDeduplicator;
use crate::error_event::ErrorEvent;
use crate::hal::HttpTransport;
use crate::worker::PauseGate;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("error queue full, event dropped")]
pub struct QueueFull;

#[derive(Debug, Default)]
pub struct PipelineCounters {
    sent: AtomicU64,
    failed: AtomicU64,
    duplicates: AtomicU64,
    dropped: AtomicU64,
    retry_pending: AtomicUsize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PipelineStats {
    pub sent: u64,
    pub failed: u64,
    pub duplicates: u64,
    pub dropped: u64,
    pub pending: usize,
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub url: String,
    pub request_timeout: Duration,
    pub wait: Duration,
    pub retry_capacity: usize,
    pub retry_drain: usize,
    pub forced_retry_drain: usize,
    pub sweep_every: Duration,
    pub stats_every: Duration,
    pub device_serial: String,
}

#[derive(Clone)]
pub struct ErrorReporter {
    tx: mpsc::Sender<ErrorEvent>,
    force: Arc<Notify>,
    counters: Arc<PipelineCounters>,
    device_serial: Arc<str>,
}

impl ErrorReporter {
    pub fn submit(&self, mut event: ErrorEvent) -> Result<(), QueueFull> {
        if event.device_serial.is_empty() {
            event.device_serial = self.device_serial.to_string();
        }
        self.tx.try_send(event).map_err(|_| {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            QueueFull
        })
    }

    pub fn pending_count(&self) -> usize {
        let queued = self.tx.max_capacity() - self.tx.capacity();
        queued + self.counters.retry_pending.load(Ordering::Relaxed)
    }

    pub fn force_retry(&self) {
        self.force.notify_one();
    }

    pub fn stats(&self) -> PipelineStats {
        self.counters.snapshot(self.pending_count())
    }
}

impl PipelineCounters {
    fn snapshot(&self, pending: usize) -> PipelineStats {
        PipelineStats {
            sent: self.sent.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            pending,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Sent,
    Failed,
    Duplicate,
    Idle,
    Closed,
}

pub struct ErrorReportingPipeline {
    rx: mpsc::Receiver<ErrorEvent>,
    force: Arc<Notify>,
    counters: Arc<PipelineCounters>,
    dedup: ErrorDeduplicator,
    retry: VecDeque<ErrorEvent>,
    http: Arc<dyn HttpTransport>,
    connectivity: Arc<Connectivity>,
    settings: PipelineSettings,
    next_sweep: Instant,
    next_stats: Instant,
}

impl ErrorReportingPipeline {
    pub fn new(
        queue_capacity: usize,
        dedup: ErrorDeduplicator,
        http: Arc<dyn HttpTransport>,
        connectivity: Arc<Connectivity>,
        settings: PipelineSettings,
    ) -> (ErrorReportingPipeline, ErrorReporter) {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let force = Arc::new(Notify::new());
        let counters = Arc::new(PipelineCounters::default());
        let handle = ErrorReporter {
            tx,
            force: force.clone(),
            counters: counters.clone(),
            device_serial: Arc::from(settings.device_serial.as_str()),
        };
        let now = Instant::now();
        let pipeline = ErrorReportingPipeline {
            rx,
            force,
            counters,
            dedup,
            retry: VecDeque::with_capacity(settings.retry_capacity),
            http,
            connectivity,
            next_sweep: now + settings.sweep_every,
            next_stats: now + settings.stats_every,
            settings,
        };
        (pipeline, handle)
    }

    pub fn dedup(&self) -> &ErrorDeduplicator {
        &self.dedup
    }

    pub fn retry_len(&self) -> usize {
        self.retry.len()
    }

    pub async fn run(mut self, gate: PauseGate) {
        info!(url = %self.settings.url, "error pipeline started");
        loop {
            gate.checkpoint().await;
            if self.cycle().await == CycleOutcome::Closed {
                debug!("error queue closed, pipeline keeps draining retries");
                tokio::time::sleep(self.settings.wait).await;
            }
        }
    }

    pub async fn cycle(&mut self) -> CycleOutcome {
        let (event, forced) = tokio::select! {
            biased;
            _ = self.force.notified() => (None, true),
            received = timeout(self.settings.wait, self.rx.recv()) => match received {
                Ok(Some(event)) => (Some(event), false),
                Ok(None) => (None, false),
                Err(_) => (None, false),
            },
        };
        let closed = event.is_none() && !forced && self.rx.is_closed() && self.rx.is_empty();

        let outcome = match event {
            Some(event) => self.handle_primary(event).await,
            None if closed => CycleOutcome::Closed,
            None => CycleOutcome::Idle,
        };

        let budget = if forced {
            self.settings.forced_retry_drain
        } else {
            self.settings.retry_drain
        };
        self.drain_retries(budget).await;
        self.housekeeping();
        outcome
    }

    async fn handle_primary(&mut self, event: ErrorEvent) -> CycleOutcome {
        let (duplicate, count) = self.dedup.is_duplicate(&event);
        if duplicate {
            self.counters.duplicates.fetch_add(1, Ordering::Relaxed);
            debug!(code = %event.error_code, count, "duplicate error suppressed");
            return CycleOutcome::Duplicate;
        }

        self.connectivity.wait_connected().await;

        if self.transmit(&event, count).await {
            self.dedup.mark_sent(&event);
            CycleOutcome::Sent
        } else {
            self.push_retry(event);
            CycleOutcome::Failed
        }
    }

    async fn drain_retries(&mut self, budget: usize) {
        // Each queued event is attempted at most once per drain.
        let attempts = budget.min(self.retry.len());
        for _ in 0..attempts {
            if !self.connectivity.is_connected() {
                break;
            }
            let Some(event) = self.retry.pop_front() else {
                break;
            };
            // Repeats seen while the event waited are reported with it.
            let count = self.dedup.occurrences(&event).unwrap_or(1);
            if self.transmit(&event, count).await {
                self.dedup.mark_sent(&event);
            } else if !self.connectivity.is_connected() {
                self.retry.push_front(event);
                break;
            } else {
                self.push_retry(event);
            }
        }
        self.counters
            .retry_pending
            .store(self.retry.len(), Ordering::Relaxed);
    }

    fn push_retry(&mut self, event: ErrorEvent) {
        if self.retry.len() >= self.settings.retry_capacity.max(1) {
            if let Some(oldest) = self.retry.pop_front() {
                warn!(code = %oldest.error_code, "retry queue full, oldest error dropped");
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.retry.push_back(event);
        self.counters
            .retry_pending
            .store(self.retry.len(), Ordering::Relaxed);
    }

    async fn transmit(&mut self, event: &ErrorEvent, occurrences: u32) -> bool {
        let mut event = event.clone();
        if event.origin_address.is_empty() {
            if let Some(address) = self.connectivity.address() {
                event.origin_address = address.to_string();
            }
        }
        let payload = event.to_payload(occurrences);

        let result = timeout(
            self.settings.request_timeout,
            self.http.post_json(&self.settings.url, &payload),
        )
        .await;

        match result {
            Ok(Ok(response)) if response.is_success() => {
                self.counters.sent.fetch_add(1, Ordering::Relaxed);
                debug!(code = %event.error_code, occurrences, "error event sent");
                true
            }
            Ok(Ok(response)) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(code = %event.error_code, status = response.status, "error log rejected");
                false
            }
            Ok(Err(err)) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(code = %event.error_code, %err, "error log send failed");
                false
            }
            Err(_) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(code = %event.error_code, "error log send timed out");
                false
            }
        }
    }

    fn housekeeping(&mut self) {
        let now = Instant::now();
        if now >= self.next_sweep {
            let evicted = self.dedup.evict_expired(now);
            if evicted > 0 {
                debug!(evicted, "dedup entries expired");
            }
            self.next_sweep = now + self.settings.sweep_every;
        }
        if now >= self.next_stats {
            let stats = self.counters.snapshot(self.rx.len() + self.retry.len());
            info!(
                sent = stats.sent,
                failed = stats.failed,
                duplicates = stats.duplicates,
                dropped = stats.dropped,
                pending = stats.pending,
                "error pipeline stats"
            );
            self.next_stats = now + self.settings.stats_every;
        }
    }
}
