use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::context::NodeContext;
use crate::error_event::Severity;
use crate::hal::HardwareError;
use crate::sensor::{SensorKind, SensorReading};
use crate::worker::{PauseGate, WorkerKind};

pub const SENSOR_READ_ERROR: &str = "SENSOR_READ_ERROR";

/// Reads per forwarded reading: the interval rounded up to whole sample
/// periods, never less than one.
pub fn reads_per_report(interval_seconds: u32, period: Duration) -> u32 {
    let period = period.as_secs().max(1);
    let reads = u64::from(interval_seconds).div_ceil(period).max(1);
    u32::try_from(reads).unwrap_or(u32::MAX)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleOutcome {
    Forwarded,
    Counted,
    Disabled,
    Failed,
}

pub struct SamplingWorker {
    kind: SensorKind,
    ctx: Arc<NodeContext>,
    interval_seconds: u32,
    reads_per_report: u32,
    reads: u32,
}

impl SamplingWorker {
    pub fn new(kind: SensorKind, ctx: Arc<NodeContext>) -> Self {
        let interval_seconds = ctx
            .configs
            .get(kind)
            .map(|config| config.sampling_interval_seconds)
            .unwrap_or(ctx.config.timing.default_interval_secs);
        let reads_per_report = reads_per_report(interval_seconds, ctx.config.timing.sample_period());
        Self {
            kind,
            ctx,
            interval_seconds,
            reads_per_report,
            reads: 0,
        }
    }

    pub fn interval_seconds(&self) -> u32 {
        self.interval_seconds
    }

    pub fn reads_per_report(&self) -> u32 {
        self.reads_per_report
    }

    pub async fn run(mut self, gate: PauseGate) {
        info!(sensor = %self.kind, interval_s = self.interval_seconds, "sampling started");
        let mut ticks = interval(self.ctx.config.timing.sample_period());
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let (ctx, kind) = (self.ctx.clone(), self.kind);
        loop {
            tokio::select! {
                _ = ticks.tick() => {
                    gate.checkpoint().await;
                    self.sample_once().await;
                }
                _ = ctx.sync.changed(kind) => {
                    self.apply_pending_update();
                }
            }
        }
    }

    pub async fn sample_once(&mut self) -> SampleOutcome {
        self.apply_pending_update();

        let enabled = self
            .ctx
            .configs
            .get(self.kind)
            .map(|config| config.enabled)
            .unwrap_or(true);
        if !enabled {
            debug!(sensor = %self.kind, "sensor disabled, skipping");
            return SampleOutcome::Disabled;
        }

        let raw = match self.read_with_retry().await {
            Ok(raw) => raw,
            Err(err) => {
                self.report_failure(&err);
                return SampleOutcome::Failed;
            }
        };

        self.reads += 1;
        if self.reads < self.reads_per_report {
            return SampleOutcome::Counted;
        }
        self.reads = 0;

        let millivolts = self.ctx.adc.to_millivolts(raw);
        let reading = SensorReading::new(self.kind, raw, millivolts, &self.ctx.config.calibration);
        debug!(
            sensor = %self.kind,
            raw,
            millivolts,
            value = reading.converted_value,
            "reading forwarded"
        );
        if self.ctx.readings.push(reading).is_some() {
            debug!(sensor = %self.kind, "sensor queue full, oldest reading dropped");
        }
        self.ctx
            .supervisor
            .send_heartbeat(WorkerKind::Sampling, format!("{} read", self.kind));
        SampleOutcome::Forwarded
    }

    pub fn apply_pending_update(&mut self) {
        let Some(update) = self.ctx.sync.try_pop(self.kind) else {
            return;
        };
        if update.apply && update.new_interval_seconds > 0 && update.new_interval_seconds != self.interval_seconds {
            self.interval_seconds = update.new_interval_seconds;
            self.reads_per_report =
                reads_per_report(self.interval_seconds, self.ctx.config.timing.sample_period());
            self.reads = 0;
            info!(
                sensor = %self.kind,
                interval_s = self.interval_seconds,
                every = self.reads_per_report,
                "sampling interval updated"
            );
        }
    }

    async fn read_with_retry(&self) -> Result<u16, HardwareError> {
        let attempts = self.ctx.config.limits.read_attempts.max(1);
        let delay = Duration::from_millis(self.ctx.config.timing.read_retry_delay_ms);
        let mut last = HardwareError::Timeout;
        for attempt in 1..=attempts {
            match self.ctx.adc.read_raw(self.kind.channel()).await {
                Ok(raw) => return Ok(raw),
                Err(err) => {
                    debug!(sensor = %self.kind, attempt, %err, "adc read failed");
                    last = err;
                }
            }
            if attempt < attempts {
                sleep(delay).await;
            }
        }
        Err(last)
    }

    fn report_failure(&self, err: &HardwareError) {
        let attempts = self.ctx.config.limits.read_attempts.max(1);
        warn!(sensor = %self.kind, attempts, %err, "sensor read failed, no reading this cycle");
        self.ctx.supervisor.report_error(
            WorkerKind::Sampling,
            SENSOR_READ_ERROR,
            format!("{} read failed: {err}", self.kind),
        );
        let event = self
            .ctx
            .sensor_event(self.kind, SENSOR_READ_ERROR, Severity::Error, format!("{} read failed", self.kind))
            .with_details(json!({
                "channel": self.kind.channel(),
                "attempts": attempts,
                "error": err.to_string(),
            }));
        let _ = self.ctx.errors.submit(event);
    }
}
