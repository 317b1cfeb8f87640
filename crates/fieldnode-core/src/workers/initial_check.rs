use std::sync::Arc;

use serde_json::json;
use tracing::{info, warn};

use crate::context::NodeContext;
use crate::error_event::Severity;
use crate::sensor::SensorKind;
use crate::startup::GateSignal;
use crate::status::SystemState;
use crate::worker::WorkerKind;

pub const MEMORY_LOW: &str = "MEMORY_LOW";
pub const ADC_DIAGNOSTIC_FAILED: &str = "ADC_DIAGNOSTIC_FAILED";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CheckReport {
    pub free_heap: Option<u64>,
    pub memory_low: bool,
    pub channels_ok: Vec<SensorKind>,
    pub channels_failed: Vec<SensorKind>,
}

pub async fn run(ctx: Arc<NodeContext>, gate: GateSignal) -> CheckReport {
    ctx.status.set(SystemState::Config);
    ctx.supervisor
        .send_status(WorkerKind::InitialCheck, "initial configuration started");

    let mut report = CheckReport {
        free_heap: ctx.probe.free_heap(),
        ..CheckReport::default()
    };

    if let Some(free) = report.free_heap {
        if free < ctx.config.limits.min_free_heap {
            report.memory_low = true;
            warn!(free_heap = free, min = ctx.config.limits.min_free_heap, "free memory below threshold");
            ctx.supervisor
                .report_error(WorkerKind::InitialCheck, MEMORY_LOW, format!("free heap {free} bytes"));
            ctx.submit_system_error(
                MEMORY_LOW,
                Severity::Warning,
                "free memory below threshold",
                json!({"free_heap": free, "threshold": ctx.config.limits.min_free_heap}),
            );
        }
    }

    for kind in SensorKind::ALL {
        match ctx.adc.read_raw(kind.channel()).await {
            Ok(raw) => {
                let millivolts = ctx.adc.to_millivolts(raw);
                info!(sensor = %kind, channel = kind.channel(), raw, millivolts, "adc diagnostic read");
                report.channels_ok.push(kind);
            }
            Err(err) => {
                warn!(sensor = %kind, %err, "adc diagnostic read failed");
                ctx.supervisor
                    .report_error(WorkerKind::InitialCheck, ADC_DIAGNOSTIC_FAILED, format!("{kind}: {err}"));
                let event = ctx
                    .sensor_event(kind, ADC_DIAGNOSTIC_FAILED, Severity::Warning, err.to_string())
                    .with_details(json!({"channel": kind.channel()}));
                let _ = ctx.errors.submit(event);
                report.channels_failed.push(kind);
            }
        }
    }

    ctx.supervisor
        .send_status(WorkerKind::InitialCheck, "initial configuration complete");
    gate.complete();
    report
}
