use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::time::{sleep, timeout};
use tracing::{info, warn};

use crate::connectivity::Link;
use crate::context::NodeContext;
use crate::error_event::Severity;
use crate::hal::WifiCredentials;
use crate::startup::GateSignal;
use crate::status::SystemState;
use crate::storage;
use crate::worker::{PauseGate, WorkerKind};

pub const WIFI_CONNECT_FAILED: &str = "WIFI_CONNECT_FAILED";
pub const WIFI_DISCONNECTED: &str = "WIFI_DISCONNECTED";

pub fn credentials(ctx: &NodeContext) -> WifiCredentials {
    match storage::load_credentials(ctx.store.as_ref()) {
        Ok(Some(stored)) => stored,
        Ok(None) => WifiCredentials {
            ssid: ctx.config.wifi.ssid.clone(),
            pass: ctx.config.wifi.pass.clone(),
        },
        Err(err) => {
            warn!(%err, "could not read stored credentials, using defaults");
            WifiCredentials {
                ssid: ctx.config.wifi.ssid.clone(),
                pass: ctx.config.wifi.pass.clone(),
            }
        }
    }
}

pub async fn run(ctx: Arc<NodeContext>, gate: Option<GateSignal>, pause: PauseGate) {
    let wifi = ctx.config.wifi.clone();
    let attempt_timeout = Duration::from_secs(wifi.attempt_timeout_secs);
    let mut gate = gate;
    let mut attempts: u32 = 0;
    let mut creds = credentials(&ctx);

    ctx.status.set(SystemState::Wifi);
    info!(ssid = %creds.ssid, "network worker started");

    loop {
        pause.checkpoint().await;

        if ctx.network.is_connected() {
            let link = Link {
                connected: true,
                address: ctx.network.local_address(),
            };
            if ctx.connectivity.set(link) {
                info!(address = ?link.address, "network up");
                ctx.supervisor.send_status(WorkerKind::Network, "network connected");
                ctx.status.set(SystemState::Ready);
                ctx.errors.force_retry();
            }
            if let Some(gate) = gate.take() {
                gate.complete();
            }
            attempts = 0;
            sleep(Duration::from_secs(wifi.poll_secs.max(1))).await;
            continue;
        }

        if ctx.connectivity.is_connected() {
            ctx.connectivity.set(Link::default());
            warn!("network link lost");
            ctx.status.set(SystemState::WaitingWifi);
            ctx.supervisor
                .report_error(WorkerKind::Network, WIFI_DISCONNECTED, "network link lost");
            ctx.submit_system_error(WIFI_DISCONNECTED, Severity::Warning, "network link lost", json!({}));
        }

        if attempts == 0 {
            creds = credentials(&ctx);
        }
        attempts += 1;
        let result = timeout(attempt_timeout, ctx.network.connect(&creds)).await;
        let failure = match result {
            Ok(Ok(())) if ctx.network.is_connected() => continue,
            Ok(Ok(())) => "association reported but link is down".to_string(),
            Ok(Err(err)) => err.to_string(),
            Err(_) => "association timed out".to_string(),
        };
        warn!(attempt = attempts, max = wifi.max_retry, reason = %failure, "network association failed");

        if attempts >= wifi.max_retry.max(1) {
            ctx.status.set(SystemState::WaitingWifi);
            ctx.supervisor.report_error(
                WorkerKind::Network,
                WIFI_CONNECT_FAILED,
                format!("{attempts} attempts failed: {failure}"),
            );
            info!(cooldown_s = wifi.cooldown_secs, "network cooling down before next burst");
            sleep(Duration::from_secs(wifi.cooldown_secs)).await;
            attempts = 0;
        } else {
            sleep(Duration::from_millis(wifi.retry_delay_ms)).await;
        }
    }
}
