use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::context::NodeContext;
use crate::hal::{StorageError, WifiCredentials};
use crate::storage;
use crate::worker::{PauseGate, WorkerKind};

pub const STORAGE_COMMIT_FAILED: &str = "STORAGE_COMMIT_FAILED";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageRequest {
    SaveCredentials(WifiCredentials),
    Commit,
}

pub struct MaintenanceWorker {
    ctx: Arc<NodeContext>,
    requests: mpsc::Receiver<StorageRequest>,
    dirty: bool,
    commits: u64,
}

impl MaintenanceWorker {
    pub fn new(ctx: Arc<NodeContext>, requests: mpsc::Receiver<StorageRequest>) -> Self {
        Self {
            ctx,
            requests,
            dirty: false,
            commits: 0,
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn commits(&self) -> u64 {
        self.commits
    }

    pub fn open(&self) -> Result<(), StorageError> {
        self.ctx.store.get(storage::WIFI_NAMESPACE, "ssid")?;
        Ok(())
    }

    pub fn handle(&mut self, request: StorageRequest) {
        match request {
            StorageRequest::SaveCredentials(credentials) => {
                match storage::save_credentials(self.ctx.store.as_ref(), &credentials) {
                    Ok(()) => {
                        info!(ssid = %credentials.ssid, "network credentials staged");
                        self.dirty = true;
                    }
                    Err(err) => warn!(%err, "network credentials not stored"),
                }
            }
            StorageRequest::Commit => self.dirty = true,
        }
    }

    pub fn flush(&mut self) -> bool {
        if !self.dirty {
            return false;
        }
        match self.ctx.store.commit() {
            Ok(()) => {
                self.dirty = false;
                self.commits += 1;
                debug!(commits = self.commits, "storage committed");
                true
            }
            Err(err) => {
                warn!(%err, "storage commit failed");
                self.ctx.supervisor.report_error(
                    WorkerKind::StorageMaintenance,
                    STORAGE_COMMIT_FAILED,
                    err.to_string(),
                );
                false
            }
        }
    }

    pub async fn run(mut self, gate: PauseGate) {
        let timing = &self.ctx.config.timing;
        let mut commit_tick = interval(Duration::from_secs(timing.storage_commit_secs.max(1)));
        commit_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut heartbeat_tick = interval(Duration::from_secs(timing.storage_heartbeat_secs.max(1)));
        heartbeat_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        heartbeat_tick.tick().await;
        info!("storage maintenance running");

        loop {
            gate.checkpoint().await;
            tokio::select! {
                request = self.requests.recv() => match request {
                    Some(request) => self.handle(request),
                    None => {
                        // Senders live in the context, so this only happens on teardown.
                        self.flush();
                        return;
                    }
                },
                _ = commit_tick.tick() => {
                    self.flush();
                }
                _ = heartbeat_tick.tick() => {
                    self.ctx
                        .supervisor
                        .send_heartbeat(WorkerKind::StorageMaintenance, "storage maintenance alive");
                }
            }
        }
    }
}
