use std::collections::BTreeMap;
use std::sync::Mutex;

use tokio::sync::Notify;

use crate::sensor::SensorKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigUpdate {
    pub kind: SensorKind,
    pub new_interval_seconds: u32,
    pub apply: bool,
}

#[derive(Debug, Default)]
struct Slot {
    pending: Mutex<Option<ConfigUpdate>>,
    notify: Notify,
}

#[derive(Debug)]
pub struct ConfigSyncChannel {
    slots: BTreeMap<SensorKind, Slot>,
}

impl Default for ConfigSyncChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigSyncChannel {
    pub fn new() -> Self {
        Self {
            slots: SensorKind::ALL
                .into_iter()
                .map(|kind| (kind, Slot::default()))
                .collect(),
        }
    }

    pub fn push(&self, update: ConfigUpdate) -> Option<ConfigUpdate> {
        let slot = self.slot(update.kind)?;
        let replaced = {
            let mut pending = slot
                .pending
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            pending.replace(update)
        };
        slot.notify.notify_one();
        replaced
    }

    pub fn try_pop(&self, kind: SensorKind) -> Option<ConfigUpdate> {
        self.slot(kind)?
            .pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }

    /// Resolves once an update is pending for `kind`. The update itself is
    /// still taken with [`ConfigSyncChannel::try_pop`].
    pub async fn changed(&self, kind: SensorKind) {
        let Some(slot) = self.slot(kind) else {
            return std::future::pending().await;
        };
        loop {
            let notified = slot.notify.notified();
            if slot
                .pending
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .is_some()
            {
                return;
            }
            notified.await;
        }
    }

    fn slot(&self, kind: SensorKind) -> Option<&Slot> {
        self.slots.get(&kind)
    }
}
