use std::time::Duration;

use tokio::time::Instant;

use crate::error_event::{ErrorEvent, SourceKind};

const NO_ID: i32 = -1;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub error_code: String,
    pub source_kind: SourceKind,
    pub source_id: i32,
}

impl DedupKey {
    pub fn of(event: &ErrorEvent) -> Self {
        Self {
            error_code: event.error_code.clone(),
            source_kind: event.source.kind(),
            source_id: event.source.id().unwrap_or(NO_ID),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DedupEntry {
    pub key: DedupKey,
    pub last_sent_at: Instant,
    pub occurrence_count: u32,
}

#[derive(Debug)]
pub struct ErrorDeduplicator {
    entries: Vec<DedupEntry>,
    capacity: usize,
    window: Duration,
}

impl ErrorDeduplicator {
    pub fn new(capacity: usize, window: Duration) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            capacity: capacity.max(1),
            window,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn occurrences(&self, event: &ErrorEvent) -> Option<u32> {
        let key = DedupKey::of(event);
        self.entries
            .iter()
            .find(|entry| entry.key == key)
            .map(|entry| entry.occurrence_count)
    }

    pub fn is_duplicate(&mut self, event: &ErrorEvent) -> (bool, u32) {
        self.is_duplicate_at(event, Instant::now())
    }

    pub fn is_duplicate_at(&mut self, event: &ErrorEvent, now: Instant) -> (bool, u32) {
        let key = DedupKey::of(event);
        if let Some(index) = self.entries.iter().position(|entry| entry.key == key) {
            let entry = &mut self.entries[index];
            if now.saturating_duration_since(entry.last_sent_at) <= self.window {
                entry.occurrence_count = entry.occurrence_count.saturating_add(1);
                return (true, entry.occurrence_count);
            }
            // Out of the window: the class is fresh even if no sweep ran yet.
            self.entries.swap_remove(index);
        }

        if self.entries.len() >= self.capacity {
            if let Some(oldest) = self
                .entries
                .iter()
                .enumerate()
                .min_by_key(|(_, entry)| entry.last_sent_at)
                .map(|(index, _)| index)
            {
                self.entries.swap_remove(oldest);
            }
        }

        self.entries.push(DedupEntry {
            key,
            last_sent_at: now,
            occurrence_count: 1,
        });
        (false, 1)
    }

    pub fn mark_sent(&mut self, event: &ErrorEvent) {
        self.mark_sent_at(event, Instant::now());
    }

    pub fn mark_sent_at(&mut self, event: &ErrorEvent, now: Instant) {
        let key = DedupKey::of(event);
        if let Some(entry) = self.entries.iter_mut().find(|entry| entry.key == key) {
            entry.last_sent_at = now;
        }
    }

    pub fn evict_expired(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        let window = self.window;
        self.entries
            .retain(|entry| now.saturating_duration_since(entry.last_sent_at) <= window);
        before - self.entries.len()
    }
}
