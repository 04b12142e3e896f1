//! Per-identity navigation history.
//!
//! A browser-style stack with a cursor: pushing while not at the tail drops
//! the forward branch, and the stack is bounded by dropping its oldest entry.
//! A separate preserved-state map holds snapshots that must outlive detours
//! (a help screen in the middle of a form) and is only cleared by the flow
//! that owns them.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use intake_core::types::{IdentityKey, Timestamp};

/// Preserved-state slot for an interrupted form.
pub const FORM_DATA: &str = "form_data";

/// One screen the user has visited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavigationEntry {
    /// `type/context` of the screen.
    pub label: String,
    pub title: String,
    pub snapshot: Map<String, Value>,
    pub field_index: usize,
    pub timestamp: Timestamp,
}

/// Outcome of a back or forward move.
#[derive(Debug, Clone, PartialEq)]
pub enum NavigationStep {
    Moved(NavigationEntry),
    NoHistory,
}

struct HistoryStack {
    entries: Vec<NavigationEntry>,
    cursor: usize,
    last_active: Instant,
}

impl HistoryStack {
    fn new() -> Self {
        Self {
            entries: Vec::new(),
            cursor: 0,
            last_active: Instant::now(),
        }
    }

    fn current(&self) -> Option<&NavigationEntry> {
        self.entries.get(self.cursor)
    }
}

struct PreservedSlot {
    value: Value,
    saved_at: Instant,
}

pub struct NavigationHistory {
    max_depth: usize,
    stacks: Mutex<HashMap<IdentityKey, HistoryStack>>,
    preserved: Mutex<HashMap<IdentityKey, HashMap<String, PreservedSlot>>>,
}

impl NavigationHistory {
    pub fn new(max_depth: usize) -> Self {
        Self {
            max_depth: max_depth.max(1),
            stacks: Mutex::new(HashMap::new()),
            preserved: Mutex::new(HashMap::new()),
        }
    }

    pub fn push(&self, identity: &IdentityKey, entry: NavigationEntry) {
        let mut stacks = self.lock_stacks();
        let stack = stacks
            .entry(identity.clone())
            .or_insert_with(HistoryStack::new);

        if !stack.entries.is_empty() {
            stack.entries.truncate(stack.cursor + 1);
        }
        stack.entries.push(entry);
        stack.cursor = stack.entries.len() - 1;

        if stack.entries.len() > self.max_depth {
            stack.entries.remove(0);
            stack.cursor -= 1;
        }
        stack.last_active = Instant::now();
    }

    pub fn back(&self, identity: &IdentityKey) -> NavigationStep {
        let mut stacks = self.lock_stacks();
        let Some(stack) = stacks.get_mut(identity) else {
            return NavigationStep::NoHistory;
        };
        stack.last_active = Instant::now();
        if stack.cursor == 0 || stack.entries.is_empty() {
            return NavigationStep::NoHistory;
        }
        stack.cursor -= 1;
        NavigationStep::Moved(stack.entries[stack.cursor].clone())
    }

    pub fn forward(&self, identity: &IdentityKey) -> NavigationStep {
        let mut stacks = self.lock_stacks();
        let Some(stack) = stacks.get_mut(identity) else {
            return NavigationStep::NoHistory;
        };
        stack.last_active = Instant::now();
        if stack.cursor + 1 >= stack.entries.len() {
            return NavigationStep::NoHistory;
        }
        stack.cursor += 1;
        NavigationStep::Moved(stack.entries[stack.cursor].clone())
    }

    /// Refresh the snapshot of the entry under the cursor. Returns false when
    /// the identity has no history.
    pub fn update_current(
        &self,
        identity: &IdentityKey,
        snapshot: &Map<String, Value>,
        field_index: usize,
    ) -> bool {
        let mut stacks = self.lock_stacks();
        let Some(stack) = stacks.get_mut(identity) else {
            return false;
        };
        stack.last_active = Instant::now();
        let cursor = stack.cursor;
        match stack.entries.get_mut(cursor) {
            Some(entry) => {
                entry.snapshot.clone_from(snapshot);
                entry.field_index = field_index;
                entry.timestamp = Timestamp::now();
                true
            }
            None => false,
        }
    }

    /// Entry under the cursor.
    pub fn current(&self, identity: &IdentityKey) -> Option<NavigationEntry> {
        self.lock_stacks()
            .get(identity)
            .and_then(|s| s.current().cloned())
    }

    pub fn depth(&self, identity: &IdentityKey) -> usize {
        self.lock_stacks()
            .get(identity)
            .map(|s| s.entries.len())
            .unwrap_or(0)
    }

    /// Titles of the last `k` entries up to the cursor, oldest first.
    pub fn breadcrumb(&self, identity: &IdentityKey, k: usize) -> String {
        let stacks = self.lock_stacks();
        let Some(stack) = stacks.get(identity) else {
            return String::new();
        };
        if stack.entries.is_empty() {
            return String::new();
        }
        let end = stack.cursor + 1;
        let start = end.saturating_sub(k);
        stack.entries[start..end]
            .iter()
            .map(|e| e.title.as_str())
            .collect::<Vec<_>>()
            .join(" > ")
    }

    /// Drop the history and every preserved slot for `identity`.
    pub fn clear(&self, identity: &IdentityKey) {
        self.lock_stacks().remove(identity);
        self.lock_preserved().remove(identity);
    }

    /// Drop histories idle for longer than `max_idle`. Returns how many went.
    pub fn purge_inactive(&self, max_idle: Duration) -> usize {
        let mut stacks = self.lock_stacks();
        let before = stacks.len();
        stacks.retain(|_, s| s.last_active.elapsed() <= max_idle);
        let purged = before - stacks.len();
        drop(stacks);

        let mut preserved = self.lock_preserved();
        for slots in preserved.values_mut() {
            slots.retain(|_, slot| slot.saved_at.elapsed() <= max_idle);
        }
        preserved.retain(|_, slots| !slots.is_empty());

        if purged > 0 {
            debug!(purged, "Inactive navigation histories dropped");
        }
        purged
    }

    pub fn preserve(&self, identity: &IdentityKey, slot: &str, value: Value) {
        self.lock_preserved()
            .entry(identity.clone())
            .or_default()
            .insert(
                slot.to_string(),
                PreservedSlot {
                    value,
                    saved_at: Instant::now(),
                },
            );
    }

    pub fn preserved(&self, identity: &IdentityKey, slot: &str) -> Option<Value> {
        self.lock_preserved()
            .get(identity)
            .and_then(|slots| slots.get(slot))
            .map(|s| s.value.clone())
    }

    pub fn clear_preserved(&self, identity: &IdentityKey, slot: &str) {
        let mut preserved = self.lock_preserved();
        if let Some(slots) = preserved.get_mut(identity) {
            slots.remove(slot);
            if slots.is_empty() {
                preserved.remove(identity);
            }
        }
    }

    fn lock_stacks(&self) -> MutexGuard<'_, HashMap<IdentityKey, HistoryStack>> {
        self.stacks.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_preserved(&self) -> MutexGuard<'_, HashMap<IdentityKey, HashMap<String, PreservedSlot>>> {
        self.preserved.lock().unwrap_or_else(|e| e.into_inner())
    }
}
