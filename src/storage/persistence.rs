//! EventSink / SettingsStore traits and in-memory backends
//!
//! The analysis context writes alarm transitions through [`EventSink`] and the
//! recipe endpoint persists settings through [`SettingsStore`]. Either may be
//! unavailable; callers log and carry on.
//! - `MemoryEventSink` / `MemorySettingsStore`: offline mode and tests
//! - `OfflineSink`: accepts nothing
//! - sled backends live in [`super::history`]

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use super::StorageError;
use crate::types::{AlarmEvent, Recipe};

/// Destination for alarm transition records.
///
/// Implementations must be thread-safe (Send + Sync) for shared access
/// across async tasks.
pub trait EventSink: Send + Sync {
    /// Persist one event. Returns false on failure; never panics.
    fn save_event(&self, event: &AlarmEvent) -> bool;

    /// Whether writes are currently expected to succeed
    fn is_available(&self) -> bool;

    /// Most recent events, newest first
    fn recent(&self, limit: usize) -> Vec<AlarmEvent>;

    /// Backend name for logging
    fn backend_name(&self) -> &'static str;
}

/// Versioned recipe storage. Every save creates a new settings id.
pub trait SettingsStore: Send + Sync {
    fn load(&self, id: u64) -> Result<Recipe, StorageError>;

    /// Store a copy of `recipe` under a fresh id and return the id
    fn save(&self, recipe: &Recipe) -> Result<u64, StorageError>;

    /// The most recently saved recipe, if any
    fn latest(&self) -> Result<Option<Recipe>, StorageError>;

    fn backend_name(&self) -> &'static str;
}

// ============================================================================
// In-memory backends
// ============================================================================

/// Bounded in-memory event log. Not durable.
pub struct MemoryEventSink {
    events: RwLock<VecDeque<AlarmEvent>>,
    max_events: usize,
    available: AtomicBool,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::with_capacity(10_000)
    }

    pub fn with_capacity(max_events: usize) -> Self {
        Self {
            events: RwLock::new(VecDeque::new()),
            max_events: max_events.max(1),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate the database going away (or coming back)
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.events.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All stored events, oldest first
    pub fn events(&self) -> Vec<AlarmEvent> {
        self.events
            .read()
            .map(|e| e.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl Default for MemoryEventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for MemoryEventSink {
    fn save_event(&self, event: &AlarmEvent) -> bool {
        if !self.is_available() {
            return false;
        }
        let Ok(mut store) = self.events.write() else {
            return false;
        };
        store.push_back(event.clone());
        while store.len() > self.max_events {
            store.pop_front();
        }
        true
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::Relaxed)
    }

    fn recent(&self, limit: usize) -> Vec<AlarmEvent> {
        self.events
            .read()
            .map(|e| e.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

/// Sink for running without any database.
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineSink;

impl EventSink for OfflineSink {
    fn save_event(&self, _event: &AlarmEvent) -> bool {
        false
    }

    fn is_available(&self) -> bool {
        false
    }

    fn recent(&self, _limit: usize) -> Vec<AlarmEvent> {
        Vec::new()
    }

    fn backend_name(&self) -> &'static str {
        "offline"
    }
}

/// In-memory recipe versions.
#[derive(Default)]
pub struct MemorySettingsStore {
    recipes: RwLock<BTreeMap<u64, Recipe>>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for MemorySettingsStore {
    fn load(&self, id: u64) -> Result<Recipe, StorageError> {
        let store = self
            .recipes
            .read()
            .map_err(|e| StorageError::Database(e.to_string()))?;
        store.get(&id).cloned().ok_or(StorageError::NotFound(id))
    }

    fn save(&self, recipe: &Recipe) -> Result<u64, StorageError> {
        let mut store = self
            .recipes
            .write()
            .map_err(|e| StorageError::Database(e.to_string()))?;
        let id = store.keys().next_back().map_or(1, |last| last + 1);
        let mut stored = recipe.clone();
        stored.settings_id = Some(id);
        store.insert(id, stored);
        Ok(id)
    }

    fn latest(&self) -> Result<Option<Recipe>, StorageError> {
        let store = self
            .recipes
            .read()
            .map_err(|e| StorageError::Database(e.to_string()))?;
        Ok(store.values().next_back().cloned())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
