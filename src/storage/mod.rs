//! Alarm event and recipe persistence
//!
//! Storage is optional: the pipeline runs the same with a sled database, an
//! in-memory store or nothing at all. Write failures are logged by the
//! backend and reported to the caller as `false` / `Err`, never retried.

pub mod history;
pub mod persistence;
pub mod writer;

pub use history::{open_database, SledEventSink, SledSettingsStore};
pub use persistence::{
    EventSink, MemoryEventSink, MemorySettingsStore, OfflineSink, SettingsStore,
};
pub use writer::{run_event_writer, EventWriterSnapshot, EventWriterStats, QueuedEventSink};

use thiserror::Error;

/// Persistence errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Settings {0} not found")]
    NotFound(u64),

    #[error("Storage is offline")]
    Offline,
}

impl From<sled::Error> for StorageError {
    fn from(err: sled::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
