//! sled-backed alarm event log and recipe versions
//!
//! One database, two trees:
//! - `events`: key = timestamp nanos (u64 big-endian) ++ sled id (u64
//!   big-endian), value = JSON `AlarmEvent`. Keys sort chronologically and
//!   never collide when several alarms flip in the same evaluation.
//! - `recipes`: key = settings id (u64 big-endian), value = JSON `Recipe`.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::{EventSink, SettingsStore, StorageError};
use crate::types::{AlarmEvent, Recipe};

const EVENTS_TREE: &str = "events";
const RECIPES_TREE: &str = "recipes";

/// Open (or create) the line database at `path`.
///
/// Returns the event sink and settings store sharing one sled instance.
pub fn open_database<P: AsRef<Path>>(
    path: P,
) -> Result<(SledEventSink, SledSettingsStore), StorageError> {
    let path_ref = path.as_ref();
    let db = Arc::new(sled::open(path_ref)?);
    info!(path = %path_ref.display(), "Line database opened");
    Ok((
        SledEventSink::from_db(&db)?,
        SledSettingsStore::from_db(&db)?,
    ))
}

// ============================================================================
// Events
// ============================================================================

/// Alarm event log in a sled tree.
#[derive(Clone)]
pub struct SledEventSink {
    db: Arc<sled::Db>,
    tree: sled::Tree,
    healthy: Arc<AtomicBool>,
}

impl SledEventSink {
    pub fn from_db(db: &Arc<sled::Db>) -> Result<Self, StorageError> {
        Ok(Self {
            db: Arc::clone(db),
            tree: db.open_tree(EVENTS_TREE)?,
            healthy: Arc::new(AtomicBool::new(true)),
        })
    }

    fn key_for(&self, event: &AlarmEvent) -> Result<[u8; 16], StorageError> {
        let nanos = event
            .timestamp
            .timestamp_nanos_opt()
            .unwrap_or_else(|| event.timestamp.timestamp() * 1_000_000_000);
        let seq = self.db.generate_id()?;

        let mut key = [0u8; 16];
        key[..8].copy_from_slice(&(nanos.max(0) as u64).to_be_bytes());
        key[8..].copy_from_slice(&seq.to_be_bytes());
        Ok(key)
    }

    fn try_save(&self, event: &AlarmEvent) -> Result<(), StorageError> {
        let key = self.key_for(event)?;
        let value = serde_json::to_vec(event)?;
        self.tree.insert(key, value)?;
        Ok(())
    }

    /// Number of stored events
    pub fn count(&self) -> usize {
        self.tree.len()
    }

    /// Flush pending writes to disk
    pub fn flush(&self) -> Result<(), StorageError> {
        self.tree.flush()?;
        Ok(())
    }
}

impl EventSink for SledEventSink {
    fn save_event(&self, event: &AlarmEvent) -> bool {
        match self.try_save(event) {
            Ok(()) => {
                if !self.healthy.swap(true, Ordering::Relaxed) {
                    info!("Event storage recovered");
                }
                debug!(kind = %event.kind, transition = ?event.transition, "Alarm event stored");
                true
            }
            Err(e) => {
                self.healthy.store(false, Ordering::Relaxed);
                warn!(kind = %event.kind, error = %e, "Failed to store alarm event");
                false
            }
        }
    }

    fn is_available(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    fn recent(&self, limit: usize) -> Vec<AlarmEvent> {
        self.tree
            .iter()
            .rev()
            .filter_map(Result::ok)
            .filter_map(|(_, value)| serde_json::from_slice::<AlarmEvent>(&value).ok())
            .take(limit)
            .collect()
    }

    fn backend_name(&self) -> &'static str {
        "sled"
    }
}

// ============================================================================
// Recipes
// ============================================================================

/// Recipe versions in a sled tree.
#[derive(Clone)]
pub struct SledSettingsStore {
    tree: sled::Tree,
}

impl SledSettingsStore {
    pub fn from_db(db: &Arc<sled::Db>) -> Result<Self, StorageError> {
        Ok(Self {
            tree: db.open_tree(RECIPES_TREE)?,
        })
    }

    fn next_id(&self) -> Result<u64, StorageError> {
        Ok(match self.tree.last()? {
            Some((key, _)) => decode_id(&key)? + 1,
            None => 1,
        })
    }
}

fn decode_id(key: &[u8]) -> Result<u64, StorageError> {
    let bytes: [u8; 8] = key
        .try_into()
        .map_err(|_| StorageError::Database(format!("malformed recipe key ({} bytes)", key.len())))?;
    Ok(u64::from_be_bytes(bytes))
}

impl SettingsStore for SledSettingsStore {
    fn load(&self, id: u64) -> Result<Recipe, StorageError> {
        let value = self
            .tree
            .get(id.to_be_bytes())?
            .ok_or(StorageError::NotFound(id))?;
        Ok(serde_json::from_slice(&value)?)
    }

    fn save(&self, recipe: &Recipe) -> Result<u64, StorageError> {
        let id = self.next_id()?;
        let mut stored = recipe.clone();
        stored.settings_id = Some(id);

        self.tree.insert(id.to_be_bytes(), serde_json::to_vec(&stored)?)?;
        self.tree.flush()?;
        info!(settings_id = id, name = %stored.name, "Recipe saved");
        Ok(id)
    }

    fn latest(&self) -> Result<Option<Recipe>, StorageError> {
        match self.tree.last()? {
            Some((_, value)) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    fn backend_name(&self) -> &'static str {
        "sled"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AlarmKind, AlarmTransition};
    use chrono::{Duration, Utc};

    fn event_at(offset_ms: i64, kind: AlarmKind) -> AlarmEvent {
        AlarmEvent {
            settings_id: None,
            timestamp: Utc::now() + Duration::milliseconds(offset_ms),
            distance: 1.0,
            product: String::new(),
            batch: String::new(),
            kind,
            diameters: [18.0, 18.0, 18.6, 18.0],
            lumps: 2,
            necks: 1,
            transition: AlarmTransition::Entered,
            comment: String::new(),
        }
    }

    #[test]
    fn events_come_back_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let (sink, _) = open_database(dir.path()).unwrap();

        assert!(sink.save_event(&event_at(0, AlarmKind::Diameter)));
        assert!(sink.save_event(&event_at(10, AlarmKind::Defects)));
        assert!(sink.save_event(&event_at(20, AlarmKind::Ovality)));

        let recent = sink.recent(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].kind, AlarmKind::Ovality);
        assert_eq!(recent[1].kind, AlarmKind::Defects);
        assert!(sink.is_available());
    }

    #[test]
    fn same_timestamp_events_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let (sink, _) = open_database(dir.path()).unwrap();

        let mut a = event_at(0, AlarmKind::Diameter);
        let mut b = a.clone();
        b.kind = AlarmKind::StdDev;
        a.comment = "first".to_string();

        assert!(sink.save_event(&a));
        assert!(sink.save_event(&b));
        assert_eq!(sink.count(), 2);
    }

    #[test]
    fn recipes_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let (_, store) = open_database(dir.path()).unwrap();
            let mut recipe = Recipe::default();
            recipe.name = "PVC-18".to_string();
            store.save(&recipe).unwrap()
        };

        let (_, store) = open_database(dir.path()).unwrap();
        let loaded = store.load(id).unwrap();
        assert_eq!(loaded.name, "PVC-18");
        assert_eq!(loaded.settings_id, Some(id));
        assert_eq!(store.latest().unwrap().unwrap().settings_id, Some(id));

        let next = store.save(&loaded).unwrap();
        assert_eq!(next, id + 1);
    }

    #[test]
    fn missing_recipe_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let (_, store) = open_database(dir.path()).unwrap();
        assert!(matches!(store.load(3), Err(StorageError::NotFound(3))));
    }
}
