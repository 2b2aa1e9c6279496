//! Line Configuration Module
//!
//! Provides per-line configuration loaded from TOML files. Every tunable of
//! the acquisition loop, router, analysis stage and active recipe lives here.
//!
//! ## Loading Order
//!
//! 1. `--config` CLI flag / `LINEGUARD_CONFIG` environment variable
//! 2. `line_config.toml` in the current working directory
//! 3. Built-in defaults
//!
//! ## Live values
//!
//! The loaded config is wrapped in a [`ConfigHandle`], a cheap-to-clone
//! `ArcSwap` cell. Readers take a snapshot once per cycle and never block;
//! writers (file watcher, HTTP handlers) swap in a whole new value.
//!
//! ```ignore
//! let (config, _path) = LineConfig::load();
//! let handle = ConfigHandle::new(config);
//! let speed = handle.snapshot().production.speed_m_per_min;
//! ```

mod line_config;
pub mod defaults;
pub mod validation;
pub mod watcher;

pub use line_config::*;

use arc_swap::ArcSwap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::types::Recipe;

/// Key prefixes whose changes only take effect after a restart.
const RESTART_REQUIRED_PREFIXES: &[&str] = &[
    "plc.",
    "storage.",
    "server.",
    "acquisition.channel_capacity",
    "acquisition.command_capacity",
    "router.analysis_capacity",
    "router.history_max_samples",
];

/// One key whose value differs between two configs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfigChange {
    /// Dotted key path, e.g. `recipe.max_lumps`
    pub key: String,
    pub old: String,
    pub new: String,
    /// True when the running pipeline cannot pick the value up live
    pub requires_restart: bool,
}

/// Shared, hot-swappable handle to the active [`LineConfig`].
///
/// The active recipe can differ from the file's `[recipe]` section once an
/// operator posts one or a stored recipe is restored. Reloading the file
/// only replaces it when that section itself changed on disk.
#[derive(Clone)]
pub struct ConfigHandle {
    inner: Arc<ArcSwap<LineConfig>>,
    /// `[recipe]` as last read from the backing file
    file_recipe: Arc<ArcSwap<Recipe>>,
    path: Option<PathBuf>,
}

impl ConfigHandle {
    pub fn new(config: LineConfig) -> Self {
        Self {
            file_recipe: Arc::new(ArcSwap::from_pointee(config.recipe.clone())),
            inner: Arc::new(ArcSwap::from_pointee(config)),
            path: None,
        }
    }

    /// Remember the file this config came from so [`reload`](Self::reload) can re-read it.
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Lock-free snapshot of the current config.
    pub fn snapshot(&self) -> Arc<LineConfig> {
        self.inner.load_full()
    }

    /// Replace the whole config, returning the keys that changed.
    pub fn replace(&self, config: LineConfig) -> Vec<ConfigChange> {
        let old = self.inner.swap(Arc::new(config));
        diff_configs(&old, &self.inner.load())
    }

    /// Apply an in-place edit to a copy of the current config and swap it in.
    pub fn update<F>(&self, edit: F) -> Vec<ConfigChange>
    where
        F: Fn(&mut LineConfig),
    {
        let old = self.inner.rcu(|current| {
            let mut next = LineConfig::clone(current);
            edit(&mut next);
            next
        });
        diff_configs(&old, &self.inner.load())
    }

    /// Swap in a new recipe after validating it.
    pub fn set_recipe(&self, recipe: Recipe) -> Result<Vec<ConfigChange>, ConfigError> {
        let errors = recipe.validate();
        if !errors.is_empty() {
            return Err(ConfigError::Validation(errors));
        }
        Ok(self.update(|c| c.recipe = recipe.clone()))
    }

    /// Re-read the backing file and swap it in if it parses and validates.
    ///
    /// The active recipe is kept unless the file's `[recipe]` section differs
    /// from the last read. On any error the previous config stays active.
    pub fn reload(&self) -> Result<Vec<ConfigChange>, ConfigError> {
        let path = self.path.as_deref().ok_or(ConfigError::NoBackingFile)?;
        let fresh = LineConfig::load_from_file(path)?;

        let current = self.snapshot();
        if fresh.plc.layout != current.plc.layout {
            tracing::warn!("Register layout changed on disk, takes effect after restart");
        }

        let recipe_edited = fresh.recipe != **self.file_recipe.load();
        if recipe_edited {
            tracing::info!(name = %fresh.recipe.name, "Recipe section changed on disk, replacing active recipe");
        }
        let file_recipe = fresh.recipe.clone();
        let old = self.inner.rcu(|active| {
            let mut next = fresh.clone();
            if !recipe_edited {
                next.recipe = active.recipe.clone();
            }
            next
        });
        self.file_recipe.store(Arc::new(file_recipe));

        let changes = diff_configs(&old, &self.inner.load());
        for change in &changes {
            if change.requires_restart {
                tracing::warn!(key = %change.key, old = %change.old, new = %change.new, "Config key changed but requires restart");
            } else {
                tracing::info!(key = %change.key, old = %change.old, new = %change.new, "Config key hot-reloaded");
            }
        }
        Ok(changes)
    }
}

/// Compare two configs leaf by leaf.
pub fn diff_configs(old: &LineConfig, new: &LineConfig) -> Vec<ConfigChange> {
    let old_leaves = flatten(old);
    let new_leaves = flatten(new);

    let mut changes = Vec::new();
    for (key, new_value) in &new_leaves {
        let old_value = old_leaves.get(key).cloned().unwrap_or_default();
        if &old_value != new_value {
            changes.push(ConfigChange {
                requires_restart: RESTART_REQUIRED_PREFIXES
                    .iter()
                    .any(|p| key.starts_with(p)),
                key: key.clone(),
                old: old_value,
                new: new_value.clone(),
            });
        }
    }
    for (key, old_value) in &old_leaves {
        if !new_leaves.contains_key(key) {
            changes.push(ConfigChange {
                requires_restart: RESTART_REQUIRED_PREFIXES
                    .iter()
                    .any(|p| key.starts_with(p)),
                key: key.clone(),
                old: old_value.clone(),
                new: String::new(),
            });
        }
    }
    changes
}

fn flatten(config: &LineConfig) -> BTreeMap<String, String> {
    let mut leaves = BTreeMap::new();
    if let Ok(value) = toml::Value::try_from(config) {
        flatten_value(&value, "", &mut leaves);
    }
    leaves
}

fn flatten_value(value: &toml::Value, prefix: &str, out: &mut BTreeMap<String, String>) {
    match value {
        toml::Value::Table(table) => {
            for (k, v) in table {
                let path = if prefix.is_empty() {
                    k.clone()
                } else {
                    format!("{prefix}.{k}")
                };
                flatten_value(v, &path, out);
            }
        }
        other => {
            out.insert(prefix.to_string(), other.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_reports_changed_keys() {
        let handle = ConfigHandle::new(LineConfig::default());
        let changes = handle.update(|c| c.recipe.max_lumps = 7);

        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].key, "recipe.max_lumps");
        assert!(!changes[0].requires_restart);
        assert_eq!(handle.snapshot().recipe.max_lumps, 7);
    }

    #[test]
    fn endpoint_change_requires_restart() {
        let handle = ConfigHandle::new(LineConfig::default());
        let changes = handle.update(|c| c.plc.endpoint = "sim://other".to_string());

        assert_eq!(changes.len(), 1);
        assert!(changes[0].requires_restart);
    }

    #[test]
    fn invalid_recipe_is_rejected_and_old_one_kept() {
        let handle = ConfigHandle::new(LineConfig::default());
        let mut recipe = handle.snapshot().recipe.clone();
        recipe.flaw_window_m = -1.0;

        assert!(handle.set_recipe(recipe).is_err());
        assert!(handle.snapshot().recipe.flaw_window_m > 0.0);
    }

    #[test]
    fn reload_without_backing_file_fails() {
        let handle = ConfigHandle::new(LineConfig::default());
        assert!(matches!(handle.reload(), Err(ConfigError::NoBackingFile)));
    }

    #[test]
    fn reload_picks_up_file_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("line_config.toml");
        std::fs::write(&path, "[recipe]\nmax_necks = 4\n").unwrap();

        let handle = ConfigHandle::new(LineConfig::load_from_file(&path).unwrap()).with_path(&path);
        assert_eq!(handle.snapshot().recipe.max_necks, 4);

        std::fs::write(&path, "[recipe]\nmax_necks = 9\n").unwrap();
        let changes = handle.reload().unwrap();

        assert_eq!(handle.snapshot().recipe.max_necks, 9);
        assert!(changes.iter().any(|c| c.key == "recipe.max_necks"));
    }
}
