//! Polling-based config file watcher.
//!
//! Checks the config file's mtime every 2 seconds. When a change is detected,
//! debounces for 500ms (to handle partial writes from editors), then calls
//! [`ConfigHandle::reload`] and sends the result via an mpsc channel.

use std::path::Path;
use std::time::{Duration, SystemTime};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{ConfigChange, ConfigHandle};

/// Events emitted by the config watcher.
#[derive(Debug)]
pub enum ConfigEvent {
    /// Config was successfully reloaded with these changes.
    Reloaded(Vec<ConfigChange>),
    /// Reload was attempted but failed (old config remains active).
    Error(String),
}

/// Interval between mtime checks.
const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Debounce delay after detecting a change (editors often write in stages).
const DEBOUNCE_DELAY: Duration = Duration::from_millis(500);

/// Run the config file watcher loop.
///
/// Polls the handle's backing file for mtime changes and reloads it when
/// detected. Sends events on `tx`. Returns when the channel is closed, the
/// token is cancelled, or the handle has no backing file.
pub async fn run_config_watcher(
    handle: ConfigHandle,
    tx: mpsc::Sender<ConfigEvent>,
    cancel: CancellationToken,
) {
    let Some(path) = handle.path().map(Path::to_path_buf) else {
        tracing::debug!("Config has no backing file, watcher not started");
        return;
    };
    tracing::info!(path = %path.display(), "Config watcher started");

    let mut last_mtime = get_mtime(&path);

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                tracing::debug!("Config watcher cancelled");
                return;
            }
            () = tokio::time::sleep(POLL_INTERVAL) => {}
        }

        let Some(current) = get_mtime(&path) else {
            if last_mtime.is_some() {
                tracing::warn!(
                    path = %path.display(),
                    "Config file not accessible, keeping current config, will retry"
                );
                last_mtime = None;
            }
            continue;
        };

        // A file that reappears counts as changed
        if last_mtime == Some(current) {
            continue;
        }

        tokio::time::sleep(DEBOUNCE_DELAY).await;
        if get_mtime(&path) != Some(current) {
            continue;
        }
        last_mtime = Some(current);

        let event = match handle.reload() {
            Ok(changes) => ConfigEvent::Reloaded(changes),
            Err(e) => {
                tracing::error!(error = %e, "Config hot-reload failed, keeping previous config");
                ConfigEvent::Error(e.to_string())
            }
        };

        if tx.send(event).await.is_err() {
            tracing::debug!("Config watcher channel closed, stopping");
            return;
        }
    }
}

fn get_mtime(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).ok().and_then(|m| m.modified().ok())
}
