//! Configuration hot reload.
//!
//! Watches the configuration file and republishes the snapshot on change.
//! A malformed or invalid update is logged and discarded; the previous
//! snapshot stays in effect, so a bad edit can never take the gateway
//! down.

use std::path::PathBuf;
use std::sync::Arc;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::{ConfigError, Result};
use crate::model::GatewayConfig;
use crate::store::ConfigStore;

/// Keeps the filesystem watcher and its reload task alive. Dropping the
/// handle stops watching.
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

impl ConfigWatcher {
    /// Starts watching `path`, publishing valid updates into `store`.
    pub fn spawn(path: PathBuf, store: Arc<ConfigStore>) -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();

        let mut watcher = notify::recommended_watcher(move |event: notify::Result<Event>| {
            let _ = tx.send(event);
        })
        .map_err(|e| ConfigError::Watch(e.to_string()))?;
        watcher
            .watch(&path, RecursiveMode::NonRecursive)
            .map_err(|e| ConfigError::Watch(e.to_string()))?;

        let task = tokio::spawn(reload_loop(path, store, rx));
        Ok(Self {
            _watcher: watcher,
            task,
        })
    }

    pub fn abort(&self) {
        self.task.abort();
    }
}

async fn reload_loop(
    path: PathBuf,
    store: Arc<ConfigStore>,
    mut rx: mpsc::UnboundedReceiver<notify::Result<Event>>,
) {
    while let Some(event) = rx.recv().await {
        match event {
            Ok(event) if is_content_change(&event.kind) => {
                match GatewayConfig::load(&path) {
                    Ok(config) => {
                        store.swap(config);
                        info!(path = %path.display(), "configuration reloaded");
                    }
                    Err(e) => {
                        warn!(path = %path.display(), error = %e,
                            "ignoring invalid configuration update");
                    }
                }
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "configuration watch error"),
        }
    }
}

fn is_content_change(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Modify(_) | EventKind::Create(_))
}
