//! Filesystem watcher for `index.json` and its referenced CSVs/books (§4.6).
//! Debounces bursts of writes into a single `reload_mode`/`restart` call and
//! can be toggled on or off at runtime without tearing down the loader.

use crate::hub::{Hub, HubEventKind, HubMessage};
use crate::loader::BackgroundLoader;
use crate::lut::LutStore;
use notify_debouncer_mini::{new_debouncer, DebouncedEventKind, Debouncer};
use notify_debouncer_mini::notify::RecommendedWatcher;
use serde_json::json;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Owns the debounced filesystem watch on `data_dir`. Events are funneled
/// through a channel into a single tokio task that calls back into the
/// loader; `enabled` gates whether that task acts on what it receives,
/// so toggling off doesn't require rebuilding the underlying watcher.
pub struct Watcher {
    enabled: Arc<AtomicBool>,
    hub: Hub,
    _debouncer: Debouncer<RecommendedWatcher>,
}

impl Watcher {
    /// Starts watching `data_dir` and spawns the task that reacts to
    /// debounced change batches. A batch whose changed paths all map to
    /// known modes triggers a `reload_mode` per distinct mode; a batch
    /// touching anything else (e.g. `index.json` itself, or an unrecognized
    /// file) falls back to a full `restart()`.
    pub fn start(
        data_dir: impl AsRef<Path>,
        debounce_ms: u64,
        loader: Arc<BackgroundLoader>,
        lut: Arc<LutStore>,
        hub: Hub,
    ) -> crate::error::Result<Self> {
        let data_dir: PathBuf = data_dir.as_ref().to_path_buf();
        let enabled = Arc::new(AtomicBool::new(true));

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut debouncer = new_debouncer(Duration::from_millis(debounce_ms), move |res| {
            let _ = tx.send(res);
        })
        .map_err(|e| crate::error::LutError::io(format!("watcher init: {e}")))?;

        debouncer
            .watcher()
            .watch(&data_dir, notify_debouncer_mini::notify::RecursiveMode::Recursive)
            .map_err(|e| crate::error::LutError::io(format!("watcher watch {}: {e}", data_dir.display())))?;

        let task_enabled = enabled.clone();
        tokio::spawn(async move {
            while let Some(res) = rx.recv().await {
                if !task_enabled.load(Ordering::Relaxed) {
                    continue;
                }
                match res {
                    Ok(events) => {
                        let changed: Vec<&Path> = events
                            .iter()
                            .filter(|e| matches!(e.kind, DebouncedEventKind::Any))
                            .map(|e| e.path.as_path())
                            .collect();
                        if changed.is_empty() {
                            continue;
                        }

                        let mut modes = BTreeSet::new();
                        let mut unmapped = false;
                        for path in &changed {
                            match lut.mode_for_path(path) {
                                Some(mode) => {
                                    modes.insert(mode);
                                }
                                None => unmapped = true,
                            }
                        }

                        if unmapped || modes.is_empty() {
                            info!("watcher: unmapped change detected, restarting loader");
                            if let Err(e) = loader.restart().await {
                                warn!(error = %e, "watcher-triggered restart failed");
                            }
                        } else {
                            for mode in modes {
                                info!(mode = %mode, "watcher: mode-scoped change detected, reloading mode");
                                if let Err(e) = loader.reload_mode(&mode).await {
                                    warn!(mode = %mode, error = %e, "watcher-triggered mode reload failed");
                                }
                            }
                        }
                    }
                    Err(errors) => {
                        for e in errors {
                            warn!(error = %e, "watcher error");
                        }
                    }
                }
            }
        });

        hub.broadcast(HubMessage::new(HubEventKind::WatcherEnabled, None, json!({})));

        Ok(Self {
            enabled,
            hub,
            _debouncer: debouncer,
        })
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
        let kind = if enabled {
            HubEventKind::WatcherEnabled
        } else {
            HubEventKind::WatcherDisabled
        };
        self.hub.broadcast(HubMessage::new(kind, None, json!({})));
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LibraryConfig;
    use crate::events::EventsStore;
    use crate::lut::LutStore;

    #[tokio::test]
    async fn starts_and_toggles_enabled() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("index.json"),
            r#"{"modes":[{"name":"base","cost":1.0,"weights":"base.csv"}]}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("base.csv"), "0,1,0\n").unwrap();

        let config = LibraryConfig::new(dir.path());
        let lut = Arc::new(LutStore::open(dir.path()).unwrap());
        let events = Arc::new(EventsStore::new(&config));
        let hub = Hub::new(16, 16);
        let loader = BackgroundLoader::new(config.clone(), lut.clone(), events, hub.clone());

        let watcher = Watcher::start(dir.path(), 50, loader, lut, hub).unwrap();
        assert!(watcher.is_enabled());
        watcher.set_enabled(false);
        assert!(!watcher.is_enabled());
    }
}
