//! Background ingestion of event books, decoupled from request-serving
//! threads (§4.4). Each mode's book is streamed on a blocking task; progress
//! and lifecycle transitions are published on the [`crate::hub::Hub`] and
//! also held for direct polling via [`BackgroundLoader::status`].

pub mod status;

pub use status::{LoadPhase, LoadStatus, Priority};

use crate::config::LibraryConfig;
use crate::error::Result;
use crate::events::EventsStore;
use crate::hub::{Hub, HubEventKind, HubMessage};
use crate::lut::LutStore;
use parking_lot::RwLock;
use serde_json::json;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

pub struct BackgroundLoader {
    config: LibraryConfig,
    lut: Arc<LutStore>,
    events: Arc<EventsStore>,
    hub: Hub,
    statuses: Arc<RwLock<HashMap<String, LoadStatus>>>,
    priority: RwLock<HashMap<String, Priority>>,
}

impl BackgroundLoader {
    pub fn new(config: LibraryConfig, lut: Arc<LutStore>, events: Arc<EventsStore>, hub: Hub) -> Arc<Self> {
        let statuses = lut
            .list_modes()
            .into_iter()
            .map(|m| (m.to_ascii_lowercase(), LoadStatus::pending(m)))
            .collect();
        Arc::new(Self {
            config,
            lut,
            events,
            hub,
            statuses: Arc::new(RwLock::new(statuses)),
            priority: RwLock::new(HashMap::new()),
        })
    }

    pub fn status(&self, mode: &str) -> Option<LoadStatus> {
        self.statuses.read().get(&mode.to_ascii_lowercase()).cloned()
    }

    pub fn all_statuses(&self) -> Vec<LoadStatus> {
        self.statuses.read().values().cloned().collect()
    }

    pub fn set_priority(&self, mode: &str, priority: Priority) {
        self.priority.write().insert(mode.to_ascii_lowercase(), priority);
        self.hub.broadcast(HubMessage::new(
            HubEventKind::PriorityChanged,
            Some(mode.to_string()),
            json!({ "priority": priority }),
        ));
    }

    fn priority_of(&self, mode: &str) -> Priority {
        self.priority
            .read()
            .get(&mode.to_ascii_lowercase())
            .copied()
            .unwrap_or(Priority::High)
    }

    /// Spawns ingestion of `mode`'s event book in the background. A mode
    /// with no `events` entry in `index.json` completes immediately.
    pub fn load_mode(self: &Arc<Self>, mode: String) {
        let this = self.clone();
        tokio::spawn(async move {
            let _ = this.load_mode_with_retry(&mode).await;
        });
    }

    async fn load_mode_with_retry(&self, mode: &str) -> Result<()> {
        let backoffs = self.config.reload_retry_backoff_secs;
        let mut last_err = None;
        for (attempt, backoff) in std::iter::once(0).chain(backoffs).enumerate() {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_secs(backoff)).await;
                info!(mode, attempt, "retrying event book ingestion");
            }
            match self.load_mode_once(mode).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(mode, attempt, error = %e, "event book ingestion failed");
                    last_err = Some(e);
                }
            }
        }
        let e = last_err.expect("at least one attempt ran");
        self.mark_status_error(mode, &e.to_string());
        Err(e)
    }

    async fn load_mode_once(&self, mode: &str) -> Result<()> {
        let path = match self.lut.events_path(mode)? {
            Some(p) => p,
            None => {
                self.mark_status_complete(mode, None);
                return Ok(());
            }
        };

        let mode = mode.to_string();
        let config = self.config.clone();
        let priority = self.priority_of(&mode);
        let hub = self.hub.clone();
        let statuses = self.statuses.clone();

        self.mark_status_loading(&mode, std::fs::metadata(&path).ok().map(|m| m.len()));

        let statuses_snapshot_mode = mode.clone();
        let result = tokio::task::spawn_blocking(move || {
            stream_with_progress(&mode, &path, &config, priority, &hub, &statuses)
        })
        .await
        .map_err(|e| crate::error::LutError::state(format!("loader task panicked: {e}")))?;

        match &result {
            Ok(()) => self.mark_status_complete(&statuses_snapshot_mode, None),
            Err(e) => self.mark_status_error(&statuses_snapshot_mode, &e.to_string()),
        }
        result
    }

    fn mark_status_loading(&self, mode: &str, total_bytes: Option<u64>) {
        let key = mode.to_ascii_lowercase();
        let mut statuses = self.statuses.write();
        let entry = statuses.entry(key).or_insert_with(|| LoadStatus::pending(mode));
        entry.mark_loading(total_bytes);
        self.hub.broadcast(HubMessage::new(
            HubEventKind::LoadingStarted,
            Some(mode.to_string()),
            json!({ "total_bytes": total_bytes }),
        ));
    }

    fn mark_status_complete(&self, mode: &str, _unused: Option<()>) {
        let key = mode.to_ascii_lowercase();
        let mut statuses = self.statuses.write();
        let entry = statuses.entry(key).or_insert_with(|| LoadStatus::pending(mode));
        entry.mark_complete();
        self.hub.broadcast(HubMessage::new(
            HubEventKind::LoadingComplete,
            Some(mode.to_string()),
            json!({ "lines": entry.current_line }),
        ));
    }

    fn mark_status_error(&self, mode: &str, message: &str) {
        let key = mode.to_ascii_lowercase();
        let mut statuses = self.statuses.write();
        let entry = statuses.entry(key).or_insert_with(|| LoadStatus::pending(mode));
        entry.mark_error(message);
        self.hub.broadcast(HubMessage::new(
            HubEventKind::LoadingError,
            Some(mode.to_string()),
            json!({ "error": message }),
        ));
    }

    /// Full restart: reloads the LUT store's tables and clears every cached
    /// event book, then re-queues ingestion for every mode. Retries the
    /// table reload per `reload_retry_backoff_secs` before giving up.
    pub async fn restart(self: &Arc<Self>) -> Result<()> {
        self.hub.broadcast(HubMessage::new(HubEventKind::ReloadStarted, None, json!({})));

        let backoffs = self.config.reload_retry_backoff_secs;
        let mut last_err = None;
        let mut reloaded = false;
        for (attempt, backoff) in std::iter::once(0).chain(backoffs).enumerate() {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_secs(backoff)).await;
            }
            match self.lut.reload() {
                Ok(()) => {
                    reloaded = true;
                    break;
                }
                Err(e) => {
                    error!(attempt, error = %e, "lut reload failed");
                    last_err = Some(e);
                }
            }
        }
        if !reloaded {
            return Err(last_err.expect("at least one attempt ran"));
        }

        self.events.unload_all();
        {
            let mut statuses = self.statuses.write();
            statuses.clear();
            for mode in self.lut.list_modes() {
                statuses.insert(mode.to_ascii_lowercase(), LoadStatus::pending(mode));
            }
        }
        for mode in self.lut.list_modes() {
            self.load_mode(mode);
        }
        Ok(())
    }

    /// Re-reads a single mode's weights table and re-ingests its event book,
    /// without touching any other mode's table, cache, or status. The
    /// scoped counterpart to [`Self::restart`], used by the watcher when a
    /// change maps to exactly one mode.
    pub async fn reload_mode(self: &Arc<Self>, mode: &str) -> Result<()> {
        self.lut.reload_mode(mode)?;
        self.events.unload_mode(mode);
        {
            let key = mode.to_ascii_lowercase();
            self.statuses.write().insert(key, LoadStatus::pending(mode));
        }
        self.load_mode_with_retry(mode).await
    }
}

/// Runs on a blocking thread: streams `path` line by line, publishing
/// progress at the configured cadence and throttling itself under low
/// priority (§4.4).
fn stream_with_progress(
    mode: &str,
    path: &PathBuf,
    config: &LibraryConfig,
    priority: Priority,
    hub: &Hub,
    statuses: &RwLock<HashMap<String, LoadStatus>>,
) -> Result<()> {
    let mut last_publish = Instant::now();
    let mut lines_since_publish = 0u64;
    let mut bytes_read = 0u64;
    let key = mode.to_ascii_lowercase();

    EventsStore::stream(path, |n, line| {
        bytes_read += line.len() as u64 + 1;
        lines_since_publish += 1;
        let current_line = n as u64 + 1;

        let due_by_count = lines_since_publish >= config.progress_interval_lines;
        let due_by_time = last_publish.elapsed() >= Duration::from_millis(config.progress_interval_ms);
        if due_by_count || due_by_time {
            if let Some(status) = statuses.write().get_mut(&key) {
                status.advance(current_line, bytes_read);
            }
            hub.broadcast(HubMessage::new(
                HubEventKind::LoadingProgress,
                Some(mode.to_string()),
                json!({ "current_line": current_line, "bytes_read": bytes_read }),
            ));
            last_publish = Instant::now();
            lines_since_publish = 0;
        }

        if priority == Priority::Low && (n + 1) % config.low_priority_batch_size == 0 {
            std::thread::sleep(Duration::from_millis(config.low_priority_batch_delay_ms));
        }

        true
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn fixture() -> (tempfile::TempDir, Arc<LutStore>, Arc<EventsStore>) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("index.json"),
            r#"{"modes":[{"name":"base","cost":1.0,"weights":"base.csv","events":"base.jsonl.zst"}]}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("base.csv"), "0,50,0\n1,30,200\n").unwrap();

        let raw = "{\"a\":1}\n{\"a\":2}\n";
        let compressed = zstd::encode_all(raw.as_bytes(), 0).unwrap();
        std::fs::File::create(dir.path().join("base.jsonl.zst"))
            .unwrap()
            .write_all(&compressed)
            .unwrap();

        let lut = Arc::new(LutStore::open(dir.path()).unwrap());
        let config = LibraryConfig::new(dir.path());
        let events = Arc::new(EventsStore::new(&config));
        (dir, lut, events)
    }

    #[tokio::test]
    async fn load_mode_completes_and_publishes() {
        let (_dir, lut, events) = fixture();
        let config = LibraryConfig::new(".");
        let hub = Hub::new(16, 16);
        let mut sub = hub.subscribe();
        let loader = BackgroundLoader::new(config, lut, events.clone(), hub);

        loader.load_mode_with_retry("base").await.unwrap();
        assert_eq!(loader.status("base").unwrap().phase, LoadPhase::Complete);
        assert!(events.is_loaded("base"));

        let mut saw_complete = false;
        while let Ok(msg) = sub.try_recv() {
            if msg.kind == HubEventKind::LoadingComplete {
                saw_complete = true;
            }
        }
        assert!(saw_complete);
    }

    #[tokio::test]
    async fn mode_without_events_completes_immediately() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("index.json"),
            r#"{"modes":[{"name":"base","cost":1.0,"weights":"base.csv"}]}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("base.csv"), "0,1,0\n").unwrap();
        let lut = Arc::new(LutStore::open(dir.path()).unwrap());
        let config = LibraryConfig::new(dir.path());
        let events = Arc::new(EventsStore::new(&config));
        let hub = Hub::new(16, 16);
        let loader = BackgroundLoader::new(config, lut, events, hub);
        loader.load_mode_with_retry("base").await.unwrap();
        assert_eq!(loader.status("base").unwrap().phase, LoadPhase::Complete);
    }
}
