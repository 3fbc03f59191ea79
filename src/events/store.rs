//! [`EventsStore`]: per-mode access to event books, backed by either a full
//! in-memory parse (small books) or the bounded [`ChunkedEventCache`] (large
//! books). Line indexing is the caller's responsibility: pass the
//! `line_index` already derived from `sim_id - sim_id_offset`, keeping this
//! module independent of the LUT store (§4.2, §4.3).

use super::book::{open_stream, parse_line};
use super::chunked::ChunkedEventCache;
use crate::config::LibraryConfig;
use crate::error::{LutError, Result};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;

/// Books at or under this decompressed line count are parsed fully into
/// memory; larger books fall back to the chunked cache. This keeps the
/// common case (most modes' books) off the LRU path entirely.
const FULL_LOAD_LINE_THRESHOLD: usize = 200_000;

pub struct EventsStore {
    max_range_lines: usize,
    chunked: ChunkedEventCache,
    full: RwLock<HashMap<String, Arc<Vec<Value>>>>,
}

impl EventsStore {
    pub fn new(config: &LibraryConfig) -> Self {
        Self {
            max_range_lines: config.max_range_lines,
            chunked: ChunkedEventCache::new(config.chunk_size, config.max_chunks_per_mode),
            full: RwLock::new(HashMap::new()),
        }
    }

    fn ensure_loaded(&self, mode: &str, path: &PathBuf) -> Result<()> {
        if self.full.read().contains_key(mode) || self.chunked.is_loaded(mode) {
            return Ok(());
        }

        let reader = open_stream(path)?;
        let mut lines = Vec::new();
        for line in reader.lines() {
            let line = line.map_err(|e| LutError::io(format!("{}: {e}", path.display())))?;
            lines.push(line);
            if lines.len() > FULL_LOAD_LINE_THRESHOLD {
                // Too large to hold fully; let the chunked cache build its
                // own index from scratch and stop parsing here.
                self.chunked.get_line(mode, path, 0)?;
                return Ok(());
            }
        }

        let values = lines
            .iter()
            .map(|l| parse_line(l))
            .collect::<Result<Vec<Value>>>()?;
        self.full.write().insert(mode.to_string(), Arc::new(values));
        Ok(())
    }

    pub fn get_event(&self, mode: &str, path: &PathBuf, line_index: usize) -> Result<Option<Value>> {
        self.ensure_loaded(mode, path)?;

        if let Some(values) = self.full.read().get(mode) {
            return Ok(values.get(line_index).cloned());
        }

        match self.chunked.get_line(mode, path, line_index)? {
            Some(line) => Ok(Some(parse_line(&line)?)),
            None => Ok(None),
        }
    }

    /// Fetches `[start, end)`, hard-capped at `max_range_lines` (§4.3).
    pub fn get_events_range(
        &self,
        mode: &str,
        path: &PathBuf,
        start: usize,
        end: usize,
    ) -> Result<Vec<Value>> {
        if end < start {
            return Err(LutError::validation("range end before start"));
        }
        if end - start > self.max_range_lines {
            return Err(LutError::validation(format!(
                "range of {} lines exceeds max {}",
                end - start,
                self.max_range_lines
            )));
        }

        let mut out = Vec::with_capacity(end - start);
        for i in start..end {
            match self.get_event(mode, path, i)? {
                Some(v) => out.push(v),
                None => break,
            }
        }
        Ok(out)
    }

    pub fn is_loaded(&self, mode: &str) -> bool {
        self.full.read().contains_key(mode) || self.chunked.is_loaded(mode)
    }

    pub fn unload_mode(&self, mode: &str) {
        self.full.write().remove(mode);
        self.chunked.unload(mode);
    }

    pub fn unload_all(&self) {
        self.full.write().clear();
        self.chunked.unload_all();
    }

    /// Shared line-scan primitive: streams every decompressed line of `path`
    /// through `f`, stopping early once `f` returns `false`. Used by the
    /// background loader's ingestion pass as well as ad hoc diagnostics.
    pub fn stream(path: &PathBuf, mut f: impl FnMut(usize, &str) -> bool) -> Result<()> {
        let reader = open_stream(path)?;
        for (n, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| LutError::io(format!("{}: {e}", path.display())))?;
            if !f(n, &line) {
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_book(dir: &std::path::Path, lines: &[&str]) -> PathBuf {
        let raw = lines.join("\n") + "\n";
        let compressed = zstd::encode_all(raw.as_bytes(), 0).unwrap();
        let path = dir.join("base.jsonl.zst");
        std::fs::File::create(&path).unwrap().write_all(&compressed).unwrap();
        path
    }

    fn config() -> LibraryConfig {
        let mut c = LibraryConfig::default();
        c.chunk_size = 2;
        c.max_chunks_per_mode = 2;
        c.max_range_lines = 10;
        c
    }

    #[test]
    fn full_backend_serves_by_line_index() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_book(dir.path(), &[r#"{"a":1}"#, r#"{"a":2}"#, r#"{"a":3}"#]);
        let store = EventsStore::new(&config());
        let v = store.get_event("base", &path, 1).unwrap().unwrap();
        assert_eq!(v["a"], 2);
        assert!(store.is_loaded("base"));
    }

    #[test]
    fn range_rejects_oversized_request() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_book(dir.path(), &[r#"{"a":1}"#; 3]);
        let store = EventsStore::new(&config());
        assert!(store.get_events_range("base", &path, 0, 50).is_err());
    }

    #[test]
    fn unload_forgets_both_backends() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_book(dir.path(), &[r#"{"a":1}"#]);
        let store = EventsStore::new(&config());
        store.get_event("base", &path, 0).unwrap();
        assert!(store.is_loaded("base"));
        store.unload_mode("base");
        assert!(!store.is_loaded("base"));
    }
}
