//! Bounded-memory event cache for large books: at most `max_chunks` chunks
//! of `chunk_size` lines per mode are held at once, LRU-evicted. An evicted
//! chunk is rebuilt by byte-offset-skipping the decompressed stream rather
//! than reparsing every line before it (§4.3, §9 "arena vs. lock" tradeoff
//! resolved the same way as the LUT store: a lock-guarded map, not lock-free).
//! Each mode's LRU state has its own mutex behind a shared `RwLock<HashMap>`,
//! so a cache miss on one mode never blocks a concurrent miss on another.
//! Only inserting a brand-new mode takes the map's write lock.

use super::book::open_stream;
use crate::error::{LutError, Result};
use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::io::{BufRead, Read};
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::Arc;

struct ModeIndex {
    path: PathBuf,
    /// Cumulative decompressed byte offset at the start of chunk `i`.
    chunk_byte_offsets: Vec<u64>,
    total_lines: usize,
}

struct ModeState {
    index: ModeIndex,
    chunks: LruCache<usize, Arc<Vec<String>>>,
}

pub struct ChunkedEventCache {
    chunk_size: usize,
    max_chunks: usize,
    modes: RwLock<HashMap<String, Mutex<ModeState>>>,
}

impl ChunkedEventCache {
    pub fn new(chunk_size: usize, max_chunks: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            max_chunks: max_chunks.max(1),
            modes: RwLock::new(HashMap::new()),
        }
    }

    fn build_index(&self, path: &PathBuf) -> Result<ModeIndex> {
        let reader = open_stream(path)?;
        let mut chunk_byte_offsets = vec![0u64];
        let mut bytes = 0u64;
        let mut lines_in_chunk = 0usize;
        let mut total_lines = 0usize;
        for line in reader.lines() {
            let line = line.map_err(|e| LutError::io(format!("{}: {e}", path.display())))?;
            bytes += line.len() as u64 + 1;
            total_lines += 1;
            lines_in_chunk += 1;
            if lines_in_chunk == self.chunk_size {
                chunk_byte_offsets.push(bytes);
                lines_in_chunk = 0;
            }
        }
        Ok(ModeIndex {
            path: path.clone(),
            chunk_byte_offsets,
            total_lines,
        })
    }

    fn read_chunk(&self, index: &ModeIndex, chunk_idx: usize) -> Result<Arc<Vec<String>>> {
        let offset = *index.chunk_byte_offsets.get(chunk_idx).unwrap_or(&0);
        let mut reader = open_stream(&index.path)?;
        if offset > 0 {
            let mut sink = std::io::sink();
            std::io::copy(&mut (&mut reader).take(offset), &mut sink)
                .map_err(|e| LutError::io(format!("{}: {e}", index.path.display())))?;
        }
        let mut lines = Vec::with_capacity(self.chunk_size);
        for line in reader.lines().take(self.chunk_size) {
            lines.push(line.map_err(|e| LutError::io(format!("{}: {e}", index.path.display())))?);
        }
        Ok(Arc::new(lines))
    }

    pub fn get_line(&self, mode: &str, path: &PathBuf, line_index: usize) -> Result<Option<String>> {
        if !self.modes.read().contains_key(mode) {
            let index = self.build_index(path)?;
            let cap = NonZeroUsize::new(self.max_chunks).unwrap();
            self.modes.write().entry(mode.to_string()).or_insert_with(|| {
                Mutex::new(ModeState {
                    index,
                    chunks: LruCache::new(cap),
                })
            });
        }

        let modes = self.modes.read();
        let state_lock = modes.get(mode).expect("just inserted or already present");
        let mut state = state_lock.lock();

        if line_index >= state.index.total_lines {
            return Ok(None);
        }

        let chunk_idx = line_index / self.chunk_size;
        let offset_in_chunk = line_index % self.chunk_size;

        if let Some(chunk) = state.chunks.get(&chunk_idx) {
            return Ok(chunk.get(offset_in_chunk).cloned());
        }

        let chunk = self.read_chunk(&state.index, chunk_idx)?;
        let line = chunk.get(offset_in_chunk).cloned();
        state.chunks.put(chunk_idx, chunk);
        Ok(line)
    }

    pub fn unload(&self, mode: &str) {
        self.modes.write().remove(mode);
    }

    pub fn unload_all(&self) {
        self.modes.write().clear();
    }

    pub fn is_loaded(&self, mode: &str) -> bool {
        self.modes.read().contains_key(mode)
    }
}
