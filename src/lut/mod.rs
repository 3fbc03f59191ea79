pub mod bucket_cache;
pub mod stats;
pub mod table;

pub use bucket_cache::{BucketDistributionCache, CachedOutcome};
pub use stats::{analyze, build_distribution, payout_bucket_histogram, DerivedStatistics, PayoutBucket, PayoutDistributionEntry};
pub use table::{LookupTable, Outcome};

use crate::error::{LutError, Result};
use crate::index::IndexFile;
use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeSummary {
    pub mode: String,
    pub cost: f64,
    pub outcome_count: usize,
    pub total_weight: u64,
    pub has_events: bool,
}

struct LoadedMode {
    table: Arc<LookupTable>,
    weights_path: PathBuf,
    events_path: Option<PathBuf>,
}

/// Owns every mode's parsed weights table, guarded by a read/write lock;
/// only `reload` and `rewrite_weights` take the writer (§4.2, §5).
pub struct LutStore {
    data_dir: PathBuf,
    modes: RwLock<HashMap<String, LoadedMode>>,
    pub bucket_cache: BucketDistributionCache,
}

impl LutStore {
    pub fn open(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let store = Self {
            data_dir: data_dir.into(),
            modes: RwLock::new(HashMap::new()),
            bucket_cache: BucketDistributionCache::new(),
        };
        store.reload()?;
        Ok(store)
    }

    fn load_all(data_dir: &Path) -> Result<HashMap<String, LoadedMode>> {
        let index = IndexFile::load(data_dir)?;
        let mut modes = HashMap::new();
        for entry in &index.modes {
            let weights_path = index.weights_path(data_dir, entry);
            let table = LookupTable::from_csv_path(&entry.name, entry.cost, &weights_path)?;
            let events_path = index.events_path(data_dir, entry);
            modes.insert(
                entry.name.to_ascii_lowercase(),
                LoadedMode {
                    table: Arc::new(table),
                    weights_path,
                    events_path,
                },
            );
        }
        Ok(modes)
    }

    /// Re-reads `index.json` and every CSV, then invalidates the bucket cache.
    /// A CSV parse error aborts the whole reload and leaves the store's
    /// previous state intact (§7: "CSV parse errors abort the whole load").
    pub fn reload(&self) -> Result<()> {
        let fresh = Self::load_all(&self.data_dir)?;
        *self.modes.write() = fresh;
        self.bucket_cache.invalidate_all();
        Ok(())
    }

    /// Re-parses a single mode's weights CSV from `index.json` in place,
    /// leaving every other loaded mode untouched. Used by the watcher and
    /// the Background Loader's `reload_mode` so a single mode's file edit
    /// doesn't invalidate or re-broadcast unrelated modes.
    pub fn reload_mode(&self, mode: &str) -> Result<()> {
        let index = IndexFile::load(&self.data_dir)?;
        let entry = index
            .find(mode)
            .ok_or_else(|| LutError::not_found(format!("mode {mode:?}")))?;
        let weights_path = index.weights_path(&self.data_dir, entry);
        let table = LookupTable::from_csv_path(&entry.name, entry.cost, &weights_path)?;
        let events_path = index.events_path(&self.data_dir, entry);

        let key = entry.name.to_ascii_lowercase();
        self.modes.write().insert(
            key,
            LoadedMode {
                table: Arc::new(table),
                weights_path,
                events_path,
            },
        );
        self.bucket_cache.invalidate(&entry.name);
        Ok(())
    }

    /// Maps an on-disk path (as reported by the watcher) back to the mode
    /// whose weights or events file it is, if any. Used to scope a
    /// filesystem change to a single mode's reload instead of a full restart.
    pub fn mode_for_path(&self, path: &Path) -> Option<String> {
        let guard = self.modes.read();
        guard
            .values()
            .find(|m| paths_match(&m.weights_path, path) || m.events_path.as_deref().is_some_and(|p| paths_match(p, path)))
            .map(|m| m.table.mode.clone())
    }

    pub fn events_path(&self, mode: &str) -> Result<Option<PathBuf>> {
        let guard = self.modes.read();
        let m = guard
            .get(&mode.to_ascii_lowercase())
            .ok_or_else(|| LutError::not_found(format!("mode {mode:?}")))?;
        Ok(m.events_path.clone())
    }

    pub fn get_table(&self, mode: &str) -> Result<Arc<LookupTable>> {
        self.modes
            .read()
            .get(&mode.to_ascii_lowercase())
            .map(|m| m.table.clone())
            .ok_or_else(|| LutError::not_found(format!("mode {mode:?}")))
    }

    pub fn list_modes(&self) -> Vec<String> {
        self.modes.read().values().map(|m| m.table.mode.clone()).collect()
    }

    pub fn summaries(&self) -> Vec<ModeSummary> {
        self.modes
            .read()
            .values()
            .map(|m| ModeSummary {
                mode: m.table.mode.clone(),
                cost: m.table.cost,
                outcome_count: m.table.outcomes.len(),
                total_weight: m.table.total_weight(),
                has_events: m.events_path.is_some(),
            })
            .collect()
    }

    pub fn analyze(&self, mode: &str) -> Result<DerivedStatistics> {
        let table = self.get_table(mode)?;
        Ok(stats::analyze(&table))
    }

    pub fn build_distribution(&self, mode: &str) -> Result<Vec<PayoutDistributionEntry>> {
        let table = self.get_table(mode)?;
        Ok(stats::build_distribution(&table))
    }

    pub fn payout_bucket_histogram(&self, mode: &str) -> Result<Vec<PayoutBucket>> {
        let table = self.get_table(mode)?;
        Ok(stats::payout_bucket_histogram(&table))
    }

    /// Paginates outcomes whose payout falls in `[range_start, range_end)`,
    /// backed by the lazily-generated bucket cache.
    pub fn bucket_distribution(
        &self,
        mode: &str,
        range_start: f64,
        range_end: f64,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<CachedOutcome>> {
        let table = self.get_table(mode)?;
        Ok(bucket_cache::paginate(
            &self.bucket_cache,
            &table,
            range_start,
            range_end,
            offset,
            limit,
        ))
    }

    /// Cross-mode statistics table, keyed by mode name; backs compliance's
    /// cross-mode RTP check and the "base RTP" discovery heuristic (§9).
    pub fn compare(&self, modes: &[String]) -> Result<HashMap<String, DerivedStatistics>> {
        let mut out = HashMap::new();
        for m in modes {
            out.insert(m.clone(), self.analyze(m)?);
        }
        Ok(out)
    }

    /// Atomic rewrite: write to a sibling temp file, fsync, rename over the
    /// original, then mutate the in-memory table and invalidate its bucket
    /// cache entry. `new_weights.len()` must equal the table's outcome count.
    pub fn rewrite_weights(&self, mode: &str, new_weights: &[u64], backup: bool) -> Result<()> {
        let key = mode.to_ascii_lowercase();

        let (weights_path, mut table) = {
            let guard = self.modes.read();
            let loaded = guard
                .get(&key)
                .ok_or_else(|| LutError::not_found(format!("mode {mode:?}")))?;
            (loaded.weights_path.clone(), (*loaded.table).clone())
        };

        if new_weights.len() != table.outcomes.len() {
            return Err(LutError::validation(format!(
                "{mode}: expected {} weights, got {}",
                table.outcomes.len(),
                new_weights.len()
            )));
        }

        if backup {
            let stamp = Utc::now().format("%Y%m%d_%H%M%S");
            let backup_path = with_suffix(&weights_path, &stamp.to_string());
            std::fs::copy(&weights_path, &backup_path)?;
        }

        table.rewrite_weights(new_weights)?;
        atomic_write(&weights_path, &table.to_csv_string())?;

        self.modes
            .write()
            .get_mut(&key)
            .ok_or_else(|| LutError::not_found(format!("mode {mode:?}")))?
            .table = Arc::new(table);

        self.bucket_cache.invalidate(mode);
        Ok(())
    }
}

/// Compares two filesystem paths for the same file, falling back to a
/// plain equality check if either side can't be canonicalized (e.g. the
/// watcher reported a path for a file that was already removed).
fn paths_match(a: &Path, b: &Path) -> bool {
    match (std::fs::canonicalize(a), std::fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(format!(".{suffix}.bak"));
    path.with_file_name(name)
}

fn atomic_write(path: &Path, contents: &str) -> Result<()> {
    let tmp_path = with_suffix(path, "tmp");
    {
        let mut f = std::fs::File::create(&tmp_path)?;
        f.write_all(contents.as_bytes())?;
        f.sync_all()?;
    }
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn write_fixture(dir: &Path) {
        std::fs::write(
            dir.join("index.json"),
            r#"{"modes":[{"name":"base","cost":1.0,"weights":"base.csv"}]}"#,
        )
        .unwrap();
        std::fs::write(dir.join("base.csv"), "0,50,0\n1,30,200\n2,20,1000\n").unwrap();
    }

    #[test]
    fn opens_and_analyzes() {
        let dir = tempfile::tempdir().unwrap();
        write_fixture(dir.path());
        let store = LutStore::open(dir.path()).unwrap();
        let stats = store.analyze("BASE").unwrap();
        assert_eq!(stats.rtp, 2.6);
        assert_eq!(store.list_modes(), vec!["base".to_string()]);
    }

    #[test]
    fn unknown_mode_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        write_fixture(dir.path());
        let store = LutStore::open(dir.path()).unwrap();
        assert!(matches!(store.get_table("missing"), Err(LutError::NotFound(_))));
    }

    #[test]
    fn rewrite_weights_is_atomic_and_invalidates_cache() {
        let dir = tempfile::tempdir().unwrap();
        write_fixture(dir.path());
        let store = LutStore::open(dir.path()).unwrap();

        let _ = store.bucket_distribution("base", 1.0, 2000.0, 0, 10).unwrap();
        assert!(store.bucket_cache.is_present("base"));

        store.rewrite_weights("base", &[10, 10, 10], false).unwrap();
        assert!(!store.bucket_cache.is_present("base"));

        let stats = store.analyze("base").unwrap();
        assert_eq!(stats.rtp, 4.0);

        let on_disk = std::fs::read_to_string(dir.path().join("base.csv")).unwrap();
        let rows: Vec<&str> = on_disk.lines().collect();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0], "0,10,0");
        assert_eq!(rows[2], "2,10,1000");
    }

    #[test]
    fn rewrite_weights_with_backup_leaves_original_copy() {
        let dir = tempfile::tempdir().unwrap();
        write_fixture(dir.path());
        let store = LutStore::open(dir.path()).unwrap();
        store.rewrite_weights("base", &[1, 1, 1], true).unwrap();

        let backups: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".bak"))
            .collect();
        assert_eq!(backups.len(), 1);
    }

    #[test]
    fn reload_picks_up_on_disk_changes() {
        let dir = tempfile::tempdir().unwrap();
        write_fixture(dir.path());
        let store = LutStore::open(dir.path()).unwrap();
        std::fs::write(dir.path().join("base.csv"), "0,1,0\n1,1,100\n").unwrap();
        store.reload().unwrap();
        let t = store.get_table("base").unwrap();
        assert_eq!(t.outcomes.len(), 2);
    }

    #[test]
    fn reload_mode_rereads_only_that_mode() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("index.json"),
            r#"{"modes":[{"name":"base","cost":1.0,"weights":"base.csv"},{"name":"bonus","cost":2.0,"weights":"bonus.csv"}]}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("base.csv"), "0,50,0\n1,30,200\n2,20,1000\n").unwrap();
        std::fs::write(dir.path().join("bonus.csv"), "0,1,0\n1,1,500\n").unwrap();
        let store = LutStore::open(dir.path()).unwrap();

        let _ = store.bucket_distribution("base", 1.0, 2000.0, 0, 10).unwrap();
        let _ = store.bucket_distribution("bonus", 1.0, 2000.0, 0, 10).unwrap();

        std::fs::write(dir.path().join("base.csv"), "0,1,0\n1,1,100\n").unwrap();
        store.reload_mode("base").unwrap();

        assert_eq!(store.get_table("base").unwrap().outcomes.len(), 2);
        assert_eq!(store.get_table("bonus").unwrap().outcomes.len(), 2);
        assert!(!store.bucket_cache.is_present("base"));
        assert!(store.bucket_cache.is_present("bonus"));
    }

    #[test]
    fn mode_for_path_matches_weights_file() {
        let dir = tempfile::tempdir().unwrap();
        write_fixture(dir.path());
        let store = LutStore::open(dir.path()).unwrap();
        let mode = store.mode_for_path(&dir.path().join("base.csv"));
        assert_eq!(mode.as_deref(), Some("base"));
        assert_eq!(store.mode_for_path(&dir.path().join("index.json")), None);
    }
}
