//! Library-wide tunables.
//!
//! Every field has a sensible default and can be overridden from the
//! environment, but the crate itself never calls `dotenv::dotenv()`; that
//! is a binary concern.

/// Tunables for every store/engine in the crate. Construct with
/// [`LibraryConfig::default`] and override individual fields, or use
/// [`LibraryConfig::from_env`] to pick up `SLOTLAB_*` environment overrides.
#[derive(Debug, Clone)]
pub struct LibraryConfig {
    /// Directory containing `index.json` and the referenced CSV/zstd files.
    pub data_dir: std::path::PathBuf,

    /// Max rounds retained per session history ring.
    pub session_history_len: usize,
    /// Sessions idle longer than this are swept by `cleanup_inactive`.
    pub session_max_age_secs: u64,
    /// Starting balance (minor units) for a freshly created session.
    pub default_starting_balance: i64,

    /// Lines per chunk in the chunked event cache.
    pub chunk_size: usize,
    /// Max chunks resident per mode before LRU eviction.
    pub max_chunks_per_mode: usize,
    /// Hard cap on a single `get_events_range` request.
    pub max_range_lines: usize,

    /// Lines processed before yielding in low-priority loader mode.
    pub low_priority_batch_size: usize,
    /// Sleep duration after each low-priority batch.
    pub low_priority_batch_delay_ms: u64,
    /// Loader progress is published at least this often (by line count)...
    pub progress_interval_lines: u64,
    /// ...or this often (by wall time), whichever comes first.
    pub progress_interval_ms: u64,

    /// Bounded outbound queue depth per hub subscriber.
    pub hub_subscriber_queue: usize,
    /// Bounded inbound queue depth for the hub's control loop.
    pub hub_inbound_queue: usize,

    /// Watcher debounce coalescing window.
    pub watcher_debounce_ms: u64,
    /// Reload retry backoff schedule (seconds) on partial-write failures.
    pub reload_retry_backoff_secs: [u64; 3],

    /// Clamp bounds for session RTP bias.
    pub rtp_bias_bounds: (f64, f64),
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            data_dir: std::path::PathBuf::from("."),
            session_history_len: 100,
            session_max_age_secs: 30 * 60,
            default_starting_balance: 100_000_00,
            chunk_size: 1000,
            max_chunks_per_mode: 10,
            max_range_lines: 10_000,
            low_priority_batch_size: 1000,
            low_priority_batch_delay_ms: 1,
            progress_interval_lines: 5000,
            progress_interval_ms: 500,
            hub_subscriber_queue: 256,
            hub_inbound_queue: 1024,
            watcher_debounce_ms: 500,
            reload_retry_backoff_secs: [2, 4, 6],
            rtp_bias_bounds: (-2.0, 2.0),
        }
    }
}

impl LibraryConfig {
    pub fn new(data_dir: impl Into<std::path::PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Reads `SLOTLAB_*` overrides on top of [`Default`]. Parse failures fall back silently.
    pub fn from_env(data_dir: impl Into<std::path::PathBuf>) -> Self {
        let mut cfg = Self::new(data_dir);

        if let Ok(v) = std::env::var("SLOTLAB_SESSION_HISTORY_LEN") {
            cfg.session_history_len = v.parse().unwrap_or(cfg.session_history_len);
        }
        if let Ok(v) = std::env::var("SLOTLAB_SESSION_MAX_AGE_SECS") {
            cfg.session_max_age_secs = v.parse().unwrap_or(cfg.session_max_age_secs);
        }
        if let Ok(v) = std::env::var("SLOTLAB_CHUNK_SIZE") {
            cfg.chunk_size = v.parse().unwrap_or(cfg.chunk_size);
        }
        if let Ok(v) = std::env::var("SLOTLAB_MAX_CHUNKS_PER_MODE") {
            cfg.max_chunks_per_mode = v.parse().unwrap_or(cfg.max_chunks_per_mode);
        }
        if let Ok(v) = std::env::var("SLOTLAB_WATCHER_DEBOUNCE_MS") {
            cfg.watcher_debounce_ms = v.parse().unwrap_or(cfg.watcher_debounce_ms);
        }

        cfg
    }
}
