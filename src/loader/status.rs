//! [`LoadStatus`]: per-mode ingestion progress, published to the hub and
//! queryable directly (§4.4).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadPhase {
    Pending,
    Loading,
    Complete,
    Error,
}

/// Load or reload priority for one mode. Low-priority ingestion throttles
/// itself between batches so it never starves interactive requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadStatus {
    pub mode: String,
    pub phase: LoadPhase,
    pub current_line: u64,
    pub bytes_read: u64,
    pub total_bytes: Option<u64>,
    pub percent_bytes: Option<f64>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl LoadStatus {
    pub fn pending(mode: impl Into<String>) -> Self {
        Self {
            mode: mode.into(),
            phase: LoadPhase::Pending,
            current_line: 0,
            bytes_read: 0,
            total_bytes: None,
            percent_bytes: None,
            started_at: None,
            completed_at: None,
            error_message: None,
        }
    }

    pub fn mark_loading(&mut self, total_bytes: Option<u64>) {
        self.phase = LoadPhase::Loading;
        self.current_line = 0;
        self.bytes_read = 0;
        self.total_bytes = total_bytes;
        self.percent_bytes = total_bytes.map(|_| 0.0);
        self.started_at = Some(Utc::now());
        self.completed_at = None;
        self.error_message = None;
    }

    pub fn advance(&mut self, line: u64, bytes_read: u64) {
        self.current_line = line;
        self.bytes_read = bytes_read;
        self.percent_bytes = self
            .total_bytes
            .filter(|&t| t > 0)
            .map(|t| (bytes_read as f64 / t as f64 * 100.0).min(100.0));
    }

    pub fn mark_complete(&mut self) {
        self.phase = LoadPhase::Complete;
        self.completed_at = Some(Utc::now());
        self.percent_bytes = self.total_bytes.map(|_| 100.0);
    }

    pub fn mark_error(&mut self, message: impl Into<String>) {
        self.phase = LoadPhase::Error;
        self.completed_at = Some(Utc::now());
        self.error_message = Some(message.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_transitions() {
        let mut s = LoadStatus::pending("base");
        assert_eq!(s.phase, LoadPhase::Pending);
        s.mark_loading(Some(1000));
        assert_eq!(s.phase, LoadPhase::Loading);
        s.advance(10, 500);
        assert_eq!(s.percent_bytes, Some(50.0));
        s.mark_complete();
        assert_eq!(s.phase, LoadPhase::Complete);
        assert_eq!(s.percent_bytes, Some(100.0));
    }

    #[test]
    fn error_sets_message_and_completed_at() {
        let mut s = LoadStatus::pending("base");
        s.mark_loading(None);
        s.mark_error("boom");
        assert_eq!(s.phase, LoadPhase::Error);
        assert_eq!(s.error_message.as_deref(), Some("boom"));
        assert!(s.completed_at.is_some());
    }
}
