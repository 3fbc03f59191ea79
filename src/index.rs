//! On-disk `index.json` contract (§6): the manifest of modes, their weight
//! CSVs, and optional event books.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeEntry {
    pub name: String,
    #[serde(default = "default_cost")]
    pub cost: f64,
    pub weights: String,
    #[serde(default)]
    pub events: Option<String>,
}

fn default_cost() -> f64 {
    1.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexFile {
    pub modes: Vec<ModeEntry>,
}

impl IndexFile {
    pub fn load(data_dir: impl AsRef<Path>) -> crate::error::Result<Self> {
        let path = data_dir.as_ref().join("index.json");
        let text = std::fs::read_to_string(&path)
            .map_err(|e| crate::error::LutError::io(format!("{}: {e}", path.display())))?;
        let index: IndexFile = serde_json::from_str(&text)?;
        Ok(index)
    }

    pub fn weights_path(&self, data_dir: impl AsRef<Path>, mode: &ModeEntry) -> PathBuf {
        data_dir.as_ref().join(&mode.weights)
    }

    pub fn events_path(&self, data_dir: impl AsRef<Path>, mode: &ModeEntry) -> Option<PathBuf> {
        mode.events.as_ref().map(|e| data_dir.as_ref().join(e))
    }

    pub fn find(&self, mode_name: &str) -> Option<&ModeEntry> {
        self.modes
            .iter()
            .find(|m| m.name.eq_ignore_ascii_case(mode_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_index() {
        let json = r#"{"modes":[{"name":"base","cost":1.0,"weights":"base.csv","events":"base.jsonl.zst"}]}"#;
        let idx: IndexFile = serde_json::from_str(json).unwrap();
        assert_eq!(idx.modes.len(), 1);
        assert_eq!(idx.modes[0].name, "base");
        assert_eq!(idx.modes[0].events.as_deref(), Some("base.jsonl.zst"));
    }

    #[test]
    fn cost_defaults_to_one() {
        let json = r#"{"modes":[{"name":"bonus","weights":"bonus.csv"}]}"#;
        let idx: IndexFile = serde_json::from_str(json).unwrap();
        assert_eq!(idx.modes[0].cost, 1.0);
        assert!(idx.modes[0].events.is_none());
    }
}
