//! Event book decompression: one simulation mode's per-spin detail records,
//! stored as a newline-delimited, zstd-compressed JSON file (§4.3, §6).

use crate::error::{LutError, Result};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Opens `path` and returns a buffered line reader over the decompressed
/// JSON lines. Shared by the chunked cache, the events store, and the
/// background loader so every reader goes through the same entry point.
pub fn open_stream(path: impl AsRef<Path>) -> Result<BufReader<zstd::Decoder<'static, BufReader<File>>>> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| LutError::io(format!("{}: {e}", path.display())))?;
    let decoder = zstd::Decoder::new(file).map_err(|e| LutError::io(format!("{}: {e}", path.display())))?;
    Ok(BufReader::new(decoder))
}

/// Parses one decompressed line into its JSON payload.
pub fn parse_line(line: &str) -> Result<serde_json::Value> {
    serde_json::from_str(line.trim())
        .map_err(|e| LutError::validation(format!("bad event line: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_book(dir: &Path, name: &str, lines: &[&str]) -> std::path::PathBuf {
        let raw = lines.join("\n") + "\n";
        let compressed = zstd::encode_all(raw.as_bytes(), 0).unwrap();
        let path = dir.join(name);
        let mut f = File::create(&path).unwrap();
        f.write_all(&compressed).unwrap();
        path
    }

    #[test]
    fn round_trips_compressed_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_book(dir.path(), "base.jsonl.zst", &[r#"{"a":1}"#, r#"{"a":2}"#]);
        let reader = open_stream(&path).unwrap();
        use std::io::BufRead;
        let lines: Vec<String> = reader.lines().map(|l| l.unwrap()).collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(parse_line(&lines[0]).unwrap()["a"], 1);
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(parse_line("not json").is_err());
    }
}
