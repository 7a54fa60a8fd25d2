//! Small helpers for the JSON and line-oriented state files under the data
//! directory.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use tracing::warn;

/// Read a JSON file. A missing file is `Ok(None)`; an unreadable or
/// unparsable one is an error, so callers about to rewrite the file can
/// leave it alone.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let raw = match fs::read(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("Failed to read {}", path.display())),
    };
    // Files edited by hand on Windows may carry a UTF-8 BOM.
    let body = raw.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(raw.as_slice());
    let value = serde_json::from_slice(body)
        .with_context(|| format!("Corrupt JSON in {}", path.display()))?;
    Ok(Some(value))
}

/// Lenient [`load_json`]: missing, unreadable and corrupt files all read as
/// `None`, the last two with a warning.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Option<T> {
    match load_json(path) {
        Ok(value) => value,
        Err(e) => {
            warn!("Ignoring {}: {:#}", path.display(), e);
            None
        }
    }
}

/// Pretty-print `value` to a sibling temp file and rename it over `path`, so
/// concurrent readers see either the old or the new document, never half.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = Path::new(&tmp);

    let body = serde_json::to_vec_pretty(value)?;
    fs::write(tmp, body).with_context(|| format!("Failed to write {}", tmp.display()))?;
    fs::rename(tmp, path).with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}

/// Append lines to a text file, creating it (and its directory) if needed.
pub fn append_lines(path: &Path, lines: &[String]) -> Result<()> {
    if lines.is_empty() {
        return Ok(());
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    for line in lines {
        writeln!(file, "{}", line)?;
    }
    Ok(())
}

/// Read all lines of a text file, lossily decoding invalid UTF-8.
/// A missing file reads as empty.
pub fn read_lines(path: &Path) -> Result<Vec<String>> {
    match fs::read(path) {
        Ok(raw) => Ok(String::from_utf8_lossy(&raw)
            .lines()
            .map(str::to_string)
            .collect()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
    }
}

/// The last `n` lines of a text file.
pub fn tail_lines(path: &Path, n: usize) -> Result<Vec<String>> {
    let mut lines = read_lines(path)?;
    let skip = lines.len().saturating_sub(n);
    Ok(lines.split_off(skip))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn json_round_trip_and_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");
        assert!(read_json::<HashMap<String, u32>>(&path).is_none());

        let mut value = HashMap::new();
        value.insert("runs".to_string(), 3u32);
        write_json_atomic(&path, &value).unwrap();
        let back: HashMap<String, u32> = read_json(&path).unwrap();
        assert_eq!(back["runs"], 3);
        assert!(!dir.path().join("nested").join("state.json.tmp").exists());
    }

    #[test]
    fn corrupt_json_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, "{not json").unwrap();
        assert!(read_json::<serde_json::Value>(&path).is_none());
    }

    #[test]
    fn load_json_separates_missing_from_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        assert!(load_json::<serde_json::Value>(&path).unwrap().is_none());
        fs::write(&path, "{\"runs\": [1, 2").unwrap();
        assert!(load_json::<serde_json::Value>(&path).is_err());
    }

    #[test]
    fn bom_prefixed_json_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bom.json");
        fs::write(&path, b"\xEF\xBB\xBF{\"a\":1}").unwrap();
        let v: serde_json::Value = read_json(&path).unwrap();
        assert_eq!(v["a"], 1);
    }

    #[test]
    fn append_and_tail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.log");
        append_lines(&path, &["one".into(), "two".into()]).unwrap();
        append_lines(&path, &["three".into()]).unwrap();
        assert_eq!(read_lines(&path).unwrap().len(), 3);
        assert_eq!(tail_lines(&path, 2).unwrap(), vec!["two", "three"]);
        assert_eq!(tail_lines(&path, 10).unwrap().len(), 3);
        assert!(tail_lines(&dir.path().join("missing.log"), 5).unwrap().is_empty());
    }
}
