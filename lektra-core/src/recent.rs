//! Recently opened files, persisted as a small JSON document.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, instrument};

const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecentFileEntry {
    pub file_path: PathBuf,
    pub page_number: usize,
    pub last_accessed: DateTime<Utc>,
}

#[derive(Serialize)]
struct StoreFile<'a> {
    version: u32,
    entries: &'a [RecentFileEntry],
}

/// Entries are kept most recent first.
#[derive(Debug, Clone, Default)]
pub struct RecentFilesStore {
    path: PathBuf,
    entries: Vec<RecentFileEntry>,
}

impl RecentFilesStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: Vec::new(),
        }
    }

    /// Reads the store at `path`. A missing file is an empty store.
    #[instrument]
    pub fn load(path: &Path) -> Result<Self> {
        let mut store = Self::new(path);
        if !path.exists() {
            return Ok(store);
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read recent files at {:?}", path))?;
        let doc: Value = serde_json::from_str(&raw)
            .with_context(|| format!("failed to decode recent files at {:?}", path))?;
        let list = match &doc {
            Value::Object(root) => root.get("entries").and_then(Value::as_array),
            Value::Array(list) => Some(list),
            _ => None,
        };
        store.entries = list
            .into_iter()
            .flatten()
            .filter_map(parse_entry)
            .collect();
        store.sort();
        debug!(entries = store.entries.len(), "loaded recent files");
        Ok(store)
    }

    /// Writes through a temporary file so a crash never leaves a torn
    /// store behind.
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {:?}", parent))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let payload = serde_json::to_string(&StoreFile {
            version: FORMAT_VERSION,
            entries: &self.entries,
        })?;
        let mut file =
            File::create(&tmp).with_context(|| format!("failed to open temp file {:?}", tmp))?;
        file.write_all(payload.as_bytes())?;
        file.flush()?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("failed to replace {:?}", self.path))?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entries(&self) -> &[RecentFileEntry] {
        &self.entries
    }

    pub fn files(&self) -> impl Iterator<Item = &Path> {
        self.entries.iter().map(|e| e.file_path.as_path())
    }

    /// Last page read in `path`, if it was opened before.
    pub fn page_number(&self, path: &Path) -> Option<usize> {
        let wanted = normalize(path);
        self.entries
            .iter()
            .find(|e| e.file_path == wanted || e.file_path == path)
            .map(|e| e.page_number)
    }

    /// Records a visit, updating the entry for the same file if present.
    pub fn upsert(&mut self, path: &Path, page: usize, at: DateTime<Utc>) {
        let normalized = normalize(path);
        let existing = self
            .entries
            .iter_mut()
            .find(|e| e.file_path == path || normalize(&e.file_path) == normalized);
        match existing {
            Some(entry) => {
                entry.file_path = normalized;
                entry.page_number = page;
                entry.last_accessed = at;
            }
            None => self.entries.push(RecentFileEntry {
                file_path: normalized,
                page_number: page,
                last_accessed: at,
            }),
        }
        self.sort();
    }

    pub fn trim(&mut self, max_entries: usize) {
        self.entries.truncate(max_entries);
    }

    fn sort(&mut self) {
        self.entries
            .sort_by(|a, b| b.last_accessed.cmp(&a.last_accessed));
    }
}

/// Canonical path when the file exists, otherwise the absolute path.
fn normalize(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()
                .map(|cwd| cwd.join(path))
                .unwrap_or_else(|_| path.to_path_buf())
        }
    })
}

fn parse_entry(value: &Value) -> Option<RecentFileEntry> {
    let obj = value.as_object()?;
    let file_path = obj.get("file_path")?.as_str().filter(|p| !p.is_empty())?;
    let page_number = obj
        .get("page_number")
        .and_then(Value::as_u64)
        .unwrap_or(0) as usize;
    Some(RecentFileEntry {
        file_path: PathBuf::from(file_path),
        page_number,
        last_accessed: obj
            .get("last_accessed")
            .and_then(parse_timestamp)
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
    })
}

/// RFC 3339 strings, or milliseconds since the epoch.
fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|t| t.with_timezone(&Utc)),
        Value::Number(n) => Utc.timestamp_millis_opt(n.as_f64()? as i64).single(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::Duration;
    use tempfile::tempdir;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH + Duration::seconds(secs)
    }

    #[test]
    fn upsert_moves_the_file_to_the_front() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.pdf");
        let b = dir.path().join("b.pdf");
        fs::write(&a, b"a").unwrap();
        fs::write(&b, b"b").unwrap();

        let mut store = RecentFilesStore::new(dir.path().join("recent.json"));
        store.upsert(&a, 3, at(10));
        store.upsert(&b, 1, at(20));
        store.upsert(&a, 7, at(30));

        assert_eq!(store.entries().len(), 2);
        assert_eq!(store.entries()[0].page_number, 7);
        assert_eq!(store.page_number(&a), Some(7));
        assert_eq!(store.page_number(&b), Some(1));
        assert_eq!(store.page_number(&dir.path().join("c.pdf")), None);

        store.trim(1);
        assert_eq!(store.files().count(), 1);
    }

    #[test]
    fn save_and_load_keep_order_and_pages() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state/recent.json");
        let mut store = RecentFilesStore::new(&path);
        store.upsert(Path::new("/nonexistent/old.pdf"), 2, at(5));
        store.upsert(Path::new("/nonexistent/new.pdf"), 9, at(50));
        store.save().unwrap();
        assert!(!path.with_extension("json.tmp").exists());

        let raw: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["version"], 1);

        let loaded = RecentFilesStore::load(&path).unwrap();
        assert_eq!(loaded.entries(), store.entries());
        assert_eq!(
            loaded.entries()[0].file_path,
            PathBuf::from("/nonexistent/new.pdf")
        );
    }

    #[test]
    fn lenient_load_skips_bad_entries() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("recent.json");
        fs::write(
            &path,
            r#"[
                {"file_path": "/x/one.pdf", "page_number": 4},
                {"page_number": 1},
                "garbage",
                {"file_path": "/x/two.pdf", "last_accessed": 2000}
            ]"#,
        )
        .unwrap();

        let store = RecentFilesStore::load(&path).unwrap();
        assert_eq!(store.entries().len(), 2);
        assert_eq!(store.entries()[0].file_path, PathBuf::from("/x/two.pdf"));
        assert_eq!(store.entries()[0].last_accessed, at(2));
        assert_eq!(store.entries()[1].last_accessed, DateTime::<Utc>::UNIX_EPOCH);
        assert_eq!(store.entries()[1].page_number, 4);
    }

    #[test]
    fn missing_file_is_an_empty_store() {
        let dir = tempdir().unwrap();
        let store = RecentFilesStore::load(&dir.path().join("none.json")).unwrap();
        assert!(store.entries().is_empty());
    }
}
