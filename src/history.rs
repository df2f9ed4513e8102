use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::ssh::sanitize_id;

const MAX_SNAPSHOTS: usize = 200;
const INDEX_FILE: &str = "metadata.json";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMeta {
    pub id: String,
    pub created_at: String,
    pub source: String,
    pub size: usize,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub rollback_of: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct SnapshotIndex {
    pub items: Vec<SnapshotMeta>,
}

/// Local copies of the remote gateway config, one file per snapshot.
pub struct HistoryStore {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl HistoryStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            lock: Mutex::new(()),
        }
    }

    fn index_path(&self) -> PathBuf {
        self.dir.join(INDEX_FILE)
    }

    /// Snapshots, newest first.
    pub fn list(&self) -> Result<Vec<SnapshotMeta>, String> {
        let _guard = self.lock.lock().map_err(|e| e.to_string())?;
        Ok(read_index(&self.index_path())?.items)
    }

    /// Store `content` and record it in the index.
    pub fn add(
        &self,
        source: &str,
        content: &str,
        rollback_of: Option<String>,
    ) -> Result<SnapshotMeta, String> {
        let _guard = self.lock.lock().map_err(|e| e.to_string())?;
        fs::create_dir_all(&self.dir).map_err(|e| e.to_string())?;

        let now = Utc::now();
        let source = match sanitize_id(source) {
            s if s.is_empty() => "manual".to_string(),
            s => s,
        };
        let id = format!("{}-{source}", now.format("%Y-%m-%dT%H-%M-%S-%3f"));
        fs::write(self.dir.join(format!("{id}.json")), content).map_err(|e| e.to_string())?;

        let meta = SnapshotMeta {
            id,
            created_at: now.to_rfc3339(),
            source,
            size: content.len(),
            rollback_of,
        };

        let mut index = read_index(&self.index_path()).unwrap_or_default();
        index.items.push(meta.clone());
        index.items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let keep = MAX_SNAPSHOTS.min(index.items.len());
        for dropped in index.items.drain(keep..) {
            let _ = fs::remove_file(self.dir.join(format!("{}.json", dropped.id)));
        }
        write_index(&self.index_path(), &index)?;

        Ok(meta)
    }

    /// Content of the snapshot `id`; the resolved file must stay inside the
    /// history directory.
    pub fn read(&self, id: &str) -> Result<Option<(SnapshotMeta, String)>, String> {
        let _guard = self.lock.lock().map_err(|e| e.to_string())?;
        let index = read_index(&self.index_path())?;
        let Some(meta) = index.items.into_iter().find(|m| m.id == id) else {
            return Ok(None);
        };

        let base = fs::canonicalize(&self.dir).map_err(|e| e.to_string())?;
        let canonical = fs::canonicalize(self.dir.join(format!("{}.json", meta.id)))
            .map_err(|e| e.to_string())?;
        if !canonical.starts_with(&base) {
            return Err("Path outside allowed directory".into());
        }
        let content = fs::read_to_string(&canonical).map_err(|e| e.to_string())?;
        Ok(Some((meta, content)))
    }
}

fn read_index(path: &Path) -> Result<SnapshotIndex, String> {
    if !path.exists() {
        return Ok(SnapshotIndex::default());
    }
    let text = fs::read_to_string(path).map_err(|e| e.to_string())?;
    if text.trim().is_empty() {
        return Ok(SnapshotIndex::default());
    }
    serde_json::from_str(&text).map_err(|e| e.to_string())
}

fn write_index(path: &Path, index: &SnapshotIndex) -> Result<(), String> {
    let parent = path.parent().ok_or_else(|| "invalid metadata path".to_string())?;
    fs::create_dir_all(parent).map_err(|e| e.to_string())?;
    let text = serde_json::to_string_pretty(index).map_err(|e| e.to_string())?;
    // Atomic write: write to .tmp file, sync, then rename
    let tmp = path.with_extension("tmp");
    {
        let mut file = File::create(&tmp).map_err(|e| e.to_string())?;
        file.write_all(text.as_bytes()).map_err(|e| e.to_string())?;
        file.sync_all().map_err(|e| e.to_string())?;
    }
    fs::rename(&tmp, path).map_err(|e| e.to_string())
}
