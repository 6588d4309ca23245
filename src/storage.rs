//! Storage primitives shared by every component.
//!
//! Two building blocks, both rooted under the workspace:
//! - [`DocumentStore`]: load -> mutate -> save of a whole JSON document,
//!   serialized per path so concurrent mutations never interleave.
//! - append log helpers: one JSON record per line, tolerant reads.
//!
//! A missing or unparsable document loads as the caller's empty value; a load
//! never fails. Writes go through a temp file and an atomic rename.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::error::{HiveError, Result};

/// JSON document store with per-path mutual exclusion.
///
/// Each component owns one instance and the files beneath it; documents are
/// never shared across components.
#[derive(Default)]
pub struct DocumentStore {
    locks: parking_lot::Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, path: &Path) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock();
        Arc::clone(
            locks
                .entry(path.to_path_buf())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        )
    }

    /// Load the document, falling back to `T::default()` when the file is
    /// missing or does not parse.
    pub async fn load<T>(&self, path: &Path) -> T
    where
        T: DeserializeOwned + Default,
    {
        let lock = self.lock_for(path);
        let _guard = lock.lock().await;
        load_or_default(path).await
    }

    /// Read-modify-write under the per-path lock. The mutator's return value
    /// is handed back to the caller after the document has been persisted.
    pub async fn update<T, F, R>(&self, path: &Path, mutate: F) -> Result<R>
    where
        T: DeserializeOwned + Serialize + Default,
        F: FnOnce(&mut T) -> R,
    {
        let lock = self.lock_for(path);
        let _guard = lock.lock().await;

        let mut doc: T = load_or_default(path).await;
        let out = mutate(&mut doc);
        save_atomic(path, &doc).await?;
        Ok(out)
    }

    /// Remove leftover temp files from interrupted writes. Call once per
    /// directory at startup.
    pub async fn recover_interrupted(&self, dir: &Path) {
        let Ok(mut entries) = fs::read_dir(dir).await else {
            return;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "tmp") {
                debug!(path = %path.display(), "Removing interrupted write");
                let _ = fs::remove_file(&path).await;
            }
        }
    }
}

async fn load_or_default<T>(path: &Path) -> T
where
    T: DeserializeOwned + Default,
{
    match fs::read_to_string(path).await {
        Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "Unparsable document, using empty value");
            T::default()
        }),
        Err(_) => T::default(),
    }
}

/// Write the document to `<path>.tmp` and rename it into place. Rename is
/// atomic on POSIX, so readers observe either the old or the new document.
async fn save_atomic<T: Serialize>(path: &Path, doc: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let content = serde_json::to_string_pretty(doc)?;
    let tmp_path = tmp_path_for(path);
    fs::write(&tmp_path, &content)
        .await
        .map_err(|e| HiveError::Storage(format!("write {}: {}", tmp_path.display(), e)))?;

    let sync_target = tmp_path.clone();
    let synced = tokio::task::spawn_blocking(move || {
        std::fs::File::open(&sync_target).and_then(|file| file.sync_all())
    })
    .await;
    match synced {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "Failed to sync temp file to disk"),
        Err(e) => warn!(error = %e, "Failed to sync temp file to disk"),
    }

    fs::rename(&tmp_path, path)
        .await
        .map_err(|e| HiveError::Storage(format!("rename {}: {}", path.display(), e)))?;
    Ok(())
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Persist a standalone document (atomic, pretty-printed). For callers that
/// own the whole write path and do not need the per-path lock registry.
pub async fn write_document<T: Serialize>(path: &Path, doc: &T) -> Result<()> {
    save_atomic(path, doc).await
}

/// Load a standalone document. Missing or unparsable files yield `None`.
pub async fn read_document<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let content = fs::read_to_string(path).await.ok()?;
    serde_json::from_str(&content).ok()
}

/// Append one JSON record plus a newline, creating parent directories.
pub async fn append_record<T: Serialize>(path: &Path, record: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let mut line = serde_json::to_string(record)?;
    line.push('\n');

    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|e| HiveError::Storage(format!("open {}: {}", path.display(), e)))?;
    file.write_all(line.as_bytes())
        .await
        .map_err(|e| HiveError::Storage(format!("append {}: {}", path.display(), e)))?;
    Ok(())
}

/// Read every parsable record from a line-delimited log. Empty and malformed
/// lines are skipped so newer writers can extend the format.
pub async fn read_records(path: &Path) -> Vec<Value> {
    let Ok(content) = fs::read_to_string(path).await else {
        return Vec::new();
    };

    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect()
}

/// Restrict a user-supplied name to `[A-Za-z0-9_-]` before it becomes part of
/// a filename.
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
