//! Resume state: finished logical positions keyed by a task-list fingerprint.
//!
//! A run over the same task list (same order and filters) produces the same
//! fingerprint, so a later run with `continue` enabled can skip what already finished.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use crate::config::Options;
use crate::error::{Error, Result};
use crate::types::TaskSpec;

/// File name of the JSON resume store inside the download directory
pub const RESUME_FILE_NAME: &str = ".chatmedia-dl-resume.json";

/// Persistence for finished positions
#[async_trait]
pub trait ResumeStore: Send + Sync {
    /// Finished positions recorded for `fingerprint`, if any
    async fn load(&self, fingerprint: &str) -> Result<Option<BTreeSet<usize>>>;
    /// Replace the finished positions for `fingerprint`
    async fn save(&self, fingerprint: &str, finished: &BTreeSet<usize>) -> Result<()>;
    /// Forget `fingerprint`
    async fn delete(&self, fingerprint: &str) -> Result<()>;
}

/// Fingerprint of a task list and the options that shape the yielded sequence
pub fn fingerprint(tasks: &[TaskSpec], opts: &Options) -> String {
    let mut hasher = Sha256::new();
    for task in tasks {
        hasher.update(task.peer.id.to_le_bytes());
        hasher.update(task.message_id.to_le_bytes());
    }
    hasher.update([u8::from(opts.desc)]);
    for ext in &opts.include {
        hasher.update(b"+");
        hasher.update(ext.to_ascii_lowercase().as_bytes());
    }
    for ext in &opts.exclude {
        hasher.update(b"-");
        hasher.update(ext.to_ascii_lowercase().as_bytes());
    }
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// In-process store, useful for embedding and tests
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, BTreeSet<usize>>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResumeStore for MemoryStore {
    async fn load(&self, fingerprint: &str) -> Result<Option<BTreeSet<usize>>> {
        Ok(self.entries.lock().await.get(fingerprint).cloned())
    }

    async fn save(&self, fingerprint: &str, finished: &BTreeSet<usize>) -> Result<()> {
        self.entries
            .lock()
            .await
            .insert(fingerprint.to_string(), finished.clone());
        Ok(())
    }

    async fn delete(&self, fingerprint: &str) -> Result<()> {
        self.entries.lock().await.remove(fingerprint);
        Ok(())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ResumeFile {
    #[serde(default)]
    entries: HashMap<String, BTreeSet<usize>>,
}

/// JSON file store, one file shared by all fingerprints
///
/// Writes go to a sibling temp file first and are renamed into place.
pub struct JsonFileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileStore {
    /// Store backed by `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Store at [`RESUME_FILE_NAME`] inside `dir`
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(RESUME_FILE_NAME))
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read(&self) -> Result<ResumeFile> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(ResumeFile::default()),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                Error::Resume(format!("corrupt resume file {}: {e}", self.path.display()))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ResumeFile::default()),
            Err(e) => Err(Error::Io(e)),
        }
    }

    async fn write(&self, file: &ResumeFile) -> Result<()> {
        if file.entries.is_empty() {
            return match tokio::fs::remove_file(&self.path).await {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(Error::Io(e)),
                _ => Ok(()),
            };
        }
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = serde_json::to_vec_pretty(file)?;
        let mut staging = self.path.as_os_str().to_owned();
        staging.push(".new");
        let staging = PathBuf::from(staging);
        tokio::fs::write(&staging, bytes).await?;
        tokio::fs::rename(&staging, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl ResumeStore for JsonFileStore {
    async fn load(&self, fingerprint: &str) -> Result<Option<BTreeSet<usize>>> {
        let _guard = self.lock.lock().await;
        Ok(self.read().await?.entries.remove(fingerprint))
    }

    async fn save(&self, fingerprint: &str, finished: &BTreeSet<usize>) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut file = self.read().await?;
        file.entries.insert(fingerprint.to_string(), finished.clone());
        self.write(&file).await
    }

    async fn delete(&self, fingerprint: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut file = self.read().await?;
        if file.entries.remove(fingerprint).is_some() {
            self.write(&file).await?;
        }
        Ok(())
    }
}
