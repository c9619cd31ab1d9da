//! Core types for chatmedia-dl

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::TEMP_SUFFIX;

/// Unique identifier for an Elem within one run
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElemId(pub u64);

impl ElemId {
    /// Get the inner value
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ElemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Chat (dialog, channel, group) a message belongs to
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    /// Numeric peer id
    pub id: i64,
    /// Visible name (title or username)
    pub name: String,
}

/// Remote media object attached to a message
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFile {
    /// Opaque reference understood by the [`crate::source::MediaSource`]
    pub location: String,
    /// File name declared by the remote (may be empty or carry a wrong extension)
    #[serde(default)]
    pub name: String,
    /// Declared size in bytes
    pub size: u64,
    /// Declared MIME type, if any
    #[serde(default)]
    pub mime_type: Option<String>,
    /// Original timestamp of the object, restored onto the final file
    #[serde(default)]
    pub date: Option<DateTime<Utc>>,
}

/// One entry of the input task list: a media file inside a message
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Owning chat
    pub peer: Peer,
    /// Message id within the chat
    pub message_id: i64,
    /// Media attached to the message
    pub file: RemoteFile,
}

/// Transient progress snapshot for one Elem
///
/// `total` is the remote-declared size at the time of the event and may be revised
/// mid-transfer; consumers must not treat it as a constant.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressState {
    /// Bytes written so far
    pub downloaded: u64,
    /// Current size estimate in bytes
    pub total: u64,
}

/// One schedulable download unit
///
/// An Elem describes where bytes come from and where they go. The open temp file
/// handle is not part of it: the worker owns the handle and moves it into the
/// finalizer, so exactly one component holds it at any time.
#[derive(Debug, Clone)]
pub struct Elem {
    pub(crate) id: ElemId,
    pub(crate) peer: Peer,
    pub(crate) message_id: i64,
    pub(crate) file: RemoteFile,
    pub(crate) temp_path: PathBuf,
    pub(crate) logical_pos: usize,
}

impl Elem {
    pub(crate) fn new(
        id: ElemId,
        spec: TaskSpec,
        final_path: &Path,
        logical_pos: usize,
    ) -> Self {
        let mut temp = final_path.as_os_str().to_owned();
        temp.push(TEMP_SUFFIX);
        Self {
            id,
            peer: spec.peer,
            message_id: spec.message_id,
            file: spec.file,
            temp_path: PathBuf::from(temp),
            logical_pos,
        }
    }

    /// Identifier, stable for the lifetime of the run
    pub fn id(&self) -> ElemId {
        self.id
    }

    /// Remote object being downloaded
    pub fn file(&self) -> &RemoteFile {
        &self.file
    }

    /// Owning chat
    pub fn peer(&self) -> &Peer {
        &self.peer
    }

    /// Visible name of the owning chat
    pub fn peer_name(&self) -> &str {
        &self.peer.name
    }

    /// Numeric id of the owning chat
    pub fn peer_id(&self) -> i64 {
        self.peer.id
    }

    /// Remote message id
    pub fn message_id(&self) -> i64 {
        self.message_id
    }

    /// Declared size of the remote object
    pub fn size(&self) -> u64 {
        self.file.size
    }

    /// Destination path, temp suffix included
    pub fn path(&self) -> &Path {
        &self.temp_path
    }

    /// Destination path with the temp suffix stripped
    pub fn final_path(&self) -> PathBuf {
        strip_temp_suffix(&self.temp_path)
    }

    /// Position within the task sequence, used as the resume watermark
    pub fn logical_position(&self) -> usize {
        self.logical_pos
    }

    /// Human-readable label: `name(peer id):msg id -> final path`
    pub fn label(&self) -> String {
        format!(
            "{}({}):{} -> {}",
            self.peer.name,
            self.peer.id,
            self.message_id,
            self.final_path().display()
        )
    }
}

/// Remove [`TEMP_SUFFIX`] from the file name of `path`, if present
pub(crate) fn strip_temp_suffix(path: &Path) -> PathBuf {
    match path.to_str().and_then(|s| s.strip_suffix(TEMP_SUFFIX)) {
        Some(stripped) => PathBuf::from(stripped),
        None => path.to_path_buf(),
    }
}
