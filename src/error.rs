//! Error types for chatmedia-dl
//!
//! Errors are split by where they surface:
//! - [`Error`] for setup-level failures (configuration, templates, resume state)
//! - [`TransferError`] for the byte transfer of a single Elem
//! - [`FinalizeError`] for the post-transfer pipeline, tagged with the [`FinalizeStage`]
//!   that failed
//! - [`DoneError`] for the terminal outcome handed to progress observers

use std::fmt;
use thiserror::Error;

/// Result type alias for chatmedia-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for chatmedia-dl
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The option key that caused the error (e.g., "threads")
        key: Option<String>,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error (resume state)
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filename template could not be parsed or rendered
    #[error("template error: {0}")]
    Template(String),

    /// Resume state could not be loaded or stored
    #[error("resume state error: {0}")]
    Resume(String),

    /// The run was cancelled before it could start dispatching
    #[error("cancelled")]
    Cancelled,
}

impl Error {
    pub(crate) fn config(key: &str, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.to_string()),
        }
    }
}

/// Failure of the byte transfer for one Elem
#[derive(Debug, Error)]
pub enum TransferError {
    /// The run's cancellation token fired while the transfer was in flight
    #[error("download cancelled")]
    Cancelled,

    /// The remote source reported a failure
    #[error("remote error: {0}")]
    Remote(String),

    /// Writing to the temp file failed
    #[error("write temp file: {0}")]
    Io(#[from] std::io::Error),
}

impl TransferError {
    /// True for user-initiated cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TransferError::Cancelled)
    }
}

/// Step of the finalize pipeline that produced an error
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FinalizeStage {
    /// Closing the temp file handle
    Close,
    /// Upstream transfer failed; the temp file was rolled back
    Transfer,
    /// Sniffing the content type for extension rewriting
    DetectMime,
    /// Renaming the temp file onto the final path
    Rename,
    /// Restoring the source timestamp on the final file
    SetFileTime,
}

impl FinalizeStage {
    /// Short label used when rendering diagnostics
    pub fn as_str(&self) -> &'static str {
        match self {
            FinalizeStage::Close => "close file",
            FinalizeStage::Transfer => "progress",
            FinalizeStage::DetectMime => "post file: detect mime",
            FinalizeStage::Rename => "post file: rename file",
            FinalizeStage::SetFileTime => "post file: set file time",
        }
    }
}

impl fmt::Display for FinalizeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Finalize failure wrapped with the stage that produced it
#[derive(Debug, Error)]
#[error("{stage}: {source}")]
pub struct FinalizeError {
    /// Stage where the pipeline stopped
    pub stage: FinalizeStage,
    /// Underlying I/O failure
    #[source]
    pub source: std::io::Error,
}

impl FinalizeError {
    pub(crate) fn new(stage: FinalizeStage, source: std::io::Error) -> Self {
        Self { stage, source }
    }
}

/// Terminal error for one Elem, as delivered to [`crate::progress::Progress::on_done`]
#[derive(Debug, Error)]
pub enum DoneError {
    /// The transfer failed or was cancelled; the temp file was rolled back
    #[error("progress: {0}")]
    Transfer(TransferError),

    /// Transfer succeeded but finalization failed
    #[error(transparent)]
    Finalize(#[from] FinalizeError),
}

impl DoneError {
    /// True when the Elem ended because of user cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, DoneError::Transfer(e) if e.is_cancelled())
    }

    /// Stage of the pipeline that produced this error
    pub fn stage(&self) -> FinalizeStage {
        match self {
            DoneError::Transfer(_) => FinalizeStage::Transfer,
            DoneError::Finalize(e) => e.stage,
        }
    }
}
