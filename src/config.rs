//! Configuration types for chatmedia-dl

use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

use crate::error::{Error, Result};
use crate::progress::Observers;

/// Options for one download run
///
/// Constructed once per invocation and read-only afterwards (the engine wraps it in
/// an `Arc`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Options {
    /// Destination directory (default: "./downloads")
    #[serde(default = "default_dir")]
    pub dir: PathBuf,

    /// Filename template (default: "{dialog_id}_{message_id}_{file_name}")
    ///
    /// See [`crate::template`] for the available placeholders.
    #[serde(default = "default_template")]
    pub template: String,

    /// Number of concurrent workers (default: 4)
    #[serde(default = "default_threads")]
    pub threads: usize,

    /// Delay inserted between dispatches to respect remote rate limits (default: none)
    #[serde(default, with = "duration_serde::millis")]
    pub delay: Duration,

    /// Size of each requested chunk in bytes (default: 512 KiB, multiple of 4096)
    #[serde(default = "default_part_size")]
    pub part_size: usize,

    /// Skip files whose final path already exists
    #[serde(default)]
    pub skip_same: bool,

    /// Rewrite the file extension from the sniffed content type
    #[serde(default)]
    pub rewrite_ext: bool,

    /// Skip positions finished by a previous run over the same task list
    #[serde(default, rename = "continue")]
    pub continue_run: bool,

    /// Discard resume state of a previous run and start from zero
    #[serde(default)]
    pub restart: bool,

    /// Download in reverse task order
    #[serde(default)]
    pub desc: bool,

    /// Only download files with these extensions (empty = all)
    #[serde(default)]
    pub include: Vec<String>,

    /// Never download files with these extensions
    #[serde(default)]
    pub exclude: Vec<String>,

    /// Suppress the built-in progress bars and diagnostic lines
    #[serde(default)]
    pub silent: bool,

    /// Rename retry policy for transient file-lock errors
    #[serde(default)]
    pub rename_retry: RenameRetryConfig,

    /// External progress observers, invoked in order before the built-in one
    #[serde(skip)]
    pub external_progress: Observers,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            dir: default_dir(),
            template: default_template(),
            threads: default_threads(),
            delay: Duration::ZERO,
            part_size: default_part_size(),
            skip_same: false,
            rewrite_ext: false,
            continue_run: false,
            restart: false,
            desc: false,
            include: Vec::new(),
            exclude: Vec::new(),
            silent: false,
            rename_retry: RenameRetryConfig::default(),
            external_progress: Observers::default(),
        }
    }
}

impl Options {
    /// Check option combinations that cannot work at runtime
    pub fn validate(&self) -> Result<()> {
        if self.threads == 0 {
            return Err(Error::config("threads", "must be at least 1"));
        }
        if self.part_size == 0 || self.part_size % PART_SIZE_ALIGN != 0 {
            return Err(Error::config(
                "part_size",
                format!("must be a non-zero multiple of {PART_SIZE_ALIGN}"),
            ));
        }
        if self.template.trim().is_empty() {
            return Err(Error::config("template", "must not be empty"));
        }
        if self.continue_run && self.restart {
            return Err(Error::config(
                "continue",
                "'continue' and 'restart' are mutually exclusive",
            ));
        }
        if self.rename_retry.attempts == 0 {
            return Err(Error::config("rename_retry.attempts", "must be at least 1"));
        }
        Ok(())
    }
}

/// Bounded retry for renames that fail on transient file locks
///
/// Only errors classified by [`crate::retry::is_transient_lock_error`] are retried.
/// The default window is 2000 × 100 ms (~200 s) which covers antivirus and indexer
/// scans of large media files.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RenameRetryConfig {
    /// Maximum rename attempts, the first one included (default: 2000)
    #[serde(default = "default_rename_attempts")]
    pub attempts: u32,

    /// Fixed delay between attempts (default: 100 ms)
    #[serde(default = "default_rename_delay", with = "duration_serde::millis")]
    pub delay: Duration,
}

impl Default for RenameRetryConfig {
    fn default() -> Self {
        Self {
            attempts: default_rename_attempts(),
            delay: default_rename_delay(),
        }
    }
}

/// Alignment required of [`Options::part_size`]
pub const PART_SIZE_ALIGN: usize = 4096;

fn default_dir() -> PathBuf {
    PathBuf::from("./downloads")
}

fn default_template() -> String {
    "{dialog_id}_{message_id}_{file_name}".to_string()
}

fn default_threads() -> usize {
    4
}

fn default_part_size() -> usize {
    512 * 1024
}

fn default_rename_attempts() -> u32 {
    2000
}

fn default_rename_delay() -> Duration {
    Duration::from_millis(100)
}

/// Serde helpers for [`Duration`] fields
pub(crate) mod duration_serde {
    /// Durations as whole milliseconds
    pub(crate) mod millis {
        use serde::{Deserialize, Deserializer, Serializer};
        use std::time::Duration;

        pub(crate) fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            serializer.serialize_u64(duration.as_millis() as u64)
        }

        pub(crate) fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
        where
            D: Deserializer<'de>,
        {
            let millis = u64::deserialize(deserializer)?;
            Ok(Duration::from_millis(millis))
        }
    }
}
