//! Finalize pipeline: turns a transferred temp file into a committed file, or rolls it back.
//!
//! Flushing → Closing → {Committing | RollingBack} → Done
//!
//! - Flushing is best effort.
//! - A close error ends the Elem and keeps the temp file for inspection.
//! - A transfer error (cancellation included) deletes the temp file.
//! - Committing marks the position finished, then sniffs, renames and restores the
//!   timestamp. Each post step failure is tagged with its [`FinalizeStage`].

mod temp_file;


pub(crate) use temp_file::{TempFile, TempHandle};

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use filetime::FileTime;

use crate::config::Options;
use crate::error::{DoneError, FinalizeError, FinalizeStage, TransferError};
use crate::iter::TaskIterator;
use crate::retry::{is_transient_lock_error, retry_transient};
use crate::types::Elem;

/// Post-transfer pipeline shared by all workers
pub(crate) struct Finalizer {
    opts: Arc<Options>,
    iter: Arc<TaskIterator>,
    is_transient: fn(&io::Error) -> bool,
    sniff: fn(&Path) -> io::Result<Option<&'static str>>,
    set_times: fn(&Path, FileTime) -> io::Result<()>,
}

impl Finalizer {
    pub(crate) fn new(opts: Arc<Options>, iter: Arc<TaskIterator>) -> Self {
        Self {
            opts,
            iter,
            is_transient: is_transient_lock_error,
            sniff: sniff_content,
            set_times: set_access_and_modify_times,
        }
    }

    /// Replace the transient-lock classifier used by the rename step
    #[cfg(test)]
    pub(crate) fn with_lock_classifier(mut self, is_transient: fn(&io::Error) -> bool) -> Self {
        self.is_transient = is_transient;
        self
    }

    /// Replace the content sniffer used by extension rewriting
    #[cfg(test)]
    pub(crate) fn with_sniffer(
        mut self,
        sniff: fn(&Path) -> io::Result<Option<&'static str>>,
    ) -> Self {
        self.sniff = sniff;
        self
    }

    /// Replace the timestamp setter used after the rename
    #[cfg(test)]
    pub(crate) fn with_time_setter(
        mut self,
        set_times: fn(&Path, FileTime) -> io::Result<()>,
    ) -> Self {
        self.set_times = set_times;
        self
    }

    /// Take ownership of the temp handle and finish the Elem.
    ///
    /// Returns the committed path, or the error to report through `on_done`.
    pub(crate) async fn finalize<H: TempHandle>(
        &self,
        elem: &Elem,
        mut handle: H,
        transfer: Result<(), TransferError>,
    ) -> Result<PathBuf, DoneError> {
        let temp = elem.path();

        if let Err(e) = handle.flush().await {
            tracing::debug!(path = %temp.display(), error = %e, "Flush before close failed");
        }

        if let Err(e) = handle.close().await {
            return Err(FinalizeError::new(FinalizeStage::Close, e).into());
        }

        if let Err(e) = transfer {
            if e.is_cancelled() {
                tracing::debug!(path = %temp.display(), "Rolling back cancelled download");
            } else {
                tracing::debug!(path = %temp.display(), error = %e, "Rolling back failed download");
            }
            remove_quietly(temp).await;
            return Err(DoneError::Transfer(e));
        }

        self.iter.finish(elem.logical_position());

        let committed = self.commit(elem).await?;
        tracing::info!(
            position = elem.logical_position(),
            path = %committed.display(),
            "Download complete"
        );
        Ok(committed)
    }

    async fn commit(&self, elem: &Elem) -> Result<PathBuf, FinalizeError> {
        let temp = elem.path();
        let mut target = elem.final_path();

        if self.opts.rewrite_ext {
            match sniff_extension(temp, self.sniff).await {
                Ok(Some(ext)) => target = rewrite_extension(&target, ext),
                Ok(None) => {}
                Err(e) => {
                    remove_quietly(temp).await;
                    return Err(FinalizeError::new(FinalizeStage::DetectMime, e));
                }
            }
        }

        retry_transient(&self.opts.rename_retry, self.is_transient, || {
            tokio::fs::rename(temp, &target)
        })
        .await
        .map_err(|e| FinalizeError::new(FinalizeStage::Rename, e))?;

        if let Some(date) = elem.file().date {
            let time = FileTime::from_unix_time(date.timestamp(), date.timestamp_subsec_nanos());
            (self.set_times)(&target, time)
                .map_err(|e| FinalizeError::new(FinalizeStage::SetFileTime, e))?;
        }

        Ok(target)
    }
}

/// Run `sniff` on `path` off the async runtime
async fn sniff_extension(
    path: &Path,
    sniff: fn(&Path) -> io::Result<Option<&'static str>>,
) -> io::Result<Option<&'static str>> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || sniff(&path))
        .await
        .map_err(io::Error::other)?
}

/// Extension matching the content of `path`, if its type is recognised
fn sniff_content(path: &Path) -> io::Result<Option<&'static str>> {
    Ok(infer::get_from_path(path)?.map(|k| k.extension()))
}

fn set_access_and_modify_times(path: &Path, time: FileTime) -> io::Result<()> {
    filetime::set_file_times(path, time, time)
}

/// `target` with its extension replaced by `ext` when they differ
fn rewrite_extension(target: &Path, ext: &str) -> PathBuf {
    let current = target.extension().and_then(|e| e.to_str());
    if current == Some(ext) {
        return target.to_path_buf();
    }
    target.with_extension(ext)
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await
        && e.kind() != io::ErrorKind::NotFound
    {
        tracing::debug!(path = %path.display(), error = %e, "Failed to remove temp file");
    }
}
