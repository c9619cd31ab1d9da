//! Worker loop: pull an Elem, transfer it, hand the temp file to the finalizer.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio_util::sync::CancellationToken;

use super::transfer::transfer;
use crate::config::Options;
use crate::error::{DoneError, TransferError};
use crate::finalize::{Finalizer, TempFile};
use crate::iter::TaskIterator;
use crate::progress::{Multiplexer, Progress};
use crate::source::MediaSource;
use crate::TEMP_SUFFIX;
use crate::types::Elem;

/// Outcome counters shared by all workers of a run
#[derive(Default)]
pub(super) struct RunCounters {
    pub(super) succeeded: AtomicUsize,
    pub(super) skipped: AtomicUsize,
    pub(super) failed: AtomicUsize,
    pub(super) cancelled: AtomicUsize,
}

/// Everything a worker needs, shared across the pool
pub(super) struct WorkerContext {
    pub(super) opts: Arc<Options>,
    pub(super) source: Arc<dyn MediaSource>,
    pub(super) iter: Arc<TaskIterator>,
    pub(super) progress: Arc<Multiplexer>,
    pub(super) finalizer: Finalizer,
    pub(super) counters: RunCounters,
    pub(super) cancel: CancellationToken,
}

/// Pull Elems until the iterator is exhausted or the run is cancelled
pub(super) async fn run_worker(ctx: Arc<WorkerContext>, worker: usize) {
    tracing::debug!(worker, "Worker started");
    let mut handled = 0usize;
    while let Some(elem) = ctx.iter.next().await {
        ctx.process(&elem).await;
        handled += 1;
    }
    tracing::debug!(worker, handled, "Worker finished");
}

impl WorkerContext {
    /// Full per-Elem pipeline. Always ends with exactly one `on_done`.
    async fn process(&self, elem: &Elem) {
        if self.opts.skip_same
            && let Some(existing) = self.existing_file(elem).await
        {
            tracing::info!(
                position = elem.logical_position(),
                path = %existing.display(),
                "File exists, skipping"
            );
            self.progress.on_add(elem);
            self.iter.finish(elem.logical_position());
            self.counters.skipped.fetch_add(1, Ordering::Relaxed);
            self.progress.on_done(elem, None);
            return;
        }

        self.progress.on_add(elem);

        let mut handle = match TempFile::create(elem.path()).await {
            Ok(handle) => handle,
            Err(e) => {
                let err = DoneError::Transfer(TransferError::Io(e));
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                self.progress.on_done(elem, Some(&err));
                return;
            }
        };

        let result = transfer(
            self.source.as_ref(),
            elem,
            &mut handle,
            self.opts.part_size,
            self.progress.as_ref(),
            &self.cancel,
        )
        .await
        .map(|bytes| {
            tracing::debug!(elem = %elem.id(), bytes, "Transfer finished");
        });

        // ownership of the handle moves to the finalizer here
        let outcome = self.finalizer.finalize(elem, handle, result).await;

        let counter = match &outcome {
            Ok(_) => &self.counters.succeeded,
            Err(e) if e.is_cancelled() => &self.counters.cancelled,
            Err(_) => &self.counters.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        self.progress.on_done(elem, outcome.as_ref().err());
    }

    /// Committed file already standing in for `elem`.
    ///
    /// With extension rewriting on, a file with the same stem under any extension counts.
    async fn existing_file(&self, elem: &Elem) -> Option<PathBuf> {
        let target = elem.final_path();
        match tokio::fs::try_exists(&target).await {
            Ok(true) => return Some(target),
            Ok(false) => {}
            Err(e) => {
                tracing::debug!(path = %target.display(), error = %e, "Could not stat final path");
            }
        }

        if self.opts.rewrite_ext {
            return same_stem_sibling(&target).await;
        }
        None
    }
}

async fn same_stem_sibling(target: &Path) -> Option<PathBuf> {
    let dir = target.parent()?;
    let stem = target.file_stem()?;
    let mut entries = tokio::fs::read_dir(dir).await.ok()?;

    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        let is_temp = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(TEMP_SUFFIX));
        if is_temp || path.file_stem() != Some(stem) {
            continue;
        }
        if entry.file_type().await.is_ok_and(|t| t.is_file()) {
            return Some(path);
        }
    }
    None
}
