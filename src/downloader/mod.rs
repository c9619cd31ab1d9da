//! Download engine: a fixed pool of workers over one shared task iterator.
//!
//! Split into focused submodules:
//! - [`worker`] - per-Elem pipeline (skip check, transfer, finalize, terminal event)
//! - [`transfer`] - chunked byte transfer with cancellation and size revision

mod transfer;
mod worker;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::config::Options;
use crate::error::{Error, Result};
use crate::finalize::Finalizer;
use crate::iter::TaskIterator;
use crate::progress::Multiplexer;
use crate::resume::{self, JsonFileStore, ResumeStore};
use crate::source::MediaSource;
use crate::types::TaskSpec;

use worker::{RunCounters, WorkerContext, run_worker};

/// Counts reported at the end of a run
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Tasks in the input list
    pub total: usize,
    /// Elems committed to their final path
    pub succeeded: usize,
    /// Tasks needing no work: already on disk, filtered out, or finished by a previous run
    pub skipped: usize,
    /// Elems that ended in an error, plus tasks no file name could be rendered for
    pub failed: usize,
    /// Elems rolled back because the run was cancelled
    pub cancelled: usize,
}

impl RunSummary {
    /// Tasks that were never dispatched (cancelled before their turn)
    pub fn not_started(&self) -> usize {
        self.total
            .saturating_sub(self.succeeded + self.skipped + self.failed + self.cancelled)
    }
}

/// Download engine for one task list at a time
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use chatmedia_dl::{Downloader, MediaSource, Options, TaskSpec};
///
/// # async fn example(
/// #     source: Arc<dyn MediaSource>,
/// #     tasks: Vec<TaskSpec>,
/// # ) -> chatmedia_dl::Result<()> {
/// let downloader = Downloader::new(source, Options::default())?;
/// let summary = downloader.run(tasks).await?;
/// println!("{} downloaded, {} failed", summary.succeeded, summary.failed);
/// # Ok(())
/// # }
/// ```
pub struct Downloader {
    source: Arc<dyn MediaSource>,
    opts: Arc<Options>,
    store: Arc<dyn ResumeStore>,
    cancel: CancellationToken,
}

impl Downloader {
    /// Engine reading through `source`, storing resume state next to the downloads.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `opts` fails validation.
    pub fn new(source: Arc<dyn MediaSource>, opts: Options) -> Result<Self> {
        opts.validate()?;
        let store = Arc::new(JsonFileStore::in_dir(&opts.dir));
        Ok(Self {
            source,
            opts: Arc::new(opts),
            store,
            cancel: CancellationToken::new(),
        })
    }

    /// Replace the resume store
    #[must_use]
    pub fn with_resume_store(mut self, store: Arc<dyn ResumeStore>) -> Self {
        self.store = store;
        self
    }

    /// Use `cancel` as the run's cancellation signal
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that aborts in-flight transfers and stops dispatch when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Options in effect
    pub fn options(&self) -> &Options {
        &self.opts
    }

    /// Download `tasks` with `threads` concurrent workers.
    ///
    /// Per-Elem failures never fail the run; they are reported through the progress
    /// observers and counted in the summary. The finished positions are persisted to
    /// the resume store before returning.
    ///
    /// # Errors
    ///
    /// - [`Error::Cancelled`] if the token was cancelled before dispatch started
    /// - [`Error::Template`] if the filename template does not parse
    /// - [`Error::Resume`] or [`Error::Io`] if resume state cannot be loaded
    pub async fn run(&self, tasks: Vec<TaskSpec>) -> Result<RunSummary> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let fingerprint = resume::fingerprint(&tasks, &self.opts);
        let already_finished = self.load_resume_state(&fingerprint).await?;

        let iter = Arc::new(TaskIterator::new(
            tasks,
            &self.opts,
            already_finished,
            self.cancel.clone(),
        )?);

        tracing::info!(
            total = iter.total(),
            threads = self.opts.threads,
            dir = %self.opts.dir.display(),
            "Starting downloads"
        );

        let ctx = Arc::new(WorkerContext {
            opts: Arc::clone(&self.opts),
            source: Arc::clone(&self.source),
            iter: Arc::clone(&iter),
            progress: Arc::new(Multiplexer::new(&self.opts)),
            finalizer: Finalizer::new(Arc::clone(&self.opts), Arc::clone(&iter)),
            counters: RunCounters::default(),
            cancel: self.cancel.clone(),
        });

        let joined: Vec<_> = stream::iter(0..self.opts.threads)
            .map(|worker| tokio::spawn(run_worker(Arc::clone(&ctx), worker)))
            .buffer_unordered(self.opts.threads)
            .collect()
            .await;
        for result in joined {
            if let Err(e) = result {
                tracing::error!(error = %e, "Worker task panicked");
            }
        }

        self.store_resume_state(&fingerprint, &iter).await;

        let counters = &ctx.counters;
        let summary = RunSummary {
            total: iter.total(),
            succeeded: counters.succeeded.load(Ordering::Relaxed),
            skipped: counters.skipped.load(Ordering::Relaxed) + iter.resumed() + iter.filtered(),
            failed: counters.failed.load(Ordering::Relaxed) + iter.rejected(),
            cancelled: counters.cancelled.load(Ordering::Relaxed),
        };

        tracing::info!(
            total = summary.total,
            succeeded = summary.succeeded,
            skipped = summary.skipped,
            failed = summary.failed,
            cancelled = summary.cancelled,
            "Downloads finished"
        );
        Ok(summary)
    }

    async fn load_resume_state(&self, fingerprint: &str) -> Result<BTreeSet<usize>> {
        if self.opts.restart {
            tracing::info!("Discarding previous progress");
            self.store.delete(fingerprint).await?;
            return Ok(BTreeSet::new());
        }
        if self.opts.continue_run {
            return Ok(self.store.load(fingerprint).await?.unwrap_or_default());
        }
        Ok(BTreeSet::new())
    }

    /// Delete the entry once everything finished, otherwise save the finished set.
    /// Failures are logged: the downloads themselves are already on disk.
    async fn store_resume_state(&self, fingerprint: &str, iter: &TaskIterator) {
        let result = if iter.is_complete() {
            self.store.delete(fingerprint).await
        } else {
            self.store.save(fingerprint, &iter.finished()).await
        };
        if let Err(e) = result {
            tracing::error!(error = %e, "Failed to persist resume state");
        }
    }
}
