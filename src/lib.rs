//! # chatmedia-dl
//!
//! Concurrent download engine for media attached to chat messages.
//!
//! ## Design Philosophy
//!
//! chatmedia-dl is designed to be:
//! - **Protocol-agnostic** - Bytes come through a [`MediaSource`] the embedder provides
//! - **Crash-safe** - Partial files carry a temp suffix and are never mistaken for complete ones
//! - **Resumable** - Finished positions are persisted; `continue` skips them on the next run
//! - **Observable** - Every lifecycle edge goes through the [`Progress`] protocol
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use chatmedia_dl::{Chunk, MediaSource, Options, RemoteFile, TaskSpec};
//!
//! struct MyClient;
//!
//! #[async_trait::async_trait]
//! impl MediaSource for MyClient {
//!     async fn fetch_chunk(
//!         &self,
//!         file: &RemoteFile,
//!         offset: u64,
//!         limit: usize,
//!     ) -> Result<Chunk, String> {
//!         // ask the remote for `limit` bytes of `file.location` at `offset`
//!         Ok(Chunk::default())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let tasks: Vec<TaskSpec> = Vec::new();
//!     let options = Options {
//!         threads: 8,
//!         skip_same: true,
//!         rewrite_ext: true,
//!         ..Default::default()
//!     };
//!
//!     let summary = chatmedia_dl::download(Arc::new(MyClient), tasks, options).await?;
//!     println!("{} files downloaded", summary.succeeded);
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Worker pool and per-Elem transfer
pub mod downloader;
/// Error types
pub mod error;
/// Flush, close, commit or roll back
pub(crate) mod finalize;
/// Shared task sequence
pub mod iter;
/// Progress protocol and the built-in terminal observer
pub mod progress;
/// Resume state persistence
pub mod resume;
/// Bounded retry for transient file-lock errors
pub mod retry;
/// Remote byte source abstraction
pub mod source;
/// Filename templates
pub mod template;
/// Core types
pub mod types;

/// Suffix appended to the final path while a file is in flight
pub const TEMP_SUFFIX: &str = ".tmp";

// Re-export commonly used types
pub use config::{Options, RenameRetryConfig};
pub use downloader::{Downloader, RunSummary};
pub use error::{DoneError, Error, FinalizeError, FinalizeStage, Result, TransferError};
pub use iter::TaskIterator;
pub use progress::{Multiplexer, Observers, Progress, TrackerState};
pub use resume::{JsonFileStore, MemoryStore, ResumeStore};
pub use source::{Chunk, MediaSource};
pub use types::{Elem, ElemId, Peer, ProgressState, RemoteFile, TaskSpec};

/// Download `tasks` through `source` with `options`.
///
/// Shorthand for [`Downloader::new`] followed by [`Downloader::run`], with resume state
/// kept in the download directory.
pub async fn download(
    source: std::sync::Arc<dyn MediaSource>,
    tasks: Vec<TaskSpec>,
    options: Options,
) -> Result<RunSummary> {
    Downloader::new(source, options)?.run(tasks).await
}

/// Run `downloader` over `tasks`, cancelling it on a termination signal.
///
/// After the signal, in-flight transfers are rolled back and the run returns its
/// summary once every worker has stopped. Rolled-back Elems are picked up again by
/// the next run with `continue` enabled.
///
/// On Unix both SIGTERM and SIGINT cancel the run; elsewhere Ctrl+C does.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use chatmedia_dl::{Downloader, MediaSource, Options, run_until_signal};
///
/// # async fn example(source: Arc<dyn MediaSource>) -> chatmedia_dl::Result<()> {
/// let downloader = Downloader::new(source, Options::default())?;
/// let summary = run_until_signal(&downloader, Vec::new()).await?;
/// if summary.cancelled > 0 {
///     eprintln!("interrupted, rerun with continue to pick up where it stopped");
/// }
/// # Ok(())
/// # }
/// ```
pub async fn run_until_signal(downloader: &Downloader, tasks: Vec<TaskSpec>) -> Result<RunSummary> {
    run_until(downloader, tasks, wait_for_signal()).await
}

/// Run `downloader` over `tasks`, cancelling it once `shutdown` resolves.
///
/// A run that ends before `shutdown` resolves returns as usual. Otherwise the
/// downloader's cancellation token is cancelled and the summary is returned after
/// the workers drain.
pub async fn run_until(
    downloader: &Downloader,
    tasks: Vec<TaskSpec>,
    shutdown: impl Future<Output = ()>,
) -> Result<RunSummary> {
    let cancel = downloader.cancellation_token();
    let run = downloader.run(tasks);
    tokio::pin!(run);

    tokio::select! {
        summary = &mut run => return summary,
        _ = shutdown => {
            tracing::info!("Cancelling downloads");
            cancel.cancel();
        }
    }

    run.await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM"),
                _ = wait_for_ctrl_c() => {}
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "SIGTERM handler unavailable, listening for Ctrl+C only");
            wait_for_ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    wait_for_ctrl_c().await;
}

/// Resolves on Ctrl+C; never resolves if the handler cannot be installed
async fn wait_for_ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received Ctrl+C"),
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    }
}
