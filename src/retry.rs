//! Bounded fixed-delay retry for transient file-lock errors
//!
//! Some platforms keep a freshly closed file locked for a while (antivirus scanners,
//! search indexers, shell preview handlers). A rename attempted in that window fails
//! with a sharing or lock violation that clears on its own. [`retry_transient`] retries
//! only errors a classifier accepts; [`is_transient_lock_error`] is the per-platform
//! classifier used in production.
//!
//! # Example
//!
//! ```no_run
//! use chatmedia_dl::config::RenameRetryConfig;
//! use chatmedia_dl::retry::{is_transient_lock_error, retry_transient};
//!
//! # async fn example() -> std::io::Result<()> {
//! let config = RenameRetryConfig::default();
//! retry_transient(&config, is_transient_lock_error, || {
//!     tokio::fs::rename("movie.mp4.tmp", "movie.mp4")
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::io;

use crate::config::RenameRetryConfig;

/// Whether `err` is a lock-class error that clears on its own on this platform.
///
/// Windows: access denied (5), sharing violation (32), lock violation (33).
#[cfg(windows)]
pub fn is_transient_lock_error(err: &io::Error) -> bool {
    const ERROR_ACCESS_DENIED: i32 = 5;
    const ERROR_SHARING_VIOLATION: i32 = 32;
    const ERROR_LOCK_VIOLATION: i32 = 33;

    matches!(
        err.raw_os_error(),
        Some(ERROR_ACCESS_DENIED | ERROR_SHARING_VIOLATION | ERROR_LOCK_VIOLATION)
    )
}

/// Whether `err` is a lock-class error that clears on its own on this platform.
///
/// Other platforms have no such class: every rename error is final.
#[cfg(not(windows))]
pub fn is_transient_lock_error(_err: &io::Error) -> bool {
    false
}

/// Run `operation` until it succeeds, fails with an error `is_transient` rejects, or
/// `config.attempts` attempts have been made. Sleeps `config.delay` between attempts.
///
/// Returns the last error when the budget is exhausted.
pub async fn retry_transient<F, Fut, T, C>(
    config: &RenameRetryConfig,
    is_transient: C,
    mut operation: F,
) -> io::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<T>>,
    C: Fn(&io::Error) -> bool,
{
    let attempts = config.attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(attempts = attempt, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if is_transient(&e) && attempt < attempts => {
                tracing::debug!(
                    error = %e,
                    attempt,
                    max_attempts = attempts,
                    delay_ms = config.delay.as_millis(),
                    "Transient lock error, retrying"
                );
                attempt += 1;
                tokio::time::sleep(config.delay).await;
            }
            Err(e) => {
                if is_transient(&e) {
                    tracing::warn!(
                        error = %e,
                        attempts = attempt,
                        "Operation failed after all retry attempts exhausted"
                    );
                }
                return Err(e);
            }
        }
    }
}
