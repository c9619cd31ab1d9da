//! Built-in progress observer with terminal bars.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};

use super::{Observers, Progress};
use crate::config::Options;
use crate::error::DoneError;
use crate::types::{Elem, ElemId, ProgressState};

const BAR_TEMPLATE: &str =
    "{msg} [{bar:30.cyan/blue}] {bytes}/{total_bytes} {bytes_per_sec} {eta}";

/// Display state for one Elem
struct Tracker {
    bar: ProgressBar,
    label: String,
    errored: bool,
}

/// Snapshot of a tracker, for embedding UIs and tests
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrackerState {
    /// `peer(peer id):msg id -> final path`
    pub label: String,
    /// Current total in bytes
    pub total: u64,
    /// Bytes downloaded so far
    pub current: u64,
    /// Whether the Elem ended in an error
    pub errored: bool,
}

/// Fan-out of lifecycle events: external observers first, then the built-in bars.
///
/// External observers always receive every event, silent mode included. Silent mode
/// only suppresses tracker creation and rendered lines. A tracker lives from `on_add`
/// until a successful or cancelled `on_done`; errored trackers stay so their state
/// remains visible.
pub struct Multiplexer {
    external: Observers,
    silent: bool,
    multi: MultiProgress,
    trackers: Mutex<HashMap<ElemId, Tracker>>,
    rendered_errors: AtomicUsize,
}

impl Multiplexer {
    /// Multiplexer rendering to stderr (hidden when `opts.silent`)
    pub fn new(opts: &Options) -> Self {
        let target = if opts.silent {
            ProgressDrawTarget::hidden()
        } else {
            ProgressDrawTarget::stderr()
        };
        Self::with_draw_target(opts, target)
    }

    /// Multiplexer rendering to `target`
    pub fn with_draw_target(opts: &Options, target: ProgressDrawTarget) -> Self {
        Self {
            external: opts.external_progress.clone(),
            silent: opts.silent,
            multi: MultiProgress::with_draw_target(target),
            trackers: Mutex::new(HashMap::new()),
            rendered_errors: AtomicUsize::new(0),
        }
    }

    /// Snapshot of the tracker for `id`, if one exists
    pub fn tracker(&self, id: ElemId) -> Option<TrackerState> {
        self.lock_trackers().get(&id).map(|t| TrackerState {
            label: t.label.clone(),
            total: t.bar.length().unwrap_or_default(),
            current: t.bar.position(),
            errored: t.errored,
        })
    }

    /// Number of live trackers
    pub fn tracker_count(&self) -> usize {
        self.lock_trackers().len()
    }

    /// Number of diagnostic lines rendered so far
    pub fn rendered_errors(&self) -> usize {
        self.rendered_errors.load(Ordering::Relaxed)
    }

    /// Print a line above the bars (no-op in silent mode)
    pub fn println(&self, line: impl AsRef<str>) {
        if self.silent {
            return;
        }
        if let Err(e) = self.multi.println(line.as_ref()) {
            tracing::debug!(error = %e, "Failed to render progress line");
        }
    }

    fn lock_trackers(&self) -> std::sync::MutexGuard<'_, HashMap<ElemId, Tracker>> {
        self.trackers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn fail(&self, elem: &Elem, err: &DoneError) {
        let mut trackers = self.lock_trackers();
        let Some(tracker) = trackers.get_mut(&elem.id()) else {
            return;
        };
        tracker.errored = true;
        tracker.bar.abandon_with_message(format!("{} (failed)", tracker.label));
        drop(trackers);

        self.println(format!("{} error: {}", elem.label(), err));
        self.rendered_errors.fetch_add(1, Ordering::Relaxed);
    }
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template(BAR_TEMPLATE)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ")
}

impl Progress for Multiplexer {
    fn on_add(&self, elem: &Elem) {
        self.external.on_add(elem);

        if self.silent {
            return;
        }

        let label = elem.label();
        let bar = self.multi.add(ProgressBar::new(elem.size()));
        bar.set_style(bar_style());
        bar.set_message(label.clone());

        self.lock_trackers().insert(
            elem.id(),
            Tracker {
                bar,
                label,
                errored: false,
            },
        );
    }

    fn on_download(&self, elem: &Elem, state: ProgressState) {
        self.external.on_download(elem, state);

        if self.silent {
            return;
        }

        let trackers = self.lock_trackers();
        let Some(tracker) = trackers.get(&elem.id()) else {
            return;
        };
        if tracker.bar.length() != Some(state.total) {
            tracker.bar.set_length(state.total);
        }
        tracker.bar.set_position(state.downloaded);
    }

    fn on_done(&self, elem: &Elem, err: Option<&DoneError>) {
        self.external.on_done(elem, err);

        match err {
            Some(e) if e.is_cancelled() => {
                tracing::debug!(path = %elem.path().display(), "Download cancelled");
            }
            Some(e) => {
                tracing::warn!(
                    peer = %elem.peer_name(),
                    peer_id = elem.peer_id(),
                    message_id = elem.message_id(),
                    path = %elem.final_path().display(),
                    error = %e,
                    "Download failed"
                );
            }
            None => {}
        }

        if self.silent {
            return;
        }

        match err {
            Some(e) if !e.is_cancelled() => self.fail(elem, e),
            _ => {
                if let Some(tracker) = self.lock_trackers().remove(&elem.id()) {
                    tracker.bar.finish_and_clear();
                    self.multi.remove(&tracker.bar);
                }
            }
        }
    }
}
