//! Task iterator: ordered, resumable sequence of Elems shared by all workers.
//!
//! Dispatch ([`TaskIterator::next`]) and completion ([`TaskIterator::finish`]) are
//! separate events: workers finish Elems out of order, and only finished positions
//! are safe to skip on a later run. A position that was dispatched but never
//! finished is downloaded again.
//!
//! Destination names are rendered once, in source order, when the iterator is built.
//! Two tasks rendering to the same name get distinct paths: every later claimant has
//! `_<message_id>` inserted before its extension, so the assignment is the same on
//! every run over the same input.

use std::collections::{BTreeSet, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::Options;
use crate::error::Result;
use crate::template::{Template, with_tag};
use crate::types::{Elem, ElemId, TaskSpec};

struct Cursor {
    pending: VecDeque<(usize, TaskSpec, String)>,
    next_id: u64,
    dispatched: usize,
}

/// Shared, concurrency-safe task sequence
pub struct TaskIterator {
    cursor: Mutex<Cursor>,
    finished: StdMutex<BTreeSet<usize>>,
    total: usize,
    resumed: usize,
    filtered: usize,
    rejected: usize,
    dir: PathBuf,
    delay: Duration,
    cancel: CancellationToken,
}

impl TaskIterator {
    /// Build the sequence for `tasks`.
    ///
    /// Positions in `already_finished` (loaded from resume state) are never yielded.
    /// Tasks rejected by the include/exclude filters are marked finished up front.
    /// Tasks whose name cannot be rendered are dropped and left unfinished.
    pub fn new(
        mut tasks: Vec<TaskSpec>,
        opts: &Options,
        already_finished: BTreeSet<usize>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let template = Template::parse(&opts.template)?;
        if opts.desc {
            tasks.reverse();
        }
        let total = tasks.len();

        let include = normalize_exts(&opts.include);
        let exclude = normalize_exts(&opts.exclude);

        let mut finished: BTreeSet<usize> = already_finished
            .into_iter()
            .filter(|pos| *pos < total)
            .collect();
        let resumed = finished.len();
        let mut filtered = 0;
        let mut rejected = 0;
        let mut claimed = HashSet::with_capacity(total);
        let mut pending = VecDeque::with_capacity(total);

        for (pos, spec) in tasks.into_iter().enumerate() {
            let resumed_pos = finished.contains(&pos);
            if !resumed_pos && !ext_allowed(&spec.file.name, &include, &exclude) {
                tracing::debug!(position = pos, file = %spec.file.name, "Filtered by extension");
                finished.insert(pos);
                filtered += 1;
                continue;
            }

            // resumed positions still claim their name so later tasks keep theirs
            let name = match template.render(&spec) {
                Ok(name) => claim_name(&mut claimed, name, spec.message_id),
                Err(_) if resumed_pos => continue,
                Err(e) => {
                    tracing::warn!(
                        position = pos,
                        message_id = spec.message_id,
                        error = %e,
                        "Skipping task"
                    );
                    rejected += 1;
                    continue;
                }
            };
            if !resumed_pos {
                pending.push_back((pos, spec, name));
            }
        }

        if resumed > 0 {
            tracing::info!(resumed, total, "Skipping positions finished by a previous run");
        }

        Ok(Self {
            cursor: Mutex::new(Cursor {
                pending,
                next_id: 0,
                dispatched: 0,
            }),
            finished: StdMutex::new(finished),
            total,
            resumed,
            filtered,
            rejected,
            dir: opts.dir.clone(),
            delay: opts.delay,
            cancel,
        })
    }

    /// Next Elem in source order, or `None` when the sequence is exhausted or cancelled.
    ///
    /// Applies the inter-dispatch delay between consecutive Elems. The cursor lock is
    /// held during the delay so dispatches stay spaced across all workers.
    pub async fn next(&self) -> Option<Elem> {
        let mut cursor = self.cursor.lock().await;
        if self.cancel.is_cancelled() {
            return None;
        }
        let (pos, spec, name) = cursor.pending.pop_front()?;

        if cursor.dispatched > 0 && !self.delay.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(self.delay) => {}
                _ = self.cancel.cancelled() => return None,
            }
        }

        let id = ElemId(cursor.next_id);
        cursor.next_id += 1;
        cursor.dispatched += 1;

        let elem = Elem::new(id, spec, &self.dir.join(name), pos);
        tracing::debug!(
            position = pos,
            elem = %id,
            path = %elem.path().display(),
            "Dispatching"
        );
        Some(elem)
    }

    /// Mark `position` finished. Idempotent; returns `true` if it was newly recorded.
    pub fn finish(&self, position: usize) -> bool {
        let mut finished = self
            .finished
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        finished.insert(position)
    }

    /// Snapshot of finished positions
    pub fn finished(&self) -> BTreeSet<usize> {
        self.finished
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Whether every position in the sequence is finished
    pub fn is_complete(&self) -> bool {
        self.finished
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
            == self.total
    }

    /// Number of tasks in the sequence
    pub fn total(&self) -> usize {
        self.total
    }

    /// Positions skipped because a previous run finished them
    pub fn resumed(&self) -> usize {
        self.resumed
    }

    /// Positions skipped by the include/exclude filters
    pub fn filtered(&self) -> usize {
        self.filtered
    }

    /// Tasks dropped because no file name could be rendered for them
    pub fn rejected(&self) -> usize {
        self.rejected
    }

    /// Destination directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Claim `name`, or a `_<message_id>` variant of it when already taken
fn claim_name(claimed: &mut HashSet<String>, name: String, message_id: i64) -> String {
    if claimed.insert(name.clone()) {
        return name;
    }

    let mut candidate = with_tag(&name, &message_id.to_string());
    let mut n = 1;
    while !claimed.insert(candidate.clone()) {
        candidate = with_tag(&name, &format!("{message_id}_{n}"));
        n += 1;
    }
    tracing::debug!(name = %name, renamed = %candidate, "Name already taken in this run");
    candidate
}

fn normalize_exts(exts: &[String]) -> Vec<String> {
    exts.iter()
        .map(|e| e.trim().trim_start_matches('.').to_ascii_lowercase())
        .filter(|e| !e.is_empty())
        .collect()
}

fn ext_allowed(file_name: &str, include: &[String], exclude: &[String]) -> bool {
    let ext = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    if !include.is_empty() && !include.contains(&ext) {
        return false;
    }
    !exclude.contains(&ext)
}
