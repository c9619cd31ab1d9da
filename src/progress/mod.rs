//! Progress protocol: the only channel through which download lifecycle is observable.
//!
//! Every Elem produces `on_add → on_download* → on_done`, strictly ordered for that
//! Elem. Events of different Elems interleave freely.
//!
//! - [`Progress`] - the three-callback observer contract
//! - [`Observers`] - ordered list of observers, itself a [`Progress`]
//! - [`Multiplexer`] - forwards to external observers, then drives the built-in bars

mod multiplexer;

pub use multiplexer::{Multiplexer, TrackerState};

use std::fmt;
use std::sync::Arc;

use crate::error::DoneError;
use crate::types::{Elem, ProgressState};

/// Observer of download lifecycle events.
///
/// Callbacks run on worker tasks and must not block; an observer that needs to do
/// slow work should hand it off (e.g. through a channel).
pub trait Progress: Send + Sync {
    /// The Elem was scheduled, before any bytes are transferred
    fn on_add(&self, elem: &Elem);

    /// A chunk was written; `state.total` may differ from earlier events
    fn on_download(&self, elem: &Elem, state: ProgressState);

    /// Terminal outcome: `None` on success, the error otherwise.
    ///
    /// Cancellation arrives as an error for which [`DoneError::is_cancelled`] is true.
    fn on_done(&self, elem: &Elem, err: Option<&DoneError>);
}

/// Ordered list of observers, invoked in insertion order
#[derive(Clone, Default)]
pub struct Observers(Vec<Arc<dyn Progress>>);

impl Observers {
    /// Empty list
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an observer
    pub fn push(&mut self, observer: Arc<dyn Progress>) {
        self.0.push(observer);
    }

    /// Builder-style [`Observers::push`]
    #[must_use]
    pub fn with(mut self, observer: Arc<dyn Progress>) -> Self {
        self.push(observer);
        self
    }

    /// Number of observers
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the list is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Observers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observers")
            .field("len", &self.0.len())
            .finish()
    }
}

impl Progress for Observers {
    fn on_add(&self, elem: &Elem) {
        for o in &self.0 {
            o.on_add(elem);
        }
    }

    fn on_download(&self, elem: &Elem, state: ProgressState) {
        for o in &self.0 {
            o.on_download(elem, state);
        }
    }

    fn on_done(&self, elem: &Elem, err: Option<&DoneError>) {
        for o in &self.0 {
            o.on_done(elem, err);
        }
    }
}
