//! Recording progress observer

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use chatmedia_dl::{DoneError, Elem, ElemId, FinalizeStage, Progress, ProgressState};
use tokio_util::sync::CancellationToken;

/// One observed lifecycle event
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    Add,
    Download(ProgressState),
    Done(Option<Outcome>),
}

/// Error summary captured from `on_done`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Outcome {
    pub message: String,
    pub stage: FinalizeStage,
    pub cancelled: bool,
}

#[derive(Default)]
struct State {
    events: HashMap<ElemId, Vec<Event>>,
    message_ids: HashMap<ElemId, i64>,
    temp_paths: HashMap<ElemId, PathBuf>,
    active: usize,
    max_active: usize,
}

/// Observer recording every event, per Elem, in arrival order
#[derive(Default)]
pub struct Recorder {
    state: Mutex<State>,
    cancel_on_download: Mutex<Option<(i64, CancellationToken)>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel `token` as soon as bytes arrive for `message_id`
    pub fn cancel_on_first_bytes(&self, message_id: i64, token: CancellationToken) {
        *self.cancel_on_download.lock().unwrap() = Some((message_id, token));
    }

    /// Events of the Elem for `message_id`
    pub fn events_for(&self, message_id: i64) -> Vec<Event> {
        let state = self.state.lock().unwrap();
        state
            .message_ids
            .iter()
            .find(|(_, m)| **m == message_id)
            .and_then(|(id, _)| state.events.get(id).cloned())
            .unwrap_or_default()
    }

    /// Terminal outcome for `message_id`; `None` when no `on_done` arrived
    pub fn outcome_for(&self, message_id: i64) -> Option<Option<Outcome>> {
        self.events_for(message_id).into_iter().find_map(|e| match e {
            Event::Done(outcome) => Some(outcome),
            _ => None,
        })
    }

    /// Every Elem's events
    pub fn all(&self) -> Vec<Vec<Event>> {
        self.state.lock().unwrap().events.values().cloned().collect()
    }

    /// Distinct temp paths seen in `on_add`
    pub fn temp_paths(&self) -> Vec<PathBuf> {
        self.state
            .lock()
            .unwrap()
            .temp_paths
            .values()
            .cloned()
            .collect()
    }

    /// Highest number of Elems between `on_add` and `on_done` at the same time
    pub fn max_active(&self) -> usize {
        self.state.lock().unwrap().max_active
    }

    /// Number of `on_done` events
    pub fn done_count(&self) -> usize {
        self.all()
            .iter()
            .flatten()
            .filter(|e| matches!(e, Event::Done(_)))
            .count()
    }
}

impl Progress for Recorder {
    fn on_add(&self, elem: &Elem) {
        let mut state = self.state.lock().unwrap();
        state.message_ids.insert(elem.id(), elem.message_id());
        state.temp_paths.insert(elem.id(), elem.path().to_path_buf());
        state.events.entry(elem.id()).or_default().push(Event::Add);
        state.active += 1;
        state.max_active = state.max_active.max(state.active);
    }

    fn on_download(&self, elem: &Elem, progress: ProgressState) {
        self.state
            .lock()
            .unwrap()
            .events
            .entry(elem.id())
            .or_default()
            .push(Event::Download(progress));

        if let Some((message_id, token)) = self.cancel_on_download.lock().unwrap().as_ref()
            && *message_id == elem.message_id()
        {
            token.cancel();
        }
    }

    fn on_done(&self, elem: &Elem, err: Option<&DoneError>) {
        let outcome = err.map(|e| Outcome {
            message: e.to_string(),
            stage: e.stage(),
            cancelled: e.is_cancelled(),
        });
        let mut state = self.state.lock().unwrap();
        state
            .events
            .entry(elem.id())
            .or_default()
            .push(Event::Done(outcome));
        state.active = state.active.saturating_sub(1);
    }
}

/// Assert `events` is `Add, Download*, Done`
pub fn assert_lifecycle_order(events: &[Event]) {
    assert!(events.len() >= 2, "too few events: {events:?}");
    assert_eq!(events[0], Event::Add, "first event must be Add: {events:?}");
    assert!(
        matches!(events.last(), Some(Event::Done(_))),
        "last event must be Done: {events:?}"
    );
    for e in &events[1..events.len() - 1] {
        assert!(matches!(e, Event::Download(_)), "unexpected event in the middle: {events:?}");
    }
}
