//! Tests for the transfer loop and the worker pool.

use std::collections::BTreeSet;
use std::io;
use std::sync::{Arc, Mutex};

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use super::transfer::transfer;
use super::{Downloader, RunSummary};
use crate::config::Options;
use crate::error::{DoneError, Error, TransferError};
use crate::finalize::TempHandle;
use crate::progress::{Observers, Progress};
use crate::resume::{MemoryStore, ResumeStore, fingerprint};
use crate::source::{Chunk, MediaSource};
use crate::types::{Elem, ElemId, Peer, ProgressState, RemoteFile, TaskSpec};

const PART: usize = 4096;

/// Serves `content` for every file, optionally reporting a different total
struct StaticSource {
    content: Vec<u8>,
    reported_total: Option<u64>,
    fail_at: Option<u64>,
    calls: Mutex<Vec<(u64, usize)>>,
}

impl StaticSource {
    fn new(len: usize) -> Self {
        Self {
            content: (0..len).map(|i| (i % 251) as u8).collect(),
            reported_total: None,
            fail_at: None,
            calls: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait::async_trait]
impl MediaSource for StaticSource {
    async fn fetch_chunk(
        &self,
        _file: &RemoteFile,
        offset: u64,
        limit: usize,
    ) -> Result<Chunk, String> {
        self.calls.lock().unwrap().push((offset, limit));
        if self.fail_at == Some(offset) {
            return Err("FILE_REFERENCE_EXPIRED".to_string());
        }
        let start = (offset as usize).min(self.content.len());
        let end = (start + limit).min(self.content.len());
        Ok(Chunk {
            data: self.content[start..end].to_vec(),
            total: self.reported_total,
        })
    }
}

/// Never answers
struct StalledSource;

#[async_trait::async_trait]
impl MediaSource for StalledSource {
    async fn fetch_chunk(&self, _: &RemoteFile, _: u64, _: usize) -> Result<Chunk, String> {
        std::future::pending().await
    }
}

#[derive(Default)]
struct MemHandle(Vec<u8>);

#[async_trait::async_trait]
impl TempHandle for MemHandle {
    async fn write_chunk(&mut self, data: &[u8]) -> io::Result<()> {
        self.0.extend_from_slice(data);
        Ok(())
    }
    async fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
    async fn close(self) -> io::Result<()> {
        Ok(())
    }
}

#[derive(Default)]
struct Ticks(Mutex<Vec<ProgressState>>);

impl Progress for Ticks {
    fn on_add(&self, _: &Elem) {}
    fn on_download(&self, _: &Elem, state: ProgressState) {
        self.0.lock().unwrap().push(state);
    }
    fn on_done(&self, _: &Elem, _: Option<&DoneError>) {}
}

#[derive(Default)]
struct Outcomes(Mutex<Vec<(i64, Option<String>, bool)>>);

impl Progress for Outcomes {
    fn on_add(&self, _: &Elem) {}
    fn on_download(&self, _: &Elem, _: ProgressState) {}
    fn on_done(&self, elem: &Elem, err: Option<&DoneError>) {
        self.0.lock().unwrap().push((
            elem.message_id(),
            err.map(|e| e.to_string()),
            err.is_some_and(DoneError::is_cancelled),
        ));
    }
}

fn task(msg: i64, size: u64) -> TaskSpec {
    TaskSpec {
        peer: Peer {
            id: 100,
            name: "Media".to_string(),
        },
        message_id: msg,
        file: RemoteFile {
            location: format!("doc{msg}"),
            name: format!("file{msg}.bin"),
            size,
            mime_type: None,
            date: None,
        },
    }
}

fn elem(size: u64) -> Elem {
    Elem::new(ElemId(0), task(1, size), std::path::Path::new("/dl/f.bin"), 0)
}

#[tokio::test]
async fn transfer_reads_until_short_chunk() {
    let source = StaticSource::new(10_000);
    let ticks = Ticks::default();
    let mut handle = MemHandle::default();

    let bytes = transfer(
        &source,
        &elem(10_000),
        &mut handle,
        PART,
        &ticks,
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(bytes, 10_000);
    assert_eq!(handle.0, source.content);
    let downloaded: Vec<_> = ticks.0.lock().unwrap().iter().map(|s| s.downloaded).collect();
    assert_eq!(downloaded, vec![4096, 8192, 10_000]);
    assert_eq!(
        *source.calls.lock().unwrap(),
        vec![(0, PART), (4096, PART), (8192, PART)]
    );
}

#[tokio::test]
async fn transfer_stops_at_known_total_without_extra_request() {
    let source = StaticSource::new(2 * PART);
    let mut handle = MemHandle::default();

    transfer(
        &source,
        &elem(2 * PART as u64),
        &mut handle,
        PART,
        &Ticks::default(),
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(source.calls.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn transfer_follows_remote_size_revision() {
    let mut source = StaticSource::new(6000);
    source.reported_total = Some(6000);
    let ticks = Ticks::default();

    transfer(
        &source,
        &elem(1000),
        &mut MemHandle::default(),
        PART,
        &ticks,
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    let ticks = ticks.0.lock().unwrap();
    assert_eq!(
        ticks[0],
        ProgressState {
            downloaded: 4096,
            total: 6000,
        }
    );
    assert_eq!(ticks.last().unwrap().downloaded, 6000);
}

#[tokio::test]
async fn transfer_total_grows_when_remote_serves_more_than_declared() {
    let source = StaticSource::new(3000);
    let ticks = Ticks::default();
    let mut handle = MemHandle::default();

    let bytes = transfer(
        &source,
        &elem(1000),
        &mut handle,
        PART,
        &ticks,
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(bytes, 3000);
    assert_eq!(handle.0.len(), 3000);
    let ticks = ticks.0.lock().unwrap();
    assert_eq!(
        *ticks,
        vec![ProgressState {
            downloaded: 3000,
            total: 3000,
        }]
    );
    assert!(ticks.iter().all(|s| s.downloaded <= s.total));
}

#[tokio::test]
async fn transfer_with_unknown_size_reads_past_the_first_chunk() {
    let source = StaticSource::new(2 * PART + 10);
    let ticks = Ticks::default();

    let bytes = transfer(
        &source,
        &elem(0),
        &mut MemHandle::default(),
        PART,
        &ticks,
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(bytes, 2 * PART as u64 + 10);
    let ticks = ticks.0.lock().unwrap();
    assert_eq!(ticks.len(), 3);
    assert!(ticks.iter().all(|s| s.total == s.downloaded));
}

#[tokio::test]
async fn transfer_reports_remote_errors() {
    let mut source = StaticSource::new(10_000);
    source.fail_at = Some(4096);

    let err = transfer(
        &source,
        &elem(10_000),
        &mut MemHandle::default(),
        PART,
        &Ticks::default(),
        &CancellationToken::new(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, TransferError::Remote(ref m) if m == "FILE_REFERENCE_EXPIRED"));
}

#[tokio::test]
async fn transfer_returns_cancelled_sentinel() {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::task::yield_now().await;
        trigger.cancel();
    });

    let err = transfer(
        &StalledSource,
        &elem(10),
        &mut MemHandle::default(),
        PART,
        &Ticks::default(),
        &cancel,
    )
    .await
    .unwrap_err();

    assert!(err.is_cancelled());
}

fn opts(dir: &TempDir) -> Options {
    Options {
        dir: dir.path().to_path_buf(),
        template: "{message_id}_{file_name}".to_string(),
        part_size: PART,
        threads: 3,
        silent: true,
        ..Default::default()
    }
}

#[tokio::test]
async fn run_downloads_every_task_and_clears_resume_state() {
    let dir = TempDir::new().unwrap();
    let source = Arc::new(StaticSource::new(5000));
    let store = Arc::new(MemoryStore::new());
    let tasks: Vec<_> = (1..=5).map(|m| task(m, 5000)).collect();
    let fp = fingerprint(&tasks, &opts(&dir));
    store.save(&fp, &BTreeSet::from([9])).await.unwrap();

    let summary = Downloader::new(source, opts(&dir))
        .unwrap()
        .with_resume_store(store.clone())
        .run(tasks)
        .await
        .unwrap();

    assert_eq!(
        summary,
        RunSummary {
            total: 5,
            succeeded: 5,
            ..Default::default()
        }
    );
    for m in 1..=5 {
        let path = dir.path().join(format!("{m}_file{m}.bin"));
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 5000);
        assert!(!dir.path().join(format!("{m}_file{m}.bin.tmp")).exists());
    }
    assert!(store.load(&fp).await.unwrap().is_none());
}

#[tokio::test]
async fn run_counts_failures_and_keeps_going() {
    let dir = TempDir::new().unwrap();
    let mut source = StaticSource::new(10_000);
    source.fail_at = Some(4096);
    let outcomes = Arc::new(Outcomes::default());
    let o = Options {
        external_progress: Observers::new().with(outcomes.clone()),
        ..opts(&dir)
    };
    let store = Arc::new(MemoryStore::new());
    let tasks = vec![task(1, 10_000), task(2, 100)];
    let fp = fingerprint(&tasks, &o);

    let summary = Downloader::new(Arc::new(source), o)
        .unwrap()
        .with_resume_store(store.clone())
        .run(tasks)
        .await
        .unwrap();

    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 1);
    assert!(!dir.path().join("1_file1.bin.tmp").exists());
    assert!(dir.path().join("2_file2.bin").exists());

    let mut outcomes = outcomes.0.lock().unwrap().clone();
    outcomes.sort();
    assert_eq!(outcomes[0].1.as_deref(), Some("progress: remote error: FILE_REFERENCE_EXPIRED"));
    assert_eq!(outcomes[1], (2, None, false));

    // only the successful position is recorded for a later continue
    assert_eq!(store.load(&fp).await.unwrap(), Some(BTreeSet::from([1])));
}

#[tokio::test]
async fn continue_skips_finished_positions_and_restart_ignores_them() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::new());
    let tasks = vec![task(1, 10), task(2, 10), task(3, 10)];
    let fp = fingerprint(&tasks, &opts(&dir));
    store.save(&fp, &BTreeSet::from([0, 2])).await.unwrap();

    let source = Arc::new(StaticSource::new(10));
    let summary = Downloader::new(
        source.clone(),
        Options {
            continue_run: true,
            ..opts(&dir)
        },
    )
    .unwrap()
    .with_resume_store(store.clone())
    .run(tasks.clone())
    .await
    .unwrap();

    assert_eq!((summary.succeeded, summary.skipped), (1, 2));
    assert!(dir.path().join("2_file2.bin").exists());
    assert!(!dir.path().join("1_file1.bin").exists());

    store.save(&fp, &BTreeSet::from([0, 1])).await.unwrap();
    let summary = Downloader::new(
        source,
        Options {
            restart: true,
            ..opts(&dir)
        },
    )
    .unwrap()
    .with_resume_store(store)
    .run(tasks)
    .await
    .unwrap();

    assert_eq!(summary.succeeded, 3);
}

#[tokio::test]
async fn run_refuses_to_start_when_already_cancelled() {
    let dir = TempDir::new().unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = Downloader::new(Arc::new(StaticSource::new(1)), opts(&dir))
        .unwrap()
        .with_cancellation(cancel)
        .with_resume_store(Arc::new(MemoryStore::new()))
        .run(vec![task(1, 1)])
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Cancelled));
}

#[test]
fn invalid_options_are_rejected_up_front() {
    let dir = TempDir::new().unwrap();
    let result = Downloader::new(
        Arc::new(StaticSource::new(1)),
        Options {
            threads: 0,
            ..opts(&dir)
        },
    );
    assert!(matches!(result, Err(Error::Config { .. })));
}

#[test]
fn not_started_counts_undispatched_tasks() {
    let summary = RunSummary {
        total: 10,
        succeeded: 3,
        skipped: 1,
        failed: 1,
        cancelled: 2,
    };
    assert_eq!(summary.not_started(), 3);
}
