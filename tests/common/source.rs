//! Scriptable in-memory media source

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chatmedia_dl::{Chunk, MediaSource, RemoteFile};

/// Behaviour of one remote object, keyed by its location
#[derive(Clone, Debug, Default)]
pub struct Script {
    /// Bytes served for the object
    pub content: Vec<u8>,
    /// Total reported with every chunk (`None` keeps the declared size)
    pub reported_total: Option<u64>,
    /// Fail the request at this offset
    pub fail_at: Option<u64>,
    /// Never answer requests at or beyond this offset
    pub stall_from: Option<u64>,
    /// Latency added to every request
    pub latency: Duration,
}

impl Script {
    /// Serve `content` as-is
    pub fn serving(content: Vec<u8>) -> Self {
        Self {
            content,
            ..Default::default()
        }
    }
}

/// Fake remote: serves scripted objects and records every request
#[derive(Default)]
pub struct FakeSource {
    scripts: Mutex<HashMap<String, Script>>,
    requests: Mutex<Vec<(String, u64)>>,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the script for `location`
    pub fn script(&self, location: &str, script: Script) {
        self.scripts
            .lock()
            .unwrap()
            .insert(location.to_string(), script);
    }

    /// Number of requests made for `location`
    pub fn requests_for(&self, location: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(l, _)| l == location)
            .count()
    }

    /// Total number of requests
    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl MediaSource for FakeSource {
    async fn fetch_chunk(
        &self,
        file: &RemoteFile,
        offset: u64,
        limit: usize,
    ) -> Result<Chunk, String> {
        self.requests
            .lock()
            .unwrap()
            .push((file.location.clone(), offset));

        let script = self
            .scripts
            .lock()
            .unwrap()
            .get(&file.location)
            .cloned()
            .ok_or_else(|| format!("unknown location {}", file.location))?;

        if !script.latency.is_zero() {
            tokio::time::sleep(script.latency).await;
        }
        if script.fail_at == Some(offset) {
            return Err("RPC_CALL_FAIL".to_string());
        }
        if script.stall_from.is_some_and(|from| offset >= from) {
            std::future::pending::<()>().await;
        }

        let start = (offset as usize).min(script.content.len());
        let end = (start + limit).min(script.content.len());
        Ok(Chunk {
            data: script.content[start..end].to_vec(),
            total: script.reported_total,
        })
    }
}
