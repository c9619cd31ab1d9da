//! Test fixtures: tasks, options, payloads

use std::path::Path;
use std::sync::Arc;

use chatmedia_dl::{Observers, Options, Peer, Progress, RemoteFile, TaskSpec};
use chrono::{DateTime, Utc};

/// Chunk size used by the tests (smallest valid part size)
pub const PART: usize = 4096;

/// Minimal MP4 header: `ftyp` box with major brand `isom`
pub const MP4_HEADER: [u8; 24] = [
    0x00, 0x00, 0x00, 0x18, b'f', b't', b'y', b'p', b'i', b's', b'o', b'm', 0x00, 0x00, 0x02,
    0x00, b'i', b's', b'o', b'm', b'i', b's', b'o', b'2',
];

/// Location used for `message_id`
pub fn location(message_id: i64) -> String {
    format!("doc-{message_id}")
}

/// Task for a file attached to `message_id` in peer 777
pub fn task(message_id: i64, name: &str, size: u64) -> TaskSpec {
    TaskSpec {
        peer: Peer {
            id: 777,
            name: "Archive".to_string(),
        },
        message_id,
        file: RemoteFile {
            location: location(message_id),
            name: name.to_string(),
            size,
            mime_type: None,
            date: None,
        },
    }
}

/// [`task`] with a source timestamp
pub fn dated_task(message_id: i64, name: &str, size: u64, date: DateTime<Utc>) -> TaskSpec {
    let mut t = task(message_id, name, size);
    t.file.date = Some(date);
    t
}

/// Deterministic payload of `len` bytes
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 256) as u8).collect()
}

/// MP4-looking payload of `len` bytes
pub fn mp4_payload(len: usize) -> Vec<u8> {
    let mut data = MP4_HEADER.to_vec();
    data.resize(len, 0);
    data
}

/// Silent options writing `{file_name}` into `dir`, reporting to `observer`
pub fn options(dir: &Path, observer: Arc<dyn Progress>) -> Options {
    Options {
        dir: dir.to_path_buf(),
        template: "{file_name}".to_string(),
        part_size: PART,
        threads: 4,
        silent: true,
        external_progress: Observers::new().with(observer),
        ..Default::default()
    }
}
