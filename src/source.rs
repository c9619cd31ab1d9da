//! Remote media source: the opaque protocol client the engine reads bytes through.

use crate::types::RemoteFile;

/// Chunk of bytes returned by a [`MediaSource`]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Chunk {
    /// Bytes starting at the requested offset (shorter than requested at end of file)
    pub data: Vec<u8>,
    /// Size of the object as currently reported by the remote, if it reports one
    pub total: Option<u64>,
}

/// Abstraction over the protocol client that fetches media bytes.
///
/// Implementations own transport, authentication and session handling. The engine
/// only asks for byte ranges of a [`RemoteFile`]; it never retries a failed call.
#[async_trait::async_trait]
pub trait MediaSource: Send + Sync {
    /// Fetch up to `limit` bytes of `file` starting at `offset`.
    ///
    /// An empty or short chunk signals the end of the object. Errors are returned as
    /// human-readable strings and surface as [`crate::error::TransferError::Remote`].
    async fn fetch_chunk(
        &self,
        file: &RemoteFile,
        offset: u64,
        limit: usize,
    ) -> std::result::Result<Chunk, String>;
}
