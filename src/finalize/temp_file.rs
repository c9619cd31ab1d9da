//! Temp destination file: the handle a worker writes into and the finalizer closes.

use std::io;
use std::path::Path;

use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};

/// Write buffer in front of the temp file
const WRITE_BUFFER: usize = 256 * 1024;

/// Handle to an in-flight destination file.
///
/// Owned by exactly one component at a time: the worker while bytes are written, the
/// finalizer from stream completion until close.
#[async_trait::async_trait]
pub(crate) trait TempHandle: Send {
    /// Append bytes
    async fn write_chunk(&mut self, data: &[u8]) -> io::Result<()>;

    /// Push buffered bytes to disk. Best effort: close surfaces the real errors.
    async fn flush(&mut self) -> io::Result<()>;

    /// Flush what is left and release the handle
    async fn close(self) -> io::Result<()>
    where
        Self: Sized;
}

/// Temp file on the local filesystem
pub(crate) struct TempFile {
    writer: BufWriter<File>,
}

impl TempFile {
    /// Create (or truncate) the temp file at `path`, creating parent directories
    pub(crate) async fn create(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = File::create(path).await?;
        Ok(Self {
            writer: BufWriter::with_capacity(WRITE_BUFFER, file),
        })
    }
}

#[async_trait::async_trait]
impl TempHandle for TempFile {
    async fn write_chunk(&mut self, data: &[u8]) -> io::Result<()> {
        self.writer.write_all(data).await
    }

    async fn flush(&mut self) -> io::Result<()> {
        self.writer.flush().await?;
        self.writer.get_ref().sync_data().await
    }

    async fn close(mut self) -> io::Result<()> {
        self.writer.shutdown().await
    }
}
