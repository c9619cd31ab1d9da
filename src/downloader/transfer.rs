//! Byte transfer for one Elem: remote chunks into the temp file.

use tokio_util::sync::CancellationToken;

use crate::error::TransferError;
use crate::finalize::TempHandle;
use crate::progress::Progress;
use crate::source::MediaSource;
use crate::types::{Elem, ProgressState};

/// Stream `elem` from `source` into `handle` in `part_size` steps.
///
/// Emits `on_download` after every non-empty chunk. The total starts at the declared
/// size and follows whatever the remote reports later; it never drops below the bytes
/// already written. Ends on a short chunk or once the known total is reached. Returns
/// the number of bytes written.
pub(super) async fn transfer<H: TempHandle>(
    source: &dyn MediaSource,
    elem: &Elem,
    handle: &mut H,
    part_size: usize,
    progress: &dyn Progress,
    cancel: &CancellationToken,
) -> Result<u64, TransferError> {
    // size the remote vouches for; 0 means unknown
    let mut expected = elem.size();
    let mut state = ProgressState {
        downloaded: 0,
        total: expected,
    };

    loop {
        if expected > 0 && state.downloaded >= expected {
            break;
        }

        let chunk = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransferError::Cancelled),
            res = source.fetch_chunk(elem.file(), state.downloaded, part_size) => {
                res.map_err(TransferError::Remote)?
            }
        };

        if let Some(total) = chunk.total
            && total != expected
        {
            tracing::debug!(
                elem = %elem.id(),
                declared = expected,
                reported = total,
                "Remote revised file size"
            );
            expected = total;
            state.total = total;
        }

        let len = chunk.data.len();
        if len > 0 {
            handle.write_chunk(&chunk.data).await?;
            state.downloaded += len as u64;
            state.total = state.total.max(state.downloaded);
            progress.on_download(elem, state);
        }

        if len < part_size {
            break;
        }
    }

    Ok(state.downloaded)
}
