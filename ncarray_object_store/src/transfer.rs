//! Single and multipart object transfers.

use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use object_store::{path::Path as ObjectPath, ObjectStore, PutPayload};

use ncarray_storage::{
    byte_range::{part_byte_ranges, reassemble_parts},
    StorageError,
};

use crate::{map_object_store_error, Shared};

fn timeout_error(uri: &str, operation: &'static str, timeout: Duration) -> StorageError {
    StorageError::Timeout {
        uri: uri.to_string(),
        operation,
        seconds: timeout.as_secs_f64(),
    }
}

/// Download `range` of an object.
///
/// Ranges longer than the part size are fetched as concurrent ranged requests of at most the part size.
pub(crate) fn download(
    shared: &Shared,
    store: Arc<dyn ObjectStore>,
    uri: &str,
    path: &ObjectPath,
    range: Range<u64>,
) -> Result<Bytes, StorageError> {
    if range.is_empty() {
        return Ok(Bytes::new());
    }
    let part_size = shared.options.part_size.0.max(1);
    let max_parts = shared.options.max_parts.max(1);
    let timeout = shared.options.read_timeout();
    let length = range.end - range.start;

    if length <= part_size {
        return shared.block_on_timeout(uri, "get_range", timeout, async {
            store
                .get_range(path, range)
                .await
                .map_err(|err| map_object_store_error(uri, err))
        });
    }

    let parts = part_byte_ranges(range.clone(), part_size);
    log::info!(
        "multipart download of {uri}: {length} bytes in {} parts",
        parts.len()
    );
    let requests = parts.into_iter().map(|part| {
        let store = store.clone();
        async move {
            let offset = part.start;
            match tokio::time::timeout(timeout, store.get_range(path, part)).await {
                Ok(Ok(bytes)) => Ok((offset, bytes)),
                Ok(Err(err)) => Err(map_object_store_error(uri, err)),
                Err(_) => Err(timeout_error(uri, "get_range", timeout)),
            }
        }
    });
    let parts: Vec<(u64, Bytes)> = shared.runtime.block_on(
        futures::stream::iter(requests)
            .buffer_unordered(max_parts)
            .try_collect(),
    )?;
    let length = usize::try_from(length)
        .map_err(|_| StorageError::Other(format!("{uri}: range {range:?} exceeds usize")))?;
    Ok(Bytes::from(reassemble_parts(range.start, length, parts)?))
}

/// Upload `data` to an object.
///
/// Data no longer than the part size is written with a single request.
/// Otherwise a multipart upload is started and parts of the part size are sent concurrently.
/// If any part fails, or the upload cannot be completed, the upload is aborted and
/// [`StorageError::MultipartTransferFailure`] is returned.
pub(crate) fn upload(
    shared: &Shared,
    store: Arc<dyn ObjectStore>,
    uri: &str,
    path: &ObjectPath,
    data: Bytes,
) -> Result<(), StorageError> {
    let part_size = shared.options.part_size.0.max(1);
    let max_parts = shared.options.max_parts.max(1);
    let timeout = shared.options.read_timeout();

    if data.len() as u64 <= part_size {
        return shared.block_on_timeout(uri, "put", timeout, async {
            store
                .put(path, PutPayload::from(data))
                .await
                .map(|_| ())
                .map_err(|err| map_object_store_error(uri, err))
        });
    }

    let parts = part_byte_ranges(0..data.len() as u64, part_size);
    let num_parts = parts.len();
    log::info!(
        "multipart upload of {uri}: {} bytes in {num_parts} parts",
        data.len()
    );

    shared.runtime.block_on(async {
        let mut upload = tokio::time::timeout(timeout, store.put_multipart(path))
            .await
            .map_err(|_| timeout_error(uri, "put_multipart", timeout))?
            .map_err(|err| map_object_store_error(uri, err))?;

        // Parts are registered in byte order, then transferred concurrently
        let requests = parts
            .iter()
            .enumerate()
            .map(|(index, part)| {
                #[allow(clippy::cast_possible_truncation)]
                let payload = PutPayload::from(data.slice(part.start as usize..part.end as usize));
                let request = upload.put_part(payload);
                async move {
                    match tokio::time::timeout(timeout, request).await {
                        Ok(Ok(())) => Ok(()),
                        Ok(Err(err)) => Err((index, err.to_string())),
                        Err(_) => Err((
                            index,
                            format!("timed out after {}s", timeout.as_secs_f64()),
                        )),
                    }
                }
            })
            .collect::<Vec<_>>();
        let result = futures::stream::iter(requests)
            .buffer_unordered(max_parts)
            .try_collect::<Vec<()>>()
            .await;

        if let Err((part, reason)) = result {
            log::warn!("aborting multipart upload of {uri}: part {part} failed: {reason}");
            if let Err(err) = upload.abort().await {
                log::warn!("failed to abort multipart upload of {uri}: {err}");
            }
            return Err(StorageError::MultipartTransferFailure {
                uri: uri.to_string(),
                part,
                reason,
            });
        }

        let reason = match tokio::time::timeout(timeout, upload.complete()).await {
            Ok(Ok(_)) => return Ok(()),
            Ok(Err(err)) => err.to_string(),
            Err(_) => format!("completion timed out after {}s", timeout.as_secs_f64()),
        };
        log::warn!("aborting multipart upload of {uri}: {reason}");
        if let Err(err) = upload.abort().await {
            log::warn!("failed to abort multipart upload of {uri}: {err}");
        }
        Err(StorageError::MultipartTransferFailure {
            uri: uri.to_string(),
            part: num_parts,
            reason,
        })
    })
}
