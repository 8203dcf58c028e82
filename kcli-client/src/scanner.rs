//! Sequential search and fetch over one partition

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::partition::{Offset, Partition};
use crate::reader::{OnDecodeError, PartitionReader, ReadContext, ReadEnd, Visit};
use crate::Result;

/// Scan forward from `partition.offset` for the first message whose decoded
/// payload contains `needle`.
///
/// `progress(index, partition.end)` runs before each message is checked.
/// Returns `None` when the window holds no match or `stop` fires first.
pub async fn search<P>(
    ctx: &ReadContext,
    partition: &Partition,
    needle: &[u8],
    stop: CancellationToken,
    mut progress: P,
) -> Result<Option<Offset>>
where
    P: FnMut(i64, i64),
{
    let mut reader = PartitionReader::open(ctx.clone(), partition, stop).await?;
    let decoder = reader.message_decoder(OnDecodeError::Abort);

    let total = partition.end;
    let mut index: i64 = 0;
    let mut found = None;
    let result = reader
        .for_each(|raw| {
            progress(index, total);
            let Some(value) = decoder.decode(raw.value)? else {
                return Ok(Visit::Stop);
            };
            if contains(&value, needle) {
                found = Some(raw.offset);
                return Ok(Visit::Stop);
            }
            index += 1;
            Ok(Visit::Continue)
        })
        .await;
    let closed = reader.close().await;

    let end = result?;
    closed?;
    if end == ReadEnd::Cancelled {
        debug!("Search of {} stopped early", partition);
    }
    Ok(found)
}

/// Walk up to `max_count` messages from `partition.offset`, never past `End`,
/// handing each decoded payload to `callback`.
///
/// A decode failure ends the walk without an error.
pub async fn fetch<F>(
    ctx: &ReadContext,
    partition: &Partition,
    max_count: i64,
    cancel: CancellationToken,
    mut callback: F,
) -> Result<()>
where
    F: FnMut(String),
{
    let limit = max_count.min(partition.remaining());
    if limit <= 0 {
        return Ok(());
    }

    let mut reader = PartitionReader::open(ctx.clone(), partition, cancel).await?;
    let decoder = reader.message_decoder(OnDecodeError::StopSilently);

    let mut delivered: i64 = 0;
    let result = reader
        .for_each(|raw| {
            let Some(value) = decoder.decode(raw.value)? else {
                return Ok(Visit::Stop);
            };
            callback(String::from_utf8_lossy(&value).into_owned());
            delivered += 1;
            if delivered >= limit {
                return Ok(Visit::Stop);
            }
            Ok(Visit::Continue)
        })
        .await;
    let closed = reader.close().await;

    result?;
    closed
}

/// Byte-level substring test; the empty needle matches everything
pub(crate) fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    needle.is_empty() || haystack.windows(needle.len()).any(|w| w == needle)
}
