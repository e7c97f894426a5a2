//! Chunked batching
//!
//! Splits a workload into fixed-size chunks processed strictly in order;
//! everything inside one chunk runs concurrently. This bounds the number
//! of simultaneous probes/management sessions to the chunk size no matter
//! how large the fleet grows.

use std::future::Future;

use futures::future::join_all;
use tracing::trace;

/// Run `f` over all items, at most `chunk_size` concurrently.
///
/// Results are returned in input order. `f` must not fail - per-item
/// errors are expected to be captured in `R` itself.
pub async fn for_each_chunk<T, R, F, Fut>(items: Vec<T>, chunk_size: usize, f: F) -> Vec<R>
where
    F: Fn(T) -> Fut,
    Fut: Future<Output = R>,
{
    let chunk_size = chunk_size.max(1);
    let mut results = Vec::with_capacity(items.len());
    let mut iter = items.into_iter();
    let mut index = 0;

    loop {
        let chunk: Vec<T> = iter.by_ref().take(chunk_size).collect();
        if chunk.is_empty() {
            break;
        }

        trace!("processing chunk {index} ({} items)", chunk.len());
        index += 1;

        results.extend(join_all(chunk.into_iter().map(&f)).await);
    }

    results
}
