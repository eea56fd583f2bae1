//! Bounded fan-out for namespace-wide operations.
//!
//! Clear, dump and restore issue one store call per key. They run through
//! [`run_bounded`], which keeps at most `concurrency` calls in flight and
//! only returns once every call has finished, successfully or not.

use std::future::Future;

use futures_util::stream::{self, StreamExt};
use keyhold_core::KeyholdResult;

/// Run `task` over every item with bounded concurrency.
///
/// All tasks run to completion even after a failure. On success the
/// outputs are returned in completion order; otherwise the first error to
/// complete is returned and any later ones are logged.
pub(crate) async fn run_bounded<I, F, Fut, T>(
    items: I,
    concurrency: usize,
    op: &'static str,
    task: F,
) -> KeyholdResult<Vec<T>>
where
    I: IntoIterator,
    F: FnMut(I::Item) -> Fut,
    Fut: Future<Output = KeyholdResult<T>>,
{
    let mut pending = stream::iter(items)
        .map(task)
        .buffer_unordered(concurrency.max(1));

    let mut outputs = Vec::new();
    let mut first_error = None;
    let mut failures = 0usize;

    while let Some(result) = pending.next().await {
        match result {
            Ok(output) => outputs.push(output),
            Err(e) => {
                failures += 1;
                if first_error.is_none() {
                    first_error = Some(e);
                } else {
                    tracing::warn!(error = %e, op, "Additional failure in bulk operation");
                }
            }
        }
    }

    match first_error {
        Some(e) => {
            tracing::error!(error = %e, op, failures, "Bulk operation failed");
            Err(e)
        }
        None => Ok(outputs),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyhold_core::{KeyholdError, StoreError};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_collects_all_outputs() {
        let mut out = run_bounded(1..=5, 2, "test", |n| async move {
            Ok::<_, KeyholdError>(n * 10)
        })
        .await
        .expect("all tasks succeed");
        out.sort();
        assert_eq!(out, vec![10, 20, 30, 40, 50]);
    }

    #[tokio::test]
    async fn test_empty_input() {
        let out: Vec<u32> = run_bounded(Vec::<u32>::new(), 4, "test", |n| async move {
            Ok::<_, KeyholdError>(n)
        })
        .await
        .expect("nothing to fail");
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_error_waits_for_every_task() {
        let finished = Arc::new(AtomicUsize::new(0));
        let result = run_bounded(0..6, 3, "test", |n| {
            let finished = Arc::clone(&finished);
            async move {
                finished.fetch_add(1, Ordering::SeqCst);
                let result: KeyholdResult<i32> = if n % 2 == 0 {
                    Err(StoreError::backend("DEL", format!("boom {}", n)).into())
                } else {
                    Ok(n)
                };
                result
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(finished.load(Ordering::SeqCst), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_is_bounded() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        run_bounded(0..20, 4, "test", |_| {
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, KeyholdError>(())
            }
        })
        .await
        .expect("no failures");

        assert_eq!(peak.load(Ordering::SeqCst), 4);
    }
}
