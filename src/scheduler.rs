// src/scheduler.rs
//! Bounded-concurrency admission for independent async work.
//!
//! Work is driven on the caller's task (no spawning), so tasks interleave
//! cooperatively at their await points and may borrow from the caller.

use crate::errors::{RegionEditError, Result};
use futures_util::StreamExt;
use futures_util::stream::FuturesUnordered;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

/// Counting semaphore with a FIFO waiter queue.
///
/// A permit is released when it is dropped.
#[derive(Clone, Debug)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    limit: usize,
}

impl ConcurrencyLimiter {
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }

    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit> {
        self.semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| RegionEditError::Cancelled)
    }

    /// Waits for a permit unless `cancel` fires first.
    pub async fn acquire_or_cancel(
        &self,
        cancel: &CancellationToken,
    ) -> Result<OwnedSemaphorePermit> {
        if cancel.is_cancelled() {
            return Err(RegionEditError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(RegionEditError::Cancelled),
            permit = self.acquire() => permit,
        }
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}

/// Runs `task` over `items` with at most `limit` invocations in flight.
///
/// Items are admitted in input order; the next one is admitted as soon as any
/// in-flight task settles. Admission stops once `cancel` fires. The output is
/// in input order: `None` marks an item that was never admitted, or whose
/// result arrived after cancellation and was discarded.
///
/// Errors are not swallowed here: a task that wants partial results collected
/// should return a `Result` as its output.
pub async fn run_with_concurrency<I, T, F, Fut>(
    items: I,
    limit: usize,
    mut task: F,
    cancel: &CancellationToken,
) -> Vec<Option<T>>
where
    I: IntoIterator,
    F: FnMut(I::Item, usize) -> Fut,
    Fut: Future<Output = T>,
{
    let limit = limit.max(1);
    let items: Vec<I::Item> = items.into_iter().collect();
    let mut results: Vec<Option<T>> = Vec::with_capacity(items.len());
    results.resize_with(items.len(), || None);

    let mut queue = items.into_iter().enumerate();
    let mut in_flight = FuturesUnordered::new();

    loop {
        while in_flight.len() < limit && !cancel.is_cancelled() {
            let Some((index, item)) = queue.next() else {
                break;
            };
            let fut = task(item, index);
            in_flight.push(async move { (index, fut.await) });
        }

        match in_flight.next().await {
            Some((index, output)) => {
                if !cancel.is_cancelled() {
                    results[index] = Some(output);
                }
            }
            None => break,
        }
    }

    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::time::Duration;

    #[tokio::test]
    async fn never_exceeds_limit_and_keeps_input_order() {
        let in_flight_cell = Cell::new(0usize);
        let peak_cell = Cell::new(0usize);
        let (in_flight, peak) = (&in_flight_cell, &peak_cell);
        let token = CancellationToken::new();

        let results = run_with_concurrency(
            0..10u64,
            3,
            move |item, _| {
                async move {
                    in_flight.set(in_flight.get() + 1);
                    peak.set(peak.get().max(in_flight.get()));
                    tokio::time::sleep(Duration::from_millis(10 - item)).await;
                    in_flight.set(in_flight.get() - 1);
                    item * 2
                }
            },
            &token,
        )
        .await;

        assert_eq!(peak_cell.get(), 3);
        let values: Vec<u64> = results.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(values, (0..10).map(|i| i * 2).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn admission_is_in_input_order() {
        let admitted = RefCell::new(Vec::new());
        let token = CancellationToken::new();

        run_with_concurrency(
            ["a", "b", "c", "d"],
            2,
            |item, _| {
                admitted.borrow_mut().push(item);
                async {}
            },
            &token,
        )
        .await;

        assert_eq!(*admitted.borrow(), vec!["a", "b", "c", "d"]);
    }

    #[tokio::test]
    async fn cancellation_stops_admission() {
        let calls = Cell::new(0usize);
        let token = CancellationToken::new();

        let results = run_with_concurrency(
            0..20usize,
            2,
            |item, _| {
                calls.set(calls.get() + 1);
                let token = token.clone();
                async move {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    if item == 3 {
                        token.cancel();
                    }
                    item
                }
            },
            &token,
        )
        .await;

        assert!(calls.get() <= 5, "admitted {} items", calls.get());
        assert_eq!(results.len(), 20);
        assert!(results[10..].iter().all(Option::is_none));
    }

    #[tokio::test]
    async fn cancelled_before_start_admits_nothing() {
        let token = CancellationToken::new();
        token.cancel();
        let calls = Cell::new(0usize);
        let results = run_with_concurrency(
            0..4,
            2,
            |item: i32, _| {
                calls.set(calls.get() + 1);
                async move { item }
            },
            &token,
        )
        .await;
        assert_eq!(calls.get(), 0);
        assert!(results.iter().all(Option::is_none));
    }

    #[tokio::test]
    async fn limiter_releases_on_drop() {
        let limiter = ConcurrencyLimiter::new(2);
        let a = limiter.acquire().await.unwrap();
        let _b = limiter.acquire().await.unwrap();
        assert_eq!(limiter.available(), 0);
        drop(a);
        assert_eq!(limiter.available(), 1);
    }

    #[tokio::test]
    async fn acquire_or_cancel_returns_cancelled() {
        let limiter = ConcurrencyLimiter::new(1);
        let _held = limiter.acquire().await.unwrap();
        let token = CancellationToken::new();
        let waiter = limiter.acquire_or_cancel(&token);
        token.cancel();
        assert!(waiter.await.unwrap_err().is_cancellation());
    }

    #[test]
    fn zero_limit_is_raised_to_one() {
        assert_eq!(ConcurrencyLimiter::new(0).limit(), 1);
    }
}
