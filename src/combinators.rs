//! Free-standing combinators over [`LazyAction`].
//!
//! Grounded on `src/utils/retry.rs` (exponential/jittered backoff shape) and
//! `src/orchestration/saga/mod.rs` (uses `backon::ExponentialBuilder` for
//! retry) from the teacher; racing/parallel semantics come straight off
//! `futures::future`'s combinators rather than hand-rolled task juggling.

use crate::action::LazyAction;
use crate::error::TimeoutError;
use backon::{ExponentialBuilder, Retryable};
use futures::future::{select_ok, try_join, try_join3, try_join4};
use futures::stream::{self, StreamExt};
use std::time::Duration;

/// Backoff shape for [`retry`]. Mirrors the teacher's `RetryConfig`
/// (exponential, capped, jittered) but expressed through `backon` instead of
/// hand-rolled delay math.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(5),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    fn builder(&self, times: usize) -> ExponentialBuilder {
        let mut b = ExponentialBuilder::default()
            .with_min_delay(self.base_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(times);
        if self.jitter {
            b = b.with_jitter();
        }
        b
    }
}

/// Re-awaits `action` up to `times` times on `Err`, applying `backoff`
/// between attempts. Returns the last error if every attempt fails.
pub async fn retry<T, E>(
    action: LazyAction<T, E>,
    times: usize,
    backoff: Option<RetryPolicy>,
) -> Result<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    let policy = backoff.unwrap_or_default();
    let builder = policy.builder(times);
    (move || {
        let action = action.clone();
        async move { action.run().await }
    })
    .retry(builder)
    .await
}

/// Races `action` against a timer; returns `Err(TimeoutError)` if the timer
/// wins. The action is dropped (cancelled) on timeout.
pub async fn timeout<T, E>(
    action: LazyAction<T, E>,
    duration: Duration,
) -> Result<T, TimeoutErrorOr<E>> {
    match tokio::time::timeout(duration, action.run()).await {
        Ok(Ok(v)) => Ok(v),
        Ok(Err(e)) => Err(TimeoutErrorOr::Inner(e)),
        Err(_) => Err(TimeoutErrorOr::Timeout(TimeoutError(duration))),
    }
}

/// Error surfaced by [`timeout`]: either the action's own error, or the
/// timer winning the race.
#[derive(Debug, thiserror::Error)]
pub enum TimeoutErrorOr<E> {
    #[error(transparent)]
    Inner(E),
    #[error(transparent)]
    Timeout(#[from] TimeoutError),
}

/// Awaits actions in order, returning the first `Ok`, else the last `Err`.
pub async fn fallback_chain<T, E>(actions: Vec<LazyAction<T, E>>) -> Result<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    let mut last_err = None;
    for action in actions {
        match action.run().await {
            Ok(v) => return Ok(v),
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err.expect("fallback_chain called with no actions"))
}

/// Awaits all actions concurrently, returning the first `Ok` and cancelling
/// the rest; if all fail, returns the last `Err`.
pub async fn race_ok<T, E>(actions: Vec<LazyAction<T, E>>) -> Result<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    let futures = actions.into_iter().map(|a| Box::pin(a.run()));
    match select_ok(futures).await {
        Ok((v, _rest)) => Ok(v),
        Err(e) => Err(e),
    }
}

/// Awaits all actions concurrently. `Ok` iff every one succeeds, else the
/// first encountered `Err` (the rest are cancelled by dropping the join).
pub async fn parallel<T, E>(actions: Vec<LazyAction<T, E>>) -> Result<Vec<T>, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    futures::future::try_join_all(actions.into_iter().map(|a| a.run())).await
}

/// Fixed-arity variant of [`parallel`] for two actions of different types.
pub async fn parallel2<T1, T2, E>(
    a1: LazyAction<T1, E>,
    a2: LazyAction<T2, E>,
) -> Result<(T1, T2), E>
where
    T1: Send + 'static,
    T2: Send + 'static,
    E: Send + 'static,
{
    try_join(a1.run(), a2.run()).await
}

/// Fixed-arity variant of [`parallel`] for three actions.
pub async fn parallel3<T1, T2, T3, E>(
    a1: LazyAction<T1, E>,
    a2: LazyAction<T2, E>,
    a3: LazyAction<T3, E>,
) -> Result<(T1, T2, T3), E>
where
    T1: Send + 'static,
    T2: Send + 'static,
    T3: Send + 'static,
    E: Send + 'static,
{
    try_join3(a1.run(), a2.run(), a3.run()).await
}

/// Fixed-arity variant of [`parallel`] for four actions.
pub async fn parallel4<T1, T2, T3, T4, E>(
    a1: LazyAction<T1, E>,
    a2: LazyAction<T2, E>,
    a3: LazyAction<T3, E>,
    a4: LazyAction<T4, E>,
) -> Result<(T1, T2, T3, T4), E>
where
    T1: Send + 'static,
    T2: Send + 'static,
    T3: Send + 'static,
    T4: Send + 'static,
    E: Send + 'static,
{
    try_join4(a1.run(), a2.run(), a3.run(), a4.run()).await
}

/// Bounded-concurrency fan-out over `items` through `f`, preserving input
/// order in the output vector. Fail-fast: the first error drops the stream,
/// cancelling in-flight siblings.
pub async fn traverse_par<I, T, E, F, Fut>(
    items: Vec<I>,
    f: F,
    concurrency: usize,
) -> Result<Vec<T>, E>
where
    I: Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
    F: Fn(I) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<T, E>> + Send + 'static,
{
    let len = items.len();
    let indexed = items.into_iter().enumerate();
    let mut results: Vec<Option<T>> = (0..len).map(|_| None).collect();

    let mut stream = stream::iter(indexed)
        .map(|(idx, item)| {
            let fut = f(item);
            async move { (idx, fut.await) }
        })
        .buffer_unordered(concurrency.max(1));

    while let Some((idx, res)) = stream.next().await {
        match res {
            Ok(v) => results[idx] = Some(v),
            Err(e) => return Err(e),
        }
    }

    Ok(results.into_iter().map(|v| v.expect("all indices filled")).collect())
}
