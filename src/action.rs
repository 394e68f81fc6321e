//! The deferred asynchronous action at the root of the shared foundation.
//!
//! `LazyAction<T, E>` is cheap and side-effect-free to construct; the work
//! happens when it's run. It may be run more than once (combinators like
//! `retry` and `race_ok` do exactly that) but is not required to be
//! idempotent across runs — see the Idempotency Executor for that guarantee.

use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;

/// A deferred async computation that yields `Result<T, E>` when run.
pub struct LazyAction<T, E> {
    f: Arc<dyn Fn() -> BoxFuture<'static, Result<T, E>> + Send + Sync>,
}

impl<T, E> Clone for LazyAction<T, E> {
    fn clone(&self) -> Self {
        Self { f: self.f.clone() }
    }
}

impl<T, E> LazyAction<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    /// Build from an async fn/closure returning `Result<T, E>`.
    pub fn from_async<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        Self {
            f: Arc::new(move || Box::pin(f())),
        }
    }

    /// Build from a plain sync closure returning `Result<T, E>`.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn() -> Result<T, E> + Send + Sync + 'static,
    {
        Self::from_async(move || {
            let r = f();
            async move { r }
        })
    }

    /// An action that immediately succeeds with a fixed value.
    pub fn ready_ok(value: T) -> Self
    where
        T: Clone,
    {
        Self::from_async(move || {
            let value = value.clone();
            async move { Ok(value) }
        })
    }

    /// An action that immediately fails with a fixed error.
    pub fn ready_err(error: E) -> Self
    where
        E: Clone,
    {
        Self::from_async(move || {
            let error = error.clone();
            async move { Err(error) }
        })
    }

    /// Lift a fallible sync call whose error type differs from `E`, mapping
    /// it through `map_err`.
    pub fn lift<F, Err2>(f: F, map_err: impl Fn(Err2) -> E + Send + Sync + 'static) -> Self
    where
        F: Fn() -> Result<T, Err2> + Send + Sync + 'static,
        Err2: Send + 'static,
    {
        let map_err = Arc::new(map_err);
        Self::from_fn(move || f().map_err(|e| map_err(e)))
    }

    /// Run the action, producing a fresh future each call.
    pub fn run(&self) -> BoxFuture<'static, Result<T, E>> {
        (self.f)()
    }

    /// Transform a successful value.
    pub fn map<U>(self, f: impl Fn(T) -> U + Send + Sync + 'static) -> LazyAction<U, E>
    where
        U: Send + 'static,
    {
        let f = Arc::new(f);
        LazyAction::from_async(move || {
            let this = self.clone();
            let f = f.clone();
            async move { this.run().await.map(|v| f(v)) }
        })
    }

    /// Transform a failure value.
    pub fn map_err<E2>(self, f: impl Fn(E) -> E2 + Send + Sync + 'static) -> LazyAction<T, E2>
    where
        E2: Send + 'static,
    {
        let f = Arc::new(f);
        LazyAction::from_async(move || {
            let this = self.clone();
            let f = f.clone();
            async move { this.run().await.map_err(|e| f(e)) }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ready_ok_returns_value() {
        let a = LazyAction::<i32, String>::ready_ok(5);
        assert_eq!(a.run().await, Ok(5));
        // re-awaitable
        assert_eq!(a.run().await, Ok(5));
    }

    #[tokio::test]
    async fn ready_err_returns_error() {
        let a = LazyAction::<i32, String>::ready_err("boom".to_string());
        assert_eq!(a.run().await, Err("boom".to_string()));
    }

    #[tokio::test]
    async fn map_transforms_success() {
        let a = LazyAction::<i32, String>::ready_ok(2).map(|v| v * 10);
        assert_eq!(a.run().await, Ok(20));
    }

    #[tokio::test]
    async fn map_err_transforms_failure() {
        let a = LazyAction::<i32, i32>::ready_err(1).map_err(|e| format!("code {e}"));
        assert_eq!(a.run().await, Err("code 1".to_string()));
    }

    #[tokio::test]
    async fn lift_maps_sync_errors() {
        let a = LazyAction::<i32, String>::lift(
            || "not a number".parse::<i32>(),
            |e: std::num::ParseIntError| e.to_string(),
        );
        assert!(a.run().await.is_err());
    }
}
