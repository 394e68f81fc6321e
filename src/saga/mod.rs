//! Saga Runner: a chain of asynchronous steps each paired with a
//! compensator, unwound in reverse order on failure.
//!
//! Grounded on `src/orchestration/saga/mod.rs` (stage tracking, retry
//! context) and `src/utils/saga_compensation/mod.rs` (every remaining
//! compensator is still attempted, errors are collected not short-circuited).

use crate::action::LazyAction;
use crate::error::BoxError;
use std::any::Any;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{error, info, warn};

/// A step's compensator before it has been applied: takes the step's
/// success value, undoes it.
type RawCompensator = Arc<dyn Fn(Arc<dyn Any + Send + Sync>) -> Pin<Box<dyn Future<Output = Result<(), BoxError>> + Send>> + Send + Sync>;

/// A compensator already bound to the value it would undo — the shape
/// `SagaResult::applied` carries, per the successfully-applied-steps list.
/// Callable with no arguments; cloning shares the same underlying closure.
#[derive(Clone)]
pub struct Compensator(Arc<dyn Fn() -> Pin<Box<dyn Future<Output = Result<(), BoxError>> + Send>> + Send + Sync>);

impl Compensator {
    fn bind(value: Arc<dyn Any + Send + Sync>, raw: RawCompensator) -> Self {
        Self(Arc::new(move || raw(value.clone())))
    }

    /// Invokes the compensator. Exposed so callers can audit or re-run
    /// compensation for steps a successful saga applied.
    pub async fn call(&self) -> Result<(), BoxError> {
        (self.0)().await
    }
}

/// A single stage: an action paired with an optional compensator that
/// undoes it if a later stage fails.
pub struct SagaStep<T, E> {
    action: LazyAction<T, E>,
    compensate: Option<RawCompensator>,
}

impl<T, E> SagaStep<T, E>
where
    T: Send + Sync + 'static,
    E: Send + 'static,
{
    pub fn new(action: LazyAction<T, E>) -> Self {
        Self {
            action,
            compensate: None,
        }
    }

    /// Attach a compensator, invoked with the step's success value if a
    /// later stage fails.
    pub fn with_compensator<F, Fut>(mut self, compensate: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
        T: Clone,
    {
        self.compensate = Some(Arc::new(move |value: Arc<dyn Any + Send + Sync>| {
            let value = value
                .downcast_ref::<T>()
                .expect("compensator invoked with mismatched step value type")
                .clone();
            Box::pin(compensate(value))
        }));
        self
    }
}

/// Build a [`SagaStep`] from an action, optionally with a compensator.
pub fn step<T, E>(action: LazyAction<T, E>) -> SagaStep<T, E>
where
    T: Send + Sync + 'static,
    E: Send + 'static,
{
    SagaStep::new(action)
}

type ErasedOutcome<E> = Result<(Arc<dyn Any + Send + Sync>, Option<RawCompensator>), E>;

type ErasedAction<E> = Arc<
    dyn Fn(Arc<dyn Any + Send + Sync>) -> Pin<Box<dyn Future<Output = ErasedOutcome<E>> + Send>>
        + Send
        + Sync,
>;

struct ErasedStep<E> {
    action: ErasedAction<E>,
}

/// A cons-list of steps, each later step a function of the previous step's
/// success value. Built via [`SagaChain::start`] and [`SagaChain::then`].
pub struct SagaChain<E> {
    steps: Vec<ErasedStep<E>>,
}

impl<E> SagaChain<E>
where
    E: Send + 'static,
{
    /// Start a chain with its first step.
    pub fn start<T>(first: SagaStep<T, E>) -> Self
    where
        T: Send + Sync + 'static,
    {
        let action = first.action;
        let compensate = first.compensate;
        let erased: ErasedAction<E> = Arc::new(move |_prev: Arc<dyn Any + Send + Sync>| {
            let action = action.clone();
            let compensate = compensate.clone();
            Box::pin(async move {
                action
                    .run()
                    .await
                    .map(|v| (Arc::new(v) as Arc<dyn Any + Send + Sync>, compensate))
            })
        });
        Self {
            steps: vec![ErasedStep { action: erased }],
        }
    }

    /// Append a step whose action is built from the previous step's success
    /// value.
    pub fn then<T, U, F>(mut self, f: F) -> Self
    where
        T: Send + Sync + Clone + 'static,
        U: Send + Sync + 'static,
        F: Fn(T) -> SagaStep<U, E> + Send + Sync + 'static,
    {
        let erased: ErasedAction<E> = Arc::new(move |prev: Arc<dyn Any + Send + Sync>| {
            let prev_value = prev
                .downcast_ref::<T>()
                .expect("saga chain type mismatch between consecutive steps")
                .clone();
            let next_step = f(prev_value);
            let compensate = next_step.compensate.clone();
            Box::pin(async move {
                next_step
                    .action
                    .run()
                    .await
                    .map(|v| (Arc::new(v) as Arc<dyn Any + Send + Sync>, compensate))
            })
        });
        self.steps.push(ErasedStep { action: erased });
        self
    }
}

/// `{value: T, applied: Vec<Compensator>}` threaded through a successful run.
pub struct SagaResult<T> {
    pub value: T,
    pub applied: Vec<Compensator>,
}

/// `{stage, error, rollback_complete, rollback_errors}`.
#[derive(Debug, thiserror::Error)]
#[error("saga failed at stage {stage}: rollback_complete={rollback_complete}")]
pub struct SagaError<E> {
    pub stage: usize,
    pub error: E,
    pub rollback_complete: bool,
    pub rollback_errors: Vec<BoxError>,
}

/// Runs a two-call-site saga: a single step with no chaining. Most callers
/// reach for [`run_chain`]; this is the direct entry point for one step.
pub async fn run<T, E>(s: SagaStep<T, E>) -> Result<SagaResult<T>, SagaError<E>>
where
    T: Clone + Send + Sync + 'static,
    E: Send + 'static,
{
    let compensate = s.compensate.clone();
    match s.action.run().await {
        Ok(value) => {
            let applied = match compensate {
                Some(comp) => vec![Compensator::bind(
                    Arc::new(value.clone()) as Arc<dyn Any + Send + Sync>,
                    comp,
                )],
                None => Vec::new(),
            };
            Ok(SagaResult { value, applied })
        }
        Err(error) => Err(SagaError {
            stage: 1,
            error,
            rollback_complete: true,
            rollback_errors: Vec::new(),
        }),
    }
}

/// Runs a chain, applying compensators in reverse order on the first
/// failure. Every remaining compensator is attempted even if one fails.
pub async fn run_chain<E>(chain: SagaChain<E>) -> Result<Arc<dyn Any + Send + Sync>, SagaError<E>>
where
    E: Send + 'static,
{
    let mut applied: Vec<(Arc<dyn Any + Send + Sync>, Compensator)> = Vec::new();
    let mut current: Arc<dyn Any + Send + Sync> = Arc::new(());

    for (idx, step) in chain.steps.iter().enumerate() {
        info!(stage = idx + 1, "running saga step");
        match (step.action)(current.clone()).await {
            Ok((value, compensate)) => {
                if let Some(comp) = compensate {
                    applied.push((value.clone(), Compensator::bind(value.clone(), comp)));
                }
                current = value;
            }
            Err(error) => {
                warn!(stage = idx + 1, "saga step failed, unwinding");
                let mut rollback_errors = Vec::new();
                while let Some((_value, comp)) = applied.pop() {
                    if let Err(e) = comp.call().await {
                        error!(error = %e, "compensator failed during unwind");
                        rollback_errors.push(e);
                    }
                }
                return Err(SagaError {
                    stage: idx + 1,
                    error,
                    rollback_complete: rollback_errors.is_empty(),
                    rollback_errors,
                });
            }
        }
    }

    Ok(current)
}

/// Convenience wrapper around [`run_chain`] that downcasts the final value
/// to the caller's expected type.
pub async fn run_chain_as<T, E>(chain: SagaChain<E>) -> Result<T, SagaError<E>>
where
    T: Send + Sync + Clone + 'static,
    E: Send + 'static,
{
    let value = run_chain(chain).await?;
    Ok(value
        .downcast_ref::<T>()
        .expect("saga chain final value type mismatch")
        .clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[tokio::test]
    async fn single_step_success() {
        let s = step(LazyAction::<i32, String>::ready_ok(42));
        let result = run(s).await.unwrap();
        assert_eq!(result.value, 42);
    }

    #[tokio::test]
    async fn single_step_failure() {
        let s = step(LazyAction::<i32, String>::ready_err("boom".into()));
        let err = run(s).await.unwrap_err();
        assert_eq!(err.stage, 1);
        assert!(err.rollback_complete);
    }

    #[tokio::test]
    async fn rollback_scenario_logs_in_lifo_order() {
        let log: Arc<StdMutex<Vec<&'static str>>> = Arc::new(StdMutex::new(Vec::new()));

        let log1 = log.clone();
        let s1 = step(LazyAction::<i32, String>::ready_ok(10)).with_compensator(move |_v: i32| {
            let log1 = log1.clone();
            async move {
                log1.lock().unwrap().push("c1");
                Ok(())
            }
        });

        let chain = SagaChain::start(s1).then(|_prev: i32| {
            step(LazyAction::<i32, String>::ready_err("fail".to_string()))
        });

        let err = run_chain(chain).await.unwrap_err();
        assert_eq!(err.stage, 2);
        assert!(err.rollback_complete);
        assert_eq!(*log.lock().unwrap(), vec!["c1"]);
    }

    #[tokio::test]
    async fn all_compensators_attempted_even_if_one_fails() {
        let log: Arc<StdMutex<Vec<&'static str>>> = Arc::new(StdMutex::new(Vec::new()));

        let log_a = log.clone();
        let s1 = step(LazyAction::<i32, String>::ready_ok(1)).with_compensator(move |_v: i32| {
            let log_a = log_a.clone();
            async move {
                log_a.lock().unwrap().push("c1");
                Ok(())
            }
        });

        let log_b = log.clone();
        let chain = SagaChain::start(s1)
            .then(move |_prev: i32| {
                let log_b = log_b.clone();
                step(LazyAction::<i32, String>::ready_ok(2)).with_compensator(move |_v: i32| {
                    let log_b = log_b.clone();
                    async move {
                        log_b.lock().unwrap().push("c2");
                        Err::<(), BoxError>("c2 failed".into())
                    }
                })
            })
            .then(|_prev: i32| step(LazyAction::<i32, String>::ready_err("fail".to_string())));

        let err = run_chain(chain).await.unwrap_err();
        assert_eq!(err.stage, 3);
        assert!(!err.rollback_complete);
        assert_eq!(err.rollback_errors.len(), 1);
        assert_eq!(*log.lock().unwrap(), vec!["c2", "c1"]);
    }
}
