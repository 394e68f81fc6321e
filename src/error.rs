//! Shared error types used across the four engines.
//!
//! Each engine defines its own `thiserror` enum (`GraphError`, `CacheError`,
//! `SagaError`, `IdempotencyError`) for the failures particular to it; this
//! module holds the handful of types shared by more than one of them.

use std::time::Duration;

/// A type-erased source error, used wherever an engine needs to carry a
/// caller-supplied error without becoming generic over it (node construction
/// failures, tier write failures reported through a hook).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Returned in place of a caller's error when a [`crate::action::LazyAction`]
/// or a combinator built from one was cancelled before producing a result.
///
/// A cancelled action must surface either its natural error or this marker —
/// never a partial success.
#[derive(Debug, thiserror::Error)]
#[error("action was cancelled")]
pub struct Cancelled;

/// Returned by [`crate::combinators::timeout`] when the timer wins the race
/// against the action.
#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("action timed out after {0:?}")]
pub struct TimeoutError(pub Duration);
