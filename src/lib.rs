//! meshwork — parallel dependency resolution, saga rollback, tiered caching
//! and exactly-once execution, built on one shared foundation: a
//! result-or-error discipline, a lazy asynchronous action, and the
//! combinators (`retry`, `timeout`, `fallback_chain`, `race_ok`, `parallel`,
//! `traverse_par`) the four engines below are all built from.
//!
//! - [`graph`] — the Graph Executor: resolves a DAG of Node types, running
//!   independent nodes concurrently, memoizing per run, supporting
//!   protocol-based dependency injection. The load-bearing engine the other
//!   three slot into as ordinary node types.
//! - [`saga`] — the Saga Runner: a chain of steps each paired with a
//!   compensator, unwound in reverse order on failure.
//! - [`cache`] — the Tiered Cache: an ordered stack of storage tiers under
//!   one logical read-through/write-through/invalidate-all cache.
//! - [`idempotency`] — the Idempotency Executor: single-flight, exactly-once
//!   completion per key under concurrent or retried callers.
//!
//! No HTTP/queue/CLI entry point, persistence backend, or configuration
//! loader lives here — those are external collaborators this crate exposes
//! traits for (`Tier`, `Store`) and consumes via plain async closures.

pub mod action;
pub mod cache;
pub mod combinators;
pub mod error;
pub mod graph;
pub mod idempotency;
pub mod saga;

pub use action::LazyAction;
pub use error::{BoxError, Cancelled, TimeoutError};
