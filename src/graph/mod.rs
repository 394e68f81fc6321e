//! Graph Executor: resolves a DAG of Node types declared by their
//! dependency signature, running independent nodes concurrently, memoizing
//! per run, and supporting protocol-based substitution.
//!
//! This is the load-bearing engine the other three (Cache, Saga,
//! Idempotency) slot into as ordinary node types; it carries no special
//! knowledge of them.

mod context;
mod node;
mod plan;

pub use context::{CancellationToken, RunContext};
pub use node::{ConstructFn, Dependency, DependencyKind, Node, NodeDescriptor, ResolvedDeps};
pub use plan::Plan;

use crate::error::{BoxError, Cancelled};
use std::sync::Arc;

/// Errors surfaced by plan building and resolution.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("cycle detected: {}", .0.join(" -> "))]
    Cycle(Vec<String>),
    #[error("unbound protocol: {0}")]
    UnboundProtocol(&'static str),
    #[error("node construction failed for {node}: {source}")]
    NodeConstruction { node: &'static str, source: BoxError },
    #[error("graph run cancelled")]
    Cancelled(#[from] Cancelled),
}

/// Pre-analyzes the transitive dependency DAG of `R` into a reusable
/// [`Plan`]. Detects cycles eagerly; the returned plan may be run many
/// times via `Arc::new(plan).run()`.
pub fn graph<R: Node>() -> Result<Plan<R>, GraphError> {
    Plan::build()
}

/// Convenience entry point for a root node with no injections: builds the
/// plan and runs it in one call.
pub async fn compose<R: Node>() -> Result<Arc<R>, GraphError> {
    Arc::new(graph::<R>()?).run().await
}
