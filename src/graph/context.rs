//! Run Context: per-invocation injections, memoization, cancellation, and
//! resolution.
//!
//! Grounded on `src/discovery/registry.rs`'s `Arc<RwLock<HashMap<..>>>`
//! registry shape for the injection/binding tables; concurrent per-level
//! construction via `futures::future::try_join_all` mirrors the teacher's
//! preference for `futures` combinators over hand-rolled task spawning.

use super::node::{DependencyKind, Node, ResolvedDeps};
use super::plan::Plan;
use super::GraphError;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::future::IntoFuture;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Lightweight cancellation flag shared by a run. Checked between levels;
/// in-flight siblings within a level are cancelled by `try_join_all`
/// dropping their futures when one fails, not by polling this flag.
#[derive(Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-invocation state: pre-injected values, protocol bindings, and
/// (once `.await`ed) the memoization table built during resolution. Built
/// from a reusable [`Plan`] via [`Plan::run`]; single-shot.
pub struct RunContext<R> {
    plan: Arc<Plan<R>>,
    injections: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
    protocol_bindings: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
    cancellation: CancellationToken,
}

impl<R: Node> Plan<R> {
    /// Builds an empty Run Context for injection chaining.
    pub fn run(self: Arc<Self>) -> RunContext<R> {
        RunContext {
            plan: self,
            injections: HashMap::new(),
            protocol_bindings: HashMap::new(),
            cancellation: CancellationToken::new(),
        }
    }
}

impl<R: Node> RunContext<R> {
    /// Binds a concrete Node type to an already-constructed instance,
    /// short-circuiting its construction.
    pub fn inject<D: Node>(mut self, value: D) -> Self {
        self.injections
            .insert(TypeId::of::<D>(), Arc::new(value) as Arc<dyn Any + Send + Sync>);
        self
    }

    /// Convenience alias for [`RunContext::inject`] naming the primary input.
    pub fn given<D: Node>(self, value: D) -> Self {
        self.inject(value)
    }

    /// Binds a protocol to a concrete object satisfying it.
    pub fn inject_as<P: ?Sized + Send + Sync + 'static>(mut self, value: Arc<P>) -> Self {
        self.protocol_bindings
            .insert(TypeId::of::<P>(), Arc::new(value) as Arc<dyn Any + Send + Sync>);
        self
    }

    /// Token observers can use to request cancellation of this run.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Runs the plan level by level, returning the root node's computed
    /// value.
    pub async fn execute(self) -> Result<Arc<R>, GraphError> {
        let mut memo: HashMap<TypeId, Arc<dyn Any + Send + Sync>> = self.injections.clone();
        let protocols = Arc::new(self.protocol_bindings);

        for level in &self.plan.levels {
            if self.cancellation.is_cancelled() {
                return Err(GraphError::Cancelled(crate::error::Cancelled));
            }

            let pending: Vec<TypeId> = level
                .iter()
                .filter(|id| !memo.contains_key(id))
                .copied()
                .collect();

            if pending.is_empty() {
                continue;
            }

            debug!(level_size = pending.len(), "constructing graph level");

            let constructions = pending.iter().map(|type_id| {
                let desc = self.plan.descriptors[type_id].clone();
                let concrete: HashMap<TypeId, Arc<dyn Any + Send + Sync>> = desc
                    .dependencies
                    .iter()
                    .filter_map(|dep| match dep.kind {
                        DependencyKind::Concrete(_) => {
                            let value = memo
                                .get(&dep.type_id)
                                .unwrap_or_else(|| {
                                    panic!(
                                        "dependency {} for node {} not resolved before construction",
                                        dep.type_name, desc.type_name
                                    )
                                })
                                .clone();
                            Some((dep.type_id, value))
                        }
                        DependencyKind::Protocol => None,
                    })
                    .collect();
                let resolved = ResolvedDeps {
                    concrete,
                    protocols: protocols.clone(),
                };
                let type_id = *type_id;
                let construct = desc.construct.clone();
                async move { construct(resolved).await.map(|value| (type_id, value)) }
            });

            let results = futures::future::try_join_all(constructions).await?;
            for (type_id, value) in results {
                memo.insert(type_id, value);
            }
        }

        info!(nodes = self.plan.node_count(), "graph run complete");

        let root_value = memo
            .get(&self.plan.root_type)
            .expect("root type not present in memo after full resolution")
            .clone();
        Ok(root_value
            .downcast::<R>()
            .unwrap_or_else(|_| panic!("root node type mismatch for {}", std::any::type_name::<R>())))
    }
}

impl<R: Node> IntoFuture for RunContext<R> {
    type Output = Result<Arc<R>, GraphError>;
    type IntoFuture = Pin<Box<dyn std::future::Future<Output = Self::Output> + Send>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.execute())
    }
}
