//! Node declaration: type identity, dependency signature, async constructor.
//!
//! The recursive, reflection-free plan-building trick lives here: a
//! dependency on another Node type carries a zero-capture `fn() ->
//! NodeDescriptor` pointer (`D::descriptor`) rather than a generic type
//! parameter, so [`crate::graph::plan::Plan::build`] can walk the transitive
//! dependency graph knowing only the root's concrete type.

use super::GraphError;
use futures::future::BoxFuture;
use std::any::{Any, TypeId};
use std::sync::Arc;

/// Type-erased constructor: takes this node's resolved dependencies, yields
/// a type-erased instance or a construction error.
pub type ConstructFn = Arc<
    dyn Fn(ResolvedDeps) -> BoxFuture<'static, Result<Arc<dyn Any + Send + Sync>, GraphError>>
        + Send
        + Sync,
>;

/// How a declared dependency is satisfied: by constructing (or looking up
/// the memoized value of) another Node type, or by a protocol binding
/// resolved from injection at run time.
#[derive(Clone)]
pub enum DependencyKind {
    Concrete(fn() -> NodeDescriptor),
    Protocol,
}

/// One entry in a Node's declared dependency signature.
#[derive(Clone)]
pub struct Dependency {
    pub name: &'static str,
    pub type_id: TypeId,
    pub type_name: &'static str,
    pub kind: DependencyKind,
}

impl Dependency {
    /// Declares a dependency on another concrete Node type.
    pub fn concrete<D: Node>(name: &'static str) -> Self {
        Self {
            name,
            type_id: TypeId::of::<D>(),
            type_name: std::any::type_name::<D>(),
            kind: DependencyKind::Concrete(D::descriptor),
        }
    }

    /// Declares a dependency on a protocol (capability trait) that must be
    /// satisfied by injection. `P` is the trait object type, e.g. `dyn
    /// Charger`.
    pub fn protocol<P: ?Sized + 'static>(name: &'static str) -> Self {
        Self {
            name,
            type_id: TypeId::of::<P>(),
            type_name: std::any::type_name::<P>(),
            kind: DependencyKind::Protocol,
        }
    }
}

/// A pre-analyzed description of one Node type: identity, declared
/// dependencies, and a type-erased constructor.
#[derive(Clone)]
pub struct NodeDescriptor {
    pub type_id: TypeId,
    pub type_name: &'static str,
    pub dependencies: Vec<Dependency>,
    pub construct: ConstructFn,
}

/// A declared unit of computation. Identified by its Rust type; the plan
/// builder and run context key memoization, injection and cycle detection
/// off `TypeId::of::<Self>()`.
#[async_trait::async_trait]
pub trait Node: Send + Sync + Sized + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    /// This node's declared dependency signature, in declaration order.
    fn dependencies() -> Vec<Dependency>;

    /// Constructs this node from its resolved dependencies.
    async fn build(deps: &ResolvedDeps) -> Result<Self, Self::Error>;

    /// Zero-capture descriptor, referenced as a bare `fn() -> NodeDescriptor`
    /// from dependent nodes' `Dependency::concrete::<Self>()` calls.
    fn descriptor() -> NodeDescriptor {
        NodeDescriptor {
            type_id: TypeId::of::<Self>(),
            type_name: std::any::type_name::<Self>(),
            dependencies: Self::dependencies(),
            construct: Arc::new(|deps: ResolvedDeps| {
                Box::pin(async move {
                    Self::build(&deps).await.map(|v| Arc::new(v) as Arc<dyn Any + Send + Sync>).map_err(|e| {
                        GraphError::NodeConstruction {
                            node: std::any::type_name::<Self>(),
                            source: Box::new(e),
                        }
                    })
                })
            }),
        }
    }
}

/// The resolved arguments handed to a Node's constructor: concrete
/// dependency values already computed this run, and a view onto the
/// protocol bindings table for resolving capability dependencies.
pub struct ResolvedDeps {
    pub(super) concrete: std::collections::HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
    pub(super) protocols: Arc<std::collections::HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl ResolvedDeps {
    /// Fetches a concrete Node dependency. Panics if `D` was not declared
    /// (or not yet resolved) — a plan-construction invariant violation, not
    /// a runtime condition.
    pub fn get<D: Node>(&self) -> Arc<D> {
        self.concrete
            .get(&TypeId::of::<D>())
            .unwrap_or_else(|| panic!("dependency {} not resolved", std::any::type_name::<D>()))
            .clone()
            .downcast::<D>()
            .unwrap_or_else(|_| panic!("dependency {} type mismatch", std::any::type_name::<D>()))
    }

    /// Fetches a protocol binding. Returns `UnboundProtocol` if nothing was
    /// injected for `P` via `inject_as`.
    pub fn protocol<P: ?Sized + Send + Sync + 'static>(&self) -> Result<Arc<P>, GraphError> {
        let type_id = TypeId::of::<P>();
        let erased = self
            .protocols
            .get(&type_id)
            .ok_or(GraphError::UnboundProtocol(std::any::type_name::<P>()))?;
        let boxed = erased
            .clone()
            .downcast::<Arc<P>>()
            .map_err(|_| GraphError::UnboundProtocol(std::any::type_name::<P>()))?;
        Ok((*boxed).clone())
    }
}
