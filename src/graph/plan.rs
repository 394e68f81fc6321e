//! Plan build: transitive dependency collection, cycle detection, level
//! assignment.
//!
//! Grounded on `src/discovery/registry.rs`'s registry-of-descriptors shape,
//! generalized from a flat service map to a level-annotated DAG.

use super::node::{DependencyKind, Node, NodeDescriptor};
use super::GraphError;
use std::any::TypeId;
use std::collections::HashMap;
use std::marker::PhantomData;

/// An immutable, level-annotated topological sort of a root Node's
/// transitive dependency DAG. Built once via [`crate::graph::graph`] and
/// reusable across many [`crate::graph::context::RunContext`] runs.
pub struct Plan<R> {
    pub(super) root_type: TypeId,
    pub(super) descriptors: HashMap<TypeId, NodeDescriptor>,
    /// Node type ids grouped by level, ascending, declaration order
    /// preserved within a level.
    pub(super) levels: Vec<Vec<TypeId>>,
    _marker: PhantomData<fn() -> R>,
}

impl<R: Node> Plan<R> {
    pub fn build() -> Result<Self, GraphError> {
        let root = R::descriptor();
        let root_type = root.type_id;

        let mut descriptors = HashMap::new();
        let mut order = Vec::new();
        let mut stack: Vec<(TypeId, &'static str)> = Vec::new();
        let mut visiting = std::collections::HashSet::new();

        visit(root, &mut descriptors, &mut order, &mut stack, &mut visiting)?;

        let mut levels_by_id: HashMap<TypeId, usize> = HashMap::new();
        for id in &order {
            compute_level(*id, &descriptors, &mut levels_by_id);
        }

        let mut ordered_with_level: Vec<(usize, TypeId)> = order
            .iter()
            .map(|id| (levels_by_id[id], *id))
            .collect();
        ordered_with_level.sort_by_key(|(level, _)| *level);

        let mut levels: Vec<Vec<TypeId>> = Vec::new();
        let mut current = None;
        for (level, id) in ordered_with_level {
            if current != Some(level) {
                levels.push(Vec::new());
                current = Some(level);
            }
            levels.last_mut().unwrap().push(id);
        }

        Ok(Plan {
            root_type,
            descriptors,
            levels,
            _marker: PhantomData,
        })
    }

    /// Total number of distinct Node types reachable from the root.
    pub fn node_count(&self) -> usize {
        self.descriptors.len()
    }
}

fn visit(
    desc: NodeDescriptor,
    descriptors: &mut HashMap<TypeId, NodeDescriptor>,
    order: &mut Vec<TypeId>,
    stack: &mut Vec<(TypeId, &'static str)>,
    visiting: &mut std::collections::HashSet<TypeId>,
) -> Result<(), GraphError> {
    if visiting.contains(&desc.type_id) {
        let idx = stack
            .iter()
            .position(|(id, _)| *id == desc.type_id)
            .expect("type marked visiting must be on the stack");
        let mut cycle: Vec<String> = stack[idx..].iter().map(|(_, name)| name.to_string()).collect();
        cycle.push(desc.type_name.to_string());
        return Err(GraphError::Cycle(cycle));
    }
    if descriptors.contains_key(&desc.type_id) {
        return Ok(());
    }

    visiting.insert(desc.type_id);
    stack.push((desc.type_id, desc.type_name));

    for dep in desc.dependencies.clone() {
        if let DependencyKind::Concrete(ctor) = dep.kind {
            visit(ctor(), descriptors, order, stack, visiting)?;
        }
    }

    stack.pop();
    visiting.remove(&desc.type_id);

    let type_id = desc.type_id;
    order.push(type_id);
    descriptors.insert(type_id, desc);
    Ok(())
}

fn compute_level(
    id: TypeId,
    descriptors: &HashMap<TypeId, NodeDescriptor>,
    levels: &mut HashMap<TypeId, usize>,
) -> usize {
    if let Some(level) = levels.get(&id) {
        return *level;
    }
    let desc = &descriptors[&id];
    let mut max = 0usize;
    for dep in &desc.dependencies {
        if let DependencyKind::Concrete(_) = dep.kind {
            let dep_level = compute_level(dep.type_id, descriptors, levels) + 1;
            if dep_level > max {
                max = dep_level;
            }
        }
    }
    levels.insert(id, max);
    max
}
