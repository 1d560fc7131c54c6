//! Cascade traversal over relationship slots

use crate::entity::{Entity, EntityKey};
use crate::error::Result;
use crate::schema::{CascadeOp, Schema};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Traversal statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CascadeStats {
    pub nodes_visited: usize,
    pub edges_followed: usize,
    pub max_depth_reached: u32,
    /// References that pointed at entities no longer present
    pub dangling_skipped: usize,
}

/// Entities reached by a cascade, in depth-first pre-order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CascadePlan {
    pub op: Option<CascadeOp>,
    pub order: Vec<EntityKey>,
    pub stats: CascadeStats,
}

impl CascadePlan {
    pub fn contains(&self, key: &EntityKey) -> bool {
        self.order.contains(key)
    }
}

/// Depth-first cascade walker
pub struct CascadeWalker;

impl CascadeWalker {
    /// Collect every entity reachable from `root` through slots whose cascade
    /// policy includes `op`
    ///
    /// Each `(type, id)` is visited once, so cyclic graphs terminate. Sibling
    /// slots are followed in relationship registration order and references
    /// in slot order. `load` reads the current state of an entity.
    pub fn walk<F>(schema: &Schema, root: &EntityKey, op: CascadeOp, mut load: F) -> Result<CascadePlan>
    where
        F: FnMut(&EntityKey) -> Result<Option<Entity>>,
    {
        let mut visited: HashSet<EntityKey> = HashSet::new();
        let mut stack: Vec<(EntityKey, u32)> = vec![(root.clone(), 0)];
        let mut plan = CascadePlan {
            op: Some(op),
            ..Default::default()
        };

        while let Some((key, depth)) = stack.pop() {
            if visited.contains(&key) {
                continue;
            }
            let Some(entity) = load(&key)? else {
                plan.stats.dangling_skipped += 1;
                continue;
            };
            visited.insert(key.clone());
            plan.order.push(key);
            plan.stats.nodes_visited += 1;
            plan.stats.max_depth_reached = plan.stats.max_depth_reached.max(depth);

            let mut children = Vec::new();
            for binding in schema.bindings(entity.entity_type()) {
                if !binding.cascade().includes(op) {
                    continue;
                }
                for next in entity.slot_keys(binding.slot()) {
                    plan.stats.edges_followed += 1;
                    if !visited.contains(&next) {
                        children.push((next, depth + 1));
                    }
                }
            }
            // Reverse so the first slot's first reference is popped first
            stack.extend(children.into_iter().rev());
        }

        tracing::debug!(
            "Cascade {:?} from {} reached {} entities over {} edges",
            op,
            root,
            plan.stats.nodes_visited,
            plan.stats.edges_followed
        );
        Ok(plan)
    }
}
