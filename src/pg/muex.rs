//! Mutual-exclusion table.
//!
//! A symmetric map from node pairs to the unifier under which the pair
//! conflicts: the two nodes cannot both hold while every pair of the
//! unifier co-refers. An empty unifier is an unconditional exclusion.
//!
//! Self-pairs are legal and encode single-node impossibility conditions
//! (e.g. an irreflexive predicate node conflicts with itself under the
//! unifier that identifies its two arguments).

use super::unify::Unifier;
use super::NodeId;
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct MutualExclusionTable {
    map: HashMap<(NodeId, NodeId), Unifier>,
}

impl MutualExclusionTable {
    pub fn new() -> Self {
        MutualExclusionTable::default()
    }

    fn key(n1: NodeId, n2: NodeId) -> (NodeId, NodeId) {
        (n1.min(n2), n1.max(n2))
    }

    /// Record an exclusion. An unconditional exclusion (empty unifier)
    /// always wins over a conditional one already stored.
    pub fn add(&mut self, n1: NodeId, n2: NodeId, unifier: Unifier) {
        let key = Self::key(n1, n2);
        match self.map.get(&key) {
            Some(existing) if existing.is_empty() => {}
            Some(_) if unifier.is_empty() => {
                self.map.insert(key, unifier);
            }
            Some(_) => {}
            None => {
                self.map.insert(key, unifier);
            }
        }
    }

    pub fn find(&self, n1: NodeId, n2: NodeId) -> Option<&Unifier> {
        self.map.get(&Self::key(n1, n2))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&(NodeId, NodeId), &Unifier)> {
        self.map.iter()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
