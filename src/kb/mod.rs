//! # Knowledge Base
//!
//! Read-only lookup of weighted axioms by the predicates on either side,
//! predicate properties, and the predicate-pair distance oracle used by the
//! A* enumerator.
//!
//! The predicate library interns `predicate/arity` strings to dense integer
//! ids. Interning serializes behind a lock; lookups take the read path, so
//! after the steady state is reached readers never contend.
//!
//! A knowledge base is built by `compile` mode (see [`store`]) and loaded
//! read-only for inference; it is shared across worker threads without
//! further locking.

use crate::ast::{Conjunction, PredicateProperty, PropertyDecl, Rule};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

pub mod distance;
pub mod store;

/// Interned id of a `predicate/arity` string.
pub type PredicateId = u32;

/// Dense id of an axiom inside one knowledge base.
pub type AxiomId = u32;

/// The predicate id the equality predicate `=/2` always interns to.
pub const EQ_PID: PredicateId = 0;

/// Knowledge-base errors (persistence and compilation).
#[derive(Debug, Error)]
pub enum KbError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("encoding error: {0}")]
    Encode(#[from] bincode::Error),

    #[error("corrupt table {path}: {reason}")]
    Corrupt { path: String, reason: String },
}

pub type KbResult<T> = Result<T, KbError>;

// ============================================================================
// Predicate library
// ============================================================================

/// Process-wide interning of `predicate/arity` strings.
///
/// Handed to constructors explicitly (never a hidden singleton) so tests can
/// run with isolated libraries.
#[derive(Debug)]
pub struct PredicateLibrary {
    inner: RwLock<LibraryInner>,
}

#[derive(Debug, Default)]
struct LibraryInner {
    ids: HashMap<String, PredicateId>,
    names: Vec<String>,
}

impl PredicateLibrary {
    /// A fresh library; `=/2` is pre-interned as [`EQ_PID`].
    pub fn new() -> Arc<Self> {
        let lib = PredicateLibrary {
            inner: RwLock::new(LibraryInner::default()),
        };
        let eq = lib.intern("=/2");
        debug_assert_eq!(eq, EQ_PID);
        Arc::new(lib)
    }

    /// Intern an arity string, returning its id. Fast path is a read lock.
    pub fn intern(&self, arity: &str) -> PredicateId {
        if let Some(&id) = self.inner.read().ids.get(arity) {
            return id;
        }
        let mut inner = self.inner.write();
        if let Some(&id) = inner.ids.get(arity) {
            return id;
        }
        let id = inner.names.len() as PredicateId;
        inner.names.push(arity.to_string());
        inner.ids.insert(arity.to_string(), id);
        id
    }

    pub fn lookup(&self, arity: &str) -> Option<PredicateId> {
        self.inner.read().ids.get(arity).copied()
    }

    /// Name of an interned predicate. Panics on an unknown id: that is a
    /// programming error, never an input error.
    pub fn name(&self, id: PredicateId) -> String {
        self.inner.read().names[id as usize].clone()
    }

    pub fn len(&self) -> usize {
        self.inner.read().names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All interned names in id order (used by persistence).
    pub fn names(&self) -> Vec<String> {
        self.inner.read().names.clone()
    }
}

// ============================================================================
// Predicate properties
// ============================================================================

/// The property flags attached to one predicate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertySet {
    pub irreflexive: bool,
    pub symmetric: bool,
    pub asymmetric: bool,
    pub transitive: bool,
    pub right_unique: bool,
}

impl PropertySet {
    pub fn set(&mut self, prop: PredicateProperty) {
        match prop {
            PredicateProperty::Irreflexive => self.irreflexive = true,
            PredicateProperty::Symmetric => self.symmetric = true,
            PredicateProperty::Asymmetric => self.asymmetric = true,
            PredicateProperty::Transitive => self.transitive = true,
            PredicateProperty::RightUnique => self.right_unique = true,
        }
    }

    pub fn has(&self, prop: PredicateProperty) -> bool {
        match prop {
            PredicateProperty::Irreflexive => self.irreflexive,
            PredicateProperty::Symmetric => self.symmetric,
            PredicateProperty::Asymmetric => self.asymmetric,
            PredicateProperty::Transitive => self.transitive,
            PredicateProperty::RightUnique => self.right_unique,
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == PropertySet::default()
    }
}

// ============================================================================
// Axioms
// ============================================================================

/// A compiled axiom: a named implication with per-branch weights carried in
/// the literal and conjunction parameter strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Axiom {
    pub id: AxiomId,
    pub name: String,
    pub lhs: Conjunction,
    pub rhs: Conjunction,
}

impl Axiom {
    /// The side instantiated when chaining backward (`lhs`) or forward
    /// (`rhs`).
    pub fn side(&self, backward: bool) -> &Conjunction {
        if backward {
            &self.lhs
        } else {
            &self.rhs
        }
    }

    /// The side matched against existing nodes for the given direction.
    pub fn matched_side(&self, backward: bool) -> &Conjunction {
        if backward {
            &self.rhs
        } else {
            &self.lhs
        }
    }
}

// ============================================================================
// Knowledge base
// ============================================================================

/// The compiled, read-only rule store plus its secondary indices.
#[derive(Debug)]
pub struct KnowledgeBase {
    library: Arc<PredicateLibrary>,
    axioms: Vec<Axiom>,
    lhs_index: HashMap<PredicateId, Vec<AxiomId>>,
    rhs_index: HashMap<PredicateId, Vec<AxiomId>>,
    properties: HashMap<PredicateId, PropertySet>,
    distances: HashMap<(PredicateId, PredicateId), f32>,
}

const NO_AXIOMS: &[AxiomId] = &[];

impl KnowledgeBase {
    pub fn new(library: Arc<PredicateLibrary>) -> Self {
        KnowledgeBase {
            library,
            axioms: Vec::new(),
            lhs_index: HashMap::new(),
            rhs_index: HashMap::new(),
            properties: HashMap::new(),
            distances: HashMap::new(),
        }
    }

    pub fn library(&self) -> &Arc<PredicateLibrary> {
        &self.library
    }

    /// Register a rule; axiom ids ascend in insertion order.
    pub fn add_rule(&mut self, rule: Rule) -> AxiomId {
        let id = self.axioms.len() as AxiomId;
        let axiom = Axiom {
            id,
            name: rule.name,
            lhs: rule.lhs,
            rhs: rule.rhs,
        };
        for lit in axiom.lhs.chainable() {
            let pid = self.library.intern(&lit.arity_string());
            let ids = self.lhs_index.entry(pid).or_default();
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        for lit in axiom.rhs.chainable() {
            let pid = self.library.intern(&lit.arity_string());
            let ids = self.rhs_index.entry(pid).or_default();
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        self.axioms.push(axiom);
        id
    }

    pub fn add_property(&mut self, decl: &PropertyDecl) {
        let pid = self.library.intern(&decl.predicate);
        let set = self.properties.entry(pid).or_default();
        for p in &decl.properties {
            set.set(*p);
        }
    }

    /// Materialize the predicate-pair distance table. Call once after all
    /// rules are registered; `max_distance` bounds the stored entries.
    pub fn finalize(&mut self, max_distance: Option<f32>) {
        self.distances = distance::build_distance_table(self, max_distance);
    }

    /// Axioms whose LHS mentions the predicate (deductive candidates).
    pub fn axioms_with_lhs(&self, pid: PredicateId) -> &[AxiomId] {
        self.lhs_index.get(&pid).map_or(NO_AXIOMS, Vec::as_slice)
    }

    /// Axioms whose RHS mentions the predicate (abductive candidates).
    pub fn axioms_with_rhs(&self, pid: PredicateId) -> &[AxiomId] {
        self.rhs_index.get(&pid).map_or(NO_AXIOMS, Vec::as_slice)
    }

    /// Fetch an axiom. An unknown id is a programming error and panics.
    pub fn get_axiom(&self, id: AxiomId) -> &Axiom {
        &self.axioms[id as usize]
    }

    pub fn axioms(&self) -> &[Axiom] {
        &self.axioms
    }

    pub fn num_axioms(&self) -> usize {
        self.axioms.len()
    }

    /// Heuristic distance between two predicates: `0` for identical ids,
    /// `-1.0` when unreachable. Symmetric by construction.
    pub fn distance(&self, a: PredicateId, b: PredicateId) -> f32 {
        if a == b {
            return 0.0;
        }
        let key = (a.min(b), a.max(b));
        self.distances.get(&key).copied().unwrap_or(-1.0)
    }

    /// The cost an axiom contributes to a reachability path: its numeric
    /// parameter when one is given, else `1.0`.
    pub fn axiom_distance(&self, axiom: &Axiom) -> f32 {
        axiom
            .lhs
            .param_f64()
            .or_else(|| axiom.rhs.param_f64())
            .map_or(1.0, |d| d as f32)
    }

    pub fn property(&self, pid: PredicateId) -> PropertySet {
        self.properties.get(&pid).copied().unwrap_or_default()
    }

    pub(crate) fn properties(&self) -> &HashMap<PredicateId, PropertySet> {
        &self.properties
    }

    pub(crate) fn distances(&self) -> &HashMap<(PredicateId, PredicateId), f32> {
        &self.distances
    }

    pub(crate) fn lhs_index(&self) -> &HashMap<PredicateId, Vec<AxiomId>> {
        &self.lhs_index
    }

    pub(crate) fn rhs_index(&self) -> &HashMap<PredicateId, Vec<AxiomId>> {
        &self.rhs_index
    }
}
