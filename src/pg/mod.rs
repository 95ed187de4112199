//! # Proof Graph
//!
//! The latent-hypotheses set: a content-addressed, append-only DAG of
//! literal nodes, hypernodes (ordered node groups instantiating one side of
//! a rule), and edges (chaining or unification candidates), together with
//! every secondary index the enumerators and the ILP encoders query.
//!
//! ## Structure
//!
//! ```text
//! ProofGraph
//!   |-- nodes:      Vec<Node>            (dense ids, append-only)
//!   |-- hypernodes: Vec<Vec<NodeId>>     (ordered content, deduplicated)
//!   |-- edges:      Vec<Edge>            (HYPOTHESIZE / IMPLICATE / UNIFY)
//!   |-- maps:       predicate/term/depth/hypernode/unordered-hash indices
//!   |-- muex:       MutualExclusionTable
//!   `-- clusters:   ClusterSet           (term co-reference candidates)
//! ```
//!
//! Ids are dense indices into the arenas; cross-references are ids, never
//! owning pointers, so the graph has no ownership cycles. All secondary
//! indices are updated in the same call that appends an arena entry.
//!
//! Iteration order matters for reproducibility: every index stores node ids
//! in `BTreeSet`s so enumeration visits nodes in ascending id order.

use crate::ast::{Conjunction, Literal, Term};
use crate::kb::{Axiom, AxiomId, KnowledgeBase, PredicateId, EQ_PID};
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

pub mod cluster;
pub mod muex;
pub mod unify;

pub use cluster::ClusterSet;
pub use muex::MutualExclusionTable;
pub use unify::{unify_literals, unify_literals_with_symmetry, unify_terms, Unifier};

pub type NodeId = usize;
pub type HypernodeId = usize;
pub type EdgeId = usize;

/// Graph mutation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("duplicate observation: {0}")]
    DuplicateObservation(String),

    #[error("the proof graph is frozen after post-processing")]
    Frozen,
}

// ============================================================================
// Nodes and edges
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum NodeKind {
    Observable,
    Required,
    Hypothesis,
    Label,
}

/// One literal occurrence in the graph.
#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub literal: Literal,
    pub pid: PredicateId,
    pub kind: NodeKind,
    /// 0 for observables and requirements; `1 + max(tail)` for chain
    /// products; -1 for unification-born equality nodes and labels.
    pub depth: i32,
    /// The hypernode this node was introduced in, when it was produced by a
    /// chain edge.
    pub master: Option<HypernodeId>,
    /// Ancestor closure: the node ids whose joint truth justifies this node.
    pub evidence: BTreeSet<NodeId>,
}

impl Node {
    pub fn is_equality(&self) -> bool {
        self.literal.is_equality()
    }

    pub fn is_inequality(&self) -> bool {
        self.literal.is_inequality()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum EdgeKind {
    /// Backward chaining: head instantiates the rule's LHS.
    Hypothesize,
    /// Forward chaining: head instantiates the rule's RHS.
    Implicate,
    /// A candidate identification of the two nodes in the tail hypernode.
    Unify,
}

#[derive(Debug, Clone)]
pub struct Edge {
    pub id: EdgeId,
    pub kind: EdgeKind,
    pub tail: HypernodeId,
    /// `None` for a UNIFY edge whose literals already coincide.
    pub head: Option<HypernodeId>,
    pub axiom: Option<AxiomId>,
}

impl Edge {
    pub fn is_chain(&self) -> bool {
        matches!(self.kind, EdgeKind::Hypothesize | EdgeKind::Implicate)
    }

    pub fn is_unify(&self) -> bool {
        matches!(self.kind, EdgeKind::Unify)
    }
}

/// A right-unique predicate obligation: if both nodes hold and the key
/// terms co-refer, the value terms must be identified.
#[derive(Debug, Clone)]
pub struct RightUniqueObligation {
    pub n1: NodeId,
    pub n2: NodeId,
    pub key_unifier: Unifier,
    pub value_pair: (Term, Term),
}

// ============================================================================
// Secondary indices
// ============================================================================

#[derive(Debug, Default)]
struct GraphMaps {
    pid_to_nodes: HashMap<PredicateId, BTreeSet<NodeId>>,
    term_to_nodes: HashMap<Term, BTreeSet<NodeId>>,
    depth_to_nodes: HashMap<i32, BTreeSet<NodeId>>,
    node_to_hypernodes: HashMap<NodeId, BTreeSet<HypernodeId>>,
    hypernode_to_edges: HashMap<HypernodeId, BTreeSet<EdgeId>>,
    head_node_to_edges: HashMap<NodeId, BTreeSet<EdgeId>>,
    tail_node_to_edges: HashMap<NodeId, BTreeSet<EdgeId>>,
    ordered_nodes_to_hypernode: HashMap<Vec<NodeId>, HypernodeId>,
    unordered_hash_to_hypernodes: HashMap<u64, BTreeSet<HypernodeId>>,
    equality_nodes: HashMap<(Term, Term), NodeId>,
}

fn unordered_hash(ids: &[NodeId]) -> u64 {
    let mut sorted: Vec<NodeId> = ids.to_vec();
    sorted.sort_unstable();
    let mut hasher = DefaultHasher::new();
    sorted.hash(&mut hasher);
    hasher.finish()
}

// ============================================================================
// The graph
// ============================================================================

pub struct ProofGraph {
    name: String,
    kb: Arc<KnowledgeBase>,

    nodes: Vec<Node>,
    hypernodes: Vec<Vec<NodeId>>,
    edges: Vec<Edge>,

    observations: Vec<NodeId>,
    requirements: Vec<NodeId>,
    labels: Vec<NodeId>,
    choice_groups: Vec<Vec<NodeId>>,

    maps: GraphMaps,
    muex: MutualExclusionTable,
    clusters: ClusterSet,

    /// Unify-edge head hypernodes (groups of generated equality nodes).
    unification_hypernodes: HashSet<HypernodeId>,
    /// Node pairs already screened for a unification assumption.
    considered_unifications: HashSet<(NodeId, NodeId)>,
    /// Chains already performed, keyed by (ordered tail, axiom, backward).
    performed_chains: HashSet<(Vec<NodeId>, AxiomId, bool)>,

    fresh_counter: u64,
    timed_out: bool,
    frozen: bool,
}

impl ProofGraph {
    pub fn new(name: impl Into<String>, kb: Arc<KnowledgeBase>) -> Self {
        ProofGraph {
            name: name.into(),
            kb,
            nodes: Vec::new(),
            hypernodes: Vec::new(),
            edges: Vec::new(),
            observations: Vec::new(),
            requirements: Vec::new(),
            labels: Vec::new(),
            choice_groups: Vec::new(),
            maps: GraphMaps::default(),
            muex: MutualExclusionTable::new(),
            clusters: ClusterSet::new(),
            unification_hypernodes: HashSet::new(),
            considered_unifications: HashSet::new(),
            performed_chains: HashSet::new(),
            fresh_counter: 0,
            timed_out: false,
            frozen: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kb(&self) -> &Arc<KnowledgeBase> {
        &self.kb
    }

    // ------------------------------------------------------------------
    // Installation of problem literals
    // ------------------------------------------------------------------

    /// Insert an OBSERVABLE node at depth 0 and wire its mutual exclusions
    /// and unification assumptions against everything already present.
    pub fn add_observation(&mut self, literal: Literal) -> Result<NodeId, GraphError> {
        if self.frozen {
            return Err(GraphError::Frozen);
        }
        if self.observations.iter().any(|&o| {
            let n = &self.nodes[o].literal;
            n.predicate == literal.predicate
                && n.terms == literal.terms
                && n.negated == literal.negated
                && n.naf == literal.naf
        }) {
            return Err(GraphError::DuplicateObservation(literal.to_string()));
        }

        let id = self.add_node(literal, NodeKind::Observable, 0, None, BTreeSet::new());
        self.generate_mutual_exclusions(id);
        self.generate_unification_assumptions(id);
        self.observations.push(id);
        Ok(id)
    }

    /// Insert a REQUIRED node. Requirements pay no cost and are satisfied
    /// through unification with hypothesized or observed nodes.
    pub fn add_requirement(&mut self, literal: Literal) -> Result<NodeId, GraphError> {
        if self.frozen {
            return Err(GraphError::Frozen);
        }
        let id = self.add_node(literal, NodeKind::Required, 0, None, BTreeSet::new());
        self.generate_mutual_exclusions(id);
        self.generate_unification_assumptions(id);
        self.requirements.push(id);
        Ok(id)
    }

    /// Insert a known-true LABEL node (training only). Labels never seed
    /// chaining, so they sit outside the depth index at -1.
    pub fn add_label(&mut self, literal: Literal) -> Result<NodeId, GraphError> {
        if self.frozen {
            return Err(GraphError::Frozen);
        }
        let id = self.add_node(literal, NodeKind::Label, -1, None, BTreeSet::new());
        self.generate_mutual_exclusions(id);
        self.generate_unification_assumptions(id);
        self.labels.push(id);
        Ok(id)
    }

    /// Install a choice group: LABEL nodes of which the ILP layer will
    /// force exactly one active.
    pub fn add_choice_group(&mut self, literals: &Conjunction) -> Result<Vec<NodeId>, GraphError> {
        if self.frozen {
            return Err(GraphError::Frozen);
        }
        let mut group = Vec::with_capacity(literals.len());
        for lit in literals.iter() {
            let id = self.add_node(lit.clone(), NodeKind::Label, -1, None, BTreeSet::new());
            self.generate_mutual_exclusions(id);
            self.generate_unification_assumptions(id);
            group.push(id);
        }
        self.choice_groups.push(group.clone());
        Ok(group)
    }

    // ------------------------------------------------------------------
    // Chaining
    // ------------------------------------------------------------------

    pub fn backward_chain(&mut self, tail: &[NodeId], axiom: &Axiom) -> Option<HypernodeId> {
        self.chain(tail, axiom, true)
    }

    pub fn forward_chain(&mut self, tail: &[NodeId], axiom: &Axiom) -> Option<HypernodeId> {
        self.chain(tail, axiom, false)
    }

    /// Apply `axiom` to `tail`, instantiating the opposite side as new
    /// HYPOTHESIS nodes one depth below the deepest tail node.
    ///
    /// Returns `None` when the tail does not match the axiom side, a tail
    /// pair is ancestor-linked, or the same chain was already performed; a
    /// rejected chain is remembered and never retried.
    pub fn chain(&mut self, tail: &[NodeId], axiom: &Axiom, backward: bool) -> Option<HypernodeId> {
        if self.frozen || tail.is_empty() {
            return None;
        }
        let chain_key = (tail.to_vec(), axiom.id, backward);
        if self.performed_chains.contains(&chain_key) {
            return None;
        }
        self.performed_chains.insert(chain_key);

        // The tail must instantiate the matched side up to a consistent
        // variable mapping.
        let matched: Vec<&Literal> = axiom.matched_side(backward).chainable().collect();
        if matched.len() != tail.len() {
            return None;
        }
        let mut subst: HashMap<Term, Term> = HashMap::new();
        for (ax_lit, &n) in matched.iter().zip(tail) {
            let node = &self.nodes[n];
            if node.pid != self.kb.library().intern(&ax_lit.arity_string())
                || node.literal.negated != ax_lit.negated
                || node.literal.naf != ax_lit.naf
            {
                return None;
            }
            for (at, nt) in ax_lit.terms.iter().zip(&node.literal.terms) {
                if at.is_constant() {
                    if at != nt {
                        return None;
                    }
                } else if let Some(bound) = subst.get(at) {
                    if bound != nt {
                        return None;
                    }
                } else {
                    subst.insert(at.clone(), nt.clone());
                }
            }
        }

        // No tail node may sit in another tail node's ancestor closure.
        for (i, &a) in tail.iter().enumerate() {
            for &b in &tail[i + 1..] {
                if self.nodes[a].evidence.contains(&b) || self.nodes[b].evidence.contains(&a) {
                    return None;
                }
            }
        }

        let depth = tail.iter().map(|&n| self.nodes[n].depth).max().unwrap_or(0) + 1;
        let mut evidence: BTreeSet<NodeId> = tail.iter().copied().collect();
        for &n in tail {
            evidence.extend(self.nodes[n].evidence.iter().copied());
        }

        // Instantiate the opposite side; unbound variables become globally
        // fresh.
        let mut fresh: HashMap<Term, Term> = HashMap::new();
        let mut new_ids = Vec::new();
        for lit in &axiom.side(backward).literals {
            let mut inst = lit.clone();
            for t in &mut inst.terms {
                if t.is_variable() {
                    if let Some(bound) = subst.get(t) {
                        *t = bound.clone();
                    } else {
                        let minted = fresh
                            .entry(t.clone())
                            .or_insert_with(|| {
                                self.fresh_counter += 1;
                                Term::new(format!("_u{}", self.fresh_counter))
                            })
                            .clone();
                        *t = minted;
                    }
                }
            }
            let id = self.add_node(inst, NodeKind::Hypothesis, depth, None, evidence.clone());
            new_ids.push(id);
        }

        let tail_hn = self.find_or_add_hypernode(tail.to_vec());
        let head_hn = self.find_or_add_hypernode(new_ids.clone());
        for &n in &new_ids {
            self.nodes[n].master = Some(head_hn);
        }

        let kind = if backward {
            EdgeKind::Hypothesize
        } else {
            EdgeKind::Implicate
        };
        let edge_id = self.push_edge(kind, tail_hn, Some(head_hn), Some(axiom.id));
        debug!(
            edge = edge_id,
            axiom = %axiom.name,
            ?kind,
            tail = ?tail,
            head = ?new_ids,
            "chain"
        );

        // New nodes meet the rest of the graph.
        for &n in &new_ids {
            self.generate_mutual_exclusions(n);
            self.generate_unification_assumptions(n);
        }

        Some(head_hn)
    }

    // ------------------------------------------------------------------
    // Post-processing
    // ------------------------------------------------------------------

    /// Close unification candidates transitively, propagate right-unique
    /// exclusions, and freeze the graph. Calling twice is a no-op.
    pub fn post_process(&mut self) {
        if self.frozen {
            return;
        }

        // Transitive unification closure: for a~b and b~c, attempt a~c.
        // Insertion-time generation already screened every same-predicate
        // pair, so this converges immediately in practice; it remains as the
        // closure guarantee over pairs that became linkable late.
        loop {
            let mut partners: BTreeMap<NodeId, BTreeSet<NodeId>> = BTreeMap::new();
            for e in &self.edges {
                if e.is_unify() {
                    let hn = &self.hypernodes[e.tail];
                    partners.entry(hn[0]).or_default().insert(hn[1]);
                    partners.entry(hn[1]).or_default().insert(hn[0]);
                }
            }
            let mut to_try = Vec::new();
            for ps in partners.values() {
                for &a in ps {
                    for &c in ps {
                        if a < c
                            && !self.considered_unifications.contains(&(a, c))
                        {
                            to_try.push((a, c));
                        }
                    }
                }
            }
            let mut added = false;
            for (a, c) in to_try {
                if self.try_add_unify_edge(a, c).is_some() {
                    added = true;
                }
            }
            if !added {
                break;
            }
        }

        // Right-unique propagation: value terms that can never co-refer make
        // the pair exclusive whenever the key terms do.
        for (n1, n2, key_u, value_ok) in self.scan_right_unique_pairs() {
            if !value_ok {
                self.muex.add(n1, n2, key_u);
            }
        }

        self.frozen = true;
        debug!(
            nodes = self.nodes.len(),
            hypernodes = self.hypernodes.len(),
            edges = self.edges.len(),
            exclusions = self.muex.len(),
            "proof graph post-processed"
        );
    }

    /// Pairs of positive right-unique nodes: `(n1, n2, key unifier,
    /// values-can-unify)`.
    fn scan_right_unique_pairs(&self) -> Vec<(NodeId, NodeId, Unifier, bool)> {
        let mut out = Vec::new();
        let mut pids: Vec<PredicateId> = self
            .kb
            .properties()
            .iter()
            .filter(|(_, p)| p.right_unique)
            .map(|(pid, _)| *pid)
            .collect();
        pids.sort_unstable();

        for pid in pids {
            let Some(ids) = self.maps.pid_to_nodes.get(&pid) else {
                continue;
            };
            let ids: Vec<NodeId> = ids.iter().copied().collect();
            for (i, &a) in ids.iter().enumerate() {
                for &b in &ids[i + 1..] {
                    let (na, nb) = (&self.nodes[a], &self.nodes[b]);
                    if na.literal.negated || nb.literal.negated || na.literal.terms.len() < 2 {
                        continue;
                    }
                    let arity = na.literal.terms.len();
                    let mut key_u = Unifier::new();
                    let mut keys_ok = true;
                    for k in 0..arity - 1 {
                        keys_ok &=
                            unify_terms(&na.literal.terms[k], &nb.literal.terms[k], &mut key_u);
                    }
                    if !keys_ok {
                        continue; // keys can never co-refer
                    }
                    let mut val_u = Unifier::new();
                    let value_ok = unify_terms(
                        &na.literal.terms[arity - 1],
                        &nb.literal.terms[arity - 1],
                        &mut val_u,
                    );
                    out.push((a, b, key_u, value_ok));
                }
            }
        }
        out
    }

    /// The obligations the ILP layer must encode for right-unique
    /// predicates whose value terms can still be identified.
    pub fn right_unique_obligations(&self) -> Vec<RightUniqueObligation> {
        self.scan_right_unique_pairs()
            .into_iter()
            .filter(|(_, _, _, value_ok)| *value_ok)
            .filter_map(|(n1, n2, key_unifier, _)| {
                let (a, b) = (&self.nodes[n1], &self.nodes[n2]);
                let arity = a.literal.terms.len();
                let (va, vb) = (
                    a.literal.terms[arity - 1].clone(),
                    b.literal.terms[arity - 1].clone(),
                );
                if va == vb {
                    return None; // already identical, nothing to force
                }
                Some(RightUniqueObligation {
                    n1,
                    n2,
                    key_unifier,
                    value_pair: (va, vb),
                })
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // Internal mutation helpers
    // ------------------------------------------------------------------

    fn add_node(
        &mut self,
        literal: Literal,
        kind: NodeKind,
        depth: i32,
        master: Option<HypernodeId>,
        evidence: BTreeSet<NodeId>,
    ) -> NodeId {
        let pid = self.kb.library().intern(&literal.arity_string());
        let id = self.nodes.len();
        self.maps.pid_to_nodes.entry(pid).or_default().insert(id);
        for t in &literal.terms {
            self.maps
                .term_to_nodes
                .entry(t.clone())
                .or_default()
                .insert(id);
        }
        self.maps.depth_to_nodes.entry(depth).or_default().insert(id);
        self.nodes.push(Node {
            id,
            literal,
            pid,
            kind,
            depth,
            master,
            evidence,
        });
        id
    }

    fn add_hypernode(&mut self, ids: Vec<NodeId>) -> HypernodeId {
        let hn = self.hypernodes.len();
        self.maps
            .ordered_nodes_to_hypernode
            .insert(ids.clone(), hn);
        self.maps
            .unordered_hash_to_hypernodes
            .entry(unordered_hash(&ids))
            .or_default()
            .insert(hn);
        for &n in &ids {
            self.maps.node_to_hypernodes.entry(n).or_default().insert(hn);
        }
        self.hypernodes.push(ids);
        hn
    }

    fn find_or_add_hypernode(&mut self, ids: Vec<NodeId>) -> HypernodeId {
        if let Some(&hn) = self.maps.ordered_nodes_to_hypernode.get(&ids) {
            return hn;
        }
        self.add_hypernode(ids)
    }

    fn push_edge(
        &mut self,
        kind: EdgeKind,
        tail: HypernodeId,
        head: Option<HypernodeId>,
        axiom: Option<AxiomId>,
    ) -> EdgeId {
        let id = self.edges.len();
        self.maps.hypernode_to_edges.entry(tail).or_default().insert(id);
        if let Some(h) = head {
            self.maps.hypernode_to_edges.entry(h).or_default().insert(id);
            for &n in &self.hypernodes[h] {
                self.maps.head_node_to_edges.entry(n).or_default().insert(id);
            }
        }
        for n in self.hypernodes[tail].clone() {
            self.maps.tail_node_to_edges.entry(n).or_default().insert(id);
        }
        self.edges.push(Edge {
            id,
            kind,
            tail,
            head,
            axiom,
        });
        id
    }

    /// Record every exclusion the new node is part of.
    fn generate_mutual_exclusions(&mut self, idx: NodeId) {
        let lit = self.nodes[idx].literal.clone();
        let pid = self.nodes[idx].pid;

        if let Some(u) = self.self_conflict(&lit, pid) {
            self.muex.add(idx, idx, u);
        }
        for (j, u) in self.get_mutual_exclusions(&lit, pid) {
            if j != idx {
                self.muex.add(idx, j, u);
            }
        }
    }

    /// A condition under which the literal conflicts with itself
    /// (irreflexive and asymmetric predicates over identical argument
    /// pairs).
    fn self_conflict(&self, lit: &Literal, pid: PredicateId) -> Option<Unifier> {
        let props = self.kb.property(pid);
        if (!props.irreflexive && !props.asymmetric) || lit.terms.len() != 2 || lit.negated {
            return None;
        }
        if lit.terms[0] == lit.terms[1] {
            return Some(Unifier::new()); // impossible outright
        }
        let mut u = Unifier::new();
        if unify_terms(&lit.terms[0], &lit.terms[1], &mut u) {
            Some(u)
        } else {
            None // two distinct constants can never collapse
        }
    }

    /// Enumerate the nodes that conflict with `lit` under the predicate
    /// properties, with the unifier each conflict is conditioned on.
    pub fn get_mutual_exclusions(
        &self,
        lit: &Literal,
        pid: PredicateId,
    ) -> Vec<(NodeId, Unifier)> {
        let mut out = Vec::new();
        let props = self.kb.property(pid);
        let Some(ids) = self.maps.pid_to_nodes.get(&pid) else {
            return out;
        };

        for &j in ids {
            let other = &self.nodes[j].literal;
            if other.terms.len() != lit.terms.len() || other.naf != lit.naf {
                continue;
            }

            // Negation counterparts: p(..) vs !p(..) under the pairwise
            // unifier.
            if other.negated != lit.negated {
                let mut u = Unifier::new();
                let ok = lit
                    .terms
                    .iter()
                    .zip(&other.terms)
                    .all(|(a, b)| unify_terms(a, b, &mut u));
                if ok {
                    out.push((j, u));
                }
            }

            // Asymmetry: p(a,b) vs p(c,d) under {a~d, b~c}.
            if props.asymmetric
                && !lit.negated
                && other.negated == lit.negated
                && lit.terms.len() == 2
            {
                let mut u = Unifier::new();
                if unify_terms(&lit.terms[0], &other.terms[1], &mut u)
                    && unify_terms(&lit.terms[1], &other.terms[0], &mut u)
                {
                    out.push((j, u));
                }
            }
        }
        out
    }

    /// Screen the new node against every earlier node with the same
    /// predicate and record a UNIFY edge per consistent pairing.
    fn generate_unification_assumptions(&mut self, idx: NodeId) {
        if self.nodes[idx].pid == EQ_PID {
            return;
        }
        let partners: Vec<NodeId> = self
            .maps
            .pid_to_nodes
            .get(&self.nodes[idx].pid)
            .map(|s| s.iter().copied().filter(|&j| j < idx).collect())
            .unwrap_or_default();
        for j in partners {
            self.try_add_unify_edge(j, idx);
        }
    }

    /// Attempt one unification assumption between two nodes. Idempotent per
    /// pair: the first screening (successful or not) is final.
    fn try_add_unify_edge(&mut self, a: NodeId, b: NodeId) -> Option<EdgeId> {
        let (i, j) = (a.min(b), a.max(b));
        if i == j || !self.considered_unifications.insert((i, j)) {
            return None;
        }
        let (ni, nj) = (&self.nodes[i], &self.nodes[j]);
        if ni.pid != nj.pid || ni.pid == EQ_PID {
            return None;
        }
        // An ancestor never unifies with its own descendant.
        if ni.evidence.contains(&j) || nj.evidence.contains(&i) {
            return None;
        }
        let symmetric = self.kb.property(ni.pid).symmetric;
        let unifier = unify_literals_with_symmetry(&ni.literal, &nj.literal, symmetric)?;

        let mut evidence: BTreeSet<NodeId> = ni.evidence.union(&nj.evidence).copied().collect();
        evidence.insert(i);
        evidence.insert(j);

        let head = if unifier.is_empty() {
            None
        } else {
            let mut eq_ids = Vec::new();
            for (t1, t2) in unifier.pairs().to_vec() {
                let id = self.find_or_add_equality_node(&t1, &t2, &evidence);
                self.clusters.add(&t1, &t2);
                eq_ids.push(id);
            }
            Some(self.find_or_add_hypernode(eq_ids))
        };
        if let Some(h) = head {
            self.unification_hypernodes.insert(h);
        }

        let tail = self.find_or_add_hypernode(vec![i, j]);
        let edge = self.push_edge(EdgeKind::Unify, tail, head, None);
        Some(edge)
    }

    /// Equality nodes are deduplicated per term pair; a reused node absorbs
    /// the new edge's evidence so monotonicity holds for every unify edge
    /// pointing at it.
    fn find_or_add_equality_node(
        &mut self,
        t1: &Term,
        t2: &Term,
        evidence: &BTreeSet<NodeId>,
    ) -> NodeId {
        let key = if t1 <= t2 {
            (t1.clone(), t2.clone())
        } else {
            (t2.clone(), t1.clone())
        };
        if let Some(&id) = self.maps.equality_nodes.get(&key) {
            self.nodes[id].evidence.extend(evidence.iter().copied());
            return id;
        }
        let lit = Literal::equality(key.0.clone(), key.1.clone(), false);
        let id = self.add_node(lit, NodeKind::Hypothesis, -1, None, evidence.clone());
        self.maps.equality_nodes.insert(key, id);
        self.generate_mutual_exclusions(id); // (x=y) conflicts with (x!=y)
        id
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge(&self, id: EdgeId) -> &Edge {
        &self.edges[id]
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn hypernode(&self, id: HypernodeId) -> &[NodeId] {
        &self.hypernodes[id]
    }

    pub fn hypernodes(&self) -> &[Vec<NodeId>] {
        &self.hypernodes
    }

    pub fn observations(&self) -> &[NodeId] {
        &self.observations
    }

    pub fn requirements(&self) -> &[NodeId] {
        &self.requirements
    }

    pub fn labels(&self) -> &[NodeId] {
        &self.labels
    }

    pub fn choice_groups(&self) -> &[Vec<NodeId>] {
        &self.choice_groups
    }

    pub fn search_nodes_with_pid(&self, pid: PredicateId) -> Option<&BTreeSet<NodeId>> {
        self.maps.pid_to_nodes.get(&pid)
    }

    pub fn search_nodes_with_arity(&self, arity: &str) -> Option<&BTreeSet<NodeId>> {
        let pid = self.kb.library().lookup(arity)?;
        self.search_nodes_with_pid(pid)
    }

    pub fn search_nodes_with_term(&self, term: &Term) -> Option<&BTreeSet<NodeId>> {
        self.maps.term_to_nodes.get(term)
    }

    pub fn search_nodes_with_depth(&self, depth: i32) -> Option<&BTreeSet<NodeId>> {
        self.maps.depth_to_nodes.get(&depth)
    }

    pub fn hypernodes_with_node(&self, node: NodeId) -> Option<&BTreeSet<HypernodeId>> {
        self.maps.node_to_hypernodes.get(&node)
    }

    pub fn edges_with_hypernode(&self, hn: HypernodeId) -> Option<&BTreeSet<EdgeId>> {
        self.maps.hypernode_to_edges.get(&hn)
    }

    pub fn edges_with_node_in_head(&self, node: NodeId) -> Option<&BTreeSet<EdgeId>> {
        self.maps.head_node_to_edges.get(&node)
    }

    pub fn edges_with_node_in_tail(&self, node: NodeId) -> Option<&BTreeSet<EdgeId>> {
        self.maps.tail_node_to_edges.get(&node)
    }

    pub fn find_hypernode_with_ordered_nodes(&self, ids: &[NodeId]) -> Option<HypernodeId> {
        self.maps.ordered_nodes_to_hypernode.get(ids).copied()
    }

    pub fn find_hypernodes_with_unordered_nodes(
        &self,
        ids: &[NodeId],
    ) -> Option<&BTreeSet<HypernodeId>> {
        self.maps
            .unordered_hash_to_hypernodes
            .get(&unordered_hash(ids))
    }

    /// The chain edge that produced a hypernode, if any.
    pub fn find_parental_edge(&self, hn: HypernodeId) -> Option<EdgeId> {
        let edges = self.maps.hypernode_to_edges.get(&hn)?;
        edges
            .iter()
            .copied()
            .find(|&e| self.edges[e].is_chain() && self.edges[e].head == Some(hn))
    }

    pub fn find_parental_hypernode(&self, hn: HypernodeId) -> Option<HypernodeId> {
        self.find_parental_edge(hn).map(|e| self.edges[e].tail)
    }

    pub fn find_variable_cluster(&self, term: &Term) -> Option<&BTreeSet<Term>> {
        self.clusters.find_cluster(term)
    }

    pub fn clusters(&self) -> &ClusterSet {
        &self.clusters
    }

    pub fn find_equality_node(&self, t1: &Term, t2: &Term) -> Option<NodeId> {
        let key = if t1 <= t2 {
            (t1.clone(), t2.clone())
        } else {
            (t2.clone(), t1.clone())
        };
        self.maps.equality_nodes.get(&key).copied()
    }

    pub fn mutual_exclusions(&self) -> &MutualExclusionTable {
        &self.muex
    }

    pub fn search_mutual_exclusion(&self, n1: NodeId, n2: NodeId) -> Option<&Unifier> {
        self.muex.find(n1, n2)
    }

    /// False iff some pair carries an unconditional mutual exclusion. A
    /// conditional exclusion still permits coexistence by refusing its
    /// unifier, so only unconditional entries prune candidates.
    pub fn check_nodes_coexistability(&self, ids: &[NodeId]) -> bool {
        for (i, &a) in ids.iter().enumerate() {
            for &b in &ids[i + 1..] {
                if self.muex.find(a, b).is_some_and(Unifier::is_empty) {
                    return false;
                }
            }
        }
        true
    }

    pub fn is_unification_hypernode(&self, hn: HypernodeId) -> bool {
        self.unification_hypernodes.contains(&hn)
    }

    pub fn is_timed_out(&self) -> bool {
        self.timed_out
    }

    pub fn set_timed_out(&mut self) {
        self.timed_out = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Chain edges whose tail hypernode contains the node.
    pub fn out_chain_edges_of_node(&self, node: NodeId) -> Vec<EdgeId> {
        self.maps
            .tail_node_to_edges
            .get(&node)
            .map(|edges| {
                edges
                    .iter()
                    .copied()
                    .filter(|&e| self.edges[e].is_chain())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Unify edges whose tail contains the node.
    pub fn unify_edges_of_node(&self, node: NodeId) -> Vec<EdgeId> {
        self.maps
            .tail_node_to_edges
            .get(&node)
            .map(|edges| {
                edges
                    .iter()
                    .copied()
                    .filter(|&e| self.edges[e].is_unify())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Statement;
    use crate::kb::PredicateLibrary;
    use crate::parser::parse_statements;

    fn kb_from(src: &str) -> Arc<KnowledgeBase> {
        let lib = PredicateLibrary::new();
        let mut kb = KnowledgeBase::new(lib);
        for stmt in parse_statements(src).expect("parse") {
            match stmt {
                Statement::Rule(r) => {
                    kb.add_rule(r);
                }
                Statement::Property(p) => kb.add_property(&p),
                Statement::Problem(_) => {}
            }
        }
        kb.finalize(None);
        Arc::new(kb)
    }

    fn lit(pred: &str, terms: &[&str]) -> Literal {
        Literal::new(pred, terms.iter().map(|t| Term::new(*t)).collect())
    }

    #[test]
    fn duplicate_observation_fails() {
        let kb = kb_from("rule r { p(x) => q(x) }");
        let mut g = ProofGraph::new("t", kb);
        g.add_observation(lit("q", &["a"])).expect("first");
        let err = g.add_observation(lit("q", &["a"])).expect_err("second");
        assert!(matches!(err, GraphError::DuplicateObservation(_)));
    }

    #[test]
    fn backward_chain_builds_lhs_instantiation() {
        let kb = kb_from("rule r { eat(E, X, Y) ^ man(X) => apple(Y) }");
        let mut g = ProofGraph::new("t", kb.clone());
        let obs = g.add_observation(lit("apple", &["z"])).expect("observe");

        let axiom = kb.get_axiom(0).clone();
        let head = g.backward_chain(&[obs], &axiom).expect("chain");

        let head_nodes: Vec<NodeId> = g.hypernode(head).to_vec();
        assert_eq!(head_nodes.len(), 2);

        let eat = &g.node(head_nodes[0]);
        let man = &g.node(head_nodes[1]);
        assert_eq!(eat.literal.predicate, "eat");
        assert_eq!(man.literal.predicate, "man");
        // Observed argument propagates; the unbound ones are fresh.
        assert_eq!(eat.literal.terms[2], Term::new("z"));
        assert!(eat.literal.terms[0].is_fresh());
        assert!(eat.literal.terms[1].is_fresh());
        // Both LHS literals share the X binding.
        assert_eq!(eat.literal.terms[1], man.literal.terms[0]);

        // Depth, evidence and master bookkeeping.
        assert_eq!(eat.depth, 1);
        assert!(eat.evidence.contains(&obs));
        assert_eq!(eat.master, Some(head));

        // One HYPOTHESIZE edge with the observation as tail.
        let chain_edges: Vec<&Edge> = g.edges().iter().filter(|e| e.is_chain()).collect();
        assert_eq!(chain_edges.len(), 1);
        assert_eq!(chain_edges[0].kind, EdgeKind::Hypothesize);
        assert_eq!(g.hypernode(chain_edges[0].tail), &[obs]);
    }

    #[test]
    fn repeated_chain_is_deduplicated() {
        let kb = kb_from("rule r { p(x) => q(x) }");
        let mut g = ProofGraph::new("t", kb.clone());
        let obs = g.add_observation(lit("q", &["a"])).expect("observe");
        let axiom = kb.get_axiom(0).clone();
        assert!(g.backward_chain(&[obs], &axiom).is_some());
        assert!(g.backward_chain(&[obs], &axiom).is_none());
    }

    #[test]
    fn unify_edge_generated_between_same_predicate_nodes() {
        let kb = kb_from("rule r { p(x) => q(x) }");
        let mut g = ProofGraph::new("t", kb);
        let a = g.add_observation(lit("q", &["a"])).expect("a");
        let b = g.add_observation(lit("q", &["b"])).expect("b");

        let unify: Vec<&Edge> = g.edges().iter().filter(|e| e.is_unify()).collect();
        assert_eq!(unify.len(), 1);
        assert_eq!(g.hypernode(unify[0].tail), &[a, b]);

        // The head holds the generated (a = b) equality node.
        let head = unify[0].head.expect("equality head");
        assert!(g.is_unification_hypernode(head));
        let eq = g.node(g.hypernode(head)[0]);
        assert!(eq.is_equality());
        assert_eq!(eq.depth, -1);
        assert_eq!(eq.master, None);

        // Both constants joined a cluster.
        assert!(g.clusters().in_same_cluster(&Term::new("a"), &Term::new("b")));
    }

    #[test]
    fn identical_literals_unify_without_head() {
        let kb = kb_from("rule r { p(x) => q(x) }");
        let mut g = ProofGraph::new("t", kb);
        g.add_observation(lit("q", &["a"])).expect("obs");
        g.add_requirement(lit("q", &["a"])).expect("req");

        let unify: Vec<&Edge> = g.edges().iter().filter(|e| e.is_unify()).collect();
        assert_eq!(unify.len(), 1);
        assert!(unify[0].head.is_none());
    }

    #[test]
    fn ancestors_do_not_unify_with_descendants() {
        let kb = kb_from("rule r { q(x) => q(x) }");
        let mut g = ProofGraph::new("t", kb.clone());
        let obs = g.add_observation(lit("q", &["a"])).expect("observe");
        let axiom = kb.get_axiom(0).clone();
        let head = g.backward_chain(&[obs], &axiom).expect("chain");
        let child = g.hypernode(head)[0];

        // Same literal, but child's evidence contains the observation.
        assert!(g.node(child).evidence.contains(&obs));
        assert!(!g.edges().iter().any(|e| {
            e.is_unify() && g.hypernode(e.tail) == [obs, child]
        }));
    }

    #[test]
    fn asymmetric_swapped_nodes_cannot_coexist() {
        let kb = kb_from("property parent/2 { asymmetric, irreflexive }\nrule r { p(x) => q(x) }");
        let mut g = ProofGraph::new("t", kb);
        let a = g.add_observation(lit("parent", &["X", "Y"])).expect("a");
        let b = g.add_observation(lit("parent", &["Y", "X"])).expect("b");

        let u = g.search_mutual_exclusion(a, b).expect("exclusion");
        assert!(u.is_empty(), "swapped pair conflicts unconditionally");
        assert!(!g.check_nodes_coexistability(&[a, b]));
    }

    #[test]
    fn irreflexive_node_carries_self_conflict() {
        let kb = kb_from("property loves/2 { irreflexive }\nrule r { p(x) => q(x) }");
        let mut g = ProofGraph::new("t", kb);
        let n = g.add_observation(lit("loves", &["x", "y"])).expect("n");
        let u = g.search_mutual_exclusion(n, n).expect("self conflict");
        assert_eq!(u.len(), 1);
    }

    #[test]
    fn negation_counterparts_conflict() {
        let kb = kb_from("rule r { p(x) => q(x) }");
        let mut g = ProofGraph::new("t", kb);
        let a = g.add_observation(lit("p", &["c"])).expect("a");
        let b = g.add_observation(lit("p", &["d"]).negated()).expect("b");

        let u = g.search_mutual_exclusion(a, b).expect("exclusion");
        assert_eq!(u.len(), 1, "conflict is conditional on c=d");
        assert!(g.check_nodes_coexistability(&[a, b]));
    }

    #[test]
    fn labels_sit_outside_the_depth_index() {
        let kb = kb_from("rule r { p(x) => q(x) }");
        let mut g = ProofGraph::new("t", kb);
        g.add_observation(lit("q", &["a"])).expect("obs");
        let label = g.add_label(lit("q", &["b"])).expect("label");

        assert_eq!(g.node(label).kind, NodeKind::Label);
        assert_eq!(g.node(label).depth, -1);
        assert_eq!(g.labels(), &[label]);
        assert!(!g
            .search_nodes_with_depth(0)
            .expect("depth 0")
            .contains(&label));
        // Labels still meet the graph through unification assumptions.
        assert!(g.edges().iter().any(|e| e.is_unify()));
    }

    #[test]
    fn post_process_is_idempotent_and_freezes() {
        let kb = kb_from("rule r { p(x) => q(x) }");
        let mut g = ProofGraph::new("t", kb.clone());
        let obs = g.add_observation(lit("q", &["a"])).expect("observe");
        let axiom = kb.get_axiom(0).clone();
        g.backward_chain(&[obs], &axiom);

        g.post_process();
        let (n, h, e) = (g.node_count(), g.hypernodes().len(), g.edges().len());
        g.post_process();
        assert_eq!((n, h, e), (g.node_count(), g.hypernodes().len(), g.edges().len()));

        assert!(g.is_frozen());
        assert!(matches!(
            g.add_observation(lit("q", &["zz"])),
            Err(GraphError::Frozen)
        ));
        assert!(g.backward_chain(&[obs], &axiom).is_none());
    }

    #[test]
    fn transitive_unifications_are_closed() {
        let kb = kb_from("rule r { p(x) => q(x) }");
        let mut g = ProofGraph::new("t", kb);
        let a = g.add_observation(lit("q", &["a"])).expect("a");
        let b = g.add_observation(lit("q", &["b"])).expect("b");
        let c = g.add_observation(lit("q", &["c"])).expect("c");
        g.post_process();

        let mut pairs: Vec<(NodeId, NodeId)> = g
            .edges()
            .iter()
            .filter(|e| e.is_unify())
            .map(|e| (g.hypernode(e.tail)[0], g.hypernode(e.tail)[1]))
            .collect();
        pairs.sort_unstable();
        assert_eq!(pairs, vec![(a, b), (a, c), (b, c)]);
    }

    #[test]
    fn right_unique_obligations_cover_unifiable_values() {
        let kb = kb_from("property age/2 { right-unique }\nrule r { p(x) => q(x) }");
        let mut g = ProofGraph::new("t", kb);
        let a = g.add_observation(lit("age", &["John", "x"])).expect("a");
        let b = g.add_observation(lit("age", &["John", "y"])).expect("b");
        g.post_process();

        let obligations = g.right_unique_obligations();
        assert_eq!(obligations.len(), 1);
        let ob = &obligations[0];
        assert_eq!((ob.n1, ob.n2), (a, b));
        assert!(ob.key_unifier.is_empty(), "keys are already identical");
        assert_eq!(ob.value_pair, (Term::new("x"), Term::new("y")));
    }

    #[test]
    fn right_unique_constant_values_become_exclusions() {
        let kb = kb_from("property age/2 { right-unique }\nrule r { p(x) => q(x) }");
        let mut g = ProofGraph::new("t", kb);
        let a = g.add_observation(lit("age", &["John", "Four"])).expect("a");
        let b = g.add_observation(lit("age", &["John", "Five"])).expect("b");
        g.post_process();

        let u = g.search_mutual_exclusion(a, b).expect("exclusion");
        assert!(u.is_empty(), "same key, distinct constant values");
        assert!(!g.check_nodes_coexistability(&[a, b]));
    }

    #[test]
    fn chain_rejects_ancestor_linked_tails() {
        let kb = kb_from("rule r1 { p(x) => q(x) }\nrule r2 { t(x) => q(x) ^ p(x) }");
        let mut g = ProofGraph::new("t", kb.clone());
        let obs = g.add_observation(lit("q", &["a"])).expect("observe");

        // Backward through r1 gives the hypothesis p(a), a descendant of obs.
        let r1 = kb.get_axiom(0).clone();
        let head = g.backward_chain(&[obs], &r1).expect("chain r1");
        let p_node = g.hypernode(head)[0];
        assert!(g.node(p_node).evidence.contains(&obs));

        // r2 matches q(x) ^ p(x) backward, but a tail that mixes obs with
        // its own descendant is rejected.
        let r2 = kb.get_axiom(1).clone();
        assert!(g.chain(&[obs, p_node], &r2, true).is_none());
    }

    #[test]
    fn hypernode_lookup_by_ordered_and_unordered_content() {
        let kb = kb_from("rule r { p(x) ^ r(x) => q(x) }");
        let mut g = ProofGraph::new("t", kb.clone());
        let obs = g.add_observation(lit("q", &["a"])).expect("observe");
        let axiom = kb.get_axiom(0).clone();
        let head = g.backward_chain(&[obs], &axiom).expect("chain");

        let ids = g.hypernode(head).to_vec();
        assert_eq!(g.find_hypernode_with_ordered_nodes(&ids), Some(head));
        let mut reversed = ids.clone();
        reversed.reverse();
        assert_eq!(g.find_hypernode_with_ordered_nodes(&reversed), None);
        assert!(g
            .find_hypernodes_with_unordered_nodes(&reversed)
            .expect("hash hit")
            .contains(&head));
    }

    #[test]
    fn parental_edge_points_at_producing_chain() {
        let kb = kb_from("rule r { p(x) => q(x) }");
        let mut g = ProofGraph::new("t", kb.clone());
        let obs = g.add_observation(lit("q", &["a"])).expect("observe");
        let axiom = kb.get_axiom(0).clone();
        let head = g.backward_chain(&[obs], &axiom).expect("chain");

        let parent = g.find_parental_edge(head).expect("parental edge");
        assert!(g.edge(parent).is_chain());
        assert_eq!(g.edge(parent).head, Some(head));
        let tail_hn = g.find_parental_hypernode(head).expect("tail");
        assert_eq!(g.hypernode(tail_hn), &[obs]);
    }
}
