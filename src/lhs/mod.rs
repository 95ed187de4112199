//! # LHS Enumeration
//!
//! The subsystem that grows the proof graph from the observations: given a
//! seeded graph, repeatedly find tail tuples that instantiate one side of
//! an axiom and chain through it, until a fixpoint, depth bound, size
//! bound, or the deadline.
//!
//! Two strategies are built in:
//!
//! - [`depth::DepthEnumerator`]: breadth-first by node depth, bounded by
//!   `max_depth`.
//! - [`astar::AStarEnumerator`]: guided by observation-pair reachability
//!   with the knowledge base's predicate distance as the heuristic.
//!
//! Reproducibility: nodes are visited in ascending id order, axioms in
//! ascending id order, and candidate tail tuples in lexicographic order of
//! their node-id vectors (all collections below are B-tree based).

use crate::ast::Problem;
use crate::engine::timeout::Deadline;
use crate::kb::{AxiomId, KnowledgeBase, PredicateId};
use crate::pg::{GraphError, NodeId, NodeKind, ProofGraph};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

pub mod astar;
pub mod depth;

pub use astar::AStarEnumerator;
pub use depth::DepthEnumerator;

/// One prospective chain application.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ChainCandidate {
    pub nodes: Vec<NodeId>,
    pub axiom: AxiomId,
    pub backward: bool,
}

/// The operation contract a custom enumerator implements.
pub type EnumeratorFn = Arc<
    dyn Fn(&Problem, &Arc<KnowledgeBase>, &Deadline) -> Result<ProofGraph, GraphError>
        + Send
        + Sync,
>;

/// Enumerator polymorphism: the two built-in strategies plus user-supplied
/// ones registered by name.
#[derive(Clone)]
pub enum LhsEnumerator {
    Depth(DepthEnumerator),
    AStar(AStarEnumerator),
    Custom { name: String, run: EnumeratorFn },
}

impl LhsEnumerator {
    pub fn execute(
        &self,
        problem: &Problem,
        kb: &Arc<KnowledgeBase>,
        deadline: &Deadline,
    ) -> Result<ProofGraph, GraphError> {
        match self {
            LhsEnumerator::Depth(e) => e.execute(problem, kb, deadline),
            LhsEnumerator::AStar(e) => e.execute(problem, kb, deadline),
            LhsEnumerator::Custom { run, .. } => run(problem, kb, deadline),
        }
    }

    pub fn repr(&self) -> String {
        match self {
            LhsEnumerator::Depth(e) => e.repr(),
            LhsEnumerator::AStar(e) => e.repr(),
            LhsEnumerator::Custom { name, .. } => format!("custom-enumerator({name})"),
        }
    }
}

/// Seed a fresh graph with the problem's observations, requirements, and
/// choice groups.
pub fn seed_graph(problem: &Problem, kb: &Arc<KnowledgeBase>) -> Result<ProofGraph, GraphError> {
    let mut graph = ProofGraph::new(problem.name.clone(), kb.clone());
    for lit in problem.observe.iter() {
        graph.add_observation(lit.clone())?;
    }
    for lit in problem.require.iter() {
        graph.add_requirement(lit.clone())?;
    }
    for group in &problem.choices {
        graph.add_choice_group(group)?;
    }
    Ok(graph)
}

/// How a tail tuple must relate to the enumeration frontier.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Pivot {
    /// Every tuple must contain this node (A* expansion).
    Node(NodeId),
    /// Nodes at most this deep; every tuple holds at least one node exactly
    /// this deep (depth-based expansion).
    Depth(i32),
}

/// The axioms applicable to a node, with the chaining direction for each:
/// LHS occurrences chain forward, RHS occurrences chain backward.
pub(crate) fn applicable_axioms(
    kb: &KnowledgeBase,
    pid: PredicateId,
    do_deduction: bool,
    do_abduction: bool,
) -> BTreeSet<(AxiomId, bool)> {
    let mut out = BTreeSet::new();
    if do_deduction {
        for &ax in kb.axioms_with_lhs(pid) {
            out.insert((ax, false));
        }
    }
    if do_abduction {
        for &ax in kb.axioms_with_rhs(pid) {
            out.insert((ax, true));
        }
    }
    out
}

/// Enumerate every tail tuple over nodes with the given predicates, subject
/// to the pivot, excluding REQUIRED nodes and tuples with an unconditional
/// mutual exclusion inside.
pub(crate) fn enumerate_tail_tuples(
    graph: &ProofGraph,
    pids: &[PredicateId],
    pivot: Pivot,
) -> Vec<Vec<NodeId>> {
    let mut slots: Vec<Vec<NodeId>> = Vec::with_capacity(pids.len());
    for &pid in pids {
        let Some(ids) = graph.search_nodes_with_pid(pid) else {
            return Vec::new();
        };
        let slot: Vec<NodeId> = ids
            .iter()
            .copied()
            .filter(|&n| {
                let node = graph.node(n);
                if node.kind == NodeKind::Required {
                    return false;
                }
                match pivot {
                    Pivot::Node(_) => true,
                    Pivot::Depth(d) => node.depth >= 0 && node.depth <= d,
                }
            })
            .collect();
        if slot.is_empty() {
            return Vec::new();
        }
        slots.push(slot);
    }
    if slots.is_empty() {
        return Vec::new();
    }

    // Odometer over the candidate slots, in lexicographic node-id order.
    let mut out = Vec::new();
    let mut indices = vec![0usize; slots.len()];
    loop {
        let tuple: Vec<NodeId> = indices
            .iter()
            .enumerate()
            .map(|(i, &k)| slots[i][k])
            .collect();

        let anchored = match pivot {
            Pivot::Node(n) => tuple.contains(&n),
            Pivot::Depth(d) => tuple.iter().any(|&n| graph.node(n).depth == d),
        };
        if anchored && graph.check_nodes_coexistability(&tuple) {
            out.push(tuple);
        }

        // Increment, least-significant slot last so output stays sorted.
        let mut i = slots.len();
        loop {
            if i == 0 {
                return out;
            }
            i -= 1;
            indices[i] += 1;
            if indices[i] < slots[i].len() {
                break;
            }
            indices[i] = 0;
        }
    }
}

/// All chain candidates anchored at one node.
pub(crate) fn candidates_for_node(
    graph: &ProofGraph,
    node: NodeId,
    do_deduction: bool,
    do_abduction: bool,
) -> BTreeSet<ChainCandidate> {
    let kb = graph.kb().clone();
    let pid = graph.node(node).pid;
    let mut out = BTreeSet::new();

    for (axiom_id, backward) in applicable_axioms(&kb, pid, do_deduction, do_abduction) {
        let axiom = kb.get_axiom(axiom_id);
        let pids: Vec<PredicateId> = axiom
            .matched_side(backward)
            .chainable()
            .map(|l| kb.library().intern(&l.arity_string()))
            .collect();
        if pids.is_empty() {
            continue;
        }
        for nodes in enumerate_tail_tuples(graph, &pids, Pivot::Node(node)) {
            out.insert(ChainCandidate {
                nodes,
                axiom: axiom_id,
                backward,
            });
        }
    }
    out
}

/// All chain candidates anchored at a depth frontier, grouped by axiom.
pub(crate) fn candidates_at_depth(
    graph: &ProofGraph,
    depth: i32,
    do_deduction: bool,
    do_abduction: bool,
) -> HashMap<AxiomId, BTreeSet<ChainCandidate>> {
    let kb = graph.kb().clone();
    let mut axioms: BTreeSet<(AxiomId, bool)> = BTreeSet::new();
    if let Some(nodes) = graph.search_nodes_with_depth(depth) {
        for &n in nodes {
            axioms.extend(applicable_axioms(
                &kb,
                graph.node(n).pid,
                do_deduction,
                do_abduction,
            ));
        }
    }

    let mut out: HashMap<AxiomId, BTreeSet<ChainCandidate>> = HashMap::new();
    for (axiom_id, backward) in axioms {
        let axiom = kb.get_axiom(axiom_id);
        let pids: Vec<PredicateId> = axiom
            .matched_side(backward)
            .chainable()
            .map(|l| kb.library().intern(&l.arity_string()))
            .collect();
        if pids.is_empty() {
            continue;
        }
        for nodes in enumerate_tail_tuples(graph, &pids, Pivot::Depth(depth)) {
            out.entry(axiom_id).or_default().insert(ChainCandidate {
                nodes,
                axiom: axiom_id,
                backward,
            });
        }
    }
    out
}
