//! A*-style reachability-guided enumeration.
//!
//! Instead of sweeping whole depth tiers, this strategy keeps an agenda of
//! *reachability* records `source -> target` with `f = g + h`, where `g` is
//! the rule distance accumulated from an observation and `h` is the
//! knowledge base's predicate-pair distance to the target observation. The
//! cheapest record is expanded first; chains that cannot bring any pair of
//! observations closer are never performed, so unrelated rule clusters stay
//! unexplored.

use super::{candidates_for_node, seed_graph};
use crate::ast::Problem;
use crate::engine::timeout::Deadline;
use crate::kb::KnowledgeBase;
use crate::pg::{GraphError, NodeId, ProofGraph};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// One agenda entry: new hypotheses grown from `source` are expected to
/// close the remaining distance to `target`.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Reachability {
    pub source: NodeId,
    pub target: NodeId,
    /// Distance accumulated from the originating observation (g).
    pub dist_from: f32,
    /// Heuristic distance from here to the target's predicate (h).
    pub dist_to: f32,
}

impl Reachability {
    fn total(&self) -> f32 {
        self.dist_from + self.dist_to
    }
}

/// Priority agenda over reachability records: pop order is minimum
/// `f = g + h`, ties broken by insertion order; a reverse map supports the
/// erase operations of the main loop.
#[derive(Debug, Default)]
pub(crate) struct ReachabilityManager {
    list: Vec<Reachability>,
    map: HashMap<NodeId, HashMap<NodeId, f32>>,
}

impl ReachabilityManager {
    fn new() -> Self {
        ReachabilityManager::default()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.list.len()
    }

    /// Sorted insert: before the first entry with a strictly larger total,
    /// so equal totals keep insertion order. An entry dominated by one
    /// already present for the same (source, target) is dropped.
    pub(crate) fn push(&mut self, r: Reachability) {
        if let Some(existing) = self.map.get(&r.source).and_then(|m| m.get(&r.target)) {
            if *existing <= r.total() {
                return;
            }
            self.remove(r.source, r.target);
        }
        self.map
            .entry(r.source)
            .or_default()
            .insert(r.target, r.total());
        let pos = self
            .list
            .iter()
            .position(|e| e.total() > r.total())
            .unwrap_or(self.list.len());
        self.list.insert(pos, r);
    }

    /// The cheapest entry, left in place: expansion reads the agenda while
    /// the entry is still recorded, and `erase` retires it afterwards.
    pub(crate) fn top(&self) -> Option<&Reachability> {
        self.list.first()
    }

    pub(crate) fn pop(&mut self) -> Option<Reachability> {
        if self.list.is_empty() {
            return None;
        }
        let r = self.list.remove(0);
        if let Some(m) = self.map.get_mut(&r.source) {
            m.remove(&r.target);
            if m.is_empty() {
                self.map.remove(&r.source);
            }
        }
        Some(r)
    }

    fn remove(&mut self, source: NodeId, target: NodeId) {
        self.list
            .retain(|e| !(e.source == source && e.target == target));
        if let Some(m) = self.map.get_mut(&source) {
            m.remove(&target);
            if m.is_empty() {
                self.map.remove(&source);
            }
        }
    }

    /// Entries of one source node, as `target -> (dist_from, dist_to)`.
    pub(crate) fn entries_of(&self, source: NodeId) -> Vec<(NodeId, f32, f32)> {
        let Some(targets) = self.map.get(&source) else {
            return Vec::new();
        };
        let keys: HashSet<NodeId> = targets.keys().copied().collect();
        self.list
            .iter()
            .filter(|e| e.source == source && keys.contains(&e.target))
            .map(|e| (e.target, e.dist_from, e.dist_to))
            .collect()
    }

    /// Drop every entry whose source is in `from_set` and whose target is
    /// one of the targets currently recorded for `pivot`.
    pub(crate) fn erase(&mut self, from_set: &BTreeSet<NodeId>, pivot: NodeId) {
        let to_set: HashSet<NodeId> = self
            .map
            .get(&pivot)
            .map(|m| m.keys().copied().collect())
            .unwrap_or_default();
        if to_set.is_empty() {
            return;
        }
        let mut removed = Vec::new();
        self.list.retain(|e| {
            let doomed = from_set.contains(&e.source) && to_set.contains(&e.target);
            if doomed {
                removed.push((e.source, e.target));
            }
            !doomed
        });
        for (s, t) in removed {
            if let Some(m) = self.map.get_mut(&s) {
                m.remove(&t);
                if m.is_empty() {
                    self.map.remove(&s);
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct AStarEnumerator {
    /// Admissibility bound on `g + h`; negative means unbounded.
    pub max_distance: f32,
    /// Soft cap on the node count; enumeration aborts once exceeded.
    pub max_lhs_size: Option<usize>,
    pub do_deduction: bool,
    pub do_abduction: bool,
}

impl Default for AStarEnumerator {
    fn default() -> Self {
        AStarEnumerator {
            max_distance: -1.0,
            max_lhs_size: None,
            do_deduction: true,
            do_abduction: true,
        }
    }
}

impl AStarEnumerator {
    fn permissible(&self, dist: f32) -> bool {
        dist >= 0.0 && (self.max_distance < 0.0 || dist <= self.max_distance)
    }

    pub fn execute(
        &self,
        problem: &Problem,
        kb: &Arc<KnowledgeBase>,
        deadline: &Deadline,
    ) -> Result<ProofGraph, GraphError> {
        let mut graph = seed_graph(problem, kb)?;
        let mut manager = ReachabilityManager::new();
        self.initialize_reachability(&graph, &mut manager);
        debug!(pairs = manager.len(), "reachability agenda seeded");

        'agenda: while let Some(r) = manager.top().cloned() {
            if deadline.is_over() {
                graph.set_timed_out();
                break;
            }

            let mut from_set: BTreeSet<NodeId> = BTreeSet::new();
            from_set.insert(r.source);

            let cands =
                candidates_for_node(&graph, r.source, self.do_deduction, self.do_abduction);
            for cand in cands {
                if deadline.is_over() {
                    graph.set_timed_out();
                    break 'agenda;
                }

                let axiom = kb.get_axiom(cand.axiom).clone();
                let Some(projected) =
                    self.project_reachability(&graph, &manager, &cand.nodes, &axiom, cand.backward)
                else {
                    continue;
                };

                let Some(head) = graph.chain(&cand.nodes, &axiom, cand.backward) else {
                    continue;
                };
                let head_nodes: Vec<NodeId> = graph.hypernode(head).to_vec();

                for (k, &nk) in head_nodes.iter().enumerate() {
                    let Some(slot) = projected.get(k) else {
                        continue;
                    };
                    for &(target, dist_from, dist_to) in slot {
                        if self.is_satisfied(&graph, nk, target) {
                            continue;
                        }
                        manager.push(Reachability {
                            source: nk,
                            target,
                            dist_from,
                            dist_to,
                        });
                    }
                }
                from_set.extend(cand.nodes.iter().copied());

                if self
                    .max_lhs_size
                    .is_some_and(|cap| graph.node_count() > cap)
                {
                    debug!(nodes = graph.node_count(), "size cap hit, aborting");
                    graph.set_timed_out();
                    break 'agenda;
                }
            }

            manager.erase(&from_set, r.source);
        }

        graph.post_process();
        Ok(graph)
    }

    /// Seed the agenda with every admissible observation pair, both
    /// directions, `g = 0`.
    fn initialize_reachability(&self, graph: &ProofGraph, manager: &mut ReachabilityManager) {
        let obs = graph.observations();
        for (i, &o1) in obs.iter().enumerate() {
            for &o2 in &obs[i + 1..] {
                let dist = graph.kb().distance(graph.node(o1).pid, graph.node(o2).pid);
                if self.permissible(dist) {
                    manager.push(Reachability {
                        source: o1,
                        target: o2,
                        dist_from: 0.0,
                        dist_to: dist,
                    });
                    manager.push(Reachability {
                        source: o2,
                        target: o1,
                        dist_from: 0.0,
                        dist_to: dist,
                    });
                }
            }
        }
    }

    /// Forecast the reachability the chain's new nodes would inherit; one
    /// slot per instantiated literal. `None` when no slot keeps any
    /// admissible entry, in which case the chain is not worth performing.
    fn project_reachability(
        &self,
        graph: &ProofGraph,
        manager: &ReachabilityManager,
        from: &[NodeId],
        axiom: &crate::kb::Axiom,
        backward: bool,
    ) -> Option<Vec<Vec<(NodeId, f32, f32)>>> {
        let kb = graph.kb();

        // The joint ancestor closure of the tail; reachability into one's
        // own evidence is meaningless.
        let mut evidences: HashSet<NodeId> = HashSet::new();
        for &n in from {
            evidences.extend(graph.node(n).evidence.iter().copied());
        }

        // Best (minimum f) entry per target over every tail node.
        let mut best: HashMap<NodeId, (f32, f32)> = HashMap::new();
        for &n in from {
            for (target, dist_from, dist_to) in manager.entries_of(n) {
                if evidences.contains(&target) {
                    continue;
                }
                let total = dist_from + dist_to;
                if best
                    .get(&target)
                    .map_or(true, |(df, dt)| total < df + dt)
                {
                    best.insert(target, (dist_from, dist_to));
                }
            }
        }
        if best.is_empty() {
            return None;
        }

        let d0 = kb.axiom_distance(axiom);
        let literals = &axiom.side(backward).literals;
        let mut out: Vec<Vec<(NodeId, f32, f32)>> = vec![Vec::new(); literals.len()];
        let mut reaches_somewhere = false;

        let mut targets: Vec<(&NodeId, &(f32, f32))> = best.iter().collect();
        targets.sort_by_key(|(t, _)| **t);
        for (&target, &(dist_from, _)) in targets {
            let target_pid = graph.node(target).pid;
            for (i, lit) in literals.iter().enumerate() {
                if lit.predicate == crate::ast::EQ_PREDICATE {
                    continue;
                }
                let pid = kb.library().intern(&lit.arity_string());
                let dist_to = kb.distance(pid, target_pid);
                if dist_to < 0.0 {
                    continue;
                }
                let new_from = dist_from + d0;
                if self.permissible(new_from + dist_to) {
                    out[i].push((target, new_from, dist_to));
                    reaches_somewhere = true;
                }
            }
        }

        reaches_somewhere.then_some(out)
    }

    /// A reachability entry is satisfied when its target is already covered
    /// by the evidence closure of another node with the new node's
    /// predicate: the connection it asked for exists.
    fn is_satisfied(&self, graph: &ProofGraph, new_node: NodeId, target: NodeId) -> bool {
        let node = graph.node(new_node);
        if node.is_equality() || node.is_inequality() {
            return false;
        }
        let Some(same_pid) = graph.search_nodes_with_pid(node.pid) else {
            return false;
        };
        for &other in same_pid {
            if other == new_node {
                continue;
            }
            if other == target || graph.node(other).evidence.contains(&target) {
                return true;
            }
        }
        false
    }

    pub fn repr(&self) -> String {
        match (self.do_deduction, self.do_abduction) {
            (true, true) => "astar-enumerator".to_string(),
            (true, false) => "deductive-astar-enumerator".to_string(),
            (false, true) => "abductive-astar-enumerator".to_string(),
            (false, false) => "null-enumerator".to_string(),
        }
    }
}
