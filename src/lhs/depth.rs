//! Depth-bounded enumeration.
//!
//! Expands the graph one depth tier at a time: the frontier at depth `d`
//! determines the applicable axioms, every tail tuple touching the frontier
//! chains, and the products land at depth `d + 1`. Stops at the depth
//! bound, at an empty frontier, at the size cap, or at the deadline.

use super::{candidates_at_depth, seed_graph};
use crate::ast::Problem;
use crate::engine::timeout::Deadline;
use crate::kb::KnowledgeBase;
use crate::pg::{GraphError, ProofGraph};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct DepthEnumerator {
    /// `None` removes the depth bound.
    pub max_depth: Option<u32>,
    /// Soft cap on the node count; enumeration aborts once exceeded.
    pub max_lhs_size: Option<usize>,
    pub do_deduction: bool,
    pub do_abduction: bool,
}

impl Default for DepthEnumerator {
    fn default() -> Self {
        DepthEnumerator {
            max_depth: Some(3),
            max_lhs_size: None,
            do_deduction: true,
            do_abduction: true,
        }
    }
}

impl DepthEnumerator {
    pub fn execute(
        &self,
        problem: &Problem,
        kb: &Arc<KnowledgeBase>,
        deadline: &Deadline,
    ) -> Result<ProofGraph, GraphError> {
        let mut graph = seed_graph(problem, kb)?;

        'tiers: for depth in 0.. {
            if self.max_depth.is_some_and(|m| depth >= m) {
                break;
            }
            let depth = depth as i32;
            if graph.search_nodes_with_depth(depth).is_none() {
                break;
            }

            let by_axiom: BTreeMap<_, _> =
                candidates_at_depth(&graph, depth, self.do_deduction, self.do_abduction)
                    .into_iter()
                    .collect();
            if by_axiom.is_empty() {
                break;
            }

            for (axiom_id, cands) in by_axiom {
                let axiom = kb.get_axiom(axiom_id).clone();
                for cand in cands {
                    if deadline.is_over() {
                        graph.set_timed_out();
                        break 'tiers;
                    }
                    graph.chain(&cand.nodes, &axiom, cand.backward);
                    if self
                        .max_lhs_size
                        .is_some_and(|cap| graph.node_count() > cap)
                    {
                        debug!(nodes = graph.node_count(), "size cap hit, aborting");
                        graph.set_timed_out();
                        break 'tiers;
                    }
                }
            }
        }

        graph.post_process();
        Ok(graph)
    }

    pub fn repr(&self) -> String {
        let depth = self.max_depth.map_or(-1, |d| d as i64);
        match (self.do_deduction, self.do_abduction) {
            (true, true) => format!("depth-enumerator(depth={depth})"),
            (true, false) => format!("deductive-depth-enumerator(depth={depth})"),
            (false, true) => format!("abductive-depth-enumerator(depth={depth})"),
            (false, false) => "null-enumerator".to_string(),
        }
    }
}
