//! Predicate-pair distance oracle.
//!
//! Treats the rule base as an undirected weighted graph over predicate ids:
//! every axiom links each of its LHS predicates to each of its RHS
//! predicates with the axiom's distance as the edge weight. The table holds
//! the shortest path between every reachable pair, capped by the configured
//! maximum so it stays sparse on large rule bases.
//!
//! The result is symmetric and satisfies the triangle inequality up to
//! floating-point rounding, which is what the A* admissibility check needs.

use super::{KnowledgeBase, PredicateId};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

/// Min-heap entry ordered by distance, ties by predicate id.
struct Visit {
    dist: f32,
    pid: PredicateId,
}

impl PartialEq for Visit {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Visit {}

impl PartialOrd for Visit {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Visit {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so BinaryHeap pops the smallest distance first.
        other
            .dist
            .total_cmp(&self.dist)
            .then_with(|| other.pid.cmp(&self.pid))
    }
}

/// Build the full sparse distance table for a knowledge base.
pub fn build_distance_table(
    kb: &KnowledgeBase,
    max_distance: Option<f32>,
) -> HashMap<(PredicateId, PredicateId), f32> {
    let mut adjacency: HashMap<PredicateId, Vec<(PredicateId, f32)>> = HashMap::new();
    for axiom in kb.axioms() {
        let weight = kb.axiom_distance(axiom);
        for l in axiom.lhs.chainable() {
            let lp = kb.library().intern(&l.arity_string());
            for r in axiom.rhs.chainable() {
                let rp = kb.library().intern(&r.arity_string());
                if lp == rp {
                    continue;
                }
                adjacency.entry(lp).or_default().push((rp, weight));
                adjacency.entry(rp).or_default().push((lp, weight));
            }
        }
    }

    let mut sources: Vec<PredicateId> = adjacency.keys().copied().collect();
    sources.sort_unstable();

    let mut table = HashMap::new();
    for &source in &sources {
        let reached = dijkstra(&adjacency, source, max_distance);
        for (target, dist) in reached {
            if target <= source {
                continue; // symmetric table keyed (min, max), self excluded
            }
            table.insert((source, target), dist);
        }
    }
    table
}

fn dijkstra(
    adjacency: &HashMap<PredicateId, Vec<(PredicateId, f32)>>,
    source: PredicateId,
    max_distance: Option<f32>,
) -> HashMap<PredicateId, f32> {
    let mut best: HashMap<PredicateId, f32> = HashMap::new();
    let mut heap = BinaryHeap::new();
    best.insert(source, 0.0);
    heap.push(Visit {
        dist: 0.0,
        pid: source,
    });

    while let Some(Visit { dist, pid }) = heap.pop() {
        if best.get(&pid).is_some_and(|&d| dist > d) {
            continue;
        }
        let Some(neighbors) = adjacency.get(&pid) else {
            continue;
        };
        for &(next, weight) in neighbors {
            let candidate = dist + weight;
            if max_distance.is_some_and(|cap| candidate > cap) {
                continue;
            }
            if best.get(&next).map_or(true, |&d| candidate < d) {
                best.insert(next, candidate);
                heap.push(Visit {
                    dist: candidate,
                    pid: next,
                });
            }
        }
    }

    best.remove(&source);
    best
}

#[cfg(test)]
mod tests {
    use crate::ast::Statement;
    use crate::kb::{KnowledgeBase, PredicateLibrary};
    use crate::parser::parse_statements;

    fn kb_from(src: &str) -> KnowledgeBase {
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
        kb
    }

    #[test]
    fn direct_rule_gives_unit_distance() {
        let kb = kb_from("rule r { p(x) => q(x) }");
        let p = kb.library().lookup("p/1").expect("p");
        let q = kb.library().lookup("q/1").expect("q");
        assert_eq!(kb.distance(p, q), 1.0);
        assert_eq!(kb.distance(q, p), 1.0);
        assert_eq!(kb.distance(p, p), 0.0);
    }

    #[test]
    fn chained_rules_add_up() {
        let kb = kb_from("rule r1 { p(x) => q(x) }\nrule r2 { q(x) => r(x) }");
        let p = kb.library().lookup("p/1").expect("p");
        let r = kb.library().lookup("r/1").expect("r");
        assert_eq!(kb.distance(p, r), 2.0);
    }

    #[test]
    fn disconnected_predicates_are_unreachable() {
        let kb = kb_from("rule r1 { p(x) => q(x) }\nrule r2 { a(x) => b(x) }");
        let p = kb.library().lookup("p/1").expect("p");
        let b = kb.library().lookup("b/1").expect("b");
        assert_eq!(kb.distance(p, b), -1.0);
    }

    #[test]
    fn cap_prunes_long_paths() {
        let lib = PredicateLibrary::new();
        let mut kb = KnowledgeBase::new(lib);
        for stmt in
            parse_statements("rule r1 { p(x) => q(x) }\nrule r2 { q(x) => r(x) }").expect("parse")
        {
            if let Statement::Rule(r) = stmt {
                kb.add_rule(r);
            }
        }
        kb.finalize(Some(1.0));
        let p = kb.library().lookup("p/1").expect("p");
        let q = kb.library().lookup("q/1").expect("q");
        let r = kb.library().lookup("r/1").expect("r");
        assert_eq!(kb.distance(p, q), 1.0);
        assert_eq!(kb.distance(p, r), -1.0);
    }

    #[test]
    fn shorter_of_two_paths_wins() {
        let kb = kb_from(
            "rule long1 { p(x) => m(x) }\nrule long2 { m(x) => q(x) }\n\
             rule short { {p(x)}:0.5 => q(x) }",
        );
        let p = kb.library().lookup("p/1").expect("p");
        let q = kb.library().lookup("q/1").expect("q");
        assert_eq!(kb.distance(p, q), 0.5);
    }
}
