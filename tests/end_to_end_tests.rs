//! End-to-End Inference Scenarios
//!
//! Full-pipeline tests: parse → compile → enumerate → convert → solve →
//! interpret. Each scenario pins one load-bearing behavior of the engine:
//! backward chaining costs, unification savings, property-driven
//! infeasibility, requirements, timeouts, and reachability pruning.

use dav::engine::{collect_problems, compile_knowledge_base, ComponentRegistry, Engine};
use dav::kb::PredicateLibrary;
use dav::parser::parse_statements;
use dav::pg::EdgeKind;
use dav::{Config, InferenceOutcome, NodeKind, SolutionState};
use std::sync::Arc;

fn engine_with(kb_src: &str, config: Config) -> Engine {
    let statements = parse_statements(kb_src).expect("parse kb");
    let kb = compile_knowledge_base(statements, PredicateLibrary::new(), None);
    Engine::from_config(Arc::new(kb), &config, &ComponentRegistry::new()).expect("engine")
}

fn run(kb_src: &str, problem_src: &str, config: Config) -> InferenceOutcome {
    let engine = engine_with(kb_src, config);
    let problems = collect_problems(&parse_statements(problem_src).expect("parse problem"));
    engine.infer_one(problems[0].clone()).expect("infer")
}

/// One backward tier only: with a sub-unit axiom weight, deeper
/// re-derivation chains would keep discounting the optimum and the exact
/// cost assertions below would chase the depth bound.
fn weighted_config(axiom_weight: &str) -> Config {
    let mut config = Config::default();
    config.params.set("default-axiom-weight", axiom_weight);
    config.params.set("max-depth", "1");
    config
}

const APPLE_KB: &str = "rule r { eat(E, X, Y) ^ man(X) => apple(Y) }";

// ----------------------------------------------------------------------------
// S1: single rule backward chain
// ----------------------------------------------------------------------------

#[test]
fn s1_single_backward_chain_pays_weighted_cost() {
    // Axiom weight 0.8 splits to 0.4 per LHS literal: backchaining costs
    // 0.8 * 10 = 8 against paying the observation's 10.
    let outcome = run(
        APPLE_KB,
        "problem s1 { observe { apple(z) } }",
        weighted_config("0.8"),
    );

    // One HYPOTHESIZE edge, two hypothesis literals.
    let chains: Vec<_> = outcome
        .graph
        .edges()
        .iter()
        .filter(|e| e.is_chain())
        .collect();
    assert_eq!(chains.len(), 1);
    assert_eq!(chains[0].kind, EdgeKind::Hypothesize);

    let hypotheses: Vec<_> = outcome
        .graph
        .nodes()
        .iter()
        .filter(|n| n.kind == NodeKind::Hypothesis && !n.is_equality())
        .collect();
    assert_eq!(hypotheses.len(), 2);

    // The chain wins: both hypotheses active at the weighted cost.
    assert_eq!(outcome.solution.state, SolutionState::Optimal);
    let active = outcome.active_nodes();
    for h in &hypotheses {
        assert!(active.contains(&h.id), "hypothesis {} inactive", h.id);
    }
    assert!(
        (outcome.solution.objective - 8.0).abs() < 1e-6,
        "expected 0.8 x 10, got {}",
        outcome.solution.objective
    );
}

#[test]
fn s1_expensive_axiom_leaves_observation_unexplained() {
    // With the stock 1.2 weight, chaining costs 12 > 10: the best
    // explanation is to pay for the observation itself.
    let outcome = run(
        APPLE_KB,
        "problem s1b { observe { apple(z) } }",
        Config::default(),
    );
    assert_eq!(outcome.solution.state, SolutionState::Optimal);
    assert!((outcome.solution.objective - 10.0).abs() < 1e-6);
}

// ----------------------------------------------------------------------------
// S2: unification saves cost
// ----------------------------------------------------------------------------

#[test]
fn s2_unification_makes_two_observations_cheaper_than_twice_one() {
    let mut single_config = weighted_config("0.8");
    single_config.params.set("max-depth", "1");
    let mut double_config = weighted_config("0.8");
    double_config.params.set("max-depth", "1");

    let single = run(APPLE_KB, "problem one { observe { apple(a) } }", single_config);
    let double = run(
        APPLE_KB,
        "problem two { observe { apple(a) ^ apple(b) } }",
        double_config,
    );

    assert_eq!(double.solution.state, SolutionState::Optimal);
    assert!(
        double.solution.objective < 2.0 * single.solution.objective - 1e-6,
        "two observations should share one explanation: {} vs 2 x {}",
        double.solution.objective,
        single.solution.objective
    );

    // Both observations chained to their own LHS copies, and the copies are
    // unification candidates (eat with eat, man with man).
    let eat_nodes: Vec<_> = double
        .graph
        .search_nodes_with_arity("eat/3")
        .expect("eat nodes")
        .iter()
        .copied()
        .collect();
    assert_eq!(eat_nodes.len(), 2);
    assert!(double
        .graph
        .edges()
        .iter()
        .any(|e| e.is_unify() && double.graph.hypernode(e.tail) == eat_nodes));

    // The optimum excuses one whole side through unifications: it pays for
    // exactly one copy of the explanation, nothing more.
    assert!(
        (double.solution.objective - single.solution.objective).abs() < 1e-6,
        "both observations share one paid explanation: {} vs {}",
        double.solution.objective,
        single.solution.objective
    );
    assert!(!double.active_unifications().is_empty());
}

// ----------------------------------------------------------------------------
// S3: mutual exclusion from asymmetry
// ----------------------------------------------------------------------------

#[test]
fn s3_asymmetric_pair_is_infeasible() {
    let outcome = run(
        "property parent/2 { asymmetric, irreflexive }\n\
         rule r { ancestor(x, y) => parent(x, y) }",
        "problem s3 { observe { parent(A, B) ^ parent(B, A) } }",
        Config::default(),
    );
    assert_eq!(outcome.solution.state, SolutionState::Infeasible);
    assert!(outcome.is_unresolved());
}

#[test]
fn s3_distinct_pairs_remain_feasible() {
    let outcome = run(
        "property parent/2 { asymmetric, irreflexive }\n\
         rule r { ancestor(x, y) => parent(x, y) }",
        "problem ok { observe { parent(A, B) ^ parent(B, C) } }",
        Config::default(),
    );
    assert_eq!(outcome.solution.state, SolutionState::Optimal);
}

// ----------------------------------------------------------------------------
// S4: requirement forces the chain
// ----------------------------------------------------------------------------

#[test]
fn s4_requirement_forces_forward_chain_and_pays_nothing() {
    let outcome = run(
        "rule r { p(x) => q(x) }",
        "problem s4 { observe { p(a) } require { q(a) } }",
        Config::default(),
    );
    assert_eq!(outcome.solution.state, SolutionState::Optimal);

    // The requirement node is active.
    let req = outcome.graph.requirements()[0];
    assert!(outcome.active_nodes().contains(&req));

    // The forward chain fired.
    let implicate = outcome
        .graph
        .edges()
        .iter()
        .find(|e| e.kind == EdgeKind::Implicate)
        .expect("forward chain edge");
    let interp = outcome.ilp.interpreter();
    assert!(interp.edge_is_active(&outcome.ilp, &outcome.solution, implicate.id));

    // Requirements never carry a cost.
    for decorator in outcome.ilp.decorators() {
        let attrs = decorator.literal_attributes(&outcome.ilp, &outcome.solution, req);
        assert!(attrs.is_empty(), "requirement was costed: {attrs:?}");
    }
}

#[test]
fn s4_unprovable_requirement_is_infeasible() {
    let outcome = run(
        "rule r { p(x) => q(x) }",
        "problem bad { observe { p(a) } require { unrelated(a) } }",
        Config::default(),
    );
    assert!(outcome.is_unresolved());
}

// ----------------------------------------------------------------------------
// S5: timeout yields a partial, consistent result
// ----------------------------------------------------------------------------

#[test]
fn s5_zero_timeout_surfaces_partial_output() {
    let statements =
        parse_statements("rule r1 { q(x) => p(x) }\nrule r2 { p(x) => q(x) }").expect("kb");
    let kb = compile_knowledge_base(statements, PredicateLibrary::new(), None);
    let mut config = Config::default();
    config.timeout_secs = 0;
    let engine = Engine::new(
        Arc::new(kb),
        dav::LhsEnumerator::Depth(dav::DepthEnumerator {
            max_depth: None,
            ..dav::DepthEnumerator::default()
        }),
        dav::ilp::convert::converter_from_params("weighted", &config.params).expect("converter"),
        dav::Solver::default(),
        Some(std::time::Duration::ZERO),
        1,
    );
    std::thread::sleep(std::time::Duration::from_millis(2));

    let problems =
        collect_problems(&parse_statements("problem s5 { observe { p(A) } }").expect("parse"));
    let outcome = engine.infer_one(problems[0].clone()).expect("no crash");

    assert!(outcome.graph.is_timed_out());
    assert!(outcome.graph.is_frozen(), "indices stay consistent");
    // A feasible point or no explanation, but never a claimed optimum.
    assert_ne!(outcome.solution.state, SolutionState::Optimal);
}

// ----------------------------------------------------------------------------
// S6: reachability pruning
// ----------------------------------------------------------------------------

#[test]
fn s6_astar_never_bridges_unreachable_clusters_and_stays_smaller() {
    let kb_src = "rule rp1 { root_p(x) => mid_p(x) }\n\
                  rule rp2 { mid_p(x) => p(x) }\n\
                  rule rq1 { root_q(x) => mid_q(x) }\n\
                  rule rq2 { mid_q(x) => q(x) }";
    let problem_src = "problem s6 { observe { p(a) ^ q(b) } }";

    let mut astar_config = Config::default();
    astar_config.enumerator = "astar".to_string();
    let astar = run(kb_src, problem_src, astar_config);

    let mut depth_config = Config::default();
    depth_config.params.set("max-depth", "2");
    let depth = run(kb_src, problem_src, depth_config);

    // The clusters are unreachable from each other, so no node's evidence
    // may span both observations.
    for outcome in [&astar, &depth] {
        for node in outcome.graph.nodes() {
            assert!(
                !(node.evidence.contains(&0) && node.evidence.contains(&1)),
                "node {} bridges unconnected clusters",
                node.id
            );
        }
    }

    // A* sees no admissible observation pair and adds strictly less.
    assert!(
        astar.graph.node_count() < depth.graph.node_count(),
        "astar {} vs depth {}",
        astar.graph.node_count(),
        depth.graph.node_count()
    );
}

// ----------------------------------------------------------------------------
// Boundaries and laws
// ----------------------------------------------------------------------------

#[test]
fn max_depth_zero_reduces_to_trivial_feasibility() {
    let mut config = Config::default();
    config.converter = "null".to_string();
    config.params.set("max-depth", "0");
    let outcome = run(APPLE_KB, "problem b { observe { apple(z) } }", config);

    assert_eq!(outcome.graph.node_count(), 1);
    assert_eq!(outcome.solution.state, SolutionState::Optimal);
    assert_eq!(outcome.solution.objective, 0.0);
}

#[test]
fn redundant_rule_never_worsens_the_optimum() {
    let base = run(
        APPLE_KB,
        "problem m { observe { apple(z) } }",
        weighted_config("0.8"),
    );
    let extended = run(
        &format!("{APPLE_KB}\nrule dup {{ eat(E, X, Y) ^ man(X) => apple(Y) }}"),
        "problem m { observe { apple(z) } }",
        weighted_config("0.8"),
    );
    assert!(
        extended.solution.objective <= base.solution.objective + 1e-9,
        "redundant rule worsened the optimum: {} vs {}",
        extended.solution.objective,
        base.solution.objective
    );
}

#[test]
fn choice_group_selects_exactly_one_option() {
    let outcome = run(
        "rule r { riped(x) => apple(x) }",
        "problem c { observe { apple(A) } choice { riped(A) ^ unriped(A) } }",
        Config::default(),
    );
    assert_eq!(outcome.solution.state, SolutionState::Optimal);

    let group = &outcome.graph.choice_groups()[0];
    let active = outcome.active_nodes();
    let chosen: Vec<_> = group.iter().filter(|n| active.contains(n)).collect();
    assert_eq!(chosen.len(), 1, "exactly one choice literal is active");
}

#[test]
fn costed_converter_solves_the_apple_problem() {
    let mut config = Config::default();
    config.converter = "costed".to_string();
    config
        .params
        .set("cost-provider-params", "basic(5.0, -2.0, 1.0)");
    let outcome = run(APPLE_KB, "problem c { observe { apple(z) } }", config);
    assert_eq!(outcome.solution.state, SolutionState::Optimal);
}
