//! # Result Emission
//!
//! XML output of one inference outcome: the original problem, the proof
//! graph (nodes, edges, evidence), the ILP solution, and the per-literal
//! decorations the converter registered (`cost`, `paid-cost`,
//! converter name, unifier details). A JSON rendering of the same summary
//! is available for downstream tooling.

use crate::engine::InferenceOutcome;
use crate::ilp::SolutionState;
use crate::pg::{EdgeKind, NodeKind};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("XML write error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("JSON write error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("encoding error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

fn kind_name(kind: NodeKind) -> &'static str {
    match kind {
        NodeKind::Observable => "observable",
        NodeKind::Required => "required",
        NodeKind::Hypothesis => "hypothesis",
        NodeKind::Label => "label",
    }
}

fn edge_kind_name(kind: EdgeKind) -> &'static str {
    match kind {
        EdgeKind::Hypothesize => "hypothesize",
        EdgeKind::Implicate => "implicate",
        EdgeKind::Unify => "unify",
    }
}

fn state_name(state: SolutionState) -> &'static str {
    match state {
        SolutionState::Optimal => "optimal",
        SolutionState::SubOptimal => "sub-optimal",
        SolutionState::Infeasible => "infeasible",
        SolutionState::NotAvailable => "not-available",
    }
}

/// Render one outcome as XML.
pub fn write_xml(outcome: &InferenceOutcome) -> Result<String, OutputError> {
    let mut w = Writer::new_with_indent(Vec::new(), b' ', 2);

    let mut root = BytesStart::new("dav");
    root.push_attribute(("enumerator", outcome.enumerator_repr.as_str()));
    root.push_attribute(("converter", outcome.converter_repr.as_str()));
    w.write_event(Event::Start(root))?;

    // The original problem.
    let mut problem = BytesStart::new("problem");
    problem.push_attribute(("name", outcome.problem.name.as_str()));
    w.write_event(Event::Start(problem))?;
    write_literals(&mut w, "observe", outcome.problem.observe.iter())?;
    if !outcome.problem.require.is_empty() {
        write_literals(&mut w, "require", outcome.problem.require.iter())?;
    }
    for choice in &outcome.problem.choices {
        write_literals(&mut w, "choice", choice.iter())?;
    }
    w.write_event(Event::End(BytesEnd::new("problem")))?;

    // The proof graph.
    let graph = &outcome.graph;
    let mut pg = BytesStart::new("proof-graph");
    let nodes = graph.node_count().to_string();
    let edges = graph.edges().len().to_string();
    pg.push_attribute(("nodes", nodes.as_str()));
    pg.push_attribute(("edges", edges.as_str()));
    pg.push_attribute(("timed-out", if graph.is_timed_out() { "yes" } else { "no" }));
    w.write_event(Event::Start(pg))?;

    for node in graph.nodes() {
        let mut el = BytesStart::new("node");
        let id = node.id.to_string();
        let depth = node.depth.to_string();
        let master = node.master.map_or("-1".to_string(), |m| m.to_string());
        el.push_attribute(("id", id.as_str()));
        el.push_attribute(("kind", kind_name(node.kind)));
        el.push_attribute(("depth", depth.as_str()));
        el.push_attribute(("master", master.as_str()));
        if !node.evidence.is_empty() {
            let evidence = node
                .evidence
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(" ");
            el.push_attribute(("evidence", evidence.as_str()));
        }
        w.write_event(Event::Start(el))?;
        w.write_event(Event::Text(BytesText::new(&node.literal.to_string())))?;
        w.write_event(Event::End(BytesEnd::new("node")))?;
    }

    for edge in graph.edges() {
        let mut el = BytesStart::new("edge");
        let id = edge.id.to_string();
        let tail = edge.tail.to_string();
        let head = edge.head.map_or("-1".to_string(), |h| h.to_string());
        el.push_attribute(("id", id.as_str()));
        el.push_attribute(("kind", edge_kind_name(edge.kind)));
        el.push_attribute(("tail", tail.as_str()));
        el.push_attribute(("head", head.as_str()));
        if let Some(axiom) = edge.axiom {
            let name = graph.kb().get_axiom(axiom).name.clone();
            el.push_attribute(("axiom", name.as_str()));
        }
        w.write_event(Event::Empty(el))?;
    }
    w.write_event(Event::End(BytesEnd::new("proof-graph")))?;

    // The solution.
    let mut sol = BytesStart::new("solution");
    sol.push_attribute(("state", state_name(outcome.solution.state)));
    let objective = outcome.solution.objective.to_string();
    sol.push_attribute(("objective", objective.as_str()));
    w.write_event(Event::Start(sol))?;

    if !outcome.is_unresolved() {
        for &n in &outcome.active_nodes() {
            let node = graph.node(n);
            let mut el = BytesStart::new("literal");
            let id = n.to_string();
            el.push_attribute(("node", id.as_str()));
            el.push_attribute(("kind", kind_name(node.kind)));
            let mut attrs: Vec<(String, String)> = Vec::new();
            for decorator in outcome.ilp.decorators() {
                attrs.extend(decorator.literal_attributes(&outcome.ilp, &outcome.solution, n));
            }
            for (k, v) in &attrs {
                el.push_attribute((k.as_str(), v.as_str()));
            }
            w.write_event(Event::Start(el))?;
            w.write_event(Event::Text(BytesText::new(&node.literal.to_string())))?;
            w.write_event(Event::End(BytesEnd::new("literal")))?;
        }

        for (a, b) in outcome.active_unifications() {
            let mut el = BytesStart::new("unification");
            let (sa, sb) = (a.to_string(), b.to_string());
            el.push_attribute(("n1", sa.as_str()));
            el.push_attribute(("n2", sb.as_str()));
            let l1 = graph.node(a).literal.to_string();
            let l2 = graph.node(b).literal.to_string();
            el.push_attribute(("l1", l1.as_str()));
            el.push_attribute(("l2", l2.as_str()));
            w.write_event(Event::Empty(el))?;
        }
    }
    w.write_event(Event::End(BytesEnd::new("solution")))?;

    w.write_event(Event::End(BytesEnd::new("dav")))?;
    Ok(String::from_utf8(w.into_inner())?)
}

fn write_literals<'a, W: std::io::Write>(
    w: &mut Writer<W>,
    tag: &str,
    literals: impl Iterator<Item = &'a crate::ast::Literal>,
) -> Result<(), quick_xml::Error> {
    w.write_event(Event::Start(BytesStart::new(tag)))?;
    for lit in literals {
        w.write_event(Event::Start(BytesStart::new("literal")))?;
        w.write_event(Event::Text(BytesText::new(&lit.to_string())))?;
        w.write_event(Event::End(BytesEnd::new("literal")))?;
    }
    w.write_event(Event::End(BytesEnd::new(tag)))?;
    Ok(())
}

// ============================================================================
// JSON summary
// ============================================================================

#[derive(Debug, Serialize)]
struct JsonSummary {
    problem: String,
    state: &'static str,
    objective: f64,
    timed_out: bool,
    nodes: usize,
    edges: usize,
    active: Vec<JsonLiteral>,
    unifications: Vec<(usize, usize)>,
}

#[derive(Debug, Serialize)]
struct JsonLiteral {
    node: usize,
    kind: &'static str,
    literal: String,
    attributes: Vec<(String, String)>,
}

/// Render one outcome as a JSON summary.
pub fn write_json(outcome: &InferenceOutcome) -> Result<String, OutputError> {
    let active = if outcome.is_unresolved() {
        Vec::new()
    } else {
        outcome
            .active_nodes()
            .iter()
            .map(|&n| {
                let node = outcome.graph.node(n);
                let mut attributes = Vec::new();
                for decorator in outcome.ilp.decorators() {
                    attributes
                        .extend(decorator.literal_attributes(&outcome.ilp, &outcome.solution, n));
                }
                JsonLiteral {
                    node: n,
                    kind: kind_name(node.kind),
                    literal: node.literal.to_string(),
                    attributes,
                }
            })
            .collect()
    };

    let summary = JsonSummary {
        problem: outcome.problem.name.clone(),
        state: state_name(outcome.solution.state),
        objective: outcome.solution.objective,
        timed_out: outcome.is_timed_out(),
        nodes: outcome.graph.node_count(),
        edges: outcome.graph.edges().len(),
        active,
        unifications: if outcome.is_unresolved() {
            Vec::new()
        } else {
            outcome.active_unifications()
        },
    };
    Ok(serde_json::to_string_pretty(&summary)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::engine::{compile_knowledge_base, collect_problems, ComponentRegistry, Engine};
    use crate::kb::PredicateLibrary;
    use crate::parser::parse_statements;
    use std::sync::Arc;

    fn outcome_for(kb_src: &str, problem_src: &str) -> InferenceOutcome {
        let statements = parse_statements(kb_src).expect("kb");
        let kb = compile_knowledge_base(statements, PredicateLibrary::new(), None);
        let engine =
            Engine::from_config(Arc::new(kb), &Config::default(), &ComponentRegistry::new())
                .expect("engine");
        let problems = collect_problems(&parse_statements(problem_src).expect("problem"));
        engine.infer_one(problems[0].clone()).expect("infer")
    }

    #[test]
    fn xml_contains_problem_graph_and_solution() {
        let outcome = outcome_for(
            "rule r { eat(E, X, Y) ^ man(X) => apple(Y) }",
            "problem t { observe { apple(Z) } }",
        );
        let xml = write_xml(&outcome).expect("xml");

        assert!(xml.contains("<dav"));
        assert!(xml.contains("<problem name=\"t\">"));
        assert!(xml.contains("<proof-graph"));
        assert!(xml.contains("kind=\"observable\""));
        assert!(xml.contains("kind=\"hypothesize\""));
        assert!(xml.contains("axiom=\"r\""));
        assert!(xml.contains("<solution state=\"optimal\""));
        assert!(xml.contains("paid-cost"));
    }

    #[test]
    fn xml_marks_timed_out_graphs() {
        let statements = parse_statements("rule r { p(x) => q(x) }").expect("kb");
        let kb = compile_knowledge_base(statements, PredicateLibrary::new(), None);
        let engine = Engine::new(
            Arc::new(kb),
            crate::lhs::LhsEnumerator::Depth(crate::lhs::DepthEnumerator::default()),
            crate::ilp::IlpConverter::Null(crate::ilp::convert::NullConverter),
            crate::solver::Solver::default(),
            Some(std::time::Duration::ZERO),
            1,
        );
        std::thread::sleep(std::time::Duration::from_millis(2));
        let problems = collect_problems(
            &parse_statements("problem t { observe { q(A) } }").expect("problem"),
        );
        let outcome = engine.infer_one(problems[0].clone()).expect("infer");
        let xml = write_xml(&outcome).expect("xml");
        assert!(xml.contains("timed-out=\"yes\""));
    }

    #[test]
    fn json_summary_lists_active_literals() {
        let outcome = outcome_for(
            "rule r { p(x) => q(x) }",
            "problem t { observe { q(A) } }",
        );
        let json = write_json(&outcome).expect("json");
        let value: serde_json::Value = serde_json::from_str(&json).expect("valid json");
        assert_eq!(value["problem"], "t");
        assert_eq!(value["state"], "optimal");
        assert!(value["active"].as_array().is_some_and(|a| !a.is_empty()));
    }
}
