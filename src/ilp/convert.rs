//! ILP converters: null, weighted, and costed encodings of a proof graph.
//!
//! All three start from the shared baseline encoding
//! ([`IlpProblem::convert_proof_graph`]) and differ only in the cost model:
//!
//! - **null**: zero objective; structural feasibility only.
//! - **weighted**: cost-payment semantics: an active node either pays its
//!   hypothesizing cost, is explained by a chain out of it, or is excused
//!   by unifying with a cheaper, non-required node.
//! - **costed**: costs sit directly on edges (axiom-derived for chains, a
//!   flat literal-unification cost for unify edges); no payment toggling.

use super::cost::CostProvider;
use super::{
    Constraint, ConstraintOperator, IlpProblem, IlpSolution, SolutionInterpreter, VariableId,
};
use crate::config::{ConfigError, Params};
use crate::engine::timeout::Deadline;
use crate::pg::{NodeId, NodeKind, ProofGraph};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

/// Per-literal output attributes contributed by a converter.
#[derive(Debug, Clone)]
pub enum SolutionDecorator {
    /// Weighted converter: node costs live on dedicated payment variables.
    WeightedCosts {
        node_to_costvar: HashMap<NodeId, VariableId>,
    },
    /// Costed converter: static node costs.
    CostedCosts { node_to_cost: HashMap<NodeId, f64> },
}

impl SolutionDecorator {
    pub fn literal_attributes(
        &self,
        problem: &IlpProblem,
        solution: &IlpSolution,
        node: NodeId,
    ) -> Vec<(String, String)> {
        match self {
            SolutionDecorator::WeightedCosts { node_to_costvar } => {
                let Some(&costvar) = node_to_costvar.get(&node) else {
                    return Vec::new();
                };
                let cost = problem.variable(costvar).coefficient;
                let paid = solution.variable_is_active(costvar);
                vec![
                    ("cost".to_string(), format!("{cost}")),
                    ("paid-cost".to_string(), if paid { "yes" } else { "no" }.to_string()),
                ]
            }
            SolutionDecorator::CostedCosts { node_to_cost } => node_to_cost
                .get(&node)
                .map(|cost| vec![("cost".to_string(), format!("{cost}"))])
                .unwrap_or_default(),
        }
    }
}

/// The operation contract a custom converter implements.
pub type ConverterFn = Arc<dyn Fn(&ProofGraph, &Deadline) -> IlpProblem + Send + Sync>;

/// Converter polymorphism: the three built-in encodings plus user-supplied
/// ones registered by name.
#[derive(Clone)]
pub enum IlpConverter {
    Null(NullConverter),
    Weighted(WeightedConverter),
    Costed(CostedConverter),
    Custom { name: String, run: ConverterFn },
}

impl IlpConverter {
    pub fn execute(&self, graph: &ProofGraph, deadline: &Deadline) -> IlpProblem {
        match self {
            IlpConverter::Null(c) => c.execute(graph, deadline),
            IlpConverter::Weighted(c) => c.execute(graph, deadline),
            IlpConverter::Costed(c) => c.execute(graph, deadline),
            IlpConverter::Custom { run, .. } => run(graph, deadline),
        }
    }

    pub fn repr(&self) -> String {
        match self {
            IlpConverter::Null(_) => "null-converter".to_string(),
            IlpConverter::Weighted(c) => format!("weighted-converter({})", c.provider.repr()),
            IlpConverter::Costed(_) => "costed-converter".to_string(),
            IlpConverter::Custom { name, .. } => format!("custom-converter({name})"),
        }
    }

    /// Whether a timed-out conversion still yields a sound (if pessimistic)
    /// problem. The null converter encodes no costs, so validity survives;
    /// the cost-bearing converters give up optimality.
    pub fn keeps_validity_on_timeout(&self) -> bool {
        matches!(self, IlpConverter::Null(_))
    }
}

// ============================================================================
// Null converter
// ============================================================================

/// Baseline encoding with a zero objective; a sanity-check target.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullConverter;

impl NullConverter {
    pub fn execute(&self, graph: &ProofGraph, _deadline: &Deadline) -> IlpProblem {
        let mut prob = IlpProblem::new(SolutionInterpreter::Basic);
        prob.convert_proof_graph(graph);
        prob.add_attribute("converter", "null-converter");
        if graph.is_timed_out() {
            prob.set_timed_out();
        }
        prob
    }
}

// ============================================================================
// Weighted converter
// ============================================================================

#[derive(Clone)]
pub struct WeightedConverter {
    pub provider: Arc<dyn CostProvider>,
}

impl WeightedConverter {
    pub fn new(provider: Arc<dyn CostProvider>) -> Self {
        WeightedConverter { provider }
    }

    pub fn from_params(params: &Params) -> Result<Self, ConfigError> {
        Ok(WeightedConverter::new(super::cost::cost_provider_from_params(params)?))
    }

    pub fn execute(&self, graph: &ProofGraph, deadline: &Deadline) -> IlpProblem {
        let mut prob = IlpProblem::new(SolutionInterpreter::Basic);
        prob.convert_proof_graph(graph);
        if graph.is_timed_out() {
            prob.set_timed_out();
        }

        // A payment variable per costed node.
        let node_costs: BTreeMap<NodeId, f64> =
            self.provider.node_costs(graph).into_iter().collect();
        let mut node_to_costvar: BTreeMap<NodeId, VariableId> = BTreeMap::new();
        for (&n, &cost) in &node_costs {
            if prob.find_variable_with_node(n).is_some() {
                let costvar = prob.add_variable(format!("cost(n:{n})"), cost);
                node_to_costvar.insert(n, costvar);
            }
        }
        let cost_of =
            |n: NodeId| -> f64 { node_costs.get(&n).copied().unwrap_or(0.0) };

        // Payment condition per costed node: active means paid, explained by
        // a chain out of it, or excused by unifying with a cheaper,
        // non-required node.
        for (&n, &costvar) in &node_to_costvar {
            if deadline.is_over() {
                prob.set_timed_out();
                break;
            }
            let node_var = prob.find_variable_with_node(n).expect("node variable");

            let mut paying_edges: BTreeSet<usize> = BTreeSet::new();
            for e in graph.out_chain_edges_of_node(n) {
                paying_edges.insert(e);
            }
            for e in graph.unify_edges_of_node(n) {
                let tail = graph.hypernode(graph.edge(e).tail);
                let (a, b) = (tail[0], tail[1]);
                if graph.node(a).kind == NodeKind::Required
                    || graph.node(b).kind == NodeKind::Required
                {
                    continue;
                }
                // The edge excuses only the costlier endpoint.
                if (n == a) == (cost_of(a) > cost_of(b)) {
                    paying_edges.insert(e);
                }
            }

            let mut con = Constraint::new(
                format!("cost-payment(n:{n})"),
                ConstraintOperator::GreaterEq,
                0.0,
            );
            con.add_term(node_var, -1.0);
            con.add_term(costvar, 1.0);
            for e in paying_edges {
                con.add_term(prob.find_variable_with_edge(e).expect("edge variable"), 1.0);
            }
            prob.add_constraint(con);
        }

        // A literal excused by unification must not chain onward: the
        // explained (costlier) side of an active unify edge keeps its
        // outgoing chains inactive.
        for edge in graph.edges() {
            if !edge.is_unify() {
                continue;
            }
            if deadline.is_over() {
                prob.set_timed_out();
                break;
            }
            let tail = graph.hypernode(edge.tail);
            let (a, b) = (tail[0], tail[1]);
            if graph.node(a).kind == NodeKind::Required
                || graph.node(b).kind == NodeKind::Required
            {
                continue;
            }
            let explained = if cost_of(a) > cost_of(b) { a } else { b };
            let unify_var = prob.find_variable_with_edge(edge.id).expect("edge variable");
            for chain in graph.out_chain_edges_of_node(explained) {
                let chain_var = prob.find_variable_with_edge(chain).expect("edge variable");
                let mut con = Constraint::new(
                    format!("no-chain-from-explained:e({}):e({chain})", edge.id),
                    ConstraintOperator::LessEq,
                    1.0,
                );
                con.add_term(unify_var, 1.0);
                con.add_term(chain_var, 1.0);
                prob.add_constraint(con);
            }
        }

        prob.add_decorator(SolutionDecorator::WeightedCosts {
            node_to_costvar: node_to_costvar.into_iter().collect(),
        });
        prob.add_attribute("converter", self.repr());
        prob
    }

    fn repr(&self) -> String {
        format!("weighted-converter({})", self.provider.repr())
    }
}

// ============================================================================
// Costed converter
// ============================================================================

/// Cost model of the costed converter: `basic(default, literal_unify,
/// term_unify)`.
#[derive(Debug, Clone, Copy)]
pub struct CostedCostProvider {
    pub default_axiom_cost: f64,
    pub literal_unify_cost: f64,
    pub term_unify_cost: f64,
}

impl Default for CostedCostProvider {
    fn default() -> Self {
        CostedCostProvider {
            default_axiom_cost: 10.0,
            literal_unify_cost: -40.0,
            term_unify_cost: 2.0,
        }
    }
}

impl CostedCostProvider {
    /// Parse a `basic(a, b, c)` configuration string.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let pattern = Regex::new(
            r"^basic\(\s*([+-]?\d*\.?\d+)\s*,\s*([+-]?\d*\.?\d+)\s*,\s*([+-]?\d*\.?\d+)\s*\)\s*$",
        )
        .expect("static regex");
        let caps = pattern
            .captures(s)
            .ok_or_else(|| ConfigError::InvalidCostProvider(s.to_string()))?;
        let field = |i: usize| -> f64 { caps[i].parse().unwrap_or(0.0) };
        Ok(CostedCostProvider {
            default_axiom_cost: field(1),
            literal_unify_cost: field(2),
            term_unify_cost: field(3),
        })
    }

    fn edge_cost(&self, graph: &ProofGraph, edge: usize) -> f64 {
        let e = graph.edge(edge);
        if e.is_chain() {
            let axiom = graph.kb().get_axiom(e.axiom.expect("chain axiom"));
            axiom
                .lhs
                .param_f64()
                .or_else(|| axiom.rhs.param_f64())
                .unwrap_or(self.default_axiom_cost)
        } else {
            self.literal_unify_cost
        }
    }

    fn node_cost(&self, graph: &ProofGraph, node: NodeId) -> f64 {
        // The original evaluated its term-unification cost for equality
        // nodes without ever returning it; equality nodes therefore cost
        // nothing, and `term_unify_cost` is carried but never charged.
        let _ = graph.node(node);
        0.0
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CostedConverter {
    pub provider: CostedCostProvider,
}

impl CostedConverter {
    pub fn new(provider: CostedCostProvider) -> Self {
        CostedConverter { provider }
    }

    pub fn from_params(params: &Params) -> Result<Self, ConfigError> {
        let provider = match params.get("cost-provider-params") {
            Some(s) => CostedCostProvider::parse(s)?,
            None => CostedCostProvider::default(),
        };
        Ok(CostedConverter::new(provider))
    }

    pub fn execute(&self, graph: &ProofGraph, deadline: &Deadline) -> IlpProblem {
        let mut prob = IlpProblem::new(SolutionInterpreter::Basic);
        prob.convert_proof_graph(graph);
        if graph.is_timed_out() || deadline.is_over() {
            prob.set_timed_out();
        }

        // Node costs on the node variables.
        let mut node_to_cost = HashMap::new();
        for node in graph.nodes() {
            let cost = self.provider.node_cost(graph, node.id);
            if cost != 0.0 {
                let var = prob.find_variable_with_node(node.id).expect("node variable");
                prob.variable_mut(var).coefficient = cost;
                node_to_cost.insert(node.id, cost);
            }
        }

        // Edge costs on the head hypernode of each edge.
        for edge in graph.edges() {
            let Some(head) = edge.head else {
                continue;
            };
            let var = prob
                .find_variable_with_hypernode(head)
                .expect("hypernode variable");
            prob.variable_mut(var).coefficient = self.provider.edge_cost(graph, edge.id);
        }

        prob.add_decorator(SolutionDecorator::CostedCosts { node_to_cost });
        prob.add_attribute("converter", "costed-converter");
        prob
    }
}

/// Build a converter from its configured name.
pub fn converter_from_params(name: &str, params: &Params) -> Result<IlpConverter, ConfigError> {
    match name {
        "null" => Ok(IlpConverter::Null(NullConverter)),
        "weighted" => Ok(IlpConverter::Weighted(WeightedConverter::from_params(params)?)),
        "costed" => Ok(IlpConverter::Costed(CostedConverter::from_params(params)?)),
        other => Err(ConfigError::UnknownComponent {
            kind: "converter".to_string(),
            name: other.to_string(),
        }),
    }
}
