//! Cost providers for the weighted converter.
//!
//! A cost provider assigns every node its hypothesizing cost: observations
//! cost what their literal parameter says (else the configured default),
//! and hypothesis costs propagate from the parents through the axiom's
//! branch weights, combined by multiplication or addition.
//!
//! Two providers are built in: `basic` (static defaults) and
//! `parameterized` (per-feature weights, trainable in principle; the
//! feature extraction is empty and `train` preserves the weights, so it
//! behaves like a fixed provider with persistence).

use crate::config::ConfigError;
use crate::kb::Axiom;
use crate::pg::{EdgeId, EdgeKind, NodeId, ProofGraph};
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

/// How a parent cost and a branch weight combine into a child cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CostOperator {
    Multiply,
    Add,
}

impl CostOperator {
    pub fn apply(self, cost: f64, weight: f64) -> f64 {
        match self {
            CostOperator::Multiply => cost * weight,
            CostOperator::Add => cost + weight,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CostOperator::Multiply => "multiply",
            CostOperator::Add => "addition",
        }
    }
}

/// The capability interface of a node-cost model.
pub trait CostProvider: Send + Sync {
    /// Hypothesizing cost of every node that carries one.
    fn node_costs(&self, graph: &ProofGraph) -> HashMap<NodeId, f64>;

    /// Update from a gold-vs-system solution pair. The built-in providers
    /// leave the weights unchanged.
    fn train(&self, _system: &super::IlpSolution, _gold: &super::IlpSolution) {}

    fn duplicate(&self) -> Arc<dyn CostProvider>;

    fn repr(&self) -> String;
}

/// Branch weights of the edge's instantiated axiom side: per-literal
/// parameters when any are given, else an even split of the side-wide
/// parameter, else an even split of the default weight.
pub(crate) fn axiom_weights(
    graph: &ProofGraph,
    axiom: &Axiom,
    edge: EdgeId,
    default_weight: f64,
) -> Vec<f64> {
    let e = graph.edge(edge);
    let size = e.head.map_or(0, |h| graph.hypernode(h).len());
    let branch = axiom.side(e.kind == EdgeKind::Hypothesize);

    let per_literal: Vec<Option<f64>> = branch.literals.iter().map(|l| l.param_f64()).collect();
    if per_literal.iter().any(Option::is_some) {
        return per_literal
            .into_iter()
            .map(|w| w.unwrap_or(0.0))
            .collect();
    }
    let whole = branch.param_f64().unwrap_or(default_weight);
    vec![whole / size as f64; size]
}

/// Observation costs from the literal parameters.
fn observation_costs(graph: &ProofGraph, default_cost: f64, out: &mut HashMap<NodeId, f64>) {
    for &obs in graph.observations() {
        let cost = graph.node(obs).literal.param_f64().unwrap_or(default_cost);
        out.insert(obs, cost);
    }
}

/// Propagate costs tier by tier: each chain-produced hypernode splits the
/// summed tail cost across its members by the branch weights.
///
/// Depth is strictly positive here, so unification assumptions never feed
/// the propagation.
fn hypothesis_costs(
    graph: &ProofGraph,
    weights_of: &dyn Fn(&ProofGraph, EdgeId) -> Vec<f64>,
    operator: CostOperator,
    out: &mut HashMap<NodeId, f64>,
) {
    for depth in 1.. {
        let Some(nodes) = graph.search_nodes_with_depth(depth) else {
            break;
        };
        let masters: BTreeSet<_> = nodes
            .iter()
            .filter_map(|&n| graph.node(n).master)
            .collect();

        for hn in masters {
            let Some(parent) = graph.find_parental_edge(hn) else {
                continue;
            };
            let edge = graph.edge(parent);

            let cost_from: f64 = graph
                .hypernode(edge.tail)
                .iter()
                .filter_map(|n| out.get(n))
                .sum();

            let head = graph.hypernode(edge.head.expect("chain head"));
            let weights = weights_of(graph, parent);
            for (&n, &w) in head.iter().zip(&weights) {
                out.insert(n, operator.apply(cost_from, w));
            }
        }
    }
}

// ============================================================================
// Basic provider
// ============================================================================

#[derive(Debug, Clone)]
pub struct BasicCostProvider {
    operator: CostOperator,
    default_observation_cost: f64,
    default_axiom_weight: f64,
}

impl BasicCostProvider {
    pub fn new(
        operator: CostOperator,
        default_observation_cost: f64,
        default_axiom_weight: f64,
    ) -> Result<Self, ConfigError> {
        if default_observation_cost < 0.0 {
            return Err(ConfigError::NegativeWeight(
                "default-observation-cost".to_string(),
            ));
        }
        if default_axiom_weight < 0.0 {
            return Err(ConfigError::NegativeWeight(
                "default-axiom-weight".to_string(),
            ));
        }
        Ok(BasicCostProvider {
            operator,
            default_observation_cost,
            default_axiom_weight,
        })
    }
}

impl CostProvider for BasicCostProvider {
    fn node_costs(&self, graph: &ProofGraph) -> HashMap<NodeId, f64> {
        let mut out = HashMap::new();
        observation_costs(graph, self.default_observation_cost, &mut out);
        let default = self.default_axiom_weight;
        let weights = move |g: &ProofGraph, e: EdgeId| {
            let axiom_id = g.edge(e).axiom.expect("chain edge has an axiom");
            let axiom = g.kb().get_axiom(axiom_id).clone();
            axiom_weights(g, &axiom, e, default)
        };
        hypothesis_costs(graph, &weights, self.operator, &mut out);
        out
    }

    fn duplicate(&self) -> Arc<dyn CostProvider> {
        Arc::new(self.clone())
    }

    fn repr(&self) -> String {
        format!("basic({})", self.operator.name())
    }
}

// ============================================================================
// Parameterized provider
// ============================================================================

/// A provider whose axiom weights come from trainable feature weights,
/// persisted as a two-column tab-separated file.
///
/// The feature extraction is empty, so every edge sees the weight
/// `(2 + tanh 0) / branch_size`; training keeps the map unchanged.
#[derive(Debug, Clone, Default)]
pub struct ParameterizedCostProvider {
    weights: HashMap<String, f64>,
}

impl ParameterizedCostProvider {
    pub fn new() -> Self {
        ParameterizedCostProvider::default()
    }

    pub fn from_file(path: &Path) -> Self {
        let mut weights = HashMap::new();
        match fs::read_to_string(path) {
            Ok(content) => {
                for line in content.lines() {
                    let mut cols = line.splitn(2, '\t');
                    if let (Some(name), Some(value)) = (cols.next(), cols.next()) {
                        if let Ok(w) = value.trim().parse::<f64>() {
                            weights.insert(name.to_string(), w);
                        }
                    }
                }
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot open feature-weight file");
            }
        }
        ParameterizedCostProvider { weights }
    }

    pub fn write(&self, path: &Path) -> std::io::Result<()> {
        let mut rows: Vec<(&String, &f64)> = self.weights.iter().collect();
        rows.sort_by_key(|(name, _)| name.clone());
        let body = rows
            .into_iter()
            .map(|(name, w)| format!("{name}\t{w}\n"))
            .collect::<String>();
        fs::write(path, body)
    }

    fn edge_weight(&self, size: usize) -> f64 {
        let features: Vec<&str> = Vec::new(); // feature extraction is empty
        let sum: f64 = features
            .iter()
            .filter_map(|f| self.weights.get(*f))
            .sum();
        (2.0 + sum.tanh()) / size as f64
    }
}

impl CostProvider for ParameterizedCostProvider {
    fn node_costs(&self, graph: &ProofGraph) -> HashMap<NodeId, f64> {
        let mut out = HashMap::new();
        observation_costs(graph, 10.0, &mut out);
        let weights = move |g: &ProofGraph, e: EdgeId| {
            let size = g.edge(e).head.map_or(1, |h| g.hypernode(h).len());
            vec![self.edge_weight(size); size]
        };
        hypothesis_costs(graph, &weights, CostOperator::Multiply, &mut out);
        out
    }

    fn duplicate(&self) -> Arc<dyn CostProvider> {
        Arc::new(self.clone())
    }

    fn repr(&self) -> String {
        "parameterized".to_string()
    }
}

/// Build a cost provider from its configured name.
pub fn cost_provider_from_params(
    params: &crate::config::Params,
) -> Result<Arc<dyn CostProvider>, ConfigError> {
    let def_weight = params.f64_or("default-axiom-weight", 1.2)?;
    let def_cost = params.f64_or("default-observation-cost", 10.0)?;
    match params.get("cost-provider").unwrap_or("basic") {
        "basic" => Ok(Arc::new(BasicCostProvider::new(
            CostOperator::Multiply,
            def_cost,
            def_weight,
        )?)),
        "linear" => Ok(Arc::new(BasicCostProvider::new(
            CostOperator::Add,
            def_cost,
            def_weight,
        )?)),
        "parameterized" => Ok(Arc::new(match params.get("feature-weights-file") {
            Some(path) => ParameterizedCostProvider::from_file(Path::new(path)),
            None => ParameterizedCostProvider::new(),
        })),
        other => Err(ConfigError::UnknownComponent {
            kind: "cost-provider".to_string(),
            name: other.to_string(),
        }),
    }
}
