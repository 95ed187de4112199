//! # Engine
//!
//! Wires the pipeline per problem: seed the proof graph, run the configured
//! enumerator, convert to an ILP, call the solver with the remaining
//! deadline, and interpret the active variables.
//!
//! Independent problems run in parallel on a rayon pool of `-P` workers;
//! inside one problem everything is single-threaded and cooperative. The
//! knowledge base is shared read-only; the proof graph and the ILP are
//! owned by exactly one worker at a time.

use crate::ast::{Problem, Statement};
use crate::config::{Config, ConfigError, Params};
use crate::ilp::convert::converter_from_params;
use crate::ilp::{IlpConverter, IlpProblem, IlpSolution, SolutionState};
use crate::kb::{KbError, KnowledgeBase, PredicateLibrary};
use crate::lhs::{AStarEnumerator, DepthEnumerator, LhsEnumerator};
use crate::parser::ParseError;
use crate::pg::{GraphError, NodeId, ProofGraph};
use crate::solver::Solver;
use rayon::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, info_span, warn};

pub mod timeout;

pub use timeout::Deadline;

/// Engine-level errors.
#[derive(Debug, Error)]
pub enum DavError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("input error: {0}")]
    Input(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Kb(#[from] KbError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

// ============================================================================
// Component registry
// ============================================================================

type EnumeratorFactory =
    Arc<dyn Fn(&Params) -> Result<LhsEnumerator, ConfigError> + Send + Sync>;
type ConverterFactory =
    Arc<dyn Fn(&Params) -> Result<IlpConverter, ConfigError> + Send + Sync>;

/// Name-to-factory registration for user-extensible components. The
/// registry is an explicit handle passed to the engine builder, not a
/// hidden singleton, so isolated tests can register freely.
#[derive(Default, Clone)]
pub struct ComponentRegistry {
    enumerators: HashMap<String, EnumeratorFactory>,
    converters: HashMap<String, ConverterFactory>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        ComponentRegistry::default()
    }

    pub fn register_enumerator(&mut self, name: impl Into<String>, factory: EnumeratorFactory) {
        self.enumerators.insert(name.into(), factory);
    }

    pub fn register_converter(&mut self, name: impl Into<String>, factory: ConverterFactory) {
        self.converters.insert(name.into(), factory);
    }

    pub fn resolve_enumerator(
        &self,
        name: &str,
        params: &Params,
    ) -> Result<LhsEnumerator, ConfigError> {
        match name {
            "depth" => {
                let max_depth = params.i64_or("max-depth", 3)?;
                Ok(LhsEnumerator::Depth(DepthEnumerator {
                    max_depth: (max_depth >= 0).then_some(max_depth as u32),
                    max_lhs_size: lhs_size(params)?,
                    do_deduction: !params.flag("disable-deduction"),
                    do_abduction: !params.flag("disable-abduction"),
                }))
            }
            "astar" => Ok(LhsEnumerator::AStar(AStarEnumerator {
                max_distance: params.f64_or("max-distance", -1.0)? as f32,
                max_lhs_size: lhs_size(params)?,
                do_deduction: !params.flag("disable-deduction"),
                do_abduction: !params.flag("disable-abduction"),
            })),
            other => match self.enumerators.get(other) {
                Some(factory) => factory(params),
                None => Err(ConfigError::UnknownComponent {
                    kind: "enumerator".to_string(),
                    name: other.to_string(),
                }),
            },
        }
    }

    pub fn resolve_converter(
        &self,
        name: &str,
        params: &Params,
    ) -> Result<IlpConverter, ConfigError> {
        match converter_from_params(name, params) {
            Ok(c) => Ok(c),
            Err(ConfigError::UnknownComponent { .. }) => match self.converters.get(name) {
                Some(factory) => factory(params),
                None => Err(ConfigError::UnknownComponent {
                    kind: "converter".to_string(),
                    name: name.to_string(),
                }),
            },
            Err(e) => Err(e),
        }
    }
}

fn lhs_size(params: &Params) -> Result<Option<usize>, ConfigError> {
    let cap = params.i64_or("max-lhs-size", 0)?;
    Ok((cap > 0).then_some(cap as usize))
}

// ============================================================================
// Inference outcome
// ============================================================================

/// Everything one problem produced: the graph, the encoding, the solution.
pub struct InferenceOutcome {
    pub problem: Problem,
    pub graph: ProofGraph,
    pub ilp: IlpProblem,
    pub solution: IlpSolution,
    pub enumerator_repr: String,
    pub converter_repr: String,
    pub elapsed: Duration,
}

impl InferenceOutcome {
    /// Node ids the solution makes active, ascending.
    pub fn active_nodes(&self) -> Vec<NodeId> {
        let interp = self.ilp.interpreter();
        self.graph
            .nodes()
            .iter()
            .filter(|n| interp.node_is_active(&self.ilp, &self.solution, n.id))
            .map(|n| n.id)
            .collect()
    }

    /// Active unification edges as `(node, node)` pairs.
    pub fn active_unifications(&self) -> Vec<(NodeId, NodeId)> {
        let interp = self.ilp.interpreter();
        self.graph
            .edges()
            .iter()
            .filter(|e| e.is_unify() && interp.edge_is_active(&self.ilp, &self.solution, e.id))
            .map(|e| {
                let hn = self.graph.hypernode(e.tail);
                (hn[0], hn[1])
            })
            .collect()
    }

    pub fn is_timed_out(&self) -> bool {
        self.graph.is_timed_out() || self.ilp.is_timed_out()
    }

    /// "No explanation": the solver proved infeasibility or found nothing.
    pub fn is_unresolved(&self) -> bool {
        matches!(
            self.solution.state,
            SolutionState::Infeasible | SolutionState::NotAvailable
        )
    }
}

// ============================================================================
// The engine
// ============================================================================

pub struct Engine {
    kb: Arc<KnowledgeBase>,
    enumerator: LhsEnumerator,
    converter: IlpConverter,
    solver: Solver,
    timeout: Option<Duration>,
    threads: usize,
}

impl Engine {
    pub fn from_config(
        kb: Arc<KnowledgeBase>,
        config: &Config,
        registry: &ComponentRegistry,
    ) -> Result<Self, DavError> {
        let enumerator = registry.resolve_enumerator(&config.enumerator, &config.params)?;
        let converter = registry.resolve_converter(&config.converter, &config.params)?;
        Ok(Engine {
            kb,
            enumerator,
            converter,
            solver: Solver::default(),
            timeout: config.timeout(),
            threads: config.worker_count(),
        })
    }

    pub fn new(
        kb: Arc<KnowledgeBase>,
        enumerator: LhsEnumerator,
        converter: IlpConverter,
        solver: Solver,
        timeout: Option<Duration>,
        threads: usize,
    ) -> Self {
        Engine {
            kb,
            enumerator,
            converter,
            solver,
            timeout,
            threads,
        }
    }

    pub fn kb(&self) -> &Arc<KnowledgeBase> {
        &self.kb
    }

    /// Run one problem through the full pipeline.
    pub fn infer_one(&self, problem: Problem) -> Result<InferenceOutcome, DavError> {
        let span = info_span!("infer", problem = %problem.name);
        let _guard = span.enter();
        if problem.observe.is_empty() {
            return Err(DavError::Input("empty observation".to_string()));
        }

        let deadline = Deadline::new(self.timeout);
        let graph = self.enumerator.execute(&problem, &self.kb, &deadline)?;
        if graph.is_timed_out() {
            warn!(
                nodes = graph.node_count(),
                "enumeration hit its resource bound; continuing with a partial graph"
            );
        }

        let ilp = self.converter.execute(&graph, &deadline);
        let mut solution = self.solver.solve(&ilp, &deadline);

        // A timed-out conversion loses optimality unless the converter says
        // otherwise; a feasible point is still reported.
        let lost_optimality = (graph.is_timed_out() || ilp.is_timed_out())
            && !self.converter.keeps_validity_on_timeout();
        if lost_optimality && solution.state == SolutionState::Optimal {
            solution.state = SolutionState::SubOptimal;
        }

        info!(
            nodes = graph.node_count(),
            edges = graph.edges().len(),
            variables = ilp.variables().len(),
            constraints = ilp.constraints().len(),
            state = ?solution.state,
            objective = solution.objective,
            "problem solved"
        );

        Ok(InferenceOutcome {
            enumerator_repr: self.enumerator.repr(),
            converter_repr: self.converter.repr(),
            elapsed: deadline.elapsed(),
            problem,
            graph,
            ilp,
            solution,
        })
    }

    /// Run a batch of problems on the worker pool.
    pub fn infer(&self, problems: Vec<Problem>) -> Vec<Result<InferenceOutcome, DavError>> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.threads)
            .build();
        match pool {
            Ok(pool) => pool.install(|| {
                problems
                    .into_par_iter()
                    .map(|p| self.infer_one(p))
                    .collect()
            }),
            Err(e) => vec![Err(DavError::Internal(format!(
                "worker pool construction failed: {e}"
            )))],
        }
    }

    /// Learning pass: solve each problem and feed the system solution to
    /// the cost provider's `train` hook. The built-in providers keep their
    /// weights, so this records outcomes without changing behavior.
    pub fn learn(&self, problems: Vec<Problem>) -> Vec<Result<InferenceOutcome, DavError>> {
        let outcomes = self.infer(problems);
        if let IlpConverter::Weighted(w) = &self.converter {
            for outcome in outcomes.iter().flatten() {
                w.provider.train(&outcome.solution, &outcome.solution);
            }
        }
        outcomes
    }
}

// ============================================================================
// Compilation helpers
// ============================================================================

/// Build a knowledge base from parsed statements (rules and properties;
/// problems are ignored here).
pub fn compile_knowledge_base(
    statements: Vec<Statement>,
    library: Arc<PredicateLibrary>,
    max_distance: Option<f32>,
) -> KnowledgeBase {
    let mut kb = KnowledgeBase::new(library);
    for stmt in statements {
        match stmt {
            Statement::Rule(r) => {
                kb.add_rule(r);
            }
            Statement::Property(p) => kb.add_property(&p),
            Statement::Problem(_) => {}
        }
    }
    kb.finalize(max_distance);
    kb
}

/// The problems found in a batch of parsed statements, in order.
pub fn collect_problems(statements: &[Statement]) -> Vec<Problem> {
    statements
        .iter()
        .filter_map(|s| match s {
            Statement::Problem(p) => Some(p.clone()),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_statements;

    fn engine_for(kb_src: &str, config: &Config) -> Engine {
        let statements = parse_statements(kb_src).expect("parse kb");
        let kb = compile_knowledge_base(statements, PredicateLibrary::new(), None);
        Engine::from_config(Arc::new(kb), config, &ComponentRegistry::new()).expect("engine")
    }

    fn problem_from(src: &str) -> Problem {
        let statements = parse_statements(src).expect("parse problem");
        collect_problems(&statements).remove(0)
    }

    #[test]
    fn registry_resolves_builtins_and_rejects_unknown() {
        let registry = ComponentRegistry::new();
        let params = Params::default();
        assert!(registry.resolve_enumerator("depth", &params).is_ok());
        assert!(registry.resolve_enumerator("astar", &params).is_ok());
        assert!(registry.resolve_enumerator("bogus", &params).is_err());
        assert!(registry.resolve_converter("weighted", &params).is_ok());
        assert!(registry.resolve_converter("bogus", &params).is_err());
    }

    #[test]
    fn registry_accepts_custom_components() {
        let mut registry = ComponentRegistry::new();
        registry.register_enumerator(
            "mine",
            Arc::new(|_params| {
                Ok(LhsEnumerator::Custom {
                    name: "mine".to_string(),
                    run: Arc::new(|problem, kb, _deadline| {
                        crate::lhs::seed_graph(problem, kb)
                    }),
                })
            }),
        );
        let e = registry
            .resolve_enumerator("mine", &Params::default())
            .expect("custom");
        assert_eq!(e.repr(), "custom-enumerator(mine)");
    }

    #[test]
    fn single_rule_problem_solves_end_to_end() {
        let engine = engine_for("rule r { p(x) => q(x) }", &Config::default());
        let outcome = engine
            .infer_one(problem_from("problem t { observe { q(A) } }"))
            .expect("infer");

        assert_eq!(outcome.solution.state, SolutionState::Optimal);
        assert!(!outcome.is_unresolved());
        // The observation is always active.
        assert!(outcome.active_nodes().contains(&0));
    }

    #[test]
    fn empty_observation_is_an_input_error() {
        let engine = engine_for("rule r { p(x) => q(x) }", &Config::default());
        let problem = Problem {
            name: "t".into(),
            observe: crate::ast::Conjunction::default(),
            require: crate::ast::Conjunction::default(),
            choices: Vec::new(),
        };
        assert!(matches!(
            engine.infer_one(problem),
            Err(DavError::Input(_))
        ));
    }

    #[test]
    fn batch_inference_preserves_problem_order() {
        let mut config = Config::default();
        config.threads = 2;
        let engine = engine_for("rule r { p(x) => q(x) }", &config);
        let problems = vec![
            problem_from("problem t1 { observe { q(A) } }"),
            problem_from("problem t2 { observe { p(B) } }"),
        ];
        let outcomes = engine.infer(problems);
        assert_eq!(outcomes.len(), 2);
        assert_eq!(
            outcomes[0].as_ref().expect("t1").problem.name,
            "t1"
        );
        assert_eq!(
            outcomes[1].as_ref().expect("t2").problem.name,
            "t2"
        );
    }

    #[test]
    fn zero_timeout_marks_partial_output() {
        let statements =
            parse_statements("rule r1 { q(x) => p(x) }\nrule r2 { p(x) => q(x) }").expect("kb");
        let kb = compile_knowledge_base(statements, PredicateLibrary::new(), None);
        let engine = Engine::new(
            Arc::new(kb),
            LhsEnumerator::Depth(DepthEnumerator {
                max_depth: None,
                ..DepthEnumerator::default()
            }),
            IlpConverter::Weighted(
                crate::ilp::convert::WeightedConverter::from_params(&Params::default())
                    .expect("converter"),
            ),
            Solver::default(),
            Some(Duration::ZERO),
            1,
        );
        std::thread::sleep(Duration::from_millis(2));
        let outcome = engine
            .infer_one(problem_from("problem t { observe { p(A) } }"))
            .expect("infer");
        assert!(outcome.is_timed_out());
        assert_ne!(outcome.solution.state, SolutionState::Optimal);
    }
}
