//! # Dav: a Weighted Abductive Reasoning Engine
//!
//! Given a knowledge base of weighted first-order Horn-style rules and a
//! problem of observed literals, dav finds the *best explanation*: the
//! minimum-cost set of hypotheses, unifications, and rule applications
//! that entails the observations.
//!
//! ## Pipeline Architecture
//!
//! ```text
//! problem / rule / property files
//!     ↓
//! [Parser]                  → AST (terms, literals, rules, problems)
//!     ↓
//! [Knowledge base]          → axiom store + indices + distance oracle
//!     ↓
//! [LHS enumeration]         → proof graph (latent hypotheses set)
//!     |                       depth-bounded or A* reachability-guided
//!     ↓
//! [ILP conversion]          → variables, constraints, objective
//!     |                       null / weighted / costed cost models
//!     ↓
//! [Solver]                  → optimal (or feasible) assignment
//!     ↓
//! [Interpretation + XML]    → hypothesized literals with costs
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use dav::prelude::*;
//!
//! let statements = dav::parser::parse_statements(source)?;
//! let kb = dav::engine::compile_knowledge_base(
//!     statements, PredicateLibrary::new(), None);
//!
//! let engine = Engine::from_config(
//!     Arc::new(kb), &Config::default(), &ComponentRegistry::new())?;
//! let outcome = engine.infer_one(problem)?;
//! println!("{}", dav::output::write_xml(&outcome)?);
//! ```
//!
//! ## Module Organization
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `ast` | Terms, literals, conjunctions, rules, problems |
//! | `parser` | The `problem`/`rule`/`property` grammar |
//! | `kb` | Predicate interning, axiom store, distance oracle, persistence |
//! | `pg` | The proof graph and its indices |
//! | `lhs` | Depth-bounded and A* enumeration |
//! | `ilp` | ILP model, converters, cost providers |
//! | `solver` | Solver facade + exact branch-and-bound backend |
//! | `engine` | Per-problem pipeline, worker pool, deadlines |
//! | `output` | XML / JSON result emission |

pub mod ast;
pub mod config;
pub mod engine;
pub mod ilp;
pub mod kb;
pub mod lhs;
pub mod output;
pub mod parser;
pub mod pg;
pub mod solver;

// Re-export the types most callers need.
pub use ast::{Conjunction, Literal, Problem, Rule, Statement, Term};
pub use config::{Config, ConfigError, Params};
pub use engine::{
    compile_knowledge_base, collect_problems, ComponentRegistry, DavError, Deadline, Engine,
    InferenceOutcome,
};
pub use ilp::{IlpConverter, IlpProblem, IlpSolution, SolutionState};
pub use kb::{Axiom, AxiomId, KnowledgeBase, PredicateId, PredicateLibrary};
pub use lhs::{AStarEnumerator, DepthEnumerator, LhsEnumerator};
pub use parser::{parse_statements, parse_statements_lenient, ParseError};
pub use pg::{NodeId, NodeKind, ProofGraph};
pub use solver::Solver;

/// Convenience imports for embedding the engine.
pub mod prelude {
    pub use crate::config::{Config, Params};
    pub use crate::engine::{ComponentRegistry, Engine};
    pub use crate::kb::{KnowledgeBase, PredicateLibrary};
    pub use crate::{Literal, Problem, Rule, Statement, Term};
}
