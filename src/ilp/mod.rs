//! # ILP Problem Model
//!
//! Binary variables, linear constraints, and the baseline encoding of a
//! proof graph shared by every converter:
//!
//! - one binary variable per node, hypernode, and edge;
//! - observables, requirements, and labels are forced active;
//! - a node needs an active hypernode containing it, a hypernode needs its
//!   parental edge, an active hypernode activates its member nodes;
//! - a chain edge is equivalent to its tail and head hypernodes both being
//!   active; a unify edge requires its endpoints, their master hypernodes,
//!   and its generated equality nodes;
//! - at most one outgoing HYPOTHESIZE edge per hypernode;
//! - transitive unification coherence and mutual-exclusion constraints;
//! - one XOR constraint per choice group.
//!
//! The objective is always minimized; converters fill in the coefficients.

use crate::pg::{EdgeId, EdgeKind, HypernodeId, NodeId, NodeKind, ProofGraph};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub mod convert;
pub mod cost;

pub use convert::{IlpConverter, SolutionDecorator};
pub use cost::{BasicCostProvider, CostOperator, CostProvider, ParameterizedCostProvider};

pub type VariableId = usize;
pub type ConstraintId = usize;

// ============================================================================
// Variables and constraints
// ============================================================================

/// A binary decision variable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    /// Objective coefficient (costs are paid when the variable is 1).
    pub coefficient: f64,
    /// Forced constant, when the variable is not free.
    pub fixed: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConstraintOperator {
    LessEq,
    GreaterEq,
    Eq,
}

/// A linear constraint `Σ coeff·var  op  bound`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Constraint {
    pub name: String,
    pub terms: Vec<(VariableId, f64)>,
    pub operator: ConstraintOperator,
    pub bound: f64,
    /// Hint that a solver may add this constraint lazily.
    pub lazy: bool,
}

impl Constraint {
    pub fn new(name: impl Into<String>, operator: ConstraintOperator, bound: f64) -> Self {
        Constraint {
            name: name.into(),
            terms: Vec::new(),
            operator,
            bound,
            lazy: false,
        }
    }

    pub fn add_term(&mut self, var: VariableId, coeff: f64) {
        self.terms.push((var, coeff));
    }

    pub fn is_satisfied(&self, values: &[f64]) -> bool {
        let lhs: f64 = self
            .terms
            .iter()
            .map(|&(v, c)| c * values.get(v).copied().unwrap_or(0.0))
            .sum();
        match self.operator {
            ConstraintOperator::LessEq => lhs <= self.bound + 1e-9,
            ConstraintOperator::GreaterEq => lhs >= self.bound - 1e-9,
            ConstraintOperator::Eq => (lhs - self.bound).abs() <= 1e-9,
        }
    }
}

// ============================================================================
// Solutions
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolutionState {
    Optimal,
    /// Feasible but found under a timeout; optimality was abandoned.
    SubOptimal,
    Infeasible,
    NotAvailable,
}

/// An assignment produced by a solver.
#[derive(Debug, Clone)]
pub struct IlpSolution {
    pub values: Vec<f64>,
    pub objective: f64,
    pub state: SolutionState,
}

impl IlpSolution {
    pub fn infeasible() -> Self {
        IlpSolution {
            values: Vec::new(),
            objective: 0.0,
            state: SolutionState::Infeasible,
        }
    }

    pub fn variable_is_active(&self, var: VariableId) -> bool {
        self.values.get(var).copied().unwrap_or(0.0) > 0.5
    }
}

/// Decides which graph elements a variable assignment makes "active".
#[derive(Debug, Clone, Copy, Default)]
pub enum SolutionInterpreter {
    #[default]
    Basic,
}

impl SolutionInterpreter {
    pub fn node_is_active(&self, prob: &IlpProblem, sol: &IlpSolution, node: NodeId) -> bool {
        prob.find_variable_with_node(node)
            .map_or(false, |v| sol.variable_is_active(v))
    }

    pub fn hypernode_is_active(
        &self,
        prob: &IlpProblem,
        sol: &IlpSolution,
        hn: HypernodeId,
    ) -> bool {
        prob.find_variable_with_hypernode(hn)
            .map_or(false, |v| sol.variable_is_active(v))
    }

    pub fn edge_is_active(&self, prob: &IlpProblem, sol: &IlpSolution, edge: EdgeId) -> bool {
        prob.find_variable_with_edge(edge)
            .map_or(false, |v| sol.variable_is_active(v))
    }
}

// ============================================================================
// The problem
// ============================================================================

pub struct IlpProblem {
    variables: Vec<Variable>,
    constraints: Vec<Constraint>,

    node_to_var: HashMap<NodeId, VariableId>,
    hypernode_to_var: HashMap<HypernodeId, VariableId>,
    edge_to_var: HashMap<EdgeId, VariableId>,

    interpreter: SolutionInterpreter,
    decorators: Vec<SolutionDecorator>,
    attributes: Vec<(String, String)>,
    timed_out: bool,
}

impl IlpProblem {
    pub fn new(interpreter: SolutionInterpreter) -> Self {
        IlpProblem {
            variables: Vec::new(),
            constraints: Vec::new(),
            node_to_var: HashMap::new(),
            hypernode_to_var: HashMap::new(),
            edge_to_var: HashMap::new(),
            interpreter,
            decorators: Vec::new(),
            attributes: Vec::new(),
            timed_out: false,
        }
    }

    // ------------------------------------------------------------------
    // Construction
    // ------------------------------------------------------------------

    pub fn add_variable(&mut self, name: impl Into<String>, coefficient: f64) -> VariableId {
        let id = self.variables.len();
        self.variables.push(Variable {
            name: name.into(),
            coefficient,
            fixed: None,
        });
        id
    }

    pub fn add_variable_of_node(&mut self, node: NodeId) -> VariableId {
        let var = self.add_variable(format!("n:{node}"), 0.0);
        self.node_to_var.insert(node, var);
        var
    }

    pub fn add_variable_of_hypernode(&mut self, hn: HypernodeId) -> VariableId {
        let var = self.add_variable(format!("hn:{hn}"), 0.0);
        self.hypernode_to_var.insert(hn, var);
        var
    }

    pub fn add_variable_of_edge(&mut self, edge: EdgeId) -> VariableId {
        let var = self.add_variable(format!("e:{edge}"), 0.0);
        self.edge_to_var.insert(edge, var);
        var
    }

    /// Force a variable to a constant value.
    pub fn fix_variable(&mut self, var: VariableId, value: f64) {
        self.variables[var].fixed = Some(value);
    }

    pub fn add_constraint(&mut self, constraint: Constraint) -> ConstraintId {
        let id = self.constraints.len();
        self.constraints.push(constraint);
        id
    }

    pub fn add_decorator(&mut self, decorator: SolutionDecorator) {
        self.decorators.push(decorator);
    }

    pub fn add_attribute(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.attributes.push((name.into(), value.into()));
    }

    pub fn set_timed_out(&mut self) {
        self.timed_out = true;
    }

    // ------------------------------------------------------------------
    // Access
    // ------------------------------------------------------------------

    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn variable(&self, var: VariableId) -> &Variable {
        &self.variables[var]
    }

    pub fn variable_mut(&mut self, var: VariableId) -> &mut Variable {
        &mut self.variables[var]
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    pub fn find_variable_with_node(&self, node: NodeId) -> Option<VariableId> {
        self.node_to_var.get(&node).copied()
    }

    pub fn find_variable_with_hypernode(&self, hn: HypernodeId) -> Option<VariableId> {
        self.hypernode_to_var.get(&hn).copied()
    }

    pub fn find_variable_with_edge(&self, edge: EdgeId) -> Option<VariableId> {
        self.edge_to_var.get(&edge).copied()
    }

    pub fn interpreter(&self) -> SolutionInterpreter {
        self.interpreter
    }

    pub fn decorators(&self) -> &[SolutionDecorator] {
        &self.decorators
    }

    pub fn attributes(&self) -> &[(String, String)] {
        &self.attributes
    }

    pub fn is_timed_out(&self) -> bool {
        self.timed_out
    }

    pub fn objective_of(&self, values: &[f64]) -> f64 {
        self.variables
            .iter()
            .enumerate()
            .map(|(i, v)| v.coefficient * values.get(i).copied().unwrap_or(0.0))
            .sum()
    }

    pub fn is_feasible(&self, values: &[f64]) -> bool {
        self.variables
            .iter()
            .enumerate()
            .all(|(i, v)| {
                v.fixed
                    .map_or(true, |f| (values.get(i).copied().unwrap_or(0.0) - f).abs() < 1e-9)
            })
            && self.constraints.iter().all(|c| c.is_satisfied(values))
    }

    // ------------------------------------------------------------------
    // Baseline proof-graph encoding
    // ------------------------------------------------------------------

    /// Encode the structural part of a proof graph. Every converter calls
    /// this before laying its cost model on top.
    pub fn convert_proof_graph(&mut self, graph: &ProofGraph) {
        // Variables for nodes; problem literals are forced active.
        for node in graph.nodes() {
            let var = self.add_variable_of_node(node.id);
            match node.kind {
                NodeKind::Observable | NodeKind::Required => self.fix_variable(var, 1.0),
                NodeKind::Label if !graph.choice_groups().iter().any(|g| g.contains(&node.id)) => {
                    self.fix_variable(var, 1.0);
                }
                _ => {}
            }
        }
        for hn in 0..graph.hypernodes().len() {
            self.add_variable_of_hypernode(hn);
        }
        for edge in graph.edges() {
            self.add_variable_of_edge(edge.id);
        }

        self.add_constraints_of_node_dependence(graph);
        self.add_constraints_of_hypernode_membership(graph);
        self.add_constraints_of_hypernode_parents(graph);
        self.add_constraints_of_edge_conditions(graph);
        self.add_constraints_of_exclusive_chains(graph);
        self.add_constraints_of_transitive_unifications(graph);
        self.add_constraints_of_mutual_exclusions(graph);
        self.add_constraints_of_requirements(graph);
        self.add_constraints_of_choices(graph);
    }

    /// `node ≤ Σ hypernodes containing it` (nodes outside any hypernode are
    /// unconstrained here).
    fn add_constraints_of_node_dependence(&mut self, graph: &ProofGraph) {
        for node in graph.nodes() {
            let Some(hns) = graph.hypernodes_with_node(node.id) else {
                continue;
            };
            let node_var = self.node_to_var[&node.id];
            let mut con = Constraint::new(
                format!("node-dep:n({})", node.id),
                ConstraintOperator::GreaterEq,
                0.0,
            );
            con.add_term(node_var, -1.0);
            for &hn in hns {
                con.add_term(self.hypernode_to_var[&hn], 1.0);
            }
            self.add_constraint(con);
        }
    }

    /// An active hypernode activates each of its member nodes.
    fn add_constraints_of_hypernode_membership(&mut self, graph: &ProofGraph) {
        for (hn, members) in graph.hypernodes().iter().enumerate() {
            let hn_var = self.hypernode_to_var[&hn];
            for &n in members {
                let mut con = Constraint::new(
                    format!("hn-member:hn({hn}):n({n})"),
                    ConstraintOperator::GreaterEq,
                    0.0,
                );
                con.add_term(self.node_to_var[&n], 1.0);
                con.add_term(hn_var, -1.0);
                self.add_constraint(con);
            }
        }
    }

    /// `hypernode ≤ Σ edges whose head it is`: a produced hypernode needs
    /// a producing edge (chain or unification).
    fn add_constraints_of_hypernode_parents(&mut self, graph: &ProofGraph) {
        let mut parents: std::collections::BTreeMap<HypernodeId, Vec<EdgeId>> =
            std::collections::BTreeMap::new();
        for edge in graph.edges() {
            if let Some(h) = edge.head {
                parents.entry(h).or_default().push(edge.id);
            }
        }
        for (hn, edges) in parents {
            let mut con = Constraint::new(
                format!("hn-parent:hn({hn})"),
                ConstraintOperator::GreaterEq,
                0.0,
            );
            con.add_term(self.hypernode_to_var[&hn], -1.0);
            for e in edges {
                con.add_term(self.edge_to_var[&e], 1.0);
            }
            self.add_constraint(con);
        }
    }

    /// Chain edges are equivalent to tail ∧ head; unify edges require their
    /// endpoint nodes, the endpoints' master hypernodes, and the equality
    /// head when one exists.
    fn add_constraints_of_edge_conditions(&mut self, graph: &ProofGraph) {
        for edge in graph.edges() {
            let e_var = self.edge_to_var[&edge.id];
            let mut required: Vec<VariableId> = Vec::new();

            match edge.kind {
                EdgeKind::Hypothesize | EdgeKind::Implicate => {
                    let tail_var = self.hypernode_to_var[&edge.tail];
                    let head_var =
                        edge.head.map(|h| self.hypernode_to_var[&h]).expect("chain head");
                    required.push(tail_var);
                    required.push(head_var);

                    // e ≥ tail + head - 1: chaining is not optional once
                    // both sides hold.
                    let mut con = Constraint::new(
                        format!("chain-fire:e({})", edge.id),
                        ConstraintOperator::LessEq,
                        1.0,
                    );
                    con.add_term(tail_var, 1.0);
                    con.add_term(head_var, 1.0);
                    con.add_term(e_var, -1.0);
                    self.add_constraint(con);
                }
                EdgeKind::Unify => {
                    let tail = graph.hypernode(edge.tail);
                    for &n in tail {
                        required.push(self.node_to_var[&n]);
                        if let Some(master) = graph.node(n).master {
                            required.push(self.hypernode_to_var[&master]);
                        }
                    }
                    if let Some(h) = edge.head {
                        required.push(self.hypernode_to_var[&h]);
                    }
                }
            }

            required.sort_unstable();
            required.dedup();
            for (k, req) in required.into_iter().enumerate() {
                let mut con = Constraint::new(
                    format!("edge-cond:e({}):{k}", edge.id),
                    ConstraintOperator::GreaterEq,
                    0.0,
                );
                con.add_term(req, 1.0);
                con.add_term(e_var, -1.0);
                self.add_constraint(con);
            }
        }
    }

    /// At most one outgoing HYPOTHESIZE edge per hypernode.
    fn add_constraints_of_exclusive_chains(&mut self, graph: &ProofGraph) {
        let mut outgoing: std::collections::BTreeMap<HypernodeId, Vec<EdgeId>> =
            std::collections::BTreeMap::new();
        for edge in graph.edges() {
            if edge.kind == EdgeKind::Hypothesize {
                outgoing.entry(edge.tail).or_default().push(edge.id);
            }
        }
        for (hn, edges) in outgoing {
            if edges.len() < 2 {
                continue;
            }
            let mut con = Constraint::new(
                format!("exclusive-chains:hn({hn})"),
                ConstraintOperator::LessEq,
                1.0,
            );
            for e in edges {
                con.add_term(self.edge_to_var[&e], 1.0);
            }
            self.add_constraint(con);
        }
    }

    /// If `a~b` and `b~c` are both active, `a~c` must be too; when no such
    /// edge exists the two cannot be active together.
    fn add_constraints_of_transitive_unifications(&mut self, graph: &ProofGraph) {
        let mut unify_edge: HashMap<(NodeId, NodeId), EdgeId> = HashMap::new();
        let mut partners: HashMap<NodeId, Vec<(NodeId, EdgeId)>> = HashMap::new();
        for edge in graph.edges() {
            if edge.is_unify() {
                let hn = graph.hypernode(edge.tail);
                let (a, b) = (hn[0], hn[1]);
                unify_edge.insert((a.min(b), a.max(b)), edge.id);
                partners.entry(a).or_default().push((b, edge.id));
                partners.entry(b).or_default().push((a, edge.id));
            }
        }

        let mut pivots: Vec<&NodeId> = partners.keys().collect();
        pivots.sort_unstable();
        for &b in pivots {
            let around = &partners[&b];
            for (i, &(a, e_ab)) in around.iter().enumerate() {
                for &(c, e_bc) in &around[i + 1..] {
                    if a == c {
                        continue;
                    }
                    let mut con = Constraint::new(
                        format!("transitive-unify:n({a}):n({b}):n({c})"),
                        ConstraintOperator::LessEq,
                        1.0,
                    );
                    con.lazy = true;
                    con.add_term(self.edge_to_var[&e_ab], 1.0);
                    con.add_term(self.edge_to_var[&e_bc], 1.0);
                    if let Some(&e_ac) = unify_edge.get(&(a.min(c), a.max(c))) {
                        con.add_term(self.edge_to_var[&e_ac], -1.0);
                    }
                    self.add_constraint(con);
                }
            }
        }
    }

    /// `n1 + n2 + Σ eq ≤ 1 + #eq`: the pair cannot hold while its conflict
    /// unifier does. Pairs conditioned on an equality that has no node in
    /// the graph can never fire and are skipped.
    fn add_constraints_of_mutual_exclusions(&mut self, graph: &ProofGraph) {
        let mut entries: Vec<(&(NodeId, NodeId), &crate::pg::Unifier)> =
            graph.mutual_exclusions().iter().collect();
        entries.sort_by_key(|(k, _)| **k);

        'entry: for (&(n1, n2), unifier) in entries {
            let mut con = Constraint::new(
                format!("mutual-exclusion:n({n1}):n({n2})"),
                ConstraintOperator::LessEq,
                1.0 + unifier.len() as f64,
            );
            if n1 == n2 {
                con.add_term(self.node_to_var[&n1], 2.0);
            } else {
                con.add_term(self.node_to_var[&n1], 1.0);
                con.add_term(self.node_to_var[&n2], 1.0);
            }
            for (t1, t2) in unifier.pairs() {
                let Some(eq) = graph.find_equality_node(t1, t2) else {
                    continue 'entry; // condition unreachable in this graph
                };
                con.add_term(self.node_to_var[&eq], 1.0);
            }
            self.add_constraint(con);
        }

        // Right-unique obligations: keys co-referring forces the values to.
        for ob in graph.right_unique_obligations() {
            let Some(val_eq) = graph.find_equality_node(&ob.value_pair.0, &ob.value_pair.1)
            else {
                continue; // handled as a hard exclusion by post_process
            };
            let mut con = Constraint::new(
                format!("right-unique:n({}):n({})", ob.n1, ob.n2),
                ConstraintOperator::LessEq,
                1.0 + ob.key_unifier.len() as f64,
            );
            con.add_term(self.node_to_var[&ob.n1], 1.0);
            con.add_term(self.node_to_var[&ob.n2], 1.0);
            let mut all_keys_present = true;
            for (t1, t2) in ob.key_unifier.pairs() {
                match graph.find_equality_node(t1, t2) {
                    Some(eq) => con.add_term(self.node_to_var[&eq], 1.0),
                    None => all_keys_present = false,
                }
            }
            if !all_keys_present {
                continue; // keys can never co-refer here
            }
            con.add_term(self.node_to_var[&val_eq], -1.0);
            self.add_constraint(con);
        }
    }

    /// A requirement is forced active and must be unified with at least one
    /// other node to count as proven.
    fn add_constraints_of_requirements(&mut self, graph: &ProofGraph) {
        for &req in graph.requirements() {
            let edges = graph.unify_edges_of_node(req);
            let mut con = Constraint::new(
                format!("requirement:n({req})"),
                ConstraintOperator::GreaterEq,
                1.0,
            );
            for e in &edges {
                con.add_term(self.edge_to_var[e], 1.0);
            }
            self.add_constraint(con);
        }
    }

    /// Exactly one literal per choice group.
    fn add_constraints_of_choices(&mut self, graph: &ProofGraph) {
        for (i, group) in graph.choice_groups().iter().enumerate() {
            let mut con = Constraint::new(format!("choice:{i}"), ConstraintOperator::Eq, 1.0);
            for &n in group {
                con.add_term(self.node_to_var[&n], 1.0);
            }
            self.add_constraint(con);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Conjunction, Literal, Statement, Term};
    use crate::engine::timeout::Deadline;
    use crate::kb::{KnowledgeBase, PredicateLibrary};
    use crate::lhs::DepthEnumerator;
    use crate::parser::parse_statements;
    use std::sync::Arc;

    fn kb_from(src: &str) -> Arc<KnowledgeBase> {
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
        Arc::new(kb)
    }

    fn lit(pred: &str, terms: &[&str]) -> Literal {
        Literal::new(pred, terms.iter().map(|t| Term::new(*t)).collect())
    }

    fn graph_for(kb_src: &str, observe: &[Literal]) -> ProofGraph {
        let kb = kb_from(kb_src);
        let problem = crate::ast::Problem {
            name: "t".into(),
            observe: Conjunction::new(observe.to_vec()),
            require: Conjunction::default(),
            choices: Vec::new(),
        };
        DepthEnumerator::default()
            .execute(&problem, &kb, &Deadline::unlimited())
            .expect("enumerate")
    }

    #[test]
    fn constraint_satisfaction_respects_operator() {
        let mut con = Constraint::new("c", ConstraintOperator::LessEq, 1.0);
        con.add_term(0, 1.0);
        con.add_term(1, 1.0);
        assert!(con.is_satisfied(&[1.0, 0.0]));
        assert!(!con.is_satisfied(&[1.0, 1.0]));

        let mut con = Constraint::new("c", ConstraintOperator::GreaterEq, 1.0);
        con.add_term(0, 1.0);
        assert!(!con.is_satisfied(&[0.0]));
        assert!(con.is_satisfied(&[1.0]));
    }

    #[test]
    fn every_element_gets_a_variable() {
        let g = graph_for(
            "rule r { eat(E, X, Y) ^ man(X) => apple(Y) }",
            &[lit("apple", &["z"])],
        );
        let mut prob = IlpProblem::new(SolutionInterpreter::Basic);
        prob.convert_proof_graph(&g);

        for n in g.nodes() {
            assert!(prob.find_variable_with_node(n.id).is_some());
        }
        for hn in 0..g.hypernodes().len() {
            assert!(prob.find_variable_with_hypernode(hn).is_some());
        }
        for e in g.edges() {
            assert!(prob.find_variable_with_edge(e.id).is_some());
        }
        // Observable forced to 1.
        let obs_var = prob.find_variable_with_node(0).expect("var");
        assert_eq!(prob.variable(obs_var).fixed, Some(1.0));
    }

    #[test]
    fn all_zero_violates_forced_observables() {
        let g = graph_for("rule r { p(x) => q(x) }", &[lit("q", &["a"])]);
        let mut prob = IlpProblem::new(SolutionInterpreter::Basic);
        prob.convert_proof_graph(&g);

        let zeros = vec![0.0; prob.variables().len()];
        assert!(!prob.is_feasible(&zeros));
    }

    #[test]
    fn active_head_requires_chain_edge_and_tail() {
        let g = graph_for("rule r { p(x) => q(x) }", &[lit("q", &["a"])]);
        let mut prob = IlpProblem::new(SolutionInterpreter::Basic);
        prob.convert_proof_graph(&g);

        let chain = g.edges().iter().find(|e| e.is_chain()).expect("chain");
        let head = chain.head.expect("head");
        let head_var = prob.find_variable_with_hypernode(head).expect("v");

        // Activate everything consistently: feasible.
        let mut values = vec![1.0; prob.variables().len()];
        assert!(prob.is_feasible(&values));

        // Head hypernode active without its parental edge: infeasible.
        let edge_var = prob.find_variable_with_edge(chain.id).expect("v");
        values[edge_var] = 0.0;
        values[head_var] = 1.0;
        assert!(!prob.is_feasible(&values));
    }

    #[test]
    fn mutual_exclusion_forbids_conflicting_pair() {
        let g = graph_for(
            "property parent/2 { asymmetric }\nrule dummy { p(x) => q(x) }",
            &[lit("parent", &["A", "B"]), lit("parent", &["B", "A"])],
        );
        let mut prob = IlpProblem::new(SolutionInterpreter::Basic);
        prob.convert_proof_graph(&g);

        // Both observables are forced active but the exclusion caps their
        // sum at 1: infeasible outright.
        let n0 = prob.find_variable_with_node(0).expect("v");
        let n1 = prob.find_variable_with_node(1).expect("v");
        let mut values = vec![0.0; prob.variables().len()];
        values[n0] = 1.0;
        values[n1] = 1.0;
        assert!(!prob.is_feasible(&values));
    }

    #[test]
    fn choice_group_is_exactly_one() {
        let kb = kb_from("rule r { p(x) => q(x) }");
        let problem = crate::ast::Problem {
            name: "t".into(),
            observe: Conjunction::new(vec![lit("q", &["a"])]),
            require: Conjunction::default(),
            choices: vec![Conjunction::new(vec![
                lit("red", &["a"]),
                lit("green", &["a"]),
            ])],
        };
        let g = DepthEnumerator::default()
            .execute(&problem, &kb, &Deadline::unlimited())
            .expect("enumerate");
        let mut prob = IlpProblem::new(SolutionInterpreter::Basic);
        prob.convert_proof_graph(&g);

        let group = &g.choice_groups()[0];
        let v0 = prob.find_variable_with_node(group[0]).expect("v");
        let v1 = prob.find_variable_with_node(group[1]).expect("v");

        let mut values = vec![1.0; prob.variables().len()];
        // Choice labels are not individually forced.
        assert_eq!(prob.variable(v0).fixed, None);

        values[v0] = 1.0;
        values[v1] = 1.0;
        assert!(!prob.is_feasible(&values), "both choices is too many");
    }

    #[test]
    fn requirement_needs_a_unification() {
        let kb = kb_from("rule r { p(x) => q(x) }");
        let problem = crate::ast::Problem {
            name: "t".into(),
            observe: Conjunction::new(vec![lit("p", &["a"])]),
            require: Conjunction::new(vec![lit("q", &["a"])]),
            choices: Vec::new(),
        };
        let g = DepthEnumerator::default()
            .execute(&problem, &kb, &Deadline::unlimited())
            .expect("enumerate");
        let mut prob = IlpProblem::new(SolutionInterpreter::Basic);
        prob.convert_proof_graph(&g);

        // With every element active (forward chain to q(a) + unification
        // with the requirement) the problem is feasible.
        let values = vec![1.0; prob.variables().len()];
        assert!(prob.is_feasible(&values));

        // Deactivating every unify edge starves the requirement.
        let mut values = vec![1.0; prob.variables().len()];
        for e in g.edges() {
            if e.is_unify() {
                values[prob.find_variable_with_edge(e.id).expect("v")] = 0.0;
            }
        }
        assert!(!prob.is_feasible(&values));
    }
}
