//! # ILP Solving
//!
//! The solver facade the engine calls, plus a built-in exact backend: a
//! depth-first branch-and-bound over the binary variables with
//! per-constraint interval pruning and an objective bound. It is meant for
//! the problem sizes the test suite and small knowledge bases produce; a
//! production deployment would register an external solver as a `Custom`
//! backend.
//!
//! Backends that are not reentrant can opt into a process-wide lock, which
//! serializes calls across the worker pool.

use crate::engine::timeout::Deadline;
use crate::ilp::{ConstraintOperator, IlpProblem, IlpSolution, SolutionState};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

/// Serializes non-reentrant backends across workers.
static SOLVER_LOCK: Mutex<()> = Mutex::new(());

/// The operation contract a custom solver implements.
pub type SolverFn = Arc<dyn Fn(&IlpProblem, &Deadline) -> IlpSolution + Send + Sync>;

#[derive(Clone)]
pub enum Solver {
    Exhaustive(ExhaustiveSolver),
    Custom {
        name: String,
        reentrant: bool,
        run: SolverFn,
    },
}

impl Solver {
    pub fn solve(&self, problem: &IlpProblem, deadline: &Deadline) -> IlpSolution {
        match self {
            Solver::Exhaustive(s) => s.solve(problem, deadline),
            Solver::Custom { reentrant, run, .. } => {
                if *reentrant {
                    run(problem, deadline)
                } else {
                    let _guard = SOLVER_LOCK.lock();
                    run(problem, deadline)
                }
            }
        }
    }

    pub fn repr(&self) -> String {
        match self {
            Solver::Exhaustive(_) => "exhaustive".to_string(),
            Solver::Custom { name, .. } => format!("custom-solver({name})"),
        }
    }
}

impl Default for Solver {
    fn default() -> Self {
        Solver::Exhaustive(ExhaustiveSolver::default())
    }
}

// ============================================================================
// Exhaustive branch-and-bound
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct ExhaustiveSolver;

/// Interval bookkeeping for one constraint under a partial assignment.
struct ConstraintState {
    operator: ConstraintOperator,
    bound: f64,
    /// Contribution of the assigned variables.
    sum: f64,
    /// Lowest possible contribution of the unassigned variables.
    min_rest: f64,
    /// Highest possible contribution of the unassigned variables.
    max_rest: f64,
}

impl ConstraintState {
    fn can_be_satisfied(&self) -> bool {
        let lo = self.sum + self.min_rest;
        let hi = self.sum + self.max_rest;
        match self.operator {
            ConstraintOperator::LessEq => lo <= self.bound + 1e-9,
            ConstraintOperator::GreaterEq => hi >= self.bound - 1e-9,
            ConstraintOperator::Eq => {
                lo <= self.bound + 1e-9 && hi >= self.bound - 1e-9
            }
        }
    }
}

struct Search<'a> {
    problem: &'a IlpProblem,
    deadline: &'a Deadline,
    /// Constraints touched by each variable: `(constraint, coefficient)`.
    var_to_cons: Vec<Vec<(usize, f64)>>,
    cons: Vec<ConstraintState>,
    values: Vec<f64>,
    /// Objective of the incumbent, if any.
    best: Option<(f64, Vec<f64>)>,
    timed_out: bool,
    nodes_visited: u64,
}

impl<'a> Search<'a> {
    fn new(problem: &'a IlpProblem, deadline: &'a Deadline) -> Self {
        let n = problem.variables().len();
        let mut var_to_cons: Vec<Vec<(usize, f64)>> = vec![Vec::new(); n];
        let mut cons = Vec::with_capacity(problem.constraints().len());
        for (ci, c) in problem.constraints().iter().enumerate() {
            let mut min_rest = 0.0;
            let mut max_rest = 0.0;
            for &(v, coeff) in &c.terms {
                var_to_cons[v].push((ci, coeff));
                min_rest += coeff.min(0.0);
                max_rest += coeff.max(0.0);
            }
            cons.push(ConstraintState {
                operator: c.operator,
                bound: c.bound,
                sum: 0.0,
                min_rest,
                max_rest,
            });
        }
        Search {
            problem,
            deadline,
            var_to_cons,
            cons,
            values: vec![0.0; n],
            best: None,
            timed_out: false,
            nodes_visited: 0,
        }
    }

    /// Commit `var = value`; false when some constraint became impossible.
    fn assign(&mut self, var: usize, value: f64) -> bool {
        self.values[var] = value;
        let mut ok = true;
        for &(ci, coeff) in &self.var_to_cons[var] {
            let c = &mut self.cons[ci];
            c.sum += coeff * value;
            c.min_rest -= coeff.min(0.0);
            c.max_rest -= coeff.max(0.0);
            ok &= c.can_be_satisfied();
        }
        ok
    }

    fn unassign(&mut self, var: usize, value: f64) {
        for &(ci, coeff) in &self.var_to_cons[var] {
            let c = &mut self.cons[ci];
            c.sum -= coeff * value;
            c.min_rest += coeff.min(0.0);
            c.max_rest += coeff.max(0.0);
        }
        self.values[var] = 0.0;
    }

    /// Optimistic completion of the current partial objective: every
    /// remaining variable contributes at best its negative coefficient.
    fn lower_bound(&self, partial: f64, next: usize) -> f64 {
        partial
            + self.problem.variables()[next..]
                .iter()
                .map(|v| v.coefficient.min(0.0))
                .sum::<f64>()
    }

    fn dfs(&mut self, var: usize, partial: f64) {
        self.nodes_visited += 1;
        if self.nodes_visited % 4096 == 0 && self.deadline.is_over() {
            self.timed_out = true;
        }
        if self.timed_out {
            return;
        }

        let vars = self.problem.variables();
        if var == vars.len() {
            if self.best.as_ref().map_or(true, |(obj, _)| partial < *obj) {
                self.best = Some((partial, self.values.clone()));
            }
            return;
        }
        if self
            .best
            .as_ref()
            .is_some_and(|(obj, _)| self.lower_bound(partial, var) >= *obj - 1e-12)
        {
            return;
        }

        let coeff = vars[var].coefficient;
        let candidates: [f64; 2] = match vars[var].fixed {
            Some(f) => [f, f64::NAN],
            None if coeff < 0.0 => [1.0, 0.0],
            None => [0.0, 1.0],
        };

        for value in candidates {
            if value.is_nan() {
                break;
            }
            if self.assign(var, value) {
                self.dfs(var + 1, partial + coeff * value);
            }
            self.unassign(var, value);
            if vars[var].fixed.is_some() {
                break;
            }
        }
    }
}

impl ExhaustiveSolver {
    pub fn solve(&self, problem: &IlpProblem, deadline: &Deadline) -> IlpSolution {
        let mut search = Search::new(problem, deadline);
        // A constraint can be impossible before any branching (for one with
        // no satisfiable interval, e.g. an empty sum required ≥ 1).
        if search.cons.iter().all(ConstraintState::can_be_satisfied) {
            search.dfs(0, 0.0);
        }
        debug!(
            variables = problem.variables().len(),
            constraints = problem.constraints().len(),
            visited = search.nodes_visited,
            timed_out = search.timed_out,
            "branch-and-bound finished"
        );

        match (search.best, search.timed_out) {
            (Some((objective, values)), timed_out) => IlpSolution {
                values,
                objective,
                state: if timed_out {
                    SolutionState::SubOptimal
                } else {
                    SolutionState::Optimal
                },
            },
            (None, true) => IlpSolution {
                values: Vec::new(),
                objective: 0.0,
                state: SolutionState::NotAvailable,
            },
            (None, false) => IlpSolution::infeasible(),
        }
    }
}
