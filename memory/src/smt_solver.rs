// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

use crate::constant_domain::ConstantDomain;
use crate::error::Result;
use crate::model::ConcreteModel;
use crate::options::Options;
use crate::path_constraints::PathConstraints;
use crate::symbolic_value::SymbolicValue;
use crate::translator::TranslationSession;

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// The result of using the solver to solve an expression.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum SmtResult {
    /// There is an assignment of values to the free variables for which the expression is true.
    Satisfiable,
    /// There is a proof that no assignment of values to the free variables can make the expression true.
    Unsatisfiable,
    /// The solver timed out, was interrupted, or gave up while trying to solve this expression.
    Undefined,
}

/// An assignment of values to the free symbols of a query, able to evaluate translated terms.
pub trait SmtModel {
    /// Evaluates a translated (placeholder free) term. Returns None if the term has a sort the
    /// model cannot produce a constant for, such as an array sort.
    fn evaluate(&self, term: &Arc<SymbolicValue>) -> Option<ConstantDomain>;
}

/// The functionality that a solver must expose in order for the memory core to use it.
pub trait SmtSolver<SmtExpressionType> {
    type Model: SmtModel;

    /// Returns a string representation of the given expression for use in debugging.
    fn as_debug_string(&self, expression: &SmtExpressionType) -> String;

    /// Adds the given expression to the current context.
    fn assert(&self, expression: &SmtExpressionType);

    /// Destroy the current context and restore the containing context as current.
    fn backtrack(&self);

    /// Translate a (translated) symbolic value into a corresponding expression for the solver.
    fn get_as_smt_predicate(&self, expression: &Arc<SymbolicValue>) -> SmtExpressionType;

    /// Returns the model of the last satisfiable solve, if the solver can produce one.
    fn get_model(&self) -> Option<Self::Model>;

    /// Returns an expression that is the logical inverse of the given expression.
    fn invert_predicate(&self, expression: &SmtExpressionType) -> SmtExpressionType;

    /// Asks a running solve to stop. The interrupted solve returns SmtResult::Undefined.
    fn interrupt(&self) {}

    /// Create a nested context. When a matching backtrack is called, the current context (state)
    /// of the solver will be restored to what it was when this was called.
    fn set_backtrack_position(&self);

    /// Try to find an assignment of values to the free variables so that the assertions in the
    /// current context are all true.
    fn solve(&self, timeout: Duration) -> SmtResult;

    /// Establish if the given expression can be satisfied (or not) without changing the current context.
    fn solve_expression(&self, expression: &SmtExpressionType, timeout: Duration) -> SmtResult {
        self.set_backtrack_position();
        self.assert(expression);
        let result = self.solve(timeout);
        self.backtrack();
        result
    }
}

/// A dummy implementation of SmtSolver to use in configurations where a real SMT solver is not available or required.
#[derive(Default)]
pub struct SolverStub {}

impl SmtSolver<()> for SolverStub {
    type Model = ConcreteModel;

    fn as_debug_string(&self, _: &()) -> String {
        String::from("not implemented")
    }

    fn assert(&self, _: &()) {}

    fn backtrack(&self) {}

    fn get_as_smt_predicate(&self, _expression: &Arc<SymbolicValue>) {}

    fn get_model(&self) -> Option<ConcreteModel> {
        None
    }

    fn invert_predicate(&self, _: &()) {}

    fn set_backtrack_position(&self) {}

    fn solve(&self, _timeout: Duration) -> SmtResult {
        SmtResult::Undefined
    }
}

/// The outcome of checking a set of constraints.
#[derive(Debug)]
pub enum SolverOutcome<M> {
    Satisfiable(M),
    Unsatisfiable,
    /// The solver could not decide. Callers drop the branch.
    Unknown,
}

impl<M> SolverOutcome<M> {
    pub fn is_satisfiable(&self) -> bool {
        matches!(self, SolverOutcome::Satisfiable(..))
    }
}

/// Checks the path constraints with the solver. A store that already knows it is contradicting
/// is reported unsatisfiable without a solver call.
pub fn check<S, T>(
    solver: &S,
    session: &mut TranslationSession,
    constraints: &PathConstraints,
    timeout: Duration,
) -> Result<SolverOutcome<S::Model>>
where
    S: SmtSolver<T>,
{
    if constraints.is_false() {
        trace!("unsat core {:?}", constraints.unsat_core());
        return Ok(SolverOutcome::Unsatisfiable);
    }
    let hard = session.translate_constraints(constraints)?;
    Ok(solve_terms(solver, &hard, &[], timeout))
}

/// Like `check`, but when the options ask for it first tries to find a model in which integer
/// inputs are small. The soft constraints are dropped if that attempt does not succeed.
pub fn check_with_soft_constraints<S, T>(
    solver: &S,
    session: &mut TranslationSession,
    constraints: &PathConstraints,
    options: &Options,
) -> Result<SolverOutcome<S::Model>>
where
    S: SmtSolver<T>,
{
    if !options.use_soft_constraints || constraints.is_false() {
        return check(solver, session, constraints, options.solver_timeout());
    }
    let hard = session.translate_constraints(constraints)?;
    let soft = constraints
        .soft_constraints(options.soft_bound)
        .iter()
        .map(|c| session.translate(c))
        .collect::<Result<Vec<_>>>()?;
    let outcome = solve_terms(solver, &hard, &soft, options.solver_timeout());
    if outcome.is_satisfiable() {
        return Ok(outcome);
    }
    debug!("dropping {} soft constraints", soft.len());
    Ok(solve_terms(solver, &hard, &[], options.solver_timeout()))
}

fn solve_terms<S, T>(
    solver: &S,
    hard: &[Arc<SymbolicValue>],
    soft: &[Arc<SymbolicValue>],
    timeout: Duration,
) -> SolverOutcome<S::Model>
where
    S: SmtSolver<T>,
{
    solver.set_backtrack_position();
    for term in hard.iter().chain(soft.iter()) {
        let predicate = solver.get_as_smt_predicate(term);
        solver.assert(&predicate);
    }
    let outcome = match solver.solve(timeout) {
        SmtResult::Satisfiable => match solver.get_model() {
            Some(model) => SolverOutcome::Satisfiable(model),
            None => SolverOutcome::Unknown,
        },
        SmtResult::Unsatisfiable => SolverOutcome::Unsatisfiable,
        SmtResult::Undefined => SolverOutcome::Unknown,
    };
    solver.backtrack();
    outcome
}
