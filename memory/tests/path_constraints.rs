// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

mod common;

use common::*;
use symmem::constant_domain::ConstantDomain;
use symmem::error::MergeFailure;
use symmem::expression::ExpressionType;
use symmem::model::ConcreteModel;
use symmem::options::Options;
use symmem::path_constraints::{classify, ConstraintKind, PathConstraints};
use symmem::smt_solver::{check, check_with_soft_constraints, SmtModel, SolverOutcome};
use symmem::symbolic_value::{SymbolicValue, SymbolicValueTrait, FALSE, NULL, TRUE};
use symmem::translator::TranslationSession;

#[test]
fn constraints_are_partitioned_by_shape() {
    init();
    let (x, a, b) = (int_var("x"), input_ref("a"), input_ref("b"));
    let mut pc = PathConstraints::new();
    pc.add(x.less_than(int(5)).and(a.equals(b.clone())));
    pc.add(a.is_subtype("java.lang.String".into()).logical_not());
    pc.add(bool_var("flag"));
    assert_eq!(pc.numeric().iter().count(), 1);
    assert_eq!(pc.equality().iter().count(), 1);
    assert_eq!(pc.type_constraints().iter().count(), 1);
    assert_eq!(pc.logical().iter().count(), 1);
    assert_eq!(pc.constraints().len(), 4);
    assert_eq!(classify(&a.equals(b).logical_not()), ConstraintKind::Equality);
    assert_eq!(classify(&x.equals(int(1))), ConstraintKind::Numeric);
}

#[test]
fn trivial_constraints() {
    init();
    let mut pc = PathConstraints::new();
    pc.add(TRUE.clone());
    assert!(pc.constraints().is_empty());
    assert!(!pc.is_false());
    pc.add(FALSE.clone());
    assert!(pc.is_false());
    assert_eq!(pc.constraints(), vec![FALSE.clone()]);
}

#[test]
fn negation_contradicts() {
    init();
    let x = int_var("x");
    let mut pc = PathConstraints::new();
    pc.add(x.less_than(int(5)));
    assert!(!pc.is_false());
    pc.add(x.less_than(int(5)).logical_not());
    assert!(pc.is_false());
    assert_eq!(pc.unsat_core().map(|core| core.len()), Some(2));
}

#[test]
fn negated_disjunction_is_split() {
    init();
    let (p, q) = (bool_var("p"), bool_var("q"));
    let mut pc = PathConstraints::new();
    pc.add(p.or(q.clone()).logical_not());
    assert_eq!(pc.logical().iter().count(), 2);
    pc.add(q);
    assert!(pc.is_false());
}

#[test]
fn equalities_are_transitive() {
    init();
    let (a, b, c) = (input_ref("a"), input_ref("b"), input_ref("c"));
    let mut pc = PathConstraints::new();
    pc.add(a.equals(b.clone()));
    pc.add(b.equals(c.clone()));
    assert!(!pc.is_false());
    pc.add(a.equals(c).logical_not());
    assert!(pc.is_false());
    assert_eq!(pc.unsat_core().map(|core| core.len()), Some(3));
}

#[test]
fn reference_equal_to_two_addresses_is_contradiction() {
    init();
    let references = SymbolicValue::make_array_constant(
        "refs",
        ExpressionType::array_of(vec![ExpressionType::I32], ExpressionType::Reference),
    );
    let r = references.select(vec![int_var("i")]);
    let mut pc = PathConstraints::new();
    pc.add(r.equals(NULL.clone()));
    assert!(!pc.is_false());
    pc.add(r.equals(SymbolicValue::make_heap_address(1)));
    assert!(pc.is_false());
    assert_eq!(pc.unsat_core().map(|core| core.len()), Some(2));
}

#[test]
fn merge_keeps_common_constraints() {
    init();
    let (x, flag) = (int_var("x"), bool_var("flag"));
    let condition = x.less_than(int(5));
    let mut base = PathConstraints::new();
    base.add(flag.clone());
    let mut left = base.clone();
    left.add(condition.clone());
    let mut right = base.clone();
    right.add(condition.logical_not());

    let (merged, merge_guard) = left.merge(&right, &condition).unwrap();
    assert!(!merged.is_false());
    assert!(merged.constraints().contains(&flag));
    assert_eq!(merge_guard.guard, condition);

    let translated = TranslationSession::default()
        .translate_constraints(&merged)
        .unwrap();
    for value in [0, 7] {
        let model = ConcreteModel::new()
            .with("x", ConstantDomain::I32(value))
            .with("flag", ConstantDomain::True);
        assert!(translated
            .iter()
            .all(|c| model.evaluate(c) == Some(ConstantDomain::True)));
        assert!(holds(&model, &merge_guard.this_constraint) == (value < 5));
        assert!(holds(&model, &merge_guard.other_constraint) == (value >= 5));
    }
}

#[test]
fn merge_failures() {
    init();
    let (a, b) = (input_ref("a"), input_ref("b"));
    let mut left = PathConstraints::new();
    left.add(a.equals(b));
    let right = PathConstraints::new();
    assert_eq!(
        left.merge(&right, &bool_var("g")).err(),
        Some(MergeFailure::EqualityConstraints)
    );
    let mut infeasible = PathConstraints::new();
    infeasible.add(FALSE.clone());
    assert_eq!(
        right.merge(&infeasible, &bool_var("g")).err(),
        Some(MergeFailure::Infeasible)
    );
}

#[test]
fn soft_constraints_bound_integer_variables() {
    init();
    let (x, y) = (int_var("x"), int_var("y"));
    let mut pc = PathConstraints::new();
    pc.add(int(0).less_than(x.addition(y)));
    let soft = pc.soft_constraints(10);
    assert_eq!(soft.len(), 4);
    let model = ConcreteModel::new()
        .with("x", ConstantDomain::I32(11))
        .with("y", ConstantDomain::I32(0));
    assert!(soft.iter().any(|c| !holds(&model, c)));
}

#[test]
fn check_finds_model() {
    init();
    let x = int_var("x");
    let mut pc = PathConstraints::new();
    pc.add(int(3).less_than(x.clone()));
    let solver = EnumeratingSolver::new(enumerate_models(&[("x", ints(0..10))]));
    let mut session = TranslationSession::default();
    match check(&solver, &mut session, &pc, Options::default().solver_timeout()).unwrap() {
        SolverOutcome::Satisfiable(model) => {
            assert_eq!(model.variable("x"), Some(&ConstantDomain::I32(4)))
        }
        outcome => panic!("unexpected outcome {:?}", outcome),
    }

    pc.add(x.less_than(int(2)));
    let outcome = check(&solver, &mut session, &pc, Options::default().solver_timeout()).unwrap();
    assert!(matches!(outcome, SolverOutcome::Unsatisfiable));
}

#[test]
fn known_contradiction_skips_solver() {
    init();
    let mut pc = PathConstraints::new();
    pc.add(FALSE.clone());
    let solver = EnumeratingSolver::new(vec![ConcreteModel::new()]);
    let outcome = check(
        &solver,
        &mut TranslationSession::default(),
        &pc,
        Options::default().solver_timeout(),
    )
    .unwrap();
    assert!(matches!(outcome, SolverOutcome::Unsatisfiable));
    assert_eq!(*solver.solve_count.borrow(), 0);
}

#[test]
fn soft_constraints_prefer_small_inputs() {
    init();
    let x = int_var("x");
    let mut pc = PathConstraints::new();
    pc.add(int(0).less_than(x));
    let candidates = vec![
        ConcreteModel::new().with("x", ConstantDomain::I32(1000)),
        ConcreteModel::new().with("x", ConstantDomain::I32(3)),
    ];
    let solver = EnumeratingSolver::new(candidates);
    let mut options = Options::default();
    let first = |options: &Options| {
        match check_with_soft_constraints(&solver, &mut TranslationSession::new(options), &pc, options)
            .unwrap()
        {
            SolverOutcome::Satisfiable(model) => model.variable("x").cloned(),
            _ => None,
        }
    };
    assert_eq!(first(&options), Some(ConstantDomain::I32(1000)));
    options.use_soft_constraints = true;
    assert_eq!(first(&options), Some(ConstantDomain::I32(3)));
    options.soft_bound = 2;
    // No candidate is within the bound, so the soft constraints are dropped.
    assert_eq!(first(&options), Some(ConstantDomain::I32(1000)));
}
