// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

#![cfg(feature = "z3")]

mod common;

use common::*;
use symmem::collections::SymbolicMapDescriptor;
use symmem::constant_domain::ConstantDomain;
use symmem::expression::ExpressionType;
use symmem::memory::Memory;
use symmem::model::DecodedMemory;
use symmem::options::Options;
use symmem::path_constraints::PathConstraints;
use symmem::region_id::RegionId;
use symmem::smt_solver::{check, SolverOutcome};
use symmem::state::State;
use symmem::symbolic_value::{SymbolicValue, SymbolicValueTrait, TRUE};
use symmem::translator::TranslationSession;
use symmem::update_log::LocationKey;
use symmem::z3_solver::Z3Solver;

use std::sync::Arc;

fn is_satisfiable(solver: &Z3Solver, constraints: &[Arc<SymbolicValue>]) -> bool {
    let mut pc = PathConstraints::new();
    for c in constraints {
        pc.add(c.clone());
    }
    let outcome = check(
        solver,
        &mut TranslationSession::default(),
        &pc,
        Options::default().solver_timeout(),
    )
    .unwrap();
    match outcome {
        SolverOutcome::Satisfiable(..) => true,
        SolverOutcome::Unsatisfiable => false,
        SolverOutcome::Unknown => panic!("solver gave up"),
    }
}

#[test]
fn guarded_field_writes_are_not_missed() {
    init();
    let region = RegionId::field("Node.value", ExpressionType::I32);
    let mut memory = Memory::new(&Options::default());
    let refs: Vec<Arc<SymbolicValue>> = (0..4).map(|i| input_ref(&format!("ref{}", i))).collect();
    let guards: Vec<Arc<SymbolicValue>> = (1..4).map(|i| bool_var(&format!("g{}", i))).collect();
    for i in 1..4 {
        memory.write(&region, &LocationKey::field(refs[i].clone()), int(i as i32), &guards[i - 1]);
    }
    let reading = memory.read(&region, &LocationKey::field(refs[0].clone()));
    let aliases = refs[0]
        .equals(refs[1].clone())
        .or(refs[0].equals(refs[2].clone()))
        .or(refs[0].equals(refs[3].clone()));
    let solver = Z3Solver::new();
    let mut constraints = vec![aliases];
    constraints.extend(guards.iter().cloned());
    constraints.extend((1..4).map(|i| reading.not_equals(int(i))));
    assert!(!is_satisfiable(&solver, &constraints));
    constraints.pop();
    assert!(is_satisfiable(&solver, &constraints));
}

#[test]
fn map_size_bounds() {
    init();
    let descriptor =
        SymbolicMapDescriptor::new("java.util.Map", ExpressionType::Reference, ExpressionType::I32);
    let mut memory = Memory::new(&Options::default());
    let map = memory.allocate("java.util.HashMap");
    let concrete: Vec<Arc<SymbolicValue>> =
        (0..5).map(|_| memory.allocate("java.lang.Object")).collect();
    let symbolic: Vec<Arc<SymbolicValue>> =
        (1..=5).map(|i| input_ref(&format!("k{}", i))).collect();
    for (i, key) in concrete.iter().chain(symbolic.iter()).enumerate() {
        descriptor.put(&mut memory, &map, key, int(i as i32), &TRUE);
    }
    let size = descriptor.size(&memory, &map);
    let solver = Z3Solver::new();
    assert!(!is_satisfiable(&solver, &[size.less_than(int(6))]));
    assert!(is_satisfiable(&solver, &[size.equals(int(6))]));
    assert!(is_satisfiable(&solver, &[size.equals(int(10))]));
    assert!(!is_satisfiable(&solver, &[int(10).less_than(size)]));
}

#[test]
fn models_decode_memory() {
    init();
    let region = RegionId::array_element("int[]", ExpressionType::I32);
    let mut memory = Memory::new(&Options::default());
    let (a, i) = (input_ref("a"), int_var("i"));
    memory.write(&region, &LocationKey::element(a.clone(), i.clone()), int(7), &TRUE);
    let copy = memory.allocate("int[]");
    memory
        .copy_range(&region, a.clone(), int(0), copy.clone(), int(0), int(4), &TRUE)
        .unwrap();
    let read = memory.read(&region, &LocationKey::element(copy.clone(), int(2)));

    let mut pc = PathConstraints::new();
    pc.add(read.equals(int(7)));
    let solver = Z3Solver::new();
    let model = match check(
        &solver,
        &mut TranslationSession::default(),
        &pc,
        Options::default().solver_timeout(),
    )
    .unwrap()
    {
        SolverOutcome::Satisfiable(model) => model,
        _ => panic!("expected a model"),
    };
    let decoded = DecodedMemory::new(&model, &memory);
    assert_eq!(decoded.eval(&read).unwrap(), Some(ConstantDomain::I32(7)));
    let key = LocationKey::element(copy, int(2));
    assert_eq!(decoded.read(&region, &key).unwrap(), Some(ConstantDomain::I32(7)));
    match decoded.address_of(&a).unwrap() {
        Some(ConstantDomain::InputAddress(..)) | Some(ConstantDomain::Null) => {}
        other => panic!("unexpected address {:?}", other),
    }
}

#[test]
fn fork_with_z3() {
    init();
    let options = Options::default();
    let x = int_var("x");
    let mut state = State::new("main", &options);
    state.add_constraint(int(8).less_than(x.clone()));
    let solver = Z3Solver::new();
    let result = state
        .fork_with_solver(&x.less_than(int(5)), &solver, &options)
        .unwrap();
    assert!(result.positive.is_none());
    let negative = result.negative.expect("feasible child");
    assert_eq!(negative.models().len(), 1);
}

#[test]
fn i32_values_outside_range_are_not_decoded() {
    init();
    let x = int_var("x");
    let mut pc = PathConstraints::new();
    pc.add(x.greater_than(int(i32::MAX)));
    let solver = Z3Solver::new();
    let model = match check(
        &solver,
        &mut TranslationSession::default(),
        &pc,
        Options::default().solver_timeout(),
    )
    .unwrap()
    {
        SolverOutcome::Satisfiable(model) => model,
        _ => panic!("expected a model"),
    };
    let memory = Memory::new(&Options::default());
    let decoded = DecodedMemory::new(&model, &memory);
    assert_eq!(decoded.eval(&x).unwrap(), None);
}
