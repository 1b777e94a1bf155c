// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

// Helpers shared by the integration tests. Not every test file uses every helper.
#![allow(dead_code)]

use symmem::constant_domain::ConstantDomain;
use symmem::expression::ExpressionType;
use symmem::model::ConcreteModel;
use symmem::smt_solver::{SmtModel, SmtResult, SmtSolver};
use symmem::symbolic_value::{SymbolicValue, SymbolicValueTrait};
use symmem::translator::TranslationSession;

use std::cell::RefCell;
use std::sync::Arc;
use std::time::Duration;

pub fn init() {
    symmem::utils::init_logging();
}

/// A reference to an object that existed before execution started.
pub fn input_ref(name: &str) -> Arc<SymbolicValue> {
    SymbolicValue::make_variable(name, ExpressionType::Reference)
}

pub fn int_var(name: &str) -> Arc<SymbolicValue> {
    SymbolicValue::make_variable(name, ExpressionType::I32)
}

pub fn bool_var(name: &str) -> Arc<SymbolicValue> {
    SymbolicValue::make_variable(name, ExpressionType::Bool)
}

pub fn int(value: i32) -> Arc<SymbolicValue> {
    SymbolicValue::make_i32(value)
}

pub fn input_addresses(count: u32) -> Vec<ConstantDomain> {
    (1..=count).map(ConstantDomain::InputAddress).collect()
}

pub fn ints(values: std::ops::Range<i32>) -> Vec<ConstantDomain> {
    values.map(ConstantDomain::I32).collect()
}

/// Every model that assigns each named variable one of its candidate values.
pub fn enumerate_models(domains: &[(&str, Vec<ConstantDomain>)]) -> Vec<ConcreteModel> {
    let mut models = vec![ConcreteModel::new()];
    for (name, candidates) in domains {
        let mut next = Vec::with_capacity(models.len() * candidates.len());
        for model in &models {
            for candidate in candidates {
                next.push(model.clone().with(name, candidate.clone()));
            }
        }
        models = next;
    }
    models
}

/// Translates a memory level value and evaluates it in model.
pub fn eval(model: &ConcreteModel, value: &Arc<SymbolicValue>) -> Option<ConstantDomain> {
    let term = TranslationSession::default()
        .translate(value)
        .expect("translatable value");
    model.evaluate(&term)
}

pub fn eval_int(model: &ConcreteModel, value: &Arc<SymbolicValue>) -> i64 {
    eval(model, value)
        .and_then(|c| c.as_i64())
        .expect("an integer value")
}

pub fn holds(model: &ConcreteModel, condition: &Arc<SymbolicValue>) -> bool {
    eval(model, condition) == Some(ConstantDomain::True)
}

/// A solver that searches a fixed list of candidate models for one that satisfies all
/// assertions. Good enough to drive the feasibility checks of small tests.
pub struct EnumeratingSolver {
    candidates: Vec<ConcreteModel>,
    frames: RefCell<Vec<Vec<Arc<SymbolicValue>>>>,
    model: RefCell<Option<ConcreteModel>>,
    pub solve_count: RefCell<usize>,
}

impl EnumeratingSolver {
    pub fn new(candidates: Vec<ConcreteModel>) -> EnumeratingSolver {
        EnumeratingSolver {
            candidates,
            frames: RefCell::new(vec![Vec::new()]),
            model: RefCell::new(None),
            solve_count: RefCell::new(0),
        }
    }
}

impl SmtSolver<Arc<SymbolicValue>> for EnumeratingSolver {
    type Model = ConcreteModel;

    fn as_debug_string(&self, expression: &Arc<SymbolicValue>) -> String {
        format!("{:?}", expression)
    }

    fn assert(&self, expression: &Arc<SymbolicValue>) {
        if let Some(frame) = self.frames.borrow_mut().last_mut() {
            frame.push(expression.clone());
        }
    }

    fn backtrack(&self) {
        self.frames.borrow_mut().pop();
    }

    fn get_as_smt_predicate(&self, expression: &Arc<SymbolicValue>) -> Arc<SymbolicValue> {
        expression.clone()
    }

    fn get_model(&self) -> Option<ConcreteModel> {
        self.model.borrow().clone()
    }

    fn invert_predicate(&self, expression: &Arc<SymbolicValue>) -> Arc<SymbolicValue> {
        expression.logical_not()
    }

    fn set_backtrack_position(&self) {
        self.frames.borrow_mut().push(Vec::new());
    }

    fn solve(&self, _timeout: Duration) -> SmtResult {
        *self.solve_count.borrow_mut() += 1;
        let frames = self.frames.borrow();
        let found = self.candidates.iter().find(|candidate| {
            frames
                .iter()
                .flatten()
                .all(|term| candidate.evaluate(term) == Some(ConstantDomain::True))
        });
        *self.model.borrow_mut() = found.cloned();
        match found {
            Some(..) => SmtResult::Satisfiable,
            None => SmtResult::Unsatisfiable,
        }
    }
}
