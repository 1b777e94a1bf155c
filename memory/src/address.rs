// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

use crate::constant_domain::ConstantDomain;
use crate::expression::Expression;
use crate::symbolic_value::{SymbolicValue, SymbolicValueTrait};

use log_derive::logfn;
use std::sync::Arc;

/// The classification of a reference leaf.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum HeapAddress {
    Null,
    /// An object allocated by the current state.
    Concrete(u32),
    /// Any other reference: an input reference or an unknown value read from input memory.
    Symbolic(Arc<SymbolicValue>),
}

impl HeapAddress {
    /// Classifies a reference that is not shaped as a conditional expression.
    pub fn classify(reference: &Arc<SymbolicValue>) -> HeapAddress {
        match reference.as_constant() {
            Some(ConstantDomain::Null) => HeapAddress::Null,
            Some(ConstantDomain::HeapAddress(a)) => HeapAddress::Concrete(*a),
            _ => HeapAddress::Symbolic(reference.clone()),
        }
    }

    pub fn to_value(&self) -> Arc<SymbolicValue> {
        match self {
            HeapAddress::Null => SymbolicValue::make_constant(ConstantDomain::Null),
            HeapAddress::Concrete(a) => SymbolicValue::make_heap_address(*a),
            HeapAddress::Symbolic(v) => v.clone(),
        }
    }

    pub fn is_concrete(&self) -> bool {
        matches!(self, HeapAddress::Concrete(..))
    }
}

/// A reference leaf together with the condition under which the reference is that leaf.
#[derive(Clone, Debug)]
pub struct GuardedAddress {
    pub address: HeapAddress,
    pub guard: Arc<SymbolicValue>,
}

/// Splits a reference of the form `ite(c, a, b)` (possibly nested) into its leaves.
/// The guards of the leaves are pairwise exclusive and each one implies `guard`.
/// Leaves whose guard simplifies to false are dropped.
#[logfn(TRACE)]
pub fn split_heap_reference(
    reference: &Arc<SymbolicValue>,
    guard: &Arc<SymbolicValue>,
) -> Vec<GuardedAddress> {
    let mut leaves = Vec::new();
    let mut pending = vec![(reference.clone(), guard.clone())];
    while let Some((value, value_guard)) = pending.pop() {
        if value_guard.as_bool_if_known() == Some(false) {
            continue;
        }
        if let Expression::ConditionalExpression {
            condition,
            consequent,
            alternate,
        } = &value.expression
        {
            // Pushed in reverse so that leaves come out in source order.
            pending.push((
                alternate.clone(),
                value_guard.and(condition.logical_not()),
            ));
            pending.push((consequent.clone(), value_guard.and(condition.clone())));
        } else {
            leaves.push(GuardedAddress {
                address: HeapAddress::classify(&value),
                guard: value_guard,
            });
        }
    }
    leaves
}

/// True if the reference is a single leaf, i.e. not shaped as a conditional expression.
pub fn is_single_leaf(reference: &Arc<SymbolicValue>) -> bool {
    !matches!(
        reference.expression,
        Expression::ConditionalExpression { .. }
    )
}

/// Builds `ite(g1, v1, ite(g2, v2, ... vn))` from per-leaf values. The last leaf needs no test
/// because the leaf guards are exhaustive. An empty list of leaves yields `default`.
pub fn join_leaf_values(
    values: Vec<(Arc<SymbolicValue>, Arc<SymbolicValue>)>,
    default: Arc<SymbolicValue>,
) -> Arc<SymbolicValue> {
    let mut iter = values.into_iter().rev();
    let mut result = match iter.next() {
        Some((_, value)) => value,
        None => return default,
    };
    for (guard, value) in iter {
        result = guard.conditional_expression(value, result);
    }
    result
}
