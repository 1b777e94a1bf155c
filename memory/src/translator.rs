// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

//! Translation of memory regions into solver level array terms.
//!
//! The input partition of a region becomes an uninterpreted base array named after the region
//! id, updated by one `store` per log entry. An allocated object becomes a constant array of the
//! default value, updated with its explicitly stored values and then with its own log. Ranged
//! entries become stores over small concrete ranges and array lambdas otherwise.
//!
//! Translations of log nodes are memoized by node identity within a `TranslationSession`, so a
//! log that shares a prefix with an already translated log only costs its new entries.

use crate::address::{join_leaf_values, split_heap_reference, HeapAddress};
use crate::error::{Error, Result};
use crate::expression::{Expression, ExpressionType};
use crate::k_limits;
use crate::options::Options;
use crate::path_constraints::PathConstraints;
use crate::region::MemoryRegion;
use crate::region_id::{RegionId, RegionKind, SIZE_TYPE};
use crate::symbolic_value::{SymbolicValue, SymbolicValueTrait, TRUE};
use crate::update_log::{LocationKey, LogNode, RangedAdapter, RangedUpdate, UpdateLog, UpdateNode};

use log_derive::logfn_inputs;
use mirai_annotations::*;
use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

/// Says which indices a log entry key contributes to the array being built.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum KeyShape {
    /// Input arrays are indexed by (address, secondary).
    Input,
    /// The array of one allocated object is indexed by the secondary key only.
    Allocated,
}

/// The context of one translation: memo tables and a counter for lambda parameter names.
/// Sessions are not shared between threads; create one per solver query or per decoder.
pub struct TranslationSession {
    max_unrolled_range: u32,
    values: HashMap<Arc<SymbolicValue>, Arc<SymbolicValue>>,
    // Keyed by log node identity and the term the log is applied to. The node is kept alive
    // by the entry so that its address cannot be reused while the entry exists.
    logs: HashMap<(usize, Arc<SymbolicValue>), (Arc<LogNode>, Arc<SymbolicValue>)>,
    bound_variable_counter: usize,
}

impl Debug for TranslationSession {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "TranslationSession [{} values, {} log nodes]",
            self.values.len(),
            self.logs.len()
        )
    }
}

impl Default for TranslationSession {
    fn default() -> Self {
        TranslationSession::with_unroll_limit(k_limits::MAX_UNROLLED_RANGE)
    }
}

impl TranslationSession {
    pub fn new(options: &Options) -> TranslationSession {
        TranslationSession::with_unroll_limit(options.max_unrolled_range)
    }

    pub fn with_unroll_limit(max_unrolled_range: u32) -> TranslationSession {
        TranslationSession {
            max_unrolled_range,
            values: HashMap::new(),
            logs: HashMap::new(),
            bound_variable_counter: 0,
        }
    }

    /// The uninterpreted array that holds the initial contents of the input partition of id.
    pub fn base_array(id: &RegionId) -> Arc<SymbolicValue> {
        SymbolicValue::make_array_constant(&id.base_array_name(), id.input_array_type())
    }

    /// Translates all path constraints.
    #[logfn_inputs(TRACE)]
    pub fn translate_constraints(
        &mut self,
        constraints: &PathConstraints,
    ) -> Result<Vec<Arc<SymbolicValue>>> {
        constraints
            .constraints()
            .iter()
            .map(|c| self.translate(c))
            .collect()
    }

    /// Replaces every input placeholder in value by a select from the base array of its region.
    pub fn translate(&mut self, value: &Arc<SymbolicValue>) -> Result<Arc<SymbolicValue>> {
        if let Some(result) = self.values.get(value) {
            return Ok(result.clone());
        }
        let result = match &value.expression {
            Expression::CompileTimeConstant(..)
            | Expression::Variable { .. }
            | Expression::BoundVariable { .. }
            | Expression::ArrayConstant { .. } => value.clone(),
            Expression::Add { left, right } => {
                self.translate(left)?.addition(self.translate(right)?)
            }
            Expression::Sub { left, right } => {
                self.translate(left)?.subtract(self.translate(right)?)
            }
            Expression::Equals { left, right } => {
                self.translate(left)?.equals(self.translate(right)?)
            }
            Expression::LessThan { left, right } => {
                self.translate(left)?.less_than(self.translate(right)?)
            }
            Expression::LessOrEqual { left, right } => {
                self.translate(left)?.less_or_equal(self.translate(right)?)
            }
            Expression::And { left, right } => self.translate(left)?.and(self.translate(right)?),
            Expression::Or { left, right } => self.translate(left)?.or(self.translate(right)?),
            Expression::LogicalNot { operand } => self.translate(operand)?.logical_not(),
            Expression::ConditionalExpression {
                condition,
                consequent,
                alternate,
            } => {
                let condition = self.translate(condition)?;
                condition.conditional_expression(
                    self.translate(consequent)?,
                    self.translate(alternate)?,
                )
            }
            Expression::IsSubtype { operand, type_name } => {
                self.translate(operand)?.is_subtype(type_name.clone())
            }
            Expression::InputRead { region, key } => {
                Self::base_array(region).select(self.translate_all(key)?)
            }
            Expression::ConstantArray {
                value: element,
                array_type,
            } => SymbolicValue::make_constant_array(self.translate(element)?, array_type.clone()),
            Expression::Select { array, indices } => {
                self.translate(array)?.select(self.translate_all(indices)?)
            }
            Expression::Store {
                array,
                indices,
                value: element,
            } => {
                let array = self.translate(array)?;
                array.store(self.translate_all(indices)?, self.translate(element)?)
            }
            Expression::ArrayLambda { parameters, body } => {
                SymbolicValue::make_lambda(parameters.clone(), self.translate(body)?)
            }
        };
        self.values.insert(value.clone(), result.clone());
        Ok(result)
    }

    fn translate_all(&mut self, values: &[Arc<SymbolicValue>]) -> Result<Vec<Arc<SymbolicValue>>> {
        values.iter().map(|v| self.translate(v)).collect()
    }

    /// The array term for the input partition of region: the base array with the input log
    /// replayed on top of it.
    pub fn translate_input_region(&mut self, region: &MemoryRegion) -> Result<Arc<SymbolicValue>> {
        let base = Self::base_array(region.id());
        match region.input_updates() {
            Some(log) => self.translate_log(region, log, base, KeyShape::Input),
            None => Ok(base),
        }
    }

    /// The array term for the allocated object at address in region, indexed by secondary key.
    pub fn translate_allocated_object(
        &mut self,
        region: &MemoryRegion,
        address: u32,
    ) -> Result<Arc<SymbolicValue>> {
        let array_type = match region.id().allocated_array_type() {
            Some(array_type) => array_type,
            None => assume_unreachable!("field-like regions have no per-object arrays"),
        };
        let mut array = SymbolicValue::make_constant_array(region.id().default_value(), array_type);
        if let Some(object) = region.allocated_object(address) {
            for (key, value) in object.values() {
                if let Some(key) = key {
                    let value = self.translate(&value)?;
                    array = array.store(vec![SymbolicValue::make_constant(key)], value);
                }
            }
            if let Some(log) = object.updates() {
                return self.translate_log(region, log, array, KeyShape::Allocated);
            }
        }
        Ok(array)
    }

    /// The solver term for the value at key in region. References shaped as conditional
    /// expressions are split and translated per leaf.
    #[logfn_inputs(TRACE)]
    pub fn translate_read(
        &mut self,
        region: &MemoryRegion,
        key: &LocationKey,
    ) -> Result<Arc<SymbolicValue>> {
        let mut values = Vec::new();
        for leaf in split_heap_reference(&key.address, &TRUE) {
            let leaf_key = key.with_address(leaf.address.to_value());
            let value = match &leaf.address {
                HeapAddress::Null => region.id().default_value(),
                HeapAddress::Concrete(a) => match &key.secondary {
                    None => {
                        let value = region.read_allocated(*a, &leaf_key);
                        self.translate(&value)?
                    }
                    Some(secondary) => {
                        let array = self.translate_allocated_object(region, *a)?;
                        array.select(vec![self.translate(secondary)?])
                    }
                },
                HeapAddress::Symbolic(..) => {
                    let array = self.translate_input_region(region)?;
                    array.select(self.translate_all(&leaf_key.components())?)
                }
            };
            values.push((self.translate(&leaf.guard)?, value));
        }
        Ok(join_leaf_values(values, region.id().default_value()))
    }

    fn translate_log(
        &mut self,
        region: &MemoryRegion,
        log: &UpdateLog,
        base: Arc<SymbolicValue>,
        shape: KeyShape,
    ) -> Result<Arc<SymbolicValue>> {
        let mut pending = Vec::new();
        let mut current = base.clone();
        for node in log.iter() {
            let memo_key = (Arc::as_ptr(node) as usize, base.clone());
            if let Some((_, term)) = self.logs.get(&memo_key) {
                current = term.clone();
                break;
            }
            pending.push(node.clone());
        }
        for node in pending.into_iter().rev() {
            current = self.translate_update(region, &node.update, current, shape)?;
            let memo_key = (Arc::as_ptr(&node) as usize, base.clone());
            self.logs.insert(memo_key, (node, current.clone()));
        }
        Ok(current)
    }

    fn translate_update(
        &mut self,
        region: &MemoryRegion,
        update: &UpdateNode,
        previous: Arc<SymbolicValue>,
        shape: KeyShape,
    ) -> Result<Arc<SymbolicValue>> {
        match update {
            UpdateNode::Pinpoint { key, value, guard } => {
                let indices = self.key_indices(key, shape)?;
                let value = self.translate(value)?;
                let guard = self.translate(guard)?;
                let stored = if guard.as_bool_if_known() == Some(true) {
                    value
                } else {
                    guard.conditional_expression(value, previous.select(indices.clone()))
                };
                Ok(previous.store(indices, stored))
            }
            // The ranged hook is chosen by region kind.
            UpdateNode::Ranged(ranged) => match region.id().kind() {
                RegionKind::ArrayElement => self.translate_array_copy(ranged, previous, shape),
                RegionKind::MapValue | RegionKind::MapContains => {
                    let key_sort = region
                        .id()
                        .secondary_key_sort()
                        .unwrap_or(ExpressionType::Reference);
                    self.translate_ranged_lambda(ranged, previous, shape, key_sort)
                }
                RegionKind::Field
                | RegionKind::ArrayLength
                | RegionKind::MapLength => Err(Error::unsupported_ranged_update(region.id())),
            },
        }
    }

    fn key_indices(
        &mut self,
        key: &LocationKey,
        shape: KeyShape,
    ) -> Result<Vec<Arc<SymbolicValue>>> {
        match shape {
            KeyShape::Input => self.translate_all(&key.components()),
            KeyShape::Allocated => match &key.secondary {
                Some(secondary) => Ok(vec![self.translate(secondary)?]),
                None => assume_unreachable!("per-object arrays need a secondary key"),
            },
        }
    }

    fn translate_array_copy(
        &mut self,
        ranged: &RangedUpdate,
        previous: Arc<SymbolicValue>,
        shape: KeyShape,
    ) -> Result<Arc<SymbolicValue>> {
        if let RangedAdapter::ArrayCopy {
            destination_address,
            destination_from,
            destination_to,
            ..
        } = &ranged.adapter
        {
            if let (Some(from), Some(to)) = (
                destination_from.as_int_if_known(),
                destination_to.as_int_if_known(),
            ) {
                if from <= to && to - from <= i64::from(self.max_unrolled_range) {
                    let mut current = previous;
                    for i in from..to {
                        let key = LocationKey::element(
                            destination_address.clone(),
                            SymbolicValue::make_integer(i, &SIZE_TYPE),
                        );
                        current = self.translate_ranged_point(ranged, &key, current, shape)?;
                    }
                    return Ok(current);
                }
            }
        }
        self.translate_ranged_lambda(ranged, previous, shape, SIZE_TYPE)
    }

    fn translate_ranged_point(
        &mut self,
        ranged: &RangedUpdate,
        key: &LocationKey,
        previous: Arc<SymbolicValue>,
        shape: KeyShape,
    ) -> Result<Arc<SymbolicValue>> {
        let includes = self.translate_includes(ranged, key)?;
        if includes.as_bool_if_known() == Some(false) {
            return Ok(previous);
        }
        let value = self.translate_read(&ranged.source, &ranged.adapter.convert(key))?;
        let indices = self.key_indices(key, shape)?;
        let stored = includes.conditional_expression(value, previous.select(indices.clone()));
        Ok(previous.store(indices, stored))
    }

    /// Builds `lambda k. ite(includes(k), source[convert(k)], previous[k])`.
    fn translate_ranged_lambda(
        &mut self,
        ranged: &RangedUpdate,
        previous: Arc<SymbolicValue>,
        shape: KeyShape,
        secondary_sort: ExpressionType,
    ) -> Result<Arc<SymbolicValue>> {
        self.bound_variable_counter += 1;
        let n = self.bound_variable_counter;
        let index = SymbolicValue::make_bound_variable(&format!("k!{}", n), secondary_sort);
        let (key, parameters) = match shape {
            KeyShape::Input => {
                let address = SymbolicValue::make_bound_variable(
                    &format!("a!{}", n),
                    ExpressionType::Reference,
                );
                (
                    LocationKey::element(address.clone(), index.clone()),
                    vec![address, index],
                )
            }
            KeyShape::Allocated => (
                LocationKey::element(ranged.adapter.destination_address().clone(), index.clone()),
                vec![index],
            ),
        };
        let includes = self.translate_includes(ranged, &key)?;
        let value = self.translate_read(&ranged.source, &ranged.adapter.convert(&key))?;
        let body = includes.conditional_expression(value, previous.select(parameters.clone()));
        Ok(SymbolicValue::make_lambda(parameters, body))
    }

    fn translate_includes(
        &mut self,
        ranged: &RangedUpdate,
        key: &LocationKey,
    ) -> Result<Arc<SymbolicValue>> {
        let guard = self.translate(&ranged.guard)?;
        let includes = match &ranged.adapter {
            RangedAdapter::ArrayCopy { .. } => self.translate(&ranged.adapter.includes(key))?,
            RangedAdapter::MapMerge {
                destination_address,
                source_contains,
                ..
            } => {
                let same_object = destination_address.equals(key.address.clone());
                if same_object.as_bool_if_known() == Some(false) {
                    return Ok(same_object);
                }
                let member = self.translate_read(source_contains, &ranged.adapter.convert(key))?;
                self.translate(&same_object)?.and(member)
            }
        };
        Ok(includes.and(guard))
    }
}
