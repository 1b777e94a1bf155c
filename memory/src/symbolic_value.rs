// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

use crate::constant_domain::ConstantDomain;
use crate::expression::{Expression, ExpressionType};
use crate::region_id::RegionId;

use lazy_static::lazy_static;
use log_derive::logfn_inputs;
use mirai_annotations::*;
use serde::Serialize;
use std::collections::hash_map::DefaultHasher;
use std::fmt::{Debug, Formatter, Result};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// An immutable, sort-tagged symbolic expression node.
///
/// Values are shared through `Arc` and compared structurally. The hash of a node is computed
/// once, when the node is constructed, from the cached hashes of its children, so hashing and
/// the equality fast path are both constant time for shared sub-terms.
#[derive(Serialize, Clone, Eq)]
pub struct SymbolicValue {
    pub expression: Expression,
    #[serde(skip)]
    value_type: ExpressionType,
    #[serde(skip)]
    hash: u64,
}

impl Debug for SymbolicValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match &self.expression {
            Expression::CompileTimeConstant(c) => c.fmt(f),
            Expression::Variable { name, .. } | Expression::BoundVariable { name, .. } => {
                f.write_str(name)
            }
            Expression::Add { left, right } => write!(f, "(+ {:?} {:?})", left, right),
            Expression::Sub { left, right } => write!(f, "(- {:?} {:?})", left, right),
            Expression::Equals { left, right } => write!(f, "(= {:?} {:?})", left, right),
            Expression::LessThan { left, right } => write!(f, "(< {:?} {:?})", left, right),
            Expression::LessOrEqual { left, right } => write!(f, "(<= {:?} {:?})", left, right),
            Expression::And { left, right } => write!(f, "(and {:?} {:?})", left, right),
            Expression::Or { left, right } => write!(f, "(or {:?} {:?})", left, right),
            Expression::LogicalNot { operand } => write!(f, "(not {:?})", operand),
            Expression::ConditionalExpression {
                condition,
                consequent,
                alternate,
            } => write!(f, "(ite {:?} {:?} {:?})", condition, consequent, alternate),
            Expression::IsSubtype { operand, type_name } => {
                write!(f, "(subtype {:?} {})", operand, type_name)
            }
            Expression::InputRead { region, key } => write!(f, "{}{:?}", region, key),
            Expression::ArrayConstant { name, .. } => f.write_str(name),
            Expression::ConstantArray { value, .. } => write!(f, "(const {:?})", value),
            Expression::Select { array, indices } => write!(f, "(select {:?} {:?})", array, indices),
            Expression::Store {
                array,
                indices,
                value,
            } => write!(f, "(store {:?} {:?} {:?})", array, indices, value),
            Expression::ArrayLambda { parameters, body } => {
                write!(f, "(lambda {:?} {:?})", parameters, body)
            }
        }
    }
}

impl Hash for SymbolicValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

impl PartialEq for SymbolicValue {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash && self.expression == other.expression
    }
}

lazy_static! {
    /// The Boolean value false.
    pub static ref FALSE: Arc<SymbolicValue> =
        SymbolicValue::make_from(Expression::CompileTimeConstant(ConstantDomain::False));

    /// The Boolean value true.
    pub static ref TRUE: Arc<SymbolicValue> =
        SymbolicValue::make_from(Expression::CompileTimeConstant(ConstantDomain::True));

    /// The null reference.
    pub static ref NULL: Arc<SymbolicValue> =
        SymbolicValue::make_from(Expression::CompileTimeConstant(ConstantDomain::Null));
}

/// Constructors
impl SymbolicValue {
    /// Creates a value node for the given expression. No simplification is done here;
    /// use the `SymbolicValueTrait` operations to build simplified values.
    pub fn make_from(expression: Expression) -> Arc<SymbolicValue> {
        let value_type = expression.infer_type();
        let mut hasher = DefaultHasher::new();
        expression.hash(&mut hasher);
        Arc::new(SymbolicValue {
            expression,
            value_type,
            hash: hasher.finish(),
        })
    }

    pub fn make_constant(value: ConstantDomain) -> Arc<SymbolicValue> {
        precondition!(!value.is_bottom());
        match value {
            ConstantDomain::True => TRUE.clone(),
            ConstantDomain::False => FALSE.clone(),
            ConstantDomain::Null => NULL.clone(),
            _ => Self::make_from(Expression::CompileTimeConstant(value)),
        }
    }

    pub fn make_bool(value: bool) -> Arc<SymbolicValue> {
        if value {
            TRUE.clone()
        } else {
            FALSE.clone()
        }
    }

    pub fn make_i32(value: i32) -> Arc<SymbolicValue> {
        Self::make_constant(ConstantDomain::I32(value))
    }

    pub fn make_i64(value: i64) -> Arc<SymbolicValue> {
        Self::make_constant(ConstantDomain::I64(value))
    }

    /// The value of a concrete address handed out by an allocator.
    pub fn make_heap_address(address: u32) -> Arc<SymbolicValue> {
        precondition!(address > 0);
        Self::make_constant(ConstantDomain::HeapAddress(address))
    }

    /// An integer constant of the given integer sort.
    pub fn make_integer(value: i64, var_type: &ExpressionType) -> Arc<SymbolicValue> {
        Self::make_constant(ConstantDomain::integer(value, var_type))
    }

    /// The zero/false/null value of the given sort.
    pub fn make_default(var_type: &ExpressionType) -> Arc<SymbolicValue> {
        Self::make_constant(ConstantDomain::default_for(var_type))
    }

    pub fn make_variable(name: &str, var_type: ExpressionType) -> Arc<SymbolicValue> {
        Self::make_from(Expression::Variable {
            name: Arc::from(name),
            var_type,
        })
    }

    pub fn make_bound_variable(name: &str, var_type: ExpressionType) -> Arc<SymbolicValue> {
        Self::make_from(Expression::BoundVariable {
            name: Arc::from(name),
            var_type,
        })
    }

    pub fn make_input_read(
        region: Arc<RegionId>,
        key: Vec<Arc<SymbolicValue>>,
    ) -> Arc<SymbolicValue> {
        Self::make_from(Expression::InputRead { region, key })
    }

    pub fn make_array_constant(name: &str, array_type: ExpressionType) -> Arc<SymbolicValue> {
        precondition!(array_type.is_array());
        Self::make_from(Expression::ArrayConstant {
            name: Arc::from(name),
            array_type,
        })
    }

    pub fn make_constant_array(
        value: Arc<SymbolicValue>,
        array_type: ExpressionType,
    ) -> Arc<SymbolicValue> {
        precondition!(array_type.is_array());
        Self::make_from(Expression::ConstantArray { value, array_type })
    }

    pub fn make_lambda(
        parameters: Vec<Arc<SymbolicValue>>,
        body: Arc<SymbolicValue>,
    ) -> Arc<SymbolicValue> {
        Self::make_from(Expression::ArrayLambda { parameters, body })
    }
}

impl SymbolicValue {
    /// The sort of this value.
    pub fn get_type(&self) -> &ExpressionType {
        &self.value_type
    }

    /// The hash computed when this node was constructed.
    pub fn cached_hash(&self) -> u64 {
        self.hash
    }

    /// True for references that denote objects which existed before execution started.
    /// Such references never alias an object allocated by the current state.
    pub fn is_input_reference(&self) -> bool {
        match &self.expression {
            Expression::Variable { var_type, .. } => var_type.is_reference(),
            Expression::InputRead { .. } => self.value_type.is_reference(),
            _ => false,
        }
    }

    pub fn is_compile_time_constant(&self) -> bool {
        matches!(self.expression, Expression::CompileTimeConstant(..))
    }

    /// Splits an integer value into a symbolic base and a constant offset.
    fn split_offset(&self) -> (Option<&Arc<SymbolicValue>>, i64) {
        match &self.expression {
            Expression::Add { left, right } => match right.as_int_if_known() {
                Some(c) => (Some(left), c),
                None => (None, 0),
            },
            Expression::Sub { left, right } => match right.as_int_if_known() {
                Some(c) => (Some(left), c.wrapping_neg()),
                None => (None, 0),
            },
            _ => (None, 0),
        }
    }
}

fn offset_parts(value: &Arc<SymbolicValue>) -> (Option<Arc<SymbolicValue>>, i64) {
    if let Some(c) = value.as_int_if_known() {
        return (None, c);
    }
    match value.split_offset() {
        (Some(base), c) => (Some(base.clone()), c),
        (None, _) => (Some(value.clone()), 0),
    }
}

fn rebuild_offset(
    base: Option<Arc<SymbolicValue>>,
    offset: i64,
    var_type: &ExpressionType,
) -> Arc<SymbolicValue> {
    match base {
        None => SymbolicValue::make_integer(offset, var_type),
        Some(base) if offset == 0 => base,
        Some(base) if offset > 0 => SymbolicValue::make_from(Expression::Add {
            left: base,
            right: SymbolicValue::make_integer(offset, var_type),
        }),
        Some(base) => SymbolicValue::make_from(Expression::Sub {
            left: base,
            right: SymbolicValue::make_integer(offset.wrapping_neg(), var_type),
        }),
    }
}

/// Operations that build simplified symbolic values.
pub trait SymbolicValueTrait: Sized {
    fn addition(&self, other: Self) -> Self;
    fn subtract(&self, other: Self) -> Self;
    fn and(&self, other: Self) -> Self;
    fn or(&self, other: Self) -> Self;
    fn logical_not(&self) -> Self;
    fn conditional_expression(&self, consequent: Self, alternate: Self) -> Self;
    fn equals(&self, other: Self) -> Self;
    fn not_equals(&self, other: Self) -> Self;
    fn less_than(&self, other: Self) -> Self;
    fn less_or_equal(&self, other: Self) -> Self;
    fn greater_than(&self, other: Self) -> Self;
    fn greater_or_equal(&self, other: Self) -> Self;
    fn is_subtype(&self, type_name: Arc<str>) -> Self;
    fn select(&self, indices: Vec<Self>) -> Self;
    fn store(&self, indices: Vec<Self>, value: Self) -> Self;
    fn as_bool_if_known(&self) -> Option<bool>;
    fn as_int_if_known(&self) -> Option<i64>;
    fn as_constant(&self) -> Option<&ConstantDomain>;
}

impl SymbolicValueTrait for Arc<SymbolicValue> {
    /// Returns an element that is "self + other".
    #[logfn_inputs(TRACE)]
    fn addition(&self, other: Arc<SymbolicValue>) -> Arc<SymbolicValue> {
        precondition!(self.get_type().is_integer());
        if let (Some(v1), Some(v2)) = (self.as_constant(), other.as_constant()) {
            let result = v1.add(v2);
            if !result.is_bottom() {
                return SymbolicValue::make_constant(result);
            }
        }
        let var_type = self.get_type().clone();
        let (base1, offset1) = offset_parts(self);
        let (base2, offset2) = offset_parts(&other);
        match (base1, base2) {
            (b1, None) => rebuild_offset(b1, offset1.wrapping_add(offset2), &var_type),
            (None, b2) => rebuild_offset(b2, offset1.wrapping_add(offset2), &var_type),
            _ => SymbolicValue::make_from(Expression::Add {
                left: self.clone(),
                right: other,
            }),
        }
    }

    /// Returns an element that is "self - other".
    #[logfn_inputs(TRACE)]
    fn subtract(&self, other: Arc<SymbolicValue>) -> Arc<SymbolicValue> {
        precondition!(self.get_type().is_integer());
        if let (Some(v1), Some(v2)) = (self.as_constant(), other.as_constant()) {
            let result = v1.sub(v2);
            if !result.is_bottom() {
                return SymbolicValue::make_constant(result);
            }
        }
        let var_type = self.get_type().clone();
        let (base1, offset1) = offset_parts(self);
        let (base2, offset2) = offset_parts(&other);
        match (base1, base2) {
            (b1, None) => rebuild_offset(b1, offset1.wrapping_sub(offset2), &var_type),
            (Some(b1), Some(b2)) if b1 == b2 => {
                SymbolicValue::make_integer(offset1.wrapping_sub(offset2), &var_type)
            }
            _ => SymbolicValue::make_from(Expression::Sub {
                left: self.clone(),
                right: other,
            }),
        }
    }

    /// Returns an element that is "self && other".
    #[logfn_inputs(TRACE)]
    fn and(&self, other: Arc<SymbolicValue>) -> Arc<SymbolicValue> {
        match (self.as_bool_if_known(), other.as_bool_if_known()) {
            (Some(false), _) | (_, Some(false)) => return FALSE.clone(),
            (Some(true), _) => return other,
            (_, Some(true)) => return self.clone(),
            _ => {}
        }
        if *self == other {
            return other;
        }
        if is_negation_of(self, &other) {
            return FALSE.clone();
        }
        SymbolicValue::make_from(Expression::And {
            left: self.clone(),
            right: other,
        })
    }

    /// Returns an element that is "self || other".
    #[logfn_inputs(TRACE)]
    fn or(&self, other: Arc<SymbolicValue>) -> Arc<SymbolicValue> {
        match (self.as_bool_if_known(), other.as_bool_if_known()) {
            (Some(true), _) | (_, Some(true)) => return TRUE.clone(),
            (Some(false), _) => return other,
            (_, Some(false)) => return self.clone(),
            _ => {}
        }
        if *self == other {
            return other;
        }
        if is_negation_of(self, &other) {
            return TRUE.clone();
        }
        SymbolicValue::make_from(Expression::Or {
            left: self.clone(),
            right: other,
        })
    }

    /// Returns an element that is "!self" where self is a bool.
    #[logfn_inputs(TRACE)]
    fn logical_not(&self) -> Arc<SymbolicValue> {
        if let Some(b) = self.as_bool_if_known() {
            return SymbolicValue::make_bool(!b);
        }
        if let Expression::LogicalNot { operand } = &self.expression {
            return operand.clone();
        }
        SymbolicValue::make_from(Expression::LogicalNot {
            operand: self.clone(),
        })
    }

    /// Returns an element that is "if self { consequent } else { alternate }".
    #[logfn_inputs(TRACE)]
    fn conditional_expression(
        &self,
        consequent: Arc<SymbolicValue>,
        alternate: Arc<SymbolicValue>,
    ) -> Arc<SymbolicValue> {
        precondition!(self.get_type() == &ExpressionType::Bool);
        if let Some(b) = self.as_bool_if_known() {
            return if b { consequent } else { alternate };
        }
        if consequent == alternate {
            return consequent;
        }
        if let Expression::LogicalNot { operand } = &self.expression {
            return operand.conditional_expression(alternate, consequent);
        }
        if *consequent.get_type() == ExpressionType::Bool {
            match (consequent.as_bool_if_known(), alternate.as_bool_if_known()) {
                (Some(true), Some(false)) => return self.clone(),
                (Some(false), Some(true)) => return self.logical_not(),
                (Some(true), None) => return self.or(alternate),
                (Some(false), None) => return self.logical_not().and(alternate),
                (None, Some(false)) => return self.and(consequent),
                (None, Some(true)) => return self.logical_not().or(consequent),
                _ => {}
            }
        }
        // if c { if c { a } else { b } } else { d } => if c { a } else { d }
        if let Expression::ConditionalExpression {
            condition,
            consequent: inner,
            ..
        } = &consequent.expression
        {
            if condition == self {
                return self.conditional_expression(inner.clone(), alternate);
            }
        }
        if let Expression::ConditionalExpression {
            condition,
            alternate: inner,
            ..
        } = &alternate.expression
        {
            if condition == self {
                return self.conditional_expression(consequent, inner.clone());
            }
        }
        SymbolicValue::make_from(Expression::ConditionalExpression {
            condition: self.clone(),
            consequent,
            alternate,
        })
    }

    /// Returns an element that is "self == other".
    #[logfn_inputs(TRACE)]
    fn equals(&self, other: Arc<SymbolicValue>) -> Arc<SymbolicValue> {
        if *self == other && !self.get_type().is_array() {
            return TRUE.clone();
        }
        if let (Some(v1), Some(v2)) = (self.as_constant(), other.as_constant()) {
            let result = v1.equals(v2);
            if !result.is_bottom() {
                return SymbolicValue::make_constant(result);
            }
        }
        // An object allocated by this state is never the same as an input object.
        if let Some(ConstantDomain::HeapAddress(..)) = self.as_constant() {
            if other.is_input_reference() {
                return FALSE.clone();
            }
        }
        if let Some(ConstantDomain::HeapAddress(..)) = other.as_constant() {
            if self.is_input_reference() {
                return FALSE.clone();
            }
        }
        if *self.get_type() == ExpressionType::Bool {
            match (self.as_bool_if_known(), other.as_bool_if_known()) {
                (_, Some(true)) => return self.clone(),
                (_, Some(false)) => return self.logical_not(),
                (Some(true), _) => return other,
                (Some(false), _) => return other.logical_not(),
                _ => {}
            }
        }
        // Distribute over a conditional when the other side is known, so that comparisons
        // of split references against concrete addresses fold away.
        if other.is_compile_time_constant() {
            if let Expression::ConditionalExpression {
                condition,
                consequent,
                alternate,
            } = &self.expression
            {
                return condition.conditional_expression(
                    consequent.equals(other.clone()),
                    alternate.equals(other),
                );
            }
        }
        if self.is_compile_time_constant() {
            if let Expression::ConditionalExpression { .. } = &other.expression {
                return other.equals(self.clone());
            }
        }
        // Keep the operands in a canonical order so that syntactic checks see a == b and b == a
        // as the same constraint.
        let (left, right) = if other.hash < self.hash {
            (other, self.clone())
        } else {
            (self.clone(), other)
        };
        SymbolicValue::make_from(Expression::Equals { left, right })
    }

    fn not_equals(&self, other: Arc<SymbolicValue>) -> Arc<SymbolicValue> {
        self.equals(other).logical_not()
    }

    /// Returns an element that is "self < other".
    #[logfn_inputs(TRACE)]
    fn less_than(&self, other: Arc<SymbolicValue>) -> Arc<SymbolicValue> {
        precondition!(self.get_type().is_integer());
        if let (Some(v1), Some(v2)) = (self.as_constant(), other.as_constant()) {
            let result = v1.less_than(v2);
            if !result.is_bottom() {
                return SymbolicValue::make_constant(result);
            }
        }
        if *self == other {
            return FALSE.clone();
        }
        SymbolicValue::make_from(Expression::LessThan {
            left: self.clone(),
            right: other,
        })
    }

    /// Returns an element that is "self <= other".
    #[logfn_inputs(TRACE)]
    fn less_or_equal(&self, other: Arc<SymbolicValue>) -> Arc<SymbolicValue> {
        precondition!(self.get_type().is_integer());
        if let (Some(v1), Some(v2)) = (self.as_constant(), other.as_constant()) {
            let result = v1.less_or_equal(v2);
            if !result.is_bottom() {
                return SymbolicValue::make_constant(result);
            }
        }
        if *self == other {
            return TRUE.clone();
        }
        SymbolicValue::make_from(Expression::LessOrEqual {
            left: self.clone(),
            right: other,
        })
    }

    fn greater_than(&self, other: Arc<SymbolicValue>) -> Arc<SymbolicValue> {
        other.less_than(self.clone())
    }

    fn greater_or_equal(&self, other: Arc<SymbolicValue>) -> Arc<SymbolicValue> {
        other.less_or_equal(self.clone())
    }

    /// Returns an element that is true if the dynamic type of the object at self is type_name
    /// or one of its subtypes.
    fn is_subtype(&self, type_name: Arc<str>) -> Arc<SymbolicValue> {
        precondition!(self.get_type().is_reference());
        SymbolicValue::make_from(Expression::IsSubtype {
            operand: self.clone(),
            type_name,
        })
    }

    /// Returns an element that is "self[indices]". Stores at indices that are known to differ
    /// are skipped and a store at a known equal index yields its value.
    fn select(&self, indices: Vec<Arc<SymbolicValue>>) -> Arc<SymbolicValue> {
        precondition!(self.get_type().is_array());
        let mut array = self;
        loop {
            match &array.expression {
                Expression::Store {
                    array: inner,
                    indices: stored_at,
                    value,
                } => {
                    let mut all_equal = true;
                    let mut some_differ = false;
                    for (i, j) in stored_at.iter().zip(indices.iter()) {
                        match i.equals(j.clone()).as_bool_if_known() {
                            Some(true) => {}
                            Some(false) => some_differ = true,
                            None => all_equal = false,
                        }
                    }
                    if some_differ {
                        array = inner;
                        continue;
                    }
                    if all_equal {
                        return value.clone();
                    }
                    break;
                }
                Expression::ConstantArray { value, .. } => return value.clone(),
                _ => break,
            }
        }
        SymbolicValue::make_from(Expression::Select {
            array: array.clone(),
            indices,
        })
    }

    /// Returns an element that is self with self[indices] replaced by value.
    fn store(
        &self,
        indices: Vec<Arc<SymbolicValue>>,
        value: Arc<SymbolicValue>,
    ) -> Arc<SymbolicValue> {
        precondition!(self.get_type().is_array());
        if let Expression::Select {
            array,
            indices: selected_at,
        } = &value.expression
        {
            if array == self && *selected_at == indices {
                return self.clone();
            }
        }
        SymbolicValue::make_from(Expression::Store {
            array: self.clone(),
            indices,
            value,
        })
    }

    fn as_bool_if_known(&self) -> Option<bool> {
        match &self.expression {
            Expression::CompileTimeConstant(c) => c.as_bool(),
            _ => None,
        }
    }

    fn as_int_if_known(&self) -> Option<i64> {
        match &self.expression {
            Expression::CompileTimeConstant(c) => c.as_i64(),
            _ => None,
        }
    }

    fn as_constant(&self) -> Option<&ConstantDomain> {
        match &self.expression {
            Expression::CompileTimeConstant(c) => Some(c),
            _ => None,
        }
    }
}

fn is_negation_of(a: &Arc<SymbolicValue>, b: &Arc<SymbolicValue>) -> bool {
    match (&a.expression, &b.expression) {
        (Expression::LogicalNot { operand }, _) => operand == b,
        (_, Expression::LogicalNot { operand }) => operand == a,
        _ => false,
    }
}
