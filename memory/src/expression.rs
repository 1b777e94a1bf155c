// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

use crate::constant_domain::ConstantDomain;
use crate::region_id::RegionId;
use crate::symbolic_value::SymbolicValue;

use serde::Serialize;
use std::fmt::{Display, Formatter, Result};
use std::sync::Arc;

/// The sorts of symbolic values.
#[derive(Serialize, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum ExpressionType {
    Bool,
    I32,
    I64,
    Reference,
    /// A solver array from `domain` to `range`. Only translated terms have this sort.
    Array {
        domain: Vec<ExpressionType>,
        range: Box<ExpressionType>,
    },
}

impl Display for ExpressionType {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self {
            ExpressionType::Bool => f.write_str("bool"),
            ExpressionType::I32 => f.write_str("i32"),
            ExpressionType::I64 => f.write_str("i64"),
            ExpressionType::Reference => f.write_str("ref"),
            ExpressionType::Array { domain, range } => {
                f.write_str("(array")?;
                for d in domain {
                    write!(f, " {}", d)?;
                }
                write!(f, " {})", range)
            }
        }
    }
}

impl ExpressionType {
    pub fn array_of(domain: Vec<ExpressionType>, range: ExpressionType) -> ExpressionType {
        ExpressionType::Array {
            domain,
            range: Box::new(range),
        }
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, ExpressionType::I32 | ExpressionType::I64)
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, ExpressionType::Reference)
    }

    pub fn is_array(&self) -> bool {
        matches!(self, ExpressionType::Array { .. })
    }

    /// The number of bits used by the solver for an integer sort.
    pub fn bit_length(&self) -> u8 {
        match self {
            ExpressionType::Bool => 1,
            ExpressionType::I32 => 32,
            ExpressionType::I64 | ExpressionType::Reference => 64,
            ExpressionType::Array { .. } => 0,
        }
    }

    /// The sort of the values stored in an array sort, or self for scalar sorts.
    pub fn array_range(&self) -> &ExpressionType {
        match self {
            ExpressionType::Array { range, .. } => range.as_ref(),
            _ => self,
        }
    }

    pub fn array_domain(&self) -> &[ExpressionType] {
        match self {
            ExpressionType::Array { domain, .. } => domain.as_slice(),
            _ => &[],
        }
    }
}

/// The shapes of symbolic values. Children are shared `SymbolicValue` nodes.
#[derive(Serialize, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Expression {
    /// A value that is known at the time it is constructed.
    CompileTimeConstant(ConstantDomain),

    /// A free symbol. Front ends create these for inputs (parameters, register readings).
    Variable {
        name: Arc<str>,
        var_type: ExpressionType,
    },

    /// A parameter of an array lambda. Only meaningful inside the body of its lambda.
    BoundVariable {
        name: Arc<str>,
        var_type: ExpressionType,
    },

    /// left + right (wrapping)
    Add {
        left: Arc<SymbolicValue>,
        right: Arc<SymbolicValue>,
    },

    /// left - right (wrapping)
    Sub {
        left: Arc<SymbolicValue>,
        right: Arc<SymbolicValue>,
    },

    /// left == right
    Equals {
        left: Arc<SymbolicValue>,
        right: Arc<SymbolicValue>,
    },

    /// left < right, for integers.
    LessThan {
        left: Arc<SymbolicValue>,
        right: Arc<SymbolicValue>,
    },

    /// left <= right, for integers.
    LessOrEqual {
        left: Arc<SymbolicValue>,
        right: Arc<SymbolicValue>,
    },

    /// left && right
    And {
        left: Arc<SymbolicValue>,
        right: Arc<SymbolicValue>,
    },

    /// left || right
    Or {
        left: Arc<SymbolicValue>,
        right: Arc<SymbolicValue>,
    },

    /// !operand
    LogicalNot { operand: Arc<SymbolicValue> },

    /// if condition { consequent } else { alternate }
    ConditionalExpression {
        condition: Arc<SymbolicValue>,
        consequent: Arc<SymbolicValue>,
        alternate: Arc<SymbolicValue>,
    },

    /// True if the object at operand has a dynamic type that is a subtype of type_name.
    IsSubtype {
        operand: Arc<SymbolicValue>,
        type_name: Arc<str>,
    },

    /// The value stored at the given key of a region before execution started.
    /// This is where folding an input update log bottoms out.
    InputRead {
        region: Arc<RegionId>,
        key: Vec<Arc<SymbolicValue>>,
    },

    /// An uninterpreted array, such as the base array of an input region.
    ArrayConstant {
        name: Arc<str>,
        array_type: ExpressionType,
    },

    /// An array that maps every index to value.
    ConstantArray {
        value: Arc<SymbolicValue>,
        array_type: ExpressionType,
    },

    /// array[indices]
    Select {
        array: Arc<SymbolicValue>,
        indices: Vec<Arc<SymbolicValue>>,
    },

    /// array with array[indices] replaced by value.
    Store {
        array: Arc<SymbolicValue>,
        indices: Vec<Arc<SymbolicValue>>,
        value: Arc<SymbolicValue>,
    },

    /// An array whose element at parameters is body.
    ArrayLambda {
        parameters: Vec<Arc<SymbolicValue>>,
        body: Arc<SymbolicValue>,
    },
}

impl Expression {
    /// Computes the sort of this expression from the (cached) sorts of its children.
    pub fn infer_type(&self) -> ExpressionType {
        match self {
            Expression::CompileTimeConstant(c) => c.get_type(),
            Expression::Variable { var_type, .. } | Expression::BoundVariable { var_type, .. } => {
                var_type.clone()
            }
            Expression::Add { left, .. } | Expression::Sub { left, .. } => {
                left.get_type().clone()
            }
            Expression::Equals { .. }
            | Expression::LessThan { .. }
            | Expression::LessOrEqual { .. }
            | Expression::And { .. }
            | Expression::Or { .. }
            | Expression::LogicalNot { .. }
            | Expression::IsSubtype { .. } => ExpressionType::Bool,
            Expression::ConditionalExpression { consequent, .. } => consequent.get_type().clone(),
            Expression::InputRead { region, .. } => region.value_sort(),
            Expression::ArrayConstant { array_type, .. }
            | Expression::ConstantArray { array_type, .. } => array_type.clone(),
            Expression::Select { array, .. } => array.get_type().array_range().clone(),
            Expression::Store { array, .. } => array.get_type().clone(),
            Expression::ArrayLambda { parameters, body } => ExpressionType::array_of(
                parameters.iter().map(|p| p.get_type().clone()).collect(),
                body.get_type().clone(),
            ),
        }
    }
}
