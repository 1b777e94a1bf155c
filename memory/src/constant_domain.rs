// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

use crate::expression::ExpressionType;

use mirai_annotations::*;
use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Formatter, Result};

/// Concrete values that can appear as leaves of symbolic expressions, in allocated memory
/// and in solver models.
#[derive(Serialize, Deserialize, Clone, Eq, PartialOrd, PartialEq, Hash, Ord)]
pub enum ConstantDomain {
    /// The impossible constant. Use this as the result of a partial transfer function.
    Bottom,
    /// The Boolean value false.
    False,
    /// The Boolean value true.
    True,
    /// Signed 4 byte integer.
    I32(i32),
    /// Signed 8 byte integer.
    I64(i64),
    /// The null reference.
    Null,
    /// The address of an object allocated by the current state. Always positive.
    HeapAddress(u32),
    /// The address of an object that existed before execution started. Only models produce
    /// these; a symbolic input reference evaluates to one of them or to Null.
    InputAddress(u32),
}

impl Debug for ConstantDomain {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self {
            ConstantDomain::Bottom => f.write_str("BOTTOM"),
            ConstantDomain::False => f.write_str("false"),
            ConstantDomain::True => f.write_str("true"),
            ConstantDomain::I32(v) => write!(f, "{}i32", v),
            ConstantDomain::I64(v) => write!(f, "{}i64", v),
            ConstantDomain::Null => f.write_str("null"),
            ConstantDomain::HeapAddress(a) => write!(f, "0x{}", a),
            ConstantDomain::InputAddress(a) => write!(f, "in{}", a),
        }
    }
}

impl From<bool> for ConstantDomain {
    fn from(b: bool) -> ConstantDomain {
        if b {
            ConstantDomain::True
        } else {
            ConstantDomain::False
        }
    }
}

impl From<i32> for ConstantDomain {
    fn from(v: i32) -> ConstantDomain {
        ConstantDomain::I32(v)
    }
}

impl From<i64> for ConstantDomain {
    fn from(v: i64) -> ConstantDomain {
        ConstantDomain::I64(v)
    }
}

impl ConstantDomain {
    /// The value a location of the given sort holds before anything is written to it.
    pub fn default_for(var_type: &ExpressionType) -> ConstantDomain {
        match var_type {
            ExpressionType::Bool => ConstantDomain::False,
            ExpressionType::I32 => ConstantDomain::I32(0),
            ExpressionType::I64 => ConstantDomain::I64(0),
            ExpressionType::Reference => ConstantDomain::Null,
            ExpressionType::Array { .. } => {
                assume_unreachable!("arrays have no scalar default value")
            }
        }
    }

    /// Returns the sort of this constant.
    pub fn get_type(&self) -> ExpressionType {
        match self {
            ConstantDomain::False | ConstantDomain::True | ConstantDomain::Bottom => {
                ExpressionType::Bool
            }
            ConstantDomain::I32(..) => ExpressionType::I32,
            ConstantDomain::I64(..) => ExpressionType::I64,
            ConstantDomain::Null
            | ConstantDomain::HeapAddress(..)
            | ConstantDomain::InputAddress(..) => ExpressionType::Reference,
        }
    }

    pub fn is_bottom(&self) -> bool {
        matches!(self, ConstantDomain::Bottom)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConstantDomain::True => Some(true),
            ConstantDomain::False => Some(false),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ConstantDomain::I32(v) => Some(i64::from(*v)),
            ConstantDomain::I64(v) => Some(*v),
            _ => None,
        }
    }

    /// Builds an integer constant of the given integer sort.
    pub fn integer(value: i64, var_type: &ExpressionType) -> ConstantDomain {
        precondition!(var_type.is_integer());
        match var_type {
            ExpressionType::I32 => ConstantDomain::I32(value as i32),
            _ => ConstantDomain::I64(value),
        }
    }

    /// The ordinal used to encode a reference as a solver integer.
    /// Null is 0, allocated addresses are positive, input addresses are negative.
    pub fn as_reference_ordinal(&self) -> Option<i64> {
        match self {
            ConstantDomain::Null => Some(0),
            ConstantDomain::HeapAddress(a) => Some(i64::from(*a)),
            ConstantDomain::InputAddress(a) => Some(-i64::from(*a)),
            _ => None,
        }
    }

    /// Inverse of `as_reference_ordinal`. None if the ordinal is outside the address range.
    pub fn from_reference_ordinal(ordinal: i64) -> Option<ConstantDomain> {
        if ordinal == 0 {
            Some(ConstantDomain::Null)
        } else if ordinal > 0 {
            u32::try_from(ordinal).ok().map(ConstantDomain::HeapAddress)
        } else {
            u32::try_from(ordinal.unsigned_abs())
                .ok()
                .map(ConstantDomain::InputAddress)
        }
    }

    /// Returns a constant that is self + other (wrapping).
    pub fn add(&self, other: &Self) -> Self {
        match (self, other) {
            (ConstantDomain::I32(val1), ConstantDomain::I32(val2)) => {
                ConstantDomain::I32(val1.wrapping_add(*val2))
            }
            (ConstantDomain::I64(val1), ConstantDomain::I64(val2)) => {
                ConstantDomain::I64(val1.wrapping_add(*val2))
            }
            _ => ConstantDomain::Bottom,
        }
    }

    /// Returns a constant that is self - other (wrapping).
    pub fn sub(&self, other: &Self) -> Self {
        match (self, other) {
            (ConstantDomain::I32(val1), ConstantDomain::I32(val2)) => {
                ConstantDomain::I32(val1.wrapping_sub(*val2))
            }
            (ConstantDomain::I64(val1), ConstantDomain::I64(val2)) => {
                ConstantDomain::I64(val1.wrapping_sub(*val2))
            }
            _ => ConstantDomain::Bottom,
        }
    }

    /// Returns a constant that is true if self and other are the same value.
    /// Constants are canonical, so structural equality is value equality.
    pub fn equals(&self, other: &Self) -> Self {
        if self.is_bottom() || other.is_bottom() {
            return ConstantDomain::Bottom;
        }
        (*self == *other).into()
    }

    /// Returns a constant that is true if self < other.
    pub fn less_than(&self, other: &Self) -> Self {
        match (self.as_i64(), other.as_i64()) {
            (Some(val1), Some(val2)) => (val1 < val2).into(),
            _ => ConstantDomain::Bottom,
        }
    }

    /// Returns a constant that is true if self <= other.
    pub fn less_or_equal(&self, other: &Self) -> Self {
        match (self.as_i64(), other.as_i64()) {
            (Some(val1), Some(val2)) => (val1 <= val2).into(),
            _ => ConstantDomain::Bottom,
        }
    }

    /// Returns a constant that is !self where self is a bool.
    pub fn not(&self) -> Self {
        match self {
            ConstantDomain::False => ConstantDomain::True,
            ConstantDomain::True => ConstantDomain::False,
            _ => ConstantDomain::Bottom,
        }
    }
}
