// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

use crate::expression::ExpressionType;
use crate::symbolic_value::SymbolicValue;

use serde::Serialize;
use std::fmt::{Display, Formatter, Result};
use std::sync::Arc;

/// The sort used for collection lengths and array indices.
pub const SIZE_TYPE: ExpressionType = ExpressionType::I32;

/// Identifies a family of memory locations that share a sort and a static key.
/// Two region ids are equal iff their kind, declared sorts and static keys are equal.
#[derive(Serialize, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum RegionId {
    /// A field of objects. Locations are keyed by object address only.
    Field { field: Arc<str>, sort: ExpressionType },
    /// The elements of arrays of the given type. Locations are keyed by (address, index).
    ArrayElement {
        array_type: Arc<str>,
        sort: ExpressionType,
    },
    /// The lengths of arrays of the given type.
    ArrayLength { array_type: Arc<str> },
    /// The values of maps of the given type. Locations are keyed by (address, map key).
    MapValue {
        map_type: Arc<str>,
        key_sort: ExpressionType,
        sort: ExpressionType,
    },
    /// Membership flags of maps (and sets) of the given type.
    MapContains {
        map_type: Arc<str>,
        key_sort: ExpressionType,
    },
    /// The sizes of maps (and sets) of the given type.
    MapLength { map_type: Arc<str> },
}

/// The kind of a region id, used to select kind specific behavior such as translation hooks.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum RegionKind {
    Field,
    ArrayElement,
    ArrayLength,
    MapValue,
    MapContains,
    MapLength,
}

impl Display for RegionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self {
            RegionId::Field { field, sort } => write!(f, "field<{}:{}>", field, sort),
            RegionId::ArrayElement { array_type, sort } => {
                write!(f, "array<{}:{}>", array_type, sort)
            }
            RegionId::ArrayLength { array_type } => write!(f, "length<{}>", array_type),
            RegionId::MapValue {
                map_type,
                key_sort,
                sort,
            } => write!(f, "map<{}:{}->{}>", map_type, key_sort, sort),
            RegionId::MapContains { map_type, key_sort } => {
                write!(f, "contains<{}:{}>", map_type, key_sort)
            }
            RegionId::MapLength { map_type } => write!(f, "size<{}>", map_type),
        }
    }
}

impl RegionId {
    pub fn field(field: &str, sort: ExpressionType) -> RegionId {
        RegionId::Field {
            field: Arc::from(field),
            sort,
        }
    }

    pub fn array_element(array_type: &str, sort: ExpressionType) -> RegionId {
        RegionId::ArrayElement {
            array_type: Arc::from(array_type),
            sort,
        }
    }

    pub fn array_length(array_type: &str) -> RegionId {
        RegionId::ArrayLength {
            array_type: Arc::from(array_type),
        }
    }

    pub fn map_value(map_type: &str, key_sort: ExpressionType, sort: ExpressionType) -> RegionId {
        RegionId::MapValue {
            map_type: Arc::from(map_type),
            key_sort,
            sort,
        }
    }

    pub fn map_contains(map_type: &str, key_sort: ExpressionType) -> RegionId {
        RegionId::MapContains {
            map_type: Arc::from(map_type),
            key_sort,
        }
    }

    pub fn map_length(map_type: &str) -> RegionId {
        RegionId::MapLength {
            map_type: Arc::from(map_type),
        }
    }

    pub fn kind(&self) -> RegionKind {
        match self {
            RegionId::Field { .. } => RegionKind::Field,
            RegionId::ArrayElement { .. } => RegionKind::ArrayElement,
            RegionId::ArrayLength { .. } => RegionKind::ArrayLength,
            RegionId::MapValue { .. } => RegionKind::MapValue,
            RegionId::MapContains { .. } => RegionKind::MapContains,
            RegionId::MapLength { .. } => RegionKind::MapLength,
        }
    }

    /// The sort of the values stored in this region.
    pub fn value_sort(&self) -> ExpressionType {
        match self {
            RegionId::Field { sort, .. }
            | RegionId::ArrayElement { sort, .. }
            | RegionId::MapValue { sort, .. } => sort.clone(),
            RegionId::ArrayLength { .. } | RegionId::MapLength { .. } => SIZE_TYPE,
            RegionId::MapContains { .. } => ExpressionType::Bool,
        }
    }

    /// The sort of the secondary key, or None for field-like regions.
    pub fn secondary_key_sort(&self) -> Option<ExpressionType> {
        match self {
            RegionId::ArrayElement { .. } => Some(SIZE_TYPE),
            RegionId::MapValue { key_sort, .. } | RegionId::MapContains { key_sort, .. } => {
                Some(key_sort.clone())
            }
            RegionId::Field { .. } | RegionId::ArrayLength { .. } | RegionId::MapLength { .. } => {
                None
            }
        }
    }

    /// The value read from a location nothing has been written to.
    pub fn default_value(&self) -> Arc<SymbolicValue> {
        SymbolicValue::make_default(&self.value_sort())
    }

    /// The sort of the base array of the input partition: `[Reference, secondary] -> value`.
    pub fn input_array_type(&self) -> ExpressionType {
        let mut domain = vec![ExpressionType::Reference];
        if let Some(secondary) = self.secondary_key_sort() {
            domain.push(secondary);
        }
        ExpressionType::array_of(domain, self.value_sort())
    }

    /// The sort of the array that holds the elements of one allocated object, if the region
    /// has a secondary key.
    pub fn allocated_array_type(&self) -> Option<ExpressionType> {
        self.secondary_key_sort()
            .map(|secondary| ExpressionType::array_of(vec![secondary], self.value_sort()))
    }

    /// The name of the uninterpreted base array constant of the input partition.
    pub fn base_array_name(&self) -> String {
        format!("input:{}", self)
    }

    /// Only array element regions accept ranged copies.
    pub fn supports_copy_range(&self) -> bool {
        self.kind() == RegionKind::ArrayElement
    }

    /// Only map value and membership regions accept ranged merges.
    pub fn supports_merge(&self) -> bool {
        matches!(self.kind(), RegionKind::MapValue | RegionKind::MapContains)
    }
}
