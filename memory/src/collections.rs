// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

//! Lists, maps and sets of the analyzed program, expressed as updates of memory regions.
//!
//! A list is an `ArrayElement` region plus an `ArrayLength` region. A map is a `MapValue`
//! region, a `MapContains` region for key membership and a `MapLength` region for its size.
//! A set is a map without values. Every operation takes a guard: the operation only takes
//! effect in the executions where the guard holds.

use crate::error::Result;
use crate::expression::ExpressionType;
use crate::memory::Memory;
use crate::region_id::{RegionId, SIZE_TYPE};
use crate::symbolic_value::{SymbolicValue, SymbolicValueTrait, TRUE};
use crate::update_log::LocationKey;

use log_derive::logfn_inputs;
use std::sync::Arc;

fn one() -> Arc<SymbolicValue> {
    SymbolicValue::make_integer(1, &SIZE_TYPE)
}

/// The regions of lists of one static type.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct SymbolicListDescriptor {
    elements: RegionId,
    length: RegionId,
}

impl SymbolicListDescriptor {
    pub fn new(list_type: &str, element_sort: ExpressionType) -> SymbolicListDescriptor {
        SymbolicListDescriptor {
            elements: RegionId::array_element(list_type, element_sort),
            length: RegionId::array_length(list_type),
        }
    }

    pub fn elements(&self) -> &RegionId {
        &self.elements
    }

    pub fn length(&self) -> &RegionId {
        &self.length
    }

    pub fn size(&self, memory: &Memory, list: &Arc<SymbolicValue>) -> Arc<SymbolicValue> {
        memory.read(&self.length, &LocationKey::field(list.clone()))
    }

    pub fn get(
        &self,
        memory: &Memory,
        list: &Arc<SymbolicValue>,
        index: &Arc<SymbolicValue>,
    ) -> Arc<SymbolicValue> {
        memory.read(
            &self.elements,
            &LocationKey::element(list.clone(), index.clone()),
        )
    }

    pub fn set(
        &self,
        memory: &mut Memory,
        list: &Arc<SymbolicValue>,
        index: &Arc<SymbolicValue>,
        value: Arc<SymbolicValue>,
        guard: &Arc<SymbolicValue>,
    ) {
        memory.write(
            &self.elements,
            &LocationKey::element(list.clone(), index.clone()),
            value,
            guard,
        );
    }

    fn set_size(
        &self,
        memory: &mut Memory,
        list: &Arc<SymbolicValue>,
        size: Arc<SymbolicValue>,
        guard: &Arc<SymbolicValue>,
    ) {
        memory.write(&self.length, &LocationKey::field(list.clone()), size, guard);
    }

    /// Appends value to the end of the list.
    #[logfn_inputs(TRACE)]
    pub fn add(
        &self,
        memory: &mut Memory,
        list: &Arc<SymbolicValue>,
        value: Arc<SymbolicValue>,
        guard: &Arc<SymbolicValue>,
    ) {
        let size = self.size(memory, list);
        self.set(memory, list, &size, value, guard);
        self.set_size(memory, list, size.addition(one()), guard);
    }

    /// Inserts value at index, shifting the elements at and after index one position up.
    #[logfn_inputs(TRACE)]
    pub fn insert(
        &self,
        memory: &mut Memory,
        list: &Arc<SymbolicValue>,
        index: &Arc<SymbolicValue>,
        value: Arc<SymbolicValue>,
        guard: &Arc<SymbolicValue>,
    ) -> Result<()> {
        let size = self.size(memory, list);
        memory.copy_range(
            &self.elements,
            list.clone(),
            index.clone(),
            list.clone(),
            index.addition(one()),
            size.addition(one()),
            guard,
        )?;
        self.set(memory, list, index, value, guard);
        self.set_size(memory, list, size.addition(one()), guard);
        Ok(())
    }

    /// Removes the element at index, shifting the elements after it one position down.
    #[logfn_inputs(TRACE)]
    pub fn remove(
        &self,
        memory: &mut Memory,
        list: &Arc<SymbolicValue>,
        index: &Arc<SymbolicValue>,
        guard: &Arc<SymbolicValue>,
    ) -> Result<()> {
        let size = self.size(memory, list);
        let new_size = size.subtract(one());
        memory.copy_range(
            &self.elements,
            list.clone(),
            index.addition(one()),
            list.clone(),
            index.clone(),
            new_size.clone(),
            guard,
        )?;
        self.set_size(memory, list, new_size, guard);
        Ok(())
    }
}

/// The regions of maps of one static type.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct SymbolicMapDescriptor {
    values: RegionId,
    contains: RegionId,
    length: RegionId,
}

impl SymbolicMapDescriptor {
    pub fn new(
        map_type: &str,
        key_sort: ExpressionType,
        value_sort: ExpressionType,
    ) -> SymbolicMapDescriptor {
        SymbolicMapDescriptor {
            values: RegionId::map_value(map_type, key_sort.clone(), value_sort),
            contains: RegionId::map_contains(map_type, key_sort),
            length: RegionId::map_length(map_type),
        }
    }

    pub fn values(&self) -> &RegionId {
        &self.values
    }

    pub fn contains_region(&self) -> &RegionId {
        &self.contains
    }

    pub fn length(&self) -> &RegionId {
        &self.length
    }

    pub fn size(&self, memory: &Memory, map: &Arc<SymbolicValue>) -> Arc<SymbolicValue> {
        memory.read(&self.length, &LocationKey::field(map.clone()))
    }

    pub fn contains(
        &self,
        memory: &Memory,
        map: &Arc<SymbolicValue>,
        key: &Arc<SymbolicValue>,
    ) -> Arc<SymbolicValue> {
        memory.read(
            &self.contains,
            &LocationKey::element(map.clone(), key.clone()),
        )
    }

    /// The value stored for key. Meaningful only where `contains` holds.
    pub fn get(
        &self,
        memory: &Memory,
        map: &Arc<SymbolicValue>,
        key: &Arc<SymbolicValue>,
    ) -> Arc<SymbolicValue> {
        memory.read(&self.values, &LocationKey::element(map.clone(), key.clone()))
    }

    #[logfn_inputs(TRACE)]
    pub fn put(
        &self,
        memory: &mut Memory,
        map: &Arc<SymbolicValue>,
        key: &Arc<SymbolicValue>,
        value: Arc<SymbolicValue>,
        guard: &Arc<SymbolicValue>,
    ) {
        let entry = LocationKey::element(map.clone(), key.clone());
        let was_member = memory.read(&self.contains, &entry);
        memory.write(&self.values, &entry, value, guard);
        memory.write(&self.contains, &entry, TRUE.clone(), guard);
        let size = self.size(memory, map);
        memory.write(
            &self.length,
            &LocationKey::field(map.clone()),
            size.addition(one()),
            &guard.and(was_member.logical_not()),
        );
    }

    #[logfn_inputs(TRACE)]
    pub fn remove(
        &self,
        memory: &mut Memory,
        map: &Arc<SymbolicValue>,
        key: &Arc<SymbolicValue>,
        guard: &Arc<SymbolicValue>,
    ) {
        let entry = LocationKey::element(map.clone(), key.clone());
        let was_member = memory.read(&self.contains, &entry);
        memory.write(
            &self.contains,
            &entry,
            SymbolicValue::make_bool(false),
            guard,
        );
        let size = self.size(memory, map);
        memory.write(
            &self.length,
            &LocationKey::field(map.clone()),
            size.subtract(one()),
            &guard.and(was_member),
        );
    }

    /// Adds every entry of source to destination, overwriting the values of shared keys.
    /// The size of destination becomes the sum of both sizes, which is an upper bound when the
    /// key sets overlap.
    #[logfn_inputs(TRACE)]
    pub fn merge_into(
        &self,
        memory: &mut Memory,
        destination: &Arc<SymbolicValue>,
        source: &Arc<SymbolicValue>,
        guard: &Arc<SymbolicValue>,
    ) -> Result<()> {
        let size = self
            .size(memory, destination)
            .addition(self.size(memory, source));
        memory.merge_map_region(
            &self.values,
            &self.contains,
            source.clone(),
            destination.clone(),
            guard,
        )?;
        memory.merge_map_region(
            &self.contains,
            &self.contains,
            source.clone(),
            destination.clone(),
            guard,
        )?;
        memory.write(
            &self.length,
            &LocationKey::field(destination.clone()),
            size,
            guard,
        );
        Ok(())
    }
}

/// The regions of sets of one static type.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct SymbolicSetDescriptor {
    contains: RegionId,
    length: RegionId,
}

impl SymbolicSetDescriptor {
    pub fn new(set_type: &str, element_sort: ExpressionType) -> SymbolicSetDescriptor {
        SymbolicSetDescriptor {
            contains: RegionId::map_contains(set_type, element_sort),
            length: RegionId::map_length(set_type),
        }
    }

    pub fn contains_region(&self) -> &RegionId {
        &self.contains
    }

    pub fn length(&self) -> &RegionId {
        &self.length
    }

    pub fn size(&self, memory: &Memory, set: &Arc<SymbolicValue>) -> Arc<SymbolicValue> {
        memory.read(&self.length, &LocationKey::field(set.clone()))
    }

    pub fn contains(
        &self,
        memory: &Memory,
        set: &Arc<SymbolicValue>,
        element: &Arc<SymbolicValue>,
    ) -> Arc<SymbolicValue> {
        memory.read(
            &self.contains,
            &LocationKey::element(set.clone(), element.clone()),
        )
    }

    pub fn add(
        &self,
        memory: &mut Memory,
        set: &Arc<SymbolicValue>,
        element: &Arc<SymbolicValue>,
        guard: &Arc<SymbolicValue>,
    ) {
        let entry = LocationKey::element(set.clone(), element.clone());
        let was_member = memory.read(&self.contains, &entry);
        memory.write(&self.contains, &entry, TRUE.clone(), guard);
        let size = self.size(memory, set);
        memory.write(
            &self.length,
            &LocationKey::field(set.clone()),
            size.addition(one()),
            &guard.and(was_member.logical_not()),
        );
    }

    pub fn remove(
        &self,
        memory: &mut Memory,
        set: &Arc<SymbolicValue>,
        element: &Arc<SymbolicValue>,
        guard: &Arc<SymbolicValue>,
    ) {
        let entry = LocationKey::element(set.clone(), element.clone());
        let was_member = memory.read(&self.contains, &entry);
        memory.write(
            &self.contains,
            &entry,
            SymbolicValue::make_bool(false),
            guard,
        );
        let size = self.size(memory, set);
        memory.write(
            &self.length,
            &LocationKey::field(set.clone()),
            size.subtract(one()),
            &guard.and(was_member),
        );
    }

    /// Adds every element of source to destination. Same size bound as map merges.
    #[logfn_inputs(TRACE)]
    pub fn union(
        &self,
        memory: &mut Memory,
        destination: &Arc<SymbolicValue>,
        source: &Arc<SymbolicValue>,
        guard: &Arc<SymbolicValue>,
    ) -> Result<()> {
        let size = self
            .size(memory, destination)
            .addition(self.size(memory, source));
        memory.merge_map_region(
            &self.contains,
            &self.contains,
            source.clone(),
            destination.clone(),
            guard,
        )?;
        memory.write(
            &self.length,
            &LocationKey::field(destination.clone()),
            size,
            guard,
        );
        Ok(())
    }
}
