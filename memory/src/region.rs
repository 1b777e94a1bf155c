// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

use crate::address::{is_single_leaf, join_leaf_values, split_heap_reference, HeapAddress};
use crate::constant_domain::ConstantDomain;
use crate::error::{Error, Result};
use crate::ownership::Ownership;
use crate::region_id::RegionId;
use crate::symbolic_value::{SymbolicValue, SymbolicValueTrait};
use crate::update_log::{LocationKey, RangedAdapter, RangedUpdate, UpdateLog, UpdateNode};

use log_derive::{logfn, logfn_inputs};
use mirai_annotations::*;
use rpds::HashTrieMapSync;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

/// The concrete part of a location key within an allocated object. None for field-like regions.
pub type SecondaryKey = Option<ConstantDomain>;

/// The contents of one allocated object within one region.
///
/// Writes with a concrete (or absent) secondary key and a trivially true guard go into
/// `values`. Everything else goes into a per-object update log whose base is `values`.
/// Once an object has a log, all further writes are appended to the log.
#[derive(Clone, Default)]
pub struct AllocatedObject {
    values: HashTrieMapSync<SecondaryKey, Arc<SymbolicValue>>,
    updates: Option<UpdateLog>,
}

impl AllocatedObject {
    pub fn get(&self, key: &SecondaryKey) -> Option<&Arc<SymbolicValue>> {
        self.values.get(key)
    }

    /// The explicitly stored values, ordered by key.
    pub fn values(&self) -> Vec<(SecondaryKey, Arc<SymbolicValue>)> {
        let mut result: Vec<(SecondaryKey, Arc<SymbolicValue>)> = self
            .values
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        result.sort_by(|(k1, _), (k2, _)| k1.cmp(k2));
        result
    }

    pub fn updates(&self) -> Option<&UpdateLog> {
        self.updates.as_ref()
    }
}

/// A persistent store of the locations that share one region id.
#[derive(Clone)]
pub struct MemoryRegion {
    id: Arc<RegionId>,
    allocated: HashTrieMapSync<u32, AllocatedObject>,
    input: Option<UpdateLog>,
    ownership: Ownership,
}

impl Debug for MemoryRegion {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} [{} allocated, {} input updates]",
            self.id,
            self.allocated.size(),
            self.input.as_ref().map_or(0, |log| log.len())
        )
    }
}

impl MemoryRegion {
    pub fn new(id: RegionId, ownership: Ownership) -> MemoryRegion {
        MemoryRegion {
            id: Arc::new(id),
            allocated: HashTrieMapSync::new_sync(),
            input: None,
            ownership,
        }
    }

    pub fn id(&self) -> &RegionId {
        &self.id
    }

    pub fn ownership(&self) -> Ownership {
        self.ownership
    }

    pub fn set_ownership(&mut self, ownership: Ownership) {
        self.ownership = ownership;
    }

    /// The update log of the input partition. None until something is written there.
    pub fn input_updates(&self) -> Option<&UpdateLog> {
        self.input.as_ref()
    }

    pub fn allocated_object(&self, address: u32) -> Option<&AllocatedObject> {
        self.allocated.get(&address)
    }

    /// The addresses of allocated objects this region holds values for, in ascending order.
    pub fn allocated_addresses(&self) -> Vec<u32> {
        let mut result: Vec<u32> = self.allocated.keys().copied().collect();
        result.sort_unstable();
        result
    }

    /// Returns the value stored at key.
    #[logfn_inputs(TRACE)]
    pub fn read(&self, key: &LocationKey) -> Arc<SymbolicValue> {
        if is_single_leaf(&key.address) {
            return self.read_leaf(&HeapAddress::classify(&key.address), key);
        }
        let leaves = split_heap_reference(&key.address, &crate::symbolic_value::TRUE);
        let values = leaves
            .into_iter()
            .map(|leaf| {
                let leaf_key = key.with_address(leaf.address.to_value());
                (leaf.guard, self.read_leaf(&leaf.address, &leaf_key))
            })
            .collect();
        join_leaf_values(values, self.id.default_value())
    }

    fn read_leaf(&self, address: &HeapAddress, key: &LocationKey) -> Arc<SymbolicValue> {
        match address {
            HeapAddress::Null => self.id.default_value(),
            HeapAddress::Concrete(a) => self.read_allocated(*a, key),
            HeapAddress::Symbolic(..) => self.read_input(key),
        }
    }

    /// Reads a location of the allocated object at address.
    pub fn read_allocated(&self, address: u32, key: &LocationKey) -> Arc<SymbolicValue> {
        let base = || self.allocated_base(address, key.secondary.as_ref());
        match self
            .allocated
            .get(&address)
            .and_then(|object| object.updates.as_ref())
        {
            Some(log) => log.read(key, base),
            None => base(),
        }
    }

    /// The value of the explicitly stored part of an allocated object. A symbolic secondary
    /// key selects among the stored entries with a chain of conditional expressions.
    pub fn allocated_base(
        &self,
        address: u32,
        secondary: Option<&Arc<SymbolicValue>>,
    ) -> Arc<SymbolicValue> {
        let default = self.id.default_value();
        let object = match self.allocated.get(&address) {
            Some(object) => object,
            None => return default,
        };
        match secondary {
            None => object.values.get(&None).cloned().unwrap_or(default),
            Some(secondary) => {
                if let Some(c) = secondary.as_constant() {
                    return object
                        .values
                        .get(&Some(c.clone()))
                        .cloned()
                        .unwrap_or(default);
                }
                let mut result = default;
                for (k, v) in object.values().into_iter().rev() {
                    if let Some(c) = k {
                        let matches = secondary.equals(SymbolicValue::make_constant(c));
                        result = matches.conditional_expression(v, result);
                    }
                }
                result
            }
        }
    }

    /// Reads a location whose address is a symbolic (input) reference.
    pub fn read_input(&self, key: &LocationKey) -> Arc<SymbolicValue> {
        match &self.input {
            Some(log) => log.read(key, || self.input_placeholder(key)),
            None => self.input_placeholder(key),
        }
    }

    /// The value an input location had before execution started.
    pub fn input_placeholder(&self, key: &LocationKey) -> Arc<SymbolicValue> {
        SymbolicValue::make_input_read(self.id.clone(), key.components())
    }

    /// Returns a new version of this region in which the location at key holds value if guard
    /// is true. This region is left unchanged.
    pub fn write(
        &self,
        key: &LocationKey,
        value: Arc<SymbolicValue>,
        guard: &Arc<SymbolicValue>,
    ) -> MemoryRegion {
        let mut result = self.clone();
        result.write_mut(key, value, guard);
        result
    }

    /// Updates this region in place. Nodes of the persistent structures that are shared with
    /// other versions are copied, so other versions are not affected.
    #[logfn_inputs(TRACE)]
    pub fn write_mut(
        &mut self,
        key: &LocationKey,
        value: Arc<SymbolicValue>,
        guard: &Arc<SymbolicValue>,
    ) {
        verify!(*value.get_type() == self.id.value_sort());
        for leaf in split_heap_reference(&key.address, guard) {
            let leaf_key = key.with_address(leaf.address.to_value());
            match leaf.address {
                HeapAddress::Null => {
                    debug!("write through a null reference to {} ignored", self.id);
                }
                HeapAddress::Concrete(a) => {
                    self.write_allocated(a, leaf_key, value.clone(), leaf.guard)
                }
                HeapAddress::Symbolic(..) => {
                    self.input
                        .get_or_insert_with(UpdateLog::new)
                        .push_mut(UpdateNode::Pinpoint {
                            key: leaf_key,
                            value: value.clone(),
                            guard: leaf.guard,
                        });
                }
            }
        }
    }

    fn write_allocated(
        &mut self,
        address: u32,
        key: LocationKey,
        value: Arc<SymbolicValue>,
        guard: Arc<SymbolicValue>,
    ) {
        let mut object = self.take_object(address);
        let concrete_secondary: Option<SecondaryKey> = match &key.secondary {
            None => Some(None),
            Some(s) => s.as_constant().map(|c| Some(c.clone())),
        };
        match concrete_secondary {
            Some(secondary)
                if object.updates.is_none() && guard.as_bool_if_known() == Some(true) =>
            {
                object.values.insert_mut(secondary, value);
            }
            _ => {
                object
                    .updates
                    .get_or_insert_with(UpdateLog::new)
                    .push_mut(UpdateNode::Pinpoint { key, value, guard });
            }
        }
        self.allocated.insert_mut(address, object);
    }

    // Removes the object from the map before it is updated so that a uniquely owned map does
    // not keep a second handle to the object's nodes.
    fn take_object(&mut self, address: u32) -> AllocatedObject {
        let object = self.allocated.get(&address).cloned().unwrap_or_default();
        self.allocated.remove_mut(&address);
        object
    }

    /// Returns a new version of this region in which the elements
    /// `[destination_from, destination_to)` of the array at destination_address are the
    /// elements of the array at source_address in source, starting at source_from.
    /// This is a single log entry, whatever the length of the range.
    #[allow(clippy::too_many_arguments)]
    pub fn copy_range(
        &self,
        source: &MemoryRegion,
        source_address: Arc<SymbolicValue>,
        source_from: Arc<SymbolicValue>,
        destination_address: Arc<SymbolicValue>,
        destination_from: Arc<SymbolicValue>,
        destination_to: Arc<SymbolicValue>,
        guard: &Arc<SymbolicValue>,
    ) -> Result<MemoryRegion> {
        let mut result = self.clone();
        result.copy_range_mut(
            source,
            source_address,
            source_from,
            destination_address,
            destination_from,
            destination_to,
            guard,
        )?;
        Ok(result)
    }

    #[allow(clippy::too_many_arguments)]
    #[logfn(TRACE)]
    pub fn copy_range_mut(
        &mut self,
        source: &MemoryRegion,
        source_address: Arc<SymbolicValue>,
        source_from: Arc<SymbolicValue>,
        destination_address: Arc<SymbolicValue>,
        destination_from: Arc<SymbolicValue>,
        destination_to: Arc<SymbolicValue>,
        guard: &Arc<SymbolicValue>,
    ) -> Result<()> {
        if !self.id.supports_copy_range() || source.id != self.id {
            return Err(Error::unsupported_ranged_update(&self.id));
        }
        let snapshot = Arc::new(source.clone());
        self.push_ranged_mut(&destination_address, guard, |destination, guard| {
            RangedUpdate {
                source: snapshot.clone(),
                adapter: RangedAdapter::ArrayCopy {
                    source_address: source_address.clone(),
                    source_from: source_from.clone(),
                    destination_address: destination,
                    destination_from: destination_from.clone(),
                    destination_to: destination_to.clone(),
                },
                guard,
            }
        });
        Ok(())
    }

    /// Overlays the entries of the map at source_address onto the map at destination_address.
    /// source holds the values to copy (it is this region's own kind) and source_contains the
    /// membership flags of the source map.
    #[logfn(TRACE)]
    pub fn merge_from_mut(
        &mut self,
        source: &MemoryRegion,
        source_contains: &MemoryRegion,
        source_address: Arc<SymbolicValue>,
        destination_address: Arc<SymbolicValue>,
        guard: &Arc<SymbolicValue>,
    ) -> Result<()> {
        if !self.id.supports_merge() || source.id != self.id {
            return Err(Error::unsupported_ranged_update(&self.id));
        }
        let snapshot = Arc::new(source.clone());
        let contains_snapshot = Arc::new(source_contains.clone());
        self.push_ranged_mut(&destination_address, guard, |destination, guard| {
            RangedUpdate {
                source: snapshot.clone(),
                adapter: RangedAdapter::MapMerge {
                    source_address: source_address.clone(),
                    destination_address: destination,
                    source_contains: contains_snapshot.clone(),
                },
                guard,
            }
        });
        Ok(())
    }

    fn push_ranged_mut<F>(
        &mut self,
        destination_address: &Arc<SymbolicValue>,
        guard: &Arc<SymbolicValue>,
        make_update: F,
    ) where
        F: Fn(Arc<SymbolicValue>, Arc<SymbolicValue>) -> RangedUpdate,
    {
        for leaf in split_heap_reference(destination_address, guard) {
            let update = UpdateNode::Ranged(make_update(leaf.address.to_value(), leaf.guard));
            match leaf.address {
                HeapAddress::Null => {
                    debug!("ranged update of {} through a null reference ignored", self.id);
                }
                HeapAddress::Concrete(a) => {
                    let mut object = self.take_object(a);
                    object
                        .updates
                        .get_or_insert_with(UpdateLog::new)
                        .push_mut(update);
                    self.allocated.insert_mut(a, object);
                }
                HeapAddress::Symbolic(..) => {
                    self.input.get_or_insert_with(UpdateLog::new).push_mut(update);
                }
            }
        }
    }

    /// Merges two versions of this region under guard: the result reads like `self` where guard
    /// holds and like `other` elsewhere. A location stored on one side only reads as the region
    /// default on the other side.
    #[logfn_inputs(TRACE)]
    pub fn merge(
        &self,
        other: &MemoryRegion,
        guard: &Arc<SymbolicValue>,
        ownership: Ownership,
    ) -> MemoryRegion {
        precondition!(self.id == other.id);
        let empty = AllocatedObject::default();
        let mut allocated = HashTrieMapSync::new_sync();
        let addresses = self
            .allocated
            .keys()
            .chain(other.allocated.keys().filter(|a| !self.allocated.contains_key(*a)));
        for address in addresses {
            let left = self.allocated.get(address).unwrap_or(&empty);
            let right = other.allocated.get(address).unwrap_or(&empty);
            allocated.insert_mut(*address, self.merge_objects(left, right, guard));
        }
        let input = match (&self.input, &other.input) {
            (None, None) => None,
            (l, r) => Some(UpdateLog::merge(
                &l.clone().unwrap_or_default(),
                &r.clone().unwrap_or_default(),
                guard,
            )),
        };
        MemoryRegion {
            id: self.id.clone(),
            allocated,
            input,
            ownership,
        }
    }

    fn merge_objects(
        &self,
        left: &AllocatedObject,
        right: &AllocatedObject,
        guard: &Arc<SymbolicValue>,
    ) -> AllocatedObject {
        let default = self.id.default_value();
        let mut values = HashTrieMapSync::new_sync();
        for (k, lv) in left.values.iter() {
            let rv = right.values.get(k).unwrap_or(&default);
            values.insert_mut(k.clone(), guard.conditional_expression(lv.clone(), rv.clone()));
        }
        for (k, rv) in right.values.iter() {
            if !left.values.contains_key(k) {
                values.insert_mut(
                    k.clone(),
                    guard.conditional_expression(default.clone(), rv.clone()),
                );
            }
        }
        let updates = match (&left.updates, &right.updates) {
            (None, None) => None,
            (l, r) => Some(UpdateLog::merge(
                &l.clone().unwrap_or_default(),
                &r.clone().unwrap_or_default(),
                guard,
            )),
        };
        AllocatedObject { values, updates }
    }
}
