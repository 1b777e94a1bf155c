// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

use crate::error::{MergeFailure, Result};
use crate::options::Options;
use crate::ownership::Ownership;
use crate::region::MemoryRegion;
use crate::region_id::RegionId;
use crate::symbolic_value::{SymbolicValue, SymbolicValueTrait};
use crate::update_log::LocationKey;

use log_derive::{logfn, logfn_inputs};
use rpds::{HashTrieMapSync, VectorSync};
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

/// The registers of one activation record, keyed by register number.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegisterFrame {
    registers: HashTrieMapSync<u32, Arc<SymbolicValue>>,
}

impl Default for RegisterFrame {
    fn default() -> Self {
        RegisterFrame {
            registers: HashTrieMapSync::new_sync(),
        }
    }
}

impl RegisterFrame {
    pub fn get(&self, index: u32) -> Option<&Arc<SymbolicValue>> {
        self.registers.get(&index)
    }

    /// The defined registers, in ascending order.
    pub fn registers(&self) -> Vec<(u32, Arc<SymbolicValue>)> {
        let mut result: Vec<(u32, Arc<SymbolicValue>)> = self
            .registers
            .iter()
            .map(|(k, v)| (*k, v.clone()))
            .collect();
        result.sort_unstable_by_key(|(k, _)| *k);
        result
    }

    fn merge(
        &self,
        other: &RegisterFrame,
        guard: &Arc<SymbolicValue>,
    ) -> std::result::Result<RegisterFrame, MergeFailure> {
        let mut registers = HashTrieMapSync::new_sync();
        for (index, left) in self.registers.iter() {
            let right = other
                .registers
                .get(index)
                .ok_or(MergeFailure::Register(*index))?;
            registers.insert_mut(
                *index,
                guard.conditional_expression(left.clone(), right.clone()),
            );
        }
        if let Some(index) = other
            .registers
            .keys()
            .find(|index| !self.registers.contains_key(*index))
        {
            return Err(MergeFailure::Register(*index));
        }
        Ok(RegisterFrame { registers })
    }
}

/// The memory of one execution state: a stack of register frames, one region per region id,
/// the allocation counter and the dynamic types of allocated objects.
///
/// All parts are persistent, so cloning a memory is cheap and clones never observe each
/// other's updates.
#[derive(Clone)]
pub struct Memory {
    frames: VectorSync<RegisterFrame>,
    regions: HashTrieMapSync<RegionId, MemoryRegion>,
    allocated_types: HashTrieMapSync<u32, Arc<str>>,
    next_address: u32,
    ownership: Ownership,
    in_place_updates: bool,
}

impl Debug for Memory {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memory")
            .field("frames", &self.frames.len())
            .field("regions", &self.regions())
            .field("next_address", &self.next_address)
            .finish()
    }
}

impl Default for Memory {
    fn default() -> Self {
        Memory::new(&Options::default())
    }
}

impl Memory {
    pub fn new(options: &Options) -> Memory {
        Memory {
            frames: VectorSync::new_sync(),
            regions: HashTrieMapSync::new_sync(),
            allocated_types: HashTrieMapSync::new_sync(),
            next_address: 1,
            ownership: Ownership::new(),
            in_place_updates: options.in_place_updates,
        }
    }

    pub fn ownership(&self) -> Ownership {
        self.ownership
    }

    /// Gives this memory a fresh ownership token. Regions tagged with the old token are copied
    /// on their next update.
    pub fn renew_ownership(&mut self) {
        self.ownership = Ownership::new();
    }

    /// Returns a copy of this memory that has its own ownership token.
    pub fn clone_with_new_ownership(&self) -> Memory {
        let mut result = self.clone();
        result.renew_ownership();
        result
    }

    // Registers

    pub fn push_frame(&mut self) {
        self.frames.push_back_mut(RegisterFrame::default());
    }

    pub fn pop_frame(&mut self) -> bool {
        self.frames.drop_last_mut()
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn current_frame(&self) -> Option<&RegisterFrame> {
        self.frames.last()
    }

    /// Returns the value of a register of the current frame.
    pub fn read_register(&self, index: u32) -> Option<Arc<SymbolicValue>> {
        self.frames.last().and_then(|frame| frame.get(index).cloned())
    }

    /// Sets a register of the current frame, pushing a frame if there is none.
    pub fn write_register(&mut self, index: u32, value: Arc<SymbolicValue>) {
        if self.frames.is_empty() {
            self.push_frame();
        }
        let last = self.frames.len() - 1;
        let mut frame = self.frames.get(last).cloned().unwrap_or_default();
        frame.registers.insert_mut(index, value);
        self.frames.set_mut(last, frame);
    }

    // Allocation

    /// Allocates a fresh object of the given dynamic type and returns its (concrete) address.
    /// Addresses are handed out densely starting at 1 and are never reused by this memory.
    #[logfn(TRACE)]
    pub fn allocate(&mut self, type_name: &str) -> Arc<SymbolicValue> {
        let address = self.next_address;
        self.next_address += 1;
        self.allocated_types.insert_mut(address, Arc::from(type_name));
        SymbolicValue::make_heap_address(address)
    }

    /// The address the next allocation will return.
    pub fn next_address(&self) -> u32 {
        self.next_address
    }

    /// The dynamic type of an allocated object.
    pub fn type_of(&self, address: u32) -> Option<&Arc<str>> {
        self.allocated_types.get(&address)
    }

    // Regions

    pub fn region(&self, id: &RegionId) -> Option<&MemoryRegion> {
        self.regions.get(id)
    }

    /// Returns the current version of the region for id, or an empty region if nothing has been
    /// written to it yet.
    pub fn region_for(&self, id: &RegionId) -> MemoryRegion {
        match self.regions.get(id) {
            Some(region) => region.clone(),
            None => MemoryRegion::new(id.clone(), self.ownership),
        }
    }

    /// All regions that have been written to, ordered by id.
    pub fn regions(&self) -> Vec<&MemoryRegion> {
        let mut result: Vec<&MemoryRegion> = self.regions.values().collect();
        result.sort_by(|r1, r2| r1.id().cmp(r2.id()));
        result
    }

    pub fn read(&self, id: &RegionId, key: &LocationKey) -> Arc<SymbolicValue> {
        match self.regions.get(id) {
            Some(region) => region.read(key),
            None => MemoryRegion::new(id.clone(), self.ownership).read(key),
        }
    }

    pub fn write(
        &mut self,
        id: &RegionId,
        key: &LocationKey,
        value: Arc<SymbolicValue>,
        guard: &Arc<SymbolicValue>,
    ) {
        self.update_region(id, |region| region.write_mut(key, value, guard));
    }

    /// Copies `[source_from, source_from + destination_to - destination_from)` of the array at
    /// source_address onto `[destination_from, destination_to)` of the array at
    /// destination_address. Both arrays live in the region id.
    #[allow(clippy::too_many_arguments)]
    #[logfn_inputs(TRACE)]
    pub fn copy_range(
        &mut self,
        id: &RegionId,
        source_address: Arc<SymbolicValue>,
        source_from: Arc<SymbolicValue>,
        destination_address: Arc<SymbolicValue>,
        destination_from: Arc<SymbolicValue>,
        destination_to: Arc<SymbolicValue>,
        guard: &Arc<SymbolicValue>,
    ) -> Result<()> {
        let source = self.region_for(id);
        self.update_region(id, |region| {
            region.copy_range_mut(
                &source,
                source_address,
                source_from,
                destination_address,
                destination_from,
                destination_to,
                guard,
            )
        })
    }

    /// Overlays the entries of the map at source_address onto the map at destination_address
    /// within region id, using contains_id for the membership of the source map.
    #[logfn_inputs(TRACE)]
    pub fn merge_map_region(
        &mut self,
        id: &RegionId,
        contains_id: &RegionId,
        source_address: Arc<SymbolicValue>,
        destination_address: Arc<SymbolicValue>,
        guard: &Arc<SymbolicValue>,
    ) -> Result<()> {
        let source = self.region_for(id);
        let source_contains = self.region_for(contains_id);
        self.update_region(id, |region| {
            region.merge_from_mut(
                &source,
                &source_contains,
                source_address,
                destination_address,
                guard,
            )
        })
    }

    // Updates the region for id in place if this memory owns it and in place updates are
    // enabled. Otherwise the update happens on a copy that is re-tagged with this memory's token.
    fn update_region<T, F>(&mut self, id: &RegionId, update: F) -> T
    where
        F: FnOnce(&mut MemoryRegion) -> T,
    {
        let mut region = self.region_for(id);
        if self.in_place_updates && region.ownership() == self.ownership {
            self.regions.remove_mut(id);
        } else {
            region.set_ownership(self.ownership);
        }
        let result = update(&mut region);
        self.regions.insert_mut(id.clone(), region);
        result
    }

    /// Merges two memories under guard. The result behaves like self where guard holds and like
    /// other elsewhere.
    #[logfn_inputs(TRACE)]
    pub fn merge(
        &self,
        other: &Memory,
        guard: &Arc<SymbolicValue>,
        ownership: Ownership,
    ) -> std::result::Result<Memory, MergeFailure> {
        if self.next_address != other.next_address {
            return Err(MergeFailure::AllocationCounter);
        }
        if self.allocated_types != other.allocated_types {
            return Err(MergeFailure::AllocatedTypes);
        }
        if self.frames.len() != other.frames.len() {
            return Err(MergeFailure::Frames);
        }
        let mut frames = VectorSync::new_sync();
        for (left, right) in self.frames.iter().zip(other.frames.iter()) {
            frames.push_back_mut(left.merge(right, guard)?);
        }
        let mut regions = HashTrieMapSync::new_sync();
        for (id, left) in self.regions.iter() {
            let merged = match other.regions.get(id) {
                Some(right) => left.merge(right, guard, ownership),
                None => left.merge(&MemoryRegion::new(id.clone(), ownership), guard, ownership),
            };
            regions.insert_mut(id.clone(), merged);
        }
        for (id, right) in other.regions.iter() {
            if !self.regions.contains_key(id) {
                let merged =
                    MemoryRegion::new(id.clone(), ownership).merge(right, guard, ownership);
                regions.insert_mut(id.clone(), merged);
            }
        }
        Ok(Memory {
            frames,
            regions,
            allocated_types: self.allocated_types.clone(),
            next_address: self.next_address,
            ownership,
            in_place_updates: self.in_place_updates && other.in_place_updates,
        })
    }
}
