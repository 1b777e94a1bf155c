// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

use crate::region::MemoryRegion;
use crate::symbolic_value::{SymbolicValue, SymbolicValueTrait};

use log_derive::logfn_inputs;
use mirai_annotations::*;
use std::fmt::{Debug, Formatter, Result};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// The key of a memory location within a region: an object address plus, for regions that
/// are not field-like, an index or map key.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct LocationKey {
    pub address: Arc<SymbolicValue>,
    pub secondary: Option<Arc<SymbolicValue>>,
}

impl LocationKey {
    pub fn new(address: Arc<SymbolicValue>, secondary: Option<Arc<SymbolicValue>>) -> LocationKey {
        precondition!(address.get_type().is_reference());
        LocationKey { address, secondary }
    }

    /// The key of a field-like location.
    pub fn field(address: Arc<SymbolicValue>) -> LocationKey {
        LocationKey::new(address, None)
    }

    /// The key of an element or map entry.
    pub fn element(address: Arc<SymbolicValue>, secondary: Arc<SymbolicValue>) -> LocationKey {
        LocationKey::new(address, Some(secondary))
    }

    pub fn with_address(&self, address: Arc<SymbolicValue>) -> LocationKey {
        LocationKey {
            address,
            secondary: self.secondary.clone(),
        }
    }

    /// The address followed by the secondary key, if any.
    pub fn components(&self) -> Vec<Arc<SymbolicValue>> {
        let mut result = vec![self.address.clone()];
        if let Some(secondary) = &self.secondary {
            result.push(secondary.clone());
        }
        result
    }

    /// A Boolean value that is true iff both keys denote the same location.
    pub fn equals(&self, other: &LocationKey) -> Arc<SymbolicValue> {
        let address_equal = self.address.equals(other.address.clone());
        match (&self.secondary, &other.secondary) {
            (Some(s1), Some(s2)) => address_equal.and(s1.equals(s2.clone())),
            _ => address_equal,
        }
    }
}

/// Describes how the keys of a ranged update map onto the keys of its source region.
#[derive(Clone, Debug)]
pub enum RangedAdapter {
    /// Elements `[destination_from, destination_to)` of the destination array become the
    /// elements of the source array starting at `source_from`.
    ArrayCopy {
        source_address: Arc<SymbolicValue>,
        source_from: Arc<SymbolicValue>,
        destination_address: Arc<SymbolicValue>,
        destination_from: Arc<SymbolicValue>,
        destination_to: Arc<SymbolicValue>,
    },
    /// Every key that is a member of the source map becomes a key of the destination map with
    /// the source value. `source_contains` is the membership region at the time of the merge.
    MapMerge {
        source_address: Arc<SymbolicValue>,
        destination_address: Arc<SymbolicValue>,
        source_contains: Arc<MemoryRegion>,
    },
}

impl RangedAdapter {
    /// The address of the object the update writes to.
    pub fn destination_address(&self) -> &Arc<SymbolicValue> {
        match self {
            RangedAdapter::ArrayCopy {
                destination_address,
                ..
            }
            | RangedAdapter::MapMerge {
                destination_address,
                ..
            } => destination_address,
        }
    }

    /// Maps a destination key onto the source key it is copied from.
    pub fn convert(&self, key: &LocationKey) -> LocationKey {
        match self {
            RangedAdapter::ArrayCopy {
                source_address,
                source_from,
                destination_from,
                ..
            } => {
                let secondary = key
                    .secondary
                    .as_ref()
                    .map(|index| {
                        index
                            .subtract(destination_from.clone())
                            .addition(source_from.clone())
                    });
                LocationKey::new(source_address.clone(), secondary)
            }
            RangedAdapter::MapMerge { source_address, .. } => {
                LocationKey::new(source_address.clone(), key.secondary.clone())
            }
        }
    }

    /// A Boolean value that is true iff the update covers key, ignoring the update guard.
    pub fn includes(&self, key: &LocationKey) -> Arc<SymbolicValue> {
        match self {
            RangedAdapter::ArrayCopy {
                destination_address,
                destination_from,
                destination_to,
                ..
            } => {
                let same_object = destination_address.equals(key.address.clone());
                match &key.secondary {
                    Some(index) => same_object
                        .and(destination_from.less_or_equal(index.clone()))
                        .and(index.less_than(destination_to.clone())),
                    None => assume_unreachable!("array copies need element keys"),
                }
            }
            RangedAdapter::MapMerge {
                destination_address,
                source_contains,
                ..
            } => {
                let same_object = destination_address.equals(key.address.clone());
                if same_object.as_bool_if_known() == Some(false) {
                    return same_object;
                }
                same_object.and(source_contains.read(&self.convert(key)))
            }
        }
    }
}

/// An update that covers many locations at once with a single log entry.
#[derive(Clone)]
pub struct RangedUpdate {
    /// A snapshot of the region the values are copied from.
    pub source: Arc<MemoryRegion>,
    pub adapter: RangedAdapter,
    pub guard: Arc<SymbolicValue>,
}

impl Debug for RangedUpdate {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        write!(f, "ranged({:?} if {:?})", self.adapter, self.guard)
    }
}

/// One entry of an update log.
#[derive(Clone, Debug)]
pub enum UpdateNode {
    Pinpoint {
        key: LocationKey,
        value: Arc<SymbolicValue>,
        guard: Arc<SymbolicValue>,
    },
    Ranged(RangedUpdate),
}

impl UpdateNode {
    pub fn guard(&self) -> &Arc<SymbolicValue> {
        match self {
            UpdateNode::Pinpoint { guard, .. } => guard,
            UpdateNode::Ranged(update) => &update.guard,
        }
    }

    /// A Boolean value that is true iff this entry is the one that determines the value at key,
    /// provided no newer entry does.
    pub fn includes(&self, key: &LocationKey) -> Arc<SymbolicValue> {
        match self {
            UpdateNode::Pinpoint {
                key: entry_key,
                guard,
                ..
            } => entry_key.equals(key).and(guard.clone()),
            UpdateNode::Ranged(update) => {
                let guard = &update.guard;
                if guard.as_bool_if_known() == Some(false) {
                    return guard.clone();
                }
                update.adapter.includes(key).and(guard.clone())
            }
        }
    }

    /// The value this entry provides for key, assuming it includes key.
    pub fn value_at(&self, key: &LocationKey) -> Arc<SymbolicValue> {
        match self {
            UpdateNode::Pinpoint { value, .. } => value.clone(),
            UpdateNode::Ranged(update) => update.source.read(&update.adapter.convert(key)),
        }
    }

    /// Returns a copy of this entry that only applies when condition is also true.
    pub fn with_guard(&self, condition: &Arc<SymbolicValue>) -> UpdateNode {
        match self {
            UpdateNode::Pinpoint { key, value, guard } => UpdateNode::Pinpoint {
                key: key.clone(),
                value: value.clone(),
                guard: guard.and(condition.clone()),
            },
            UpdateNode::Ranged(update) => UpdateNode::Ranged(RangedUpdate {
                source: update.source.clone(),
                adapter: update.adapter.clone(),
                guard: update.guard.and(condition.clone()),
            }),
        }
    }
}

/// A node of the persistent cons list that backs an update log.
pub struct LogNode {
    pub update: UpdateNode,
    previous: Option<Arc<LogNode>>,
    length: usize,
}

impl LogNode {
    pub fn previous(&self) -> Option<&Arc<LogNode>> {
        self.previous.as_ref()
    }
}

impl Drop for LogNode {
    // Unlinks uniquely owned predecessors one at a time, so that dropping a long log does not
    // recurse once per node.
    fn drop(&mut self) {
        let mut previous = self.previous.take();
        while let Some(node) = previous {
            match Arc::try_unwrap(node) {
                Ok(mut node) => previous = node.previous.take(),
                Err(_) => break,
            }
        }
    }
}

/// A persistent, newest-first list of updates. A version of the log is a reference to its
/// newest node; pushing an entry never disturbs other versions.
#[derive(Clone, Default)]
pub struct UpdateLog {
    head: Option<Arc<LogNode>>,
}

impl Debug for UpdateLog {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        f.debug_list()
            .entries(self.iter().map(|node| &node.update))
            .finish()
    }
}

/// Two logs are equal if they are the same version.
impl PartialEq for UpdateLog {
    fn eq(&self, other: &Self) -> bool {
        self.same_version(other)
    }
}

impl Eq for UpdateLog {}

impl Hash for UpdateLog {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.head_ptr().hash(state);
    }
}

/// Iterates over the nodes of a log, newest first.
pub struct LogIter<'a> {
    next: Option<&'a Arc<LogNode>>,
}

impl<'a> Iterator for LogIter<'a> {
    type Item = &'a Arc<LogNode>;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.next?;
        self.next = node.previous.as_ref();
        Some(node)
    }
}

impl UpdateLog {
    pub fn new() -> UpdateLog {
        UpdateLog::default()
    }

    pub fn len(&self) -> usize {
        self.head.as_ref().map_or(0, |node| node.length)
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    pub fn head(&self) -> Option<&Arc<LogNode>> {
        self.head.as_ref()
    }

    /// The identity of the newest node, or null for the empty log.
    pub fn head_ptr(&self) -> *const LogNode {
        self.head
            .as_ref()
            .map_or(std::ptr::null(), |node| Arc::as_ptr(node))
    }

    pub fn same_version(&self, other: &UpdateLog) -> bool {
        match (&self.head, &other.head) {
            (None, None) => true,
            (Some(n1), Some(n2)) => Arc::ptr_eq(n1, n2),
            _ => false,
        }
    }

    pub fn iter(&self) -> LogIter<'_> {
        LogIter {
            next: self.head.as_ref(),
        }
    }

    /// Returns a new version of the log with update as its newest entry.
    pub fn push(&self, update: UpdateNode) -> UpdateLog {
        let mut result = self.clone();
        result.push_mut(update);
        result
    }

    pub fn push_mut(&mut self, update: UpdateNode) {
        let length = self.len() + 1;
        self.head = Some(Arc::new(LogNode {
            update,
            previous: self.head.take(),
            length,
        }));
    }

    /// Folds the log from newest to oldest to obtain the value at key. base supplies the value
    /// that is there when no entry applies.
    pub fn read<F>(&self, key: &LocationKey, base: F) -> Arc<SymbolicValue>
    where
        F: FnOnce() -> Arc<SymbolicValue>,
    {
        let mut pending: Vec<(Arc<SymbolicValue>, Arc<SymbolicValue>)> = Vec::new();
        let mut shadowing_value = None;
        for node in self.iter() {
            let includes = node.update.includes(key);
            match includes.as_bool_if_known() {
                Some(false) => continue,
                Some(true) => {
                    shadowing_value = Some(node.update.value_at(key));
                    break;
                }
                None => pending.push((includes, node.update.value_at(key))),
            }
        }
        let mut value = shadowing_value.unwrap_or_else(base);
        for (includes, entry_value) in pending.into_iter().rev() {
            value = includes.conditional_expression(entry_value, value);
        }
        value
    }

    /// Merges two versions of a log under a guard. Entries after the newest common node are
    /// re-guarded: left-only entries with `guard`, right-only entries with `not guard`.
    /// The right-only entries are placed first; the two sets are disjoint under the guards,
    /// so their relative order does not matter.
    #[logfn_inputs(TRACE)]
    pub fn merge(left: &UpdateLog, right: &UpdateLog, guard: &Arc<SymbolicValue>) -> UpdateLog {
        if left.same_version(right) {
            return left.clone();
        }
        let (left_suffix, right_suffix, common) = Self::split_at_common_ancestor(left, right);
        let mut result = UpdateLog { head: common };
        let not_guard = guard.logical_not();
        for node in right_suffix.into_iter().rev() {
            result.push_mut(node.update.with_guard(&not_guard));
        }
        for node in left_suffix.into_iter().rev() {
            result.push_mut(node.update.with_guard(guard));
        }
        result
    }

    /// Returns the nodes that are only in left, the nodes that are only in right (both newest
    /// first), and the newest node the two logs share.
    #[allow(clippy::type_complexity)]
    fn split_at_common_ancestor<'a>(
        left: &'a UpdateLog,
        right: &'a UpdateLog,
    ) -> (
        Vec<&'a Arc<LogNode>>,
        Vec<&'a Arc<LogNode>>,
        Option<Arc<LogNode>>,
    ) {
        let mut left_suffix = Vec::new();
        let mut right_suffix = Vec::new();
        let mut l = left.head.as_ref();
        let mut r = right.head.as_ref();
        loop {
            match (l, r) {
                (Some(ln), Some(rn)) if Arc::ptr_eq(ln, rn) => {
                    return (left_suffix, right_suffix, Some(ln.clone()));
                }
                (Some(ln), Some(rn)) => {
                    if ln.length >= rn.length {
                        left_suffix.push(ln);
                        l = ln.previous.as_ref();
                    }
                    if rn.length >= ln.length {
                        right_suffix.push(rn);
                        r = rn.previous.as_ref();
                    }
                }
                (Some(ln), None) => {
                    left_suffix.push(ln);
                    l = ln.previous.as_ref();
                }
                (None, Some(rn)) => {
                    right_suffix.push(rn);
                    r = rn.previous.as_ref();
                }
                (None, None) => return (left_suffix, right_suffix, None),
            }
        }
    }
}
