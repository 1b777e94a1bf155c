// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

mod common;

use common::*;
use symmem::address::{split_heap_reference, HeapAddress};
use symmem::constant_domain::ConstantDomain;
use symmem::error::Error;
use symmem::expression::{Expression, ExpressionType};
use symmem::memory::Memory;
use symmem::model::ConcreteModel;
use symmem::options::Options;
use symmem::ownership::Ownership;
use symmem::region::MemoryRegion;
use symmem::region_id::RegionId;
use symmem::symbolic_value::{SymbolicValue, SymbolicValueTrait, NULL, TRUE};
use symmem::update_log::{LocationKey, UpdateLog, UpdateNode};


fn field() -> RegionId {
    RegionId::field("Point.x", ExpressionType::I32)
}

#[test]
fn allocation_is_dense() {
    init();
    let mut memory = Memory::new(&Options::default());
    let a = memory.allocate("Point");
    let b = memory.allocate("Line");
    assert_eq!(a.as_constant(), Some(&ConstantDomain::HeapAddress(1)));
    assert_eq!(b.as_constant(), Some(&ConstantDomain::HeapAddress(2)));
    assert_eq!(memory.next_address(), 3);
    assert_eq!(memory.type_of(2).map(|t| t.to_string()), Some("Line".to_string()));
    assert!(a.equals(b).as_bool_if_known() == Some(false));
}

#[test]
fn unwritten_locations() {
    init();
    let mut memory = Memory::new(&Options::default());
    let point = memory.allocate("Point");
    assert_eq!(memory.read(&field(), &LocationKey::field(point)), int(0));
    assert_eq!(memory.read(&field(), &LocationKey::field(NULL.clone())), int(0));
    let input = memory.read(&field(), &LocationKey::field(input_ref("p")));
    assert!(matches!(input.expression, Expression::InputRead { .. }));
    assert!(memory.regions().is_empty());
}

#[test]
fn allocated_objects_never_alias_inputs() {
    init();
    let mut memory = Memory::new(&Options::default());
    let point = memory.allocate("Point");
    let p = input_ref("p");
    memory.write(&field(), &LocationKey::field(point.clone()), int(1), &TRUE);
    memory.write(&field(), &LocationKey::field(p.clone()), int(2), &TRUE);
    assert_eq!(memory.read(&field(), &LocationKey::field(point)), int(1));
    assert_eq!(memory.read(&field(), &LocationKey::field(p)), int(2));
}

#[test]
fn symbolic_writes_may_alias() {
    init();
    let mut memory = Memory::new(&Options::default());
    let (p, q) = (input_ref("p"), input_ref("q"));
    memory.write(&field(), &LocationKey::field(p.clone()), int(1), &TRUE);
    memory.write(&field(), &LocationKey::field(q.clone()), int(2), &TRUE);
    let value = memory.read(&field(), &LocationKey::field(p));
    let same = ConcreteModel::new()
        .with("p", ConstantDomain::InputAddress(1))
        .with("q", ConstantDomain::InputAddress(1));
    let different = ConcreteModel::new()
        .with("p", ConstantDomain::InputAddress(1))
        .with("q", ConstantDomain::InputAddress(2));
    assert_eq!(eval_int(&same, &value), 2);
    assert_eq!(eval_int(&different, &value), 1);
}

#[test]
fn writes_through_conditional_references() {
    init();
    let mut memory = Memory::new(&Options::default());
    let a = memory.allocate("Point");
    let b = memory.allocate("Point");
    let flag = bool_var("flag");
    let either = flag.conditional_expression(a.clone(), b.clone());
    memory.write(&field(), &LocationKey::field(a.clone()), int(1), &TRUE);
    memory.write(&field(), &LocationKey::field(b.clone()), int(2), &TRUE);
    memory.write(&field(), &LocationKey::field(either.clone()), int(3), &TRUE);

    let leaves = split_heap_reference(&either, &TRUE);
    assert_eq!(leaves.len(), 2);
    assert_eq!(leaves[0].address, HeapAddress::Concrete(1));
    assert_eq!(leaves[1].address, HeapAddress::Concrete(2));

    let read_a = memory.read(&field(), &LocationKey::field(a));
    let read_either = memory.read(&field(), &LocationKey::field(either));
    for value in [false, true] {
        let model = ConcreteModel::new().with("flag", value.into());
        assert_eq!(eval_int(&model, &read_a), if value { 3 } else { 1 });
        assert_eq!(eval_int(&model, &read_either), 3);
    }
}

#[test]
fn writes_through_null_are_ignored() {
    init();
    let mut memory = Memory::new(&Options::default());
    let point = memory.allocate("Point");
    let flag = bool_var("flag");
    let maybe_null = flag.conditional_expression(point.clone(), NULL.clone());
    memory.write(&field(), &LocationKey::field(maybe_null), int(5), &TRUE);
    memory.write(&field(), &LocationKey::field(NULL.clone()), int(6), &TRUE);
    let value = memory.read(&field(), &LocationKey::field(point));
    assert_eq!(value, flag.conditional_expression(int(5), int(0)));
    let region = memory.region(&field()).unwrap();
    assert!(region.input_updates().is_none());
    assert_eq!(region.allocated_addresses(), vec![1]);
}

#[test]
fn writes_under_false_guard_are_dropped() {
    init();
    let mut memory = Memory::new(&Options::default());
    let point = memory.allocate("Point");
    memory.write(&field(), &LocationKey::field(point.clone()), int(1), &TRUE);
    memory.write(
        &field(),
        &LocationKey::field(point.clone()),
        int(2),
        &SymbolicValue::make_bool(false),
    );
    let region = memory.region(&field()).unwrap();
    assert!(region.allocated_object(1).unwrap().updates().is_none());
    assert_eq!(memory.read(&field(), &LocationKey::field(point)), int(1));
}

#[test]
fn guarded_write_to_allocated_object() {
    init();
    let mut memory = Memory::new(&Options::default());
    let point = memory.allocate("Point");
    let key = LocationKey::field(point.clone());
    let flag = bool_var("flag");
    memory.write(&field(), &key, int(1), &TRUE);
    memory.write(&field(), &key, int(2), &flag);
    assert_eq!(
        memory.read(&field(), &key),
        flag.conditional_expression(int(2), int(1))
    );
    let object = memory.region(&field()).unwrap().allocated_object(1).unwrap();
    assert_eq!(object.updates().map(|log| log.len()), Some(1));
    // Once an object has a log, concrete writes go there too.
    memory.write(&field(), &key, int(3), &TRUE);
    let object = memory.region(&field()).unwrap().allocated_object(1).unwrap();
    assert_eq!(object.updates().map(|log| log.len()), Some(2));
    assert_eq!(memory.read(&field(), &key), int(3));
}

#[test]
fn array_elements_with_concrete_and_symbolic_indices() {
    init();
    let region = RegionId::array_element("int[]", ExpressionType::I32);
    let mut memory = Memory::new(&Options::default());
    let array = memory.allocate("int[]");
    for i in 0..3 {
        memory.write(&region, &LocationKey::element(array.clone(), int(i)), int(10 * i), &TRUE);
    }
    let i = int_var("i");
    let value = memory.read(&region, &LocationKey::element(array.clone(), i.clone()));
    for index in 0..5 {
        let model = ConcreteModel::new().with("i", ConstantDomain::I32(index));
        let expected = if index < 3 { 10 * index as i64 } else { 0 };
        assert_eq!(eval_int(&model, &value), expected);
    }
    memory.write(&region, &LocationKey::element(array.clone(), i.clone()), int(99), &TRUE);
    let at_one = memory.read(&region, &LocationKey::element(array, int(1)));
    let model = ConcreteModel::new().with("i", ConstantDomain::I32(1));
    assert_eq!(eval_int(&model, &at_one), 99);
    let model = ConcreteModel::new().with("i", ConstantDomain::I32(2));
    assert_eq!(eval_int(&model, &at_one), 10);
}

#[test]
fn copy_on_write_after_clone() {
    init();
    let mut memory = Memory::new(&Options::default());
    let point = memory.allocate("Point");
    let key = LocationKey::field(point);
    memory.write(&field(), &key, int(1), &TRUE);
    let snapshot = memory.clone_with_new_ownership();
    assert_ne!(snapshot.ownership(), memory.ownership());
    memory.write(&field(), &key, int(2), &TRUE);
    assert_eq!(memory.read(&field(), &key), int(2));
    assert_eq!(snapshot.read(&field(), &key), int(1));
    assert_eq!(memory.region(&field()).unwrap().ownership(), memory.ownership());
}

#[test]
fn in_place_updates_can_be_disabled() {
    init();
    let mut options = Options::default();
    options.in_place_updates = false;
    let mut memory = Memory::new(&options);
    let point = memory.allocate("Point");
    let key = LocationKey::field(point);
    memory.write(&field(), &key, int(1), &TRUE);
    let copy = memory.clone();
    memory.write(&field(), &key, int(2), &TRUE);
    assert_eq!(copy.read(&field(), &key), int(1));
    assert_eq!(memory.read(&field(), &key), int(2));
}

#[test]
fn region_versions_are_persistent() {
    init();
    let region = MemoryRegion::new(field(), Ownership::new());
    let p = input_ref("p");
    let key = LocationKey::field(p);
    let first = region.write(&key, int(1), &TRUE);
    let second = first.write(&key, int(2), &TRUE);
    assert_eq!(first.read(&key), int(1));
    assert_eq!(second.read(&key), int(2));
    assert!(region.input_updates().is_none());
    assert_eq!(second.input_updates().map(|log| log.len()), Some(2));
}

#[test]
fn ranged_updates_need_array_or_map_regions() {
    init();
    let mut memory = Memory::new(&Options::default());
    let p = input_ref("p");
    let result = memory.copy_range(
        &field(),
        p.clone(),
        int(0),
        p.clone(),
        int(1),
        int(2),
        &TRUE,
    );
    assert!(matches!(result, Err(Error::UnsupportedRangedUpdate(..))));
    assert!(!result.unwrap_err().is_recoverable());
    let length = RegionId::map_length("java.util.Map");
    let result = memory.merge_map_region(&length, &length, p.clone(), p, &TRUE);
    assert!(result.is_err());
}

#[test]
fn log_merge_shares_common_prefix() {
    init();
    let p = input_ref("p");
    let key = LocationKey::field(p);
    let write = |value: i32| UpdateNode::Pinpoint {
        key: key.clone(),
        value: int(value),
        guard: TRUE.clone(),
    };
    let common = UpdateLog::new().push(write(1));
    let left = common.push(write(2));
    let right = common.push(write(3)).push(write(4));
    let g = bool_var("g");
    let merged = UpdateLog::merge(&left, &right, &g);
    assert_eq!(merged.len(), 4);
    let value = merged.read(&key, || int(0));
    for flag in [false, true] {
        let model = ConcreteModel::new().with("g", flag.into());
        assert_eq!(eval_int(&model, &value), if flag { 2 } else { 4 });
    }
    assert!(UpdateLog::merge(&left, &left, &g).same_version(&left));
}

#[test]
fn memory_merge() {
    init();
    let mut base = Memory::new(&Options::default());
    let point = base.allocate("Point");
    let key = LocationKey::field(point.clone());
    base.write(&field(), &key, int(1), &TRUE);
    let mut left = base.clone_with_new_ownership();
    let mut right = base.clone_with_new_ownership();
    left.write(&field(), &key, int(2), &TRUE);
    let p = input_ref("p");
    right.write(&field(), &LocationKey::field(p.clone()), int(3), &TRUE);
    let g = bool_var("g");
    let merged = left.merge(&right, &g, Ownership::new()).unwrap();
    assert_eq!(
        merged.read(&field(), &key),
        g.conditional_expression(int(2), int(1))
    );
    let at_p = merged.read(&field(), &LocationKey::field(p));
    let model = ConcreteModel::new()
        .with("g", ConstantDomain::False)
        .with("p", ConstantDomain::InputAddress(1));
    assert_eq!(eval_int(&model, &at_p), 3);

    let elements = RegionId::array_element("int[]", ExpressionType::I32);
    let mut other = base.clone_with_new_ownership();
    other.write(&elements, &LocationKey::element(point.clone(), int(0)), int(5), &TRUE);
    let mut another = base.clone_with_new_ownership();
    another.write(&elements, &LocationKey::element(point.clone(), int(1)), int(6), &TRUE);
    let joined = other.merge(&another, &g, Ownership::new()).unwrap();
    assert_eq!(
        joined.read(&elements, &LocationKey::element(point.clone(), int(0))),
        g.conditional_expression(int(5), int(0))
    );
    assert_eq!(
        joined.read(&elements, &LocationKey::element(point.clone(), int(1))),
        g.conditional_expression(int(0), int(6))
    );
    let i = int_var("i");
    let at_i = joined.read(&elements, &LocationKey::element(point, i));
    for (flag, index, expected) in [(true, 0, 5), (true, 1, 0), (false, 0, 0), (false, 1, 6)] {
        let model = ConcreteModel::new()
            .with("g", flag.into())
            .with("i", ConstantDomain::I32(index));
        assert_eq!(eval_int(&model, &at_i), expected);
    }
}

#[test]
fn merge_of_write_on_one_branch_only() {
    init();
    let mut base = Memory::new(&Options::default());
    let point = base.allocate("Point");
    let key = LocationKey::field(point);
    let mut left = base.clone_with_new_ownership();
    left.write(&field(), &key, int(5), &TRUE);
    let right = base.clone_with_new_ownership();
    let g = bool_var("g");
    let merged = left.merge(&right, &g, Ownership::new()).unwrap();
    assert_eq!(
        merged.read(&field(), &key),
        g.conditional_expression(int(5), int(0))
    );
    let reversed = right.merge(&left, &g, Ownership::new()).unwrap();
    assert_eq!(
        reversed.read(&field(), &key),
        g.conditional_expression(int(0), int(5))
    );
}
