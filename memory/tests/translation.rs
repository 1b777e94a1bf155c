// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

mod common;

use common::*;
use symmem::collections::SymbolicMapDescriptor;
use symmem::constant_domain::ConstantDomain;
use symmem::expression::ExpressionType;
use symmem::memory::Memory;
use symmem::model::{ConcreteModel, DecodedMemory};
use symmem::options::Options;
use symmem::region_id::RegionId;
use symmem::smt_solver::SmtModel;
use symmem::symbolic_value::{SymbolicValue, SymbolicValueTrait, TRUE};
use symmem::translator::TranslationSession;
use symmem::update_log::LocationKey;

use std::sync::Arc;

fn int_array() -> RegionId {
    RegionId::array_element("int[]", ExpressionType::I32)
}

fn reference_domains<'a>(names: &[&'a str], count: u32) -> Vec<(&'a str, Vec<ConstantDomain>)> {
    names
        .iter()
        .map(|n| {
            let mut candidates = vec![ConstantDomain::Null];
            candidates.extend(input_addresses(count));
            (*n, candidates)
        })
        .collect()
}

fn forced_guards(mut models: Vec<ConcreteModel>, guards: &[&str]) -> Vec<ConcreteModel> {
    for model in models.iter_mut() {
        for g in guards {
            model.assign(g, ConstantDomain::True);
        }
    }
    models
}

// Writes 1, 2, 3 through three references under three guards, then reads through a fourth.
// If the fourth aliases one of the others and every guard holds, the read is one of the
// written values.
fn guarded_writes_cannot_be_missed(region: RegionId, key: impl Fn(&Arc<SymbolicValue>) -> LocationKey) {
    let mut memory = Memory::new(&Options::default());
    let refs: Vec<Arc<SymbolicValue>> = (0..4).map(|i| input_ref(&format!("ref{}", i))).collect();
    let guards: Vec<Arc<SymbolicValue>> = (1..4).map(|i| bool_var(&format!("g{}", i))).collect();
    for i in 1..4 {
        memory.write(&region, &key(&refs[i]), int(i as i32), &guards[i - 1]);
    }
    let reading = memory.read(&region, &key(&refs[0]));
    let translated_reading = TranslationSession::default()
        .translate_read(&memory.region_for(&region), &key(&refs[0]))
        .unwrap();

    let aliases = refs[0]
        .equals(refs[1].clone())
        .or(refs[0].equals(refs[2].clone()))
        .or(refs[0].equals(refs[3].clone()));
    let all_guards = guards[0].and(guards[1].clone()).and(guards[2].clone());
    let missed = |value: &Arc<SymbolicValue>| {
        let not_written = (1..4).fold(TRUE.clone(), |acc, i| acc.and(value.not_equals(int(i))));
        aliases.and(not_written).and(all_guards.clone())
    };
    let folded = TranslationSession::default().translate(&missed(&reading)).unwrap();
    let translated = TranslationSession::default()
        .translate(&missed(&translated_reading))
        .unwrap();

    let models = forced_guards(
        enumerate_models(&reference_domains(&["ref0", "ref1", "ref2", "ref3"], 3)),
        &["g1", "g2", "g3"],
    );
    let mut defaults = 0;
    for model in &models {
        assert_eq!(model.evaluate(&folded), Some(ConstantDomain::False));
        assert_eq!(model.evaluate(&translated), Some(ConstantDomain::False));
        if eval(model, &reading) == Some(ConstantDomain::I32(0)) {
            defaults += 1;
        }
    }
    // The read is not always one of the written values.
    assert!(defaults > 0);
}

#[test]
fn guarded_field_writes() {
    init();
    let region = RegionId::field("Node.value", ExpressionType::I32);
    guarded_writes_cannot_be_missed(region, |r| LocationKey::field(r.clone()));
}

#[test]
fn guarded_array_length_writes() {
    init();
    let region = RegionId::array_length("int[]");
    guarded_writes_cannot_be_missed(region, |r| LocationKey::field(r.clone()));
}

#[test]
fn guarded_element_writes() {
    init();
    let index = int(2);
    guarded_writes_cannot_be_missed(int_array(), |r| LocationKey::element(r.clone(), index.clone()));
}

fn copy_models(region: &RegionId) -> Vec<ConcreteModel> {
    let domains = vec![
        ("ref1", input_addresses(2)),
        ("ref2", input_addresses(2)),
        ("idx1", ints(0..3)),
        ("idx2", ints(0..3)),
        ("idx", ints(-1..7)),
    ];
    let mut models = enumerate_models(&domains);
    for model in models.iter_mut() {
        model.assign_array_entry(
            &region.base_array_name(),
            vec![ConstantDomain::InputAddress(1), ConstantDomain::I32(3)],
            ConstantDomain::I32(42),
        );
    }
    models
}

#[test]
fn input_to_allocated_array_copy() {
    init();
    let region = int_array();
    let mut memory = Memory::new(&Options::default());
    let (ref1, ref2) = (input_ref("ref1"), input_ref("ref2"));
    let (idx1, idx2, idx) = (int_var("idx1"), int_var("idx2"), int_var("idx"));
    memory.write(&region, &LocationKey::element(ref1.clone(), idx1), int(1), &TRUE);
    memory.write(&region, &LocationKey::element(ref2, idx2), int(2), &TRUE);
    let source_reading = memory.read(&region, &LocationKey::element(ref1.clone(), idx.clone()));

    let destination = memory.allocate("int[]");
    memory
        .copy_range(&region, ref1, int(0), destination.clone(), int(0), int(5), &TRUE)
        .unwrap();
    let key = LocationKey::element(destination, idx.clone());
    let reading = memory.read(&region, &key);
    let in_range = int(0).less_or_equal(idx.clone()).and(idx.less_than(int(5)));
    let expected = in_range.conditional_expression(source_reading, int(0));

    let expected = TranslationSession::default().translate(&expected).unwrap();
    let folded = TranslationSession::default().translate(&reading).unwrap();
    let unrolled = TranslationSession::default()
        .translate_read(&memory.region_for(&region), &key)
        .unwrap();
    let with_lambda = TranslationSession::with_unroll_limit(2)
        .translate_read(&memory.region_for(&region), &key)
        .unwrap();
    for model in &copy_models(&region) {
        let value = model.evaluate(&expected);
        assert!(value.is_some());
        assert_eq!(model.evaluate(&folded), value);
        assert_eq!(model.evaluate(&unrolled), value);
        assert_eq!(model.evaluate(&with_lambda), value);
    }
}

#[test]
fn input_to_input_array_copy() {
    init();
    let region = int_array();
    let mut memory = Memory::new(&Options::default());
    let (ref1, ref2, ref3) = (input_ref("ref1"), input_ref("ref2"), input_ref("ref3"));
    let (idx1, idx) = (int_var("idx1"), int_var("idx"));
    memory.write(&region, &LocationKey::element(ref1.clone(), idx1), int(1), &TRUE);
    let before = memory.clone_with_new_ownership();

    memory
        .copy_range(&region, ref1.clone(), int(1), ref2.clone(), int(0), int(5), &TRUE)
        .unwrap();
    let key = LocationKey::element(ref3.clone(), idx.clone());
    let reading = memory.read(&region, &key);

    let in_range = ref3
        .equals(ref2)
        .and(int(0).less_or_equal(idx.clone()))
        .and(idx.less_than(int(5)));
    let copied = before.read(
        &region,
        &LocationKey::element(ref1, idx.addition(int(1))),
    );
    let unchanged = before.read(&region, &key);
    let expected = in_range.conditional_expression(copied, unchanged);

    let expected = TranslationSession::default().translate(&expected).unwrap();
    let folded = TranslationSession::default().translate(&reading).unwrap();
    let unrolled = TranslationSession::default()
        .translate_read(&memory.region_for(&region), &key)
        .unwrap();
    let with_lambda = TranslationSession::with_unroll_limit(2)
        .translate_read(&memory.region_for(&region), &key)
        .unwrap();

    let domains = vec![
        ("ref1", input_addresses(3)),
        ("ref2", input_addresses(3)),
        ("ref3", input_addresses(3)),
        ("idx1", ints(0..3)),
        ("idx", ints(-1..7)),
    ];
    for model in &enumerate_models(&domains) {
        let value = model.evaluate(&expected);
        assert!(value.is_some());
        assert_eq!(model.evaluate(&folded), value);
        assert_eq!(model.evaluate(&unrolled), value);
        assert_eq!(model.evaluate(&with_lambda), value);
    }
}

// Merges a map into an input map, then checks that translating the value and membership
// regions agrees with the folded reads of every key.
fn map_merge_into_input_map(source_is_allocated: bool) {
    init();
    let descriptor =
        SymbolicMapDescriptor::new("java.util.Map", ExpressionType::Reference, ExpressionType::I32);
    let mut memory = Memory::new(&Options::default());
    let target = input_ref("target");
    let source = if source_is_allocated {
        memory.allocate("java.util.HashMap")
    } else {
        input_ref("source")
    };
    let keys: Vec<Arc<SymbolicValue>> = (1..=4).map(|i| input_ref(&format!("k{}", i))).collect();
    let flag = bool_var("flag");
    descriptor.put(&mut memory, &target, &keys[0], int(1), &TRUE);
    descriptor.put(&mut memory, &target, &keys[1], int(2), &TRUE);
    descriptor.put(&mut memory, &source, &keys[1], int(20), &TRUE);
    descriptor.put(&mut memory, &source, &keys[2], int(30), &TRUE);
    descriptor.remove(&mut memory, &source, &keys[3], &TRUE);
    descriptor
        .merge_into(&mut memory, &target, &source, &flag)
        .unwrap();

    let mut checks = Vec::new();
    for region in [descriptor.values(), descriptor.contains_region()] {
        for k in &keys {
            let key = LocationKey::element(target.clone(), k.clone());
            let folded = TranslationSession::default()
                .translate(&memory.read(region, &key))
                .unwrap();
            let translated = TranslationSession::default()
                .translate_read(&memory.region_for(region), &key)
                .unwrap();
            checks.push((folded, translated));
        }
    }

    let mut domains = vec![
        ("target", input_addresses(2)),
        ("k1", input_addresses(3)),
        ("k2", input_addresses(3)),
        ("k3", input_addresses(3)),
        ("k4", input_addresses(3)),
        ("flag", vec![ConstantDomain::True, ConstantDomain::False]),
    ];
    if !source_is_allocated {
        domains.push(("source", input_addresses(2)));
    }
    for model in &enumerate_models(&domains) {
        for (folded, translated) in &checks {
            let value = model.evaluate(folded);
            assert!(value.is_some());
            assert_eq!(model.evaluate(translated), value);
        }
    }
}

#[test]
fn allocated_map_merged_into_input_map() {
    map_merge_into_input_map(true);
}

#[test]
fn input_map_merged_into_input_map() {
    map_merge_into_input_map(false);
}

#[test]
fn decoded_memory_agrees_with_folded_reads() {
    init();
    let region = int_array();
    let mut memory = Memory::new(&Options::default());
    let (ref1, ref2) = (input_ref("ref1"), input_ref("ref2"));
    let (idx1, idx2, idx) = (int_var("idx1"), int_var("idx2"), int_var("idx"));
    let flag = bool_var("flag");
    let allocated = memory.allocate("int[]");
    memory.write(&region, &LocationKey::element(ref1.clone(), idx1), int(1), &TRUE);
    memory.write(&region, &LocationKey::element(allocated.clone(), int(3)), int(7), &TRUE);
    memory.write(&region, &LocationKey::element(ref2.clone(), idx2), int(2), &flag);
    memory
        .copy_range(&region, ref2.clone(), int(0), allocated.clone(), int(1), int(3), &TRUE)
        .unwrap();
    let either = flag.conditional_expression(ref1.clone(), allocated.clone());
    memory.write(&region, &LocationKey::element(either, int(0)), int(9), &TRUE);

    let keys = [
        LocationKey::element(ref1, idx.clone()),
        LocationKey::element(ref2, idx.clone()),
        LocationKey::element(allocated, idx),
    ];
    let mut domains = vec![
        ("ref1", input_addresses(2)),
        ("ref2", input_addresses(2)),
        ("idx1", ints(0..2)),
        ("idx2", ints(0..2)),
        ("idx", ints(0..5)),
    ];
    domains.push(("flag", vec![ConstantDomain::False, ConstantDomain::True]));
    for model in &enumerate_models(&domains) {
        let decoded = DecodedMemory::new(model, &memory);
        for key in &keys {
            let folded = decoded.eval(&memory.read(&region, key)).unwrap();
            assert!(folded.is_some());
            assert_eq!(decoded.read(&region, key).unwrap(), folded);
        }
        assert_eq!(decoded.decoded_regions(), 1);
    }
}

#[test]
fn translated_input_read_selects_from_base_array() {
    init();
    let region = RegionId::field("Node.next", ExpressionType::Reference);
    let memory = Memory::new(&Options::default());
    let node = input_ref("node");
    let next = memory.read(&region, &LocationKey::field(node));
    assert!(next.is_input_reference());
    let term = TranslationSession::default().translate(&next).unwrap();
    let mut model = ConcreteModel::new().with("node", ConstantDomain::InputAddress(1));
    model.assign_array_entry(
        &region.base_array_name(),
        vec![ConstantDomain::InputAddress(1)],
        ConstantDomain::InputAddress(2),
    );
    assert_eq!(model.evaluate(&term), Some(ConstantDomain::InputAddress(2)));
    let unassigned = ConcreteModel::new().with("node", ConstantDomain::InputAddress(5));
    assert_eq!(unassigned.evaluate(&term), Some(ConstantDomain::Null));
}

#[test]
fn translation_is_memoized() {
    init();
    let region = int_array();
    let mut memory = Memory::new(&Options::default());
    let r = input_ref("r");
    for i in 0..20 {
        memory.write(&region, &LocationKey::element(r.clone(), int(i)), int(i), &TRUE);
    }
    let key = LocationKey::element(r, int_var("i"));
    let mut session = TranslationSession::default();
    let first = session
        .translate_read(&memory.region_for(&region), &key)
        .unwrap();
    let second = session
        .translate_read(&memory.region_for(&region), &key)
        .unwrap();
    assert_eq!(first, second);
}
