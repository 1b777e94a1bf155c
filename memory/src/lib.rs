// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.
//
// The symbolic memory core of a symbolic execution engine. Front ends that interpret a
// program keep one State per execution path. A State owns a Memory made of persistent regions,
// a PathConstraints store, and the models that are known to satisfy it. The translator turns
// memory and constraints into array theory terms for an SmtSolver, and DecodedMemory reads
// concrete values back out of a model.

#[macro_use]
extern crate log;

pub mod address;
pub mod collections;
pub mod constant_domain;
pub mod error;
pub mod expression;
pub mod k_limits;
pub mod memory;
pub mod model;
pub mod options;
pub mod ownership;
pub mod path_constraints;
pub mod region;
pub mod region_id;
pub mod smt_solver;
pub mod state;
pub mod symbolic_value;
pub mod translator;
pub mod update_log;
pub mod utils;
#[cfg(feature = "z3")]
pub mod z3_solver;
