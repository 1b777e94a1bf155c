// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

use crate::region_id::RegionId;

use thiserror::Error;

/// The reasons why two states cannot be merged into one. A merge failure is not a bug:
/// the caller keeps exploring both states separately.
#[derive(Error, Clone, Debug, Eq, PartialEq)]
pub enum MergeFailure {
    #[error("the states are at different program locations")]
    Location,
    #[error("the states have different call stacks")]
    CallStack,
    #[error("register {0} is defined in only one of the states")]
    Register(u32),
    #[error("the states have different register frames")]
    Frames,
    #[error("the states have allocated different numbers of objects")]
    AllocationCounter,
    #[error("the states have allocated objects of different types")]
    AllocatedTypes,
    #[error("the states have different reference equality constraints")]
    EqualityConstraints,
    #[error("one of the states has contradicting path constraints")]
    Infeasible,
    #[error("one of the states has terminated")]
    Terminated,
}

/// Errors returned by memory, translation and state operations.
#[derive(Error, Clone, Debug, Eq, PartialEq)]
pub enum Error {
    /// The solver gave up (timeout, interrupt or an incomplete theory). The branch is dropped.
    #[error("the solver could not decide the query")]
    SolverUnknown,

    /// The states could not be merged. Both are kept.
    #[error("merge failed: {0}")]
    Merge(#[from] MergeFailure),

    /// A ranged update was applied to, or found in, a region kind that has no ranged semantics.
    /// This is a bug in the caller.
    #[error("region {0} does not support ranged updates")]
    UnsupportedRangedUpdate(String),

    /// The operation needs an active state.
    #[error("the state has terminated")]
    Terminated,

    /// A configuration string could not be parsed.
    #[error("invalid options: {0}")]
    Options(String),
}

impl Error {
    pub fn unsupported_ranged_update(region: &RegionId) -> Error {
        Error::UnsupportedRangedUpdate(region.to_string())
    }

    /// True for errors that exploration is expected to recover from by dropping or keeping
    /// branches, false for contract violations.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::SolverUnknown | Error::Merge(..) | Error::Terminated => true,
            Error::UnsupportedRangedUpdate(..) | Error::Options(..) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
