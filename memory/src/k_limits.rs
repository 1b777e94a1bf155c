// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

// Somewhat arbitrary constants used to limit how much work translation and solving may do.

/// Ranged copies over concrete ranges up to this length are translated into individual stores
/// rather than an array lambda.
pub const MAX_UNROLLED_RANGE: u32 = 16;

/// The default number of milliseconds the solver may spend on a single query.
pub const DEFAULT_SOLVER_TIMEOUT_MS: u64 = 5_000;

/// Soft constraints ask integer inputs to stay within [-SOFT_BOUND, SOFT_BOUND].
pub const SOFT_BOUND: i64 = 256;

