// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

use crate::symbolic_value::SymbolicValue;

use std::sync::Arc;

/// Initializes the logger from the SYMMEM_LOG and SYMMEM_LOG_STYLE environment variables.
/// Calling this more than once is harmless.
pub fn init_logging() {
    let e = env_logger::Env::new()
        .filter("SYMMEM_LOG")
        .write_style("SYMMEM_LOG_STYLE");
    let _ = env_logger::try_init_from_env(e);
}

/// Returns the values of a list, formatted for a log or dump line.
pub fn format_values(values: &[Arc<SymbolicValue>]) -> Vec<String> {
    values.iter().map(|v| format!("{:?}", v)).collect()
}
