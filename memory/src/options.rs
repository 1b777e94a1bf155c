// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

use crate::error::{Error, Result};
use crate::k_limits;

use clap::{value_parser, Arg, ArgAction, Command};
use itertools::Itertools;
use std::time::Duration;

/// Creates the clap::Command metadata for argument parsing.
fn make_options_parser() -> Command {
    Command::new("symmem")
        .no_binary_name(true)
        .arg(Arg::new("solver_timeout")
            .long("solver_timeout")
            .value_parser(value_parser!(u64))
            .help("The maximum number of milliseconds the solver may spend on a query.")
            .long_help("A query that times out is treated as unknown and its branch is dropped."))
        .arg(Arg::new("no_in_place_updates")
            .long("no_in_place_updates")
            .action(ArgAction::SetTrue)
            .help("Always copy regions on write, even when the writing state owns them."))
        .arg(Arg::new("max_unrolled_range")
            .long("max_unrolled_range")
            .value_parser(value_parser!(u32))
            .help("Ranged copies over concrete ranges up to this length are translated into stores.")
            .long_help("Longer or symbolic ranges are translated into array lambdas."))
        .arg(Arg::new("soft_constraints")
            .long("soft_constraints")
            .action(ArgAction::SetTrue)
            .help("Try to find models with small integer inputs first."))
        .arg(Arg::new("soft_bound")
            .long("soft_bound")
            .value_parser(value_parser!(i64))
            .help("The magnitude bound used by soft constraints."))
}

/// Represents the options of the symbolic memory core.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Options {
    pub solver_timeout_ms: u64,
    pub in_place_updates: bool,
    pub max_unrolled_range: u32,
    pub use_soft_constraints: bool,
    pub soft_bound: i64,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            solver_timeout_ms: k_limits::DEFAULT_SOLVER_TIMEOUT_MS,
            in_place_updates: true,
            max_unrolled_range: k_limits::MAX_UNROLLED_RANGE,
            use_soft_constraints: false,
            soft_bound: k_limits::SOFT_BOUND,
        }
    }
}

impl Options {
    /// Reads options from the environment variable with the given name. A missing variable
    /// yields the default options.
    pub fn from_env(variable: &str) -> Result<Options> {
        let mut options = Options::default();
        if let Ok(flags) = std::env::var(variable) {
            options.parse_from_str(&flags)?;
        }
        Ok(options)
    }

    /// Parse options from an argument string. The argument string will be split using unix
    /// shell escaping rules. Any content beyond the leftmost `--` token will be returned
    /// (excluding this token).
    pub fn parse_from_str(&mut self, s: &str) -> Result<Vec<String>> {
        let args = shellwords::split(s)
            .map_err(|e| Error::Options(format!("cannot parse argument string: {:?}", e)))?;
        self.parse(&args)
    }

    /// Parses options from a list of strings. Any content beyond the leftmost `--` token
    /// will be returned (excluding this token).
    pub fn parse(&mut self, args: &[String]) -> Result<Vec<String>> {
        let mut own_args_end = args.len();
        let mut rest_start = args.len();
        if let Some((p, _)) = args.iter().find_position(|s| s.as_str() == "--") {
            own_args_end = p;
            rest_start = p + 1;
        }
        let matches = make_options_parser()
            .try_get_matches_from(args[0..own_args_end].iter())
            .map_err(|e| Error::Options(e.to_string()))?;

        if let Some(ms) = matches.get_one::<u64>("solver_timeout") {
            self.solver_timeout_ms = *ms;
        }
        if matches.get_flag("no_in_place_updates") {
            self.in_place_updates = false;
        }
        if let Some(n) = matches.get_one::<u32>("max_unrolled_range") {
            self.max_unrolled_range = *n;
        }
        if matches.get_flag("soft_constraints") {
            self.use_soft_constraints = true;
        }
        if let Some(bound) = matches.get_one::<i64>("soft_bound") {
            self.soft_bound = *bound;
        }
        Ok(args[rest_start..].to_vec())
    }

    pub fn solver_timeout(&self) -> Duration {
        Duration::from_millis(self.solver_timeout_ms)
    }
}
