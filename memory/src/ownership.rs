// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

/// An opaque token that says which state may mutate a structure in place.
/// A fresh token is minted for every clone, fork and merge; tokens are never reused.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct Ownership(u64);

impl Ownership {
    pub fn new() -> Ownership {
        Ownership(NEXT_TOKEN.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for Ownership {
    fn default() -> Self {
        Ownership::new()
    }
}
