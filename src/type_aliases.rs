// SPDX-License-Identifier: MPL-2.0

//! Publicly exported type aliases.

use std::hash::BuildHasherDefault;

use rustc_hash::FxHasher;

use crate::{Candidate, NameId};

/// Map implementation used by the library.
pub type Map<K, V> = rustc_hash::FxHashMap<K, V>;

/// Set implementation used by the library.
pub type Set<V> = rustc_hash::FxHashSet<V>;

/// Insertion-ordered map from identifier to the candidate pinned for it.
///
/// The order is the pin order; backjumping unwinds it from the back.
pub type Mapping = indexmap::IndexMap<NameId, Candidate, BuildHasherDefault<FxHasher>>;
