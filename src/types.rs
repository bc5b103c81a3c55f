// SPDX-License-Identifier: MPL-2.0

//! Identifiers and the two value types the resolver trades in.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Dense integer identifier of one specific (package, version) pair.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct NodeId(pub u32);

/// Dense integer identifier of a package name, shared by all its versions.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct NameId(pub u32);

impl NodeId {
    /// Index into the per-node arrays.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for NameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Interpreter versions covered by the per-node compatibility masks.
///
/// Bit `i` of any mask corresponds to `INTERPRETERS[i]`; a set bit means
/// the node is compatible with that interpreter version.
pub const INTERPRETERS: [&str; 26] = [
    "2.0", "2.1", "2.2", "2.3", "2.4", "2.5", "2.6", "2.7", "3.0", "3.1", "3.2", "3.3", "3.4",
    "3.5", "3.6", "3.7", "3.8", "3.9", "3.10", "3.11", "3.12", "3.13", "3.14", "3.15", "3.16",
    "3.17",
];

/// Mask with every interpreter bit set, denoting "unconstrained".
pub const ALL_INTERPRETERS: u32 = (1 << INTERPRETERS.len()) - 1;

/// One concrete package-version offered for (or pinned to) an identifier.
///
/// The upload time and interpreter mask are not stored here; they are read
/// from the preloaded arrays through `node_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Candidate {
    /// The (package, version) pair.
    pub node_id: NodeId,
    /// The name group the pair belongs to.
    pub name_id: NameId,
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name_id, self.node_id)
    }
}

/// A dependency on a package name, demanded by `parent`.
///
/// `parent == None` marks the synthetic requirement that seeds a
/// resolution call; its only admissible candidate is the start node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Requirement {
    /// The demanded name group.
    pub name_id: NameId,
    /// The candidate that issued the demand.
    pub parent: Option<Candidate>,
}
