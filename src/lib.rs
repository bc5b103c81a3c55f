// SPDX-License-Identifier: MPL-2.0

//! Time-aware, root-pinned dependency resolution over a preprocessed
//! package-version graph.
//!
//! The graph is keyed by dense integers: a [`NodeId`] names one
//! (package, version) pair, a [`NameId`] names a package. Per-node first
//! upload times, interpreter-compatibility masks and direct-dependency
//! lists are preloaded into a [`Context`]; the admissible destinations of
//! each `(source node, dependency name)` pair live in time-sorted chunks
//! fetched on demand and cached in an LRU.
//!
//! A resolution call is made through a [`Runner`] with a start node, a
//! pinned root version, and a time cutoff; it reports whether a
//! consistent assignment exists, the start-to-root distance in the result
//! graph, and optionally the result graph itself. See [`Runner::resolve`]
//! for the exact contract and the `solver` module docs for an example.
//!
//! All constraint semantics are precomputed into edges and bitmasks;
//! this crate neither parses version specifiers nor talks to an index.

#![warn(missing_docs)]

mod chunks;
mod context;
mod error;
mod internal;
mod provider;
mod solver;
mod store;
mod type_aliases;
mod types;

pub use chunks::{edge_exists_upto, ChunkCursor};
pub use context::{canonicalize_name, Context, DEFAULT_CHUNK_CACHE_CAPACITY};
pub use error::{ResolveError, StoreError};
pub use provider::{GraphProvider, Matches, Preference, RequirementInformation};
pub use solver::{resolve_one, Outcome, ResolutionTree, Runner, DEFAULT_MAX_ROUNDS};
pub use store::{DepHeader, GraphStore, MemoryStore, SqliteStore};
pub use type_aliases::{Map, Mapping, Set};
pub use types::{Candidate, NameId, NodeId, Requirement, ALL_INTERPRETERS, INTERPRETERS};
