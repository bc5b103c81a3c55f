// SPDX-License-Identifier: MPL-2.0

//! Fatal error types.
//!
//! "No satisfying assignment exists" and "round limit exceeded" are not
//! errors; they are reported through [`Outcome`](crate::Outcome). The types
//! here cover the cases where the data or the backing store is broken and
//! the current call must abort.

use thiserror::Error;

use crate::{NameId, NodeId};

/// Failure reading from the backing store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The underlying SQLite operation failed.
    #[error("sqlite failure: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// A row exists but cannot be decoded.
    #[error("malformed {table} row for {key}: {reason}")]
    Malformed {
        /// Logical table the row came from.
        table: &'static str,
        /// Row key, rendered for the message.
        key: String,
        /// What failed to decode.
        reason: String,
    },
    /// A chunk referenced by a header has no body row.
    ///
    /// Chunks are atomically present; a missing body is a data error, not
    /// an empty result.
    #[error("chunk body ({src}, {dep}, {chunk}) referenced by its header is absent")]
    MissingChunk {
        /// Source node of the edge group.
        src: NodeId,
        /// Dependency name of the edge group.
        dep: NameId,
        /// Index of the missing chunk.
        chunk: u32,
    },
}

/// Fatal errors surfaced by a resolution call.
///
/// The context remains usable for further calls after any of these.
#[derive(Error, Debug)]
pub enum ResolveError {
    /// A node id outside the preloaded arrays was encountered.
    #[error("node {0} is not covered by the preloaded tables")]
    MissingNode(NodeId),
    /// A chunk fetch failed mid-resolution.
    #[error(transparent)]
    Store(#[from] StoreError),
}
