// SPDX-License-Identifier: MPL-2.0

//! Newest-first traversal of time-sorted adjacency chunks.
//!
//! Chunk headers carry per-chunk min/max upload epochs, so a cutoff
//! resolves to a chunk index with one binary search and to a position
//! inside the boundary chunk with a second. Full chunks below the cutoff
//! are yielded back-to-front without inspecting individual times.

use std::sync::Arc;

use crate::{Context, NameId, NodeId, ResolveError};

/// Largest index `i` such that `body[..i]` all have an upload time at or
/// before `cutoff`. Entries without a recorded time sort after any cutoff.
fn upper_bound_by_time(
    ctx: &Context,
    body: &[NodeId],
    cutoff: i64,
) -> Result<usize, ResolveError> {
    let (mut lo, mut hi) = (0, body.len());
    while lo < hi {
        let mid = (lo + hi) / 2;
        let within = matches!(ctx.node_time(body[mid])?, Some(t) if t <= cutoff);
        if within {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    Ok(lo)
}

/// Smallest index `i` such that `body[i..]` all have an upload time at or
/// after `t`.
fn lower_bound_by_time(ctx: &Context, body: &[NodeId], t: i64) -> Result<usize, ResolveError> {
    let (mut lo, mut hi) = (0, body.len());
    while lo < hi {
        let mid = (lo + hi) / 2;
        let before = matches!(ctx.node_time(body[mid])?, Some(tm) if tm < t);
        if before {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    Ok(lo)
}

/// Lazy newest-first walk over the destinations of one `(src, dep-name)`
/// edge group, restricted to first-upload times at or before the cutoff.
///
/// The produced sequence is strictly time-descending and duplicate-free.
/// Bodies come from the chunk LRU; only the boundary chunk (the one the
/// cutoff falls inside) needs per-entry time checks.
pub struct ChunkCursor<'a> {
    ctx: &'a Context,
    src: NodeId,
    dep: NameId,
    cutoff: i64,
    /// Next chunk to fetch, walking toward chunk 0.
    next_chunk: Option<usize>,
    body: Arc<Vec<NodeId>>,
    /// Entries of `body` not yet yielded; yielded back-to-front.
    remaining: usize,
}

impl<'a> ChunkCursor<'a> {
    /// Cursor over `(src, dep)` at `cutoff`. Empty if the group has no
    /// header or every chunk starts after the cutoff.
    pub fn new(ctx: &'a Context, src: NodeId, dep: NameId, cutoff: i64) -> Self {
        let next_chunk = ctx.header(src, dep).and_then(|h| {
            h.min_time
                .partition_point(|&m| m <= cutoff)
                .checked_sub(1)
        });
        Self {
            ctx,
            src,
            dep,
            cutoff,
            next_chunk,
            body: Arc::new(Vec::new()),
            remaining: 0,
        }
    }

    fn load_chunk(&mut self, chunk: usize) -> Result<(), ResolveError> {
        let body = self.ctx.chunk_body(self.src, self.dep, chunk as u32)?;
        let header = self
            .ctx
            .header(self.src, self.dep)
            .expect("cursor only visits chunks its header describes");
        self.remaining = if header.max_time[chunk] <= self.cutoff {
            body.len()
        } else {
            // The cutoff falls inside this chunk.
            upper_bound_by_time(self.ctx, &body, self.cutoff)?
        };
        self.body = body;
        Ok(())
    }
}

impl Iterator for ChunkCursor<'_> {
    type Item = Result<NodeId, ResolveError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.remaining > 0 {
                self.remaining -= 1;
                return Some(Ok(self.body[self.remaining]));
            }
            let chunk = self.next_chunk?;
            self.next_chunk = chunk.checked_sub(1);
            if let Err(e) = self.load_chunk(chunk) {
                self.next_chunk = None;
                return Some(Err(e));
            }
        }
    }
}

/// Whether `dst` is among the destinations of `(src, dep)` admissible at
/// `cutoff`.
///
/// Locates the chunk bracketing `dst`'s upload time by binary search on
/// the header maxima, then binary-searches the body. Equal-time runs can
/// straddle a chunk boundary, so scanning continues into later chunks
/// while they still start at or before that time.
pub fn edge_exists_upto(
    ctx: &Context,
    src: NodeId,
    dep: NameId,
    dst: NodeId,
    cutoff: i64,
) -> Result<bool, ResolveError> {
    let Some(t) = ctx.node_time(dst)? else {
        return Ok(false);
    };
    if t > cutoff {
        return Ok(false);
    }
    let Some(header) = ctx.header(src, dep) else {
        return Ok(false);
    };
    let mut chunk = header.max_time.partition_point(|&m| m < t);
    while chunk < header.chunk_count() && header.min_time[chunk] <= t {
        let body = ctx.chunk_body(src, dep, chunk as u32)?;
        let start = lower_bound_by_time(ctx, &body, t)?;
        for &node in &body[start..] {
            match ctx.node_time(node)? {
                Some(tm) if tm == t => {
                    if node == dst {
                        return Ok(true);
                    }
                }
                _ => break,
            }
        }
        chunk += 1;
    }
    Ok(false)
}
