// SPDX-License-Identifier: MPL-2.0

//! The read-mostly resolution context.
//!
//! Built once at process start: per-node arrays sized to
//! `max_node_id + 1`, per-node direct-dependency lists, per-(src,
//! dep-name) chunk headers, and an LRU for chunk bodies fetched on
//! demand. The LRU is the only mutable state; everything else is frozen
//! after [`Context::load`], so one context can serve any number of
//! sequential or concurrent resolution calls.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use log::info;
use lru::LruCache;

use crate::{
    DepHeader, GraphStore, Map, NameId, NodeId, ResolveError, StoreError, ALL_INTERPRETERS,
};

/// Default capacity of the chunk-body LRU.
pub const DEFAULT_CHUNK_CACHE_CAPACITY: usize = 200_000;

type ChunkKey = (NodeId, NameId, u32);

/// Normalize a package name the way the preprocessed tables do:
/// lowercase, with runs of `-`, `_` and `.` collapsed to a single `-`.
pub fn canonicalize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_sep = false;
    for c in name.chars() {
        if matches!(c, '-' | '_' | '.') {
            pending_sep = !out.is_empty();
        } else {
            if pending_sep {
                out.push('-');
                pending_sep = false;
            }
            out.extend(c.to_lowercase());
        }
    }
    out
}

/// Preloaded graph data plus the chunk LRU.
pub struct Context {
    node_name_id: Vec<Option<NameId>>,
    node_time: Vec<Option<i64>>,
    node_py_mask: Vec<u32>,
    all_mask: u32,
    names: Map<NameId, String>,
    name_ids: Map<String, NameId>,
    adj_deps: Map<NodeId, Vec<NameId>>,
    adj_headers: Map<(NodeId, NameId), DepHeader>,
    chunk_cache: Option<Mutex<LruCache<ChunkKey, Arc<Vec<NodeId>>>>>,
    store: Box<dyn GraphStore>,
}

impl Context {
    /// Preload every table except chunk bodies from `store`.
    ///
    /// `lru_capacity` bounds the chunk-body cache; zero disables caching
    /// entirely and every cursor step goes back to the store.
    pub fn load(store: impl GraphStore + 'static, lru_capacity: usize) -> Result<Self, StoreError> {
        let names_rows = store.load_names()?;
        let node_rows = store.load_nodes()?;
        let meta_rows = store.load_node_meta()?;

        let mut names = Map::default();
        let mut name_ids = Map::default();
        for (id, name) in names_rows {
            name_ids.insert(canonicalize_name(&name), id);
            names.insert(id, name);
        }

        let slots = node_rows
            .iter()
            .map(|(n, _)| n.index())
            .chain(meta_rows.iter().map(|(n, _, _)| n.index()))
            .max()
            .map_or(0, |m| m + 1);

        // OR of every observed mask; the default for nodes without a meta
        // row. An empty table degrades to "every bit".
        let mut all_mask = meta_rows.iter().fold(0, |acc, (_, m, _)| acc | m);
        if all_mask == 0 {
            all_mask = ALL_INTERPRETERS;
        }

        let mut node_name_id = vec![None; slots];
        for (node, name) in node_rows {
            node_name_id[node.index()] = name_ids.get(&canonicalize_name(&name)).copied();
        }

        let mut node_py_mask = vec![all_mask; slots];
        let mut node_time = vec![None; slots];
        for (node, mask, time) in meta_rows {
            node_py_mask[node.index()] = mask;
            node_time[node.index()] = time;
        }

        let adj_deps: Map<NodeId, Vec<NameId>> = store.load_adj_deps()?.into_iter().collect();
        let adj_headers: Map<(NodeId, NameId), DepHeader> = store
            .load_adj_headers()?
            .into_iter()
            .map(|(src, dep, h)| ((src, dep), h))
            .collect();

        info!(
            "context loaded: {} node slots, {} names, {} edge groups",
            slots,
            names.len(),
            adj_headers.len()
        );

        Ok(Self {
            node_name_id,
            node_time,
            node_py_mask,
            all_mask,
            names,
            name_ids,
            adj_deps,
            adj_headers,
            chunk_cache: NonZeroUsize::new(lru_capacity).map(|cap| Mutex::new(LruCache::new(cap))),
            store: Box::new(store),
        })
    }

    /// Number of node slots (`max_node_id + 1`).
    pub fn node_count(&self) -> usize {
        self.node_time.len()
    }

    /// Name id for `name`, after canonicalization.
    pub fn name_id(&self, name: &str) -> Option<NameId> {
        self.name_ids.get(&canonicalize_name(name)).copied()
    }

    /// Display name for `id`.
    pub fn name(&self, id: NameId) -> Option<&str> {
        self.names.get(&id).map(String::as_str)
    }

    /// Default mask assigned to nodes without a meta row.
    pub fn all_mask(&self) -> u32 {
        self.all_mask
    }

    fn index(&self, node: NodeId) -> Result<usize, ResolveError> {
        let idx = node.index();
        if idx < self.node_time.len() {
            Ok(idx)
        } else {
            Err(ResolveError::MissingNode(node))
        }
    }

    /// Name group of `node`, if it has an identity row.
    pub fn node_name_id(&self, node: NodeId) -> Result<Option<NameId>, ResolveError> {
        Ok(self.node_name_id[self.index(node)?])
    }

    /// First-upload epoch of `node`, if recorded.
    pub fn node_time(&self, node: NodeId) -> Result<Option<i64>, ResolveError> {
        Ok(self.node_time[self.index(node)?])
    }

    /// Interpreter-compatibility mask of `node`.
    pub fn node_py_mask(&self, node: NodeId) -> Result<u32, ResolveError> {
        Ok(self.node_py_mask[self.index(node)?])
    }

    /// Direct dependency names of `node`.
    ///
    /// A node absent from the deps table has zero dependencies; the loader
    /// guarantees the table is complete for nodes that have any.
    pub fn dep_name_ids(&self, node: NodeId) -> &[NameId] {
        self.adj_deps.get(&node).map_or(&[], Vec::as_slice)
    }

    /// Chunk header of the `(src, dep)` edge group.
    pub fn header(&self, src: NodeId, dep: NameId) -> Option<&DepHeader> {
        self.adj_headers.get(&(src, dep))
    }

    /// Body of one chunk, from the LRU or the store.
    pub fn chunk_body(
        &self,
        src: NodeId,
        dep: NameId,
        chunk: u32,
    ) -> Result<Arc<Vec<NodeId>>, StoreError> {
        let key = (src, dep, chunk);
        if let Some(cache) = &self.chunk_cache {
            if let Some(body) = cache.lock().expect("chunk cache poisoned").get(&key) {
                return Ok(Arc::clone(body));
            }
        }
        let body = Arc::new(self.store.fetch_chunk(src, dep, chunk)?);
        if let Some(cache) = &self.chunk_cache {
            cache
                .lock()
                .expect("chunk cache poisoned")
                .put(key, Arc::clone(&body));
        }
        Ok(body)
    }
}
