// SPDX-License-Identifier: MPL-2.0

//! Read interface over the preprocessed package-version graph.
//!
//! Everything except chunk bodies is consumed once, at
//! [`Context::load`](crate::Context::load) time. Chunk bodies are fetched
//! on demand through [`GraphStore::fetch_chunk`] whenever the chunk LRU
//! misses, and are stored without time truncation so the same body is
//! valid at any cutoff.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;
use serde::de::DeserializeOwned;

use crate::{Map, NameId, NodeId, StoreError};

/// Per-(src, dep-name) chunk summary.
///
/// Entry `c` of each array describes chunk `c`: minimum and maximum
/// first-upload epoch of its destinations, and how many destinations it
/// holds. Across chunks and within each chunk, destinations ascend by
/// upload time; `max_time[c] <= min_time[c + 1]`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DepHeader {
    /// Minimum first-upload epoch per chunk.
    pub min_time: Vec<i64>,
    /// Maximum first-upload epoch per chunk.
    pub max_time: Vec<i64>,
    /// Destination count per chunk.
    pub counts: Vec<u32>,
    /// Sum of `counts`.
    pub total: u64,
}

impl DepHeader {
    /// Number of chunks in this edge group.
    pub fn chunk_count(&self) -> usize {
        self.counts.len()
    }
}

/// Read access to the backing collections.
///
/// One production implementation ([`SqliteStore`]) and one in-memory
/// implementation ([`MemoryStore`]) are provided; the resolver itself only
/// ever sees a [`Context`](crate::Context) built on top of either.
pub trait GraphStore: Send + Sync {
    /// All `(name_id, name)` rows.
    fn load_names(&self) -> Result<Vec<(NameId, String)>, StoreError>;

    /// All `(node_id, package name)` identity rows.
    fn load_nodes(&self) -> Result<Vec<(NodeId, String)>, StoreError>;

    /// All `(node_id, py_mask, first_upload_time)` rows.
    fn load_node_meta(&self) -> Result<Vec<(NodeId, u32, Option<i64>)>, StoreError>;

    /// All `(node_id, direct dependency name ids)` rows.
    fn load_adj_deps(&self) -> Result<Vec<(NodeId, Vec<NameId>)>, StoreError>;

    /// All per-(src, dep-name) chunk headers.
    fn load_adj_headers(&self) -> Result<Vec<(NodeId, NameId, DepHeader)>, StoreError>;

    /// Destination node ids of one chunk, ascending by upload time.
    fn fetch_chunk(&self, src: NodeId, dep: NameId, chunk: u32) -> Result<Vec<NodeId>, StoreError>;
}

/// Production store over the preprocessed SQLite tables.
///
/// Array-valued columns (`deps`, `mi`, `ma`, `n`, `dst_ids`) are JSON
/// text. The connection is mutex-guarded so one store can serve a shared
/// [`Context`](crate::Context).
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Ok(Self {
            conn: Mutex::new(Connection::open(path)?),
        })
    }

    /// Wrap an already-open connection (used by tests and tooling).
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }
}

fn decode_json<T: DeserializeOwned>(
    table: &'static str,
    key: impl ToString,
    raw: &str,
) -> Result<T, StoreError> {
    serde_json::from_str(raw).map_err(|e| StoreError::Malformed {
        table,
        key: key.to_string(),
        reason: e.to_string(),
    })
}

impl GraphStore for SqliteStore {
    fn load_names(&self) -> Result<Vec<(NameId, String)>, StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn.prepare("SELECT id, name FROM names")?;
        let rows = stmt.query_map([], |row| Ok((NameId(row.get(0)?), row.get(1)?)))?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    fn load_nodes(&self) -> Result<Vec<(NodeId, String)>, StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn.prepare("SELECT id, name FROM nodes")?;
        let rows = stmt.query_map([], |row| Ok((NodeId(row.get(0)?), row.get(1)?)))?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    fn load_node_meta(&self) -> Result<Vec<(NodeId, u32, Option<i64>)>, StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt =
            conn.prepare("SELECT node_id, py_mask, first_upload_time FROM node_meta")?;
        let rows = stmt.query_map([], |row| {
            Ok((NodeId(row.get(0)?), row.get(1)?, row.get(2)?))
        })?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    fn load_adj_deps(&self) -> Result<Vec<(NodeId, Vec<NameId>)>, StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn.prepare("SELECT node_id, deps FROM adj_deps")?;
        let rows = stmt.query_map([], |row| {
            Ok((NodeId(row.get(0)?), row.get::<_, String>(1)?))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (node, raw) = row?;
            let deps: Vec<u32> = decode_json("adj_deps", node, &raw)?;
            out.push((node, deps.into_iter().map(NameId).collect()));
        }
        Ok(out)
    }

    fn load_adj_headers(&self) -> Result<Vec<(NodeId, NameId, DepHeader)>, StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt =
            conn.prepare("SELECT src_id, dep_name_id, mi, ma, n, total FROM adj_headers")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                NodeId(row.get(0)?),
                NameId(row.get(1)?),
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, u64>(5)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (src, dep, mi, ma, n, total) = row?;
            let key = format!("({src}, {dep})");
            let header = DepHeader {
                min_time: decode_json("adj_headers", &key, &mi)?,
                max_time: decode_json("adj_headers", &key, &ma)?,
                counts: decode_json("adj_headers", &key, &n)?,
                total,
            };
            if header.min_time.len() != header.counts.len()
                || header.max_time.len() != header.counts.len()
            {
                return Err(StoreError::Malformed {
                    table: "adj_headers",
                    key,
                    reason: "mi/ma/n length mismatch".into(),
                });
            }
            out.push((src, dep, header));
        }
        Ok(out)
    }

    fn fetch_chunk(&self, src: NodeId, dep: NameId, chunk: u32) -> Result<Vec<NodeId>, StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn.prepare_cached(
            "SELECT dst_ids FROM adj_chunks WHERE src_id = ?1 AND dep_name_id = ?2 AND chunk = ?3",
        )?;
        let raw: Option<String> = stmt
            .query_row((src.0, dep.0, chunk), |row| row.get(0))
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                e => Err(e),
            })?;
        let Some(raw) = raw else {
            return Err(StoreError::MissingChunk { src, dep, chunk });
        };
        let ids: Vec<u32> = decode_json("adj_chunks", format!("({src}, {dep}, {chunk})"), &raw)?;
        Ok(ids.into_iter().map(NodeId).collect())
    }
}

/// In-memory [`GraphStore`] with a small builder API.
///
/// Edge groups handed to [`add_edge_group`](MemoryStore::add_edge_group)
/// are sorted by upload time and split into fixed-size chunks, deriving
/// the header the production pipeline would have written. Used by tests,
/// benches and doc examples.
#[derive(Default)]
pub struct MemoryStore {
    names: Vec<(NameId, String)>,
    nodes: Vec<(NodeId, String)>,
    meta: Vec<(NodeId, u32, Option<i64>)>,
    deps: Vec<(NodeId, Vec<NameId>)>,
    headers: Vec<(NodeId, NameId, DepHeader)>,
    chunks: Map<(NodeId, NameId, u32), Vec<NodeId>>,
    times: Map<NodeId, i64>,
    chunk_size: usize,
}

impl MemoryStore {
    /// Empty store with the default chunk size.
    pub fn new() -> Self {
        Self {
            chunk_size: 64,
            ..Self::default()
        }
    }

    /// Empty store splitting edge groups into chunks of `size`.
    pub fn with_chunk_size(size: usize) -> Self {
        assert!(size > 0, "chunk size must be positive");
        Self {
            chunk_size: size,
            ..Self::default()
        }
    }

    /// Register a package name.
    pub fn add_name(&mut self, id: u32, name: &str) -> NameId {
        self.names.push((NameId(id), name.to_string()));
        NameId(id)
    }

    /// Register a node with its mask and upload time.
    pub fn add_node(&mut self, id: u32, name: &str, py_mask: u32, time: i64) -> NodeId {
        let node = NodeId(id);
        self.nodes.push((node, name.to_string()));
        self.meta.push((node, py_mask, Some(time)));
        self.times.insert(node, time);
        node
    }

    /// Register a node that has an identity row but no meta row.
    ///
    /// Such a node gets the all-observed default mask and no upload time,
    /// so it is never admissible as a candidate.
    pub fn add_node_identity(&mut self, id: u32, name: &str) -> NodeId {
        let node = NodeId(id);
        self.nodes.push((node, name.to_string()));
        node
    }

    /// Set the direct dependency names of `node`.
    pub fn set_deps(&mut self, node: NodeId, deps: impl IntoIterator<Item = NameId>) {
        self.deps.push((node, deps.into_iter().collect()));
    }

    /// Record the admissible destinations of `(src, dep)`, chunking them
    /// by upload time. Every destination must have been added with
    /// [`add_node`](MemoryStore::add_node) first.
    pub fn add_edge_group(&mut self, src: NodeId, dep: NameId, dsts: impl IntoIterator<Item = NodeId>) {
        let mut dsts: Vec<NodeId> = dsts.into_iter().collect();
        dsts.sort_by_key(|d| (self.times[d], *d));
        let mut header = DepHeader::default();
        for (idx, chunk) in dsts.chunks(self.chunk_size).enumerate() {
            header.min_time.push(self.times[&chunk[0]]);
            header.max_time.push(self.times[chunk.last().expect("chunks are non-empty")]);
            header.counts.push(chunk.len() as u32);
            header.total += chunk.len() as u64;
            self.chunks.insert((src, dep, idx as u32), chunk.to_vec());
        }
        self.headers.push((src, dep, header));
    }
}

impl GraphStore for MemoryStore {
    fn load_names(&self) -> Result<Vec<(NameId, String)>, StoreError> {
        Ok(self.names.clone())
    }

    fn load_nodes(&self) -> Result<Vec<(NodeId, String)>, StoreError> {
        Ok(self.nodes.clone())
    }

    fn load_node_meta(&self) -> Result<Vec<(NodeId, u32, Option<i64>)>, StoreError> {
        Ok(self.meta.clone())
    }

    fn load_adj_deps(&self) -> Result<Vec<(NodeId, Vec<NameId>)>, StoreError> {
        Ok(self.deps.clone())
    }

    fn load_adj_headers(&self) -> Result<Vec<(NodeId, NameId, DepHeader)>, StoreError> {
        Ok(self.headers.clone())
    }

    fn fetch_chunk(&self, src: NodeId, dep: NameId, chunk: u32) -> Result<Vec<NodeId>, StoreError> {
        self.chunks
            .get(&(src, dep, chunk))
            .cloned()
            .ok_or(StoreError::MissingChunk { src, dep, chunk })
    }
}
