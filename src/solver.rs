// SPDX-License-Identifier: MPL-2.0

//! Time-aware, root-pinned resolution entry point.
//!
//! A call asks: starting from one package-version (`node`), with one
//! version of the root package pinned (`root_node`), and admitting only
//! versions first uploaded at or before a cutoff, does a consistent
//! assignment of dependencies exist? Consistent means
//!
//! - exactly one version is chosen per package name,
//! - every chosen version existed at the cutoff,
//! - at least one interpreter bit is common to every chosen version,
//! - wherever the root's package name is required, only the pinned root
//!   version is admissible.
//!
//! ## API
//!
//! ```
//! use hindsight::{Context, MemoryStore, Runner};
//!
//! let mut store = MemoryStore::new();
//! let pkg = store.add_name(0, "app");
//! let node = store.add_node(0, "app", hindsight::ALL_INTERPRETERS, 100);
//! store.set_deps(node, []);
//!
//! let ctx = Context::load(store, 1024).unwrap();
//! let outcome = Runner::new(&ctx)
//!     .resolve(node, node, pkg, Some(100), false, 100)
//!     .unwrap();
//! assert!(outcome.resolved);
//! assert_eq!(outcome.depth, 0);
//! ```
//!
//! Unresolvable inputs and exhausted round limits are reported in the
//! returned [`Outcome`], not as errors; see
//! [`ResolveError`](crate::ResolveError) for the cases that abort a call.

use std::collections::{BTreeMap, VecDeque};

use log::info;
use serde::{Deserialize, Serialize};

use crate::internal::{Resolution, Resolved, State};
use crate::{Context, GraphProvider, Map, NameId, NodeId, Requirement, ResolveError, Set};

/// Default bound on resolution rounds.
pub const DEFAULT_MAX_ROUNDS: usize = 100;

/// What one resolution call produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    /// A consistent assignment exists.
    pub resolved: bool,
    /// Hops from the start node to the pinned root in the result graph;
    /// `-1` when unresolved or unreachable.
    pub depth: i64,
    /// The result graph, when requested via `debug`.
    pub tree: Option<ResolutionTree>,
}

impl Outcome {
    fn unresolved() -> Self {
        Self {
            resolved: false,
            depth: -1,
            tree: None,
        }
    }
}

/// Debug rendition of a successful resolution: the chosen nodes, the
/// dependency edges among them, and the name-to-node assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionTree {
    /// Every pinned node, in pin order.
    pub nodes: Vec<NodeId>,
    /// `(parent, child)` dependency edges among pinned nodes.
    pub edges: Vec<(NodeId, NodeId)>,
    /// Name id to chosen node id.
    pub mapping: BTreeMap<NameId, NodeId>,
}

/// Reusable handle for running resolutions against one [`Context`].
pub struct Runner<'a> {
    ctx: &'a Context,
}

impl<'a> Runner<'a> {
    /// A runner over `ctx`.
    pub fn new(ctx: &'a Context) -> Self {
        Self { ctx }
    }

    /// Resolve `node` with `root_node` pinned for `root_name`.
    ///
    /// A `cutoff` of `None` defaults to the later of the two nodes' upload
    /// times; if either time is missing the call reports unresolved
    /// without running the engine. With `debug`, a successful outcome
    /// carries the result graph.
    pub fn resolve(
        &self,
        node: NodeId,
        root_node: NodeId,
        root_name: NameId,
        cutoff: Option<i64>,
        debug: bool,
        max_rounds: usize,
    ) -> Result<Outcome, ResolveError> {
        let ctx = self.ctx;
        let cutoff = match cutoff {
            Some(t) => t,
            None => {
                let (Some(tn), Some(tr)) = (ctx.node_time(node)?, ctx.node_time(root_node)?)
                else {
                    return Ok(Outcome::unresolved());
                };
                tn.max(tr)
            }
        };
        let Some(start_name) = ctx.node_name_id(node)? else {
            return Ok(Outcome::unresolved());
        };

        info!("resolve: node={node} root={root_node} cutoff={cutoff}");
        let provider = GraphProvider::new(ctx, node, root_node, root_name, cutoff);
        let seed = Requirement {
            name_id: start_name,
            parent: None,
        };
        let mut resolution = Resolution::new(&provider);
        match resolution.resolve(vec![seed], max_rounds)? {
            Resolved::Success(state) => finish(&provider, &state, node, root_node, debug),
            Resolved::Impossible(_) | Resolved::TooDeep => Ok(Outcome::unresolved()),
        }
    }
}

/// One-shot resolve against an existing context.
pub fn resolve_one(
    ctx: &Context,
    node: NodeId,
    root_node: NodeId,
    root_name: NameId,
    cutoff: Option<i64>,
    debug: bool,
) -> Result<Outcome, ResolveError> {
    Runner::new(ctx).resolve(node, root_node, root_name, cutoff, debug, DEFAULT_MAX_ROUNDS)
}

/// Derive the result graph from the final state and compute the depth to
/// the root by BFS over forward (dependency) edges.
fn finish(
    provider: &GraphProvider<'_>,
    state: &State,
    start: NodeId,
    root: NodeId,
    debug: bool,
) -> Result<Outcome, ResolveError> {
    let mapping = &state.mapping;
    let mut edges: Vec<(NodeId, NodeId)> = Vec::new();
    let mut forward: Map<NodeId, Vec<NodeId>> = Map::default();
    for candidate in mapping.values() {
        for requirement in provider.get_dependencies(candidate) {
            if let Some(child) = mapping.get(&requirement.name_id) {
                edges.push((candidate.node_id, child.node_id));
                forward
                    .entry(candidate.node_id)
                    .or_default()
                    .push(child.node_id);
            }
        }
    }

    let depth = bfs_depth(&forward, start, root);
    let tree = debug.then(|| ResolutionTree {
        nodes: mapping.values().map(|c| c.node_id).collect(),
        edges,
        mapping: mapping.iter().map(|(&k, c)| (k, c.node_id)).collect(),
    });
    Ok(Outcome {
        resolved: true,
        depth,
        tree,
    })
}

fn bfs_depth(forward: &Map<NodeId, Vec<NodeId>>, start: NodeId, target: NodeId) -> i64 {
    let mut seen: Set<NodeId> = Set::default();
    seen.insert(start);
    let mut queue: VecDeque<(NodeId, i64)> = VecDeque::from([(start, 0)]);
    while let Some((node, depth)) = queue.pop_front() {
        if node == target {
            return depth;
        }
        for &next in forward.get(&node).map_or(&[][..], Vec::as_slice) {
            if seen.insert(next) {
                queue.push_back((next, depth + 1));
            }
        }
    }
    -1
}
