// SPDX-License-Identifier: MPL-2.0

use std::collections::BTreeMap;

use hindsight::{
    edge_exists_upto, resolve_one, ChunkCursor, Context, GraphProvider, MemoryStore, NameId,
    NodeId, Runner, SqliteStore, ALL_INTERPRETERS, DEFAULT_MAX_ROUNDS,
};

fn load(store: MemoryStore) -> Context {
    Context::load(store, 1024).expect("memory store loads")
}

fn collect_cursor(ctx: &Context, src: NodeId, dep: NameId, cutoff: i64) -> Vec<NodeId> {
    ChunkCursor::new(ctx, src, dep, cutoff)
        .collect::<Result<_, _>>()
        .expect("cursor over memory store")
}

#[test]
fn trivial_pinning() {
    let mut store = MemoryStore::new();
    let app = store.add_name(0, "app");
    let n0 = store.add_node(0, "app", ALL_INTERPRETERS, 100);
    store.set_deps(n0, []);

    let ctx = load(store);
    let outcome = resolve_one(&ctx, n0, n0, app, Some(100), true).unwrap();

    assert!(outcome.resolved);
    assert_eq!(outcome.depth, 0);
    let tree = outcome.tree.unwrap();
    assert_eq!(tree.nodes, vec![n0]);
    assert!(tree.edges.is_empty());
    assert_eq!(tree.mapping, BTreeMap::from([(app, n0)]));
}

#[test]
fn direct_dependency_on_root() {
    let mut store = MemoryStore::new();
    store.add_name(0, "app");
    let lib = store.add_name(1, "lib");
    let s = store.add_node(0, "app", ALL_INTERPRETERS, 100);
    let root = store.add_node(1, "lib", ALL_INTERPRETERS, 50);
    store.set_deps(s, [lib]);
    store.set_deps(root, []);
    store.add_edge_group(s, lib, [root]);

    let ctx = load(store);
    let outcome = resolve_one(&ctx, s, root, lib, Some(100), true).unwrap();

    assert!(outcome.resolved);
    assert_eq!(outcome.depth, 1);
    assert_eq!(outcome.tree.unwrap().edges, vec![(s, root)]);
}

/// Chunked newest-first enumeration with the cutoff inside a chunk.
#[test]
fn cutoff_inside_chunk_orders_newest_first() {
    let mut store = MemoryStore::with_chunk_size(2);
    store.add_name(0, "app");
    let dep = store.add_name(1, "dep");
    let src = store.add_node(0, "app", ALL_INTERPRETERS, 100);
    let a = store.add_node(1, "dep", ALL_INTERPRETERS, 5);
    let b = store.add_node(2, "dep", ALL_INTERPRETERS, 8);
    let c = store.add_node(3, "dep", ALL_INTERPRETERS, 15);
    let d = store.add_node(4, "dep", ALL_INTERPRETERS, 19);
    store.add_edge_group(src, dep, [a, b, c, d]);

    let ctx = load(store);
    assert_eq!(collect_cursor(&ctx, src, dep, 16), vec![c, b, a]);
    assert_eq!(collect_cursor(&ctx, src, dep, 19), vec![d, c, b, a]);
    assert_eq!(collect_cursor(&ctx, src, dep, 4), Vec::<NodeId>::new());
}

/// Raising the cutoff only ever prepends newer entries; the older tail is
/// unchanged.
#[test]
fn larger_cutoff_preserves_older_tail() {
    let mut store = MemoryStore::with_chunk_size(3);
    store.add_name(0, "app");
    let dep = store.add_name(1, "dep");
    let src = store.add_node(0, "app", ALL_INTERPRETERS, 1000);
    let dsts: Vec<NodeId> = (0..10)
        .map(|i| store.add_node(10 + i, "dep", ALL_INTERPRETERS, 10 * i as i64))
        .collect();
    store.add_edge_group(src, dep, dsts);

    let ctx = load(store);
    let mut previous = collect_cursor(&ctx, src, dep, -1);
    assert!(previous.is_empty());
    for cutoff in 0..=100 {
        let current = collect_cursor(&ctx, src, dep, cutoff);
        assert!(current.ends_with(&previous), "tail changed at {cutoff}");
        previous = current;
    }
}

/// `edge_exists_upto` agrees with cursor membership, including equal-time
/// runs straddling a chunk boundary.
#[test]
fn edge_exists_agrees_with_cursor() {
    let mut store = MemoryStore::with_chunk_size(2);
    store.add_name(0, "app");
    let dep = store.add_name(1, "dep");
    let src = store.add_node(0, "app", ALL_INTERPRETERS, 1000);
    // Three entries share time 20; chunk size 2 forces the run across a
    // boundary.
    let times = [10, 20, 20, 20, 35];
    let dsts: Vec<NodeId> = times
        .iter()
        .enumerate()
        .map(|(i, &t)| store.add_node(10 + i as u32, "dep", ALL_INTERPRETERS, t))
        .collect();
    store.add_edge_group(src, dep, dsts.clone());
    let absent = store.add_node(99, "dep", ALL_INTERPRETERS, 20);

    let ctx = load(store);
    for cutoff in [5, 10, 19, 20, 34, 35, 100] {
        let visible = collect_cursor(&ctx, src, dep, cutoff);
        for &dst in &dsts {
            assert_eq!(
                edge_exists_upto(&ctx, src, dep, dst, cutoff).unwrap(),
                visible.contains(&dst),
                "dst {dst} at cutoff {cutoff}"
            );
        }
        assert!(!edge_exists_upto(&ctx, src, dep, absent, cutoff).unwrap());
    }
}

/// Root pinning offers only the pinned root version, and a parent whose
/// edges skip it cannot be satisfied.
#[test]
fn root_pin_overrides_parent_edges() {
    let mut store = MemoryStore::new();
    store.add_name(0, "app");
    let lib = store.add_name(1, "lib");
    let s = store.add_node(0, "app", ALL_INTERPRETERS, 100);
    let v1 = store.add_node(1, "lib", ALL_INTERPRETERS, 10);
    let v2 = store.add_node(2, "lib", ALL_INTERPRETERS, 20);
    let v3 = store.add_node(3, "lib", ALL_INTERPRETERS, 30);
    let pinned = store.add_node(4, "lib", ALL_INTERPRETERS, 15);
    store.set_deps(s, [lib]);
    store.add_edge_group(s, lib, [v1, v2, v3]);

    let ctx = load(store);
    let outcome = resolve_one(&ctx, s, pinned, lib, Some(100), false).unwrap();
    assert!(!outcome.resolved);
    assert_eq!(outcome.depth, -1);
    assert!(outcome.tree.is_none());

    // Root version newer than the cutoff: no candidate at all.
    let outcome = resolve_one(&ctx, s, pinned, lib, Some(12), false).unwrap();
    assert!(!outcome.resolved);
}

/// With the pinned root among the parent's edges, it is chosen over newer
/// versions.
#[test]
fn root_pin_beats_newer_versions() {
    let mut store = MemoryStore::new();
    store.add_name(0, "app");
    let lib = store.add_name(1, "lib");
    let s = store.add_node(0, "app", ALL_INTERPRETERS, 100);
    let old_root = store.add_node(1, "lib", ALL_INTERPRETERS, 10);
    let newer = store.add_node(2, "lib", ALL_INTERPRETERS, 90);
    store.set_deps(s, [lib]);
    store.set_deps(old_root, []);
    store.set_deps(newer, []);
    store.add_edge_group(s, lib, [old_root, newer]);

    let ctx = load(store);
    let outcome = resolve_one(&ctx, s, old_root, lib, Some(100), true).unwrap();
    assert!(outcome.resolved);
    assert_eq!(outcome.depth, 1);
    assert_eq!(outcome.tree.unwrap().mapping[&lib], old_root);
}

/// Disjoint interpreter masks between two required packages make the
/// resolution fail.
#[test]
fn interpreter_mask_conflict() {
    let mut store = MemoryStore::new();
    store.add_name(0, "app");
    let a = store.add_name(1, "aaa");
    let b = store.add_name(2, "bbb");
    let s = store.add_node(0, "app", ALL_INTERPRETERS, 100);
    let a1 = store.add_node(1, "aaa", 0b0011, 50);
    let b1 = store.add_node(2, "bbb", 0b1100, 60);
    store.set_deps(s, [a, b]);
    store.set_deps(a1, []);
    store.set_deps(b1, []);
    store.add_edge_group(s, a, [a1]);
    store.add_edge_group(s, b, [b1]);

    let ctx = load(store);
    let outcome = resolve_one(&ctx, s, s, NameId(0), Some(100), false).unwrap();
    assert!(!outcome.resolved);
    assert_eq!(outcome.depth, -1);
}

/// Overlapping masks on the same shape succeed, and the pinned set agrees
/// on at least one interpreter bit.
#[test]
fn overlapping_masks_resolve() {
    let mut store = MemoryStore::new();
    store.add_name(0, "app");
    let a = store.add_name(1, "aaa");
    let b = store.add_name(2, "bbb");
    let s = store.add_node(0, "app", ALL_INTERPRETERS, 100);
    let a1 = store.add_node(1, "aaa", 0b0110, 50);
    let b1 = store.add_node(2, "bbb", 0b1100, 60);
    store.set_deps(s, [a, b]);
    store.set_deps(a1, []);
    store.set_deps(b1, []);
    store.add_edge_group(s, a, [a1]);
    store.add_edge_group(s, b, [b1]);

    let ctx = load(store);
    let outcome = resolve_one(&ctx, s, s, NameId(0), Some(100), true).unwrap();
    assert!(outcome.resolved);
    let tree = outcome.tree.unwrap();
    let mask = tree
        .nodes
        .iter()
        .fold(ALL_INTERPRETERS, |acc, &n| acc & ctx.node_py_mask(n).unwrap());
    assert_ne!(mask, 0);
}

/// A mask conflict surfacing only after an earlier pin forces the newest
/// candidate out via find-matches re-derivation.
#[test]
fn mask_conflict_prefers_older_compatible_version() {
    let mut store = MemoryStore::new();
    store.add_name(0, "app");
    let a = store.add_name(1, "aaa");
    let b = store.add_name(2, "bbb");
    let s = store.add_node(0, "app", ALL_INTERPRETERS, 100);
    let a1 = store.add_node(1, "aaa", 0b0011, 50);
    // Newest b is incompatible with a1; the older one overlaps.
    let b_old = store.add_node(2, "bbb", 0b0010, 30);
    let b_new = store.add_node(3, "bbb", 0b1100, 60);
    store.set_deps(s, [a, b]);
    store.set_deps(a1, []);
    store.set_deps(b_old, []);
    store.set_deps(b_new, []);
    store.add_edge_group(s, a, [a1]);
    store.add_edge_group(s, b, [b_old, b_new]);

    let ctx = load(store);
    let outcome = resolve_one(&ctx, s, s, NameId(0), Some(100), true).unwrap();
    assert!(outcome.resolved);
    assert_eq!(outcome.tree.unwrap().mapping[&b], b_old);
}

/// A demand discovered after pinning invalidates the newest choice; the
/// engine backjumps, records the incompatibility, and lands on the
/// next-newest version.
#[test]
fn backjump_retries_next_newest() {
    let mut store = MemoryStore::new();
    let app = store.add_name(0, "app");
    let k = store.add_name(1, "kkk");
    let z = store.add_name(2, "zzz");
    let s = store.add_node(0, "app", ALL_INTERPRETERS, 100);
    let k_old = store.add_node(1, "kkk", ALL_INTERPRETERS, 10);
    let k_new = store.add_node(2, "kkk", ALL_INTERPRETERS, 20);
    let z1 = store.add_node(3, "zzz", ALL_INTERPRETERS, 5);
    store.set_deps(s, [k]);
    store.set_deps(k_new, [z]);
    store.set_deps(k_old, [z]);
    store.set_deps(z1, [k]);
    store.add_edge_group(s, k, [k_old, k_new]);
    store.add_edge_group(k_new, z, [z1]);
    store.add_edge_group(k_old, z, [z1]);
    // z1 only ever worked with the older k.
    store.add_edge_group(z1, k, [k_old]);

    let ctx = load(store);
    let outcome = resolve_one(&ctx, s, s, app, Some(100), true).unwrap();
    assert!(outcome.resolved);
    let tree = outcome.tree.unwrap();
    assert_eq!(tree.mapping[&k], k_old);
    assert_eq!(tree.mapping[&z], z1);
}

#[test]
fn repeated_runs_are_identical() {
    let mut store = MemoryStore::with_chunk_size(2);
    let app = store.add_name(0, "app");
    let k = store.add_name(1, "kkk");
    let z = store.add_name(2, "zzz");
    let s = store.add_node(0, "app", ALL_INTERPRETERS, 100);
    let k_old = store.add_node(1, "kkk", ALL_INTERPRETERS, 10);
    let k_new = store.add_node(2, "kkk", ALL_INTERPRETERS, 20);
    let z1 = store.add_node(3, "zzz", ALL_INTERPRETERS, 5);
    store.set_deps(s, [k, z]);
    store.set_deps(z1, [k]);
    store.set_deps(k_old, []);
    store.set_deps(k_new, []);
    store.add_edge_group(s, k, [k_old, k_new]);
    store.add_edge_group(s, z, [z1]);
    store.add_edge_group(z1, k, [k_old]);

    let ctx = load(store);
    let runner = Runner::new(&ctx);
    let first = runner
        .resolve(s, s, app, Some(100), true, DEFAULT_MAX_ROUNDS)
        .unwrap();
    for _ in 0..10 {
        let again = runner
            .resolve(s, s, app, Some(100), true, DEFAULT_MAX_ROUNDS)
            .unwrap();
        assert_eq!(first, again);
    }
}

/// The debug tree reproduces the mapping exactly.
#[test]
fn tree_matches_mapping() {
    let mut store = MemoryStore::new();
    let app = store.add_name(0, "app");
    let lib = store.add_name(1, "lib");
    let util = store.add_name(2, "util");
    let s = store.add_node(0, "app", ALL_INTERPRETERS, 100);
    let l1 = store.add_node(1, "lib", ALL_INTERPRETERS, 40);
    let u1 = store.add_node(2, "util", ALL_INTERPRETERS, 30);
    store.set_deps(s, [lib]);
    store.set_deps(l1, [util]);
    store.set_deps(u1, []);
    store.add_edge_group(s, lib, [l1]);
    store.add_edge_group(l1, util, [u1]);

    let ctx = load(store);
    let outcome = resolve_one(&ctx, s, s, app, Some(100), true).unwrap();
    assert!(outcome.resolved);
    let tree = outcome.tree.unwrap();
    assert_eq!(
        tree.mapping,
        BTreeMap::from([(app, s), (lib, l1), (util, u1)])
    );
    // Every edge endpoint is a mapped node.
    for (src, dst) in &tree.edges {
        assert!(tree.nodes.contains(src));
        assert!(tree.nodes.contains(dst));
    }
    assert_eq!(tree.edges, vec![(s, l1), (l1, u1)]);
}

/// Candidates too new for the cutoff are never chosen; the next resolvable
/// version wins.
#[test]
fn cutoff_excludes_newer_versions() {
    let mut store = MemoryStore::new();
    let app = store.add_name(0, "app");
    let lib = store.add_name(1, "lib");
    let s = store.add_node(0, "app", ALL_INTERPRETERS, 40);
    let l_old = store.add_node(1, "lib", ALL_INTERPRETERS, 30);
    let l_new = store.add_node(2, "lib", ALL_INTERPRETERS, 90);
    store.set_deps(s, [lib]);
    store.set_deps(l_old, []);
    store.set_deps(l_new, []);
    store.add_edge_group(s, lib, [l_old, l_new]);

    let ctx = load(store);
    let outcome = resolve_one(&ctx, s, s, app, Some(40), true).unwrap();
    assert!(outcome.resolved);
    assert_eq!(outcome.tree.unwrap().mapping[&lib], l_old);
}

/// A `None` cutoff defaults to the later of the start and root upload
/// times, which can admit versions newer than the start node.
#[test]
fn default_cutoff_uses_root_time() {
    let mut store = MemoryStore::new();
    store.add_name(0, "app");
    let lib = store.add_name(1, "lib");
    let root_name = store.add_name(2, "rootpkg");
    let s = store.add_node(0, "app", ALL_INTERPRETERS, 10);
    let l1 = store.add_node(1, "lib", ALL_INTERPRETERS, 30);
    let root = store.add_node(2, "rootpkg", ALL_INTERPRETERS, 50);
    store.set_deps(s, [lib]);
    store.set_deps(l1, []);
    store.add_edge_group(s, lib, [l1]);

    let ctx = load(store);
    // At the start node's own time, lib has no version yet.
    let outcome = resolve_one(&ctx, s, root, root_name, Some(10), false).unwrap();
    assert!(!outcome.resolved);
    // The defaulted cutoff max(10, 50) admits it.
    let outcome = resolve_one(&ctx, s, root, root_name, None, false).unwrap();
    assert!(outcome.resolved);
}

/// Nodes without a meta row carry the all-observed default mask and no
/// upload time, and can never be resolved.
#[test]
fn dateless_node_is_unresolvable() {
    let mut store = MemoryStore::new();
    let app = store.add_name(0, "app");
    let s = store.add_node(0, "app", 0b0111, 10);
    let ghost = store.add_node_identity(1, "app");
    store.set_deps(s, []);

    let ctx = load(store);
    assert_eq!(ctx.node_py_mask(ghost).unwrap(), 0b0111);
    assert_eq!(ctx.node_time(ghost).unwrap(), None);

    let outcome = resolve_one(&ctx, ghost, s, app, None, false).unwrap();
    assert!(!outcome.resolved);
    assert_eq!(outcome.depth, -1);
}

/// An exhausted round limit reports unresolved rather than erroring.
#[test]
fn round_limit_reports_unresolved() {
    let mut store = MemoryStore::new();
    let app = store.add_name(0, "app");
    let lib = store.add_name(1, "lib");
    let s = store.add_node(0, "app", ALL_INTERPRETERS, 100);
    let l1 = store.add_node(1, "lib", ALL_INTERPRETERS, 50);
    store.set_deps(s, [lib]);
    store.set_deps(l1, []);
    store.add_edge_group(s, lib, [l1]);

    let ctx = load(store);
    let runner = Runner::new(&ctx);
    let outcome = runner.resolve(s, s, app, Some(100), false, 1).unwrap();
    assert!(!outcome.resolved);
    let outcome = runner
        .resolve(s, s, app, Some(100), false, DEFAULT_MAX_ROUNDS)
        .unwrap();
    assert!(outcome.resolved);
}

/// A tiny chunk cache still produces correct, repeatable answers.
#[test]
fn small_chunk_cache_is_correct() {
    let mut store = MemoryStore::with_chunk_size(1);
    let app = store.add_name(0, "app");
    let lib = store.add_name(1, "lib");
    let s = store.add_node(0, "app", ALL_INTERPRETERS, 100);
    let versions: Vec<NodeId> = (0..8)
        .map(|i| {
            let v = store.add_node(1 + i, "lib", ALL_INTERPRETERS, 10 * (1 + i as i64));
            store.set_deps(v, []);
            v
        })
        .collect();
    store.set_deps(s, [lib]);
    store.add_edge_group(s, lib, versions.clone());

    let ctx = Context::load(store, 1).unwrap();
    for cutoff in [15, 45, 100] {
        let a = collect_cursor(&ctx, s, lib, cutoff);
        let b = collect_cursor(&ctx, s, lib, cutoff);
        assert_eq!(a, b);
    }
    let outcome = resolve_one(&ctx, s, s, app, Some(100), true).unwrap();
    assert!(outcome.resolved);
    assert_eq!(outcome.tree.unwrap().mapping[&lib], versions[7]);
}

/// For the root's own name, candidate enumeration substitutes the pinned
/// root for whatever edges the source actually carries.
#[test]
fn provider_substitutes_root_candidate() {
    let mut store = MemoryStore::new();
    store.add_name(0, "app");
    let lib = store.add_name(1, "lib");
    let s = store.add_node(0, "app", ALL_INTERPRETERS, 100);
    let v1 = store.add_node(1, "lib", ALL_INTERPRETERS, 10);
    let v2 = store.add_node(2, "lib", ALL_INTERPRETERS, 20);
    let pinned = store.add_node(3, "lib", ALL_INTERPRETERS, 15);
    store.add_edge_group(s, lib, [v1, v2]);

    let ctx = load(store);
    let provider = GraphProvider::new(&ctx, s, pinned, lib, 100);
    assert_eq!(
        provider.candidates_newest_first(s, lib).unwrap(),
        vec![pinned]
    );

    // Past the cutoff the pinned root disappears entirely.
    let provider = GraphProvider::new(&ctx, s, pinned, lib, 12);
    assert_eq!(
        provider.candidates_newest_first(s, lib).unwrap(),
        Vec::<NodeId>::new()
    );
}

/// The production store loads the same shapes the in-memory store does.
#[test]
fn sqlite_store_round_trip() {
    let conn = rusqlite::Connection::open_in_memory().unwrap();
    conn.execute_batch(
        r#"
        CREATE TABLE names (id INTEGER, name TEXT);
        CREATE TABLE nodes (id INTEGER, name TEXT);
        CREATE TABLE node_meta (node_id INTEGER, py_mask INTEGER, first_upload_time INTEGER);
        CREATE TABLE adj_deps (node_id INTEGER, deps TEXT);
        CREATE TABLE adj_headers (
            src_id INTEGER, dep_name_id INTEGER, mi TEXT, ma TEXT, n TEXT, total INTEGER
        );
        CREATE TABLE adj_chunks (src_id INTEGER, dep_name_id INTEGER, chunk INTEGER, dst_ids TEXT);

        INSERT INTO names VALUES (0, 'app'), (1, 'lib');
        INSERT INTO nodes VALUES (0, 'app'), (1, 'lib'), (2, 'lib');
        INSERT INTO node_meta VALUES (0, 67108863, 100), (1, 67108863, 10), (2, 67108863, 20);
        INSERT INTO adj_deps VALUES (0, '[1]'), (1, '[]'), (2, '[]');
        INSERT INTO adj_headers VALUES (0, 1, '[10]', '[20]', '[2]', 2);
        INSERT INTO adj_chunks VALUES (0, 1, 0, '[1,2]');
        "#,
    )
    .unwrap();

    let ctx = Context::load(SqliteStore::from_connection(conn), 16).unwrap();
    assert_eq!(ctx.name_id("lib"), Some(NameId(1)));
    assert_eq!(
        collect_cursor(&ctx, NodeId(0), NameId(1), 100),
        vec![NodeId(2), NodeId(1)]
    );

    let outcome = resolve_one(&ctx, NodeId(0), NodeId(2), NameId(1), Some(100), true).unwrap();
    assert!(outcome.resolved);
    assert_eq!(outcome.depth, 1);
    assert_eq!(outcome.tree.unwrap().mapping[&NameId(1)], NodeId(2));
}

/// Package names are canonicalized before lookup.
#[test]
fn name_lookup_is_canonical() {
    let mut store = MemoryStore::new();
    let lib = store.add_name(0, "typing-extensions");
    store.add_node(0, "typing-extensions", ALL_INTERPRETERS, 1);

    let ctx = load(store);
    assert_eq!(ctx.name_id("Typing.Extensions"), Some(lib));
    assert_eq!(ctx.name_id("typing__extensions"), Some(lib));
    assert_eq!(ctx.name_id("typing extensions"), None);
}
