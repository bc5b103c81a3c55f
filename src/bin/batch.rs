// SPDX-License-Identifier: MPL-2.0

//! Resolve every node of a subgraph against one pinned root version.
//!
//! Streams the subgraph's edge rows, keeps the nodes whose edges carry
//! the selected root-version bit, resolves each node with a per-node
//! cutoff of `max(node_time, root_time)`, and writes a CSV of
//! `node_id,resolved,depth`. With `--debug`, one JSON tree per resolved
//! node is written next to the CSV.

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use anyhow::{bail, Context as _};
use clap::Parser;
use log::info;
use rusqlite::Connection;

use hindsight::{
    Context, NodeId, Runner, SqliteStore, DEFAULT_CHUNK_CACHE_CAPACITY, DEFAULT_MAX_ROUNDS,
};

#[derive(Parser)]
#[command(
    name = "hindsight-batch",
    about = "Run root-pinned resolution for all nodes in a subgraph (one root bit)"
)]
struct Args {
    /// SQLite database holding the preprocessed package-version graph.
    #[arg(long)]
    graph_db: PathBuf,

    /// SQLite database holding subgraph edge tables and their meta tables.
    #[arg(long)]
    subgraph_db: PathBuf,

    /// Subgraph table name (its meta table is `<subgraph>__meta`).
    #[arg(long)]
    subgraph: String,

    /// Root version bit index; defaults to the newest root version.
    #[arg(long)]
    root_bit_index: Option<usize>,

    /// Output directory for the CSV and optional tree files.
    #[arg(long, default_value = "output")]
    output_dir: PathBuf,

    /// Capacity of the chunk-body LRU.
    #[arg(long, default_value_t = DEFAULT_CHUNK_CACHE_CAPACITY)]
    chunk_cache_cap: usize,

    /// Bound on resolution rounds per node.
    #[arg(long, default_value_t = DEFAULT_MAX_ROUNDS)]
    max_rounds: usize,

    /// Write one JSON dependency tree per resolved node.
    #[arg(long)]
    debug: bool,
}

struct RootMeta {
    pkg: String,
    versions: Vec<String>,
    ids: Vec<u32>,
}

fn load_root_meta(conn: &Connection, subgraph: &str) -> anyhow::Result<RootMeta> {
    let table = format!("{subgraph}__meta");
    let (pkg, versions, ids): (String, String, String) = conn
        .query_row(
            &format!(r#"SELECT pkg, root_versions, root_ids FROM "{table}" LIMIT 1"#),
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .with_context(|| format!("meta table {table} is empty or unreadable"))?;
    let versions: Vec<String> = serde_json::from_str(&versions).context("bad root_versions")?;
    let ids: Vec<u32> = serde_json::from_str(&ids).context("bad root_ids")?;
    if pkg.is_empty() || versions.is_empty() || versions.len() != ids.len() {
        bail!("bad meta row: missing pkg/root_versions/root_ids or length mismatch");
    }
    Ok(RootMeta { pkg, versions, ids })
}

fn bit_is_set(bits: &[u8], index: usize) -> bool {
    bits.get(index / 8)
        .is_some_and(|byte| byte >> (index % 8) & 1 == 1)
}

/// Distinct node ids of every edge carrying the given root bit.
fn collect_subgraph_nodes(
    conn: &Connection,
    subgraph: &str,
    bit: usize,
) -> anyhow::Result<BTreeSet<u32>> {
    let mut stmt =
        conn.prepare(&format!(r#"SELECT src_id, dst_id, roots_bits FROM "{subgraph}""#))?;
    let mut rows = stmt.query([])?;
    let mut nodes = BTreeSet::new();
    while let Some(row) = rows.next()? {
        let bits: Vec<u8> = row.get(2)?;
        if bit_is_set(&bits, bit) {
            nodes.insert(row.get::<_, u32>(0)?);
            nodes.insert(row.get::<_, u32>(1)?);
        }
    }
    Ok(nodes)
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let sub_conn = Connection::open(&args.subgraph_db)
        .with_context(|| format!("opening {}", args.subgraph_db.display()))?;
    let meta = load_root_meta(&sub_conn, &args.subgraph)?;
    let bit = args.root_bit_index.unwrap_or(meta.versions.len() - 1);
    if bit >= meta.versions.len() {
        bail!(
            "--root-bit-index out of range: {bit}, valid: 0..{}",
            meta.versions.len() - 1
        );
    }
    let root_id = NodeId(meta.ids[bit]);
    info!(
        "root: pkg={} ver={} bit={bit} node={root_id}",
        meta.pkg, meta.versions[bit]
    );

    info!("loading resolution context from {}", args.graph_db.display());
    let store = SqliteStore::open(&args.graph_db)?;
    let ctx = Context::load(store, args.chunk_cache_cap)?;
    let root_name_id = ctx
        .name_id(&meta.pkg)
        .with_context(|| format!("root package {:?} not found in names", meta.pkg))?;
    let root_time = ctx
        .node_time(root_id)?
        .context("root node has no upload time")?;

    let nodes = collect_subgraph_nodes(&sub_conn, &args.subgraph, bit)?;
    info!("{} subgraph nodes for bit {bit}", nodes.len());

    fs::create_dir_all(&args.output_dir)?;
    let csv_path = args
        .output_dir
        .join(format!("{}_{bit}.csv", args.subgraph));
    let mut csv = BufWriter::new(File::create(&csv_path)?);
    writeln!(csv, "node_id,resolved,depth")?;

    let trees_dir = args
        .output_dir
        .join(format!("{}_{bit}_resolved_trees", args.subgraph));
    if args.debug {
        fs::create_dir_all(&trees_dir)?;
    }

    let runner = Runner::new(&ctx);
    let (mut resolved, mut reached, mut unreached, mut failed) = (0u64, 0u64, 0u64, 0u64);

    for &raw in &nodes {
        let node = NodeId(raw);
        let Ok(Some(time)) = ctx.node_time(node) else {
            writeln!(csv, "{node},false,")?;
            failed += 1;
            continue;
        };
        let cutoff = time.max(root_time);
        let outcome = runner.resolve(
            node,
            root_id,
            root_name_id,
            Some(cutoff),
            args.debug,
            args.max_rounds,
        )?;
        if outcome.depth >= 0 {
            writeln!(csv, "{node},{},{}", outcome.resolved, outcome.depth)?;
        } else {
            writeln!(csv, "{node},{},", outcome.resolved)?;
        }
        if outcome.resolved {
            resolved += 1;
            if outcome.depth >= 0 {
                reached += 1;
            } else {
                unreached += 1;
            }
            if let Some(tree) = &outcome.tree {
                let file = File::create(trees_dir.join(format!("{node}.json")))?;
                serde_json::to_writer(BufWriter::new(file), tree)?;
            }
        } else {
            failed += 1;
        }
    }
    csv.flush()?;

    println!("wrote {}", csv_path.display());
    println!("total nodes processed:      {}", nodes.len());
    println!("resolved:                   {resolved}");
    println!("resolved, root reached:     {reached}");
    println!("resolved, root not reached: {unreached}");
    println!("not resolved:               {failed}");
    Ok(())
}
