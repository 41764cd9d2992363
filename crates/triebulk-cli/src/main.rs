use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;
use triebulk_common::{EngineConfig, Key, KeyFailurePolicy, NodeId};
use triebulk_storage::{
    hash_word, BTreeIndex, BTreeNode, FileRangeSource, IngestDriver, WordHasher,
};

#[derive(Parser, Debug)]
#[command(name = "triebulk", about = "Online bulk loading of a disk-resident B-tree")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Location and layout of an index.
#[derive(Args, Debug)]
struct IndexArgs {
    /// Directory holding the index files
    #[arg(long)]
    data_dir: Option<PathBuf>,
    /// Base name of the index files
    #[arg(long)]
    index_name: Option<String>,
    /// Path to config file (JSON)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Entry cells per node record
    #[arg(long)]
    node_entries: Option<usize>,
    /// Nodes kept in memory, 0 to size from available RAM
    #[arg(long)]
    cache_nodes: Option<usize>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Index the words of a numbered range of text files.
    Build {
        #[command(flatten)]
        index: IndexArgs,
        /// Directory holding the input files
        #[arg(long)]
        input_dir: PathBuf,
        /// File name prefix before the number
        #[arg(long, default_value = "")]
        prefix: String,
        /// First file number
        #[arg(long)]
        first: u32,
        /// Last file number, inclusive
        #[arg(long)]
        last: u32,
        /// File name suffix after the number, e.g. ".txt"
        #[arg(long, default_value = "")]
        ext: String,
        /// Subtracted from the file number to get the document id
        #[arg(long, default_value_t = 0)]
        doc_id_delta: u32,
        /// Postings per buffer bucket
        #[arg(long)]
        bucket_capacity: Option<usize>,
        /// Number of buffer buckets
        #[arg(long)]
        max_buckets: Option<usize>,
        /// Drop common English words
        #[arg(long)]
        stop_words: bool,
        /// Stop at the first key that cannot be buffered
        #[arg(long)]
        abort_on_key_failure: bool,
        /// Dump the key buffer next to the index before draining it
        #[arg(long)]
        snapshot: bool,
    },

    /// List the documents containing a word or raw key.
    Query {
        #[command(flatten)]
        index: IndexArgs,
        /// Word to look up
        #[arg(long, conflicts_with = "key")]
        word: Option<String>,
        /// Raw 32-bit key to look up
        #[arg(long)]
        key: Option<Key>,
    },

    /// Print the size and shape of an index.
    Stats {
        #[command(flatten)]
        index: IndexArgs,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Build {
            index,
            input_dir,
            prefix,
            first,
            last,
            ext,
            doc_id_delta,
            bucket_capacity,
            max_buckets,
            stop_words,
            abort_on_key_failure,
            snapshot,
        } => {
            let mut config = load_config(&index)?;
            if let Some(capacity) = bucket_capacity {
                config.buffer.bucket_capacity = capacity;
            }
            if let Some(buckets) = max_buckets {
                config.buffer.max_buckets = buckets;
            }
            if abort_on_key_failure {
                config.on_key_failure = KeyFailurePolicy::Abort;
            }
            config.write_snapshot |= snapshot;

            let hasher = if stop_words {
                WordHasher::with_stop_words()
            } else {
                WordHasher::new()
            };
            let mut source =
                FileRangeSource::new(&input_dir, prefix, first, last, ext, doc_id_delta)?
                    .with_hasher(hasher);
            cmd_build(config, &mut source)?;
        }
        Commands::Query { index, word, key } => {
            let config = load_config(&index)?;
            let key = match (word, key) {
                (Some(word), _) => hash_word(word.as_bytes()),
                (None, Some(key)) => key,
                (None, None) => bail!("either --word or --key is required"),
            };
            cmd_query(&config, key)?;
        }
        Commands::Stats { index } => {
            let config = load_config(&index)?;
            cmd_stats(&config)?;
        }
    }

    Ok(())
}

/// Reads the optional JSON config and applies command-line overrides.
fn load_config(args: &IndexArgs) -> anyhow::Result<EngineConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let s = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            serde_json::from_str(&s)
                .with_context(|| format!("parsing config {}", path.display()))?
        }
        None => EngineConfig::default(),
    };
    if let Some(dir) = &args.data_dir {
        config.data_dir = dir.clone();
    }
    if let Some(name) = &args.index_name {
        config.index_name = name.clone();
    }
    if let Some(entries) = args.node_entries {
        config.index.node_entries = entries;
    }
    if let Some(nodes) = args.cache_nodes {
        config.index.cache_nodes = nodes;
    }
    config.validate()?;
    Ok(config)
}

fn cmd_build(config: EngineConfig, source: &mut FileRangeSource) -> anyhow::Result<()> {
    let mut driver = IngestDriver::open(config).context("opening index")?;
    let documents = driver.ingest_all(source)?;
    info!(
        documents,
        missing_files = source.missing_files(),
        "all input files read"
    );
    let stats = driver.finish()?;

    println!("documents:        {}", stats.documents);
    println!("keys:             {}", stats.keys);
    println!("skipped keys:     {}", stats.skipped_keys);
    println!("postings indexed: {}", stats.index.keys_inserted);
    println!("tree height:      {}", stats.index.height);
    println!(
        "splits:           {} leaf, {} internal, {} root",
        stats.index.leaf_splits, stats.index.internal_splits, stats.index.root_splits
    );
    println!(
        "buffer:           {} bucket splits, {} evictions",
        stats.buffer.bucket_splits, stats.buffer.evictions
    );
    println!(
        "node cache:       {} hits, {} misses, {} dirty writebacks",
        stats.cache.hits, stats.cache.misses, stats.cache.dirty_writebacks
    );
    Ok(())
}

fn open_existing(config: &EngineConfig) -> anyhow::Result<BTreeIndex> {
    let path = config.index_path();
    if !path.exists() {
        bail!("no index at {}", path.display());
    }
    BTreeIndex::open(&config.index, &path, &config.size_path())
        .with_context(|| format!("opening index {}", path.display()))
}

fn cmd_query(config: &EngineConfig, key: Key) -> anyhow::Result<()> {
    let mut index = open_existing(config)?;
    let mut docs = index.lookup(key)?;
    docs.sort_unstable();

    println!("key {:#010x}: {} documents", key, docs.len());
    for doc in docs {
        println!("  {}", doc);
    }
    Ok(())
}

fn cmd_stats(config: &EngineConfig) -> anyhow::Result<()> {
    let mut index = open_existing(config)?;
    let root = index.read_node(NodeId::ROOT)?;

    println!("index:        {}", config.index_path().display());
    println!("nodes:        {}", index.node_count());
    println!("height:       {}", index.height());
    println!("root entries: {}", root.keys_count());
    println!("record bytes: {}", BTreeNode::record_size(config.index.node_entries));
    Ok(())
}
