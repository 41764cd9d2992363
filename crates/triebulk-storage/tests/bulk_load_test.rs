//! End-to-end tests for trie-buffered bulk loading.
//!
//! Covers:
//! - Completeness of the finished index against the ingested postings
//! - Key order and routing bounds over the whole tree
//! - Conservation of postings across leaf and chain splits
//! - Hot keys whose chains split next to smaller keys
//! - Prefix routing of buffered keys
//! - Write-back of evicted nodes and reopening a finished index
//! - The documented insertion scenarios and both key-failure policies

use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tempfile::tempdir;

use triebulk_common::bits::get_bit;
use triebulk_common::{
    BufferConfig, DocId, EngineConfig, IndexConfig, Key, KeyFailurePolicy, NodeId, Posting,
    TrieBulkError, SENTINEL_KEY,
};
use triebulk_storage::{
    BTreeIndex, ChildRef, Document, IngestDriver, KeyBuffer, VecSource, TRIE_ROOT,
};

// =============================================================================
// Helpers
// =============================================================================

fn tiny_config(dir: &Path) -> EngineConfig {
    EngineConfig {
        data_dir: dir.to_path_buf(),
        index_name: "words".to_string(),
        index: IndexConfig {
            node_entries: 8,
            max_tree_height: 12,
            cache_nodes: 16,
            fsync_enabled: false,
        },
        buffer: BufferConfig {
            bucket_capacity: 4,
            max_buckets: 3,
        },
        ..EngineConfig::default()
    }
}

fn reopen(config: &EngineConfig) -> BTreeIndex {
    BTreeIndex::open(&config.index, &config.index_path(), &config.size_path()).unwrap()
}

/// What a full walk of the tree found.
struct TreeScan {
    postings: Vec<Posting>,
    leaf_depths: BTreeSet<usize>,
    leaves: usize,
}

/// Walks every node, checking key order and routing bounds on the way.
///
/// Keys of a child lie in `[previous separator, separator]`; the lower bound
/// is inclusive because a long document chain may continue in the next leaf.
fn scan_tree(index: &mut BTreeIndex) -> TreeScan {
    let mut scan = TreeScan {
        postings: Vec::new(),
        leaf_depths: BTreeSet::new(),
        leaves: 0,
    };
    // (node, lower bound, upper bound, depth)
    let mut stack = vec![(NodeId::ROOT, 0u32, SENTINEL_KEY, 1usize)];

    while let Some((id, lower, upper, depth)) = stack.pop() {
        let node = index.read_node(id).unwrap();
        assert_eq!(node.id(), id);

        if node.is_leaf() {
            assert_eq!(node.max_key(), upper, "leaf {} max key", id.0);
            let groups = node.leaf_groups().unwrap();
            assert!(!groups.is_empty(), "empty leaf {}", id.0);
            for pair in groups.windows(2) {
                assert!(pair[0].0 < pair[1].0, "leaf {} keys out of order", id.0);
            }
            for (key, docs) in groups {
                assert!(key >= lower && key <= upper, "key {} outside leaf {}", key, id.0);
                scan.postings
                    .extend(docs.into_iter().map(|doc| Posting::new(key, doc)));
            }
            scan.leaf_depths.insert(depth);
            scan.leaves += 1;
            continue;
        }

        let entries = node.live_entries();
        if id == NodeId::ROOT && entries.is_empty() {
            continue;
        }
        assert!(!entries.is_empty(), "empty routing node {}", id.0);
        assert_eq!(node.max_key(), upper, "node {} max key", id.0);
        assert_eq!(entries[entries.len() - 1].value, upper);

        let mut child_lower = lower;
        for entry in entries {
            assert!(entry.value >= child_lower, "separators out of order in {}", id.0);
            stack.push((NodeId(entry.link), child_lower, entry.value, depth + 1));
            child_lower = entry.value;
        }
    }

    scan.postings.sort_unstable();
    scan
}

fn expected_postings(docs: &[Document]) -> Vec<Posting> {
    let mut all: Vec<Posting> = docs
        .iter()
        .flat_map(|d| d.keys.iter().map(move |&k| Posting::new(k, d.doc_id)))
        .collect();
    all.sort_unstable();
    all
}

fn random_documents(rng: &mut StdRng, count: u32, max_keys: usize) -> Vec<Document> {
    (1..=count)
        .map(|doc_id| {
            let n = rng.gen_range(0..=max_keys);
            let keys: BTreeSet<Key> = (0..n)
                .map(|_| {
                    if rng.gen_bool(0.5) {
                        rng.gen_range(0..64)
                    } else {
                        rng.gen()
                    }
                })
                .collect();
            Document::new(doc_id, keys.into_iter().collect())
        })
        .collect()
}

fn ingest(config: &EngineConfig, docs: &[Document]) -> triebulk_storage::IngestStats {
    let mut driver = IngestDriver::open(config.clone()).unwrap();
    let mut source = VecSource::new(docs.to_vec());
    driver.ingest_all(&mut source).unwrap();
    driver.finish().unwrap()
}

/// Keys that recur across most documents in the hot-key workloads.
const HOT_KEYS: [Key; 4] = [660, 694, 793, 837];

fn with_node_entries(dir: &Path, node_entries: usize) -> EngineConfig {
    let mut config = tiny_config(dir);
    config.index.node_entries = node_entries;
    config
}

/// Documents where 694 is in most documents and the other hot keys come
/// and go, with a few sparse keys mixed in.
fn hot_key_documents(rng: &mut StdRng, count: u32) -> Vec<Document> {
    (1..=count)
        .map(|doc_id| {
            let mut keys = BTreeSet::new();
            if rng.gen_bool(0.7) {
                keys.insert(694);
            }
            for &key in &[660, 793, 837] {
                if rng.gen_bool(0.3) {
                    keys.insert(key);
                }
            }
            for _ in 0..rng.gen_range(0..3) {
                keys.insert(rng.gen_range(0..2000));
            }
            Document::new(doc_id, keys.into_iter().collect())
        })
        .collect()
}

/// Looks up every distinct key and compares the documents found.
fn assert_lookups_complete(index: &mut BTreeIndex, expected: &[Posting]) {
    let mut by_key: BTreeMap<Key, Vec<DocId>> = BTreeMap::new();
    for posting in expected {
        by_key.entry(posting.key).or_default().push(posting.doc_id);
    }
    for (key, mut docs) in by_key {
        let mut found = index.lookup(key).unwrap();
        found.sort_unstable();
        docs.sort_unstable();
        assert_eq!(found, docs, "key {}", key);
    }
}

// =============================================================================
// Completeness, order and conservation
// =============================================================================

#[test]
fn test_completeness_random_workload() {
    let dir = tempdir().unwrap();
    let config = tiny_config(dir.path());
    let mut rng = StdRng::seed_from_u64(0x7121);
    let docs = random_documents(&mut rng, 60, 25);
    let expected = expected_postings(&docs);

    let stats = ingest(&config, &docs);
    assert_eq!(stats.documents, 60);
    assert_eq!(stats.keys, expected.len() as u64);
    assert_eq!(stats.skipped_keys, 0);
    assert_eq!(stats.index.keys_inserted, expected.len() as u64);
    assert!(stats.buffer.evictions > 0);
    assert!(stats.index.leaf_splits > 0);

    let mut index = reopen(&config);
    let scan = scan_tree(&mut index);
    assert_eq!(scan.postings, expected);
    assert_eq!(scan.leaf_depths.len(), 1, "leaves at different depths");
    assert_eq!(scan.leaf_depths.iter().next().copied(), Some(index.height()));

    for posting in expected.iter().step_by(7) {
        let docs = index.lookup(posting.key).unwrap();
        assert!(docs.contains(&posting.doc_id), "key {} lost doc", posting.key);
    }
}

#[test]
fn test_split_conservation_long_chain() {
    // One key in every document: its chain has to spread over many leaves.
    let dir = tempdir().unwrap();
    let config = tiny_config(dir.path());
    let docs: Vec<Document> = (1..=40)
        .map(|doc| Document::new(doc, vec![500, 500 + doc]))
        .collect();
    let expected = expected_postings(&docs);
    ingest(&config, &docs);

    let mut index = reopen(&config);
    let scan = scan_tree(&mut index);
    assert_eq!(scan.postings, expected);
    assert!(scan.leaves > 1);

    let mut chain = index.lookup(500).unwrap();
    chain.sort_unstable();
    assert_eq!(chain, (1..=40).collect::<Vec<_>>());
}

#[test]
fn test_hot_keys_split_beside_their_sibling() {
    // 694's chain splits early, smaller keys are routed into the split-off
    // leaf, and later splits repeat 694 as a separator.
    let dir = tempdir().unwrap();
    let config = with_node_entries(dir.path(), 10);
    let mut rng = StdRng::seed_from_u64(33);
    let docs = hot_key_documents(&mut rng, 400);
    let expected = expected_postings(&docs);

    let stats = ingest(&config, &docs);
    assert_eq!(stats.skipped_keys, 0);
    assert!(stats.index.leaf_splits > 0);

    let mut index = reopen(&config);
    let scan = scan_tree(&mut index);
    assert_eq!(scan.postings, expected);
    assert_eq!(scan.leaf_depths.len(), 1, "leaves at different depths");
    assert_lookups_complete(&mut index, &expected);
}

#[test]
fn test_hot_keys_across_node_sizes() {
    for node_entries in [8, 9, 10, 12] {
        for seed in [2u64, 33, 71] {
            let dir = tempdir().unwrap();
            let config = with_node_entries(dir.path(), node_entries);
            let mut rng = StdRng::seed_from_u64(seed);
            let docs = hot_key_documents(&mut rng, 200);
            let expected = expected_postings(&docs);
            ingest(&config, &docs);

            let mut index = reopen(&config);
            let scan = scan_tree(&mut index);
            assert_eq!(
                scan.postings, expected,
                "node_entries {} seed {}",
                node_entries, seed
            );
            assert_lookups_complete(&mut index, &expected);
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_every_posting_is_indexed(
        docs in prop::collection::vec(
            prop::collection::btree_set(prop_oneof![0u32..48, any::<u32>()], 0..16),
            1..24,
        )
    ) {
        let dir = tempdir().unwrap();
        let config = tiny_config(dir.path());
        let docs: Vec<Document> = docs
            .into_iter()
            .enumerate()
            .map(|(i, keys)| Document::new(i as u32, keys.into_iter().collect()))
            .collect();
        let expected = expected_postings(&docs);
        ingest(&config, &docs);

        let mut index = reopen(&config);
        let scan = scan_tree(&mut index);
        prop_assert_eq!(scan.postings, expected);
        prop_assert!(scan.leaf_depths.len() <= 1);
    }

    #[test]
    fn prop_hot_keys_are_fully_indexed(
        node_entries in prop::sample::select(vec![8usize, 9, 10, 12]),
        docs in prop::collection::vec(
            prop::collection::btree_set(
                prop_oneof![
                    3 => prop::sample::select(HOT_KEYS.to_vec()),
                    1 => 0u32..2000,
                ],
                0..6,
            ),
            1..120,
        )
    ) {
        let dir = tempdir().unwrap();
        let config = with_node_entries(dir.path(), node_entries);
        let docs: Vec<Document> = docs
            .into_iter()
            .enumerate()
            .map(|(i, keys)| Document::new(i as u32, keys.into_iter().collect()))
            .collect();
        let expected = expected_postings(&docs);
        ingest(&config, &docs);

        let mut index = reopen(&config);
        let scan = scan_tree(&mut index);
        prop_assert_eq!(&scan.postings, &expected);
        prop_assert!(scan.leaf_depths.len() <= 1);
        assert_lookups_complete(&mut index, &expected);
    }
}

// =============================================================================
// Key buffer routing
// =============================================================================

#[test]
fn test_buffered_keys_follow_trie_bits() {
    let mut buffer = KeyBuffer::new(BufferConfig {
        bucket_capacity: 6,
        max_buckets: 8,
    })
    .unwrap();
    let mut sink: Vec<Posting> = Vec::new();
    let mut rng = StdRng::seed_from_u64(99);
    let mut inserted = Vec::new();
    for doc in 0..300u32 {
        let key: Key = if doc % 3 == 0 { rng.gen_range(0..32) } else { rng.gen() };
        buffer.insert(key, doc, &mut sink).unwrap();
        inserted.push(Posting::new(key, doc));
    }

    // Every bucket key carries the branch bit of each node above it.
    let mut stack = vec![(TRIE_ROOT, 0u32, Vec::<(u32, u8)>::new())];
    let mut seen_buckets = 0;
    while let Some((node_id, depth, mut bits)) = stack.pop() {
        let node = *buffer.trie().node(node_id);
        for (dir, child) in node.children.iter().enumerate() {
            bits.push((depth, dir as u8));
            match *child {
                ChildRef::Empty => {}
                ChildRef::Node(next) => {
                    let next_depth = depth + buffer.trie().node(next).edge_len as u32;
                    assert!(next_depth > depth);
                    stack.push((next, next_depth, bits.clone()));
                }
                ChildRef::Bucket(id) => {
                    seen_buckets += 1;
                    let bucket = buffer.bucket(id);
                    assert!(!bucket.is_empty());
                    for posting in bucket.entries() {
                        for &(bit, value) in &bits {
                            assert_eq!(get_bit(posting.key, bit), value);
                        }
                    }
                }
            }
            bits.pop();
        }
    }
    assert_eq!(seen_buckets, buffer.live_buckets());

    buffer.drain_all(&mut sink).unwrap();
    sink.sort_unstable();
    inserted.sort_unstable();
    assert_eq!(sink, inserted);
}

// =============================================================================
// Node cache write-back and reopen
// =============================================================================

#[test]
fn test_round_trip_after_forced_eviction() {
    let dir = tempdir().unwrap();
    let config = tiny_config(dir.path());
    let mut index = reopen(&config);
    for key in 0..400u32 {
        index.insert(key * 3, key + 1).unwrap();
    }
    assert!(index.node_count() as usize > config.index.cache_nodes);
    assert!(index.cache_stats().dirty_writebacks > 0);
    index.finalize().unwrap();
    let nodes = index.node_count();
    let height = index.height();
    drop(index);

    let mut index = reopen(&config);
    assert_eq!(index.node_count(), nodes);
    assert_eq!(index.height(), height);
    for key in (0..400u32).step_by(13) {
        assert_eq!(index.lookup(key * 3).unwrap(), vec![key + 1]);
        assert!(index.lookup(key * 3 + 1).unwrap().is_empty());
    }
    let scan = scan_tree(&mut index);
    assert_eq!(scan.postings.len(), 400);
}

#[test]
fn test_second_run_extends_index() {
    let dir = tempdir().unwrap();
    let config = tiny_config(dir.path());
    let first = vec![Document::new(1, vec![10, 20, 30])];
    let second = vec![Document::new(2, vec![20, 25])];
    ingest(&config, &first);
    ingest(&config, &second);

    let mut index = reopen(&config);
    let mut docs = index.lookup(20).unwrap();
    docs.sort_unstable();
    assert_eq!(docs, vec![1, 2]);
    assert_eq!(index.lookup(25).unwrap(), vec![2]);
    assert_eq!(index.lookup(10).unwrap(), vec![1]);
}

// =============================================================================
// Scenarios
// =============================================================================

#[test]
fn test_scenario_a_single_leaf_split() {
    let dir = tempdir().unwrap();
    let mut config = tiny_config(dir.path());
    config.index.node_entries = 10;
    let mut index = reopen(&config);
    for key in [10, 20, 30, 40, 50] {
        index.insert(key, 1).unwrap();
    }
    assert_eq!(index.stats().leaf_splits, 1);

    let root = index.read_node(NodeId::ROOT).unwrap();
    let seps: Vec<Key> = root.live_entries().iter().map(|e| e.value).collect();
    assert_eq!(seps, vec![20, SENTINEL_KEY]);

    let left = index.read_node(NodeId(root.live_entries()[0].link)).unwrap();
    let right = index.read_node(NodeId(root.live_entries()[1].link)).unwrap();
    let keys = |groups: Vec<(Key, Vec<u32>)>| groups.into_iter().map(|g| g.0).collect::<Vec<_>>();
    assert_eq!(keys(left.leaf_groups().unwrap()), vec![10, 20]);
    assert_eq!(left.max_key(), 20);
    assert_eq!(keys(right.leaf_groups().unwrap()), vec![30, 40, 50]);
    assert_eq!(right.max_key(), SENTINEL_KEY);
}

#[test]
fn test_scenario_b_shared_key_chain() {
    let dir = tempdir().unwrap();
    let config = tiny_config(dir.path());
    let mut index = reopen(&config);
    index.insert(25, 2).unwrap();
    index.reset_path();
    index.insert(25, 3).unwrap();

    let leaf = index.read_node(index.path().tail()).unwrap();
    let groups = leaf.leaf_groups().unwrap();
    assert_eq!(groups.len(), 1);
    let (key, mut docs) = groups[0].clone();
    docs.sort_unstable();
    assert_eq!((key, docs), (25, vec![2, 3]));
}

#[test]
fn test_scenario_c_one_eviction_of_sparser_bucket() {
    let dir = tempdir().unwrap();
    let config = tiny_config(dir.path());
    let mut index = reopen(&config);
    let mut buffer = KeyBuffer::new(BufferConfig {
        bucket_capacity: 3,
        max_buckets: 2,
    })
    .unwrap();

    let lone = 0x8000_0001;
    buffer.insert(lone, 1, &mut index).unwrap();
    for key in [0x10, 0x20, 0x30] {
        buffer.insert(key, 1, &mut index).unwrap();
    }
    assert_eq!(buffer.stats().evictions, 0);
    assert_eq!(index.stats().keys_inserted, 0);

    // The full bucket needs a sibling; the single-key bucket makes room.
    buffer.insert(0x31, 1, &mut index).unwrap();
    assert_eq!(buffer.stats().evictions, 1);
    assert_eq!(index.stats().keys_inserted, 1);
    assert_eq!(buffer.buffered(), 4);
    assert_eq!(buffer.trie().root().children[1], ChildRef::Empty);
    assert_eq!(index.lookup(lone).unwrap(), vec![1]);
    assert!(index.lookup(0x31).unwrap().is_empty());
}

// =============================================================================
// Key failure policies
// =============================================================================

#[test]
fn test_skip_policy_keeps_good_keys() {
    let dir = tempdir().unwrap();
    let config = tiny_config(dir.path());
    let mut driver = IngestDriver::open(config.clone()).unwrap();
    driver.ingest_document(1, &[5, 9, 7, 11]).unwrap();
    driver.ingest_document(2, &[1]).unwrap();
    let stats = driver.finish().unwrap();
    assert_eq!(stats.skipped_keys, 1);
    assert_eq!(stats.index.keys_inserted, 4);

    let mut index = reopen(&config);
    assert!(index.lookup(7).unwrap().is_empty());
    assert_eq!(index.lookup(11).unwrap(), vec![1]);
}

#[test]
fn test_abort_policy_stops_run() {
    let dir = tempdir().unwrap();
    let mut config = tiny_config(dir.path());
    config.on_key_failure = KeyFailurePolicy::Abort;
    let mut driver = IngestDriver::open(config).unwrap();
    let mut source = VecSource::new(vec![
        Document::new(1, vec![1, 2]),
        Document::new(2, vec![4, 4]),
        Document::new(3, vec![6]),
    ]);
    let err = driver.ingest_all(&mut source).unwrap_err();
    assert!(matches!(err, TrieBulkError::KeyOutOfOrder { key: 4, previous: 4 }));
    assert_eq!(source.remaining(), 1);
    assert_eq!(driver.stats().documents, 2);
}
