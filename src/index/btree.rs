//! Disk-resident B-Tree
//!
//! ## Design Principles
//! - **Disk-First**: every node lives in its own 512-byte block and is read
//!   through the [`NodeStore`] on each visit
//! - **Classic B-Tree**: entries live in internal nodes too; a split moves
//!   the median entry up into the parent instead of copying it
//! - **Explicit paths**: insertion records the block ids it descended through
//!   and walks that list back up to promote split medians
//! - **Unique keys**: inserting an existing key fails with `DuplicateKey`
//!
//! ## Split
//! ```text
//! overfull node (20 entries):  e0 .. e9 | e10 | e11 .. e19
//!                              left (10)  up    right (9)
//! ```
//! For an internal node the 21 children follow their keys: the left node
//! keeps `children[0..=10]`, the right node takes `children[11..=20]`.

use crate::config::IndexConfig;
use crate::storage::codec::{Node, MAX_KEYS, NULL_BLOCK};
use crate::storage::node_store::NodeStore;
use crate::{IndexError, Result};
use std::path::Path;
use tracing::debug;

/// Index of the median entry in an overfull node
pub const SPLIT_MID: usize = (MAX_KEYS + 1) / 2;

/// B-Tree statistics
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct TreeStats {
    /// Number of levels (1 for a lone root leaf)
    pub height: usize,
    pub internal_nodes: usize,
    pub leaf_nodes: usize,
    /// Total key/value entries
    pub entries: usize,
    /// Node blocks handed out by the store
    pub allocated_blocks: u64,
}

/// Persistent B-Tree over u64 keys and u64 values
#[derive(Debug)]
pub struct BTree {
    store: NodeStore,
}

impl BTree {
    /// Create a new index file with an empty root leaf
    pub fn create<P: AsRef<Path>>(path: P, config: &IndexConfig) -> Result<Self> {
        Ok(Self {
            store: NodeStore::create(path, config)?,
        })
    }

    /// Open an existing index file
    pub fn open<P: AsRef<Path>>(path: P, config: &IndexConfig) -> Result<Self> {
        Ok(Self {
            store: NodeStore::open(path, config)?,
        })
    }

    pub fn store(&self) -> &NodeStore {
        &self.store
    }

    pub fn path(&self) -> &Path {
        self.store.path()
    }

    /// Flush the header and release the file
    pub fn close(self) -> Result<()> {
        self.store.close()
    }

    /// Descents deeper than the number of allocated blocks can only come
    /// from a child cycle.
    fn check_depth(&self, depth: usize, block_id: u64) -> Result<()> {
        if depth as u64 > self.store.allocated_blocks() {
            return Err(IndexError::node_not_found(block_id, "child pointers form a cycle"));
        }
        Ok(())
    }

    /// Look up `key`, failing with `KeyNotFound` if it is absent
    pub fn search(&self, key: u64) -> Result<u64> {
        let mut block_id = self.store.root_id();
        let mut depth = 0;

        loop {
            self.check_depth(depth, block_id)?;
            let node = self.store.read(block_id)?;

            match node.keys.binary_search(&key) {
                Ok(idx) => return Ok(node.values[idx]),
                Err(_) if node.is_leaf() => return Err(IndexError::KeyNotFound(key)),
                // idx is the first slot whose key is greater than `key`
                Err(idx) => block_id = node.children[idx],
            }
            depth += 1;
        }
    }

    /// `search` that maps `KeyNotFound` to `None`
    pub fn get(&self, key: u64) -> Result<Option<u64>> {
        match self.search(key) {
            Ok(value) => Ok(Some(value)),
            Err(IndexError::KeyNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn contains_key(&self, key: u64) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Insert a new key/value pair.
    ///
    /// Fails with `DuplicateKey` without touching the file if `key` is
    /// already present anywhere in the tree.
    pub fn insert(&mut self, key: u64, value: u64) -> Result<()> {
        let mut path: Vec<u64> = Vec::new();
        let mut node = self.store.read(self.store.root_id())?;

        let slot = loop {
            self.check_depth(path.len(), node.block_id)?;

            match node.keys.binary_search(&key) {
                Ok(_) => return Err(IndexError::DuplicateKey(key)),
                Err(idx) if node.is_leaf() => break idx,
                Err(idx) => {
                    let child_id = node.children[idx];
                    path.push(node.block_id);
                    node = self.store.read(child_id)?;
                }
            }
        };

        node.keys.insert(slot, key);
        node.values.insert(slot, value);

        self.rebalance(node, path)
    }

    /// Write `node` back, splitting it and promoting medians up `path` for
    /// as long as nodes overflow
    fn rebalance(&mut self, mut node: Node, mut path: Vec<u64>) -> Result<()> {
        loop {
            if node.num_keys() <= MAX_KEYS {
                return self.store.write(&node);
            }

            let (mut left, key, value, mut right) = self.split(node)?;

            let Some(parent_id) = path.pop() else {
                // Root split: grow the tree by one level
                let root_id = self.store.allocate_block()?;
                left.parent_id = root_id;
                right.parent_id = root_id;
                self.store.write(&left)?;
                self.store.write(&right)?;

                let root = Node::new_internal(root_id, key, value, left.block_id, right.block_id);
                self.store.write(&root)?;
                self.store.set_root(root_id)?;

                debug!(root_id, key, left = left.block_id, right = right.block_id, "promoted new root");
                return Ok(());
            };

            self.store.write(&left)?;
            self.store.write(&right)?;

            let mut parent = self.store.read(parent_id)?;
            let idx = match parent.keys.binary_search(&key) {
                Err(idx) => idx,
                Ok(_) => {
                    return Err(IndexError::node_not_found(
                        parent_id,
                        format!("promoted key {} already present in parent", key),
                    ))
                }
            };
            if parent.children.get(idx) != Some(&left.block_id) {
                return Err(IndexError::node_not_found(
                    parent_id,
                    format!("parent does not link node {} at slot {}", left.block_id, idx),
                ));
            }

            parent.keys.insert(idx, key);
            parent.values.insert(idx, value);
            parent.children.insert(idx + 1, right.block_id);
            node = parent;
        }
    }

    /// Split an overfull node.
    ///
    /// Returns `(left, median_key, median_value, right)`. `left` keeps the
    /// original block id; `right` gets a newly allocated one and its
    /// relocated children are re-parented on disk. Neither half is written.
    fn split(&mut self, mut node: Node) -> Result<(Node, u64, u64, Node)> {
        debug_assert_eq!(node.num_keys(), MAX_KEYS + 1);

        let right_id = self.store.allocate_block()?;

        let right_keys = node.keys.split_off(SPLIT_MID + 1);
        let right_values = node.values.split_off(SPLIT_MID + 1);
        let right_children = if node.is_leaf() {
            Vec::new()
        } else {
            node.children.split_off(SPLIT_MID + 1)
        };

        let (key, value) = match (node.keys.pop(), node.values.pop()) {
            (Some(key), Some(value)) => (key, value),
            _ => {
                return Err(IndexError::node_not_found(node.block_id, "cannot split a node without keys"));
            }
        };

        let right = Node {
            block_id: right_id,
            parent_id: node.parent_id,
            keys: right_keys,
            values: right_values,
            children: right_children,
        };

        for &child_id in &right.children {
            let mut child = self.store.read(child_id)?;
            child.parent_id = right_id;
            self.store.write(&child)?;
        }

        debug!(
            left = node.block_id,
            right = right_id,
            median = key,
            left_keys = node.num_keys(),
            right_keys = right.num_keys(),
            leaf = right.is_leaf(),
            "split node"
        );

        Ok((node, key, value, right))
    }

    /// Lazy in-order walk over every entry, ascending by key.
    ///
    /// Each call starts a fresh walk from the current root.
    pub fn traverse(&self) -> Traverse<'_> {
        Traverse {
            store: &self.store,
            stack: Vec::new(),
            pending_root: Some(self.store.root_id()),
        }
    }

    /// All entries, ascending by key
    pub fn scan(&self) -> Result<Vec<(u64, u64)>> {
        self.traverse().collect()
    }

    pub fn len(&self) -> Result<usize> {
        let mut count = 0;
        for entry in self.traverse() {
            entry?;
            count += 1;
        }
        Ok(count)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.store.read(self.store.root_id())?.num_keys() == 0)
    }

    /// Number of levels, following the leftmost spine
    pub fn height(&self) -> Result<usize> {
        let mut node = self.store.read(self.store.root_id())?;
        let mut height = 1;
        while let Some(&child_id) = node.children.first() {
            self.check_depth(height, child_id)?;
            node = self.store.read(child_id)?;
            height += 1;
        }
        Ok(height)
    }

    pub fn stats(&self) -> Result<TreeStats> {
        let mut stats = TreeStats {
            allocated_blocks: self.store.allocated_blocks(),
            ..Default::default()
        };

        let mut stack = vec![(self.store.root_id(), 1usize)];
        while let Some((block_id, level)) = stack.pop() {
            self.check_depth(level - 1, block_id)?;
            let node = self.store.read(block_id)?;
            stats.entries += node.num_keys();
            stats.height = stats.height.max(level);
            if node.is_leaf() {
                stats.leaf_nodes += 1;
            } else {
                stats.internal_nodes += 1;
                stack.extend(node.children.iter().map(|&child| (child, level + 1)));
            }
        }

        Ok(stats)
    }

    /// Verify the structural invariants of the whole tree:
    /// - keys strictly ascending inside every node and within the key
    ///   range its parent assigns to it
    /// - every internal node has `num_keys + 1` children and at least one key
    /// - every non-root node is non-empty and names its parent correctly
    /// - all leaves sit at the same depth
    pub fn check(&self) -> Result<()> {
        let root_id = self.store.root_id();
        let root = self.store.read(root_id)?;
        if root.parent_id != NULL_BLOCK {
            return Err(IndexError::node_not_found(root_id, format!("root has parent {}", root.parent_id)));
        }

        // (block_id, expected parent, exclusive lower bound, exclusive upper bound, depth)
        let mut stack: Vec<(u64, u64, Option<u64>, Option<u64>, usize)> =
            vec![(root_id, NULL_BLOCK, None, None, 0)];
        let mut leaf_depth: Option<usize> = None;

        while let Some((block_id, parent_id, low, high, depth)) = stack.pop() {
            self.check_depth(depth, block_id)?;
            let node = self.store.read(block_id)?;
            let corrupt = |reason: String| IndexError::node_not_found(block_id, reason);

            if node.parent_id != parent_id {
                return Err(corrupt(format!("parent_id {} but linked from {}", node.parent_id, parent_id)));
            }
            if parent_id != NULL_BLOCK && node.num_keys() == 0 {
                return Err(corrupt("non-root node is empty".into()));
            }
            if node.keys.windows(2).any(|pair| pair[0] >= pair[1]) {
                return Err(corrupt("keys not strictly ascending".into()));
            }
            if let (Some(low), Some(&first)) = (low, node.keys.first()) {
                if first <= low {
                    return Err(corrupt(format!("key {} not above separator {}", first, low)));
                }
            }
            if let (Some(high), Some(&last)) = (high, node.keys.last()) {
                if last >= high {
                    return Err(corrupt(format!("key {} not below separator {}", last, high)));
                }
            }

            if node.is_leaf() {
                let expected = *leaf_depth.get_or_insert(depth);
                if expected != depth {
                    return Err(corrupt(format!("leaf at depth {} but others at {}", depth, expected)));
                }
                continue;
            }

            if node.children.len() != node.num_keys() + 1 {
                return Err(corrupt(format!(
                    "{} keys but {} children",
                    node.num_keys(),
                    node.children.len()
                )));
            }

            for (i, &child_id) in node.children.iter().enumerate() {
                let child_low = if i == 0 { low } else { Some(node.keys[i - 1]) };
                let child_high = node.keys.get(i).copied().or(high);
                stack.push((child_id, block_id, child_low, child_high, depth + 1));
            }
        }

        Ok(())
    }
}

/// In-order iterator returned by [`BTree::traverse`]
///
/// Holds one frame per level of the current descent; nodes are read lazily
/// as the walk reaches them. After the first error the iterator is fused.
pub struct Traverse<'a> {
    store: &'a NodeStore,
    stack: Vec<Frame>,
    pending_root: Option<u64>,
}

struct Frame {
    node: Node,
    /// Leaf: next entry index. Internal: even steps descend into
    /// `children[step / 2]`, odd steps yield `keys[step / 2]`.
    step: usize,
}

impl Traverse<'_> {
    fn push(&mut self, block_id: u64) -> Result<()> {
        if self.stack.len() as u64 > self.store.allocated_blocks() {
            return Err(IndexError::node_not_found(block_id, "child pointers form a cycle"));
        }
        let node = self.store.read(block_id)?;
        self.stack.push(Frame { node, step: 0 });
        Ok(())
    }

    fn advance(&mut self) -> Result<Option<(u64, u64)>> {
        if let Some(root_id) = self.pending_root.take() {
            self.push(root_id)?;
        }

        loop {
            let Some(frame) = self.stack.last_mut() else {
                return Ok(None);
            };
            let num_keys = frame.node.num_keys();
            let step = frame.step;
            frame.step += 1;

            if frame.node.is_leaf() {
                if step < num_keys {
                    return Ok(Some((frame.node.keys[step], frame.node.values[step])));
                }
                self.stack.pop();
                continue;
            }

            if step > 2 * num_keys {
                self.stack.pop();
            } else if step % 2 == 0 {
                let child_id = frame.node.children[step / 2];
                self.push(child_id)?;
            } else {
                let idx = step / 2;
                return Ok(Some((frame.node.keys[idx], frame.node.values[idx])));
            }
        }
    }
}

impl Iterator for Traverse<'_> {
    type Item = Result<(u64, u64)>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.advance() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => None,
            Err(e) => {
                self.stack.clear();
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;
    use tempfile::TempDir;

    fn create_test_btree() -> (BTree, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("test.idx");
        let btree = BTree::create(path, &IndexConfig::for_testing()).unwrap();
        (btree, temp_dir)
    }

    #[test]
    fn test_basic_operations() {
        let (mut btree, _temp) = create_test_btree();

        btree.insert(5, 50).unwrap();
        btree.insert(3, 30).unwrap();
        btree.insert(8, 80).unwrap();

        assert_eq!(btree.search(5).unwrap(), 50);
        assert_eq!(btree.search(3).unwrap(), 30);
        assert_eq!(btree.get(8).unwrap(), Some(80));
        assert_eq!(btree.get(999).unwrap(), None);
        assert!(matches!(btree.search(4), Err(IndexError::KeyNotFound(4))));

        assert_eq!(btree.len().unwrap(), 3);
        assert!(btree.contains_key(3).unwrap());
        assert!(!btree.contains_key(4).unwrap());
        assert_eq!(btree.scan().unwrap(), vec![(3, 30), (5, 50), (8, 80)]);
    }

    #[test]
    fn test_empty_tree() {
        let (btree, _temp) = create_test_btree();

        assert!(btree.is_empty().unwrap());
        assert_eq!(btree.traverse().count(), 0);
        assert_eq!(btree.height().unwrap(), 1);
        assert!(matches!(btree.search(0), Err(IndexError::KeyNotFound(0))));
        btree.check().unwrap();
    }

    #[test]
    fn test_duplicate_rejected() {
        let (mut btree, _temp) = create_test_btree();

        btree.insert(1, 100).unwrap();
        assert!(matches!(btree.insert(1, 200), Err(IndexError::DuplicateKey(1))));
        assert_eq!(btree.search(1).unwrap(), 100);
        assert_eq!(btree.len().unwrap(), 1);
    }

    #[test]
    fn test_duplicate_of_promoted_key() {
        let (mut btree, _temp) = create_test_btree();
        for i in 1..=20 {
            btree.insert(i, i * 10).unwrap();
        }

        // 11 was promoted into the new root
        let root = btree.store().read(btree.store().root_id()).unwrap();
        assert_eq!(root.keys, vec![11]);
        assert!(matches!(btree.insert(11, 0), Err(IndexError::DuplicateKey(11))));
        assert_eq!(btree.search(11).unwrap(), 110);
    }

    #[test]
    fn test_first_split() {
        let (mut btree, _temp) = create_test_btree();

        for i in 1..=MAX_KEYS as u64 {
            btree.insert(i, i).unwrap();
        }
        assert_eq!(btree.height().unwrap(), 1);
        assert_eq!(btree.store().root_id(), 1);

        btree.insert(20, 20).unwrap();

        let root_id = btree.store().root_id();
        assert_eq!(root_id, 3);
        let root = btree.store().read(root_id).unwrap();
        assert_eq!(root.keys, vec![11]);
        assert_eq!(root.children, vec![1, 2]);
        assert!(root.is_root());

        let left = btree.store().read(1).unwrap();
        let right = btree.store().read(2).unwrap();
        assert_eq!(left.keys, (1..=10).collect::<Vec<_>>());
        assert_eq!(right.keys, (12..=20).collect::<Vec<_>>());
        assert_eq!(left.parent_id, root_id);
        assert_eq!(right.parent_id, root_id);

        btree.check().unwrap();
    }

    #[test]
    fn test_twenty_five_sequential_keys() {
        let (mut btree, _temp) = create_test_btree();
        for i in 1..=25 {
            btree.insert(i, i * 100).unwrap();
        }

        let stats = btree.stats().unwrap();
        assert_eq!(stats.height, 2);
        assert_eq!(stats.internal_nodes, 1);
        assert_eq!(stats.leaf_nodes, 2);
        assert_eq!(stats.entries, 25);

        let root = btree.store().read(btree.store().root_id()).unwrap();
        assert_eq!(root.num_keys(), 1);
        let leaf_keys: usize = root
            .children
            .iter()
            .map(|&id| btree.store().read(id).unwrap().num_keys())
            .sum();
        assert_eq!(leaf_keys, 24);
    }

    #[test]
    fn test_multi_level_split() {
        let (mut btree, _temp) = create_test_btree();

        let count = 2000u64;
        for i in 0..count {
            btree.insert(i, i * 10).unwrap();
        }

        btree.check().unwrap();
        let stats = btree.stats().unwrap();
        assert!(stats.height >= 3, "height {}", stats.height);
        assert_eq!(stats.entries, count as usize);
        assert_eq!(stats.allocated_blocks, (stats.internal_nodes + stats.leaf_nodes) as u64);

        for i in 0..count {
            assert_eq!(btree.search(i).unwrap(), i * 10, "key {}", i);
        }
        assert!(btree.get(count).unwrap().is_none());

        let all = btree.scan().unwrap();
        assert_eq!(all.len(), count as usize);
        for (i, &(key, value)) in all.iter().enumerate() {
            assert_eq!((key, value), (i as u64, i as u64 * 10));
        }
    }

    #[test]
    fn test_shuffled_inserts() {
        let (mut btree, _temp) = create_test_btree();

        let mut keys: Vec<u64> = (0..1500).map(|i| i * 7 + 3).collect();
        keys.shuffle(&mut StdRng::seed_from_u64(0x5EED));
        for &key in &keys {
            btree.insert(key, key ^ 0xFFFF).unwrap();
        }

        btree.check().unwrap();
        for &key in &keys {
            assert_eq!(btree.search(key).unwrap(), key ^ 0xFFFF);
            assert!(btree.get(key + 1).unwrap().is_none());
        }

        let scanned: Vec<u64> = btree.traverse().map(|e| e.unwrap().0).collect();
        keys.sort_unstable();
        assert_eq!(scanned, keys);
    }

    #[test]
    fn test_descending_inserts() {
        let (mut btree, _temp) = create_test_btree();
        for i in (0..500u64).rev() {
            btree.insert(i, i).unwrap();
        }
        btree.check().unwrap();
        assert_eq!(btree.len().unwrap(), 500);
        assert_eq!(btree.traverse().next().unwrap().unwrap(), (0, 0));
    }

    #[test]
    fn test_extreme_keys() {
        let (mut btree, _temp) = create_test_btree();
        btree.insert(u64::MAX, 1).unwrap();
        btree.insert(0, 2).unwrap();
        for i in 1..40 {
            btree.insert(u64::MAX - i, i).unwrap();
        }
        btree.check().unwrap();
        assert_eq!(btree.search(u64::MAX).unwrap(), 1);
        assert_eq!(btree.search(0).unwrap(), 2);
    }

    #[test]
    fn test_traverse_is_restartable() {
        let (mut btree, _temp) = create_test_btree();
        for i in 0..100 {
            btree.insert(i, i).unwrap();
        }

        let first: Vec<_> = btree.traverse().take(10).collect::<Result<_>>().unwrap();
        let again: Vec<_> = btree.traverse().take(10).collect::<Result<_>>().unwrap();
        assert_eq!(first, again);
        assert_eq!(btree.traverse().count(), 100);
    }

    #[test]
    fn test_persistence() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("persist.idx");

        {
            let mut btree = BTree::create(&path, &IndexConfig::for_testing()).unwrap();
            for i in 1..=300 {
                btree.insert(i, i * 2).unwrap();
            }
            btree.close().unwrap();
        }

        {
            let mut btree = BTree::open(&path, &IndexConfig::default()).unwrap();
            assert_eq!(btree.search(150).unwrap(), 300);
            assert_eq!(btree.len().unwrap(), 300);
            btree.insert(1000, 1).unwrap();
            btree.check().unwrap();
        }

        // dropped without close: writes already reached the file
        let btree = BTree::open(&path, &IndexConfig::default()).unwrap();
        assert_eq!(btree.search(1000).unwrap(), 1);
    }

    #[test]
    fn test_corrupted_child_reported() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("corrupt.idx");
        {
            let mut btree = BTree::create(&path, &IndexConfig::for_testing()).unwrap();
            for i in 1..=20 {
                btree.insert(i, i).unwrap();
            }
        }

        // wipe the right leaf (block 2)
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[2 * 512..3 * 512].fill(0);
        std::fs::write(&path, &bytes).unwrap();

        let btree = BTree::open(&path, &IndexConfig::default()).unwrap();
        assert_eq!(btree.search(5).unwrap(), 5);
        let err = btree.search(15).unwrap_err();
        assert!(err.is_corruption());
        assert!(btree.check().is_err());

        let results: Vec<_> = btree.traverse().collect();
        assert!(results.last().unwrap().is_err());
    }
}
