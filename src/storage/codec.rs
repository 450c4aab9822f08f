//! Block codec
//!
//! Every block is exactly [`BLOCK_SIZE`] bytes. All integers are stored as
//! 8-byte big-endian words at fixed offsets, independent of host byte order.
//!
//! ```text
//! Header (block 0)
//!   [0..8)     magic "4337PRJ3"
//!   [8..16)    root_id
//!   [16..24)   next_block_id
//!   [24..512)  zero
//!
//! Node (block id >= 1)
//!   [0..8)     block_id
//!   [8..16)    parent_id (0 for the root)
//!   [16..24)   num_keys
//!   [24..176)  keys[19]
//!   [176..328) values[19]
//!   [328..488) children[20] (all zero for a leaf)
//!   [488..512) zero
//! ```

use crate::{IndexError, Result};

/// Size of every block in the index file
pub const BLOCK_SIZE: usize = 512;

/// Max keys per node
pub const MAX_KEYS: usize = 19;

/// Max children per internal node
pub const MAX_CHILDREN: usize = MAX_KEYS + 1;

/// File identifier stored in the first 8 bytes of block 0
pub const MAGIC: [u8; 8] = *b"4337PRJ3";

/// Block id meaning "no node"
pub const NULL_BLOCK: u64 = 0;

const WORD: usize = 8;

const HEADER_MAGIC_OFFSET: usize = 0;
const HEADER_ROOT_OFFSET: usize = 8;
const HEADER_NEXT_OFFSET: usize = 16;

const NODE_BLOCK_ID_OFFSET: usize = 0;
const NODE_PARENT_OFFSET: usize = 8;
const NODE_NUM_KEYS_OFFSET: usize = 16;
const NODE_KEYS_OFFSET: usize = 24;
const NODE_VALUES_OFFSET: usize = NODE_KEYS_OFFSET + MAX_KEYS * WORD;
const NODE_CHILDREN_OFFSET: usize = NODE_VALUES_OFFSET + MAX_KEYS * WORD;
const NODE_END: usize = NODE_CHILDREN_OFFSET + MAX_CHILDREN * WORD;

const _: () = assert!(NODE_END <= BLOCK_SIZE);

fn put_u64(buf: &mut [u8], offset: usize, value: u64) {
    buf[offset..offset + WORD].copy_from_slice(&value.to_be_bytes());
}

fn get_u64(buf: &[u8], offset: usize) -> u64 {
    let mut word = [0u8; WORD];
    word.copy_from_slice(&buf[offset..offset + WORD]);
    u64::from_be_bytes(word)
}

fn check_len(buf: &[u8], what: &str) -> Result<()> {
    if buf.len() != BLOCK_SIZE {
        return Err(IndexError::InvalidFormat(format!(
            "{} block must be {} bytes, got {}",
            what,
            BLOCK_SIZE,
            buf.len()
        )));
    }
    Ok(())
}

/// File header stored in block 0
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Block id of the current root node
    pub root_id: u64,

    /// Next unused block id
    pub next_block_id: u64,
}

impl Default for Header {
    /// Header of a freshly created file: empty root leaf at block 1
    fn default() -> Self {
        Self {
            root_id: 1,
            next_block_id: 2,
        }
    }
}

impl Header {
    pub fn encode(&self) -> [u8; BLOCK_SIZE] {
        let mut buf = [0u8; BLOCK_SIZE];
        buf[HEADER_MAGIC_OFFSET..HEADER_MAGIC_OFFSET + WORD].copy_from_slice(&MAGIC);
        put_u64(&mut buf, HEADER_ROOT_OFFSET, self.root_id);
        put_u64(&mut buf, HEADER_NEXT_OFFSET, self.next_block_id);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        check_len(buf, "header")?;

        let magic = &buf[HEADER_MAGIC_OFFSET..HEADER_MAGIC_OFFSET + WORD];
        if magic != MAGIC {
            return Err(IndexError::InvalidFormat(format!(
                "bad magic number: expected {:?}, got {:?}",
                String::from_utf8_lossy(&MAGIC),
                String::from_utf8_lossy(magic)
            )));
        }

        let header = Self {
            root_id: get_u64(buf, HEADER_ROOT_OFFSET),
            next_block_id: get_u64(buf, HEADER_NEXT_OFFSET),
        };

        if header.root_id == NULL_BLOCK {
            return Err(IndexError::InvalidFormat("header root_id is 0".into()));
        }
        if header.next_block_id <= header.root_id {
            return Err(IndexError::InvalidFormat(format!(
                "header next_block_id {} does not follow root_id {}",
                header.next_block_id, header.root_id
            )));
        }

        Ok(header)
    }
}

/// B-tree node stored in one block
///
/// Only the populated slots are kept in memory: `keys` and `values` hold
/// `num_keys` entries, `children` holds `num_keys + 1` ids for an internal
/// node and nothing for a leaf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub block_id: u64,
    pub parent_id: u64,
    pub keys: Vec<u64>,
    pub values: Vec<u64>,
    pub children: Vec<u64>,
}

impl Node {
    pub fn new_leaf(block_id: u64, parent_id: u64) -> Self {
        Self {
            block_id,
            parent_id,
            keys: Vec::with_capacity(MAX_KEYS + 1),
            values: Vec::with_capacity(MAX_KEYS + 1),
            children: Vec::new(),
        }
    }

    /// Internal node with a single separator entry and two children
    pub fn new_internal(block_id: u64, key: u64, value: u64, left: u64, right: u64) -> Self {
        let mut node = Self::new_leaf(block_id, NULL_BLOCK);
        node.keys.push(key);
        node.values.push(value);
        node.children = vec![left, right];
        node
    }

    pub fn num_keys(&self) -> usize {
        self.keys.len()
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub fn is_root(&self) -> bool {
        self.parent_id == NULL_BLOCK
    }

    pub fn is_full(&self) -> bool {
        self.keys.len() >= MAX_KEYS
    }

    /// Serialize into one block. Slots past `num_keys` are written as zero.
    pub fn encode(&self) -> [u8; BLOCK_SIZE] {
        debug_assert!(self.keys.len() <= MAX_KEYS, "overfull node {}", self.block_id);

        let mut buf = [0u8; BLOCK_SIZE];
        let num_keys = self.keys.len().min(MAX_KEYS);

        put_u64(&mut buf, NODE_BLOCK_ID_OFFSET, self.block_id);
        put_u64(&mut buf, NODE_PARENT_OFFSET, self.parent_id);
        put_u64(&mut buf, NODE_NUM_KEYS_OFFSET, num_keys as u64);

        for (i, &key) in self.keys.iter().take(MAX_KEYS).enumerate() {
            put_u64(&mut buf, NODE_KEYS_OFFSET + i * WORD, key);
        }
        for (i, &value) in self.values.iter().take(MAX_KEYS).enumerate() {
            put_u64(&mut buf, NODE_VALUES_OFFSET + i * WORD, value);
        }
        for (i, &child) in self.children.iter().take(MAX_CHILDREN).enumerate() {
            put_u64(&mut buf, NODE_CHILDREN_OFFSET + i * WORD, child);
        }

        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        check_len(buf, "node")?;

        let block_id = get_u64(buf, NODE_BLOCK_ID_OFFSET);
        let parent_id = get_u64(buf, NODE_PARENT_OFFSET);
        let raw_num_keys = get_u64(buf, NODE_NUM_KEYS_OFFSET);

        if raw_num_keys > MAX_KEYS as u64 {
            return Err(IndexError::InvalidFormat(format!(
                "node {} has num_keys {} (max {})",
                block_id, raw_num_keys, MAX_KEYS
            )));
        }
        let num_keys = raw_num_keys as usize;

        let keys: Vec<u64> = (0..num_keys)
            .map(|i| get_u64(buf, NODE_KEYS_OFFSET + i * WORD))
            .collect();
        if keys.windows(2).any(|pair| pair[0] >= pair[1]) {
            return Err(IndexError::InvalidFormat(format!(
                "node {} keys are not strictly ascending",
                block_id
            )));
        }

        let values = (0..num_keys)
            .map(|i| get_u64(buf, NODE_VALUES_OFFSET + i * WORD))
            .collect();

        let slots: Vec<u64> = (0..MAX_CHILDREN)
            .map(|i| get_u64(buf, NODE_CHILDREN_OFFSET + i * WORD))
            .collect();
        let populated = slots.iter().take_while(|&&child| child != NULL_BLOCK).count();

        if slots[populated..].iter().any(|&child| child != NULL_BLOCK) {
            return Err(IndexError::InvalidFormat(format!(
                "node {} has a gap in its child slots",
                block_id
            )));
        }
        if populated != 0 && (num_keys == 0 || populated != num_keys + 1) {
            return Err(IndexError::InvalidFormat(format!(
                "node {} has {} keys but {} children",
                block_id, num_keys, populated
            )));
        }

        let mut children = slots;
        children.truncate(populated);

        Ok(Self {
            block_id,
            parent_id,
            keys,
            values,
            children,
        })
    }
}
