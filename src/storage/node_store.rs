//! Node Store
//!
//! Maps block ids to file offsets (`block_id * BLOCK_SIZE`), allocates new
//! block ids and moves nodes and the header between memory and disk.
//!
//! ## Design
//! - **No node cache**: every `read` goes to the file and every `write` lands
//!   in the file before returning
//! - **Monotonic ids**: `allocate_block` hands out `next_block_id` and never
//!   reuses an id; the header is rewritten on every allocation
//! - **Block 0 is the header**: nodes can never be read from or written to it

use crate::config::{DurabilityLevel, IndexConfig};
use crate::storage::codec::{Header, Node, BLOCK_SIZE, MAX_KEYS, NULL_BLOCK};
use crate::{IndexError, Result};
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Block-level access to one index file
#[derive(Debug)]
pub struct NodeStore {
    /// Open index file
    file: File,

    /// Path the file was opened from
    path: PathBuf,

    /// Cached copy of block 0
    header: Header,

    durability: DurabilityLevel,
}

impl NodeStore {
    /// Create a new index file holding the header and an empty root leaf.
    ///
    /// Fails with `FileAlreadyExists` if `path` already exists. A file that
    /// could not be fully initialized is removed again.
    pub fn create<P: AsRef<Path>>(path: P, config: &IndexConfig) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if config.create_parent_dirs {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| match e.kind() {
                ErrorKind::AlreadyExists => IndexError::FileAlreadyExists(path.clone()),
                _ => IndexError::Io(e),
            })?;

        let mut store = Self {
            file,
            path,
            header: Header::default(),
            durability: config.durability,
        };

        if let Err(e) = store.init_blocks() {
            let path = store.path.clone();
            drop(store);
            // Best effort: don't leave a half-written file behind
            let _ = std::fs::remove_file(&path);
            return Err(e);
        }

        info!(path = %store.path.display(), "created index file");
        Ok(store)
    }

    fn init_blocks(&mut self) -> Result<()> {
        self.flush_header()?;
        let root = Node::new_leaf(self.header.root_id, NULL_BLOCK);
        self.write(&root)?;
        self.file.sync_all()?;
        Ok(())
    }

    /// Open an existing index file.
    ///
    /// Validates the header and makes sure the root block is readable. On
    /// any failure the file handle is released before returning.
    pub fn open<P: AsRef<Path>>(path: P, config: &IndexConfig) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;

        let file_len = file.metadata()?.len();
        if file_len < BLOCK_SIZE as u64 {
            return Err(IndexError::InvalidFormat(format!(
                "{} is {} bytes, too short for a header block",
                path.display(),
                file_len
            )));
        }

        let mut buf = [0u8; BLOCK_SIZE];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut buf)?;
        let header = Header::decode(&buf)?;

        let store = Self {
            file,
            path,
            header,
            durability: config.durability,
        };

        if let Err(e) = store.read(header.root_id) {
            warn!(path = %store.path.display(), root_id = header.root_id, "root node unreadable: {}", e);
            return Err(e);
        }

        info!(
            path = %store.path.display(),
            root_id = header.root_id,
            next_block_id = header.next_block_id,
            "opened index file"
        );
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> Header {
        self.header
    }

    pub fn root_id(&self) -> u64 {
        self.header.root_id
    }

    /// Number of node blocks handed out so far
    pub fn allocated_blocks(&self) -> u64 {
        self.header.next_block_id - 1
    }

    /// Allocate a fresh block id. The updated header is persisted at once.
    pub fn allocate_block(&mut self) -> Result<u64> {
        let block_id = self.header.next_block_id;
        self.header.next_block_id = block_id
            .checked_add(1)
            .ok_or_else(|| IndexError::InvalidFormat("block ids exhausted".into()))?;
        self.flush_header()?;

        debug!(block_id, "allocated block");
        Ok(block_id)
    }

    /// Point the header at a new root node and persist it
    pub fn set_root(&mut self, root_id: u64) -> Result<()> {
        if root_id == NULL_BLOCK || root_id >= self.header.next_block_id {
            return Err(IndexError::node_not_found(root_id, "root must be an allocated block"));
        }
        self.header.root_id = root_id;
        self.flush_header()
    }

    /// Read and decode the node stored at `block_id`
    pub fn read(&self, block_id: u64) -> Result<Node> {
        if block_id == NULL_BLOCK {
            return Err(IndexError::node_not_found(block_id, "block 0 is reserved for the header"));
        }
        if block_id >= self.header.next_block_id {
            return Err(IndexError::node_not_found(
                block_id,
                format!("not allocated (next block id is {})", self.header.next_block_id),
            ));
        }

        let offset = Self::block_offset(block_id)?;
        let file_len = self.file.metadata()?.len();
        if offset + BLOCK_SIZE as u64 > file_len {
            return Err(IndexError::node_not_found(
                block_id,
                format!("block lies past end of file ({} bytes)", file_len),
            ));
        }

        let mut buf = [0u8; BLOCK_SIZE];
        let mut file = &self.file;
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut buf)?;

        let node = Node::decode(&buf)
            .map_err(|e| IndexError::node_not_found(block_id, e.to_string()))?;

        if node.block_id != block_id {
            return Err(IndexError::node_not_found(
                block_id,
                format!("block holds node {}", node.block_id),
            ));
        }

        Ok(node)
    }

    /// Encode `node` and write it at its own block offset, extending the
    /// file when needed
    pub fn write(&mut self, node: &Node) -> Result<()> {
        if node.block_id == NULL_BLOCK {
            return Err(IndexError::node_not_found(node.block_id, "cannot overwrite the header block"));
        }
        if node.block_id >= self.header.next_block_id {
            return Err(IndexError::node_not_found(node.block_id, "block was never allocated"));
        }

        let well_formed = node.keys.len() <= MAX_KEYS
            && node.values.len() == node.keys.len()
            && (node.is_leaf() || node.children.len() == node.keys.len() + 1);
        if !well_formed {
            return Err(IndexError::InvalidFormat(format!(
                "refusing to write node {} with {} keys, {} values, {} children",
                node.block_id,
                node.keys.len(),
                node.values.len(),
                node.children.len()
            )));
        }

        let offset = Self::block_offset(node.block_id)?;
        self.write_block(offset, &node.encode())
    }

    /// Persist the cached header to block 0
    pub fn flush_header(&mut self) -> Result<()> {
        let buf = self.header.encode();
        self.write_block(0, &buf)
    }

    /// Flush the header, fsync and release the file
    pub fn close(mut self) -> Result<()> {
        self.flush_header()?;
        self.file.sync_all()?;
        info!(path = %self.path.display(), "closed index file");
        Ok(())
    }

    fn write_block(&mut self, offset: u64, buf: &[u8; BLOCK_SIZE]) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(buf)?;

        // fsync here only under Synchronous durability
        if self.durability.requires_immediate_sync() {
            self.file.sync_data()?;
        }
        Ok(())
    }

    fn block_offset(block_id: u64) -> Result<u64> {
        block_id
            .checked_mul(BLOCK_SIZE as u64)
            .ok_or_else(|| IndexError::node_not_found(block_id, "offset overflows u64"))
    }
}
