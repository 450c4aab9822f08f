//! blocktree: disk-resident B-tree index
//!
//! Maps unsigned 64-bit keys to unsigned 64-bit values in a single file of
//! fixed 512-byte blocks.
//!
//! ## Architecture
//! - storage: block codec (big-endian fixed layout) + node store (block id allocation, block I/O)
//! - index: B-tree engine (search, insert with split/promotion, in-order traversal)
//! - manager: index manager (one open file, bulk load/extract) + interactive shell
//!
//! ```no_run
//! use blocktree::{IndexConfig, IndexManager};
//!
//! let mut manager = IndexManager::new(IndexConfig::default());
//! manager.create("t.idx")?;
//! manager.insert(5, 50)?;
//! assert_eq!(manager.search(5)?, 50);
//! manager.close()?;
//! # Ok::<(), blocktree::IndexError>(())
//! ```

pub mod config;
pub mod storage;
pub mod index;
pub mod shell;

mod error;

pub use config::{DurabilityLevel, IndexConfig};
pub use error::{IndexError, Result};

pub use index::{BTree, IndexManager, LoadReport, TreeStats};
pub use shell::Shell;
pub use storage::{Header, Node, NodeStore, BLOCK_SIZE, MAX_CHILDREN, MAX_KEYS};
