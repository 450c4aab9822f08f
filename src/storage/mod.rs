//! Storage layer implementation
//!
//! Fixed-size block encoding and block-addressed file access

pub mod codec;
pub mod node_store;

pub use codec::{Header, Node, BLOCK_SIZE, MAGIC, MAX_CHILDREN, MAX_KEYS, NULL_BLOCK};
pub use node_store::NodeStore;
