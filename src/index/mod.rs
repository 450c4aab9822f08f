//! Index layer implementation
//!
//! The on-disk B-tree and the manager that owns the open index file

pub mod btree;
pub mod manager;
pub mod records;

pub use btree::{BTree, Traverse, TreeStats, SPLIT_MID};
pub use manager::IndexManager;
pub use records::{LoadReport, MalformedLine, Record};
