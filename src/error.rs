//! Error types for the blocktree index

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, IndexError>;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("File already exists: {0}")]
    FileAlreadyExists(PathBuf),

    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Node {block_id} not found: {reason}")]
    NodeNotFound { block_id: u64, reason: String },

    #[error("Duplicate key: {0}")]
    DuplicateKey(u64),

    #[error("Key not found: {0}")]
    KeyNotFound(u64),

    #[error("Malformed line {line}: {content:?}")]
    MalformedLine { line: usize, content: String },

    #[error("No index file open")]
    NoFileOpen,

    #[error("An index file is already open: {0}")]
    AlreadyOpen(PathBuf),

    #[error("Config error: {0}")]
    Config(String),
}

impl IndexError {
    /// Structural damage in the index file. The file has to be closed and
    /// reopened (or recreated); nothing tries to repair it.
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::InvalidFormat(_) | Self::NodeNotFound { .. })
    }

    pub(crate) fn node_not_found(block_id: u64, reason: impl Into<String>) -> Self {
        Self::NodeNotFound {
            block_id,
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for IndexError {
    fn from(err: serde_json::Error) -> Self {
        IndexError::Config(err.to_string())
    }
}
