//! Index manager
//!
//! Owns the currently open index file and exposes the operations the command
//! shell calls: create/open/close, point insert and search, bulk load from
//! `key,value` text, ordered print and extract.

use crate::config::IndexConfig;
use crate::index::btree::{BTree, Traverse, TreeStats};
use crate::index::records::{parse_record, LoadReport, MalformedLine, Record};
use crate::{IndexError, Result};
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Holds at most one open index file at a time
#[derive(Debug, Default)]
pub struct IndexManager {
    config: IndexConfig,
    tree: Option<BTree>,
}

impl IndexManager {
    pub fn new(config: IndexConfig) -> Self {
        Self { config, tree: None }
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub fn is_open(&self) -> bool {
        self.tree.is_some()
    }

    /// Path of the open index file
    pub fn path(&self) -> Option<&Path> {
        self.tree.as_ref().map(BTree::path)
    }

    fn tree(&self) -> Result<&BTree> {
        self.tree.as_ref().ok_or(IndexError::NoFileOpen)
    }

    fn tree_mut(&mut self) -> Result<&mut BTree> {
        self.tree.as_mut().ok_or(IndexError::NoFileOpen)
    }

    fn ensure_closed(&self) -> Result<()> {
        match self.path() {
            Some(path) => Err(IndexError::AlreadyOpen(path.to_path_buf())),
            None => Ok(()),
        }
    }

    /// Create a new index file and keep it open
    pub fn create<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.ensure_closed()?;
        self.tree = Some(BTree::create(path, &self.config)?);
        Ok(())
    }

    /// Open an existing index file
    pub fn open<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.ensure_closed()?;
        self.tree = Some(BTree::open(path, &self.config)?);
        Ok(())
    }

    /// Flush the header and release the file. No-op when nothing is open.
    pub fn close(&mut self) -> Result<()> {
        match self.tree.take() {
            Some(tree) => tree.close(),
            None => Ok(()),
        }
    }

    pub fn insert(&mut self, key: u64, value: u64) -> Result<()> {
        self.tree_mut()?.insert(key, value)
    }

    pub fn search(&self, key: u64) -> Result<u64> {
        self.tree()?.search(key)
    }

    /// Lazy ascending walk over every entry
    pub fn entries(&self) -> Result<Traverse<'_>> {
        Ok(self.tree()?.traverse())
    }

    /// Bulk insert `key,value` lines from a text file.
    ///
    /// Malformed lines and keys already in the index are reported and
    /// skipped. Any other error stops the load.
    pub fn load<P: AsRef<Path>>(&mut self, path: P) -> Result<LoadReport> {
        let path = path.as_ref();
        let tree = self.tree_mut()?;
        let reader = BufReader::new(File::open(path)?);
        let mut report = LoadReport::default();

        // raw bytes: a line that is not UTF-8 is malformed, not a read error
        for (idx, bytes) in reader.split(b'\n').enumerate() {
            let bytes = bytes?;
            let parsed = match std::str::from_utf8(&bytes) {
                Ok(line) if line.trim().is_empty() => continue,
                Ok(line) => parse_record(line),
                Err(_) => None,
            };

            let Some((key, value)) = parsed else {
                let content = String::from_utf8_lossy(&bytes).trim_end().to_string();
                warn!(line = idx + 1, content = %content, "skipping malformed line");
                report.malformed.push(MalformedLine {
                    line: idx + 1,
                    content,
                });
                continue;
            };

            match tree.insert(key, value) {
                Ok(()) => report.inserted += 1,
                Err(IndexError::DuplicateKey(key)) => {
                    warn!(line = idx + 1, key, "skipping duplicate key");
                    report.duplicates.push(key);
                }
                Err(e) => return Err(e),
            }
        }

        info!(
            path = %path.display(),
            inserted = report.inserted,
            duplicates = report.duplicates.len(),
            malformed = report.malformed.len(),
            "loaded records"
        );
        Ok(report)
    }

    /// Write every pair as a `key,value` line to `out`, ascending by key.
    /// Returns the number of lines written.
    pub fn print<W: Write>(&self, out: &mut W) -> Result<usize> {
        let mut count = 0;
        for entry in self.tree()?.traverse() {
            let (key, value) = entry?;
            writeln!(out, "{}", Record(key, value))?;
            count += 1;
        }
        Ok(count)
    }

    /// Write every pair as a `key,value` line into the file at `path`,
    /// replacing its contents. Returns the number of lines written.
    pub fn extract<P: AsRef<Path>>(&self, path: P) -> Result<usize> {
        let path = path.as_ref();
        let tree = self.tree()?;

        if let (Ok(target), Ok(index)) = (path.canonicalize(), tree.path().canonicalize()) {
            if target == index {
                return Err(IndexError::Io(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "refusing to extract over the open index file",
                )));
            }
        }

        // the target is only replaced once the whole traversal succeeded
        let partial = partial_path(path);
        let count = match self.write_export(&partial) {
            Ok(count) => count,
            Err(e) => {
                if let Err(rm) = fs::remove_file(&partial) {
                    warn!(path = %partial.display(), "failed to remove partial export: {}", rm);
                }
                return Err(e);
            }
        };
        fs::rename(&partial, path)?;

        info!(path = %path.display(), count, "extracted records");
        Ok(count)
    }

    fn write_export(&self, path: &Path) -> Result<usize> {
        let mut out = BufWriter::new(File::create(path)?);
        let count = self.print(&mut out)?;
        out.flush()?;
        Ok(count)
    }

    pub fn stats(&self) -> Result<TreeStats> {
        self.tree()?.stats()
    }

    /// Verify the tree invariants of the open file
    pub fn check(&self) -> Result<()> {
        self.tree()?.check()
    }
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(".partial");
    path.with_file_name(name)
}

impl Drop for IndexManager {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("failed to close index file: {}", e);
        }
    }
}
