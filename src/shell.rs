//! Interactive command shell
//!
//! Reads one command per line and dispatches it to an [`IndexManager`].
//! Arguments may follow the command on the same line (`insert 5 50`); any
//! that are missing are prompted for one at a time. Errors are printed and
//! the loop keeps going; only a failure to write output ends it early.

use crate::index::manager::IndexManager;
use crate::index::records::parse_u64;
use crate::{IndexError, Result};
use std::io::{BufRead, Write};
use std::str::SplitWhitespace;

const HELP: &str = "\
Commands:
  create <file>         create a new index file and open it
  open <file>           open an existing index file
  insert <key> <value>  insert a key/value pair
  search <key>          look up a key
  load <file>           insert every key,value line of a text file
  print                 list all pairs in key order
  extract <file>        write all pairs to a text file as key,value lines
  stats                 show tree shape
  check                 verify tree invariants
  close                 close the current index file
  help                  show this help
  quit                  close the file and exit";

/// Whether the loop should keep reading commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

pub struct Shell<R, W> {
    manager: IndexManager,
    input: R,
    output: W,
    prompt: bool,
}

impl<R: BufRead, W: Write> Shell<R, W> {
    pub fn new(manager: IndexManager, input: R, output: W) -> Self {
        Self {
            manager,
            input,
            output,
            prompt: false,
        }
    }

    /// Print a `blocktree> ` prompt before each command
    pub fn with_prompt(mut self, prompt: bool) -> Self {
        self.prompt = prompt;
        self
    }

    pub fn manager(&self) -> &IndexManager {
        &self.manager
    }

    pub fn into_parts(self) -> (IndexManager, W) {
        (self.manager, self.output)
    }

    /// Run until `quit` or end of input. The open file is closed either way.
    pub fn run(&mut self) -> Result<()> {
        loop {
            if self.prompt {
                write!(self.output, "blocktree> ")?;
                self.output.flush()?;
            }

            let Some(line) = self.read_line()? else {
                self.quit()?;
                return Ok(());
            };

            if self.execute(&line)? == Flow::Quit {
                return Ok(());
            }
        }
    }

    /// Execute a single command line
    pub fn execute(&mut self, line: &str) -> Result<Flow> {
        let mut args = line.split_whitespace();
        let Some(command) = args.next() else {
            return Ok(Flow::Continue);
        };

        let outcome = match command.to_ascii_lowercase().as_str() {
            "quit" | "exit" => {
                self.quit()?;
                return Ok(Flow::Quit);
            }
            "help" => {
                writeln!(self.output, "{}", HELP)?;
                Ok(())
            }
            "create" => self.cmd_create(&mut args),
            "open" => self.cmd_open(&mut args),
            "close" => self.cmd_close(),
            "insert" => self.cmd_insert(&mut args),
            "search" => self.cmd_search(&mut args),
            "load" => self.cmd_load(&mut args),
            "print" => self.cmd_print(),
            "extract" => self.cmd_extract(&mut args),
            "stats" => self.cmd_stats(),
            "check" => self.cmd_check(),
            other => {
                writeln!(self.output, "Unknown command: {}. Type 'help' for commands.", other)?;
                Ok(())
            }
        };

        if let Err(e) = outcome {
            self.report(&e)?;
        }
        Ok(Flow::Continue)
    }

    fn report(&mut self, err: &IndexError) -> Result<()> {
        match err {
            IndexError::KeyNotFound(key) => writeln!(self.output, "Key {} not found.", key)?,
            IndexError::DuplicateKey(key) => {
                writeln!(self.output, "Key {} already exists; not inserted.", key)?
            }
            IndexError::NoFileOpen => writeln!(self.output, "No file open.")?,
            other => writeln!(self.output, "Error: {}", other)?,
        }
        if err.is_corruption() {
            writeln!(
                self.output,
                "The index file looks damaged. Close it and reopen or recreate it."
            )?;
        }
        Ok(())
    }

    fn read_line(&mut self) -> Result<Option<String>> {
        // non-UTF-8 bytes become U+FFFD
        let mut buf = Vec::new();
        if self.input.read_until(b'\n', &mut buf)? == 0 {
            return Ok(None);
        }
        Ok(Some(String::from_utf8_lossy(&buf).trim().to_string()))
    }

    /// Next inline argument, or prompt for it on its own line
    fn arg(&mut self, args: &mut SplitWhitespace<'_>, prompt: &str) -> Result<Option<String>> {
        if let Some(arg) = args.next() {
            return Ok(Some(arg.to_string()));
        }
        write!(self.output, "{}", prompt)?;
        self.output.flush()?;
        Ok(self.read_line()?.filter(|line| !line.is_empty()))
    }

    fn number_arg(&mut self, args: &mut SplitWhitespace<'_>, prompt: &str, what: &str) -> Result<Option<u64>> {
        let Some(text) = self.arg(args, prompt)? else {
            writeln!(self.output, "Missing {}.", what)?;
            return Ok(None);
        };
        match parse_u64(&text) {
            Some(number) => Ok(Some(number)),
            None => {
                writeln!(self.output, "Invalid {}: {} (expected an unsigned integer).", what, text)?;
                Ok(None)
            }
        }
    }

    fn file_arg(&mut self, args: &mut SplitWhitespace<'_>, prompt: &str) -> Result<Option<String>> {
        let file = self.arg(args, prompt)?;
        if file.is_none() {
            writeln!(self.output, "Missing file name.")?;
        }
        Ok(file)
    }

    fn quit(&mut self) -> Result<()> {
        if let Err(e) = self.manager.close() {
            self.report(&e)?;
        }
        writeln!(self.output, "Goodbye!")?;
        Ok(())
    }

    fn cmd_create(&mut self, args: &mut SplitWhitespace<'_>) -> Result<()> {
        let Some(file) = self.file_arg(args, "Enter file name: ")? else {
            return Ok(());
        };
        self.manager.create(&file)?;
        writeln!(self.output, "Created index file: {}", file)?;
        Ok(())
    }

    fn cmd_open(&mut self, args: &mut SplitWhitespace<'_>) -> Result<()> {
        let Some(file) = self.file_arg(args, "Enter file name: ")? else {
            return Ok(());
        };
        self.manager.open(&file)?;
        writeln!(self.output, "Opened index file: {}", file)?;
        Ok(())
    }

    fn cmd_close(&mut self) -> Result<()> {
        if !self.manager.is_open() {
            return Err(IndexError::NoFileOpen);
        }
        self.manager.close()?;
        writeln!(self.output, "Closed index file.")?;
        Ok(())
    }

    fn cmd_insert(&mut self, args: &mut SplitWhitespace<'_>) -> Result<()> {
        if !self.manager.is_open() {
            return Err(IndexError::NoFileOpen);
        }
        let Some(key) = self.number_arg(args, "Enter key: ", "key")? else {
            return Ok(());
        };
        let Some(value) = self.number_arg(args, "Enter value: ", "value")? else {
            return Ok(());
        };
        self.manager.insert(key, value)?;
        writeln!(self.output, "Inserted key={}, value={}", key, value)?;
        Ok(())
    }

    fn cmd_search(&mut self, args: &mut SplitWhitespace<'_>) -> Result<()> {
        if !self.manager.is_open() {
            return Err(IndexError::NoFileOpen);
        }
        let Some(key) = self.number_arg(args, "Enter key: ", "key")? else {
            return Ok(());
        };
        let value = self.manager.search(key)?;
        writeln!(self.output, "Found key={}, value={}", key, value)?;
        Ok(())
    }

    fn cmd_load(&mut self, args: &mut SplitWhitespace<'_>) -> Result<()> {
        if !self.manager.is_open() {
            return Err(IndexError::NoFileOpen);
        }
        let Some(file) = self.file_arg(args, "Enter file name to load from: ")? else {
            return Ok(());
        };

        let report = self.manager.load(&file)?;
        for bad in report.malformed {
            writeln!(self.output, "Warning: {}", IndexError::from(bad))?;
        }
        for key in report.duplicates {
            writeln!(self.output, "Warning: duplicate key {} skipped", key)?;
        }
        writeln!(self.output, "Loaded {} pairs from {}", report.inserted, file)?;
        Ok(())
    }

    fn cmd_print(&mut self) -> Result<()> {
        // Render into a buffer first so a traversal error doesn't leave half a listing
        let mut listing = Vec::new();
        self.manager.print(&mut listing)?;

        writeln!(self.output, "Index contents:")?;
        self.output.write_all(&listing)?;
        Ok(())
    }

    fn cmd_extract(&mut self, args: &mut SplitWhitespace<'_>) -> Result<()> {
        if !self.manager.is_open() {
            return Err(IndexError::NoFileOpen);
        }
        let Some(file) = self.file_arg(args, "Enter file name to extract to: ")? else {
            return Ok(());
        };
        let count = self.manager.extract(&file)?;
        writeln!(self.output, "Extracted {} key-value pairs to {}", count, file)?;
        Ok(())
    }

    fn cmd_stats(&mut self) -> Result<()> {
        let stats = self.manager.stats()?;
        writeln!(self.output, "height:           {}", stats.height)?;
        writeln!(self.output, "entries:          {}", stats.entries)?;
        writeln!(self.output, "internal nodes:   {}", stats.internal_nodes)?;
        writeln!(self.output, "leaf nodes:       {}", stats.leaf_nodes)?;
        writeln!(self.output, "allocated blocks: {}", stats.allocated_blocks)?;
        Ok(())
    }

    fn cmd_check(&mut self) -> Result<()> {
        self.manager.check()?;
        writeln!(self.output, "Index OK.")?;
        Ok(())
    }
}
