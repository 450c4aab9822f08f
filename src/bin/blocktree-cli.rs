//! blocktree interactive shell
//!
//! Reads commands from stdin and prints results to stdout. Logs go to
//! stderr so they never mix with command output.

use anyhow::Context;
use blocktree::{IndexConfig, IndexManager, Shell};
use clap::Parser;
use std::io::{self, IsTerminal};
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "blocktree-cli",
    version,
    about = "Interactive shell for disk-resident B-tree index files"
)]
struct Cli {
    /// Index file to open at startup
    file: Option<PathBuf>,

    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Set the logging level
    #[arg(short, long, value_enum, default_value = "warn")]
    log_level: LogLevel,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // RUST_LOG overrides --log-level
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(Level::from(cli.log_level)).into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let config = match &cli.config {
        Some(path) => IndexConfig::from_json_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => IndexConfig::default(),
    };
    tracing::debug!(?config, durability = config.durability.description(), "starting shell");

    let mut manager = IndexManager::new(config);
    if let Some(path) = &cli.file {
        manager
            .open(path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        println!("Opened index file: {}", path.display());
    }

    let stdin = io::stdin();
    let interactive = stdin.is_terminal();
    if interactive {
        println!("blocktree v{}", env!("CARGO_PKG_VERSION"));
        println!("Type 'help' for commands, 'quit' to exit.");
    }

    let mut shell = Shell::new(manager, stdin.lock(), io::stdout().lock()).with_prompt(interactive);
    shell.run()?;
    Ok(())
}
