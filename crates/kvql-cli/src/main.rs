//! kvql Command-Line Client
//!
//! Runs resolved queries, written as JSON documents, against an embedded
//! key-value store.

mod formatter;
mod runner;

use clap::{Parser, Subcommand};
use formatter::OutputFormat;
use kvql_core::query::{DEFAULT_PAGE_SIZE, DEFAULT_STORAGE_NAME};
use kvql_core::storage::DEFAULT_MAX_HANDLES;
use kvql_core::{ExecutorConfig, KvStorage, PoolConfig, StoreConfig};
use runner::Runner;
use std::path::PathBuf;
use std::time::Duration;

/// kvql Command-Line Client
#[derive(Parser, Debug)]
#[command(name = "kvql")]
#[command(version, about = "Relational queries over key-value structures")]
pub struct Args {
    /// Data directory
    #[arg(short = 'd', long, default_value = "./kvql_data")]
    pub data_path: PathBuf,

    /// Use a temporary store that is deleted on exit
    #[arg(long)]
    pub temporary: bool,

    /// Register entity definitions from a JSON file before running
    #[arg(long)]
    pub catalog: Option<PathBuf>,

    /// Entries requested per scan round
    #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
    pub page_size: usize,

    /// Reject entities with an unrecognized structure type
    #[arg(long)]
    pub strict: bool,

    /// Read the subjects of a select concurrently
    #[arg(long)]
    pub parallel: bool,

    /// Maximum number of store handles
    #[arg(long, default_value_t = DEFAULT_MAX_HANDLES)]
    pub max_handles: usize,

    /// Seconds to wait for a free store handle
    #[arg(long, default_value_t = 5)]
    pub acquire_timeout: u64,

    /// Storage name reported in errors
    #[arg(long, default_value = DEFAULT_STORAGE_NAME)]
    pub storage_name: String,

    /// Output format
    #[arg(long, default_value = "table", value_enum)]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Execute a single query document
    Exec {
        /// Query JSON, or @path to read it from a file
        query: String,
    },
    /// Execute query documents from a file, one per line
    Script {
        /// Script file
        file: PathBuf,
    },
    /// Register entity definitions from a JSON file
    Register {
        /// JSON array of entity definitions
        file: PathBuf,
    },
    /// List registered entities
    Entities,
}

impl Args {
    /// Build store, pool and executor configuration from the arguments.
    fn into_config(&self) -> (StoreConfig, PoolConfig, ExecutorConfig) {
        let store = if self.temporary {
            StoreConfig::temporary()
        } else {
            StoreConfig::new(&self.data_path)
        };
        let pool = PoolConfig::new(self.max_handles)
            .with_acquire_timeout(Duration::from_secs(self.acquire_timeout));
        let executor = ExecutorConfig::default()
            .with_page_size(self.page_size)
            .with_strict_structure_types(self.strict)
            .with_parallel_subjects(self.parallel);
        (store, pool, executor)
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("kvql=info,kvql_core=warn")),
        )
        .init();

    let args = Args::parse();

    match run(args) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

fn run(args: Args) -> Result<i32, Box<dyn std::error::Error>> {
    let (store_config, pool_config, executor_config) = args.into_config();
    let storage = KvStorage::open(store_config, pool_config, executor_config)?
        .with_name(args.storage_name.clone());
    let runner = Runner::new(storage, formatter::create_formatter(args.format));

    if let Some(path) = &args.catalog {
        let json = std::fs::read_to_string(path)?;
        runner.register(&json)?;
    }

    let code = match &args.command {
        Command::Exec { query } => {
            let input = match query.strip_prefix('@') {
                Some(path) => std::fs::read_to_string(path)?,
                None => query.clone(),
            };
            match runner.execute(&input) {
                Ok(output) => {
                    println!("{}", output);
                    0
                }
                Err(e) => {
                    eprintln!("{}", runner.format_error(&e));
                    1
                }
            }
        }
        Command::Script { file } => {
            let content = std::fs::read_to_string(file)?;
            let failures = runner.run_script(&content, &mut |output| println!("{}", output));
            if failures > 0 {
                1
            } else {
                0
            }
        }
        Command::Register { file } => {
            let json = std::fs::read_to_string(file)?;
            println!("{}", runner.register(&json)?);
            0
        }
        Command::Entities => {
            println!("{}", runner.entities());
            0
        }
    };

    runner.flush()?;
    Ok(code)
}
