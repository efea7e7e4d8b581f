use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "brigade",
    about = "Bucket brigade -- file-backed record queues and stores",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// TOML file with store settings (chunk size, shard shape, polling)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Load a tab-separated listing into a record store
    LoadTsv(LoadArgs),
    /// Load a JSON dump (one `{...},` document per line) into a record store
    LoadDump(LoadArgs),
    /// Compare two record stores by id
    Diff(DiffArgs),
    /// Show ledger positions and file counts
    Stat(StatArgs),
    /// Exercise a store or queue with synthetic records
    Mule(MuleArgs),
}

#[derive(Args)]
pub struct LoadArgs {
    /// Input file
    pub file: PathBuf,
    /// Store directory
    pub db: PathBuf,
    /// Place data files here instead of the store directory
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
}

#[derive(Args)]
pub struct DiffArgs {
    /// Previous store
    pub prev: PathBuf,
    /// Next store
    pub next: PathBuf,
    #[arg(long)]
    pub prev_data_dir: Option<PathBuf>,
    #[arg(long)]
    pub next_data_dir: Option<PathBuf>,
    /// Adopt the layout recorded in each store instead of requiring a match
    #[arg(long)]
    pub permissive: bool,
}

#[derive(Args)]
pub struct StatArgs {
    /// Brigade directory
    pub db: PathBuf,
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
    /// Treat the directory as a queue
    #[arg(long)]
    pub queue: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum MuleMode {
    Write,
    Read,
    Seek,
    Both,
}

#[derive(Args)]
pub struct MuleArgs {
    pub mode: MuleMode,
    /// Brigade directory
    #[arg(default_value = "tmp/bb1")]
    pub db: PathBuf,
    /// Records to write, or seeks to perform
    #[arg(short = 'n', long, default_value = "1000000")]
    pub count: u64,
    /// Use a queue instead of a store
    #[arg(long)]
    pub queue: bool,
}
