//! Kiln CLI entry point

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod config;
mod plugins;

use config::CliOverrides;

#[derive(Parser)]
#[command(name = "kiln")]
#[command(about = "Incremental, plugin-driven asset builds", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Project root path (defaults to current directory)
    #[arg(short, long, global = true, default_value = ".")]
    root: PathBuf,
}

#[derive(Args)]
struct BuildArgs {
    /// Entry files, relative to the project root (overrides kiln.toml)
    entries: Vec<PathBuf>,

    /// Maximum number of files processed at once
    #[arg(short, long)]
    concurrency: Option<usize>,

    /// Output directory, relative to the project root
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Neither read nor write the graph cache
    #[arg(long)]
    no_cache: bool,
}

impl From<BuildArgs> for CliOverrides {
    fn from(args: BuildArgs) -> Self {
        CliOverrides {
            entries: args.entries,
            output: args.output,
            concurrency: args.concurrency,
            no_cache: args.no_cache,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Parse and write the entry files and everything they depend on
    Build(BuildArgs),
    /// Discover and read the dependency graph without writing anything
    Parse(BuildArgs),
    /// Build, then rebuild whenever a file in the graph changes
    Watch(BuildArgs),
    /// Clear the cache
    Clear,
    /// Show version
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(format!("kiln={log_level}")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::debug!("Kiln v{}", env!("CARGO_PKG_VERSION"));
    tracing::debug!("Project root: {}", cli.root.display());

    match cli.command {
        Commands::Build(args) => commands::build(cli.root, args.into()).await,
        Commands::Parse(args) => commands::parse(cli.root, args.into()).await,
        Commands::Watch(args) => commands::watch(cli.root, args.into()).await,
        Commands::Clear => commands::clear(cli.root),
        Commands::Version => {
            println!("Kiln v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
