//! # Course Roster CLI (`roster`)
//!
//! The `roster` binary initializes the database, seeds reference data,
//! runs the REST server, and inspects cohort partitions.
//!
//! ## Usage
//!
//! ```bash
//! roster --config ./config/roster.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `roster init` | Create the SQLite database and the base collections |
//! | `roster seed` | Insert default courses, years, months and batches |
//! | `roster serve` | Start the HTTP server |
//! | `roster partition <course> <year> <month> <batch>` | Print a cohort's partition name |
//! | `roster stats` | Per-collection document counts |
//!
//! Log verbosity follows `RUST_LOG` (default `info`); logs go to stderr.

use clap::{Parser, Subcommand};
use course_roster::{config, migrate, seed, server, stats};
use course_roster_core::partition::partition_name;
use std::path::PathBuf;

/// Course Roster: course, batch and student administration with
/// per-cohort membership partitions.
#[derive(Parser)]
#[command(
    name = "roster",
    about = "Course Roster: course, batch and student administration backend",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/roster.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database.
    ///
    /// Creates the SQLite file and the base collections with their unique
    /// keys. Safe to run repeatedly.
    Init,

    /// Start the HTTP server on `[server].bind`.
    Serve,

    /// Insert the `[seed]` reference data, reusing existing records.
    Seed,

    /// Print the partition name for a cohort. Needs no configuration.
    Partition {
        course: String,
        year: String,
        month: String,
        batch: String,
    },

    /// Show document counts per collection, partitions included.
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    if let Commands::Partition {
        course,
        year,
        month,
        batch,
    } = &cli.command
    {
        println!("{}", partition_name(course, year, month, batch));
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Seed => {
            seed::run_seed(&cfg).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Partition { .. } => {}
    }

    Ok(())
}
