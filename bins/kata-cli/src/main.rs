mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "kata-cli")]
#[command(about = "Kata CLI - Check, run and grade Python submissions locally", long_about = None)]
struct Cli {
    /// Runner config file (defaults to config/runner.json when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the wall-clock timeout in milliseconds
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the static checks only
    Check {
        /// Python source file
        file: PathBuf,
    },

    /// Run a source file without grading
    Run {
        /// Python source file
        file: PathBuf,
    },

    /// Grade a source file against a test suite
    Grade {
        /// Python source file
        file: PathBuf,

        /// JSON test cases (array, or object with a testCases field)
        #[arg(short, long)]
        tests: PathBuf,
    },

    /// Print the generated test harness program
    Harness {
        /// Python source file
        file: PathBuf,

        /// JSON test cases (array, or object with a testCases field)
        #[arg(short, long)]
        tests: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries results; logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = commands::load_config(cli.config.as_deref(), cli.timeout_ms)?;

    match cli.command {
        Commands::Check { file } => {
            commands::check(&config, &file)?;
        }
        Commands::Run { file } => {
            commands::run(&config, &file).await?;
        }
        Commands::Grade { file, tests } => {
            if !commands::grade(&config, &file, &tests).await? {
                std::process::exit(1);
            }
        }
        Commands::Harness { file, tests } => {
            commands::print_harness(&config, &file, &tests)?;
        }
    }

    Ok(())
}
