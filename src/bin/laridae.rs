//! laridae CLI

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::*;
use tracing_subscriber::EnvFilter;

use laridae::{Config, InitOutcome, MigrationScript, Migrator, search_path_url};

#[derive(Parser)]
#[command(name = "laridae")]
#[command(version, about = "Zero-downtime PostgreSQL schema migrations", long_about = None)]
struct Cli {
    /// Config file (default: <config dir>/laridae/config.toml)
    #[arg(long, global = true, env = "LARIDAE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct Database {
    /// PostgreSQL connection string
    #[arg(long, env = "DATABASE_URL")]
    url: String,
}

#[derive(Subcommand)]
enum Command {
    /// Create the migration ledger
    Init(Database),
    /// Start a migration; old and new schema versions are both served
    Expand {
        /// Path to a migration script, or the script as inline JSON
        #[arg(env = "SCRIPT")]
        script: String,
        #[command(flatten)]
        db: Database,
    },
    /// Finish the expanded migration
    Contract(Database),
    /// Undo the expanded migration
    Rollback(Database),
    /// Clean up after a migration that failed part-way
    Restore(Database),
    /// Show the last migration
    Status(Database),
}

impl Command {
    fn phase(&self) -> &'static str {
        match self {
            Command::Init(_) => "Initialization",
            Command::Expand { .. } => "Expand",
            Command::Contract(_) => "Contract",
            Command::Rollback(_) => "Rollback",
            Command::Restore(_) => "Restore",
            Command::Status(_) => "Status",
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("LARIDAE_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let phase = cli.command.phase();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {:#}", "Error occurred:".red().bold(), e);
            eprintln!("{}", format!("{phase} terminated.").red());
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Command::Init(db) => {
            let mut migrator = Migrator::connect(&db.url, config).await?;
            match migrator.init().await? {
                InitOutcome::Created => println!("{} Initialization successful.", "✓".green()),
                InitOutcome::AlreadyInitialized => {
                    println!("{} Already initialized.", "○".dimmed())
                }
            }
        }
        Command::Expand { script, db } => {
            let script = MigrationScript::load(&script)?;
            let mut migrator = Migrator::connect(&db.url, config).await?;
            migrator.expand(&script).await?;
            println!("{} Expand completed ({}).", "✓".green(), script.after_schema().yellow());
            println!(
                "  New schema can be accessed using: {}",
                search_path_url(&db.url, &script.name).cyan()
            );
        }
        Command::Contract(db) => {
            let record = Migrator::connect(&db.url, config).await?.contract().await?;
            println!("{} Contract completed ({}).", "✓".green(), record.name.yellow());
        }
        Command::Rollback(db) => {
            let record = Migrator::connect(&db.url, config).await?.rollback().await?;
            println!("{} Rollback completed ({}).", "✓".green(), record.name.yellow());
        }
        Command::Restore(db) => {
            let record = Migrator::connect(&db.url, config).await?.restore().await?;
            println!("{} Restore completed ({}).", "✓".green(), record.name.yellow());
        }
        Command::Status(db) => {
            let mut migrator = Migrator::connect(&db.url, config).await?;
            match migrator.status().await? {
                Some(record) => {
                    println!("  Migration: {}", record.name.yellow());
                    println!("  Status:    {}", record.status.to_string().cyan());
                    if let Some(created_at) = record.created_at {
                        println!("  Started:   {}", created_at.format("%Y-%m-%d %H:%M:%S"));
                    }
                }
                None => println!("  {} No migrations have been run", "○".dimmed()),
            }
        }
    }

    Ok(())
}
