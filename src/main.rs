//! colguard CLI - change a SQL Server column without losing its indexes and constraints.

use clap::{Parser, Subcommand};
use colguard_lib::commands::{self, ModifyArgs};
use colguard_lib::{AppConfig, GuardError};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "colguard")]
#[command(about = "Dependency-safe column modification for SQL Server")]
#[command(version)]
struct Cli {
    /// Path to JSON configuration file [default: colguard.json if present]
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log verbosity: error, warn, info, debug, trace (RUST_LOG overrides)
    #[arg(long, default_value = "info",
          value_parser = ["error", "warn", "info", "debug", "trace"])]
    verbosity: String,

    /// Print results as JSON to stdout
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the indexes and constraints that reference a column
    Scan {
        /// Table name: table, schema.table or [schema].[table]
        table: String,
        column: String,
    },

    /// Show the drop and recreate statements without running them
    Plan { table: String, column: String },

    /// Alter a column, dropping and recreating its dependencies around the change
    Modify {
        table: String,
        column: String,

        /// New column type, e.g. nvarchar(500)
        #[arg(long = "type")]
        data_type: String,

        /// Allow NULLs (default: NOT NULL)
        #[arg(long)]
        nullable: bool,

        /// New default expression; replaces any existing default constraint
        #[arg(long)]
        default: Option<String>,

        /// Print the statements that would run without executing them
        #[arg(long)]
        dry_run: bool,
    },

    /// Write a migration script with UP and DOWN sections
    Scaffold {
        table: String,
        column: String,

        /// New column type for the UP section
        #[arg(long = "type")]
        data_type: Option<String>,

        /// Allow NULLs in the UP section
        #[arg(long)]
        nullable: bool,

        /// Output directory
        #[arg(long, default_value = "migrations")]
        out: PathBuf,
    },

    /// Recreate objects left dropped by an interrupted run
    Recover {
        /// Run to recover [default: most recent]
        #[arg(long)]
        run_id: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    setup_logging(&cli.verbosity);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => match e.downcast_ref::<GuardError>() {
            Some(err) => {
                let outer = e.to_string();
                if outer != err.to_string() {
                    eprintln!("{}", outer);
                }
                eprintln!("{}", err.format_detailed());
                ExitCode::from(err.exit_code())
            }
            None => {
                eprintln!("Error: {:#}", e);
                ExitCode::FAILURE
            }
        },
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = AppConfig::load(cli.config.as_deref())?;
    log::debug!("Journal at {:?}", config.journal_path);

    match cli.command {
        Commands::Scan { table, column } => commands::scan(&config, &table, &column, cli.json).await,
        Commands::Plan { table, column } => commands::plan(&config, &table, &column, cli.json).await,
        Commands::Modify {
            table,
            column,
            data_type,
            nullable,
            default,
            dry_run,
        } => {
            let args = ModifyArgs {
                table,
                column,
                data_type,
                nullable,
                default,
                dry_run,
            };
            commands::modify(&config, &args, cli.json).await
        }
        Commands::Scaffold {
            table,
            column,
            data_type,
            nullable,
            out,
        } => {
            commands::scaffold(&config, &table, &column, data_type.as_deref(), nullable, &out)
                .await
        }
        Commands::Recover { run_id } => commands::recover(&config, run_id.as_deref(), cli.json).await,
    }
}

fn setup_logging(verbosity: &str) {
    let env = env_logger::Env::default().default_filter_or(verbosity);
    let _ = env_logger::Builder::from_env(env)
        .format_timestamp_millis()
        .target(env_logger::Target::Stderr)
        .try_init();
}
