//! tablegen CLI - schema-driven CRUD code generation over a JSON metadata store.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use tablegen_lib::commands;
use tablegen_lib::logging::init_tracing;
use tablegen_lib::{AppState, CoreConfig, CoreError, Result};

#[derive(Parser)]
#[command(name = "tablegen")]
#[command(about = "Generate CRUD code from live database tables")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Metadata store directory (overrides store.path)
    #[arg(long)]
    store: Option<PathBuf>,

    /// Log format: text or json
    #[arg(long)]
    log_format: Option<String>,

    /// Log verbosity: debug, info, warn, error
    #[arg(long)]
    verbosity: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List stored connections (passwords omitted)
    Connections,

    /// List the tables of a connection
    Tables {
        #[arg(long)]
        connection: String,
    },

    /// Print column drafts for a table without saving them
    Import {
        #[arg(long)]
        connection: String,
        #[arg(long)]
        table: String,
    },

    /// Import a generator's table as its initial column set
    Attach {
        #[arg(long)]
        generator: String,
    },

    /// Reconcile a generator's columns with the live table
    Sync {
        #[arg(long)]
        generator: String,
    },

    /// Delete a generator together with its columns
    DeleteGenerator {
        #[arg(long)]
        generator: String,
    },

    /// Print the files a generator renders
    Preview {
        #[arg(long)]
        generator: String,
    },

    /// Write the rendered files as a zip archive
    Generate {
        #[arg(long)]
        generator: String,

        /// Output path [default: generated-code.zip]
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Check that a stored connection answers
    TestConnection {
        #[arg(long)]
        connection: String,
    },

    /// Run one SQL statement; Ctrl-C cancels it
    Exec {
        #[arg(long)]
        connection: String,
        sql: String,
    },

    /// Show one page of a table
    Browse {
        #[arg(long)]
        connection: String,
        #[arg(long)]
        table: String,
        #[arg(long, default_value = "1")]
        page: u32,
        #[arg(long, default_value = "20")]
        page_size: u32,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::FAILURE
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn load_config(cli: &Cli) -> Result<CoreConfig> {
    let mut config = match &cli.config {
        Some(path) => CoreConfig::load(path)?,
        None => CoreConfig::default(),
    };
    if let Some(store) = &cli.store {
        config.store.path = store.clone();
    }
    if let Some(format) = &cli.log_format {
        config.logging.format = format.clone();
    }
    if let Some(level) = &cli.verbosity {
        config.logging.level = level.clone();
    }
    config.validate()?;
    Ok(config)
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    init_tracing(&config.logging);
    info!("Using metadata store {}", config.store.path.display());

    let state = AppState::open(config)?;
    let outcome = dispatch(&state, cli.command).await;
    state.registry.close_all().await;
    outcome
}

async fn dispatch(state: &AppState, command: Commands) -> Result<()> {
    match command {
        Commands::Connections => print_json(&commands::list_connections(state).await?),
        Commands::Tables { connection } => {
            print_json(&commands::list_tables(state, &connection).await?)
        }
        Commands::Import { connection, table } => {
            print_json(&commands::import_columns(state, &connection, &table).await?)
        }
        Commands::Attach { generator } => {
            print_json(&commands::attach_imported_columns(state, &generator).await?)
        }
        Commands::Sync { generator } => print_json(&commands::sync_columns(state, &generator).await?),
        Commands::DeleteGenerator { generator } => {
            commands::delete_generator(state, &generator).await
        }
        Commands::Preview { generator } => {
            print_json(&commands::preview_code(state, &generator).await?)
        }
        Commands::Generate { generator, output } => {
            let archive = commands::generate_code(state, &generator).await?;
            let path = output.unwrap_or_else(|| PathBuf::from(&archive.filename));
            tokio::fs::write(&path, &archive.bytes).await?;
            info!(
                "Wrote {} ({} bytes, {})",
                path.display(),
                archive.bytes.len(),
                archive.content_type
            );
            Ok(())
        }
        Commands::TestConnection { connection } => {
            let conn = state.store.get_connection(&connection).await?;
            let result = commands::test_connection(state, &conn).await;
            print_json(&result)?;
            if result.ok {
                Ok(())
            } else {
                Err(CoreError::Connection(result.message))
            }
        }
        Commands::Exec { connection, sql } => {
            let cancel = CancellationToken::new();
            let watcher = {
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        cancel.cancel();
                    }
                })
            };
            let outcome =
                commands::execute_sql_cancellable(state, &connection, &sql, &cancel).await;
            watcher.abort();
            print_json(&outcome?)
        }
        Commands::Browse {
            connection,
            table,
            page,
            page_size,
        } => print_json(
            &commands::get_table_data(state, &connection, &table, page, page_size).await?,
        ),
    }
}
