use clap::{Args, Parser, Subcommand};
use flatbridge::data_transfer::mapper::ColumnMappingRule;
use flatbridge::db::metadata;
use flatbridge::{
    ClickHouseConnector, ClickHouseDefaults, ConnectionDescriptor, ConnectionRegistry,
    FlatFileInput, Row, SourceSpec, TargetSpec, TransferError, TransferOrchestrator,
    TransferRequest, TransferSettings, TransferState, TransferStatus,
};
use log::{error, info};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

/// Streams tables between ClickHouse and delimited flat files
#[derive(Parser)]
#[command(name = "flatbridge")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    connection: ConnectionArgs,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Overrides for the CLICKHOUSE_* environment defaults
#[derive(Args)]
struct ConnectionArgs {
    #[arg(long, global = true)]
    host: Option<String>,

    #[arg(long, global = true)]
    port: Option<u16>,

    #[arg(long, global = true)]
    database: Option<String>,

    #[arg(long, global = true)]
    user: Option<String>,

    #[arg(long, global = true)]
    password: Option<String>,
}

impl ConnectionArgs {
    fn resolve(self, defaults: ClickHouseDefaults) -> ConnectionDescriptor {
        ClickHouseDefaults {
            host: self.host.unwrap_or(defaults.host),
            port: self.port.unwrap_or(defaults.port),
            database: self.database.unwrap_or(defaults.database),
            user: self.user.unwrap_or(defaults.user),
            password: self.password.unwrap_or(defaults.password),
        }
        .descriptor()
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Check that the server is reachable with these credentials
    Validate,

    /// List tables in the database
    Tables,

    /// Show a table's columns and types
    Describe {
        table: String,
    },

    /// Print the first rows of a projection
    Preview {
        table: String,

        /// Comma-separated column list, in output order
        #[arg(long, value_delimiter = ',', required = true)]
        columns: Vec<String>,

        /// Row cap (defaults to FLATBRIDGE_PREVIEW_LIMIT)
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Export a projection to <output dir>/<table>_export.csv
    Export {
        table: String,

        /// Comma-separated column list, in output order
        #[arg(long, value_delimiter = ',', required = true)]
        columns: Vec<String>,

        #[arg(long, default_value_t = ',')]
        delimiter: char,
    },

    /// Load a delimited file into a table
    Import {
        file: PathBuf,

        table: String,

        #[arg(long, default_value_t = ',')]
        delimiter: char,

        /// Skip the header/record-width check
        #[arg(long)]
        no_validate: bool,

        /// Rename a file column on the way in, as source=target (repeatable)
        #[arg(long = "map", value_parser = parse_mapping)]
        mappings: Vec<ColumnMappingRule>,
    },
}

fn parse_mapping(raw: &str) -> Result<ColumnMappingRule, String> {
    match raw.split_once('=') {
        Some((source, target)) if !source.trim().is_empty() && !target.trim().is_empty() => {
            Ok(ColumnMappingRule::new(source.trim(), target.trim()))
        }
        _ => Err(format!("expected source=target, got '{}'", raw)),
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();
}

fn print_json<T: Serialize>(value: &T) -> Result<(), TransferError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| TransferError::validation(format!("Failed to render output: {}", e)))?;
    println!("{}", text);
    Ok(())
}

/// Rows as JSON objects keyed in the requested column order.
fn ordered_rows(columns: &[String], rows: &[Row]) -> Vec<serde_json::Map<String, serde_json::Value>> {
    rows.iter()
        .map(|row| {
            columns
                .iter()
                .map(|column| {
                    let value = row
                        .get(column)
                        .map(|value| value.to_json())
                        .unwrap_or(serde_json::Value::Null);
                    (column.clone(), value)
                })
                .collect()
        })
        .collect()
}

fn transfer_exit(status: &TransferStatus) -> Result<ExitCode, TransferError> {
    print_json(status)?;
    if status.state == TransferState::Completed {
        info!(
            "Transfer {} completed ({} records)",
            status.id, status.records_processed
        );
        Ok(ExitCode::SUCCESS)
    } else {
        error!(
            "Transfer {} failed: {}",
            status.id,
            status.error.as_deref().unwrap_or("unknown error")
        );
        Ok(ExitCode::FAILURE)
    }
}

async fn dispatch(
    command: Commands,
    registry: Arc<ConnectionRegistry>,
    descriptor: ConnectionDescriptor,
    settings: TransferSettings,
) -> Result<ExitCode, TransferError> {
    match command {
        Commands::Validate => {
            let response = metadata::validate_connection(&registry, &descriptor).await;
            print_json(&response)?;
            Ok(if response.success {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Commands::Tables => {
            print_json(&metadata::list_tables(&registry, &descriptor).await?)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Describe { table } => {
            print_json(&metadata::describe_table(&registry, &descriptor, &table).await?)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Preview {
            table,
            columns,
            limit,
        } => {
            let limit = limit.unwrap_or(settings.preview_limit);
            let rows = metadata::preview(&registry, &descriptor, &table, &columns, limit).await?;
            print_json(&ordered_rows(&columns, &rows))?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Export {
            table,
            columns,
            delimiter,
        } => {
            let orchestrator = TransferOrchestrator::new(registry, settings);
            let request = TransferRequest {
                source: SourceSpec::Database {
                    connection: descriptor,
                    table: table.clone(),
                    columns,
                },
                target: TargetSpec::FlatFile { table, delimiter },
            };
            transfer_exit(&orchestrator.run_transfer(request).await)
        }
        Commands::Import {
            file,
            table,
            delimiter,
            no_validate,
            mappings,
        } => {
            let orchestrator = TransferOrchestrator::new(registry, settings);
            let request = TransferRequest {
                source: SourceSpec::FlatFile {
                    input: FlatFileInput::Path { path: file },
                    delimiter,
                    validate: !no_validate,
                },
                target: TargetSpec::Database {
                    connection: descriptor,
                    table,
                    mapping: mappings,
                },
            };
            transfer_exit(&orchestrator.run_transfer(request).await)
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode, TransferError> {
    let settings = TransferSettings::from_env()?;
    let descriptor = cli.connection.resolve(ClickHouseDefaults::from_env()?);

    let registry = Arc::new(ConnectionRegistry::new(
        Arc::new(ClickHouseConnector::new(settings.timeout)),
        settings.timeout,
    ));

    let outcome = dispatch(cli.command, registry.clone(), descriptor, settings).await;
    registry.release_all().await;
    outcome
}

#[tokio::main]
async fn main() -> ExitCode {
    // .env.local wins over .env; neither is required
    dotenvy::from_filename(".env.local").ok();
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            error!("{}", err);
            eprintln!("error [{}]: {}", err.kind(), err);
            ExitCode::FAILURE
        }
    }
}
