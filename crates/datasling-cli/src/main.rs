//! datasling CLI - Streaming table transfers between databases and CSV files.

use clap::{Args, Parser, Subcommand};
use datasling::core::props::ALLOW_BULK_EXPORT;
use datasling::{
    open_connection, Config, Endpoint, EndpointConfig, Orchestrator, Properties, SlingError,
};
use serde_json::json;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "datasling")]
#[command(about = "Streaming table transfers between databases and CSV files")]
#[command(version)]
struct Cli {
    /// Output JSON result to stdout
    #[arg(long, global = true)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text", global = true)]
    log_format: String,

    /// Log verbosity: debug, info, warn, error (RUST_LOG takes precedence)
    #[arg(long, default_value = "info", global = true)]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Transfer one table or file to another
    Run(RunArgs),

    /// Test a database connection
    Check {
        /// Connection URL
        #[arg(long)]
        conn: String,
    },
}

#[derive(Args, Default)]
struct RunArgs {
    /// Path to YAML transfer configuration
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Source connection URL
    #[arg(long)]
    src_conn: Option<String>,

    /// Source table as schema.table
    #[arg(long)]
    src_table: Option<String>,

    /// Source CSV file (`-` for stdin; .gz and .zst are decompressed)
    #[arg(long)]
    file: Option<PathBuf>,

    /// Target connection URL
    #[arg(long)]
    tgt_conn: Option<String>,

    /// Target table as schema.table
    #[arg(long)]
    tgt_table: Option<String>,

    /// Target CSV file (`-` for stdout; .gz and .zst are compressed)
    #[arg(long)]
    out: Option<PathBuf>,

    /// Drop the target table before loading
    #[arg(long)]
    drop: bool,

    /// Spool connection-to-connection transfers through this directory
    #[arg(long)]
    staging: Option<PathBuf>,

    /// Allow the dump-tool export path on the source connection
    #[arg(long)]
    bulk_export: bool,

    /// Rows buffered between source and target
    #[arg(long)]
    buffer_rows: Option<usize>,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), SlingError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format);

    match cli.command {
        Commands::Run(args) => {
            let config = build_config(args)?;
            let orchestrator = Orchestrator::new(config)?;
            let to_stdout =
                matches!(orchestrator.target(), Endpoint::File(p) if p.as_os_str() == "-");

            let cancel_token = setup_signal_handler();
            let result = orchestrator.run(Some(cancel_token)).await?;

            if cli.output_json {
                println!("{}", result.to_json()?);
            } else {
                let summary = format!(
                    "\nTransfer completed!\n  {} -> {}\n  Rows: {}\n  Duration: {:.2}s\n  Throughput: {} rows/sec{}",
                    result.source,
                    result.target,
                    result.rows,
                    result.duration_seconds,
                    result.rows_per_second,
                    if result.staged { "\n  Staged: yes" } else { "" }
                );
                // Keep stdout clean when it carries the CSV output.
                if to_stdout {
                    eprintln!("{}", summary);
                } else {
                    println!("{}", summary);
                }
            }
        }

        Commands::Check { conn } => {
            let mut connection = open_connection(&conn, &Properties::new())?;
            let start = Instant::now();
            let connected = connection.connect().await;
            let latency_ms = start.elapsed().as_millis() as u64;
            let closed = connection.close().await;

            if cli.output_json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&json!({
                        "kind": connection.kind().to_string(),
                        "address": connection.describe(),
                        "connected": connected.is_ok(),
                        "latency_ms": latency_ms,
                        "error": connected.as_ref().err().map(|e| e.to_string()),
                    }))?
                );
            } else {
                println!("Connection check:");
                println!(
                    "  {}: {} ({}ms)",
                    connection.describe(),
                    if connected.is_ok() { "OK" } else { "FAILED" },
                    latency_ms
                );
            }
            connected?;
            closed?;
        }
    }

    Ok(())
}

/// Load the optional YAML file and apply flag overrides on top.
fn build_config(args: RunArgs) -> Result<Config, SlingError> {
    let mut config = match &args.config {
        Some(path) => {
            let config = Config::load(path)?;
            info!("Loaded configuration from {:?}", path);
            config
        }
        None => Config::new(
            EndpointConfig::default(),
            EndpointConfig::default(),
            Default::default(),
        ),
    };

    // Endpoint flags replace that side of the file configuration.
    if args.file.is_some() || args.src_conn.is_some() || args.src_table.is_some() {
        config.source = EndpointConfig {
            file: args.file,
            conn: args.src_conn,
            table: args.src_table,
            properties: std::mem::take(&mut config.source.properties),
        };
    }
    if args.bulk_export {
        config
            .source
            .properties
            .insert(ALLOW_BULK_EXPORT.to_string(), "true".to_string());
    }

    if args.out.is_some() || args.tgt_conn.is_some() || args.tgt_table.is_some() {
        config.target = EndpointConfig {
            file: args.out,
            conn: args.tgt_conn,
            table: args.tgt_table,
            properties: std::mem::take(&mut config.target.properties),
        };
    }

    if args.drop {
        config.options.drop_target = true;
    }
    if let Some(dir) = args.staging {
        config.options.staging = Some(dir);
    }
    if let Some(rows) = args.buffer_rows {
        config.options.buffer_rows = rows;
    }

    config.validate()?;
    Ok(config)
}

/// Filter from `RUST_LOG` when set, otherwise from `--verbosity`.
fn log_filter(verbosity: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(verbosity_level(verbosity)))
}

fn verbosity_level(verbosity: &str) -> &'static str {
    match verbosity.to_lowercase().as_str() {
        "debug" => "debug",
        "warn" => "warn",
        "error" => "error",
        _ => "info",
    }
}

fn setup_logging(verbosity: &str, format: &str) {
    // Logs go to stderr; stdout may carry CSV data.
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(log_filter(verbosity))
        .with_writer(std::io::stderr)
        .with_target(false);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Setup signal handlers for graceful shutdown.
/// Handles both SIGINT (Ctrl-C) and SIGTERM.
/// Returns a CancellationToken that will be cancelled when a signal is received.
#[cfg(unix)]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();

    for (kind, name) in [
        (SignalKind::interrupt(), "SIGINT"),
        (SignalKind::terminate(), "SIGTERM"),
    ] {
        let token = cancel_token.clone();
        match signal(kind) {
            Ok(mut stream) => {
                tokio::spawn(async move {
                    stream.recv().await;
                    eprintln!("\nReceived {}. Cancelling transfer...", name);
                    token.cancel();
                });
            }
            Err(e) => warn!("Failed to install {} handler: {}", name, e),
        }
    }

    cancel_token
}

/// Setup signal handler for Windows (only Ctrl-C)
#[cfg(not(unix))]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C. Cancelling transfer...");
            token.cancel();
        }
    });

    cancel_token
}
