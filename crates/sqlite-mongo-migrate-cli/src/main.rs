//! sqlite-mongo-migrate CLI - SQLite to MongoDB migration.

use clap::{Parser, Subcommand};
use serde_json::json;
use sqlite_mongo_migrate::{health_check, Config, Database, MigrateError, Orchestrator};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "sqlite-mongo-migrate")]
#[command(about = "Migrate the bot's SQLite database into MongoDB")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file (default: environment only)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Export SQLite tables to JSON files
    Export,

    /// Transform exported files into document form
    Transform,

    /// Import transformed files into MongoDB (replaces collection contents)
    Import,

    /// Export, transform, import and verify
    Migrate,

    /// Count documents per collection
    Verify {
        /// Also check that foreign keys resolve
        #[arg(long)]
        references: bool,
    },

    /// Backfill relational key fields on migrated documents
    Repair,

    /// Test the MongoDB connection
    HealthCheck,

    /// Print the next identifier for a collection
    NextId {
        /// Collection name
        collection: String,
    },

    /// Print the effective configuration (connection password redacted)
    ShowConfig,
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

async fn run() -> Result<(), MigrateError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format)
        .map_err(|e| MigrateError::Config(e.to_string()))?;

    let config = Config::resolve(cli.config.as_deref())?;
    match &cli.config {
        Some(path) => info!("Loaded configuration from {:?}", path),
        None => info!("Loaded configuration from environment"),
    }

    let cancel_token = setup_signal_handler().await?;

    match cli.command {
        Commands::ShowConfig => show_config(&config, cli.output_json)?,

        Commands::Export => {
            let orchestrator = Orchestrator::new(config)?.with_cancel(cancel_token);
            let report = orchestrator.export().await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("\nExport completed!");
                println!("  Directory: {}", orchestrator.config().migration.export_dir.display());
                println!("  Tables: {}", report.tables.len());
                println!("  Records: {}", report.total_records());
                if !report.failed_tables().is_empty() {
                    println!("  Failed tables: {:?}", report.failed_tables());
                }
            }
        }

        Commands::Transform => {
            let orchestrator = Orchestrator::new(config)?.with_cancel(cancel_token);
            let report = orchestrator.transform().await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("\nTransform completed!");
                println!(
                    "  Directory: {}",
                    orchestrator.config().migration.transform_dir.display()
                );
                println!("  Records: {}", report.total_records());
                if !report.failed_tables().is_empty() {
                    println!("  Failed tables: {:?}", report.failed_tables());
                }
            }
        }

        Commands::Import => {
            let db = Database::connect(config.require_store()?).await?;
            let outcome = async {
                let orchestrator = Orchestrator::new(config)?.with_cancel(cancel_token);
                let report = orchestrator.import(&db).await?;

                let expected: HashMap<_, _> = orchestrator
                    .collections()
                    .iter()
                    .zip(report.collections.iter())
                    .filter(|(_, c)| c.error.is_none() && !c.skipped)
                    .map(|(name, c)| (*name, c.imported))
                    .collect();
                let verify = orchestrator.verify(&db, &expected).await;
                Ok::<_, MigrateError>((report, verify))
            }
            .await;
            let (report, verify) = close_after(&db, outcome).await?;

            if cli.output_json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&json!({"import": report, "verify": verify}))?
                );
            } else {
                println!("\nImport completed!");
                println!("  Documents: {}", report.total_imported());
                if !report.failed_collections().is_empty() {
                    println!("  Failed collections: {:?}", report.failed_collections());
                }
                for m in verify.mismatches() {
                    println!("  Count mismatch: {}", m.collection);
                }
            }
        }

        Commands::Migrate => {
            let db = Database::connect(config.require_store()?).await?;
            let outcome = async {
                Orchestrator::new(config)?
                    .with_cancel(cancel_token)
                    .run(&db)
                    .await
            }
            .await;
            let result = close_after(&db, outcome).await?;

            if cli.output_json {
                println!("{}", result.to_json()?);
            } else {
                println!("\nMigration completed!");
                println!("  Run ID: {}", result.run_id);
                println!("  Status: {}", result.status);
                println!("  Duration: {:.2}s", result.duration_seconds);
                println!("  Collections: {}", result.collections_total);
                println!("  Documents: {}", result.documents_imported);
                if !result.failed_collections.is_empty() {
                    println!("  Failed collections: {:?}", result.failed_collections);
                }
            }
        }

        Commands::Verify { references } => {
            let db = Database::connect(config.require_store()?).await?;
            let outcome = async {
                let orchestrator = Orchestrator::new(config)?;
                let counts = orchestrator.verify(&db, &HashMap::new()).await;
                let refs = if references {
                    Some(orchestrator.check_references(&db).await?)
                } else {
                    None
                };
                Ok::<_, MigrateError>((counts, refs))
            }
            .await;
            let (counts, refs) = close_after(&db, outcome).await?;

            if cli.output_json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&json!({"counts": counts, "references": refs}))?
                );
            } else {
                println!("Document counts:");
                for c in &counts.collections {
                    match (&c.actual, &c.error) {
                        (Some(n), _) => println!("  {}: {}", c.collection, n),
                        (None, Some(err)) => println!("  {}: ERROR {}", c.collection, err),
                        (None, None) => println!("  {}: -", c.collection),
                    }
                }
                println!("  Total: {}", counts.total_documents());

                if let Some(refs) = refs {
                    println!("\nReferences:");
                    for check in &refs.checks {
                        println!(
                            "  {}.{} -> {}: {} checked, {} dangling",
                            check.collection,
                            check.field,
                            check.references,
                            check.checked,
                            check.dangling
                        );
                    }
                    println!(
                        "\n  Overall: {}",
                        if refs.is_clean() { "CLEAN" } else { "DANGLING REFERENCES" }
                    );
                }
            }
        }

        Commands::Repair => {
            let db = Database::connect(config.require_store()?).await?;
            let outcome = async {
                Orchestrator::new(config)?
                    .with_cancel(cancel_token)
                    .repair(&db)
                    .await
            }
            .await;
            let report = close_after(&db, outcome).await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("\nRepair completed!");
                for c in &report.collections {
                    match &c.error {
                        Some(err) => println!("  {}.{}: ERROR {}", c.collection, c.field, err),
                        None => println!(
                            "  {}.{}: {} of {} updated",
                            c.collection, c.field, c.updated, c.candidates
                        ),
                    }
                }
                println!("  Total updated: {}", report.total_updated());
            }
        }

        Commands::HealthCheck => {
            let result = health_check(config.require_store()?).await;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Health Check Results:");
                println!(
                    "  Target ({}): {} ({}ms)",
                    result.store_type,
                    if result.healthy { "OK" } else { "FAILED" },
                    result.latency_ms
                );
                println!("  Database: {}", result.database);
                if let Some(ref err) = result.error {
                    println!("    Error: {}", err);
                }
                println!(
                    "\n  Overall: {}",
                    if result.healthy { "HEALTHY" } else { "UNHEALTHY" }
                );
            }

            if !result.healthy {
                return Err(MigrateError::Connection("Health check failed".to_string()));
            }
        }

        Commands::NextId { collection } => {
            let db = Database::connect(config.require_store()?).await?;
            let id = db.next_identifier(&collection).await;
            db.close().await;

            if cli.output_json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&json!({"collection": collection, "next_id": id.to_string()}))?
                );
            } else {
                println!("{}", id);
            }
        }
    }

    Ok(())
}

/// Close the store whatever the outcome of the work done on it.
async fn close_after<T>(
    db: &Database,
    outcome: Result<T, MigrateError>,
) -> Result<T, MigrateError> {
    db.close().await;
    outcome
}

fn show_config(config: &Config, output_json: bool) -> Result<(), MigrateError> {
    let store_ready = config.require_store().is_ok();
    let collections: Vec<String> = config
        .selected_collections()?
        .iter()
        .map(|c| c.to_string())
        .collect();
    let uri = config.target.uri.as_ref().map(|_| config.target.display_uri());

    if output_json {
        let value = json!({
            "source": {"path": config.source.path},
            "target": {"uri": uri, "database": config.target.database},
            "migration": {
                "export_dir": config.migration.export_dir,
                "transform_dir": config.migration.transform_dir,
                "collections": collections,
            },
            "store_configured": store_ready,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!("Configuration:");
        println!("  SQLite path: {}", config.source.path.display());
        println!("  MongoDB URI: {}", uri.as_deref().unwrap_or("(not set)"));
        println!("  MongoDB database: {}", config.target.database);
        println!("  Export dir: {}", config.migration.export_dir.display());
        println!("  Transform dir: {}", config.migration.transform_dir.display());
        println!("  Collections: {}", collections.join(", "));
        println!(
            "\n  Store: {}",
            if store_ready { "CONFIGURED" } else { "NOT CONFIGURED (set MONGODB_URI)" }
        );
    }

    Ok(())
}

fn setup_logging(verbosity: &str, format: &str) -> Result<(), String> {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        other => return Err(format!("unknown verbosity '{}'", other)),
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    match format {
        "json" => subscriber.json().init(),
        "text" => subscriber.init(),
        other => return Err(format!("unknown log format '{}'", other)),
    }

    Ok(())
}

/// Setup signal handlers for graceful shutdown.
/// Handles both SIGINT (Ctrl-C) and SIGTERM.
/// Returns a CancellationToken that will be cancelled when a signal is received.
#[cfg(unix)]
async fn setup_signal_handler() -> Result<CancellationToken, MigrateError> {
    let cancel_token = CancellationToken::new();

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    let token_int = cancel_token.clone();
    tokio::spawn(async move {
        sigint.recv().await;
        eprintln!("\nReceived SIGINT. Stopping after the current collection...");
        token_int.cancel();
    });

    let token_term = cancel_token.clone();
    tokio::spawn(async move {
        sigterm.recv().await;
        eprintln!("\nReceived SIGTERM. Stopping after the current collection...");
        token_term.cancel();
    });

    Ok(cancel_token)
}

/// Setup signal handler for Windows (only Ctrl-C)
#[cfg(not(unix))]
async fn setup_signal_handler() -> Result<CancellationToken, MigrateError> {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C. Stopping after the current collection...");
            token.cancel();
        }
    });

    Ok(cancel_token)
}
