use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use prize_payouts::application::audit::AuditLog;
use prize_payouts::application::processor::PayoutProcessor;
use prize_payouts::application::sweep::RetrySweep;
use prize_payouts::config::Config;
use prize_payouts::domain::ports::{AuditSinkRef, LedgerStoreRef, PaymentProviderRef};
use prize_payouts::infrastructure::in_memory::{InMemoryAuditSink, InMemoryLedger};
use prize_payouts::infrastructure::sandbox::SandboxProvider;
use prize_payouts::infrastructure::stripe::StripeProvider;
use prize_payouts::interfaces::csv::prize_writer::PrizeReportWriter;
use prize_payouts::interfaces::http::{self, ApiState, PayoutEnvelope};
use prize_payouts::interfaces::seed::LedgerSeed;
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// JSON ledger documents to load before running the command.
    #[arg(long, global = true)]
    seed: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Pay out a single prize record
    Process { prize_id: String },
    /// Retry recoverable payouts across every pool awaiting distribution
    Sweep,
    /// Print every prize record as CSV
    Report,
    /// Serve the HTTP trigger endpoints and sweep on a timer
    Serve {
        #[arg(long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env().into_diagnostic()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let (ledger, sink) = open_storage(cli.db_path)?;
    if let Some(path) = cli.seed {
        let file = File::open(path).into_diagnostic()?;
        LedgerSeed::from_reader(file)
            .into_diagnostic()?
            .load_into(ledger.as_ref())
            .await
            .into_diagnostic()?;
    }

    let provider = open_provider(&config)?;
    let audit = AuditLog::spawn(sink, config.audit_queue_capacity);
    let processor = PayoutProcessor::new(ledger.clone(), provider, audit.clone(), config.payout_settings());

    let exit_code = match cli.command {
        Command::Process { prize_id } => {
            let result = processor.process_payout(&prize_id).await;
            let envelope = PayoutEnvelope::from_result(&result);
            println!("{}", serde_json::to_string(&envelope).into_diagnostic()?);
            if result.is_ok() { 0 } else { 2 }
        }
        Command::Sweep => {
            let summary = RetrySweep::new(processor).run().await.into_diagnostic()?;
            println!("{}", serde_json::to_string(&summary).into_diagnostic()?);
            0
        }
        Command::Report => {
            let prizes = ledger.prizes().await.into_diagnostic()?;
            let stdout = io::stdout();
            let mut writer = PrizeReportWriter::new(stdout.lock());
            writer.write_prizes(&prizes).into_diagnostic()?;
            0
        }
        Command::Serve { port } => {
            serve(processor, port.unwrap_or(config.api_port), config.sweep_interval).await?;
            0
        }
    };

    audit.flush().await;
    if exit_code != 0 {
        std::process::exit(exit_code);
    }
    Ok(())
}

#[cfg(feature = "storage-rocksdb")]
fn open_storage(db_path: Option<PathBuf>) -> Result<(LedgerStoreRef, AuditSinkRef)> {
    use prize_payouts::infrastructure::rocksdb::RocksDBStore;

    if let Some(db_path) = db_path {
        let store = RocksDBStore::open(db_path).into_diagnostic()?;
        return Ok((Arc::new(store.clone()), Arc::new(store)));
    }
    Ok((Arc::new(InMemoryLedger::new()), Arc::new(InMemoryAuditSink::new())))
}

#[cfg(not(feature = "storage-rocksdb"))]
fn open_storage(db_path: Option<PathBuf>) -> Result<(LedgerStoreRef, AuditSinkRef)> {
    if db_path.is_some() {
        eprintln!(
            "WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
        );
    }
    Ok((Arc::new(InMemoryLedger::new()), Arc::new(InMemoryAuditSink::new())))
}

fn open_provider(config: &Config) -> Result<PaymentProviderRef> {
    match &config.stripe_secret_key {
        Some(key) => {
            let provider = StripeProvider::new(&config.stripe_api_url, key, config.provider_timeout)
                .into_diagnostic()?;
            Ok(Arc::new(provider))
        }
        None => {
            warn!(
                available = %config.sandbox_available,
                "STRIPE_SECRET_KEY not set; using the sandbox provider"
            );
            Ok(Arc::new(SandboxProvider::new(config.sandbox_available)))
        }
    }
}

async fn serve(processor: PayoutProcessor, port: u16, sweep_interval: std::time::Duration) -> Result<()> {
    let sweep = RetrySweep::new(processor.clone());

    let background = sweep.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        // The first tick completes immediately; skip it so startup does not sweep.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = background.run().await {
                warn!(error = %e, "scheduled sweep failed");
            }
        }
    });

    let app = http::router(ApiState { processor, sweep });
    let bind_addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&bind_addr).await.into_diagnostic()?;
    info!("HTTP API listening on {bind_addr}");

    axum::serve(listener, app).await.into_diagnostic()?;
    Ok(())
}
