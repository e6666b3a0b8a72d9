mod settings;

use anyhow::Result;
use clap::Parser;
use reclaimer::RentCollector;
use settings::{ShellSettings, DEFAULT_SETTINGS_FILE};
use shared::config::Config;
use shared::models::ProgressEvent;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "rent-reclaimer")]
#[command(about = "Close token accounts and sweep native balances back to a fee payer")]
struct Args {
    /// Wallet files to load
    #[arg(required = true)]
    wallets: Vec<PathBuf>,

    /// Settings file holding the RPC endpoint and fee payer
    #[arg(long, default_value = DEFAULT_SETTINGS_FILE)]
    config: PathBuf,

    /// RPC endpoint (overrides environment and settings file)
    #[arg(long)]
    rpc_url: Option<String>,

    /// Process only the wallet at this index
    #[arg(long)]
    index: Option<usize>,

    /// Discover accounts and rent without submitting anything
    #[arg(long)]
    dry_run: bool,

    /// Write the effective endpoint and fee payer back to the settings file
    #[arg(long)]
    save_config: bool,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,reclaimer=debug".into());
    let registry = tracing_subscriber::registry().with(filter);

    // stdout carries the JSON report
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn report_progress(event: ProgressEvent) {
    tracing::info!(
        "[{}/{}] {} {}",
        event.current,
        event.total,
        event.wallet_id,
        event.status
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.json_logs);

    tracing::info!("Starting rent reclaimer");

    let mut config = Config::from_env()?;
    let mut settings = ShellSettings::load(&args.config)?;

    // command line, then environment, then settings file
    config.solana.rpc_url = args
        .rpc_url
        .clone()
        .or(config.solana.rpc_url)
        .or_else(|| settings.rpc_endpoint.clone());
    config.solana.fee_payer_secret = config
        .solana
        .fee_payer_secret
        .or_else(|| settings.fee_payer.clone());

    let mut collector = RentCollector::from_config(&config)?;
    tracing::info!("Configuration loaded successfully");

    if args.save_config {
        settings.rpc_endpoint = collector.rpc_endpoint().map(str::to_string);
        settings.fee_payer = config.solana.fee_payer_secret.clone();
        settings.save(&args.config)?;
    }

    let loaded = collector.load_wallets(&args.wallets)?;
    for failed in &loaded.failed_files {
        tracing::warn!("Skipped {}: {}", failed.path, failed.error);
    }
    for diagnostic in &loaded.diagnostics {
        tracing::warn!("{:?}", diagnostic);
    }
    tracing::info!(
        "{} wallets ready ({} new from {} files)",
        loaded.count,
        loaded.new_wallets_count,
        loaded.new_files.len()
    );

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping after the current wallet");
            interrupt.cancel();
        }
    });

    let output = if args.dry_run {
        let reports = collector.discover_all(cancel, report_progress).await?;
        serde_json::to_string_pretty(&reports)?
    } else if let Some(index) = args.index {
        let result = collector.process_single_wallet(index).await?;
        serde_json::to_string_pretty(&result)?
    } else {
        let summary = collector
            .process_all_wallets_until(cancel, report_progress)
            .await?;
        tracing::info!(
            "{} of {} wallets succeeded, {} lamports recovered",
            summary.successful_wallets,
            summary.total_wallets,
            summary.total_recovered
        );
        serde_json::to_string_pretty(&summary)?
    };

    println!("{}", output);
    Ok(())
}
