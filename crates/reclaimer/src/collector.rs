//! Entry point used by the command line shell
//!
//! Owns the wallet store and the run configuration. The ledger connection and
//! fee payer are set separately and must both be present before any wallet is
//! processed.

use blockchain::{LedgerClient, RetryPolicy, SolanaClient};
use shared::config::Config;
use shared::models::{
    DiscoveryReport, FailedFile, LoadReport, LoadSummary, ProgressEvent, RentCollectionResult,
    RentCollectionSummary, WalletView,
};
use shared::{Error, Result};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signer};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::context::RunContext;
use crate::discovery::TokenAccountDiscovery;
use crate::pipeline::RentPipeline;
use crate::scheduler::{BatchScheduler, PacingPolicy};
use crate::wallet_store::{decode_secret, WalletRegistry, WalletStore};

pub const DEFAULT_MIN_SWEEP_LAMPORTS: u64 = 5_000;

pub struct RentCollector {
    store: WalletStore,
    loaded_files: HashSet<String>,
    rpc_endpoint: Option<String>,
    ledger: Option<Arc<dyn LedgerClient>>,
    fee_payer: Option<Arc<Keypair>>,
    retry: RetryPolicy,
    pacing: PacingPolicy,
    min_sweep_lamports: u64,
    discovery: TokenAccountDiscovery,
}

impl Default for RentCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl RentCollector {
    pub fn new() -> Self {
        Self {
            store: WalletStore::new(),
            loaded_files: HashSet::new(),
            rpc_endpoint: None,
            ledger: None,
            fee_payer: None,
            retry: RetryPolicy::default(),
            pacing: PacingPolicy::default(),
            min_sweep_lamports: DEFAULT_MIN_SWEEP_LAMPORTS,
            discovery: TokenAccountDiscovery::new(),
        }
    }

    /// Build a collector from environment configuration
    ///
    /// Endpoint and fee payer are applied only when the config carries them.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut collector = Self::new()
            .with_retry(RetryPolicy::from_settings(&config.retry))
            .with_pacing(PacingPolicy::from_settings(&config.pacing))
            .with_min_sweep_lamports(config.sweep.min_sweep_lamports);

        if let Some(url) = &config.solana.rpc_url {
            collector.set_rpc_endpoint(url)?;
        }
        if let Some(secret) = &config.solana.fee_payer_secret {
            collector.set_fee_payer(secret)?;
        }
        Ok(collector)
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_pacing(mut self, pacing: PacingPolicy) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn with_min_sweep_lamports(mut self, lamports: u64) -> Self {
        self.min_sweep_lamports = lamports;
        self
    }

    pub fn with_discovery(mut self, discovery: TokenAccountDiscovery) -> Self {
        self.discovery = discovery;
        self
    }

    /// Use an already constructed ledger instead of an RPC endpoint
    pub fn with_ledger(mut self, ledger: Arc<dyn LedgerClient>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn set_rpc_endpoint(&mut self, url: &str) -> Result<()> {
        let parsed = reqwest::Url::parse(url.trim())
            .map_err(|e| Error::Configuration(format!("invalid RPC endpoint {}: {}", url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(Error::Configuration(format!(
                "RPC endpoint must use http or https, got {}",
                parsed.scheme()
            )));
        }

        let endpoint = parsed.to_string();
        info!("Using RPC endpoint {}", endpoint);
        self.ledger = Some(Arc::new(SolanaClient::new(endpoint.clone())));
        self.rpc_endpoint = Some(endpoint);
        Ok(())
    }

    pub fn rpc_endpoint(&self) -> Option<&str> {
        self.rpc_endpoint.as_deref()
    }

    pub fn set_fee_payer(&mut self, secret: &str) -> Result<()> {
        let keypair = decode_secret(secret.trim())?;
        info!("Fee payer set to {}", keypair.pubkey());
        self.fee_payer = Some(Arc::new(keypair));
        Ok(())
    }

    pub fn fee_payer_pubkey(&self) -> Option<Pubkey> {
        self.fee_payer.as_ref().map(|k| k.pubkey())
    }

    /// Load wallets from one or more files
    ///
    /// A file that cannot be read or parsed is reported in `failed_files`
    /// without blocking the others. Errors only if nothing could be loaded at all.
    pub fn load_wallets<P: AsRef<Path>>(&mut self, paths: &[P]) -> Result<LoadSummary> {
        if paths.is_empty() {
            return Err(Error::Validation("no wallet files given".to_string()));
        }

        let mut summary = LoadSummary::default();
        let mut last_error: Option<Error> = None;

        for path in paths {
            let path = path.as_ref();
            let key = path.display().to_string();

            let loaded = std::fs::read_to_string(path)
                .map_err(Error::from)
                .and_then(|content| self.store.load_from_text(&content));

            match loaded {
                Ok(report) => {
                    if self.loaded_files.insert(key.clone()) {
                        summary.new_files.push(key);
                    }
                    summary.new_wallets_count += report.added;
                    summary.diagnostics.extend(report.diagnostics);
                }
                Err(e) => {
                    warn!("Failed to load wallet file {}: {}", key, e);
                    summary.failed_files.push(FailedFile {
                        path: key,
                        error: e.to_string(),
                    });
                    last_error = Some(e);
                }
            }
        }

        if summary.failed_files.len() == paths.len() && self.store.is_empty() {
            if let Some(e) = last_error {
                return Err(e);
            }
        }

        summary.wallets = self.store.views();
        summary.count = summary.wallets.len();
        info!(
            "{} wallets loaded ({} new, {} files failed)",
            summary.count,
            summary.new_wallets_count,
            summary.failed_files.len()
        );
        Ok(summary)
    }

    pub fn load_from_text(&mut self, content: &str) -> Result<LoadReport> {
        self.store.load_from_text(content)
    }

    pub fn wallets(&self) -> Vec<WalletView> {
        self.store.views()
    }

    pub fn wallet_count(&self) -> usize {
        self.store.len()
    }

    pub fn clear_wallets(&mut self) {
        self.store.clear();
        self.loaded_files.clear();
    }

    /// Snapshot of everything a run needs, or `Configuration` if incomplete
    pub fn run_context(&self) -> Result<RunContext> {
        let ledger = self.ledger.clone().ok_or_else(|| {
            Error::Configuration("RPC endpoint not set".to_string())
        })?;
        let fee_payer = self
            .fee_payer
            .clone()
            .ok_or_else(|| Error::Configuration("fee payer not set".to_string()))?;

        Ok(RunContext::new(ledger, fee_payer, self.retry.clone())
            .with_min_sweep_lamports(self.min_sweep_lamports))
    }

    fn require_wallets(&self) -> Result<()> {
        if self.store.is_empty() {
            return Err(Error::Validation("no wallets loaded".to_string()));
        }
        Ok(())
    }

    pub async fn process_all_wallets<F>(&mut self, on_progress: F) -> Result<RentCollectionSummary>
    where
        F: FnMut(ProgressEvent),
    {
        self.process_all_wallets_until(CancellationToken::new(), on_progress)
            .await
    }

    /// Like `process_all_wallets`, stopping at the next wallet boundary once `cancel` fires
    pub async fn process_all_wallets_until<F>(
        &mut self,
        cancel: CancellationToken,
        on_progress: F,
    ) -> Result<RentCollectionSummary>
    where
        F: FnMut(ProgressEvent),
    {
        let ctx = self.run_context()?;
        self.require_wallets()?;

        let scheduler = BatchScheduler::new(self.pacing.clone()).with_cancellation(cancel);
        Ok(scheduler
            .process_all(&ctx, &self.discovery, &mut self.store, on_progress)
            .await)
    }

    pub async fn process_single_wallet(&mut self, index: usize) -> Result<RentCollectionResult> {
        let ctx = self.run_context()?;
        let run = RentPipeline::new(&ctx, &self.discovery)
            .run(&mut self.store, index)
            .await?;
        Ok(run.result)
    }

    /// Refresh balance and rent figures for every wallet without submitting anything
    pub async fn discover_all<F>(
        &mut self,
        cancel: CancellationToken,
        on_progress: F,
    ) -> Result<Vec<DiscoveryReport>>
    where
        F: FnMut(ProgressEvent),
    {
        let ctx = self.run_context()?;
        self.require_wallets()?;

        let scheduler = BatchScheduler::new(self.pacing.clone()).with_cancellation(cancel);
        Ok(scheduler
            .discover_all(&ctx, &self.discovery, &mut self.store, on_progress)
            .await)
    }
}
