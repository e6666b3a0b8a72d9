use shared::config::PacingSettings;
use shared::models::{status, DiscoveryReport, ProgressEvent, RentCollectionResult, RentCollectionSummary};
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::context::RunContext;
use crate::discovery::TokenAccountDiscovery;
use crate::pipeline::RentPipeline;
use crate::wallet_store::WalletRegistry;

/// Delays inserted between wallets to stay under provider rate limits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacingPolicy {
    pub wallet_delay: Duration,
    /// Wallets per batch; zero disables the batch boundary delay
    pub batch_size: usize,
    pub batch_delay: Duration,
}

impl Default for PacingPolicy {
    fn default() -> Self {
        Self {
            wallet_delay: Duration::from_millis(500),
            batch_size: 10,
            batch_delay: Duration::from_millis(2_000),
        }
    }
}

impl PacingPolicy {
    pub fn from_settings(settings: &PacingSettings) -> Self {
        Self {
            wallet_delay: Duration::from_millis(settings.wallet_delay_ms),
            batch_size: settings.batch_size,
            batch_delay: Duration::from_millis(settings.batch_delay_ms),
        }
    }

    /// No pacing at all
    pub fn none() -> Self {
        Self {
            wallet_delay: Duration::ZERO,
            batch_size: 0,
            batch_delay: Duration::ZERO,
        }
    }

    /// Delay to wait once `processed` wallets are done and more remain
    pub fn delay_after(&self, processed: usize) -> Duration {
        if self.batch_size > 0 && processed > 0 && processed % self.batch_size == 0 {
            self.wallet_delay + self.batch_delay
        } else {
            self.wallet_delay
        }
    }
}

/// Single worker that drives the pipeline over every loaded wallet in order
pub struct BatchScheduler {
    pacing: PacingPolicy,
    cancel: Option<CancellationToken>,
}

impl BatchScheduler {
    pub fn new(pacing: PacingPolicy) -> Self {
        Self {
            pacing,
            cancel: None,
        }
    }

    /// Stop before the next wallet once `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn pacing(&self) -> &PacingPolicy {
        &self.pacing
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().map(|c| c.is_cancelled()).unwrap_or(false)
    }

    async fn pause(&self, delay: Duration) {
        if delay.is_zero() {
            return;
        }
        match &self.cancel {
            Some(token) => {
                tokio::select! {
                    _ = sleep(delay) => {}
                    _ = token.cancelled() => {
                        debug!("Pacing delay interrupted by cancellation");
                    }
                }
            }
            None => sleep(delay).await,
        }
    }

    pub async fn process_all<R, F>(
        &self,
        ctx: &RunContext,
        discovery: &TokenAccountDiscovery,
        store: &mut R,
        mut on_progress: F,
    ) -> RentCollectionSummary
    where
        R: WalletRegistry + ?Sized,
        F: FnMut(ProgressEvent),
    {
        let total = store.len();
        let pipeline = RentPipeline::new(ctx, discovery);
        let mut summary = RentCollectionSummary::new(total);

        info!("Starting rent collection for {} wallets", total);

        for index in 0..total {
            let current = index + 1;
            let wallet_id = store
                .get_by_index(index)
                .map(|w| w.public_id().to_string())
                .unwrap_or_default();

            if self.is_cancelled() {
                warn!("Run cancelled before wallet {}/{}", current, total);
                summary.cancelled = true;
                on_progress(ProgressEvent {
                    current,
                    total,
                    wallet_id,
                    status: status::CANCELLED.to_string(),
                });
                break;
            }

            on_progress(ProgressEvent {
                current,
                total,
                wallet_id: wallet_id.clone(),
                status: status::PROCESSING.to_string(),
            });

            let result = match pipeline.run(store, index).await {
                Ok(run) => run.result,
                Err(e) => {
                    error!("Wallet {}/{} could not be processed: {}", current, total, e);
                    RentCollectionResult {
                        failed: true,
                        error: Some(e.to_string()),
                        ..RentCollectionResult::new(wallet_id.clone())
                    }
                }
            };

            let event_status = if result.failed {
                status::FAILED
            } else {
                status::COMPLETED
            };
            summary.record(result);
            on_progress(ProgressEvent {
                current,
                total,
                wallet_id,
                status: event_status.to_string(),
            });

            if current < total {
                self.pause(self.pacing.delay_after(current)).await;
            }
        }

        summary.finish();
        info!(
            "Rent collection finished: {} succeeded, {} failed, {} lamports recovered{}",
            summary.successful_wallets,
            summary.failed_wallets,
            summary.total_recovered,
            if summary.cancelled { " (cancelled)" } else { "" }
        );
        summary
    }

    /// Discovery only, for every wallet; nothing is submitted
    pub async fn discover_all<R, F>(
        &self,
        ctx: &RunContext,
        discovery: &TokenAccountDiscovery,
        store: &mut R,
        mut on_progress: F,
    ) -> Vec<DiscoveryReport>
    where
        R: WalletRegistry + ?Sized,
        F: FnMut(ProgressEvent),
    {
        let total = store.len();
        let pipeline = RentPipeline::new(ctx, discovery);
        let mut reports = Vec::with_capacity(total);

        for index in 0..total {
            let current = index + 1;
            if self.is_cancelled() {
                warn!("Discovery cancelled before wallet {}/{}", current, total);
                break;
            }

            let wallet_id = store
                .get_by_index(index)
                .map(|w| w.public_id().to_string())
                .unwrap_or_default();
            on_progress(ProgressEvent {
                current,
                total,
                wallet_id: wallet_id.clone(),
                status: status::PROCESSING.to_string(),
            });

            let (eligible_accounts, error) = match pipeline.discover_wallet(store, index).await {
                Ok(found) => (found.eligible.len(), None),
                Err(e) => {
                    warn!("Discovery failed for {}: {}", wallet_id, e);
                    (0, Some(e.to_string()))
                }
            };

            on_progress(ProgressEvent {
                current,
                total,
                wallet_id,
                status: if error.is_some() {
                    status::FAILED.to_string()
                } else {
                    status::COMPLETED.to_string()
                },
            });

            if let Some(wallet) = store.get_by_index(index).map(|w| w.view(index)) {
                reports.push(DiscoveryReport {
                    wallet,
                    eligible_accounts,
                    error,
                });
            }

            if current < total {
                self.pause(self.pacing.delay_after(current)).await;
            }
        }

        reports
    }
}
