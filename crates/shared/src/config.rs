use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub solana: SolanaConfig,
    pub retry: RetrySettings,
    pub pacing: PacingSettings,
    pub sweep: SweepSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SolanaConfig {
    /// Overrides the persisted endpoint when set
    pub rpc_url: Option<String>,
    /// Overrides the persisted fee payer secret when set
    pub fee_payer_secret: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PacingSettings {
    /// Delay inserted between consecutive wallets
    pub wallet_delay_ms: u64,
    /// Number of wallets per batch
    pub batch_size: usize,
    /// Extra delay inserted at each batch boundary
    pub batch_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SweepSettings {
    /// Native balances at or below this are left in place
    pub min_sweep_lamports: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            solana: SolanaConfig {
                rpc_url: None,
                fee_payer_secret: None,
            },
            retry: RetrySettings {
                max_retries: 3,
                base_delay_ms: 500,
                max_delay_ms: 10_000,
            },
            pacing: PacingSettings {
                wallet_delay_ms: 500,
                batch_size: 10,
                batch_delay_ms: 2_000,
            },
            sweep: SweepSettings {
                min_sweep_lamports: 5_000,
            },
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let defaults = Config::default();

        Ok(Config {
            solana: SolanaConfig {
                rpc_url: env::var("RECLAIMER_RPC_URL").ok(),
                fee_payer_secret: env::var("RECLAIMER_FEE_PAYER").ok(),
            },
            retry: RetrySettings {
                max_retries: env::var("RECLAIMER_MAX_RETRIES")
                    .unwrap_or_else(|_| defaults.retry.max_retries.to_string())
                    .parse()?,
                base_delay_ms: env::var("RECLAIMER_RETRY_BASE_DELAY_MS")
                    .unwrap_or_else(|_| defaults.retry.base_delay_ms.to_string())
                    .parse()?,
                max_delay_ms: env::var("RECLAIMER_RETRY_MAX_DELAY_MS")
                    .unwrap_or_else(|_| defaults.retry.max_delay_ms.to_string())
                    .parse()?,
            },
            pacing: PacingSettings {
                wallet_delay_ms: env::var("RECLAIMER_WALLET_DELAY_MS")
                    .unwrap_or_else(|_| defaults.pacing.wallet_delay_ms.to_string())
                    .parse()?,
                batch_size: env::var("RECLAIMER_BATCH_SIZE")
                    .unwrap_or_else(|_| defaults.pacing.batch_size.to_string())
                    .parse()?,
                batch_delay_ms: env::var("RECLAIMER_BATCH_DELAY_MS")
                    .unwrap_or_else(|_| defaults.pacing.batch_delay_ms.to_string())
                    .parse()?,
            },
            sweep: SweepSettings {
                min_sweep_lamports: env::var("RECLAIMER_MIN_SWEEP_LAMPORTS")
                    .unwrap_or_else(|_| defaults.sweep.min_sweep_lamports.to_string())
                    .parse()?,
            },
        })
    }
}
