use blockchain::{LedgerClient, RetryPolicy};
use solana_sdk::signature::{Keypair, Signer};
use solana_sdk::pubkey::Pubkey;
use std::sync::Arc;

/// Immutable collaborators for one collection run
///
/// Built once before the first wallet is touched and shared by every
/// pipeline step, so the fee payer and ledger cannot change mid-run.
#[derive(Clone)]
pub struct RunContext {
    pub ledger: Arc<dyn LedgerClient>,
    pub fee_payer: Arc<Keypair>,
    pub retry: RetryPolicy,
    /// Native balances at or below this are not swept
    pub min_sweep_lamports: u64,
}

impl RunContext {
    pub fn new(ledger: Arc<dyn LedgerClient>, fee_payer: Arc<Keypair>, retry: RetryPolicy) -> Self {
        Self {
            ledger,
            fee_payer,
            retry,
            min_sweep_lamports: 0,
        }
    }

    pub fn with_min_sweep_lamports(mut self, lamports: u64) -> Self {
        self.min_sweep_lamports = lamports;
        self
    }

    pub fn fee_payer_pubkey(&self) -> Pubkey {
        self.fee_payer.pubkey()
    }
}
