//! Per-wallet collection: discover, burn, close, sweep
//!
//! Every transaction is paid for by the fee payer and co-signed by the wallet
//! owner. A failed burn or close only affects that token account; a failed
//! discovery or sweep fails the wallet. Nothing here aborts the batch.

use blockchain::token::{burn_instruction, close_instruction, decode_token_account, transfer_instruction};
use blockchain::{RawTokenState, TokenAccountRecord};
use shared::models::{AccountOutcome, RentCollectionResult};
use shared::{Error, Result};
use solana_sdk::{
    instruction::Instruction,
    pubkey::Pubkey,
    signature::{Keypair, Signature, Signer},
    transaction::Transaction,
};
use std::collections::{HashMap, HashSet};
use tracing::{debug, error, info, warn};

use crate::context::RunContext;
use crate::discovery::TokenAccountDiscovery;
use crate::wallet_store::WalletRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Discovering,
    Burning,
    Closing,
    Sweeping,
    Done,
    Failed,
}

/// A token account that will be closed
#[derive(Debug, Clone)]
pub struct EligibleAccount {
    pub record: TokenAccountRecord,
    pub lamports: u64,
    pub rent_exempt_minimum: u64,
    /// Mint, owner and amount as read from the raw account data
    pub raw: RawTokenState,
}

impl EligibleAccount {
    fn outcome(&self) -> AccountOutcome {
        AccountOutcome {
            account_id: self.record.account_id.to_string(),
            program: self.record.program,
            lamports: self.lamports,
            token_amount: self.raw.amount,
            burned: false,
            closed: false,
            error: None,
        }
    }

    /// Wrapped native balances are refunded by the close itself
    fn needs_burn(&self) -> bool {
        self.raw.amount > 0 && !self.raw.is_native
    }
}

#[derive(Debug, Clone)]
pub struct WalletDiscovery {
    pub balance: u64,
    pub rent_amount: u64,
    pub can_close: bool,
    pub eligible: Vec<EligibleAccount>,
    /// Accounts that could not be inspected
    pub skipped: Vec<AccountOutcome>,
}

/// Outcome of one wallet together with the states it went through
#[derive(Debug, Clone)]
pub struct WalletRun {
    pub result: RentCollectionResult,
    pub states: Vec<PipelineState>,
}

impl WalletRun {
    pub fn final_state(&self) -> PipelineState {
        self.states.last().copied().unwrap_or(PipelineState::Idle)
    }
}

struct StateTrace {
    wallet: Pubkey,
    states: Vec<PipelineState>,
}

impl StateTrace {
    fn new(wallet: Pubkey) -> Self {
        Self {
            wallet,
            states: vec![PipelineState::Idle],
        }
    }

    fn enter(&mut self, next: PipelineState) {
        let current = self.states.last().copied().unwrap_or(PipelineState::Idle);
        debug!("Wallet {}: {:?} -> {:?}", self.wallet, current, next);
        self.states.push(next);
    }
}

pub struct RentPipeline<'a> {
    ctx: &'a RunContext,
    discovery: &'a TokenAccountDiscovery,
}

impl<'a> RentPipeline<'a> {
    pub fn new(ctx: &'a RunContext, discovery: &'a TokenAccountDiscovery) -> Self {
        Self { ctx, discovery }
    }

    /// Run the whole pipeline for the wallet at `index`
    ///
    /// Only an unknown index is returned as an error; wallet failures are
    /// reported through `result.failed`.
    pub async fn run<R>(&self, store: &mut R, index: usize) -> Result<WalletRun>
    where
        R: WalletRegistry + ?Sized,
    {
        let wallet_id = store
            .get_by_index(index)
            .ok_or_else(|| Error::WalletNotFound(format!("index {}", index)))?
            .public_id();

        let mut result = RentCollectionResult::new(wallet_id.to_string());
        let mut trace = StateTrace::new(wallet_id);

        match self.execute(store, index, &mut trace, &mut result).await {
            Ok(()) => {
                trace.enter(PipelineState::Done);
                info!(
                    "Wallet {} done: {} accounts closed, {} lamports rent, {} lamports swept",
                    wallet_id,
                    result.token_accounts_closed,
                    result.rent_recovered,
                    result.sol_transferred
                );
            }
            Err(e) => {
                error!("Wallet {} failed: {}", wallet_id, e);
                trace.enter(PipelineState::Failed);
                result.failed = true;
                result.error = Some(e.to_string());
            }
        }

        Ok(WalletRun {
            result,
            states: trace.states,
        })
    }

    /// Discovery only: refresh balance and rent figures in the store
    pub async fn discover_wallet<R>(&self, store: &mut R, index: usize) -> Result<WalletDiscovery>
    where
        R: WalletRegistry + ?Sized,
    {
        let owner = store
            .get_by_index(index)
            .ok_or_else(|| Error::WalletNotFound(format!("index {}", index)))?
            .public_id();

        let discovered = self.discover_owner(&owner).await?;
        store.update_discovery(
            index,
            discovered.balance,
            discovered.rent_amount,
            discovered.can_close,
        )?;
        Ok(discovered)
    }

    async fn execute<R>(
        &self,
        store: &mut R,
        index: usize,
        trace: &mut StateTrace,
        result: &mut RentCollectionResult,
    ) -> Result<()>
    where
        R: WalletRegistry + ?Sized,
    {
        let owner = store
            .get_by_index(index)
            .ok_or_else(|| Error::WalletNotFound(format!("index {}", index)))?
            .keypair()?;

        trace.enter(PipelineState::Discovering);
        let discovered = self.discover_owner(&owner.pubkey()).await?;
        store.update_discovery(
            index,
            discovered.balance,
            discovered.rent_amount,
            discovered.can_close,
        )?;
        result.accounts.extend(discovered.skipped);

        let eligible = discovered.eligible;
        if eligible.is_empty() {
            debug!("Wallet {} has no closable token accounts", owner.pubkey());
        } else {
            trace.enter(PipelineState::Burning);
            let burned = self.burn_all(&owner, &eligible).await;

            trace.enter(PipelineState::Closing);
            for account in &eligible {
                let already_burned = burned.contains(&account.record.account_id);
                let mut outcome = account.outcome();
                outcome.burned = already_burned;

                match self.close(&owner, account, already_burned).await {
                    Ok(signature) => {
                        info!(
                            "Closed {} ({}), recovered {} lamports: {}",
                            account.record.account_id,
                            account.record.program,
                            account.lamports,
                            signature
                        );
                        outcome.closed = true;
                        outcome.burned = outcome.burned || account.needs_burn();
                        result.token_accounts_closed += 1;
                        result.rent_recovered = result.rent_recovered.saturating_add(account.lamports);
                    }
                    Err(e) => {
                        warn!("Failed to close {}: {}", account.record.account_id, e);
                        outcome.error = Some(e.to_string());
                    }
                }
                result.accounts.push(outcome);
            }
        }

        trace.enter(PipelineState::Sweeping);
        result.sol_transferred = self.sweep(&owner).await?;
        Ok(())
    }

    async fn discover_owner(&self, owner: &Pubkey) -> Result<WalletDiscovery> {
        let ledger = self.ctx.ledger.as_ref();
        let retry = &self.ctx.retry;

        let balance = retry.run("get_balance", || ledger.get_balance(owner)).await?;
        let records = self.discovery.discover(ledger, retry, owner).await?;

        let mut rent_minimums: HashMap<usize, u64> = HashMap::new();
        let mut eligible = Vec::new();
        let mut skipped = Vec::new();

        for record in records {
            let skip = |error: String| AccountOutcome {
                account_id: record.account_id.to_string(),
                program: record.program,
                lamports: 0,
                token_amount: record.token_amount,
                burned: false,
                closed: false,
                error: Some(error),
            };

            let account = match retry
                .run("get_account", || ledger.get_account(&record.account_id))
                .await
            {
                Ok(Some(account)) => account,
                Ok(None) => {
                    debug!("Token account {} no longer exists", record.account_id);
                    continue;
                }
                Err(e) => {
                    warn!("Could not read token account {}: {}", record.account_id, e);
                    skipped.push(skip(e.to_string()));
                    continue;
                }
            };

            let raw = match decode_token_account(record.program, &account.data) {
                Ok(raw) => raw,
                Err(e) => {
                    warn!("Could not decode token account {}: {}", record.account_id, e);
                    skipped.push(skip(e.to_string()));
                    continue;
                }
            };
            if raw.owner != *owner {
                warn!(
                    "Token account {} is now owned by {}, skipping",
                    record.account_id, raw.owner
                );
                continue;
            }

            let data_len = account.data.len();
            let rent_exempt_minimum = match rent_minimums.get(&data_len) {
                Some(minimum) => *minimum,
                None => match retry
                    .run("get_minimum_balance_for_rent_exemption", || {
                        ledger.get_minimum_balance_for_rent_exemption(data_len)
                    })
                    .await
                {
                    Ok(minimum) => {
                        rent_minimums.insert(data_len, minimum);
                        minimum
                    }
                    Err(e) => {
                        warn!("Rent exemption lookup failed for {} bytes: {}", data_len, e);
                        0
                    }
                },
            };

            // Closing refunds the whole balance, so anything above zero is worth it.
            if account.lamports == 0 {
                debug!("Token account {} holds no lamports", record.account_id);
                continue;
            }

            debug!(
                "Token account {} eligible: {} lamports (rent exempt minimum {}), {} tokens",
                record.account_id, account.lamports, rent_exempt_minimum, raw.amount
            );
            eligible.push(EligibleAccount {
                record,
                lamports: account.lamports,
                rent_exempt_minimum,
                raw,
            });
        }

        let rent_amount = eligible
            .iter()
            .fold(0u64, |total, account| total.saturating_add(account.lamports));

        Ok(WalletDiscovery {
            balance,
            rent_amount,
            can_close: rent_amount > 0,
            eligible,
            skipped,
        })
    }

    /// Burn every non-zero token balance, returning the accounts burned
    async fn burn_all(&self, owner: &Keypair, eligible: &[EligibleAccount]) -> HashSet<Pubkey> {
        let mut burned = HashSet::new();

        for account in eligible.iter().filter(|a| a.needs_burn()) {
            let submitted = match burn_instruction(
                account.record.program,
                &account.record.account_id,
                &account.raw.mint,
                &owner.pubkey(),
                account.raw.amount,
            ) {
                Ok(instruction) => self.submit("burn", vec![instruction], owner).await,
                Err(e) => Err(e),
            };

            match submitted {
                Ok(signature) => {
                    info!(
                        "Burned {} tokens in {}: {}",
                        account.raw.amount, account.record.account_id, signature
                    );
                    burned.insert(account.record.account_id);
                }
                Err(e) => {
                    // the close step retries the burn in the same transaction
                    warn!("Failed to burn tokens in {}: {}", account.record.account_id, e);
                }
            }
        }

        burned
    }

    async fn close(
        &self,
        owner: &Keypair,
        account: &EligibleAccount,
        already_burned: bool,
    ) -> Result<Signature> {
        let mut instructions = Vec::with_capacity(2);
        if !already_burned && account.needs_burn() {
            instructions.push(burn_instruction(
                account.record.program,
                &account.record.account_id,
                &account.raw.mint,
                &owner.pubkey(),
                account.raw.amount,
            )?);
        }
        instructions.push(close_instruction(
            account.record.program,
            &account.record.account_id,
            &self.ctx.fee_payer_pubkey(),
            &owner.pubkey(),
        )?);

        self.submit("close_account", instructions, owner).await
    }

    /// Move the wallet's entire native balance to the fee payer
    async fn sweep(&self, owner: &Keypair) -> Result<u64> {
        let owner_id = owner.pubkey();
        let fee_payer = self.ctx.fee_payer_pubkey();
        if owner_id == fee_payer {
            debug!("Wallet {} is the fee payer, nothing to sweep", owner_id);
            return Ok(0);
        }

        let ledger = self.ctx.ledger.as_ref();
        let balance = self
            .ctx
            .retry
            .run("get_balance", || ledger.get_balance(&owner_id))
            .await?;

        if balance == 0 || balance <= self.ctx.min_sweep_lamports {
            debug!(
                "Wallet {} balance {} is below the sweep floor {}",
                owner_id, balance, self.ctx.min_sweep_lamports
            );
            return Ok(0);
        }

        let instruction = transfer_instruction(&owner_id, &fee_payer, balance);
        let signature = self.submit("sweep", vec![instruction], owner).await?;
        info!("Swept {} lamports from {}: {}", balance, owner_id, signature);
        Ok(balance)
    }

    /// Sign once with fee payer and owner, then submit
    ///
    /// Rate-limited attempts resend the same signed transaction, so a send
    /// that landed before its confirmation was throttled is never repeated.
    async fn submit(
        &self,
        label: &str,
        instructions: Vec<Instruction>,
        owner: &Keypair,
    ) -> Result<Signature> {
        let ledger = self.ctx.ledger.as_ref();
        let fee_payer = self.ctx.fee_payer.as_ref();

        let blockhash = self
            .ctx
            .retry
            .run("get_latest_blockhash", || ledger.get_latest_blockhash())
            .await?;
        let transaction = Transaction::new_signed_with_payer(
            &instructions,
            Some(&fee_payer.pubkey()),
            &[fee_payer, owner],
            blockhash,
        );

        self.ctx
            .retry
            .run(label, || ledger.send_and_confirm_transaction(&transaction))
            .await
    }
}
