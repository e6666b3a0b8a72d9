use async_trait::async_trait;
use shared::Result;
use solana_client::rpc_filter::RpcFilterType;
use solana_sdk::{
    account::Account, hash::Hash, pubkey::Pubkey, signature::Signature, transaction::Transaction,
};

use crate::types::ParsedTokenAccount;

/// Remote ledger operations the rent collector depends on
///
/// Implementations must map throttling responses to an error whose
/// `is_rate_limited()` is true so callers can back off.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Native balance in lamports
    async fn get_balance(&self, pubkey: &Pubkey) -> Result<u64>;

    /// Minimum balance for an account holding `data_len` bytes to be rent exempt
    async fn get_minimum_balance_for_rent_exemption(&self, data_len: usize) -> Result<u64>;

    /// Accounts owned by `program_id` that pass every filter
    async fn get_program_accounts(
        &self,
        program_id: &Pubkey,
        filters: Vec<RpcFilterType>,
    ) -> Result<Vec<(Pubkey, Account)>>;

    /// Owner-indexed token account lookup returning raw account data
    async fn get_token_accounts_by_owner(
        &self,
        owner: &Pubkey,
        program_id: &Pubkey,
    ) -> Result<Vec<(Pubkey, Account)>>;

    /// Owner-indexed token account lookup returning provider-parsed fields
    async fn get_parsed_token_accounts_by_owner(
        &self,
        owner: &Pubkey,
        program_id: &Pubkey,
    ) -> Result<Vec<ParsedTokenAccount>>;

    /// Raw account data and lamports, `None` when the account does not exist
    async fn get_account(&self, pubkey: &Pubkey) -> Result<Option<Account>>;

    async fn get_latest_blockhash(&self) -> Result<Hash>;

    /// Submit a signed transaction and wait for confirmation
    async fn send_and_confirm_transaction(&self, transaction: &Transaction) -> Result<Signature>;
}
