use anyhow::Context;
use async_trait::async_trait;
use serde_json::json;
use shared::error::message_is_rate_limited;
use shared::{Error, Result};
use solana_account_decoder::{UiAccountData, UiAccountEncoding};
use solana_client::{
    client_error::{ClientError, ClientErrorKind},
    nonblocking::rpc_client::RpcClient,
    rpc_config::{RpcAccountInfoConfig, RpcProgramAccountsConfig},
    rpc_filter::RpcFilterType,
    rpc_request::{RpcRequest, TokenAccountsFilter},
    rpc_response::{Response as RpcResponse, RpcKeyedAccount},
};
use solana_sdk::{
    account::Account,
    commitment_config::CommitmentConfig,
    hash::Hash,
    pubkey::Pubkey,
    signature::Signature,
    transaction::{Transaction, TransactionError},
};
use std::str::FromStr;
use tracing::{debug, info, warn};

use crate::ledger::LedgerClient;
use crate::types::ParsedTokenAccount;

/// Solana JSON-RPC implementation of [`LedgerClient`]
pub struct SolanaClient {
    rpc: RpcClient,
}

impl SolanaClient {
    /// Create a client against `rpc_url` using confirmed commitment
    pub fn new(rpc_url: String) -> Self {
        info!("Initializing Solana client with RPC: {}", rpc_url);

        Self {
            rpc: RpcClient::new_with_commitment(rpc_url, CommitmentConfig::confirmed()),
        }
    }

    pub fn rpc_url(&self) -> String {
        self.rpc.url()
    }

    /// Validate a Solana wallet address format
    pub fn validate_address(&self, address: &str) -> Result<Pubkey> {
        Pubkey::from_str(address).map_err(|e| {
            warn!("Invalid wallet address format: {} - {}", address, e);
            Error::Validation(format!("Invalid Solana address format: {}", e))
        })
    }

    /// Parse one jsonParsed token account entry
    fn parse_token_account_from_ui(account: &RpcKeyedAccount) -> anyhow::Result<ParsedTokenAccount> {
        let pubkey = Pubkey::from_str(&account.pubkey).context("Invalid account pubkey")?;

        match &account.account.data {
            UiAccountData::Json(parsed_account) => {
                let info = parsed_account
                    .parsed
                    .get("info")
                    .ok_or_else(|| anyhow::anyhow!("Missing info field"))?;

                let owner = info
                    .get("owner")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| anyhow::anyhow!("Missing owner field"))?
                    .to_string();

                let mint = info
                    .get("mint")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| anyhow::anyhow!("Missing mint field"))?
                    .to_string();

                let amount = info
                    .get("tokenAmount")
                    .and_then(|v| v.get("amount"))
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| anyhow::anyhow!("Missing tokenAmount.amount field"))?
                    .parse::<u64>()
                    .context("Failed to parse amount")?;

                Ok(ParsedTokenAccount {
                    pubkey,
                    owner,
                    mint,
                    amount,
                    lamports: account.account.lamports,
                })
            }
            _ => Err(anyhow::anyhow!("Expected JSON parsed account data")),
        }
    }
}

/// Map an RPC client error, keeping the rate-limit signature visible to the retry policy
fn map_client_error(context: &str, err: ClientError) -> Error {
    let throttled = match err.kind() {
        ClientErrorKind::Reqwest(e) => e.status().map(|s| s.as_u16() == 429).unwrap_or(false),
        _ => false,
    };
    let message = format!("{}: {}", context, err);

    if throttled || message_is_rate_limited(&message) {
        Error::RateLimited(message)
    } else {
        Error::SolanaRpc(message)
    }
}

/// A resent transaction whose first send already landed
fn already_processed(err: &ClientError) -> bool {
    err.get_transaction_error() == Some(TransactionError::AlreadyProcessed)
}

#[async_trait]
impl LedgerClient for SolanaClient {
    async fn get_balance(&self, pubkey: &Pubkey) -> Result<u64> {
        debug!("Fetching SOL balance for address: {}", pubkey);
        self.rpc
            .get_balance(pubkey)
            .await
            .map_err(|e| map_client_error("get_balance", e))
    }

    async fn get_minimum_balance_for_rent_exemption(&self, data_len: usize) -> Result<u64> {
        self.rpc
            .get_minimum_balance_for_rent_exemption(data_len)
            .await
            .map_err(|e| map_client_error("get_minimum_balance_for_rent_exemption", e))
    }

    async fn get_program_accounts(
        &self,
        program_id: &Pubkey,
        filters: Vec<RpcFilterType>,
    ) -> Result<Vec<(Pubkey, Account)>> {
        debug!("Scanning program {} with {} filters", program_id, filters.len());

        let config = RpcProgramAccountsConfig {
            filters: Some(filters),
            account_config: RpcAccountInfoConfig {
                encoding: Some(UiAccountEncoding::Base64),
                commitment: Some(self.rpc.commitment()),
                ..Default::default()
            },
            ..Default::default()
        };

        self.rpc
            .get_program_accounts_with_config(program_id, config)
            .await
            .map_err(|e| map_client_error("get_program_accounts", e))
    }

    async fn get_token_accounts_by_owner(
        &self,
        owner: &Pubkey,
        program_id: &Pubkey,
    ) -> Result<Vec<(Pubkey, Account)>> {
        debug!("Fetching raw token accounts for owner: {}", owner);

        let config = RpcAccountInfoConfig {
            encoding: Some(UiAccountEncoding::Base64),
            commitment: Some(self.rpc.commitment()),
            ..Default::default()
        };

        let response: RpcResponse<Vec<RpcKeyedAccount>> = self
            .rpc
            .send(
                RpcRequest::GetTokenAccountsByOwner,
                json!([owner.to_string(), { "programId": program_id.to_string() }, config]),
            )
            .await
            .map_err(|e| map_client_error("get_token_accounts_by_owner", e))?;

        let mut accounts = Vec::with_capacity(response.value.len());
        for keyed in response.value {
            let pubkey = match Pubkey::from_str(&keyed.pubkey) {
                Ok(pubkey) => pubkey,
                Err(e) => {
                    warn!("Skipping token account with invalid pubkey {}: {}", keyed.pubkey, e);
                    continue;
                }
            };
            match keyed.account.decode::<Account>() {
                Some(account) => accounts.push((pubkey, account)),
                None => warn!("Skipping undecodable token account {}", pubkey),
            }
        }

        Ok(accounts)
    }

    async fn get_parsed_token_accounts_by_owner(
        &self,
        owner: &Pubkey,
        program_id: &Pubkey,
    ) -> Result<Vec<ParsedTokenAccount>> {
        debug!("Fetching parsed token accounts for owner: {}", owner);

        let keyed_accounts = self
            .rpc
            .get_token_accounts_by_owner(owner, TokenAccountsFilter::ProgramId(*program_id))
            .await
            .map_err(|e| map_client_error("get_parsed_token_accounts_by_owner", e))?;

        let mut token_accounts = Vec::new();
        for account in keyed_accounts {
            match Self::parse_token_account_from_ui(&account) {
                Ok(token_account) => token_accounts.push(token_account),
                Err(e) => {
                    warn!("Failed to parse token account {}: {}", account.pubkey, e);
                    continue;
                }
            }
        }

        debug!("Retrieved {} parsed token accounts", token_accounts.len());
        Ok(token_accounts)
    }

    async fn get_account(&self, pubkey: &Pubkey) -> Result<Option<Account>> {
        self.rpc
            .get_account_with_commitment(pubkey, self.rpc.commitment())
            .await
            .map(|response| response.value)
            .map_err(|e| map_client_error("get_account", e))
    }

    async fn get_latest_blockhash(&self) -> Result<Hash> {
        self.rpc
            .get_latest_blockhash()
            .await
            .map_err(|e| map_client_error("get_latest_blockhash", e))
    }

    async fn send_and_confirm_transaction(&self, transaction: &Transaction) -> Result<Signature> {
        match self.rpc.send_and_confirm_transaction(transaction).await {
            Ok(signature) => Ok(signature),
            Err(e) if already_processed(&e) => {
                let signature = transaction.signatures.first().copied().unwrap_or_default();
                debug!("Transaction {} was already processed", signature);
                Ok(signature)
            }
            Err(e) => Err(match map_client_error("send_and_confirm_transaction", e) {
                Error::SolanaRpc(message) => Error::Transaction(message),
                other => other,
            }),
        }
    }
}
