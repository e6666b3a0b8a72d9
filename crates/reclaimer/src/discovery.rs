//! Token account discovery across both token program variants
//!
//! No single RPC query reliably returns every token account a wallet owns,
//! so several independent strategies run for each program variant and their
//! results are unioned by account address. A failing strategy contributes
//! nothing; discovery fails only when every strategy fails for every variant.

use async_trait::async_trait;
use blockchain::token::{decode_token_account, program_id, OWNER_OFFSET, TOKEN_ACCOUNT_LEN};
use blockchain::{LedgerClient, RetryPolicy, TokenAccountRecord};
use shared::models::ProgramVariant;
use shared::{Error, Result};
use solana_client::rpc_filter::{Memcmp, RpcFilterType};
use solana_sdk::{account::Account, pubkey::Pubkey};
use std::collections::HashSet;
use std::str::FromStr;
use tracing::{debug, info, warn};

#[async_trait]
pub trait DiscoveryStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn find(
        &self,
        ledger: &dyn LedgerClient,
        retry: &RetryPolicy,
        owner: &Pubkey,
        variant: ProgramVariant,
    ) -> Result<Vec<TokenAccountRecord>>;
}

/// Decode raw accounts into records, dropping any not owned by `owner`
fn records_from_raw(
    strategy: &str,
    owner: &Pubkey,
    variant: ProgramVariant,
    accounts: Vec<(Pubkey, Account)>,
) -> Vec<TokenAccountRecord> {
    accounts
        .into_iter()
        .filter_map(|(address, account)| match decode_token_account(variant, &account.data) {
            Ok(state) if state.owner == *owner => Some(TokenAccountRecord {
                account_id: address,
                owner_id: state.owner,
                program: variant,
                token_amount: state.amount,
                mint_id: state.mint,
            }),
            Ok(state) => {
                warn!(
                    "{}: account {} belongs to {}, not {}",
                    strategy, address, state.owner, owner
                );
                None
            }
            Err(e) => {
                warn!("{}: skipping account {}: {}", strategy, address, e);
                None
            }
        })
        .collect()
}

/// Owner-indexed lookup. Fast, but provider indexes may lag or omit accounts.
pub struct OwnerIndexStrategy;

#[async_trait]
impl DiscoveryStrategy for OwnerIndexStrategy {
    fn name(&self) -> &'static str {
        "owner-index"
    }

    async fn find(
        &self,
        ledger: &dyn LedgerClient,
        retry: &RetryPolicy,
        owner: &Pubkey,
        variant: ProgramVariant,
    ) -> Result<Vec<TokenAccountRecord>> {
        let program = program_id(variant);
        let accounts = retry
            .run("get_token_accounts_by_owner", || {
                ledger.get_token_accounts_by_owner(owner, &program)
            })
            .await?;
        Ok(records_from_raw(self.name(), owner, variant, accounts))
    }
}

/// Full program scan filtered on account size and the owner field
pub struct ProgramScanStrategy;

#[async_trait]
impl DiscoveryStrategy for ProgramScanStrategy {
    fn name(&self) -> &'static str {
        "program-scan"
    }

    async fn find(
        &self,
        ledger: &dyn LedgerClient,
        retry: &RetryPolicy,
        owner: &Pubkey,
        variant: ProgramVariant,
    ) -> Result<Vec<TokenAccountRecord>> {
        let program = program_id(variant);
        let accounts = retry
            .run("get_program_accounts", || {
                let filters = vec![
                    RpcFilterType::DataSize(TOKEN_ACCOUNT_LEN as u64),
                    RpcFilterType::Memcmp(Memcmp::new_raw_bytes(
                        OWNER_OFFSET,
                        owner.to_bytes().to_vec(),
                    )),
                ];
                ledger.get_program_accounts(&program, filters)
            })
            .await?;
        Ok(records_from_raw(self.name(), owner, variant, accounts))
    }
}

/// Parsed owner lookup, keeping only entries whose parsed `owner` matches
pub struct ParsedOwnerStrategy;

#[async_trait]
impl DiscoveryStrategy for ParsedOwnerStrategy {
    fn name(&self) -> &'static str {
        "parsed-owner"
    }

    async fn find(
        &self,
        ledger: &dyn LedgerClient,
        retry: &RetryPolicy,
        owner: &Pubkey,
        variant: ProgramVariant,
    ) -> Result<Vec<TokenAccountRecord>> {
        let program = program_id(variant);
        let parsed = retry
            .run("get_parsed_token_accounts_by_owner", || {
                ledger.get_parsed_token_accounts_by_owner(owner, &program)
            })
            .await?;

        let expected_owner = owner.to_string();
        let mut records = Vec::with_capacity(parsed.len());
        for account in parsed {
            if account.owner != expected_owner {
                warn!(
                    "{}: account {} reports owner {}, expected {}",
                    self.name(),
                    account.pubkey,
                    account.owner,
                    expected_owner
                );
                continue;
            }
            let mint_id = match Pubkey::from_str(&account.mint) {
                Ok(mint) => mint,
                Err(e) => {
                    warn!("{}: account {} has invalid mint: {}", self.name(), account.pubkey, e);
                    continue;
                }
            };
            records.push(TokenAccountRecord {
                account_id: account.pubkey,
                owner_id: *owner,
                program: variant,
                token_amount: account.amount,
                mint_id,
            });
        }
        Ok(records)
    }
}

/// Runs every strategy for every program variant and merges the results
pub struct TokenAccountDiscovery {
    strategies: Vec<Box<dyn DiscoveryStrategy>>,
}

impl Default for TokenAccountDiscovery {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenAccountDiscovery {
    pub fn new() -> Self {
        Self::with_strategies(vec![
            Box::new(OwnerIndexStrategy),
            Box::new(ProgramScanStrategy),
            Box::new(ParsedOwnerStrategy),
        ])
    }

    pub fn with_strategies(strategies: Vec<Box<dyn DiscoveryStrategy>>) -> Self {
        Self { strategies }
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Every token account `owner` holds, deduplicated by account address
    ///
    /// Records keep the order in which they were first found.
    pub async fn discover(
        &self,
        ledger: &dyn LedgerClient,
        retry: &RetryPolicy,
        owner: &Pubkey,
    ) -> Result<Vec<TokenAccountRecord>> {
        let mut seen: HashSet<Pubkey> = HashSet::new();
        let mut merged: Vec<TokenAccountRecord> = Vec::new();
        let mut attempts = 0usize;
        let mut failures: Vec<String> = Vec::new();

        for variant in ProgramVariant::ALL {
            for strategy in &self.strategies {
                attempts += 1;
                match strategy.find(ledger, retry, owner, variant).await {
                    Ok(records) => {
                        let found = records.len();
                        let mut added = 0usize;
                        for record in records {
                            if seen.insert(record.account_id) {
                                merged.push(record);
                                added += 1;
                            }
                        }
                        debug!(
                            "{} ({}) found {} accounts for {}, {} new",
                            strategy.name(),
                            variant,
                            found,
                            owner,
                            added
                        );
                    }
                    Err(e) => {
                        warn!(
                            "{} ({}) failed for {}: {}",
                            strategy.name(),
                            variant,
                            owner,
                            e
                        );
                        failures.push(format!("{} ({}): {}", strategy.name(), variant, e));
                    }
                }
            }
        }

        if attempts > 0 && failures.len() == attempts {
            return Err(Error::Discovery(format!(
                "every strategy failed for {}: {}",
                owner,
                failures.join("; ")
            )));
        }

        info!(
            "Discovered {} token accounts for {} ({} of {} queries failed)",
            merged.len(),
            owner,
            failures.len(),
            attempts
        );
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockchain::mock::{LedgerQuery, MockLedger};
    use std::time::Duration;

    fn no_wait() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_multiplier: 2.0,
        }
    }

    fn ids(records: &[TokenAccountRecord]) -> Vec<Pubkey> {
        records.iter().map(|r| r.account_id).collect()
    }

    #[tokio::test]
    async fn test_union_of_partial_strategies() {
        let ledger = MockLedger::new();
        let owner = Pubkey::new_unique();
        let a = ledger.add_token_account(&owner, ProgramVariant::Standard, 1, 2_039_280);
        let b = ledger.add_token_account(&owner, ProgramVariant::Standard, 0, 2_039_280);
        let c = ledger.add_token_account(&owner, ProgramVariant::Standard, 5, 2_039_280);

        // owner index sees {A, B}, program scan sees {B, C}, parsed lookup is down
        ledger.hide_from(LedgerQuery::OwnerIndex, &c);
        ledger.hide_from(LedgerQuery::ProgramScan, &a);
        ledger.fail_query(LedgerQuery::ParsedOwner);

        let records = TokenAccountDiscovery::new()
            .discover(&ledger, &no_wait(), &owner)
            .await
            .unwrap();

        assert_eq!(ids(&records), vec![a, b, c]);
    }

    #[tokio::test]
    async fn test_both_program_variants_are_searched() {
        let ledger = MockLedger::new();
        let owner = Pubkey::new_unique();
        let standard = ledger.add_token_account(&owner, ProgramVariant::Standard, 1, 2_039_280);
        let extended = ledger.add_token_account(&owner, ProgramVariant::Extended, 1, 2_074_080);
        ledger.add_token_account(&Pubkey::new_unique(), ProgramVariant::Extended, 1, 2_039_280);

        let records = TokenAccountDiscovery::new()
            .discover(&ledger, &no_wait(), &owner)
            .await
            .unwrap();

        assert_eq!(ids(&records), vec![standard, extended]);
        assert_eq!(records[1].program, ProgramVariant::Extended);
    }

    #[tokio::test]
    async fn test_every_strategy_failing_is_an_error() {
        let ledger = MockLedger::new();
        ledger.fail_query(LedgerQuery::OwnerIndex);
        ledger.fail_query(LedgerQuery::ProgramScan);
        ledger.fail_query(LedgerQuery::ParsedOwner);

        let result = TokenAccountDiscovery::new()
            .discover(&ledger, &no_wait(), &Pubkey::new_unique())
            .await;

        assert!(matches!(result, Err(Error::Discovery(_))));
    }

    #[tokio::test]
    async fn test_no_accounts_is_an_empty_success() {
        let ledger = MockLedger::new();
        let records = TokenAccountDiscovery::new()
            .discover(&ledger, &no_wait(), &Pubkey::new_unique())
            .await
            .unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn test_rate_limited_strategy_recovers_through_retry() {
        let ledger = MockLedger::new();
        let owner = Pubkey::new_unique();
        let a = ledger.add_token_account(&owner, ProgramVariant::Standard, 1, 2_039_280);
        ledger.hide_from(LedgerQuery::ProgramScan, &a);
        ledger.hide_from(LedgerQuery::ParsedOwner, &a);
        ledger.rate_limit(LedgerQuery::OwnerIndex, 2);

        let records = TokenAccountDiscovery::new()
            .discover(&ledger, &no_wait(), &owner)
            .await
            .unwrap();

        assert_eq!(ids(&records), vec![a]);
    }

    #[tokio::test]
    async fn test_custom_strategy_list() {
        let ledger = MockLedger::new();
        let owner = Pubkey::new_unique();
        let a = ledger.add_token_account(&owner, ProgramVariant::Standard, 1, 2_039_280);
        ledger.hide_from(LedgerQuery::OwnerIndex, &a);

        let discovery = TokenAccountDiscovery::with_strategies(vec![Box::new(OwnerIndexStrategy)]);
        assert_eq!(discovery.strategy_names(), vec!["owner-index"]);

        let records = discovery.discover(&ledger, &no_wait(), &owner).await.unwrap();
        assert!(records.is_empty());
    }
}
