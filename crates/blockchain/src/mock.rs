//! In-memory ledger for exercising the collector without a validator
//!
//! Holds native balances and token accounts for both program variants and
//! executes the system transfer and token burn/close instructions found in
//! submitted transactions. Failures can be injected per query kind. A resent
//! transaction whose signature already landed is acknowledged without being
//! applied twice.

use async_trait::async_trait;
use shared::models::ProgramVariant;
use shared::{Error, Result};
use solana_client::rpc_filter::RpcFilterType;
use solana_sdk::{
    account::Account,
    hash::Hash,
    pubkey::Pubkey,
    rent::Rent,
    signature::Signature,
    system_instruction::SystemInstruction,
    system_program,
    transaction::Transaction,
};
use spl_token_2022::instruction::TokenInstruction;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use crate::ledger::LedgerClient;
use crate::token::{
    native_mint, pack_native_token_account, pack_token_account, program_id, variant_for_program,
    TOKEN_ACCOUNT_LEN,
};
use crate::types::ParsedTokenAccount;

/// Lamports charged per signature
pub const FEE_PER_SIGNATURE: u64 = 5_000;

/// Query kinds that can be hidden from or failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LedgerQuery {
    Balance,
    OwnerIndex,
    ProgramScan,
    ParsedOwner,
    Account,
    Submit,
}

#[derive(Debug, Clone)]
struct MockTokenAccount {
    program: ProgramVariant,
    mint: Pubkey,
    owner: Pubkey,
    amount: u64,
    lamports: u64,
    /// Rent reserve of a wrapped native account
    native_reserve: Option<u64>,
}

#[derive(Debug, Clone, Default)]
struct LedgerState {
    balances: HashMap<Pubkey, u64>,
    token_accounts: HashMap<Pubkey, MockTokenAccount>,
    /// Creation order so query results are deterministic
    order: Vec<Pubkey>,
    processed: HashSet<Signature>,
}

#[derive(Debug, Default)]
struct Faults {
    hidden: HashMap<LedgerQuery, HashSet<Pubkey>>,
    failing: HashSet<LedgerQuery>,
    rate_limited: HashMap<LedgerQuery, u32>,
    failing_signers: HashSet<Pubkey>,
    failing_accounts: HashSet<Pubkey>,
}

#[derive(Default)]
pub struct MockLedger {
    state: Mutex<LedgerState>,
    faults: Mutex<Faults>,
    submitted: Mutex<Vec<Transaction>>,
    calls: Mutex<HashMap<LedgerQuery, u32>>,
}

impl MockLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_balance(&self, pubkey: &Pubkey, lamports: u64) {
        let mut state = self.state.lock().unwrap();
        state.balances.insert(*pubkey, lamports);
    }

    pub fn balance_of(&self, pubkey: &Pubkey) -> u64 {
        let state = self.state.lock().unwrap();
        state.balances.get(pubkey).copied().unwrap_or(0)
    }

    /// Create a token account and return its address
    pub fn add_token_account(
        &self,
        owner: &Pubkey,
        program: ProgramVariant,
        amount: u64,
        lamports: u64,
    ) -> Pubkey {
        let account = Pubkey::new_unique();
        let mut state = self.state.lock().unwrap();
        state.token_accounts.insert(
            account,
            MockTokenAccount {
                program,
                mint: Pubkey::new_unique(),
                owner: *owner,
                amount,
                lamports,
                native_reserve: None,
            },
        );
        state.order.push(account);
        account
    }

    /// Create a wrapped native account holding `amount` lamports above its rent reserve
    pub fn add_native_token_account(
        &self,
        owner: &Pubkey,
        program: ProgramVariant,
        amount: u64,
    ) -> Pubkey {
        let reserve = Rent::default().minimum_balance(TOKEN_ACCOUNT_LEN);
        let account = Pubkey::new_unique();
        let mut state = self.state.lock().unwrap();
        state.token_accounts.insert(
            account,
            MockTokenAccount {
                program,
                mint: native_mint(program),
                owner: *owner,
                amount,
                lamports: reserve + amount,
                native_reserve: Some(reserve),
            },
        );
        state.order.push(account);
        account
    }

    pub fn token_account_exists(&self, account: &Pubkey) -> bool {
        self.state.lock().unwrap().token_accounts.contains_key(account)
    }

    pub fn token_amount(&self, account: &Pubkey) -> Option<u64> {
        let state = self.state.lock().unwrap();
        state.token_accounts.get(account).map(|a| a.amount)
    }

    /// Leave `account` out of the results of `query`, as an incomplete index would
    pub fn hide_from(&self, query: LedgerQuery, account: &Pubkey) {
        let mut faults = self.faults.lock().unwrap();
        faults.hidden.entry(query).or_default().insert(*account);
    }

    /// Make every call of `query` fail with a non-transient RPC error
    pub fn fail_query(&self, query: LedgerQuery) {
        self.faults.lock().unwrap().failing.insert(query);
    }

    /// Answer the next `times` calls of `query` with a rate-limit error
    pub fn rate_limit(&self, query: LedgerQuery, times: u32) {
        self.faults.lock().unwrap().rate_limited.insert(query, times);
    }

    /// Reject any transaction signed by `signer`
    pub fn fail_transactions_signed_by(&self, signer: &Pubkey) {
        self.faults.lock().unwrap().failing_signers.insert(*signer);
    }

    /// Reject any transaction that references `account`
    pub fn fail_transactions_touching(&self, account: &Pubkey) {
        self.faults.lock().unwrap().failing_accounts.insert(*account);
    }

    pub fn submitted_transactions(&self) -> Vec<Transaction> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn call_count(&self, query: LedgerQuery) -> u32 {
        self.calls.lock().unwrap().get(&query).copied().unwrap_or(0)
    }

    fn check_faults(&self, query: LedgerQuery) -> Result<()> {
        *self.calls.lock().unwrap().entry(query).or_insert(0) += 1;

        let mut faults = self.faults.lock().unwrap();
        if let Some(remaining) = faults.rate_limited.get_mut(&query) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(Error::RateLimited(format!("429 Too Many Requests ({:?})", query)));
            }
        }
        if faults.failing.contains(&query) {
            return Err(Error::SolanaRpc(format!("{:?} unavailable", query)));
        }
        Ok(())
    }

    fn is_hidden(&self, query: LedgerQuery, account: &Pubkey) -> bool {
        let faults = self.faults.lock().unwrap();
        faults
            .hidden
            .get(&query)
            .map(|set| set.contains(account))
            .unwrap_or(false)
    }

    fn to_account(token: &MockTokenAccount) -> Result<Account> {
        let data = match token.native_reserve {
            Some(reserve) => {
                pack_native_token_account(token.program, &token.owner, token.amount, reserve)?
            }
            None => pack_token_account(&token.mint, &token.owner, token.amount)?,
        };
        Ok(Account {
            lamports: token.lamports,
            data,
            owner: program_id(token.program),
            executable: false,
            rent_epoch: 0,
        })
    }

    /// Token accounts of `program` in creation order, minus those hidden from `query`
    fn visible_token_accounts(
        &self,
        query: LedgerQuery,
        program: &Pubkey,
    ) -> Vec<(Pubkey, MockTokenAccount)> {
        let state = self.state.lock().unwrap().clone();
        state
            .order
            .iter()
            .filter_map(|key| state.token_accounts.get(key).map(|a| (*key, a.clone())))
            .filter(|(_, a)| program_id(a.program) == *program)
            .filter(|(key, _)| !self.is_hidden(query, key))
            .collect()
    }

    fn apply(state: &mut LedgerState, transaction: &Transaction) -> Result<()> {
        let message = &transaction.message;
        let keys = &message.account_keys;
        let fee_payer = keys
            .first()
            .ok_or_else(|| Error::Transaction("missing fee payer".to_string()))?;

        let fee = FEE_PER_SIGNATURE * transaction.signatures.len() as u64;
        let payer_balance = state.balances.entry(*fee_payer).or_insert(0);
        if *payer_balance < fee {
            return Err(Error::Transaction(
                "Attempt to debit an account but found no record of a prior credit".to_string(),
            ));
        }
        *payer_balance -= fee;

        for instruction in &message.instructions {
            let program = keys[instruction.program_id_index as usize];
            let account_at = |i: usize| -> Result<Pubkey> {
                instruction
                    .accounts
                    .get(i)
                    .map(|idx| keys[*idx as usize])
                    .ok_or_else(|| Error::Transaction("missing instruction account".to_string()))
            };

            if program == system_program::id() {
                let decoded: SystemInstruction = bincode::deserialize(&instruction.data)
                    .map_err(|e| Error::Transaction(format!("bad system instruction: {}", e)))?;
                if let SystemInstruction::Transfer { lamports } = decoded {
                    let from = account_at(0)?;
                    let to = account_at(1)?;
                    let from_balance = state.balances.entry(from).or_insert(0);
                    if *from_balance < lamports {
                        return Err(Error::Transaction(format!(
                            "insufficient lamports {}, need {}",
                            from_balance, lamports
                        )));
                    }
                    *from_balance -= lamports;
                    *state.balances.entry(to).or_insert(0) += lamports;
                }
                continue;
            }

            if variant_for_program(&program).is_none() {
                return Err(Error::Transaction(format!("unknown program {}", program)));
            }

            let decoded = TokenInstruction::unpack(&instruction.data)
                .map_err(|e| Error::Transaction(format!("bad token instruction: {}", e)))?;
            match decoded {
                TokenInstruction::Burn { amount } => {
                    let address = account_at(0)?;
                    let authority = account_at(2)?;
                    let token = state
                        .token_accounts
                        .get_mut(&address)
                        .ok_or_else(|| Error::Transaction("burn: account not found".to_string()))?;
                    if token.owner != authority {
                        return Err(Error::Transaction("burn: owner does not match".to_string()));
                    }
                    if token.native_reserve.is_some() {
                        return Err(Error::Transaction(
                            "burn: instruction does not support native tokens".to_string(),
                        ));
                    }
                    if token.amount < amount {
                        return Err(Error::Transaction("burn: insufficient funds".to_string()));
                    }
                    token.amount -= amount;
                }
                TokenInstruction::CloseAccount => {
                    let address = account_at(0)?;
                    let destination = account_at(1)?;
                    let authority = account_at(2)?;
                    let token = state
                        .token_accounts
                        .get(&address)
                        .ok_or_else(|| Error::Transaction("close: account not found".to_string()))?;
                    if token.owner != authority {
                        return Err(Error::Transaction("close: owner does not match".to_string()));
                    }
                    if token.amount != 0 && token.native_reserve.is_none() {
                        return Err(Error::Transaction(
                            "close: non-native account has balance".to_string(),
                        ));
                    }
                    let lamports = token.lamports;
                    state.token_accounts.remove(&address);
                    state.order.retain(|key| *key != address);
                    *state.balances.entry(destination).or_insert(0) += lamports;
                }
                other => {
                    return Err(Error::Transaction(format!(
                        "unsupported token instruction {:?}",
                        other
                    )))
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerClient for MockLedger {
    async fn get_balance(&self, pubkey: &Pubkey) -> Result<u64> {
        self.check_faults(LedgerQuery::Balance)?;
        Ok(self.balance_of(pubkey))
    }

    async fn get_minimum_balance_for_rent_exemption(&self, data_len: usize) -> Result<u64> {
        Ok(Rent::default().minimum_balance(data_len))
    }

    async fn get_program_accounts(
        &self,
        program_id: &Pubkey,
        filters: Vec<RpcFilterType>,
    ) -> Result<Vec<(Pubkey, Account)>> {
        self.check_faults(LedgerQuery::ProgramScan)?;

        let mut accounts = Vec::new();
        for (key, token) in self.visible_token_accounts(LedgerQuery::ProgramScan, program_id) {
            let account = Self::to_account(&token)?;
            let passes = filters.iter().all(|filter| match filter {
                RpcFilterType::DataSize(size) => account.data.len() as u64 == *size,
                RpcFilterType::Memcmp(memcmp) => memcmp.bytes_match(&account.data),
                _ => true,
            });
            if passes {
                accounts.push((key, account));
            }
        }
        Ok(accounts)
    }

    async fn get_token_accounts_by_owner(
        &self,
        owner: &Pubkey,
        program_id: &Pubkey,
    ) -> Result<Vec<(Pubkey, Account)>> {
        self.check_faults(LedgerQuery::OwnerIndex)?;

        self.visible_token_accounts(LedgerQuery::OwnerIndex, program_id)
            .into_iter()
            .filter(|(_, token)| token.owner == *owner)
            .map(|(key, token)| Ok((key, Self::to_account(&token)?)))
            .collect()
    }

    async fn get_parsed_token_accounts_by_owner(
        &self,
        owner: &Pubkey,
        program_id: &Pubkey,
    ) -> Result<Vec<ParsedTokenAccount>> {
        self.check_faults(LedgerQuery::ParsedOwner)?;

        Ok(self
            .visible_token_accounts(LedgerQuery::ParsedOwner, program_id)
            .into_iter()
            .filter(|(_, token)| token.owner == *owner)
            .map(|(key, token)| ParsedTokenAccount {
                pubkey: key,
                owner: token.owner.to_string(),
                mint: token.mint.to_string(),
                amount: token.amount,
                lamports: token.lamports,
            })
            .collect())
    }

    async fn get_account(&self, pubkey: &Pubkey) -> Result<Option<Account>> {
        self.check_faults(LedgerQuery::Account)?;

        let token = self.state.lock().unwrap().token_accounts.get(pubkey).cloned();
        token.map(|t| Self::to_account(&t)).transpose()
    }

    async fn get_latest_blockhash(&self) -> Result<Hash> {
        Ok(Hash::new_unique())
    }

    async fn send_and_confirm_transaction(&self, transaction: &Transaction) -> Result<Signature> {
        self.check_faults(LedgerQuery::Submit)?;

        transaction
            .verify()
            .map_err(|e| Error::Transaction(format!("signature verification failed: {}", e)))?;

        {
            let faults = self.faults.lock().unwrap();
            let signers = &transaction.message.account_keys
                [..transaction.message.header.num_required_signatures as usize];
            if signers.iter().any(|s| faults.failing_signers.contains(s)) {
                return Err(Error::Transaction(
                    "Transaction simulation failed: Blockhash not found".to_string(),
                ));
            }
            let keys = &transaction.message.account_keys;
            if keys.iter().any(|k| faults.failing_accounts.contains(k)) {
                return Err(Error::Transaction(
                    "Transaction simulation failed: Error processing Instruction 0: invalid account data for instruction"
                        .to_string(),
                ));
            }
        }

        let signature = transaction.signatures.first().copied().unwrap_or_default();
        let mut state = self.state.lock().unwrap();
        if state.processed.contains(&signature) {
            return Ok(signature);
        }
        let mut next = state.clone();
        Self::apply(&mut next, transaction)?;
        next.processed.insert(signature);
        *state = next;
        drop(state);

        self.submitted.lock().unwrap().push(transaction.clone());
        Ok(signature)
    }
}
