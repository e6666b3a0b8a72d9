use shared::models::ProgramVariant;
use solana_sdk::pubkey::Pubkey;

/// A token account found during discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenAccountRecord {
    pub account_id: Pubkey,
    pub owner_id: Pubkey,
    pub program: ProgramVariant,
    pub token_amount: u64,
    pub mint_id: Pubkey,
}

/// Token account as reported by a jsonParsed owner lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTokenAccount {
    pub pubkey: Pubkey,
    /// `info.owner` exactly as the provider reported it
    pub owner: String,
    pub mint: String,
    pub amount: u64,
    pub lamports: u64,
}

/// Fields read from a token account's raw data layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawTokenState {
    pub mint: Pubkey,
    pub owner: Pubkey,
    pub amount: u64,
    /// Wrapped native balance: the amount mirrors lamports and cannot be burned
    pub is_native: bool,
}
