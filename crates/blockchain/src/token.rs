//! Token program helpers shared by discovery and the collection pipeline

use shared::models::ProgramVariant;
use shared::{Error, Result};
use solana_sdk::{instruction::Instruction, program_pack::Pack, pubkey::Pubkey, system_instruction};
use spl_token::solana_program::program_option::COption;
use spl_token_2022::extension::StateWithExtensions;

use crate::types::RawTokenState;

/// Size of a token account without extensions
pub const TOKEN_ACCOUNT_LEN: usize = spl_token::state::Account::LEN;

/// Byte offset of the owner field inside the token account layout
pub const OWNER_OFFSET: usize = 32;

pub fn program_id(variant: ProgramVariant) -> Pubkey {
    match variant {
        ProgramVariant::Standard => spl_token::id(),
        ProgramVariant::Extended => spl_token_2022::id(),
    }
}

pub fn variant_for_program(program: &Pubkey) -> Option<ProgramVariant> {
    ProgramVariant::ALL
        .into_iter()
        .find(|variant| program_id(*variant) == *program)
}

/// Mint of wrapped native balances under each program
pub fn native_mint(variant: ProgramVariant) -> Pubkey {
    match variant {
        ProgramVariant::Standard => spl_token::native_mint::id(),
        ProgramVariant::Extended => spl_token_2022::native_mint::id(),
    }
}

/// Decode mint, owner, amount and the native flag from raw account data
pub fn decode_token_account(variant: ProgramVariant, data: &[u8]) -> Result<RawTokenState> {
    match variant {
        ProgramVariant::Standard => {
            let account = spl_token::state::Account::unpack(data).map_err(|e| {
                Error::SolanaRpc(format!("Invalid standard token account data: {}", e))
            })?;
            Ok(RawTokenState {
                mint: account.mint,
                owner: account.owner,
                amount: account.amount,
                is_native: account.is_native.is_some(),
            })
        }
        ProgramVariant::Extended => {
            let state = StateWithExtensions::<spl_token_2022::state::Account>::unpack(data)
                .map_err(|e| {
                    Error::SolanaRpc(format!("Invalid extended token account data: {}", e))
                })?;
            Ok(RawTokenState {
                mint: state.base.mint,
                owner: state.base.owner,
                amount: state.base.amount,
                is_native: state.base.is_native.is_some(),
            })
        }
    }
}

/// Burn the full `amount` held by `account`, authorised by its owner
pub fn burn_instruction(
    variant: ProgramVariant,
    account: &Pubkey,
    mint: &Pubkey,
    owner: &Pubkey,
    amount: u64,
) -> Result<Instruction> {
    spl_token_2022::instruction::burn(&program_id(variant), account, mint, owner, &[], amount)
        .map_err(|e| Error::Transaction(format!("Failed to build burn instruction: {}", e)))
}

/// Close `account`, sending its lamports to `destination`
pub fn close_instruction(
    variant: ProgramVariant,
    account: &Pubkey,
    destination: &Pubkey,
    owner: &Pubkey,
) -> Result<Instruction> {
    spl_token_2022::instruction::close_account(
        &program_id(variant),
        account,
        destination,
        owner,
        &[],
    )
    .map_err(|e| Error::Transaction(format!("Failed to build close instruction: {}", e)))
}

pub fn transfer_instruction(from: &Pubkey, to: &Pubkey, lamports: u64) -> Instruction {
    system_instruction::transfer(from, to, lamports)
}

/// Pack a plain 165-byte token account, used by tests and the mock ledger
pub fn pack_token_account(mint: &Pubkey, owner: &Pubkey, amount: u64) -> Result<Vec<u8>> {
    pack(spl_token::state::Account {
        mint: *mint,
        owner: *owner,
        amount,
        state: spl_token::state::AccountState::Initialized,
        ..Default::default()
    })
}

/// Pack a wrapped native account holding `amount` above its rent reserve
pub fn pack_native_token_account(
    variant: ProgramVariant,
    owner: &Pubkey,
    amount: u64,
    rent_exempt_reserve: u64,
) -> Result<Vec<u8>> {
    pack(spl_token::state::Account {
        mint: native_mint(variant),
        owner: *owner,
        amount,
        state: spl_token::state::AccountState::Initialized,
        is_native: COption::Some(rent_exempt_reserve),
        ..Default::default()
    })
}

fn pack(account: spl_token::state::Account) -> Result<Vec<u8>> {
    let mut data = vec![0u8; TOKEN_ACCOUNT_LEN];
    spl_token::state::Account::pack(account, &mut data)
        .map_err(|e| Error::Serialization(format!("Failed to pack token account: {}", e)))?;
    Ok(data)
}
