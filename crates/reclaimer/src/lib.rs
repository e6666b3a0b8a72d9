//! Rent reclamation for batches of Solana wallets
//!
//! Loads wallet secrets, finds every token account each wallet owns under both
//! token programs, burns and closes them so the rent deposit returns to the fee
//! payer, and sweeps the remaining native balance.

pub mod collector;
pub mod context;
pub mod discovery;
pub mod pipeline;
pub mod scheduler;
pub mod wallet_store;

// Re-export main types
pub use collector::RentCollector;
pub use context::RunContext;
pub use discovery::{DiscoveryStrategy, TokenAccountDiscovery};
pub use pipeline::{PipelineState, RentPipeline, WalletDiscovery, WalletRun};
pub use scheduler::{BatchScheduler, PacingPolicy};
pub use wallet_store::{decode_secret, WalletRecord, WalletRegistry, WalletStore};
