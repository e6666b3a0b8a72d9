pub mod client;
pub mod ledger;
#[cfg(any(test, feature = "testing"))]
pub mod mock;
pub mod retry;
pub mod token;
pub mod types;

pub use client::SolanaClient;
pub use ledger::LedgerClient;
pub use retry::{retry_with_backoff, RetryPolicy};
pub use types::*;
