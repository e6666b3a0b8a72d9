use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// Token program models
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgramVariant {
    /// The original SPL token program
    Standard,
    /// The token program with extensions (Token-2022)
    Extended,
}

impl ProgramVariant {
    pub const ALL: [ProgramVariant; 2] = [ProgramVariant::Standard, ProgramVariant::Extended];

    pub fn name(&self) -> &'static str {
        match self {
            ProgramVariant::Standard => "standard",
            ProgramVariant::Extended => "extended",
        }
    }
}

impl std::fmt::Display for ProgramVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// Wallet models

/// Public view of a loaded wallet. Never carries the secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletView {
    pub index: usize,
    pub public_id: String,
    pub balance: u64, // in lamports
    pub rent_amount: u64,
    pub can_close: bool,
}

/// Non-blocking finding produced while ingesting wallet text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum LoadDiagnostic {
    /// The exact same secret string was already loaded
    DuplicateSecret { line: usize, public_id: String },
    /// A different secret decoded to an identity that is already loaded
    DuplicateIdentity { line: usize, public_id: String },
    /// A paired address does not match the identity derived from its secret
    AddressMismatch {
        line: usize,
        provided: String,
        derived: String,
    },
    /// An address line had no secret to pair with
    UnpairedAddress { line: usize, address: String },
    /// A non-empty line matched neither the secret nor the address shape
    IgnoredLine { line: usize, length: usize },
}

impl LoadDiagnostic {
    pub fn is_duplicate(&self) -> bool {
        matches!(
            self,
            LoadDiagnostic::DuplicateSecret { .. } | LoadDiagnostic::DuplicateIdentity { .. }
        )
    }
}

/// Result of ingesting one piece of wallet text
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadReport {
    pub added: usize,
    pub duplicates: usize,
    pub diagnostics: Vec<LoadDiagnostic>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedFile {
    pub path: String,
    pub error: String,
}

/// Result of `load_wallets` across one or more files
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadSummary {
    pub wallets: Vec<WalletView>,
    pub count: usize,
    pub new_files: Vec<String>,
    pub new_wallets_count: usize,
    pub failed_files: Vec<FailedFile>,
    pub diagnostics: Vec<LoadDiagnostic>,
}

// Rent collection models

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountOutcome {
    pub account_id: String,
    pub program: ProgramVariant,
    pub lamports: u64,
    pub token_amount: u64,
    pub burned: bool,
    pub closed: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RentCollectionResult {
    pub wallet_id: String,
    pub token_accounts_closed: u32,
    pub rent_recovered: u64,
    pub sol_transferred: u64,
    pub failed: bool,
    pub error: Option<String>,
    pub accounts: Vec<AccountOutcome>,
}

impl RentCollectionResult {
    pub fn new(wallet_id: String) -> Self {
        Self {
            wallet_id,
            token_accounts_closed: 0,
            rent_recovered: 0,
            sol_transferred: 0,
            failed: false,
            error: None,
            accounts: Vec::new(),
        }
    }

    /// Lamports that actually left this wallet for the fee payer
    pub fn total_recovered(&self) -> u64 {
        self.rent_recovered.saturating_add(self.sol_transferred)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RentCollectionSummary {
    pub total_wallets: usize,
    pub successful_wallets: usize,
    pub failed_wallets: usize,
    pub total_recovered: u64,
    pub results: Vec<RentCollectionResult>,
    pub cancelled: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RentCollectionSummary {
    pub fn new(total_wallets: usize) -> Self {
        Self {
            total_wallets,
            started_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    /// Fold one wallet's result into the running totals
    pub fn record(&mut self, result: RentCollectionResult) {
        if result.failed {
            self.failed_wallets += 1;
        } else {
            self.successful_wallets += 1;
        }
        self.total_recovered = self.total_recovered.saturating_add(result.total_recovered());
        self.results.push(result);
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }
}

/// One wallet's discovery figures from a dry run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryReport {
    pub wallet: WalletView,
    pub eligible_accounts: usize,
    pub error: Option<String>,
}

/// Progress update streamed while a batch runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub current: usize,
    pub total: usize,
    pub wallet_id: String,
    pub status: String,
}

pub mod status {
    pub const PROCESSING: &str = "Processing";
    pub const COMPLETED: &str = "Completed";
    pub const FAILED: &str = "Failed to process";
    pub const CANCELLED: &str = "Cancelled";
}
