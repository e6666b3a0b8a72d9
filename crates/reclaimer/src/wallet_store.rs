//! Wallet secret ingestion and the deduplicated working set
//!
//! Accepts either one secret per line or a structured document with
//! `PRIVATE KEYS:`, `WALLET ADDRESSES:` and `PRIVATE KEYS / ADDRESS:`
//! sections. Lines are told apart by their encoded length. Paired addresses
//! are only cross-checked; the identity derived from the secret always wins.

use shared::models::{LoadDiagnostic, LoadReport, WalletView};
use shared::{Error, Result};
use solana_sdk::{
    pubkey::Pubkey,
    signature::{Keypair, Signer},
    signer::keypair::keypair_from_seed,
};
use std::ops::RangeInclusive;
use tracing::{debug, info, warn};
use zeroize::Zeroize;

/// Encoded length of a base58 64-byte secret key
pub const SECRET_LEN: RangeInclusive<usize> = 80..=90;

/// Encoded length accepted for a public address
pub const ADDRESS_LEN: RangeInclusive<usize> = 40..=50;

/// Narrow view of the wallet set used by the pipeline and scheduler
pub trait WalletRegistry {
    fn load(&mut self, content: &str) -> Result<LoadReport>;

    fn get_all(&self) -> &[WalletRecord];

    fn get_by_index(&self, index: usize) -> Option<&WalletRecord>;

    fn update_discovery(
        &mut self,
        index: usize,
        balance: u64,
        rent_amount: u64,
        can_close: bool,
    ) -> Result<()>;

    fn len(&self) -> usize {
        self.get_all().len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One loaded wallet
#[derive(Clone)]
pub struct WalletRecord {
    secret: String,
    public_id: Pubkey,
    pub balance: u64, // in lamports
    pub rent_amount: u64,
    pub can_close: bool,
}

impl WalletRecord {
    fn new(secret: String, public_id: Pubkey) -> Self {
        Self {
            secret,
            public_id,
            balance: 0,
            rent_amount: 0,
            can_close: false,
        }
    }

    pub fn public_id(&self) -> Pubkey {
        self.public_id
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn keypair(&self) -> Result<Keypair> {
        decode_secret(&self.secret)
    }

    pub fn view(&self, index: usize) -> WalletView {
        WalletView {
            index,
            public_id: self.public_id.to_string(),
            balance: self.balance,
            rent_amount: self.rent_amount,
            can_close: self.can_close,
        }
    }
}

impl std::fmt::Debug for WalletRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletRecord")
            .field("public_id", &self.public_id)
            .field("balance", &self.balance)
            .field("rent_amount", &self.rent_amount)
            .field("can_close", &self.can_close)
            .finish_non_exhaustive()
    }
}

impl Drop for WalletRecord {
    fn drop(&mut self) {
        self.secret.zeroize();
    }
}

/// Decode a base58 64-byte secret key and check that its public half matches
pub fn decode_secret(secret: &str) -> Result<Keypair> {
    let mut bytes = bs58::decode(secret.trim())
        .into_vec()
        .map_err(|e| Error::KeyFormat(format!("not valid base58: {}", e)))?;

    if bytes.len() != 64 {
        let len = bytes.len();
        bytes.zeroize();
        return Err(Error::KeyFormat(format!(
            "expected 64 key bytes, decoded {}",
            len
        )));
    }

    let keypair = keypair_from_seed(&bytes[..32])
        .map_err(|e| Error::KeyFormat(format!("invalid secret key: {}", e)));
    let public_half_matches = keypair
        .as_ref()
        .map(|kp| kp.pubkey().to_bytes()[..] == bytes[32..])
        .unwrap_or(false);
    bytes.zeroize();

    let keypair = keypair?;
    if !public_half_matches {
        return Err(Error::KeyFormat(
            "public key half does not match the secret".to_string(),
        ));
    }
    Ok(keypair)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    /// No header seen yet: one secret per line
    Simple,
    Secrets,
    Addresses,
    Paired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineKind {
    Secret,
    Address,
    Other,
}

fn section_header(line: &str) -> Option<Section> {
    let normalized: String = line
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_uppercase();

    match normalized.as_str() {
        "PRIVATEKEYS:" => Some(Section::Secrets),
        "WALLETADDRESSES:" => Some(Section::Addresses),
        "PRIVATEKEYS/ADDRESS:" => Some(Section::Paired),
        _ => None,
    }
}

fn classify(line: &str) -> LineKind {
    if SECRET_LEN.contains(&line.len()) {
        LineKind::Secret
    } else if ADDRESS_LEN.contains(&line.len()) {
        LineKind::Address
    } else {
        LineKind::Other
    }
}

#[derive(Debug)]
struct ParsedSecret {
    line: usize,
    secret: String,
    /// Addresses offered for the soft cross-check, with their line numbers
    addresses: Vec<(usize, String)>,
}

#[derive(Debug, Default)]
struct ParsedText {
    secrets: Vec<ParsedSecret>,
    diagnostics: Vec<LoadDiagnostic>,
}

fn parse_text(content: &str) -> ParsedText {
    let mut parsed = ParsedText::default();
    let mut section = Section::Simple;
    let mut listed_addresses: Vec<(usize, String)> = Vec::new();

    for (idx, raw) in content.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(next) = section_header(line) {
            debug!("Line {}: entering {:?} section", line_no, next);
            section = next;
            continue;
        }

        match (section, classify(line)) {
            (Section::Simple | Section::Secrets | Section::Paired, LineKind::Secret) => {
                parsed.secrets.push(ParsedSecret {
                    line: line_no,
                    secret: line.to_string(),
                    addresses: Vec::new(),
                });
            }
            (Section::Paired, LineKind::Address) => match parsed.secrets.last_mut() {
                Some(last) => last.addresses.push((line_no, line.to_string())),
                None => parsed.diagnostics.push(LoadDiagnostic::UnpairedAddress {
                    line: line_no,
                    address: line.to_string(),
                }),
            },
            (Section::Addresses, LineKind::Address) => {
                listed_addresses.push((line_no, line.to_string()));
            }
            (_, _) => {
                debug!("Line {}: ignored ({} chars)", line_no, line.len());
                parsed.diagnostics.push(LoadDiagnostic::IgnoredLine {
                    line: line_no,
                    length: line.len(),
                });
            }
        }
    }

    // WALLET ADDRESSES: pair up with the secrets in listing order
    for (position, (line, address)) in listed_addresses.into_iter().enumerate() {
        match parsed.secrets.get_mut(position) {
            Some(secret) => secret.addresses.push((line, address)),
            None => parsed
                .diagnostics
                .push(LoadDiagnostic::UnpairedAddress { line, address }),
        }
    }

    parsed
}

/// Deduplicated, load-ordered wallet set for one run
#[derive(Debug, Default)]
pub struct WalletStore {
    records: Vec<WalletRecord>,
}

impl WalletStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `content` and add every wallet not already in the store
    ///
    /// The whole text is validated before anything is added, so a key that
    /// fails to decode leaves the store untouched.
    pub fn load_from_text(&mut self, content: &str) -> Result<LoadReport> {
        let parsed = parse_text(content);

        if parsed.secrets.is_empty() {
            return Err(Error::Validation(
                "no valid private keys found in wallet text".to_string(),
            ));
        }

        let mut report = LoadReport {
            diagnostics: parsed.diagnostics,
            ..Default::default()
        };
        let mut staged: Vec<WalletRecord> = Vec::new();

        for entry in parsed.secrets {
            let keypair = decode_secret(&entry.secret)
                .map_err(|e| Error::KeyFormat(format!("line {}: {}", entry.line, e)))?;
            let derived = keypair.pubkey();

            for (line, provided) in &entry.addresses {
                if *provided != derived.to_string() {
                    warn!(
                        "Line {}: address {} does not match derived identity {}, keeping derived",
                        line, provided, derived
                    );
                    report.diagnostics.push(LoadDiagnostic::AddressMismatch {
                        line: *line,
                        provided: provided.clone(),
                        derived: derived.to_string(),
                    });
                }
            }

            let existing = self
                .records
                .iter()
                .chain(staged.iter())
                .find(|record| record.public_id == derived);

            if let Some(existing) = existing {
                let diagnostic = if existing.secret == entry.secret {
                    LoadDiagnostic::DuplicateSecret {
                        line: entry.line,
                        public_id: derived.to_string(),
                    }
                } else {
                    LoadDiagnostic::DuplicateIdentity {
                        line: entry.line,
                        public_id: derived.to_string(),
                    }
                };
                warn!("Line {}: duplicate wallet {} skipped", entry.line, derived);
                report.duplicates += 1;
                report.diagnostics.push(diagnostic);
                continue;
            }

            staged.push(WalletRecord::new(entry.secret, derived));
        }

        report.added = staged.len();
        self.records.extend(staged);

        info!(
            "Loaded {} new wallets ({} duplicates skipped, {} total)",
            report.added,
            report.duplicates,
            self.records.len()
        );
        Ok(report)
    }

    pub fn views(&self) -> Vec<WalletView> {
        self.records
            .iter()
            .enumerate()
            .map(|(index, record)| record.view(index))
            .collect()
    }

    pub fn clear(&mut self) {
        info!("Clearing {} wallets", self.records.len());
        self.records.clear();
    }
}

impl WalletRegistry for WalletStore {
    fn load(&mut self, content: &str) -> Result<LoadReport> {
        self.load_from_text(content)
    }

    fn get_all(&self) -> &[WalletRecord] {
        &self.records
    }

    fn get_by_index(&self, index: usize) -> Option<&WalletRecord> {
        self.records.get(index)
    }

    fn update_discovery(
        &mut self,
        index: usize,
        balance: u64,
        rent_amount: u64,
        can_close: bool,
    ) -> Result<()> {
        if rent_amount > 0 && !can_close {
            return Err(Error::Validation(format!(
                "wallet {} has {} lamports of rent but is marked not closable",
                index, rent_amount
            )));
        }

        let record = self
            .records
            .get_mut(index)
            .ok_or_else(|| Error::WalletNotFound(format!("index {}", index)))?;
        record.balance = balance;
        record.rent_amount = rent_amount;
        record.can_close = can_close;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret_of(keypair: &Keypair) -> String {
        keypair.to_base58_string()
    }

    #[test]
    fn test_decode_secret_round_trip() {
        let keypair = Keypair::new();
        let decoded = decode_secret(&secret_of(&keypair)).unwrap();
        assert_eq!(decoded.pubkey(), keypair.pubkey());
    }

    #[test]
    fn test_decode_secret_rejects_mismatched_halves() {
        let a = Keypair::new();
        let b = Keypair::new();
        let mut bytes = a.to_bytes().to_vec();
        bytes[32..].copy_from_slice(&b.pubkey().to_bytes());
        let forged = bs58::encode(bytes).into_string();

        assert!(matches!(decode_secret(&forged), Err(Error::KeyFormat(_))));
    }

    #[test]
    fn test_simple_format() {
        let a = Keypair::new();
        let b = Keypair::new();
        let text = format!("{}\n\n  {}  \n", secret_of(&a), secret_of(&b));

        let mut store = WalletStore::new();
        let report = store.load_from_text(&text).unwrap();

        assert_eq!(report.added, 2);
        assert_eq!(store.get_all()[0].public_id(), a.pubkey());
        assert_eq!(store.get_all()[1].public_id(), b.pubkey());
    }

    #[test]
    fn test_empty_text_is_validation_error() {
        let mut store = WalletStore::new();
        assert!(matches!(
            store.load_from_text("\n   \nhello\n"),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_undecodable_secret_aborts_whole_text() {
        let good = Keypair::new();
        let bad = "0".repeat(88); // '0' is not in the base58 alphabet
        let text = format!("{}\n{}\n", secret_of(&good), bad);

        let mut store = WalletStore::new();
        match store.load_from_text(&text) {
            Err(Error::KeyFormat(msg)) => assert!(msg.starts_with("line 2")),
            other => panic!("Expected KeyFormat, got {:?}", other),
        }
        assert!(store.is_empty());
    }

    #[test]
    fn test_duplicates_within_and_across_loads() {
        let a = Keypair::new();
        let b = Keypair::new();
        let mut store = WalletStore::new();

        let first = store
            .load_from_text(&format!("{}\n{}\n", secret_of(&a), secret_of(&a)))
            .unwrap();
        assert_eq!(first.added, 1);
        assert_eq!(first.duplicates, 1);

        let second = store
            .load_from_text(&format!("{}\n{}\n", secret_of(&b), secret_of(&a)))
            .unwrap();
        assert_eq!(second.added, 1);
        assert_eq!(second.duplicates, 1);
        assert!(matches!(
            second.diagnostics[0],
            LoadDiagnostic::DuplicateSecret { line: 2, .. }
        ));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_paired_section_cross_check() {
        let a = Keypair::new();
        let b = Keypair::new();
        let stranger = Keypair::new();
        let text = format!(
            "PRIVATE KEYS / ADDRESS:\n{}\n{}\n{}\n{}\n",
            secret_of(&a),
            a.pubkey(),
            secret_of(&b),
            stranger.pubkey()
        );

        let mut store = WalletStore::new();
        let report = store.load_from_text(&text).unwrap();

        assert_eq!(report.added, 2);
        assert_eq!(store.get_all()[1].public_id(), b.pubkey());
        assert_eq!(
            report.diagnostics,
            vec![LoadDiagnostic::AddressMismatch {
                line: 5,
                provided: stranger.pubkey().to_string(),
                derived: b.pubkey().to_string(),
            }]
        );
    }

    #[test]
    fn test_separate_sections_pair_in_order() {
        let a = Keypair::new();
        let b = Keypair::new();
        let text = format!(
            "PRIVATE KEYS:\n{}\n{}\n\nWALLET ADDRESSES:\n{}\n{}\n{}\n",
            secret_of(&a),
            secret_of(&b),
            a.pubkey(),
            b.pubkey(),
            Keypair::new().pubkey()
        );

        let mut store = WalletStore::new();
        let report = store.load_from_text(&text).unwrap();

        assert_eq!(report.added, 2);
        assert_eq!(report.diagnostics.len(), 1);
        assert!(matches!(
            report.diagnostics[0],
            LoadDiagnostic::UnpairedAddress { line: 8, .. }
        ));
    }

    #[test]
    fn test_address_before_any_secret_is_unpaired() {
        let a = Keypair::new();
        let text = format!(
            "PRIVATE KEYS / ADDRESS:\n{}\n{}\n",
            a.pubkey(),
            secret_of(&a)
        );

        let mut store = WalletStore::new();
        let report = store.load_from_text(&text).unwrap();
        assert_eq!(report.added, 1);
        assert!(matches!(
            report.diagnostics[0],
            LoadDiagnostic::UnpairedAddress { line: 2, .. }
        ));
    }

    #[test]
    fn test_update_discovery_enforces_can_close() {
        let mut store = WalletStore::new();
        store
            .load_from_text(&secret_of(&Keypair::new()))
            .unwrap();

        assert!(store.update_discovery(0, 10, 2_039_280, false).is_err());
        store.update_discovery(0, 10, 2_039_280, true).unwrap();
        assert_eq!(store.get_by_index(0).unwrap().rent_amount, 2_039_280);
        assert!(matches!(
            store.update_discovery(5, 0, 0, false),
            Err(Error::WalletNotFound(_))
        ));
    }

    #[test]
    fn test_debug_output_hides_secret() {
        let keypair = Keypair::new();
        let mut store = WalletStore::new();
        store.load_from_text(&secret_of(&keypair)).unwrap();

        let debug = format!("{:?}", store.get_all()[0]);
        assert!(!debug.contains(&secret_of(&keypair)));
        assert!(debug.contains(&keypair.pubkey().to_string()));
    }

    #[test]
    fn test_clear() {
        let mut store = WalletStore::new();
        store.load_from_text(&secret_of(&Keypair::new())).unwrap();
        store.clear();
        assert!(store.is_empty());
    }
}
