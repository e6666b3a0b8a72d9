use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid key format: {0}")]
    KeyFormat(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("'{operation}' still rate limited after {attempts} attempts: {source}")]
    RetryExhausted {
        operation: String,
        attempts: u32,
        #[source]
        source: Box<Error>,
    },

    #[error("Transaction failed: {0}")]
    Transaction(String),

    #[error("Solana RPC error: {0}")]
    SolanaRpc(String),

    #[error("Token account discovery failed: {0}")]
    Discovery(String),

    #[error("Wallet not found: {0}")]
    WalletNotFound(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Message fragments RPC providers use when throttling a caller.
const RATE_LIMIT_SIGNATURES: &[&str] = &["too many requests", "rate limit", "rate-limit"];

const HTTP_TOO_MANY_REQUESTS: &str = "429";

impl Error {
    /// Returns true when the error carries a rate-limit signature and is worth retrying.
    pub fn is_rate_limited(&self) -> bool {
        match self {
            Error::RateLimited(_) => true,
            Error::SolanaRpc(msg) | Error::Transaction(msg) => message_is_rate_limited(msg),
            _ => false,
        }
    }
}

/// Classify a raw error message coming back from an RPC provider.
pub fn message_is_rate_limited(message: &str) -> bool {
    let lower = message.to_lowercase();
    RATE_LIMIT_SIGNATURES.iter().any(|sig| lower.contains(sig)) || has_status_code(&lower)
}

/// A bare `429` token, not digits inside an address, signature or hex code
fn has_status_code(message: &str) -> bool {
    message
        .match_indices(HTTP_TOO_MANY_REQUESTS)
        .any(|(start, code)| {
            let before = message[..start].chars().next_back();
            let after = message[start + code.len()..].chars().next();
            !before.map_or(false, |c| c.is_ascii_alphanumeric())
                && !after.map_or(false, |c| c.is_ascii_alphanumeric())
        })
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_variant_is_retryable() {
        assert!(Error::RateLimited("slow down".to_string()).is_rate_limited());
    }

    #[test]
    fn test_rpc_message_signatures() {
        assert!(Error::SolanaRpc("HTTP status client error (429 Too Many Requests)".to_string()).is_rate_limited());
        assert!(Error::Transaction("Rate limit exceeded for method".to_string()).is_rate_limited());
        assert!(!Error::SolanaRpc("connection refused".to_string()).is_rate_limited());
        assert!(Error::SolanaRpc("HTTP 429 on call 2".to_string()).is_rate_limited());
        assert!(message_is_rate_limited("server responded with status 429"));
    }

    #[test]
    fn test_429_inside_identifiers_is_not_rate_limited() {
        let messages = [
            "AccountNotFound: pubkey=9xQeWvG816bUx9EPjHmaT23yvVM2ZWbrrpZb9PusV429",
            "Transaction 5VERv8NMvzbJMEkV8xnrLkEaWRtSz9CosKDYjCJjBRnbJLgp8uirBgmQpjKhoR4tjF3ZpRzrFmBV6UjKdiSZkQUW429x failed",
            "Error processing Instruction 0: custom program error: 0x1429",
            "insufficient lamports 4290001, need 5000000",
        ];
        for message in messages {
            assert!(
                !Error::Transaction(message.to_string()).is_rate_limited(),
                "{}",
                message
            );
        }
    }

    #[test]
    fn test_non_transient_errors_are_not_rate_limited() {
        assert!(!Error::Transaction("insufficient funds for fee".to_string()).is_rate_limited());
        assert!(!Error::Validation("429 lines".to_string()).is_rate_limited());
        assert!(!Error::Configuration("fee payer not set".to_string()).is_rate_limited());
    }

    #[test]
    fn test_retry_exhausted_keeps_source() {
        let err = Error::RetryExhausted {
            operation: "get_balance".to_string(),
            attempts: 4,
            source: Box::new(Error::RateLimited("429".to_string())),
        };
        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("Rate limited: 429"));
        assert!(!err.is_rate_limited());
    }
}
