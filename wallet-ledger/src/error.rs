//! Error types for the wallet ledger

use rust_decimal::Decimal;
use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
///
/// Validation errors are detected before any write and propagated to the
/// caller verbatim. `LockTimeout` and `Storage` are transient; everything
/// else is a definitive rejection with zero observable effect.
#[derive(Error, Debug)]
pub enum Error {
    /// Wallet not found
    #[error("Wallet not found: {0}")]
    WalletNotFound(String),

    /// Wallet already exists (registry collision)
    #[error("Wallet already exists: {0}")]
    WalletExists(String),

    /// Address is empty or contains a reserved byte
    #[error("Invalid wallet address: {0:?}")]
    InvalidAddress(String),

    /// Wallet is closed (terminal state)
    #[error("Wallet is closed: {0}")]
    WalletClosed(String),

    /// Wallet is frozen (debits forbidden)
    #[error("Wallet is frozen: {0}")]
    WalletFrozen(String),

    /// Disallowed wallet status transition
    #[error("Invalid status transition for {wallet}: {from} -> {to}")]
    InvalidTransition {
        /// Wallet address
        wallet: String,
        /// Current status
        from: String,
        /// Requested status
        to: String,
    },

    /// Currency not found in the registry
    #[error("Currency not found: {0}")]
    CurrencyNotFound(String),

    /// Movement not found
    #[error("Movement not found: {0}")]
    MovementNotFound(u64),

    /// Non-positive amount, invalid fee, etc.
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Non-positive quoted exchange rate
    #[error("Invalid rate: {0}")]
    InvalidRate(Decimal),

    /// Conversion source and destination currencies are equal
    #[error("Source and destination currencies must differ: {0}")]
    SameCurrency(String),

    /// Transfer source and destination wallets are equal
    #[error("Source and destination wallets must differ: {0}")]
    SameWallet(String),

    /// Balance below the required gross amount
    #[error("Insufficient balance in {currency}: required {required}, available {available}")]
    InsufficientBalance {
        /// Currency of the short balance row
        currency: String,
        /// Gross amount the operation needed
        required: Decimal,
        /// Quantity available at validation time
        available: Decimal,
    },

    /// Balance row lock could not be acquired within the configured wait
    #[error("Lock timeout on balance row: {0}")]
    LockTimeout(String),

    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for transient errors the caller may safely retry whole
    /// (assuming it deduplicates with a request id).
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::LockTimeout(_) | Error::Storage(_))
    }
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(Error::LockTimeout("w1/BTC".to_string()).is_retryable());
        assert!(Error::Storage("write stall".to_string()).is_retryable());
        assert!(!Error::WalletNotFound("w1".to_string()).is_retryable());
        assert!(!Error::InsufficientBalance {
            currency: "BTC".to_string(),
            required: Decimal::ONE,
            available: Decimal::ZERO,
        }
        .is_retryable());
    }
}
