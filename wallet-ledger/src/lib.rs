//! Custodial Wallet Ledger
//!
//! Multi-currency balance tracking with an append-only movement log.
//!
//! # Architecture
//!
//! - **Movements are the record**: every deposit, withdrawal, conversion,
//!   and transfer is an immutable movement row; balances are a cached
//!   projection recomputable from the log alone
//! - **Atomic commits**: each operation writes its balance effect and its
//!   movement as one WriteBatch
//! - **Row-level locking**: per (wallet, currency) locks, acquired in
//!   sorted order for multi-row operations
//!
//! # Invariants
//!
//! - Balance >= 0 at all times, enforced before commit
//! - Stored balance == Σ(movement deltas) for every (wallet, currency)
//! - Append-only: movements are never modified or deleted
//! - No partial effect: a failed operation leaves zero trace

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod config;
pub mod currency;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod storage;
pub mod types;
pub mod wallet;

// Re-exports
pub use config::Config;
pub use currency::CurrencyRegistry;
pub use engine::LedgerEngine;
pub use error::{Error, Result};
pub use metrics::Metrics;
pub use storage::{Storage, StorageStats};
pub use types::{
    truncate, AssetClass, Balance, BalanceChange, BalanceKey, Currency, CurrencyBalance,
    CurrencyCode, Movement, MovementRecord, Receipt, Wallet, WalletAddress, WalletStatus,
    MONEY_SCALE,
};
pub use wallet::{generate_credentials, WalletCredentials, WalletRegistry};
