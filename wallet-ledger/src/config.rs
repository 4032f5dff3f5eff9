//! Configuration for the wallet ledger

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// Metrics listen address
    pub metrics_listen_addr: String,

    /// Upper bound on balance-row lock waits (milliseconds)
    pub lock_wait_ms: u64,

    /// RocksDB configuration
    pub rocksdb: RocksDbConfig,

    /// Default fee policy
    pub fees: FeeConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/wallet-ledger"),
            service_name: "wallet-ledger".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            metrics_listen_addr: "0.0.0.0:9090".to_string(),
            lock_wait_ms: 5_000,
            rocksdb: RocksDbConfig::default(),
            fees: FeeConfig::default(),
        }
    }
}

/// RocksDB configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RocksDbConfig {
    /// Write buffer size (MB)
    pub write_buffer_size_mb: usize,

    /// Max write buffers
    pub max_write_buffer_number: i32,

    /// Target file size (MB)
    pub target_file_size_mb: u64,

    /// Max background jobs (compaction + flush)
    pub max_background_jobs: i32,

    /// Enable statistics
    pub enable_statistics: bool,
}

impl Default for RocksDbConfig {
    fn default() -> Self {
        Self {
            write_buffer_size_mb: 128,
            max_write_buffer_number: 4,
            target_file_size_mb: 128,
            max_background_jobs: 4,
            enable_statistics: false,
        }
    }
}

/// Default fee percentages the surrounding service applies when building
/// per-call flat fees. The engine itself takes fees as given.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeConfig {
    /// Withdrawal fee as a fraction of the amount
    pub withdraw_fee_percentage: Decimal,

    /// Transfer fee as a fraction of the amount
    pub transfer_fee_percentage: Decimal,

    /// Conversion fee as a fraction of the gross converted value
    pub conversion_fee_percentage: Decimal,
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            withdraw_fee_percentage: Decimal::new(1, 2),    // 1%
            transfer_fee_percentage: Decimal::new(5, 3),    // 0.5%
            conversion_fee_percentage: Decimal::new(2, 2),  // 2%
        }
    }
}

impl FeeConfig {
    /// Flat withdrawal fee for `amount`
    pub fn withdraw_fee(&self, amount: Decimal) -> Decimal {
        crate::truncate(amount * self.withdraw_fee_percentage)
    }

    /// Flat transfer fee for `amount`
    pub fn transfer_fee(&self, amount: Decimal) -> Decimal {
        crate::truncate(amount * self.transfer_fee_percentage)
    }

    /// Flat conversion fee for the gross converted value
    pub fn conversion_fee(&self, gross: Decimal) -> Decimal {
        crate::truncate(gross * self.conversion_fee_percentage)
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(data_dir) = std::env::var("LEDGER_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(addr) = std::env::var("LEDGER_METRICS_ADDR") {
            config.metrics_listen_addr = addr;
        }

        if let Ok(wait) = std::env::var("LEDGER_LOCK_WAIT_MS") {
            config.lock_wait_ms = wait
                .parse()
                .map_err(|e| crate::Error::Config(format!("Invalid LEDGER_LOCK_WAIT_MS: {}", e)))?;
        }

        Ok(config)
    }

    /// Lock wait as a duration
    pub fn lock_wait(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.lock_wait_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.service_name, "wallet-ledger");
        assert_eq!(config.lock_wait_ms, 5_000);
        assert_eq!(config.fees.conversion_fee_percentage, Decimal::new(2, 2));
    }

    #[test]
    fn test_default_fee_amounts() {
        let fees = FeeConfig::default();
        let amount = Decimal::new(100, 0);
        assert_eq!(fees.withdraw_fee(amount), Decimal::new(1, 0));
        assert_eq!(fees.transfer_fee(amount), Decimal::new(5, 1));
        assert_eq!(fees.conversion_fee(amount), Decimal::new(2, 0));
    }

    #[test]
    fn test_fee_amounts_truncate() {
        let fees = FeeConfig::default();
        // 0.00000001 * 0.5% is below the money scale and truncates to zero
        assert_eq!(fees.transfer_fee(Decimal::new(1, 8)), Decimal::ZERO);
    }
}
