//! Currency registry
//!
//! Static mapping from currency code to metadata. Seeded once at open and
//! read-only at runtime; the Ledger Engine consults it before every
//! operation but never writes through it.

use crate::{
    error::{Error, Result},
    types::{AssetClass, Currency, CurrencyCode},
    Storage,
};
use std::collections::HashMap;
use std::sync::Arc;

/// Read-only currency registry backed by storage
pub struct CurrencyRegistry {
    /// In-memory cache, immutable after seeding
    currencies: HashMap<CurrencyCode, Currency>,
}

impl CurrencyRegistry {
    /// Load the registry, seeding the default currency set when empty
    pub fn open(storage: &Arc<Storage>) -> Result<Self> {
        let mut stored = storage.list_currencies()?;

        if stored.is_empty() {
            stored = Self::default_currencies();
            for currency in &stored {
                storage.put_currency(currency)?;
            }
            tracing::info!(count = stored.len(), "Seeded currency registry");
        }

        let currencies = stored
            .into_iter()
            .map(|c| (c.code.clone(), c))
            .collect();

        Ok(Self { currencies })
    }

    /// Default seed set
    fn default_currencies() -> Vec<Currency> {
        let seed = [
            ("BTC", "Bitcoin", AssetClass::Crypto),
            ("ETH", "Ethereum", AssetClass::Crypto),
            ("SOL", "Solana", AssetClass::Crypto),
            ("USD", "US Dollar", AssetClass::Fiat),
            ("BRL", "Brazilian Real", AssetClass::Fiat),
        ];

        seed.iter()
            .map(|(code, name, asset_class)| Currency {
                code: CurrencyCode::new(*code),
                name: (*name).to_string(),
                asset_class: *asset_class,
            })
            .collect()
    }

    /// Get currency metadata by code
    pub fn get(&self, code: &CurrencyCode) -> Result<&Currency> {
        self.currencies
            .get(code)
            .ok_or_else(|| Error::CurrencyNotFound(code.to_string()))
    }

    /// Whether a code is registered
    pub fn contains(&self, code: &CurrencyCode) -> bool {
        self.currencies.contains_key(code)
    }

    /// All registered currencies, ordered by asset class then code
    pub fn list(&self) -> Vec<&Currency> {
        let mut currencies: Vec<&Currency> = self.currencies.values().collect();
        currencies.sort_by(|a, b| {
            a.asset_class
                .cmp(&b.asset_class)
                .then_with(|| a.code.cmp(&b.code))
        });
        currencies
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Config;
    use tempfile::TempDir;

    fn open_registry() -> (CurrencyRegistry, Arc<Storage>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        let storage = Arc::new(Storage::open(&config).unwrap());
        let registry = CurrencyRegistry::open(&storage).unwrap();
        (registry, storage, temp_dir)
    }

    #[test]
    fn test_seed_and_lookup() {
        let (registry, _storage, _temp) = open_registry();

        let btc = registry.get(&CurrencyCode::new("BTC")).unwrap();
        assert_eq!(btc.name, "Bitcoin");
        assert_eq!(btc.asset_class, AssetClass::Crypto);

        let brl = registry.get(&CurrencyCode::new("brl")).unwrap();
        assert_eq!(brl.asset_class, AssetClass::Fiat);

        assert!(registry.get(&CurrencyCode::new("XYZ")).is_err());
    }

    #[test]
    fn test_list_ordered_by_class_then_code() {
        let (registry, _storage, _temp) = open_registry();

        let codes: Vec<&str> = registry.list().iter().map(|c| c.code.as_str()).collect();
        assert_eq!(codes, vec!["BTC", "ETH", "SOL", "BRL", "USD"]);
    }

    #[test]
    fn test_seed_is_idempotent_across_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();

        {
            let storage = Arc::new(Storage::open(&config).unwrap());
            CurrencyRegistry::open(&storage).unwrap();
        }

        let storage = Arc::new(Storage::open(&config).unwrap());
        let registry = CurrencyRegistry::open(&storage).unwrap();
        assert_eq!(registry.list().len(), 5);
        assert_eq!(storage.list_currencies().unwrap().len(), 5);
    }
}
