//! Wallet registry
//!
//! Tracks wallet existence and lifecycle status. The Ledger Engine
//! consults this registry before any mutation but owns no wallet writes;
//! status transitions go through here.
//!
//! Key custody is external: callers supply an address and a key-hash as
//! opaque strings. For deployments without a custody service,
//! [`generate_credentials`] reproduces the conventional scheme (random hex
//! address, random hex private key, SHA-256 key-hash).

use crate::{
    error::{Error, Result},
    types::{Wallet, WalletAddress, WalletStatus},
    Storage,
};
use chrono::Utc;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// Freshly generated wallet credentials
///
/// The private key is returned exactly once; only its hash is ever stored.
#[derive(Debug, Clone)]
pub struct WalletCredentials {
    /// Wallet address (public)
    pub address: WalletAddress,

    /// Private key, hex-encoded (never persisted)
    pub private_key: String,

    /// SHA-256 hash of the private key, hex-encoded
    pub key_hash: String,
}

/// Generate wallet credentials from secure randomness
pub fn generate_credentials() -> WalletCredentials {
    let mut rng = rand::thread_rng();

    let mut key_bytes = [0u8; 32];
    rng.fill_bytes(&mut key_bytes);
    let private_key = hex::encode(key_bytes);

    let mut address_bytes = [0u8; 20];
    rng.fill_bytes(&mut address_bytes);
    let address = WalletAddress::new(hex::encode(address_bytes));

    WalletCredentials {
        address,
        key_hash: hash_key(&private_key),
        private_key,
    }
}

/// SHA-256 hash of a private key, hex-encoded
pub fn hash_key(private_key: &str) -> String {
    hex::encode(Sha256::digest(private_key.as_bytes()))
}

/// Wallet registry backed by storage
pub struct WalletRegistry {
    storage: Arc<Storage>,
}

impl WalletRegistry {
    /// Create registry over shared storage
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    /// Register a new wallet from externally supplied credentials
    ///
    /// Addresses are otherwise opaque, but `|` delimits composite storage
    /// keys and is therefore rejected.
    pub fn create(&self, address: WalletAddress, key_hash: String) -> Result<Wallet> {
        if address.as_str().is_empty() || address.as_str().contains('|') {
            return Err(Error::InvalidAddress(address.to_string()));
        }
        if self.storage.get_wallet(&address)?.is_some() {
            return Err(Error::WalletExists(address.to_string()));
        }

        let wallet = Wallet {
            address,
            key_hash,
            created_at: Utc::now(),
            status: WalletStatus::Active,
        };
        self.storage.put_wallet(&wallet)?;

        tracing::info!(wallet = %wallet.address, "Wallet created");

        Ok(wallet)
    }

    /// Get wallet by address
    pub fn get(&self, address: &WalletAddress) -> Result<Wallet> {
        self.storage
            .get_wallet(address)?
            .ok_or_else(|| Error::WalletNotFound(address.to_string()))
    }

    /// List all wallets
    pub fn list(&self) -> Result<Vec<Wallet>> {
        self.storage.list_wallets()
    }

    /// Verify a private key against the stored key-hash
    pub fn verify_key(&self, address: &WalletAddress, private_key: &str) -> Result<bool> {
        let wallet = self.get(address)?;
        Ok(wallet.key_hash == hash_key(private_key))
    }

    /// Freeze an active wallet (debits forbidden until unfrozen)
    pub fn freeze(&self, address: &WalletAddress) -> Result<Wallet> {
        self.transition(address, WalletStatus::Frozen)
    }

    /// Unfreeze a frozen wallet
    pub fn unfreeze(&self, address: &WalletAddress) -> Result<Wallet> {
        self.transition(address, WalletStatus::Active)
    }

    /// Close a wallet (terminal; no further mutation permitted)
    pub fn close(&self, address: &WalletAddress) -> Result<Wallet> {
        self.transition(address, WalletStatus::Closed)
    }

    fn transition(&self, address: &WalletAddress, next: WalletStatus) -> Result<Wallet> {
        let mut wallet = self.get(address)?;

        if !wallet.status.can_transition_to(next) {
            return match wallet.status {
                WalletStatus::Closed => Err(Error::WalletClosed(address.to_string())),
                _ => Err(Error::InvalidTransition {
                    wallet: address.to_string(),
                    from: wallet.status.to_string(),
                    to: next.to_string(),
                }),
            };
        }

        let previous = wallet.status;
        wallet.status = next;
        self.storage.put_wallet(&wallet)?;

        tracing::info!(
            wallet = %wallet.address,
            from = %previous,
            to = %next,
            "Wallet status changed"
        );

        Ok(wallet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Config;
    use tempfile::TempDir;

    fn open_registry() -> (WalletRegistry, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        let storage = Arc::new(Storage::open(&config).unwrap());
        (WalletRegistry::new(storage), temp_dir)
    }

    #[test]
    fn test_generate_credentials() {
        let creds = generate_credentials();
        assert_eq!(creds.address.as_str().len(), 40);
        assert_eq!(creds.private_key.len(), 64);
        assert_eq!(creds.key_hash, hash_key(&creds.private_key));

        let other = generate_credentials();
        assert_ne!(creds.address, other.address);
    }

    #[test]
    fn test_create_and_verify_key() {
        let (registry, _temp) = open_registry();
        let creds = generate_credentials();

        let wallet = registry
            .create(creds.address.clone(), creds.key_hash.clone())
            .unwrap();
        assert_eq!(wallet.status, WalletStatus::Active);

        assert!(registry
            .verify_key(&creds.address, &creds.private_key)
            .unwrap());
        assert!(!registry.verify_key(&creds.address, "wrong-key").unwrap());
    }

    #[test]
    fn test_delimiter_address_rejected() {
        let (registry, _temp) = open_registry();

        // "a" is a prefix of "a|X" in every composite key; letting the
        // latter register would bleed its rows into the former's scans
        for address in ["a|X", "|", ""] {
            let result = registry.create(WalletAddress::new(address), "hash".to_string());
            assert!(matches!(result, Err(Error::InvalidAddress(_))));
        }

        registry
            .create(WalletAddress::new("a"), "hash".to_string())
            .unwrap();
    }

    #[test]
    fn test_duplicate_address_rejected() {
        let (registry, _temp) = open_registry();
        let address = WalletAddress::new("a1b2c3");

        registry.create(address.clone(), "hash".to_string()).unwrap();
        let result = registry.create(address, "hash".to_string());
        assert!(matches!(result, Err(Error::WalletExists(_))));
    }

    #[test]
    fn test_lifecycle_transitions() {
        let (registry, _temp) = open_registry();
        let address = WalletAddress::new("a1b2c3");
        registry.create(address.clone(), "hash".to_string()).unwrap();

        let frozen = registry.freeze(&address).unwrap();
        assert_eq!(frozen.status, WalletStatus::Frozen);

        let active = registry.unfreeze(&address).unwrap();
        assert_eq!(active.status, WalletStatus::Active);

        let closed = registry.close(&address).unwrap();
        assert_eq!(closed.status, WalletStatus::Closed);

        // Closed is terminal
        assert!(matches!(
            registry.freeze(&address),
            Err(Error::WalletClosed(_))
        ));
        assert!(matches!(
            registry.unfreeze(&address),
            Err(Error::WalletClosed(_))
        ));
    }

    #[test]
    fn test_unfreeze_requires_frozen() {
        let (registry, _temp) = open_registry();
        let address = WalletAddress::new("a1b2c3");
        registry.create(address.clone(), "hash".to_string()).unwrap();

        assert!(registry.unfreeze(&address).is_err());
    }
}
