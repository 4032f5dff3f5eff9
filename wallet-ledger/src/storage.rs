//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `wallets` - Wallet registry rows (key: address)
//! - `currencies` - Currency registry rows (key: code)
//! - `balances` - Balance rows (key: address || '|' || code)
//! - `movements` - Append-only movement log (key: big-endian movement id)
//! - `indices` - Secondary indices (wallet movement history, idempotency)
//!
//! Movement rows are never updated or deleted; the only write path that
//! touches them is [`Storage::commit_movement`], which commits the
//! movement, its balance effects, and its index rows in one WriteBatch.

use crate::{
    error::{Error, Result},
    types::{Balance, BalanceKey, Currency, CurrencyCode, MovementRecord, Receipt, Wallet,
        WalletAddress},
    Config,
};
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, DBCompactionStyle, Direction, IteratorMode, Options,
    WriteBatch, DB,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Column family names
const CF_WALLETS: &str = "wallets";
const CF_CURRENCIES: &str = "currencies";
const CF_BALANCES: &str = "balances";
const CF_MOVEMENTS: &str = "movements";
const CF_INDICES: &str = "indices";

/// Index key prefixes within CF_INDICES
const IDX_WALLET_MOVEMENT: &[u8] = b"wm|";
const IDX_IDEMPOTENCY: &[u8] = b"idem|";

/// Storage wrapper for RocksDB
pub struct Storage {
    db: Arc<DB>,

    /// Next movement id to hand out (seeded from the log at open)
    next_movement_id: AtomicU64,
}

impl Storage {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        // Tuning from config
        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_target_file_size_base(config.rocksdb.target_file_size_mb * 1024 * 1024);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);

        // Universal compaction for the append-heavy movement log
        db_opts.set_compaction_style(DBCompactionStyle::Universal);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_WALLETS, Self::cf_options_registry()),
            ColumnFamilyDescriptor::new(CF_CURRENCIES, Self::cf_options_registry()),
            ColumnFamilyDescriptor::new(CF_BALANCES, Self::cf_options_balances()),
            ColumnFamilyDescriptor::new(CF_MOVEMENTS, Self::cf_options_movements()),
            ColumnFamilyDescriptor::new(CF_INDICES, Self::cf_options_indices()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        let storage = Self {
            db: Arc::new(db),
            next_movement_id: AtomicU64::new(1),
        };

        let next_id = storage.last_movement_id()? + 1;
        storage.next_movement_id.store(next_id, Ordering::SeqCst);

        tracing::info!(path = ?path, next_movement_id = next_id, "Opened RocksDB");

        Ok(storage)
    }

    // Column family options

    fn cf_options_registry() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_options_balances() -> Options {
        let mut opts = Options::default();
        // Balances are read on every operation, use LZ4 for speed
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_options_movements() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts.set_bottommost_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_options_indices() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        // Indices benefit from bloom filters
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false); // 10 bits per key
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    // Wallet operations

    /// Put wallet row
    pub fn put_wallet(&self, wallet: &Wallet) -> Result<()> {
        let cf = self.cf_handle(CF_WALLETS)?;
        let value = bincode::serialize(wallet)?;
        self.db.put_cf(cf, wallet.address.as_str().as_bytes(), &value)?;
        Ok(())
    }

    /// Get wallet by address
    pub fn get_wallet(&self, address: &WalletAddress) -> Result<Option<Wallet>> {
        let cf = self.cf_handle(CF_WALLETS)?;
        match self.db.get_cf(cf, address.as_str().as_bytes())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    /// List all wallets
    pub fn list_wallets(&self) -> Result<Vec<Wallet>> {
        let cf = self.cf_handle(CF_WALLETS)?;
        let mut wallets = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            wallets.push(bincode::deserialize(&value)?);
        }
        Ok(wallets)
    }

    // Currency operations

    /// Put currency row
    pub fn put_currency(&self, currency: &Currency) -> Result<()> {
        let cf = self.cf_handle(CF_CURRENCIES)?;
        let value = bincode::serialize(currency)?;
        self.db
            .put_cf(cf, currency.code.as_str().as_bytes(), &value)?;
        Ok(())
    }

    /// List all currencies
    pub fn list_currencies(&self) -> Result<Vec<Currency>> {
        let cf = self.cf_handle(CF_CURRENCIES)?;
        let mut currencies = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            currencies.push(bincode::deserialize(&value)?);
        }
        Ok(currencies)
    }

    // Balance operations

    /// Get balance row (None if the pair has never had activity)
    pub fn get_balance(&self, key: &BalanceKey) -> Result<Option<Balance>> {
        let cf = self.cf_handle(CF_BALANCES)?;
        match self.db.get_cf(cf, Self::balance_row_key(key))? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    /// List all balance rows of one wallet
    pub fn list_balances(&self, wallet: &WalletAddress) -> Result<Vec<Balance>> {
        let cf = self.cf_handle(CF_BALANCES)?;
        let mut prefix = wallet.as_str().as_bytes().to_vec();
        prefix.push(b'|');

        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&prefix, Direction::Forward));

        let mut balances = Vec::new();
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            balances.push(bincode::deserialize(&value)?);
        }
        Ok(balances)
    }

    // Movement operations

    /// Allocate the next movement id (monotonic, gap-free only per process)
    pub fn allocate_movement_id(&self) -> u64 {
        self.next_movement_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Get movement by id
    pub fn get_movement(&self, id: u64) -> Result<MovementRecord> {
        let cf = self.cf_handle(CF_MOVEMENTS)?;
        let value = self
            .db
            .get_cf(cf, id.to_be_bytes())?
            .ok_or(Error::MovementNotFound(id))?;
        Ok(bincode::deserialize(&value)?)
    }

    /// Get all movements touching one wallet (chronological)
    pub fn wallet_movements(&self, wallet: &WalletAddress) -> Result<Vec<MovementRecord>> {
        let cf_indices = self.cf_handle(CF_INDICES)?;
        let prefix = Self::index_prefix_wallet(wallet);

        let iter = self
            .db
            .iterator_cf(cf_indices, IteratorMode::From(&prefix, Direction::Forward));

        let mut movements = Vec::new();
        for item in iter {
            let (key, _) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            // Movement id is the trailing 8 bytes of the index key
            if key.len() >= 8 {
                let id_bytes: [u8; 8] = key[key.len() - 8..].try_into().unwrap();
                movements.push(self.get_movement(u64::from_be_bytes(id_bytes))?);
            }
        }
        Ok(movements)
    }

    /// Look up a previously committed receipt by request id
    pub fn get_receipt_for_request(&self, request_id: Uuid) -> Result<Option<Receipt>> {
        let cf = self.cf_handle(CF_INDICES)?;
        match self.db.get_cf(cf, Self::index_key_idempotency(request_id))? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    // Atomic commit

    /// Commit one movement with its balance effects (atomic)
    ///
    /// Writes the movement row, every touched balance row, a history index
    /// row per involved wallet, and (when a request id was supplied) the
    /// idempotency row carrying the full receipt, all in one WriteBatch.
    /// Either everything lands or nothing does.
    pub fn commit_movement(
        &self,
        receipt: &Receipt,
        balances: &[Balance],
        request_id: Option<Uuid>,
    ) -> Result<()> {
        let record = &receipt.movement;
        let mut batch = WriteBatch::default();

        // 1. Movement row
        let cf_movements = self.cf_handle(CF_MOVEMENTS)?;
        let movement_value = bincode::serialize(record)?;
        batch.put_cf(cf_movements, record.id.to_be_bytes(), &movement_value);

        // 2. Balance rows
        let cf_balances = self.cf_handle(CF_BALANCES)?;
        for balance in balances {
            let value = bincode::serialize(balance)?;
            batch.put_cf(cf_balances, Self::balance_row_key(&balance.key), &value);
        }

        // 3. Wallet history indices (one per distinct wallet involved)
        let cf_indices = self.cf_handle(CF_INDICES)?;
        let mut wallets: Vec<WalletAddress> = record
            .movement
            .touched_keys()
            .into_iter()
            .map(|k| k.wallet)
            .collect();
        wallets.sort();
        wallets.dedup();
        for wallet in &wallets {
            let idx = Self::index_key_wallet_movement(wallet, record.id);
            batch.put_cf(cf_indices, &idx, b"");
        }

        // 4. Idempotency row
        if let Some(request_id) = request_id {
            let value = bincode::serialize(receipt)?;
            batch.put_cf(cf_indices, Self::index_key_idempotency(request_id), &value);
        }

        self.db.write(batch)?;

        tracing::debug!(
            movement_id = record.id,
            kind = record.movement.kind(),
            balance_rows = balances.len(),
            "Movement committed"
        );

        Ok(())
    }

    // Key helpers

    fn balance_row_key(key: &BalanceKey) -> Vec<u8> {
        let mut row_key = key.wallet.as_str().as_bytes().to_vec();
        row_key.push(b'|');
        row_key.extend_from_slice(key.currency.as_str().as_bytes());
        row_key
    }

    fn index_prefix_wallet(wallet: &WalletAddress) -> Vec<u8> {
        let mut prefix = IDX_WALLET_MOVEMENT.to_vec();
        prefix.extend_from_slice(wallet.as_str().as_bytes());
        prefix.push(b'|');
        prefix
    }

    fn index_key_wallet_movement(wallet: &WalletAddress, movement_id: u64) -> Vec<u8> {
        let mut key = Self::index_prefix_wallet(wallet);
        key.extend_from_slice(&movement_id.to_be_bytes());
        key
    }

    fn index_key_idempotency(request_id: Uuid) -> Vec<u8> {
        let mut key = IDX_IDEMPOTENCY.to_vec();
        key.extend_from_slice(request_id.as_bytes());
        key
    }

    fn last_movement_id(&self) -> Result<u64> {
        let cf = self.cf_handle(CF_MOVEMENTS)?;
        let mut iter = self.db.iterator_cf(cf, IteratorMode::End);
        if let Some(item) = iter.next() {
            let (key, _) = item?;
            if key.len() == 8 {
                let bytes: [u8; 8] = key.as_ref().try_into().unwrap();
                return Ok(u64::from_be_bytes(bytes));
            }
        }
        Ok(0)
    }

    // Statistics

    /// Get storage statistics
    pub fn get_stats(&self) -> Result<StorageStats> {
        let cf_movements = self.cf_handle(CF_MOVEMENTS)?;
        let cf_balances = self.cf_handle(CF_BALANCES)?;

        let total_movements = self.approximate_count(cf_movements)?;
        let total_balances = self.approximate_count(cf_balances)?;
        let total_wallets = self.list_wallets()?.len() as u64;

        Ok(StorageStats {
            total_wallets,
            total_balances,
            total_movements,
        })
    }

    fn approximate_count(&self, cf: &ColumnFamily) -> Result<u64> {
        // RocksDB property for approximate count
        let prop = self
            .db
            .property_int_value_cf(cf, "rocksdb.estimate-num-keys")?
            .unwrap_or(0);
        Ok(prop)
    }
}

/// Storage statistics
#[derive(Debug, Clone)]
pub struct StorageStats {
    pub total_wallets: u64,
    pub total_balances: u64,
    pub total_movements: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AssetClass, BalanceChange, Movement, WalletStatus};
    use chrono::Utc;
    use rust_decimal::Decimal;
    use tempfile::TempDir;

    fn test_config() -> (Config, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        (config, temp_dir)
    }

    fn test_wallet(address: &str) -> Wallet {
        Wallet {
            address: WalletAddress::new(address),
            key_hash: "deadbeef".to_string(),
            created_at: Utc::now(),
            status: WalletStatus::Active,
        }
    }

    fn deposit_receipt(id: u64, address: &str, amount: Decimal) -> (Receipt, Balance) {
        let key = BalanceKey::new(WalletAddress::new(address), CurrencyCode::new("BTC"));
        let movement = Movement::Deposit {
            wallet: key.wallet.clone(),
            currency: key.currency.clone(),
            amount,
            fee: Decimal::ZERO,
            timestamp: Utc::now(),
        };
        let balance = Balance {
            key: key.clone(),
            amount,
            updated_at: Utc::now(),
        };
        let receipt = Receipt {
            movement: MovementRecord { id, movement },
            changes: vec![BalanceChange {
                key,
                previous: Decimal::ZERO,
                current: amount,
            }],
        };
        (receipt, balance)
    }

    #[test]
    fn test_wallet_roundtrip() {
        let (config, _temp) = test_config();
        let storage = Storage::open(&config).unwrap();

        let wallet = test_wallet("a1b2c3");
        storage.put_wallet(&wallet).unwrap();

        let retrieved = storage.get_wallet(&wallet.address).unwrap().unwrap();
        assert_eq!(retrieved.address, wallet.address);
        assert_eq!(retrieved.status, WalletStatus::Active);

        assert!(storage
            .get_wallet(&WalletAddress::new("missing"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_currency_roundtrip() {
        let (config, _temp) = test_config();
        let storage = Storage::open(&config).unwrap();

        let currency = Currency {
            code: CurrencyCode::new("BTC"),
            name: "Bitcoin".to_string(),
            asset_class: AssetClass::Crypto,
        };
        storage.put_currency(&currency).unwrap();

        let currencies = storage.list_currencies().unwrap();
        assert_eq!(currencies.len(), 1);
        assert_eq!(currencies[0].code.as_str(), "BTC");
    }

    #[test]
    fn test_commit_movement_atomic() {
        let (config, _temp) = test_config();
        let storage = Storage::open(&config).unwrap();

        let id = storage.allocate_movement_id();
        let (receipt, balance) = deposit_receipt(id, "a1b2c3", Decimal::new(500, 2));

        storage.commit_movement(&receipt, &[balance.clone()], None).unwrap();

        let retrieved = storage.get_movement(id).unwrap();
        assert_eq!(retrieved.id, id);

        let stored = storage.get_balance(&balance.key).unwrap().unwrap();
        assert_eq!(stored.amount, Decimal::new(500, 2));

        let history = storage.wallet_movements(&balance.key.wallet).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, id);
    }

    #[test]
    fn test_idempotency_lookup() {
        let (config, _temp) = test_config();
        let storage = Storage::open(&config).unwrap();

        let request_id = Uuid::new_v4();
        assert!(storage
            .get_receipt_for_request(request_id)
            .unwrap()
            .is_none());

        let id = storage.allocate_movement_id();
        let (receipt, balance) = deposit_receipt(id, "a1b2c3", Decimal::ONE);
        storage
            .commit_movement(&receipt, &[balance], Some(request_id))
            .unwrap();

        let replay = storage.get_receipt_for_request(request_id).unwrap().unwrap();
        assert_eq!(replay.movement.id, id);
    }

    #[test]
    fn test_movement_id_seeding_across_reopen() {
        let (config, _temp) = test_config();

        {
            let storage = Storage::open(&config).unwrap();
            for _ in 0..3 {
                let id = storage.allocate_movement_id();
                let (receipt, balance) = deposit_receipt(id, "a1b2c3", Decimal::ONE);
                storage.commit_movement(&receipt, &[balance], None).unwrap();
            }
        }

        let storage = Storage::open(&config).unwrap();
        assert_eq!(storage.allocate_movement_id(), 4);
    }

    #[test]
    fn test_list_balances_scoped_to_wallet() {
        let (config, _temp) = test_config();
        let storage = Storage::open(&config).unwrap();

        // "a1" is a prefix of "a1x"; the scan must not bleed across
        for address in ["a1", "a1x", "b2"] {
            let id = storage.allocate_movement_id();
            let (receipt, balance) = deposit_receipt(id, address, Decimal::ONE);
            storage.commit_movement(&receipt, &[balance], None).unwrap();
        }

        let balances = storage.list_balances(&WalletAddress::new("a1")).unwrap();
        assert_eq!(balances.len(), 1);
        assert_eq!(balances[0].key.wallet.as_str(), "a1");

        // History index scans are scoped the same way
        let movements = storage.wallet_movements(&WalletAddress::new("a1")).unwrap();
        assert_eq!(movements.len(), 1);
    }
}
