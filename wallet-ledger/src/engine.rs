//! Ledger engine: the single write path for balances and movements
//!
//! Each operation is one atomic unit: validate, compute deltas under
//! exclusive balance-row locks, then commit every balance update and the
//! movement record in a single WriteBatch. Either both land or neither
//! does; a balance is never observed without its movement or vice versa.
//!
//! # Concurrency
//!
//! Operations touching the same (wallet, currency) row serialize on a
//! per-row async mutex held from validation-read through commit.
//! Multi-row operations (convert, transfer) acquire their row locks in
//! sorted key order, so two transfers running in opposite directions
//! cannot deadlock. Lock waits are bounded by the configured timeout and
//! fail with `LockTimeout`; the engine never retries on its own.

use crate::{
    currency::CurrencyRegistry,
    error::{Error, Result},
    truncate,
    types::{
        Balance, BalanceChange, BalanceKey, CurrencyBalance, CurrencyCode, Movement,
        MovementRecord, Receipt, WalletAddress, WalletStatus,
    },
    wallet::WalletRegistry,
    Config, Metrics, Storage,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::timeout;
use uuid::Uuid;

/// The transactional ledger core
pub struct LedgerEngine {
    /// Shared storage (injected; see [`LedgerEngine::with_storage`])
    storage: Arc<Storage>,

    /// Wallet lifecycle registry (read-only dependency of the engine)
    wallets: WalletRegistry,

    /// Currency registry (read-only after seeding)
    currencies: CurrencyRegistry,

    /// Per balance-row locks; entries live as long as the row
    locks: DashMap<BalanceKey, Arc<Mutex<()>>>,

    /// Upper bound on a single lock acquisition
    lock_wait: Duration,

    /// Prometheus metrics
    metrics: Metrics,
}

impl LedgerEngine {
    /// Open the engine with configuration
    pub fn open(config: &Config) -> Result<Self> {
        let storage = Arc::new(Storage::open(config)?);
        Self::with_storage(storage, config.lock_wait())
    }

    /// Build the engine over an injected store handle
    pub fn with_storage(storage: Arc<Storage>, lock_wait: Duration) -> Result<Self> {
        let currencies = CurrencyRegistry::open(&storage)?;
        let wallets = WalletRegistry::new(storage.clone());
        let metrics = Metrics::new()
            .map_err(|e| Error::Config(format!("Failed to register metrics: {}", e)))?;

        Ok(Self {
            storage,
            wallets,
            currencies,
            locks: DashMap::new(),
            lock_wait,
            metrics,
        })
    }

    /// Wallet registry
    pub fn wallets(&self) -> &WalletRegistry {
        &self.wallets
    }

    /// Currency registry
    pub fn currencies(&self) -> &CurrencyRegistry {
        &self.currencies
    }

    /// Metrics collector
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    // Operations

    /// Credit funds to a wallet
    ///
    /// The net credited amount is `amount - fee` and must be strictly
    /// positive; a deposit fully consumed by its fee is rejected.
    /// A FROZEN wallet may still receive deposits; a CLOSED one may not.
    pub async fn deposit(
        &self,
        wallet: &WalletAddress,
        currency: &CurrencyCode,
        amount: Decimal,
        fee: Decimal,
        request_id: Option<Uuid>,
    ) -> Result<Receipt> {
        self.instrumented("deposit", self.deposit_inner(wallet, currency, amount, fee, request_id))
            .await
    }

    async fn deposit_inner(
        &self,
        wallet: &WalletAddress,
        currency: &CurrencyCode,
        amount: Decimal,
        fee: Decimal,
        request_id: Option<Uuid>,
    ) -> Result<Receipt> {
        let amount = normalize_amount(amount)?;
        let fee = normalize_fee(fee)?;
        if fee >= amount {
            return Err(Error::InvalidAmount(format!(
                "fee {} must be less than amount {}",
                fee, amount
            )));
        }
        self.currencies.get(currency)?;

        if let Some(receipt) = self.check_replay(request_id)? {
            return Ok(receipt);
        }

        let key = BalanceKey::new(wallet.clone(), currency.clone());
        let _guards = self.acquire_locks(std::slice::from_ref(&key)).await?;

        if let Some(receipt) = self.check_replay(request_id)? {
            return Ok(receipt);
        }

        // Status transitions are not serialized against the row lock, so
        // this is best-effort: a close landing after this read is ordered
        // as deposit-then-close
        let wallet_row = self.wallets.get(wallet)?;
        if wallet_row.status == WalletStatus::Closed {
            return Err(Error::WalletClosed(wallet.to_string()));
        }

        let prior = self.read_amount(&key)?;
        let now = Utc::now();
        let movement = Movement::Deposit {
            wallet: wallet.clone(),
            currency: currency.clone(),
            amount,
            fee,
            timestamp: now,
        };

        self.commit(movement, vec![(key, prior, prior + (amount - fee))], now, request_id)
    }

    /// Debit funds from a wallet
    ///
    /// The gross `amount` is debited; the fee comes out of the withdrawn
    /// funds, not on top of them.
    pub async fn withdraw(
        &self,
        wallet: &WalletAddress,
        currency: &CurrencyCode,
        amount: Decimal,
        fee: Decimal,
        request_id: Option<Uuid>,
    ) -> Result<Receipt> {
        self.instrumented(
            "withdraw",
            self.withdraw_inner(wallet, currency, amount, fee, request_id),
        )
        .await
    }

    async fn withdraw_inner(
        &self,
        wallet: &WalletAddress,
        currency: &CurrencyCode,
        amount: Decimal,
        fee: Decimal,
        request_id: Option<Uuid>,
    ) -> Result<Receipt> {
        let amount = normalize_amount(amount)?;
        let fee = normalize_fee(fee)?;
        if fee > amount {
            return Err(Error::InvalidAmount(format!(
                "fee {} cannot exceed amount {}",
                fee, amount
            )));
        }
        self.currencies.get(currency)?;

        if let Some(receipt) = self.check_replay(request_id)? {
            return Ok(receipt);
        }

        let key = BalanceKey::new(wallet.clone(), currency.clone());
        let _guards = self.acquire_locks(std::slice::from_ref(&key)).await?;

        if let Some(receipt) = self.check_replay(request_id)? {
            return Ok(receipt);
        }

        self.require_active(wallet)?;

        let prior = self.read_amount(&key)?;
        if prior < amount {
            return Err(Error::InsufficientBalance {
                currency: currency.to_string(),
                required: amount,
                available: prior,
            });
        }

        let now = Utc::now();
        let movement = Movement::Withdraw {
            wallet: wallet.clone(),
            currency: currency.clone(),
            amount,
            fee,
            timestamp: now,
        };

        self.commit(movement, vec![(key, prior, prior - amount)], now, request_id)
    }

    /// Convert funds between two currencies inside one wallet
    ///
    /// The quoted rate is an externally asserted input, recorded verbatim.
    /// `destination = source * rate * (1 - fee_percentage)` and
    /// `fee = source * rate * fee_percentage`, each truncated toward zero
    /// independently, so the movement is self-verifying within one
    /// rounding unit.
    pub async fn convert(
        &self,
        wallet: &WalletAddress,
        from_currency: &CurrencyCode,
        to_currency: &CurrencyCode,
        source_amount: Decimal,
        quoted_rate: Decimal,
        fee_percentage: Decimal,
        request_id: Option<Uuid>,
    ) -> Result<Receipt> {
        self.instrumented(
            "conversion",
            self.convert_inner(
                wallet,
                from_currency,
                to_currency,
                source_amount,
                quoted_rate,
                fee_percentage,
                request_id,
            ),
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn convert_inner(
        &self,
        wallet: &WalletAddress,
        from_currency: &CurrencyCode,
        to_currency: &CurrencyCode,
        source_amount: Decimal,
        quoted_rate: Decimal,
        fee_percentage: Decimal,
        request_id: Option<Uuid>,
    ) -> Result<Receipt> {
        let source_amount = normalize_amount(source_amount)?;
        if from_currency == to_currency {
            return Err(Error::SameCurrency(from_currency.to_string()));
        }
        if quoted_rate <= Decimal::ZERO {
            return Err(Error::InvalidRate(quoted_rate));
        }
        if fee_percentage < Decimal::ZERO || fee_percentage >= Decimal::ONE {
            return Err(Error::InvalidAmount(format!(
                "fee percentage {} must be within [0, 1)",
                fee_percentage
            )));
        }
        self.currencies.get(from_currency)?;
        self.currencies.get(to_currency)?;

        if let Some(receipt) = self.check_replay(request_id)? {
            return Ok(receipt);
        }

        let from_key = BalanceKey::new(wallet.clone(), from_currency.clone());
        let to_key = BalanceKey::new(wallet.clone(), to_currency.clone());
        let mut keys = [from_key.clone(), to_key.clone()];
        keys.sort();
        let _guards = self.acquire_locks(&keys).await?;

        if let Some(receipt) = self.check_replay(request_id)? {
            return Ok(receipt);
        }

        self.require_active(wallet)?;

        let prior_from = self.read_amount(&from_key)?;
        if prior_from < source_amount {
            return Err(Error::InsufficientBalance {
                currency: from_currency.to_string(),
                required: source_amount,
                available: prior_from,
            });
        }
        let prior_to = self.read_amount(&to_key)?;

        let gross = source_amount * quoted_rate;
        let fee_amount = truncate(gross * fee_percentage);
        let destination_amount = truncate(gross * (Decimal::ONE - fee_percentage));
        if destination_amount <= Decimal::ZERO {
            return Err(Error::InvalidAmount(format!(
                "converted amount {} truncates to zero",
                gross
            )));
        }

        let now = Utc::now();
        let movement = Movement::Conversion {
            wallet: wallet.clone(),
            from_currency: from_currency.clone(),
            to_currency: to_currency.clone(),
            source_amount,
            destination_amount,
            rate: quoted_rate,
            fee_percentage,
            fee_amount,
            timestamp: now,
        };

        self.commit(
            movement,
            vec![
                (from_key, prior_from, prior_from - source_amount),
                (to_key, prior_to, prior_to + destination_amount),
            ],
            now,
            request_id,
        )
    }

    /// Move funds between two wallets
    ///
    /// The sender is debited the gross `amount`; the receiver is credited
    /// `amount - fee` (the fee is charged to the sender). The destination
    /// must not be CLOSED but may be FROZEN, since a credit is not a
    /// debit-type mutation.
    pub async fn transfer(
        &self,
        from_wallet: &WalletAddress,
        to_wallet: &WalletAddress,
        currency: &CurrencyCode,
        amount: Decimal,
        fee: Decimal,
        request_id: Option<Uuid>,
    ) -> Result<Receipt> {
        self.instrumented(
            "transfer",
            self.transfer_inner(from_wallet, to_wallet, currency, amount, fee, request_id),
        )
        .await
    }

    async fn transfer_inner(
        &self,
        from_wallet: &WalletAddress,
        to_wallet: &WalletAddress,
        currency: &CurrencyCode,
        amount: Decimal,
        fee: Decimal,
        request_id: Option<Uuid>,
    ) -> Result<Receipt> {
        let amount = normalize_amount(amount)?;
        let fee = normalize_fee(fee)?;
        if fee >= amount {
            return Err(Error::InvalidAmount(format!(
                "fee {} must be less than amount {}",
                fee, amount
            )));
        }
        if from_wallet == to_wallet {
            return Err(Error::SameWallet(from_wallet.to_string()));
        }
        self.currencies.get(currency)?;

        if let Some(receipt) = self.check_replay(request_id)? {
            return Ok(receipt);
        }

        let from_key = BalanceKey::new(from_wallet.clone(), currency.clone());
        let to_key = BalanceKey::new(to_wallet.clone(), currency.clone());
        // Sorted acquisition prevents deadlock with the opposite transfer
        let mut keys = [from_key.clone(), to_key.clone()];
        keys.sort();
        let _guards = self.acquire_locks(&keys).await?;

        if let Some(receipt) = self.check_replay(request_id)? {
            return Ok(receipt);
        }

        self.require_active(from_wallet)?;
        let destination = self.wallets.get(to_wallet)?;
        if destination.status == WalletStatus::Closed {
            return Err(Error::WalletClosed(to_wallet.to_string()));
        }

        let prior_from = self.read_amount(&from_key)?;
        if prior_from < amount {
            return Err(Error::InsufficientBalance {
                currency: currency.to_string(),
                required: amount,
                available: prior_from,
            });
        }
        let prior_to = self.read_amount(&to_key)?;

        let now = Utc::now();
        let movement = Movement::Transfer {
            from_wallet: from_wallet.clone(),
            to_wallet: to_wallet.clone(),
            currency: currency.clone(),
            amount,
            fee,
            timestamp: now,
        };

        self.commit(
            movement,
            vec![
                (from_key, prior_from, prior_from - amount),
                (to_key, prior_to, prior_to + (amount - fee)),
            ],
            now,
            request_id,
        )
    }

    // Read paths

    /// Current quantity of one currency in one wallet (zero if no activity)
    pub fn balance(&self, wallet: &WalletAddress, currency: &CurrencyCode) -> Result<Decimal> {
        self.wallets.get(wallet)?;
        self.currencies.get(currency)?;
        self.read_amount(&BalanceKey::new(wallet.clone(), currency.clone()))
    }

    /// All balances of a wallet, one entry per registered currency,
    /// ordered by asset class then code
    pub fn balances(&self, wallet: &WalletAddress) -> Result<Vec<CurrencyBalance>> {
        self.wallets.get(wallet)?;

        let rows = self.storage.list_balances(wallet)?;
        let mut result = Vec::new();
        for currency in self.currencies.list() {
            let amount = rows
                .iter()
                .find(|b| b.key.currency == currency.code)
                .map(|b| b.amount)
                .unwrap_or(Decimal::ZERO);
            result.push(CurrencyBalance {
                currency: currency.clone(),
                amount,
            });
        }
        Ok(result)
    }

    /// Movement history of a wallet (chronological)
    pub fn movements(&self, wallet: &WalletAddress) -> Result<Vec<MovementRecord>> {
        self.wallets.get(wallet)?;
        self.storage.wallet_movements(wallet)
    }

    /// Get one committed movement by id
    pub fn movement(&self, id: u64) -> Result<MovementRecord> {
        self.storage.get_movement(id)
    }

    // Audit

    /// Recompute a balance from the movement log alone
    pub fn recompute_balance(&self, key: &BalanceKey) -> Result<Decimal> {
        let movements = self.storage.wallet_movements(&key.wallet)?;
        Ok(movements
            .iter()
            .fold(Decimal::ZERO, |acc, m| acc + m.movement.delta_for(key)))
    }

    /// Check that every stored balance of a wallet equals the sum of its
    /// movement deltas. This is the engine's central invariant.
    pub fn verify_projection(&self, wallet: &WalletAddress) -> Result<bool> {
        for currency in self.currencies.list() {
            let key = BalanceKey::new(wallet.clone(), currency.code.clone());
            let stored = self.read_amount(&key)?;
            let replayed = self.recompute_balance(&key)?;
            if stored != replayed {
                tracing::warn!(
                    balance = %key,
                    %stored,
                    %replayed,
                    "Balance projection mismatch"
                );
                return Ok(false);
            }
        }
        Ok(true)
    }

    // Internals

    async fn instrumented(
        &self,
        kind: &'static str,
        op: impl std::future::Future<Output = Result<Receipt>>,
    ) -> Result<Receipt> {
        let start = Instant::now();
        let result = op.await;
        match &result {
            Ok(_) => self
                .metrics
                .record_commit(kind, start.elapsed().as_secs_f64()),
            Err(err) => self.note_failure(err),
        }
        result
    }

    fn note_failure(&self, err: &Error) {
        match err {
            Error::InsufficientBalance { .. } => self.metrics.record_rejection("insufficient_funds"),
            Error::LockTimeout(_) => self.metrics.lock_timeouts_total.inc(),
            Error::InvalidAmount(_)
            | Error::InvalidRate(_)
            | Error::SameCurrency(_)
            | Error::SameWallet(_) => self.metrics.record_rejection("invalid_input"),
            Error::WalletFrozen(_) | Error::WalletClosed(_) => {
                self.metrics.record_rejection("invalid_state")
            }
            Error::WalletNotFound(_) | Error::CurrencyNotFound(_) => {
                self.metrics.record_rejection("not_found")
            }
            _ => self.metrics.record_rejection("storage"),
        }
    }

    /// Acquire row locks in the given order (callers pass sorted keys)
    async fn acquire_locks(&self, keys: &[BalanceKey]) -> Result<Vec<OwnedMutexGuard<()>>> {
        let mut guards = Vec::with_capacity(keys.len());
        for key in keys {
            let lock = self
                .locks
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone();
            let guard = timeout(self.lock_wait, lock.lock_owned())
                .await
                .map_err(|_| Error::LockTimeout(key.to_string()))?;
            guards.push(guard);
        }
        Ok(guards)
    }

    fn require_active(&self, wallet: &WalletAddress) -> Result<()> {
        let row = self.wallets.get(wallet)?;
        match row.status {
            WalletStatus::Active => Ok(()),
            WalletStatus::Frozen => Err(Error::WalletFrozen(wallet.to_string())),
            WalletStatus::Closed => Err(Error::WalletClosed(wallet.to_string())),
        }
    }

    fn read_amount(&self, key: &BalanceKey) -> Result<Decimal> {
        Ok(self
            .storage
            .get_balance(key)?
            .map(|b| b.amount)
            .unwrap_or(Decimal::ZERO))
    }

    fn check_replay(&self, request_id: Option<Uuid>) -> Result<Option<Receipt>> {
        match request_id {
            Some(id) => {
                let replay = self.storage.get_receipt_for_request(id)?;
                if let Some(ref receipt) = replay {
                    tracing::debug!(
                        request_id = %id,
                        movement_id = receipt.movement.id,
                        "Replayed idempotent request"
                    );
                }
                Ok(replay)
            }
            None => Ok(None),
        }
    }

    fn commit(
        &self,
        movement: Movement,
        rows: Vec<(BalanceKey, Decimal, Decimal)>,
        now: DateTime<Utc>,
        request_id: Option<Uuid>,
    ) -> Result<Receipt> {
        let id = self.storage.allocate_movement_id();
        let record = MovementRecord { id, movement };

        let balances: Vec<Balance> = rows
            .iter()
            .map(|(key, _, current)| Balance {
                key: key.clone(),
                amount: *current,
                updated_at: now,
            })
            .collect();

        let changes: Vec<BalanceChange> = rows
            .into_iter()
            .map(|(key, previous, current)| BalanceChange {
                key,
                previous,
                current,
            })
            .collect();

        let receipt = Receipt {
            movement: record,
            changes,
        };

        self.storage
            .commit_movement(&receipt, &balances, request_id)?;

        tracing::info!(
            movement_id = receipt.movement.id,
            kind = receipt.movement.movement.kind(),
            "Movement committed"
        );

        Ok(receipt)
    }
}

/// Truncate to ledger scale and require a strictly positive amount
fn normalize_amount(amount: Decimal) -> Result<Decimal> {
    let amount = truncate(amount);
    if amount <= Decimal::ZERO {
        return Err(Error::InvalidAmount(format!(
            "amount {} must be positive",
            amount
        )));
    }
    Ok(amount)
}

/// Truncate to ledger scale and require a non-negative fee
fn normalize_fee(fee: Decimal) -> Result<Decimal> {
    let fee = truncate(fee);
    if fee < Decimal::ZERO {
        return Err(Error::InvalidAmount(format!(
            "fee {} must not be negative",
            fee
        )));
    }
    Ok(fee)
}
