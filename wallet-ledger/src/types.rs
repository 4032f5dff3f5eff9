//! Core types for the wallet ledger
//!
//! All types are designed for:
//! - Deterministic serialization (bincode)
//! - Memory safety (no unsafe code)
//! - Exact arithmetic (Decimal for money)

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Fixed-point scale for all monetary quantities (fractional digits).
pub const MONEY_SCALE: u32 = 8;

/// Truncate toward zero to the ledger's fixed-point scale.
///
/// Rounding never goes in the customer's favor; the discarded remainder
/// is not tracked.
pub fn truncate(value: Decimal) -> Decimal {
    value.trunc_with_scale(MONEY_SCALE)
}

/// Wallet address (opaque, supplied by the key custody service)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WalletAddress(String);

impl WalletAddress {
    /// Create new wallet address
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WalletAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Currency code (e.g. "BTC", "USD")
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CurrencyCode(String);

impl CurrencyCode {
    /// Create new currency code (normalized to uppercase)
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into().to_uppercase())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Asset class of a currency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AssetClass {
    /// Cryptocurrency
    Crypto,
    /// Fiat currency
    Fiat,
}

impl fmt::Display for AssetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetClass::Crypto => write!(f, "CRYPTO"),
            AssetClass::Fiat => write!(f, "FIAT"),
        }
    }
}

/// Currency metadata (immutable after seeding)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Currency {
    /// Short code, unique
    pub code: CurrencyCode,

    /// Display name
    pub name: String,

    /// Asset class
    pub asset_class: AssetClass,
}

/// Wallet lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalletStatus {
    /// Fully operational
    Active,
    /// Debits forbidden, credits allowed
    Frozen,
    /// Terminal; no mutation permitted
    Closed,
}

impl WalletStatus {
    /// Valid transitions: Active <-> Frozen, anything non-closed -> Closed.
    pub fn can_transition_to(self, next: WalletStatus) -> bool {
        match (self, next) {
            (WalletStatus::Closed, _) => false,
            (_, WalletStatus::Closed) => true,
            (WalletStatus::Active, WalletStatus::Frozen) => true,
            (WalletStatus::Frozen, WalletStatus::Active) => true,
            _ => false,
        }
    }
}

impl fmt::Display for WalletStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WalletStatus::Active => write!(f, "ACTIVE"),
            WalletStatus::Frozen => write!(f, "FROZEN"),
            WalletStatus::Closed => write!(f, "CLOSED"),
        }
    }
}

/// Custodial wallet
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wallet {
    /// Globally unique address (immutable)
    pub address: WalletAddress,

    /// SHA-256 hash of the private key (opaque; never the key itself)
    pub key_hash: String,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Lifecycle status
    pub status: WalletStatus,
}

/// Composite key of a balance row
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BalanceKey {
    /// Owning wallet
    pub wallet: WalletAddress,

    /// Currency
    pub currency: CurrencyCode,
}

impl BalanceKey {
    /// Create new balance key
    pub fn new(wallet: WalletAddress, currency: CurrencyCode) -> Self {
        Self { wallet, currency }
    }
}

impl fmt::Display for BalanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.wallet, self.currency)
    }
}

/// Balance row: quantity of one currency owned by one wallet
///
/// Created lazily on first movement; never deleted (a zero balance is a
/// valid terminal state, not an absence).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Balance {
    /// Composite key
    pub key: BalanceKey,

    /// Current quantity, always >= 0
    pub amount: Decimal,

    /// Set by the engine inside the same commit as every mutation
    pub updated_at: DateTime<Utc>,
}

/// One balance-affecting event, append-only and immutable once written
///
/// Each variant carries enough data to reconstruct its balance effect
/// independently, so stored balances can be recomputed from the movement
/// log alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Movement {
    /// Funds credited from outside the ledger
    Deposit {
        /// Receiving wallet
        wallet: WalletAddress,
        /// Currency
        currency: CurrencyCode,
        /// Gross amount, > 0
        amount: Decimal,
        /// Fee withheld from the gross amount, >= 0
        fee: Decimal,
        /// Commit timestamp
        timestamp: DateTime<Utc>,
    },

    /// Funds debited out of the ledger
    Withdraw {
        /// Debited wallet
        wallet: WalletAddress,
        /// Currency
        currency: CurrencyCode,
        /// Gross amount debited (fee is taken from the withdrawn funds)
        amount: Decimal,
        /// Fee withheld from the withdrawn funds, >= 0
        fee: Decimal,
        /// Commit timestamp
        timestamp: DateTime<Utc>,
    },

    /// In-wallet exchange between two currencies
    Conversion {
        /// Converting wallet
        wallet: WalletAddress,
        /// Currency debited
        from_currency: CurrencyCode,
        /// Currency credited (differs from `from_currency`)
        to_currency: CurrencyCode,
        /// Amount debited in `from_currency`, > 0
        source_amount: Decimal,
        /// Amount credited in `to_currency`, > 0
        destination_amount: Decimal,
        /// Externally quoted exchange rate, recorded verbatim for audit
        rate: Decimal,
        /// Fee percentage applied to the gross converted value
        fee_percentage: Decimal,
        /// Fee in `to_currency`; destination_amount + fee_amount equals
        /// source_amount * rate within one rounding unit
        fee_amount: Decimal,
        /// Commit timestamp
        timestamp: DateTime<Utc>,
    },

    /// Inter-wallet transfer of a single currency
    Transfer {
        /// Debited wallet
        from_wallet: WalletAddress,
        /// Credited wallet (differs from `from_wallet`)
        to_wallet: WalletAddress,
        /// Currency
        currency: CurrencyCode,
        /// Gross amount debited from the sender, > 0
        amount: Decimal,
        /// Fee charged to the sender; receiver is credited amount - fee
        fee: Decimal,
        /// Commit timestamp
        timestamp: DateTime<Utc>,
    },
}

impl Movement {
    /// Movement kind label (for logs and metrics)
    pub fn kind(&self) -> &'static str {
        match self {
            Movement::Deposit { .. } => "deposit",
            Movement::Withdraw { .. } => "withdraw",
            Movement::Conversion { .. } => "conversion",
            Movement::Transfer { .. } => "transfer",
        }
    }

    /// Commit timestamp
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Movement::Deposit { timestamp, .. }
            | Movement::Withdraw { timestamp, .. }
            | Movement::Conversion { timestamp, .. }
            | Movement::Transfer { timestamp, .. } => *timestamp,
        }
    }

    /// Balance keys this movement touches
    pub fn touched_keys(&self) -> Vec<BalanceKey> {
        match self {
            Movement::Deposit { wallet, currency, .. }
            | Movement::Withdraw { wallet, currency, .. } => {
                vec![BalanceKey::new(wallet.clone(), currency.clone())]
            }
            Movement::Conversion {
                wallet,
                from_currency,
                to_currency,
                ..
            } => vec![
                BalanceKey::new(wallet.clone(), from_currency.clone()),
                BalanceKey::new(wallet.clone(), to_currency.clone()),
            ],
            Movement::Transfer {
                from_wallet,
                to_wallet,
                currency,
                ..
            } => vec![
                BalanceKey::new(from_wallet.clone(), currency.clone()),
                BalanceKey::new(to_wallet.clone(), currency.clone()),
            ],
        }
    }

    /// Signed balance effect of this movement on one balance row
    ///
    /// Zero when the movement does not touch the given row. Folding this
    /// over the whole movement log reproduces the stored balance exactly.
    pub fn delta_for(&self, key: &BalanceKey) -> Decimal {
        match self {
            Movement::Deposit {
                wallet,
                currency,
                amount,
                fee,
                ..
            } => {
                if key.wallet == *wallet && key.currency == *currency {
                    *amount - *fee
                } else {
                    Decimal::ZERO
                }
            }
            Movement::Withdraw {
                wallet,
                currency,
                amount,
                ..
            } => {
                if key.wallet == *wallet && key.currency == *currency {
                    -*amount
                } else {
                    Decimal::ZERO
                }
            }
            Movement::Conversion {
                wallet,
                from_currency,
                to_currency,
                source_amount,
                destination_amount,
                ..
            } => {
                let mut delta = Decimal::ZERO;
                if key.wallet == *wallet && key.currency == *from_currency {
                    delta -= *source_amount;
                }
                if key.wallet == *wallet && key.currency == *to_currency {
                    delta += *destination_amount;
                }
                delta
            }
            Movement::Transfer {
                from_wallet,
                to_wallet,
                currency,
                amount,
                fee,
                ..
            } => {
                let mut delta = Decimal::ZERO;
                if key.currency == *currency {
                    if key.wallet == *from_wallet {
                        delta -= *amount;
                    }
                    if key.wallet == *to_wallet {
                        delta += *amount - *fee;
                    }
                }
                delta
            }
        }
    }
}

/// Committed movement with its ledger-assigned identifier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MovementRecord {
    /// Monotonically increasing identifier
    pub id: u64,

    /// The movement payload
    pub movement: Movement,
}

/// Before/after snapshot of one balance row touched by a commit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceChange {
    /// Balance row
    pub key: BalanceKey,

    /// Quantity before the commit
    pub previous: Decimal,

    /// Quantity after the commit
    pub current: Decimal,
}

/// Result of a successful ledger operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Receipt {
    /// The committed movement
    pub movement: MovementRecord,

    /// Every balance row the commit touched
    pub changes: Vec<BalanceChange>,
}

/// Balance of one currency joined with its metadata (for wallet queries)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrencyBalance {
    /// Currency metadata
    pub currency: Currency,

    /// Current quantity
    pub amount: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn test_truncate_toward_zero() {
        assert_eq!(truncate(dec("1.123456789")), dec("1.12345678"));
        assert_eq!(truncate(dec("1.999999999")), dec("1.99999999"));
        assert_eq!(truncate(dec("-1.999999999")), dec("-1.99999999"));
        assert_eq!(truncate(dec("5")), dec("5"));
    }

    #[test]
    fn test_currency_code_uppercased() {
        assert_eq!(CurrencyCode::new("btc").as_str(), "BTC");
    }

    #[test]
    fn test_status_transitions() {
        assert!(WalletStatus::Active.can_transition_to(WalletStatus::Frozen));
        assert!(WalletStatus::Frozen.can_transition_to(WalletStatus::Active));
        assert!(WalletStatus::Active.can_transition_to(WalletStatus::Closed));
        assert!(WalletStatus::Frozen.can_transition_to(WalletStatus::Closed));
        assert!(!WalletStatus::Closed.can_transition_to(WalletStatus::Active));
        assert!(!WalletStatus::Closed.can_transition_to(WalletStatus::Frozen));
        assert!(!WalletStatus::Active.can_transition_to(WalletStatus::Active));
    }

    #[test]
    fn test_deposit_delta() {
        let wallet = WalletAddress::new("a1");
        let btc = CurrencyCode::new("BTC");
        let movement = Movement::Deposit {
            wallet: wallet.clone(),
            currency: btc.clone(),
            amount: dec("10"),
            fee: dec("1"),
            timestamp: Utc::now(),
        };

        let key = BalanceKey::new(wallet, btc);
        assert_eq!(movement.delta_for(&key), dec("9"));

        let other = BalanceKey::new(WalletAddress::new("b2"), CurrencyCode::new("BTC"));
        assert_eq!(movement.delta_for(&other), Decimal::ZERO);
    }

    #[test]
    fn test_conversion_deltas() {
        let wallet = WalletAddress::new("a1");
        let movement = Movement::Conversion {
            wallet: wallet.clone(),
            from_currency: CurrencyCode::new("BTC"),
            to_currency: CurrencyCode::new("USD"),
            source_amount: dec("2"),
            destination_amount: dec("198"),
            rate: dec("100"),
            fee_percentage: dec("0.01"),
            fee_amount: dec("2"),
            timestamp: Utc::now(),
        };

        let from = BalanceKey::new(wallet.clone(), CurrencyCode::new("BTC"));
        let to = BalanceKey::new(wallet, CurrencyCode::new("USD"));
        assert_eq!(movement.delta_for(&from), dec("-2"));
        assert_eq!(movement.delta_for(&to), dec("198"));
    }

    #[test]
    fn test_transfer_deltas_fee_charged_to_sender() {
        let from = WalletAddress::new("a1");
        let to = WalletAddress::new("b2");
        let usd = CurrencyCode::new("USD");
        let movement = Movement::Transfer {
            from_wallet: from.clone(),
            to_wallet: to.clone(),
            currency: usd.clone(),
            amount: dec("100"),
            fee: dec("0.5"),
            timestamp: Utc::now(),
        };

        assert_eq!(
            movement.delta_for(&BalanceKey::new(from, usd.clone())),
            dec("-100")
        );
        assert_eq!(movement.delta_for(&BalanceKey::new(to, usd)), dec("99.5"));
    }

    #[test]
    fn test_touched_keys_sortable_for_lock_order() {
        let movement = Movement::Transfer {
            from_wallet: WalletAddress::new("zz"),
            to_wallet: WalletAddress::new("aa"),
            currency: CurrencyCode::new("USD"),
            amount: dec("1"),
            fee: Decimal::ZERO,
            timestamp: Utc::now(),
        };

        let mut keys = movement.touched_keys();
        keys.sort();
        assert_eq!(keys[0].wallet.as_str(), "aa");
        assert_eq!(keys[1].wallet.as_str(), "zz");
    }
}
