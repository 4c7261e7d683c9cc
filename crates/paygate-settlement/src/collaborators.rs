//! Interfaces to the game-side collaborators the settlement layer drives,
//! plus small in-memory implementations.
//!
//! - [`ProductCatalog`]: what a product costs, in USD cents
//! - [`PriceOracle`]: USD cents → native chain value
//! - [`CurrencyLedger`]: the game currency balances withdrawals debit
//!
//! [`MemoryLedger`] keeps balances per `(user, currency)`:
//! 1. `credit` → funds arrive (payment reward, refund, admin grant)
//! 2. `debit` → funds leave (withdrawal requested)
//!
//! A debit never drives a balance below zero.

use std::collections::HashMap;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::Mutex;

use paygate_types::{ChainId, PaygateError, ProductId, Result, UserId};

#[async_trait]
pub trait ProductCatalog: Send + Sync {
    /// Price of `product` in USD cents.
    async fn price_usd_cents(&self, product: &ProductId) -> Result<u64>;
}

#[async_trait]
pub trait PriceOracle: Send + Sync {
    /// `cents` USD expressed as a decimal string of `chain`'s native unit.
    async fn usd_cents_to_native(&self, chain: &ChainId, cents: u64) -> Result<String>;
}

#[async_trait]
pub trait CurrencyLedger: Send + Sync {
    async fn balance(&self, user_id: UserId, currency: &str) -> Result<Decimal>;

    /// Remove `amount`; returns the new balance.
    async fn debit(&self, user_id: UserId, currency: &str, amount: Decimal) -> Result<Decimal>;

    /// Add `amount`; returns the new balance.
    async fn credit(&self, user_id: UserId, currency: &str, amount: Decimal) -> Result<Decimal>;
}

/// Fixed price list.
#[derive(Debug, Default, Clone)]
pub struct StaticCatalog {
    prices: HashMap<ProductId, u64>,
}

impl StaticCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_price(mut self, product: ProductId, usd_cents: u64) -> Self {
        self.prices.insert(product, usd_cents);
        self
    }
}

#[async_trait]
impl ProductCatalog for StaticCatalog {
    async fn price_usd_cents(&self, product: &ProductId) -> Result<u64> {
        self.prices
            .get(product)
            .copied()
            .ok_or_else(|| PaygateError::UnknownProduct(product.clone()))
    }
}

/// Oracle with one constant rate per chain, in native units per USD.
#[derive(Debug, Default, Clone)]
pub struct FixedRateOracle {
    rates: HashMap<ChainId, Decimal>,
}

impl FixedRateOracle {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_rate(mut self, chain: ChainId, native_per_usd: Decimal) -> Self {
        self.rates.insert(chain, native_per_usd);
        self
    }
}

#[async_trait]
impl PriceOracle for FixedRateOracle {
    async fn usd_cents_to_native(&self, chain: &ChainId, cents: u64) -> Result<String> {
        let rate = self
            .rates
            .get(chain)
            .copied()
            .ok_or_else(|| PaygateError::UnknownChain(chain.clone()))?;
        let usd = Decimal::from(cents) / Decimal::ONE_HUNDRED;
        let native = usd.checked_mul(rate).ok_or_else(|| PaygateError::InvalidAmount {
            reason: format!("{cents} cents at {rate} overflows"),
        })?;
        Ok(native.normalize().to_string())
    }
}

/// In-memory game currency ledger.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    /// `(UserId, currency) → balance`
    balances: Mutex<HashMap<(UserId, String), Decimal>>,
}

impl MemoryLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a balance, e.g. from a fixture or an admin grant.
    pub async fn deposit(
        &self,
        user_id: UserId,
        currency: &str,
        amount: Decimal,
    ) -> Result<Decimal> {
        self.credit(user_id, currency, amount).await
    }

    /// Every balance held by `user_id`.
    pub async fn user_balances(&self, user_id: UserId) -> HashMap<String, Decimal> {
        self.balances
            .lock()
            .await
            .iter()
            .filter(|((uid, _), _)| *uid == user_id)
            .map(|((_, currency), amount)| (currency.clone(), *amount))
            .collect()
    }
}

fn require_positive(amount: Decimal, what: &str) -> Result<()> {
    if amount <= Decimal::ZERO {
        return Err(PaygateError::InvalidAmount {
            reason: format!("{what} amount must be positive, got {amount}"),
        });
    }
    Ok(())
}

#[async_trait]
impl CurrencyLedger for MemoryLedger {
    async fn balance(&self, user_id: UserId, currency: &str) -> Result<Decimal> {
        Ok(self
            .balances
            .lock()
            .await
            .get(&(user_id, currency.to_string()))
            .copied()
            .unwrap_or_default())
    }

    async fn debit(&self, user_id: UserId, currency: &str, amount: Decimal) -> Result<Decimal> {
        require_positive(amount, "Debit")?;
        let mut balances = self.balances.lock().await;
        let entry = balances.entry((user_id, currency.to_string())).or_default();
        if *entry < amount {
            return Err(PaygateError::InsufficientBalance {
                needed: amount,
                available: *entry,
            });
        }
        *entry -= amount;
        Ok(*entry)
    }

    async fn credit(&self, user_id: UserId, currency: &str, amount: Decimal) -> Result<Decimal> {
        require_positive(amount, "Credit")?;
        let mut balances = self.balances.lock().await;
        let entry = balances.entry((user_id, currency.to_string())).or_default();
        *entry += amount;
        Ok(*entry)
    }
}
