use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use tokio::sync::Mutex;
use tracing::{debug, info};

use common::{ExchangeGateway, Result};

/// Gatekeeper for quote-currency spending across concurrently firing strategies.
///
/// Tracks how much of the exchange's free quote balance has been promised to
/// in-flight buys. The fetch-balance / decide / increment sequence runs under
/// one lock per instance; order placement never does.
///
/// The counter is process-local and starts at zero.
pub struct ResourceManager {
    gateway: Arc<dyn ExchangeGateway>,
    quote_asset: String,
    gate: Mutex<()>,
    reserved: Arc<StdMutex<f64>>,
}

impl ResourceManager {
    pub fn new(gateway: Arc<dyn ExchangeGateway>, quote_asset: impl Into<String>) -> Self {
        Self {
            gateway,
            quote_asset: quote_asset.into(),
            gate: Mutex::new(()),
            reserved: Arc::new(StdMutex::new(0.0)),
        }
    }

    pub fn quote_asset(&self) -> &str {
        &self.quote_asset
    }

    /// Currently reserved quote amount.
    pub fn reserved(&self) -> f64 {
        *self.reserved.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reserve `amount` of quote currency if the live free balance covers it
    /// on top of what is already reserved. `Ok(false)` when it does not.
    pub async fn reserve_balance(&self, amount: f64) -> Result<bool> {
        let _gate = self.gate.lock().await;

        let free = self.gateway.fetch_balance(&self.quote_asset).await?.free;
        let mut reserved = self.reserved.lock().unwrap_or_else(PoisonError::into_inner);
        let available = free - *reserved;
        if available < amount {
            debug!(
                asset = %self.quote_asset,
                free,
                reserved = *reserved,
                requested = amount,
                "Reservation refused"
            );
            return Ok(false);
        }
        *reserved += amount;
        info!(
            asset = %self.quote_asset,
            amount,
            reserved = *reserved,
            free,
            "Balance reserved"
        );
        Ok(true)
    }

    /// Give back a reservation. The counter never goes below zero.
    pub fn release_balance(&self, amount: f64) {
        release(&self.reserved, amount);
    }

    /// Like [`reserve_balance`](Self::reserve_balance), but the grant is
    /// returned as a guard that releases itself when dropped.
    pub async fn reserve(&self, amount: f64) -> Result<Option<Reservation>> {
        if !self.reserve_balance(amount).await? {
            return Ok(None);
        }
        Ok(Some(Reservation {
            counter: self.reserved.clone(),
            amount,
        }))
    }
}

fn release(counter: &StdMutex<f64>, amount: f64) {
    let mut reserved = counter.lock().unwrap_or_else(PoisonError::into_inner);
    *reserved = (*reserved - amount).max(0.0);
    debug!(amount, reserved = *reserved, "Balance released");
}

/// A granted reservation. Dropping it releases the amount.
#[must_use = "dropping a Reservation releases it immediately"]
#[derive(Debug)]
pub struct Reservation {
    counter: Arc<StdMutex<f64>>,
    amount: f64,
}

impl Reservation {
    pub fn amount(&self) -> f64 {
        self.amount
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        release(&self.counter, self.amount);
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
