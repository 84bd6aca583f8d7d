use chrono::NaiveDate;
use chrono_tz::Tz;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::errors::CoreError;
use crate::models::asset::Asset;
use crate::models::holding::Holding;
use crate::models::portfolio::Portfolio;
use crate::models::price::RefreshCycleResult;
use crate::models::transaction::{Dividend, Transaction};

/// Records transactions and dividends and answers quantity questions.
///
/// Pure business logic with no I/O.
/// The ledger is append-only: there is no edit or delete. Mistakes are
/// corrected with an offsetting transaction.
pub struct PortfolioService {
    clock: Arc<dyn Clock>,
    /// Calendar that decides what "today" is when rejecting future dates.
    timezone: Tz,
}

impl PortfolioService {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            timezone: Tz::UTC,
        }
    }

    pub fn with_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }

    /// Append a buy or sell to the holding for `asset`, creating the holding
    /// if this is its first transaction.
    /// Validates the transaction first (e.g., can't sell more than you own).
    pub fn record_transaction(
        &self,
        portfolio: &mut Portfolio,
        asset: &Asset,
        transaction: Transaction,
    ) -> Result<(), CoreError> {
        self.validate_transaction(portfolio.holding(asset), asset, &transaction)?;
        let holding = portfolio.holding_entry(asset);
        if holding.asset.sector.is_none() {
            holding.asset.sector = asset.sector.clone();
        }
        holding.transactions.push(transaction);
        Ok(())
    }

    /// Append a dividend to an existing holding.
    pub fn record_dividend(
        &self,
        portfolio: &mut Portfolio,
        asset: &Asset,
        dividend: Dividend,
    ) -> Result<(), CoreError> {
        if dividend.amount <= Decimal::ZERO {
            return Err(CoreError::ValidationError(
                "Dividend amount must be positive".into(),
            ));
        }
        self.check_date(dividend.date)?;

        let holding = portfolio
            .holding_mut(asset)
            .ok_or_else(|| CoreError::HoldingNotFound(asset.symbol.clone()))?;
        holding.dividends.push(dividend);
        Ok(())
    }

    /// Net quantity of every asset held on `date`.
    /// Returns only assets with positive holdings.
    pub fn get_holdings(&self, portfolio: &Portfolio, date: NaiveDate) -> HashMap<Asset, Decimal> {
        portfolio
            .holdings
            .iter()
            .map(|h| (h.asset.clone(), h.net_quantity_on(date)))
            .filter(|(_, qty)| *qty > Decimal::ZERO)
            .collect()
    }

    /// Stamp each holding with the price its refresh produced.
    /// Returns how many holdings were updated.
    pub fn apply_prices(&self, portfolio: &mut Portfolio, cycle: &RefreshCycleResult) -> usize {
        let mut updated = 0;
        for holding in &mut portfolio.holdings {
            if let Some(Ok(outcome)) = cycle.get(&holding.asset.symbol) {
                let newer = holding
                    .price_timestamp
                    .map_or(true, |ts| ts <= outcome.fetched_at);
                if newer {
                    holding.current_price = Some(outcome.price);
                    holding.price_timestamp = Some(outcome.fetched_at);
                    updated += 1;
                }
            }
        }
        updated
    }

    /// Validate a transaction before adding it to the holding.
    ///
    /// Rules:
    /// - Quantity must be non-zero
    /// - Price and fees must not be negative
    /// - Date may be at most one day ahead (timezone slack)
    /// - The running quantity must never go negative once it is in the ledger
    fn validate_transaction(
        &self,
        holding: Option<&Holding>,
        asset: &Asset,
        transaction: &Transaction,
    ) -> Result<(), CoreError> {
        if transaction.quantity.is_zero() {
            return Err(CoreError::ValidationError(
                "Transaction quantity must be non-zero".into(),
            ));
        }
        if transaction.price < Decimal::ZERO {
            return Err(CoreError::ValidationError(format!(
                "Price must not be negative, got {}",
                transaction.price
            )));
        }
        if transaction.fees < Decimal::ZERO {
            return Err(CoreError::ValidationError(format!(
                "Fees must not be negative, got {}",
                transaction.fees
            )));
        }
        self.check_date(transaction.date)?;

        if transaction.is_sell() {
            let mut ledger: Vec<&Transaction> = holding
                .map(|h| h.transactions.iter().collect())
                .unwrap_or_default();
            ledger.push(transaction);
            // Stable: a same-day sell lands after same-day buys already recorded.
            ledger.sort_by_key(|t| t.date);

            let mut running = Decimal::ZERO;
            for t in ledger {
                running += t.quantity;
                if running < Decimal::ZERO {
                    return Err(CoreError::ValidationError(format!(
                        "Cannot sell {} {} on {}: only {} would be held on {}",
                        transaction.units(),
                        asset.symbol,
                        transaction.date,
                        running - t.quantity,
                        t.date,
                    )));
                }
            }
        }

        Ok(())
    }

    fn check_date(&self, date: NaiveDate) -> Result<(), CoreError> {
        let today = self.clock.now().with_timezone(&self.timezone).date_naive();
        if let Some(tomorrow) = today.succ_opt() {
            if date > tomorrow {
                return Err(CoreError::ValidationError(format!(
                    "Date {date} is in the future"
                )));
            }
        }
        Ok(())
    }
}

impl Default for PortfolioService {
    fn default() -> Self {
        Self::new()
    }
}
