use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::asset::{Asset, AssetClass};
use super::transaction::{Dividend, Transaction};

/// A position in one asset, backed by its transaction ledger.
///
/// Quantity, cost and value are always derived from `transactions`;
/// nothing aggregated is stored here except the last cached quote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holding {
    pub asset: Asset,

    /// Append-only ledger, in insertion order
    pub transactions: Vec<Transaction>,

    #[serde(default)]
    pub dividends: Vec<Dividend>,

    /// Last known price, as stored alongside the holding by the persistence layer
    #[serde(default)]
    pub current_price: Option<Decimal>,

    #[serde(default)]
    pub price_timestamp: Option<DateTime<Utc>>,
}

impl Holding {
    pub fn new(asset: Asset) -> Self {
        Self {
            asset,
            transactions: Vec::new(),
            dividends: Vec::new(),
            current_price: None,
            price_timestamp: None,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.asset.symbol
    }

    pub fn asset_class(&self) -> AssetClass {
        self.asset.asset_class
    }

    /// Sum of signed quantities over the whole ledger.
    pub fn net_quantity(&self) -> Decimal {
        self.transactions.iter().map(|t| t.quantity).sum()
    }

    /// Sum of signed quantities for transactions dated on or before `date`.
    pub fn net_quantity_on(&self, date: NaiveDate) -> Decimal {
        self.transactions
            .iter()
            .filter(|t| t.date <= date)
            .map(|t| t.quantity)
            .sum()
    }

    /// A holding with zero net quantity is closed; its history is kept.
    pub fn is_active(&self) -> bool {
        self.net_quantity() > Decimal::ZERO
    }

    pub fn first_transaction_date(&self) -> Option<NaiveDate> {
        self.transactions.iter().map(|t| t.date).min()
    }

    /// Transactions sorted by date. Same-day entries keep insertion order.
    pub fn chronological_transactions(&self) -> Vec<&Transaction> {
        let mut txs: Vec<&Transaction> = self.transactions.iter().collect();
        txs.sort_by_key(|t| t.date);
        txs
    }
}
