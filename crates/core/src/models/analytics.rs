use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::asset::{Asset, AssetClass};
use crate::errors::CoreError;

/// A dated, signed cash movement (negative = money invested).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CashFlow {
    pub date: NaiveDate,
    pub amount: Decimal,
}

impl CashFlow {
    pub fn new(date: NaiveDate, amount: Decimal) -> Self {
        Self { date, amount }
    }
}

/// A computed value, or the reason it could not be computed.
///
/// Used wherever one holding's failure must not fail the whole report;
/// the API layer renders `Unavailable` as "N/A".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum Metric<T> {
    Value(T),
    Unavailable(String),
}

impl<T> Metric<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            Metric::Value(v) => Some(v),
            Metric::Unavailable(_) => None,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Metric::Value(_))
    }
}

impl<T> From<Result<T, CoreError>> for Metric<T> {
    fn from(result: Result<T, CoreError>) -> Self {
        match result {
            Ok(v) => Metric::Value(v),
            Err(e) => Metric::Unavailable(e.to_string()),
        }
    }
}

/// Annualized returns for one holding (fractions: 0.12 = 12%).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HoldingReturns {
    pub xirr: f64,
    pub cagr: f64,
}

/// Per-holding projection of the ledger plus the latest price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HoldingMetrics {
    pub asset: Asset,

    /// Sum of signed transaction quantities
    pub net_quantity: Decimal,

    /// Remaining cost basis / remaining quantity (0 when closed)
    pub average_cost: Decimal,

    /// Cost of the FIFO lots still held
    pub cost_basis: Decimal,

    /// Gross amount ever paid for buys, fees included
    pub total_invested: Decimal,

    /// Σ (sell proceeds net of fees − FIFO cost of the units sold)
    pub realized_pnl: Decimal,

    pub dividend_income: Decimal,

    pub current_price: Option<Decimal>,

    /// net quantity × price
    pub current_value: Metric<Decimal>,

    /// current value − cost basis
    pub unrealized_pnl: Metric<Decimal>,

    /// unrealized P&L / cost basis × 100
    pub unrealized_pnl_pct: Metric<f64>,

    pub returns: Metric<HoldingReturns>,

    /// Net quantity reached zero; kept for history and realized P&L
    pub is_closed: bool,
}

/// Portfolio-wide rollup, recomputed on every call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioSummary {
    pub portfolio_id: String,

    pub as_of: NaiveDate,

    /// Sum of priced holdings' current values
    pub total_value: Decimal,

    /// Sum of remaining cost basis over priced holdings
    pub total_invested: Decimal,

    pub realized_pnl: Decimal,

    pub unrealized_pnl: Decimal,

    /// realized + unrealized
    pub total_pnl: Decimal,

    /// total P&L / total invested × 100 (0 when nothing is invested)
    pub total_pnl_pct: f64,

    pub value_by_class: BTreeMap<AssetClass, Decimal>,

    /// Class value / total value × 100. All zero when the total is zero.
    pub allocation_by_class: BTreeMap<AssetClass, f64>,

    /// Sector value / total value × 100, same zero rule as by class.
    /// Holdings without a sector fall under `"unknown"`.
    pub allocation_by_sector: BTreeMap<String, f64>,

    /// XIRR over every holding's cash flows plus the current total value
    pub portfolio_xirr: Metric<f64>,

    /// Active holdings that could not be valued (no price)
    pub unpriced_holdings: usize,

    pub holdings: Vec<HoldingMetrics>,
}

/// A holding singled out in the daily summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Performer {
    pub symbol: String,
    pub pnl_pct: f64,
}

/// End-of-day snapshot of a portfolio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailySummary {
    pub date: NaiveDate,
    pub portfolio_id: String,
    pub total_holdings: usize,
    pub total_value: Decimal,
    pub total_pnl: Decimal,
    pub best_performer: Option<Performer>,
    pub worst_performer: Option<Performer>,
    pub value_by_class: BTreeMap<AssetClass, Decimal>,
}
