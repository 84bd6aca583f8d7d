use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

use crate::errors::CoreError;
use crate::models::analytics::{
    CashFlow, DailySummary, HoldingMetrics, Metric, Performer, PortfolioSummary,
};
use crate::models::holding::Holding;
use crate::services::cash_flow::holding_cash_flows;
use crate::services::lots::LotLedger;
use crate::services::returns::{compute_returns, xirr, XIRR_DEFAULT_GUESS};

/// Computes portfolio analytics: P&L, returns, allocation breakdown.
///
/// Pure read-side projection: takes holdings and a price snapshot, never
/// mutates either and never performs I/O. Calling it twice with the same
/// inputs gives the same result.
pub struct ValuationService;

impl ValuationService {
    pub fn new() -> Self {
        Self
    }

    /// Metrics for a single holding at `as_of`, valued at `price`.
    pub fn holding_metrics(
        &self,
        holding: &Holding,
        price: Option<Decimal>,
        as_of: NaiveDate,
    ) -> HoldingMetrics {
        let ledger = LotLedger::replay(holding, as_of);
        let net_quantity = holding.net_quantity_on(as_of);
        let cost_basis = ledger.remaining_cost();
        let is_closed = net_quantity <= Decimal::ZERO;

        let dividend_income: Decimal = holding
            .dividends
            .iter()
            .filter(|d| d.date <= as_of)
            .map(|d| d.amount)
            .sum();

        let current_value: Metric<Decimal> = match price {
            _ if is_closed => Metric::Value(Decimal::ZERO),
            Some(p) => Metric::Value(net_quantity * p),
            None => Metric::Unavailable(
                CoreError::NoPriceAvailable(holding.symbol().to_string()).to_string(),
            ),
        };

        let unrealized_pnl = match &current_value {
            Metric::Value(v) => Metric::Value(*v - cost_basis),
            Metric::Unavailable(reason) => Metric::Unavailable(reason.clone()),
        };

        let unrealized_pnl_pct = match &unrealized_pnl {
            Metric::Value(pnl) => Metric::Value(percentage(*pnl, cost_basis)),
            Metric::Unavailable(reason) => Metric::Unavailable(reason.clone()),
        };

        let returns = Metric::from(compute_returns(holding, price, as_of));
        if let Metric::Unavailable(reason) = &returns {
            debug!(symbol = %holding.symbol(), reason = %reason, "returns unavailable");
        }

        HoldingMetrics {
            asset: holding.asset.clone(),
            net_quantity,
            average_cost: ledger.average_cost(),
            cost_basis,
            total_invested: ledger.total_invested,
            realized_pnl: ledger.realized_pnl,
            dividend_income,
            current_price: price,
            current_value,
            unrealized_pnl,
            unrealized_pnl_pct,
            returns,
            is_closed,
        }
    }

    /// Roll up every holding into a portfolio summary.
    ///
    /// `prices` is a symbol → price snapshot (normally read from the shared
    /// price cache). A holding missing from it falls back to its own cached
    /// `current_price`. Holdings that still cannot be priced are reported with
    /// `Unavailable` markers and left out of value totals; their realized P&L
    /// still counts.
    pub fn summarize(
        &self,
        portfolio_id: &str,
        holdings: &[Holding],
        prices: &HashMap<String, Decimal>,
        as_of: NaiveDate,
    ) -> PortfolioSummary {
        let mut metrics = Vec::with_capacity(holdings.len());
        let mut total_value = Decimal::ZERO;
        let mut total_invested = Decimal::ZERO;
        let mut realized_pnl = Decimal::ZERO;
        let mut unrealized_pnl = Decimal::ZERO;
        let mut unpriced_holdings = 0;
        let mut value_by_class: BTreeMap<_, Decimal> = BTreeMap::new();
        let mut value_by_sector: BTreeMap<String, Decimal> = BTreeMap::new();
        let mut all_flows: Vec<CashFlow> = Vec::new();
        let mut xirr_blocked = false;

        for holding in holdings {
            if holding.transactions.iter().all(|t| t.date > as_of) {
                continue;
            }

            let price = prices
                .get(holding.symbol())
                .copied()
                .or(holding.current_price);
            let m = self.holding_metrics(holding, price, as_of);

            realized_pnl += m.realized_pnl;

            let sector = holding.asset.sector_or_unknown();
            if !m.is_closed {
                value_by_class.entry(holding.asset_class()).or_insert(Decimal::ZERO);
                value_by_sector.entry(sector.to_string()).or_insert(Decimal::ZERO);
            }

            match (&m.current_value, &m.unrealized_pnl) {
                (Metric::Value(value), Metric::Value(pnl)) => {
                    total_value += *value;
                    total_invested += m.cost_basis;
                    unrealized_pnl += *pnl;
                    if !m.is_closed {
                        *value_by_class
                            .entry(holding.asset_class())
                            .or_insert(Decimal::ZERO) += *value;
                        *value_by_sector
                            .entry(sector.to_string())
                            .or_insert(Decimal::ZERO) += *value;
                    }
                    all_flows.extend(holding_cash_flows(holding, price.unwrap_or_default(), as_of));
                }
                _ => {
                    unpriced_holdings += 1;
                    xirr_blocked = true;
                }
            }

            metrics.push(m);
        }

        let allocation_by_class = value_by_class
            .iter()
            .map(|(class, value)| (*class, percentage(*value, total_value)))
            .collect();
        let allocation_by_sector = value_by_sector
            .into_iter()
            .map(|(sector, value)| (sector, percentage(value, total_value)))
            .collect();

        let portfolio_xirr = if xirr_blocked {
            Metric::Unavailable(format!(
                "{unpriced_holdings} holding(s) have no price"
            ))
        } else {
            all_flows.sort_by_key(|f| f.date);
            Metric::from(xirr(&all_flows, XIRR_DEFAULT_GUESS))
        };

        let total_pnl = realized_pnl + unrealized_pnl;

        PortfolioSummary {
            portfolio_id: portfolio_id.to_string(),
            as_of,
            total_value,
            total_invested,
            realized_pnl,
            unrealized_pnl,
            total_pnl,
            total_pnl_pct: percentage(total_pnl, total_invested),
            value_by_class,
            allocation_by_class,
            allocation_by_sector,
            portfolio_xirr,
            unpriced_holdings,
            holdings: metrics,
        }
    }

    /// End-of-day digest: totals plus best and worst performers ranked by
    /// unrealized P&L percentage among active, priced holdings.
    pub fn daily_summary(&self, summary: &PortfolioSummary) -> DailySummary {
        let mut ranked: Vec<Performer> = summary
            .holdings
            .iter()
            .filter(|h| !h.is_closed)
            .filter_map(|h| {
                h.unrealized_pnl_pct.value().map(|pct| Performer {
                    symbol: h.asset.symbol.clone(),
                    pnl_pct: *pct,
                })
            })
            .collect();
        ranked.sort_by(|a, b| {
            b.pnl_pct
                .partial_cmp(&a.pnl_pct)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.symbol.cmp(&b.symbol))
        });

        DailySummary {
            date: summary.as_of,
            portfolio_id: summary.portfolio_id.clone(),
            total_holdings: summary.holdings.iter().filter(|h| !h.is_closed).count(),
            total_value: summary.total_value,
            total_pnl: summary.total_pnl,
            best_performer: ranked.first().cloned(),
            worst_performer: ranked.last().cloned(),
            value_by_class: summary.value_by_class.clone(),
        }
    }
}

impl Default for ValuationService {
    fn default() -> Self {
        Self::new()
    }
}

/// `part / whole × 100`, or 0 when `whole` is zero.
fn percentage(part: Decimal, whole: Decimal) -> f64 {
    if whole.is_zero() {
        return 0.0;
    }
    part.checked_div(whole)
        .and_then(|r| r.to_f64())
        .map(|r| r * 100.0)
        .unwrap_or(0.0)
}
