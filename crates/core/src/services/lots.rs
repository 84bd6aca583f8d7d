use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::VecDeque;
use tracing::warn;

use crate::models::holding::Holding;

/// Units bought together, with their total cost (fees included).
#[derive(Debug, Clone, PartialEq)]
pub struct Lot {
    pub acquired: NaiveDate,
    pub quantity: Decimal,
    pub cost: Decimal,
}

impl Lot {
    pub fn unit_cost(&self) -> Decimal {
        if self.quantity.is_zero() {
            Decimal::ZERO
        } else {
            self.cost / self.quantity
        }
    }
}

/// FIFO replay of a holding's ledger.
///
/// Sells consume the oldest remaining lots first. The realized gain of a
/// sell is its proceeds net of fees minus the cost of the units consumed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LotLedger {
    pub lots: VecDeque<Lot>,
    pub realized_pnl: Decimal,
    /// Gross buy cost ever paid, fees included
    pub total_invested: Decimal,
    /// Sell proceeds net of fees
    pub total_proceeds: Decimal,
}

impl LotLedger {
    /// Replay every transaction of `holding` dated on or before `as_of`.
    pub fn replay(holding: &Holding, as_of: NaiveDate) -> Self {
        let mut ledger = Self::default();
        for tx in holding
            .chronological_transactions()
            .into_iter()
            .filter(|t| t.date <= as_of)
        {
            if tx.is_buy() {
                if tx.quantity.is_zero() {
                    continue;
                }
                let cost = tx.gross_amount() + tx.fees;
                ledger.total_invested += cost;
                ledger.lots.push_back(Lot {
                    acquired: tx.date,
                    quantity: tx.units(),
                    cost,
                });
            } else {
                let proceeds = tx.cash_amount();
                let consumed = ledger.consume(holding.symbol(), tx.units());
                ledger.total_proceeds += proceeds;
                ledger.realized_pnl += proceeds - consumed;
            }
        }
        ledger
    }

    /// Remove `units` from the front lots; returns the cost removed.
    fn consume(&mut self, symbol: &str, units: Decimal) -> Decimal {
        let mut remaining = units;
        let mut cost_removed = Decimal::ZERO;

        while remaining > Decimal::ZERO {
            let Some(front) = self.lots.front_mut() else {
                warn!(
                    symbol = %symbol,
                    requested = %units,
                    missing = %remaining,
                    "sell exceeds held lots, clamping to available quantity"
                );
                break;
            };

            if front.quantity <= remaining {
                remaining -= front.quantity;
                cost_removed += front.cost;
                self.lots.pop_front();
            } else {
                let part = front.cost * remaining / front.quantity;
                front.quantity -= remaining;
                front.cost -= part;
                cost_removed += part;
                remaining = Decimal::ZERO;
            }
        }

        cost_removed
    }

    pub fn remaining_quantity(&self) -> Decimal {
        self.lots.iter().map(|l| l.quantity).sum()
    }

    pub fn remaining_cost(&self) -> Decimal {
        self.lots.iter().map(|l| l.cost).sum()
    }

    pub fn average_cost(&self) -> Decimal {
        let qty = self.remaining_quantity();
        if qty.is_zero() {
            Decimal::ZERO
        } else {
            self.remaining_cost() / qty
        }
    }
}
