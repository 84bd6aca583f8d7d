use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::models::analytics::CashFlow;
use crate::models::holding::Holding;
use crate::models::transaction::{Dividend, Transaction};

/// Turn a ledger into dated cash flows for IRR computation.
///
/// - buy: `−(units × price + fees)`
/// - sell: `+(units × price − fees)`
/// - dividend: `+amount`
/// - if units are still held at `as_of`, a final `+current_value` at `as_of`
///
/// Entries dated after `as_of` are ignored. The result is sorted by date with
/// a stable sort, so same-day entries keep ledger order (transactions first,
/// then dividends). No transactions yields an empty vector.
pub fn build_cash_flows(
    transactions: &[Transaction],
    dividends: &[Dividend],
    current_value: Decimal,
    as_of: NaiveDate,
) -> Vec<CashFlow> {
    let in_range: Vec<&Transaction> = transactions.iter().filter(|t| t.date <= as_of).collect();
    if in_range.is_empty() {
        return Vec::new();
    }

    let mut flows: Vec<CashFlow> = in_range
        .iter()
        .map(|t| CashFlow::new(t.date, t.cash_amount()))
        .chain(
            dividends
                .iter()
                .filter(|d| d.date <= as_of)
                .map(|d| CashFlow::new(d.date, d.amount)),
        )
        .collect();
    flows.sort_by_key(|f| f.date);

    let net_quantity: Decimal = in_range.iter().map(|t| t.quantity).sum();
    if net_quantity > Decimal::ZERO {
        flows.push(CashFlow::new(as_of, current_value));
    }

    flows
}

/// Cash flows for a holding valued at `price` (ignored when nothing is held).
pub fn holding_cash_flows(holding: &Holding, price: Decimal, as_of: NaiveDate) -> Vec<CashFlow> {
    let current_value = holding.net_quantity_on(as_of) * price;
    build_cash_flows(&holding.transactions, &holding.dividends, current_value, as_of)
}
