use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::errors::CoreError;
use crate::models::analytics::{CashFlow, HoldingReturns};
use crate::models::holding::Holding;
use crate::services::cash_flow::holding_cash_flows;

/// Starting rate for XIRR when the caller has no better estimate.
pub const XIRR_DEFAULT_GUESS: f64 = 0.1;

/// Exponent denominator for day-count fractions.
pub const DAYS_PER_YEAR: f64 = 365.0;

const MAX_ITERATIONS: usize = 100;
const NPV_TOLERANCE: f64 = 1e-6;
const RATE_TOLERANCE: f64 = 1e-8;
const MIN_DERIVATIVE: f64 = 1e-10;

/// Annualized internal rate of return for irregular cash flows.
///
/// Solves `Σ amount_i / (1 + r)^(days_i / 365) = 0`, where `days_i` counts
/// actual days from the earliest flow. Newton–Raphson, falling back to a
/// secant step (or a forward-difference slope on the first iteration) when
/// the analytic derivative is too close to zero.
///
/// Returns the rate as a fraction (0.21 = 21%).
///
/// # Errors
/// `CoreError::InvalidInput` when every flow falls on the same day.
/// `CoreError::Convergence` when there are fewer than two flows, the flows
/// never change sign, an iterate stops being finite, or 100 iterations pass
/// without meeting `|NPV| < 1e-6` or `|Δr| < 1e-8`.
pub fn xirr(flows: &[CashFlow], guess: f64) -> Result<f64, CoreError> {
    if flows.len() < 2 {
        return Err(CoreError::Convergence(
            "XIRR needs at least two cash flows".into(),
        ));
    }
    let has_inflow = flows.iter().any(|f| f.amount > Decimal::ZERO);
    let has_outflow = flows.iter().any(|f| f.amount < Decimal::ZERO);
    if !(has_inflow && has_outflow) {
        return Err(CoreError::Convergence(
            "cash flows must contain both investments and returns".into(),
        ));
    }
    if !guess.is_finite() || guess <= -1.0 {
        return Err(CoreError::InvalidInput(format!(
            "XIRR guess must be a finite rate above -100%, got {guess}"
        )));
    }

    let series = to_year_fractions(flows)?;
    if series.iter().all(|(_, years)| *years == 0.0) {
        return Err(CoreError::InvalidInput(
            "cash flows span zero days".into(),
        ));
    }

    let mut rate = guess;
    let mut previous: Option<(f64, f64)> = None;

    for _ in 0..MAX_ITERATIONS {
        let (value, derivative) = npv_and_derivative(&series, rate);
        if !value.is_finite() {
            return Err(CoreError::Convergence(format!(
                "net present value diverged at rate {rate}"
            )));
        }
        if value.abs() < NPV_TOLERANCE {
            return Ok(rate);
        }

        let slope = if derivative.is_finite() && derivative.abs() > MIN_DERIVATIVE {
            derivative
        } else {
            match previous {
                Some((prev_rate, prev_value)) if (rate - prev_rate).abs() > f64::EPSILON => {
                    (value - prev_value) / (rate - prev_rate)
                }
                _ => {
                    let h = 1e-6 * rate.abs().max(1.0);
                    (npv_and_derivative(&series, rate + h).0 - value) / h
                }
            }
        };
        if !slope.is_finite() || slope.abs() <= MIN_DERIVATIVE {
            return Err(CoreError::Convergence(format!(
                "derivative vanished at rate {rate}"
            )));
        }

        let mut next = rate - value / slope;
        if next <= -1.0 {
            // (1 + r) must stay positive
            next = (rate - 1.0) / 2.0;
        }
        if !next.is_finite() {
            return Err(CoreError::Convergence(format!(
                "rate diverged after {rate}"
            )));
        }

        previous = Some((rate, value));
        if (next - rate).abs() < RATE_TOLERANCE {
            return Ok(next);
        }
        rate = next;
    }

    Err(CoreError::Convergence(format!(
        "XIRR did not converge within {MAX_ITERATIONS} iterations"
    )))
}

/// Net present value of `flows` discounted at `rate` (exposed for checks).
pub fn xnpv(flows: &[CashFlow], rate: f64) -> Result<f64, CoreError> {
    let series = to_year_fractions(flows)?;
    Ok(npv_and_derivative(&series, rate).0)
}

/// Compound annual growth rate: `(end / begin)^(1 / years) − 1`.
///
/// Returns exactly `0.0` when `begin == end`.
///
/// # Errors
/// `CoreError::InvalidInput` when `begin_value <= 0`, `end_value < 0`, or
/// `years` is not a positive finite number.
pub fn cagr(begin_value: Decimal, end_value: Decimal, years: f64) -> Result<f64, CoreError> {
    if begin_value <= Decimal::ZERO {
        return Err(CoreError::InvalidInput(format!(
            "CAGR begin value must be positive, got {begin_value}"
        )));
    }
    if !years.is_finite() || years <= 0.0 {
        return Err(CoreError::InvalidInput(format!(
            "CAGR time span must be positive, got {years} years"
        )));
    }
    if end_value < Decimal::ZERO {
        return Err(CoreError::InvalidInput(format!(
            "CAGR end value must not be negative, got {end_value}"
        )));
    }
    if begin_value == end_value {
        return Ok(0.0);
    }

    let ratio = end_value
        .checked_div(begin_value)
        .and_then(|r| r.to_f64())
        .ok_or_else(|| CoreError::InvalidInput("CAGR growth ratio out of range".into()))?;
    Ok(ratio.powf(1.0 / years) - 1.0)
}

/// XIRR and CAGR for one holding as of `as_of`.
///
/// CAGR compares the gross amount invested with what the position returned:
/// current value + net sell proceeds + dividends, over the time since the
/// first transaction.
///
/// # Errors
/// - `InvalidInput` if nothing was traded on or before `as_of`, or the span is zero days
/// - `NoPriceAvailable` if units are still held and `price` is `None`
/// - `Convergence` if XIRR cannot be solved
pub fn compute_returns(
    holding: &Holding,
    price: Option<Decimal>,
    as_of: NaiveDate,
) -> Result<HoldingReturns, CoreError> {
    let first_date = holding
        .transactions
        .iter()
        .filter(|t| t.date <= as_of)
        .map(|t| t.date)
        .min()
        .ok_or_else(|| {
            CoreError::InvalidInput(format!(
                "{} has no transactions on or before {as_of}",
                holding.symbol()
            ))
        })?;

    if first_date == as_of {
        return Err(CoreError::InvalidInput(format!(
            "{} was first traded on {as_of}: zero time span",
            holding.symbol()
        )));
    }

    let held = holding.net_quantity_on(as_of);
    let price = match price {
        Some(p) => p,
        None if held > Decimal::ZERO => {
            return Err(CoreError::NoPriceAvailable(holding.symbol().to_string()))
        }
        None => Decimal::ZERO,
    };

    let flows = holding_cash_flows(holding, price, as_of);
    let xirr = xirr(&flows, XIRR_DEFAULT_GUESS)?;

    let mut invested = Decimal::ZERO;
    let mut proceeds = Decimal::ZERO;
    for t in holding.transactions.iter().filter(|t| t.date <= as_of) {
        if t.is_buy() {
            invested -= t.cash_amount();
        } else {
            proceeds += t.cash_amount();
        }
    }
    let dividends: Decimal = holding
        .dividends
        .iter()
        .filter(|d| d.date <= as_of)
        .map(|d| d.amount)
        .sum();

    let end_value = held.max(Decimal::ZERO) * price + proceeds + dividends;
    let years = (as_of - first_date).num_days() as f64 / DAYS_PER_YEAR;
    let cagr = cagr(invested, end_value, years)?;

    Ok(HoldingReturns { xirr, cagr })
}

// ── Internals ───────────────────────────────────────────────────────

fn to_year_fractions(flows: &[CashFlow]) -> Result<Vec<(f64, f64)>, CoreError> {
    let origin = match flows.iter().map(|f| f.date).min() {
        Some(d) => d,
        None => return Ok(Vec::new()),
    };
    flows
        .iter()
        .map(|f| {
            let amount = f.amount.to_f64().ok_or_else(|| {
                CoreError::InvalidInput(format!("cash flow {} is out of range", f.amount))
            })?;
            let years = (f.date - origin).num_days() as f64 / DAYS_PER_YEAR;
            Ok((amount, years))
        })
        .collect()
}

/// NPV and dNPV/dr. d/dr [cf / (1+r)^t] = −t · cf / (1+r)^(t+1)
fn npv_and_derivative(series: &[(f64, f64)], rate: f64) -> (f64, f64) {
    let base = 1.0 + rate;
    series.iter().fold((0.0, 0.0), |(npv, dnpv), (amount, years)| {
        let discount = base.powf(*years);
        (
            npv + amount / discount,
            dnpv - years * amount / (discount * base),
        )
    })
}
