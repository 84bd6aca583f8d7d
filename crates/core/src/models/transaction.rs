use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Direction of a transaction, derived from the sign of its quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionSide {
    Buy,
    Sell,
}

impl std::fmt::Display for TransactionSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionSide::Buy => write!(f, "Buy"),
            TransactionSide::Sell => write!(f, "Sell"),
        }
    }
}

/// A single buy or sell in a holding's ledger.
///
/// Transactions are immutable once recorded. Corrections are recorded as
/// new offsetting transactions, never by editing history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,

    /// Trade date (daily granularity)
    pub date: NaiveDate,

    /// Signed quantity: positive = buy, negative = sell
    pub quantity: Decimal,

    /// Price per unit
    pub price: Decimal,

    /// Brokerage, taxes and other charges (always non-negative)
    #[serde(default)]
    pub fees: Decimal,

    #[serde(default)]
    pub notes: Option<String>,
}

impl Transaction {
    /// Create a transaction from an already-signed quantity.
    pub fn new(date: NaiveDate, quantity: Decimal, price: Decimal) -> Self {
        Self {
            id: Uuid::new_v4(),
            date,
            quantity,
            price,
            fees: Decimal::ZERO,
            notes: None,
        }
    }

    pub fn buy(date: NaiveDate, quantity: Decimal, price: Decimal) -> Self {
        Self::new(date, quantity.abs(), price)
    }

    pub fn sell(date: NaiveDate, quantity: Decimal, price: Decimal) -> Self {
        Self::new(date, -quantity.abs(), price)
    }

    pub fn with_fees(mut self, fees: Decimal) -> Self {
        self.fees = fees;
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn side(&self) -> TransactionSide {
        if self.quantity.is_sign_negative() {
            TransactionSide::Sell
        } else {
            TransactionSide::Buy
        }
    }

    pub fn is_buy(&self) -> bool {
        self.side() == TransactionSide::Buy
    }

    pub fn is_sell(&self) -> bool {
        self.side() == TransactionSide::Sell
    }

    /// Unsigned number of units traded.
    pub fn units(&self) -> Decimal {
        self.quantity.abs()
    }

    /// `units × price`, before fees.
    pub fn gross_amount(&self) -> Decimal {
        self.units() * self.price
    }

    /// Signed cash movement from the investor's point of view:
    /// a buy pays out `gross + fees`, a sell brings in `gross − fees`.
    pub fn cash_amount(&self) -> Decimal {
        match self.side() {
            TransactionSide::Buy => -(self.gross_amount() + self.fees),
            TransactionSide::Sell => self.gross_amount() - self.fees,
        }
    }
}

/// A cash dividend / interest payout received for a holding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dividend {
    pub date: NaiveDate,
    pub amount: Decimal,
}

impl Dividend {
    pub fn new(date: NaiveDate, amount: Decimal) -> Self {
        Self { date, amount }
    }
}
