use serde::{Deserialize, Serialize};

/// The class of a tracked holding.
/// Determines which price sources can quote it and how allocation is grouped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetClass {
    /// Listed stocks (RELIANCE, INFY, ...)
    Equity,
    /// Mutual fund units, priced by NAV
    MutualFund,
    /// Government / corporate bonds
    Bond,
    /// Exchange traded funds
    Etf,
    /// Gold (ETFs, sovereign gold bonds, digital gold)
    Gold,
}

impl AssetClass {
    pub const ALL: [AssetClass; 5] = [
        AssetClass::Equity,
        AssetClass::MutualFund,
        AssetClass::Bond,
        AssetClass::Etf,
        AssetClass::Gold,
    ];

    /// Whether the asset trades on an exchange during market hours.
    pub fn is_exchange_traded(&self) -> bool {
        matches!(self, AssetClass::Equity | AssetClass::Etf | AssetClass::Gold)
    }
}

impl std::fmt::Display for AssetClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssetClass::Equity => write!(f, "Equity"),
            AssetClass::MutualFund => write!(f, "Mutual Fund"),
            AssetClass::Bond => write!(f, "Bond"),
            AssetClass::Etf => write!(f, "ETF"),
            AssetClass::Gold => write!(f, "Gold"),
        }
    }
}

/// Sector bucket for assets that carry none.
pub const UNKNOWN_SECTOR: &str = "unknown";

/// Represents a holdable instrument.
///
/// **Equality and hashing** are based solely on `(symbol, asset_class)`,
/// NOT on `name` or `sector`. A portfolio holds at most one holding per such pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Asset {
    /// Ticker / scheme code, uppercased (e.g., "RELIANCE", "GOLDBEES")
    pub symbol: String,

    /// Human-readable name
    pub name: String,

    pub asset_class: AssetClass,

    /// Industry sector for allocation reports (e.g. "IT", "Banking").
    /// Not part of the asset's identity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sector: Option<String>,
}

impl PartialEq for Asset {
    fn eq(&self, other: &Self) -> bool {
        self.symbol == other.symbol && self.asset_class == other.asset_class
    }
}

impl Eq for Asset {}

impl std::hash::Hash for Asset {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.symbol.hash(state);
        self.asset_class.hash(state);
    }
}

impl Asset {
    pub fn new(symbol: impl Into<String>, name: impl Into<String>, asset_class: AssetClass) -> Self {
        Self {
            symbol: symbol.into().trim().to_uppercase(),
            name: name.into(),
            asset_class,
            sector: None,
        }
    }

    pub fn with_sector(mut self, sector: impl Into<String>) -> Self {
        let sector = sector.into().trim().to_string();
        self.sector = (!sector.is_empty()).then_some(sector);
        self
    }

    /// The sector name used for grouping; `"unknown"` when none is set.
    pub fn sector_or_unknown(&self) -> &str {
        self.sector.as_deref().unwrap_or(UNKNOWN_SECTOR)
    }

    pub fn equity(symbol: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(symbol, name, AssetClass::Equity)
    }

    pub fn mutual_fund(symbol: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(symbol, name, AssetClass::MutualFund)
    }

    pub fn bond(symbol: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(symbol, name, AssetClass::Bond)
    }

    pub fn etf(symbol: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(symbol, name, AssetClass::Etf)
    }

    pub fn gold(symbol: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(symbol, name, AssetClass::Gold)
    }
}
