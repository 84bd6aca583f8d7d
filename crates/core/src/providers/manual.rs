use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::errors::CoreError;
use crate::models::asset::AssetClass;
use crate::models::price::{PriceQuote, PriceSourceKind};

use super::traits::PriceSource;

const NAME: &str = "Manual Entry";

/// Prices typed in by the user, for holdings no feed covers (unlisted
/// bonds, closed schemes).
///
/// Ranked after every live and scraped source, so a manual price only
/// answers when those fail or none covers the class. It stays in use until
/// it is replaced or cleared.
#[derive(Debug, Default)]
pub struct ManualPriceSource {
    quotes: RwLock<HashMap<String, PriceQuote>>,
}

impl ManualPriceSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `quote` for `symbol`, replacing any earlier entry.
    pub fn set(&self, symbol: &str, quote: PriceQuote) {
        self.quotes
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(symbol.trim().to_uppercase(), quote);
    }

    /// Drop the manual price for `symbol`. Returns whether one existed.
    pub fn clear(&self, symbol: &str) -> bool {
        self.quotes
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&symbol.trim().to_uppercase())
            .is_some()
    }

    pub fn get(&self, symbol: &str) -> Option<PriceQuote> {
        self.quotes
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&symbol.trim().to_uppercase())
            .cloned()
    }
}

#[async_trait]
impl PriceSource for ManualPriceSource {
    fn name(&self) -> &str {
        NAME
    }

    fn kind(&self) -> PriceSourceKind {
        PriceSourceKind::Manual
    }

    fn supported_asset_classes(&self) -> Vec<AssetClass> {
        AssetClass::ALL.to_vec()
    }

    async fn fetch_price(&self, symbol: &str) -> Result<PriceQuote, CoreError> {
        self.get(symbol)
            .ok_or_else(|| CoreError::source_fetch(NAME, format!("no manual price for {symbol}")))
    }
}
