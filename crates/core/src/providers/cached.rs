use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::CoreError;
use crate::models::asset::AssetClass;
use crate::models::price::{PriceCache, PriceQuote, PriceSourceKind};

use super::traits::PriceSource;

/// Last resort: the last successfully fetched price, whatever its age.
pub struct CachedFallbackSource {
    cache: Arc<PriceCache>,
}

impl CachedFallbackSource {
    pub fn new(cache: Arc<PriceCache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl PriceSource for CachedFallbackSource {
    fn name(&self) -> &str {
        "Price Cache"
    }

    fn kind(&self) -> PriceSourceKind {
        PriceSourceKind::CachedFallback
    }

    fn supported_asset_classes(&self) -> Vec<AssetClass> {
        AssetClass::ALL.to_vec()
    }

    async fn fetch_price(&self, symbol: &str) -> Result<PriceQuote, CoreError> {
        self.cache
            .get(symbol)
            .map(|entry| PriceQuote {
                price: entry.price,
                quoted_at: entry.fetched_at,
            })
            .ok_or_else(|| CoreError::source_fetch(self.name(), format!("no cached price for {symbol}")))
    }
}
