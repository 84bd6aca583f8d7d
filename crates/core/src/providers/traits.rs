use async_trait::async_trait;

use crate::errors::CoreError;
use crate::models::asset::AssetClass;
use crate::models::price::{PriceQuote, PriceSourceKind};

/// One tier of the price fallback chain.
///
/// A live broker feed, a scraped quote page and the last cached value all
/// implement this trait. Swapping a source out touches only its own
/// implementation; the refresh engine only sees `fetch_price`.
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Human-readable name of this source (for logs and outcomes).
    fn name(&self) -> &str;

    /// Position of this source in the fallback chain.
    fn kind(&self) -> PriceSourceKind;

    /// Which asset classes this source can price.
    fn supported_asset_classes(&self) -> Vec<AssetClass>;

    /// Latest price for `symbol` (the holding's own symbol, unprefixed).
    async fn fetch_price(&self, symbol: &str) -> Result<PriceQuote, CoreError>;
}
