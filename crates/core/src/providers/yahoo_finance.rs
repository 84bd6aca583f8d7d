use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::errors::CoreError;
use crate::models::asset::AssetClass;
use crate::models::price::{PriceQuote, PriceSourceKind};
use super::traits::PriceSource;

const NAME: &str = "Yahoo Finance";

/// Yahoo Finance quote source for listed instruments.
///
/// - **Free**: No API key required.
/// - **No strict rate limits** (unofficial public API).
/// - **Coverage**: NSE/BSE equities, ETFs and gold ETFs via exchange suffix.
///
/// Uses the `yahoo_finance_api` crate, which scrapes Yahoo's public chart
/// endpoint. Sits in the scraped tier: prices can lag the exchange by a
/// few minutes.
pub struct YahooFinanceSource {
    connector: yahoo_finance_api::YahooConnector,
    /// Appended to every symbol, e.g. `.NS` turns `INFY` into `INFY.NS`
    suffix: String,
}

impl YahooFinanceSource {
    pub fn new(suffix: impl Into<String>) -> Result<Self, CoreError> {
        let connector = yahoo_finance_api::YahooConnector::new()
            .map_err(|e| CoreError::source_fetch(NAME, format!("Failed to create connector: {e}")))?;
        Ok(Self {
            connector,
            suffix: suffix.into(),
        })
    }

    /// Ticker as Yahoo expects it.
    pub fn ticker(&self, symbol: &str) -> String {
        let symbol = symbol.trim().to_uppercase();
        if self.suffix.is_empty() || symbol.ends_with(&self.suffix) {
            symbol
        } else {
            format!("{symbol}{}", self.suffix)
        }
    }
}

#[async_trait]
impl PriceSource for YahooFinanceSource {
    fn name(&self) -> &str {
        NAME
    }

    fn kind(&self) -> PriceSourceKind {
        PriceSourceKind::Scraped
    }

    fn supported_asset_classes(&self) -> Vec<AssetClass> {
        vec![AssetClass::Equity, AssetClass::Etf, AssetClass::Gold]
    }

    async fn fetch_price(&self, symbol: &str) -> Result<PriceQuote, CoreError> {
        let ticker = self.ticker(symbol);
        let resp = self
            .connector
            .get_latest_quotes(&ticker, "1d")
            .await
            .map_err(|e| {
                CoreError::source_fetch(NAME, format!("Failed to fetch latest quote for {ticker}: {e}"))
            })?;

        let quote = resp
            .last_quote()
            .map_err(|e| CoreError::source_fetch(NAME, format!("No quote data for {ticker}: {e}")))?;

        let price = Decimal::try_from(quote.close).map_err(|_| {
            CoreError::source_fetch(NAME, format!("Unrepresentable price {} for {ticker}", quote.close))
        })?;
        let quoted_at = DateTime::<Utc>::from_timestamp(quote.timestamp as i64, 0).unwrap_or_else(Utc::now);

        Ok(PriceQuote { price, quoted_at })
    }
}
