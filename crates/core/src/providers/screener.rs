use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use reqwest::Client;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;

use crate::errors::CoreError;
use crate::models::asset::AssetClass;
use crate::models::price::{PriceQuote, PriceSourceKind};
use super::traits::PriceSource;

const NAME: &str = "Quote Page";

const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// Scrapes the last price from a public stock page (`{base_url}/{SYMBOL}`).
///
/// The page marks the price with `data-testid="current-price"`. Markup can
/// change at any time, so this sits behind the broker feed in the chain.
pub struct ScreenerSource {
    client: Client,
    base_url: String,
}

impl ScreenerSource {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

fn price_pattern() -> Result<&'static Regex, CoreError> {
    static PATTERN: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r#"data-testid\s*=\s*["']current-price["'][^>]*>([^<]*)<"#))
        .as_ref()
        .map_err(|e| CoreError::source_fetch(NAME, format!("bad price pattern: {e}")))
}

/// Keep digits, `.` and `-`, then parse. `"₹ 2,847.50"` → `2847.50`.
pub fn parse_number(text: &str) -> Option<Decimal> {
    let cleaned: String = text
        .trim()
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    Decimal::from_str(&cleaned).ok()
}

/// Pull the current price out of a quote page.
pub fn extract_price(html: &str) -> Result<Decimal, CoreError> {
    let captures = price_pattern()?
        .captures(html)
        .ok_or_else(|| CoreError::source_fetch(NAME, "current price element not found"))?;
    let text = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
    parse_number(text)
        .ok_or_else(|| CoreError::source_fetch(NAME, format!("unparseable price text '{}'", text.trim())))
}

#[async_trait]
impl PriceSource for ScreenerSource {
    fn name(&self) -> &str {
        NAME
    }

    fn kind(&self) -> PriceSourceKind {
        PriceSourceKind::Scraped
    }

    fn supported_asset_classes(&self) -> Vec<AssetClass> {
        vec![AssetClass::Equity, AssetClass::Etf]
    }

    async fn fetch_price(&self, symbol: &str) -> Result<PriceQuote, CoreError> {
        let url = format!("{}/{}", self.base_url, symbol.trim().to_uppercase());
        let resp = self.client.get(&url).send().await?;
        if !resp.status().is_success() {
            return Err(CoreError::source_fetch(
                NAME,
                format!("HTTP {} for {symbol}", resp.status()),
            ));
        }
        let html = resp.text().await?;
        let price = extract_price(&html)?;
        Ok(PriceQuote {
            price,
            quoted_at: Utc::now(),
        })
    }
}
