use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;

use crate::config::BrokerConfig;
use crate::errors::CoreError;
use crate::models::asset::AssetClass;
use crate::models::price::{PriceQuote, PriceSourceKind};
use super::traits::PriceSource;

const NAME: &str = "Broker";

/// Live quotes from the broker's market-data API.
///
/// - **Auth**: `Authorization: {app_id}:{access_token}` header; no token, no source.
/// - **Endpoint**: `GET {base_url}/quotes?symbols=NSE:INFY-EQ`
/// - **Data**: last traded price (`lp`) and its exchange timestamp (`tt`).
///
/// The access token is never logged; request errors are converted through
/// `CoreError::from(reqwest::Error)`, which strips the query string.
pub struct LiveBrokerSource {
    client: Client,
    base_url: String,
    app_id: String,
    access_token: String,
    symbol_format: String,
}

impl LiveBrokerSource {
    pub fn from_config(config: &BrokerConfig) -> Result<Self, CoreError> {
        if config.access_token.trim().is_empty() {
            return Err(CoreError::Config("broker access token is empty".into()));
        }
        if !config.symbol_format.contains("{symbol}") {
            return Err(CoreError::Config(format!(
                "broker symbol format '{}' has no {{symbol}} placeholder",
                config.symbol_format
            )));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| Client::new());

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            app_id: config.app_id.clone(),
            access_token: config.access_token.clone(),
            symbol_format: config.symbol_format.clone(),
        })
    }

    /// Point the source at another host (used by tests against a mock server).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Broker-side symbol, e.g. `RELIANCE` → `NSE:RELIANCE-EQ`.
    pub fn broker_symbol(&self, symbol: &str) -> String {
        self.symbol_format
            .replace("{symbol}", &symbol.trim().to_uppercase())
    }
}

// ── Response types ──────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct QuotesResponse {
    s: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    d: Vec<QuoteItem>,
}

#[derive(Debug, Deserialize)]
struct QuoteItem {
    n: String,
    s: String,
    v: QuoteValues,
}

#[derive(Debug, Deserialize)]
struct QuoteValues {
    #[serde(default)]
    lp: Option<Decimal>,
    #[serde(default)]
    tt: Option<i64>,
}

#[async_trait]
impl PriceSource for LiveBrokerSource {
    fn name(&self) -> &str {
        NAME
    }

    fn kind(&self) -> PriceSourceKind {
        PriceSourceKind::LiveBroker
    }

    fn supported_asset_classes(&self) -> Vec<AssetClass> {
        vec![AssetClass::Equity, AssetClass::Etf, AssetClass::Gold]
    }

    async fn fetch_price(&self, symbol: &str) -> Result<PriceQuote, CoreError> {
        let broker_symbol = self.broker_symbol(symbol);
        let url = format!("{}/quotes", self.base_url);

        let resp = self
            .client
            .get(&url)
            .query(&[("symbols", broker_symbol.as_str())])
            .header(
                reqwest::header::AUTHORIZATION,
                format!("{}:{}", self.app_id, self.access_token),
            )
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(CoreError::source_fetch(
                NAME,
                format!("HTTP {} for {broker_symbol}", resp.status()),
            ));
        }

        let body: QuotesResponse = resp.json().await?;
        if body.s != "ok" {
            return Err(CoreError::source_fetch(
                NAME,
                body.message.unwrap_or_else(|| format!("status '{}'", body.s)),
            ));
        }

        let item = body
            .d
            .into_iter()
            .find(|q| q.n.eq_ignore_ascii_case(&broker_symbol))
            .ok_or_else(|| CoreError::source_fetch(NAME, format!("{broker_symbol} missing from response")))?;
        if item.s != "ok" {
            return Err(CoreError::source_fetch(
                NAME,
                format!("{broker_symbol} quote status '{}'", item.s),
            ));
        }

        let price = item
            .v
            .lp
            .ok_or_else(|| CoreError::source_fetch(NAME, format!("no last price for {broker_symbol}")))?;
        let quoted_at = item
            .v
            .tt
            .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0))
            .unwrap_or_else(Utc::now);

        Ok(PriceQuote { price, quoted_at })
    }
}
