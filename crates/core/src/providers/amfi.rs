use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::errors::CoreError;
use crate::models::asset::AssetClass;
use crate::models::price::{PriceQuote, PriceSourceKind};
use super::traits::PriceSource;

const NAME: &str = "AMFI NAV";

/// The NAV file is published once a day; one download serves every fund
/// looked up within this window.
const TABLE_TTL: Duration = Duration::from_secs(10 * 60);

/// One scheme's line from the NAV file.
#[derive(Debug, Clone, PartialEq)]
pub struct NavRecord {
    pub scheme_code: String,
    pub scheme_name: String,
    pub nav: Decimal,
    pub date: Option<NaiveDate>,
}

type NavTable = Arc<HashMap<String, NavRecord>>;

/// Mutual fund NAVs from the public AMFI file (`NAVAll.txt`).
///
/// The file is `;`-separated:
/// `Scheme Code;ISIN Growth;ISIN Reinvestment;Scheme Name;NAV;Date`.
/// A fund can be held under its scheme code or either ISIN.
pub struct AmfiNavSource {
    client: Client,
    url: String,
    table: Mutex<Option<(Instant, NavTable)>>,
}

impl AmfiNavSource {
    pub fn new(url: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            url: url.into(),
            table: Mutex::new(None),
        }
    }

    /// The parsed NAV file, downloaded at most once per `TABLE_TTL`.
    /// Concurrent lookups wait on the same download.
    async fn nav_table(&self) -> Result<NavTable, CoreError> {
        let mut slot = self.table.lock().await;
        if let Some((loaded_at, table)) = slot.as_ref() {
            if loaded_at.elapsed() < TABLE_TTL {
                return Ok(Arc::clone(table));
            }
        }

        let resp = self.client.get(&self.url).send().await?;
        if !resp.status().is_success() {
            return Err(CoreError::source_fetch(
                NAME,
                format!("HTTP {} for NAV file", resp.status()),
            ));
        }
        let body = resp.text().await?;
        let table = Arc::new(parse_nav_file(&body));
        if table.is_empty() {
            return Err(CoreError::source_fetch(NAME, "NAV file has no schemes"));
        }
        debug!(entries = table.len(), "AMFI NAV file loaded");
        *slot = Some((Instant::now(), Arc::clone(&table)));
        Ok(table)
    }
}

/// Parse the NAV file into records keyed by scheme code and by each ISIN.
///
/// Headers, fund-house names and category lines have no numeric scheme code
/// and are skipped, as are schemes whose NAV is `N.A.` or not positive.
pub fn parse_nav_file(text: &str) -> HashMap<String, NavRecord> {
    let mut table = HashMap::new();
    for line in text.lines() {
        let fields: Vec<&str> = line.split(';').map(str::trim).collect();
        if fields.len() < 6 {
            continue;
        }
        let code = fields[0];
        if code.is_empty() || !code.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        let nav = match Decimal::from_str(fields[4]) {
            Ok(nav) if nav > Decimal::ZERO => nav,
            _ => continue,
        };
        let record = NavRecord {
            scheme_code: code.to_string(),
            scheme_name: fields[3].to_string(),
            nav,
            date: NaiveDate::parse_from_str(fields[5], "%d-%b-%Y").ok(),
        };
        for isin in [fields[1], fields[2]] {
            if isin.len() == 12 {
                table.insert(isin.to_uppercase(), record.clone());
            }
        }
        table.insert(record.scheme_code.clone(), record);
    }
    table
}

#[async_trait]
impl PriceSource for AmfiNavSource {
    fn name(&self) -> &str {
        NAME
    }

    fn kind(&self) -> PriceSourceKind {
        PriceSourceKind::Scraped
    }

    fn supported_asset_classes(&self) -> Vec<AssetClass> {
        vec![AssetClass::MutualFund]
    }

    async fn fetch_price(&self, symbol: &str) -> Result<PriceQuote, CoreError> {
        let table = self.nav_table().await?;
        let record = table
            .get(&symbol.trim().to_uppercase())
            .ok_or_else(|| CoreError::source_fetch(NAME, format!("no NAV for scheme {symbol}")))?;
        let quoted_at = record
            .date
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| Utc.from_utc_datetime(&dt))
            .unwrap_or_else(Utc::now);
        Ok(PriceQuote {
            price: record.nav,
            quoted_at,
        })
    }
}
