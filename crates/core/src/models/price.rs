use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use crate::errors::CoreError;

/// Which tier of the fallback chain produced a price.
///
/// Ordering is chain priority: live quotes first, scraped pages next, then
/// prices entered by hand, and the last cached value as a last resort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceSourceKind {
    LiveBroker,
    Scraped,
    Manual,
    CachedFallback,
}

impl PriceSourceKind {
    /// A cached-fallback price is served as stale.
    pub fn is_degraded(&self) -> bool {
        matches!(self, PriceSourceKind::CachedFallback)
    }

    /// Whether a source of this kind makes network calls.
    pub fn is_remote(&self) -> bool {
        matches!(self, PriceSourceKind::LiveBroker | PriceSourceKind::Scraped)
    }
}

impl std::fmt::Display for PriceSourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PriceSourceKind::LiveBroker => write!(f, "live"),
            PriceSourceKind::Scraped => write!(f, "scraped"),
            PriceSourceKind::Manual => write!(f, "manual"),
            PriceSourceKind::CachedFallback => write!(f, "cached"),
        }
    }
}

/// A price as returned by one source call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub price: Decimal,
    /// When the source says the price was observed
    pub quoted_at: DateTime<Utc>,
}

/// One symbol's slot in the shared price cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceCacheEntry {
    pub symbol: String,
    pub price: Decimal,
    /// When the fetch that produced this entry started
    pub fetched_at: DateTime<Utc>,
    pub source: PriceSourceKind,
    pub source_name: String,
}

/// Process-wide price cache, keyed by uppercased symbol.
///
/// The key is the symbol alone, not `(symbol, class)`: a ticker or scheme
/// code has one market price however a portfolio classifies it, so the same
/// symbol held as an ETF and as gold shares one entry and one refresh.
///
/// Readers always see the last fully-written entry. Writes are accepted only
/// if they are not older than what is stored, so `fetched_at` never moves
/// backwards for a symbol.
#[derive(Debug, Default)]
pub struct PriceCache {
    entries: RwLock<HashMap<String, PriceCacheEntry>>,
}

impl PriceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a cache from previously persisted entries (older duplicates lose).
    pub fn from_entries(entries: impl IntoIterator<Item = PriceCacheEntry>) -> Self {
        let cache = Self::new();
        for entry in entries {
            cache.upsert(entry);
        }
        cache
    }

    pub fn get(&self, symbol: &str) -> Option<PriceCacheEntry> {
        let key = symbol.to_uppercase();
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&key)
            .cloned()
    }

    pub fn price(&self, symbol: &str) -> Option<Decimal> {
        self.get(symbol).map(|e| e.price)
    }

    /// Insert or replace an entry. Returns `false` (and leaves the cache
    /// untouched) when the stored entry is newer.
    pub fn upsert(&self, mut entry: PriceCacheEntry) -> bool {
        entry.symbol = entry.symbol.to_uppercase();
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        match entries.get(&entry.symbol) {
            Some(existing) if existing.fetched_at > entry.fetched_at => false,
            _ => {
                entries.insert(entry.symbol.clone(), entry);
                true
            }
        }
    }

    /// Price snapshot for the requested symbols; missing symbols are omitted.
    pub fn prices_for<'a>(
        &self,
        symbols: impl IntoIterator<Item = &'a str>,
    ) -> HashMap<String, Decimal> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        symbols
            .into_iter()
            .filter_map(|s| {
                let key = s.to_uppercase();
                entries.get(&key).map(|e| (key, e.price))
            })
            .collect()
    }

    /// All entries, sorted by symbol.
    pub fn snapshot(&self) -> Vec<PriceCacheEntry> {
        let mut all: Vec<PriceCacheEntry> = self
            .entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        all.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        all
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// What a refresh produced for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshOutcome {
    pub symbol: String,
    pub price: Decimal,
    pub source: PriceSourceKind,
    pub source_name: String,
    /// Served from the cached fallback after every live source failed
    pub stale: bool,
    /// A source was actually called for this result (false = fresh cache hit)
    pub refreshed: bool,
    pub fetched_at: DateTime<Utc>,
}

impl RefreshOutcome {
    pub(crate) fn from_entry(entry: &PriceCacheEntry, stale: bool, refreshed: bool) -> Self {
        Self {
            symbol: entry.symbol.clone(),
            price: entry.price,
            source: if stale { PriceSourceKind::CachedFallback } else { entry.source },
            source_name: entry.source_name.clone(),
            stale,
            refreshed,
            fetched_at: entry.fetched_at,
        }
    }
}

/// Per-symbol results of one batch refresh, keyed like the cache.
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshCycleResult {
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub results: BTreeMap<String, Result<RefreshOutcome, CoreError>>,
}

impl RefreshCycleResult {
    pub fn get(&self, symbol: &str) -> Option<&Result<RefreshOutcome, CoreError>> {
        self.results.get(&symbol.to_uppercase())
    }

    /// Symbols served from a fresh cache entry without calling any source.
    pub fn skipped_count(&self) -> usize {
        self.outcomes().filter(|o| !o.refreshed).count()
    }

    /// Symbols that got a new price from a live or scraped source.
    pub fn refreshed_count(&self) -> usize {
        self.outcomes().filter(|o| o.refreshed && !o.stale).count()
    }

    /// Symbols served stale from the cached fallback.
    pub fn degraded_count(&self) -> usize {
        self.outcomes().filter(|o| o.stale).count()
    }

    pub fn failed_count(&self) -> usize {
        self.results.values().filter(|r| r.is_err()).count()
    }

    fn outcomes(&self) -> impl Iterator<Item = &RefreshOutcome> {
        self.results.values().filter_map(|r| r.as_ref().ok())
    }
}
