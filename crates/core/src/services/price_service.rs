use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::{join_all, BoxFuture, FutureExt, Shared};
use rust_decimal::Decimal;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::RefreshConfig;
use crate::errors::CoreError;
use crate::models::asset::Asset;
use crate::models::price::{
    PriceCache, PriceCacheEntry, PriceQuote, RefreshCycleResult, RefreshOutcome,
};
use crate::providers::chain::PriceSourceChain;
use crate::providers::traits::PriceSource;
use crate::services::refresh_policy::RefreshPolicy;

type SharedRefresh = Shared<BoxFuture<'static, Result<RefreshOutcome, CoreError>>>;

/// Keeps the shared price cache current.
///
/// Refresh strategy:
/// - **Fresh entry** (younger than the policy's active interval): served from
///   cache, no source is called.
/// - **Stale or missing entry**: the source chain for the asset's class is
///   walked in order (live broker, scraped, manual, cached fallback). The first
///   strictly positive price wins and is written to the cache.
/// - **Everything failed**: the last cached price is served with
///   `stale = true`, or `NoPriceAvailable` if there is none.
///
/// At most one refresh per symbol is in flight. Callers that arrive while
/// one is running await the same shared future instead of starting a new
/// fetch. Remote source calls are bounded by a semaphore and each one is
/// cut off after `fetch_timeout`.
#[derive(Clone)]
pub struct PriceService {
    chain: Arc<PriceSourceChain>,
    cache: Arc<PriceCache>,
    policy: Arc<RefreshPolicy>,
    clock: Arc<dyn Clock>,
    limiter: Arc<Semaphore>,
    fetch_timeout: Duration,
    in_flight: Arc<Mutex<HashMap<String, SharedRefresh>>>,
}

impl PriceService {
    pub fn new(chain: PriceSourceChain, cache: Arc<PriceCache>, policy: RefreshPolicy) -> Self {
        let defaults = RefreshConfig::default();
        Self {
            chain: Arc::new(chain),
            cache,
            policy: Arc::new(policy),
            clock: Arc::new(SystemClock),
            limiter: Arc::new(Semaphore::new(defaults.max_concurrent_fetches)),
            fetch_timeout: defaults.fetch_timeout,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn with_max_concurrent_fetches(mut self, permits: usize) -> Self {
        self.limiter = Arc::new(Semaphore::new(permits.max(1)));
        self
    }

    /// Apply `fetch_timeout` and `max_concurrent_fetches` from config.
    pub fn with_refresh_config(self, config: &RefreshConfig) -> Self {
        self.with_fetch_timeout(config.fetch_timeout)
            .with_max_concurrent_fetches(config.max_concurrent_fetches)
    }

    pub fn cache(&self) -> &Arc<PriceCache> {
        &self.cache
    }

    pub fn policy(&self) -> &RefreshPolicy {
        &self.policy
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Current price for `asset`: a fresh cache hit, or a coalesced refresh.
    pub async fn get_price(&self, asset: &Asset) -> Result<RefreshOutcome, CoreError> {
        let now = self.clock.now();
        if let Some(entry) = self.cache.get(&asset.symbol) {
            if !self.policy.is_stale(Some(&entry), now) {
                debug!(symbol = %asset.symbol, "price cache hit");
                return Ok(RefreshOutcome::from_entry(&entry, false, false));
            }
        }
        self.refresh_coalesced(asset).await
    }

    /// One batch refresh over `assets`.
    ///
    /// Fresh symbols are skipped, stale ones are refreshed concurrently.
    /// Each symbol gets its own result; one failure never aborts the batch.
    pub async fn refresh_cycle(&self, assets: &[Asset]) -> RefreshCycleResult {
        let started_at = self.clock.now();
        let plan = self.policy.plan(assets, &self.cache, started_at);

        let mut results = BTreeMap::new();
        let mut to_refresh = plan.stale;
        for asset in plan.fresh {
            match self.cache.get(&asset.symbol) {
                Some(entry) => {
                    results.insert(
                        asset.symbol.to_uppercase(),
                        Ok(RefreshOutcome::from_entry(&entry, false, false)),
                    );
                }
                None => to_refresh.push(asset),
            }
        }

        let refreshed = join_all(to_refresh.iter().map(|asset| async move {
            (asset.symbol.to_uppercase(), self.refresh_coalesced(asset).await)
        }))
        .await;
        results.extend(refreshed);

        let result = RefreshCycleResult {
            started_at,
            completed_at: self.clock.now(),
            results,
        };
        info!(
            symbols = result.results.len(),
            refreshed = result.refreshed_count(),
            skipped = result.skipped_count(),
            degraded = result.degraded_count(),
            failed = result.failed_count(),
            "price refresh cycle complete"
        );
        result
    }

    /// Record a hand-entered price for `asset` and publish it to the cache
    /// at once. Used for holdings no configured feed can price.
    pub fn set_manual_price(&self, asset: &Asset, price: Decimal) -> Result<RefreshOutcome, CoreError> {
        if price <= Decimal::ZERO {
            return Err(CoreError::ValidationError(format!(
                "Manual price for {} must be positive",
                asset.symbol
            )));
        }
        let manual = self
            .chain
            .manual_prices()
            .ok_or_else(|| CoreError::InvalidInput("manual prices are not enabled".into()))?;

        let now = self.clock.now();
        let symbol = asset.symbol.to_uppercase();
        manual.set(&symbol, PriceQuote { price, quoted_at: now });
        let entry = PriceCacheEntry {
            symbol: symbol.clone(),
            price,
            fetched_at: now,
            source: manual.kind(),
            source_name: manual.name().to_string(),
        };
        self.cache.upsert(entry.clone());
        info!(symbol = %symbol, price = %price, "manual price set");
        Ok(RefreshOutcome::from_entry(&entry, false, true))
    }

    /// Forget the hand-entered price for `asset`. The cached value stays
    /// until a feed or the cache fallback replaces it.
    pub fn clear_manual_price(&self, asset: &Asset) -> bool {
        self.chain
            .manual_prices()
            .map(|manual| manual.clear(&asset.symbol))
            .unwrap_or(false)
    }

    /// Number of symbols with a refresh currently running.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Join the running refresh for this symbol, or start one.
    async fn refresh_coalesced(&self, asset: &Asset) -> Result<RefreshOutcome, CoreError> {
        let key = asset.symbol.to_uppercase();
        let pending = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
            match in_flight.get(&key) {
                Some(existing) => {
                    debug!(symbol = %key, "joining in-flight refresh");
                    existing.clone()
                }
                None => {
                    // A refresh that finished just before we took the lock has
                    // already written the cache.
                    if let Some(entry) = self.cache.get(&key) {
                        if !self.policy.is_stale(Some(&entry), self.clock.now()) {
                            return Ok(RefreshOutcome::from_entry(&entry, false, false));
                        }
                    }

                    // The chain walk runs as its own task so it completes and
                    // leaves the map even when every waiting caller is dropped.
                    // It cannot remove its entry before the insert below: we
                    // still hold the map lock.
                    let this = self.clone();
                    let asset = asset.clone();
                    let task_key = key.clone();
                    let handle = tokio::spawn(async move {
                        let result = this.fetch_from_chain(&asset).await;
                        this.in_flight
                            .lock()
                            .unwrap_or_else(|e| e.into_inner())
                            .remove(&task_key);
                        result
                    });
                    let in_flight_map = Arc::clone(&self.in_flight);
                    let symbol = key.clone();
                    let fut = async move {
                        handle.await.unwrap_or_else(|e| {
                            warn!(symbol = %symbol, error = %e, "price refresh task failed");
                            in_flight_map
                                .lock()
                                .unwrap_or_else(|e| e.into_inner())
                                .remove(&symbol);
                            Err(CoreError::NoPriceAvailable(symbol))
                        })
                    }
                    .boxed()
                    .shared();
                    in_flight.insert(key, fut.clone());
                    fut
                }
            }
        };
        pending.await
    }

    /// Walk the source chain once and record the winner in the cache.
    async fn fetch_from_chain(&self, asset: &Asset) -> Result<RefreshOutcome, CoreError> {
        let symbol = asset.symbol.to_uppercase();
        let fetched_at = self.clock.now();
        let sources = self.chain.sources_for(asset.asset_class);

        for source in sources {
            let kind = source.kind();
            let result = if kind.is_remote() {
                let _permit = match self.limiter.acquire().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        warn!(symbol = %symbol, "fetch limiter closed");
                        break;
                    }
                };
                match tokio::time::timeout(self.fetch_timeout, source.fetch_price(&symbol)).await {
                    Ok(result) => result,
                    Err(_) => Err(CoreError::timeout(source.name(), self.fetch_timeout)),
                }
            } else {
                source.fetch_price(&symbol).await
            };

            let quote = match result {
                Ok(quote) if quote.price > Decimal::ZERO => quote,
                Ok(quote) => {
                    warn!(
                        symbol = %symbol,
                        source = source.name(),
                        price = %quote.price,
                        "source returned a non-positive price"
                    );
                    continue;
                }
                Err(e) => {
                    warn!(symbol = %symbol, source = source.name(), error = %e, "price source failed");
                    continue;
                }
            };

            if kind.is_degraded() {
                warn!(
                    symbol = %symbol,
                    price = %quote.price,
                    cached_at = %quote.quoted_at,
                    "all live sources failed, serving cached price"
                );
                return Ok(RefreshOutcome {
                    symbol,
                    price: quote.price,
                    source: kind,
                    source_name: source.name().to_string(),
                    stale: true,
                    refreshed: true,
                    fetched_at: quote.quoted_at,
                });
            }

            let entry = PriceCacheEntry {
                symbol: symbol.clone(),
                price: quote.price,
                fetched_at,
                source: kind,
                source_name: source.name().to_string(),
            };
            if !self.cache.upsert(entry.clone()) {
                debug!(symbol = %symbol, "newer cached price kept");
            }
            info!(
                symbol = %symbol,
                source = source.name(),
                price = %entry.price,
                "price refreshed"
            );
            return Ok(RefreshOutcome::from_entry(&entry, false, true));
        }

        warn!(symbol = %symbol, "no source produced a price and nothing is cached");
        Err(CoreError::NoPriceAvailable(symbol))
    }
}
