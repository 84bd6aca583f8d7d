pub mod clock;
pub mod config;
pub mod errors;
pub mod models;
pub mod providers;
pub mod services;
pub mod storage;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use clock::{Clock, SystemClock};
use config::EngineConfig;
use errors::CoreError;
use models::{
    analytics::{DailySummary, HoldingReturns, PortfolioSummary},
    asset::Asset,
    holding::Holding,
    portfolio::Portfolio,
    price::{PriceCache, RefreshCycleResult, RefreshOutcome},
    transaction::{Dividend, Transaction},
};
use providers::chain::PriceSourceChain;
use services::{
    portfolio_service::PortfolioService,
    price_service::PriceService,
    refresh_policy::RefreshPolicy,
    refresh_scheduler::{RefreshScheduler, SchedulerStatus},
    returns,
    valuation_service::ValuationService,
};
use storage::PortfolioRepository;

/// Main entry point for the portfolio valuation core library.
///
/// Owns the shared price cache and wires the services around it: ledger
/// writes go through the portfolio service, prices through the price
/// service, and every figure is recomputed on demand by the valuation
/// service from the stored ledger plus a cache snapshot.
#[must_use]
pub struct PortfolioEngine {
    repository: Arc<dyn PortfolioRepository>,
    portfolio_service: PortfolioService,
    price_service: PriceService,
    valuation_service: ValuationService,
    scheduler: RefreshScheduler,
    clock: Arc<dyn Clock>,
    /// Serializes read-modify-write cycles on stored portfolios.
    write_lock: Mutex<()>,
}

impl std::fmt::Debug for PortfolioEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortfolioEngine")
            .field("cached_prices", &self.price_service.cache().len())
            .field("auto_refresh", &self.scheduler.is_running())
            .finish()
    }
}

impl PortfolioEngine {
    /// Build an engine from configuration, using the real price sources and
    /// the system clock.
    pub fn new(config: &EngineConfig, repository: Arc<dyn PortfolioRepository>) -> Result<Self, CoreError> {
        let cache = Arc::new(PriceCache::new());
        let chain = PriceSourceChain::with_defaults(&config.sources, Arc::clone(&cache));
        let policy = RefreshPolicy::from_config(&config.refresh, &config.market_hours)?;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let price_service = PriceService::new(chain, cache, policy)
            .with_clock(Arc::clone(&clock))
            .with_refresh_config(&config.refresh);
        Ok(Self::with_components(
            repository,
            price_service,
            clock,
            config.refresh.poll_interval,
        ))
    }

    /// Assemble an engine from prebuilt parts (custom source chains, fake
    /// clocks). The price service's clock should be the same `clock`.
    pub fn with_components(
        repository: Arc<dyn PortfolioRepository>,
        price_service: PriceService,
        clock: Arc<dyn Clock>,
        poll_interval: std::time::Duration,
    ) -> Self {
        let scheduler = RefreshScheduler::new(
            price_service.clone(),
            Arc::clone(&repository),
            poll_interval,
        );
        Self {
            repository,
            portfolio_service: PortfolioService::with_clock(Arc::clone(&clock))
                .with_timezone(price_service.policy().market_hours.timezone),
            price_service,
            valuation_service: ValuationService::new(),
            scheduler,
            clock,
            write_lock: Mutex::new(()),
        }
    }

    pub fn price_cache(&self) -> &Arc<PriceCache> {
        self.price_service.cache()
    }

    // ── Ledger ──────────────────────────────────────────────────────

    /// Create and store an empty portfolio. Fails if the id is taken.
    pub async fn create_portfolio(&self, id: &str, owner: &str) -> Result<Portfolio, CoreError> {
        let _guard = self.write_lock.lock().await;
        if self.repository.get_portfolio(id).await?.is_some() {
            return Err(CoreError::ValidationError(format!(
                "Portfolio {id} already exists"
            )));
        }
        let portfolio = Portfolio::new(id, owner);
        self.repository.save_portfolio(&portfolio).await?;
        Ok(portfolio)
    }

    pub async fn get_portfolio(&self, portfolio_id: &str) -> Result<Portfolio, CoreError> {
        self.repository
            .get_portfolio(portfolio_id)
            .await?
            .ok_or_else(|| CoreError::PortfolioNotFound(portfolio_id.to_string()))
    }

    /// Record a buy or sell. Validation failures leave the ledger untouched.
    pub async fn record_transaction(
        &self,
        portfolio_id: &str,
        asset: &Asset,
        transaction: Transaction,
    ) -> Result<(), CoreError> {
        let _guard = self.write_lock.lock().await;
        let mut portfolio = self.get_portfolio(portfolio_id).await?;
        self.portfolio_service
            .record_transaction(&mut portfolio, asset, transaction)?;
        self.repository.save_portfolio(&portfolio).await
    }

    pub async fn record_dividend(
        &self,
        portfolio_id: &str,
        asset: &Asset,
        dividend: Dividend,
    ) -> Result<(), CoreError> {
        let _guard = self.write_lock.lock().await;
        let mut portfolio = self.get_portfolio(portfolio_id).await?;
        self.portfolio_service
            .record_dividend(&mut portfolio, asset, dividend)?;
        self.repository.save_portfolio(&portfolio).await
    }

    /// Every holding of the portfolio, closed ones included.
    pub async fn get_holdings(&self, portfolio_id: &str) -> Result<Vec<Holding>, CoreError> {
        Ok(self.get_portfolio(portfolio_id).await?.holdings)
    }

    /// Net quantities held on `date`.
    pub async fn get_quantities(
        &self,
        portfolio_id: &str,
        date: NaiveDate,
    ) -> Result<HashMap<Asset, Decimal>, CoreError> {
        let portfolio = self.get_portfolio(portfolio_id).await?;
        Ok(self.portfolio_service.get_holdings(&portfolio, date))
    }

    // ── Valuation ───────────────────────────────────────────────────

    /// XIRR and CAGR for one holding, valued at the cached price.
    pub async fn compute_returns(
        &self,
        portfolio_id: &str,
        asset: &Asset,
        as_of: NaiveDate,
    ) -> Result<HoldingReturns, CoreError> {
        let portfolio = self.get_portfolio(portfolio_id).await?;
        let holding = portfolio
            .holding(asset)
            .ok_or_else(|| CoreError::HoldingNotFound(asset.symbol.clone()))?;
        let price = self
            .price_service
            .cache()
            .price(&asset.symbol)
            .or(holding.current_price);
        returns::compute_returns(holding, price, as_of)
    }

    /// Today's date on the market's calendar, not UTC's.
    pub fn market_today(&self) -> NaiveDate {
        self.price_service
            .policy()
            .market_hours
            .local_date(self.clock.now())
    }

    /// Summary as of today, from whatever prices are cached. Never fetches.
    pub async fn compute_portfolio_summary(&self, portfolio_id: &str) -> Result<PortfolioSummary, CoreError> {
        let today = self.market_today();
        self.compute_portfolio_summary_as_of(portfolio_id, today).await
    }

    pub async fn compute_portfolio_summary_as_of(
        &self,
        portfolio_id: &str,
        as_of: NaiveDate,
    ) -> Result<PortfolioSummary, CoreError> {
        let portfolio = self.get_portfolio(portfolio_id).await?;
        let prices = self
            .price_service
            .cache()
            .prices_for(portfolio.holdings.iter().map(|h| h.symbol()));
        Ok(self
            .valuation_service
            .summarize(&portfolio.id, &portfolio.holdings, &prices, as_of))
    }

    /// End-of-day digest for today.
    pub async fn daily_summary(&self, portfolio_id: &str) -> Result<DailySummary, CoreError> {
        let summary = self.compute_portfolio_summary(portfolio_id).await?;
        Ok(self.valuation_service.daily_summary(&summary))
    }

    // ── Prices ──────────────────────────────────────────────────────

    /// Current price for one asset (cache hit or coalesced refresh).
    pub async fn get_price(&self, asset: &Asset) -> Result<RefreshOutcome, CoreError> {
        self.price_service.get_price(asset).await
    }

    /// Enter a price by hand for an asset no feed covers (an unlisted bond,
    /// a scheme missing from the NAV file). It is served until cleared.
    pub fn set_manual_price(&self, asset: &Asset, price: Decimal) -> Result<RefreshOutcome, CoreError> {
        self.price_service.set_manual_price(asset, price)
    }

    pub fn clear_manual_price(&self, asset: &Asset) -> bool {
        self.price_service.clear_manual_price(asset)
    }

    /// Manual refresh of one portfolio's active holdings. Stale symbols are
    /// refetched; the new prices are stamped on the stored holdings.
    pub async fn refresh_portfolio(&self, portfolio_id: &str) -> Result<RefreshCycleResult, CoreError> {
        let assets = self.get_portfolio(portfolio_id).await?.tracked_assets();
        let result = self.price_service.refresh_cycle(&assets).await;

        let _guard = self.write_lock.lock().await;
        let mut portfolio = self.get_portfolio(portfolio_id).await?;
        let updated = self.portfolio_service.apply_prices(&mut portfolio, &result);
        if updated > 0 {
            self.repository.save_portfolio(&portfolio).await?;
        }
        info!(portfolio_id, updated, "portfolio prices refreshed");
        Ok(result)
    }

    /// One refresh cycle over every portfolio (what the scheduler runs).
    pub async fn refresh_all(&self) -> Result<RefreshCycleResult, CoreError> {
        self.scheduler.run_cycle().await
    }

    // ── Auto refresh ────────────────────────────────────────────────

    /// Start the background refresher. Returns `false` if already running.
    pub fn start_auto_refresh(&self) -> bool {
        self.scheduler.start()
    }

    pub async fn stop_auto_refresh(&self) -> bool {
        self.scheduler.stop().await
    }

    pub fn refresh_status(&self) -> SchedulerStatus {
        self.scheduler.status()
    }

    pub fn latest_daily_summaries(&self) -> Vec<DailySummary> {
        self.scheduler.latest_daily_summaries()
    }
}
