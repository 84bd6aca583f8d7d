use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::serialize_duration;
use crate::errors::CoreError;
use crate::models::analytics::DailySummary;
use crate::models::portfolio::Portfolio;
use crate::models::price::RefreshCycleResult;
use crate::services::price_service::PriceService;
use crate::services::valuation_service::ValuationService;
use crate::storage::PortfolioRepository;

/// Snapshot of the background refresher.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchedulerStatus {
    pub is_running: bool,
    #[serde(serialize_with = "serialize_duration")]
    pub poll_interval: Duration,
    pub cycles_run: u64,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub last_refreshed: usize,
    pub last_skipped: usize,
    pub last_degraded: usize,
    pub last_failed: usize,
    /// Market-local date of the last end-of-day summary run
    pub last_daily_summary: Option<NaiveDate>,
}

#[derive(Debug, Default)]
struct SchedulerState {
    cycles_run: u64,
    last_cycle_at: Option<DateTime<Utc>>,
    last_refreshed: usize,
    last_skipped: usize,
    last_degraded: usize,
    last_failed: usize,
    last_daily_summary: Option<NaiveDate>,
    daily_summaries: Vec<DailySummary>,
}

struct RunningTask {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

struct Worker {
    price_service: PriceService,
    repository: Arc<dyn PortfolioRepository>,
    valuation: ValuationService,
    state: Mutex<SchedulerState>,
}

/// Periodically refreshes prices for every active holding in every portfolio.
///
/// Each tick of `poll_interval` runs one batch cycle; the refresh policy
/// decides which symbols actually get refetched, so polling often is cheap.
/// The first tick after the closing bell on a trading day also produces the
/// end-of-day summaries.
pub struct RefreshScheduler {
    worker: Arc<Worker>,
    poll_interval: Duration,
    task: Mutex<Option<RunningTask>>,
}

impl RefreshScheduler {
    pub fn new(
        price_service: PriceService,
        repository: Arc<dyn PortfolioRepository>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            worker: Arc::new(Worker {
                price_service,
                repository,
                valuation: ValuationService::new(),
                state: Mutex::new(SchedulerState::default()),
            }),
            poll_interval,
            task: Mutex::new(None),
        }
    }

    /// Spawn the background loop. Returns `false` if it is already running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> bool {
        let mut task = self.task.lock().unwrap_or_else(|e| e.into_inner());
        if task.as_ref().is_some_and(|t| !t.handle.is_finished()) {
            debug!("auto refresh already running");
            return false;
        }

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let worker = Arc::clone(&self.worker);
        let poll_interval = self.poll_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = worker.run_cycle().await {
                            warn!(error = %e, "scheduled refresh cycle failed");
                        }
                    }
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("auto refresh loop exited");
        });

        *task = Some(RunningTask {
            stop: stop_tx,
            handle,
        });
        info!(poll_interval = ?poll_interval, "auto refresh started");
        true
    }

    /// Stop the loop and wait for an in-progress cycle to finish.
    /// Returns `false` if it was not running.
    pub async fn stop(&self) -> bool {
        let running = self.task.lock().unwrap_or_else(|e| e.into_inner()).take();
        let Some(running) = running else {
            return false;
        };
        let _ = running.stop.send(true);
        if let Err(e) = running.handle.await {
            warn!(error = %e, "auto refresh task ended abnormally");
        }
        info!("auto refresh stopped");
        true
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|t| !t.handle.is_finished())
    }

    pub fn status(&self) -> SchedulerStatus {
        let state = self.worker.state.lock().unwrap_or_else(|e| e.into_inner());
        SchedulerStatus {
            is_running: self.is_running(),
            poll_interval: self.poll_interval,
            cycles_run: state.cycles_run,
            last_cycle_at: state.last_cycle_at,
            last_refreshed: state.last_refreshed,
            last_skipped: state.last_skipped,
            last_degraded: state.last_degraded,
            last_failed: state.last_failed,
            last_daily_summary: state.last_daily_summary,
        }
    }

    /// Summaries produced by the most recent end-of-day run.
    pub fn latest_daily_summaries(&self) -> Vec<DailySummary> {
        self.worker
            .state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .daily_summaries
            .clone()
    }

    /// Run one cycle now, outside the timer.
    pub async fn run_cycle(&self) -> Result<RefreshCycleResult, CoreError> {
        self.worker.run_cycle().await
    }
}

impl Worker {
    async fn load_portfolios(&self) -> Result<Vec<Portfolio>, CoreError> {
        let mut portfolios = Vec::new();
        for id in self.repository.list_portfolio_ids().await? {
            if let Some(p) = self.repository.get_portfolio(&id).await? {
                portfolios.push(p);
            }
        }
        Ok(portfolios)
    }

    async fn run_cycle(&self) -> Result<RefreshCycleResult, CoreError> {
        let portfolios = self.load_portfolios().await?;
        let assets: Vec<_> = portfolios.iter().flat_map(|p| p.tracked_assets()).collect();

        let result = self.price_service.refresh_cycle(&assets).await;

        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.cycles_run += 1;
            state.last_cycle_at = Some(result.completed_at);
            state.last_refreshed = result.refreshed_count();
            state.last_skipped = result.skipped_count();
            state.last_degraded = result.degraded_count();
            state.last_failed = result.failed_count();
        }

        self.maybe_run_daily_summary(&portfolios, result.completed_at);
        Ok(result)
    }

    fn maybe_run_daily_summary(&self, portfolios: &[Portfolio], now: DateTime<Utc>) {
        let hours = &self.price_service.policy().market_hours;
        if !hours.is_after_close(now) {
            return;
        }
        let date = hours.local_date(now);
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.last_daily_summary == Some(date) {
            return;
        }

        let cache = self.price_service.cache();
        let summaries: Vec<DailySummary> = portfolios
            .iter()
            .map(|p| {
                let prices = cache.prices_for(p.holdings.iter().map(|h| h.symbol()));
                let summary = self.valuation.summarize(&p.id, &p.holdings, &prices, date);
                self.valuation.daily_summary(&summary)
            })
            .collect();

        for s in &summaries {
            info!(
                portfolio_id = %s.portfolio_id,
                date = %s.date,
                holdings = s.total_holdings,
                total_value = %s.total_value,
                total_pnl = %s.total_pnl,
                best = ?s.best_performer.as_ref().map(|p| &p.symbol),
                worst = ?s.worst_performer.as_ref().map(|p| &p.symbol),
                "daily summary"
            );
        }

        state.last_daily_summary = Some(date);
        state.daily_summaries = summaries;
    }
}
