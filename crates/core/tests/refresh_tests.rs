// ═══════════════════════════════════════════════════════════════════
// Refresh Tests — MarketHours, RefreshPolicy, PriceService (fallback
// chain, coalescing, timeouts, batch cycles)
// ═══════════════════════════════════════════════════════════════════

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use portfolio_valuation_core::clock::{Clock, ManualClock};
use portfolio_valuation_core::config::MarketHoursConfig;
use portfolio_valuation_core::errors::CoreError;
use portfolio_valuation_core::models::asset::{Asset, AssetClass};
use portfolio_valuation_core::models::price::{
    PriceCache, PriceCacheEntry, PriceQuote, PriceSourceKind,
};
use portfolio_valuation_core::providers::cached::CachedFallbackSource;
use portfolio_valuation_core::providers::chain::PriceSourceChain;
use portfolio_valuation_core::providers::manual::ManualPriceSource;
use portfolio_valuation_core::providers::traits::PriceSource;
use portfolio_valuation_core::services::price_service::PriceService;
use portfolio_valuation_core::services::refresh_policy::{MarketHours, RefreshPolicy};

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

/// Wall-clock time in India (UTC+05:30) as UTC.
fn ist(y: i32, m: u32, day: u32, h: u32, min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, day, h, min, 0).unwrap() - ChronoDuration::minutes(5 * 60 + 30)
}

/// Monday 2024-06-10, 10:00 IST.
fn monday_morning() -> DateTime<Utc> {
    ist(2024, 6, 10, 10, 0)
}

// ═══════════════════════════════════════════════════════════════════
// Mock Sources
// ═══════════════════════════════════════════════════════════════════

struct MockSource {
    name: String,
    kind: PriceSourceKind,
    price: Option<Decimal>,
    delay: Duration,
    calls: Arc<AtomicUsize>,
    log: Option<Arc<Mutex<Vec<String>>>>,
}

impl MockSource {
    fn new(name: &str, kind: PriceSourceKind, price: Option<Decimal>) -> Self {
        Self {
            name: name.into(),
            kind,
            price,
            delay: Duration::ZERO,
            calls: Arc::new(AtomicUsize::new(0)),
            log: None,
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn with_log(mut self, log: Arc<Mutex<Vec<String>>>) -> Self {
        self.log = Some(log);
        self
    }

    fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl PriceSource for MockSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> PriceSourceKind {
        self.kind
    }

    fn supported_asset_classes(&self) -> Vec<AssetClass> {
        AssetClass::ALL.to_vec()
    }

    async fn fetch_price(&self, symbol: &str) -> Result<PriceQuote, CoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(log) = &self.log {
            log.lock().unwrap().push(self.name.clone());
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match self.price {
            Some(price) => Ok(PriceQuote {
                price,
                quoted_at: Utc::now(),
            }),
            None => Err(CoreError::source_fetch(&self.name, format!("{symbol} unavailable"))),
        }
    }
}

/// Restricts a mock to mutual funds, like a NAV feed.
struct NavOnly(MockSource);

#[async_trait]
impl PriceSource for NavOnly {
    fn name(&self) -> &str {
        self.0.name()
    }

    fn kind(&self) -> PriceSourceKind {
        self.0.kind()
    }

    fn supported_asset_classes(&self) -> Vec<AssetClass> {
        vec![AssetClass::MutualFund]
    }

    async fn fetch_price(&self, symbol: &str) -> Result<PriceQuote, CoreError> {
        self.0.fetch_price(symbol).await
    }
}

fn infy() -> Asset {
    Asset::equity("INFY", "Infosys")
}

fn cached(symbol: &str, price: Decimal, fetched_at: DateTime<Utc>) -> PriceCacheEntry {
    PriceCacheEntry {
        symbol: symbol.into(),
        price,
        fetched_at,
        source: PriceSourceKind::LiveBroker,
        source_name: "Broker".into(),
    }
}

fn service(
    sources: Vec<MockSource>,
    cache: Arc<PriceCache>,
    clock: Arc<ManualClock>,
) -> PriceService {
    let mut chain = PriceSourceChain::new();
    for s in sources {
        chain.register(Arc::new(s));
    }
    chain.register(Arc::new(CachedFallbackSource::new(Arc::clone(&cache))));
    PriceService::new(chain, cache, RefreshPolicy::default())
        .with_clock(clock)
        .with_fetch_timeout(Duration::from_millis(200))
}

// ═══════════════════════════════════════════════════════════════════
// MarketHours
// ═══════════════════════════════════════════════════════════════════

mod market_hours {
    use super::*;

    #[test]
    fn open_during_session() {
        let hours = MarketHours::default();
        assert!(hours.is_open(monday_morning()));
        assert!(!hours.is_open(ist(2024, 6, 10, 20, 0)));
    }

    #[test]
    fn bounds_are_inclusive() {
        let hours = MarketHours::default();
        assert!(hours.is_open(ist(2024, 6, 10, 9, 15)));
        assert!(hours.is_open(ist(2024, 6, 10, 15, 30)));
        assert!(!hours.is_open(ist(2024, 6, 10, 9, 14)));
        assert!(!hours.is_open(ist(2024, 6, 10, 15, 31)));
    }

    #[test]
    fn closed_on_weekends_and_holidays() {
        let mut hours = MarketHours::default();
        // Saturday
        assert!(!hours.is_open(ist(2024, 6, 8, 10, 0)));
        hours.holidays.push(d(2024, 6, 10));
        assert!(!hours.is_open(monday_morning()));
    }

    #[test]
    fn after_close_only_on_trading_days() {
        let hours = MarketHours::default();
        assert!(hours.is_after_close(ist(2024, 6, 10, 16, 0)));
        assert!(!hours.is_after_close(ist(2024, 6, 10, 15, 30)));
        assert!(!hours.is_after_close(ist(2024, 6, 8, 16, 0)));
        assert_eq!(hours.local_date(ist(2024, 6, 10, 23, 0)), d(2024, 6, 10));
    }

    #[test]
    fn from_config_parses_and_validates() {
        let config = MarketHoursConfig {
            timezone: "America/New_York".into(),
            open: "09:30".into(),
            close: "16:00".into(),
            trading_days: vec!["Mon".into(), "Tue".into()],
            holidays: vec![],
        };
        let hours = MarketHours::from_config(&config).unwrap();
        assert_eq!(hours.timezone, chrono_tz::America::New_York);
        assert_eq!(hours.trading_days.len(), 2);

        let bad_tz = MarketHoursConfig {
            timezone: "Mars/Olympus".into(),
            ..MarketHoursConfig::default()
        };
        assert!(matches!(MarketHours::from_config(&bad_tz), Err(CoreError::Config(_))));

        let bad_time = MarketHoursConfig {
            open: "9am".into(),
            ..MarketHoursConfig::default()
        };
        assert!(matches!(MarketHours::from_config(&bad_time), Err(CoreError::Config(_))));

        let inverted = MarketHoursConfig {
            open: "16:00".into(),
            close: "09:00".into(),
            ..MarketHoursConfig::default()
        };
        assert!(MarketHours::from_config(&inverted).is_err());

        let bad_day = MarketHoursConfig {
            trading_days: vec!["Funday".into()],
            ..MarketHoursConfig::default()
        };
        assert!(MarketHours::from_config(&bad_day).is_err());
    }
}

// ═══════════════════════════════════════════════════════════════════
// RefreshPolicy
// ═══════════════════════════════════════════════════════════════════

mod policy {
    use super::*;

    #[test]
    fn interval_follows_market_hours() {
        let policy = RefreshPolicy::default();
        assert_eq!(policy.active_interval(monday_morning()), Duration::from_secs(5 * 60));
        assert_eq!(
            policy.active_interval(ist(2024, 6, 10, 20, 0)),
            Duration::from_secs(60 * 60)
        );
    }

    #[test]
    fn missing_entry_is_stale() {
        let check = RefreshPolicy::default().check(None, monday_morning());
        assert!(check.is_stale);
        assert!(check.age.is_none());
    }

    #[test]
    fn staleness_depends_on_interval() {
        let policy = RefreshPolicy::default();
        let fetched = cached("INFY", dec!(1500), monday_morning() - ChronoDuration::minutes(10));

        // 10 minutes old: stale inside market hours (5m)...
        assert!(policy.is_stale(Some(&fetched), monday_morning()));

        // ...but fresh in the evening (60m).
        let evening = ist(2024, 6, 10, 20, 0);
        let evening_entry = cached("INFY", dec!(1500), evening - ChronoDuration::minutes(10));
        let check = policy.check(Some(&evening_entry), evening);
        assert!(!check.is_stale);
        assert_eq!(check.age, Some(Duration::from_secs(600)));
        assert_eq!(check.threshold, Duration::from_secs(3600));
    }

    #[test]
    fn age_equal_to_interval_is_fresh() {
        let policy = RefreshPolicy::default();
        let entry = cached("INFY", dec!(1500), monday_morning() - ChronoDuration::minutes(5));
        assert!(!policy.is_stale(Some(&entry), monday_morning()));
    }

    #[test]
    fn plan_partitions_and_dedupes() {
        let policy = RefreshPolicy::default();
        let cache = PriceCache::new();
        cache.upsert(cached("INFY", dec!(1500), monday_morning() - ChronoDuration::minutes(1)));
        cache.upsert(cached("TCS", dec!(3800), monday_morning() - ChronoDuration::hours(2)));

        let assets = vec![
            infy(),
            Asset::equity("TCS", "TCS"),
            Asset::equity("HDFCBANK", "HDFC Bank"),
            infy(),
        ];
        let plan = policy.plan(&assets, &cache, monday_morning());
        assert_eq!(plan.fresh, vec![infy()]);
        let stale: Vec<&str> = plan.stale.iter().map(|a| a.symbol.as_str()).collect();
        assert_eq!(stale, vec!["TCS", "HDFCBANK"]);
    }

    #[test]
    fn plan_dedupes_a_symbol_held_in_two_classes() {
        let policy = RefreshPolicy::default();
        let cache = PriceCache::new();
        let assets = vec![
            Asset::etf("GOLDBEES", "Gold BeES"),
            Asset::gold("GOLDBEES", "Gold BeES"),
        ];
        let plan = policy.plan(&assets, &cache, monday_morning());
        assert_eq!(plan.stale.len(), 1);
        assert_eq!(plan.stale[0].asset_class, AssetClass::Etf);
        assert!(plan.fresh.is_empty());
    }
}

// ═══════════════════════════════════════════════════════════════════
// PriceService — single symbol
// ═══════════════════════════════════════════════════════════════════

mod price_service {
    use super::*;

    #[tokio::test]
    async fn fresh_cache_hit_calls_no_source() {
        let cache = Arc::new(PriceCache::new());
        let clock = Arc::new(ManualClock::new(monday_morning()));
        cache.upsert(cached("INFY", dec!(1500), monday_morning() - ChronoDuration::minutes(1)));

        let broker = MockSource::new("broker", PriceSourceKind::LiveBroker, Some(dec!(1600)));
        let calls = broker.calls();
        let svc = service(vec![broker], Arc::clone(&cache), clock);

        let outcome = svc.get_price(&infy()).await.unwrap();
        assert_eq!(outcome.price, dec!(1500));
        assert!(!outcome.refreshed);
        assert!(!outcome.stale);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn stale_entry_is_refetched_and_stamped() {
        let cache = Arc::new(PriceCache::new());
        let clock = Arc::new(ManualClock::new(monday_morning()));
        cache.upsert(cached("INFY", dec!(1500), monday_morning() - ChronoDuration::minutes(30)));

        let broker = MockSource::new("broker", PriceSourceKind::LiveBroker, Some(dec!(1600)));
        let svc = service(vec![broker], Arc::clone(&cache), Arc::clone(&clock));

        let outcome = svc.get_price(&infy()).await.unwrap();
        assert_eq!(outcome.price, dec!(1600));
        assert_eq!(outcome.source, PriceSourceKind::LiveBroker);
        assert_eq!(outcome.source_name, "broker");
        assert!(outcome.refreshed);
        assert!(!outcome.stale);

        let stored = cache.get("INFY").unwrap();
        assert_eq!(stored.price, dec!(1600));
        assert_eq!(stored.fetched_at, clock.now());
    }

    #[tokio::test]
    async fn falls_through_chain_in_order() {
        let cache = Arc::new(PriceCache::new());
        let clock = Arc::new(ManualClock::new(monday_morning()));
        let log = Arc::new(Mutex::new(Vec::new()));

        // Registered out of order on purpose: the chain sorts by kind.
        let scraper = MockSource::new("scraper", PriceSourceKind::Scraped, Some(dec!(1590)))
            .with_log(Arc::clone(&log));
        let broker = MockSource::new("broker", PriceSourceKind::LiveBroker, None)
            .with_log(Arc::clone(&log));
        let svc = service(vec![scraper, broker], cache, clock);

        let outcome = svc.get_price(&infy()).await.unwrap();
        assert_eq!(outcome.source, PriceSourceKind::Scraped);
        assert_eq!(outcome.source_name, "scraper");
        assert_eq!(*log.lock().unwrap(), vec!["broker", "scraper"]);
    }

    #[tokio::test]
    async fn non_positive_price_counts_as_failure() {
        let cache = Arc::new(PriceCache::new());
        let clock = Arc::new(ManualClock::new(monday_morning()));
        let broker = MockSource::new("broker", PriceSourceKind::LiveBroker, Some(dec!(0)));
        let scraper = MockSource::new("scraper", PriceSourceKind::Scraped, Some(dec!(1590)));
        let svc = service(vec![broker, scraper], cache, clock);

        let outcome = svc.get_price(&infy()).await.unwrap();
        assert_eq!(outcome.price, dec!(1590));
        assert_eq!(outcome.source_name, "scraper");
    }

    #[tokio::test]
    async fn all_sources_fail_serves_stale_cache() {
        let cache = Arc::new(PriceCache::new());
        let clock = Arc::new(ManualClock::new(monday_morning()));
        let old = monday_morning() - ChronoDuration::hours(3);
        cache.upsert(cached("INFY", dec!(1480), old));

        let broker = MockSource::new("broker", PriceSourceKind::LiveBroker, None);
        let scraper = MockSource::new("scraper", PriceSourceKind::Scraped, None);
        let svc = service(vec![broker, scraper], Arc::clone(&cache), clock);

        let outcome = svc.get_price(&infy()).await.unwrap();
        assert!(outcome.stale);
        assert_eq!(outcome.source, PriceSourceKind::CachedFallback);
        assert_eq!(outcome.price, dec!(1480));
        assert_eq!(outcome.fetched_at, old);
        // The stale value is not re-stamped as fresh
        assert_eq!(cache.get("INFY").unwrap().fetched_at, old);
    }

    #[tokio::test]
    async fn nothing_cached_and_all_fail() {
        let cache = Arc::new(PriceCache::new());
        let clock = Arc::new(ManualClock::new(monday_morning()));
        let broker = MockSource::new("broker", PriceSourceKind::LiveBroker, None);
        let svc = service(vec![broker], Arc::clone(&cache), clock);

        let result = svc.get_price(&infy()).await;
        assert_eq!(result, Err(CoreError::NoPriceAvailable("INFY".into())));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn slow_source_times_out_and_falls_through() {
        let cache = Arc::new(PriceCache::new());
        let clock = Arc::new(ManualClock::new(monday_morning()));
        let broker = MockSource::new("broker", PriceSourceKind::LiveBroker, Some(dec!(1600)))
            .with_delay(Duration::from_secs(5));
        let scraper = MockSource::new("scraper", PriceSourceKind::Scraped, Some(dec!(1590)));
        let svc = service(vec![broker, scraper], cache, clock)
            .with_fetch_timeout(Duration::from_millis(50));

        let started = std::time::Instant::now();
        let outcome = svc.get_price(&infy()).await.unwrap();
        assert_eq!(outcome.source_name, "scraper");
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn becomes_stale_as_clock_advances() {
        let cache = Arc::new(PriceCache::new());
        let clock = Arc::new(ManualClock::new(monday_morning()));
        let broker = MockSource::new("broker", PriceSourceKind::LiveBroker, Some(dec!(1600)));
        let calls = broker.calls();
        let svc = service(vec![broker], cache, Arc::clone(&clock));

        svc.get_price(&infy()).await.unwrap();
        clock.advance(ChronoDuration::minutes(3));
        svc.get_price(&infy()).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        clock.advance(ChronoDuration::minutes(3));
        svc.get_price(&infy()).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}

// ═══════════════════════════════════════════════════════════════════
// PriceService — coalescing
// ═══════════════════════════════════════════════════════════════════

mod coalescing {
    use super::*;

    #[tokio::test]
    async fn concurrent_callers_share_one_fetch() {
        let cache = Arc::new(PriceCache::new());
        let clock = Arc::new(ManualClock::new(monday_morning()));
        let broker = MockSource::new("broker", PriceSourceKind::LiveBroker, Some(dec!(1600)))
            .with_delay(Duration::from_millis(50));
        let calls = broker.calls();
        let svc = service(vec![broker], cache, clock);

        let asset = infy();
        let results = futures::future::join_all((0..10).map(|_| svc.get_price(&asset))).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let first = results[0].clone().unwrap();
        for r in results {
            assert_eq!(r.unwrap(), first);
        }
        assert_eq!(svc.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn concurrent_callers_across_tasks() {
        let cache = Arc::new(PriceCache::new());
        let clock = Arc::new(ManualClock::new(monday_morning()));
        let broker = MockSource::new("broker", PriceSourceKind::LiveBroker, Some(dec!(1600)))
            .with_delay(Duration::from_millis(100));
        let calls = broker.calls();
        let svc = service(vec![broker], cache, clock);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let svc = svc.clone();
                tokio::spawn(async move { svc.get_price(&infy()).await })
            })
            .collect();
        for h in handles {
            assert_eq!(h.await.unwrap().unwrap().price, dec!(1600));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn shared_failure_reaches_every_caller() {
        let cache = Arc::new(PriceCache::new());
        let clock = Arc::new(ManualClock::new(monday_morning()));
        let broker = MockSource::new("broker", PriceSourceKind::LiveBroker, None)
            .with_delay(Duration::from_millis(30));
        let calls = broker.calls();
        let svc = service(vec![broker], cache, clock);

        let asset = infy();
        let results = futures::future::join_all((0..5).map(|_| svc.get_price(&asset))).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results
            .iter()
            .all(|r| *r == Err(CoreError::NoPriceAvailable("INFY".into()))));
    }
}

// ═══════════════════════════════════════════════════════════════════
// PriceService — fetch permits
// ═══════════════════════════════════════════════════════════════════

mod fetch_limits {
    use super::*;

    /// Sleeps per symbol and records how many fetches overlap.
    struct SlowSymbolSource {
        delays: Vec<(&'static str, Duration)>,
        active: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
        calls: Arc<AtomicUsize>,
    }

    impl SlowSymbolSource {
        fn new(delays: Vec<(&'static str, Duration)>) -> Self {
            Self {
                delays,
                active: Arc::new(AtomicUsize::new(0)),
                peak: Arc::new(AtomicUsize::new(0)),
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl PriceSource for SlowSymbolSource {
        fn name(&self) -> &str {
            "slow"
        }

        fn kind(&self) -> PriceSourceKind {
            PriceSourceKind::LiveBroker
        }

        fn supported_asset_classes(&self) -> Vec<AssetClass> {
            AssetClass::ALL.to_vec()
        }

        async fn fetch_price(&self, symbol: &str) -> Result<PriceQuote, CoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now_active, Ordering::SeqCst);

            let delay = self
                .delays
                .iter()
                .find(|(s, _)| *s == symbol)
                .map(|(_, d)| *d)
                .unwrap_or(Duration::ZERO);
            tokio::time::sleep(delay).await;

            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(PriceQuote {
                price: dec!(42),
                quoted_at: Utc::now(),
            })
        }
    }

    fn limited_service(source: SlowSymbolSource, cache: Arc<PriceCache>, permits: usize) -> PriceService {
        let chain = PriceSourceChain::new()
            .with_source(Arc::new(source))
            .with_source(Arc::new(CachedFallbackSource::new(Arc::clone(&cache))));
        PriceService::new(chain, cache, RefreshPolicy::default())
            .with_clock(Arc::new(ManualClock::new(monday_morning())))
            .with_fetch_timeout(Duration::from_secs(5))
            .with_max_concurrent_fetches(permits)
    }

    #[tokio::test]
    async fn abandoned_caller_does_not_hold_the_only_permit() {
        let cache = Arc::new(PriceCache::new());
        let source = SlowSymbolSource::new(vec![("SLOW", Duration::from_millis(800))]);
        let svc = limited_service(source, Arc::clone(&cache), 1);

        let slow = Asset::equity("SLOW", "Slow Co");
        let fast = Asset::equity("FAST", "Fast Co");

        // Give up on SLOW while its fetch holds the single permit.
        let abandoned = tokio::time::timeout(Duration::from_millis(50), svc.get_price(&slow)).await;
        assert!(abandoned.is_err());

        // FAST waits for SLOW's fetch to release the permit, then succeeds.
        let outcome = tokio::time::timeout(Duration::from_secs(2), svc.get_price(&fast))
            .await
            .expect("fetch for FAST never got a permit")
            .unwrap();
        assert_eq!(outcome.price, dec!(42));

        // The abandoned fetch ran to completion and left the in-flight map.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(svc.in_flight_count(), 0);
        assert_eq!(cache.price("SLOW"), Some(dec!(42)));
    }

    #[tokio::test]
    async fn late_caller_joins_fetch_started_by_abandoned_one() {
        let cache = Arc::new(PriceCache::new());
        let source = SlowSymbolSource::new(vec![("SLOW", Duration::from_millis(200))]);
        let calls = Arc::clone(&source.calls);
        let svc = limited_service(source, cache, 1);
        let slow = Asset::equity("SLOW", "Slow Co");

        let abandoned = tokio::time::timeout(Duration::from_millis(20), svc.get_price(&slow)).await;
        assert!(abandoned.is_err());
        assert_eq!(svc.in_flight_count(), 1);

        let outcome = svc.get_price(&slow).await.unwrap();
        assert!(outcome.refreshed);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cycle_never_exceeds_the_permit_count() {
        let symbols = ["A1", "A2", "A3", "A4", "A5", "A6"];
        let source = SlowSymbolSource::new(
            symbols.iter().map(|s| (*s, Duration::from_millis(50))).collect(),
        );
        let peak = Arc::clone(&source.peak);
        let calls = Arc::clone(&source.calls);
        let cache = Arc::new(PriceCache::new());
        let svc = limited_service(source, Arc::clone(&cache), 2);

        let assets: Vec<Asset> = symbols.iter().map(|s| Asset::equity(*s, *s)).collect();
        let result = svc.refresh_cycle(&assets).await;

        assert_eq!(result.refreshed_count(), 6);
        assert_eq!(calls.load(Ordering::SeqCst), 6);
        let peak = peak.load(Ordering::SeqCst);
        assert!(peak <= 2, "{peak} fetches ran at once");
        assert!(peak >= 1);
        assert_eq!(cache.len(), 6);
    }
}

// ═══════════════════════════════════════════════════════════════════
// PriceService — batch cycle
// ═══════════════════════════════════════════════════════════════════

mod cycle {
    use super::*;

    #[tokio::test]
    async fn refreshes_only_stale_symbols() {
        let cache = Arc::new(PriceCache::new());
        let clock = Arc::new(ManualClock::new(monday_morning()));
        cache.upsert(cached("INFY", dec!(1500), monday_morning() - ChronoDuration::minutes(1)));
        cache.upsert(cached("TCS", dec!(3800), monday_morning() - ChronoDuration::hours(1)));

        let broker = MockSource::new("broker", PriceSourceKind::LiveBroker, Some(dec!(100)));
        let calls = broker.calls();
        let svc = service(vec![broker], Arc::clone(&cache), clock);

        let assets = vec![
            infy(),
            Asset::equity("TCS", "TCS"),
            Asset::equity("WIPRO", "Wipro"),
        ];
        let result = svc.refresh_cycle(&assets).await;

        assert_eq!(result.results.len(), 3);
        assert_eq!(result.skipped_count(), 1);
        assert_eq!(result.refreshed_count(), 2);
        assert_eq!(result.failed_count(), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.price("INFY"), Some(dec!(1500)));
        assert_eq!(cache.price("WIPRO"), Some(dec!(100)));
    }

    #[tokio::test]
    async fn one_failure_does_not_abort_the_batch() {
        struct PickySource;

        #[async_trait]
        impl PriceSource for PickySource {
            fn name(&self) -> &str {
                "picky"
            }
            fn kind(&self) -> PriceSourceKind {
                PriceSourceKind::LiveBroker
            }
            fn supported_asset_classes(&self) -> Vec<AssetClass> {
                vec![AssetClass::Equity]
            }
            async fn fetch_price(&self, symbol: &str) -> Result<PriceQuote, CoreError> {
                if symbol == "BAD" {
                    Err(CoreError::source_fetch("picky", "unknown symbol"))
                } else {
                    Ok(PriceQuote {
                        price: dec!(10),
                        quoted_at: Utc::now(),
                    })
                }
            }
        }

        let cache = Arc::new(PriceCache::new());
        let clock = Arc::new(ManualClock::new(monday_morning()));
        let chain = PriceSourceChain::new()
            .with_source(Arc::new(PickySource))
            .with_source(Arc::new(CachedFallbackSource::new(Arc::clone(&cache))));
        let svc = PriceService::new(chain, cache, RefreshPolicy::default()).with_clock(clock);

        let result = svc
            .refresh_cycle(&[Asset::equity("GOOD", "Good"), Asset::equity("BAD", "Bad")])
            .await;
        assert!(result.get("GOOD").unwrap().is_ok());
        assert_eq!(
            result.get("BAD").unwrap(),
            &Err(CoreError::NoPriceAvailable("BAD".into()))
        );
        assert_eq!(result.failed_count(), 1);
    }

    #[tokio::test]
    async fn funds_and_bonds_are_priced() {
        let cache = Arc::new(PriceCache::new());
        let clock = Arc::new(ManualClock::new(monday_morning()));
        let nav = MockSource::new("nav", PriceSourceKind::Scraped, Some(dec!(58.31)));
        let manual = Arc::new(ManualPriceSource::new());
        let chain = PriceSourceChain::new()
            .with_source(Arc::new(NavOnly(nav)))
            .with_manual_prices(Arc::clone(&manual))
            .with_source(Arc::new(CachedFallbackSource::new(Arc::clone(&cache))));
        let svc = PriceService::new(chain, Arc::clone(&cache), RefreshPolicy::default())
            .with_clock(Arc::clone(&clock) as Arc<dyn Clock>);

        let fund = Asset::mutual_fund("120503", "Axis Bluechip");
        let bond = Asset::bond("GSEC2033", "7.26% GS 2033");
        let set = svc.set_manual_price(&bond, dec!(101.25)).unwrap();
        assert_eq!(set.source, PriceSourceKind::Manual);
        assert_eq!(cache.get("GSEC2033").unwrap().fetched_at, monday_morning());

        // An hour later both are stale and get refreshed from their own tiers.
        clock.advance(ChronoDuration::hours(1));
        let result = svc.refresh_cycle(&[fund, bond]).await;
        assert_eq!(result.failed_count(), 0);
        assert_eq!(result.degraded_count(), 0);

        let fund_outcome = result.get("120503").unwrap().as_ref().unwrap();
        assert_eq!(fund_outcome.source_name, "nav");
        assert_eq!(fund_outcome.price, dec!(58.31));

        let bond_outcome = result.get("GSEC2033").unwrap().as_ref().unwrap();
        assert_eq!(bond_outcome.source, PriceSourceKind::Manual);
        assert_eq!(bond_outcome.price, dec!(101.25));
        assert!(!bond_outcome.stale);
        assert_eq!(cache.get("GSEC2033").unwrap().fetched_at, clock.now());
    }

    #[tokio::test]
    async fn bond_without_manual_price_fails() {
        let cache = Arc::new(PriceCache::new());
        let clock = Arc::new(ManualClock::new(monday_morning()));
        let chain = PriceSourceChain::new()
            .with_manual_prices(Arc::new(ManualPriceSource::new()))
            .with_source(Arc::new(CachedFallbackSource::new(Arc::clone(&cache))));
        let svc = PriceService::new(chain, cache, RefreshPolicy::default()).with_clock(clock);

        let result = svc
            .refresh_cycle(&[Asset::bond("GSEC2033", "7.26% GS 2033")])
            .await;
        assert_eq!(result.failed_count(), 1);
    }

    #[tokio::test]
    async fn manual_price_is_validated() {
        let cache = Arc::new(PriceCache::new());
        let clock = Arc::new(ManualClock::new(monday_morning()));
        let bond = Asset::bond("GSEC2033", "7.26% GS 2033");

        let without_store = service(vec![], Arc::clone(&cache), Arc::clone(&clock));
        assert!(matches!(
            without_store.set_manual_price(&bond, dec!(100)),
            Err(CoreError::InvalidInput(_))
        ));
        assert!(!without_store.clear_manual_price(&bond));

        let chain = PriceSourceChain::new().with_manual_prices(Arc::new(ManualPriceSource::new()));
        let svc = PriceService::new(chain, Arc::clone(&cache), RefreshPolicy::default()).with_clock(clock);
        assert!(matches!(
            svc.set_manual_price(&bond, dec!(0)),
            Err(CoreError::ValidationError(_))
        ));
        assert!(cache.is_empty());

        svc.set_manual_price(&bond, dec!(100)).unwrap();
        assert!(svc.clear_manual_price(&bond));
        // The last published value stays in the cache.
        assert_eq!(cache.price("GSEC2033"), Some(dec!(100)));
    }

    #[tokio::test]
    async fn cycle_timestamps_come_from_the_clock() {
        let cache = Arc::new(PriceCache::new());
        let clock = Arc::new(ManualClock::new(monday_morning()));
        let svc = service(vec![], cache, Arc::clone(&clock));
        let result = svc.refresh_cycle(&[]).await;
        assert_eq!(result.started_at, monday_morning());
        assert_eq!(result.completed_at, monday_morning());
        assert!(result.results.is_empty());
    }
}
