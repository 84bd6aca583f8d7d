use std::time::Duration;

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Utc, Weekday};
use chrono_tz::Tz;
use tracing::debug;

use crate::config::{format_duration, MarketHoursConfig, RefreshConfig};
use crate::errors::CoreError;
use crate::models::asset::Asset;
use crate::models::price::{PriceCache, PriceCacheEntry};

/// A local trading window, e.g. 09:15–15:30 Asia/Kolkata on weekdays.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketHours {
    pub timezone: Tz,
    pub open: NaiveTime,
    pub close: NaiveTime,
    pub trading_days: Vec<Weekday>,
    pub holidays: Vec<NaiveDate>,
}

impl MarketHours {
    /// Build from configuration, validating every field.
    pub fn from_config(config: &MarketHoursConfig) -> Result<Self, CoreError> {
        let timezone: Tz = config.timezone.parse().map_err(|_| {
            CoreError::Config(format!("unknown timezone '{}'", config.timezone))
        })?;
        let open = parse_time(&config.open)?;
        let close = parse_time(&config.close)?;
        if close <= open {
            return Err(CoreError::Config(format!(
                "market close {close} must be after open {open}"
            )));
        }
        let trading_days = config
            .trading_days
            .iter()
            .map(|d| {
                d.trim()
                    .parse::<Weekday>()
                    .map_err(|_| CoreError::Config(format!("unknown weekday '{d}'")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            timezone,
            open,
            close,
            trading_days,
            holidays: config.holidays.clone(),
        })
    }

    /// Whether `at` falls inside the window (both bounds inclusive).
    pub fn is_open(&self, at: DateTime<Utc>) -> bool {
        let local = at.with_timezone(&self.timezone);
        let date = local.date_naive();
        if !self.trading_days.contains(&local.weekday()) || self.holidays.contains(&date) {
            return false;
        }
        let time = local.time();
        time >= self.open && time <= self.close
    }

    /// Calendar date in the market's timezone.
    pub fn local_date(&self, at: DateTime<Utc>) -> NaiveDate {
        at.with_timezone(&self.timezone).date_naive()
    }

    /// Whether `at` is on a trading day and past the closing bell.
    pub fn is_after_close(&self, at: DateTime<Utc>) -> bool {
        let local = at.with_timezone(&self.timezone);
        self.trading_days.contains(&local.weekday())
            && !self.holidays.contains(&local.date_naive())
            && local.time() > self.close
    }
}

impl Default for MarketHours {
    fn default() -> Self {
        Self {
            timezone: chrono_tz::Asia::Kolkata,
            open: NaiveTime::from_hms_opt(9, 15, 0).unwrap_or(NaiveTime::MIN),
            close: NaiveTime::from_hms_opt(15, 30, 0).unwrap_or(NaiveTime::MIN),
            trading_days: vec![
                Weekday::Mon,
                Weekday::Tue,
                Weekday::Wed,
                Weekday::Thu,
                Weekday::Fri,
            ],
            holidays: Vec::new(),
        }
    }
}

fn parse_time(s: &str) -> Result<NaiveTime, CoreError> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .map_err(|_| CoreError::Config(format!("invalid time '{s}', expected HH:MM")))
}

/// Result of a staleness check.
#[derive(Debug, Clone, PartialEq)]
pub struct StalenessCheck {
    pub is_stale: bool,
    pub age: Option<Duration>,
    pub threshold: Duration,
}

impl StalenessCheck {
    pub fn stale(age: Duration, threshold: Duration) -> Self {
        Self { is_stale: true, age: Some(age), threshold }
    }

    pub fn fresh(age: Duration, threshold: Duration) -> Self {
        Self { is_stale: false, age: Some(age), threshold }
    }

    pub fn missing(threshold: Duration) -> Self {
        Self { is_stale: true, age: None, threshold }
    }
}

/// Assets split by whether their cached price can be reused.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RefreshPlan {
    pub fresh: Vec<Asset>,
    pub stale: Vec<Asset>,
}

/// Decides when a cached price must be refetched.
///
/// Inside market hours prices move and the short interval applies; outside
/// them the long interval keeps rate-limited sources quiet.
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshPolicy {
    pub market_hours: MarketHours,
    pub market_interval: Duration,
    pub off_market_interval: Duration,
}

impl RefreshPolicy {
    pub fn new(market_hours: MarketHours, market_interval: Duration, off_market_interval: Duration) -> Self {
        Self {
            market_hours,
            market_interval,
            off_market_interval,
        }
    }

    pub fn from_config(refresh: &RefreshConfig, hours: &MarketHoursConfig) -> Result<Self, CoreError> {
        Ok(Self::new(
            MarketHours::from_config(hours)?,
            refresh.market_interval,
            refresh.off_market_interval,
        ))
    }

    /// The staleness threshold in force at `now`.
    pub fn active_interval(&self, now: DateTime<Utc>) -> Duration {
        if self.market_hours.is_open(now) {
            self.market_interval
        } else {
            self.off_market_interval
        }
    }

    /// Check a cache entry. A missing entry is always stale.
    pub fn check(&self, entry: Option<&PriceCacheEntry>, now: DateTime<Utc>) -> StalenessCheck {
        let threshold = self.active_interval(now);
        match entry {
            Some(e) => {
                // An entry stamped in the future counts as brand new.
                let age = (now - e.fetched_at).to_std().unwrap_or(Duration::ZERO);
                if age > threshold {
                    StalenessCheck::stale(age, threshold)
                } else {
                    StalenessCheck::fresh(age, threshold)
                }
            }
            None => StalenessCheck::missing(threshold),
        }
    }

    pub fn is_stale(&self, entry: Option<&PriceCacheEntry>, now: DateTime<Utc>) -> bool {
        self.check(entry, now).is_stale
    }

    /// Partition `assets` into reusable and refetch-needed, in input order.
    /// Duplicate symbols are planned once, even across asset classes; the
    /// first asset seen decides which class's sources are walked.
    pub fn plan(&self, assets: &[Asset], cache: &PriceCache, now: DateTime<Utc>) -> RefreshPlan {
        let mut plan = RefreshPlan::default();
        let mut seen = std::collections::HashSet::new();

        for asset in assets {
            if !seen.insert(asset.symbol.clone()) {
                continue;
            }
            let check = self.check(cache.get(&asset.symbol).as_ref(), now);
            debug!(
                symbol = %asset.symbol,
                age = %check.age.map(format_duration).unwrap_or_else(|| "never".into()),
                threshold = %format_duration(check.threshold),
                status = if check.is_stale { "stale" } else { "fresh" },
                "price staleness check"
            );
            if check.is_stale {
                plan.stale.push(asset.clone());
            } else {
                plan.fresh.push(asset.clone());
            }
        }

        plan
    }
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        let refresh = RefreshConfig::default();
        Self::new(
            MarketHours::default(),
            refresh.market_interval,
            refresh.off_market_interval,
        )
    }
}
