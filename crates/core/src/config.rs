use std::path::Path;
use std::time::Duration;

use serde::{de, Deserialize, Deserializer, Serialize};

use crate::errors::CoreError;

/// Top-level engine configuration, usually loaded from a TOML file.
///
/// Every section falls back to its defaults, so an empty document is valid.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub refresh: RefreshConfig,
    pub market_hours: MarketHoursConfig,
    pub sources: SourcesConfig,
}

impl EngineConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, CoreError> {
        let config: EngineConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    /// Apply overrides from the process environment.
    pub fn with_env_overrides(self) -> Result<Self, CoreError> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup.
    ///
    /// Recognized keys:
    /// - `PORTFOLIO_REFRESH_INTERVAL`: scheduler poll interval in seconds
    /// - `BROKER_BASE_URL`, `BROKER_APP_ID`, `BROKER_ACCESS_TOKEN`
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, CoreError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(secs) = lookup("PORTFOLIO_REFRESH_INTERVAL") {
            let secs: u64 = secs.trim().parse().map_err(|_| {
                CoreError::Config(format!(
                    "PORTFOLIO_REFRESH_INTERVAL must be a number of seconds, got '{secs}'"
                ))
            })?;
            self.refresh.poll_interval = Duration::from_secs(secs);
        }

        let app_id = lookup("BROKER_APP_ID");
        let token = lookup("BROKER_ACCESS_TOKEN");
        if app_id.is_some() || token.is_some() {
            let broker = self.sources.broker.get_or_insert_with(BrokerConfig::default);
            if let Some(app_id) = app_id {
                broker.app_id = app_id;
            }
            if let Some(token) = token {
                broker.access_token = token;
            }
        }
        if let Some(url) = lookup("BROKER_BASE_URL") {
            self.sources
                .broker
                .get_or_insert_with(BrokerConfig::default)
                .base_url = url;
        }

        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> Result<(), CoreError> {
        let r = &self.refresh;
        if r.market_interval.is_zero() || r.off_market_interval.is_zero() {
            return Err(CoreError::Config(
                "refresh intervals must be greater than zero".into(),
            ));
        }
        if r.poll_interval.is_zero() {
            return Err(CoreError::Config("poll_interval must be greater than zero".into()));
        }
        if r.fetch_timeout.is_zero() {
            return Err(CoreError::Config("fetch_timeout must be greater than zero".into()));
        }
        if r.max_concurrent_fetches == 0 {
            return Err(CoreError::Config(
                "max_concurrent_fetches must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

fn default_market_interval() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_off_market_interval() -> Duration {
    Duration::from_secs(60 * 60)
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_fetch_timeout() -> Duration {
    Duration::from_secs(8)
}

/// Refresh cadence and source-call limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    /// Staleness threshold while the market is open.
    #[serde(deserialize_with = "deserialize_duration", serialize_with = "serialize_duration")]
    pub market_interval: Duration,

    /// Staleness threshold while the market is closed.
    #[serde(deserialize_with = "deserialize_duration", serialize_with = "serialize_duration")]
    pub off_market_interval: Duration,

    /// How often the scheduler runs a refresh cycle.
    #[serde(deserialize_with = "deserialize_duration", serialize_with = "serialize_duration")]
    pub poll_interval: Duration,

    /// Per-source call timeout.
    #[serde(deserialize_with = "deserialize_duration", serialize_with = "serialize_duration")]
    pub fetch_timeout: Duration,

    /// Upper bound on simultaneous remote source calls.
    pub max_concurrent_fetches: usize,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            market_interval: default_market_interval(),
            off_market_interval: default_off_market_interval(),
            poll_interval: default_poll_interval(),
            fetch_timeout: default_fetch_timeout(),
            max_concurrent_fetches: 4,
        }
    }
}

/// Local trading window. Times are `HH:MM` in `timezone`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketHoursConfig {
    pub timezone: String,
    pub open: String,
    pub close: String,
    /// Weekday names, e.g. `["Mon", "Tue"]`.
    pub trading_days: Vec<String>,
    /// Exchange holidays (`YYYY-MM-DD`), treated as closed all day.
    pub holidays: Vec<chrono::NaiveDate>,
}

impl Default for MarketHoursConfig {
    fn default() -> Self {
        Self {
            timezone: "Asia/Kolkata".to_string(),
            open: "09:15".to_string(),
            close: "15:30".to_string(),
            trading_days: ["Mon", "Tue", "Wed", "Thu", "Fri"]
                .iter()
                .map(|d| d.to_string())
                .collect(),
            holidays: Vec::new(),
        }
    }
}

/// Which price sources are enabled and how to reach them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    /// Live broker quotes. Absent means no live source.
    pub broker: Option<BrokerConfig>,

    pub yahoo_enabled: bool,

    /// Exchange suffix appended to symbols for Yahoo (e.g. `.NS`).
    pub yahoo_symbol_suffix: String,

    pub screener_enabled: bool,

    pub screener_base_url: String,

    /// Mutual fund NAVs from the AMFI daily file.
    pub amfi_enabled: bool,

    pub amfi_nav_url: String,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            broker: None,
            yahoo_enabled: true,
            yahoo_symbol_suffix: ".NS".to_string(),
            screener_enabled: false,
            screener_base_url: "https://www.tickertape.in/stocks".to_string(),
            amfi_enabled: true,
            amfi_nav_url: "https://www.amfiindia.com/spages/NAVAll.txt".to_string(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub base_url: String,
    pub app_id: String,
    pub access_token: String,
    /// Symbol template; `{symbol}` is replaced by the holding symbol.
    pub symbol_format: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api-t1.fyers.in/data".to_string(),
            app_id: String::new(),
            access_token: String::new(),
            symbol_format: "NSE:{symbol}-EQ".to_string(),
        }
    }
}

impl std::fmt::Debug for BrokerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerConfig")
            .field("base_url", &self.base_url)
            .field("app_id", &self.app_id)
            .field("access_token", &"<redacted>")
            .field("symbol_format", &self.symbol_format)
            .finish()
    }
}

/// Parse a duration string like "5m", "1h", "8s" or "1d".
///
/// The input is case-insensitive and whitespace is trimmed.
pub fn parse_duration(s: &str) -> Result<Duration, CoreError> {
    let s = s.trim().to_lowercase();
    let (num, multiplier) = if let Some(n) = s.strip_suffix('d') {
        (n, 24 * 60 * 60)
    } else if let Some(n) = s.strip_suffix('h') {
        (n, 60 * 60)
    } else if let Some(n) = s.strip_suffix('m') {
        (n, 60)
    } else if let Some(n) = s.strip_suffix('s') {
        (n, 1)
    } else {
        return Err(CoreError::Config(format!(
            "duration '{s}' must end with d, h, m, or s"
        )));
    };

    let num: u64 = num
        .trim()
        .parse()
        .map_err(|_| CoreError::Config(format!("invalid number in duration '{s}'")))?;
    let secs = num
        .checked_mul(multiplier)
        .ok_or_else(|| CoreError::Config(format!("duration '{s}' is too large")))?;
    Ok(Duration::from_secs(secs))
}

/// Format a duration using the largest unit that divides it exactly.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs > 0 && secs % (24 * 60 * 60) == 0 {
        format!("{}d", secs / (24 * 60 * 60))
    } else if secs > 0 && secs % (60 * 60) == 0 {
        format!("{}h", secs / (60 * 60))
    } else if secs > 0 && secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{secs}s")
    }
}

/// Accepts either a duration string ("5m") or a number of seconds.
pub fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Seconds(u64),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Text(s) => parse_duration(&s).map_err(de::Error::custom),
        Raw::Seconds(secs) => Ok(Duration::from_secs(secs)),
    }
}

pub fn serialize_duration<S>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&format_duration(*d))
}
