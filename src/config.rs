use crate::data_structures::Symbol;
use crate::utils::parse_date;
use chrono::NaiveDate;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::time::Duration;

pub const DEFAULT_TICKERS: [&str; 21] = [
    "AAPL", "MSFT", "GOOGL", "AMZN", "META", "TSLA", "NVDA", "JPM", "V", "JNJ", "WMT", "BAC", "MC", "PG",
    "DIS", "PYPL", "NFLX", "XOM", "ORCL", "PFE", "NKE",
];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse YAML config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid value for {key}: '{value}'")]
    Invalid { key: &'static str, value: String },
}

fn invalid(key: &'static str, value: impl ToString) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
    }
}

// --- YAML layout ---

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct DashboardYaml {
    pub tickers: Vec<String>,
    pub market_timezone: String,
    pub default_start: String,
}

impl Default for DashboardYaml {
    fn default() -> Self {
        Self {
            tickers: DEFAULT_TICKERS.iter().map(|t| t.to_string()).collect(),
            market_timezone: "America/New_York".to_string(),
            default_start: "2018-01-01".to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct CacheYaml {
    pub capacity: usize,
    pub ttl_secs: u64, // 0 disables expiry
}

impl Default for CacheYaml {
    fn default() -> Self {
        Self {
            capacity: 256,
            ttl_secs: 900,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct UpstreamYaml {
    pub base_url: String,
    pub cookie_url: String, // empty disables crumb authentication
    pub timeout_secs: u64,
    pub rate_limit_per_minute: u32,
    pub max_attempts: u32,
    pub random_agent: bool,
}

impl Default for UpstreamYaml {
    fn default() -> Self {
        Self {
            base_url: "https://query2.finance.yahoo.com".to_string(),
            cookie_url: "https://fc.yahoo.com".to_string(),
            timeout_secs: 30,
            rate_limit_per_minute: 60,
            max_attempts: 3,
            random_agent: true,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct RateLimitYaml {
    pub per_second: u64,
    pub burst: u32,
}

impl Default for RateLimitYaml {
    fn default() -> Self {
        Self {
            per_second: 10,
            burst: 20,
        }
    }
}

// YAML-serializable configuration structure
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ConfigYaml {
    pub node_name: String,
    pub environment: String,
    pub port: u16,
    pub dashboard: DashboardYaml,
    pub cache: CacheYaml,
    pub upstream: UpstreamYaml,
    pub rate_limit: RateLimitYaml,
}

impl Default for ConfigYaml {
    fn default() -> Self {
        Self {
            node_name: "stockdash".to_string(),
            environment: "development".to_string(),
            port: 8888,
            dashboard: DashboardYaml::default(),
            cache: CacheYaml::default(),
            upstream: UpstreamYaml::default(),
            rate_limit: RateLimitYaml::default(),
        }
    }
}

// --- Resolved settings ---

/// What the request builder needs to fill in defaults.
#[derive(Clone, Debug)]
pub struct DashboardSettings {
    pub tickers: Vec<Symbol>,
    pub market_timezone: Tz,
    pub default_start: NaiveDate,
}

impl Default for DashboardSettings {
    fn default() -> Self {
        Self {
            tickers: DEFAULT_TICKERS.iter().filter_map(|t| Symbol::parse(t).ok()).collect(),
            market_timezone: chrono_tz::America::New_York,
            default_start: NaiveDate::from_ymd_opt(2018, 1, 1).unwrap_or_default(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct CacheConfig {
    pub capacity: usize,
    pub ttl: Option<Duration>,
}

#[derive(Clone, Debug)]
pub struct UpstreamConfig {
    pub base_url: String,
    pub cookie_url: Option<String>,
    pub timeout: Duration,
    pub rate_limit_per_minute: u32,
    pub max_attempts: u32,
    pub random_agent: bool,
}

#[derive(Clone, Debug)]
pub struct ApiRateLimit {
    pub per_second: u64,
    pub burst: u32,
}

// Holds application-wide settings
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub node_name: String,
    pub environment: String,
    pub port: u16,
    pub dashboard: DashboardSettings,
    pub cache: CacheConfig,
    pub upstream: UpstreamConfig,
    pub rate_limit: ApiRateLimit,
}

impl AppConfig {
    /// Load configuration from the YAML file named by `CONFIG_FILE`, or from
    /// environment variables when it is unset.
    pub fn load() -> Result<Self, ConfigError> {
        if let Ok(config_file) = env::var("CONFIG_FILE") {
            Self::from_yaml_file(&config_file)
        } else {
            Self::from_env()
        }
    }

    pub fn from_yaml_file(file_path: &str) -> Result<Self, ConfigError> {
        let yaml_content = fs::read_to_string(file_path).map_err(|source| ConfigError::Read {
            path: file_path.to_string(),
            source,
        })?;
        Self::from_yaml(&yaml_content)
    }

    pub fn from_yaml(yaml_content: &str) -> Result<Self, ConfigError> {
        let yaml_config: ConfigYaml = serde_yaml::from_str(yaml_content)?;
        Self::resolve(yaml_config)
    }

    // Load all configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup, falling back to
    /// defaults for absent keys.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut yaml = ConfigYaml::default();

        if let Some(v) = lookup("NODE_NAME") {
            yaml.node_name = v;
        }
        if let Some(v) = lookup("ENVIRONMENT") {
            yaml.environment = v;
        }
        if let Some(v) = lookup("PORT") {
            yaml.port = v.trim().parse().map_err(|_| invalid("PORT", &v))?;
        }
        if let Some(v) = lookup("TICKERS") {
            yaml.dashboard.tickers = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(v) = lookup("MARKET_TIMEZONE") {
            yaml.dashboard.market_timezone = v;
        }
        if let Some(v) = lookup("DEFAULT_START") {
            yaml.dashboard.default_start = v;
        }
        if let Some(v) = lookup("CACHE_CAPACITY") {
            yaml.cache.capacity = v.trim().parse().map_err(|_| invalid("CACHE_CAPACITY", &v))?;
        }
        if let Some(v) = lookup("CACHE_TTL_SECS") {
            yaml.cache.ttl_secs = v.trim().parse().map_err(|_| invalid("CACHE_TTL_SECS", &v))?;
        }
        if let Some(v) = lookup("YAHOO_BASE_URL") {
            yaml.upstream.base_url = v;
        }
        if let Some(v) = lookup("YAHOO_COOKIE_URL") {
            yaml.upstream.cookie_url = v;
        }
        if let Some(v) = lookup("UPSTREAM_TIMEOUT_SECS") {
            yaml.upstream.timeout_secs = v.trim().parse().map_err(|_| invalid("UPSTREAM_TIMEOUT_SECS", &v))?;
        }
        if let Some(v) = lookup("RATE_LIMIT_PER_MINUTE") {
            yaml.upstream.rate_limit_per_minute =
                v.trim().parse().map_err(|_| invalid("RATE_LIMIT_PER_MINUTE", &v))?;
        }
        if let Some(v) = lookup("MAX_ATTEMPTS") {
            yaml.upstream.max_attempts = v.trim().parse().map_err(|_| invalid("MAX_ATTEMPTS", &v))?;
        }
        if let Some(v) = lookup("RANDOM_AGENT") {
            yaml.upstream.random_agent = v.trim().parse().map_err(|_| invalid("RANDOM_AGENT", &v))?;
        }
        if let Some(v) = lookup("API_RATE_PER_SECOND") {
            yaml.rate_limit.per_second = v.trim().parse().map_err(|_| invalid("API_RATE_PER_SECOND", &v))?;
        }
        if let Some(v) = lookup("API_RATE_BURST") {
            yaml.rate_limit.burst = v.trim().parse().map_err(|_| invalid("API_RATE_BURST", &v))?;
        }

        Self::resolve(yaml)
    }

    /// Validates raw settings and converts them into typed values.
    pub fn resolve(yaml: ConfigYaml) -> Result<Self, ConfigError> {
        let tickers = yaml
            .dashboard
            .tickers
            .iter()
            .map(|t| Symbol::parse(t).map_err(|_| invalid("tickers", t)))
            .collect::<Result<Vec<_>, _>>()?;

        let market_timezone: Tz = yaml
            .dashboard
            .market_timezone
            .parse()
            .map_err(|_| invalid("market_timezone", &yaml.dashboard.market_timezone))?;

        let default_start = parse_date(&yaml.dashboard.default_start)
            .map_err(|_| invalid("default_start", &yaml.dashboard.default_start))?;

        if yaml.upstream.base_url.trim().is_empty() {
            return Err(invalid("base_url", &yaml.upstream.base_url));
        }
        if yaml.upstream.max_attempts == 0 {
            return Err(invalid("max_attempts", yaml.upstream.max_attempts));
        }
        if yaml.rate_limit.per_second == 0 || yaml.rate_limit.burst == 0 {
            return Err(invalid(
                "rate_limit",
                format!("{}/{}", yaml.rate_limit.per_second, yaml.rate_limit.burst),
            ));
        }

        let cookie_url = Some(yaml.upstream.cookie_url.trim().to_string()).filter(|u| !u.is_empty());

        Ok(Self {
            node_name: yaml.node_name,
            environment: yaml.environment,
            port: yaml.port,
            dashboard: DashboardSettings {
                tickers,
                market_timezone,
                default_start,
            },
            cache: CacheConfig {
                capacity: yaml.cache.capacity,
                ttl: (yaml.cache.ttl_secs > 0).then(|| Duration::from_secs(yaml.cache.ttl_secs)),
            },
            upstream: UpstreamConfig {
                base_url: yaml.upstream.base_url.trim_end_matches('/').to_string(),
                cookie_url,
                timeout: Duration::from_secs(yaml.upstream.timeout_secs),
                rate_limit_per_minute: yaml.upstream.rate_limit_per_minute,
                max_attempts: yaml.upstream.max_attempts,
                random_agent: yaml.upstream.random_agent,
            },
            rate_limit: ApiRateLimit {
                per_second: yaml.rate_limit.per_second,
                burst: yaml.rate_limit.burst,
            },
        })
    }
}
