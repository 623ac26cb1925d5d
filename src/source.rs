use crate::data_structures::{DateRange, FundamentalsSnapshot, Symbol};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Failure reported by an upstream market-data source.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("malformed payload: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("symbol not found: {0}")]
    NotFound(String),

    #[error("no data: {0}")]
    NoData(String),

    #[error("rate limited by upstream")]
    RateLimit,

    #[error("unexpected status {0}")]
    Status(u16),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// One daily bar as delivered by the source. Any value may be missing.
#[derive(Debug, Clone, PartialEq)]
pub struct RawBar {
    pub date: NaiveDate,
    pub close: Option<f64>,
    pub adj_close: Option<f64>,
    pub volume: Option<u64>,
}

/// Upstream market-data provider.
///
/// `history` may return bars slightly outside the requested range; callers
/// filter. Fundamentals are not date-ranged upstream.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    fn name(&self) -> &'static str;

    async fn history(&self, symbol: &Symbol, range: DateRange) -> Result<Vec<RawBar>, UpstreamError>;

    async fn snapshot(&self, symbol: &Symbol) -> Result<FundamentalsSnapshot, UpstreamError>;
}

// --- In-memory source ---

/// Failure an [`InMemorySource`] should report for a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    NotFound,
    NoData,
    RateLimit,
    Status(u16),
}

impl Failure {
    fn to_error(self, symbol: &Symbol) -> UpstreamError {
        match self {
            Failure::NotFound => UpstreamError::NotFound(symbol.to_string()),
            Failure::NoData => UpstreamError::NoData(symbol.to_string()),
            Failure::RateLimit => UpstreamError::RateLimit,
            Failure::Status(code) => UpstreamError::Status(code),
        }
    }
}

/// Fixture-backed source for tests and offline runs. Unknown symbols are `NotFound`.
#[derive(Default)]
pub struct InMemorySource {
    histories: HashMap<String, Vec<RawBar>>,
    snapshots: HashMap<String, FundamentalsSnapshot>,
    failures: HashMap<String, Failure>,
    latency: Option<Duration>,
    history_calls: AtomicUsize,
    snapshot_calls: AtomicUsize,
    requested: Mutex<Vec<String>>,
}

impl InMemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_history(mut self, symbol: &str, bars: Vec<RawBar>) -> Self {
        self.histories.insert(symbol.to_string(), bars);
        self
    }

    /// Convenience for fixtures with complete bars: adjusted close equals close.
    pub fn with_closes(self, symbol: &str, closes: &[(NaiveDate, f64, u64)]) -> Self {
        let bars = closes
            .iter()
            .map(|&(date, close, volume)| RawBar {
                date,
                close: Some(close),
                adj_close: Some(close),
                volume: Some(volume),
            })
            .collect();
        self.with_history(symbol, bars)
    }

    pub fn with_snapshot(mut self, symbol: &str, snapshot: FundamentalsSnapshot) -> Self {
        self.snapshots.insert(symbol.to_string(), snapshot);
        self
    }

    pub fn with_failure(mut self, symbol: &str, failure: Failure) -> Self {
        self.failures.insert(symbol.to_string(), failure);
        self
    }

    /// Delay every response, like a slow network.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn history_calls(&self) -> usize {
        self.history_calls.load(Ordering::SeqCst)
    }

    pub fn snapshot_calls(&self) -> usize {
        self.snapshot_calls.load(Ordering::SeqCst)
    }

    /// Symbols requested so far, in call order.
    pub fn requested(&self) -> Vec<String> {
        self.requested.lock().map(|r| r.clone()).unwrap_or_default()
    }

    async fn record(&self, symbol: &Symbol) {
        if let Ok(mut requested) = self.requested.lock() {
            requested.push(symbol.to_string());
        }
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl MarketDataSource for InMemorySource {
    fn name(&self) -> &'static str {
        "in-memory"
    }

    async fn history(&self, symbol: &Symbol, _range: DateRange) -> Result<Vec<RawBar>, UpstreamError> {
        self.history_calls.fetch_add(1, Ordering::SeqCst);
        self.record(symbol).await;
        if let Some(failure) = self.failures.get(symbol.as_str()) {
            return Err(failure.to_error(symbol));
        }
        self.histories
            .get(symbol.as_str())
            .cloned()
            .ok_or_else(|| UpstreamError::NotFound(symbol.to_string()))
    }

    async fn snapshot(&self, symbol: &Symbol) -> Result<FundamentalsSnapshot, UpstreamError> {
        self.snapshot_calls.fetch_add(1, Ordering::SeqCst);
        self.record(symbol).await;
        if let Some(failure) = self.failures.get(symbol.as_str()) {
            return Err(failure.to_error(symbol));
        }
        if let Some(snapshot) = self.snapshots.get(symbol.as_str()) {
            return Ok(snapshot.clone());
        }
        if self.histories.contains_key(symbol.as_str()) {
            return Ok(FundamentalsSnapshot::default());
        }
        Err(UpstreamError::NotFound(symbol.to_string()))
    }
}
