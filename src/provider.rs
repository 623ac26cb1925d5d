use crate::config::CacheConfig;
use crate::data_structures::{
    CompanyProfile, DateRange, EarningsRow, EarningsTable, FundamentalsSnapshot, History, HolderRow, HoldersTable,
    PriceSeries, RecommendationRow, RecommendationsTable, Series, StatementTable, StockBundle, Symbol,
};
use crate::error::DashError;
use crate::source::{MarketDataSource, RawBar, UpstreamError};
use crate::utils::MemoCache;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};
use tracing::{info, instrument, warn};

pub const MAX_RECOMMENDATIONS: usize = 10;

/// Which upstream operation failed; decides how `NoData` is reported.
#[derive(Debug, Clone, Copy)]
enum Query {
    History(DateRange),
    Snapshot,
}

/// Maps an upstream failure onto the error kind the dashboard shows.
fn classify(symbol: &Symbol, query: Query, error: UpstreamError) -> DashError {
    match (error, query) {
        (UpstreamError::NotFound(_), _) => DashError::InvalidSymbol(symbol.to_string()),
        (UpstreamError::NoData(_), Query::History(range)) => DashError::EmptyRange {
            symbol: symbol.to_string(),
            start: range.start,
            end: range.end,
        },
        (UpstreamError::NoData(_), Query::Snapshot) => DashError::missing(symbol, "fundamentals"),
        (other, _) => DashError::UpstreamUnavailable(other.to_string()),
    }
}

/// Drops bars outside the range or lacking a price or volume, then
/// de-duplicates by date (last bar wins).
pub fn clean_history(bars: Vec<RawBar>, range: DateRange) -> History {
    let points: Vec<_> = bars
        .into_iter()
        .filter(|bar| range.contains(bar.date))
        .filter_map(|bar| {
            let price = bar.adj_close.or(bar.close).filter(|p| p.is_finite() && *p >= 0.0)?;
            let volume = bar.volume?;
            Some((bar.date, (price, volume)))
        })
        .collect();

    let combined = Series::from_points(points);
    History {
        prices: combined.with_values(combined.values().iter().map(|(p, _)| *p).collect()),
        volumes: combined.with_values(combined.values().iter().map(|(_, v)| *v).collect()),
    }
}

pub type SharedProvider = Arc<DataProvider>;

type Slot<V> = Arc<OnceCell<V>>;

/// Returns the cell for `key`, creating it if absent. The lock is held only
/// for the lookup; callers initialize the cell after it is released, so
/// concurrent requests for one key await a single upstream call.
async fn slot<K, V>(cache: &Mutex<MemoCache<K, Slot<V>>>, key: &K) -> Slot<V>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
{
    let mut cache = cache.lock().await;
    if let Some(slot) = cache.get(key) {
        return slot;
    }
    let slot = Arc::new(OnceCell::new());
    cache.insert(key.clone(), slot.clone());
    slot
}

/// Retrieves and cleans raw market data, memoizing each upstream operation
/// in its own bounded cache. Failures are never cached: a failed fetch
/// leaves its cell empty and the next caller retries.
pub struct DataProvider {
    source: Arc<dyn MarketDataSource>,
    history_cache: Mutex<MemoCache<(Symbol, DateRange), Slot<History>>>,
    snapshot_cache: Mutex<MemoCache<Symbol, Slot<Arc<FundamentalsSnapshot>>>>,
}

impl DataProvider {
    pub fn new(source: Arc<dyn MarketDataSource>, cache: &CacheConfig) -> Self {
        Self {
            source,
            history_cache: Mutex::new(MemoCache::new("history", cache.capacity, cache.ttl)),
            snapshot_cache: Mutex::new(MemoCache::new("snapshot", cache.capacity, cache.ttl)),
        }
    }

    pub fn source_name(&self) -> &'static str {
        self.source.name()
    }

    /// Price and volume for the trading days in `range`.
    #[instrument(skip(self, symbol), fields(symbol = %symbol))]
    pub async fn history(&self, symbol: &Symbol, range: DateRange) -> Result<History, DashError> {
        let slot = slot(&self.history_cache, &(symbol.clone(), range)).await;
        let history = slot
            .get_or_try_init(|| self.load_history(symbol, range))
            .await?;
        Ok(history.clone())
    }

    async fn load_history(&self, symbol: &Symbol, range: DateRange) -> Result<History, DashError> {
        let bars = self.source.history(symbol, range).await.map_err(|e| {
            warn!(source = self.source.name(), error = %e, "History request failed");
            classify(symbol, Query::History(range), e)
        })?;
        let raw_bars = bars.len();
        let history = clean_history(bars, range);

        if history.prices.is_empty() {
            return Err(DashError::EmptyRange {
                symbol: symbol.to_string(),
                start: range.start,
                end: range.end,
            });
        }

        info!(raw_bars, trading_days = history.prices.len(), "Loaded history");
        Ok(history)
    }

    pub async fn prices(&self, symbol: &Symbol, range: DateRange) -> Result<PriceSeries, DashError> {
        Ok(self.history(symbol, range).await?.prices)
    }

    #[instrument(skip(self, symbol), fields(symbol = %symbol))]
    async fn snapshot(&self, symbol: &Symbol) -> Result<Arc<FundamentalsSnapshot>, DashError> {
        let slot = slot(&self.snapshot_cache, symbol).await;
        let snapshot = slot
            .get_or_try_init(|| async {
                let snapshot = self.source.snapshot(symbol).await.map_err(|e| {
                    warn!(source = self.source.name(), error = %e, "Fundamentals request failed");
                    classify(symbol, Query::Snapshot, e)
                })?;
                info!("Loaded fundamentals");
                Ok::<_, DashError>(Arc::new(snapshot))
            })
            .await?;
        Ok(snapshot.clone())
    }

    pub async fn profile(&self, symbol: &Symbol) -> Result<CompanyProfile, DashError> {
        let snapshot = self.snapshot(symbol).await?;
        Ok(CompanyProfile::new(symbol.clone(), snapshot.profile.iter().copied()))
    }

    pub async fn financials(&self, symbol: &Symbol) -> Result<StatementTable, DashError> {
        let snapshot = self.snapshot(symbol).await?;
        statement(symbol, snapshot.income_statements.as_deref(), "financials")
    }

    pub async fn balance_sheet(&self, symbol: &Symbol) -> Result<StatementTable, DashError> {
        let snapshot = self.snapshot(symbol).await?;
        statement(symbol, snapshot.balance_sheets.as_deref(), "balance sheet")
    }

    pub async fn earnings(&self, symbol: &Symbol) -> Result<EarningsTable, DashError> {
        let snapshot = self.snapshot(symbol).await?;
        let raw = snapshot
            .earnings
            .as_deref()
            .ok_or_else(|| DashError::missing(symbol, "earnings"))?;

        let mut rows: Vec<EarningsRow> = raw
            .iter()
            .filter_map(|row| {
                Some(EarningsRow {
                    year: row.year,
                    revenue: row.revenue?,
                    earnings: row.earnings?,
                })
            })
            .collect();
        rows.sort_by_key(|row| row.year);

        if rows.is_empty() {
            return Err(DashError::missing(symbol, "earnings"));
        }
        Ok(EarningsTable { rows })
    }

    pub async fn holders(&self, symbol: &Symbol) -> Result<HoldersTable, DashError> {
        let snapshot = self.snapshot(symbol).await?;
        let raw = snapshot
            .holders
            .as_deref()
            .ok_or_else(|| DashError::missing(symbol, "holders"))?;

        let rows: Vec<HolderRow> = raw
            .iter()
            .filter_map(|row| {
                Some(HolderRow {
                    holder: row.holder.clone()?,
                    shares: row.shares?,
                    date_reported: row.date_reported?,
                    value: row.value?,
                })
            })
            .collect();

        if rows.is_empty() {
            return Err(DashError::missing(symbol, "holders"));
        }
        Ok(HoldersTable { rows })
    }

    /// The most recent analyst actions, oldest first.
    pub async fn recommendations(&self, symbol: &Symbol) -> Result<RecommendationsTable, DashError> {
        let snapshot = self.snapshot(symbol).await?;
        let raw = snapshot
            .recommendations
            .as_deref()
            .ok_or_else(|| DashError::missing(symbol, "recommendations"))?;

        if raw.is_empty() {
            return Err(DashError::missing(symbol, "recommendations"));
        }

        let mut sorted: Vec<_> = raw.iter().collect();
        sorted.sort_by_key(|r| r.graded_at);
        let skip = sorted.len().saturating_sub(MAX_RECOMMENDATIONS);

        let rows = sorted
            .into_iter()
            .skip(skip)
            .map(|r| RecommendationRow {
                date: r.graded_at.date_naive(),
                firm: r.firm.clone(),
                action: r.action.clone(),
                from_grade: r.from_grade.clone(),
                to_grade: r.to_grade.clone(),
            })
            .collect();

        Ok(RecommendationsTable { rows })
    }

    /// Every panel's data for one selection. Fails on the first panel error;
    /// the per-panel methods are the failure-isolated path.
    #[instrument(skip(self, symbol), fields(symbol = %symbol))]
    pub async fn fetch(&self, symbol: &Symbol, range: DateRange) -> Result<StockBundle, DashError> {
        let history = self.history(symbol, range).await?;

        Ok(StockBundle {
            symbol: symbol.clone(),
            range,
            prices: history.prices,
            volumes: history.volumes,
            profile: self.profile(symbol).await?,
            financials: self.financials(symbol).await?,
            balance_sheet: self.balance_sheet(symbol).await?,
            earnings: self.earnings(symbol).await?,
            holders: self.holders(symbol).await?,
            recommendations: self.recommendations(symbol).await?,
        })
    }
}

fn statement(
    symbol: &Symbol,
    reports: Option<&[crate::data_structures::RawReport]>,
    name: &str,
) -> Result<StatementTable, DashError> {
    let reports = reports.ok_or_else(|| DashError::missing(symbol, name))?;
    let table = StatementTable::from_reports(reports);
    if table.is_empty() {
        return Err(DashError::missing(symbol, name));
    }
    Ok(table)
}
