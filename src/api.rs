use crate::config::DashboardSettings;
use crate::data_structures::{
    DateRange, EarningsTable, HoldersTable, ProfileRow, RecommendationsTable, StatementTable, StockBundle, Symbol,
    VolumeSeries,
};
use crate::derived::{
    ChartKind, Comparison, EarningsProjection, PriceChart, RowProjection, apply_overlay, compare_returns,
    earnings_projection, period_returns, statement_row,
};
use crate::error::DashError;
use crate::provider::SharedProvider;
use crate::request::{DashboardQuery, DashboardRequest};
use axum::{
    Router,
    extract::{FromRef, Json, Path, State},
    routing::get,
};
use axum_extra::extract::{Query, QueryRejection};
use chrono::NaiveDate;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, instrument};

pub type SharedSettings = Arc<DashboardSettings>;

#[derive(Clone)]
pub struct AppState {
    pub provider: SharedProvider,
    pub settings: SharedSettings,
}

impl FromRef<AppState> for SharedProvider {
    fn from_ref(app_state: &AppState) -> SharedProvider {
        app_state.provider.clone()
    }
}

impl FromRef<AppState> for SharedSettings {
    fn from_ref(app_state: &AppState) -> SharedSettings {
        app_state.settings.clone()
    }
}

/// One route per dashboard panel, so a failing panel never takes the others down.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/tickers", get(tickers_handler))
        .route("/stocks/{ticker}", get(bundle_handler))
        .route("/stocks/{ticker}/prices", get(prices_handler))
        .route("/stocks/{ticker}/volume", get(volume_handler))
        .route("/stocks/{ticker}/info", get(info_handler))
        .route("/stocks/{ticker}/returns", get(returns_handler))
        .route("/stocks/{ticker}/financials", get(financials_handler))
        .route("/stocks/{ticker}/balance-sheet", get(balance_sheet_handler))
        .route("/stocks/{ticker}/earnings", get(earnings_handler))
        .route("/stocks/{ticker}/holders", get(holders_handler))
        .route("/stocks/{ticker}/recommendations", get(recommendations_handler))
        .with_state(state)
}

type QueryResult = Result<Query<DashboardQuery>, QueryRejection>;

fn build_request(ticker: &str, query: QueryResult, settings: &DashboardSettings) -> Result<DashboardRequest, DashError> {
    let Query(query) = query.map_err(|e| DashError::InvalidRequest(e.to_string()))?;
    let request = DashboardRequest::build(ticker, query, settings)?;
    debug!(?request, "Built dashboard request");
    Ok(request)
}

// --- Panel payloads ---

#[derive(Debug, Serialize)]
pub struct TickersPanel {
    pub tickers: Vec<Symbol>,
    pub default_start: NaiveDate,
}

#[derive(Debug, Serialize)]
pub struct PricePanel {
    pub ticker: Symbol,
    pub range: DateRange,
    #[serde(flatten)]
    pub chart: PriceChart,
}

#[derive(Debug, Serialize)]
pub struct VolumePanel {
    pub ticker: Symbol,
    pub range: DateRange,
    pub volumes: VolumeSeries,
}

#[derive(Debug, Serialize)]
pub struct InfoPanel {
    pub ticker: Symbol,
    pub rows: Vec<ProfileRow>,
    pub missing: Vec<&'static str>,
}

#[derive(Debug, Serialize)]
pub struct ReturnsPanel {
    pub ticker: Symbol,
    pub range: DateRange,
    #[serde(flatten)]
    pub comparison: Comparison,
}

#[derive(Debug, Serialize)]
pub struct StatementPanel {
    pub ticker: Symbol,
    pub chart: ChartKind,
    pub table: StatementTable,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected: Option<RowProjection>,
}

#[derive(Debug, Serialize)]
pub struct EarningsPanel {
    pub ticker: Symbol,
    pub chart: ChartKind,
    pub table: EarningsTable,
    pub projection: EarningsProjection,
}

#[derive(Debug, Serialize)]
pub struct HoldersPanel {
    pub ticker: Symbol,
    #[serde(flatten)]
    pub table: HoldersTable,
}

#[derive(Debug, Serialize)]
pub struct RecommendationsPanel {
    pub ticker: Symbol,
    #[serde(flatten)]
    pub table: RecommendationsTable,
}

// --- Handlers ---

#[instrument(skip(settings))]
pub async fn tickers_handler(State(settings): State<SharedSettings>) -> Json<TickersPanel> {
    debug!(ticker_count = settings.tickers.len(), "Returning predefined tickers");
    Json(TickersPanel {
        tickers: settings.tickers.clone(),
        default_start: settings.default_start,
    })
}

#[instrument(skip(provider, settings, query))]
pub async fn bundle_handler(
    State(provider): State<SharedProvider>,
    State(settings): State<SharedSettings>,
    Path(ticker): Path<String>,
    query: QueryResult,
) -> Result<Json<StockBundle>, DashError> {
    let request = build_request(&ticker, query, &settings)?;
    let bundle = provider.fetch(&request.ticker, request.range).await?;
    info!(symbol = %request.ticker, trading_days = bundle.prices.len(), "Returning stock bundle");
    Ok(Json(bundle))
}

#[instrument(skip(provider, settings, query))]
pub async fn prices_handler(
    State(provider): State<SharedProvider>,
    State(settings): State<SharedSettings>,
    Path(ticker): Path<String>,
    query: QueryResult,
) -> Result<Json<PricePanel>, DashError> {
    let request = build_request(&ticker, query, &settings)?;
    let prices = provider.prices(&request.ticker, request.range).await?;
    let chart = apply_overlay(&prices, request.options.overlay);

    info!(symbol = %request.ticker, points = prices.len(), overlay = ?chart.overlay, "Returning price chart");
    Ok(Json(PricePanel {
        ticker: request.ticker,
        range: request.range,
        chart,
    }))
}

#[instrument(skip(provider, settings, query))]
pub async fn volume_handler(
    State(provider): State<SharedProvider>,
    State(settings): State<SharedSettings>,
    Path(ticker): Path<String>,
    query: QueryResult,
) -> Result<Json<VolumePanel>, DashError> {
    let request = build_request(&ticker, query, &settings)?;
    let history = provider.history(&request.ticker, request.range).await?;

    Ok(Json(VolumePanel {
        ticker: request.ticker,
        range: request.range,
        volumes: history.volumes,
    }))
}

#[instrument(skip(provider, settings, query))]
pub async fn info_handler(
    State(provider): State<SharedProvider>,
    State(settings): State<SharedSettings>,
    Path(ticker): Path<String>,
    query: QueryResult,
) -> Result<Json<InfoPanel>, DashError> {
    let request = build_request(&ticker, query, &settings)?;
    let profile = provider.profile(&request.ticker).await?;

    let rows = profile.rows();
    let missing: Vec<&'static str> = rows.iter().filter(|r| r.value.is_none()).map(|r| r.label).collect();
    if !missing.is_empty() {
        debug!(symbol = %request.ticker, ?missing, "Profile has missing fields");
    }

    Ok(Json(InfoPanel {
        ticker: request.ticker,
        rows,
        missing,
    }))
}

#[instrument(skip(provider, settings, query))]
pub async fn returns_handler(
    State(provider): State<SharedProvider>,
    State(settings): State<SharedSettings>,
    Path(ticker): Path<String>,
    query: QueryResult,
) -> Result<Json<ReturnsPanel>, DashError> {
    let request = build_request(&ticker, query, &settings)?;
    let prices = provider.prices(&request.ticker, request.range).await?;
    let base = period_returns(&request.ticker, &prices, request.options.period);

    let comparison = compare_returns(&provider, base, request.range, &request.options.compare).await;
    info!(
        symbol = %request.ticker,
        period = ?comparison.period,
        series = comparison.series.len(),
        omitted = comparison.omitted.len(),
        "Returning returns panel"
    );

    Ok(Json(ReturnsPanel {
        ticker: request.ticker,
        range: request.range,
        comparison,
    }))
}

fn statement_panel(
    request: DashboardRequest,
    table: StatementTable,
) -> Result<StatementPanel, DashError> {
    let selected = request
        .options
        .item
        .as_deref()
        .map(|item| statement_row(&request.ticker, &table, item))
        .transpose()?;

    Ok(StatementPanel {
        ticker: request.ticker,
        chart: request.options.chart,
        table,
        selected,
    })
}

#[instrument(skip(provider, settings, query))]
pub async fn financials_handler(
    State(provider): State<SharedProvider>,
    State(settings): State<SharedSettings>,
    Path(ticker): Path<String>,
    query: QueryResult,
) -> Result<Json<StatementPanel>, DashError> {
    let request = build_request(&ticker, query, &settings)?;
    let table = provider.financials(&request.ticker).await?;
    Ok(Json(statement_panel(request, table)?))
}

#[instrument(skip(provider, settings, query))]
pub async fn balance_sheet_handler(
    State(provider): State<SharedProvider>,
    State(settings): State<SharedSettings>,
    Path(ticker): Path<String>,
    query: QueryResult,
) -> Result<Json<StatementPanel>, DashError> {
    let request = build_request(&ticker, query, &settings)?;
    let table = provider.balance_sheet(&request.ticker).await?;
    Ok(Json(statement_panel(request, table)?))
}

#[instrument(skip(provider, settings, query))]
pub async fn earnings_handler(
    State(provider): State<SharedProvider>,
    State(settings): State<SharedSettings>,
    Path(ticker): Path<String>,
    query: QueryResult,
) -> Result<Json<EarningsPanel>, DashError> {
    let request = build_request(&ticker, query, &settings)?;
    let table = provider.earnings(&request.ticker).await?;
    let projection = earnings_projection(&table, &request.options.fields);

    Ok(Json(EarningsPanel {
        ticker: request.ticker,
        chart: request.options.chart,
        table,
        projection,
    }))
}

#[instrument(skip(provider, settings, query))]
pub async fn holders_handler(
    State(provider): State<SharedProvider>,
    State(settings): State<SharedSettings>,
    Path(ticker): Path<String>,
    query: QueryResult,
) -> Result<Json<HoldersPanel>, DashError> {
    let request = build_request(&ticker, query, &settings)?;
    let table = provider.holders(&request.ticker).await?;
    Ok(Json(HoldersPanel {
        ticker: request.ticker,
        table,
    }))
}

#[instrument(skip(provider, settings, query))]
pub async fn recommendations_handler(
    State(provider): State<SharedProvider>,
    State(settings): State<SharedSettings>,
    Path(ticker): Path<String>,
    query: QueryResult,
) -> Result<Json<RecommendationsPanel>, DashError> {
    let request = build_request(&ticker, query, &settings)?;
    let table = provider.recommendations(&request.ticker).await?;
    Ok(Json(RecommendationsPanel {
        ticker: request.ticker,
        table,
    }))
}
