use crate::config::UpstreamConfig;
use crate::data_structures::{
    DateRange, FundamentalsSnapshot, ProfileField, RawEarnings, RawHolder, RawRecommendation, RawReport, Symbol,
};
use crate::source::{MarketDataSource, RawBar, UpstreamError};
use crate::utils::{local_date, unix_midnight, utc_date};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use chrono_tz::Tz;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

const SUMMARY_MODULES: &str = "financialData,defaultKeyStatistics,summaryDetail,price,incomeStatementHistory,\
balanceSheetHistory,earnings,institutionOwnership,upgradeDowngradeHistory";

/// How long a failed crumb fetch is remembered before it is tried again.
const CRUMB_RETRY_AFTER: Duration = Duration::from_secs(300);

const USER_AGENTS: [&str; 5] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36 Edg/124.0.0.0",
];

enum CrumbState {
    Unknown,
    Ready(String),
    Failed(Instant),
}

/// Yahoo Finance client for daily history and the quoteSummary fundamentals.
pub struct YahooClient {
    client: Client,
    base_url: String,
    cookie_url: Option<String>,
    rate_limit_per_minute: u32,
    max_attempts: u32,
    backoff_unit: Duration,
    random_agent: bool,
    request_timestamps: Mutex<Vec<Instant>>,
    crumb: Mutex<CrumbState>,
}

impl YahooClient {
    pub fn new(config: &UpstreamConfig) -> Result<Self, UpstreamError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .cookie_store(true)
            .gzip(true)
            .build()?;

        Ok(YahooClient {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            cookie_url: config.cookie_url.clone(),
            rate_limit_per_minute: config.rate_limit_per_minute,
            max_attempts: config.max_attempts.max(1),
            backoff_unit: Duration::from_secs(1),
            random_agent: config.random_agent,
            request_timestamps: Mutex::new(Vec::new()),
            crumb: Mutex::new(CrumbState::Unknown),
        })
    }

    /// Scales the retry backoff. Tests shrink it to keep retries fast.
    pub fn with_backoff_unit(mut self, unit: Duration) -> Self {
        self.backoff_unit = unit;
        self
    }

    fn user_agent(&self) -> &'static str {
        if self.random_agent {
            use rand::seq::IndexedRandom;
            USER_AGENTS.choose(&mut rand::rng()).copied().unwrap_or(USER_AGENTS[0])
        } else {
            USER_AGENTS[0]
        }
    }

    async fn enforce_rate_limit(&self) {
        if self.rate_limit_per_minute == 0 {
            return;
        }
        let window = Duration::from_secs(60);
        let mut timestamps = self.request_timestamps.lock().await;

        let now = Instant::now();
        timestamps.retain(|t| now.duration_since(*t) < window);

        if timestamps.len() >= self.rate_limit_per_minute as usize {
            if let Some(&oldest) = timestamps.first() {
                let wait = window.saturating_sub(now.duration_since(oldest));
                if !wait.is_zero() {
                    debug!(wait_ms = wait.as_millis() as u64, "Upstream rate limit reached, waiting");
                    sleep(wait + Duration::from_millis(100)).await;
                }
            }
            let now = Instant::now();
            timestamps.retain(|t| now.duration_since(*t) < window);
        }

        timestamps.push(Instant::now());
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let secs = 2.0_f64.powi(attempt as i32 - 1) + rand::random::<f64>();
        self.backoff_unit.mul_f64(secs).min(Duration::from_secs(60))
    }

    // --- Crumb authentication ---

    async fn crumb(&self) -> Option<String> {
        let cookie_url = self.cookie_url.as_deref()?;
        let mut state = self.crumb.lock().await;
        match &*state {
            CrumbState::Ready(crumb) => return Some(crumb.clone()),
            CrumbState::Failed(at) if at.elapsed() < CRUMB_RETRY_AFTER => return None,
            _ => {}
        }

        match self.fetch_crumb(cookie_url).await {
            Ok(crumb) => {
                debug!("Obtained Yahoo crumb");
                *state = CrumbState::Ready(crumb.clone());
                Some(crumb)
            }
            Err(e) => {
                warn!(error = %e, "Failed to obtain Yahoo crumb, continuing without it");
                *state = CrumbState::Failed(Instant::now());
                None
            }
        }
    }

    async fn fetch_crumb(&self, cookie_url: &str) -> Result<String, UpstreamError> {
        // Only the Set-Cookie headers matter; the status is usually 404.
        self.enforce_rate_limit().await;
        if let Err(e) = self
            .client
            .get(cookie_url)
            .header("User-Agent", self.user_agent())
            .send()
            .await
        {
            debug!(error = %e, "Cookie seed request failed");
        }

        self.enforce_rate_limit().await;
        let response = self
            .client
            .get(format!("{}/v1/test/getcrumb", self.base_url))
            .header("User-Agent", self.user_agent())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpstreamError::Status(status.as_u16()));
        }

        let crumb = response.text().await?.trim().to_string();
        if crumb.is_empty() || crumb.contains('<') {
            return Err(UpstreamError::InvalidResponse("empty crumb".to_string()));
        }
        Ok(crumb)
    }

    async fn invalidate_crumb(&self) {
        *self.crumb.lock().await = CrumbState::Unknown;
    }

    // --- Requests ---

    /// Sends a GET with retries. Returns the body for successes and for
    /// non-retryable client errors, whose body usually carries Yahoo's error object.
    async fn make_request(&self, url: &str, query: &[(&str, String)]) -> Result<(StatusCode, String), UpstreamError> {
        let mut last_error = UpstreamError::InvalidResponse("max retries exceeded".to_string());

        for attempt in 0..self.max_attempts {
            self.enforce_rate_limit().await;

            if attempt > 0 {
                let delay = self.backoff(attempt);
                debug!(attempt, delay_ms = delay.as_millis() as u64, url, "Retrying upstream request");
                sleep(delay).await;
            }

            let mut request = self
                .client
                .get(url)
                .header("User-Agent", self.user_agent())
                .header("Accept", "application/json, text/plain, */*")
                .header("Accept-Language", "en-US,en;q=0.9")
                .query(query);
            if let Some(crumb) = self.crumb().await {
                request = request.query(&[("crumb", crumb)]);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok((status, response.text().await?));
                    }

                    if status == StatusCode::TOO_MANY_REQUESTS {
                        warn!(attempt, url, "Upstream rate limited the request");
                        last_error = UpstreamError::RateLimit;
                    } else if status.is_server_error() {
                        warn!(attempt, url, status = status.as_u16(), "Upstream server error");
                        last_error = UpstreamError::Status(status.as_u16());
                    } else if status == StatusCode::UNAUTHORIZED {
                        debug!(attempt, url, "Crumb rejected, refreshing");
                        self.invalidate_crumb().await;
                        last_error = UpstreamError::Status(status.as_u16());
                    } else {
                        return Ok((status, response.text().await.unwrap_or_default()));
                    }
                }
                Err(e) => {
                    warn!(attempt, url, error = %e, "Upstream request failed");
                    last_error = UpstreamError::Http(e);
                }
            }
        }

        Err(last_error)
    }

    async fn fetch_json<T: DeserializeOwned>(
        &self,
        symbol: &Symbol,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, UpstreamError> {
        let (status, body) = self.make_request(url, query).await?;
        match serde_json::from_str::<T>(&body) {
            Ok(parsed) => Ok(parsed),
            Err(e) if status.is_success() => Err(e.into()),
            Err(_) if status == StatusCode::NOT_FOUND => Err(UpstreamError::NotFound(symbol.to_string())),
            Err(_) => Err(UpstreamError::Status(status.as_u16())),
        }
    }

    #[instrument(skip(self, symbol), fields(symbol = %symbol))]
    pub async fn get_history(&self, symbol: &Symbol, range: DateRange) -> Result<Vec<RawBar>, UpstreamError> {
        // Pad by a day on each side; exact filtering happens after timezone conversion.
        let period1 = unix_midnight(range.start - ChronoDuration::days(1));
        let period2 = unix_midnight(range.end + ChronoDuration::days(1));

        let url = format!(
            "{}/v8/finance/chart/{}",
            self.base_url,
            urlencoding::encode(symbol.as_str())
        );
        let query = [
            ("interval", "1d".to_string()),
            ("period1", period1.to_string()),
            ("period2", period2.to_string()),
            ("events", "div,splits".to_string()),
            ("includeAdjustedClose", "true".to_string()),
        ];

        let envelope: ChartEnvelope = self.fetch_json(symbol, &url, &query).await?;
        let bars = parse_chart(symbol, envelope)?;
        info!(bars = bars.len(), "Fetched daily history");
        Ok(bars)
    }

    #[instrument(skip(self, symbol), fields(symbol = %symbol))]
    pub async fn get_snapshot(&self, symbol: &Symbol) -> Result<FundamentalsSnapshot, UpstreamError> {
        let url = format!(
            "{}/v10/finance/quoteSummary/{}",
            self.base_url,
            urlencoding::encode(symbol.as_str())
        );
        let query = [("modules", SUMMARY_MODULES.to_string())];

        let envelope: SummaryEnvelope = self.fetch_json(symbol, &url, &query).await?;
        let snapshot = parse_summary(symbol, envelope)?;
        info!(
            income_reports = snapshot.income_statements.as_ref().map_or(0, Vec::len),
            holders = snapshot.holders.as_ref().map_or(0, Vec::len),
            recommendations = snapshot.recommendations.as_ref().map_or(0, Vec::len),
            "Fetched fundamentals snapshot"
        );
        Ok(snapshot)
    }
}

#[async_trait]
impl MarketDataSource for YahooClient {
    fn name(&self) -> &'static str {
        "yahoo"
    }

    async fn history(&self, symbol: &Symbol, range: DateRange) -> Result<Vec<RawBar>, UpstreamError> {
        self.get_history(symbol, range).await
    }

    async fn snapshot(&self, symbol: &Symbol) -> Result<FundamentalsSnapshot, UpstreamError> {
        self.get_snapshot(symbol).await
    }
}

// --- Wire format ---

#[derive(Debug, Deserialize)]
struct YahooApiError {
    code: String,
    #[serde(default)]
    description: Option<String>,
}

impl YahooApiError {
    fn into_upstream(self, symbol: &Symbol) -> UpstreamError {
        let description = self.description.unwrap_or_default();
        let lowered = description.to_lowercase();
        if self.code.eq_ignore_ascii_case("Not Found") {
            UpstreamError::NotFound(symbol.to_string())
        } else if lowered.contains("data doesn't exist") {
            UpstreamError::NoData(description)
        } else {
            UpstreamError::InvalidResponse(format!("{}: {}", self.code, description))
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChartEnvelope {
    chart: ChartBody,
}

#[derive(Debug, Deserialize)]
struct ChartBody {
    #[serde(default)]
    result: Option<Vec<ChartResult>>,
    #[serde(default)]
    error: Option<YahooApiError>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    meta: ChartMeta,
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: ChartIndicators,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    #[serde(default)]
    exchange_timezone_name: Option<String>,
    #[serde(default)]
    gmtoffset: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ChartIndicators {
    #[serde(default)]
    quote: Vec<QuoteIndicator>,
    #[serde(default)]
    adjclose: Vec<AdjCloseIndicator>,
}

#[derive(Debug, Deserialize)]
struct QuoteIndicator {
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

#[derive(Debug, Deserialize)]
struct AdjCloseIndicator {
    #[serde(default)]
    adjclose: Vec<Option<f64>>,
}

fn parse_chart(symbol: &Symbol, envelope: ChartEnvelope) -> Result<Vec<RawBar>, UpstreamError> {
    if let Some(error) = envelope.chart.error {
        return Err(error.into_upstream(symbol));
    }
    let result = envelope
        .chart
        .result
        .and_then(|results| results.into_iter().next())
        .ok_or_else(|| UpstreamError::NotFound(symbol.to_string()))?;

    let tz: Option<Tz> = result
        .meta
        .exchange_timezone_name
        .as_deref()
        .and_then(|name| name.parse().ok());
    let gmtoffset = result.meta.gmtoffset.unwrap_or(0);

    let quote = result.indicators.quote.into_iter().next();
    let (closes, volumes) = quote.map(|q| (q.close, q.volume)).unwrap_or_default();
    let adjcloses = result
        .indicators
        .adjclose
        .into_iter()
        .next()
        .map(|a| a.adjclose)
        .unwrap_or_default();

    let bars = result
        .timestamp
        .iter()
        .enumerate()
        .filter_map(|(i, &ts)| {
            let date = match tz {
                Some(tz) => local_date(ts, tz),
                None => utc_date(ts + gmtoffset),
            }?;
            Some(RawBar {
                date,
                close: closes.get(i).copied().flatten().filter(|v| v.is_finite()),
                adj_close: adjcloses.get(i).copied().flatten().filter(|v| v.is_finite()),
                volume: volumes
                    .get(i)
                    .copied()
                    .flatten()
                    .filter(|v| v.is_finite() && *v >= 0.0)
                    .map(|v| v.round() as u64),
            })
        })
        .collect();

    Ok(bars)
}

#[derive(Debug, Deserialize)]
struct SummaryEnvelope {
    #[serde(rename = "quoteSummary")]
    quote_summary: SummaryBody,
}

#[derive(Debug, Deserialize)]
struct SummaryBody {
    #[serde(default)]
    result: Option<Vec<SummaryResult>>,
    #[serde(default)]
    error: Option<YahooApiError>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct SummaryResult {
    financial_data: Option<FinancialData>,
    default_key_statistics: Option<KeyStatistics>,
    summary_detail: Option<SummaryDetail>,
    income_statement_history: Option<IncomeStatementHistory>,
    balance_sheet_history: Option<BalanceSheetHistory>,
    earnings: Option<EarningsModule>,
    institution_ownership: Option<InstitutionOwnership>,
    upgrade_downgrade_history: Option<UpgradeDowngradeHistory>,
}

/// Yahoo wraps numbers as `{"raw": 1.23, "fmt": "1.23"}`; `{}` means missing.
#[derive(Debug, Default, Deserialize, Clone, Copy)]
struct RawNumber {
    #[serde(default)]
    raw: Option<f64>,
}

fn raw(value: &Option<RawNumber>) -> Option<f64> {
    (*value).and_then(|v| v.raw).filter(|v| v.is_finite())
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct FinancialData {
    current_price: Option<RawNumber>,
    return_on_assets: Option<RawNumber>,
    return_on_equity: Option<RawNumber>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct KeyStatistics {
    beta: Option<RawNumber>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct SummaryDetail {
    market_cap: Option<RawNumber>,
    beta: Option<RawNumber>,
    #[serde(rename = "trailingPE")]
    trailing_pe: Option<RawNumber>,
    volume: Option<RawNumber>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct IncomeStatementHistory {
    #[serde(rename = "incomeStatementHistory")]
    statements: Vec<Map<String, Value>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct BalanceSheetHistory {
    #[serde(rename = "balanceSheetStatements")]
    statements: Vec<Map<String, Value>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct EarningsModule {
    financials_chart: Option<FinancialsChart>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FinancialsChart {
    yearly: Vec<YearlyFinancials>,
}

#[derive(Debug, Deserialize)]
struct YearlyFinancials {
    #[serde(default)]
    date: Value,
    #[serde(default)]
    revenue: Option<RawNumber>,
    #[serde(default)]
    earnings: Option<RawNumber>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct InstitutionOwnership {
    ownership_list: Vec<OwnershipEntry>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct OwnershipEntry {
    organization: Option<String>,
    report_date: Option<RawNumber>,
    position: Option<RawNumber>,
    value: Option<RawNumber>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct UpgradeDowngradeHistory {
    history: Vec<GradeEntry>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct GradeEntry {
    epoch_grade_date: Option<i64>,
    firm: Option<String>,
    to_grade: Option<String>,
    from_grade: Option<String>,
    action: Option<String>,
}

fn parse_summary(symbol: &Symbol, envelope: SummaryEnvelope) -> Result<FundamentalsSnapshot, UpstreamError> {
    if let Some(error) = envelope.quote_summary.error {
        return Err(error.into_upstream(symbol));
    }
    let result = envelope
        .quote_summary
        .result
        .and_then(|results| results.into_iter().next())
        .ok_or_else(|| UpstreamError::NotFound(symbol.to_string()))?;

    let financial = result.financial_data.unwrap_or_default();
    let detail = result.summary_detail.unwrap_or_default();
    let statistics = result.default_key_statistics.unwrap_or_default();

    let profile = vec![
        (ProfileField::CurrentPrice, raw(&financial.current_price)),
        (ProfileField::MarketCap, raw(&detail.market_cap)),
        (ProfileField::Volume, raw(&detail.volume)),
        (ProfileField::Beta, raw(&detail.beta).or_else(|| raw(&statistics.beta))),
        (ProfileField::ReturnOnAssets, raw(&financial.return_on_assets)),
        (ProfileField::ReturnOnEquity, raw(&financial.return_on_equity)),
        (ProfileField::TrailingPe, raw(&detail.trailing_pe)),
    ];

    let income_statements = result
        .income_statement_history
        .map(|h| parse_reports(&h.statements));
    let balance_sheets = result.balance_sheet_history.map(|h| parse_reports(&h.statements));

    let earnings = result
        .earnings
        .and_then(|e| e.financials_chart)
        .map(|chart| {
            chart
                .yearly
                .into_iter()
                .filter_map(|row| {
                    let year = match &row.date {
                        Value::Number(n) => n.as_i64().map(|y| y as i32),
                        Value::String(s) => s.trim().parse().ok(),
                        _ => None,
                    }?;
                    Some(RawEarnings {
                        year,
                        revenue: raw(&row.revenue),
                        earnings: raw(&row.earnings),
                    })
                })
                .collect()
        });

    let holders = result.institution_ownership.map(|ownership| {
        ownership
            .ownership_list
            .into_iter()
            .map(|entry| RawHolder {
                holder: entry.organization.filter(|o| !o.trim().is_empty()),
                shares: raw(&entry.position).filter(|v| *v >= 0.0).map(|v| v.round() as u64),
                date_reported: raw(&entry.report_date).and_then(|ts| utc_date(ts as i64)),
                value: raw(&entry.value).filter(|v| *v >= 0.0).map(|v| v.round() as u64),
            })
            .collect()
    });

    let recommendations = result.upgrade_downgrade_history.map(|history| {
        history
            .history
            .into_iter()
            .filter_map(|entry| {
                let graded_at = DateTime::<Utc>::from_timestamp(entry.epoch_grade_date?, 0)?;
                Some(RawRecommendation {
                    graded_at,
                    firm: entry.firm.unwrap_or_default(),
                    action: entry.action.unwrap_or_default(),
                    from_grade: entry.from_grade.unwrap_or_default(),
                    to_grade: entry.to_grade.unwrap_or_default(),
                })
            })
            .collect()
    });

    Ok(FundamentalsSnapshot {
        profile,
        income_statements,
        balance_sheets,
        earnings,
        holders,
        recommendations,
    })
}

fn parse_reports(statements: &[Map<String, Value>]) -> Vec<RawReport> {
    statements
        .iter()
        .filter_map(|statement| {
            let end_ts = statement.get("endDate")?.get("raw")?.as_i64()?;
            let end_date = utc_date(end_ts)?;
            let items = statement
                .iter()
                .filter(|(key, _)| key.as_str() != "maxAge" && key.as_str() != "endDate")
                .map(|(key, value)| {
                    let amount = value.get("raw").and_then(Value::as_f64).filter(|v| v.is_finite());
                    (humanize_label(key), amount)
                })
                .collect();
            Some(RawReport { end_date, items })
        })
        .collect()
}

/// `totalRevenue` -> `Total Revenue`
pub fn humanize_label(name: &str) -> String {
    let mut result = String::with_capacity(name.len() + 8);
    let mut prev_lower = false;

    for (i, ch) in name.chars().enumerate() {
        if i == 0 {
            result.extend(ch.to_uppercase());
        } else if ch.is_uppercase() && prev_lower {
            result.push(' ');
            result.push(ch);
        } else {
            result.push(ch);
        }
        prev_lower = ch.is_lowercase() || ch.is_ascii_digit();
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn aapl() -> Symbol {
        Symbol::parse("AAPL").unwrap()
    }

    fn test_config() -> UpstreamConfig {
        UpstreamConfig {
            base_url: "http://localhost:9".to_string(),
            cookie_url: None,
            timeout: Duration::from_secs(5),
            rate_limit_per_minute: 60,
            max_attempts: 3,
            random_agent: true,
        }
    }

    #[tokio::test]
    async fn test_yahoo_client_creation() {
        let client = YahooClient::new(&test_config());
        assert!(client.is_ok());
        assert!(USER_AGENTS.contains(&client.unwrap().user_agent()));
    }

    #[tokio::test]
    async fn test_failed_crumb_is_remembered_and_counted() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/cookie"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/test/getcrumb"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let client = YahooClient::new(&UpstreamConfig {
            base_url: server.uri(),
            cookie_url: Some(format!("{}/cookie", server.uri())),
            ..test_config()
        })
        .unwrap();

        assert_eq!(client.crumb().await, None);
        assert_eq!(client.crumb().await, None);
        // cookie seed and getcrumb both draw from the per-minute budget
        assert_eq!(client.request_timestamps.lock().await.len(), 2);

        client.invalidate_crumb().await;
        assert!(matches!(*client.crumb.lock().await, CrumbState::Unknown));
    }

    #[test]
    fn test_backoff_is_capped() {
        let client = YahooClient::new(&test_config()).unwrap();
        let first = client.backoff(1);
        assert!(first >= Duration::from_secs(1) && first <= Duration::from_secs(2));
        assert_eq!(client.backoff(10), Duration::from_secs(60));
    }

    #[test]
    fn test_humanize_label() {
        assert_eq!(humanize_label("totalRevenue"), "Total Revenue");
        assert_eq!(humanize_label("ebit"), "Ebit");
        assert_eq!(
            humanize_label("netIncomeApplicableToCommonShares"),
            "Net Income Applicable To Common Shares"
        );
        assert_eq!(humanize_label("totalCurrentAssets"), "Total Current Assets");
    }

    #[test]
    fn test_parse_chart_converts_to_exchange_dates() {
        let body = r#"{"chart":{"result":[{
            "meta":{"symbol":"AAPL","exchangeTimezoneName":"America/New_York","gmtoffset":-18000},
            "timestamp":[1577975400,1578061800,1578321000],
            "indicators":{
                "quote":[{"close":[75.09,74.36,null],"volume":[135480400,146322800,118387200]}],
                "adjclose":[{"adjclose":[73.06,72.35,72.93]}]
            }}],"error":null}}"#;
        let envelope: ChartEnvelope = serde_json::from_str(body).unwrap();
        let bars = parse_chart(&aapl(), envelope).unwrap();

        assert_eq!(bars.len(), 3);
        assert_eq!(bars[0].date, NaiveDate::from_ymd_opt(2020, 1, 2).unwrap());
        assert_eq!(bars[1].date, NaiveDate::from_ymd_opt(2020, 1, 3).unwrap());
        assert_eq!(bars[2].date, NaiveDate::from_ymd_opt(2020, 1, 6).unwrap());
        assert_eq!(bars[0].adj_close, Some(73.06));
        assert_eq!(bars[2].close, None);
        assert_eq!(bars[2].volume, Some(118387200));
    }

    #[test]
    fn test_parse_chart_errors() {
        let delisted = r#"{"chart":{"result":null,"error":{"code":"Not Found","description":"No data found, symbol may be delisted"}}}"#;
        let envelope: ChartEnvelope = serde_json::from_str(delisted).unwrap();
        assert!(matches!(parse_chart(&aapl(), envelope), Err(UpstreamError::NotFound(_))));

        let unknown = r#"{"chart":{"result":null,"error":{"code":"Not Found","description":"Quote not found for ticker symbol: ZZZZ"}}}"#;
        let envelope: ChartEnvelope = serde_json::from_str(unknown).unwrap();
        assert!(matches!(parse_chart(&aapl(), envelope), Err(UpstreamError::NotFound(_))));

        let no_data = r#"{"chart":{"result":null,"error":{"code":"Bad Request","description":"Data doesn't exist for startDate = 1, endDate = 2"}}}"#;
        let envelope: ChartEnvelope = serde_json::from_str(no_data).unwrap();
        assert!(matches!(parse_chart(&aapl(), envelope), Err(UpstreamError::NoData(_))));
    }

    #[test]
    fn test_parse_summary() {
        let body = r#"{"quoteSummary":{"result":[{
            "financialData":{"currentPrice":{"raw":150.5,"fmt":"150.50"},"returnOnAssets":{"raw":0.2},"returnOnEquity":{}},
            "defaultKeyStatistics":{"beta":{"raw":1.25}},
            "summaryDetail":{"marketCap":{"raw":2500000000000},"trailingPE":{"raw":28.1},"volume":{"raw":80000000}},
            "incomeStatementHistory":{"incomeStatementHistory":[
                {"maxAge":1,"endDate":{"raw":1632528000,"fmt":"2021-09-25"},"totalRevenue":{"raw":365817000000},"netIncome":{"raw":94680000000},"minorityInterest":{}},
                {"maxAge":1,"endDate":{"raw":1601078400,"fmt":"2020-09-26"},"totalRevenue":{"raw":274515000000},"netIncome":{"raw":57411000000},"minorityInterest":{}}
            ],"maxAge":86400},
            "earnings":{"financialsChart":{"yearly":[
                {"date":2020,"revenue":{"raw":274515000000},"earnings":{"raw":57411000000}},
                {"date":2021,"revenue":{"raw":365817000000},"earnings":{}}
            ]}},
            "institutionOwnership":{"ownershipList":[
                {"organization":"Vanguard Group, Inc. (The)","reportDate":{"raw":1632960000},"position":{"raw":1266332667},"value":{"raw":179186072380}},
                {"organization":"","reportDate":{"raw":1632960000},"position":{"raw":1},"value":{"raw":1}}
            ]},
            "upgradeDowngradeHistory":{"history":[
                {"epochGradeDate":1634212800,"firm":"Wedbush","toGrade":"Outperform","fromGrade":"","action":"main"}
            ]}
        }],"error":null}}"#;
        let envelope: SummaryEnvelope = serde_json::from_str(body).unwrap();
        let snapshot = parse_summary(&aapl(), envelope).unwrap();

        let profile: std::collections::HashMap<_, _> = snapshot.profile.iter().cloned().collect();
        assert_eq!(profile[&ProfileField::CurrentPrice], Some(150.5));
        assert_eq!(profile[&ProfileField::Beta], Some(1.25));
        assert_eq!(profile[&ProfileField::ReturnOnEquity], None);
        assert_eq!(profile[&ProfileField::MarketCap], Some(2.5e12));

        let income = snapshot.income_statements.unwrap();
        assert_eq!(income.len(), 2);
        assert_eq!(income[0].end_date, NaiveDate::from_ymd_opt(2021, 9, 25).unwrap());
        assert!(income[0].items.contains(&("Total Revenue".to_string(), Some(365817000000.0))));
        assert!(income[0].items.contains(&("Minority Interest".to_string(), None)));
        assert!(!income[0].items.iter().any(|(k, _)| k == "Max Age" || k == "End Date"));

        assert_eq!(snapshot.balance_sheets, None);

        let earnings = snapshot.earnings.unwrap();
        assert_eq!(earnings[1].year, 2021);
        assert_eq!(earnings[1].earnings, None);

        let holders = snapshot.holders.unwrap();
        assert_eq!(holders[0].shares, Some(1266332667));
        assert_eq!(holders[0].date_reported, NaiveDate::from_ymd_opt(2021, 9, 30));
        assert_eq!(holders[1].holder, None);

        let recs = snapshot.recommendations.unwrap();
        assert_eq!(recs[0].firm, "Wedbush");
        assert_eq!(recs[0].from_grade, "");
    }
}
