use chrono::NaiveDate;
use serde_json::json;
use std::time::Duration;
use stockdash::{
    config::UpstreamConfig,
    data_structures::{DateRange, ProfileField, Symbol},
    source::{MarketDataSource, UpstreamError},
    yahoo::YahooClient,
};
use wiremock::matchers::{method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config(server: &MockServer, cookie: bool, max_attempts: u32) -> UpstreamConfig {
    UpstreamConfig {
        base_url: server.uri(),
        cookie_url: cookie.then(|| format!("{}/cookie", server.uri())),
        timeout: Duration::from_secs(5),
        rate_limit_per_minute: 0,
        max_attempts,
        random_agent: false,
    }
}

fn client(server: &MockServer, cookie: bool, max_attempts: u32) -> YahooClient {
    YahooClient::new(&config(server, cookie, max_attempts))
        .unwrap()
        .with_backoff_unit(Duration::from_millis(1))
}

fn january() -> DateRange {
    DateRange::new(
        NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
        NaiveDate::from_ymd_opt(2020, 1, 10).unwrap(),
    )
    .unwrap()
}

fn chart_body() -> serde_json::Value {
    json!({"chart": {"result": [{
        "meta": {"symbol": "AAPL", "exchangeTimezoneName": "America/New_York", "gmtoffset": -18000},
        "timestamp": [1577975400, 1578061800],
        "indicators": {
            "quote": [{"close": [75.09, 74.36], "volume": [135480400, 146322800]}],
            "adjclose": [{"adjclose": [73.06, 72.35]}]
        }
    }], "error": null}})
}

#[tokio::test]
async fn test_history_requests_daily_chart() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v8/finance/chart/AAPL"))
        .and(query_param("interval", "1d"))
        .and(query_param("includeAdjustedClose", "true"))
        .and(query_param("period1", "1577750400"))
        .and(query_param("period2", "1578700800"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chart_body()))
        .expect(1)
        .mount(&server)
        .await;

    let bars = client(&server, false, 3)
        .history(&Symbol::parse("AAPL").unwrap(), january())
        .await
        .unwrap();

    assert_eq!(bars.len(), 2);
    assert_eq!(bars[0].date, NaiveDate::from_ymd_opt(2020, 1, 2).unwrap());
    assert_eq!(bars[1].adj_close, Some(72.35));
    assert_eq!(bars[1].volume, Some(146322800));
}

#[tokio::test]
async fn test_unknown_symbol_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v8/finance/chart/ZZZZ"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "chart": {"result": null, "error": {"code": "Not Found", "description": "No data found, symbol may be delisted"}}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let result = client(&server, false, 3)
        .history(&Symbol::parse("ZZZZ").unwrap(), january())
        .await;
    assert!(matches!(result, Err(UpstreamError::NotFound(_))));
}

#[tokio::test]
async fn test_server_errors_are_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v8/finance/chart/AAPL"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v8/finance/chart/AAPL"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chart_body()))
        .expect(1)
        .mount(&server)
        .await;

    let bars = client(&server, false, 3)
        .history(&Symbol::parse("AAPL").unwrap(), january())
        .await
        .unwrap();
    assert_eq!(bars.len(), 2);
}

#[tokio::test]
async fn test_gives_up_after_max_attempts() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v8/finance/chart/AAPL"))
        .respond_with(ResponseTemplate::new(429))
        .expect(2)
        .mount(&server)
        .await;

    let result = client(&server, false, 2)
        .history(&Symbol::parse("AAPL").unwrap(), january())
        .await;
    assert!(matches!(result, Err(UpstreamError::RateLimit)));
}

#[tokio::test]
async fn test_crumb_is_fetched_once_and_attached() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/cookie"))
        .respond_with(ResponseTemplate::new(404).insert_header("set-cookie", "A3=d=token; Path=/"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/test/getcrumb"))
        .respond_with(ResponseTemplate::new(200).set_body_string("crumb123"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v8/finance/chart/AAPL"))
        .and(query_param("crumb", "crumb123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chart_body()))
        .expect(2)
        .mount(&server)
        .await;

    let client = client(&server, true, 1);
    let aapl = Symbol::parse("AAPL").unwrap();
    assert_eq!(client.history(&aapl, january()).await.unwrap().len(), 2);
    assert_eq!(client.history(&aapl, january()).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_rejected_crumb_is_refreshed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/cookie"))
        .respond_with(ResponseTemplate::new(404))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/test/getcrumb"))
        .respond_with(ResponseTemplate::new(200).set_body_string("stale"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/test/getcrumb"))
        .respond_with(ResponseTemplate::new(200).set_body_string("fresh"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v8/finance/chart/AAPL"))
        .and(query_param("crumb", "stale"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v8/finance/chart/AAPL"))
        .and(query_param("crumb", "fresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chart_body()))
        .expect(1)
        .mount(&server)
        .await;

    let bars = client(&server, true, 2)
        .history(&Symbol::parse("AAPL").unwrap(), january())
        .await
        .unwrap();
    assert_eq!(bars.len(), 2);
}

#[tokio::test]
async fn test_requests_continue_without_crumb() {
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
    Mock::given(method("GET"))
        .and(path("/v8/finance/chart/AAPL"))
        .and(query_param_is_missing("crumb"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chart_body()))
        .expect(2)
        .mount(&server)
        .await;

    let client = client(&server, true, 1);
    let aapl = Symbol::parse("AAPL").unwrap();
    assert_eq!(client.history(&aapl, january()).await.unwrap().len(), 2);
    // the failed crumb is not retried on the next request
    assert_eq!(client.history(&aapl, january()).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_snapshot_reads_quote_summary() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v10/finance/quoteSummary/MSFT"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"quoteSummary": {"result": [{
            "financialData": {"currentPrice": {"raw": 310.2}, "returnOnEquity": {"raw": 0.47}},
            "summaryDetail": {"beta": {"raw": 0.9}, "trailingPE": {"raw": 35.5}},
            "balanceSheetHistory": {"balanceSheetStatements": [
                {"maxAge": 1, "endDate": {"raw": 1625011200}, "totalAssets": {"raw": 333779000000i64}}
            ]}
        }], "error": null}})))
        .expect(1)
        .mount(&server)
        .await;

    let snapshot = client(&server, false, 3)
        .snapshot(&Symbol::parse("MSFT").unwrap())
        .await
        .unwrap();

    assert!(snapshot.profile.contains(&(ProfileField::CurrentPrice, Some(310.2))));
    assert!(snapshot.profile.contains(&(ProfileField::Beta, Some(0.9))));
    assert!(snapshot.profile.contains(&(ProfileField::MarketCap, None)));

    let balance = snapshot.balance_sheets.unwrap();
    assert_eq!(balance[0].end_date, NaiveDate::from_ymd_opt(2021, 6, 30).unwrap());
    assert_eq!(balance[0].items, vec![("Total Assets".to_string(), Some(333779000000.0))]);
    assert!(snapshot.income_statements.is_none());
    assert!(snapshot.recommendations.is_none());
}
