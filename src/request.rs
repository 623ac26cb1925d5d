use crate::config::DashboardSettings;
use crate::data_structures::{DateRange, Symbol};
use crate::derived::{ChartKind, EarningsField, Overlay, ReturnPeriod};
use crate::error::DashError;
use crate::utils::{parse_date, today_in};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub const MAX_WINDOW_DAYS: usize = 90;

/// Raw query string of a panel request. Repeated keys (`compare`, `fields`)
/// collect into vectors.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct DashboardQuery {
    pub start: Option<String>,
    pub end: Option<String>,
    pub ma: Option<usize>,
    pub std: Option<usize>,
    pub period: Option<ReturnPeriod>,
    pub compare: Vec<String>,
    pub item: Option<String>,
    pub fields: Vec<EarningsField>,
    pub chart: Option<ChartKind>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisplayOptions {
    pub overlay: Overlay,
    pub period: ReturnPeriod,
    pub compare: Vec<String>,
    pub item: Option<String>,
    pub fields: Vec<EarningsField>,
    pub chart: ChartKind,
}

/// Validated, immutable description of what one panel should show.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardRequest {
    pub ticker: Symbol,
    pub range: DateRange,
    pub options: DisplayOptions,
}

fn check_window(name: &str, window: Option<usize>) -> Result<Option<usize>, DashError> {
    match window {
        Some(days) if days > MAX_WINDOW_DAYS => Err(DashError::InvalidRequest(format!(
            "{} window of {} days is outside 0..={}",
            name, days, MAX_WINDOW_DAYS
        ))),
        other => Ok(other),
    }
}

fn date_param(name: &str, value: Option<&str>, default: NaiveDate) -> Result<NaiveDate, DashError> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(default),
        Some(raw) => parse_date(raw)
            .map_err(|_| DashError::InvalidRequest(format!("{} date '{}' is not YYYY-MM-DD", name, raw))),
    }
}

impl DashboardRequest {
    pub fn build(ticker: &str, query: DashboardQuery, settings: &DashboardSettings) -> Result<Self, DashError> {
        Self::build_at(ticker, query, settings, today_in(settings.market_timezone))
    }

    /// Same as [`DashboardRequest::build`] with an explicit "today".
    pub fn build_at(
        ticker: &str,
        query: DashboardQuery,
        settings: &DashboardSettings,
        today: NaiveDate,
    ) -> Result<Self, DashError> {
        let ticker = Symbol::parse(ticker)?;

        let start = date_param("start", query.start.as_deref(), settings.default_start)?;
        let end = date_param("end", query.end.as_deref(), today)?;
        let range = DateRange::new(start, end)?;

        let ma = check_window("moving average", query.ma)?;
        let std = check_window("rolling std", query.std)?;

        let item = query.item.map(|i| i.trim().to_string()).filter(|i| !i.is_empty());

        Ok(Self {
            ticker,
            range,
            options: DisplayOptions {
                overlay: Overlay::from_windows(ma, std),
                period: query.period.unwrap_or_default(),
                compare: query.compare,
                item,
                fields: query.fields,
                chart: query.chart.unwrap_or_default(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn today() -> NaiveDate {
        date(2024, 6, 14)
    }

    #[test]
    fn test_defaults_fill_range_and_options() {
        let request =
            DashboardRequest::build_at("aapl", DashboardQuery::default(), &DashboardSettings::default(), today())
                .unwrap();

        assert_eq!(request.ticker.as_str(), "AAPL");
        assert_eq!(request.range, DateRange::new(date(2018, 1, 1), today()).unwrap());
        assert_eq!(request.options.overlay, Overlay::None);
        assert_eq!(request.options.period, ReturnPeriod::Daily);
        assert_eq!(request.options.chart, ChartKind::Line);
        assert!(request.options.compare.is_empty());
    }

    #[test]
    fn test_windows_select_overlay() {
        let query = DashboardQuery {
            ma: Some(20),
            std: Some(90),
            ..Default::default()
        };
        let request = DashboardRequest::build_at("MSFT", query, &DashboardSettings::default(), today()).unwrap();
        assert_eq!(
            request.options.overlay,
            Overlay::Both {
                ma_window: 20,
                std_window: 90
            }
        );

        let zero = DashboardQuery {
            ma: Some(0),
            ..Default::default()
        };
        let request = DashboardRequest::build_at("MSFT", zero, &DashboardSettings::default(), today()).unwrap();
        assert_eq!(request.options.overlay, Overlay::MovingAverage { window: 0 });
    }

    #[test]
    fn test_invalid_requests() {
        let settings = DashboardSettings::default();

        let too_wide = DashboardQuery {
            ma: Some(91),
            ..Default::default()
        };
        assert!(matches!(
            DashboardRequest::build_at("AAPL", too_wide, &settings, today()),
            Err(DashError::InvalidRequest(_))
        ));

        let inverted = DashboardQuery {
            start: Some("2020-02-01".to_string()),
            end: Some("2020-01-01".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            DashboardRequest::build_at("AAPL", inverted, &settings, today()),
            Err(DashError::InvalidRequest(_))
        ));

        let garbled = DashboardQuery {
            start: Some("last tuesday".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            DashboardRequest::build_at("AAPL", garbled, &settings, today()),
            Err(DashError::InvalidRequest(_))
        ));

        assert!(matches!(
            DashboardRequest::build_at("", DashboardQuery::default(), &settings, today()),
            Err(DashError::InvalidSymbol(_))
        ));
    }

    #[test]
    fn test_blank_item_is_ignored() {
        let query = DashboardQuery {
            item: Some("   ".to_string()),
            start: Some("".to_string()),
            ..Default::default()
        };
        let request = DashboardRequest::build_at("AAPL", query, &DashboardSettings::default(), today()).unwrap();
        assert_eq!(request.options.item, None);
        assert_eq!(request.range.start, date(2018, 1, 1));
    }
}
