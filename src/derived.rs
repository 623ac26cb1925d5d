//! Pure transforms from cleaned price series to what the charts render.
//!
//! Nothing here fails on numeric edge cases: undersized windows yield
//! "no value" points and empty inputs yield empty outputs.

use crate::data_structures::{DateRange, EarningsTable, PriceSeries, Series, StatementTable, Symbol};
use crate::error::DashError;
use crate::provider::DataProvider;
use crate::utils::{month_end, next_month_end, next_week_end, week_end};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, warn};

/// Rolling window result: `None` until the window is full.
pub type WindowSeries = Series<Option<f64>>;

// --- Rolling windows ---

/// Simple trailing mean. Windows 0 and 1 reproduce the input.
pub fn moving_average(series: &PriceSeries, window: usize) -> WindowSeries {
    let period = window.max(1);
    let values = series.values();

    let mut ma_values = vec![None; values.len()];
    if values.len() >= period {
        for (offset, window_values) in values.windows(period).enumerate() {
            let sum: f64 = window_values.iter().sum();
            ma_values[offset + period - 1] = Some(sum / period as f64);
        }
    }

    series.with_values(ma_values)
}

/// Rolling sample standard deviation (n - 1). Windows below 2 are all `None`.
pub fn rolling_std(series: &PriceSeries, window: usize) -> WindowSeries {
    let values = series.values();

    let mut std_values = vec![None; values.len()];
    if window >= 2 && values.len() >= window {
        for (offset, window_values) in values.windows(window).enumerate() {
            let mean = window_values.iter().sum::<f64>() / window as f64;
            let squares: f64 = window_values.iter().map(|v| (v - mean).powi(2)).sum();
            std_values[offset + window - 1] = Some((squares / (window - 1) as f64).sqrt());
        }
    }

    series.with_values(std_values)
}

// --- Returns ---

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReturnPeriod {
    #[default]
    Daily,
    Weekly,
    Monthly,
}

impl ReturnPeriod {
    pub fn label(&self) -> &'static str {
        match self {
            ReturnPeriod::Daily => "Daily",
            ReturnPeriod::Weekly => "Weekly",
            ReturnPeriod::Monthly => "Monthly",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ReturnSeries {
    pub label: String,
    pub ticker: Symbol,
    pub period: ReturnPeriod,
    pub series: Series<f64>,
    pub mean: Option<f64>,
    pub std: Option<f64>,
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round_ties_even() / 1000.0
}

fn mean_and_std(values: &[f64]) -> (Option<f64>, Option<f64>) {
    if values.is_empty() {
        return (None, None);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (Some(round3(mean)), Some(round3(variance.sqrt())))
}

/// Samples the series at each period boundary between the first and last
/// observation, carrying the last known value forward.
pub fn resample_ffill(series: &PriceSeries, period: ReturnPeriod) -> PriceSeries {
    let (boundary, next): (fn(NaiveDate) -> NaiveDate, fn(NaiveDate) -> NaiveDate) = match period {
        ReturnPeriod::Daily => return series.clone(),
        ReturnPeriod::Weekly => (week_end, next_week_end),
        ReturnPeriod::Monthly => (month_end, next_month_end),
    };

    let (Some(&first), Some(&last)) = (series.dates().first(), series.dates().last()) else {
        return Series::empty();
    };

    let dates = series.dates();
    let values = series.values();
    let last_boundary = boundary(last);

    let mut points = Vec::new();
    let mut idx = 0;
    let mut current = boundary(first);
    while current <= last_boundary {
        while idx + 1 < dates.len() && dates[idx + 1] <= current {
            idx += 1;
        }
        points.push((current, values[idx]));
        current = next(current);
    }

    Series::from_points(points)
}

/// Percent change between consecutive (resampled) values; the first period is dropped.
///
/// A change from a zero price is undefined, so that point is omitted rather
/// than reported as infinite. Mean and std cover the remaining points only.
pub fn period_returns(ticker: &Symbol, series: &PriceSeries, period: ReturnPeriod) -> ReturnSeries {
    let sampled = resample_ffill(series, period);
    let dates = sampled.dates();
    let values = sampled.values();

    let points: Vec<(NaiveDate, f64)> = (1..values.len())
        .filter(|&i| values[i - 1] != 0.0)
        .map(|i| (dates[i], values[i] / values[i - 1] - 1.0))
        .collect();

    let returns = Series::from_points(points);
    let (mean, std) = mean_and_std(returns.values());

    ReturnSeries {
        label: format!("{} {} Returns", ticker, period.label()),
        ticker: ticker.clone(),
        period,
        series: returns,
        mean,
        std,
    }
}

/// Comparison ticker that could not be rendered.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OmittedTicker {
    pub ticker: String,
    pub error: &'static str,
    pub message: String,
}

impl OmittedTicker {
    fn new(ticker: &str, error: &DashError) -> Self {
        Self {
            ticker: ticker.to_string(),
            error: error.kind(),
            message: error.to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Comparison {
    pub period: ReturnPeriod,
    pub series: Vec<ReturnSeries>,
    pub omitted: Vec<OmittedTicker>,
}

/// Overlays the base returns with each other ticker's returns for the same
/// period. Every series keeps its own date index. A ticker that fails is
/// omitted and reported; the rest still render.
pub async fn compare_returns(
    provider: &DataProvider,
    base: ReturnSeries,
    range: DateRange,
    others: &[String],
) -> Comparison {
    let period = base.period;
    let mut seen: HashSet<Symbol> = HashSet::from([base.ticker.clone()]);
    let mut series = vec![base];
    let mut omitted = Vec::new();

    for raw in others.iter().map(|t| t.trim()).filter(|t| !t.is_empty()) {
        let ticker = match Symbol::parse(raw) {
            Ok(ticker) => ticker,
            Err(e) => {
                warn!(ticker = raw, error = %e, "Skipping comparison ticker");
                omitted.push(OmittedTicker::new(raw, &e));
                continue;
            }
        };
        if !seen.insert(ticker.clone()) {
            debug!(ticker = %ticker, "Duplicate comparison ticker");
            continue;
        }

        match provider.prices(&ticker, range).await {
            Ok(prices) => series.push(period_returns(&ticker, &prices, period)),
            Err(e) => {
                warn!(ticker = %ticker, error = %e, "Omitting comparison ticker");
                omitted.push(OmittedTicker::new(ticker.as_str(), &e));
            }
        }
    }

    Comparison { period, series, omitted }
}

// --- Price overlays ---

/// What to draw on top of the adjusted close.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Overlay {
    #[default]
    None,
    MovingAverage {
        window: usize,
    },
    StdDev {
        window: usize,
    },
    Both {
        ma_window: usize,
        std_window: usize,
    },
}

impl Overlay {
    pub fn from_windows(ma: Option<usize>, std: Option<usize>) -> Self {
        match (ma, std) {
            (None, None) => Overlay::None,
            (Some(window), None) => Overlay::MovingAverage { window },
            (None, Some(window)) => Overlay::StdDev { window },
            (Some(ma_window), Some(std_window)) => Overlay::Both { ma_window, std_window },
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PriceChart {
    pub overlay: Overlay,
    pub prices: PriceSeries,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub moving_average: Option<WindowSeries>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rolling_std: Option<WindowSeries>,
}

pub fn apply_overlay(series: &PriceSeries, overlay: Overlay) -> PriceChart {
    let (moving_average, rolling_std) = match overlay {
        Overlay::None => (None, None),
        Overlay::MovingAverage { window } => (Some(moving_average(series, window)), None),
        Overlay::StdDev { window } => (None, Some(rolling_std(series, window))),
        Overlay::Both { ma_window, std_window } => (
            Some(moving_average(series, ma_window)),
            Some(rolling_std(series, std_window)),
        ),
    };

    PriceChart {
        overlay,
        prices: series.clone(),
        moving_average,
        rolling_std,
    }
}

// --- Table projections ---

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartKind {
    #[default]
    Line,
    Bar,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StatementPoint {
    pub period: NaiveDate,
    pub value: Option<f64>,
}

/// One statement line item as a chartable series, in the table's column order.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RowProjection {
    pub item: String,
    pub points: Vec<StatementPoint>,
}

pub fn statement_row(symbol: &Symbol, table: &StatementTable, item: &str) -> Result<RowProjection, DashError> {
    let row = table
        .row(item.trim())
        .ok_or_else(|| DashError::missing(symbol, item.trim()))?;

    let points = table
        .periods
        .iter()
        .zip(row.values.iter())
        .map(|(period, value)| StatementPoint {
            period: *period,
            value: *value,
        })
        .collect();

    Ok(RowProjection {
        item: row.item.clone(),
        points,
    })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EarningsField {
    Revenue,
    Earnings,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct EarningsProjection {
    pub years: Vec<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revenue: Option<Vec<f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub earnings: Option<Vec<f64>>,
}

pub fn earnings_projection(table: &EarningsTable, fields: &[EarningsField]) -> EarningsProjection {
    if fields.is_empty() {
        return EarningsProjection::default();
    }

    let column = |field: EarningsField| {
        fields.contains(&field).then(|| {
            table
                .rows
                .iter()
                .map(|row| match field {
                    EarningsField::Revenue => row.revenue,
                    EarningsField::Earnings => row.earnings,
                })
                .collect::<Vec<f64>>()
        })
    };

    EarningsProjection {
        years: table.rows.iter().map(|row| row.year).collect(),
        revenue: column(EarningsField::Revenue),
        earnings: column(EarningsField::Earnings),
    }
}
