use crate::error::DashError;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// --- Request Keys ---

const MAX_SYMBOL_LEN: usize = 12;

/// Upper-cased ticker symbol, validated before anything goes on the wire.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Symbol(String);

impl Symbol {
    pub fn parse(raw: &str) -> Result<Self, DashError> {
        let symbol = raw.trim().to_uppercase();
        let valid_chars = symbol
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '^' | '='));

        if symbol.is_empty() || symbol.len() > MAX_SYMBOL_LEN || !valid_chars {
            return Err(DashError::InvalidSymbol(raw.trim().to_string()));
        }
        Ok(Self(symbol))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Inclusive calendar range, `start <= end`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, DashError> {
        if start > end {
            return Err(DashError::InvalidRequest(format!(
                "start date {} is after end date {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

// --- Series ---

/// Date-indexed series with unique, strictly ascending dates.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Series<T> {
    dates: Vec<NaiveDate>,
    values: Vec<T>,
}

impl<T> Series<T> {
    pub fn empty() -> Self {
        Self {
            dates: Vec::new(),
            values: Vec::new(),
        }
    }

    /// Builds a series from unordered points. Later points win on duplicate dates.
    pub fn from_points(mut points: Vec<(NaiveDate, T)>) -> Self {
        points.sort_by_key(|(date, _)| *date);

        let mut dates: Vec<NaiveDate> = Vec::with_capacity(points.len());
        let mut values: Vec<T> = Vec::with_capacity(points.len());
        for (date, value) in points {
            if dates.last() == Some(&date) {
                if let Some(last) = values.last_mut() {
                    *last = value;
                }
            } else {
                dates.push(date);
                values.push(value);
            }
        }

        Self { dates, values }
    }

    /// Re-uses this series' date index for a derived column of the same length.
    pub(crate) fn with_values<U>(&self, values: Vec<U>) -> Series<U> {
        debug_assert_eq!(self.dates.len(), values.len());
        Series {
            dates: self.dates.clone(),
            values,
        }
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn values(&self) -> &[T] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NaiveDate, &T)> + '_ {
        self.dates.iter().copied().zip(self.values.iter())
    }

    pub fn get(&self, date: NaiveDate) -> Option<&T> {
        self.dates
            .binary_search(&date)
            .ok()
            .and_then(|idx| self.values.get(idx))
    }
}

/// Adjusted close per trading day.
pub type PriceSeries = Series<f64>;

/// Shares traded per trading day.
pub type VolumeSeries = Series<u64>;

/// Price and volume share the same trading days.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct History {
    pub prices: PriceSeries,
    pub volumes: VolumeSeries,
}

// --- Company Profile ---

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileField {
    CurrentPrice,
    MarketCap,
    Volume,
    Beta,
    ReturnOnAssets,
    ReturnOnEquity,
    TrailingPe,
}

impl ProfileField {
    pub const ALL: [ProfileField; 7] = [
        ProfileField::CurrentPrice,
        ProfileField::MarketCap,
        ProfileField::Volume,
        ProfileField::Beta,
        ProfileField::ReturnOnAssets,
        ProfileField::ReturnOnEquity,
        ProfileField::TrailingPe,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            ProfileField::CurrentPrice => "Current Price",
            ProfileField::MarketCap => "Market Cap",
            ProfileField::Volume => "Volume",
            ProfileField::Beta => "Beta",
            ProfileField::ReturnOnAssets => "RoA",
            ProfileField::ReturnOnEquity => "RoE",
            ProfileField::TrailingPe => "Trailing PE",
        }
    }
}

/// Key figures shown in the info panel. Absent fields are simply not stored.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CompanyProfile {
    pub symbol: Symbol,
    values: BTreeMap<ProfileField, f64>,
}

/// One line of the info panel.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProfileRow {
    pub field: ProfileField,
    pub label: &'static str,
    pub value: Option<f64>,
}

impl CompanyProfile {
    pub fn new(symbol: Symbol, values: impl IntoIterator<Item = (ProfileField, Option<f64>)>) -> Self {
        let values = values
            .into_iter()
            .filter_map(|(field, value)| value.filter(|v| v.is_finite()).map(|v| (field, v)))
            .collect();
        Self { symbol, values }
    }

    pub fn get(&self, field: ProfileField) -> Result<f64, DashError> {
        self.values
            .get(&field)
            .copied()
            .ok_or_else(|| DashError::missing(&self.symbol, field.label()))
    }

    pub fn rows(&self) -> Vec<ProfileRow> {
        ProfileField::ALL
            .iter()
            .map(|field| ProfileRow {
                field: *field,
                label: field.label(),
                value: self.values.get(field).copied(),
            })
            .collect()
    }
}

// --- Fundamental Tables ---

/// One reporting period of a statement as delivered by the source.
#[derive(Clone, Debug, PartialEq)]
pub struct RawReport {
    pub end_date: NaiveDate,
    pub items: Vec<(String, Option<f64>)>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StatementRow {
    pub item: String,
    pub values: Vec<Option<f64>>,
}

/// Line item x reporting period. Periods keep the source order (newest first).
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StatementTable {
    pub periods: Vec<NaiveDate>,
    pub rows: Vec<StatementRow>,
}

impl StatementTable {
    /// Pivots per-period reports into a table, dropping all-missing rows and columns.
    pub fn from_reports(reports: &[RawReport]) -> Self {
        let periods: Vec<NaiveDate> = reports.iter().map(|r| r.end_date).collect();

        let mut items: Vec<String> = Vec::new();
        for report in reports {
            for (item, _) in &report.items {
                if !items.contains(item) {
                    items.push(item.clone());
                }
            }
        }

        let rows = items
            .into_iter()
            .map(|item| {
                let values = reports
                    .iter()
                    .map(|report| {
                        report
                            .items
                            .iter()
                            .find(|(name, _)| *name == item)
                            .and_then(|(_, value)| *value)
                            .filter(|v| v.is_finite())
                    })
                    .collect();
                StatementRow { item, values }
            })
            .collect();

        Self { periods, rows }.cleaned()
    }

    fn cleaned(mut self) -> Self {
        self.rows.retain(|row| row.values.iter().any(Option::is_some));

        let keep: Vec<bool> = (0..self.periods.len())
            .map(|col| self.rows.iter().any(|row| row.values[col].is_some()))
            .collect();

        let mut col = 0;
        self.periods.retain(|_| {
            let kept = keep[col];
            col += 1;
            kept
        });
        for row in &mut self.rows {
            let mut col = 0;
            row.values.retain(|_| {
                let kept = keep[col];
                col += 1;
                kept
            });
        }

        self
    }

    pub fn row(&self, item: &str) -> Option<&StatementRow> {
        self.rows.iter().find(|row| row.item == item)
    }

    pub fn items(&self) -> impl Iterator<Item = &str> {
        self.rows.iter().map(|row| row.item.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EarningsRow {
    pub year: i32,
    pub revenue: f64,
    pub earnings: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EarningsTable {
    pub rows: Vec<EarningsRow>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HolderRow {
    pub holder: String,
    pub shares: u64,
    pub date_reported: NaiveDate,
    pub value: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HoldersTable {
    pub rows: Vec<HolderRow>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RecommendationRow {
    pub date: NaiveDate,
    pub firm: String,
    pub action: String,
    pub from_grade: String,
    pub to_grade: String,
}

/// Most recent analyst actions, oldest first.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RecommendationsTable {
    pub rows: Vec<RecommendationRow>,
}

// --- Raw Fundamentals ---

#[derive(Clone, Debug, PartialEq)]
pub struct RawEarnings {
    pub year: i32,
    pub revenue: Option<f64>,
    pub earnings: Option<f64>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RawHolder {
    pub holder: Option<String>,
    pub shares: Option<u64>,
    pub date_reported: Option<NaiveDate>,
    pub value: Option<u64>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RawRecommendation {
    pub graded_at: DateTime<Utc>,
    pub firm: String,
    pub action: String,
    pub from_grade: String,
    pub to_grade: String,
}

/// Fundamentals snapshot as delivered by the source. `None` means the report
/// is not available for this symbol.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FundamentalsSnapshot {
    pub profile: Vec<(ProfileField, Option<f64>)>,
    pub income_statements: Option<Vec<RawReport>>,
    pub balance_sheets: Option<Vec<RawReport>>,
    pub earnings: Option<Vec<RawEarnings>>,
    pub holders: Option<Vec<RawHolder>>,
    pub recommendations: Option<Vec<RawRecommendation>>,
}

// --- Bundle ---

/// Everything the dashboard shows for one (ticker, start, end) selection.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StockBundle {
    pub symbol: Symbol,
    pub range: DateRange,
    pub prices: PriceSeries,
    pub volumes: VolumeSeries,
    pub profile: CompanyProfile,
    pub financials: StatementTable,
    pub balance_sheet: StatementTable,
    pub earnings: EarningsTable,
    pub holders: HoldersTable,
    pub recommendations: RecommendationsTable,
}
