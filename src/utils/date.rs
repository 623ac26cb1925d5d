use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;

/// Parse an ISO calendar date (YYYY-MM-DD).
pub fn parse_date(date_str: &str) -> Result<NaiveDate, chrono::ParseError> {
    NaiveDate::parse_from_str(date_str.trim(), "%Y-%m-%d")
}

/// Today's calendar date in the given market timezone.
pub fn today_in(tz: Tz) -> NaiveDate {
    Utc::now().with_timezone(&tz).date_naive()
}

/// Calendar date of a unix timestamp in the given exchange timezone.
pub fn local_date(timestamp: i64, tz: Tz) -> Option<NaiveDate> {
    tz.timestamp_opt(timestamp, 0).single().map(|dt| dt.date_naive())
}

/// Calendar date of a unix timestamp in UTC.
pub fn utc_date(timestamp: i64) -> Option<NaiveDate> {
    DateTime::<Utc>::from_timestamp(timestamp, 0).map(|dt| dt.date_naive())
}

/// Midnight UTC of the given date as a unix timestamp.
pub fn unix_midnight(date: NaiveDate) -> i64 {
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp())
        .unwrap_or_default()
}

/// Sunday closing the week that contains `date` (the date itself on Sundays).
pub fn week_end(date: NaiveDate) -> NaiveDate {
    let days_ahead = (7 - date.weekday().num_days_from_sunday()) % 7;
    date + Duration::days(days_ahead as i64)
}

/// Last calendar day of the month that contains `date`.
pub fn month_end(date: NaiveDate) -> NaiveDate {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|first| first.pred_opt())
        .unwrap_or(date)
}

/// The boundary following `boundary`, which must itself be a week end.
pub fn next_week_end(boundary: NaiveDate) -> NaiveDate {
    boundary + Duration::days(7)
}

/// The month end following `boundary`.
pub fn next_month_end(boundary: NaiveDate) -> NaiveDate {
    boundary
        .succ_opt()
        .map(month_end)
        .unwrap_or(boundary)
}
