use axum::{
    extract::Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::NaiveDate;
use serde::Serialize;
use tracing::debug;

/// Errors a dashboard panel can surface to the user.
///
/// Every variant is rendered by the panel that hit it; the other panels keep
/// working because each one is served by its own endpoint.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DashError {
    #[error("unknown ticker symbol '{0}'")]
    InvalidSymbol(String),

    #[error("no data for {symbol} between {start} and {end}")]
    EmptyRange {
        symbol: String,
        start: NaiveDate,
        end: NaiveDate,
    },

    #[error("market data provider unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("no data for field '{field}' of {symbol}")]
    MissingField { symbol: String, field: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl DashError {
    pub fn missing(symbol: impl ToString, field: impl Into<String>) -> Self {
        DashError::MissingField {
            symbol: symbol.to_string(),
            field: field.into(),
        }
    }

    /// Stable machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            DashError::InvalidSymbol(_) => "invalid_symbol",
            DashError::EmptyRange { .. } => "empty_range",
            DashError::UpstreamUnavailable(_) => "upstream_unavailable",
            DashError::MissingField { .. } => "missing_field",
            DashError::InvalidRequest(_) => "invalid_request",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            DashError::InvalidSymbol(_) | DashError::EmptyRange { .. } | DashError::MissingField { .. } => {
                StatusCode::NOT_FOUND
            }
            DashError::UpstreamUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            DashError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

/// JSON body returned by a failing panel endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
}

impl From<&DashError> for ErrorBody {
    fn from(error: &DashError) -> Self {
        Self {
            error: error.kind(),
            message: error.to_string(),
        }
    }
}

impl IntoResponse for DashError {
    fn into_response(self) -> Response {
        let status = self.status();
        debug!(kind = self.kind(), %status, "Rendering panel error");
        (status, Json(ErrorBody::from(&self))).into_response()
    }
}
