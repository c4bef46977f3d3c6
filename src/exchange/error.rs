//! Exchange Error Types

use thiserror::Error;
use uuid::Uuid;

use super::state::ExchangeStatus;
use crate::fee::RateError;
use crate::gateway::GatewayError;
use crate::money::MoneyError;

/// Exchange error types
///
/// Codes are stable strings for API responses.
#[derive(Error, Debug, Clone)]
pub enum ExchangeError {
    /// Malformed or inconsistent request, rejected before touching the saga
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Submitted data disagrees with what the chain reports
    #[error("Stale data: {0}")]
    StaleData(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Invariant violation: a handler asked for an edge that is not in the graph
    #[error("Illegal transition {from} -> {to}")]
    IllegalTransition {
        from: ExchangeStatus,
        to: ExchangeStatus,
    },

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// Rates or amounts that cannot be priced while the saga runs
    #[error("Pricing failed: {0}")]
    Pricing(#[from] RateError),

    /// The exchange was stored but its first run failed; it resumes on
    /// refresh or by the recovery worker
    #[error("Exchange {uuid} created but not started: {source}")]
    Incomplete {
        uuid: Uuid,
        source: Box<ExchangeError>,
    },

    #[error("Concurrent modification: {0}")]
    ConcurrentModification(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ExchangeError {
    pub fn code(&self) -> &'static str {
        match self {
            ExchangeError::Validation(_) => "VALIDATION_ERROR",
            ExchangeError::StaleData(_) => "STALE_DATA",
            ExchangeError::NotFound(_) => "NOT_FOUND",
            ExchangeError::IllegalTransition { .. } => "ILLEGAL_TRANSITION",
            ExchangeError::Gateway(_) => "GATEWAY_ERROR",
            ExchangeError::Pricing(_) => "PRICING_ERROR",
            ExchangeError::Incomplete { source, .. } => source.code(),
            ExchangeError::ConcurrentModification(_) => "CONCURRENT_MODIFICATION",
            ExchangeError::Database(_) => "DATABASE_ERROR",
            ExchangeError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            ExchangeError::Validation(_) | ExchangeError::StaleData(_) => 400,
            ExchangeError::NotFound(_) => 404,
            ExchangeError::ConcurrentModification(_) => 409,
            ExchangeError::Gateway(_) => 503,
            ExchangeError::Incomplete { source, .. } => source.http_status(),
            ExchangeError::IllegalTransition { .. }
            | ExchangeError::Pricing(_)
            | ExchangeError::Database(_)
            | ExchangeError::Internal(_) => 500,
        }
    }
}

impl From<sqlx::Error> for ExchangeError {
    fn from(e: sqlx::Error) -> Self {
        ExchangeError::Database(e.to_string())
    }
}

impl From<MoneyError> for ExchangeError {
    fn from(e: MoneyError) -> Self {
        ExchangeError::Validation(e.to_string())
    }
}
