use std::collections::BTreeMap;
use std::fmt;

use http::StatusCode;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    UnprocessableEntity(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Dependency(String),
    #[error("{0}")]
    Internal(String),
    #[error(transparent)]
    StatementComputation(#[from] StatementComputationError),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) | Self::StatementComputation(_) => StatusCode::BAD_REQUEST,
            Self::UnprocessableEntity(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Dependency(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Raised when at least one in-scope money record cannot be expressed in PYG.
///
/// A statement is either computed from every record or not at all, so this
/// carries enough detail for an operator to find and fix the offending rows.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct StatementComputationError {
    pub missing_fx_rate_to_pyg: usize,
    pub unsupported_currency: usize,
    pub counts_by_kind: BTreeMap<String, usize>,
    pub sample_ids: Vec<String>,
}

impl fmt::Display for StatementComputationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sample_ids = if self.sample_ids.is_empty() {
            "n/a".to_string()
        } else {
            self.sample_ids.join(", ")
        };
        write!(
            f,
            "Cannot compute owner statement in PYG for this period. missing_fx_rate_to_pyg={}, unsupported_currency={}. Fix the underlying records (sample ids: {sample_ids}).",
            self.missing_fx_rate_to_pyg, self.unsupported_currency
        )
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use http::StatusCode;

    use super::{AppError, StatementComputationError};

    #[test]
    fn statement_errors_render_counts_and_samples() {
        let error = StatementComputationError {
            missing_fx_rate_to_pyg: 1,
            unsupported_currency: 2,
            counts_by_kind: BTreeMap::from([
                ("missing_fx_rate_to_pyg".to_string(), 1),
                ("unsupported_currency:EUR".to_string(), 2),
            ]),
            sample_ids: vec!["exp-1".to_string(), "col-9".to_string()],
        };
        let message = error.to_string();
        assert!(message.contains("missing_fx_rate_to_pyg=1"));
        assert!(message.contains("unsupported_currency=2"));
        assert!(message.contains("exp-1, col-9"));

        let app_error = AppError::from(error);
        assert_eq!(app_error.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn empty_samples_render_placeholder() {
        let error = StatementComputationError {
            missing_fx_rate_to_pyg: 0,
            unsupported_currency: 1,
            counts_by_kind: BTreeMap::new(),
            sample_ids: Vec::new(),
        };
        assert!(error.to_string().contains("(sample ids: n/a)"));
    }

    #[test]
    fn maps_dependency_failures_to_bad_gateway() {
        let error = AppError::Dependency("Database operation failed.".to_string());
        assert_eq!(error.status_code(), StatusCode::BAD_GATEWAY);
    }
}
