use crate::models::EntryInput;
use rust_decimal::Decimal;
use thiserror::Error;

/// SQLSTATE codes the ledger maps onto domain errors.
const UNIQUE_VIOLATION: &str = "23505";
const LOCK_NOT_AVAILABLE: &str = "55P03";
const QUERY_CANCELED: &str = "57014";

/// Application-wide error type.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Entries of a transaction do not net to zero.
    #[error("Invariant violated: entries sum to {total}, expected 0")]
    Invariant {
        total: Decimal,
        entries: Vec<EntryInput>,
    },

    #[error("Lock timeout: {0}")]
    LockTimeout(String),

    #[error("Persistence error while {context}: {source}")]
    Persistence {
        context: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Wraps a database error, classifying constraint and lock failures.
    pub fn database(context: impl Into<String>, source: sqlx::Error) -> Self {
        let context = context.into();
        let code = source
            .as_database_error()
            .and_then(|db| db.code())
            .map(|code| code.into_owned());

        match code.as_deref() {
            Some(UNIQUE_VIOLATION) => AppError::Conflict(format!("{}: {}", context, source)),
            Some(LOCK_NOT_AVAILABLE) | Some(QUERY_CANCELED) => {
                AppError::LockTimeout(format!("{}: {}", context, source))
            }
            _ => AppError::Persistence { context, source },
        }
    }

    /// Returns a closure suitable for `map_err` at a database call site.
    pub fn db(context: &'static str) -> impl FnOnce(sqlx::Error) -> AppError {
        move |source| AppError::database(context, source)
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, AppError::Conflict(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, AppError::NotFound(_))
    }

    /// Short, stable label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "validation",
            AppError::Conflict(_) => "conflict",
            AppError::NotFound(_) => "not_found",
            AppError::Invariant { .. } => "invariant",
            AppError::LockTimeout(_) => "lock_timeout",
            AppError::Persistence { .. } => "persistence",
            AppError::Config(_) => "config",
            AppError::Internal(_) => "internal",
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_database_error_is_persistence() {
        let err = AppError::database("creating account", sqlx::Error::RowNotFound);
        assert!(matches!(err, AppError::Persistence { .. }));
        assert!(err.to_string().contains("creating account"));
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(AppError::Validation("x".into()).kind(), "validation");
        assert_eq!(AppError::LockTimeout("x".into()).kind(), "lock_timeout");
        assert!(AppError::Conflict("dup".into()).is_conflict());
        assert!(AppError::NotFound("gone".into()).is_not_found());
    }

    #[test]
    fn test_invariant_message_carries_total() {
        let err = AppError::Invariant {
            total: Decimal::new(-1, 0),
            entries: vec![],
        };
        assert_eq!(err.to_string(), "Invariant violated: entries sum to -1, expected 0");
    }
}
