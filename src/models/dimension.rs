use crate::error::AppError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// The fixed set of axes a sub-account can be parameterised by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "dimension_key", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DimensionKey {
    Currency,
    TaxCode,
    Feature,
    CreditPriority,
}

impl DimensionKey {
    pub const ALL: [DimensionKey; 4] = [
        DimensionKey::Currency,
        DimensionKey::TaxCode,
        DimensionKey::Feature,
        DimensionKey::CreditPriority,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DimensionKey::Currency => "currency",
            DimensionKey::TaxCode => "tax_code",
            DimensionKey::Feature => "feature",
            DimensionKey::CreditPriority => "credit_priority",
        }
    }
}

impl fmt::Display for DimensionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DimensionKey {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DimensionKey::ALL
            .into_iter()
            .find(|key| key.as_str() == s)
            .ok_or_else(|| AppError::Validation(format!("Unsupported dimension key '{}'", s)))
    }
}

/// A named axis value, e.g. `currency=USD`. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Dimension {
    pub id: Uuid,
    pub namespace: String,
    pub key: DimensionKey,
    pub value: String,
    pub display_value: String,
    pub created_at: DateTime<Utc>,
}

impl Dimension {
    pub fn new(
        namespace: impl Into<String>,
        key: DimensionKey,
        value: impl Into<String>,
        display_value: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            namespace: namespace.into(),
            key,
            value: value.into(),
            display_value: display_value.into(),
            created_at,
        }
    }
}

/// Request to create a dimension. The key is free text until validated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateDimensionInput {
    pub namespace: String,
    pub key: String,
    pub value: String,
    pub display_value: String,
}

impl CreateDimensionInput {
    pub fn new(
        namespace: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<String>,
        display_value: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            key: key.into(),
            value: value.into(),
            display_value: display_value.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dimension_key_parse() {
        assert_eq!("currency".parse::<DimensionKey>().unwrap(), DimensionKey::Currency);
        assert_eq!("tax_code".parse::<DimensionKey>().unwrap(), DimensionKey::TaxCode);
        assert_eq!(
            "credit_priority".parse::<DimensionKey>().unwrap(),
            DimensionKey::CreditPriority
        );
    }

    #[test]
    fn test_dimension_key_rejects_unknown() {
        let err = "region".parse::<DimensionKey>().unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn test_dimension_key_display_round_trips_names() {
        for key in DimensionKey::ALL {
            assert_eq!(key.to_string().parse::<DimensionKey>().unwrap(), key);
        }
    }
}
