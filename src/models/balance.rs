use crate::models::DimensionFilter;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Aggregated sums over a filtered set of entries. Never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Balance {
    pub settled: Decimal,
    pub pending: Decimal,
}

impl Balance {
    /// Every committed entry is settled, so both sums are the same figure.
    pub fn settled(sum: Decimal) -> Self {
        Self {
            settled: sum,
            pending: sum,
        }
    }
}

/// Half-open `[from, to)` window on a transaction's booked-at instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookedAtPeriod {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl BookedAtPeriod {
    pub fn contains(&self, booked_at: DateTime<Utc>) -> bool {
        self.from.map_or(true, |from| booked_at >= from) && self.to.map_or(true, |to| booked_at < to)
    }
}

/// Which entries to aggregate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntryFilter {
    pub account_id: Option<Uuid>,
    pub sub_account_id: Option<Uuid>,
    pub transaction_id: Option<Uuid>,
    pub booked_at: BookedAtPeriod,
    pub dimensions: DimensionFilter,
}

impl EntryFilter {
    pub fn sub_account(sub_account_id: Uuid) -> Self {
        Self {
            sub_account_id: Some(sub_account_id),
            ..Default::default()
        }
    }

    pub fn account(account_id: Uuid) -> Self {
        Self {
            account_id: Some(account_id),
            ..Default::default()
        }
    }

    pub fn with_dimensions(mut self, dimensions: DimensionFilter) -> Self {
        self.dimensions = dimensions;
        self
    }

    pub fn with_period(mut self, booked_at: BookedAtPeriod) -> Self {
        self.booked_at = booked_at;
        self
    }

    pub fn with_transaction(mut self, transaction_id: Uuid) -> Self {
        self.transaction_id = Some(transaction_id);
        self
    }
}

/// A balance query scoped to one namespace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SumEntriesQuery {
    pub namespace: String,
    pub filter: EntryFilter,
}

impl SumEntriesQuery {
    pub fn new(namespace: impl Into<String>, filter: EntryFilter) -> Self {
        Self {
            namespace: namespace.into(),
            filter,
        }
    }
}
