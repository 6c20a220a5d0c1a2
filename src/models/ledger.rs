use crate::error::AppError;
use crate::models::{AccountType, Cursor, Dimension, PostingAddress};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::BTreeSet;
use uuid::Uuid;

/// An amount to be posted against one sub-account. Positive and negative
/// amounts are both allowed; a transaction's entries must net to zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryInput {
    pub address: PostingAddress,
    pub amount: Decimal,
}

impl EntryInput {
    pub fn new(address: PostingAddress, amount: Decimal) -> Self {
        Self { address, amount }
    }
}

/// A set of entries to be booked atomically at one instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionInput {
    pub booked_at: DateTime<Utc>,
    pub entries: Vec<EntryInput>,
}

impl TransactionInput {
    pub fn new(booked_at: DateTime<Utc>, entries: Vec<EntryInput>) -> Self {
        Self { booked_at, entries }
    }

    /// Checks that the entries are non-empty and net to exactly zero.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.entries.is_empty() {
            return Err(AppError::Validation("Transaction has no entries".to_string()));
        }
        validate_invariance(&self.entries)
    }

    pub fn sub_account_ids(&self) -> impl Iterator<Item = Uuid> + '_ {
        self.entries.iter().map(|e| e.address.sub_account_id)
    }
}

/// Sums entry amounts exactly; anything but zero is an invariant violation.
pub fn validate_invariance(entries: &[EntryInput]) -> Result<(), AppError> {
    let total = entries
        .iter()
        .try_fold(Decimal::ZERO, |acc, entry| acc.checked_add(entry.amount))
        .ok_or_else(|| AppError::Validation("Entry amounts overflow".to_string()))?;

    if total.is_zero() {
        Ok(())
    } else {
        Err(AppError::Invariant {
            total,
            entries: entries.to_vec(),
        })
    }
}

/// A set of transactions to be committed together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionGroupInput {
    pub namespace: String,
    pub annotations: serde_json::Value,
    pub transactions: Vec<TransactionInput>,
}

impl TransactionGroupInput {
    pub fn new(namespace: impl Into<String>, transactions: Vec<TransactionInput>) -> Self {
        Self {
            namespace: namespace.into(),
            annotations: serde_json::Value::Object(Default::default()),
            transactions,
        }
    }

    pub fn with_annotations(mut self, annotations: serde_json::Value) -> Self {
        self.annotations = annotations;
        self
    }

    /// Distinct sub-accounts referenced by any entry, in sorted order.
    pub fn sub_account_ids(&self) -> Vec<Uuid> {
        self.transactions
            .iter()
            .flat_map(TransactionInput::sub_account_ids)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

/// One signed amount booked against a sub-account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Entry {
    pub id: Uuid,
    /// Insertion order assigned by storage; zero until booked.
    pub seq: i64,
    pub namespace: String,
    pub transaction_id: Uuid,
    pub sub_account_id: Uuid,
    pub account_type: AccountType,
    pub amount: Decimal,
    pub created_at: DateTime<Utc>,
    /// Populated only when a listing asks for dimension expansion.
    #[sqlx(skip)]
    pub dimensions: Vec<Dimension>,
}

impl Entry {
    pub fn new(namespace: &str, transaction_id: Uuid, input: &EntryInput, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            seq: 0,
            namespace: namespace.to_string(),
            transaction_id,
            sub_account_id: input.address.sub_account_id,
            account_type: input.address.account_type,
            amount: input.amount,
            created_at,
            dimensions: Vec::new(),
        }
    }

    pub fn cursor(&self) -> Cursor {
        Cursor::new(self.created_at, self.seq)
    }

    pub fn address(&self) -> PostingAddress {
        PostingAddress {
            sub_account_id: self.sub_account_id,
            account_type: self.account_type,
        }
    }
}

/// A balanced set of entries booked at one instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Transaction {
    pub id: Uuid,
    pub seq: i64,
    pub namespace: String,
    pub group_id: Uuid,
    pub booked_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    #[sqlx(skip)]
    pub entries: Vec<Entry>,
}

impl Transaction {
    pub fn new(namespace: &str, group_id: Uuid, booked_at: DateTime<Utc>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            seq: 0,
            namespace: namespace.to_string(),
            group_id,
            booked_at,
            created_at,
            entries: Vec::new(),
        }
    }

    pub fn cursor(&self) -> Cursor {
        Cursor::new(self.created_at, self.seq)
    }

    pub fn total(&self) -> Decimal {
        self.entries.iter().map(|e| e.amount).sum()
    }
}

/// Transactions persisted together by one commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct TransactionGroup {
    pub id: Uuid,
    pub namespace: String,
    pub annotations: serde_json::Value,
    pub created_at: DateTime<Utc>,
    #[sqlx(skip)]
    pub transactions: Vec<Transaction>,
}

impl TransactionGroup {
    pub fn new(namespace: &str, annotations: serde_json::Value, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            namespace: namespace.to_string(),
            annotations,
            created_at,
            transactions: Vec::new(),
        }
    }

    pub fn entry_count(&self) -> usize {
        self.transactions.iter().map(|t| t.entries.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn entry(amount: Decimal) -> EntryInput {
        EntryInput::new(
            PostingAddress {
                sub_account_id: Uuid::new_v4(),
                account_type: AccountType::CustomerFbo,
            },
            amount,
        )
    }

    #[test]
    fn test_balanced_entries_pass() {
        let entries = vec![entry(dec!(-100)), entry(dec!(60)), entry(dec!(40))];
        assert!(validate_invariance(&entries).is_ok());
    }

    #[test]
    fn test_unbalanced_entries_report_total() {
        let entries = vec![entry(dec!(-100)), entry(dec!(50)), entry(dec!(49))];
        match validate_invariance(&entries).unwrap_err() {
            AppError::Invariant { total, entries: offending } => {
                assert_eq!(total, dec!(-1));
                assert_eq!(offending.len(), 3);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_no_rounding_tolerance() {
        let entries = vec![entry(dec!(0.1)), entry(dec!(0.2)), entry(dec!(-0.3000000001))];
        assert!(matches!(
            validate_invariance(&entries),
            Err(AppError::Invariant { .. })
        ));

        let exact = vec![entry(dec!(0.1)), entry(dec!(0.2)), entry(dec!(-0.3))];
        assert!(validate_invariance(&exact).is_ok());
    }

    #[test]
    fn test_empty_transaction_rejected() {
        let tx = TransactionInput::new(Utc::now(), vec![]);
        assert!(matches!(tx.validate(), Err(AppError::Validation(_))));
    }

    #[test]
    fn test_group_collects_distinct_sub_accounts() {
        let shared = entry(dec!(10));
        let tx1 = TransactionInput::new(Utc::now(), vec![shared.clone(), entry(dec!(-10))]);
        let tx2 = TransactionInput::new(
            Utc::now(),
            vec![EntryInput::new(shared.address, dec!(-5)), entry(dec!(5))],
        );
        let group = TransactionGroupInput::new("ns", vec![tx1, tx2]);
        assert_eq!(group.sub_account_ids().len(), 3);
    }
}
