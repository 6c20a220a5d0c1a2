use crate::models::{AccountType, BusinessAccount, CustomerAccount};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Reference to a customer owned by the surrounding billing domain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CustomerRef {
    pub namespace: String,
    pub id: String,
}

impl CustomerRef {
    pub fn new(namespace: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            id: id.into(),
        }
    }
}

/// Persisted customer → account-type → account-id link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct CustomerAccountMapping {
    pub namespace: String,
    pub customer_id: String,
    pub account_type: AccountType,
    pub account_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// The two accounts every customer owns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerAccounts {
    pub fbo: CustomerAccount,
    pub receivable: CustomerAccount,
}

impl CustomerAccounts {
    pub fn get(&self, account_type: AccountType) -> Option<&CustomerAccount> {
        match account_type {
            AccountType::CustomerFbo => Some(&self.fbo),
            AccountType::CustomerReceivable => Some(&self.receivable),
            _ => None,
        }
    }
}

/// The accounts shared by every customer in a namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessAccounts {
    pub wash: BusinessAccount,
    pub earnings: BusinessAccount,
    pub brokerage: BusinessAccount,
}

impl BusinessAccounts {
    pub fn get(&self, account_type: AccountType) -> Option<&BusinessAccount> {
        match account_type {
            AccountType::Wash => Some(&self.wash),
            AccountType::Earnings => Some(&self.earnings),
            AccountType::Brokerage => Some(&self.brokerage),
            _ => None,
        }
    }
}
