use crate::error::AppError;
use crate::models::DimensionKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Ownership/purpose of an account. Immutable after creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "ledger_account_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    /// Funds held for the benefit of a customer.
    CustomerFbo,
    /// Amounts the customer owes.
    CustomerReceivable,
    /// Clearing account for value entering or leaving the ledger.
    Wash,
    /// Recognised revenue.
    Earnings,
    /// Counterparty for currency conversion.
    Brokerage,
}

/// Whether an account belongs to one customer or is shared by the namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountScope {
    Customer,
    Business,
}

impl sqlx::postgres::PgHasArrayType for AccountType {
    fn array_type_info() -> sqlx::postgres::PgTypeInfo {
        sqlx::postgres::PgTypeInfo::with_name("_ledger_account_type")
    }
}

impl AccountType {
    pub const CUSTOMER: [AccountType; 2] = [AccountType::CustomerFbo, AccountType::CustomerReceivable];
    pub const BUSINESS: [AccountType; 3] = [AccountType::Wash, AccountType::Earnings, AccountType::Brokerage];

    pub fn scope(&self) -> AccountScope {
        match self {
            AccountType::CustomerFbo | AccountType::CustomerReceivable => AccountScope::Customer,
            AccountType::Wash | AccountType::Earnings | AccountType::Brokerage => AccountScope::Business,
        }
    }

    pub fn is_customer(&self) -> bool {
        self.scope() == AccountScope::Customer
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AccountType::CustomerFbo => "customer_fbo",
            AccountType::CustomerReceivable => "customer_receivable",
            AccountType::Wash => "wash",
            AccountType::Earnings => "earnings",
            AccountType::Brokerage => "brokerage",
        }
    }

    /// Dimensions a sub-account of this type must and may carry.
    pub fn dimension_schema(&self) -> DimensionSchema {
        use DimensionKey::*;
        match self {
            AccountType::CustomerFbo | AccountType::CustomerReceivable => DimensionSchema {
                required: &[Currency, TaxCode, CreditPriority],
                optional: &[Feature],
            },
            AccountType::Earnings => DimensionSchema {
                required: &[Currency],
                optional: &[TaxCode, Feature],
            },
            AccountType::Wash | AccountType::Brokerage => DimensionSchema {
                required: &[Currency],
                optional: &[],
            },
        }
    }
}

impl fmt::Display for AccountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccountType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AccountType::CUSTOMER
            .into_iter()
            .chain(AccountType::BUSINESS)
            .find(|t| t.as_str() == s)
            .ok_or_else(|| AppError::Validation(format!("Unsupported account type '{}'", s)))
    }
}

/// Required and optional dimension keys for one account type.
#[derive(Debug, Clone, Copy)]
pub struct DimensionSchema {
    pub required: &'static [DimensionKey],
    pub optional: &'static [DimensionKey],
}

impl DimensionSchema {
    /// Rejects a dimension set with missing or extra keys.
    pub fn validate(&self, account_type: AccountType, dimensions: &SubAccountDimensions) -> Result<(), AppError> {
        let present = dimensions.keys();

        let missing: Vec<&str> = self
            .required
            .iter()
            .filter(|key| !present.contains(key))
            .map(|key| key.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(AppError::Validation(format!(
                "{} sub-account is missing dimensions: {}",
                account_type,
                missing.join(", ")
            )));
        }

        let extra: Vec<&str> = present
            .iter()
            .filter(|key| !self.required.contains(key) && !self.optional.contains(key))
            .map(|key| key.as_str())
            .collect();
        if !extra.is_empty() {
            return Err(AppError::Validation(format!(
                "{} sub-account does not accept dimensions: {}",
                account_type,
                extra.join(", ")
            )));
        }

        Ok(())
    }
}

/// An ownership/purpose grouping of sub-accounts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Account {
    pub id: Uuid,
    pub namespace: String,
    pub account_type: AccountType,
    pub created_at: DateTime<Utc>,
}

impl Account {
    pub fn new(namespace: impl Into<String>, account_type: AccountType, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            namespace: namespace.into(),
            account_type,
            created_at,
        }
    }

    pub fn as_customer_account(&self) -> Result<CustomerAccount, AppError> {
        CustomerAccount::try_from(self.clone())
    }

    pub fn as_business_account(&self) -> Result<BusinessAccount, AppError> {
        BusinessAccount::try_from(self.clone())
    }
}

/// An account known to be customer-scoped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerAccount(Account);

impl CustomerAccount {
    pub fn account(&self) -> &Account {
        &self.0
    }

    pub fn id(&self) -> Uuid {
        self.0.id
    }

    pub fn account_type(&self) -> AccountType {
        self.0.account_type
    }
}

impl TryFrom<Account> for CustomerAccount {
    type Error = AppError;

    fn try_from(account: Account) -> Result<Self, Self::Error> {
        match account.account_type.scope() {
            AccountScope::Customer => Ok(Self(account)),
            AccountScope::Business => Err(AppError::Validation(format!(
                "Account '{}' of type {} is not a customer account",
                account.id, account.account_type
            ))),
        }
    }
}

/// An account known to be shared by the whole namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessAccount(Account);

impl BusinessAccount {
    pub fn account(&self) -> &Account {
        &self.0
    }

    pub fn id(&self) -> Uuid {
        self.0.id
    }

    pub fn account_type(&self) -> AccountType {
        self.0.account_type
    }
}

impl TryFrom<Account> for BusinessAccount {
    type Error = AppError;

    fn try_from(account: Account) -> Result<Self, Self::Error> {
        match account.account_type.scope() {
            AccountScope::Business => Ok(Self(account)),
            AccountScope::Customer => Err(AppError::Validation(format!(
                "Account '{}' of type {} is not a business account",
                account.id, account.account_type
            ))),
        }
    }
}

/// Dimension ids a sub-account is parameterised by. These are references
/// into the dimension catalog, resolved on demand.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, FromRow)]
pub struct SubAccountDimensions {
    pub currency_id: Uuid,
    pub tax_code_id: Option<Uuid>,
    pub feature_ids: Vec<Uuid>,
    pub credit_priority_id: Option<Uuid>,
}

impl SubAccountDimensions {
    pub fn currency(currency_id: Uuid) -> Self {
        Self {
            currency_id,
            tax_code_id: None,
            feature_ids: Vec::new(),
            credit_priority_id: None,
        }
    }

    pub fn with_tax_code(mut self, tax_code_id: Uuid) -> Self {
        self.tax_code_id = Some(tax_code_id);
        self
    }

    pub fn with_credit_priority(mut self, credit_priority_id: Uuid) -> Self {
        self.credit_priority_id = Some(credit_priority_id);
        self
    }

    pub fn with_features(mut self, feature_ids: impl IntoIterator<Item = Uuid>) -> Self {
        self.feature_ids = feature_ids.into_iter().collect();
        self
    }

    /// Dimension keys present in this set.
    pub fn keys(&self) -> BTreeSet<DimensionKey> {
        let mut keys = BTreeSet::from([DimensionKey::Currency]);
        if self.tax_code_id.is_some() {
            keys.insert(DimensionKey::TaxCode);
        }
        if !self.feature_ids.is_empty() {
            keys.insert(DimensionKey::Feature);
        }
        if self.credit_priority_id.is_some() {
            keys.insert(DimensionKey::CreditPriority);
        }
        keys
    }

    /// Every referenced dimension id paired with the key it must carry.
    pub fn references(&self) -> Vec<(DimensionKey, Uuid)> {
        let mut refs = vec![(DimensionKey::Currency, self.currency_id)];
        if let Some(id) = self.tax_code_id {
            refs.push((DimensionKey::TaxCode, id));
        }
        refs.extend(self.feature_ids.iter().map(|id| (DimensionKey::Feature, *id)));
        if let Some(id) = self.credit_priority_id {
            refs.push((DimensionKey::CreditPriority, id));
        }
        refs
    }

    /// Canonical string identifying the dimension combination. Feature order
    /// does not matter.
    pub fn route(&self) -> String {
        let mut features: Vec<String> = self.feature_ids.iter().map(Uuid::to_string).collect();
        features.sort();
        features.dedup();

        format!(
            "currency={};tax_code={};features={};credit_priority={}",
            self.currency_id,
            self.tax_code_id.map(|id| id.to_string()).unwrap_or_default(),
            features.join(","),
            self.credit_priority_id.map(|id| id.to_string()).unwrap_or_default(),
        )
    }
}

/// The postable address inside an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct SubAccount {
    pub id: Uuid,
    pub namespace: String,
    pub account_id: Uuid,
    pub account_type: AccountType,
    #[sqlx(flatten)]
    pub dimensions: SubAccountDimensions,
    pub created_at: DateTime<Utc>,
}

impl SubAccount {
    pub fn new(account: &Account, dimensions: SubAccountDimensions, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            namespace: account.namespace.clone(),
            account_id: account.id,
            account_type: account.account_type,
            dimensions,
            created_at,
        }
    }

    pub fn address(&self) -> PostingAddress {
        PostingAddress {
            sub_account_id: self.id,
            account_type: self.account_type,
        }
    }
}

/// Routing key for an entry: the sub-account plus the type of its account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PostingAddress {
    pub sub_account_id: Uuid,
    pub account_type: AccountType,
}

/// Filter for listing accounts.
#[derive(Debug, Clone, Default)]
pub struct AccountFilter {
    pub namespace: String,
    pub account_ids: Vec<Uuid>,
    pub account_types: Vec<AccountType>,
}

impl AccountFilter {
    pub fn namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    pub fn with_types(mut self, account_types: impl IntoIterator<Item = AccountType>) -> Self {
        self.account_types = account_types.into_iter().collect();
        self
    }

    pub fn with_ids(mut self, account_ids: impl IntoIterator<Item = Uuid>) -> Self {
        self.account_ids = account_ids.into_iter().collect();
        self
    }

    pub fn matches(&self, account: &Account) -> bool {
        account.namespace == self.namespace
            && (self.account_ids.is_empty() || self.account_ids.contains(&account.id))
            && (self.account_types.is_empty() || self.account_types.contains(&account.account_type))
    }
}

/// Dimension constraints shared by sub-account listing and balance queries.
/// Unset fields match anything; listed features must all be present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionFilter {
    pub currency_id: Option<Uuid>,
    pub tax_code_id: Option<Uuid>,
    pub feature_ids: Vec<Uuid>,
    pub credit_priority_id: Option<Uuid>,
}

impl DimensionFilter {
    pub fn currency(currency_id: Uuid) -> Self {
        Self {
            currency_id: Some(currency_id),
            ..Default::default()
        }
    }

    pub fn with_tax_code(mut self, tax_code_id: Uuid) -> Self {
        self.tax_code_id = Some(tax_code_id);
        self
    }

    pub fn with_credit_priority(mut self, credit_priority_id: Uuid) -> Self {
        self.credit_priority_id = Some(credit_priority_id);
        self
    }

    pub fn with_features(mut self, feature_ids: impl IntoIterator<Item = Uuid>) -> Self {
        self.feature_ids = feature_ids.into_iter().collect();
        self
    }

    pub fn matches(&self, dimensions: &SubAccountDimensions) -> bool {
        self.currency_id.map_or(true, |id| id == dimensions.currency_id)
            && self.tax_code_id.map_or(true, |id| Some(id) == dimensions.tax_code_id)
            && self
                .credit_priority_id
                .map_or(true, |id| Some(id) == dimensions.credit_priority_id)
            && self.feature_ids.iter().all(|id| dimensions.feature_ids.contains(id))
    }
}

/// Filter for listing sub-accounts.
#[derive(Debug, Clone, Default)]
pub struct SubAccountFilter {
    pub namespace: String,
    pub account_id: Option<Uuid>,
    pub dimensions: DimensionFilter,
}

impl SubAccountFilter {
    pub fn matches(&self, sub_account: &SubAccount) -> bool {
        sub_account.namespace == self.namespace
            && self.account_id.map_or(true, |id| id == sub_account.account_id)
            && self.dimensions.matches(&sub_account.dimensions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn customer_dims() -> SubAccountDimensions {
        SubAccountDimensions::currency(Uuid::new_v4())
            .with_tax_code(Uuid::new_v4())
            .with_credit_priority(Uuid::new_v4())
    }

    #[test]
    fn test_account_scope() {
        assert!(AccountType::CustomerFbo.is_customer());
        assert!(AccountType::CustomerReceivable.is_customer());
        assert!(!AccountType::Wash.is_customer());
        assert_eq!(AccountType::Brokerage.scope(), AccountScope::Business);
    }

    #[test]
    fn test_customer_schema_accepts_full_set() {
        let schema = AccountType::CustomerFbo.dimension_schema();
        assert!(schema.validate(AccountType::CustomerFbo, &customer_dims()).is_ok());

        let with_feature = customer_dims().with_features([Uuid::new_v4()]);
        assert!(schema.validate(AccountType::CustomerFbo, &with_feature).is_ok());
    }

    #[test]
    fn test_customer_schema_rejects_missing() {
        let schema = AccountType::CustomerReceivable.dimension_schema();
        let dims = SubAccountDimensions::currency(Uuid::new_v4());
        let err = schema.validate(AccountType::CustomerReceivable, &dims).unwrap_err();
        match err {
            AppError::Validation(msg) => {
                assert!(msg.contains("tax_code"));
                assert!(msg.contains("credit_priority"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_business_schema_rejects_extra() {
        let schema = AccountType::Wash.dimension_schema();
        let dims = SubAccountDimensions::currency(Uuid::new_v4()).with_tax_code(Uuid::new_v4());
        let err = schema.validate(AccountType::Wash, &dims).unwrap_err();
        assert!(matches!(err, AppError::Validation(msg) if msg.contains("tax_code")));
    }

    #[test]
    fn test_account_type_parse() {
        assert_eq!("wash".parse::<AccountType>().unwrap(), AccountType::Wash);
        assert_eq!(
            "customer_receivable".parse::<AccountType>().unwrap(),
            AccountType::CustomerReceivable
        );
        assert!(matches!("equity".parse::<AccountType>(), Err(AppError::Validation(_))));
    }

    #[test]
    fn test_narrowing_conversions() {
        let fbo = Account::new("ns", AccountType::CustomerFbo, Utc::now());
        assert!(fbo.as_customer_account().is_ok());
        assert!(fbo.as_business_account().is_err());

        let wash = Account::new("ns", AccountType::Wash, Utc::now());
        assert!(wash.as_business_account().is_ok());
        assert!(wash.as_customer_account().is_err());
    }

    #[test]
    fn test_route_ignores_feature_order() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let currency = Uuid::new_v4();
        let first = SubAccountDimensions::currency(currency).with_features([a, b]);
        let second = SubAccountDimensions::currency(currency).with_features([b, a]);
        assert_eq!(first.route(), second.route());
        assert_ne!(first.route(), SubAccountDimensions::currency(currency).route());
    }

    #[test]
    fn test_dimension_filter_matches() {
        let dims = customer_dims().with_features([Uuid::new_v4()]);
        assert!(DimensionFilter::default().matches(&dims));
        assert!(DimensionFilter::currency(dims.currency_id).matches(&dims));
        assert!(!DimensionFilter::currency(Uuid::new_v4()).matches(&dims));
        assert!(DimensionFilter::currency(dims.currency_id)
            .with_features(dims.feature_ids.clone())
            .matches(&dims));
        assert!(!DimensionFilter::default()
            .with_tax_code(Uuid::new_v4())
            .matches(&dims));
    }
}
