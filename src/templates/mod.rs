//! Transaction templates turn a named business intent into a balanced
//! [`TransactionInput`]. They resolve dimensions and sub-accounts through the
//! resolver traits below and never touch storage or locks directly.

pub mod currency;
pub mod earnings;
pub mod receivable;

pub use currency::ConvertCurrency;
pub use earnings::RecognizeEarnings;
pub use receivable::{FundCustomerReceivable, IssueCustomerReceivable};

use crate::error::{AppError, Result};
use crate::models::{
    AccountType, CustomerRef, Dimension, DimensionKey, PostingAddress, SubAccount,
    SubAccountDimensions, TransactionInput,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;

/// Maps human references (`currency=USD`) to catalog dimensions.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DimensionResolver: Send + Sync {
    /// Returns the dimension, creating it on first use.
    async fn resolve_dimension(&self, namespace: &str, key: DimensionKey, value: &str) -> Result<Dimension>;
}

/// Maps owners plus dimension sets to concrete sub-accounts.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SubAccountResolver: Send + Sync {
    async fn customer_sub_account(
        &self,
        customer: &CustomerRef,
        account_type: AccountType,
        dimensions: SubAccountDimensions,
    ) -> Result<SubAccount>;

    async fn business_sub_account(
        &self,
        namespace: &str,
        account_type: AccountType,
        dimensions: SubAccountDimensions,
    ) -> Result<SubAccount>;
}

/// Where and when a template books.
#[derive(Debug, Clone)]
pub struct TemplateScope {
    pub namespace: String,
    pub booked_at: DateTime<Utc>,
}

impl TemplateScope {
    pub fn new(namespace: impl Into<String>, booked_at: DateTime<Utc>) -> Self {
        Self {
            namespace: namespace.into(),
            booked_at,
        }
    }
}

/// Resolver handles passed to every template.
#[derive(Clone)]
pub struct Resolvers {
    pub dimensions: Arc<dyn DimensionResolver>,
    pub accounts: Arc<dyn SubAccountResolver>,
}

impl Resolvers {
    pub fn new(dimensions: Arc<dyn DimensionResolver>, accounts: Arc<dyn SubAccountResolver>) -> Self {
        Self { dimensions, accounts }
    }
}

#[async_trait]
pub trait TransactionTemplate: Send + Sync {
    /// Stable name, used in logs and group annotations.
    fn name(&self) -> &'static str;

    async fn resolve(&self, scope: &TemplateScope, resolvers: &Resolvers) -> Result<TransactionInput>;
}

/// Customer-side parameters shared by the customer templates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomerPosting {
    pub customer_id: String,
    pub currency: String,
    pub tax_code: String,
    pub credit_priority: u32,
}

impl CustomerPosting {
    pub fn new(
        customer_id: impl Into<String>,
        currency: impl Into<String>,
        tax_code: impl Into<String>,
        credit_priority: u32,
    ) -> Self {
        Self {
            customer_id: customer_id.into(),
            currency: currency.into(),
            tax_code: tax_code.into(),
            credit_priority,
        }
    }
}

pub(crate) fn require_positive(field: &str, amount: Decimal) -> Result<()> {
    if amount <= Decimal::ZERO {
        return Err(AppError::Validation(format!("{} must be positive", field)));
    }
    Ok(())
}

/// Address of a customer sub-account in `currency`, carrying the posting's
/// tax code and credit priority.
pub(crate) async fn customer_address(
    scope: &TemplateScope,
    resolvers: &Resolvers,
    posting: &CustomerPosting,
    currency: &str,
    account_type: AccountType,
) -> Result<PostingAddress> {
    let ns = scope.namespace.as_str();
    let currency = resolvers.dimensions.resolve_dimension(ns, DimensionKey::Currency, currency).await?;
    let tax_code = resolvers
        .dimensions
        .resolve_dimension(ns, DimensionKey::TaxCode, &posting.tax_code)
        .await?;
    let priority = resolvers
        .dimensions
        .resolve_dimension(ns, DimensionKey::CreditPriority, &posting.credit_priority.to_string())
        .await?;

    let dimensions = SubAccountDimensions::currency(currency.id)
        .with_tax_code(tax_code.id)
        .with_credit_priority(priority.id);
    let customer = CustomerRef::new(ns, posting.customer_id.clone());

    let sub_account = resolvers
        .accounts
        .customer_sub_account(&customer, account_type, dimensions)
        .await?;
    Ok(sub_account.address())
}

/// Address of a shared business sub-account in `currency`.
pub(crate) async fn business_address(
    scope: &TemplateScope,
    resolvers: &Resolvers,
    currency: &str,
    account_type: AccountType,
) -> Result<PostingAddress> {
    let ns = scope.namespace.as_str();
    let currency = resolvers.dimensions.resolve_dimension(ns, DimensionKey::Currency, currency).await?;

    let sub_account = resolvers
        .accounts
        .business_sub_account(ns, account_type, SubAccountDimensions::currency(currency.id))
        .await?;
    Ok(sub_account.address())
}
