use crate::error::Result;
use crate::models::CustomerRef;
use crate::services::AccountResolver;
use async_trait::async_trait;

/// Callback the customer domain invokes around customer lifecycle events.
#[async_trait]
pub trait CustomerLifecycleHook: Send + Sync {
    /// Runs after a customer has been created.
    async fn post_create(&self, customer: &CustomerRef) -> Result<()>;
}

/// Provisions ledger accounts for every new customer.
pub struct LedgerCustomerHook {
    resolver: AccountResolver,
}

impl LedgerCustomerHook {
    pub fn new(resolver: AccountResolver) -> Self {
        Self { resolver }
    }
}

#[async_trait]
impl CustomerLifecycleHook for LedgerCustomerHook {
    async fn post_create(&self, customer: &CustomerRef) -> Result<()> {
        self.resolver.create_customer_accounts(customer).await.map_err(|err| {
            tracing::error!(customer_id = %customer.id, error = %err, "failed to provision customer accounts");
            err
        })?;
        Ok(())
    }
}
