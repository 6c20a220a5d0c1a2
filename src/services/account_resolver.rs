use crate::clock::SharedClock;
use crate::error::{AppError, Result};
use crate::models::{
    Account, AccountFilter, AccountType, BusinessAccount, BusinessAccounts, CustomerAccount,
    CustomerAccountMapping, CustomerAccounts, CustomerRef, SubAccount, SubAccountDimensions,
};
use crate::observability::get_metrics;
use crate::repositories::{AccountRepository, CustomerAccountRepository, Repositories};
use crate::services::catalog_service::{require_namespace, CatalogService};
use crate::templates::SubAccountResolver;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::instrument;

/// Provisions and looks up the accounts owned by customers and by the
/// business.
#[derive(Clone)]
pub struct AccountResolver {
    catalog: CatalogService,
    accounts: Arc<dyn AccountRepository>,
    customer_accounts: Arc<dyn CustomerAccountRepository>,
    clock: SharedClock,
}

impl AccountResolver {
    pub fn new(repositories: &Repositories, catalog: CatalogService, clock: SharedClock) -> Self {
        Self {
            catalog,
            accounts: repositories.accounts.clone(),
            customer_accounts: repositories.customer_accounts.clone(),
            clock,
        }
    }

    /// Creates the FBO and receivable accounts for a customer and records
    /// the mappings. Safe to repeat: existing mappings are reused.
    #[instrument(skip(self), fields(namespace = %customer.namespace, customer_id = %customer.id))]
    pub async fn create_customer_accounts(&self, customer: &CustomerRef) -> Result<CustomerAccounts> {
        require_namespace(&customer.namespace)?;
        if customer.id.trim().is_empty() {
            return Err(AppError::Validation("Customer id cannot be empty".to_string()));
        }

        let existing = self.mapped_accounts(customer).await?;
        let mut created = 0;

        let fbo = match existing.get(&AccountType::CustomerFbo) {
            Some(id) => self.load_customer_account(customer, *id).await?,
            None => {
                created += 1;
                self.provision_customer_account(customer, AccountType::CustomerFbo).await?
            }
        };
        let receivable = match existing.get(&AccountType::CustomerReceivable) {
            Some(id) => self.load_customer_account(customer, *id).await?,
            None => {
                created += 1;
                self.provision_customer_account(customer, AccountType::CustomerReceivable).await?
            }
        };

        get_metrics().record_accounts_provisioned("customer", created);
        tracing::info!(created, "customer accounts ready");

        Ok(CustomerAccounts { fbo, receivable })
    }

    /// Looks up both customer accounts; `NotFound` if either mapping is
    /// missing.
    pub async fn get_customer_accounts(&self, customer: &CustomerRef) -> Result<CustomerAccounts> {
        let mapped = self.mapped_accounts(customer).await?;

        let lookup = |account_type: AccountType| {
            mapped.get(&account_type).copied().ok_or_else(|| {
                AppError::NotFound(format!(
                    "Customer '{}' has no {} account",
                    customer.id, account_type
                ))
            })
        };
        let fbo_id = lookup(AccountType::CustomerFbo)?;
        let receivable_id = lookup(AccountType::CustomerReceivable)?;

        Ok(CustomerAccounts {
            fbo: self.load_customer_account(customer, fbo_id).await?,
            receivable: self.load_customer_account(customer, receivable_id).await?,
        })
    }

    /// Returns the namespace's wash, earnings and brokerage accounts,
    /// creating whichever are missing. Concurrent callers converge on one
    /// account per type.
    #[instrument(skip(self))]
    pub async fn get_business_accounts(&self, namespace: &str) -> Result<BusinessAccounts> {
        require_namespace(namespace)?;

        let mut by_type = self.list_business_accounts(namespace).await?;
        let mut created = 0;

        for account_type in AccountType::BUSINESS {
            if by_type.contains_key(&account_type) {
                continue;
            }
            let account = Account::new(namespace, account_type, self.clock.now());
            match self.accounts.create_account(&account).await {
                Ok(account) => {
                    created += 1;
                    by_type.insert(account_type, account);
                }
                Err(err) if err.is_conflict() => {
                    tracing::debug!(%account_type, "business account created concurrently");
                    by_type = self.list_business_accounts(namespace).await?;
                }
                Err(err) => return Err(err),
            }
        }

        get_metrics().record_accounts_provisioned("business", created);

        let mut take = |account_type: AccountType| -> Result<BusinessAccount> {
            by_type
                .remove(&account_type)
                .ok_or_else(|| {
                    AppError::Internal(anyhow::anyhow!("{} account missing after provisioning", account_type))
                })?
                .try_into()
        };

        Ok(BusinessAccounts {
            wash: take(AccountType::Wash)?,
            earnings: take(AccountType::Earnings)?,
            brokerage: take(AccountType::Brokerage)?,
        })
    }

    async fn list_business_accounts(&self, namespace: &str) -> Result<HashMap<AccountType, Account>> {
        let filter = AccountFilter::namespace(namespace).with_types(AccountType::BUSINESS);
        let accounts = self.accounts.list_accounts(&filter).await?;
        Ok(accounts.into_iter().map(|a| (a.account_type, a)).collect())
    }

    async fn mapped_accounts(&self, customer: &CustomerRef) -> Result<HashMap<AccountType, uuid::Uuid>> {
        let mappings = self.customer_accounts.get_mappings(customer).await?;
        Ok(mappings.into_iter().map(|m| (m.account_type, m.account_id)).collect())
    }

    async fn load_customer_account(&self, customer: &CustomerRef, id: uuid::Uuid) -> Result<CustomerAccount> {
        self.catalog.get_account(&customer.namespace, id).await?.try_into()
    }

    async fn provision_customer_account(
        &self,
        customer: &CustomerRef,
        account_type: AccountType,
    ) -> Result<CustomerAccount> {
        let account = self.catalog.create_account(&customer.namespace, account_type).await?;

        let mapping = CustomerAccountMapping {
            namespace: customer.namespace.clone(),
            customer_id: customer.id.clone(),
            account_type,
            account_id: account.id,
            created_at: self.clock.now(),
        };
        let stored = self.customer_accounts.save_mapping(&mapping).await?;

        if stored.account_id != account.id {
            // Another caller mapped first; theirs wins and ours stays unused.
            tracing::warn!(
                %account_type,
                orphan_id = %account.id,
                "customer account mapped concurrently"
            );
            return self.load_customer_account(customer, stored.account_id).await;
        }

        account.try_into()
    }
}

#[async_trait]
impl SubAccountResolver for AccountResolver {
    async fn customer_sub_account(
        &self,
        customer: &CustomerRef,
        account_type: AccountType,
        dimensions: SubAccountDimensions,
    ) -> Result<SubAccount> {
        let accounts = self.get_customer_accounts(customer).await?;
        let account = accounts.get(account_type).ok_or_else(|| {
            AppError::Validation(format!("{} is not a customer account type", account_type))
        })?;

        self.catalog
            .ensure_sub_account(&customer.namespace, account.id(), dimensions)
            .await
    }

    async fn business_sub_account(
        &self,
        namespace: &str,
        account_type: AccountType,
        dimensions: SubAccountDimensions,
    ) -> Result<SubAccount> {
        let accounts = self.get_business_accounts(namespace).await?;
        let account = accounts.get(account_type).ok_or_else(|| {
            AppError::Validation(format!("{} is not a business account type", account_type))
        })?;

        self.catalog.ensure_sub_account(namespace, account.id(), dimensions).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::repositories::InMemoryStore;

    fn resolver() -> AccountResolver {
        let repositories = Repositories::in_memory(InMemoryStore::new());
        let clock: SharedClock = Arc::new(SystemClock);
        let catalog = CatalogService::new(&repositories, clock.clone());
        AccountResolver::new(&repositories, catalog, clock)
    }

    #[tokio::test]
    async fn test_create_customer_accounts_is_idempotent() {
        let resolver = resolver();
        let customer = CustomerRef::new("ns", "cus_1");

        let first = resolver.create_customer_accounts(&customer).await.unwrap();
        let second = resolver.create_customer_accounts(&customer).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.fbo.account_type(), AccountType::CustomerFbo);
        assert_eq!(first.receivable.account_type(), AccountType::CustomerReceivable);
    }

    #[tokio::test]
    async fn test_get_customer_accounts_not_found() {
        let resolver = resolver();
        let err = resolver
            .get_customer_accounts(&CustomerRef::new("ns", "nobody"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_business_accounts_created_once() {
        let resolver = resolver();
        let first = resolver.get_business_accounts("ns").await.unwrap();
        let second = resolver.get_business_accounts("ns").await.unwrap();
        assert_eq!(first, second);

        let other = resolver.get_business_accounts("other").await.unwrap();
        assert_ne!(first.wash.id(), other.wash.id());
    }

    #[tokio::test]
    async fn test_customer_sub_account_rejects_business_type() {
        let resolver = resolver();
        let customer = CustomerRef::new("ns", "cus_1");
        resolver.create_customer_accounts(&customer).await.unwrap();

        let err = resolver
            .customer_sub_account(&customer, AccountType::Wash, SubAccountDimensions::currency(uuid::Uuid::new_v4()))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }
}
