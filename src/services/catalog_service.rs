use crate::clock::SharedClock;
use crate::error::{AppError, Result};
use crate::models::{
    Account, AccountFilter, AccountType, CreateDimensionInput, Dimension, DimensionKey, SubAccount,
    SubAccountDimensions, SubAccountFilter,
};
use crate::repositories::{AccountRepository, DimensionRepository, Repositories};
use crate::templates::DimensionResolver;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

/// Dimension, account and sub-account catalog.
#[derive(Clone)]
pub struct CatalogService {
    dimensions: Arc<dyn DimensionRepository>,
    accounts: Arc<dyn AccountRepository>,
    clock: SharedClock,
}

impl CatalogService {
    pub fn new(repositories: &Repositories, clock: SharedClock) -> Self {
        Self {
            dimensions: repositories.dimensions.clone(),
            accounts: repositories.accounts.clone(),
            clock,
        }
    }

    /// Creates a dimension. The key must be one of the supported keys and the
    /// `(namespace, key, value)` triple must be new.
    #[instrument(skip(self, input), fields(namespace = %input.namespace, key = %input.key))]
    pub async fn create_dimension(&self, input: CreateDimensionInput) -> Result<Dimension> {
        require_namespace(&input.namespace)?;
        let key: DimensionKey = input.key.parse()?;

        if input.value.trim().is_empty() {
            return Err(AppError::Validation("Dimension value cannot be empty".to_string()));
        }

        let display_value = if input.display_value.trim().is_empty() {
            input.value.clone()
        } else {
            input.display_value
        };

        let dimension = Dimension::new(input.namespace, key, input.value, display_value, self.clock.now());
        let created = self.dimensions.create_dimension(&dimension).await?;

        tracing::debug!(dimension_id = %created.id, value = %created.value, "dimension created");
        Ok(created)
    }

    pub async fn get_dimension(&self, namespace: &str, id: Uuid) -> Result<Dimension> {
        self.dimensions
            .get_dimension(namespace, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Dimension with id '{}' not found", id)))
    }

    pub async fn get_dimension_by_key_and_value(
        &self,
        namespace: &str,
        key: DimensionKey,
        value: &str,
    ) -> Result<Dimension> {
        self.dimensions
            .get_dimension_by_key_and_value(namespace, key, value)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Dimension {}={} not found", key, value)))
    }

    /// Looks dimensions up by id, keyed for attaching to entries.
    pub async fn get_dimensions(&self, namespace: &str, ids: &[Uuid]) -> Result<HashMap<Uuid, Dimension>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let found = self.dimensions.get_dimensions(namespace, ids).await?;
        Ok(found.into_iter().map(|d| (d.id, d)).collect())
    }

    #[instrument(skip(self))]
    pub async fn create_account(&self, namespace: &str, account_type: AccountType) -> Result<Account> {
        require_namespace(namespace)?;

        let account = Account::new(namespace, account_type, self.clock.now());
        let created = self.accounts.create_account(&account).await?;

        tracing::debug!(account_id = %created.id, "account created");
        Ok(created)
    }

    pub async fn get_account(&self, namespace: &str, id: Uuid) -> Result<Account> {
        self.accounts
            .get_account(namespace, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Account with id '{}' not found", id)))
    }

    pub async fn list_accounts(&self, filter: &AccountFilter) -> Result<Vec<Account>> {
        self.accounts.list_accounts(filter).await
    }

    /// Creates a sub-account after checking the dimension set against the
    /// account type's schema and the catalog.
    #[instrument(skip(self, dimensions))]
    pub async fn create_sub_account(
        &self,
        namespace: &str,
        account_id: Uuid,
        dimensions: SubAccountDimensions,
    ) -> Result<SubAccount> {
        let account = self.get_account(namespace, account_id).await?;
        account.account_type.dimension_schema().validate(account.account_type, &dimensions)?;
        self.check_references(namespace, &dimensions).await?;

        let sub_account = SubAccount::new(&account, dimensions, self.clock.now());
        let created = self.accounts.create_sub_account(&sub_account).await?;

        tracing::debug!(sub_account_id = %created.id, "sub-account created");
        Ok(created)
    }

    pub async fn get_sub_account(&self, namespace: &str, id: Uuid) -> Result<SubAccount> {
        self.accounts
            .get_sub_account(namespace, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Sub-account with id '{}' not found", id)))
    }

    pub async fn find_sub_account(
        &self,
        account_id: Uuid,
        dimensions: &SubAccountDimensions,
    ) -> Result<Option<SubAccount>> {
        self.accounts.find_sub_account_by_dimensions(account_id, dimensions).await
    }

    pub async fn list_sub_accounts(&self, filter: &SubAccountFilter) -> Result<Vec<SubAccount>> {
        self.accounts.list_sub_accounts(filter).await
    }

    /// Returns the account's sub-account for `dimensions`, creating it when
    /// absent. Losing a creation race re-reads the winner's row.
    pub async fn ensure_sub_account(
        &self,
        namespace: &str,
        account_id: Uuid,
        dimensions: SubAccountDimensions,
    ) -> Result<SubAccount> {
        if let Some(existing) = self.find_sub_account(account_id, &dimensions).await? {
            return Ok(existing);
        }

        match self.create_sub_account(namespace, account_id, dimensions.clone()).await {
            Ok(created) => Ok(created),
            Err(err) if err.is_conflict() => self
                .find_sub_account(account_id, &dimensions)
                .await?
                .ok_or_else(|| AppError::Internal(anyhow::anyhow!("sub-account vanished after conflict"))),
            Err(err) => Err(err),
        }
    }

    /// Every referenced dimension must exist in the namespace under the key
    /// it is used for.
    async fn check_references(&self, namespace: &str, dimensions: &SubAccountDimensions) -> Result<()> {
        let references = dimensions.references();
        let ids: Vec<Uuid> = references.iter().map(|(_, id)| *id).collect();
        let found = self.get_dimensions(namespace, &ids).await?;

        for (key, id) in references {
            match found.get(&id) {
                None => {
                    return Err(AppError::Validation(format!(
                        "Dimension '{}' used as {} does not exist",
                        id, key
                    )))
                }
                Some(dimension) if dimension.key != key => {
                    return Err(AppError::Validation(format!(
                        "Dimension '{}' is a {} dimension, not {}",
                        id, dimension.key, key
                    )))
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

#[async_trait]
impl DimensionResolver for CatalogService {
    async fn resolve_dimension(&self, namespace: &str, key: DimensionKey, value: &str) -> Result<Dimension> {
        if let Some(existing) = self.dimensions.get_dimension_by_key_and_value(namespace, key, value).await? {
            return Ok(existing);
        }

        let input = CreateDimensionInput::new(namespace, key.as_str(), value, value);
        match self.create_dimension(input).await {
            Ok(created) => Ok(created),
            Err(err) if err.is_conflict() => self.get_dimension_by_key_and_value(namespace, key, value).await,
            Err(err) => Err(err),
        }
    }
}

pub(crate) fn require_namespace(namespace: &str) -> Result<()> {
    if namespace.trim().is_empty() {
        return Err(AppError::Validation("Namespace cannot be empty".to_string()));
    }
    Ok(())
}
