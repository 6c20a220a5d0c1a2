use crate::error::{AppError, Result};
use crate::models::{Account, AccountFilter, AccountType, SubAccount, SubAccountDimensions, SubAccountFilter};
use crate::repositories::AccountRepository;
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

const SUB_ACCOUNT_COLUMNS: &str = "id, namespace, account_id, account_type, currency_id, tax_code_id, feature_ids, credit_priority_id, created_at";

/// PostgreSQL-backed account and sub-account catalog.
pub struct PgAccountRepository {
    pool: PgPool,
}

impl PgAccountRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccountRepository for PgAccountRepository {
    async fn create_account(&self, account: &Account) -> Result<Account> {
        // Partial unique index on (namespace, account_type) for business types
        // turns a duplicate shared account into a conflict.
        let row = sqlx::query_as::<_, Account>(
            r#"
            INSERT INTO ledger_accounts (id, namespace, account_type, created_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id, namespace, account_type, created_at
            "#,
        )
        .bind(account.id)
        .bind(&account.namespace)
        .bind(account.account_type)
        .bind(account.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(AppError::db("creating account"))?;

        Ok(row)
    }

    async fn get_account(&self, namespace: &str, id: Uuid) -> Result<Option<Account>> {
        let row = sqlx::query_as::<_, Account>(
            r#"
            SELECT id, namespace, account_type, created_at
            FROM ledger_accounts
            WHERE namespace = $1 AND id = $2
            "#,
        )
        .bind(namespace)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::db("fetching account"))?;

        Ok(row)
    }

    async fn list_accounts(&self, filter: &AccountFilter) -> Result<Vec<Account>> {
        let ids: Option<&[Uuid]> = (!filter.account_ids.is_empty()).then_some(filter.account_ids.as_slice());
        let types: Option<&[AccountType]> =
            (!filter.account_types.is_empty()).then_some(filter.account_types.as_slice());

        let rows = sqlx::query_as::<_, Account>(
            r#"
            SELECT id, namespace, account_type, created_at
            FROM ledger_accounts
            WHERE namespace = $1
              AND ($2::uuid[] IS NULL OR id = ANY($2))
              AND ($3::ledger_account_type[] IS NULL OR account_type = ANY($3))
            ORDER BY created_at, id
            "#,
        )
        .bind(&filter.namespace)
        .bind(ids)
        .bind(types)
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::db("listing accounts"))?;

        Ok(rows)
    }

    async fn create_sub_account(&self, sub_account: &SubAccount) -> Result<SubAccount> {
        let query = format!(
            r#"
            INSERT INTO ledger_sub_accounts ({SUB_ACCOUNT_COLUMNS}, route)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {SUB_ACCOUNT_COLUMNS}
            "#
        );
        let dims = &sub_account.dimensions;

        let row = sqlx::query_as::<_, SubAccount>(&query)
            .bind(sub_account.id)
            .bind(&sub_account.namespace)
            .bind(sub_account.account_id)
            .bind(sub_account.account_type)
            .bind(dims.currency_id)
            .bind(dims.tax_code_id)
            .bind(&dims.feature_ids)
            .bind(dims.credit_priority_id)
            .bind(sub_account.created_at)
            .bind(dims.route())
            .fetch_one(&self.pool)
            .await
            .map_err(AppError::db("creating sub-account"))?;

        Ok(row)
    }

    async fn get_sub_account(&self, namespace: &str, id: Uuid) -> Result<Option<SubAccount>> {
        let query = format!(
            "SELECT {SUB_ACCOUNT_COLUMNS} FROM ledger_sub_accounts WHERE namespace = $1 AND id = $2"
        );

        let row = sqlx::query_as::<_, SubAccount>(&query)
            .bind(namespace)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(AppError::db("fetching sub-account"))?;

        Ok(row)
    }

    async fn find_sub_account_by_dimensions(
        &self,
        account_id: Uuid,
        dimensions: &SubAccountDimensions,
    ) -> Result<Option<SubAccount>> {
        let query = format!(
            "SELECT {SUB_ACCOUNT_COLUMNS} FROM ledger_sub_accounts WHERE account_id = $1 AND route = $2"
        );

        let row = sqlx::query_as::<_, SubAccount>(&query)
            .bind(account_id)
            .bind(dimensions.route())
            .fetch_optional(&self.pool)
            .await
            .map_err(AppError::db("fetching sub-account by dimensions"))?;

        Ok(row)
    }

    async fn list_sub_accounts(&self, filter: &SubAccountFilter) -> Result<Vec<SubAccount>> {
        let query = format!(
            r#"
            SELECT {SUB_ACCOUNT_COLUMNS}
            FROM ledger_sub_accounts
            WHERE namespace = $1
              AND ($2::uuid IS NULL OR account_id = $2)
              AND ($3::uuid IS NULL OR currency_id = $3)
              AND ($4::uuid IS NULL OR tax_code_id = $4)
              AND ($5::uuid IS NULL OR credit_priority_id = $5)
              AND feature_ids @> $6::uuid[]
            ORDER BY created_at, id
            "#
        );
        let dims = &filter.dimensions;

        let rows = sqlx::query_as::<_, SubAccount>(&query)
            .bind(&filter.namespace)
            .bind(filter.account_id)
            .bind(dims.currency_id)
            .bind(dims.tax_code_id)
            .bind(dims.credit_priority_id)
            .bind(&dims.feature_ids)
            .fetch_all(&self.pool)
            .await
            .map_err(AppError::db("listing sub-accounts"))?;

        Ok(rows)
    }
}
