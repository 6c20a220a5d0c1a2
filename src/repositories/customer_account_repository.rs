use crate::error::{AppError, Result};
use crate::models::{CustomerAccountMapping, CustomerRef};
use crate::repositories::CustomerAccountRepository;
use async_trait::async_trait;
use sqlx::PgPool;

/// PostgreSQL-backed customer → account mapping.
pub struct PgCustomerAccountRepository {
    pool: PgPool,
}

impl PgCustomerAccountRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CustomerAccountRepository for PgCustomerAccountRepository {
    async fn save_mapping(&self, mapping: &CustomerAccountMapping) -> Result<CustomerAccountMapping> {
        // The no-op update makes RETURNING yield the stored row on conflict.
        let row = sqlx::query_as::<_, CustomerAccountMapping>(
            r#"
            INSERT INTO ledger_customer_accounts (namespace, customer_id, account_type, account_id, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (namespace, customer_id, account_type)
            DO UPDATE SET namespace = ledger_customer_accounts.namespace
            RETURNING namespace, customer_id, account_type, account_id, created_at
            "#,
        )
        .bind(&mapping.namespace)
        .bind(&mapping.customer_id)
        .bind(mapping.account_type)
        .bind(mapping.account_id)
        .bind(mapping.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(AppError::db("saving customer account mapping"))?;

        Ok(row)
    }

    async fn get_mappings(&self, customer: &CustomerRef) -> Result<Vec<CustomerAccountMapping>> {
        let rows = sqlx::query_as::<_, CustomerAccountMapping>(
            r#"
            SELECT namespace, customer_id, account_type, account_id, created_at
            FROM ledger_customer_accounts
            WHERE namespace = $1 AND customer_id = $2
            ORDER BY account_type
            "#,
        )
        .bind(&customer.namespace)
        .bind(&customer.id)
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::db("fetching customer account mappings"))?;

        Ok(rows)
    }
}
