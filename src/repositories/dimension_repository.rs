use crate::error::{AppError, Result};
use crate::models::{Dimension, DimensionKey};
use crate::repositories::DimensionRepository;
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

/// PostgreSQL-backed dimension catalog.
pub struct PgDimensionRepository {
    pool: PgPool,
}

impl PgDimensionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DimensionRepository for PgDimensionRepository {
    async fn create_dimension(&self, dimension: &Dimension) -> Result<Dimension> {
        let row = sqlx::query_as::<_, Dimension>(
            r#"
            INSERT INTO ledger_dimensions (id, namespace, key, value, display_value, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, namespace, key, value, display_value, created_at
            "#,
        )
        .bind(dimension.id)
        .bind(&dimension.namespace)
        .bind(dimension.key)
        .bind(&dimension.value)
        .bind(&dimension.display_value)
        .bind(dimension.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(AppError::db("creating dimension"))?;

        Ok(row)
    }

    async fn get_dimension(&self, namespace: &str, id: Uuid) -> Result<Option<Dimension>> {
        let row = sqlx::query_as::<_, Dimension>(
            r#"
            SELECT id, namespace, key, value, display_value, created_at
            FROM ledger_dimensions
            WHERE namespace = $1 AND id = $2
            "#,
        )
        .bind(namespace)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::db("fetching dimension"))?;

        Ok(row)
    }

    async fn get_dimension_by_key_and_value(
        &self,
        namespace: &str,
        key: DimensionKey,
        value: &str,
    ) -> Result<Option<Dimension>> {
        let row = sqlx::query_as::<_, Dimension>(
            r#"
            SELECT id, namespace, key, value, display_value, created_at
            FROM ledger_dimensions
            WHERE namespace = $1 AND key = $2 AND value = $3
            "#,
        )
        .bind(namespace)
        .bind(key)
        .bind(value)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::db("fetching dimension by key and value"))?;

        Ok(row)
    }

    async fn get_dimensions(&self, namespace: &str, ids: &[Uuid]) -> Result<Vec<Dimension>> {
        let rows = sqlx::query_as::<_, Dimension>(
            r#"
            SELECT id, namespace, key, value, display_value, created_at
            FROM ledger_dimensions
            WHERE namespace = $1 AND id = ANY($2)
            ORDER BY key, value
            "#,
        )
        .bind(namespace)
        .bind(ids)
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::db("fetching dimensions"))?;

        Ok(rows)
    }
}
