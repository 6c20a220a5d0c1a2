use crate::error::{AppError, Result};
use crate::models::{Account, Entry, Page, SubAccount, SumEntriesQuery, Transaction, TransactionGroup};
use crate::repositories::{LedgerRepository, LedgerTransaction, ListEntriesParams, ListTransactionsParams};
use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool, Postgres};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

const ENTRY_INSERT_COLUMNS: &str = "id, namespace, transaction_id, sub_account_id, account_type, amount, created_at";
const ENTRY_COLUMNS: &str = "id, seq, namespace, transaction_id, sub_account_id, account_type, amount, created_at";
const TRANSACTION_INSERT_COLUMNS: &str = "id, namespace, group_id, booked_at, created_at";
const TRANSACTION_COLUMNS: &str = "id, seq, namespace, group_id, booked_at, created_at";

/// PostgreSQL-backed ledger storage.
pub struct PgLedgerRepository {
    pool: PgPool,
}

impl PgLedgerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Loads the entries of the given transactions, in insertion order.
async fn entries_for_transactions(conn: &mut PgConnection, transaction_ids: &[Uuid]) -> Result<Vec<Entry>> {
    let query = format!(
        "SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE transaction_id = ANY($1) ORDER BY seq"
    );

    sqlx::query_as::<_, Entry>(&query)
        .bind(transaction_ids)
        .fetch_all(conn)
        .await
        .map_err(AppError::db("fetching entries for transactions"))
}

fn attach_entries(transactions: &mut [Transaction], entries: Vec<Entry>) {
    let mut by_transaction: HashMap<Uuid, Vec<Entry>> = HashMap::new();
    for entry in entries {
        by_transaction.entry(entry.transaction_id).or_default().push(entry);
    }
    for transaction in transactions {
        transaction.entries = by_transaction.remove(&transaction.id).unwrap_or_default();
    }
}

#[async_trait]
impl LedgerRepository for PgLedgerRepository {
    async fn begin(&self) -> Result<Box<dyn LedgerTransaction>> {
        let tx = self.pool.begin().await.map_err(AppError::db("opening transaction"))?;
        Ok(Box::new(PgLedgerTransaction { tx }))
    }

    async fn sum_entries(&self, query: &SumEntriesQuery) -> Result<Decimal> {
        let filter = &query.filter;
        let dims = &filter.dimensions;

        let row: (Option<Decimal>,) = sqlx::query_as(
            r#"
            SELECT COALESCE(SUM(e.amount), 0)
            FROM ledger_entries e
            JOIN ledger_transactions t ON t.id = e.transaction_id
            JOIN ledger_sub_accounts s ON s.id = e.sub_account_id
            WHERE e.namespace = $1
              AND ($2::uuid IS NULL OR s.account_id = $2)
              AND ($3::uuid IS NULL OR e.sub_account_id = $3)
              AND ($4::uuid IS NULL OR e.transaction_id = $4)
              AND ($5::timestamptz IS NULL OR t.booked_at >= $5)
              AND ($6::timestamptz IS NULL OR t.booked_at < $6)
              AND ($7::uuid IS NULL OR s.currency_id = $7)
              AND ($8::uuid IS NULL OR s.tax_code_id = $8)
              AND ($9::uuid IS NULL OR s.credit_priority_id = $9)
              AND s.feature_ids @> $10::uuid[]
            "#,
        )
        .bind(&query.namespace)
        .bind(filter.account_id)
        .bind(filter.sub_account_id)
        .bind(filter.transaction_id)
        .bind(filter.booked_at.from)
        .bind(filter.booked_at.to)
        .bind(dims.currency_id)
        .bind(dims.tax_code_id)
        .bind(dims.credit_priority_id)
        .bind(&dims.feature_ids)
        .fetch_one(&self.pool)
        .await
        .map_err(AppError::db("summing entries"))?;

        Ok(row.0.unwrap_or(Decimal::ZERO))
    }

    async fn list_transactions(&self, params: &ListTransactionsParams) -> Result<Page<Transaction>> {
        let cursor = params.page.cursor;
        let query = format!(
            r#"
            SELECT {TRANSACTION_COLUMNS}
            FROM ledger_transactions
            WHERE namespace = $1
              AND ($2::timestamptz IS NULL OR (created_at, seq) > ($2, $3::bigint))
              AND ($4::uuid IS NULL OR group_id = $4)
            ORDER BY created_at, seq
            LIMIT $5
            "#
        );

        let mut conn = self.pool.acquire().await.map_err(AppError::db("acquiring connection"))?;

        let mut rows = sqlx::query_as::<_, Transaction>(&query)
            .bind(&params.namespace)
            .bind(cursor.map(|c| c.time))
            .bind(cursor.map(|c| c.seq))
            .bind(params.group_id)
            .bind(i64::from(params.page.limit) + 1)
            .fetch_all(&mut *conn)
            .await
            .map_err(AppError::db("listing transactions"))?;

        let ids: Vec<Uuid> = rows.iter().map(|t| t.id).collect();
        let entries = entries_for_transactions(&mut conn, &ids).await?;
        attach_entries(&mut rows, entries);

        Ok(Page::from_overfetch(rows, params.page.limit, Transaction::cursor))
    }

    async fn list_entries(&self, params: &ListEntriesParams) -> Result<Page<Entry>> {
        let cursor = params.page.cursor;
        let query = format!(
            r#"
            SELECT {ENTRY_COLUMNS}
            FROM ledger_entries
            WHERE namespace = $1
              AND ($2::timestamptz IS NULL OR (created_at, seq) > ($2, $3::bigint))
              AND ($4::uuid IS NULL OR sub_account_id = $4)
              AND ($5::uuid IS NULL OR transaction_id = $5)
            ORDER BY created_at, seq
            LIMIT $6
            "#
        );

        let rows = sqlx::query_as::<_, Entry>(&query)
            .bind(&params.namespace)
            .bind(cursor.map(|c| c.time))
            .bind(cursor.map(|c| c.seq))
            .bind(params.sub_account_id)
            .bind(params.transaction_id)
            .bind(i64::from(params.page.limit) + 1)
            .fetch_all(&self.pool)
            .await
            .map_err(AppError::db("listing entries"))?;

        Ok(Page::from_overfetch(rows, params.page.limit, Entry::cursor))
    }

    async fn get_transaction_group(&self, namespace: &str, id: Uuid) -> Result<Option<TransactionGroup>> {
        let mut conn = self.pool.acquire().await.map_err(AppError::db("acquiring connection"))?;

        let group = sqlx::query_as::<_, TransactionGroup>(
            r#"
            SELECT id, namespace, annotations, created_at
            FROM ledger_transaction_groups
            WHERE namespace = $1 AND id = $2
            "#,
        )
        .bind(namespace)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(AppError::db("fetching transaction group"))?;

        let Some(mut group) = group else {
            return Ok(None);
        };

        let query = format!(
            "SELECT {TRANSACTION_COLUMNS} FROM ledger_transactions WHERE group_id = $1 ORDER BY seq"
        );
        let mut transactions = sqlx::query_as::<_, Transaction>(&query)
            .bind(group.id)
            .fetch_all(&mut *conn)
            .await
            .map_err(AppError::db("fetching group transactions"))?;

        let ids: Vec<Uuid> = transactions.iter().map(|t| t.id).collect();
        let entries = entries_for_transactions(&mut conn, &ids).await?;
        attach_entries(&mut transactions, entries);

        group.transactions = transactions;
        Ok(Some(group))
    }
}

/// A commit in progress on one pooled connection.
pub struct PgLedgerTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
}

#[async_trait]
impl LedgerTransaction for PgLedgerTransaction {
    async fn get_sub_accounts(&mut self, namespace: &str, ids: &[Uuid]) -> Result<Vec<SubAccount>> {
        sqlx::query_as::<_, SubAccount>(
            r#"
            SELECT id, namespace, account_id, account_type, currency_id, tax_code_id, feature_ids, credit_priority_id, created_at
            FROM ledger_sub_accounts
            WHERE namespace = $1 AND id = ANY($2)
            "#,
        )
        .bind(namespace)
        .bind(ids)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(AppError::db("resolving sub-accounts"))
    }

    async fn get_accounts(&mut self, namespace: &str, ids: &[Uuid]) -> Result<Vec<Account>> {
        sqlx::query_as::<_, Account>(
            r#"
            SELECT id, namespace, account_type, created_at
            FROM ledger_accounts
            WHERE namespace = $1 AND id = ANY($2)
            "#,
        )
        .bind(namespace)
        .bind(ids)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(AppError::db("resolving accounts"))
    }

    async fn advisory_lock(&mut self, key: i64, timeout: Duration) -> Result<()> {
        // SET does not take bind parameters; the value is an integer we format.
        sqlx::query(&format!("SET LOCAL lock_timeout = '{}ms'", timeout.as_millis()))
            .execute(&mut *self.tx)
            .await
            .map_err(AppError::db("setting lock timeout"))?;

        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(key)
            .execute(&mut *self.tx)
            .await
            .map_err(AppError::db("acquiring advisory lock"))?;

        Ok(())
    }

    async fn try_advisory_lock(&mut self, key: i64) -> Result<bool> {
        let row: (bool,) = sqlx::query_as("SELECT pg_try_advisory_xact_lock($1)")
            .bind(key)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(AppError::db("trying advisory lock"))?;

        Ok(row.0)
    }

    async fn create_transaction_group(&mut self, group: &TransactionGroup) -> Result<TransactionGroup> {
        let row = sqlx::query_as::<_, TransactionGroup>(
            r#"
            INSERT INTO ledger_transaction_groups (id, namespace, annotations, created_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id, namespace, annotations, created_at
            "#,
        )
        .bind(group.id)
        .bind(&group.namespace)
        .bind(&group.annotations)
        .bind(group.created_at)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(AppError::db("creating transaction group"))?;

        Ok(row)
    }

    async fn book_transaction(&mut self, transaction: &Transaction, entries: &[Entry]) -> Result<Transaction> {
        let query = format!(
            r#"
            INSERT INTO ledger_transactions ({TRANSACTION_INSERT_COLUMNS})
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {TRANSACTION_COLUMNS}
            "#
        );
        let mut booked = sqlx::query_as::<_, Transaction>(&query)
            .bind(transaction.id)
            .bind(&transaction.namespace)
            .bind(transaction.group_id)
            .bind(transaction.booked_at)
            .bind(transaction.created_at)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(AppError::db("booking transaction"))?;

        let query = format!(
            r#"
            INSERT INTO ledger_entries ({ENTRY_INSERT_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {ENTRY_COLUMNS}
            "#
        );
        let mut created = Vec::with_capacity(entries.len());
        for entry in entries {
            let row = sqlx::query_as::<_, Entry>(&query)
                .bind(entry.id)
                .bind(&entry.namespace)
                .bind(booked.id)
                .bind(entry.sub_account_id)
                .bind(entry.account_type)
                .bind(entry.amount)
                .bind(entry.created_at)
                .fetch_one(&mut *self.tx)
                .await
                .map_err(AppError::db("booking entry"))?;

            created.push(row);
        }

        booked.entries = created;
        Ok(booked)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await.map_err(AppError::db("committing transaction"))
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await.map_err(AppError::db("rolling back transaction"))
    }
}
