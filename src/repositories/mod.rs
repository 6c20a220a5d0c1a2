pub mod account_repository;
pub mod customer_account_repository;
pub mod dimension_repository;
pub mod ledger_repository;
pub mod memory;

pub use account_repository::PgAccountRepository;
pub use customer_account_repository::PgCustomerAccountRepository;
pub use dimension_repository::PgDimensionRepository;
pub use ledger_repository::{PgLedgerRepository, PgLedgerTransaction};
pub use memory::InMemoryStore;

use crate::error::Result;
use crate::models::{
    Account, AccountFilter, CustomerAccountMapping, CustomerRef, Dimension, DimensionKey, Entry,
    Page, PageParams, SubAccount, SubAccountDimensions, SubAccountFilter, SumEntriesQuery,
    Transaction, TransactionGroup,
};
use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Database connection pool type alias.
pub type DbPool = PgPool;

/// Storage for the dimension catalog. `(namespace, key, value)` is unique.
#[async_trait]
pub trait DimensionRepository: Send + Sync {
    /// Fails with `Conflict` when the `(namespace, key, value)` triple exists.
    async fn create_dimension(&self, dimension: &Dimension) -> Result<Dimension>;

    async fn get_dimension(&self, namespace: &str, id: Uuid) -> Result<Option<Dimension>>;

    async fn get_dimension_by_key_and_value(
        &self,
        namespace: &str,
        key: DimensionKey,
        value: &str,
    ) -> Result<Option<Dimension>>;

    async fn get_dimensions(&self, namespace: &str, ids: &[Uuid]) -> Result<Vec<Dimension>>;
}

/// Storage for accounts and sub-accounts.
#[async_trait]
pub trait AccountRepository: Send + Sync {
    /// Fails with `Conflict` when a business account of the same type
    /// already exists in the namespace.
    async fn create_account(&self, account: &Account) -> Result<Account>;

    async fn get_account(&self, namespace: &str, id: Uuid) -> Result<Option<Account>>;

    async fn list_accounts(&self, filter: &AccountFilter) -> Result<Vec<Account>>;

    /// Fails with `Conflict` when the account already has a sub-account with
    /// the same dimension combination.
    async fn create_sub_account(&self, sub_account: &SubAccount) -> Result<SubAccount>;

    async fn get_sub_account(&self, namespace: &str, id: Uuid) -> Result<Option<SubAccount>>;

    async fn find_sub_account_by_dimensions(
        &self,
        account_id: Uuid,
        dimensions: &SubAccountDimensions,
    ) -> Result<Option<SubAccount>>;

    async fn list_sub_accounts(&self, filter: &SubAccountFilter) -> Result<Vec<SubAccount>>;
}

/// Storage for the customer → account mapping.
#[async_trait]
pub trait CustomerAccountRepository: Send + Sync {
    /// Stores the mapping unless one exists for the same customer and
    /// account type; returns whichever row is stored afterwards.
    async fn save_mapping(&self, mapping: &CustomerAccountMapping) -> Result<CustomerAccountMapping>;

    async fn get_mappings(&self, customer: &CustomerRef) -> Result<Vec<CustomerAccountMapping>>;
}

/// Parameters for listing transactions.
#[derive(Debug, Clone, Default)]
pub struct ListTransactionsParams {
    pub namespace: String,
    pub page: PageParams,
    pub group_id: Option<Uuid>,
}

/// Parameters for listing entries.
#[derive(Debug, Clone, Default)]
pub struct ListEntriesParams {
    pub namespace: String,
    pub page: PageParams,
    pub sub_account_id: Option<Uuid>,
    pub transaction_id: Option<Uuid>,
    /// Attach the sub-account's dimensions to every returned entry.
    pub expand_dimensions: bool,
}

/// Append-only storage for transaction groups, transactions and entries.
#[async_trait]
pub trait LedgerRepository: Send + Sync {
    /// Opens the storage transaction a commit runs in.
    async fn begin(&self) -> Result<Box<dyn LedgerTransaction>>;

    async fn sum_entries(&self, query: &SumEntriesQuery) -> Result<Decimal>;

    /// Transactions ordered by `(created_at, id)`, entries attached.
    async fn list_transactions(&self, params: &ListTransactionsParams) -> Result<Page<Transaction>>;

    /// Entries ordered by `(created_at, id)`.
    async fn list_entries(&self, params: &ListEntriesParams) -> Result<Page<Entry>>;

    async fn get_transaction_group(&self, namespace: &str, id: Uuid) -> Result<Option<TransactionGroup>>;
}

/// An open storage transaction. Dropping it without `commit` discards every
/// write and releases every lock it took.
#[async_trait]
pub trait LedgerTransaction: Send {
    async fn get_sub_accounts(&mut self, namespace: &str, ids: &[Uuid]) -> Result<Vec<SubAccount>>;

    async fn get_accounts(&mut self, namespace: &str, ids: &[Uuid]) -> Result<Vec<Account>>;

    /// Blocks until the transaction-scoped lock on `key` is held, or fails
    /// with `LockTimeout` after `timeout`.
    async fn advisory_lock(&mut self, key: i64, timeout: Duration) -> Result<()>;

    /// Takes the lock only if it is free right now.
    async fn try_advisory_lock(&mut self, key: i64) -> Result<bool>;

    async fn create_transaction_group(&mut self, group: &TransactionGroup) -> Result<TransactionGroup>;

    /// Writes the transaction row and its entries, returning the transaction
    /// with entries attached.
    async fn book_transaction(&mut self, transaction: &Transaction, entries: &[Entry]) -> Result<Transaction>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// The full set of storage handles the services need.
#[derive(Clone)]
pub struct Repositories {
    pub dimensions: Arc<dyn DimensionRepository>,
    pub accounts: Arc<dyn AccountRepository>,
    pub customer_accounts: Arc<dyn CustomerAccountRepository>,
    pub ledger: Arc<dyn LedgerRepository>,
}

impl Repositories {
    pub fn postgres(pool: DbPool) -> Self {
        Self {
            dimensions: Arc::new(PgDimensionRepository::new(pool.clone())),
            accounts: Arc::new(PgAccountRepository::new(pool.clone())),
            customer_accounts: Arc::new(PgCustomerAccountRepository::new(pool.clone())),
            ledger: Arc::new(PgLedgerRepository::new(pool)),
        }
    }

    pub fn in_memory(store: InMemoryStore) -> Self {
        Self {
            dimensions: Arc::new(store.clone()),
            accounts: Arc::new(store.clone()),
            customer_accounts: Arc::new(store.clone()),
            ledger: Arc::new(store),
        }
    }
}
