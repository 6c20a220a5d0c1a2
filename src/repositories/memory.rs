use crate::error::{AppError, Result};
use crate::models::{
    Account, AccountFilter, CustomerAccountMapping, CustomerRef, Dimension, DimensionKey,
    Entry, Page, SubAccount, SubAccountDimensions, SubAccountFilter, SumEntriesQuery, Transaction,
    TransactionGroup,
};
use crate::repositories::{
    AccountRepository, CustomerAccountRepository, DimensionRepository, LedgerRepository,
    LedgerTransaction, ListEntriesParams, ListTransactionsParams,
};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

#[derive(Default)]
struct State {
    dimensions: Vec<Dimension>,
    accounts: Vec<Account>,
    sub_accounts: Vec<SubAccount>,
    mappings: Vec<CustomerAccountMapping>,
    // Rows are stored bare; children are attached when read.
    groups: Vec<TransactionGroup>,
    transactions: Vec<Transaction>,
    entries: Vec<Entry>,
}

impl State {
    fn entries_of(&self, transaction_id: Uuid) -> Vec<Entry> {
        self.entries
            .iter()
            .filter(|e| e.transaction_id == transaction_id)
            .cloned()
            .collect()
    }

    fn with_entries(&self, transaction: &Transaction) -> Transaction {
        let mut transaction = transaction.clone();
        transaction.entries = self.entries_of(transaction.id);
        transaction
    }
}

#[derive(Default)]
struct Inner {
    state: Mutex<State>,
    locks: Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>,
    booking_budget: Mutex<Option<usize>>,
    // Shared by transactions and entries; like a sequence, values used by a
    // rolled-back transaction are not reused.
    seq: AtomicI64,
}

/// Process-local store with the same uniqueness, locking and atomicity
/// rules as the PostgreSQL schema.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<Inner>,
}

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every `book_transaction` after the next `n` fail with a
    /// persistence error. Used to exercise rollback.
    pub fn fail_bookings_after(&self, n: usize) {
        *guard(&self.inner.booking_budget) = Some(n);
    }

    fn state(&self) -> MutexGuard<'_, State> {
        guard(&self.inner.state)
    }

    fn lock_handle(&self, key: i64) -> Arc<tokio::sync::Mutex<()>> {
        guard(&self.inner.locks).entry(key).or_default().clone()
    }

    /// Forgets lock entries nobody holds or waits on. Handles are only
    /// cloned under the map lock, so a count of one means the map owns the
    /// last reference.
    fn prune_locks(&self, keys: &[i64]) {
        let mut locks = guard(&self.inner.locks);
        for key in keys {
            if locks.get(key).map_or(false, |handle| Arc::strong_count(handle) == 1) {
                locks.remove(key);
            }
        }
    }

    fn next_seq(&self) -> i64 {
        self.inner.seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn take_booking_budget(&self) -> Result<()> {
        let mut budget = guard(&self.inner.booking_budget);
        match budget.as_mut() {
            Some(0) => Err(AppError::database(
                "booking transaction",
                sqlx::Error::Protocol("injected booking failure".to_string()),
            )),
            Some(remaining) => {
                *remaining -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }
}

#[async_trait]
impl DimensionRepository for InMemoryStore {
    async fn create_dimension(&self, dimension: &Dimension) -> Result<Dimension> {
        let mut state = self.state();
        let exists = state.dimensions.iter().any(|d| {
            d.namespace == dimension.namespace && d.key == dimension.key && d.value == dimension.value
        });
        if exists {
            return Err(AppError::Conflict(format!(
                "Dimension {}={} already exists in namespace '{}'",
                dimension.key, dimension.value, dimension.namespace
            )));
        }
        state.dimensions.push(dimension.clone());
        Ok(dimension.clone())
    }

    async fn get_dimension(&self, namespace: &str, id: Uuid) -> Result<Option<Dimension>> {
        Ok(self
            .state()
            .dimensions
            .iter()
            .find(|d| d.namespace == namespace && d.id == id)
            .cloned())
    }

    async fn get_dimension_by_key_and_value(
        &self,
        namespace: &str,
        key: DimensionKey,
        value: &str,
    ) -> Result<Option<Dimension>> {
        Ok(self
            .state()
            .dimensions
            .iter()
            .find(|d| d.namespace == namespace && d.key == key && d.value == value)
            .cloned())
    }

    async fn get_dimensions(&self, namespace: &str, ids: &[Uuid]) -> Result<Vec<Dimension>> {
        let mut dims: Vec<Dimension> = self
            .state()
            .dimensions
            .iter()
            .filter(|d| d.namespace == namespace && ids.contains(&d.id))
            .cloned()
            .collect();
        dims.sort_by(|a, b| (a.key, &a.value).cmp(&(b.key, &b.value)));
        Ok(dims)
    }
}

#[async_trait]
impl AccountRepository for InMemoryStore {
    async fn create_account(&self, account: &Account) -> Result<Account> {
        let mut state = self.state();
        if !account.account_type.is_customer() {
            let duplicate = state
                .accounts
                .iter()
                .any(|a| a.namespace == account.namespace && a.account_type == account.account_type);
            if duplicate {
                return Err(AppError::Conflict(format!(
                    "Business account {} already exists in namespace '{}'",
                    account.account_type, account.namespace
                )));
            }
        }
        state.accounts.push(account.clone());
        Ok(account.clone())
    }

    async fn get_account(&self, namespace: &str, id: Uuid) -> Result<Option<Account>> {
        Ok(self
            .state()
            .accounts
            .iter()
            .find(|a| a.namespace == namespace && a.id == id)
            .cloned())
    }

    async fn list_accounts(&self, filter: &AccountFilter) -> Result<Vec<Account>> {
        Ok(self
            .state()
            .accounts
            .iter()
            .filter(|a| filter.matches(a))
            .cloned()
            .collect())
    }

    async fn create_sub_account(&self, sub_account: &SubAccount) -> Result<SubAccount> {
        let mut state = self.state();
        let route = sub_account.dimensions.route();
        let duplicate = state
            .sub_accounts
            .iter()
            .any(|s| s.account_id == sub_account.account_id && s.dimensions.route() == route);
        if duplicate {
            return Err(AppError::Conflict(format!(
                "Sub-account with dimensions {} already exists for account '{}'",
                route, sub_account.account_id
            )));
        }
        state.sub_accounts.push(sub_account.clone());
        Ok(sub_account.clone())
    }

    async fn get_sub_account(&self, namespace: &str, id: Uuid) -> Result<Option<SubAccount>> {
        Ok(self
            .state()
            .sub_accounts
            .iter()
            .find(|s| s.namespace == namespace && s.id == id)
            .cloned())
    }

    async fn find_sub_account_by_dimensions(
        &self,
        account_id: Uuid,
        dimensions: &SubAccountDimensions,
    ) -> Result<Option<SubAccount>> {
        let route = dimensions.route();
        Ok(self
            .state()
            .sub_accounts
            .iter()
            .find(|s| s.account_id == account_id && s.dimensions.route() == route)
            .cloned())
    }

    async fn list_sub_accounts(&self, filter: &SubAccountFilter) -> Result<Vec<SubAccount>> {
        Ok(self
            .state()
            .sub_accounts
            .iter()
            .filter(|s| filter.matches(s))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl CustomerAccountRepository for InMemoryStore {
    async fn save_mapping(&self, mapping: &CustomerAccountMapping) -> Result<CustomerAccountMapping> {
        let mut state = self.state();
        let existing = state.mappings.iter().find(|m| {
            m.namespace == mapping.namespace
                && m.customer_id == mapping.customer_id
                && m.account_type == mapping.account_type
        });
        if let Some(existing) = existing {
            return Ok(existing.clone());
        }
        state.mappings.push(mapping.clone());
        Ok(mapping.clone())
    }

    async fn get_mappings(&self, customer: &CustomerRef) -> Result<Vec<CustomerAccountMapping>> {
        Ok(self
            .state()
            .mappings
            .iter()
            .filter(|m| m.namespace == customer.namespace && m.customer_id == customer.id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl LedgerRepository for InMemoryStore {
    async fn begin(&self) -> Result<Box<dyn LedgerTransaction>> {
        Ok(Box::new(InMemoryTransaction {
            store: self.clone(),
            held: HashMap::new(),
            groups: Vec::new(),
            transactions: Vec::new(),
            entries: Vec::new(),
        }))
    }

    async fn sum_entries(&self, query: &SumEntriesQuery) -> Result<Decimal> {
        let state = self.state();
        let filter = &query.filter;

        let booked_at: HashMap<Uuid, _> = state.transactions.iter().map(|t| (t.id, t.booked_at)).collect();
        let sub_accounts: HashMap<Uuid, &SubAccount> = state.sub_accounts.iter().map(|s| (s.id, s)).collect();

        let total = state
            .entries
            .iter()
            .filter(|e| e.namespace == query.namespace)
            .filter(|e| filter.sub_account_id.map_or(true, |id| id == e.sub_account_id))
            .filter(|e| filter.transaction_id.map_or(true, |id| id == e.transaction_id))
            .filter(|e| {
                booked_at
                    .get(&e.transaction_id)
                    .map_or(false, |at| filter.booked_at.contains(*at))
            })
            .filter(|e| {
                sub_accounts.get(&e.sub_account_id).map_or(false, |s| {
                    filter.account_id.map_or(true, |id| id == s.account_id)
                        && filter.dimensions.matches(&s.dimensions)
                })
            })
            .map(|e| e.amount)
            .sum();

        Ok(total)
    }

    async fn list_transactions(&self, params: &ListTransactionsParams) -> Result<Page<Transaction>> {
        let state = self.state();
        let mut rows: Vec<&Transaction> = state
            .transactions
            .iter()
            .filter(|t| t.namespace == params.namespace)
            .filter(|t| params.group_id.map_or(true, |id| id == t.group_id))
            .filter(|t| params.page.cursor.map_or(true, |c| c.precedes(t.created_at, t.seq)))
            .collect();
        rows.sort_by_key(|t| t.cursor());

        let rows: Vec<Transaction> = rows
            .into_iter()
            .take(params.page.limit as usize + 1)
            .map(|t| state.with_entries(t))
            .collect();

        Ok(Page::from_overfetch(rows, params.page.limit, Transaction::cursor))
    }

    async fn list_entries(&self, params: &ListEntriesParams) -> Result<Page<Entry>> {
        let state = self.state();
        let mut rows: Vec<Entry> = state
            .entries
            .iter()
            .filter(|e| e.namespace == params.namespace)
            .filter(|e| params.sub_account_id.map_or(true, |id| id == e.sub_account_id))
            .filter(|e| params.transaction_id.map_or(true, |id| id == e.transaction_id))
            .filter(|e| params.page.cursor.map_or(true, |c| c.precedes(e.created_at, e.seq)))
            .cloned()
            .collect();
        rows.sort_by_key(Entry::cursor);
        rows.truncate(params.page.limit as usize + 1);

        Ok(Page::from_overfetch(rows, params.page.limit, Entry::cursor))
    }

    async fn get_transaction_group(&self, namespace: &str, id: Uuid) -> Result<Option<TransactionGroup>> {
        let state = self.state();
        let Some(group) = state.groups.iter().find(|g| g.namespace == namespace && g.id == id) else {
            return Ok(None);
        };

        let mut group = group.clone();
        group.transactions = state
            .transactions
            .iter()
            .filter(|t| t.group_id == group.id)
            .map(|t| state.with_entries(t))
            .collect();
        Ok(Some(group))
    }
}

/// Writes are staged here and applied in one step on commit.
pub struct InMemoryTransaction {
    store: InMemoryStore,
    held: HashMap<i64, OwnedMutexGuard<()>>,
    groups: Vec<TransactionGroup>,
    transactions: Vec<Transaction>,
    entries: Vec<Entry>,
}

impl InMemoryTransaction {
    fn release_locks(&mut self) {
        if self.held.is_empty() {
            return;
        }
        let keys: Vec<i64> = self.held.keys().copied().collect();
        self.held.clear();
        self.store.prune_locks(&keys);
    }
}

impl Drop for InMemoryTransaction {
    fn drop(&mut self) {
        self.release_locks();
    }
}

#[async_trait]
impl LedgerTransaction for InMemoryTransaction {
    async fn get_sub_accounts(&mut self, namespace: &str, ids: &[Uuid]) -> Result<Vec<SubAccount>> {
        Ok(self
            .store
            .state()
            .sub_accounts
            .iter()
            .filter(|s| s.namespace == namespace && ids.contains(&s.id))
            .cloned()
            .collect())
    }

    async fn get_accounts(&mut self, namespace: &str, ids: &[Uuid]) -> Result<Vec<Account>> {
        Ok(self
            .store
            .state()
            .accounts
            .iter()
            .filter(|a| a.namespace == namespace && ids.contains(&a.id))
            .cloned()
            .collect())
    }

    async fn advisory_lock(&mut self, key: i64, timeout: Duration) -> Result<()> {
        if self.held.contains_key(&key) {
            return Ok(());
        }

        let handle = self.store.lock_handle(key);
        let acquired = tokio::time::timeout(timeout, handle.lock_owned())
            .await
            .map_err(|_| AppError::LockTimeout(format!("lock {} not acquired within {:?}", key, timeout)))?;

        self.held.insert(key, acquired);
        Ok(())
    }

    async fn try_advisory_lock(&mut self, key: i64) -> Result<bool> {
        if self.held.contains_key(&key) {
            return Ok(true);
        }

        match self.store.lock_handle(key).try_lock_owned() {
            Ok(acquired) => {
                self.held.insert(key, acquired);
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }

    async fn create_transaction_group(&mut self, group: &TransactionGroup) -> Result<TransactionGroup> {
        let mut stored = group.clone();
        stored.transactions.clear();
        self.groups.push(stored.clone());
        Ok(stored)
    }

    async fn book_transaction(&mut self, transaction: &Transaction, entries: &[Entry]) -> Result<Transaction> {
        self.store.take_booking_budget()?;

        let mut stored = transaction.clone();
        stored.seq = self.store.next_seq();
        stored.entries.clear();
        self.transactions.push(stored.clone());

        let entries: Vec<Entry> = entries
            .iter()
            .map(|e| Entry {
                seq: self.store.next_seq(),
                transaction_id: stored.id,
                dimensions: Vec::new(),
                ..e.clone()
            })
            .collect();
        self.entries.extend(entries.iter().cloned());

        stored.entries = entries;
        Ok(stored)
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        {
            let mut state = self.store.state();
            state.groups.append(&mut self.groups);
            state.transactions.append(&mut self.transactions);
            state.entries.append(&mut self.entries);
        }
        // Locks are released only after the writes are visible.
        self.release_locks();
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<()> {
        self.release_locks();
        Ok(())
    }
}
