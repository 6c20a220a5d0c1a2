use crate::clock::SharedClock;
use crate::config::LedgerSettings;
use crate::error::{AppError, Result};
use crate::models::{
    collect_all_pages, Account, Dimension, Entry, Page, PageParams, SubAccount, Transaction,
    TransactionGroup, TransactionGroupInput,
};
use crate::observability::{get_metrics, mask_amount, LatencyTimer};
use crate::repositories::{
    AccountRepository, DimensionRepository, LedgerRepository, LedgerTransaction, ListEntriesParams,
    ListTransactionsParams, Repositories,
};
use crate::services::catalog_service::require_namespace;
use crate::services::locker::{LockKey, Locker};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

/// Account-level rule re-checked while a commit holds its locks, before
/// anything is written.
#[async_trait]
pub trait AccountInvariantCheck: Send + Sync {
    async fn check(&self, tx: &mut dyn LedgerTransaction, accounts: &[Account]) -> Result<()>;
}

/// No account-level rules beyond zero-sum transactions.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAccountInvariants;

#[async_trait]
impl AccountInvariantCheck for NoAccountInvariants {
    async fn check(&self, _tx: &mut dyn LedgerTransaction, _accounts: &[Account]) -> Result<()> {
        Ok(())
    }
}

/// Commits transaction groups and reads them back.
///
/// A commit validates every transaction, locks the customer accounts it
/// touches, writes the group and its transactions in one storage
/// transaction and either commits all of it or nothing.
#[derive(Clone)]
pub struct LedgerService {
    ledger: Arc<dyn LedgerRepository>,
    accounts: Arc<dyn AccountRepository>,
    dimensions: Arc<dyn DimensionRepository>,
    locker: Locker,
    invariants: Arc<dyn AccountInvariantCheck>,
    clock: SharedClock,
    settings: LedgerSettings,
}

impl LedgerService {
    pub fn new(repositories: &Repositories, clock: SharedClock, settings: LedgerSettings) -> Self {
        Self {
            ledger: repositories.ledger.clone(),
            accounts: repositories.accounts.clone(),
            dimensions: repositories.dimensions.clone(),
            locker: Locker::new(settings.lock_timeout()),
            invariants: Arc::new(NoAccountInvariants),
            clock,
            settings,
        }
    }

    pub fn with_invariant_check(mut self, check: Arc<dyn AccountInvariantCheck>) -> Self {
        self.invariants = check;
        self
    }

    /// Persists the group atomically and returns it with every transaction
    /// and entry populated.
    #[instrument(skip(self, input), fields(namespace = %input.namespace, transactions = input.transactions.len()))]
    pub async fn commit_group(&self, input: TransactionGroupInput) -> Result<TransactionGroup> {
        let timer = LatencyTimer::new();
        let result = self.commit_group_inner(&input).await;
        let metrics = get_metrics();
        metrics.record_commit_latency(timer.elapsed_ms());

        match &result {
            Ok(group) => {
                metrics.record_group_committed(&group.namespace, group.transactions.len(), group.entry_count());
                tracing::info!(group_id = %group.id, entries = group.entry_count(), "transaction group committed");
            }
            Err(err) => {
                metrics.record_commit_failed(err.kind());
                if let AppError::Invariant { total, .. } = err {
                    tracing::warn!(total = %mask_amount(total), "rejected unbalanced transaction");
                } else {
                    tracing::warn!(error = %err, "transaction group not committed");
                }
            }
        }

        result
    }

    async fn commit_group_inner(&self, input: &TransactionGroupInput) -> Result<TransactionGroup> {
        Self::validate_group(input)?;
        let namespace = input.namespace.as_str();

        let mut tx = self.ledger.begin().await?;
        match self.write_group(tx.as_mut(), input).await {
            Ok(group) => {
                tx.commit().await?;
                Ok(group)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::error!(namespace, error = %rollback_err, "rollback failed");
                }
                Err(err)
            }
        }
    }

    /// Structural checks that need no storage. Transactions are checked in
    /// order and the first failure is returned.
    fn validate_group(input: &TransactionGroupInput) -> Result<()> {
        require_namespace(&input.namespace)?;

        if input.transactions.is_empty() {
            return Err(AppError::Validation(
                "Transaction group must contain at least one transaction".to_string(),
            ));
        }
        if !input.annotations.is_object() {
            return Err(AppError::Validation("Annotations must be a JSON object".to_string()));
        }

        for transaction in &input.transactions {
            transaction.validate()?;
        }
        Ok(())
    }

    async fn write_group(
        &self,
        tx: &mut dyn LedgerTransaction,
        input: &TransactionGroupInput,
    ) -> Result<TransactionGroup> {
        let namespace = input.namespace.as_str();

        let sub_accounts = self.resolve_sub_accounts(tx, input).await?;
        let account_ids: Vec<Uuid> = sub_accounts
            .values()
            .map(|s| s.account_id)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let accounts = tx.get_accounts(namespace, &account_ids).await?;

        // Business accounts are shared by every customer and stay unlocked.
        let keys = accounts
            .iter()
            .filter(|a| a.account_type.is_customer())
            .map(|a| LockKey::for_account(namespace, a.id))
            .collect::<Result<Vec<_>>>()?;

        let lock_timer = LatencyTimer::new();
        self.locker.lock_all_for_tx(tx, &keys).await?;
        get_metrics().record_lock_wait(lock_timer.elapsed_ms(), keys.len());

        self.invariants.check(tx, &accounts).await?;

        let now = self.clock.now();
        let mut group = tx
            .create_transaction_group(&TransactionGroup::new(namespace, input.annotations.clone(), now))
            .await?;

        for transaction_input in &input.transactions {
            let transaction = Transaction::new(namespace, group.id, transaction_input.booked_at, now);
            let entries: Vec<Entry> = transaction_input
                .entries
                .iter()
                .map(|entry| Entry::new(namespace, transaction.id, entry, now))
                .collect();

            let booked = tx.book_transaction(&transaction, &entries).await?;
            tracing::debug!(transaction_id = %booked.id, entries = booked.entries.len(), "transaction booked");
            group.transactions.push(booked);
        }

        Ok(group)
    }

    /// Loads every referenced sub-account inside the storage transaction and
    /// checks each entry's address against it.
    async fn resolve_sub_accounts(
        &self,
        tx: &mut dyn LedgerTransaction,
        input: &TransactionGroupInput,
    ) -> Result<HashMap<Uuid, SubAccount>> {
        let ids = input.sub_account_ids();
        let found: HashMap<Uuid, SubAccount> = tx
            .get_sub_accounts(&input.namespace, &ids)
            .await?
            .into_iter()
            .map(|s| (s.id, s))
            .collect();

        if let Some(missing) = ids.iter().find(|id| !found.contains_key(id)) {
            return Err(AppError::NotFound(format!(
                "Sub-account '{}' not found in namespace '{}'",
                missing, input.namespace
            )));
        }

        for entry in input.transactions.iter().flat_map(|t| &t.entries) {
            let address = &entry.address;
            let sub_account = &found[&address.sub_account_id];
            if sub_account.account_type != address.account_type {
                return Err(AppError::Validation(format!(
                    "Sub-account '{}' belongs to a {} account, not {}",
                    sub_account.id, sub_account.account_type, address.account_type
                )));
            }
        }

        Ok(found)
    }

    pub async fn get_transaction_group(&self, namespace: &str, id: Uuid) -> Result<TransactionGroup> {
        self.ledger
            .get_transaction_group(namespace, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Transaction group with id '{}' not found", id)))
    }

    pub async fn list_transactions(&self, params: &ListTransactionsParams) -> Result<Page<Transaction>> {
        require_namespace(&params.namespace)?;
        params.page.validate()?;
        self.ledger.list_transactions(params).await
    }

    /// Lists entries, attaching each sub-account's dimensions when asked.
    pub async fn list_entries(&self, params: &ListEntriesParams) -> Result<Page<Entry>> {
        require_namespace(&params.namespace)?;
        params.page.validate()?;

        let mut page = self.ledger.list_entries(params).await?;
        if params.expand_dimensions {
            self.expand_dimensions(&params.namespace, &mut page.items).await?;
        }
        Ok(page)
    }

    async fn expand_dimensions(&self, namespace: &str, entries: &mut [Entry]) -> Result<()> {
        let mut sub_accounts: HashMap<Uuid, SubAccount> = HashMap::new();
        for id in entries.iter().map(|e| e.sub_account_id).collect::<HashSet<_>>() {
            if let Some(sub_account) = self.accounts.get_sub_account(namespace, id).await? {
                sub_accounts.insert(id, sub_account);
            }
        }

        let dimension_ids: Vec<Uuid> = sub_accounts
            .values()
            .flat_map(|s| s.dimensions.references())
            .map(|(_, id)| id)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let dimensions: HashMap<Uuid, Dimension> = self
            .dimensions
            .get_dimensions(namespace, &dimension_ids)
            .await?
            .into_iter()
            .map(|d| (d.id, d))
            .collect();

        for entry in entries.iter_mut() {
            if let Some(sub_account) = sub_accounts.get(&entry.sub_account_id) {
                entry.dimensions = sub_account
                    .dimensions
                    .references()
                    .into_iter()
                    .filter_map(|(_, id)| dimensions.get(&id).cloned())
                    .collect();
            }
        }
        Ok(())
    }

    /// Every transaction matching `params`, following cursors from the start.
    pub async fn collect_transactions(&self, params: ListTransactionsParams) -> Result<Vec<Transaction>> {
        let limit = self.settings.default_page_size;
        collect_all_pages(self.settings.max_pages, |cursor| {
            let params = ListTransactionsParams {
                page: PageParams { cursor, limit },
                ..params.clone()
            };
            async move { self.list_transactions(&params).await }
        })
        .await
    }

    /// Every entry matching `params`, following cursors from the start.
    pub async fn collect_entries(&self, params: ListEntriesParams) -> Result<Vec<Entry>> {
        let limit = self.settings.default_page_size;
        collect_all_pages(self.settings.max_pages, |cursor| {
            let params = ListEntriesParams {
                page: PageParams { cursor, limit },
                ..params.clone()
            };
            async move { self.list_entries(&params).await }
        })
        .await
    }
}
