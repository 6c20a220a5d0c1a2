use crate::error::{AppError, Result};
use crate::repositories::LedgerTransaction;
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Separator between scope segments. Segments may not contain it.
pub const SCOPE_DELIMITER: char = ':';

const ACCOUNT_SCOPE: &str = "ledger-account";

/// A composite lock name, hashed into the 64-bit advisory lock space.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockKey {
    scopes: Vec<String>,
}

impl LockKey {
    pub fn new<I, S>(scopes: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let scopes: Vec<String> = scopes.into_iter().map(Into::into).collect();

        if scopes.is_empty() {
            return Err(AppError::Validation("Lock key needs at least one scope".to_string()));
        }
        for scope in &scopes {
            if scope.is_empty() {
                return Err(AppError::Validation("Lock key scopes must be non-empty".to_string()));
            }
            if scope.contains(SCOPE_DELIMITER) {
                return Err(AppError::Validation(format!(
                    "Lock key scope '{}' contains the delimiter '{}'",
                    scope, SCOPE_DELIMITER
                )));
            }
        }

        Ok(Self { scopes })
    }

    /// Lock serialising every commit that touches one customer account.
    pub fn for_account(namespace: &str, account_id: Uuid) -> Result<Self> {
        Self::new([ACCOUNT_SCOPE.to_string(), namespace.to_string(), account_id.to_string()])
    }

    /// First eight bytes of SHA-256 over the joined scopes, big-endian.
    pub fn hash(&self) -> i64 {
        let digest = Sha256::digest(self.to_string().as_bytes());
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        i64::from_be_bytes(bytes)
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.scopes.join(&SCOPE_DELIMITER.to_string()))
    }
}

/// Exclusive, transaction-scoped locks. A lock lives until the storage
/// transaction that took it commits or rolls back.
#[derive(Debug, Clone)]
pub struct Locker {
    timeout: Duration,
}

impl Locker {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Blocks until the lock is held; fails with `LockTimeout` after the
    /// configured wait.
    pub async fn lock_for_tx(&self, tx: &mut dyn LedgerTransaction, key: &LockKey) -> Result<()> {
        tracing::trace!(lock = %key, "acquiring lock");
        tx.advisory_lock(key.hash(), self.timeout).await.map_err(|err| match err {
            AppError::LockTimeout(detail) => AppError::LockTimeout(format!("{}: {}", key, detail)),
            other => other,
        })
    }

    pub async fn try_lock_for_tx(&self, tx: &mut dyn LedgerTransaction, key: &LockKey) -> Result<bool> {
        tx.try_advisory_lock(key.hash()).await
    }

    /// Locks every key in ascending hash order so that two commits sharing
    /// accounts always contend in the same sequence.
    pub async fn lock_all_for_tx(&self, tx: &mut dyn LedgerTransaction, keys: &[LockKey]) -> Result<()> {
        let mut ordered: Vec<&LockKey> = keys.iter().collect();
        ordered.sort_by_key(|key| key.hash());
        ordered.dedup_by_key(|key| key.hash());

        for key in ordered {
            self.lock_for_tx(tx, key).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::{InMemoryStore, LedgerRepository};

    #[test]
    fn test_lock_key_rejects_bad_scopes() {
        assert!(LockKey::new(Vec::<String>::new()).is_err());
        assert!(LockKey::new(["ns", ""]).is_err());
        assert!(LockKey::new(["ns", "a:b"]).is_err());
    }

    #[test]
    fn test_lock_key_hash_is_stable() {
        let id = Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();
        let a = LockKey::for_account("ns", id).unwrap();
        let b = LockKey::for_account("ns", id).unwrap();
        assert_eq!(a.hash(), b.hash());
        assert_eq!(a.to_string(), "ledger-account:ns:550e8400-e29b-41d4-a716-446655440000");

        let other = LockKey::for_account("other", id).unwrap();
        assert_ne!(a.hash(), other.hash());
    }

    #[test]
    fn test_try_lock_is_exclusive_across_transactions() {
        tokio_test::block_on(async {
            let store = InMemoryStore::new();
            let locker = Locker::new(Duration::from_millis(50));
            let key = LockKey::new(["test", "exclusive"]).unwrap();

            let mut first = store.begin().await.unwrap();
            let mut second = store.begin().await.unwrap();

            assert!(locker.try_lock_for_tx(first.as_mut(), &key).await.unwrap());
            assert!(!locker.try_lock_for_tx(second.as_mut(), &key).await.unwrap());

            first.commit().await.unwrap();
            assert!(locker.try_lock_for_tx(second.as_mut(), &key).await.unwrap());
        });
    }

    #[tokio::test]
    async fn test_lock_times_out() {
        let store = InMemoryStore::new();
        let locker = Locker::new(Duration::from_millis(20));
        let key = LockKey::new(["test", "timeout"]).unwrap();

        let mut holder = store.begin().await.unwrap();
        locker.lock_for_tx(holder.as_mut(), &key).await.unwrap();

        let mut waiter = store.begin().await.unwrap();
        let err = locker.lock_for_tx(waiter.as_mut(), &key).await.unwrap_err();
        assert!(matches!(err, AppError::LockTimeout(msg) if msg.contains("test:timeout")));
    }

    #[tokio::test]
    async fn test_lock_is_reentrant_within_transaction() {
        let store = InMemoryStore::new();
        let locker = Locker::new(Duration::from_millis(20));
        let key = LockKey::new(["test", "reentrant"]).unwrap();

        let mut tx = store.begin().await.unwrap();
        locker.lock_all_for_tx(tx.as_mut(), &[key.clone(), key.clone()]).await.unwrap();
        locker.lock_for_tx(tx.as_mut(), &key).await.unwrap();
    }
}
