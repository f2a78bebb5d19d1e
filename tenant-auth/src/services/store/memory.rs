use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::time::{Duration, Instant};

use super::{RevocationStore, StoreError};
use crate::models::{CredentialEntry, TenantId, UserId};

type Key = (TenantId, String);

struct Slot {
    entry: CredentialEntry,
    evict_at: Instant,
}

impl Slot {
    fn is_live(&self, now: Instant) -> bool {
        now < self.evict_at
    }
}

/// Process-local revocation store.
///
/// Every key is updated under its own shard lock, so a completed
/// `mark_revoked` is visible to every later `get`. Expired entries are
/// dropped lazily on access or by [`MemoryRevocationStore::purge_expired`].
#[derive(Default)]
pub struct MemoryRevocationStore {
    entries: DashMap<Key, Slot>,
}

impl MemoryRevocationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.iter().filter(|s| s.is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop expired entries. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, slot| slot.is_live(now));
        before - self.entries.len()
    }

    fn key(tenant_id: &TenantId, credential_id: &str) -> Key {
        (tenant_id.clone(), credential_id.to_string())
    }

    fn revoke_matching<F>(&self, revoked_by: &str, matches: F) -> usize
    where
        F: Fn(&CredentialEntry) -> bool,
    {
        let now = Instant::now();
        let at = Utc::now();
        self.entries
            .iter_mut()
            .filter(|slot| slot.is_live(now) && matches(&slot.entry))
            .fold(0, |count, mut slot| {
                if slot.entry.mark_revoked(revoked_by, at) {
                    count + 1
                } else {
                    count
                }
            })
    }
}

#[async_trait]
impl RevocationStore for MemoryRevocationStore {
    async fn put(&self, entry: &CredentialEntry, ttl: Duration) -> Result<(), StoreError> {
        let key = Self::key(&entry.tenant_id, &entry.credential_id);
        if ttl.is_zero() {
            self.entries.remove(&key);
            return Ok(());
        }
        self.entries.insert(
            key,
            Slot {
                entry: entry.clone(),
                evict_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn get(
        &self,
        tenant_id: &TenantId,
        credential_id: &str,
    ) -> Result<CredentialEntry, StoreError> {
        let key = Self::key(tenant_id, credential_id);
        let now = Instant::now();

        match self.entries.get(&key) {
            Some(slot) if slot.is_live(now) => return Ok(slot.entry.clone()),
            Some(_) => {}
            None => return Err(StoreError::NotFound),
        }

        self.entries.remove_if(&key, |_, slot| !slot.is_live(now));
        Err(StoreError::NotFound)
    }

    async fn mark_revoked(
        &self,
        tenant_id: &TenantId,
        credential_id: &str,
        revoked_by: &str,
    ) -> Result<bool, StoreError> {
        let key = Self::key(tenant_id, credential_id);
        match self.entries.get_mut(&key) {
            Some(mut slot) if slot.is_live(Instant::now()) => {
                Ok(slot.entry.mark_revoked(revoked_by, Utc::now()))
            }
            _ => Err(StoreError::NotFound),
        }
    }

    async fn touch(
        &self,
        tenant_id: &TenantId,
        credential_id: &str,
        used_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let key = Self::key(tenant_id, credential_id);
        if let Some(mut slot) = self.entries.get_mut(&key) {
            if slot.is_live(Instant::now()) {
                slot.entry.last_used_at = Some(used_at);
            }
        }
        Ok(())
    }

    async fn revoke_all(
        &self,
        tenant_id: &TenantId,
        user_id: &UserId,
        revoked_by: &str,
    ) -> Result<usize, StoreError> {
        Ok(self.revoke_matching(revoked_by, |e| {
            &e.tenant_id == tenant_id && &e.user_id == user_id
        }))
    }

    async fn revoke_tenant(
        &self,
        tenant_id: &TenantId,
        revoked_by: &str,
    ) -> Result<usize, StoreError> {
        Ok(self.revoke_matching(revoked_by, |e| &e.tenant_id == tenant_id))
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use std::sync::Arc;

    fn tenant(id: &str) -> TenantId {
        TenantId::parse(id).unwrap()
    }

    fn user(id: &str) -> UserId {
        UserId::parse(id).unwrap()
    }

    fn entry(tenant_id: &str, id: &str, user_id: &str) -> CredentialEntry {
        let now = Utc::now();
        CredentialEntry::access(
            tenant(tenant_id),
            id.to_string(),
            user(user_id),
            now,
            now + ChronoDuration::minutes(5),
        )
    }

    const TTL: Duration = Duration::from_secs(300);

    #[tokio::test]
    async fn test_put_then_get() {
        let store = MemoryRevocationStore::new();
        let e = entry("acme", "c1", "u1");
        store.put(&e, TTL).await.unwrap();
        assert_eq!(store.get(&tenant("acme"), "c1").await.unwrap(), e);
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let store = MemoryRevocationStore::new();
        let mut e = entry("acme", "c1", "u1");
        store.put(&e, TTL).await.unwrap();
        e.last_used_at = Some(Utc::now());
        store.put(&e, TTL).await.unwrap();
        assert_eq!(store.len(), 1);
        assert!(store.get(&tenant("acme"), "c1").await.unwrap().last_used_at.is_some());
    }

    #[tokio::test]
    async fn test_entries_expire_with_ttl() {
        let store = MemoryRevocationStore::new();
        store
            .put(&entry("acme", "c1", "u1"), Duration::from_millis(20))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(matches!(
            store.get(&tenant("acme"), "c1").await,
            Err(StoreError::NotFound)
        ));
        assert!(matches!(
            store.mark_revoked(&tenant("acme"), "c1", "admin").await,
            Err(StoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_ids_are_scoped_by_tenant() {
        let store = MemoryRevocationStore::new();
        store.put(&entry("acme", "c1", "u1"), TTL).await.unwrap();
        assert!(matches!(
            store.get(&tenant("globex"), "c1").await,
            Err(StoreError::NotFound)
        ));
        assert!(matches!(
            store.mark_revoked(&tenant("globex"), "c1", "admin").await,
            Err(StoreError::NotFound)
        ));
        assert!(!store.get(&tenant("acme"), "c1").await.unwrap().revoked);
    }

    #[tokio::test]
    async fn test_mark_revoked_reports_transition() {
        let store = MemoryRevocationStore::new();
        store.put(&entry("acme", "c1", "u1"), TTL).await.unwrap();
        assert!(store.mark_revoked(&tenant("acme"), "c1", "admin").await.unwrap());
        assert!(!store.mark_revoked(&tenant("acme"), "c1", "other").await.unwrap());

        let e = store.get(&tenant("acme"), "c1").await.unwrap();
        assert!(e.revoked);
        assert_eq!(e.revoked_by.as_deref(), Some("admin"));
    }

    #[tokio::test]
    async fn test_touch_ignores_missing_entries() {
        let store = MemoryRevocationStore::new();
        store
            .touch(&tenant("acme"), "missing", Utc::now())
            .await
            .unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_revoke_all_counts_transitions_only() {
        let store = MemoryRevocationStore::new();
        store.put(&entry("acme", "c1", "u1"), TTL).await.unwrap();
        store.put(&entry("acme", "c2", "u1"), TTL).await.unwrap();
        store.put(&entry("acme", "c3", "u2"), TTL).await.unwrap();
        store.put(&entry("globex", "c4", "u1"), TTL).await.unwrap();
        store.mark_revoked(&tenant("acme"), "c2", "admin").await.unwrap();

        let count = store
            .revoke_all(&tenant("acme"), &user("u1"), "admin")
            .await
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(
            store
                .revoke_all(&tenant("acme"), &user("u1"), "admin")
                .await
                .unwrap(),
            0
        );
        assert!(!store.get(&tenant("acme"), "c3").await.unwrap().revoked);
        assert!(!store.get(&tenant("globex"), "c4").await.unwrap().revoked);
    }

    #[tokio::test]
    async fn test_revoke_tenant() {
        let store = MemoryRevocationStore::new();
        store.put(&entry("acme", "c1", "u1"), TTL).await.unwrap();
        store.put(&entry("acme", "c2", "u2"), TTL).await.unwrap();
        store.put(&entry("globex", "c3", "u1"), TTL).await.unwrap();

        assert_eq!(
            store.revoke_tenant(&tenant("acme"), "root").await.unwrap(),
            2
        );
        assert!(!store.get(&tenant("globex"), "c3").await.unwrap().revoked);
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let store = MemoryRevocationStore::new();
        store
            .put(&entry("acme", "c1", "u1"), Duration::from_millis(10))
            .await
            .unwrap();
        store.put(&entry("acme", "c2", "u1"), TTL).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_revocation_has_single_winner() {
        let store = Arc::new(MemoryRevocationStore::new());
        store.put(&entry("acme", "c1", "u1"), TTL).await.unwrap();

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .mark_revoked(&tenant("acme"), "c1", &format!("actor-{}", i))
                        .await
                        .unwrap()
                })
            })
            .collect();

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
