//! Request-scoped two-level membership cache.

use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::trace;

use crate::error::Result;
use crate::rbac::models::{MembershipRecord, TenantId, UserId};
use crate::store::MembershipStore;

/// Where a lookup was answered from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupSource {
    Cache,
    Store,
}

impl LookupSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::Store => "store",
        }
    }
}

type Rows = HashMap<UserId, HashMap<TenantId, Option<MembershipRecord>>>;

/// Memo of membership rows, superuser status and tenant existence.
///
/// Absent rows are cached as `None` so a miss is read from storage once.
/// Errors are never cached. Locks are released before any storage await.
#[derive(Debug, Default)]
pub struct MembershipCache {
    rows: Mutex<Rows>,
    superusers: Mutex<HashMap<UserId, Option<String>>>,
    tenants: Mutex<HashMap<TenantId, bool>>,
}

impl MembershipCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// `Some(entry)` on a hit, where the entry itself may be a cached absence.
    pub fn get(&self, user_id: &UserId, tenant_id: &TenantId) -> Option<Option<MembershipRecord>> {
        self.rows
            .lock()
            .get(user_id)
            .and_then(|tenants| tenants.get(tenant_id))
            .cloned()
    }

    pub fn insert(&self, user_id: &UserId, tenant_id: &TenantId, entry: Option<MembershipRecord>) {
        self.rows
            .lock()
            .entry(user_id.clone())
            .or_default()
            .insert(tenant_id.clone(), entry);
    }

    /// Cached row, loading it from `store` on a miss.
    pub async fn get_or_load(
        &self,
        store: &dyn MembershipStore,
        user_id: &UserId,
        tenant_id: &TenantId,
    ) -> Result<(Option<MembershipRecord>, LookupSource)> {
        if let Some(entry) = self.get(user_id, tenant_id) {
            trace!(user_id = %user_id, tenant_id = %tenant_id, "Membership cache hit");
            return Ok((entry, LookupSource::Cache));
        }

        let entry = store.lookup(user_id, tenant_id).await?;
        self.insert(user_id, tenant_id, entry.clone());
        Ok((entry, LookupSource::Store))
    }

    /// Drop an entry after a write made it stale.
    pub fn forget(&self, user_id: &UserId, tenant_id: &TenantId) {
        if let Some(tenants) = self.rows.lock().get_mut(user_id) {
            tenants.remove(tenant_id);
        }
    }

    pub fn superuser(&self, user_id: &UserId) -> Option<Option<String>> {
        self.superusers.lock().get(user_id).cloned()
    }

    pub fn remember_superuser(&self, user_id: &UserId, global_role: Option<String>) {
        self.superusers.lock().insert(user_id.clone(), global_role);
    }

    pub fn tenant_exists(&self, tenant_id: &TenantId) -> Option<bool> {
        self.tenants.lock().get(tenant_id).copied()
    }

    pub fn remember_tenant(&self, tenant_id: &TenantId, exists: bool) {
        self.tenants.lock().insert(tenant_id.clone(), exists);
    }

    /// Number of cached `(principal, tenant)` entries.
    pub fn len(&self) -> usize {
        self.rows.lock().values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryMembershipStore;

    #[tokio::test]
    async fn test_second_lookup_is_a_hit() {
        let store = InMemoryMembershipStore::default();
        store.seed(MembershipRecord::new(TenantId::new("org-1"), UserId::new("bob"), "editor"));
        let cache = MembershipCache::new();
        let (user, tenant) = (UserId::new("bob"), TenantId::new("org-1"));

        let (first, source) = cache.get_or_load(&store, &user, &tenant).await.unwrap();
        assert_eq!(source, LookupSource::Store);
        let (second, source) = cache.get_or_load(&store, &user, &tenant).await.unwrap();
        assert_eq!(source, LookupSource::Cache);

        assert_eq!(first, second);
        assert_eq!(store.lookup_count(), 1);
    }

    #[tokio::test]
    async fn test_absence_is_cached() {
        let store = InMemoryMembershipStore::default();
        let cache = MembershipCache::new();
        let (user, tenant) = (UserId::new("carol"), TenantId::new("org-1"));

        for _ in 0..3 {
            let (entry, _) = cache.get_or_load(&store, &user, &tenant).await.unwrap();
            assert!(entry.is_none());
        }
        assert_eq!(store.lookup_count(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_entries_are_per_principal_and_tenant() {
        let cache = MembershipCache::new();
        let record = MembershipRecord::new(TenantId::new("org-1"), UserId::new("bob"), "admin");
        cache.insert(&UserId::new("bob"), &TenantId::new("org-1"), Some(record));

        assert!(cache.get(&UserId::new("bob"), &TenantId::new("org-2")).is_none());
        assert!(cache.get(&UserId::new("alice"), &TenantId::new("org-1")).is_none());
        assert!(cache.get(&UserId::new("bob"), &TenantId::new("org-1")).is_some());
    }

    #[test]
    fn test_superuser_memo() {
        let cache = MembershipCache::new();
        assert_eq!(cache.superuser(&UserId::new("root")), None);
        cache.remember_superuser(&UserId::new("root"), Some("superadmin".into()));
        cache.remember_superuser(&UserId::new("bob"), None);
        assert_eq!(cache.superuser(&UserId::new("root")), Some(Some("superadmin".into())));
        assert_eq!(cache.superuser(&UserId::new("bob")), Some(None));
    }
}
