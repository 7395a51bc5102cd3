//! Membership resolution for one domain.

use std::marker::PhantomData;
use std::sync::Arc;
use tracing::debug;

use super::cache::MembershipCache;
use crate::error::Result;
use crate::observability::metrics;
use crate::rbac::global_admin::GlobalAdminBypass;
use crate::rbac::models::{Membership, TenantId, UserId};
use crate::rbac::policy::validate_record;
use crate::rbac::roles::DomainRole;
use crate::store::MembershipStore;

/// Resolves validated memberships of domain `R` through a request cache.
pub struct MembershipResolver<R: DomainRole> {
    store: Arc<dyn MembershipStore>,
    cache: Arc<MembershipCache>,
    bypass: GlobalAdminBypass,
    _role: PhantomData<R>,
}

impl<R: DomainRole> Clone for MembershipResolver<R> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            cache: self.cache.clone(),
            bypass: self.bypass.clone(),
            _role: PhantomData,
        }
    }
}

impl<R: DomainRole> MembershipResolver<R> {
    pub fn new(
        store: Arc<dyn MembershipStore>,
        cache: Arc<MembershipCache>,
        bypass: GlobalAdminBypass,
    ) -> Self {
        Self {
            store,
            cache,
            bypass,
            _role: PhantomData,
        }
    }

    pub fn cache(&self) -> &Arc<MembershipCache> {
        &self.cache
    }

    /// Whether the tenant exists, memoised for the request.
    pub async fn tenant_exists(&self, tenant_id: &TenantId) -> Result<bool> {
        if tenant_id.is_blank() {
            return Ok(false);
        }
        if let Some(exists) = self.cache.tenant_exists(tenant_id) {
            return Ok(exists);
        }
        let exists = self.store.tenant_exists(tenant_id).await?;
        self.cache.remember_tenant(tenant_id, exists);
        Ok(exists)
    }

    async fn superuser_role(&self, user_id: &UserId) -> Result<Option<String>> {
        if let Some(role) = self.cache.superuser(user_id) {
            return Ok(role);
        }
        let role = self.bypass.superuser_role(user_id).await?;
        self.cache.remember_superuser(user_id, role.clone());
        Ok(role)
    }

    /// The principal's membership in `tenant_id`, if any.
    ///
    /// Superusers get a synthetic highest-role membership for every existing
    /// tenant. A stored role outside the enumeration is an integrity error.
    pub async fn resolve(&self, user_id: &UserId, tenant_id: &TenantId) -> Result<Option<Membership<R>>> {
        if user_id.is_blank() || tenant_id.is_blank() {
            return Ok(None);
        }

        if let Some(global_role) = self.superuser_role(user_id).await? {
            if self.tenant_exists(tenant_id).await? {
                return Ok(Some(self.bypass.synthesize(tenant_id, user_id, &global_role)));
            }
        }

        self.stored(user_id, tenant_id).await
    }

    /// The stored membership only, never a synthetic one.
    pub async fn stored(&self, user_id: &UserId, tenant_id: &TenantId) -> Result<Option<Membership<R>>> {
        if user_id.is_blank() || tenant_id.is_blank() {
            return Ok(None);
        }

        let (record, source) = self
            .cache
            .get_or_load(self.store.as_ref(), user_id, tenant_id)
            .await?;
        metrics::record_lookup(R::DOMAIN, source.as_str());
        debug!(
            domain = R::DOMAIN,
            user_id = %user_id,
            tenant_id = %tenant_id,
            source = source.as_str(),
            found = record.is_some(),
            "Membership resolved"
        );

        record.as_ref().map(validate_record::<R>).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::rbac::models::MembershipRecord;
    use crate::rbac::roles::OrganizationRole;
    use crate::store::{InMemoryGlobalRoles, InMemoryMembershipStore};

    fn resolver(store: Arc<InMemoryMembershipStore>) -> MembershipResolver<OrganizationRole> {
        let roles = InMemoryGlobalRoles::default();
        roles.assign("root", "superadmin");
        let bypass = GlobalAdminBypass::new(Arc::new(roles), true);
        MembershipResolver::new(store, Arc::new(MembershipCache::new()), bypass)
    }

    fn seeded() -> Arc<InMemoryMembershipStore> {
        let store = InMemoryMembershipStore::default();
        store.seed(MembershipRecord::new(TenantId::new("org-1"), UserId::new("bob"), "editor"));
        store.seed(MembershipRecord::new(TenantId::new("org-1"), UserId::new("eve"), "bogus"));
        Arc::new(store)
    }

    #[tokio::test]
    async fn test_stored_membership_resolved_once() {
        let store = seeded();
        let resolver = resolver(store.clone());
        let (user, tenant) = (UserId::new("bob"), TenantId::new("org-1"));

        let first = resolver.resolve(&user, &tenant).await.unwrap().unwrap();
        let second = resolver.resolve(&user, &tenant).await.unwrap().unwrap();

        assert_eq!(first.role, OrganizationRole::Editor);
        assert_eq!(first, second);
        assert_eq!(store.lookup_count(), 1);
    }

    #[tokio::test]
    async fn test_superuser_gets_synthetic_owner() {
        let store = seeded();
        let resolver = resolver(store.clone());

        let membership = resolver
            .resolve(&UserId::new("root"), &TenantId::new("org-1"))
            .await
            .unwrap()
            .unwrap();
        assert!(membership.is_synthetic());
        assert_eq!(membership.role, OrganizationRole::Owner);
        assert_eq!(store.lookup_count(), 0);
    }

    #[tokio::test]
    async fn test_superuser_not_granted_on_missing_tenant() {
        let resolver = resolver(seeded());
        let membership = resolver
            .resolve(&UserId::new("root"), &TenantId::new("org-404"))
            .await
            .unwrap();
        assert!(membership.is_none());
    }

    #[tokio::test]
    async fn test_unknown_role_is_integrity_error() {
        let resolver = resolver(seeded());
        let err = resolver
            .resolve(&UserId::new("eve"), &TenantId::new("org-1"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::IntegrityError);
    }

    #[tokio::test]
    async fn test_blank_principal_resolves_nothing() {
        let store = seeded();
        let resolver = resolver(store.clone());
        assert!(resolver
            .resolve(&UserId::new(""), &TenantId::new("org-1"))
            .await
            .unwrap()
            .is_none());
        assert_eq!(store.lookup_count(), 0);
    }
}
