//! Guard entry points for tenant-level resources.
//!
//! ```text
//! START ─(no principal)──────────────────────────► UNAUTHENTICATED (401)
//!   └─(principal)─► LOOKUP (bypass │ cache │ store)
//!                     ├─ ABSENT ─(tenant missing)─► DENIED (404)
//!                     │         └(tenant exists)──► DENIED (403)
//!                     └─ FOUND ─(requirement met)─► GRANTED
//!                               └(not met)────────► DENIED (403)
//! ```

use axum::http::Extensions;
use axum::response::{IntoResponse, Response};
use std::borrow::Cow;
use tracing::{debug, warn};

use super::audit::{AccessAuditEntry, AuditLogger};
use crate::error::{AccessError, ErrorCode, Result};
use crate::membership::MembershipResolver;
use crate::middleware::auth::Principal;
use crate::observability::metrics;
use crate::rbac::models::{Membership, TenantId, UserId};
use crate::rbac::policy::{evaluate, AccessRequirement, DenialReason, PolicyDecision};
use crate::rbac::roles::{Capability, DomainRole};

/// Options of [`TenantGuard::ensure_role_response`].
#[derive(Debug, Clone)]
pub struct EnsureRoleOptions<R: DomainRole> {
    /// Accepted roles; empty means any membership.
    pub roles: Vec<R>,
    /// Replaces the default 403 message.
    pub error_message: Option<Cow<'static, str>>,
}

impl<R: DomainRole> Default for EnsureRoleOptions<R> {
    fn default() -> Self {
        Self {
            roles: Vec::new(),
            error_message: None,
        }
    }
}

impl<R: DomainRole> EnsureRoleOptions<R> {
    pub fn roles(roles: &[R]) -> Self {
        Self {
            roles: roles.to_vec(),
            error_message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<Cow<'static, str>>) -> Self {
        self.error_message = Some(message.into());
        self
    }
}

/// Member lifecycle action guarded by [`TenantGuard::authorize_member_change`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberAction<R: DomainRole> {
    ChangeRole { to: R },
    Remove,
}

/// Access checks against one tenant family.
#[derive(Clone)]
pub struct TenantGuard<R: DomainRole> {
    resolver: MembershipResolver<R>,
    entity: &'static str,
    audit: AuditLogger,
}

impl<R: DomainRole> TenantGuard<R> {
    /// `entity` names the tenant in not-found messages ("Organization").
    pub fn new(resolver: MembershipResolver<R>, entity: &'static str, audit: AuditLogger) -> Self {
        Self {
            resolver,
            entity,
            audit,
        }
    }

    pub fn resolver(&self) -> &MembershipResolver<R> {
        &self.resolver
    }

    /// Cheap read-path check. No principal means no access.
    pub async fn has_access(&self, principal: Option<&UserId>, tenant_id: &TenantId) -> Result<bool> {
        let Some(user_id) = principal.filter(|u| !u.is_blank()) else {
            return Ok(false);
        };
        let granted = self.resolver.resolve(user_id, tenant_id).await?.is_some();
        metrics::record_decision(R::DOMAIN, granted);
        if !granted {
            let reason = if self.resolver.tenant_exists(tenant_id).await? {
                DenialReason::NotMemberOfAnyParent
            } else {
                DenialReason::ResourceNotFound
            };
            self.deny(user_id, tenant_id, &AccessRequirement::Any, reason).await;
        }
        Ok(granted)
    }

    /// Resolve the membership and check it against `requirement`.
    pub async fn require(
        &self,
        principal: Option<&UserId>,
        tenant_id: &TenantId,
        requirement: &AccessRequirement<R>,
    ) -> Result<Membership<R>> {
        let Some(user_id) = principal.filter(|u| !u.is_blank()) else {
            metrics::record_decision(R::DOMAIN, false);
            return Err(AccessError::unauthenticated());
        };

        let membership = self.resolver.resolve(user_id, tenant_id).await?;
        let decision = evaluate(membership.as_ref(), requirement);

        match (decision, membership) {
            (PolicyDecision::Allow, Some(membership)) => {
                debug!(
                    domain = R::DOMAIN,
                    user_id = %user_id,
                    tenant_id = %tenant_id,
                    role = %membership.role,
                    requirement = %requirement,
                    "Access granted"
                );
                metrics::record_decision(R::DOMAIN, true);
                Ok(membership)
            }
            (PolicyDecision::Deny(DenialReason::NotMemberOfAnyParent), _) | (_, None) => {
                metrics::record_decision(R::DOMAIN, false);
                if !self.resolver.tenant_exists(tenant_id).await? {
                    self.deny(user_id, tenant_id, requirement, DenialReason::ResourceNotFound)
                        .await;
                    return Err(AccessError::not_found(self.entity));
                }
                self.deny(user_id, tenant_id, requirement, DenialReason::NotMemberOfAnyParent)
                    .await;
                Err(AccessError::forbidden("Access denied"))
            }
            (PolicyDecision::Deny(reason), Some(membership)) => {
                metrics::record_decision(R::DOMAIN, false);
                debug!(
                    domain = R::DOMAIN,
                    role = %membership.role,
                    requirement = %requirement,
                    "Role does not meet requirement"
                );
                self.deny(user_id, tenant_id, requirement, reason).await;
                Err(AccessError::forbidden("Insufficient permissions"))
            }
        }
    }

    async fn deny(
        &self,
        user_id: &UserId,
        tenant_id: &TenantId,
        requirement: &AccessRequirement<R>,
        reason: DenialReason,
    ) {
        warn!(
            domain = R::DOMAIN,
            user_id = %user_id,
            tenant_id = %tenant_id,
            reason = reason.as_str(),
            "Tenant access denied"
        );
        self.audit
            .record(AccessAuditEntry::new(
                Some(user_id),
                R::DOMAIN,
                tenant_id.as_str(),
                requirement.describe(),
                reason,
            ))
            .await;
    }

    /// Membership whose role is one of `allowed` (empty accepts any role).
    pub async fn require_role(
        &self,
        principal: Option<&UserId>,
        tenant_id: &TenantId,
        allowed: &[R],
    ) -> Result<Membership<R>> {
        self.require(principal, tenant_id, &AccessRequirement::roles(allowed))
            .await
    }

    /// Membership whose permission matrix grants `capability`.
    pub async fn require_capability(
        &self,
        principal: Option<&UserId>,
        tenant_id: &TenantId,
        capability: Capability,
    ) -> Result<Membership<R>> {
        self.require(principal, tenant_id, &AccessRequirement::Capability(capability))
            .await
    }

    /// Route-level shortcut: the principal id on success, a finished error
    /// response otherwise.
    pub async fn ensure_role_response(
        &self,
        extensions: &Extensions,
        tenant_id: &TenantId,
        options: &EnsureRoleOptions<R>,
    ) -> std::result::Result<UserId, Response> {
        let principal = Principal::from_extensions(extensions).map(|p| p.id);

        match self.require_role(principal.as_ref(), tenant_id, &options.roles).await {
            Ok(membership) => Ok(membership.user_id),
            Err(e) => {
                let e = match (&options.error_message, e.code()) {
                    (Some(message), ErrorCode::Forbidden) => {
                        AccessError::forbidden(message.clone())
                    }
                    _ => e,
                };
                Err(e.into_response())
            }
        }
    }

    /// Authorize a role change or removal of `target`.
    ///
    /// The caller needs `manageMembers`. Owner rows are immutable for every
    /// caller, the owner included, and no change may promote to owner.
    /// Returns the target's current membership.
    pub async fn authorize_member_change(
        &self,
        principal: Option<&UserId>,
        tenant_id: &TenantId,
        target: &UserId,
        action: MemberAction<R>,
    ) -> Result<Membership<R>> {
        let caller = self
            .require_capability(principal, tenant_id, Capability::ManageMembers)
            .await?;

        let current = self
            .resolver
            .stored(target, tenant_id)
            .await?
            .ok_or_else(|| AccessError::not_found("Membership"))?;

        if current.role.is_owner() {
            warn!(
                domain = R::DOMAIN,
                user_id = %caller.user_id,
                target = %target,
                tenant_id = %tenant_id,
                ?action,
                "Attempt to modify the owner membership"
            );
            return Err(AccessError::forbidden("The owner membership cannot be modified"));
        }
        if let MemberAction::ChangeRole { to } = action {
            if to.is_owner() {
                return Err(AccessError::forbidden("Ownership cannot be assigned"));
            }
        }

        Ok(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::membership::MembershipCache;
    use crate::rbac::global_admin::GlobalAdminBypass;
    use crate::rbac::models::MembershipRecord;
    use crate::rbac::roles::OrganizationRole;
    use crate::store::{InMemoryGlobalRoles, InMemoryMembershipStore};
    use axum::http::StatusCode;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn guard() -> (TenantGuard<OrganizationRole>, Arc<InMemoryMembershipStore>) {
        let (guard, store, _) = audited_guard();
        (guard, store)
    }

    fn audited_guard() -> (
        TenantGuard<OrganizationRole>,
        Arc<InMemoryMembershipStore>,
        mpsc::Receiver<AccessAuditEntry>,
    ) {
        let store = InMemoryMembershipStore::default();
        for (user, role) in [("alice", "owner"), ("bob", "editor"), ("dave", "admin")] {
            store.seed(MembershipRecord::new(TenantId::new("org-1"), UserId::new(user), role));
        }
        let store = Arc::new(store);
        let bypass = GlobalAdminBypass::new(Arc::new(InMemoryGlobalRoles::default()), true);
        let resolver = MembershipResolver::new(store.clone(), Arc::new(MembershipCache::new()), bypass);
        let (audit, rx) = AuditLogger::channel(16);
        (TenantGuard::new(resolver, "Organization", audit), store, rx)
    }

    fn org() -> TenantId {
        TenantId::new("org-1")
    }

    #[tokio::test]
    async fn test_has_access_is_cached() {
        let (guard, store) = guard();
        let bob = UserId::new("bob");
        assert!(guard.has_access(Some(&bob), &org()).await.unwrap());
        assert!(guard.has_access(Some(&bob), &org()).await.unwrap());
        assert_eq!(store.lookup_count(), 1);
        assert!(!guard.has_access(None, &org()).await.unwrap());
    }

    #[tokio::test]
    async fn test_require_role_status_codes() {
        let (guard, _) = guard();

        let err = guard.require_role(None, &org(), &[]).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::Unauthenticated);

        let carol = UserId::new("carol");
        let err = guard.require_role(Some(&carol), &org(), &[]).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::Forbidden);

        let err = guard
            .require_role(Some(&carol), &TenantId::new("org-404"), &[])
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);

        let bob = UserId::new("bob");
        let err = guard
            .require_role(Some(&bob), &org(), &[OrganizationRole::Admin])
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Forbidden);

        let membership = guard
            .require_role(Some(&bob), &org(), &[OrganizationRole::Editor])
            .await
            .unwrap();
        assert_eq!(membership.role, OrganizationRole::Editor);
    }

    #[tokio::test]
    async fn test_denials_are_audited() {
        let (guard, _, mut rx) = audited_guard();
        let carol = UserId::new("carol");

        guard.require_role(Some(&carol), &org(), &[]).await.unwrap_err();
        guard
            .require_role(Some(&carol), &TenantId::new("org-404"), &[])
            .await
            .unwrap_err();
        guard
            .require_capability(Some(&UserId::new("bob")), &org(), Capability::ManageMembers)
            .await
            .unwrap_err();
        guard.require_role(None, &org(), &[]).await.unwrap_err();

        let first = rx.try_recv().unwrap();
        assert_eq!(first.reason, DenialReason::NotMemberOfAnyParent);
        assert_eq!(first.resource_kind, "organization");
        assert_eq!(first.resource_id, "org-1");
        assert_eq!(first.action, "access");
        assert_eq!(first.principal_id, Some(carol));

        assert_eq!(rx.try_recv().unwrap().reason, DenialReason::ResourceNotFound);

        let third = rx.try_recv().unwrap();
        assert_eq!(third.reason, DenialReason::InsufficientPermissions);
        assert_eq!(third.action, "capability:manageMembers");

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_has_access_denial_is_audited() {
        let (guard, _, mut rx) = audited_guard();
        assert!(!guard.has_access(Some(&UserId::new("carol")), &org()).await.unwrap());
        assert!(guard.has_access(Some(&UserId::new("bob")), &org()).await.unwrap());

        assert_eq!(rx.try_recv().unwrap().reason, DenialReason::NotMemberOfAnyParent);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_ensure_role_response() {
        let (guard, _) = guard();
        let mut extensions = Extensions::new();

        let response = guard
            .ensure_role_response(&extensions, &org(), &EnsureRoleOptions::default())
            .await
            .unwrap_err();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        extensions.insert(Principal::new("bob"));
        let user = guard
            .ensure_role_response(&extensions, &org(), &EnsureRoleOptions::default())
            .await
            .unwrap();
        assert_eq!(user, UserId::new("bob"));

        let options = EnsureRoleOptions::roles(&[OrganizationRole::Owner]).with_message("Owners only");
        let response = guard
            .ensure_role_response(&extensions, &org(), &options)
            .await
            .unwrap_err();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_owner_membership_is_immutable() {
        let (guard, _) = guard();
        for caller in ["alice", "dave"] {
            for action in [
                MemberAction::Remove,
                MemberAction::ChangeRole { to: OrganizationRole::Member },
            ] {
                let err = guard
                    .authorize_member_change(Some(&UserId::new(caller)), &org(), &UserId::new("alice"), action)
                    .await
                    .unwrap_err();
                assert_eq!(err.code(), ErrorCode::Forbidden);
            }
        }
    }

    #[tokio::test]
    async fn test_member_change_rules() {
        let (guard, _) = guard();
        let dave = UserId::new("dave");

        let current = guard
            .authorize_member_change(Some(&dave), &org(), &UserId::new("bob"), MemberAction::Remove)
            .await
            .unwrap();
        assert_eq!(current.role, OrganizationRole::Editor);

        let err = guard
            .authorize_member_change(Some(&UserId::new("bob")), &org(), &dave, MemberAction::Remove)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Forbidden);

        let err = guard
            .authorize_member_change(Some(&dave), &org(), &UserId::new("carol"), MemberAction::Remove)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);

        let err = guard
            .authorize_member_change(
                Some(&dave),
                &org(),
                &UserId::new("bob"),
                MemberAction::ChangeRole { to: OrganizationRole::Owner },
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Forbidden);
    }
}
