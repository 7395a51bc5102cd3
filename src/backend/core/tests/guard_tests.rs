//! Guard behaviour over in-memory adapters.
//!
//! Tests cover:
//! - Tenant entry points and their status codes
//! - Union-over-parents traversal for departments and positions
//! - Denial audit records
//! - Request cache behaviour
//! - Global admin bypass
//! - Owner immutability and membership round-trips

use std::sync::Arc;

use access_core::api::{AccessScope, AppState};
use access_core::config::AccessConfig;
use access_core::error::ErrorCode;
use access_core::guard::{AccessAuditEntry, AuditLogger, MemberAction, ResourceKind};
use access_core::rbac::{
    AccessRequirement, Capability, DenialReason, DomainRole, LinkKind, MembershipRecord,
    OrganizationRole, ResourceId, TenantId, UserId,
};
use access_core::store::{
    InMemoryGlobalRoles, InMemoryIdentities, InMemoryLinkStore, InMemoryMembershipStore,
    MembershipStore, MembershipWriter, Stores,
};
use tokio::sync::mpsc;

// ============================================================================
// Fixture
// ============================================================================

struct Fixture {
    state: AppState,
    organizations: Arc<InMemoryMembershipStore>,
    audit: mpsc::Receiver<AccessAuditEntry>,
}

impl Fixture {
    fn scope(&self) -> AccessScope {
        self.state.scope(self.state.stores.clone())
    }

    fn drain_audit(&mut self) -> Vec<AccessAuditEntry> {
        let mut entries = Vec::new();
        while let Ok(entry) = self.audit.try_recv() {
            entries.push(entry);
        }
        entries
    }
}

fn record(tenant: &str, user: &str, role: &str) -> MembershipRecord {
    MembershipRecord::new(TenantId::new(tenant), UserId::new(user), role)
}

/// `org-1 {alice: owner, bob: editor}`, `dep-1 → org-1`, `pos-1 → dep-1`,
/// plus a position shared into two organizations and a few edge cases.
fn fixture() -> Fixture {
    let organizations = Arc::new(InMemoryMembershipStore::default());
    organizations.seed(record("org-1", "alice", "owner"));
    organizations.seed(record("org-1", "bob", "editor"));
    organizations.seed(record("org-a", "erin", "member"));
    organizations.seed(record("org-b", "erin", "editor"));
    organizations.seed(record("org-b", "mallory", "bogus"));
    organizations.add_tenant("org-empty");

    let links = Arc::new(InMemoryLinkStore::new());
    links.link(LinkKind::DepartmentTenant, "dep-1", "org-1");
    links.link(LinkKind::PositionDepartment, "pos-1", "dep-1");
    links.link(LinkKind::DepartmentTenant, "dep-a", "org-a");
    links.link(LinkKind::DepartmentTenant, "dep-b", "org-b");
    links.link(LinkKind::PositionDepartment, "pos-shared", "dep-a");
    links.link(LinkKind::PositionDepartment, "pos-shared", "dep-b");
    links.link(LinkKind::PositionTenant, "pos-legacy", "org-1");
    links.link(LinkKind::DepartmentTenant, "dep-shared", "org-a");
    links.link(LinkKind::DepartmentTenant, "dep-shared", "org-b");
    links.link(LinkKind::PositionDepartment, "pos-dangling", "dep-dangling");

    let global_roles = Arc::new(InMemoryGlobalRoles::default());
    global_roles.assign("root", "superadmin");

    let stores = Stores::in_memory(
        organizations.clone(),
        Arc::new(InMemoryMembershipStore::default()),
        links,
        global_roles,
        Arc::new(InMemoryIdentities::new()),
    );
    let (logger, audit) = AuditLogger::channel(64);

    Fixture {
        state: AppState::new(stores, logger, AccessConfig::default()),
        organizations,
        audit,
    }
}

fn user(id: &str) -> UserId {
    UserId::new(id)
}

fn capability(capability: Capability) -> AccessRequirement<OrganizationRole> {
    AccessRequirement::Capability(capability)
}

// ============================================================================
// Tenant guard
// ============================================================================

#[tokio::test]
async fn test_non_member_has_no_access() {
    let fx = fixture();
    let scope = fx.scope();

    for principal in ["carol", "erin"] {
        assert!(!scope
            .organizations
            .has_access(Some(&user(principal)), &TenantId::new("org-1"))
            .await
            .unwrap());
    }
    assert!(scope
        .organizations
        .has_access(Some(&user("bob")), &TenantId::new("org-1"))
        .await
        .unwrap());
}

#[tokio::test]
async fn test_repeated_has_access_reads_storage_once() {
    let fx = fixture();
    let scope = fx.scope();
    let tenant = TenantId::new("org-1");

    let first = scope.organizations.has_access(Some(&user("bob")), &tenant).await.unwrap();
    let second = scope.organizations.has_access(Some(&user("bob")), &tenant).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(fx.organizations.lookup_count(), 1);
}

#[tokio::test]
async fn test_each_request_gets_a_fresh_cache() {
    let fx = fixture();
    let tenant = TenantId::new("org-1");

    fx.scope().organizations.has_access(Some(&user("bob")), &tenant).await.unwrap();
    fx.scope().organizations.has_access(Some(&user("bob")), &tenant).await.unwrap();

    assert_eq!(fx.organizations.lookup_count(), 2);
}

#[tokio::test]
async fn test_require_role_statuses() {
    let fx = fixture();
    let scope = fx.scope();
    let org = TenantId::new("org-1");

    let err = scope.organizations.require_role(None, &org, &[]).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::Unauthenticated);
    assert_eq!(err.http_status().as_u16(), 401);

    let err = scope
        .organizations
        .require_role(Some(&user("carol")), &org, &[])
        .await
        .unwrap_err();
    assert_eq!(err.http_status().as_u16(), 403);

    let err = scope
        .organizations
        .require_role(Some(&user("carol")), &TenantId::new("org-missing"), &[])
        .await
        .unwrap_err();
    assert_eq!(err.http_status().as_u16(), 404);

    let membership = scope
        .organizations
        .require_role(Some(&user("alice")), &org, &[OrganizationRole::Owner, OrganizationRole::Admin])
        .await
        .unwrap();
    assert_eq!(membership.role, OrganizationRole::Owner);
}

#[tokio::test]
async fn test_tenant_denials_are_audited() {
    let mut fx = fixture();
    let scope = fx.scope();

    let err = scope
        .organizations
        .require_role(Some(&user("carol")), &TenantId::new("org-1"), &[])
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Forbidden);

    let err = scope
        .organizations
        .require_role(Some(&user("carol")), &TenantId::new("org-missing"), &[])
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotFound);

    let err = scope
        .organizations
        .require_capability(Some(&user("bob")), &TenantId::new("org-1"), Capability::ManageMembers)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Forbidden);

    let entries = fx.drain_audit();
    let reasons: Vec<DenialReason> = entries.iter().map(|e| e.reason).collect();
    assert_eq!(
        reasons,
        vec![
            DenialReason::NotMemberOfAnyParent,
            DenialReason::ResourceNotFound,
            DenialReason::InsufficientPermissions,
        ]
    );
    assert!(entries.iter().all(|e| e.resource_kind == "organization"));
    assert_eq!(entries[1].resource_id, "org-missing");
    assert_eq!(entries[2].action, "capability:manageMembers");
}

#[tokio::test]
async fn test_bogus_role_is_integrity_error() {
    let fx = fixture();
    let err = fx
        .scope()
        .organizations
        .require_role(Some(&user("mallory")), &TenantId::new("org-b"), &[])
        .await
        .unwrap_err();

    assert_eq!(err.code(), ErrorCode::IntegrityError);
    assert_eq!(err.http_status().as_u16(), 500);
}

// ============================================================================
// Traversal guard
// ============================================================================

#[tokio::test]
async fn test_position_scenario() {
    let mut fx = fixture();
    let scope = fx.scope();
    let pos = ResourceId::new("pos-1");

    let membership = scope
        .resources
        .ensure_position_access(Some(&user("bob")), &pos, &capability(Capability::EditContent))
        .await
        .unwrap();
    assert_eq!(membership.tenant_id, TenantId::new("org-1"));

    let err = scope
        .resources
        .ensure_position_access(Some(&user("bob")), &pos, &capability(Capability::ManageMembers))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Forbidden);

    let err = scope
        .resources
        .ensure_position_access(Some(&user("carol")), &pos, &capability(Capability::EditContent))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Forbidden);

    let reasons: Vec<DenialReason> = fx.drain_audit().into_iter().map(|e| e.reason).collect();
    assert_eq!(
        reasons,
        vec![DenialReason::InsufficientPermissions, DenialReason::NotMemberOfAnyParent]
    );
}

#[tokio::test]
async fn test_access_is_union_over_parents() {
    let fx = fixture();
    let scope = fx.scope();
    let pos = ResourceId::new("pos-shared");

    // erin is only a member in org-a but an editor in org-b
    let membership = scope
        .resources
        .ensure_position_access(Some(&user("erin")), &pos, &capability(Capability::EditContent))
        .await
        .unwrap();
    assert_eq!(membership.tenant_id, TenantId::new("org-b"));

    let err = scope
        .resources
        .ensure_position_access(Some(&user("erin")), &pos, &capability(Capability::DeleteContent))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Forbidden);
}

#[tokio::test]
async fn test_department_access_is_union_over_tenants() {
    let mut fx = fixture();
    let scope = fx.scope();
    let dep = ResourceId::new("dep-shared");

    // member in org-a, editor in org-b
    let membership = scope
        .resources
        .ensure_department_access(Some(&user("erin")), &dep, &capability(Capability::EditContent))
        .await
        .unwrap();
    assert_eq!(membership.tenant_id, TenantId::new("org-b"));
    assert_eq!(membership.role, OrganizationRole::Editor);

    let err = scope
        .resources
        .ensure_department_access(Some(&user("erin")), &dep, &capability(Capability::ManageResource))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Forbidden);

    let reasons: Vec<DenialReason> = fx.drain_audit().into_iter().map(|e| e.reason).collect();
    assert_eq!(reasons, vec![DenialReason::InsufficientPermissions]);
}

#[tokio::test]
async fn test_position_with_unlinked_departments_is_not_found() {
    let mut fx = fixture();
    let err = fx
        .scope()
        .resources
        .ensure_position_access(Some(&user("bob")), &ResourceId::new("pos-dangling"), &AccessRequirement::Any)
        .await
        .unwrap_err();

    assert_eq!(err.code(), ErrorCode::NotFound);
    let entries = fx.drain_audit();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].reason, DenialReason::ResourceNotFound);
    assert_eq!(entries[0].resource_kind, "position");
}

#[tokio::test]
async fn test_reachable_tenants_are_deduplicated() {
    let fx = fixture();
    let links = InMemoryLinkStore::new();
    links.link(LinkKind::PositionDepartment, "pos-x", "dep-a");
    links.link(LinkKind::PositionDepartment, "pos-x", "dep-a2");
    links.link(LinkKind::DepartmentTenant, "dep-a", "org-a");
    links.link(LinkKind::DepartmentTenant, "dep-a2", "org-a");
    links.link(LinkKind::DepartmentTenant, "dep-a2", "org-b");

    let mut stores = fx.state.stores.clone();
    stores.links = Arc::new(links);
    let scope = fx.state.scope(stores);

    let tenants = scope
        .resources
        .reachable_tenants(ResourceKind::Position, &ResourceId::new("pos-x"))
        .await
        .unwrap();
    assert_eq!(tenants, vec![TenantId::new("org-a"), TenantId::new("org-b")]);
}

#[tokio::test]
async fn test_unlinked_resource_is_not_found() {
    let mut fx = fixture();
    let scope = fx.scope();

    for (kind, id) in [
        (ResourceKind::Department, "dep-orphan"),
        (ResourceKind::Position, "pos-orphan"),
    ] {
        let err = scope
            .resources
            .ensure_access(Some(&user("root")), kind, &ResourceId::new(id), &AccessRequirement::Any)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);
    }

    let entries = fx.drain_audit();
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().all(|e| e.reason == DenialReason::ResourceNotFound));
    assert_eq!(entries[0].resource_kind, "department");
    assert_eq!(entries[1].principal_id, Some(user("root")));
}

#[tokio::test]
async fn test_position_without_departments_uses_direct_links() {
    let fx = fixture();
    let membership = fx
        .scope()
        .resources
        .ensure_position_access(Some(&user("bob")), &ResourceId::new("pos-legacy"), &AccessRequirement::Any)
        .await
        .unwrap();
    assert_eq!(membership.role, OrganizationRole::Editor);
}

#[tokio::test]
async fn test_department_access_requires_principal_first() {
    let mut fx = fixture();
    let err = fx
        .scope()
        .resources
        .ensure_department_access(None, &ResourceId::new("dep-orphan"), &AccessRequirement::Any)
        .await
        .unwrap_err();

    assert_eq!(err.code(), ErrorCode::Unauthenticated);
    assert!(fx.drain_audit().is_empty());
}

#[tokio::test]
async fn test_audit_records_action() {
    let mut fx = fixture();
    let _ = fx
        .scope()
        .resources
        .ensure_department_access(
            Some(&user("bob")),
            &ResourceId::new("dep-1"),
            &capability(Capability::DeleteContent),
        )
        .await;

    let entries = fx.drain_audit();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].action, "capability:deleteContent");
    assert_eq!(entries[0].resource_id, "dep-1");
}

// ============================================================================
// Global admin bypass
// ============================================================================

#[tokio::test]
async fn test_superuser_gets_every_capability() {
    let fx = fixture();
    let scope = fx.scope();

    let membership = scope
        .organizations
        .require_role(Some(&user("root")), &TenantId::new("org-empty"), &[])
        .await
        .unwrap();
    assert!(membership.is_synthetic());
    assert!(Capability::all().iter().all(|c| membership.can(*c)));

    let membership = scope
        .resources
        .ensure_position_access(Some(&user("root")), &ResourceId::new("pos-1"), &capability(Capability::ManageMembers))
        .await
        .unwrap();
    assert_eq!(membership.role, OrganizationRole::highest());

    // synthetic memberships are never written
    assert!(fx
        .organizations
        .lookup(&user("root"), &TenantId::new("org-empty"))
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_bypass_can_be_disabled() {
    let fx = fixture();
    let access = AccessConfig {
        global_admin_bypass: false,
        ..AccessConfig::default()
    };
    let (logger, _rx) = AuditLogger::channel(8);
    let state = AppState::new(fx.state.stores.clone(), logger, access);

    let err = state
        .scope(state.stores.clone())
        .organizations
        .require_role(Some(&user("root")), &TenantId::new("org-1"), &[])
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Forbidden);
}

// ============================================================================
// Member lifecycle
// ============================================================================

#[tokio::test]
async fn test_owner_cannot_be_changed_or_removed() {
    let fx = fixture();
    let scope = fx.scope();
    let org = TenantId::new("org-1");

    for action in [
        MemberAction::Remove,
        MemberAction::ChangeRole { to: OrganizationRole::Admin },
    ] {
        let err = scope
            .organizations
            .authorize_member_change(Some(&user("alice")), &org, &user("alice"), action)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Forbidden);
    }

    let err = fx
        .organizations
        .remove_member(&org, &user("alice"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Forbidden);
}

#[tokio::test]
async fn test_editor_membership_round_trip() {
    let fx = fixture();
    let org = TenantId::new("org-empty");
    fx.organizations
        .add_member(record("org-empty", "frank", "editor"))
        .await
        .unwrap();

    let stored = fx.organizations.lookup(&user("frank"), &org).await.unwrap().unwrap();
    assert_eq!(stored.role, "editor");

    let membership = fx
        .scope()
        .organizations
        .require_role(Some(&user("frank")), &org, &[])
        .await
        .unwrap();
    assert_eq!(membership.role, OrganizationRole::Editor);
    assert_eq!(membership.permissions(), OrganizationRole::Editor.permissions());
}
