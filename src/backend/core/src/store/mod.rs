//! Storage seams of the resolver.
//!
//! Every trait here is read-only except the explicit lifecycle writers. Each
//! resource family gets its own adapter instance because the schemas differ,
//! while the interface stays identical.
//!
//! - **postgres**: sqlx adapters reading through a `StorageManager`
//! - **memory**: dashmap-backed twins for tests and embedding

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use std::sync::Arc;

use crate::db::StorageManager;
use crate::error::Result;
use crate::rbac::models::{LinkKind, MembershipRecord, ResourceId, TenantId, UserId};

pub use memory::{
    InMemoryGlobalRoles, InMemoryIdentities, InMemoryLinkStore, InMemoryMembershipStore,
};
pub use postgres::{
    MembershipTable, PgGlobalRoleRegistry, PgIdentityLookup, PgLinkStore, PgMembershipStore,
    ORGANIZATION_MEMBERS, UNIK_MEMBERS,
};

/// Reads a single membership row.
#[async_trait]
pub trait MembershipStore: Send + Sync {
    /// Pure read. Blank ids return `None` without touching storage.
    async fn lookup(&self, user_id: &UserId, tenant_id: &TenantId) -> Result<Option<MembershipRecord>>;

    /// Whether the tenant itself exists.
    async fn tenant_exists(&self, tenant_id: &TenantId) -> Result<bool>;
}

/// Member lifecycle writes. Owner rows are immutable here too.
#[async_trait]
pub trait MembershipWriter: MembershipStore {
    /// Insert a row; a second row for the same `(tenant, user)` is rejected.
    async fn add_member(&self, record: MembershipRecord) -> Result<()>;

    async fn change_role(&self, tenant_id: &TenantId, user_id: &UserId, role: &str) -> Result<()>;

    async fn remove_member(&self, tenant_id: &TenantId, user_id: &UserId) -> Result<()>;
}

/// Reads junction rows.
#[async_trait]
pub trait LinkStore: Send + Sync {
    /// All parent ids linked to `child` through `kind`, never just the first.
    async fn parents(&self, kind: LinkKind, child: &ResourceId) -> Result<Vec<String>>;
}

/// Instance-wide role registry, independent of any tenant.
#[async_trait]
pub trait GlobalRoleRegistry: Send + Sync {
    async fn global_role_name(&self, user_id: &UserId) -> Result<Option<String>>;

    async fn is_superuser(&self, user_id: &UserId) -> Result<bool>;
}

/// Best-effort identity lookup used to enrich conflict responses.
#[async_trait]
pub trait IdentityLookup: Send + Sync {
    async fn email_for(&self, user_id: &UserId) -> Result<Option<String>>;
}

/// Every adapter a request needs, bound to one connection source.
///
/// Readers and writers of one family point at the same adapter instance.
#[derive(Clone)]
pub struct Stores {
    pub organizations: Arc<dyn MembershipStore>,
    pub organization_members: Arc<dyn MembershipWriter>,
    pub uniks: Arc<dyn MembershipStore>,
    pub unik_members: Arc<dyn MembershipWriter>,
    pub links: Arc<dyn LinkStore>,
    pub global_roles: Arc<dyn GlobalRoleRegistry>,
    pub identities: Arc<dyn IdentityLookup>,
}

impl Stores {
    /// Postgres adapters reading through `manager`.
    pub fn postgres(manager: StorageManager, superuser_roles: Vec<String>) -> Self {
        let organizations = Arc::new(PgMembershipStore::organizations(manager.clone()));
        let uniks = Arc::new(PgMembershipStore::uniks(manager.clone()));

        Self {
            organizations: organizations.clone(),
            organization_members: organizations,
            uniks: uniks.clone(),
            unik_members: uniks,
            links: Arc::new(PgLinkStore::new(manager.clone())),
            global_roles: Arc::new(PgGlobalRoleRegistry::new(manager.clone(), superuser_roles)),
            identities: Arc::new(PgIdentityLookup::new(manager)),
        }
    }

    /// In-memory adapters, for tests and embedding.
    pub fn in_memory(
        organizations: Arc<InMemoryMembershipStore>,
        uniks: Arc<InMemoryMembershipStore>,
        links: Arc<InMemoryLinkStore>,
        global_roles: Arc<InMemoryGlobalRoles>,
        identities: Arc<InMemoryIdentities>,
    ) -> Self {
        Self {
            organizations: organizations.clone(),
            organization_members: organizations,
            uniks: uniks.clone(),
            unik_members: uniks,
            links,
            global_roles,
            identities,
        }
    }
}
