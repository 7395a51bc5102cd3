//! In-memory adapters.
//!
//! Same contracts as the Postgres adapters, keyed the way the tables are.
//! The membership store counts reads so callers can assert cache behaviour.

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use super::{GlobalRoleRegistry, IdentityLookup, LinkStore, MembershipStore, MembershipWriter};
use crate::error::{AccessError, Result};
use crate::rbac::models::{LinkKind, MembershipRecord, ResourceId, TenantId, UserId};

// ═══════════════════════════════════════════════════════════════════════════════
// Memberships
// ═══════════════════════════════════════════════════════════════════════════════

/// Membership rows keyed by `(tenant, user)`.
#[derive(Debug)]
pub struct InMemoryMembershipStore {
    tenants: DashSet<TenantId>,
    rows: DashMap<(TenantId, UserId), MembershipRecord>,
    owner_role: &'static str,
    lookups: AtomicU64,
}

impl Default for InMemoryMembershipStore {
    fn default() -> Self {
        Self::new("owner")
    }
}

impl InMemoryMembershipStore {
    pub fn new(owner_role: &'static str) -> Self {
        Self {
            tenants: DashSet::new(),
            rows: DashMap::new(),
            owner_role,
            lookups: AtomicU64::new(0),
        }
    }

    pub fn add_tenant(&self, tenant_id: impl Into<TenantId>) {
        self.tenants.insert(tenant_id.into());
    }

    /// Insert or overwrite a row without any lifecycle checks.
    pub fn seed(&self, record: MembershipRecord) {
        self.tenants.insert(record.tenant_id.clone());
        self.rows
            .insert((record.tenant_id.clone(), record.user_id.clone()), record);
    }

    /// Number of `lookup` calls that reached this store.
    pub fn lookup_count(&self) -> u64 {
        self.lookups.load(Ordering::Relaxed)
    }

    fn mutable_row(&self, tenant_id: &TenantId, user_id: &UserId) -> Result<MembershipRecord> {
        let key = (tenant_id.clone(), user_id.clone());
        let record = self
            .rows
            .get(&key)
            .map(|row| row.value().clone())
            .ok_or_else(|| AccessError::not_found("Membership"))?;

        if record.role == self.owner_role {
            return Err(AccessError::forbidden("The owner membership cannot be modified"));
        }
        Ok(record)
    }
}

#[async_trait]
impl MembershipStore for InMemoryMembershipStore {
    async fn lookup(&self, user_id: &UserId, tenant_id: &TenantId) -> Result<Option<MembershipRecord>> {
        if user_id.is_blank() || tenant_id.is_blank() {
            return Ok(None);
        }
        self.lookups.fetch_add(1, Ordering::Relaxed);

        Ok(self
            .rows
            .get(&(tenant_id.clone(), user_id.clone()))
            .map(|row| row.value().clone()))
    }

    async fn tenant_exists(&self, tenant_id: &TenantId) -> Result<bool> {
        Ok(self.tenants.contains(tenant_id))
    }
}

#[async_trait]
impl MembershipWriter for InMemoryMembershipStore {
    async fn add_member(&self, record: MembershipRecord) -> Result<()> {
        if !self.tenants.contains(&record.tenant_id) {
            return Err(AccessError::not_found("Tenant"));
        }
        let key = (record.tenant_id.clone(), record.user_id.clone());
        if self.rows.contains_key(&key) {
            return Err(AccessError::invalid_input(
                "A record with this identifier already exists",
            ));
        }
        self.rows.insert(key, record);
        Ok(())
    }

    async fn change_role(&self, tenant_id: &TenantId, user_id: &UserId, role: &str) -> Result<()> {
        let mut record = self.mutable_row(tenant_id, user_id)?;
        record.role = role.to_string();
        self.rows.insert((tenant_id.clone(), user_id.clone()), record);
        Ok(())
    }

    async fn remove_member(&self, tenant_id: &TenantId, user_id: &UserId) -> Result<()> {
        self.mutable_row(tenant_id, user_id)?;
        self.rows.remove(&(tenant_id.clone(), user_id.clone()));
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Junction links
// ═══════════════════════════════════════════════════════════════════════════════

/// Junction rows keyed by `(kind, child)`, parents kept in insertion order.
#[derive(Debug, Default)]
pub struct InMemoryLinkStore {
    links: DashMap<(LinkKind, ResourceId), Vec<String>>,
}

impl InMemoryLinkStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn link(&self, kind: LinkKind, child: impl Into<ResourceId>, parent: impl Into<String>) {
        let parent = parent.into();
        let mut parents = self.links.entry((kind, child.into())).or_default();
        if !parents.contains(&parent) {
            parents.push(parent);
        }
    }

    pub fn unlink(&self, kind: LinkKind, child: impl Into<ResourceId>, parent: &str) {
        if let Some(mut parents) = self.links.get_mut(&(kind, child.into())) {
            parents.retain(|p| p != parent);
        }
    }
}

#[async_trait]
impl LinkStore for InMemoryLinkStore {
    async fn parents(&self, kind: LinkKind, child: &ResourceId) -> Result<Vec<String>> {
        Ok(self
            .links
            .get(&(kind, child.clone()))
            .map(|parents| parents.value().clone())
            .unwrap_or_default())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Global roles and identities
// ═══════════════════════════════════════════════════════════════════════════════

/// Global role assignments.
#[derive(Debug)]
pub struct InMemoryGlobalRoles {
    roles: DashMap<UserId, String>,
    superuser_roles: Vec<String>,
}

impl Default for InMemoryGlobalRoles {
    fn default() -> Self {
        Self::new(vec!["superadmin".to_string()])
    }
}

impl InMemoryGlobalRoles {
    pub fn new(superuser_roles: Vec<String>) -> Self {
        Self {
            roles: DashMap::new(),
            superuser_roles,
        }
    }

    pub fn assign(&self, user_id: impl Into<UserId>, role_name: impl Into<String>) {
        self.roles.insert(user_id.into(), role_name.into());
    }
}

#[async_trait]
impl GlobalRoleRegistry for InMemoryGlobalRoles {
    async fn global_role_name(&self, user_id: &UserId) -> Result<Option<String>> {
        Ok(self.roles.get(user_id).map(|r| r.value().clone()))
    }

    async fn is_superuser(&self, user_id: &UserId) -> Result<bool> {
        Ok(self
            .roles
            .get(user_id)
            .is_some_and(|r| self.superuser_roles.iter().any(|s| s == r.value())))
    }
}

/// User id to email map.
#[derive(Debug, Default)]
pub struct InMemoryIdentities {
    emails: DashMap<UserId, String>,
}

impl InMemoryIdentities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, user_id: impl Into<UserId>, email: impl Into<String>) {
        self.emails.insert(user_id.into(), email.into());
    }
}

#[async_trait]
impl IdentityLookup for InMemoryIdentities {
    async fn email_for(&self, user_id: &UserId) -> Result<Option<String>> {
        Ok(self.emails.get(user_id).map(|e| e.value().clone()))
    }
}
