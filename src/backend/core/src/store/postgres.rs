//! PostgreSQL adapters.
//!
//! Table and column names are compile-time constants, so the formatted SQL
//! never contains caller input; ids are always bound.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use super::{GlobalRoleRegistry, IdentityLookup, LinkStore, MembershipStore, MembershipWriter};
use crate::db::StorageManager;
use crate::error::{AccessError, Result};
use crate::rbac::models::{LinkKind, MembershipRecord, ResourceId, TenantId, UserId};

/// Schema of one membership table.
#[derive(Debug, Clone, Copy)]
pub struct MembershipTable {
    pub table: &'static str,
    pub tenant_column: &'static str,
    pub tenant_table: &'static str,
    pub owner_role: &'static str,
}

pub const ORGANIZATION_MEMBERS: MembershipTable = MembershipTable {
    table: "organizations_users",
    tenant_column: "organization_id",
    tenant_table: "organizations",
    owner_role: "owner",
};

pub const UNIK_MEMBERS: MembershipTable = MembershipTable {
    table: "uniks_users",
    tenant_column: "unik_id",
    tenant_table: "uniks",
    owner_role: "owner",
};

/// Ids are UUIDs in storage; anything else cannot match a row.
fn parse_id(raw: &str) -> Option<Uuid> {
    Uuid::parse_str(raw.trim()).ok()
}

#[derive(Debug, sqlx::FromRow)]
struct MembershipRow {
    tenant_id: Uuid,
    user_id: Uuid,
    role: String,
    comment: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<MembershipRow> for MembershipRecord {
    fn from(row: MembershipRow) -> Self {
        Self {
            tenant_id: TenantId::new(row.tenant_id.to_string()),
            user_id: UserId::new(row.user_id.to_string()),
            role: row.role,
            comment: row.comment,
            created_at: row.created_at,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Memberships
// ═══════════════════════════════════════════════════════════════════════════════

/// Membership adapter for one resource family.
#[derive(Debug, Clone)]
pub struct PgMembershipStore {
    manager: StorageManager,
    table: MembershipTable,
}

impl PgMembershipStore {
    pub fn new(manager: StorageManager, table: MembershipTable) -> Self {
        Self { manager, table }
    }

    pub fn organizations(manager: StorageManager) -> Self {
        Self::new(manager, ORGANIZATION_MEMBERS)
    }

    pub fn uniks(manager: StorageManager) -> Self {
        Self::new(manager, UNIK_MEMBERS)
    }

    async fn fetch(&self, tenant: Uuid, user: Uuid) -> Result<Option<MembershipRecord>> {
        let sql = format!(
            "SELECT {tc} AS tenant_id, user_id, role, comment, created_at \
             FROM {table} WHERE user_id = $1 AND {tc} = $2",
            tc = self.table.tenant_column,
            table = self.table.table,
        );

        let row = self
            .manager
            .fetch_optional(sqlx::query_as::<_, MembershipRow>(&sql).bind(user).bind(tenant))
            .await?;

        Ok(row.map(MembershipRecord::from))
    }

    /// `UPDATE` that never touches the owner row. Binds: tenant, user, owner role, new role.
    fn change_role_sql(&self) -> String {
        format!(
            "UPDATE {table} SET role = $4 WHERE {tc} = $1 AND user_id = $2 AND role <> $3",
            tc = self.table.tenant_column,
            table = self.table.table,
        )
    }

    /// `DELETE` that never touches the owner row. Binds: tenant, user, owner role.
    fn remove_sql(&self) -> String {
        format!(
            "DELETE FROM {table} WHERE {tc} = $1 AND user_id = $2 AND role <> $3",
            tc = self.table.tenant_column,
            table = self.table.table,
        )
    }

    /// Why a guarded write matched no row.
    async fn refusal(&self, tenant: Uuid, user: Uuid) -> Result<AccessError> {
        let current = self.fetch(tenant, user).await?;
        Ok(refusal(current.as_ref(), self.table.owner_role))
    }
}

fn refusal(current: Option<&MembershipRecord>, owner_role: &str) -> AccessError {
    match current {
        Some(record) if record.role == owner_role => {
            AccessError::forbidden("The owner membership cannot be modified")
        }
        _ => AccessError::not_found("Membership"),
    }
}

#[async_trait]
impl MembershipStore for PgMembershipStore {
    async fn lookup(&self, user_id: &UserId, tenant_id: &TenantId) -> Result<Option<MembershipRecord>> {
        if user_id.is_blank() || tenant_id.is_blank() {
            return Ok(None);
        }
        let (Some(user), Some(tenant)) = (parse_id(user_id.as_str()), parse_id(tenant_id.as_str()))
        else {
            return Ok(None);
        };

        debug!(table = self.table.table, user_id = %user_id, tenant_id = %tenant_id, "Membership lookup");
        self.fetch(tenant, user).await
    }

    async fn tenant_exists(&self, tenant_id: &TenantId) -> Result<bool> {
        let Some(tenant) = parse_id(tenant_id.as_str()) else {
            return Ok(false);
        };

        let sql = format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE id = $1)",
            self.table.tenant_table
        );
        let row = self
            .manager
            .fetch_optional(sqlx::query_as::<_, (bool,)>(&sql).bind(tenant))
            .await?;

        Ok(row.map(|(exists,)| exists).unwrap_or(false))
    }
}

#[async_trait]
impl MembershipWriter for PgMembershipStore {
    async fn add_member(&self, record: MembershipRecord) -> Result<()> {
        let (Some(user), Some(tenant)) = (
            parse_id(record.user_id.as_str()),
            parse_id(record.tenant_id.as_str()),
        ) else {
            return Err(AccessError::invalid_input("Invalid member or tenant id"));
        };

        let sql = format!(
            "INSERT INTO {table} ({tc}, user_id, role, comment, created_at) VALUES ($1, $2, $3, $4, $5)",
            tc = self.table.tenant_column,
            table = self.table.table,
        );
        self.manager
            .execute(
                sqlx::query(&sql)
                    .bind(tenant)
                    .bind(user)
                    .bind(&record.role)
                    .bind(&record.comment)
                    .bind(record.created_at),
            )
            .await?;
        Ok(())
    }

    async fn change_role(&self, tenant_id: &TenantId, user_id: &UserId, role: &str) -> Result<()> {
        let (Some(user), Some(tenant)) = (parse_id(user_id.as_str()), parse_id(tenant_id.as_str()))
        else {
            return Err(AccessError::not_found("Membership"));
        };

        let sql = self.change_role_sql();
        let result = self
            .manager
            .execute(
                sqlx::query(&sql)
                    .bind(tenant)
                    .bind(user)
                    .bind(self.table.owner_role)
                    .bind(role),
            )
            .await?;
        if result.rows_affected() == 0 {
            return Err(self.refusal(tenant, user).await?);
        }
        Ok(())
    }

    async fn remove_member(&self, tenant_id: &TenantId, user_id: &UserId) -> Result<()> {
        let (Some(user), Some(tenant)) = (parse_id(user_id.as_str()), parse_id(tenant_id.as_str()))
        else {
            return Err(AccessError::not_found("Membership"));
        };

        let sql = self.remove_sql();
        let result = self
            .manager
            .execute(sqlx::query(&sql).bind(tenant).bind(user).bind(self.table.owner_role))
            .await?;
        if result.rows_affected() == 0 {
            return Err(self.refusal(tenant, user).await?);
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Junction links
// ═══════════════════════════════════════════════════════════════════════════════

/// `(table, child column, parent column)` for each link kind.
fn link_table(kind: LinkKind) -> (&'static str, &'static str, &'static str) {
    match kind {
        LinkKind::DepartmentTenant => ("departments_organizations", "department_id", "organization_id"),
        LinkKind::PositionDepartment => ("positions_departments", "position_id", "department_id"),
        LinkKind::PositionTenant => ("positions_organizations", "position_id", "organization_id"),
    }
}

/// Junction-table adapter.
#[derive(Debug, Clone)]
pub struct PgLinkStore {
    manager: StorageManager,
}

impl PgLinkStore {
    pub fn new(manager: StorageManager) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl LinkStore for PgLinkStore {
    async fn parents(&self, kind: LinkKind, child: &ResourceId) -> Result<Vec<String>> {
        let Some(child_id) = parse_id(child.as_str()) else {
            return Ok(Vec::new());
        };

        let (table, child_column, parent_column) = link_table(kind);
        let sql = format!(
            "SELECT {parent_column} FROM {table} WHERE {child_column} = $1 ORDER BY created_at, {parent_column}"
        );
        let rows = self
            .manager
            .fetch_all(sqlx::query_as::<_, (Uuid,)>(&sql).bind(child_id))
            .await?;

        debug!(link = %kind, child = %child, parents = rows.len(), "Junction rows loaded");
        Ok(rows.into_iter().map(|(parent,)| parent.to_string()).collect())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Global roles and identities
// ═══════════════════════════════════════════════════════════════════════════════

/// Registry over `user_global_roles`.
#[derive(Debug, Clone)]
pub struct PgGlobalRoleRegistry {
    manager: StorageManager,
    superuser_roles: Vec<String>,
}

impl PgGlobalRoleRegistry {
    pub fn new(manager: StorageManager, superuser_roles: Vec<String>) -> Self {
        Self {
            manager,
            superuser_roles,
        }
    }
}

#[async_trait]
impl GlobalRoleRegistry for PgGlobalRoleRegistry {
    async fn global_role_name(&self, user_id: &UserId) -> Result<Option<String>> {
        let Some(user) = parse_id(user_id.as_str()) else {
            return Ok(None);
        };
        let row = self
            .manager
            .fetch_optional(
                sqlx::query_as::<_, (String,)>(
                    "SELECT role_name FROM user_global_roles WHERE user_id = $1",
                )
                .bind(user),
            )
            .await?;
        Ok(row.map(|(name,)| name))
    }

    async fn is_superuser(&self, user_id: &UserId) -> Result<bool> {
        Ok(self
            .global_role_name(user_id)
            .await?
            .is_some_and(|name| self.superuser_roles.iter().any(|r| *r == name)))
    }
}

/// Email lookup over `users`.
#[derive(Debug, Clone)]
pub struct PgIdentityLookup {
    manager: StorageManager,
}

impl PgIdentityLookup {
    pub fn new(manager: StorageManager) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl IdentityLookup for PgIdentityLookup {
    async fn email_for(&self, user_id: &UserId) -> Result<Option<String>> {
        let Some(user) = parse_id(user_id.as_str()) else {
            return Ok(None);
        };
        let row = self
            .manager
            .fetch_optional(
                sqlx::query_as::<_, (String,)>("SELECT email FROM users WHERE id = $1").bind(user),
            )
            .await?;
        Ok(row.map(|(email,)| email))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn test_parse_id_rejects_non_uuid() {
        assert!(parse_id("org-1").is_none());
        assert!(parse_id("").is_none());
        assert!(parse_id(&Uuid::new_v4().to_string()).is_some());
    }

    #[test]
    fn test_refusal_reasons() {
        let owner = MembershipRecord::new(TenantId::new("t"), UserId::new("alice"), "owner");
        let editor = MembershipRecord::new(TenantId::new("t"), UserId::new("bob"), "editor");

        assert_eq!(refusal(Some(&owner), "owner").code(), ErrorCode::Forbidden);
        assert_eq!(refusal(None, "owner").code(), ErrorCode::NotFound);
        // row changed between the write and the diagnosis
        assert_eq!(refusal(Some(&editor), "owner").code(), ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn test_lifecycle_writes_exclude_owner_rows() {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://localhost/access")
            .unwrap();
        let store = PgMembershipStore::uniks(StorageManager::Pool(pool));

        assert!(store.change_role_sql().ends_with("AND role <> $3"));
        assert!(store.remove_sql().starts_with("DELETE FROM uniks_users"));
        assert!(store.remove_sql().ends_with("AND role <> $3"));
    }

    #[test]
    fn test_link_tables() {
        assert_eq!(link_table(LinkKind::PositionDepartment).0, "positions_departments");
        assert_eq!(link_table(LinkKind::DepartmentTenant).2, "organization_id");
        assert_eq!(link_table(LinkKind::PositionTenant).1, "position_id");
    }
}
