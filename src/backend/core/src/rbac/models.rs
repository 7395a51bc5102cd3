//! RBAC data models: identifiers, memberships and junction links.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::roles::{Capability, DomainRole, RolePermissions};

// ═══════════════════════════════════════════════════════════════════════════════
// Identifiers
// ═══════════════════════════════════════════════════════════════════════════════

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Blank ids never reach storage.
            pub fn is_blank(&self) -> bool {
                self.0.trim().is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(
    /// Authenticated principal identifier.
    UserId
);

string_id!(
    /// Root resource owning a membership list (organization or workspace).
    TenantId
);

string_id!(
    /// Resource attached to tenants only through junction rows.
    ResourceId
);

// ═══════════════════════════════════════════════════════════════════════════════
// Membership
// ═══════════════════════════════════════════════════════════════════════════════

/// A membership row as persisted.
///
/// The role stays a raw string here: it is only trusted after it has been
/// parsed against the domain's role enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipRecord {
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub role: String,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl MembershipRecord {
    pub fn new(tenant_id: TenantId, user_id: UserId, role: impl Into<String>) -> Self {
        Self {
            tenant_id,
            user_id,
            role: role.into(),
            comment: None,
            created_at: Utc::now(),
        }
    }
}

/// Where a resolved membership came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MembershipSource {
    /// A stored row.
    Stored,
    /// Fabricated for an instance superuser; never persisted.
    GlobalAdmin { global_role: String },
}

/// A membership whose role has been validated for domain `R`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Membership<R: DomainRole> {
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub role: R,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
    pub source: MembershipSource,
}

impl<R: DomainRole> Membership<R> {
    /// Validate a stored record.
    ///
    /// Returns `None` for a role string outside the enumeration; callers turn
    /// that into an integrity error.
    pub fn from_record(record: &MembershipRecord) -> Option<Self> {
        let role = R::parse(&record.role)?;
        Some(Self {
            tenant_id: record.tenant_id.clone(),
            user_id: record.user_id.clone(),
            role,
            comment: record.comment.clone(),
            created_at: record.created_at,
            source: MembershipSource::Stored,
        })
    }

    /// Synthetic membership with the domain's highest role.
    pub fn synthetic(tenant_id: TenantId, user_id: UserId, global_role: impl Into<String>) -> Self {
        Self {
            tenant_id,
            user_id,
            role: R::highest(),
            comment: None,
            created_at: Utc::now(),
            source: MembershipSource::GlobalAdmin {
                global_role: global_role.into(),
            },
        }
    }

    pub fn permissions(&self) -> RolePermissions {
        self.role.permissions()
    }

    pub fn can(&self, capability: Capability) -> bool {
        self.permissions().allows(capability)
    }

    pub fn is_synthetic(&self) -> bool {
        matches!(self.source, MembershipSource::GlobalAdmin { .. })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Junction links
// ═══════════════════════════════════════════════════════════════════════════════

/// The many-to-many link tables between resources and their parents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkKind {
    /// Department → organization.
    DepartmentTenant,
    /// Position → department.
    PositionDepartment,
    /// Position → organization, kept for positions created before departments.
    PositionTenant,
}

impl LinkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DepartmentTenant => "department_tenant",
            Self::PositionDepartment => "position_department",
            Self::PositionTenant => "position_tenant",
        }
    }
}

impl fmt::Display for LinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rbac::roles::OrganizationRole;

    #[test]
    fn test_blank_ids() {
        assert!(UserId::new("").is_blank());
        assert!(TenantId::new("  ").is_blank());
        assert!(!ResourceId::new("pos-1").is_blank());
    }

    #[test]
    fn test_from_record_parses_role() {
        let record = MembershipRecord::new(TenantId::new("org-1"), UserId::new("bob"), "editor");
        let membership = Membership::<OrganizationRole>::from_record(&record).unwrap();

        assert_eq!(membership.role, OrganizationRole::Editor);
        assert_eq!(membership.source, MembershipSource::Stored);
        assert_eq!(membership.permissions(), OrganizationRole::Editor.permissions());
    }

    #[test]
    fn test_from_record_rejects_unknown_role() {
        let record = MembershipRecord::new(TenantId::new("org-1"), UserId::new("bob"), "bogus");
        assert!(Membership::<OrganizationRole>::from_record(&record).is_none());
    }

    #[test]
    fn test_synthetic_membership_is_highest() {
        let membership = Membership::<OrganizationRole>::synthetic(
            TenantId::new("org-1"),
            UserId::new("root"),
            "superadmin",
        );
        assert!(membership.is_synthetic());
        assert_eq!(membership.role, OrganizationRole::Owner);
        assert!(Capability::all().iter().all(|c| membership.can(*c)));
    }

    #[test]
    fn test_id_serializes_transparently() {
        let json = serde_json::to_string(&TenantId::new("org-1")).unwrap();
        assert_eq!(json, "\"org-1\"");
    }
}
