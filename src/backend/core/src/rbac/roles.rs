//! Domain roles and their permission matrices.
//!
//! Organizations and workspaces ("uniks") each ship a closed role set:
//!
//! | Role    | manageMembers | manageResource | createContent | editContent | deleteContent |
//! |---------|---------------|----------------|---------------|-------------|---------------|
//! | owner   | yes           | yes            | yes           | yes         | yes           |
//! | admin   | yes           | yes            | yes           | yes         | yes           |
//! | editor  | no            | no             | yes           | yes         | org: no / unik: yes |
//! | member  | no            | no             | no            | no          | no            |
//!
//! Privilege order comes from `DomainRole::rank`, an explicit table, and not
//! from the declaration order of the variants.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::Hash;

// ═══════════════════════════════════════════════════════════════════════════════
// Capabilities
// ═══════════════════════════════════════════════════════════════════════════════

/// One named permission bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Capability {
    ManageMembers,
    ManageResource,
    CreateContent,
    EditContent,
    DeleteContent,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ManageMembers => "manageMembers",
            Self::ManageResource => "manageResource",
            Self::CreateContent => "createContent",
            Self::EditContent => "editContent",
            Self::DeleteContent => "deleteContent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::all().iter().copied().find(|c| c.as_str() == s)
    }

    pub fn all() -> &'static [Capability] {
        &[
            Self::ManageMembers,
            Self::ManageResource,
            Self::CreateContent,
            Self::EditContent,
            Self::DeleteContent,
        ]
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Complete capability record of a role. Every field is always present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RolePermissions {
    pub manage_members: bool,
    pub manage_resource: bool,
    pub create_content: bool,
    pub edit_content: bool,
    pub delete_content: bool,
}

impl RolePermissions {
    pub const ALL: Self = Self {
        manage_members: true,
        manage_resource: true,
        create_content: true,
        edit_content: true,
        delete_content: true,
    };

    pub const NONE: Self = Self {
        manage_members: false,
        manage_resource: false,
        create_content: false,
        edit_content: false,
        delete_content: false,
    };

    pub fn allows(&self, capability: Capability) -> bool {
        match capability {
            Capability::ManageMembers => self.manage_members,
            Capability::ManageResource => self.manage_resource,
            Capability::CreateContent => self.create_content,
            Capability::EditContent => self.edit_content,
            Capability::DeleteContent => self.delete_content,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Domain role trait
// ═══════════════════════════════════════════════════════════════════════════════

/// A closed, privilege-ordered role set for one resource family.
pub trait DomainRole:
    Copy + Eq + Hash + fmt::Debug + fmt::Display + Serialize + Send + Sync + 'static
{
    /// Domain label used in logs, metrics and audit records.
    const DOMAIN: &'static str;

    /// Every role of the domain.
    fn all() -> &'static [Self];

    /// Persisted string form.
    fn as_str(&self) -> &'static str;

    /// Explicit privilege rank; higher is stronger.
    fn rank(&self) -> u8;

    /// Capability record for this role.
    fn permissions(&self) -> RolePermissions;

    /// Parse a persisted role; `None` for anything outside the enumeration.
    fn parse(s: &str) -> Option<Self> {
        Self::all().iter().copied().find(|r| r.as_str() == s)
    }

    /// The strongest role of the domain.
    fn highest() -> Self {
        let mut best = Self::all()[0];
        for role in Self::all() {
            if role.rank() > best.rank() {
                best = *role;
            }
        }
        best
    }

    /// Owner rows cannot be changed or removed through member management.
    fn is_owner(&self) -> bool {
        *self == Self::highest()
    }

    /// Hierarchy comparison, never used implicitly by the guards.
    fn at_least(&self, other: Self) -> bool {
        self.rank() >= other.rank()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Organizations
// ═══════════════════════════════════════════════════════════════════════════════

/// Organization member role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrganizationRole {
    Owner,
    Admin,
    Editor,
    Member,
}

impl DomainRole for OrganizationRole {
    const DOMAIN: &'static str = "organization";

    fn all() -> &'static [Self] {
        &[Self::Owner, Self::Admin, Self::Editor, Self::Member]
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Admin => "admin",
            Self::Editor => "editor",
            Self::Member => "member",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Owner => 4,
            Self::Admin => 3,
            Self::Editor => 2,
            Self::Member => 1,
        }
    }

    fn permissions(&self) -> RolePermissions {
        match self {
            Self::Owner | Self::Admin => RolePermissions::ALL,
            Self::Editor => RolePermissions {
                manage_members: false,
                manage_resource: false,
                create_content: true,
                edit_content: true,
                delete_content: false,
            },
            Self::Member => RolePermissions::NONE,
        }
    }
}

impl fmt::Display for OrganizationRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Workspaces (uniks)
// ═══════════════════════════════════════════════════════════════════════════════

/// Workspace member role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnikRole {
    Owner,
    Admin,
    Editor,
    Member,
}

impl DomainRole for UnikRole {
    const DOMAIN: &'static str = "unik";

    fn all() -> &'static [Self] {
        &[Self::Owner, Self::Admin, Self::Editor, Self::Member]
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Admin => "admin",
            Self::Editor => "editor",
            Self::Member => "member",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Owner => 4,
            Self::Admin => 3,
            Self::Editor => 2,
            Self::Member => 1,
        }
    }

    fn permissions(&self) -> RolePermissions {
        match self {
            Self::Owner | Self::Admin => RolePermissions::ALL,
            Self::Editor => RolePermissions {
                manage_members: false,
                manage_resource: false,
                create_content: true,
                edit_content: true,
                delete_content: true,
            },
            Self::Member => RolePermissions::NONE,
        }
    }
}

impl fmt::Display for UnikRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
