//! Policy evaluation against a resolved membership.
//!
//! The policy layer answers one question:
//! "Does this membership satisfy what the operation requires?"

use serde::{Deserialize, Serialize};
use std::fmt;

use super::models::{Membership, MembershipRecord};
use super::roles::{Capability, DomainRole};
use crate::error::{AccessError, Result};

// ═══════════════════════════════════════════════════════════════════════════════
// Requirement
// ═══════════════════════════════════════════════════════════════════════════════

/// What an operation demands of the caller's membership.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessRequirement<R: DomainRole> {
    /// Any membership at all.
    Any,
    /// The role must be one of these. An empty list accepts any membership.
    Roles(Vec<R>),
    /// The role's permission matrix must grant this capability.
    Capability(Capability),
}

impl<R: DomainRole> AccessRequirement<R> {
    pub fn roles(roles: &[R]) -> Self {
        Self::Roles(roles.to_vec())
    }

    /// Action label written to audit records.
    pub fn describe(&self) -> String {
        match self {
            Self::Any => "access".to_string(),
            Self::Roles(roles) if roles.is_empty() => "access".to_string(),
            Self::Roles(roles) => {
                let names: Vec<&str> = roles.iter().map(|r| r.as_str()).collect();
                format!("role:{}", names.join("|"))
            }
            Self::Capability(capability) => format!("capability:{}", capability),
        }
    }
}

impl<R: DomainRole> fmt::Display for AccessRequirement<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Decision
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable denial reason, kept for operators only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    ResourceNotFound,
    NotMemberOfAnyParent,
    InsufficientPermissions,
}

impl DenialReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ResourceNotFound => "resource_not_found",
            Self::NotMemberOfAnyParent => "not_member_of_any_parent",
            Self::InsufficientPermissions => "insufficient_permissions",
        }
    }
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a policy evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyDecision {
    /// The action is allowed.
    Allow,
    /// The action is denied, with a reason.
    Deny(DenialReason),
}

impl PolicyDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }

    pub fn is_denied(&self) -> bool {
        matches!(self, Self::Deny(_))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Evaluation
// ═══════════════════════════════════════════════════════════════════════════════

/// Exact-set role check. An empty allow-list accepts every role.
pub fn has_required_role<R: DomainRole>(role: R, allowed: &[R]) -> bool {
    allowed.is_empty() || allowed.contains(&role)
}

/// Evaluate a requirement against an optional membership.
pub fn evaluate<R: DomainRole>(
    membership: Option<&Membership<R>>,
    requirement: &AccessRequirement<R>,
) -> PolicyDecision {
    let Some(membership) = membership else {
        return PolicyDecision::Deny(DenialReason::NotMemberOfAnyParent);
    };

    let allowed = match requirement {
        AccessRequirement::Any => true,
        AccessRequirement::Roles(roles) => has_required_role(membership.role, roles),
        AccessRequirement::Capability(capability) => membership.can(*capability),
    };

    if allowed {
        PolicyDecision::Allow
    } else {
        PolicyDecision::Deny(DenialReason::InsufficientPermissions)
    }
}

/// Validate a stored record for domain `R`.
///
/// A role outside the enumeration means corrupted state, so this fails with an
/// integrity error instead of a denial.
pub fn validate_record<R: DomainRole>(record: &MembershipRecord) -> Result<Membership<R>> {
    Membership::from_record(record).ok_or_else(|| {
        let error = AccessError::integrity(
            R::DOMAIN,
            record.tenant_id.as_str(),
            record.user_id.as_str(),
            &record.role,
        );
        error.log();
        error
    })
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
