//! Role model and policy evaluation for multi-tenant resources.
//!
//! This module provides:
//! - **Models**: identifiers, stored and validated memberships, junction link kinds
//! - **Roles**: per-domain role enumerations with explicit rank and permission tables
//! - **Policy**: requirement evaluation and integrity validation of stored roles
//! - **Global admin**: the superuser bypass that fabricates synthetic memberships
//!
//! # Usage
//!
//! ```rust,ignore
//! use access_core::rbac::{evaluate, validate_record, AccessRequirement, Capability, OrganizationRole};
//!
//! let membership = validate_record::<OrganizationRole>(&record)?;
//! let decision = evaluate(Some(&membership), &AccessRequirement::Capability(Capability::EditContent));
//! ```

pub mod global_admin;
pub mod models;
pub mod policy;
pub mod roles;

pub use global_admin::GlobalAdminBypass;
pub use models::{
    LinkKind, Membership, MembershipRecord, MembershipSource, ResourceId, TenantId, UserId,
};
pub use policy::{
    evaluate, has_required_role, validate_record, AccessRequirement, DenialReason, PolicyDecision,
};
pub use roles::{Capability, DomainRole, OrganizationRole, RolePermissions, UnikRole};
