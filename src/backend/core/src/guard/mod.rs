//! Guard entry points.
//!
//! - **tenant**: `has_access`, `require_role`, `ensure_role_response` and the
//!   member lifecycle check for organizations and workspaces
//! - **traversal**: departments and positions, granted through any parent tenant
//! - **audit**: structured denial records
//!
//! Guards are built per request around a fresh `MembershipCache` and never
//! write HTTP responses except through `ensure_role_response`.

pub mod audit;
pub mod tenant;
pub mod traversal;

pub use audit::{AccessAuditEntry, AuditLogger};
pub use tenant::{EnsureRoleOptions, MemberAction, TenantGuard};
pub use traversal::{ResourceGuard, ResourceKind};
