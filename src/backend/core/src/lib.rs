#![allow(clippy::result_large_err)]
//! # Access Core
//!
//! Hierarchical multi-tenant resource access-control resolver.
//!
//! ## Architecture
//!
//! - **RBAC**: Per-domain role enumerations, permission matrices and policy evaluation
//! - **Store**: Membership, junction-link, global-role and identity adapters (Postgres and in-memory)
//! - **Membership**: Request-scoped two-level cache and the resolver behind every guard
//! - **Guard**: Tenant entry points and union-over-parents traversal for departments and positions
//! - **Conflict**: Optimistic-lock conflict detection and 409 translation
//! - **Middleware**: Bearer-token principal extraction
//! - **API**: Axum routes exposing the guards
//! - **Observability**: Structured logging, OTLP tracing and Prometheus metrics

pub mod api;
pub mod config;
pub mod conflict;
pub mod db;
pub mod error;
pub mod guard;
pub mod membership;
pub mod middleware;
pub mod observability;
pub mod rbac;
pub mod store;

pub use error::{AccessError, ErrorCode, ErrorSeverity, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::error::{AccessError, ErrorCode, ErrorSeverity, Result};
    pub use crate::guard::{
        AccessAuditEntry, AuditLogger, EnsureRoleOptions, MemberAction, ResourceGuard,
        ResourceKind, TenantGuard,
    };
    pub use crate::membership::{MembershipCache, MembershipResolver};
    pub use crate::middleware::auth::Principal;
    pub use crate::rbac::{
        AccessRequirement, Capability, DenialReason, DomainRole, GlobalAdminBypass, LinkKind,
        Membership, MembershipRecord, OrganizationRole, ResourceId, TenantId, UnikRole, UserId,
    };
    pub use crate::store::{
        GlobalRoleRegistry, IdentityLookup, LinkStore, MembershipStore, MembershipWriter, Stores,
    };
}
