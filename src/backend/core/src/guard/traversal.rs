//! Access to resources attached to tenants through junction rows.
//!
//! A resource may be linked to several parents, and access is the union over
//! every tenant it reaches: one qualifying membership grants, and a denial
//! needs every reachable tenant to fail.
//!
//! ```text
//! department ──departments_organizations──► organization*
//! position ──positions_departments──► department* ──► organization*
//!     └──positions_organizations──► organization*   (only without departments)
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use super::audit::{AccessAuditEntry, AuditLogger};
use super::tenant::TenantGuard;
use crate::error::{AccessError, Result};
use crate::observability::metrics;
use crate::rbac::models::{LinkKind, Membership, ResourceId, TenantId, UserId};
use crate::rbac::policy::{evaluate, AccessRequirement, DenialReason, PolicyDecision};
use crate::rbac::roles::DomainRole;
use crate::store::LinkStore;

/// Resource families reachable only through junction rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Department,
    Position,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Department => "department",
            Self::Position => "position",
        }
    }

    fn entity(&self) -> &'static str {
        match self {
            Self::Department => "Department",
            Self::Position => "Position",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Guard for departments and positions.
#[derive(Clone)]
pub struct ResourceGuard<R: DomainRole> {
    tenants: TenantGuard<R>,
    links: Arc<dyn LinkStore>,
    audit: AuditLogger,
}

impl<R: DomainRole> ResourceGuard<R> {
    pub fn new(tenants: TenantGuard<R>, links: Arc<dyn LinkStore>, audit: AuditLogger) -> Self {
        Self {
            tenants,
            links,
            audit,
        }
    }

    /// Every tenant the resource reaches, deduplicated, in link order.
    pub async fn reachable_tenants(&self, kind: ResourceKind, resource_id: &ResourceId) -> Result<Vec<TenantId>> {
        if resource_id.is_blank() {
            return Ok(Vec::new());
        }

        let tenants = match kind {
            ResourceKind::Department => self.links.parents(LinkKind::DepartmentTenant, resource_id).await?,
            ResourceKind::Position => {
                let departments = self
                    .links
                    .parents(LinkKind::PositionDepartment, resource_id)
                    .await?;

                if departments.is_empty() {
                    self.links.parents(LinkKind::PositionTenant, resource_id).await?
                } else {
                    let mut tenants = Vec::new();
                    for department in dedup(departments) {
                        let parents = self
                            .links
                            .parents(LinkKind::DepartmentTenant, &ResourceId::new(department))
                            .await?;
                        tenants.extend(parents);
                    }
                    tenants
                }
            }
        };

        Ok(dedup(tenants).into_iter().map(TenantId::new).collect())
    }

    /// Grant if any reachable tenant satisfies `requirement`.
    ///
    /// Returns the first qualifying membership. Zero reachable tenants is a
    /// not-found; every denial is audited with its reason code.
    pub async fn ensure_access(
        &self,
        principal: Option<&UserId>,
        kind: ResourceKind,
        resource_id: &ResourceId,
        requirement: &AccessRequirement<R>,
    ) -> Result<Membership<R>> {
        let Some(user_id) = principal.filter(|u| !u.is_blank()) else {
            metrics::record_decision(R::DOMAIN, false);
            return Err(AccessError::unauthenticated());
        };

        let tenants = self.reachable_tenants(kind, resource_id).await?;
        if tenants.is_empty() {
            self.deny(user_id, kind, resource_id, requirement, DenialReason::ResourceNotFound)
                .await;
            return Err(AccessError::not_found(kind.entity()));
        }

        let resolver = self.tenants.resolver();
        let mut member_somewhere = false;
        for tenant_id in &tenants {
            let Some(membership) = resolver.resolve(user_id, tenant_id).await? else {
                continue;
            };
            member_somewhere = true;

            if evaluate(Some(&membership), requirement) == PolicyDecision::Allow {
                debug!(
                    domain = R::DOMAIN,
                    user_id = %user_id,
                    resource_kind = kind.as_str(),
                    resource_id = %resource_id,
                    tenant_id = %tenant_id,
                    role = %membership.role,
                    "Access granted through parent"
                );
                metrics::record_decision(R::DOMAIN, true);
                return Ok(membership);
            }
        }

        let reason = if member_somewhere {
            DenialReason::InsufficientPermissions
        } else {
            DenialReason::NotMemberOfAnyParent
        };
        self.deny(user_id, kind, resource_id, requirement, reason).await;

        Err(match reason {
            DenialReason::InsufficientPermissions => AccessError::forbidden("Insufficient permissions"),
            _ => AccessError::forbidden("Access denied"),
        })
    }

    /// Boolean form of [`Self::ensure_access`] with no requirement beyond membership.
    pub async fn has_access(
        &self,
        principal: Option<&UserId>,
        kind: ResourceKind,
        resource_id: &ResourceId,
    ) -> Result<bool> {
        match self
            .ensure_access(principal, kind, resource_id, &AccessRequirement::Any)
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if e.code().http_status().is_client_error() => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn ensure_department_access(
        &self,
        principal: Option<&UserId>,
        department_id: &ResourceId,
        requirement: &AccessRequirement<R>,
    ) -> Result<Membership<R>> {
        self.ensure_access(principal, ResourceKind::Department, department_id, requirement)
            .await
    }

    pub async fn ensure_position_access(
        &self,
        principal: Option<&UserId>,
        position_id: &ResourceId,
        requirement: &AccessRequirement<R>,
    ) -> Result<Membership<R>> {
        self.ensure_access(principal, ResourceKind::Position, position_id, requirement)
            .await
    }

    async fn deny(
        &self,
        user_id: &UserId,
        kind: ResourceKind,
        resource_id: &ResourceId,
        requirement: &AccessRequirement<R>,
        reason: DenialReason,
    ) {
        metrics::record_decision(R::DOMAIN, false);
        warn!(
            domain = R::DOMAIN,
            user_id = %user_id,
            resource_kind = kind.as_str(),
            resource_id = %resource_id,
            reason = reason.as_str(),
            "Resource access denied"
        );
        self.audit
            .record(AccessAuditEntry::new(
                Some(user_id),
                kind.as_str(),
                resource_id.as_str(),
                requirement.describe(),
                reason,
            ))
            .await;
    }
}

fn dedup(ids: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.into_iter().filter(|id| seen.insert(id.clone())).collect()
}
