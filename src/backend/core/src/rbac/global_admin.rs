//! Instance-wide superuser bypass.
//!
//! Composed in front of the membership lookup rather than baked into it, so
//! the grant is visible in logs and metrics on its own.

use std::sync::Arc;
use tracing::info;

use super::models::{Membership, TenantId, UserId};
use super::roles::DomainRole;
use crate::error::Result;
use crate::observability::metrics;
use crate::store::GlobalRoleRegistry;

/// Fallback label when a superuser has no readable role name.
const UNNAMED_GLOBAL_ROLE: &str = "superuser";

/// Fabricates memberships for instance superusers.
#[derive(Clone)]
pub struct GlobalAdminBypass {
    registry: Arc<dyn GlobalRoleRegistry>,
    enabled: bool,
}

impl GlobalAdminBypass {
    pub fn new(registry: Arc<dyn GlobalRoleRegistry>, enabled: bool) -> Self {
        Self { registry, enabled }
    }

    /// Global role name of a superuser, `None` for everyone else.
    pub async fn superuser_role(&self, user_id: &UserId) -> Result<Option<String>> {
        if !self.enabled || user_id.is_blank() {
            return Ok(None);
        }
        if !self.registry.is_superuser(user_id).await? {
            return Ok(None);
        }
        let name = self.registry.global_role_name(user_id).await?;
        Ok(Some(name.unwrap_or_else(|| UNNAMED_GLOBAL_ROLE.to_string())))
    }

    /// Synthetic membership carrying the domain's highest role. Never stored.
    pub fn synthesize<R: DomainRole>(
        &self,
        tenant_id: &TenantId,
        user_id: &UserId,
        global_role: &str,
    ) -> Membership<R> {
        info!(
            domain = R::DOMAIN,
            user_id = %user_id,
            tenant_id = %tenant_id,
            global_role,
            "Global admin bypass granted"
        );
        metrics::record_bypass(R::DOMAIN);
        Membership::synthetic(tenant_id.clone(), user_id.clone(), global_role)
    }
}

impl std::fmt::Debug for GlobalAdminBypass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlobalAdminBypass")
            .field("enabled", &self.enabled)
            .finish()
    }
}
