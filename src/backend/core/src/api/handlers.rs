//! API request handlers.
//!
//! Handlers return `Result<impl IntoResponse, AccessError>` so guard errors
//! become their status and `{ "error": message }` body automatically.

use axum::{
    extract::{Path, Query, Request},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use super::AccessScope;
use crate::conflict::translate_error;
use crate::error::{AccessError, Result};
use crate::guard::{EnsureRoleOptions, MemberAction, ResourceKind, TenantGuard};
use crate::middleware::auth::{MaybePrincipal, Principal};
use crate::observability::metrics;
use crate::rbac::models::{Membership, MembershipSource, ResourceId, TenantId, UserId};
use crate::rbac::policy::AccessRequirement;
use crate::rbac::roles::{Capability, DomainRole, OrganizationRole, RolePermissions, UnikRole};
use crate::store::MembershipWriter;

// ═══════════════════════════════════════════════════════════════════════════════
// Health Check
// ═══════════════════════════════════════════════════════════════════════════════

pub async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

pub async fn prometheus_metrics() -> impl IntoResponse {
    (
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::render(),
    )
}

// ═══════════════════════════════════════════════════════════════════════════════
// DTOs
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MembershipView {
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub role: String,
    pub permissions: RolePermissions,
    pub synthetic: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub global_role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl<R: DomainRole> From<Membership<R>> for MembershipView {
    fn from(membership: Membership<R>) -> Self {
        let global_role = match &membership.source {
            MembershipSource::GlobalAdmin { global_role } => Some(global_role.clone()),
            MembershipSource::Stored => None,
        };
        Self {
            permissions: membership.permissions(),
            synthetic: membership.is_synthetic(),
            role: membership.role.as_str().to_string(),
            tenant_id: membership.tenant_id,
            user_id: membership.user_id,
            global_role,
            comment: membership.comment,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessView {
    pub resource_id: String,
    pub has_access: bool,
}

/// `?capability=editContent` or `?roles=owner,admin`; neither means any membership.
#[derive(Debug, Default, Deserialize)]
pub struct AccessQuery {
    pub capability: Option<String>,
    pub roles: Option<String>,
}

impl AccessQuery {
    fn roles<R: DomainRole>(&self) -> Result<Vec<R>> {
        let Some(raw) = self.roles.as_deref() else {
            return Ok(Vec::new());
        };
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| R::parse(s).ok_or_else(|| AccessError::invalid_input(format!("Unknown role '{}'", s))))
            .collect()
    }

    fn requirement<R: DomainRole>(&self) -> Result<AccessRequirement<R>> {
        if let Some(raw) = self.capability.as_deref() {
            let capability = Capability::parse(raw)
                .ok_or_else(|| AccessError::invalid_input(format!("Unknown capability '{}'", raw)))?;
            return Ok(AccessRequirement::Capability(capability));
        }
        let roles = self.roles::<R>()?;
        Ok(if roles.is_empty() {
            AccessRequirement::Any
        } else {
            AccessRequirement::Roles(roles)
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct ChangeRoleRequest {
    pub role: String,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Organizations
// ═══════════════════════════════════════════════════════════════════════════════

pub async fn organization_access(
    scope: AccessScope,
    MaybePrincipal(principal): MaybePrincipal,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    let user_id = principal.map(|p| p.id);
    let has_access = scope
        .organizations
        .has_access(user_id.as_ref(), &TenantId::new(id.clone()))
        .await?;

    Ok(Json(AccessView {
        resource_id: id,
        has_access,
    }))
}

pub async fn organization_membership(
    scope: AccessScope,
    MaybePrincipal(principal): MaybePrincipal,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    let user_id = principal.map(|p| p.id);
    let membership = scope
        .organizations
        .require_role(user_id.as_ref(), &TenantId::new(id), &[])
        .await?;

    Ok(Json(MembershipView::from(membership)))
}

pub async fn change_member_role(
    scope: AccessScope,
    MaybePrincipal(principal): MaybePrincipal,
    Path((id, target)): Path<(String, String)>,
    Json(req): Json<ChangeRoleRequest>,
) -> Result<Json<MembershipView>> {
    let members = scope.stores.organization_members.clone();
    change_role(&scope, &scope.organizations, members.as_ref(), principal, id, target, req).await
}

pub async fn remove_member(
    scope: AccessScope,
    MaybePrincipal(principal): MaybePrincipal,
    Path((id, target)): Path<(String, String)>,
) -> Result<StatusCode> {
    let members = scope.stores.organization_members.clone();
    remove(&scope, &scope.organizations, members.as_ref(), principal, id, target).await
}

// ═══════════════════════════════════════════════════════════════════════════════
// Member lifecycle
// ═══════════════════════════════════════════════════════════════════════════════

async fn change_role<R: DomainRole>(
    scope: &AccessScope,
    guard: &TenantGuard<R>,
    members: &dyn MembershipWriter,
    principal: Option<Principal>,
    id: String,
    target: String,
    req: ChangeRoleRequest,
) -> Result<Json<MembershipView>> {
    let role = R::parse(&req.role)
        .ok_or_else(|| AccessError::invalid_input(format!("Unknown role '{}'", req.role)))?;
    let (tenant_id, target) = (TenantId::new(id), UserId::new(target));
    let user_id = principal.map(|p| p.id);

    let current = guard
        .authorize_member_change(user_id.as_ref(), &tenant_id, &target, MemberAction::ChangeRole { to: role })
        .await?;

    if let Err(e) = members.change_role(&tenant_id, &target, role.as_str()).await {
        return Err(translate_error(e.into(), scope.stores.identities.as_ref()).await);
    }
    guard.resolver().cache().forget(&target, &tenant_id);

    tracing::info!(
        domain = R::DOMAIN,
        tenant_id = %tenant_id,
        target = %target,
        from = %current.role,
        to = %role,
        "Member role changed"
    );

    Ok(Json(MembershipView::from(Membership { role, ..current })))
}

async fn remove<R: DomainRole>(
    scope: &AccessScope,
    guard: &TenantGuard<R>,
    members: &dyn MembershipWriter,
    principal: Option<Principal>,
    id: String,
    target: String,
) -> Result<StatusCode> {
    let (tenant_id, target) = (TenantId::new(id), UserId::new(target));
    let user_id = principal.map(|p| p.id);

    guard
        .authorize_member_change(user_id.as_ref(), &tenant_id, &target, MemberAction::Remove)
        .await?;

    if let Err(e) = members.remove_member(&tenant_id, &target).await {
        return Err(translate_error(e.into(), scope.stores.identities.as_ref()).await);
    }
    guard.resolver().cache().forget(&target, &tenant_id);

    tracing::info!(domain = R::DOMAIN, tenant_id = %tenant_id, target = %target, "Member removed");
    Ok(StatusCode::NO_CONTENT)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Workspaces
// ═══════════════════════════════════════════════════════════════════════════════

pub async fn unik_access(
    scope: AccessScope,
    Path(id): Path<String>,
    Query(query): Query<AccessQuery>,
    request: Request,
) -> Response {
    let options = match query.roles::<UnikRole>() {
        Ok(roles) => EnsureRoleOptions { roles, error_message: None },
        Err(e) => return e.into_response(),
    };

    let user_id = match scope
        .uniks
        .ensure_role_response(request.extensions(), &TenantId::new(id.clone()), &options)
        .await
    {
        Ok(user_id) => user_id,
        Err(response) => return response,
    };

    Json(serde_json::json!({
        "unikId": id,
        "userId": user_id,
        "hasAccess": true,
    }))
    .into_response()
}

pub async fn change_unik_member_role(
    scope: AccessScope,
    MaybePrincipal(principal): MaybePrincipal,
    Path((id, target)): Path<(String, String)>,
    Json(req): Json<ChangeRoleRequest>,
) -> Result<Json<MembershipView>> {
    let members = scope.stores.unik_members.clone();
    change_role(&scope, &scope.uniks, members.as_ref(), principal, id, target, req).await
}

pub async fn remove_unik_member(
    scope: AccessScope,
    MaybePrincipal(principal): MaybePrincipal,
    Path((id, target)): Path<(String, String)>,
) -> Result<StatusCode> {
    let members = scope.stores.unik_members.clone();
    remove(&scope, &scope.uniks, members.as_ref(), principal, id, target).await
}

// ═══════════════════════════════════════════════════════════════════════════════
// Departments and positions
// ═══════════════════════════════════════════════════════════════════════════════

async fn resource_access(
    scope: AccessScope,
    principal: Option<UserId>,
    kind: ResourceKind,
    id: String,
    query: AccessQuery,
) -> Result<Json<MembershipView>> {
    let requirement = query.requirement::<OrganizationRole>()?;
    let membership = scope
        .resources
        .ensure_access(principal.as_ref(), kind, &ResourceId::new(id), &requirement)
        .await?;
    Ok(Json(MembershipView::from(membership)))
}

pub async fn department_access(
    scope: AccessScope,
    MaybePrincipal(principal): MaybePrincipal,
    Path(id): Path<String>,
    Query(query): Query<AccessQuery>,
) -> Result<Json<MembershipView>> {
    resource_access(scope, principal.map(|p| p.id), ResourceKind::Department, id, query).await
}

pub async fn position_access(
    scope: AccessScope,
    MaybePrincipal(principal): MaybePrincipal,
    Path(id): Path<String>,
    Query(query): Query<AccessQuery>,
) -> Result<Json<MembershipView>> {
    resource_access(scope, principal.map(|p| p.id), ResourceKind::Position, id, query).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_requirement() {
        let query = AccessQuery {
            capability: Some("editContent".into()),
            roles: None,
        };
        assert_eq!(
            query.requirement::<OrganizationRole>().unwrap(),
            AccessRequirement::Capability(Capability::EditContent)
        );

        let query = AccessQuery {
            capability: None,
            roles: Some("owner, admin".into()),
        };
        assert_eq!(
            query.requirement::<OrganizationRole>().unwrap(),
            AccessRequirement::Roles(vec![OrganizationRole::Owner, OrganizationRole::Admin])
        );

        assert_eq!(
            AccessQuery::default().requirement::<OrganizationRole>().unwrap(),
            AccessRequirement::Any
        );
    }

    #[test]
    fn test_unknown_query_values_rejected() {
        let query = AccessQuery {
            capability: Some("viewContent".into()),
            roles: None,
        };
        assert!(query.requirement::<OrganizationRole>().is_err());

        let query = AccessQuery {
            capability: None,
            roles: Some("bogus".into()),
        };
        assert!(query.roles::<UnikRole>().is_err());
    }
}
