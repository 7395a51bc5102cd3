//! HTTP surface of the access resolver.
//!
//! Every request gets its own [`AccessScope`]: fresh membership caches and the
//! guards built around them. Nothing cached outlives the request.
//!
//! # Routes
//!
//! - `GET /health`, `GET /metrics`
//! - `GET /api/v1/organizations/:id/access`
//! - `GET /api/v1/organizations/:id/membership`
//! - `PATCH|DELETE /api/v1/organizations/:id/members/:user_id`
//! - `GET /api/v1/uniks/:id/access`
//! - `PATCH|DELETE /api/v1/uniks/:id/members/:user_id`
//! - `GET /api/v1/departments/:id/access`, `GET /api/v1/positions/:id/access`

mod handlers;

use axum::{
    extract::FromRequestParts,
    http::request::Parts,
    routing::{get, patch},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::config::{AccessConfig, AuthConfig};
use crate::db::StorageManager;
use crate::guard::{AuditLogger, ResourceGuard, TenantGuard};
use crate::membership::{MembershipCache, MembershipResolver};
use crate::middleware::auth::{PrincipalDecoder, PrincipalLayer};
use crate::rbac::global_admin::GlobalAdminBypass;
use crate::rbac::roles::{OrganizationRole, UnikRole};
use crate::store::Stores;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub stores: Stores,
    pub audit: AuditLogger,
    pub access: Arc<AccessConfig>,
}

impl AppState {
    pub fn new(stores: Stores, audit: AuditLogger, access: AccessConfig) -> Self {
        Self {
            stores,
            audit,
            access: Arc::new(access),
        }
    }

    /// Guards for one request over `stores`.
    pub fn scope(&self, stores: Stores) -> AccessScope {
        let bypass = GlobalAdminBypass::new(stores.global_roles.clone(), self.access.global_admin_bypass);

        let organization_cache = Arc::new(MembershipCache::new());
        let organizations = TenantGuard::new(
            MembershipResolver::<OrganizationRole>::new(
                stores.organizations.clone(),
                organization_cache,
                bypass.clone(),
            ),
            "Organization",
            self.audit.clone(),
        );
        let uniks = TenantGuard::new(
            MembershipResolver::<UnikRole>::new(
                stores.uniks.clone(),
                Arc::new(MembershipCache::new()),
                bypass,
            ),
            "Unik",
            self.audit.clone(),
        );
        let resources = ResourceGuard::new(organizations.clone(), stores.links.clone(), self.audit.clone());

        AccessScope {
            organizations,
            uniks,
            resources,
            stores,
        }
    }
}

/// Per-request access context.
///
/// Reads go through the request's own `StorageManager` when an upstream layer
/// attached one (for example an RLS-scoped transaction), otherwise through
/// the shared stores.
#[derive(Clone)]
pub struct AccessScope {
    pub organizations: TenantGuard<OrganizationRole>,
    pub uniks: TenantGuard<UnikRole>,
    pub resources: ResourceGuard<OrganizationRole>,
    pub stores: Stores,
}

#[axum::async_trait]
impl FromRequestParts<AppState> for AccessScope {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let stores = match parts.extensions.get::<StorageManager>() {
            Some(manager) => Stores::postgres(manager.clone(), state.access.superuser_roles.clone()),
            None => state.stores.clone(),
        };
        Ok(state.scope(stores))
    }
}

/// Build the API router.
///
/// # Example
///
/// ```rust,ignore
/// let state = AppState::new(Stores::postgres(db.manager(), roles), audit, config.access);
/// let app = build_router(state, &config.auth);
/// ```
pub fn build_router(state: AppState, auth: &AuthConfig) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let decoder = PrincipalDecoder::hs256(
        auth.jwt_secret.as_deref(),
        auth.jwt_issuer.as_deref(),
        auth.jwt_audience.as_deref(),
    );

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::prometheus_metrics))
        .nest("/api/v1", v1_router())
        .layer(PrincipalLayer::new(decoder))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn v1_router() -> Router<AppState> {
    Router::new()
        .route("/organizations/:id/access", get(handlers::organization_access))
        .route("/organizations/:id/membership", get(handlers::organization_membership))
        .route(
            "/organizations/:id/members/:user_id",
            patch(handlers::change_member_role).delete(handlers::remove_member),
        )
        .route("/uniks/:id/access", get(handlers::unik_access))
        .route(
            "/uniks/:id/members/:user_id",
            patch(handlers::change_unik_member_role).delete(handlers::remove_unik_member),
        )
        .route("/departments/:id/access", get(handlers::department_access))
        .route("/positions/:id/access", get(handlers::position_access))
}
