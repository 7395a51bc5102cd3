//! Principal extraction.
//!
//! Decodes `Authorization: Bearer <jwt>` into the raw claims object and a
//! `Principal`, and injects both into request extensions. A request without
//! the header passes through unauthenticated; guards answer it with 401.
//!
//! # Example
//!
//! ```rust,ignore
//! use access_core::middleware::auth::{PrincipalDecoder, PrincipalLayer};
//!
//! let decoder = PrincipalDecoder::hs256(Some("your-secret-key"), None, None);
//! let app = Router::new()
//!     .route("/api/v1/organizations/:id/access", get(organization_access))
//!     .layer(PrincipalLayer::new(decoder));
//! ```

use axum::{
    body::Body,
    extract::{FromRequestParts, Request},
    http::{request::Parts, Extensions, HeaderMap},
    response::{IntoResponse, Response},
};
use futures::future::BoxFuture;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    sync::Arc,
    task::{Context, Poll},
};
use tower::{Layer, Service};
use tracing::debug;

use crate::error::AccessError;
use crate::rbac::models::UserId;

/// Field names an identity object may carry its id under. All synonyms.
pub const PRINCIPAL_ID_FIELDS: [&str; 4] = ["id", "sub", "user_id", "userId"];

// ═══════════════════════════════════════════════════════════════════════════════
// Principal
// ═══════════════════════════════════════════════════════════════════════════════

/// Raw identity object as decoded from the token.
#[derive(Debug, Clone, PartialEq)]
pub struct IdentityClaims(pub Value);

/// The authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: UserId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl Principal {
    pub fn new(id: impl Into<UserId>) -> Self {
        Self {
            id: id.into(),
            email: None,
        }
    }

    /// Read the id from whichever synonym field is present.
    ///
    /// Numeric ids are accepted and stringified; blank strings are ignored.
    pub fn from_value(identity: &Value) -> Option<Self> {
        let object = identity.as_object()?;
        let id = PRINCIPAL_ID_FIELDS.iter().find_map(|field| match object.get(*field)? {
            Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })?;

        Some(Self {
            id: UserId::new(id),
            email: object.get("email").and_then(Value::as_str).map(str::to_string),
        })
    }

    /// Principal attached by the layer, or read from raw claims.
    pub fn from_extensions(extensions: &Extensions) -> Option<Self> {
        extensions.get::<Principal>().cloned().or_else(|| {
            extensions
                .get::<IdentityClaims>()
                .and_then(|claims| Self::from_value(&claims.0))
        })
    }
}

/// Optional principal, for handlers that let the guard answer 401.
#[derive(Debug, Clone)]
pub struct MaybePrincipal(pub Option<Principal>);

#[axum::async_trait]
impl<S> FromRequestParts<S> for MaybePrincipal
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(MaybePrincipal(Principal::from_extensions(&parts.extensions)))
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = AccessError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Principal::from_extensions(&parts.extensions).ok_or_else(AccessError::unauthenticated)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Decoder
// ═══════════════════════════════════════════════════════════════════════════════

/// Validates bearer tokens issued by the upstream identity provider.
pub struct PrincipalDecoder {
    decoding_key: Option<DecodingKey>,
    validation: Validation,
}

impl PrincipalDecoder {
    /// HS256 decoder. Without a secret every bearer token is rejected.
    ///
    /// Without an expected audience the `aud` claim is not checked.
    pub fn hs256(secret: Option<&str>, issuer: Option<&str>, audience: Option<&str>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        if let Some(issuer) = issuer {
            validation.set_issuer(&[issuer]);
        }
        match audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }

        Self {
            decoding_key: secret.map(|s| DecodingKey::from_secret(s.as_bytes())),
            validation,
        }
    }

    fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
        headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.strip_prefix("Bearer ").or_else(|| s.strip_prefix("bearer ")))
    }

    /// `Ok(None)` when no token was sent.
    pub fn authenticate(&self, headers: &HeaderMap) -> Result<Option<(IdentityClaims, Principal)>, AccessError> {
        let Some(token) = Self::extract_bearer(headers) else {
            return Ok(None);
        };

        let decoding_key = self.decoding_key.as_ref().ok_or_else(|| {
            debug!("Bearer token received but no decoding key is configured");
            AccessError::unauthenticated()
        })?;

        let claims = decode::<Value>(token, decoding_key, &self.validation)
            .map_err(|e| {
                debug!("JWT validation failed: {}", e);
                AccessError::unauthenticated()
            })?
            .claims;

        let principal = Principal::from_value(&claims).ok_or_else(|| {
            debug!("JWT carries none of the principal id fields");
            AccessError::unauthenticated()
        })?;

        counter!("access_principals_decoded_total").increment(1);
        Ok(Some((IdentityClaims(claims), principal)))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Layer
// ═══════════════════════════════════════════════════════════════════════════════

/// Principal extraction layer for Tower.
#[derive(Clone)]
pub struct PrincipalLayer {
    decoder: Arc<PrincipalDecoder>,
}

impl PrincipalLayer {
    pub fn new(decoder: PrincipalDecoder) -> Self {
        Self {
            decoder: Arc::new(decoder),
        }
    }
}

impl<S> Layer<S> for PrincipalLayer {
    type Service = PrincipalService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        PrincipalService {
            inner,
            decoder: self.decoder.clone(),
        }
    }
}

/// Principal extraction service.
#[derive(Clone)]
pub struct PrincipalService<S> {
    inner: S,
    decoder: Arc<PrincipalDecoder>,
}

impl<S> Service<Request<Body>> for PrincipalService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: Request<Body>) -> Self::Future {
        let decoder = self.decoder.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            match decoder.authenticate(request.headers()) {
                Ok(Some((claims, principal))) => {
                    request.extensions_mut().insert(claims);
                    request.extensions_mut().insert(principal);
                    inner.call(request).await
                }
                Ok(None) => inner.call(request).await,
                Err(e) => Ok(e.into_response()),
            }
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    fn token(claims: Value, secret: &str) -> String {
        encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
    }

    fn exp() -> i64 {
        chrono::Utc::now().timestamp() + 3600
    }

    #[test]
    fn test_id_synonyms() {
        for field in PRINCIPAL_ID_FIELDS {
            let principal = Principal::from_value(&json!({ field: "bob" })).unwrap();
            assert_eq!(principal.id, UserId::new("bob"));
        }
        assert_eq!(
            Principal::from_value(&json!({ "userId": 42 })).unwrap().id,
            UserId::new("42")
        );
        assert!(Principal::from_value(&json!({ "name": "bob" })).is_none());
        assert!(Principal::from_value(&json!({ "id": "  " })).is_none());
    }

    #[test]
    fn test_from_extensions_falls_back_to_claims() {
        let mut extensions = Extensions::new();
        assert!(Principal::from_extensions(&extensions).is_none());

        extensions.insert(IdentityClaims(json!({ "user_id": "carol" })));
        assert_eq!(
            Principal::from_extensions(&extensions).unwrap().id,
            UserId::new("carol")
        );
    }

    #[test]
    fn test_decoder_accepts_valid_token() {
        let decoder = PrincipalDecoder::hs256(Some("secret"), None, None);
        let mut headers = HeaderMap::new();
        let value = format!("Bearer {}", token(json!({ "sub": "bob", "exp": exp() }), "secret"));
        headers.insert("authorization", HeaderValue::from_str(&value).unwrap());

        let (_, principal) = decoder.authenticate(&headers).unwrap().unwrap();
        assert_eq!(principal.id, UserId::new("bob"));
    }

    #[test]
    fn test_decoder_rejects_bad_signature() {
        let decoder = PrincipalDecoder::hs256(Some("secret"), None, None);
        let mut headers = HeaderMap::new();
        let value = format!("Bearer {}", token(json!({ "sub": "bob", "exp": exp() }), "other"));
        headers.insert("authorization", HeaderValue::from_str(&value).unwrap());

        assert!(decoder.authenticate(&headers).is_err());
    }

    fn bearer(token: String) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let value = format!("Bearer {}", token);
        headers.insert("authorization", HeaderValue::from_str(&value).unwrap());
        headers
    }

    #[test]
    fn test_audience_ignored_unless_configured() {
        let claims = json!({ "sub": "bob", "aud": "authenticated", "exp": exp() });
        let headers = bearer(token(claims, "secret"));

        let decoder = PrincipalDecoder::hs256(Some("secret"), None, None);
        let (_, principal) = decoder.authenticate(&headers).unwrap().unwrap();
        assert_eq!(principal.id, UserId::new("bob"));

        let decoder = PrincipalDecoder::hs256(Some("secret"), None, Some("authenticated"));
        assert!(decoder.authenticate(&headers).unwrap().is_some());

        let decoder = PrincipalDecoder::hs256(Some("secret"), None, Some("admin-console"));
        assert!(decoder.authenticate(&headers).is_err());
    }

    #[test]
    fn test_missing_header_is_anonymous() {
        let decoder = PrincipalDecoder::hs256(Some("secret"), None, None);
        assert!(decoder.authenticate(&HeaderMap::new()).unwrap().is_none());
    }
}
