//! Optimistic-lock conflict detection and translation.
//!
//! Write paths raise [`OptimisticLockError`] when a row changed underneath
//! them. The error may arrive typed, wrapped in `anyhow` context, or as a
//! JSON body from another service, so detection checks the stable
//! `name`/`code` discriminants and only uses the typed downcast as a fast path.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use tracing::warn;

use crate::error::{AccessError, ErrorCode};
use crate::rbac::models::UserId;
use crate::store::IdentityLookup;

pub const OPTIMISTIC_LOCK_NAME: &str = "OptimisticLockError";
pub const OPTIMISTIC_LOCK_CODE: &str = "OPTIMISTIC_LOCK_CONFLICT";

const CONFLICT_MESSAGE: &str = "The resource was modified by another user";

/// Fields describing a lost update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictInfo {
    pub entity_type: String,
    pub entity_id: String,
    pub expected_version: i64,
    pub actual_version: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<String>,
    /// Any other field the raising side attached; passed through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ConflictInfo {
    pub fn new(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        expected_version: i64,
        actual_version: i64,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            expected_version,
            actual_version,
            updated_at: None,
            updated_by: None,
            extra: Map::new(),
        }
    }

    pub fn updated_by(mut self, user_id: impl Into<String>, at: DateTime<Utc>) -> Self {
        self.updated_by = Some(user_id.into());
        self.updated_at = Some(at);
        self
    }
}

/// Typed conflict raised by write operations.
#[derive(Debug, Clone)]
pub struct OptimisticLockError {
    pub conflict: ConflictInfo,
}

impl fmt::Display for OptimisticLockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Optimistic lock conflict on {} {}: expected version {}, found {}",
            self.conflict.entity_type,
            self.conflict.entity_id,
            self.conflict.expected_version,
            self.conflict.actual_version
        )
    }
}

impl std::error::Error for OptimisticLockError {}

impl OptimisticLockError {
    pub fn new(conflict: ConflictInfo) -> Self {
        Self { conflict }
    }

    /// Wire shape understood by [`detect_conflict_value`].
    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "name": OPTIMISTIC_LOCK_NAME,
            "code": OPTIMISTIC_LOCK_CODE,
            "message": self.to_string(),
            "conflict": self.conflict,
        })
    }
}

/// Opaque error body received across a module or process boundary.
#[derive(Debug, Clone)]
pub struct RemoteError {
    pub body: Value,
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = self.body.get("message").and_then(Value::as_str).unwrap_or("unknown");
        write!(f, "remote error: {}", message)
    }
}

impl std::error::Error for RemoteError {}

impl RemoteError {
    pub fn new(body: Value) -> Self {
        Self { body }
    }
}

/// Conflict fields if `body` has the optimistic-lock shape.
pub fn detect_conflict_value(body: &Value) -> Option<ConflictInfo> {
    let object = body.as_object()?;
    let named = object.get("name").and_then(Value::as_str) == Some(OPTIMISTIC_LOCK_NAME);
    let coded = object.get("code").and_then(Value::as_str) == Some(OPTIMISTIC_LOCK_CODE);
    if !named && !coded {
        return None;
    }

    let fields = object.get("conflict").unwrap_or(body);
    serde_json::from_value(fields.clone()).ok()
}

/// Walk the cause chain looking for a conflict in any of its shapes.
pub fn detect_conflict(error: &anyhow::Error) -> Option<ConflictInfo> {
    error.chain().find_map(|cause| {
        if let Some(typed) = cause.downcast_ref::<OptimisticLockError>() {
            return Some(typed.conflict.clone());
        }
        if let Some(remote) = cause.downcast_ref::<RemoteError>() {
            return detect_conflict_value(&remote.body);
        }
        if let Some(access) = cause.downcast_ref::<AccessError>() {
            if access.code() == ErrorCode::OptimisticLockConflict {
                return access.conflict_payload().and_then(|v| serde_json::from_value(v.clone()).ok());
            }
        }
        None
    })
}

/// Translate any error into the client-facing error.
///
/// Conflicts become 409 with `updatedByEmail` resolved best-effort; a failed
/// identity lookup leaves it `null`.
pub async fn translate_error(error: anyhow::Error, identities: &dyn IdentityLookup) -> AccessError {
    let Some(conflict) = detect_conflict(&error) else {
        return AccessError::from(error);
    };

    let email = match conflict.updated_by.as_deref() {
        Some(user_id) => match identities.email_for(&UserId::new(user_id)).await {
            Ok(email) => email,
            Err(e) => {
                warn!(user_id, error = %e, "Could not resolve email of conflicting writer");
                None
            }
        },
        None => None,
    };

    let mut payload = match serde_json::to_value(&conflict) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    };
    payload.insert(
        "updatedByEmail".to_string(),
        email.map(Value::String).unwrap_or(Value::Null),
    );

    AccessError::conflict(CONFLICT_MESSAGE, Value::Object(payload))
        .with_internal_message(error.to_string())
}
