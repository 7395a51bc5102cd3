//! Error handling for the access resolver.
//!
//! This module provides:
//! - A single error type (`AccessError`) carrying a stable `ErrorCode`
//! - HTTP status mapping for the guard taxonomy (401/403/404/409/500)
//! - User-safe messages kept apart from internal diagnostics
//! - Severity-driven logging and an error counter
//!
//! Only the user message ever crosses the HTTP boundary. The response body is
//! always `{ "error": message }`, except for optimistic-lock conflicts which
//! also carry `code` and the `conflict` payload.
//!
//! # Usage
//!
//! ```rust,ignore
//! use access_core::error::{AccessError, Result};
//!
//! fn load(raw: Option<&str>) -> Result<&str> {
//!     raw.ok_or_else(|| AccessError::not_found("Membership"))
//! }
//! ```

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use thiserror::Error;
use tracing::{error, warn};

// ═══════════════════════════════════════════════════════════════════════════════
// Result Type Alias
// ═══════════════════════════════════════════════════════════════════════════════

/// A specialized Result type for access operations.
pub type Result<T> = std::result::Result<T, AccessError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error codes.
///
/// The code decides the HTTP status; it is never written to the response body
/// for guard errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Access Errors (4000-4099)
    Unauthenticated,
    Forbidden,
    NotFound,

    // Write Errors (4100-4199)
    InvalidInput,
    OptimisticLockConflict,

    // Data Integrity (4200-4299)
    IntegrityError,

    // Database Errors (2000-2099)
    DatabaseError,
    DatabaseConnectionFailed,

    // Configuration Errors (5000-5099)
    ConfigurationError,

    // Internal Errors (9000-9099)
    InternalError,
}

impl ErrorCode {
    /// Get the numeric code for this error.
    pub const fn numeric_code(&self) -> u32 {
        match self {
            Self::Unauthenticated => 4000,
            Self::Forbidden => 4001,
            Self::NotFound => 4002,

            Self::InvalidInput => 4100,
            Self::OptimisticLockConflict => 4101,

            Self::IntegrityError => 4200,

            Self::DatabaseError => 2000,
            Self::DatabaseConnectionFailed => 2001,

            Self::ConfigurationError => 5000,

            Self::InternalError => 9000,
        }
    }

    /// Get the HTTP status code for this error.
    pub const fn http_status(&self) -> StatusCode {
        match self {
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::InvalidInput => StatusCode::BAD_REQUEST,
            Self::OptimisticLockConflict => StatusCode::CONFLICT,
            Self::DatabaseConnectionFailed => StatusCode::SERVICE_UNAVAILABLE,

            // A corrupted role value is a server fault, never a denial.
            Self::IntegrityError
            | Self::DatabaseError
            | Self::ConfigurationError
            | Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error category for grouping.
    pub const fn category(&self) -> &'static str {
        match self.numeric_code() {
            2000..=2099 => "database",
            4000..=4099 => "access",
            4100..=4199 => "write",
            4200..=4299 => "integrity",
            5000..=5099 => "configuration",
            9000..=9099 => "internal",
            _ => "unknown",
        }
    }

    /// Stable wire form, e.g. `OPTIMISTIC_LOCK_CONFLICT`.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "UNAUTHENTICATED",
            Self::Forbidden => "FORBIDDEN",
            Self::NotFound => "NOT_FOUND",
            Self::InvalidInput => "INVALID_INPUT",
            Self::OptimisticLockConflict => "OPTIMISTIC_LOCK_CONFLICT",
            Self::IntegrityError => "INTEGRITY_ERROR",
            Self::DatabaseError => "DATABASE_ERROR",
            Self::DatabaseConnectionFailed => "DATABASE_CONNECTION_FAILED",
            Self::ConfigurationError => "CONFIGURATION_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Severity
// ═══════════════════════════════════════════════════════════════════════════════

/// Severity level for errors (affects logging).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Expected denials and bad input
    Low,
    /// Concurrent-write conflicts
    Medium,
    /// Storage and configuration failures
    High,
    /// Corrupted persisted state or internal bugs
    Critical,
}

impl ErrorSeverity {
    /// Get severity based on error code.
    pub const fn from_code(code: &ErrorCode) -> Self {
        match code {
            ErrorCode::Unauthenticated
            | ErrorCode::Forbidden
            | ErrorCode::NotFound
            | ErrorCode::InvalidInput => Self::Low,

            ErrorCode::OptimisticLockConflict => Self::Medium,

            ErrorCode::DatabaseError
            | ErrorCode::DatabaseConnectionFailed
            | ErrorCode::ConfigurationError => Self::High,

            ErrorCode::IntegrityError | ErrorCode::InternalError => Self::Critical,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Main Error Type
// ═══════════════════════════════════════════════════════════════════════════════

/// The error type returned by guards, stores and the translation layer.
#[derive(Error, Debug)]
pub struct AccessError {
    /// Machine-readable error code
    code: ErrorCode,

    /// User-friendly error message (safe to expose to clients)
    user_message: Cow<'static, str>,

    /// Detailed internal message (for logging only)
    internal_message: Option<String>,

    /// Conflict payload, only set for `OptimisticLockConflict`
    conflict: Option<serde_json::Value>,

    /// The source error that caused this error
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl fmt::Display for AccessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.user_message)?;
        if let Some(ref internal) = self.internal_message {
            write!(f, " (internal: {})", internal)?;
        }
        Ok(())
    }
}

impl AccessError {
    // ─────────────────────────────────────────────────────────────────────────
    // Constructors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a new error with code and user message.
    pub fn new(code: ErrorCode, user_message: impl Into<Cow<'static, str>>) -> Self {
        let error = Self {
            code,
            user_message: user_message.into(),
            internal_message: None,
            conflict: None,
            source: None,
        };
        error.record_metrics();
        error
    }

    /// Create an error with both user and internal messages.
    pub fn with_internal(
        code: ErrorCode,
        user_message: impl Into<Cow<'static, str>>,
        internal_message: impl Into<String>,
    ) -> Self {
        let mut error = Self::new(code, user_message);
        error.internal_message = Some(internal_message.into());
        error
    }

    /// Create an internal error (500).
    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_internal(ErrorCode::InternalError, "An internal error occurred", message)
    }

    /// No principal could be resolved from the request (401).
    pub fn unauthenticated() -> Self {
        Self::new(ErrorCode::Unauthenticated, "Authentication required")
    }

    /// Membership absent or too weak (403).
    pub fn forbidden(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::Forbidden, message)
    }

    /// Resource absent, or reachable through no junction row (404).
    pub fn not_found(entity_type: &str) -> Self {
        Self::new(ErrorCode::NotFound, format!("{} not found", entity_type))
    }

    /// Create a validation error.
    pub fn invalid_input(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    /// A persisted role value outside the known enumeration.
    pub fn integrity(domain: &str, tenant_id: &str, user_id: &str, raw_role: &str) -> Self {
        Self::with_internal(
            ErrorCode::IntegrityError,
            "An internal error occurred",
            format!(
                "unknown {} role '{}' stored for user {} in tenant {}",
                domain, raw_role, user_id, tenant_id
            ),
        )
    }

    /// Optimistic-lock conflict carrying the serialized conflict fields.
    pub fn conflict(message: impl Into<Cow<'static, str>>, conflict: serde_json::Value) -> Self {
        let mut error = Self::new(ErrorCode::OptimisticLockConflict, message);
        error.conflict = Some(conflict);
        error
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::ConfigurationError,
            "Configuration error",
            message,
        )
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Builder Methods
    // ─────────────────────────────────────────────────────────────────────────

    /// Add a source error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    /// Add internal message.
    pub fn with_internal_message(mut self, message: impl Into<String>) -> Self {
        self.internal_message = Some(message.into());
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    /// Get the error code.
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// Get the user-friendly message.
    pub fn user_message(&self) -> &str {
        &self.user_message
    }

    /// Get the internal message (if any).
    pub fn internal_message(&self) -> Option<&str> {
        self.internal_message.as_deref()
    }

    /// Get the conflict payload (if any).
    pub fn conflict_payload(&self) -> Option<&serde_json::Value> {
        self.conflict.as_ref()
    }

    /// Get the HTTP status code.
    pub fn http_status(&self) -> StatusCode {
        self.code.http_status()
    }

    /// Get the error severity.
    pub fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::from_code(&self.code)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Logging
    // ─────────────────────────────────────────────────────────────────────────

    /// Log this error with appropriate severity.
    pub fn log(&self) {
        let code = self.code.to_string();
        let category = self.code.category();
        let status = self.http_status().as_u16();

        match self.severity() {
            ErrorSeverity::Critical => {
                error!(
                    error_code = %code,
                    category = category,
                    http_status = status,
                    user_message = %self.user_message,
                    internal_message = ?self.internal_message,
                    source = ?self.source,
                    "CRITICAL ERROR"
                );
            }
            ErrorSeverity::High => {
                error!(
                    error_code = %code,
                    category = category,
                    http_status = status,
                    user_message = %self.user_message,
                    internal_message = ?self.internal_message,
                    "High severity error"
                );
            }
            ErrorSeverity::Medium => {
                warn!(
                    error_code = %code,
                    category = category,
                    http_status = status,
                    user_message = %self.user_message,
                    "Medium severity error"
                );
            }
            ErrorSeverity::Low => {
                tracing::debug!(
                    error_code = %code,
                    category = category,
                    http_status = status,
                    user_message = %self.user_message,
                    "Low severity error"
                );
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Metrics
    // ─────────────────────────────────────────────────────────────────────────

    fn record_metrics(&self) {
        counter!(
            "access_errors_total",
            "code" => self.code.to_string(),
            "category" => self.code.category().to_string(),
            "severity" => format!("{:?}", self.severity()),
        )
        .increment(1);
    }

    /// JSON body written to clients.
    pub fn response_body(&self) -> serde_json::Value {
        match (&self.code, &self.conflict) {
            (ErrorCode::OptimisticLockConflict, Some(conflict)) => serde_json::json!({
                "error": self.user_message,
                "code": self.code.as_str(),
                "conflict": conflict,
            }),
            _ => serde_json::json!({ "error": self.user_message }),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Axum Integration
// ═══════════════════════════════════════════════════════════════════════════════

impl IntoResponse for AccessError {
    fn into_response(self) -> Response {
        self.log();

        let status = self.http_status();
        (status, Json(self.response_body())).into_response()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// From Implementations for Common Error Types
// ═══════════════════════════════════════════════════════════════════════════════

impl From<sqlx::Error> for AccessError {
    fn from(error: sqlx::Error) -> Self {
        let (code, user_msg) = match &error {
            sqlx::Error::RowNotFound => (ErrorCode::NotFound, "The requested record was not found"),
            sqlx::Error::Database(db_err) => {
                if let Some(constraint) = db_err.constraint() {
                    if constraint.contains("unique") || constraint.contains("pkey") {
                        return Self::with_internal(
                            ErrorCode::InvalidInput,
                            "A record with this identifier already exists",
                            format!("Constraint violation: {}", constraint),
                        )
                        .with_source(error);
                    }
                }
                (ErrorCode::DatabaseError, "A database error occurred")
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => (
                ErrorCode::DatabaseConnectionFailed,
                "Unable to connect to the database",
            ),
            _ => (ErrorCode::DatabaseError, "A database error occurred"),
        };

        Self::with_internal(code, user_msg, error.to_string()).with_source(error)
    }
}

impl From<serde_json::Error> for AccessError {
    fn from(error: serde_json::Error) -> Self {
        Self::with_internal(
            ErrorCode::InternalError,
            "Failed to process JSON data",
            error.to_string(),
        )
        .with_source(error)
    }
}

impl From<anyhow::Error> for AccessError {
    fn from(error: anyhow::Error) -> Self {
        match error.downcast::<AccessError>() {
            Ok(access_error) => access_error,
            Err(error) => Self::with_internal(
                ErrorCode::InternalError,
                "An internal error occurred",
                error.to_string(),
            ),
        }
    }
}

impl From<config::ConfigError> for AccessError {
    fn from(error: config::ConfigError) -> Self {
        Self::configuration(error.to_string())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_http_status() {
        assert_eq!(ErrorCode::Unauthenticated.http_status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ErrorCode::Forbidden.http_status(), StatusCode::FORBIDDEN);
        assert_eq!(ErrorCode::NotFound.http_status(), StatusCode::NOT_FOUND);
        assert_eq!(ErrorCode::OptimisticLockConflict.http_status(), StatusCode::CONFLICT);
        assert_eq!(
            ErrorCode::IntegrityError.http_status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_integrity_error_is_critical() {
        let error = AccessError::integrity("organization", "org-1", "bob", "bogus");
        assert_eq!(error.code(), ErrorCode::IntegrityError);
        assert_eq!(error.severity(), ErrorSeverity::Critical);
        assert!(error.internal_message().unwrap().contains("bogus"));
        assert!(!error.user_message().contains("bogus"));
    }

    #[test]
    fn test_response_body_only_carries_message() {
        let error = AccessError::with_internal(
            ErrorCode::Forbidden,
            "Access denied",
            "not_member_of_any_parent",
        );
        let body = error.response_body();
        assert_eq!(body, serde_json::json!({ "error": "Access denied" }));
    }

    #[test]
    fn test_conflict_body_shape() {
        let error = AccessError::conflict(
            "Record was modified by another user",
            serde_json::json!({ "entityId": "m-1", "updatedByEmail": null }),
        );
        let body = error.response_body();
        assert_eq!(body["code"], "OPTIMISTIC_LOCK_CONFLICT");
        assert_eq!(body["conflict"]["entityId"], "m-1");
        assert_eq!(body["error"], "Record was modified by another user");
    }

    #[test]
    fn test_anyhow_roundtrip_keeps_code() {
        let original = AccessError::forbidden("nope");
        let wrapped = anyhow::Error::new(original);
        let back = AccessError::from(wrapped);
        assert_eq!(back.code(), ErrorCode::Forbidden);
    }

    #[test]
    fn test_error_display() {
        let error = AccessError::with_internal(
            ErrorCode::DatabaseError,
            "A database error occurred",
            "Connection refused: localhost:5432",
        );

        let display = format!("{}", error);
        assert!(display.contains("DatabaseError"));
        assert!(display.contains("Connection refused"));
    }
}
