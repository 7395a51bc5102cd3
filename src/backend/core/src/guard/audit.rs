//! Denial audit trail.
//!
//! Every denial is sent through a bounded channel to a task that writes it
//! under the `audit` tracing target. Reason codes never reach the client.
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{error, warn};

use crate::observability::metrics;
use crate::rbac::models::UserId;
use crate::rbac::policy::DenialReason;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessAuditEntry {
    pub timestamp: DateTime<Utc>,
    pub principal_id: Option<UserId>,
    pub resource_kind: &'static str,
    pub resource_id: String,
    pub action: String,
    pub reason: DenialReason,
}

impl AccessAuditEntry {
    pub fn new(
        principal_id: Option<&UserId>,
        resource_kind: &'static str,
        resource_id: impl Into<String>,
        action: impl Into<String>,
        reason: DenialReason,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            principal_id: principal_id.cloned(),
            resource_kind,
            resource_id: resource_id.into(),
            action: action.into(),
            reason,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuditLogger {
    sender: mpsc::Sender<AccessAuditEntry>,
}

impl AuditLogger {
    /// Spawns the writer task; must be called inside a tokio runtime.
    pub fn new(buf: usize) -> Self {
        let (logger, mut rx) = Self::channel(buf);
        tokio::spawn(async move {
            while let Some(e) = rx.recv().await {
                warn!(
                    target: "audit",
                    timestamp = %e.timestamp,
                    principal_id = e.principal_id.as_ref().map(UserId::as_str).unwrap_or("-"),
                    resource_kind = e.resource_kind,
                    resource_id = %e.resource_id,
                    action = %e.action,
                    reason = e.reason.as_str(),
                    "ACCESS DENIED"
                );
            }
        });
        logger
    }

    /// Logger plus the receiving end, for callers that consume entries themselves.
    pub fn channel(buf: usize) -> (Self, mpsc::Receiver<AccessAuditEntry>) {
        let (tx, rx) = mpsc::channel(buf.max(1));
        (Self { sender: tx }, rx)
    }

    pub async fn record(&self, entry: AccessAuditEntry) {
        metrics::record_denial(entry.reason.as_str());
        if let Err(e) = self.sender.send(entry).await {
            error!("Audit send failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_entries_reach_the_receiver() {
        let (logger, mut rx) = AuditLogger::channel(8);
        logger
            .record(AccessAuditEntry::new(
                Some(&UserId::new("carol")),
                "position",
                "pos-1",
                "capability:editContent",
                DenialReason::NotMemberOfAnyParent,
            ))
            .await;

        let entry = rx.recv().await.unwrap();
        assert_eq!(entry.principal_id, Some(UserId::new("carol")));
        assert_eq!(entry.reason, DenialReason::NotMemberOfAnyParent);
        assert_eq!(entry.resource_id, "pos-1");
    }

    #[test]
    fn test_entry_serializes_reason_code() {
        let entry = AccessAuditEntry::new(None, "department", "dep-9", "access", DenialReason::ResourceNotFound);
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["reason"], "resource_not_found");
        assert!(json["principal_id"].is_null());
    }
}
