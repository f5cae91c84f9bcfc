//! Append-only trail of lock transitions.
//!
//! Recording is best effort: a failed write is logged and swallowed so that it never changes the
//! outcome of the operation being audited.

use std::sync::Arc;

use crate::store::{AuditAction, AuditEvent, LockStore, ResourceId, StoreError, UserId};
use crate::utils::time::Clock;

#[derive(Clone)]
pub struct AuditSink {
    store: Arc<dyn LockStore>,
    clock: Arc<dyn Clock>,
}

impl AuditSink {
    pub fn new(store: Arc<dyn LockStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub async fn record(
        &self,
        resource_id: &ResourceId,
        actor_id: UserId,
        action: AuditAction,
        status: &str,
        metadata: serde_json::Value,
    ) {
        let event = AuditEvent {
            resource_id: resource_id.clone(),
            actor_id,
            action,
            status: status.to_string(),
            metadata,
            created_at: self.clock.now(),
        };
        if let Err(e) = self.store.append_audit(&event).await {
            log::error!(
                "Failed to record audit event {} on {} by user {}: {}",
                action.as_str(),
                resource_id,
                actor_id,
                e
            );
        }
    }

    /// Newest events first.
    pub async fn history(
        &self,
        resource_id: &ResourceId,
        limit: usize,
    ) -> Result<Vec<AuditEvent>, StoreError> {
        self.store.audit_history(resource_id, limit).await
    }
}
