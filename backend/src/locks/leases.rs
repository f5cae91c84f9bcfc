//! Exclusive leases on transfers.
//!
//! A lease counts only while it is live: not past `expires_at`, and heartbeated within the grace
//! period. Every reader treats a stale lease as absent and reclaims it on sight, so a crashed
//! packer never blocks a transfer for longer than the heartbeat grace.
//!
//! Acquisition is two conditional writes. First we try to renew the lease as if we already held
//! it. If that is refused, we try to claim it as if it were free or stale. Only when both are
//! refused do we read the row to learn who is in the way. The read never feeds a write.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;

use super::{AcquireOutcome, Conflict, LockError, LockSettings};
use crate::audit::AuditSink;
use crate::ids::{Id, IdType};
use crate::store::{
    AuditAction, ClaimOutcome, Lease, LeaseRenewal, LockStore, ResourceId, StaleCutoff,
    Staleness, UserId,
};
use crate::utils::time::{date_time_iso_str, Clock};

/// Times we go around renew / claim / read before giving up with `Conflict::UnknownHolder`. Each
/// extra round only happens when the lease changed hands between our writes and our read.
const MAX_ACQUIRE_ATTEMPTS: usize = 3;

#[derive(Clone)]
pub struct LeaseManager {
    store: Arc<dyn LockStore>,
    audit: AuditSink,
    clock: Arc<dyn Clock>,
    settings: LockSettings,
}

impl LeaseManager {
    pub fn new(
        store: Arc<dyn LockStore>,
        audit: AuditSink,
        clock: Arc<dyn Clock>,
        settings: LockSettings,
    ) -> Self {
        Self {
            store,
            audit,
            clock,
            settings,
        }
    }

    pub fn settings(&self) -> &LockSettings {
        &self.settings
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub(crate) fn cutoff(&self, now: DateTime<Utc>) -> StaleCutoff {
        StaleCutoff::new(now, self.settings.heartbeat_grace)
    }

    /// Take the lock for `caller_id`, or extend it if the caller already holds it.
    pub async fn acquire(
        &self,
        resource_id: &ResourceId,
        caller_id: UserId,
        client_tag: Option<String>,
    ) -> Result<AcquireOutcome, LockError> {
        for attempt in 1..=MAX_ACQUIRE_ATTEMPTS {
            let now = self.clock.now();
            let cutoff = self.cutoff(now);

            let renewal = LeaseRenewal {
                expires_at: now + self.settings.lease_ttl,
                heartbeat_at: now,
                client_tag: client_tag.clone(),
            };
            if let Some(lease) = self
                .store
                .renew_lease(resource_id, caller_id, &renewal, &cutoff)
                .await?
            {
                return Ok(AcquireOutcome::Granted {
                    lease,
                    already_held: true,
                });
            }

            let lease = self.new_lease(resource_id, caller_id, now, client_tag.clone());
            if let ClaimOutcome::Claimed { replaced } =
                self.store.claim_lease(&lease, &cutoff).await?
            {
                if let Some(replaced) = replaced.as_ref() {
                    self.record_reclaimed(replaced, &cutoff).await;
                }
                self.audit
                    .record(
                        resource_id,
                        caller_id,
                        AuditAction::Acquire,
                        "granted",
                        json!({
                            "lease_id": &lease.lease_id,
                            "expires_at": date_time_iso_str(&lease.expires_at),
                            "client_tag": &lease.client_tag,
                        }),
                    )
                    .await;
                return Ok(AcquireOutcome::Granted {
                    lease,
                    already_held: false,
                });
            }

            match self.store.get_lease(resource_id).await? {
                Some(holder) if holder.holder_id != caller_id && !holder.is_stale(&cutoff) => {
                    return Ok(AcquireOutcome::Conflict(Conflict::KnownHolder(holder)));
                }
                _ => {
                    log::debug!(
                        "Lease on {} changed hands during acquire by user {} (attempt {})",
                        resource_id,
                        caller_id,
                        attempt
                    );
                }
            }
        }
        Ok(AcquireOutcome::Conflict(Conflict::UnknownHolder))
    }

    /// Renew the caller's live lease. A caller whose lease went stale has lost it; the stale row is
    /// reclaimed on the way out.
    pub async fn heartbeat(
        &self,
        resource_id: &ResourceId,
        caller_id: UserId,
        client_tag: Option<String>,
    ) -> Result<Lease, LockError> {
        let now = self.clock.now();
        let cutoff = self.cutoff(now);
        let renewal = LeaseRenewal {
            expires_at: now + self.settings.lease_ttl,
            heartbeat_at: now,
            client_tag,
        };
        if let Some(lease) = self
            .store
            .renew_lease(resource_id, caller_id, &renewal, &cutoff)
            .await?
        {
            return Ok(lease);
        }

        if let Some(lease) = self.store.get_lease(resource_id).await? {
            if lease.holder_id == caller_id && lease.is_stale(&cutoff) {
                if let Some(lost) = self.store.delete_stale_lease(resource_id, &cutoff).await? {
                    log::info!(
                        "User {} lost lease {} on {} before heartbeating",
                        caller_id,
                        lost.lease_id,
                        resource_id
                    );
                    self.audit
                        .record(
                            resource_id,
                            caller_id,
                            AuditAction::HeartbeatLost,
                            "reclaimed",
                            lease_metadata(&lost),
                        )
                        .await;
                }
            }
        }
        Err(LockError::NotHolder)
    }

    /// Give the lock up. Without `force` only the holder may release it. Returns whether a lease
    /// was deleted.
    pub async fn release(
        &self,
        resource_id: &ResourceId,
        caller_id: UserId,
        force: bool,
    ) -> Result<bool, LockError> {
        let holder_filter = if force { None } else { Some(caller_id) };
        if let Some(released) = self.store.delete_lease(resource_id, holder_filter).await? {
            let mut metadata = lease_metadata(&released);
            metadata["holder_id"] = json!(released.holder_id);
            metadata["force"] = json!(force);
            self.audit
                .record(
                    resource_id,
                    caller_id,
                    AuditAction::Release,
                    "released",
                    metadata,
                )
                .await;
            return Ok(true);
        }

        if !force {
            let cutoff = self.cutoff(self.clock.now());
            if let Some(lease) = self.store.get_lease(resource_id).await? {
                if lease.holder_id != caller_id && !lease.is_stale(&cutoff) {
                    return Err(LockError::NotHolder);
                }
            }
        }
        Ok(false)
    }

    /// The live lease on the resource, if any. A stale lease is reclaimed and reported as absent.
    pub async fn get(&self, resource_id: &ResourceId) -> Result<Option<Lease>, LockError> {
        let lease = match self.store.get_lease(resource_id).await? {
            Some(lease) => lease,
            None => return Ok(None),
        };
        let cutoff = self.cutoff(self.clock.now());
        if !lease.is_stale(&cutoff) {
            return Ok(Some(lease));
        }
        self.reclaim_if_stale(resource_id).await?;
        Ok(None)
    }

    /// Delete the lease if it is stale right now, and record why it went. Returns the removed
    /// lease.
    pub async fn reclaim_if_stale(
        &self,
        resource_id: &ResourceId,
    ) -> Result<Option<Lease>, LockError> {
        let cutoff = self.cutoff(self.clock.now());
        let reclaimed = self.store.delete_stale_lease(resource_id, &cutoff).await?;
        if let Some(lease) = reclaimed.as_ref() {
            self.record_reclaimed(lease, &cutoff).await;
        }
        Ok(reclaimed)
    }

    /// Hand the lease to `to_holder` in one write, provided it is still held by `from_holder`, is
    /// free, or is stale. Returns the new lease, or `None` if someone else got there first.
    pub(crate) async fn transfer(
        &self,
        resource_id: &ResourceId,
        from_holder: UserId,
        to_holder: UserId,
        client_tag: Option<String>,
    ) -> Result<Option<Lease>, LockError> {
        let now = self.clock.now();
        let cutoff = self.cutoff(now);
        let lease = self.new_lease(resource_id, to_holder, now, client_tag);
        match self
            .store
            .transfer_lease(&lease, from_holder, &cutoff)
            .await?
        {
            ClaimOutcome::Claimed { .. } => Ok(Some(lease)),
            ClaimOutcome::Refused => Ok(None),
        }
    }

    fn new_lease(
        &self,
        resource_id: &ResourceId,
        holder_id: UserId,
        now: DateTime<Utc>,
        client_tag: Option<String>,
    ) -> Lease {
        Lease {
            resource_id: resource_id.clone(),
            holder_id,
            lease_id: Id::new(IdType::Lease).into_string(),
            acquired_at: now,
            expires_at: now + self.settings.lease_ttl,
            last_heartbeat_at: now,
            client_tag,
        }
    }

    async fn record_reclaimed(&self, lease: &Lease, cutoff: &StaleCutoff) {
        let action = match lease.staleness(cutoff) {
            Some(Staleness::HeartbeatLost) => AuditAction::HeartbeatLost,
            _ => AuditAction::Expire,
        };
        log::info!(
            "Reclaimed stale lease {} on {} from user {} ({})",
            lease.lease_id,
            lease.resource_id,
            lease.holder_id,
            action.as_str()
        );
        self.audit
            .record(
                &lease.resource_id,
                lease.holder_id,
                action,
                "reclaimed",
                lease_metadata(lease),
            )
            .await;
    }
}

fn lease_metadata(lease: &Lease) -> serde_json::Value {
    json!({
        "lease_id": &lease.lease_id,
        "expires_at": date_time_iso_str(&lease.expires_at),
        "last_heartbeat_at": date_time_iso_str(&lease.last_heartbeat_at),
    })
}
