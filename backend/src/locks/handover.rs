//! Takeover requests.
//!
//! A user who finds the transfer locked by someone else can ask for it. The holder then has a
//! short window to accept or decline. If the holder says nothing, the request is granted
//! automatically once the window closes: silence means the holder walked away from the bench.
//!
//! Every request moves out of `pending` exactly once. Each transition is a conditional write keyed
//! on `pending` plus a deadline guard, so a late decision and an auto-grant can race and only one
//! of them wins.
//!
//! Overdue requests are settled lazily by whoever looks at the resource next, and by the
//! background reconciler. Both go through `reconcile`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;

use super::{AcquireOutcome, Conflict, DecideOutcome, Decision, LeaseManager, LockError};
use crate::audit::AuditSink;
use crate::store::{
    AuditAction, DeadlineGuard, Lease, LockStore, RequestDraft, RequestStatus, ResourceId,
    StoreError, TakeoverRequest, UserId,
};
use crate::utils::time::{date_time_iso_str, seconds_until};

#[derive(Clone)]
pub struct HandoverCoordinator {
    store: Arc<dyn LockStore>,
    leases: LeaseManager,
    audit: AuditSink,
}

/// Result of asking for a lock someone else holds.
#[derive(Clone, Debug, PartialEq)]
pub enum StartOutcome {
    /// The requester holds the lock, either already or because it was free.
    AlreadyHolder { lease: Lease },

    Pending {
        request: TakeoverRequest,
        holder: Lease,

        /// When the requester's countdown ends. Advisory only.
        requester_deadline: DateTime<Utc>,

        /// True when this repeated an earlier request instead of raising a new one.
        replayed: bool,
    },
}

/// What a polling client needs to know about the latest request on a resource.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RequestView {
    /// "none", or the status of the latest request.
    pub state: &'static str,
    pub request_id: Option<u64>,
    pub requester_id: Option<UserId>,
    pub holder_id: Option<UserId>,
    pub seconds_remaining_holder: i64,
    pub seconds_remaining_requester: i64,

    /// The caller is the live holder a pending request is waiting on.
    pub action_required: bool,
}

impl RequestView {
    fn none() -> Self {
        Self {
            state: "none",
            request_id: None,
            requester_id: None,
            holder_id: None,
            seconds_remaining_holder: 0,
            seconds_remaining_requester: 0,
            action_required: false,
        }
    }
}

impl HandoverCoordinator {
    pub fn new(store: Arc<dyn LockStore>, leases: LeaseManager, audit: AuditSink) -> Self {
        Self {
            store,
            leases,
            audit,
        }
    }

    /// Ask the current holder to hand the lock over to `requester_id`.
    pub async fn request_access(
        &self,
        resource_id: &ResourceId,
        requester_id: UserId,
        client_tag: Option<String>,
    ) -> Result<StartOutcome, LockError> {
        self.reconcile(resource_id).await?;
        let holder = match self.leases.get(resource_id).await? {
            Some(lease) if lease.holder_id == requester_id => {
                return Ok(StartOutcome::AlreadyHolder { lease });
            }
            Some(lease) => lease,
            None => match self
                .leases
                .acquire(resource_id, requester_id, client_tag.clone())
                .await?
            {
                AcquireOutcome::Granted { lease, .. } => {
                    return Ok(StartOutcome::AlreadyHolder { lease });
                }
                AcquireOutcome::Conflict(Conflict::KnownHolder(lease)) => lease,
                AcquireOutcome::Conflict(Conflict::UnknownHolder) => {
                    return Err(StoreError::Unavailable(format!(
                        "lock on {} is changing hands, try again",
                        resource_id
                    ))
                    .into());
                }
            },
        };

        let settings = self.leases.settings();
        let now = self.leases.now();
        let draft = RequestDraft {
            resource_id: resource_id.clone(),
            requester_id,
            holder_id: holder.holder_id,
            requested_at: now,
            decision_deadline: now + settings.holder_window,
            client_tag,
        };
        let opened = self
            .store
            .open_request(&draft, now - settings.duplicate_window)
            .await?;
        let request = opened.request;

        if !opened.replayed {
            log::info!(
                "User {} requested {} from user {} (request {})",
                requester_id,
                resource_id,
                holder.holder_id,
                request.id
            );
            self.audit
                .record(
                    resource_id,
                    requester_id,
                    AuditAction::Request,
                    RequestStatus::Pending.as_str(),
                    json!({
                        "request_id": request.id,
                        "holder_id": request.holder_id,
                        "decision_deadline": date_time_iso_str(&request.decision_deadline),
                    }),
                )
                .await;
        }

        Ok(StartOutcome::Pending {
            requester_deadline: request.requested_at + settings.requester_window,
            request,
            holder,
            replayed: opened.replayed,
        })
    }

    /// The holder's answer to the latest request on the resource.
    pub async fn decide(
        &self,
        resource_id: &ResourceId,
        caller_id: UserId,
        decision: Decision,
    ) -> Result<DecideOutcome, LockError> {
        let request = self
            .reconcile(resource_id)
            .await?
            .ok_or(LockError::NotFound)?;
        if request.status.is_terminal() {
            return Ok(DecideOutcome::AlreadyFinal(request.status));
        }
        // Only the holder the request was raised against may answer it.
        match self.leases.get(resource_id).await? {
            Some(lease) if lease.holder_id == caller_id && request.holder_id == caller_id => {}
            _ => return Err(LockError::NotHolder),
        }

        let now = self.leases.now();
        let status = match decision {
            Decision::Accept => RequestStatus::Accepted,
            Decision::Decline => RequestStatus::Declined,
        };
        let finished = self
            .store
            .finish_request(
                resource_id,
                request.id,
                status,
                now,
                DeadlineGuard::Open { at: now },
            )
            .await?;
        if !finished {
            // Too late: the deadline passed or someone settled it first. Settle it now if it is
            // still hanging so the caller sees the final status.
            self.reconcile(resource_id).await?;
            let final_status = self
                .store
                .get_request(resource_id, request.id)
                .await?
                .map(|r| r.status)
                .filter(RequestStatus::is_terminal)
                .unwrap_or(RequestStatus::Expired);
            return Ok(DecideOutcome::AlreadyFinal(final_status));
        }

        match decision {
            Decision::Decline => {
                self.audit
                    .record(
                        resource_id,
                        caller_id,
                        AuditAction::Decide,
                        status.as_str(),
                        json!({
                            "request_id": request.id,
                            "requester_id": request.requester_id,
                        }),
                    )
                    .await;
                Ok(DecideOutcome::Declined)
            }
            Decision::Accept => {
                let lease = self
                    .hand_over(&request, caller_id, AuditAction::Decide)
                    .await?;
                Ok(DecideOutcome::Accepted { lease })
            }
        }
    }

    /// Settle the latest request if it is pending and its window has closed. Returns the latest
    /// request as it stands afterwards. Safe to call any number of times.
    pub async fn reconcile(
        &self,
        resource_id: &ResourceId,
    ) -> Result<Option<TakeoverRequest>, LockError> {
        let request = match self.store.latest_request(resource_id).await? {
            Some(request) => request,
            None => return Ok(None),
        };
        let now = self.leases.now();
        if request.status != RequestStatus::Pending || request.decision_deadline >= now {
            return Ok(Some(request));
        }

        let third_party = match self.leases.get(resource_id).await? {
            Some(lease)
                if lease.holder_id != request.holder_id
                    && lease.holder_id != request.requester_id =>
            {
                Some(lease.holder_id)
            }
            _ => None,
        };

        let guard = DeadlineGuard::Passed { at: now };
        match third_party {
            Some(current_holder) => {
                if self
                    .store
                    .finish_request(resource_id, request.id, RequestStatus::Expired, now, guard)
                    .await?
                {
                    log::info!(
                        "Request {} on {} expired; lock moved on to user {}",
                        request.id,
                        resource_id,
                        current_holder
                    );
                    self.audit
                        .record(
                            resource_id,
                            request.requester_id,
                            AuditAction::Request,
                            RequestStatus::Expired.as_str(),
                            json!({
                                "request_id": request.id,
                                "holder_id": current_holder,
                            }),
                        )
                        .await;
                }
            }
            None => {
                if self
                    .store
                    .finish_request(resource_id, request.id, RequestStatus::Accepted, now, guard)
                    .await?
                {
                    self.hand_over(&request, request.requester_id, AuditAction::AutoGrant)
                        .await?;
                }
            }
        }

        Ok(self
            .store
            .get_request(resource_id, request.id)
            .await?
            .or(Some(request)))
    }

    /// Expire an overdue request that is no longer the latest one on its resource. Such requests
    /// are never acted upon; this only closes them out. Returns whether the request changed.
    pub async fn expire_superseded(
        &self,
        resource_id: &ResourceId,
        request_id: u64,
    ) -> Result<bool, LockError> {
        let request = match self.store.get_request(resource_id, request_id).await? {
            Some(request) => request,
            None => return Ok(false),
        };
        let now = self.leases.now();
        let expired = self
            .store
            .finish_request(
                resource_id,
                request_id,
                RequestStatus::Expired,
                now,
                DeadlineGuard::Passed { at: now },
            )
            .await?;
        if expired {
            self.audit
                .record(
                    resource_id,
                    request.requester_id,
                    AuditAction::Request,
                    RequestStatus::Expired.as_str(),
                    json!({
                        "request_id": request_id,
                        "holder_id": request.holder_id,
                        "superseded": true,
                    }),
                )
                .await;
        }
        Ok(expired)
    }

    /// Pending requests that `holder_id` should be answering right now.
    pub async fn pending_requests_for_holder(
        &self,
        resource_id: &ResourceId,
        holder_id: UserId,
    ) -> Result<Vec<TakeoverRequest>, LockError> {
        self.reconcile(resource_id).await?;
        let lease = match self.leases.get(resource_id).await? {
            Some(lease) if lease.holder_id == holder_id => lease,
            _ => return Ok(vec![]),
        };
        let now = self.leases.now();
        Ok(self
            .store
            .pending_requests(resource_id)
            .await?
            .into_iter()
            .filter(|r| {
                r.holder_id == holder_id
                    && r.decision_deadline >= now
                    && r.requested_at >= lease.acquired_at
            })
            .collect())
    }

    /// Settle, then describe the latest request from the point of view of `caller_id`.
    pub async fn request_state(
        &self,
        resource_id: &ResourceId,
        caller_id: UserId,
    ) -> Result<RequestView, LockError> {
        let request = match self.reconcile(resource_id).await? {
            Some(request) => request,
            None => return Ok(RequestView::none()),
        };
        let now = self.leases.now();
        let pending = request.status == RequestStatus::Pending;
        let action_required = pending
            && request.holder_id == caller_id
            && self
                .leases
                .get(resource_id)
                .await?
                .map(|lease| lease.holder_id == caller_id)
                .unwrap_or(false);
        let requester_deadline = request.requested_at + self.leases.settings().requester_window;

        Ok(RequestView {
            state: request.status.as_str(),
            request_id: Some(request.id),
            requester_id: Some(request.requester_id),
            holder_id: Some(request.holder_id),
            seconds_remaining_holder: if pending {
                seconds_until(&now, &request.decision_deadline)
            } else {
                0
            },
            seconds_remaining_requester: if pending {
                seconds_until(&now, &requester_deadline)
            } else {
                0
            },
            action_required,
        })
    }

    /// Move the lease to the requester of an accepted request and cancel everything it supersedes.
    async fn hand_over(
        &self,
        request: &TakeoverRequest,
        actor_id: UserId,
        action: AuditAction,
    ) -> Result<Option<Lease>, LockError> {
        let resource_id = &request.resource_id;
        let lease = self
            .leases
            .transfer(
                resource_id,
                request.holder_id,
                request.requester_id,
                request.client_tag.clone(),
            )
            .await?;
        if lease.is_none() {
            log::warn!(
                "Request {} on {} was accepted but the lease had already moved on",
                request.id,
                resource_id
            );
        }

        self.audit
            .record(
                resource_id,
                actor_id,
                action,
                RequestStatus::Accepted.as_str(),
                json!({
                    "request_id": request.id,
                    "requester_id": request.requester_id,
                    "holder_id": request.holder_id,
                    "transferred": lease.is_some(),
                }),
            )
            .await;
        if let Some(lease) = lease.as_ref() {
            log::info!(
                "Handed {} from user {} to user {} (request {})",
                resource_id,
                request.holder_id,
                request.requester_id,
                request.id
            );
            self.audit
                .record(
                    resource_id,
                    request.requester_id,
                    AuditAction::Acquire,
                    "granted",
                    json!({
                        "lease_id": &lease.lease_id,
                        "request_id": request.id,
                        "from_holder_id": request.holder_id,
                    }),
                )
                .await;
        }

        self.cancel_superseded(request).await?;
        Ok(lease)
    }

    async fn cancel_superseded(&self, accepted: &TakeoverRequest) -> Result<(), LockError> {
        let resource_id = &accepted.resource_id;
        let now = self.leases.now();
        for request in self.store.pending_requests(resource_id).await? {
            if request.id == accepted.id {
                continue;
            }
            let cancelled = self
                .store
                .finish_request(
                    resource_id,
                    request.id,
                    RequestStatus::Cancelled,
                    now,
                    DeadlineGuard::Any,
                )
                .await?;
            if cancelled {
                self.audit
                    .record(
                        resource_id,
                        request.requester_id,
                        AuditAction::Request,
                        RequestStatus::Cancelled.as_str(),
                        json!({
                            "request_id": request.id,
                            "superseded_by": accepted.id,
                        }),
                    )
                    .await;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::locks::LockSettings;
    use crate::testing::fixtures::TestLocks;

    fn transfer(id: &str) -> ResourceId {
        ResourceId::parse(id).unwrap()
    }

    fn pending(outcome: StartOutcome) -> TakeoverRequest {
        match outcome {
            StartOutcome::Pending { request, .. } => request,
            other => unreachable!("Expected a pending request, got {:?}", other),
        }
    }

    async fn locked_by(locks: &TestLocks, resource_id: &ResourceId, holder_id: UserId) {
        match locks.leases.acquire(resource_id, holder_id, None).await.unwrap() {
            AcquireOutcome::Granted { .. } => {}
            other => unreachable!("Expected lock to be granted, got {:?}", other),
        }
    }

    async fn holder_of(locks: &TestLocks, resource_id: &ResourceId) -> Option<UserId> {
        locks
            .leases
            .get(resource_id)
            .await
            .unwrap()
            .map(|l| l.holder_id)
    }

    #[tokio::test]
    async fn test_pack_handover_walkthrough() {
        let locks = TestLocks::new();
        let t1 = transfer("T1");
        let (alice, bob) = (1, 2);

        // 1. Alice takes the lock on an empty store.
        match locks.leases.acquire(&t1, alice, None).await.unwrap() {
            AcquireOutcome::Granted { lease, .. } => {
                assert_eq!(lease.expires_at, locks.clock.now() + chrono::Duration::seconds(3600))
            }
            other => unreachable!("Expected lock to be granted, got {:?}", other),
        }

        // 2. Bob is told Alice has it.
        match locks.leases.acquire(&t1, bob, None).await.unwrap() {
            AcquireOutcome::Conflict(Conflict::KnownHolder(lease)) => {
                assert_eq!(lease.holder_id, alice)
            }
            other => unreachable!("Expected conflict, got {:?}", other),
        }

        // 3. Bob asks for it. Alice has ten seconds.
        let outcome = locks.handover.request_access(&t1, bob, None).await.unwrap();
        let request = match outcome {
            StartOutcome::Pending {
                request,
                holder,
                requester_deadline,
                replayed,
            } => {
                assert_eq!(holder.holder_id, alice);
                assert!(!replayed);
                assert_eq!(
                    request.decision_deadline,
                    locks.clock.now() + chrono::Duration::seconds(10)
                );
                assert_eq!(
                    requester_deadline,
                    locks.clock.now() + chrono::Duration::seconds(5)
                );
                request
            }
            other => unreachable!("Expected a pending request, got {:?}", other),
        };
        let view = locks.handover.request_state(&t1, alice).await.unwrap();
        assert_eq!(view.state, "pending");
        assert!(view.action_required);
        assert_eq!(view.seconds_remaining_holder, 10);

        // 4. Alice says nothing. Bob's next poll settles it in his favor.
        locks.clock.advance_secs(11);
        let view = locks.handover.request_state(&t1, bob).await.unwrap();
        assert_eq!(view.state, "accepted");
        assert_eq!(view.request_id, Some(request.id));
        assert!(!view.action_required);
        assert_eq!(holder_of(&locks, &t1).await, Some(bob));

        // 5. Alice's late accept changes nothing.
        assert_eq!(
            locks.handover.decide(&t1, alice, Decision::Accept).await.unwrap(),
            DecideOutcome::AlreadyFinal(RequestStatus::Accepted)
        );
        assert_eq!(holder_of(&locks, &t1).await, Some(bob));

        let actions = locks.audit_actions(&t1).await;
        assert_eq!(
            actions,
            vec![
                AuditAction::Acquire,
                AuditAction::Request,
                AuditAction::AutoGrant,
                AuditAction::Acquire,
            ]
        );
    }

    #[tokio::test]
    async fn test_silent_holder_lease_expires_and_is_reclaimed() {
        let locks = TestLocks::new();
        let t2 = transfer("T2");
        let (alice, carol) = (1, 3);

        locked_by(&locks, &t2, alice).await;
        locks.clock.advance_secs(90 + 3600 + 1);
        locked_by(&locks, &t2, carol).await;

        assert_eq!(holder_of(&locks, &t2).await, Some(carol));
        let history = locks.audit.history(&t2, 10).await.unwrap();
        assert!(history
            .iter()
            .any(|e| e.action == AuditAction::Expire && e.actor_id == alice));
    }

    #[tokio::test]
    async fn test_auto_grant_happens_exactly_once() {
        let locks = TestLocks::new();
        let t1 = transfer("T1");
        locked_by(&locks, &t1, 1).await;
        let request = pending(locks.handover.request_access(&t1, 2, None).await.unwrap());

        locks.clock.advance_secs(11);
        for _ in 0..3 {
            let settled = locks.handover.reconcile(&t1).await.unwrap().unwrap();
            assert_eq!(settled.id, request.id);
            assert_eq!(settled.status, RequestStatus::Accepted);
        }

        let grants = locks
            .audit_actions(&t1)
            .await
            .into_iter()
            .filter(|a| *a == AuditAction::AutoGrant)
            .count();
        assert_eq!(grants, 1);
        assert_eq!(holder_of(&locks, &t1).await, Some(2));
    }

    #[tokio::test]
    async fn test_holder_accepts_and_cancels_other_requests() {
        let locks = TestLocks::new();
        let t1 = transfer("T1");
        locked_by(&locks, &t1, 1).await;

        let first = pending(locks.handover.request_access(&t1, 2, None).await.unwrap());
        locks.clock.advance_secs(1);
        let second = pending(locks.handover.request_access(&t1, 3, None).await.unwrap());
        assert!(second.id > first.id);

        let pending_for_holder = locks
            .handover
            .pending_requests_for_holder(&t1, 1)
            .await
            .unwrap();
        assert_eq!(pending_for_holder.len(), 2);
        assert!(locks
            .handover
            .pending_requests_for_holder(&t1, 2)
            .await
            .unwrap()
            .is_empty());

        // Only the latest request is acted upon.
        match locks.handover.decide(&t1, 1, Decision::Accept).await.unwrap() {
            DecideOutcome::Accepted { lease: Some(lease) } => assert_eq!(lease.holder_id, 3),
            other => unreachable!("Expected accepted handover, got {:?}", other),
        }
        assert_eq!(holder_of(&locks, &t1).await, Some(3));

        let cancelled = locks.store.get_request(&t1, first.id).await.unwrap().unwrap();
        assert_eq!(cancelled.status, RequestStatus::Cancelled);
        assert!(locks.store.pending_requests(&t1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_decline_keeps_lease_and_is_final() {
        let locks = TestLocks::new();
        let t1 = transfer("T1");
        locked_by(&locks, &t1, 1).await;
        pending(locks.handover.request_access(&t1, 2, None).await.unwrap());

        assert_eq!(
            locks.handover.decide(&t1, 1, Decision::Decline).await.unwrap(),
            DecideOutcome::Declined
        );
        assert_eq!(holder_of(&locks, &t1).await, Some(1));

        // The window passing afterwards does not revive it.
        locks.clock.advance_secs(30);
        assert_eq!(
            locks.handover.decide(&t1, 1, Decision::Accept).await.unwrap(),
            DecideOutcome::AlreadyFinal(RequestStatus::Declined)
        );
        assert_eq!(
            locks.handover.request_state(&t1, 2).await.unwrap().state,
            "declined"
        );
        assert_eq!(holder_of(&locks, &t1).await, Some(1));
    }

    #[tokio::test]
    async fn test_only_live_holder_may_decide() {
        let locks = TestLocks::new();
        let t1 = transfer("T1");

        match locks.handover.decide(&t1, 1, Decision::Accept).await {
            Err(LockError::NotFound) => {}
            other => unreachable!("Expected NotFound, got {:?}", other),
        }

        locked_by(&locks, &t1, 1).await;
        pending(locks.handover.request_access(&t1, 2, None).await.unwrap());
        match locks.handover.decide(&t1, 3, Decision::Accept).await {
            Err(LockError::NotHolder) => {}
            other => unreachable!("Expected NotHolder, got {:?}", other),
        }
        match locks.handover.decide(&t1, 2, Decision::Accept).await {
            Err(LockError::NotHolder) => {}
            other => unreachable!("Expected NotHolder, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_repeat_request_within_window_is_replayed() {
        let locks = TestLocks::new();
        let t1 = transfer("T1");
        locked_by(&locks, &t1, 1).await;

        let first = pending(locks.handover.request_access(&t1, 2, None).await.unwrap());
        locks.clock.advance_secs(3);
        match locks.handover.request_access(&t1, 2, None).await.unwrap() {
            StartOutcome::Pending {
                request, replayed, ..
            } => {
                assert!(replayed);
                assert_eq!(request.id, first.id);
            }
            other => unreachable!("Expected a pending request, got {:?}", other),
        }

        let requests = locks
            .audit_actions(&t1)
            .await
            .into_iter()
            .filter(|a| *a == AuditAction::Request)
            .count();
        assert_eq!(requests, 1);
    }

    #[tokio::test]
    async fn test_repeat_request_after_window_closed_settles_first() {
        let locks = TestLocks::new();
        let t1 = transfer("T1");
        locked_by(&locks, &t1, 1).await;
        let request = pending(locks.handover.request_access(&t1, 2, None).await.unwrap());

        locks.clock.advance_secs(12);
        match locks.handover.request_access(&t1, 2, None).await.unwrap() {
            StartOutcome::AlreadyHolder { lease } => assert_eq!(lease.holder_id, 2),
            other => unreachable!("Expected the overdue request to be granted, got {:?}", other),
        }
        let settled = locks.store.get_request(&t1, request.id).await.unwrap().unwrap();
        assert_eq!(settled.status, RequestStatus::Accepted);
    }

    #[tokio::test]
    async fn test_new_holder_cannot_answer_request_raised_against_old_holder() {
        let locks = TestLocks::new();
        let t1 = transfer("T1");
        locked_by(&locks, &t1, 1).await;
        let request = pending(locks.handover.request_access(&t1, 3, None).await.unwrap());

        assert!(locks.leases.release(&t1, 1, false).await.unwrap());
        locked_by(&locks, &t1, 2).await;

        match locks.handover.decide(&t1, 2, Decision::Accept).await {
            Err(LockError::NotHolder) => {}
            other => unreachable!("Expected NotHolder, got {:?}", other),
        }
        assert_eq!(holder_of(&locks, &t1).await, Some(2));
        let unchanged = locks.store.get_request(&t1, request.id).await.unwrap().unwrap();
        assert_eq!(unchanged.status, RequestStatus::Pending);
    }

    #[tokio::test]
    async fn test_request_on_free_or_own_lock_short_circuits() {
        let locks = TestLocks::new();
        let t1 = transfer("T1");

        match locks.handover.request_access(&t1, 2, None).await.unwrap() {
            StartOutcome::AlreadyHolder { lease } => assert_eq!(lease.holder_id, 2),
            other => unreachable!("Expected requester to get the free lock, got {:?}", other),
        }
        match locks.handover.request_access(&t1, 2, None).await.unwrap() {
            StartOutcome::AlreadyHolder { lease } => assert_eq!(lease.holder_id, 2),
            other => unreachable!("Expected AlreadyHolder, got {:?}", other),
        }
        assert!(locks.store.latest_request(&t1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_overdue_request_expires_when_lock_moved_to_third_party() {
        let locks = TestLocks::new();
        let t1 = transfer("T1");
        locked_by(&locks, &t1, 1).await;
        let request = pending(locks.handover.request_access(&t1, 2, None).await.unwrap());

        // Holder lets go and someone else grabs the lock before the window closes.
        assert!(locks.leases.release(&t1, 1, false).await.unwrap());
        locked_by(&locks, &t1, 3).await;

        locks.clock.advance_secs(11);
        let settled = locks.handover.reconcile(&t1).await.unwrap().unwrap();
        assert_eq!(settled.id, request.id);
        assert_eq!(settled.status, RequestStatus::Expired);
        assert_eq!(holder_of(&locks, &t1).await, Some(3));
    }

    #[tokio::test]
    async fn test_configured_windows_are_used() {
        let mut settings = LockSettings::default();
        settings.holder_window = chrono::Duration::seconds(60);
        settings.requester_window = chrono::Duration::seconds(0);
        let locks = TestLocks::with_settings(settings);
        let t1 = transfer("T1");
        locked_by(&locks, &t1, 1).await;
        pending(locks.handover.request_access(&t1, 2, None).await.unwrap());

        locks.clock.advance_secs(30);
        let view = locks.handover.request_state(&t1, 2).await.unwrap();
        assert_eq!(view.state, "pending");
        assert_eq!(view.seconds_remaining_holder, 30);
        assert_eq!(view.seconds_remaining_requester, 0);
    }
}
