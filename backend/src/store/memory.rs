//! Process-local `LockStore`.
//!
//! Every operation runs inside one critical section on a single mutex, which gives each call the
//! same all-or-nothing behavior the DynamoDB condition expressions give `DynamoStore`. Suitable for
//! a single backend instance (`--store memory`) and for tests.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{
    AuditEvent, ClaimOutcome, DeadlineGuard, Lease, LeaseRenewal, LockStore, OpenedRequest,
    RequestDraft, RequestStatus, ResourceId, StaleCutoff, StoreError, TakeoverRequest, UserId,
};

#[derive(Default)]
struct State {
    leases: HashMap<ResourceId, Lease>,
    // Ascending by id per resource.
    requests: HashMap<ResourceId, Vec<TakeoverRequest>>,
    next_request_id: u64,
    audit: HashMap<ResourceId, Vec<AuditEvent>>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    #[cfg(test)]
    fail_audit_writes: std::sync::atomic::AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<State>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable("in-memory store mutex poisoned".to_string()))
    }

    /// Make `append_audit` fail until switched off again.
    #[cfg(test)]
    pub fn fail_audit_writes(&self, fail: bool) {
        self.fail_audit_writes
            .store(fail, std::sync::atomic::Ordering::SeqCst);
    }
}

#[async_trait]
impl LockStore for MemoryStore {
    async fn get_lease(&self, resource_id: &ResourceId) -> Result<Option<Lease>, StoreError> {
        Ok(self.state()?.leases.get(resource_id).cloned())
    }

    async fn list_leases(&self) -> Result<Vec<Lease>, StoreError> {
        let mut leases: Vec<Lease> = self.state()?.leases.values().cloned().collect();
        leases.sort_by(|a, b| a.resource_id.cmp(&b.resource_id));
        Ok(leases)
    }

    async fn renew_lease(
        &self,
        resource_id: &ResourceId,
        holder_id: UserId,
        renewal: &LeaseRenewal,
        cutoff: &StaleCutoff,
    ) -> Result<Option<Lease>, StoreError> {
        let mut state = self.state()?;
        match state.leases.get_mut(resource_id) {
            Some(lease) if lease.holder_id == holder_id && !lease.is_stale(cutoff) => {
                lease.expires_at = renewal.expires_at;
                lease.last_heartbeat_at = renewal.heartbeat_at;
                if renewal.client_tag.is_some() {
                    lease.client_tag = renewal.client_tag.clone();
                }
                Ok(Some(lease.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn claim_lease(
        &self,
        lease: &Lease,
        cutoff: &StaleCutoff,
    ) -> Result<ClaimOutcome, StoreError> {
        let mut state = self.state()?;
        if let Some(existing) = state.leases.get(&lease.resource_id) {
            if !existing.is_stale(cutoff) {
                return Ok(ClaimOutcome::Refused);
            }
        }
        let replaced = state.leases.insert(lease.resource_id.clone(), lease.clone());
        Ok(ClaimOutcome::Claimed { replaced })
    }

    async fn transfer_lease(
        &self,
        lease: &Lease,
        from_holder: UserId,
        cutoff: &StaleCutoff,
    ) -> Result<ClaimOutcome, StoreError> {
        let mut state = self.state()?;
        if let Some(existing) = state.leases.get(&lease.resource_id) {
            let movable = existing.holder_id == from_holder
                || existing.holder_id == lease.holder_id
                || existing.is_stale(cutoff);
            if !movable {
                return Ok(ClaimOutcome::Refused);
            }
        }
        let replaced = state.leases.insert(lease.resource_id.clone(), lease.clone());
        Ok(ClaimOutcome::Claimed { replaced })
    }

    async fn delete_lease(
        &self,
        resource_id: &ResourceId,
        holder_id: Option<UserId>,
    ) -> Result<Option<Lease>, StoreError> {
        let mut state = self.state()?;
        let matches = match (state.leases.get(resource_id), holder_id) {
            (Some(lease), Some(holder_id)) => lease.holder_id == holder_id,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if matches {
            Ok(state.leases.remove(resource_id))
        } else {
            Ok(None)
        }
    }

    async fn delete_stale_lease(
        &self,
        resource_id: &ResourceId,
        cutoff: &StaleCutoff,
    ) -> Result<Option<Lease>, StoreError> {
        let mut state = self.state()?;
        let stale = state
            .leases
            .get(resource_id)
            .map(|lease| lease.is_stale(cutoff))
            .unwrap_or(false);
        if stale {
            Ok(state.leases.remove(resource_id))
        } else {
            Ok(None)
        }
    }

    async fn open_request(
        &self,
        draft: &RequestDraft,
        replay_since: DateTime<Utc>,
    ) -> Result<OpenedRequest, StoreError> {
        let mut state = self.state()?;
        let existing = state.requests.get(&draft.resource_id).and_then(|requests| {
            requests
                .iter()
                .rev()
                .find(|r| {
                    r.status == RequestStatus::Pending
                        && r.requester_id == draft.requester_id
                        && r.requested_at >= replay_since
                        && r.decision_deadline > draft.requested_at
                })
                .cloned()
        });
        if let Some(request) = existing {
            return Ok(OpenedRequest {
                request,
                replayed: true,
            });
        }

        state.next_request_id += 1;
        let request = TakeoverRequest {
            id: state.next_request_id,
            resource_id: draft.resource_id.clone(),
            requester_id: draft.requester_id,
            holder_id: draft.holder_id,
            requested_at: draft.requested_at,
            decision_deadline: draft.decision_deadline,
            status: RequestStatus::Pending,
            responded_at: None,
            client_tag: draft.client_tag.clone(),
        };
        state
            .requests
            .entry(draft.resource_id.clone())
            .or_insert_with(Vec::new)
            .push(request.clone());
        Ok(OpenedRequest {
            request,
            replayed: false,
        })
    }

    async fn get_request(
        &self,
        resource_id: &ResourceId,
        request_id: u64,
    ) -> Result<Option<TakeoverRequest>, StoreError> {
        let state = self.state()?;
        Ok(state
            .requests
            .get(resource_id)
            .and_then(|requests| requests.iter().find(|r| r.id == request_id).cloned()))
    }

    async fn latest_request(
        &self,
        resource_id: &ResourceId,
    ) -> Result<Option<TakeoverRequest>, StoreError> {
        let state = self.state()?;
        Ok(state
            .requests
            .get(resource_id)
            .and_then(|requests| requests.last().cloned()))
    }

    async fn pending_requests(
        &self,
        resource_id: &ResourceId,
    ) -> Result<Vec<TakeoverRequest>, StoreError> {
        let state = self.state()?;
        Ok(state
            .requests
            .get(resource_id)
            .map(|requests| {
                requests
                    .iter()
                    .filter(|r| r.status == RequestStatus::Pending)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn finish_request(
        &self,
        resource_id: &ResourceId,
        request_id: u64,
        status: RequestStatus,
        responded_at: DateTime<Utc>,
        guard: DeadlineGuard,
    ) -> Result<bool, StoreError> {
        let mut state = self.state()?;
        let request = state
            .requests
            .get_mut(resource_id)
            .and_then(|requests| requests.iter_mut().find(|r| r.id == request_id));
        match request {
            Some(request)
                if request.status == RequestStatus::Pending
                    && guard.allows(&request.decision_deadline) =>
            {
                request.status = status;
                request.responded_at = Some(responded_at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn overdue_requests(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<TakeoverRequest>, StoreError> {
        let state = self.state()?;
        let mut overdue: Vec<TakeoverRequest> = state
            .requests
            .values()
            .flat_map(|requests| requests.iter())
            .filter(|r| r.status == RequestStatus::Pending && r.decision_deadline < now)
            .cloned()
            .collect();
        overdue.sort_by_key(|r| r.id);
        Ok(overdue)
    }

    async fn prune_requests(&self, responded_before: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut state = self.state()?;
        let mut pruned = 0;
        for requests in state.requests.values_mut() {
            let before = requests.len();
            requests.retain(|r| match r.responded_at {
                Some(responded_at) => {
                    !(r.status.is_terminal() && responded_at < responded_before)
                }
                None => true,
            });
            pruned += before - requests.len();
        }
        state.requests.retain(|_, requests| !requests.is_empty());
        Ok(pruned)
    }

    async fn append_audit(&self, event: &AuditEvent) -> Result<(), StoreError> {
        #[cfg(test)]
        {
            if self
                .fail_audit_writes
                .load(std::sync::atomic::Ordering::SeqCst)
            {
                return Err(StoreError::Unavailable("audit writes disabled".to_string()));
            }
        }
        let mut state = self.state()?;
        state
            .audit
            .entry(event.resource_id.clone())
            .or_insert_with(Vec::new)
            .push(event.clone());
        Ok(())
    }

    async fn audit_history(
        &self,
        resource_id: &ResourceId,
        limit: usize,
    ) -> Result<Vec<AuditEvent>, StoreError> {
        let state = self.state()?;
        Ok(state
            .audit
            .get(resource_id)
            .map(|events| events.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::Duration;

    use crate::utils::time::from_millis;

    fn resource() -> ResourceId {
        ResourceId::parse("T1").unwrap()
    }

    fn lease_for(holder_id: UserId, at: i64) -> Lease {
        Lease {
            resource_id: resource(),
            holder_id,
            lease_id: format!("ls_{}", holder_id),
            acquired_at: from_millis(at),
            expires_at: from_millis(at + 3_600_000),
            last_heartbeat_at: from_millis(at),
            client_tag: None,
        }
    }

    fn cutoff(at: i64) -> StaleCutoff {
        StaleCutoff::new(from_millis(at), Duration::seconds(90))
    }

    #[tokio::test]
    async fn test_claim_refused_while_live_and_allowed_once_stale() {
        let store = MemoryStore::new();
        let first = lease_for(1, 0);
        assert_eq!(
            store.claim_lease(&first, &cutoff(0)).await.unwrap(),
            ClaimOutcome::Claimed { replaced: None }
        );

        let second = lease_for(2, 10_000);
        assert_eq!(
            store.claim_lease(&second, &cutoff(10_000)).await.unwrap(),
            ClaimOutcome::Refused
        );

        // Heartbeat grace lapsed.
        let third = lease_for(3, 100_000);
        assert_eq!(
            store.claim_lease(&third, &cutoff(100_000)).await.unwrap(),
            ClaimOutcome::Claimed {
                replaced: Some(first)
            }
        );
        assert_eq!(
            store.get_lease(&resource()).await.unwrap().unwrap().holder_id,
            3
        );
    }

    #[tokio::test]
    async fn test_renew_only_for_live_holder() {
        let store = MemoryStore::new();
        store.claim_lease(&lease_for(1, 0), &cutoff(0)).await.unwrap();
        let renewal = LeaseRenewal {
            expires_at: from_millis(3_630_000),
            heartbeat_at: from_millis(30_000),
            client_tag: Some("tab-2".to_string()),
        };

        let not_mine = store
            .renew_lease(&resource(), 2, &renewal, &cutoff(30_000))
            .await
            .unwrap();
        assert!(not_mine.is_none());

        let renewed = store
            .renew_lease(&resource(), 1, &renewal, &cutoff(30_000))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(renewed.expires_at, from_millis(3_630_000));
        assert_eq!(renewed.client_tag.as_deref(), Some("tab-2"));

        let too_late = store
            .renew_lease(&resource(), 1, &renewal, &cutoff(200_000))
            .await
            .unwrap();
        assert!(too_late.is_none());
    }

    #[tokio::test]
    async fn test_closed_pending_request_is_not_replayed() {
        let store = MemoryStore::new();
        let draft_at = |millis| RequestDraft {
            resource_id: resource(),
            requester_id: 2,
            holder_id: 1,
            requested_at: from_millis(millis),
            decision_deadline: from_millis(millis + 10_000),
            client_tag: None,
        };
        let first = store.open_request(&draft_at(0), from_millis(-15_000)).await.unwrap();

        let inside = store.open_request(&draft_at(9_000), from_millis(-6_000)).await.unwrap();
        assert!(inside.replayed);
        assert_eq!(inside.request.id, first.request.id);

        let after = store.open_request(&draft_at(12_000), from_millis(-3_000)).await.unwrap();
        assert!(!after.replayed);
        assert!(after.request.id > first.request.id);
    }

    #[tokio::test]
    async fn test_finish_request_happens_exactly_once() {
        let store = MemoryStore::new();
        let draft = RequestDraft {
            resource_id: resource(),
            requester_id: 2,
            holder_id: 1,
            requested_at: from_millis(0),
            decision_deadline: from_millis(10_000),
            client_tag: None,
        };
        let opened = store.open_request(&draft, from_millis(-15_000)).await.unwrap();
        assert!(!opened.replayed);
        let id = opened.request.id;

        let late = store
            .finish_request(
                &resource(),
                id,
                RequestStatus::Accepted,
                from_millis(11_000),
                DeadlineGuard::Open {
                    at: from_millis(11_000),
                },
            )
            .await
            .unwrap();
        assert!(!late);

        let auto = store
            .finish_request(
                &resource(),
                id,
                RequestStatus::Accepted,
                from_millis(11_000),
                DeadlineGuard::Passed {
                    at: from_millis(11_000),
                },
            )
            .await
            .unwrap();
        assert!(auto);

        let again = store
            .finish_request(
                &resource(),
                id,
                RequestStatus::Declined,
                from_millis(12_000),
                DeadlineGuard::Any,
            )
            .await
            .unwrap();
        assert!(!again);
        let request = store.get_request(&resource(), id).await.unwrap().unwrap();
        assert_eq!(request.status, RequestStatus::Accepted);
        assert_eq!(request.responded_at, Some(from_millis(11_000)));
    }

    #[tokio::test]
    async fn test_prune_keeps_pending_and_recent_requests() {
        let store = MemoryStore::new();
        for requester_id in 2..=4 {
            let draft = RequestDraft {
                resource_id: resource(),
                requester_id,
                holder_id: 1,
                requested_at: from_millis(0),
                decision_deadline: from_millis(10_000),
                client_tag: None,
            };
            store.open_request(&draft, from_millis(0)).await.unwrap();
        }
        store
            .finish_request(
                &resource(),
                1,
                RequestStatus::Declined,
                from_millis(1_000),
                DeadlineGuard::Any,
            )
            .await
            .unwrap();
        store
            .finish_request(
                &resource(),
                2,
                RequestStatus::Cancelled,
                from_millis(50_000),
                DeadlineGuard::Any,
            )
            .await
            .unwrap();

        let pruned = store.prune_requests(from_millis(20_000)).await.unwrap();
        assert_eq!(pruned, 1);
        assert!(store.get_request(&resource(), 1).await.unwrap().is_none());
        assert!(store.get_request(&resource(), 2).await.unwrap().is_some());
        assert_eq!(store.pending_requests(&resource()).await.unwrap().len(), 1);
    }
}
