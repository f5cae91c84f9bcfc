//! Persistence for the transfer pack lock.
//!
//! Three tables back the protocol: leases (at most one row per resource), takeover requests
//! (history per resource) and audit events (append-only).
//!
//! Every mutation on `LockStore` is a single conditional write. Callers never read a row and then
//! write it back unconditionally; when a conditional write is refused they may read to learn why,
//! but they do not mutate based on that read.

pub mod dynamo;
pub mod memory;

use std::convert::TryFrom;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rusoto_core::RusotoError;
use rusoto_dynamodb::{
    DeleteItemError, GetItemError, PutItemError, QueryError, ScanError, UpdateItemError,
};
use serde::Serialize;
use thiserror::Error;

pub use dynamo::DynamoStore;
pub use memory::MemoryStore;

/// Numeric user id, supplied by the surrounding application's session.
pub type UserId = i64;

/// Identifier of the locked resource (a transfer id).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ResourceId(String);

impl ResourceId {
    pub const MAX_LEN: usize = 64;

    /// Accepts ascii letters, digits, '-', '_' and '.', up to `MAX_LEN` characters. Surrounding
    /// whitespace is ignored.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.len() > Self::MAX_LEN {
            return None;
        }
        let valid = trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.');
        if !valid {
            return None;
        }
        Some(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The instant against which staleness is judged. A lease is stale when it expired before `now`
/// or its last heartbeat is older than `heartbeat_since`.
#[derive(Clone, Copy, Debug)]
pub struct StaleCutoff {
    pub now: DateTime<Utc>,
    pub heartbeat_since: DateTime<Utc>,
}

impl StaleCutoff {
    pub fn new(now: DateTime<Utc>, heartbeat_grace: Duration) -> Self {
        Self {
            now,
            heartbeat_since: now - heartbeat_grace,
        }
    }
}

/// Why a lease stopped counting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Staleness {
    Expired,
    HeartbeatLost,
}

/// Exclusive, time-bounded ownership of a resource.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Lease {
    pub resource_id: ResourceId,
    pub holder_id: UserId,
    pub lease_id: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_heartbeat_at: DateTime<Utc>,
    pub client_tag: Option<String>,
}

impl Lease {
    pub fn staleness(&self, cutoff: &StaleCutoff) -> Option<Staleness> {
        if cutoff.now > self.expires_at {
            Some(Staleness::Expired)
        } else if self.last_heartbeat_at < cutoff.heartbeat_since {
            Some(Staleness::HeartbeatLost)
        } else {
            None
        }
    }

    pub fn is_stale(&self, cutoff: &StaleCutoff) -> bool {
        self.staleness(cutoff).is_some()
    }
}

/// New expiry and heartbeat for a live lease. A `client_tag` replaces the stored one; `None`
/// leaves it as is.
#[derive(Clone, Debug)]
pub struct LeaseRenewal {
    pub expires_at: DateTime<Utc>,
    pub heartbeat_at: DateTime<Utc>,
    pub client_tag: Option<String>,
}

/// Result of a conditional write that installs a lease.
#[derive(Clone, Debug, PartialEq)]
pub enum ClaimOutcome {
    /// The lease was written. `replaced` is the row it overwrote, if any.
    Claimed { replaced: Option<Lease> },

    /// The condition failed: a live lease that we may not overwrite is in place.
    Refused,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Accepted,
    Declined,
    Expired,
    Cancelled,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match *self {
            RequestStatus::Pending => "pending",
            RequestStatus::Accepted => "accepted",
            RequestStatus::Declined => "declined",
            RequestStatus::Expired => "expired",
            RequestStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        *self != RequestStatus::Pending
    }
}

impl TryFrom<&str> for RequestStatus {
    type Error = ();

    fn try_from(val: &str) -> Result<Self, Self::Error> {
        match val {
            "pending" => Ok(RequestStatus::Pending),
            "accepted" => Ok(RequestStatus::Accepted),
            "declined" => Ok(RequestStatus::Declined),
            "expired" => Ok(RequestStatus::Expired),
            "cancelled" => Ok(RequestStatus::Cancelled),
            _ => Err(()),
        }
    }
}

/// A request by `requester_id` to take over the lease `holder_id` held when it was raised.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TakeoverRequest {
    pub id: u64,
    pub resource_id: ResourceId,
    pub requester_id: UserId,
    pub holder_id: UserId,
    pub requested_at: DateTime<Utc>,
    pub decision_deadline: DateTime<Utc>,
    pub status: RequestStatus,
    pub responded_at: Option<DateTime<Utc>>,
    pub client_tag: Option<String>,
}

/// Everything needed to insert a pending request. The store allocates the id.
#[derive(Clone, Debug)]
pub struct RequestDraft {
    pub resource_id: ResourceId,
    pub requester_id: UserId,
    pub holder_id: UserId,
    pub requested_at: DateTime<Utc>,
    pub decision_deadline: DateTime<Utc>,
    pub client_tag: Option<String>,
}

#[derive(Clone, Debug)]
pub struct OpenedRequest {
    pub request: TakeoverRequest,

    /// True when an existing pending request from the same requester was returned instead of a
    /// new row.
    pub replayed: bool,
}

/// Deadline predicate attached to a request transition.
#[derive(Clone, Copy, Debug)]
pub enum DeadlineGuard {
    /// Only while `decision_deadline >= at`. Used for holder decisions.
    Open { at: DateTime<Utc> },

    /// Only once `decision_deadline < at`. Used for auto-grant and expiry.
    Passed { at: DateTime<Utc> },

    /// No deadline predicate. Used for cancelling superseded requests.
    Any,
}

impl DeadlineGuard {
    pub fn allows(&self, deadline: &DateTime<Utc>) -> bool {
        match *self {
            DeadlineGuard::Open { at } => *deadline >= at,
            DeadlineGuard::Passed { at } => *deadline < at,
            DeadlineGuard::Any => true,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Acquire,
    HeartbeatLost,
    Request,
    Decide,
    AutoGrant,
    Release,
    Expire,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match *self {
            AuditAction::Acquire => "acquire",
            AuditAction::HeartbeatLost => "heartbeat_lost",
            AuditAction::Request => "request",
            AuditAction::Decide => "decide",
            AuditAction::AutoGrant => "auto_grant",
            AuditAction::Release => "release",
            AuditAction::Expire => "expire",
        }
    }
}

impl TryFrom<&str> for AuditAction {
    type Error = ();

    fn try_from(val: &str) -> Result<Self, Self::Error> {
        match val {
            "acquire" => Ok(AuditAction::Acquire),
            "heartbeat_lost" => Ok(AuditAction::HeartbeatLost),
            "request" => Ok(AuditAction::Request),
            "decide" => Ok(AuditAction::Decide),
            "auto_grant" => Ok(AuditAction::AutoGrant),
            "release" => Ok(AuditAction::Release),
            "expire" => Ok(AuditAction::Expire),
            _ => Err(()),
        }
    }
}

/// Immutable record of one transition.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AuditEvent {
    pub resource_id: ResourceId,
    pub actor_id: UserId,
    pub action: AuditAction,
    pub status: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("DynamoDB GetItem failed: {0}")]
    GetItem(#[from] RusotoError<GetItemError>),

    #[error("DynamoDB PutItem failed: {0}")]
    PutItem(#[from] RusotoError<PutItemError>),

    #[error("DynamoDB UpdateItem failed: {0}")]
    UpdateItem(#[from] RusotoError<UpdateItemError>),

    #[error("DynamoDB DeleteItem failed: {0}")]
    DeleteItem(#[from] RusotoError<DeleteItemError>),

    #[error("DynamoDB Query failed: {0}")]
    Query(#[from] RusotoError<QueryError>),

    #[error("DynamoDB Scan failed: {0}")]
    Scan(#[from] RusotoError<ScanError>),

    #[error("Malformed {table} item: missing or invalid {field}")]
    MalformedItem {
        table: &'static str,
        field: &'static str,
    },

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Atomic persistence primitives for leases, takeover requests and audit events.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Raw lease row, stale or not.
    async fn get_lease(&self, resource_id: &ResourceId) -> Result<Option<Lease>, StoreError>;

    async fn list_leases(&self) -> Result<Vec<Lease>, StoreError>;

    /// Extend the lease only if it belongs to `holder_id` and is live at `cutoff`.
    async fn renew_lease(
        &self,
        resource_id: &ResourceId,
        holder_id: UserId,
        renewal: &LeaseRenewal,
        cutoff: &StaleCutoff,
    ) -> Result<Option<Lease>, StoreError>;

    /// Insert `lease` if no row exists or the existing row is stale at `cutoff`.
    async fn claim_lease(
        &self,
        lease: &Lease,
        cutoff: &StaleCutoff,
    ) -> Result<ClaimOutcome, StoreError>;

    /// Overwrite the lease with `lease` if the row is absent, stale, held by `from_holder`, or
    /// already held by the new holder. This is the handover write: force-release plus acquire.
    async fn transfer_lease(
        &self,
        lease: &Lease,
        from_holder: UserId,
        cutoff: &StaleCutoff,
    ) -> Result<ClaimOutcome, StoreError>;

    /// Delete the lease. With `holder_id` the delete only happens if that user holds the row;
    /// with `None` it is unconditional. Returns the deleted row.
    async fn delete_lease(
        &self,
        resource_id: &ResourceId,
        holder_id: Option<UserId>,
    ) -> Result<Option<Lease>, StoreError>;

    /// Delete the lease only if it is stale at `cutoff`. Returns the deleted row.
    async fn delete_stale_lease(
        &self,
        resource_id: &ResourceId,
        cutoff: &StaleCutoff,
    ) -> Result<Option<Lease>, StoreError>;

    /// Insert a pending request, unless a pending request from the same requester on the same
    /// resource was raised at or after `replay_since` and is still open at `draft.requested_at`,
    /// in which case that one is returned.
    async fn open_request(
        &self,
        draft: &RequestDraft,
        replay_since: DateTime<Utc>,
    ) -> Result<OpenedRequest, StoreError>;

    async fn get_request(
        &self,
        resource_id: &ResourceId,
        request_id: u64,
    ) -> Result<Option<TakeoverRequest>, StoreError>;

    /// The request with the highest id for the resource, whatever its status.
    async fn latest_request(
        &self,
        resource_id: &ResourceId,
    ) -> Result<Option<TakeoverRequest>, StoreError>;

    /// Pending requests for the resource, oldest first.
    async fn pending_requests(
        &self,
        resource_id: &ResourceId,
    ) -> Result<Vec<TakeoverRequest>, StoreError>;

    /// Move a pending request to a terminal status. Returns false when the request is no longer
    /// pending or the deadline guard does not hold, in which case nothing changed.
    async fn finish_request(
        &self,
        resource_id: &ResourceId,
        request_id: u64,
        status: RequestStatus,
        responded_at: DateTime<Utc>,
        guard: DeadlineGuard,
    ) -> Result<bool, StoreError>;

    /// Pending requests across all resources whose deadline is before `now`.
    async fn overdue_requests(&self, now: DateTime<Utc>)
        -> Result<Vec<TakeoverRequest>, StoreError>;

    /// Delete terminal requests that were settled before `responded_before`.
    async fn prune_requests(&self, responded_before: DateTime<Utc>) -> Result<usize, StoreError>;

    async fn append_audit(&self, event: &AuditEvent) -> Result<(), StoreError>;

    /// Newest first.
    async fn audit_history(
        &self,
        resource_id: &ResourceId,
        limit: usize,
    ) -> Result<Vec<AuditEvent>, StoreError>;
}
