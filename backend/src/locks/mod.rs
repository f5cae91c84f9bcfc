//! Transfer pack lock: exclusive leases plus the takeover protocol built on top of them.

pub mod handover;
pub mod leases;
pub mod reconciler;

use chrono::Duration;
use thiserror::Error;

use crate::store::{Lease, RequestStatus, StoreError};

pub use handover::{HandoverCoordinator, RequestView, StartOutcome};
pub use leases::LeaseManager;
pub use reconciler::{Reconciler, SweepReport};

/// Timing knobs for the lock protocol.
#[derive(Clone, Debug)]
pub struct LockSettings {
    /// How long a lease lasts without renewal.
    pub lease_ttl: Duration,

    /// A lease whose last heartbeat is older than this is stale even if it has not expired.
    pub heartbeat_grace: Duration,

    /// How long the current holder has to accept or decline a takeover request.
    pub holder_window: Duration,

    /// How long the requester is told to wait. Advisory; the holder window is what gets enforced.
    pub requester_window: Duration,

    /// Repeat requests from the same requester inside this window replay the pending one.
    pub duplicate_window: Duration,

    /// Terminal requests are pruned once settled longer ago than this.
    pub request_retention: Duration,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            lease_ttl: Duration::seconds(3600),
            heartbeat_grace: Duration::seconds(90),
            holder_window: Duration::seconds(10),
            requester_window: Duration::seconds(5),
            duplicate_window: Duration::seconds(15),
            request_retention: Duration::hours(24),
        }
    }
}

#[derive(Debug, Error)]
pub enum LockError {
    #[error("Caller does not hold the lock")]
    NotHolder,

    #[error("No takeover request found")]
    NotFound,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result of trying to take a lock.
#[derive(Clone, Debug, PartialEq)]
pub enum AcquireOutcome {
    Granted { lease: Lease, already_held: bool },
    Conflict(Conflict),
}

/// Who is in the way of an acquisition.
#[derive(Clone, Debug, PartialEq)]
pub enum Conflict {
    /// A live lease held by someone else.
    KnownHolder(Lease),

    /// Our conditional writes kept losing races and we never observed the holder that beat us.
    UnknownHolder,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    Accept,
    Decline,
}

#[derive(Clone, Debug, PartialEq)]
pub enum DecideOutcome {
    Accepted { lease: Option<Lease> },
    Declined,
    AlreadyFinal(RequestStatus),
}
