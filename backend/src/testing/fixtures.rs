use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::audit::AuditSink;
use crate::locks::{HandoverCoordinator, LeaseManager, LockSettings, Reconciler};
use crate::store::{AuditAction, MemoryStore, ResourceId};
use crate::users::UserDirectory;
use crate::utils::time::{from_millis, Clock};
use crate::BackendService;

/// 2021-03-01T09:00:00Z. Tests start from a realistic wall clock time.
const TEST_EPOCH_MILLIS: i64 = 1_614_589_200_000;

/// A clock that only moves when a test tells it to.
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    pub fn at_millis(millis: i64) -> Self {
        Self {
            millis: AtomicI64::new(millis),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        from_millis(self.millis.load(Ordering::SeqCst))
    }

    pub fn advance_secs(&self, secs: i64) {
        self.millis.fetch_add(secs * 1000, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        ManualClock::now(self)
    }
}

/// Lease manager, handover coordinator and audit sink wired to one in-memory store and one
/// manual clock.
pub struct TestLocks {
    pub clock: Arc<ManualClock>,
    pub store: Arc<MemoryStore>,
    pub audit: AuditSink,
    pub leases: LeaseManager,
    pub handover: HandoverCoordinator,
}

impl TestLocks {
    pub fn new() -> Self {
        Self::with_settings(LockSettings::default())
    }

    pub fn with_settings(settings: LockSettings) -> Self {
        let clock = Arc::new(ManualClock::at_millis(TEST_EPOCH_MILLIS));
        let store = Arc::new(MemoryStore::new());
        let audit = AuditSink::new(store.clone(), clock.clone());
        let leases = LeaseManager::new(store.clone(), audit.clone(), clock.clone(), settings);
        let handover = HandoverCoordinator::new(store.clone(), leases.clone(), audit.clone());
        Self {
            clock,
            store,
            audit,
            leases,
            handover,
        }
    }

    pub fn reconciler(&self, sweep_interval: Duration) -> Reconciler {
        Reconciler::new(
            self.store.clone(),
            self.leases.clone(),
            self.handover.clone(),
            sweep_interval,
        )
    }

    /// Service for HTTP tests. Shares this fixture's store and clock, so tests can move time
    /// forward between requests.
    pub fn backend_service(&self, users: Arc<dyn UserDirectory>) -> BackendService {
        BackendService::new(
            self.store.clone(),
            self.clock.clone(),
            self.leases.settings().clone(),
            users,
        )
    }

    /// Audit actions recorded on `resource_id`, oldest first.
    pub async fn audit_actions(&self, resource_id: &ResourceId) -> Vec<AuditAction> {
        let mut events = self.audit.history(resource_id, 1000).await.unwrap();
        events.reverse();
        events.into_iter().map(|e| e.action).collect()
    }
}
