//! Background sweep that enforces time-based transitions nobody polled for.
//!
//! Readers already reclaim stale leases and settle overdue requests when they look at a resource.
//! The reconciler covers resources nobody is looking at: it reclaims every stale lease, settles
//! every overdue takeover request, and prunes settled requests past the retention window.
//!
//! A failure on one resource is logged and the sweep moves on to the next.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

use super::{HandoverCoordinator, LeaseManager};
use crate::store::{LockStore, ResourceId};

/// What one sweep did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired_leases: usize,
    pub settled_requests: usize,
    pub pruned_requests: usize,
    pub failures: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        *self == SweepReport::default()
    }
}

pub struct Reconciler {
    store: Arc<dyn LockStore>,
    leases: LeaseManager,
    handover: HandoverCoordinator,
    sweep_interval: Duration,
    running: AtomicBool,
    awake_from_sleep: Notify,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn LockStore>,
        leases: LeaseManager,
        handover: HandoverCoordinator,
        sweep_interval: Duration,
    ) -> Self {
        Self {
            store,
            leases,
            handover,
            sweep_interval,
            running: AtomicBool::new(false),
            awake_from_sleep: Notify::new(),
        }
    }

    /// Sweep on the configured interval until `stop` is called.
    pub fn start(reconciler: Arc<Reconciler>) -> tokio::task::JoinHandle<()> {
        reconciler.running.store(true, Ordering::SeqCst);
        tokio::spawn(async move {
            log::info!(
                "Reconciler sweeping every {:?}",
                reconciler.sweep_interval
            );
            while reconciler.is_running() {
                // Wakes when the interval elapses *or* when the reconciler is stopped.
                tokio::select! {
                    _ = tokio::time::delay_for(reconciler.sweep_interval) => {}
                    _ = reconciler.awake_from_sleep.notified() => {}
                }
                if !reconciler.is_running() {
                    break;
                }
                let report = reconciler.sweep_once().await;
                if !report.is_empty() {
                    log::debug!("Reconciler sweep: {:?}", report);
                }
            }
            log::info!("Reconciler stopped");
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.awake_from_sleep.notify();
    }

    pub async fn sweep_once(&self) -> SweepReport {
        let mut report = SweepReport::default();
        self.expire_stale_leases(&mut report).await;
        self.settle_overdue_requests(&mut report).await;
        self.prune_settled_requests(&mut report).await;
        report
    }

    async fn expire_stale_leases(&self, report: &mut SweepReport) {
        let cutoff = self.leases.cutoff(self.leases.now());
        let leases = match self.store.list_leases().await {
            Ok(leases) => leases,
            Err(e) => {
                log::warn!("Reconciler could not list leases: {}", e);
                report.failures += 1;
                return;
            }
        };
        for lease in leases.iter().filter(|lease| lease.is_stale(&cutoff)) {
            match self.leases.reclaim_if_stale(&lease.resource_id).await {
                Ok(Some(_)) => report.expired_leases += 1,
                Ok(None) => {}
                Err(e) => {
                    log::warn!(
                        "Reconciler could not reclaim lease on {}: {}",
                        lease.resource_id,
                        e
                    );
                    report.failures += 1;
                }
            }
        }
    }

    async fn settle_overdue_requests(&self, report: &mut SweepReport) {
        let overdue = match self.store.overdue_requests(self.leases.now()).await {
            Ok(overdue) => overdue,
            Err(e) => {
                log::warn!("Reconciler could not list overdue requests: {}", e);
                report.failures += 1;
                return;
            }
        };
        let mut by_resource: BTreeMap<ResourceId, BTreeSet<u64>> = BTreeMap::new();
        for request in overdue {
            by_resource
                .entry(request.resource_id)
                .or_default()
                .insert(request.id);
        }

        for (resource_id, request_ids) in by_resource {
            let latest = match self.handover.reconcile(&resource_id).await {
                Ok(latest) => latest,
                Err(e) => {
                    log::warn!("Reconciler could not settle {}: {}", resource_id, e);
                    report.failures += 1;
                    continue;
                }
            };
            let latest_id = latest.as_ref().map(|r| r.id);
            if let Some(latest) = latest {
                if request_ids.contains(&latest.id) && latest.status.is_terminal() {
                    report.settled_requests += 1;
                }
            }

            // Older requests that were never acted upon.
            for request_id in request_ids.into_iter().filter(|id| Some(*id) != latest_id) {
                match self.handover.expire_superseded(&resource_id, request_id).await {
                    Ok(true) => report.settled_requests += 1,
                    Ok(false) => {}
                    Err(e) => {
                        log::warn!(
                            "Reconciler could not expire request {} on {}: {}",
                            request_id,
                            resource_id,
                            e
                        );
                        report.failures += 1;
                    }
                }
            }
        }
    }

    async fn prune_settled_requests(&self, report: &mut SweepReport) {
        let retention = self.leases.settings().request_retention;
        match self
            .store
            .prune_requests(self.leases.now() - retention)
            .await
        {
            Ok(pruned) => report.pruned_requests += pruned,
            Err(e) => {
                log::warn!("Reconciler could not prune requests: {}", e);
                report.failures += 1;
            }
        }
    }
}
