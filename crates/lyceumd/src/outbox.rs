//! Write-coalescing queue for experience grants.
//!
//! Grants are keyed by user and merged into the progression document on a
//! timer or on an explicit flush. The store stays authoritative: each flush
//! is an idempotent merge deduplicated by submission id, so losing the queue
//! loses nothing that was already applied and replaying a grant is harmless.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use lyceum_shared::GachaResult;

use crate::progression_ledger::ProgressionLedger;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueuedGrant {
    pub submission_id: Uuid,
    pub experience: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued,
    /// Queue full; the grant went straight to the ledger
    AppliedDirectly,
}

/// Result of one flush pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub users: usize,
    pub applied: usize,
    pub skipped: usize,
    /// Users whose merge failed and were queued again
    pub failed: usize,
}

pub struct ProgressionOutbox {
    ledger: Arc<ProgressionLedger>,
    pending: Mutex<HashMap<String, Vec<QueuedGrant>>>,
    capacity: usize,
}

impl ProgressionOutbox {
    /// `capacity` bounds the number of distinct users held
    pub fn new(ledger: Arc<ProgressionLedger>, capacity: usize) -> Self {
        Self {
            ledger,
            pending: Mutex::new(HashMap::new()),
            capacity,
        }
    }

    pub async fn enqueue(
        &self,
        user_id: &str,
        submission_id: Uuid,
        experience: u64,
    ) -> GachaResult<EnqueueOutcome> {
        let grant = QueuedGrant {
            submission_id,
            experience,
        };
        {
            let mut pending = self.pending.lock().await;
            if pending.len() < self.capacity || pending.contains_key(user_id) {
                pending.entry(user_id.to_string()).or_default().push(grant);
                return Ok(EnqueueOutcome::Queued);
            }
        }

        debug!(user = user_id, capacity = self.capacity, "outbox full, applying directly");
        self.ledger
            .apply_submissions(user_id, &[(submission_id, experience)])
            .await?;
        Ok(EnqueueOutcome::AppliedDirectly)
    }

    /// Users with grants waiting
    pub async fn pending_users(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Merge every queued grant into the ledger
    pub async fn flush(&self) -> FlushReport {
        let drained = std::mem::take(&mut *self.pending.lock().await);
        let mut report = FlushReport::default();

        for (user_id, grants) in drained {
            let pairs: Vec<(Uuid, u64)> = grants
                .iter()
                .map(|g| (g.submission_id, g.experience))
                .collect();
            match self.ledger.apply_submissions(&user_id, &pairs).await {
                Ok(merge) => {
                    report.users += 1;
                    report.applied += merge.applied;
                    report.skipped += merge.skipped;
                }
                Err(e) => {
                    warn!(user = %user_id, error = %e, grants = grants.len(), "outbox merge failed, requeueing");
                    report.failed += 1;
                    let mut pending = self.pending.lock().await;
                    let queued = pending.entry(user_id).or_default();
                    let newer = std::mem::replace(queued, grants);
                    queued.extend(newer);
                }
            }
        }

        if report.users > 0 || report.failed > 0 {
            info!(
                users = report.users,
                applied = report.applied,
                skipped = report.skipped,
                failed = report.failed,
                "outbox flushed"
            );
        }
        report
    }

    /// Flush every `interval` until `shutdown` flips, then flush once more
    pub fn spawn_flusher(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            info!(interval_secs = interval.as_secs(), "outbox flusher started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.flush().await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            self.flush().await;
            info!("outbox flusher stopped");
        })
    }
}
