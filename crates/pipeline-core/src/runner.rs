//! Cooperative tick loop: reclaim expired leases, run one worker tick, back off.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use tracing::{error, info};

use crate::worker::WorkerLoop;

#[derive(Debug, Clone, Copy)]
pub struct WorkerRuntimeSettings {
    pub poll_interval_ms: u64,
    pub idle_backoff_ms: u64,
    pub error_backoff_ms: u64,
}

impl Default for WorkerRuntimeSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 200,
            idle_backoff_ms: 1_000,
            error_backoff_ms: 2_000,
        }
    }
}

/// Liveness counters exported for a health endpoint.
#[derive(Default)]
pub struct WorkerRuntimeState {
    pub started: AtomicBool,
    pub stopped: AtomicBool,
    pub ticks_total: AtomicU64,
    pub claims_total: AtomicU64,
    pub idle_ticks_total: AtomicU64,
    pub errors_total: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct WorkerRuntimeSnapshot {
    pub started: bool,
    pub stopped: bool,
    pub ticks_total: u64,
    pub claims_total: u64,
    pub idle_ticks_total: u64,
    pub errors_total: u64,
}

impl WorkerRuntimeState {
    pub fn snapshot(&self) -> WorkerRuntimeSnapshot {
        WorkerRuntimeSnapshot {
            started: self.started.load(Ordering::SeqCst),
            stopped: self.stopped.load(Ordering::SeqCst),
            ticks_total: self.ticks_total.load(Ordering::SeqCst),
            claims_total: self.claims_total.load(Ordering::SeqCst),
            idle_ticks_total: self.idle_ticks_total.load(Ordering::SeqCst),
            errors_total: self.errors_total.load(Ordering::SeqCst),
        }
    }
}

/// Drives one [`WorkerLoop`] until `stop` is set, reclaiming expired leases on every tick.
pub async fn run_worker_until_stopped(
    worker: WorkerLoop,
    settings: WorkerRuntimeSettings,
    state: Arc<WorkerRuntimeState>,
    stop: Arc<AtomicBool>,
) {
    state.started.store(true, Ordering::SeqCst);
    info!(stage = worker.stage.as_str(), role = %worker.role, "worker loop started");

    while !stop.load(Ordering::SeqCst) {
        state.ticks_total.fetch_add(1, Ordering::SeqCst);

        match worker.repository.reclaim_expired_claims(worker.stage).await {
            Ok(count) if count > 0 => {
                info!(stage = worker.stage.as_str(), reclaimed = count, "reclaimed expired leases");
            }
            Ok(_) => {}
            Err(e) => {
                error!(stage = worker.stage.as_str(), error = %e, "reclaim_expired_claims failed");
            }
        }

        let delay_ms = match worker.run_once().await {
            Ok(true) => {
                state.claims_total.fetch_add(1, Ordering::SeqCst);
                settings.poll_interval_ms
            }
            Ok(false) => {
                state.idle_ticks_total.fetch_add(1, Ordering::SeqCst);
                settings.idle_backoff_ms
            }
            Err(e) => {
                state.errors_total.fetch_add(1, Ordering::SeqCst);
                error!(stage = worker.stage.as_str(), error = %e, "worker tick error");
                settings.error_backoff_ms
            }
        };

        tokio::time::sleep(StdDuration::from_millis(delay_ms)).await;
    }

    state.stopped.store(true, Ordering::SeqCst);
    info!(stage = worker.stage.as_str(), role = %worker.role, "worker loop stopped");
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::future::Future;
    use std::pin::Pin;

    use super::*;
    use crate::lifecycle::{Stage, SubmissionStatus};
    use crate::memory_repository::InMemoryWorkRepository;
    use crate::types::{ProcessResult, SourceType, WorkItemClaim};
    use crate::worker::ProcessFn;

    fn pass_through() -> ProcessFn {
        Arc::new(|_claim: WorkItemClaim| {
            Box::pin(async move { ProcessResult::ok("done") }) as Pin<Box<dyn Future<Output = ProcessResult> + Send>>
        })
    }

    #[tokio::test]
    async fn a_claimed_tick_uses_the_poll_interval_and_bumps_claims_total() {
        let repo = Arc::new(InMemoryWorkRepository::new());
        let candidate = repo.create_candidate("Ada", "Lovelace").await.unwrap();
        let assignment = repo.create_assignment("Sort a list", "desc", true).await.unwrap();
        repo.create_submission_with_source(
            &candidate.candidate_public_id,
            &assignment.assignment_public_id,
            SourceType::ApiUpload,
            "ext-1",
            SubmissionStatus::Uploaded,
            BTreeMap::new(),
        )
        .await
        .unwrap();

        let worker = WorkerLoop::new("normalize-worker", Stage::Normalized, repo.clone(), pass_through());
        let settings = WorkerRuntimeSettings {
            poll_interval_ms: 1,
            idle_backoff_ms: 1,
            error_backoff_ms: 1,
        };
        let state = Arc::new(WorkerRuntimeState::default());
        let stop = Arc::new(AtomicBool::new(false));

        let stop_after = {
            let state = state.clone();
            let stop = stop.clone();
            async move {
                loop {
                    if state.ticks_total.load(Ordering::SeqCst) >= 2 {
                        stop.store(true, Ordering::SeqCst);
                        break;
                    }
                    tokio::time::sleep(StdDuration::from_millis(1)).await;
                }
            }
        };

        tokio::join!(run_worker_until_stopped(worker, settings, state.clone(), stop), stop_after);

        let snapshot = state.snapshot();
        assert!(snapshot.started);
        assert!(snapshot.stopped);
        assert_eq!(snapshot.claims_total, 1);
        assert_eq!(snapshot.errors_total, 0);
    }

    #[tokio::test]
    async fn an_idle_queue_increments_idle_ticks_not_claims() {
        let repo = Arc::new(InMemoryWorkRepository::new());
        let worker = WorkerLoop::new("normalize-worker", Stage::Normalized, repo.clone(), pass_through());
        let settings = WorkerRuntimeSettings {
            poll_interval_ms: 1,
            idle_backoff_ms: 1,
            error_backoff_ms: 1,
        };
        let state = Arc::new(WorkerRuntimeState::default());
        let stop = Arc::new(AtomicBool::new(false));

        let stop_after = {
            let state = state.clone();
            let stop = stop.clone();
            async move {
                loop {
                    if state.ticks_total.load(Ordering::SeqCst) >= 2 {
                        stop.store(true, Ordering::SeqCst);
                        break;
                    }
                    tokio::time::sleep(StdDuration::from_millis(1)).await;
                }
            }
        };

        tokio::join!(run_worker_until_stopped(worker, settings, state.clone(), stop), stop_after);

        let snapshot = state.snapshot();
        assert_eq!(snapshot.claims_total, 0);
        assert!(snapshot.idle_ticks_total >= 1);
    }
}
