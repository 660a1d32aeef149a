//! The per-stage worker loop: claim, heartbeat-concurrent-process, link, finalize.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use tracing::{info, warn};

use crate::errors::{classify_error, resolve_stage_error, CoreError, CoreResult};
use crate::lifecycle::{lifecycle_for, Stage};
use crate::repository::WorkRepository;
use crate::types::{ProcessResult, WorkItemClaim};

pub type ProcessFn = Arc<
    dyn Fn(WorkItemClaim) -> Pin<Box<dyn Future<Output = ProcessResult> + Send>> + Send + Sync,
>;

pub struct WorkerLoop {
    pub role: String,
    pub stage: Stage,
    pub repository: Arc<dyn WorkRepository>,
    pub process: ProcessFn,
    pub claim_lease_seconds: i64,
    pub heartbeat_interval_ms: u64,
}

impl WorkerLoop {
    pub fn new(role: impl Into<String>, stage: Stage, repository: Arc<dyn WorkRepository>, process: ProcessFn) -> Self {
        Self {
            role: role.into(),
            stage,
            repository,
            process,
            claim_lease_seconds: 30,
            heartbeat_interval_ms: 10_000,
        }
    }

    /// Attempts one unit of work. Returns `Ok(true)` if a claim was processed.
    pub async fn run_once(&self) -> CoreResult<bool> {
        let Some(claim) = self
            .repository
            .claim_next(self.stage, &self.role, self.claim_lease_seconds)
            .await?
        else {
            return Ok(false);
        };

        let lease_lost = Arc::new(AtomicBool::new(false));
        let stop_heartbeat = Arc::new(AtomicBool::new(false));

        let heartbeat_handle = {
            let repository = self.repository.clone();
            let role = self.role.clone();
            let stage = self.stage;
            let lease_seconds = self.claim_lease_seconds;
            let interval_ms = self.heartbeat_interval_ms;
            let lease_lost = lease_lost.clone();
            let stop_heartbeat = stop_heartbeat.clone();
            let submission_id = claim.submission_id;
            tokio::spawn(async move {
                while !stop_heartbeat.load(Ordering::SeqCst) {
                    tokio::time::sleep(StdDuration::from_millis(interval_ms)).await;
                    if stop_heartbeat.load(Ordering::SeqCst) {
                        break;
                    }
                    match repository.heartbeat_claim(submission_id, stage, &role, lease_seconds).await {
                        Ok(true) => {}
                        Ok(false) => {
                            lease_lost.store(true, Ordering::SeqCst);
                            break;
                        }
                        Err(e) => {
                            warn!(error = %e, "heartbeat call failed");
                            lease_lost.store(true, Ordering::SeqCst);
                            break;
                        }
                    }
                }
            })
        };

        let result = (self.process)(claim.clone()).await;

        stop_heartbeat.store(true, Ordering::SeqCst);
        let _ = heartbeat_handle.await;

        if lease_lost.load(Ordering::SeqCst) {
            return Err(CoreError::Invariant(format!(
                "claim ownership for submission {} is stale",
                claim.submission_id
            )));
        }

        if let Some(artifact_ref) = &result.artifact_ref {
            self.repository
                .link_artifact(
                    claim.submission_id,
                    self.stage,
                    artifact_ref,
                    result.artifact_version.as_deref(),
                )
                .await?;
        }

        let lifecycle = lifecycle_for(self.stage);

        if !result.success {
            let resolved = resolve_stage_error(self.stage, result.error_code.as_deref());
            let classification = classify_error(resolved, claim.attempt, lifecycle.max_attempts);
            warn!(
                submission_id = claim.submission_id,
                stage = self.stage.as_str(),
                last_error_code = resolved.as_str(),
                retry_classification = ?classification,
                "stage process function reported failure"
            );
        }

        let final_status = self
            .repository
            .finalize(
                claim.submission_id,
                self.stage,
                &self.role,
                result.success,
                &result.detail,
                result.error_code.as_deref(),
            )
            .await?;

        info!(
            submission_id = claim.submission_id,
            stage = self.stage.as_str(),
            attempt = claim.attempt,
            max_attempts = lifecycle.max_attempts,
            status = final_status.as_str(),
            "worker finalized claim"
        );

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::lifecycle::SubmissionStatus;
    use crate::memory_repository::InMemoryWorkRepository;
    use crate::types::SourceType;

    async fn seed(repo: &InMemoryWorkRepository) -> String {
        let candidate = repo.create_candidate("Ada", "Lovelace").await.unwrap();
        let assignment = repo.create_assignment("Sort a list", "desc", true).await.unwrap();
        let created = repo
            .create_submission_with_source(
                &candidate.candidate_public_id,
                &assignment.assignment_public_id,
                SourceType::ApiUpload,
                "ext-1",
                SubmissionStatus::Uploaded,
                BTreeMap::new(),
            )
            .await
            .unwrap();
        created.submission_public_id
    }

    #[tokio::test]
    async fn losing_the_lease_mid_process_fails_the_tick_without_finalizing() {
        let repo = Arc::new(InMemoryWorkRepository::new());
        let public_id = seed(&repo).await;

        let process: ProcessFn = Arc::new(|_claim: WorkItemClaim| {
            Box::pin(async move {
                tokio::time::sleep(StdDuration::from_millis(30)).await;
                ProcessResult::ok("done")
            }) as Pin<Box<dyn Future<Output = ProcessResult> + Send>>
        });

        let mut worker = WorkerLoop::new("normalize-worker", Stage::Normalized, repo.clone(), process);
        worker.claim_lease_seconds = 0;
        worker.heartbeat_interval_ms = 5;

        let err = worker.run_once().await.unwrap_err();
        assert!(matches!(err, CoreError::Invariant(_)));

        // The claim is still held (lost, not finalized) — the submission stays
        // in its in-progress state rather than being routed by finalize.
        let snapshot = repo.get_submission(&public_id).await.unwrap().unwrap();
        assert_eq!(snapshot.status, SubmissionStatus::NormalizationInProgress);
    }

    #[tokio::test]
    async fn a_successful_result_with_an_artifact_ref_links_it_before_finalizing() {
        let repo = Arc::new(InMemoryWorkRepository::new());
        seed(&repo).await;

        let process: ProcessFn = Arc::new(|_claim: WorkItemClaim| {
            Box::pin(async move {
                ProcessResult::ok_with_artifact("done", "file://normalized/sub_1/v1.json".to_string(), "v1".to_string())
            }) as Pin<Box<dyn Future<Output = ProcessResult> + Send>>
        });

        let worker = WorkerLoop::new("normalize-worker", Stage::Normalized, repo.clone(), process);
        let claimed = worker.run_once().await.unwrap();
        assert!(claimed);

        let artifact_ref = repo.get_artifact_ref(1, Stage::Normalized).await.unwrap();
        assert_eq!(artifact_ref.as_deref(), Some("file://normalized/sub_1/v1.json"));
    }
}
