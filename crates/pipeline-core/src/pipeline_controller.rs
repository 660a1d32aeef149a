//! Test-only composition helper that drives a full pipeline run without
//! standing up four concurrent runners. Not used by `pipeline-server`; it
//! exists purely as test infrastructure for exercising multi-stage flows
//! end to end inside one `#[tokio::test]`.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use crate::errors::CoreResult;
use crate::lifecycle::Stage;
use crate::repository::WorkRepository;
use crate::worker::{ProcessFn, WorkerLoop};

/// Drives every claimable item for a fixed set of stages to completion.
///
/// Each tick runs one `claim_next`/`process`/`finalize` cycle per stage in
/// turn; ticking stops once a full pass over every stage claims nothing.
pub struct PipelineController {
    repository: Arc<dyn WorkRepository>,
    stages: BTreeMap<Stage, (String, ProcessFn)>,
}

impl PipelineController {
    pub fn new(repository: Arc<dyn WorkRepository>) -> Self {
        Self {
            repository,
            stages: BTreeMap::new(),
        }
    }

    pub fn with_stage(mut self, stage: Stage, role: impl Into<String>, process: ProcessFn) -> Self {
        self.stages.insert(stage, (role.into(), process));
        self
    }

    /// Runs claim/process/finalize cycles across every registered stage,
    /// in stage order, until a full pass claims nothing. Returns the total
    /// number of items processed.
    pub async fn drain(&self) -> CoreResult<u64> {
        let mut total = 0u64;
        loop {
            let mut claimed_this_pass = false;
            for (stage, (role, process)) in &self.stages {
                let worker = WorkerLoop::new(role.clone(), *stage, self.repository.clone(), process.clone());
                while worker.run_once().await? {
                    claimed_this_pass = true;
                    total += 1;
                }
            }
            debug!(total, "pipeline controller pass complete");
            if !claimed_this_pass {
                break;
            }
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::pin::Pin;

    use super::*;
    use crate::lifecycle::Stage;
    use crate::memory_repository::InMemoryWorkRepository;
    use crate::types::{ProcessResult, SourceType, WorkItemClaim};

    fn pass_through(tag: &'static str) -> ProcessFn {
        Arc::new(move |_claim: WorkItemClaim| {
            Box::pin(async move { ProcessResult::ok(tag) }) as Pin<Box<dyn std::future::Future<Output = ProcessResult> + Send>>
        })
    }

    #[tokio::test]
    async fn drains_a_submission_through_every_stage() {
        let repo = Arc::new(InMemoryWorkRepository::new());
        let candidate = repo.create_candidate("Ada", "Lovelace").await.unwrap();
        let assignment = repo.create_assignment("Assignment 1", "desc", true).await.unwrap();
        let result = repo
            .create_submission_with_source(
                &candidate.candidate_public_id,
                &assignment.assignment_public_id,
                SourceType::ApiUpload,
                "ext-1",
                crate::lifecycle::SubmissionStatus::Uploaded,
                BTreeMap::new(),
            )
            .await
            .unwrap();

        let controller = PipelineController::new(repo.clone())
            .with_stage(Stage::Normalized, "normalize-worker", pass_through("normalized"))
            .with_stage(Stage::LlmOutput, "evaluate-worker", pass_through("evaluated"))
            .with_stage(Stage::Exports, "deliver-worker", pass_through("delivered"));

        let processed = controller.drain().await.unwrap();
        assert_eq!(processed, 3);

        let snapshot = repo.get_submission(&result.submission_public_id).await.unwrap().unwrap();
        assert_eq!(snapshot.status, crate::lifecycle::SubmissionStatus::Delivered);
    }

    #[tokio::test]
    async fn drain_is_a_no_op_on_an_empty_queue() {
        let repo = Arc::new(InMemoryWorkRepository::new());
        let controller = PipelineController::new(repo).with_stage(Stage::Normalized, "normalize-worker", pass_through("normalized"));
        let processed = controller.drain().await.unwrap();
        assert_eq!(processed, 0);
    }
}
