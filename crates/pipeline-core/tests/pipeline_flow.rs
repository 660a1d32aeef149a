//! End-to-end pipeline flow exercised through the crate's public API only
//! (no internal module access), the way a caller embedding this crate would.

use std::collections::BTreeMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use pipeline_core::lifecycle::{Stage, SubmissionStatus};
use pipeline_core::memory_repository::InMemoryWorkRepository;
use pipeline_core::pipeline_controller::PipelineController;
use pipeline_core::repository::WorkRepository;
use pipeline_core::types::{ProcessResult, SortOrder, SourceType, SubmissionListQuery, SubmissionSortBy, WorkItemClaim};
use pipeline_core::worker::ProcessFn;

fn pass_through(tag: &'static str) -> ProcessFn {
    Arc::new(move |_claim: WorkItemClaim| {
        Box::pin(async move { ProcessResult::ok(tag) }) as Pin<Box<dyn std::future::Future<Output = ProcessResult> + Send>>
    })
}

/// Fails every call up to `failures_before_success`, then succeeds.
fn flaky(failures_before_success: u32) -> ProcessFn {
    let attempts = Arc::new(AtomicU32::new(0));
    Arc::new(move |_claim: WorkItemClaim| {
        let attempts = attempts.clone();
        Box::pin(async move {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst);
            if attempt < failures_before_success {
                ProcessResult::failed("transient", "internal_error")
            } else {
                ProcessResult::ok("recovered")
            }
        }) as Pin<Box<dyn std::future::Future<Output = ProcessResult> + Send>>
    })
}

#[tokio::test]
async fn a_submission_that_retries_once_still_reaches_delivered() {
    let repo = Arc::new(InMemoryWorkRepository::new());
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

    let controller = PipelineController::new(repo.clone())
        .with_stage(Stage::Normalized, "normalize-worker", flaky(1))
        .with_stage(Stage::LlmOutput, "evaluate-worker", pass_through("evaluated"))
        .with_stage(Stage::Exports, "deliver-worker", pass_through("delivered"));

    controller.drain().await.unwrap();

    let snapshot = repo.get_submission(&created.submission_public_id).await.unwrap().unwrap();
    assert_eq!(snapshot.status, SubmissionStatus::Delivered);
    assert_eq!(snapshot.attempt_normalization, 2);
}

#[tokio::test]
async fn list_submissions_reflects_final_state_after_a_drain() {
    let repo = Arc::new(InMemoryWorkRepository::new());
    let candidate = repo.create_candidate("Ada", "Lovelace").await.unwrap();
    let assignment = repo.create_assignment("Sort a list", "desc", true).await.unwrap();

    for i in 0..2 {
        repo.create_submission_with_source(
            &candidate.candidate_public_id,
            &assignment.assignment_public_id,
            SourceType::ApiUpload,
            &format!("ext-{i}"),
            SubmissionStatus::Uploaded,
            BTreeMap::new(),
        )
        .await
        .unwrap();
    }

    let controller = PipelineController::new(repo.clone())
        .with_stage(Stage::Normalized, "normalize-worker", pass_through("normalized"))
        .with_stage(Stage::LlmOutput, "evaluate-worker", pass_through("evaluated"))
        .with_stage(Stage::Exports, "deliver-worker", pass_through("delivered"));
    controller.drain().await.unwrap();

    let query = SubmissionListQuery {
        statuses: Some(vec![SubmissionStatus::Delivered]),
        sort_by: SubmissionSortBy::CreatedAt,
        sort_order: SortOrder::Asc,
        ..Default::default()
    };
    let items = repo.list_submissions(&query).await.unwrap();
    assert_eq!(items.len(), 2);
    assert!(items.iter().all(|i| i.core.status == SubmissionStatus::Delivered.as_str()));
}
