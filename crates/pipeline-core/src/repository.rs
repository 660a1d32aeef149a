//! The work repository boundary: the one shared-mutable resource in the system.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::errors::CoreResult;
use crate::lifecycle::{Stage, SubmissionStatus};
use crate::types::{
    AssignmentSnapshot, CandidateSnapshot, DeliveryRecord, EvaluationRecord, ModelRunRecord,
    SourceType, SubmissionListItem, SubmissionListQuery, SubmissionSnapshot, UpsertSourceResult,
    WorkItemClaim,
};

#[async_trait]
pub trait WorkRepository: Send + Sync {
    async fn create_candidate(&self, first_name: &str, last_name: &str) -> CoreResult<CandidateSnapshot>;

    async fn get_or_create_candidate_by_source(
        &self,
        source_type: SourceType,
        source_external_id: &str,
        first_name: &str,
        last_name: &str,
        metadata: BTreeMap<String, String>,
    ) -> CoreResult<CandidateSnapshot>;

    async fn create_assignment(&self, title: &str, description: &str, is_active: bool) -> CoreResult<AssignmentSnapshot>;

    async fn list_assignments(&self, active_only: bool) -> CoreResult<Vec<AssignmentSnapshot>>;

    #[allow(clippy::too_many_arguments)]
    async fn create_submission_with_source(
        &self,
        candidate_public_id: &str,
        assignment_public_id: &str,
        source_type: SourceType,
        source_external_id: &str,
        initial_status: SubmissionStatus,
        metadata: BTreeMap<String, String>,
    ) -> CoreResult<UpsertSourceResult>;

    async fn get_submission(&self, submission_public_id: &str) -> CoreResult<Option<SubmissionSnapshot>>;

    async fn list_submissions(&self, query: &SubmissionListQuery) -> CoreResult<Vec<SubmissionListItem>>;

    async fn claim_next(&self, stage: Stage, worker_id: &str, lease_seconds: i64) -> CoreResult<Option<WorkItemClaim>>;

    async fn heartbeat_claim(&self, submission_id: i64, stage: Stage, worker_id: &str, lease_seconds: i64) -> CoreResult<bool>;

    async fn reclaim_expired_claims(&self, stage: Stage) -> CoreResult<u64>;

    async fn transition_state(&self, submission_id: i64, from: SubmissionStatus, to: SubmissionStatus) -> CoreResult<()>;

    async fn link_artifact(&self, submission_id: i64, stage: Stage, artifact_ref: &str, artifact_version: Option<&str>) -> CoreResult<()>;

    async fn get_artifact_ref(&self, submission_id: i64, stage: Stage) -> CoreResult<Option<String>>;

    #[allow(clippy::too_many_arguments)]
    async fn finalize(
        &self,
        submission_id: i64,
        stage: Stage,
        worker_id: &str,
        success: bool,
        detail: &str,
        error_code: Option<&str>,
    ) -> CoreResult<SubmissionStatus>;

    async fn persist_evaluation(&self, record: EvaluationRecord) -> CoreResult<()>;

    async fn persist_llm_run(&self, record: ModelRunRecord) -> CoreResult<()>;

    async fn persist_delivery(&self, record: DeliveryRecord) -> CoreResult<()>;
}
