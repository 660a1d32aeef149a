//! Snapshot, query, and projection types exchanged across the repository boundary.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::lifecycle::{Stage, SubmissionStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    ApiUpload,
    TelegramWebhook,
}

impl SourceType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ApiUpload => "api_upload",
            Self::TelegramWebhook => "telegram_webhook",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateSnapshot {
    pub candidate_public_id: String,
    pub first_name: String,
    pub last_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentSnapshot {
    pub assignment_public_id: String,
    pub title: String,
    pub description: String,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionSourceSnapshot {
    pub submission_public_id: String,
    pub source_type: SourceType,
    pub source_external_id: String,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct UpsertSourceResult {
    pub submission_id: i64,
    pub submission_public_id: String,
    pub status: SubmissionStatus,
    pub created: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionSnapshot {
    pub submission_id: i64,
    pub submission_public_id: String,
    pub candidate_public_id: String,
    pub assignment_public_id: String,
    pub status: SubmissionStatus,
    pub attempt_telegram_ingest: u32,
    pub attempt_normalization: u32,
    pub attempt_evaluation: u32,
    pub attempt_delivery: u32,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub last_error_code: Option<String>,
    pub last_error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SubmissionSnapshot {
    pub fn attempt_for(&self, stage: Stage) -> u32 {
        match stage {
            Stage::Raw => self.attempt_telegram_ingest,
            Stage::Normalized => self.attempt_normalization,
            Stage::LlmOutput => self.attempt_evaluation,
            Stage::Exports => self.attempt_delivery,
        }
    }
}

/// A leased claim on one submission for one stage.
#[derive(Debug, Clone)]
pub struct WorkItemClaim {
    pub submission_id: i64,
    pub submission_public_id: String,
    pub stage: Stage,
    pub attempt: u32,
    pub lease_expires_at: DateTime<Utc>,
}

/// Outcome a stage's process function hands back to the worker loop.
#[derive(Debug, Clone)]
pub struct ProcessResult {
    pub success: bool,
    pub detail: String,
    pub artifact_ref: Option<String>,
    pub artifact_version: Option<String>,
    pub error_code: Option<String>,
    pub retry_classification: Option<crate::errors::RetryClassification>,
}

impl Default for ProcessResult {
    fn default() -> Self {
        Self {
            success: false,
            detail: String::new(),
            artifact_ref: None,
            artifact_version: None,
            error_code: None,
            retry_classification: None,
        }
    }
}

impl ProcessResult {
    pub fn ok(detail: impl Into<String>) -> Self {
        Self {
            success: true,
            detail: detail.into(),
            ..Default::default()
        }
    }

    pub fn ok_with_artifact(detail: impl Into<String>, artifact_ref: String, version: String) -> Self {
        Self {
            success: true,
            detail: detail.into(),
            artifact_ref: Some(artifact_ref),
            artifact_version: Some(version),
            ..Default::default()
        }
    }

    pub fn failed(detail: impl Into<String>, error_code: impl Into<String>) -> Self {
        Self {
            success: false,
            detail: detail.into(),
            error_code: Some(error_code.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationRecord {
    pub submission_id: i64,
    pub score_1_10: u8,
    pub criteria_scores: BTreeMap<String, f64>,
    pub organizer_feedback: String,
    pub candidate_feedback: String,
    pub ai_likelihood: Option<f64>,
    pub ai_confidence: Option<f64>,
    pub reproducibility_subset: ReproducibilitySubset,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReproducibilitySubset {
    pub chain_version: String,
    pub spec_version: String,
    pub model: String,
    pub response_language: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRunRecord {
    pub submission_id: i64,
    pub provider: String,
    pub model: String,
    pub api_base: String,
    pub chain_version: String,
    pub spec_version: String,
    pub response_language: String,
    pub temperature: f64,
    pub seed: Option<i64>,
    pub tokens_input: u32,
    pub tokens_output: u32,
    pub latency_ms: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub submission_id: i64,
    pub channel: String,
    pub status: String,
    pub external_message_id: Option<String>,
    pub attempts: u32,
    pub last_error_code: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionFieldGroup {
    Core,
    Candidate,
    Assignment,
    Source,
    Evaluation,
    Ops,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionSortBy {
    CreatedAt,
    UpdatedAt,
    Score1To10,
    Status,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone)]
pub struct SubmissionListQuery {
    pub statuses: Option<Vec<SubmissionStatus>>,
    pub submission_ids: Option<Vec<String>>,
    pub candidate_public_id: Option<String>,
    pub assignment_public_id: Option<String>,
    pub source_type: Option<SourceType>,
    pub has_error: Option<bool>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
    pub include: Vec<SubmissionFieldGroup>,
    pub sort_by: SubmissionSortBy,
    pub sort_order: SortOrder,
    pub limit: u32,
    pub offset: u32,
}

impl Default for SubmissionListQuery {
    fn default() -> Self {
        Self {
            statuses: None,
            submission_ids: None,
            candidate_public_id: None,
            assignment_public_id: None,
            source_type: None,
            has_error: None,
            created_from: None,
            created_to: None,
            include: vec![SubmissionFieldGroup::Core],
            sort_by: SubmissionSortBy::CreatedAt,
            sort_order: SortOrder::Desc,
            limit: 100,
            offset: 0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmissionListItemCore {
    pub submission_public_id: String,
    pub status: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmissionListItemCandidate {
    pub candidate_public_id: String,
    pub first_name: String,
    pub last_name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmissionListItemAssignment {
    pub assignment_public_id: String,
    pub title: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmissionListItemSource {
    pub source_type: String,
    pub source_external_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmissionListItemEvaluation {
    pub score_1_10: Option<u8>,
    pub organizer_feedback: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmissionListItemOps {
    pub last_error_code: Option<String>,
    pub last_error_message: Option<String>,
    pub claimed_by: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionListItem {
    pub submission_id: i64,
    pub core: SubmissionListItemCore,
    pub candidate: Option<SubmissionListItemCandidate>,
    pub assignment: Option<SubmissionListItemAssignment>,
    pub source: Option<SubmissionListItemSource>,
    pub evaluation: Option<SubmissionListItemEvaluation>,
    pub ops: Option<SubmissionListItemOps>,
}
