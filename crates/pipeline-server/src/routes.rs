use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use pipeline_core::artifacts::ObjectStore;
use pipeline_core::repository::WorkRepository;
use pipeline_core::runner::WorkerRuntimeSnapshot;
use pipeline_core::types::{SourceType, SubmissionListQuery};
use pipeline_core::SubmissionStatus;
use serde::{Deserialize, Serialize};

use crate::AppState;

#[derive(Debug, serde::Serialize)]
struct ErrorBody {
    error: String,
}

fn core_error_response(err: pipeline_core::CoreError) -> Response {
    use pipeline_core::CoreError::*;
    let status = match err {
        Invariant(_) => StatusCode::CONFLICT,
        Validation(_) => StatusCode::BAD_REQUEST,
        Storage(_) | Database(_) | Pool(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(ErrorBody { error: err.to_string() })).into_response()
}

#[derive(Debug, Serialize)]
pub struct SubmissionCreatedResponse {
    pub submission_public_id: String,
    pub status: String,
    pub created: bool,
}

pub async fn upload_submission(State(state): State<Arc<AppState>>, mut multipart: Multipart) -> Response {
    let mut first_name = None;
    let mut last_name = None;
    let mut assignment_public_id = None;
    let mut source_external_id = None;
    let mut file_bytes: Option<Vec<u8>> = None;

    while let Ok(Some(field)) = multipart.next_field().await {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "candidate_first_name" => first_name = field.text().await.ok(),
            "candidate_last_name" => last_name = field.text().await.ok(),
            "assignment_public_id" => assignment_public_id = field.text().await.ok(),
            "source_external_id" => source_external_id = field.text().await.ok(),
            "file" => file_bytes = field.bytes().await.ok().map(|b| b.to_vec()),
            _ => {}
        }
    }

    let (Some(first_name), Some(last_name), Some(assignment_public_id), Some(source_external_id)) =
        (first_name, last_name, assignment_public_id, source_external_id)
    else {
        return (StatusCode::BAD_REQUEST, Json(ErrorBody { error: "missing required form field".into() }))
            .into_response();
    };

    let candidate = match state
        .repository
        .get_or_create_candidate_by_source(
            SourceType::ApiUpload,
            &source_external_id,
            &first_name,
            &last_name,
            BTreeMap::new(),
        )
        .await
    {
        Ok(c) => c,
        Err(e) => return core_error_response(e),
    };

    let result = match state
        .repository
        .create_submission_with_source(
            &candidate.candidate_public_id,
            &assignment_public_id,
            SourceType::ApiUpload,
            &source_external_id,
            SubmissionStatus::Uploaded,
            BTreeMap::new(),
        )
        .await
    {
        Ok(r) => r,
        Err(e) => return core_error_response(e),
    };

    if let Some(bytes) = file_bytes {
        let key = format!("raw/{}.bin", result.submission_public_id);
        if let Err(e) = state.object_store.put_bytes(&key, bytes).await {
            tracing::warn!(error = %e, "failed to persist uploaded raw bytes");
        }
    }

    Json(SubmissionCreatedResponse {
        submission_public_id: result.submission_public_id,
        status: result.status.as_str().to_string(),
        created: result.created,
    })
    .into_response()
}

#[derive(Debug, Deserialize)]
pub struct TelegramWebhookPayload {
    pub update_id: String,
    pub candidate_first_name: String,
    pub candidate_last_name: String,
    pub assignment_public_id: String,
    pub file_id: String,
}

pub async fn telegram_webhook(State(state): State<Arc<AppState>>, Json(payload): Json<TelegramWebhookPayload>) -> Response {
    let candidate = match state
        .repository
        .get_or_create_candidate_by_source(
            SourceType::TelegramWebhook,
            &payload.update_id,
            &payload.candidate_first_name,
            &payload.candidate_last_name,
            BTreeMap::new(),
        )
        .await
    {
        Ok(c) => c,
        Err(e) => return core_error_response(e),
    };

    let result = match state
        .repository
        .create_submission_with_source(
            &candidate.candidate_public_id,
            &payload.assignment_public_id,
            SourceType::TelegramWebhook,
            &payload.update_id,
            SubmissionStatus::TelegramUpdateReceived,
            BTreeMap::from([("file_id".to_string(), payload.file_id)]),
        )
        .await
    {
        Ok(r) => r,
        Err(e) => return core_error_response(e),
    };

    Json(SubmissionCreatedResponse {
        submission_public_id: result.submission_public_id,
        status: result.status.as_str().to_string(),
        created: result.created,
    })
    .into_response()
}

#[derive(Debug, Deserialize)]
pub struct ListSubmissionsParams {
    pub status: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

pub async fn list_submissions(State(state): State<Arc<AppState>>, Query(params): Query<ListSubmissionsParams>) -> Response {
    let mut query = SubmissionListQuery::default();
    if let Some(status) = params.status.as_deref().and_then(SubmissionStatus::from_str) {
        query.statuses = Some(vec![status]);
    }
    if let Some(limit) = params.limit {
        query.limit = limit;
    }
    if let Some(offset) = params.offset {
        query.offset = offset;
    }

    match state.repository.list_submissions(&query).await {
        Ok(items) => Json(items).into_response(),
        Err(e) => core_error_response(e),
    }
}

pub async fn get_submission(State(state): State<Arc<AppState>>, Path(submission_public_id): Path<String>) -> Response {
    match state.repository.get_submission(&submission_public_id).await {
        Ok(Some(snapshot)) => Json(snapshot).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => core_error_response(e),
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub ingest: WorkerRuntimeSnapshot,
    pub normalize: WorkerRuntimeSnapshot,
    pub evaluate: WorkerRuntimeSnapshot,
    pub deliver: WorkerRuntimeSnapshot,
}

pub async fn health(State(state): State<Arc<AppState>>) -> Response {
    Json(HealthResponse {
        ingest: state.runtime_state.ingest.snapshot(),
        normalize: state.runtime_state.normalize.snapshot(),
        evaluate: state.runtime_state.evaluate.snapshot(),
        deliver: state.runtime_state.deliver.snapshot(),
    })
    .into_response()
}
