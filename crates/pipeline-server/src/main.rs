mod routes;
mod storage;
mod stubs;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use pipeline_core::artifacts::{ExportRowArtifact, NormalizedArtifact, ObjectStore, VersionedArtifactRepository};
use pipeline_core::collaborators::{ModelClient, ModelRequest, NotificationTransport, WebhookSource};
use pipeline_core::config::Config;
use pipeline_core::lifecycle::Stage;
use pipeline_core::memory_repository::InMemoryWorkRepository;
use pipeline_core::repository::WorkRepository;
use pipeline_core::runner::{run_worker_until_stopped, WorkerRuntimeSettings, WorkerRuntimeState};
use pipeline_core::types::{ProcessResult, ReproducibilitySubset, WorkItemClaim};
use pipeline_core::worker::WorkerLoop;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub struct RuntimeStates {
    pub ingest: Arc<WorkerRuntimeState>,
    pub normalize: Arc<WorkerRuntimeState>,
    pub evaluate: Arc<WorkerRuntimeState>,
    pub deliver: Arc<WorkerRuntimeState>,
}

impl Default for RuntimeStates {
    fn default() -> Self {
        Self {
            ingest: Arc::new(WorkerRuntimeState::default()),
            normalize: Arc::new(WorkerRuntimeState::default()),
            evaluate: Arc::new(WorkerRuntimeState::default()),
            deliver: Arc::new(WorkerRuntimeState::default()),
        }
    }
}

pub struct AppState {
    pub repository: Arc<dyn WorkRepository>,
    pub object_store: Arc<dyn pipeline_core::artifacts::ObjectStore>,
    pub runtime_state: RuntimeStates,
}

async fn normalize_process(
    artifact_repo: Arc<VersionedArtifactRepository>,
    claim: WorkItemClaim,
) -> ProcessResult {
    let artifact = NormalizedArtifact::new(
        claim.submission_public_id.clone(),
        String::new(),
        pipeline_core::types::SourceType::ApiUpload,
        String::new(),
        Default::default(),
    );
    match artifact_repo.save_normalized(&claim.submission_public_id, &artifact).await {
        Ok(artifact_ref) => ProcessResult::ok_with_artifact("normalized", artifact_ref, "normalized:v1".into()),
        Err(e) => ProcessResult::failed(e.to_string(), "artifact_missing"),
    }
}

async fn evaluate_process(
    repository: Arc<dyn WorkRepository>,
    model: Arc<dyn ModelClient>,
    claim: WorkItemClaim,
) -> ProcessResult {
    let request = ModelRequest {
        system_prompt: "score this submission".to_string(),
        user_prompt: String::new(),
        model: "stub-model".to_string(),
        temperature: 0.0,
        seed: None,
        response_language: "en".to_string(),
    };
    let response = match model.evaluate(request).await {
        Ok(r) => r,
        Err(e) => return ProcessResult::failed(e.to_string(), "llm_provider_unavailable"),
    };

    let record = pipeline_core::types::EvaluationRecord {
        submission_id: claim.submission_id,
        score_1_10: 5,
        criteria_scores: Default::default(),
        organizer_feedback: response.raw_text.clone(),
        candidate_feedback: String::new(),
        ai_likelihood: None,
        ai_confidence: None,
        reproducibility_subset: ReproducibilitySubset {
            chain_version: "v1".to_string(),
            spec_version: "v1".to_string(),
            model: "stub-model".to_string(),
            response_language: "en".to_string(),
        },
    };
    if let Err(e) = repository.persist_evaluation(record).await {
        return ProcessResult::failed(e.to_string(), "internal_error");
    }
    ProcessResult::ok("evaluated")
}

async fn deliver_process(
    artifact_repo: Arc<VersionedArtifactRepository>,
    notifier: Arc<dyn NotificationTransport>,
    claim: WorkItemClaim,
) -> ProcessResult {
    let row = ExportRowArtifact {
        candidate_identifier: claim.submission_public_id.clone(),
        assignment_identifier: String::new(),
        score_1_10: 5,
        criteria_summary: String::new(),
        strengths: String::new(),
        issues: String::new(),
        recommendations: String::new(),
        chain_version: "v1".to_string(),
        model: "stub-model".to_string(),
        spec_version: "v1".to_string(),
        response_language: "en".to_string(),
        schema_version: "exports:v1".to_string(),
    };
    let artifact_ref = match artifact_repo
        .save_export_rows(&claim.submission_public_id, std::slice::from_ref(&row))
        .await
    {
        Ok(r) => r,
        Err(e) => return ProcessResult::failed(e.to_string(), "delivery_transport_failed"),
    };
    if let Err(e) = notifier
        .send_result_notification(&claim.submission_public_id, "your submission was scored")
        .await
    {
        return ProcessResult::failed(e.to_string(), "delivery_transport_failed");
    }
    ProcessResult::ok_with_artifact("delivered", artifact_ref, "exports:v1".to_string())
}

async fn ingest_process(
    webhook_source: Arc<dyn pipeline_core::collaborators::WebhookSource>,
    object_store: Arc<dyn pipeline_core::artifacts::ObjectStore>,
    claim: WorkItemClaim,
) -> ProcessResult {
    let bytes = match webhook_source.get_file_bytes(&claim.submission_public_id).await {
        Ok(b) => b,
        Err(e) => return ProcessResult::failed(e.to_string(), "telegram_file_fetch_failed"),
    };
    let key = format!("raw/{}.bin", claim.submission_public_id);
    match object_store.put_bytes(&key, bytes).await {
        Ok(artifact_ref) => ProcessResult::ok_with_artifact("fetched", artifact_ref, "raw:v1".to_string()),
        Err(e) => ProcessResult::failed(e.to_string(), "internal_error"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pipeline_server=info,pipeline_core=info,tower_http=warn")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    let repository: Arc<dyn WorkRepository> = Arc::new(InMemoryWorkRepository::new());
    let object_store: Arc<dyn pipeline_core::artifacts::ObjectStore> =
        Arc::new(storage::FsObjectStore::new(config.storage_root.clone()));
    let artifact_repo = Arc::new(VersionedArtifactRepository::new(
        object_store.clone(),
        &config.artifact_contract_version,
        config.artifact_compat_policy,
    ));
    let model_client: Arc<dyn ModelClient> = Arc::new(stubs::StubModelClient);
    let notifier: Arc<dyn NotificationTransport> = Arc::new(stubs::StubNotificationTransport);
    let webhook_source: Arc<dyn pipeline_core::collaborators::WebhookSource> = Arc::new(stubs::StubWebhookSource);

    let runtime_state = RuntimeStates::default();
    let settings = WorkerRuntimeSettings {
        poll_interval_ms: config.poll_interval_ms,
        idle_backoff_ms: config.idle_backoff_ms,
        error_backoff_ms: config.error_backoff_ms,
    };

    let ingest_webhook = webhook_source.clone();
    let ingest_object_store = object_store.clone();
    let ingest_worker = WorkerLoop {
        claim_lease_seconds: config.claim_lease_seconds,
        heartbeat_interval_ms: config.heartbeat_interval_ms,
        ..WorkerLoop::new(
            "ingest-worker",
            Stage::Raw,
            repository.clone(),
            Arc::new(move |claim| {
                let webhook = ingest_webhook.clone();
                let store = ingest_object_store.clone();
                Box::pin(async move { ingest_process(webhook, store, claim).await })
            }),
        )
    };

    let normalize_repo = artifact_repo.clone();
    let normalize_worker = WorkerLoop {
        claim_lease_seconds: config.claim_lease_seconds,
        heartbeat_interval_ms: config.heartbeat_interval_ms,
        ..WorkerLoop::new(
            "normalize-worker",
            Stage::Normalized,
            repository.clone(),
            Arc::new(move |claim| {
                let repo = normalize_repo.clone();
                Box::pin(async move { normalize_process(repo, claim).await })
            }),
        )
    };

    let evaluate_repository = repository.clone();
    let evaluate_model = model_client.clone();
    let evaluate_worker = WorkerLoop {
        claim_lease_seconds: config.claim_lease_seconds,
        heartbeat_interval_ms: config.heartbeat_interval_ms,
        ..WorkerLoop::new(
            "evaluate-worker",
            Stage::LlmOutput,
            repository.clone(),
            Arc::new(move |claim| {
                let repo = evaluate_repository.clone();
                let model = evaluate_model.clone();
                Box::pin(async move { evaluate_process(repo, model, claim).await })
            }),
        )
    };

    let deliver_artifacts = artifact_repo.clone();
    let deliver_notifier = notifier.clone();
    let deliver_worker = WorkerLoop {
        claim_lease_seconds: config.claim_lease_seconds,
        heartbeat_interval_ms: config.heartbeat_interval_ms,
        ..WorkerLoop::new(
            "deliver-worker",
            Stage::Exports,
            repository.clone(),
            Arc::new(move |claim| {
                let artifacts = deliver_artifacts.clone();
                let notifier = deliver_notifier.clone();
                Box::pin(async move { deliver_process(artifacts, notifier, claim).await })
            }),
        )
    };

    let stop = Arc::new(AtomicBool::new(false));
    tokio::spawn(run_worker_until_stopped(ingest_worker, settings, runtime_state.ingest.clone(), stop.clone()));
    tokio::spawn(run_worker_until_stopped(normalize_worker, settings, runtime_state.normalize.clone(), stop.clone()));
    tokio::spawn(run_worker_until_stopped(evaluate_worker, settings, runtime_state.evaluate.clone(), stop.clone()));
    tokio::spawn(run_worker_until_stopped(deliver_worker, settings, runtime_state.deliver.clone(), stop.clone()));

    let state = Arc::new(AppState {
        repository,
        object_store,
        runtime_state,
    });

    let app = Router::new()
        .route("/health", get(routes::health))
        .route("/webhook/telegram", post(routes::telegram_webhook))
        .route("/submissions/upload", post(routes::upload_submission))
        .route("/submissions", get(routes::list_submissions))
        .route("/submissions/:id", get(routes::get_submission))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = format!("{}:{}", config.web_bind, config.web_port);
    tracing::info!(%addr, "pipeline-server listening");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
