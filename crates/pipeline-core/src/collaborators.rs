//! Narrow external-collaborator boundaries. The core depends only on these
//! traits; format parsers, model transport, and notification transport are
//! implemented elsewhere against them.

use async_trait::async_trait;

use crate::errors::CoreResult;

#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub model: String,
    pub temperature: f64,
    pub seed: Option<i64>,
    pub response_language: String,
}

#[derive(Debug, Clone)]
pub struct ModelResponse {
    pub raw_text: String,
    pub raw_json: Option<serde_json::Value>,
    pub tokens_input: u32,
    pub tokens_output: u32,
    pub latency_ms: u32,
}

#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn evaluate(&self, request: ModelRequest) -> CoreResult<ModelResponse>;
}

#[async_trait]
pub trait NotificationTransport: Send + Sync {
    /// Must be idempotent on `submission_id`.
    async fn send_result_notification(&self, submission_id: &str, message: &str) -> CoreResult<Option<String>>;
}

#[derive(Debug, Clone)]
pub struct WebhookUpdate {
    pub update_id: String,
    pub candidate_first_name: String,
    pub candidate_last_name: String,
    pub assignment_public_id: String,
    pub file_id: String,
    pub file_name: Option<String>,
}

#[async_trait]
pub trait WebhookSource: Send + Sync {
    async fn get_file_bytes(&self, file_id: &str) -> CoreResult<Vec<u8>>;
}
