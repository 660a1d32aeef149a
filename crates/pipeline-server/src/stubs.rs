//! Stub collaborator implementations. Real format parsers, a real model
//! transport, and a real notification transport are deliberately out of
//! scope here — these stand in so the worker loops have something to drive
//! against, mirroring the stub client the distilled system ships for tests.

use async_trait::async_trait;
use pipeline_core::collaborators::{ModelClient, ModelRequest, ModelResponse, NotificationTransport, WebhookSource};
use pipeline_core::errors::CoreResult;

pub struct StubModelClient;

#[async_trait]
impl ModelClient for StubModelClient {
    async fn evaluate(&self, request: ModelRequest) -> CoreResult<ModelResponse> {
        Ok(ModelResponse {
            raw_text: format!("stub evaluation for prompt of {} chars", request.user_prompt.len()),
            raw_json: None,
            tokens_input: request.user_prompt.len() as u32 / 4,
            tokens_output: 64,
            latency_ms: 5,
        })
    }
}

pub struct StubNotificationTransport;

#[async_trait]
impl NotificationTransport for StubNotificationTransport {
    async fn send_result_notification(&self, submission_id: &str, _message: &str) -> CoreResult<Option<String>> {
        Ok(Some(format!("stub-msg-{submission_id}")))
    }
}

pub struct StubWebhookSource;

#[async_trait]
impl WebhookSource for StubWebhookSource {
    async fn get_file_bytes(&self, file_id: &str) -> CoreResult<Vec<u8>> {
        Ok(format!("stub bytes for {file_id}").into_bytes())
    }
}
