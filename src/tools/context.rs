use super::error::ToolError;
use crate::agent::{ArtifactEvent, StreamEvent, TextGenerator};
use crate::models::ProviderHandle;
use crate::store::{Document, DocumentStore};
use crate::utils::word_chunks;
use serde::Serialize;
use serde_json::{Value, json};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Everything a tool handler may touch during one chat turn.
#[derive(Clone)]
pub struct ToolContext {
    pub user_id: String,
    pub sink: mpsc::Sender<StreamEvent>,
    pub documents: Arc<dyn DocumentStore>,
    pub writer: Arc<dyn TextGenerator>,
    pub artifact_model: ProviderHandle,
    pub http: reqwest::Client,
}

impl ToolContext {
    /// Runs `work` between a `tool_call` and a `tool_result` event and hands
    /// the result back to the model as JSON text.
    pub async fn traced<A, Fut>(&self, tool_name: &str, args: &A, work: Fut) -> Result<String, ToolError>
    where
        A: Serialize,
        Fut: Future<Output = Result<Value, ToolError>>,
    {
        let tool_call_id = format!("call_{}", Uuid::new_v4().simple());
        let args = serde_json::to_value(args).unwrap_or(Value::Null);
        info!("Tool {} called with {}", tool_name, args);

        self.emit(StreamEvent::ToolCall {
            tool_call_id: tool_call_id.clone(),
            tool_name: tool_name.to_string(),
            args,
        })
        .await;

        let outcome = work.await;
        let result = match &outcome {
            Ok(value) => value.clone(),
            Err(e) => {
                warn!("Tool {} failed: {}", tool_name, e);
                json!({ "error": e.to_string() })
            }
        };

        self.emit(StreamEvent::ToolResult {
            tool_call_id,
            tool_name: tool_name.to_string(),
            result,
        })
        .await;

        outcome.map(|value| value.to_string())
    }

    pub async fn emit(&self, event: StreamEvent) {
        let _ = self.sink.send(event).await;
    }

    pub async fn artifact(&self, event: ArtifactEvent) {
        self.emit(StreamEvent::Artifact { artifact: event }).await;
    }

    /// Streams document content to the side panel one word at a time.
    pub async fn stream_content(&self, content: &str) {
        for chunk in word_chunks(content) {
            self.artifact(ArtifactEvent::TextDelta(chunk.to_string()))
                .await;
        }
    }

    /// Latest version of a document owned by the current user. Documents of
    /// other users are reported as missing.
    pub async fn owned_document(&self, id: &str) -> Result<Document, ToolError> {
        let document = self
            .documents
            .get_document(id)
            .await
            .map_err(|e| ToolError::DocumentFailed(e.to_string()))?
            .filter(|d| d.user_id == self.user_id);

        document.ok_or_else(|| {
            warn!("Document {} not found for user {}", id, self.user_id);
            ToolError::DocumentNotFound(id.to_string())
        })
    }

    pub async fn draft(&self, system: &str, prompt: &str) -> Result<String, ToolError> {
        self.writer
            .generate(&self.artifact_model, system, prompt)
            .await
            .map_err(|e| ToolError::GenerationFailed(e.to_string()))
    }
}
