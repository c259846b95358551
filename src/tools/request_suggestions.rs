use super::context::ToolContext;
use super::error::ToolError;
use crate::agent::ArtifactEvent;
use crate::agent::preamble::SUGGESTIONS_PREAMBLE;
use crate::store::Suggestion;
use rig::{completion::ToolDefinition, tool::Tool};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, warn};
use uuid::Uuid;

const MAX_SUGGESTIONS: usize = 5;

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestSuggestionsArgs {
    pub document_id: String,
}

#[derive(Clone)]
pub struct RequestSuggestions {
    pub ctx: ToolContext,
}

#[derive(Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DraftSuggestion {
    original_sentence: String,
    suggested_sentence: String,
    #[serde(default)]
    description: Option<String>,
}

/// Pulls the JSON array out of a model reply, tolerating code fences or
/// prose around it.
fn parse_suggestions(raw: &str) -> Result<Vec<DraftSuggestion>, ToolError> {
    let start = raw.find('[');
    let end = raw.rfind(']');
    let body = match (start, end) {
        (Some(s), Some(e)) if s < e => &raw[s..=e],
        _ => {
            return Err(ToolError::GenerationFailed(
                "no suggestion list in model reply".into(),
            ));
        }
    };

    let mut drafts: Vec<DraftSuggestion> = serde_json::from_str(body)
        .map_err(|e| ToolError::GenerationFailed(format!("Failed to parse suggestions: {}", e)))?;
    drafts.retain(|d| !d.original_sentence.trim().is_empty());
    drafts.truncate(MAX_SUGGESTIONS);
    Ok(drafts)
}

impl RequestSuggestions {
    async fn suggest(&self, args: &RequestSuggestionsArgs) -> Result<Value, ToolError> {
        let document = self.ctx.owned_document(&args.document_id).await?;

        let raw = self
            .ctx
            .draft(SUGGESTIONS_PREAMBLE, &document.content)
            .await?;
        let drafts = parse_suggestions(&raw)?;

        let mut suggestions = Vec::with_capacity(drafts.len());
        for draft in drafts {
            let suggestion = Suggestion {
                id: Uuid::new_v4().to_string(),
                document_id: document.id.clone(),
                original_text: draft.original_sentence,
                suggested_text: draft.suggested_sentence,
                description: draft.description,
                is_resolved: false,
                user_id: self.ctx.user_id.clone(),
                created_at_us: chrono::Utc::now().timestamp_micros(),
            };
            self.ctx
                .artifact(ArtifactEvent::Suggestion(suggestion.clone()))
                .await;
            suggestions.push(suggestion);
        }

        let count = suggestions.len();
        if count == 0 {
            warn!("Model returned no suggestions for document {}", document.id);
        } else {
            self.ctx
                .documents
                .save_suggestions(suggestions)
                .await
                .map_err(|e| ToolError::DocumentFailed(e.to_string()))?;
        }

        info!("Saved {} suggestions for document {}", count, document.id);
        Ok(json!({
            "id": document.id,
            "title": document.title,
            "kind": document.kind,
            "message": "Suggestions have been added to the document"
        }))
    }
}

impl Tool for RequestSuggestions {
    const NAME: &'static str = "requestSuggestions";

    type Error = ToolError;
    type Args = RequestSuggestionsArgs;
    type Output = String;

    async fn definition(&self, _prompt: String) -> ToolDefinition {
        ToolDefinition {
            name: Self::NAME.to_string(),
            description: "Request suggestions for a document".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "documentId": {
                        "type": "string",
                        "description": "The ID of the document to request edits for"
                    }
                },
                "required": ["documentId"]
            }),
        }
    }

    async fn call(&self, args: Self::Args) -> Result<Self::Output, Self::Error> {
        self.ctx
            .traced(Self::NAME, &args, self.suggest(&args))
            .await
    }
}
