use super::context::ToolContext;
use super::error::ToolError;
use crate::agent::ArtifactEvent;
use crate::agent::preamble::update_document_preamble;
use crate::store::Document;
use rig::{completion::ToolDefinition, tool::Tool};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;

#[derive(Debug, Deserialize, Serialize)]
pub struct UpdateDocumentArgs {
    pub id: String,
    pub description: String,
}

#[derive(Clone)]
pub struct UpdateDocument {
    pub ctx: ToolContext,
}

impl UpdateDocument {
    async fn update(&self, args: &UpdateDocumentArgs) -> Result<Value, ToolError> {
        let current = self.ctx.owned_document(&args.id).await?;

        self.ctx.artifact(ArtifactEvent::Clear).await;

        let content = self
            .ctx
            .draft(
                &update_document_preamble(current.kind, &current.content),
                &args.description,
            )
            .await?;
        self.ctx.stream_content(&content).await;
        self.ctx.artifact(ArtifactEvent::Finish).await;

        self.ctx
            .documents
            .save_document(Document {
                content,
                created_at_us: chrono::Utc::now().timestamp_micros(),
                ..current.clone()
            })
            .await
            .map_err(|e| ToolError::DocumentFailed(e.to_string()))?;

        info!("Saved new version of document {}", current.id);
        Ok(json!({
            "id": current.id,
            "title": current.title,
            "kind": current.kind,
            "content": "The document has been updated successfully."
        }))
    }
}

impl Tool for UpdateDocument {
    const NAME: &'static str = "updateDocument";

    type Error = ToolError;
    type Args = UpdateDocumentArgs;
    type Output = String;

    async fn definition(&self, _prompt: String) -> ToolDefinition {
        ToolDefinition {
            name: Self::NAME.to_string(),
            description: "Update an existing document with the given description of changes".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "id": {
                        "type": "string",
                        "description": "The ID of the document to update"
                    },
                    "description": {
                        "type": "string",
                        "description": "The description of changes that need to be made"
                    }
                },
                "required": ["id", "description"]
            }),
        }
    }

    async fn call(&self, args: Self::Args) -> Result<Self::Output, Self::Error> {
        self.ctx
            .traced(Self::NAME, &args, self.update(&args))
            .await
    }
}
