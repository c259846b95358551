use super::context::ToolContext;
use super::error::ToolError;
use crate::agent::ArtifactEvent;
use crate::agent::preamble::document_preamble;
use crate::store::{Document, DocumentKind};
use rig::{completion::ToolDefinition, tool::Tool};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Deserialize, Serialize)]
pub struct CreateDocumentArgs {
    pub title: String,
    pub kind: DocumentKind,
}

#[derive(Clone)]
pub struct CreateDocument {
    pub ctx: ToolContext,
}

impl CreateDocument {
    async fn create(&self, args: &CreateDocumentArgs) -> Result<Value, ToolError> {
        let title = args.title.trim();
        if title.is_empty() {
            return Err(ToolError::InvalidArgs("title must not be empty".into()));
        }

        let id = Uuid::new_v4().to_string();
        self.ctx.artifact(ArtifactEvent::Kind(args.kind)).await;
        self.ctx.artifact(ArtifactEvent::Id(id.clone())).await;
        self.ctx
            .artifact(ArtifactEvent::Title(title.to_string()))
            .await;
        self.ctx.artifact(ArtifactEvent::Clear).await;

        let content = self
            .ctx
            .draft(document_preamble(args.kind), title)
            .await?;
        self.ctx.stream_content(&content).await;
        self.ctx.artifact(ArtifactEvent::Finish).await;

        self.ctx
            .documents
            .save_document(Document {
                id: id.clone(),
                user_id: self.ctx.user_id.clone(),
                title: title.to_string(),
                kind: args.kind,
                content,
                created_at_us: chrono::Utc::now().timestamp_micros(),
            })
            .await
            .map_err(|e| ToolError::DocumentFailed(e.to_string()))?;

        info!("Created {} document {}", args.kind.as_str(), id);
        Ok(json!({
            "id": id,
            "title": title,
            "kind": args.kind,
            "content": "A document was created and is now visible to the user."
        }))
    }
}

impl Tool for CreateDocument {
    const NAME: &'static str = "createDocument";

    type Error = ToolError;
    type Args = CreateDocumentArgs;
    type Output = String;

    async fn definition(&self, _prompt: String) -> ToolDefinition {
        ToolDefinition {
            name: Self::NAME.to_string(),
            description: "Create a document for writing or content creation activities. \
                          The document content is generated from the title and shown to the user."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "title": {
                        "type": "string",
                        "description": "Title of the document, also used as the writing prompt"
                    },
                    "kind": {
                        "type": "string",
                        "enum": ["text", "code", "sheet"],
                        "description": "Kind of document"
                    }
                },
                "required": ["title", "kind"]
            }),
        }
    }

    async fn call(&self, args: Self::Args) -> Result<Self::Output, Self::Error> {
        self.ctx
            .traced(Self::NAME, &args, self.create(&args))
            .await
    }
}
