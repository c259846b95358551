use crate::entity::{conversations, documents, messages, suggestions};
use crate::message::{Conversation, Role, StoredMessage};
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use sea_orm::*;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>>;

    async fn create_conversation(&self, id: &str, user_id: &str, title: &str) -> Result<()>;

    /// Removes the conversation and all of its messages.
    async fn delete_conversation(&self, id: &str) -> Result<bool>;

    async fn save_messages(&self, messages: Vec<StoredMessage>) -> Result<()>;

    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<StoredMessage>>;
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn save_document(&self, document: Document) -> Result<()>;

    /// Latest version of a document.
    async fn get_document(&self, id: &str) -> Result<Option<Document>>;

    async fn save_suggestions(&self, suggestions: Vec<Suggestion>) -> Result<()>;

    async fn list_suggestions(&self, document_id: &str) -> Result<Vec<Suggestion>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Text,
    Code,
    Sheet,
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Text => "text",
            DocumentKind::Code => "code",
            DocumentKind::Sheet => "sheet",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(DocumentKind::Text),
            "code" => Some(DocumentKind::Code),
            "sheet" => Some(DocumentKind::Sheet),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub kind: DocumentKind,
    pub content: String,
    pub created_at_us: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Suggestion {
    pub id: String,
    pub document_id: String,
    pub original_text: String,
    pub suggested_text: String,
    pub description: Option<String>,
    pub is_resolved: bool,
    pub user_id: String,
    pub created_at_us: i64,
}

/// SQLite-backed store for conversations, messages, documents and suggestions.
pub struct SqliteStore {
    db_url: String,
}

impl SqliteStore {
    pub async fn new(data_dir: &Path) -> Result<Arc<Self>> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create data dir: {}", data_dir.display()))?;
        let db_url = format!("sqlite:{}?mode=rwc", data_dir.join("chat.db").display());
        Self::connect(db_url).await
    }

    pub async fn connect(db_url: String) -> Result<Arc<Self>> {
        tokio::task::spawn_blocking({
            let db_url = db_url.clone();
            move || -> Result<()> {
                let db = Database::connect(&db_url)?;

                db.get_schema_builder()
                    .register(conversations::Entity)
                    .register(messages::Entity)
                    .register(documents::Entity)
                    .register(suggestions::Entity)
                    .apply(&db)?;

                Ok(())
            }
        })
        .await??;

        info!("Chat store ready ({})", db_url);
        Ok(Arc::new(Self { db_url }))
    }

    async fn with_db<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&DatabaseConnection) -> Result<T> + Send + 'static,
    {
        let db_url = self.db_url.clone();
        tokio::task::spawn_blocking(move || -> Result<T> {
            let db = Database::connect(&db_url)?;
            op(&db)
        })
        .await?
    }
}

#[async_trait]
impl ChatStore for SqliteStore {
    async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        let id = id.to_string();
        self.with_db(move |db| {
            let row = conversations::Entity::find()
                .filter(conversations::Column::Id.eq(id))
                .one(db)?;
            Ok(row.map(Into::into))
        })
        .await
    }

    async fn create_conversation(&self, id: &str, user_id: &str, title: &str) -> Result<()> {
        let record = conversations::ActiveModel {
            rowid: NotSet,
            id: Set(id.to_string()),
            user_id: Set(user_id.to_string()),
            title: Set(title.to_string()),
            created_at_us: Set(chrono::Utc::now().timestamp_micros()),
        };

        self.with_db(move |db| {
            conversations::Entity::insert(record).exec(db)?;
            Ok(())
        })
        .await?;

        info!("Created conversation {}", id);
        Ok(())
    }

    async fn delete_conversation(&self, id: &str) -> Result<bool> {
        let id = id.to_string();
        let affected = self
            .with_db(move |db| {
                let txn = db.begin()?;
                messages::Entity::delete_many()
                    .filter(messages::Column::ConversationId.eq(&id))
                    .exec(&txn)?;
                let result = conversations::Entity::delete_many()
                    .filter(conversations::Column::Id.eq(&id))
                    .exec(&txn)?;
                txn.commit()?;
                Ok(result.rows_affected)
            })
            .await?;

        info!("Deleted conversation ({} rows)", affected);
        Ok(affected > 0)
    }

    async fn save_messages(&self, messages: Vec<StoredMessage>) -> Result<()> {
        if messages.is_empty() {
            return Ok(());
        }

        let records = messages
            .into_iter()
            .map(|m| -> Result<messages::ActiveModel> {
                Ok(messages::ActiveModel {
                    rowid: NotSet,
                    id: Set(m.id),
                    conversation_id: Set(m.conversation_id),
                    role: Set(m.role.as_str().to_string()),
                    parts: Set(serde_json::to_string(&m.parts)?),
                    attachments: Set(serde_json::to_string(&m.attachments)?),
                    created_at_us: Set(m.created_at_us),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        self.with_db(move |db| {
            messages::Entity::insert_many(records).exec(db)?;
            Ok(())
        })
        .await
    }

    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<StoredMessage>> {
        let conversation_id = conversation_id.to_string();
        let rows = self
            .with_db(move |db| {
                let rows = messages::Entity::find()
                    .filter(messages::Column::ConversationId.eq(conversation_id))
                    .order_by_asc(messages::Column::CreatedAtUs)
                    .order_by_asc(messages::Column::Rowid)
                    .all(db)?;
                Ok(rows)
            })
            .await?;

        rows.into_iter().map(StoredMessage::try_from).collect()
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn save_document(&self, document: Document) -> Result<()> {
        let record = documents::ActiveModel {
            rowid: NotSet,
            id: Set(document.id.clone()),
            user_id: Set(document.user_id),
            title: Set(document.title),
            kind: Set(document.kind.as_str().to_string()),
            content: Set(document.content),
            created_at_us: Set(document.created_at_us),
        };

        self.with_db(move |db| {
            documents::Entity::insert(record).exec(db)?;
            Ok(())
        })
        .await?;

        info!("Saved document version {}", document.id);
        Ok(())
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let id = id.to_string();
        let row = self
            .with_db(move |db| {
                let row = documents::Entity::find()
                    .filter(documents::Column::Id.eq(id))
                    .order_by_desc(documents::Column::CreatedAtUs)
                    .order_by_desc(documents::Column::Rowid)
                    .one(db)?;
                Ok(row)
            })
            .await?;

        row.map(Document::try_from).transpose()
    }

    async fn save_suggestions(&self, suggestions: Vec<Suggestion>) -> Result<()> {
        if suggestions.is_empty() {
            return Ok(());
        }

        let records: Vec<suggestions::ActiveModel> = suggestions
            .into_iter()
            .map(|s| suggestions::ActiveModel {
                rowid: NotSet,
                id: Set(s.id),
                document_id: Set(s.document_id),
                original_text: Set(s.original_text),
                suggested_text: Set(s.suggested_text),
                description: Set(s.description),
                is_resolved: Set(s.is_resolved),
                user_id: Set(s.user_id),
                created_at_us: Set(s.created_at_us),
            })
            .collect();

        self.with_db(move |db| {
            suggestions::Entity::insert_many(records).exec(db)?;
            Ok(())
        })
        .await
    }

    async fn list_suggestions(&self, document_id: &str) -> Result<Vec<Suggestion>> {
        let document_id = document_id.to_string();
        self.with_db(move |db| {
            let rows = suggestions::Entity::find()
                .filter(suggestions::Column::DocumentId.eq(document_id))
                .order_by_asc(suggestions::Column::CreatedAtUs)
                .all(db)?;
            Ok(rows.into_iter().map(Into::into).collect())
        })
        .await
    }
}

impl From<conversations::Model> for Conversation {
    fn from(r: conversations::Model) -> Self {
        Self {
            id: r.id,
            user_id: r.user_id,
            title: r.title,
            created_at_us: r.created_at_us,
        }
    }
}

impl TryFrom<messages::Model> for StoredMessage {
    type Error = anyhow::Error;

    fn try_from(r: messages::Model) -> Result<Self> {
        let role = Role::parse(&r.role).ok_or_else(|| anyhow!("Unknown role '{}'", r.role))?;
        Ok(Self {
            id: r.id,
            conversation_id: r.conversation_id,
            role,
            parts: serde_json::from_str(&r.parts).context("Corrupt message parts")?,
            attachments: serde_json::from_str(&r.attachments)
                .context("Corrupt message attachments")?,
            created_at_us: r.created_at_us,
        })
    }
}

impl TryFrom<documents::Model> for Document {
    type Error = anyhow::Error;

    fn try_from(r: documents::Model) -> Result<Self> {
        let kind =
            DocumentKind::parse(&r.kind).ok_or_else(|| anyhow!("Unknown kind '{}'", r.kind))?;
        Ok(Self {
            id: r.id,
            user_id: r.user_id,
            title: r.title,
            kind,
            content: r.content,
            created_at_us: r.created_at_us,
        })
    }
}

impl From<suggestions::Model> for Suggestion {
    fn from(r: suggestions::Model) -> Self {
        Self {
            id: r.id,
            document_id: r.document_id,
            original_text: r.original_text,
            suggested_text: r.suggested_text,
            description: r.description,
            is_resolved: r.is_resolved,
            user_id: r.user_id,
            created_at_us: r.created_at_us,
        }
    }
}
