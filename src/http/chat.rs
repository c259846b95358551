use super::AppState;
use super::relay::{self, Turn};
use crate::agent::{self, CompletionRequest, PromptMessage, preamble::build_system_prompt};
use crate::auth::Session;
use crate::error::{AppError, AppResult};
use crate::markdown;
use crate::message::{Conversation, MessagePart, Role, StoredMessage, UiMessage};
use crate::models::{ChatModel, TITLE_MODEL};
use anyhow::anyhow;
use axum::{
    Json,
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatRequest {
    id: String,
    messages: Vec<UiMessage>,
    selected_chat_model: String,
    #[serde(default)]
    render_html: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatQuery {
    id: Option<String>,
    #[serde(default)]
    render_html: bool,
}

#[derive(Debug, Serialize)]
pub struct HistoryMessage {
    #[serde(flatten)]
    message: StoredMessage,
    #[serde(skip_serializing_if = "Option::is_none")]
    html: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChatHistory {
    conversation: Conversation,
    messages: Vec<HistoryMessage>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelEntry {
    #[serde(flatten)]
    model: ChatModel,
    available: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelList {
    default_model: String,
    models: Vec<ModelEntry>,
}

async fn require_session(state: &AppState, headers: &HeaderMap) -> AppResult<Session> {
    state
        .sessions
        .resolve(headers)
        .await
        .ok_or(AppError::Unauthorized)
}

/// Loads a conversation and checks that `session` owns it.
async fn owned_conversation(state: &AppState, session: &Session, id: &str) -> AppResult<Conversation> {
    let conversation = state
        .chats
        .get_conversation(id)
        .await?
        .ok_or(AppError::NotFound)?;
    if conversation.user_id != session.user_id {
        return Err(AppError::Unauthorized);
    }
    Ok(conversation)
}

pub async fn send_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Response> {
    let session = require_session(&state, &headers).await?;

    let request: ChatRequest = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(format!("Invalid request body: {}", e)))?;
    if request.id.trim().is_empty() {
        return Err(AppError::BadRequest("Missing chat id".into()));
    }

    let user_message = request
        .messages
        .last()
        .filter(|m| m.role == Role::User)
        .ok_or_else(|| AppError::BadRequest("No user message found".into()))?;

    let model = state
        .registry
        .resolve(&request.selected_chat_model)
        .ok_or_else(|| {
            AppError::BadRequest(format!("Unknown model: {}", request.selected_chat_model))
        })?;
    let handle = state
        .registry
        .provider_handle(model.id)
        .filter(|h| state.invoker.supports(h.provider))
        .ok_or_else(|| {
            AppError::BadRequest(format!("Model is not available: {}", model.id))
        })?;

    match state.chats.get_conversation(&request.id).await? {
        Some(conversation) if conversation.user_id != session.user_id => {
            return Err(AppError::Unauthorized);
        }
        Some(_) => {}
        None => {
            let title_handle = state
                .registry
                .provider_handle(TITLE_MODEL)
                .ok_or_else(|| anyhow!("Title model has no provider binding"))?;
            let title =
                agent::generate_title(&*state.generator, &title_handle, &user_message.text())
                    .await?;
            state
                .chats
                .create_conversation(&request.id, &session.user_id, &title)
                .await?;
        }
    }

    let user_message_id = user_message
        .id
        .clone()
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    state
        .chats
        .save_messages(vec![StoredMessage::new(
            user_message_id,
            &request.id,
            Role::User,
            user_message.effective_parts(),
            user_message.attachments.clone(),
        )])
        .await?;

    let (tools, thinking_budget) = agent::tool_gate(model);
    let completion = CompletionRequest {
        handle,
        system: build_system_prompt(model, tools.is_active()),
        messages: request.messages.iter().map(PromptMessage::from).collect(),
        tools,
        thinking_budget,
        max_steps: state.config.stream.max_steps,
    };

    let turn = Turn {
        conversation_id: request.id.clone(),
        message_id: Uuid::new_v4().to_string(),
        user_id: session.user_id,
        render_html: request.render_html,
    };

    info!(
        "Chat {} with {} ({} messages, tools: {:?})",
        turn.conversation_id,
        model.id,
        completion.messages.len(),
        completion.tools
    );

    Ok(relay::stream_reply(state, turn, completion).into_response())
}

pub async fn delete_chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ChatQuery>,
) -> AppResult<Response> {
    let id = query
        .id
        .filter(|id| !id.is_empty())
        .ok_or(AppError::NotFound)?;
    let session = require_session(&state, &headers).await?;
    owned_conversation(&state, &session, &id).await?;

    if !state.chats.delete_conversation(&id).await? {
        return Err(AppError::NotFound);
    }

    Ok((StatusCode::OK, "Chat deleted").into_response())
}

pub async fn get_chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ChatQuery>,
) -> AppResult<Json<ChatHistory>> {
    let id = query
        .id
        .filter(|id| !id.is_empty())
        .ok_or(AppError::NotFound)?;
    let session = require_session(&state, &headers).await?;
    let conversation = owned_conversation(&state, &session, &id).await?;

    let messages = state
        .chats
        .list_messages(&id)
        .await?
        .into_iter()
        .map(|message| {
            let html = (query.render_html && message.role == Role::Assistant)
                .then(|| markdown::render(&assistant_text(&message.parts)));
            HistoryMessage { message, html }
        })
        .collect();

    Ok(Json(ChatHistory {
        conversation,
        messages,
    }))
}

/// Text parts joined as they were streamed.
fn assistant_text(parts: &[MessagePart]) -> String {
    parts
        .iter()
        .filter_map(|p| match p {
            MessagePart::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect()
}

pub async fn list_models(State(state): State<AppState>) -> Json<ModelList> {
    let models = state
        .registry
        .listed()
        .map(|model| ModelEntry {
            model: model.clone(),
            available: state
                .registry
                .provider_handle(model.id)
                .is_some_and(|h| state.invoker.supports(h.provider)),
        })
        .collect();

    Json(ModelList {
        default_model: state.registry.default_model().to_string(),
        models,
    })
}

pub async fn health() -> &'static str {
    "OK"
}
