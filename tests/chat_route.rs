use anyhow::{Result, anyhow};
use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response, StatusCode, header};
use parley::agent::{CompletionInvoker, CompletionRequest, StreamEvent, TextGenerator, ToolGate};
use parley::auth::TokenSessions;
use parley::config::Config;
use parley::http::{AppState, create_router};
use parley::message::{MessagePart, Role};
use parley::models::{DEFAULT_CHAT_MODEL, ModelRegistry, ProviderHandle, ProviderKind};
use parley::store::{ChatStore, DocumentStore, SqliteStore};
use parley::tools::{CreateDocument, ToolContext};
use rig::tool::Tool;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tower::ServiceExt;

const TOKEN: &str = "tok-1";
const USER: &str = "user-1";
const OTHER_TOKEN: &str = "tok-2";
const OTHER_USER: &str = "user-2";

#[derive(Default)]
struct FakeInvoker {
    providers: Vec<ProviderKind>,
    deltas: Vec<&'static str>,
    reasoning: Vec<&'static str>,
    stall: Option<Duration>,
    fail: bool,
    create_document: bool,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl FakeInvoker {
    fn replying(deltas: Vec<&'static str>) -> Self {
        Self {
            providers: vec![ProviderKind::Xai, ProviderKind::Anthropic, ProviderKind::Google],
            deltas,
            ..Default::default()
        }
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl CompletionInvoker for FakeInvoker {
    fn supports(&self, provider: ProviderKind) -> bool {
        self.providers.contains(&provider)
    }

    async fn stream(
        &self,
        request: CompletionRequest,
        tools: ToolContext,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<()> {
        let tools_active = request.tools.is_active();
        self.requests.lock().unwrap().push(request);

        if self.fail {
            return Err(anyhow!("provider unavailable"));
        }

        if self.create_document && tools_active {
            let args: <CreateDocument as Tool>::Args =
                serde_json::from_value(json!({"title": "Frog haiku", "kind": "text"}))?;
            CreateDocument { ctx: tools }.call(args).await?;
        }

        for delta in &self.reasoning {
            tx.send(StreamEvent::ReasoningDelta {
                delta: delta.to_string(),
            })
            .await?;
        }

        for delta in &self.deltas {
            tx.send(StreamEvent::TextDelta {
                delta: delta.to_string(),
            })
            .await?;
        }

        if let Some(stall) = self.stall {
            tokio::time::sleep(stall).await;
        }
        Ok(())
    }
}

/// Answers every prompt with the same text and counts calls.
struct FakeGenerator {
    reply: &'static str,
    calls: AtomicUsize,
}

#[async_trait]
impl TextGenerator for FakeGenerator {
    async fn generate(&self, _handle: &ProviderHandle, _system: &str, _prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.reply.to_string())
    }
}

struct Harness {
    app: Router,
    store: Arc<SqliteStore>,
    invoker: Arc<FakeInvoker>,
    generator: Arc<FakeGenerator>,
    _dir: TempDir,
}

async fn harness(invoker: FakeInvoker) -> Harness {
    harness_with(invoker, "[stream]\nchunk_delay_ms = 0\n").await
}

async fn harness_with(invoker: FakeInvoker, config: &str) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteStore::new(dir.path()).await.unwrap();
    let invoker = Arc::new(invoker);
    let generator = Arc::new(FakeGenerator {
        reply: "Greeting",
        calls: AtomicUsize::new(0),
    });

    let config = Config::parse(config).unwrap();
    let sessions = TokenSessions::new(HashMap::from([
        (TOKEN.to_string(), USER.to_string()),
        (OTHER_TOKEN.to_string(), OTHER_USER.to_string()),
    ]));

    let state = AppState {
        config: Arc::new(config),
        registry: Arc::new(ModelRegistry::new(DEFAULT_CHAT_MODEL).unwrap()),
        chats: store.clone(),
        documents: store.clone(),
        sessions: Arc::new(sessions),
        invoker: invoker.clone(),
        generator: generator.clone(),
        http: reqwest::Client::new(),
    };

    Harness {
        app: create_router(state),
        store,
        invoker,
        generator,
        _dir: dir,
    }
}

fn chat_body(id: &str, model: &str, text: &str) -> Value {
    json!({
        "id": id,
        "selectedChatModel": model,
        "messages": [
            {"id": "u-msg-1", "role": "user", "parts": [{"type": "text", "text": text}]}
        ]
    })
}

async fn send(app: &Router, method: &str, uri: &str, token: Option<&str>, body: Body) -> Response<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    app.clone()
        .oneshot(
            builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(body)
                .unwrap(),
        )
        .await
        .unwrap()
}

async fn post_chat(app: &Router, token: Option<&str>, body: &Value) -> Response<Body> {
    send(app, "POST", "/api/chat", token, Body::from(body.to_string())).await
}

async fn body_text(response: Response<Body>) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// Reads the SSE body to the end and returns the JSON payloads.
async fn sse_events(response: Response<Body>) -> Vec<Value> {
    body_text(response)
        .await
        .lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .map(|data| serde_json::from_str(data).unwrap())
        .collect()
}

fn of_type<'a>(events: &'a [Value], kind: &str) -> Vec<&'a Value> {
    events.iter().filter(|e| e["type"] == kind).collect()
}

#[tokio::test]
async fn requests_without_session_are_unauthorized_and_inert() {
    let h = harness(FakeInvoker::replying(vec!["hi"])).await;

    let response = post_chat(&h.app, None, &chat_body("c1", "chat-model", "hi")).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = post_chat(&h.app, Some("bogus"), &chat_body("c1", "chat-model", "hi")).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = send(&h.app, "DELETE", "/api/chat?id=c1", None, Body::empty()).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_text(response).await, "Unauthorized");

    assert!(h.store.get_conversation("c1").await.unwrap().is_none());
    assert_eq!(h.invoker.calls(), 0);
    assert_eq!(h.generator.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn missing_trailing_user_message_is_bad_request() {
    let h = harness(FakeInvoker::replying(vec!["hi"])).await;

    let body = json!({
        "id": "c1",
        "selectedChatModel": "chat-model",
        "messages": [
            {"role": "user", "parts": [{"type": "text", "text": "hi"}]},
            {"role": "assistant", "parts": [{"type": "text", "text": "hello"}]}
        ]
    });
    let response = post_chat(&h.app, Some(TOKEN), &body).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let empty = json!({"id": "c1", "selectedChatModel": "chat-model", "messages": []});
    let response = post_chat(&h.app, Some(TOKEN), &empty).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    assert!(h.store.get_conversation("c1").await.unwrap().is_none());
    assert_eq!(h.invoker.calls(), 0);
}

#[tokio::test]
async fn malformed_body_is_bad_request() {
    let h = harness(FakeInvoker::replying(vec!["hi"])).await;
    let response = send(&h.app, "POST", "/api/chat", Some(TOKEN), Body::from("{not json")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(h.invoker.calls(), 0);
}

#[tokio::test]
async fn unknown_or_unavailable_model_is_bad_request() {
    let mut invoker = FakeInvoker::replying(vec!["hi"]);
    invoker.providers = vec![ProviderKind::Xai];
    let h = harness(invoker).await;

    let response = post_chat(&h.app, Some(TOKEN), &chat_body("c1", "gpt-9", "hi")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = post_chat(
        &h.app,
        Some(TOKEN),
        &chat_body("c1", "claude-3-7-sonnet-20250219", "hi"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    assert!(h.store.get_conversation("c1").await.unwrap().is_none());
    assert_eq!(h.invoker.calls(), 0);

    let response = post_chat(&h.app, Some(TOKEN), &chat_body("c1", "grok-3-beta", "hi")).await;
    assert_eq!(response.status(), StatusCode::OK);
    sse_events(response).await;
    assert_eq!(h.invoker.calls(), 1);
}

#[tokio::test]
async fn first_message_creates_conversation_and_persists_reply() {
    let h = harness(FakeInvoker::replying(vec!["Hel", "lo the", "re!"])).await;

    let response = post_chat(&h.app, Some(TOKEN), &chat_body("c1", "chat-model", "hi")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/event-stream"
    );

    let events = sse_events(response).await;
    assert_eq!(events.first().unwrap()["type"], "start");
    assert_eq!(events.last().unwrap()["type"], "finish");
    let message_id = events[0]["messageId"].as_str().unwrap().to_string();
    assert_eq!(events.last().unwrap()["messageId"], message_id.as_str());

    let deltas: Vec<&str> = of_type(&events, "text_delta")
        .iter()
        .map(|e| e["delta"].as_str().unwrap())
        .collect();
    assert_eq!(deltas, vec!["Hello ", "there!"]);
    assert!(of_type(&events, "error").is_empty());

    let conversation = h.store.get_conversation("c1").await.unwrap().unwrap();
    assert_eq!(conversation.user_id, USER);
    assert_eq!(conversation.title, "Greeting");

    let messages = h.store.list_messages("c1").await.unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, Role::User);
    assert_eq!(messages[0].id, "u-msg-1");
    assert_eq!(messages[1].role, Role::Assistant);
    assert_eq!(messages[1].id, message_id);
    assert_ne!(messages[1].id, messages[0].id);
    assert_eq!(
        messages[1].parts,
        vec![MessagePart::Text {
            text: "Hello there!".into()
        }]
    );

    let requests = h.invoker.requests.lock().unwrap();
    assert_eq!(requests[0].handle.model, "grok-2-1212");
    assert_eq!(requests[0].tools, ToolGate::None);
    assert_eq!(requests[0].thinking_budget, None);
    assert_eq!(requests[0].max_steps, 5);
    assert!(!requests[0].system.contains("createDocument"));
}

#[tokio::test]
async fn follow_up_reuses_conversation() {
    let h = harness(FakeInvoker::replying(vec!["ok"])).await;

    let response = post_chat(&h.app, Some(TOKEN), &chat_body("c1", "chat-model", "hi")).await;
    sse_events(response).await;

    let body = json!({
        "id": "c1",
        "selectedChatModel": "chat-model",
        "messages": [
            {"id": "u-msg-1", "role": "user", "parts": [{"type": "text", "text": "hi"}]},
            {"role": "assistant", "parts": [{"type": "text", "text": "ok"}]},
            {"role": "user", "content": "and again"}
        ]
    });
    let response = post_chat(&h.app, Some(TOKEN), &body).await;
    assert_eq!(response.status(), StatusCode::OK);
    sse_events(response).await;

    assert_eq!(h.generator.calls.load(Ordering::SeqCst), 1);
    let messages = h.store.list_messages("c1").await.unwrap();
    assert_eq!(messages.len(), 4);
    assert_eq!(
        messages[2].parts,
        vec![MessagePart::Text {
            text: "and again".into()
        }]
    );
    assert_eq!(h.invoker.requests.lock().unwrap()[1].messages.len(), 3);
}

#[tokio::test]
async fn foreign_conversation_is_unauthorized_and_untouched() {
    let h = harness(FakeInvoker::replying(vec!["hi"])).await;
    h.store
        .create_conversation("c2", OTHER_USER, "Private")
        .await
        .unwrap();

    let response = post_chat(&h.app, Some(TOKEN), &chat_body("c2", "chat-model", "hi")).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = send(&h.app, "DELETE", "/api/chat?id=c2", Some(TOKEN), Body::empty()).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = send(&h.app, "GET", "/api/chat?id=c2", Some(TOKEN), Body::empty()).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    assert!(h.store.get_conversation("c2").await.unwrap().is_some());
    assert!(h.store.list_messages("c2").await.unwrap().is_empty());
    assert_eq!(h.invoker.calls(), 0);
}

#[tokio::test]
async fn delete_removes_owned_conversation() {
    let h = harness(FakeInvoker::replying(vec!["hi"])).await;

    let response = send(&h.app, "DELETE", "/api/chat", None, Body::empty()).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_text(response).await, "Not Found");

    let response = send(&h.app, "DELETE", "/api/chat?id=nope", Some(TOKEN), Body::empty()).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = post_chat(&h.app, Some(TOKEN), &chat_body("c1", "chat-model", "hi")).await;
    sse_events(response).await;
    assert_eq!(h.store.list_messages("c1").await.unwrap().len(), 2);

    let response = send(&h.app, "DELETE", "/api/chat?id=c1", Some(TOKEN), Body::empty()).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "Chat deleted");

    assert!(h.store.get_conversation("c1").await.unwrap().is_none());
    assert!(h.store.list_messages("c1").await.unwrap().is_empty());
}

#[tokio::test]
async fn thinking_variant_uses_base_handle_with_budget() {
    let h = harness(FakeInvoker::replying(vec!["done"])).await;

    let response = post_chat(
        &h.app,
        Some(TOKEN),
        &chat_body("c1", "claude-3-7-sonnet-20250219-thinking", "think hard"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    sse_events(response).await;

    let requests = h.invoker.requests.lock().unwrap();
    assert_eq!(requests[0].handle.provider, ProviderKind::Anthropic);
    assert_eq!(requests[0].handle.model, "claude-3-7-sonnet-20250219");
    assert_eq!(requests[0].thinking_budget, Some(12_000));
    assert_eq!(requests[0].tools, ToolGate::All);
    assert!(requests[0].system.contains("createDocument"));
}

#[tokio::test]
async fn provider_failure_surfaces_generic_error() {
    let mut invoker = FakeInvoker::replying(vec![]);
    invoker.fail = true;
    let h = harness(invoker).await;

    let response = post_chat(&h.app, Some(TOKEN), &chat_body("c1", "chat-model", "hi")).await;
    assert_eq!(response.status(), StatusCode::OK);

    let events = sse_events(response).await;
    let errors = of_type(&events, "error");
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0]["message"], "Oops, an error occurred!");
    assert!(of_type(&events, "finish").is_empty());

    let messages = h.store.list_messages("c1").await.unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].role, Role::User);
}

#[tokio::test]
async fn slow_provider_times_out_without_saving() {
    let mut invoker = FakeInvoker::replying(vec!["partial ", "answer "]);
    invoker.stall = Some(Duration::from_secs(5));
    let h = harness_with(
        invoker,
        "[server]\nmax_duration_secs = 1\n\n[stream]\nchunk_delay_ms = 0\n",
    )
    .await;

    let response = post_chat(&h.app, Some(TOKEN), &chat_body("c1", "chat-model", "hi")).await;
    assert_eq!(response.status(), StatusCode::OK);

    let events = sse_events(response).await;
    assert_eq!(events.first().unwrap()["type"], "start");
    let errors = of_type(&events, "error");
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0]["message"], "Oops, an error occurred!");
    assert_eq!(events.last().unwrap()["type"], "error");
    assert!(of_type(&events, "finish").is_empty());

    let messages = h.store.list_messages("c1").await.unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].role, Role::User);
}

#[tokio::test]
async fn reasoning_is_relayed_and_persisted_before_text() {
    let mut invoker = FakeInvoker::replying(vec!["Hello ", "there!"]);
    invoker.reasoning = vec!["Thinking about ", "frogs."];
    let h = harness(invoker).await;

    let response = post_chat(
        &h.app,
        Some(TOKEN),
        &chat_body("c1", "claude-3-7-sonnet-20250219-thinking", "frogs?"),
    )
    .await;
    let events = sse_events(response).await;

    let reasoning: String = of_type(&events, "reasoning_delta")
        .iter()
        .map(|e| e["delta"].as_str().unwrap())
        .collect();
    assert_eq!(reasoning, "Thinking about frogs.");
    let first_reasoning = events.iter().position(|e| e["type"] == "reasoning_delta");
    let first_text = events.iter().position(|e| e["type"] == "text_delta");
    assert!(first_reasoning.unwrap() < first_text.unwrap());
    assert_eq!(events.last().unwrap()["type"], "finish");

    let messages = h.store.list_messages("c1").await.unwrap();
    assert_eq!(
        messages[1].parts,
        vec![
            MessagePart::Reasoning {
                reasoning: "Thinking about frogs.".into()
            },
            MessagePart::Text {
                text: "Hello there!".into()
            },
        ]
    );
}

#[tokio::test]
async fn earlier_tool_results_reach_the_next_turn() {
    let h = harness(FakeInvoker::replying(vec!["Done."])).await;

    let body = json!({
        "id": "c1",
        "selectedChatModel": "chat-model-reasoning",
        "messages": [
            {"role": "user", "parts": [{"type": "text", "text": "write a haiku"}]},
            {"role": "assistant", "parts": [
                {
                    "type": "tool-invocation",
                    "toolInvocation": {
                        "toolCallId": "call-1",
                        "toolName": "createDocument",
                        "args": {"title": "Frog haiku", "kind": "text"},
                        "result": {"id": "doc-123", "title": "Frog haiku", "kind": "text"}
                    }
                },
                {"type": "text", "text": "Here it is."}
            ]},
            {"role": "user", "parts": [{"type": "text", "text": "make it longer"}]}
        ]
    });
    let response = post_chat(&h.app, Some(TOKEN), &body).await;
    assert_eq!(response.status(), StatusCode::OK);
    sse_events(response).await;

    let requests = h.invoker.requests.lock().unwrap();
    let earlier = &requests[0].messages[1];
    assert_eq!(earlier.role, Role::Assistant);
    assert!(earlier.text.contains("doc-123"));
    assert!(earlier.text.contains("Here it is."));
}

#[tokio::test]
async fn tool_invocations_are_relayed_and_persisted() {
    let mut invoker = FakeInvoker::replying(vec!["Here it is."]);
    invoker.create_document = true;
    let h = harness(invoker).await;

    let response = post_chat(
        &h.app,
        Some(TOKEN),
        &chat_body("c1", "chat-model-reasoning", "write a haiku"),
    )
    .await;
    let events = sse_events(response).await;

    let calls = of_type(&events, "tool_call");
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0]["toolName"], "createDocument");
    assert!(!of_type(&events, "artifact").is_empty());
    let result = of_type(&events, "tool_result")[0]["result"].clone();
    let document_id = result["id"].as_str().unwrap();

    let document = h.store.get_document(document_id).await.unwrap().unwrap();
    assert_eq!(document.user_id, USER);
    assert_eq!(document.content, "Greeting");

    let messages = h.store.list_messages("c1").await.unwrap();
    let parts = &messages[1].parts;
    assert_eq!(parts.len(), 2);
    match &parts[0] {
        MessagePart::ToolInvocation { tool_invocation } => {
            assert_eq!(tool_invocation.tool_name, "createDocument");
            assert_eq!(tool_invocation.result.as_ref().unwrap()["id"], document_id);
        }
        other => panic!("unexpected part: {:?}", other),
    }
    assert_eq!(
        parts[1],
        MessagePart::Text {
            text: "Here it is.".into()
        }
    );
}

#[tokio::test]
async fn history_and_html_rendering() {
    let h = harness(FakeInvoker::replying(vec!["**bold** ", "move"])).await;

    let mut body = chat_body("c1", "chat-model", "hi");
    body["renderHtml"] = json!(true);
    let events = sse_events(post_chat(&h.app, Some(TOKEN), &body).await).await;
    let last_html = of_type(&events, "html").last().unwrap()["html"].clone();
    assert_eq!(
        last_html,
        r#"<p><span class="font-semibold">bold</span> move</p>"#
    );

    let response = send(
        &h.app,
        "GET",
        "/api/chat?id=c1&renderHtml=true",
        Some(TOKEN),
        Body::empty(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let history: Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(history["conversation"]["id"], "c1");
    let messages = history["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert!(messages[0].get("html").is_none());
    assert_eq!(messages[1]["html"], last_html);
}

#[tokio::test]
async fn models_endpoint_lists_registry() {
    let mut invoker = FakeInvoker::replying(vec![]);
    invoker.providers = vec![ProviderKind::Xai];
    let h = harness(invoker).await;

    let response = send(&h.app, "GET", "/api/models", None, Body::empty()).await;
    assert_eq!(response.status(), StatusCode::OK);
    let list: Value = serde_json::from_str(&body_text(response).await).unwrap();

    assert_eq!(list["defaultModel"], "chat-model");
    let models = list["models"].as_array().unwrap();
    assert_eq!(models.len(), 8);
    assert!(!models.iter().any(|m| m["id"] == "title-model"));

    let thinking = models
        .iter()
        .find(|m| m["id"] == "claude-3-7-sonnet-20250219-thinking")
        .unwrap();
    assert_eq!(thinking["isReasoningEnabled"], true);
    assert_eq!(thinking["available"], false);
    let grok = models.iter().find(|m| m["id"] == "grok-2-1212").unwrap();
    assert_eq!(grok["available"], true);
}

#[tokio::test]
async fn health_check() {
    let h = harness(FakeInvoker::default()).await;
    let response = send(&h.app, "GET", "/api/health", None, Body::empty()).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "OK");
}
