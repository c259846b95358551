use crate::config::ProvidersConfig;
use crate::message::{MessagePart, Role, UiMessage};
use crate::models::{
    ChatModel, EXTENDED_THINKING_BUDGET, EXTENDED_THINKING_MODEL, ProviderHandle, ProviderKind,
};
use crate::store::{DocumentKind, Suggestion};
use crate::tools::ToolContext;
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use rig::providers::{anthropic, gemini, openai};
use rig_agent::RigBackend;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

mod attachment;
pub mod preamble;
mod rig_agent;
pub mod think;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com";
const XAI_API_URL: &str = "https://api.x.ai/v1";
const MAX_TITLE_CHARS: usize = 80;

/// Events relayed to the browser over SSE.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum StreamEvent {
    Start {
        message_id: String,
    },
    TextDelta {
        delta: String,
    },
    ReasoningDelta {
        delta: String,
    },
    ToolCall {
        tool_call_id: String,
        tool_name: String,
        args: Value,
    },
    ToolResult {
        tool_call_id: String,
        tool_name: String,
        result: Value,
    },
    Artifact {
        artifact: ArtifactEvent,
    },
    Html {
        html: String,
    },
    Error {
        message: String,
    },
    Finish {
        message_id: String,
    },
}

/// Document side-panel updates emitted by tools.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ArtifactEvent {
    Kind(DocumentKind),
    Id(String),
    Title(String),
    Clear,
    TextDelta(String),
    Suggestion(Suggestion),
    Finish,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolGate {
    None,
    All,
}

impl ToolGate {
    pub fn is_active(&self) -> bool {
        matches!(self, ToolGate::All)
    }
}

/// Tool availability and thinking budget for a model. The extended-thinking
/// Claude variant keeps every tool; other models get tools only when their
/// reasoning flag is set.
pub fn tool_gate(model: &ChatModel) -> (ToolGate, Option<u32>) {
    if model.id == EXTENDED_THINKING_MODEL {
        (ToolGate::All, Some(EXTENDED_THINKING_BUDGET))
    } else if model.is_reasoning_enabled {
        (ToolGate::All, None)
    } else {
        (ToolGate::None, None)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PromptMessage {
    pub role: Role,
    pub text: String,
}

/// Text the model sees for a message. Tool invocations stay inline with
/// their results so ids returned by earlier tools remain visible.
fn prompt_text(parts: &[MessagePart]) -> String {
    parts
        .iter()
        .filter_map(|part| match part {
            MessagePart::Text { text } => Some(text.clone()),
            MessagePart::ToolInvocation { tool_invocation } => {
                let result = tool_invocation
                    .result
                    .as_ref()
                    .map_or_else(|| "no result".to_string(), Value::to_string);
                Some(format!(
                    "[{}({}) -> {}]",
                    tool_invocation.tool_name, tool_invocation.args, result
                ))
            }
            MessagePart::Reasoning { .. } => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

impl From<&UiMessage> for PromptMessage {
    fn from(msg: &UiMessage) -> Self {
        let mut text = prompt_text(&msg.effective_parts());
        let attachments = attachment::format_for_prompt(&msg.attachments);
        if !attachments.is_empty() {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(&attachments);
        }
        Self {
            role: msg.role,
            text,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub handle: ProviderHandle,
    pub system: String,
    pub messages: Vec<PromptMessage>,
    pub tools: ToolGate,
    pub thinking_budget: Option<u32>,
    pub max_steps: usize,
}

/// Streams one assistant reply. Text, reasoning and tool events go to `tx`;
/// the call returns once the provider stream is exhausted.
#[async_trait]
pub trait CompletionInvoker: Send + Sync {
    fn supports(&self, _provider: ProviderKind) -> bool {
        true
    }

    async fn stream(
        &self,
        request: CompletionRequest,
        tools: ToolContext,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<()>;
}

/// One-shot text generation used for titles and documents.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, handle: &ProviderHandle, system: &str, prompt: &str) -> Result<String>;
}

trait Backend: CompletionInvoker + TextGenerator {}

impl<T: CompletionInvoker + TextGenerator> Backend for T {}

/// Dispatches requests to the rig client of the handle's provider.
pub struct ProviderRouter {
    backends: HashMap<ProviderKind, Arc<dyn Backend>>,
}

impl ProviderRouter {
    pub fn new(config: &ProvidersConfig) -> Result<Arc<Self>> {
        let mut backends: HashMap<ProviderKind, Arc<dyn Backend>> = HashMap::new();

        if let Some(cfg) = &config.anthropic {
            let client: anthropic::Client = anthropic::Client::builder()
                .api_key(&cfg.key)
                .base_url(cfg.url.as_deref().unwrap_or(ANTHROPIC_API_URL))
                .build()?;
            backends.insert(ProviderKind::Anthropic, RigBackend::new(client));
        }

        if let Some(cfg) = &config.google {
            if cfg.url.is_some() {
                warn!("Custom Gemini base URL is not supported, using the default endpoint");
            }
            let client = gemini::Client::new(&cfg.key)?;
            backends.insert(ProviderKind::Google, RigBackend::new(client));
        }

        if let Some(cfg) = &config.xai {
            let client: openai::CompletionsClient = openai::CompletionsClient::builder()
                .api_key(&cfg.key)
                .base_url(cfg.url.as_deref().unwrap_or(XAI_API_URL))
                .build()?;
            backends.insert(ProviderKind::Xai, RigBackend::new(client));
        }

        let mut names: Vec<String> = backends.keys().map(|k| k.to_string()).collect();
        names.sort();
        info!("Providers configured: [{}]", names.join(", "));

        Ok(Arc::new(Self { backends }))
    }

    fn backend(&self, provider: ProviderKind) -> Result<&Arc<dyn Backend>> {
        self.backends
            .get(&provider)
            .ok_or_else(|| anyhow!("Provider '{}' is not configured", provider))
    }
}

#[async_trait]
impl CompletionInvoker for ProviderRouter {
    fn supports(&self, provider: ProviderKind) -> bool {
        self.backends.contains_key(&provider)
    }

    async fn stream(
        &self,
        request: CompletionRequest,
        tools: ToolContext,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<()> {
        self.backend(request.handle.provider)?
            .stream(request, tools, tx)
            .await
    }
}

#[async_trait]
impl TextGenerator for ProviderRouter {
    async fn generate(&self, handle: &ProviderHandle, system: &str, prompt: &str) -> Result<String> {
        self.backend(handle.provider)?
            .generate(handle, system, prompt)
            .await
    }
}

pub async fn generate_title(
    generator: &dyn TextGenerator,
    handle: &ProviderHandle,
    message: &str,
) -> Result<String> {
    let raw = generator
        .generate(handle, preamble::TITLE_PREAMBLE, message)
        .await?;
    Ok(clean_title(&raw))
}

fn clean_title(raw: &str) -> String {
    let line = raw.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
    let cleaned: String = line
        .trim()
        .trim_matches(|c| c == '"' || c == '\'' || c == '`')
        .replace(':', "")
        .trim()
        .chars()
        .take(MAX_TITLE_CHARS)
        .collect();
    if cleaned.is_empty() {
        "New chat".to_string()
    } else {
        cleaned
    }
}
