use super::think::{Segment, ThinkTagSplitter};
use super::{CompletionInvoker, CompletionRequest, PromptMessage, StreamEvent, TextGenerator};
use crate::message::Role;
use crate::models::ProviderHandle;
use crate::tools::{self, ToolContext};
use anyhow::Result;
use async_trait::async_trait;
use futures_util::StreamExt;
use rig::{
    agent::MultiTurnStreamItem,
    client::CompletionClient,
    completion::{CompletionModel, GetTokenUsage, Prompt},
    message::{Message, Reasoning, ReasoningContent},
    streaming::{StreamedAssistantContent, StreamingChat},
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

const MAX_TOKENS: u64 = 8_192;

pub struct RigBackend<C: CompletionClient> {
    client: C,
}

impl<C: CompletionClient> RigBackend<C> {
    pub fn new(client: C) -> Arc<Self> {
        Arc::new(Self { client })
    }

    async fn run_stream<M, R, A>(
        agent: A,
        prompt: Message,
        history: Vec<Message>,
        reasoning_tag: Option<&str>,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<()>
    where
        M: CompletionModel + 'static,
        R: Clone + Unpin + GetTokenUsage,
        A: StreamingChat<M, R>,
        <A as StreamingChat<M, R>>::Hook: 'static,
    {
        let mut stream = agent.stream_chat(prompt, history).await;
        let mut splitter = reasoning_tag.map(ThinkTagSplitter::new);
        let mut blocks = ReasoningBlocks::default();
        let mut streamed_any = false;

        while let Some(item) = stream.next().await {
            match item {
                Ok(MultiTurnStreamItem::StreamAssistantItem(StreamedAssistantContent::Text(
                    text,
                ))) => {
                    streamed_any = true;
                    forward(&mut splitter, &text.text, &tx).await;
                }
                Ok(MultiTurnStreamItem::StreamAssistantItem(
                    StreamedAssistantContent::ReasoningDelta { reasoning, .. },
                )) => {
                    blocks.delta();
                    send_segment(Segment::Reasoning(reasoning), &tx).await;
                }
                Ok(MultiTurnStreamItem::StreamAssistantItem(StreamedAssistantContent::Reasoning(
                    reasoning,
                ))) => {
                    if let Some(text) = blocks.close(&reasoning) {
                        send_segment(Segment::Reasoning(text), &tx).await;
                    }
                }
                Ok(MultiTurnStreamItem::FinalResponse(res)) => {
                    if !streamed_any {
                        forward(&mut splitter, res.response(), &tx).await;
                    }
                }
                Err(e) => return Err(anyhow::anyhow!("{}", e)),
                _ => {}
            }
        }

        if let Some(splitter) = splitter.as_mut() {
            for segment in splitter.finish() {
                send_segment(segment, &tx).await;
            }
        }

        Ok(())
    }
}

/// Providers stream thinking as deltas and repeat the whole block once it
/// closes. A closed block is relayed only when no delta preceded it.
#[derive(Debug, Default)]
struct ReasoningBlocks {
    streamed: bool,
}

impl ReasoningBlocks {
    fn delta(&mut self) {
        self.streamed = true;
    }

    fn close(&mut self, reasoning: &Reasoning) -> Option<String> {
        if std::mem::take(&mut self.streamed) {
            return None;
        }
        let text = reasoning
            .content
            .iter()
            .filter_map(|c| match c {
                ReasoningContent::Text { text, .. } => Some(text.as_str()),
                ReasoningContent::Summary(summary) => Some(summary.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n");
        (!text.is_empty()).then_some(text)
    }
}

async fn forward(
    splitter: &mut Option<ThinkTagSplitter>,
    text: &str,
    tx: &mpsc::Sender<StreamEvent>,
) {
    match splitter {
        Some(splitter) => {
            for segment in splitter.feed(text) {
                send_segment(segment, tx).await;
            }
        }
        None => send_segment(Segment::Text(text.to_string()), tx).await,
    }
}

async fn send_segment(segment: Segment, tx: &mpsc::Sender<StreamEvent>) {
    let event = match segment {
        Segment::Text(delta) => StreamEvent::TextDelta { delta },
        Segment::Reasoning(delta) => StreamEvent::ReasoningDelta { delta },
    };
    let _ = tx.send(event).await;
}

/// Splits the conversation into rig chat history and the trailing prompt.
/// System entries are dropped, as are empty turns that providers reject.
fn build_chat(messages: &[PromptMessage]) -> (Message, Vec<Message>) {
    let Some((last, earlier)) = messages.split_last() else {
        return (Message::user(""), Vec::new());
    };

    let history = earlier
        .iter()
        .filter(|m| m.role != Role::System && !m.text.trim().is_empty())
        .map(to_message)
        .collect();
    (to_message(last), history)
}

fn to_message(msg: &PromptMessage) -> Message {
    match msg.role {
        Role::Assistant => Message::assistant(msg.text.clone()),
        Role::User | Role::System => Message::user(msg.text.clone()),
    }
}

#[async_trait]
impl<C> CompletionInvoker for RigBackend<C>
where
    C: CompletionClient + Send + Sync,
    C::CompletionModel: 'static,
{
    async fn stream(
        &self,
        request: CompletionRequest,
        tools: ToolContext,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<()> {
        let (prompt, history) = build_chat(&request.messages);
        let mut builder = self
            .client
            .agent(&request.handle.model)
            .preamble(&request.system)
            .max_tokens(MAX_TOKENS);

        if let Some(budget) = request.thinking_budget {
            let mut extra = serde_json::Map::new();
            extra.insert(
                "thinking".into(),
                serde_json::json!({"type": "enabled", "budget_tokens": budget}),
            );
            builder = builder
                .max_tokens(MAX_TOKENS + u64::from(budget))
                .additional_params(serde_json::Value::Object(extra));
        }

        debug!(
            "Streaming {} ({} messages, tools: {:?})",
            request.handle.model,
            request.messages.len(),
            request.tools
        );

        let reasoning_tag = request.handle.reasoning_tag.as_deref();
        if request.tools.is_active() {
            let agent = builder
                .tool(tools::Weather {
                    ctx: tools.clone(),
                })
                .tool(tools::CreateDocument {
                    ctx: tools.clone(),
                })
                .tool(tools::UpdateDocument {
                    ctx: tools.clone(),
                })
                .tool(tools::RequestSuggestions { ctx: tools })
                .default_max_turns(request.max_steps)
                .build();
            Self::run_stream(agent, prompt, history, reasoning_tag, tx).await
        } else {
            let agent = builder.default_max_turns(request.max_steps).build();
            Self::run_stream(agent, prompt, history, reasoning_tag, tx).await
        }
    }
}

#[async_trait]
impl<C> TextGenerator for RigBackend<C>
where
    C: CompletionClient + Send + Sync,
    C::CompletionModel: 'static,
{
    async fn generate(&self, handle: &ProviderHandle, system: &str, prompt: &str) -> Result<String> {
        let agent = self
            .client
            .agent(&handle.model)
            .preamble(system)
            .max_tokens(MAX_TOKENS)
            .build();

        let response = agent.prompt(prompt).await?;
        let text = response.to_string();

        match handle.reasoning_tag.as_deref() {
            Some(tag) => {
                let mut splitter = ThinkTagSplitter::new(tag);
                let mut segments = splitter.feed(&text);
                segments.extend(splitter.finish());
                Ok(segments
                    .into_iter()
                    .filter_map(|s| match s {
                        Segment::Text(t) => Some(t),
                        Segment::Reasoning(_) => None,
                    })
                    .collect())
            }
            None => Ok(text),
        }
    }
}
