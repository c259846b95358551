//! Runs one assistant turn and relays its events to the SSE body.
//!
//! The invoker writes raw deltas into one channel; the relay smooths them on
//! word boundaries, records the transcript and forwards events to a second
//! channel read by the SSE stream. Once the invoker is done the transcript
//! becomes the persisted assistant message.

use super::AppState;
use crate::agent::{CompletionRequest, StreamEvent};
use crate::markdown::MemoMarkdown;
use crate::message::{MessagePart, Role, StoredMessage, ToolInvocation};
use crate::tools::ToolContext;
use crate::utils::WordSmoother;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::stream::Stream;
use serde_json::Value;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

const CHANNEL_CAPACITY: usize = 64;
pub const STREAM_ERROR_MESSAGE: &str = "Oops, an error occurred!";

/// Per-turn settings for the relay.
pub struct Turn {
    pub conversation_id: String,
    pub message_id: String,
    pub user_id: String,
    pub render_html: bool,
}

/// Assistant message parts in the order they were relayed.
#[derive(Debug, Default)]
pub struct Transcript {
    parts: Vec<MessagePart>,
    text: String,
}

impl Transcript {
    pub fn push_text(&mut self, chunk: &str) {
        self.text.push_str(chunk);
        if let Some(MessagePart::Text { text }) = self.parts.last_mut() {
            text.push_str(chunk);
        } else {
            self.parts.push(MessagePart::Text {
                text: chunk.to_string(),
            });
        }
    }

    pub fn push_reasoning(&mut self, chunk: &str) {
        if let Some(MessagePart::Reasoning { reasoning }) = self.parts.last_mut() {
            reasoning.push_str(chunk);
        } else {
            self.parts.push(MessagePart::Reasoning {
                reasoning: chunk.to_string(),
            });
        }
    }

    pub fn push_tool_call(&mut self, tool_call_id: &str, tool_name: &str, args: &Value) {
        self.parts.push(MessagePart::ToolInvocation {
            tool_invocation: ToolInvocation {
                tool_call_id: tool_call_id.to_string(),
                tool_name: tool_name.to_string(),
                args: args.clone(),
                result: None,
            },
        });
    }

    pub fn set_tool_result(&mut self, tool_call_id: &str, result: &Value) {
        let invocation = self.parts.iter_mut().rev().find_map(|p| match p {
            MessagePart::ToolInvocation { tool_invocation } if tool_invocation.tool_call_id == tool_call_id => {
                Some(tool_invocation)
            }
            _ => None,
        });
        match invocation {
            Some(invocation) => invocation.result = Some(result.clone()),
            None => warn!("Tool result for unknown call {}", tool_call_id),
        }
    }

    /// Accumulated visible text, used for HTML snapshots.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn into_parts(self) -> Vec<MessagePart> {
        self.parts
    }
}

struct Relay {
    out: mpsc::Sender<StreamEvent>,
    transcript: Transcript,
    text: WordSmoother,
    reasoning: WordSmoother,
    chunk_delay: Duration,
    html: Option<MemoMarkdown>,
}

impl Relay {
    async fn send(&self, event: StreamEvent) {
        // A closed receiver means the client went away; keep draining so the
        // invoker is never blocked and the reply is still persisted.
        let _ = self.out.send(event).await;
    }

    async fn text_chunk(&mut self, chunk: String) {
        self.transcript.push_text(&chunk);
        self.send(StreamEvent::TextDelta { delta: chunk }).await;
        if let Some(memo) = self.html.as_mut() {
            let html = memo.render(self.transcript.text()).to_string();
            self.send(StreamEvent::Html { html }).await;
        }
        self.pause().await;
    }

    async fn reasoning_chunk(&mut self, chunk: String) {
        self.transcript.push_reasoning(&chunk);
        self.send(StreamEvent::ReasoningDelta { delta: chunk }).await;
        self.pause().await;
    }

    async fn pause(&self) {
        if !self.chunk_delay.is_zero() {
            tokio::time::sleep(self.chunk_delay).await;
        }
    }

    async fn flush(&mut self) {
        if let Some(rest) = self.reasoning.flush() {
            self.reasoning_chunk(rest).await;
        }
        if let Some(rest) = self.text.flush() {
            self.text_chunk(rest).await;
        }
    }

    async fn handle(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::TextDelta { delta } => {
                if let Some(rest) = self.reasoning.flush() {
                    self.reasoning_chunk(rest).await;
                }
                for chunk in self.text.push(&delta) {
                    self.text_chunk(chunk).await;
                }
            }
            StreamEvent::ReasoningDelta { delta } => {
                if let Some(rest) = self.text.flush() {
                    self.text_chunk(rest).await;
                }
                for chunk in self.reasoning.push(&delta) {
                    self.reasoning_chunk(chunk).await;
                }
            }
            StreamEvent::ToolCall {
                tool_call_id,
                tool_name,
                args,
            } => {
                self.flush().await;
                self.transcript
                    .push_tool_call(&tool_call_id, &tool_name, &args);
                self.send(StreamEvent::ToolCall {
                    tool_call_id,
                    tool_name,
                    args,
                })
                .await;
            }
            StreamEvent::ToolResult {
                tool_call_id,
                tool_name,
                result,
            } => {
                self.transcript.set_tool_result(&tool_call_id, &result);
                self.send(StreamEvent::ToolResult {
                    tool_call_id,
                    tool_name,
                    result,
                })
                .await;
            }
            other => self.send(other).await,
        }
    }

    async fn run(mut self, mut rx: mpsc::Receiver<StreamEvent>) -> Transcript {
        while let Some(event) = rx.recv().await {
            self.handle(event).await;
        }
        self.flush().await;
        self.transcript
    }
}

/// Starts the turn in a background task and returns the SSE response body.
pub fn stream_reply(
    state: AppState,
    turn: Turn,
    request: CompletionRequest,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (out_tx, mut out_rx) = mpsc::channel::<StreamEvent>(CHANNEL_CAPACITY);

    tokio::spawn(async move {
        run_turn(state, turn, request, out_tx).await;
    });

    let stream = async_stream::stream! {
        while let Some(event) = out_rx.recv().await {
            let data = serde_json::to_string(&event).unwrap_or_default();
            yield Ok(Event::default().data(data));
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn run_turn(
    state: AppState,
    turn: Turn,
    request: CompletionRequest,
    out: mpsc::Sender<StreamEvent>,
) {
    let _ = out
        .send(StreamEvent::Start {
            message_id: turn.message_id.clone(),
        })
        .await;

    let Some(artifact_model) = state.registry.provider_handle(crate::models::ARTIFACT_MODEL) else {
        error!("Artifact model has no provider handle");
        let _ = out
            .send(StreamEvent::Error {
                message: STREAM_ERROR_MESSAGE.to_string(),
            })
            .await;
        return;
    };

    let (tx, rx) = mpsc::channel::<StreamEvent>(CHANNEL_CAPACITY);
    let tools = ToolContext {
        user_id: turn.user_id.clone(),
        sink: tx.clone(),
        documents: state.documents.clone(),
        writer: state.generator.clone(),
        artifact_model,
        http: state.http.clone(),
    };

    let relay = Relay {
        out: out.clone(),
        transcript: Transcript::default(),
        text: WordSmoother::new(),
        reasoning: WordSmoother::new(),
        chunk_delay: Duration::from_millis(state.config.stream.chunk_delay_ms),
        html: turn.render_html.then(MemoMarkdown::new),
    };

    let model = request.handle.model.clone();
    let invoke = state.invoker.stream(request, tools, tx);
    let max_duration = Duration::from_secs(state.config.server.max_duration_secs);

    let outcome = tokio::time::timeout(max_duration, async {
        tokio::join!(invoke, relay.run(rx))
    })
    .await;

    let transcript = match outcome {
        Ok((Ok(()), transcript)) => transcript,
        Ok((Err(e), _)) => {
            error!("Completion with {} failed: {:#}", model, e);
            let _ = out
                .send(StreamEvent::Error {
                    message: STREAM_ERROR_MESSAGE.to_string(),
                })
                .await;
            return;
        }
        Err(_) => {
            error!(
                "Completion with {} exceeded {}s",
                model,
                max_duration.as_secs()
            );
            let _ = out
                .send(StreamEvent::Error {
                    message: STREAM_ERROR_MESSAGE.to_string(),
                })
                .await;
            return;
        }
    };

    persist_reply(&state, &turn, transcript).await;

    let _ = out
        .send(StreamEvent::Finish {
            message_id: turn.message_id,
        })
        .await;
}

async fn persist_reply(state: &AppState, turn: &Turn, transcript: Transcript) {
    if transcript.is_empty() {
        warn!(
            "No assistant output for conversation {}, nothing saved",
            turn.conversation_id
        );
        return;
    }

    let message = StoredMessage::new(
        turn.message_id.clone(),
        &turn.conversation_id,
        Role::Assistant,
        transcript.into_parts(),
        Vec::new(),
    );

    match state.chats.save_messages(vec![message]).await {
        Ok(()) => info!(
            "Saved assistant message {} in {}",
            turn.message_id, turn.conversation_id
        ),
        Err(e) => error!("Failed to save chat {}: {:#}", turn.conversation_id, e),
    }
}
