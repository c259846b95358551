//! Model registry.
//!
//! One table keyed by model id carries both the display metadata shown to
//! users and the provider binding used to reach the model. Ids ending in
//! `-thinking` are display variants of a base entry: they share the base
//! entry's provider binding but keep their own metadata.

use anyhow::{Result, bail};
use serde::Serialize;
use std::collections::HashSet;

pub const DEFAULT_CHAT_MODEL: &str = "chat-model";
pub const TITLE_MODEL: &str = "title-model";
pub const ARTIFACT_MODEL: &str = "artifact-model";

pub const THINKING_SUFFIX: &str = "-thinking";

/// The one id that gets Anthropic extended thinking instead of tool gating.
pub const EXTENDED_THINKING_MODEL: &str = "claude-3-7-sonnet-20250219-thinking";
pub const EXTENDED_THINKING_BUDGET: u32 = 12_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Anthropic,
    Google,
    Xai,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderKind::Anthropic => write!(f, "anthropic"),
            ProviderKind::Google => write!(f, "google"),
            ProviderKind::Xai => write!(f, "xai"),
        }
    }
}

/// How a registry entry reaches its provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderBinding {
    pub provider: ProviderKind,
    pub model: &'static str,
    /// Tag wrapping reasoning spans inside the text stream, if any.
    pub reasoning_tag: Option<&'static str>,
}

/// Resolved provider handle for a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderHandle {
    pub provider: ProviderKind,
    pub model: String,
    pub reasoning_tag: Option<String>,
}

impl From<ProviderBinding> for ProviderHandle {
    fn from(binding: ProviderBinding) -> Self {
        Self {
            provider: binding.provider,
            model: binding.model.to_string(),
            reasoning_tag: binding.reasoning_tag.map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatModel {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub context_window: u32,
    pub is_reasoning_enabled: bool,
    #[serde(skip)]
    pub listed: bool,
    #[serde(skip)]
    pub binding: Option<ProviderBinding>,
}

const fn xai(model: &'static str, reasoning_tag: Option<&'static str>) -> Option<ProviderBinding> {
    Some(ProviderBinding {
        provider: ProviderKind::Xai,
        model,
        reasoning_tag,
    })
}

const fn anthropic(model: &'static str) -> Option<ProviderBinding> {
    Some(ProviderBinding {
        provider: ProviderKind::Anthropic,
        model,
        reasoning_tag: None,
    })
}

const fn google(model: &'static str, reasoning_tag: Option<&'static str>) -> Option<ProviderBinding> {
    Some(ProviderBinding {
        provider: ProviderKind::Google,
        model,
        reasoning_tag,
    })
}

pub static CHAT_MODELS: &[ChatModel] = &[
    ChatModel {
        id: "chat-model",
        name: "Chat model",
        description: "Primary model for all-purpose chat",
        context_window: 131_072,
        is_reasoning_enabled: false,
        listed: true,
        binding: xai("grok-2-1212", None),
    },
    ChatModel {
        id: "chat-model-reasoning",
        name: "Reasoning model",
        description: "Uses advanced reasoning",
        context_window: 131_072,
        is_reasoning_enabled: true,
        listed: true,
        binding: xai("grok-3-mini-beta", Some("think")),
    },
    ChatModel {
        id: "grok-2-1212",
        name: "Grok 2",
        description: "The latest model from xAI, capable of advanced reasoning.",
        context_window: 131_072,
        is_reasoning_enabled: false,
        listed: true,
        binding: xai("grok-2-1212", None),
    },
    ChatModel {
        id: "grok-3-beta",
        name: "Grok 3 Beta",
        description: "xAI's flagship model for complex, multi-step tasks.",
        context_window: 131_072,
        is_reasoning_enabled: false,
        listed: true,
        binding: xai("grok-3-beta", Some("think")),
    },
    ChatModel {
        id: "grok-3-mini-beta",
        name: "Grok 3 Mini Beta",
        description: "A smaller model optimized for speed and efficiency, with reasoning capabilities.",
        context_window: 131_072,
        is_reasoning_enabled: true,
        listed: true,
        binding: xai("grok-3-mini-beta", Some("think")),
    },
    ChatModel {
        id: "claude-3-7-sonnet-20250219",
        name: "Claude 3-7 Sonnet (20250219)",
        description: "Anthropic's Sonnet model (3-7 version, 20250219).",
        context_window: 200_000,
        is_reasoning_enabled: false,
        listed: true,
        binding: anthropic("claude-3-7-sonnet-20250219"),
    },
    ChatModel {
        id: "claude-3-7-sonnet-20250219-thinking",
        name: "Claude 3-7 Sonnet (Thinking)",
        description: "Claude 3-7 Sonnet with extended thinking enabled.",
        context_window: 200_000,
        is_reasoning_enabled: true,
        listed: true,
        binding: None,
    },
    ChatModel {
        id: "gemini-2.5-pro-preview-03-25",
        name: "Gemini 2.5 Pro (Preview)",
        description: "Google's most powerful thinking model (Preview). State-of-the-art performance.",
        context_window: 1_000_000,
        is_reasoning_enabled: false,
        listed: true,
        binding: google("gemini-2.5-pro-preview-03-25", Some("think")),
    },
    ChatModel {
        id: TITLE_MODEL,
        name: "Title model",
        description: "Generates conversation titles",
        context_window: 131_072,
        is_reasoning_enabled: false,
        listed: false,
        binding: xai("grok-3-mini-beta", None),
    },
    ChatModel {
        id: ARTIFACT_MODEL,
        name: "Artifact model",
        description: "Drafts documents and suggestions for tools",
        context_window: 131_072,
        is_reasoning_enabled: false,
        listed: false,
        binding: xai("grok-3-mini-beta", None),
    },
];

#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: &'static [ChatModel],
    default_model: String,
}

impl ModelRegistry {
    pub fn new(default_model: &str) -> Result<Self> {
        Self::from_table(CHAT_MODELS, default_model)
    }

    pub fn from_table(models: &'static [ChatModel], default_model: &str) -> Result<Self> {
        let registry = Self {
            models,
            default_model: default_model.to_string(),
        };
        registry.validate()?;
        Ok(registry)
    }

    /// Fails when display metadata and provider bindings disagree.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for model in self.models {
            if !seen.insert(model.id) {
                bail!("Duplicate model id in registry: {}", model.id);
            }
        }

        for model in self.models {
            match (base_id(model.id), model.binding) {
                (Some(_), Some(_)) => {
                    bail!(
                        "Model '{}' is a thinking variant and must inherit its provider binding",
                        model.id
                    );
                }
                (Some(base), None) => {
                    let bound = self
                        .models
                        .iter()
                        .any(|m| m.id == base && m.binding.is_some());
                    if !bound {
                        bail!(
                            "Thinking variant '{}' has no bound base model '{}'",
                            model.id,
                            base
                        );
                    }
                }
                (None, None) => bail!("Model '{}' has no provider binding", model.id),
                (None, Some(_)) => {}
            }
        }

        for required in [self.default_model.as_str(), TITLE_MODEL, ARTIFACT_MODEL] {
            if self.resolve(required).is_none() {
                bail!("Required model '{}' is missing from the registry", required);
            }
        }

        Ok(())
    }

    pub fn resolve(&self, id: &str) -> Option<&ChatModel> {
        self.models.iter().find(|m| m.id == id)
    }

    /// Maps a model id to its provider handle; `-thinking` ids use the base entry's binding.
    pub fn provider_handle(&self, id: &str) -> Option<ProviderHandle> {
        let model = self.resolve(id)?;
        let binding = match model.binding {
            Some(binding) => binding,
            None => self.resolve(base_id(id)?)?.binding?,
        };
        Some(binding.into())
    }

    pub fn listed(&self) -> impl Iterator<Item = &ChatModel> {
        self.models.iter().filter(|m| m.listed)
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    pub fn providers_in_use(&self) -> HashSet<ProviderKind> {
        self.models
            .iter()
            .filter_map(|m| m.binding.map(|b| b.provider))
            .collect()
    }
}

fn base_id(id: &str) -> Option<&str> {
    id.strip_suffix(THINKING_SUFFIX)
}
