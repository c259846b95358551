use async_trait::async_trait;
use axum::http::{HeaderMap, header};
use std::collections::HashMap;

pub const SESSION_COOKIE: &str = "session_token";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: String,
}

#[async_trait]
pub trait SessionResolver: Send + Sync {
    async fn resolve(&self, headers: &HeaderMap) -> Option<Session>;
}

/// Resolves sessions from a fixed token table.
pub struct TokenSessions {
    tokens: HashMap<String, String>,
}

impl TokenSessions {
    pub fn new(tokens: HashMap<String, String>) -> Self {
        Self { tokens }
    }
}

#[async_trait]
impl SessionResolver for TokenSessions {
    async fn resolve(&self, headers: &HeaderMap) -> Option<Session> {
        let token = bearer_token(headers).or_else(|| session_cookie(headers))?;
        let user_id = self.tokens.get(token)?;
        if user_id.is_empty() {
            return None;
        }
        Some(Session {
            user_id: user_id.clone(),
        })
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

fn session_cookie(headers: &HeaderMap) -> Option<&str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value)
        .filter(|v| !v.is_empty())
}
