//! Anchor session boundary
//!
//! The anchor (SEP-10 authentication plus a SEP-24 interactive withdrawal) is an external
//! collaborator. The state machine only needs what the anchor hands back once the user finished
//! the interactive flow: where to pay, how much, and with which memo.

pub mod session;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[cfg(test)]
use mockall::automock;

use crate::ephemeral::EphemeralSecret;
use crate::tokens::OutputTokenType;

pub use session::{await_session_completion, OfframpOnboarding};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnchorError {
    #[error("Anchor network error: {0}")]
    Network(String),

    #[error("Anchor request timed out: {0}")]
    Timeout(String),

    #[error("Anchor session expired")]
    SessionExpired,

    #[error("Anchor rejected the session: {0}")]
    SessionRejected(String),

    #[error("Malformed anchor response: {0}")]
    Malformed(String),
}

impl AnchorError {
    pub fn is_transient(&self) -> bool {
        matches!(self, AnchorError::Network(_) | AnchorError::Timeout(_))
    }
}

/// Values read from the anchor's stellar.toml
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TomlValues {
    pub signing_key: String,
    pub web_auth_endpoint: String,
    pub sep24_url: String,
}

/// Bearer token of an authenticated anchor session
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionToken(<redacted>)")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnchorSessionParams {
    pub token: SessionToken,
    pub toml_values: TomlValues,
    pub output_token: OutputTokenType,
    /// Withdrawal amount offered to the anchor, two decimals
    pub offramp_amount: String,
    /// Stellar account that will pay the anchor
    pub stellar_account: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractiveSession {
    pub id: String,
    pub url: String,
}

/// What the anchor hands over after the interactive flow completes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResult {
    pub amount: String,
    pub memo: String,
    pub memo_type: String,
    pub offramping_account: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    Pending,
    Completed(SessionResult),
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait AnchorSessionAdapter: Send + Sync {
    async fn fetch_session_metadata(&self, toml_url: &str) -> Result<TomlValues, AnchorError>;

    /// SEP-10 challenge signed by the Stellar ephemeral key
    async fn authorize(
        &self,
        metadata: &TomlValues,
        ephemeral: &EphemeralSecret,
        stellar_account: &str,
    ) -> Result<SessionToken, AnchorError>;

    async fn open_interactive_session(
        &self,
        params: &AnchorSessionParams,
    ) -> Result<InteractiveSession, AnchorError>;

    async fn poll_session(
        &self,
        session: &InteractiveSession,
        params: &AnchorSessionParams,
    ) -> Result<SessionStatus, AnchorError>;
}
