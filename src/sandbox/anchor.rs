use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::debug;
use uuid::Uuid;

use super::network::SANDBOX_ANCHOR_ACCOUNT;
use crate::anchor::{
    AnchorError, AnchorSessionAdapter, AnchorSessionParams, InteractiveSession, SessionResult,
    SessionStatus, SessionToken, TomlValues,
};
use crate::ephemeral::EphemeralSecret;

/// Anchor that completes every interactive session after a fixed number of polls
#[derive(Debug, Default)]
pub struct SandboxAnchor {
    polls_before_completion: u32,
    polls: AtomicU32,
}

impl SandboxAnchor {
    pub fn new(polls_before_completion: u32) -> Self {
        Self {
            polls_before_completion,
            polls: AtomicU32::new(0),
        }
    }
}

/// The result the sandbox anchor hands back for a session
pub fn sandbox_session_result(session_id: &str, amount: &str) -> SessionResult {
    SessionResult {
        amount: amount.to_string(),
        memo: format!("offramp-{}", session_id.chars().take(20).collect::<String>()),
        memo_type: "text".to_string(),
        offramping_account: SANDBOX_ANCHOR_ACCOUNT.to_string(),
    }
}

#[async_trait]
impl AnchorSessionAdapter for SandboxAnchor {
    async fn fetch_session_metadata(&self, toml_url: &str) -> Result<TomlValues, AnchorError> {
        let host = toml_url
            .split("/.well-known")
            .next()
            .ok_or_else(|| AnchorError::Malformed(toml_url.to_string()))?;
        Ok(TomlValues {
            signing_key: SANDBOX_ANCHOR_ACCOUNT.to_string(),
            web_auth_endpoint: format!("{host}/auth"),
            sep24_url: format!("{host}/sep24"),
        })
    }

    async fn authorize(
        &self,
        _metadata: &TomlValues,
        _ephemeral: &EphemeralSecret,
        stellar_account: &str,
    ) -> Result<SessionToken, AnchorError> {
        Ok(SessionToken::new(format!("sandbox-jwt-{stellar_account}")))
    }

    async fn open_interactive_session(
        &self,
        params: &AnchorSessionParams,
    ) -> Result<InteractiveSession, AnchorError> {
        let id = Uuid::new_v4().to_string();
        let url = format!("{}/interactive?id={id}", params.toml_values.sep24_url);
        Ok(InteractiveSession { id, url })
    }

    async fn poll_session(
        &self,
        session: &InteractiveSession,
        params: &AnchorSessionParams,
    ) -> Result<SessionStatus, AnchorError> {
        let polls = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
        if polls <= self.polls_before_completion {
            debug!(session_id = %session.id, polls, "Sandbox session still pending");
            return Ok(SessionStatus::Pending);
        }
        Ok(SessionStatus::Completed(sandbox_session_result(
            &session.id,
            &params.offramp_amount,
        )))
    }
}
