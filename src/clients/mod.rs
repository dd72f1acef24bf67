//! Contracts of the chain-side collaborators
//!
//! Each chain the offramp touches is reached through a [`ChainClient`]. Clients are black boxes
//! that accept a typed request and hand back a transaction hash; everything the state machine
//! needs for idempotent resume (lookup by idempotency key, balances, account existence) is part
//! of the contract so phases never have to trust their own memory of what happened.

pub mod retry;
pub mod throttle;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::amount::RawAmount;
use crate::ephemeral::EphemeralSecret;
use crate::tokens::{AssetId, Chain};

pub use retry::RetryHandler;
pub use throttle::RateLimitedChainClient;

/// Errors surfaced by chain clients and quoters
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Rate limited by remote endpoint")]
    RateLimited,

    #[error("Insufficient funds in {account}: required {required}, available {available}")]
    InsufficientFunds {
        account: String,
        required: RawAmount,
        available: RawAmount,
    },

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Transaction rejected: {0}")]
    Rejected(String),

    #[error("A transaction with idempotency key {0} was already submitted")]
    DuplicateSubmission(String),

    #[error("Unknown transaction {0}")]
    UnknownTransaction(String),
}

impl ClientError {
    /// Errors worth retrying inside a phase before giving up
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ClientError::Network(_) | ClientError::Timeout(_) | ClientError::RateLimited
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxHash(String);

impl TxHash {
    pub fn new(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    Pending,
    Confirmed,
    Failed,
}

/// Who signs a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Signer {
    /// The user's connected wallet on the source chain
    Wallet,
    /// The service funding account
    Funding,
    /// The workflow's ephemeral account; the key is passed alongside the request
    Ephemeral,
}

/// The on-chain effect a request asks for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ChainCall {
    #[serde(rename_all = "camelCase")]
    Approve {
        owner: String,
        spender: String,
        asset: AssetId,
        amount: RawAmount,
    },
    #[serde(rename_all = "camelCase")]
    SquidRouterBridge {
        from: String,
        asset: AssetId,
        amount: RawAmount,
        destination_chain: Chain,
        destination: String,
        destination_asset: AssetId,
    },
    #[serde(rename_all = "camelCase")]
    Transfer {
        from: String,
        to: String,
        asset: AssetId,
        amount: RawAmount,
    },
    /// Move the full balance of `asset`, whatever it is when the call executes
    #[serde(rename_all = "camelCase")]
    TransferAll {
        from: String,
        to: String,
        asset: AssetId,
    },
    #[serde(rename_all = "camelCase")]
    CreateAccount {
        funder: String,
        account: String,
        starting_balance: RawAmount,
        trustline: Option<AssetId>,
    },
    #[serde(rename_all = "camelCase")]
    NablaSwap {
        owner: String,
        asset_in: AssetId,
        asset_out: AssetId,
        amount_in: RawAmount,
        min_amount_out: RawAmount,
        deadline: i64,
    },
    #[serde(rename_all = "camelCase")]
    SpacewalkRedeem {
        owner: String,
        vault_id: String,
        asset: AssetId,
        amount: RawAmount,
        stellar_destination: String,
        stellar_asset: AssetId,
    },
    #[serde(rename_all = "camelCase")]
    StellarPayment {
        from: String,
        to: String,
        asset: AssetId,
        amount: RawAmount,
        memo: String,
        memo_type: String,
    },
    #[serde(rename_all = "camelCase")]
    AccountMerge { account: String, destination: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    Approve,
    SquidRouterBridge,
    Transfer,
    TransferAll,
    CreateAccount,
    NablaSwap,
    SpacewalkRedeem,
    StellarPayment,
    AccountMerge,
}

impl ChainCall {
    pub fn kind(&self) -> CallKind {
        match self {
            ChainCall::Approve { .. } => CallKind::Approve,
            ChainCall::SquidRouterBridge { .. } => CallKind::SquidRouterBridge,
            ChainCall::Transfer { .. } => CallKind::Transfer,
            ChainCall::TransferAll { .. } => CallKind::TransferAll,
            ChainCall::CreateAccount { .. } => CallKind::CreateAccount,
            ChainCall::NablaSwap { .. } => CallKind::NablaSwap,
            ChainCall::SpacewalkRedeem { .. } => CallKind::SpacewalkRedeem,
            ChainCall::StellarPayment { .. } => CallKind::StellarPayment,
            ChainCall::AccountMerge { .. } => CallKind::AccountMerge,
        }
    }

    /// The account whose key authorizes the call
    pub fn origin(&self) -> &str {
        match self {
            ChainCall::Approve { owner, .. }
            | ChainCall::NablaSwap { owner, .. }
            | ChainCall::SpacewalkRedeem { owner, .. } => owner,
            ChainCall::SquidRouterBridge { from, .. }
            | ChainCall::Transfer { from, .. }
            | ChainCall::TransferAll { from, .. }
            | ChainCall::StellarPayment { from, .. } => from,
            ChainCall::CreateAccount { funder, .. } => funder,
            ChainCall::AccountMerge { account, .. } => account,
        }
    }
}

/// A submission together with the key that makes it idempotent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRequest {
    pub idempotency_key: String,
    pub chain: Chain,
    pub signer: Signer,
    pub call: ChainCall,
}

impl TransactionRequest {
    pub fn new(idempotency_key: String, chain: Chain, signer: Signer, call: ChainCall) -> Self {
        Self {
            idempotency_key,
            chain,
            signer,
            call,
        }
    }

    /// Short human readable summary for recovery records and logs
    pub fn describe(&self) -> String {
        match &self.call {
            ChainCall::Approve { spender, asset, amount, .. } => {
                format!("approve {spender} to spend {amount} {asset}")
            }
            ChainCall::SquidRouterBridge { amount, asset, destination_chain, destination, .. } => {
                format!("bridge {amount} {asset} to {destination} on {destination_chain}")
            }
            ChainCall::Transfer { to, asset, amount, .. } => {
                format!("transfer {amount} {asset} to {to}")
            }
            ChainCall::TransferAll { to, asset, .. } => format!("sweep all {asset} to {to}"),
            ChainCall::CreateAccount { account, starting_balance, .. } => {
                format!("create account {account} with {starting_balance}")
            }
            ChainCall::NablaSwap { asset_in, asset_out, amount_in, .. } => {
                format!("swap {amount_in} {asset_in} for {asset_out}")
            }
            ChainCall::SpacewalkRedeem { amount, asset, stellar_destination, .. } => {
                format!("redeem {amount} {asset} to {stellar_destination}")
            }
            ChainCall::StellarPayment { to, asset, amount, memo, .. } => {
                format!("pay {amount} {asset} to {to} (memo {memo})")
            }
            ChainCall::AccountMerge { account, destination } => {
                format!("merge {account} into {destination}")
            }
        }
    }
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    fn chain(&self) -> Chain;

    /// Public account identifier controlled by `secret`
    fn derive_address(&self, secret: &EphemeralSecret) -> Result<String, ClientError>;

    async fn account_exists(&self, account: &str) -> Result<bool, ClientError>;

    async fn balance(&self, account: &str, asset: &AssetId) -> Result<RawAmount, ClientError>;

    /// Look up a transaction previously submitted with the same idempotency key
    async fn find_transaction(
        &self,
        request: &TransactionRequest,
    ) -> Result<Option<TxHash>, ClientError>;

    async fn submit(
        &self,
        request: &TransactionRequest,
        signing_key: Option<&EphemeralSecret>,
    ) -> Result<TxHash, ClientError>;

    async fn query_status(&self, hash: &TxHash) -> Result<TxStatus, ClientError>;
}

/// Price oracle of the Forex AMM
#[async_trait]
pub trait SwapQuoter: Send + Sync {
    async fn quote(
        &self,
        asset_in: &AssetId,
        asset_out: &AssetId,
        amount_in: RawAmount,
    ) -> Result<RawAmount, ClientError>;
}

/// Every collaborator a workflow talks to
#[derive(Clone)]
pub struct NetworkClients {
    pub source: Arc<dyn ChainClient>,
    pub pendulum: Arc<dyn ChainClient>,
    pub stellar: Arc<dyn ChainClient>,
    pub nabla: Arc<dyn SwapQuoter>,
}

impl NetworkClients {
    pub fn for_chain(&self, chain: Chain) -> &Arc<dyn ChainClient> {
        match chain {
            Chain::Polygon => &self.source,
            Chain::Pendulum => &self.pendulum,
            Chain::Stellar => &self.stellar,
        }
    }

    /// Give every chain client its own rate limiter
    pub fn rate_limited(self, requests_per_second: u32, burst_capacity: u32) -> Self {
        let wrap = |inner: Arc<dyn ChainClient>| -> Arc<dyn ChainClient> {
            Arc::new(RateLimitedChainClient::new(inner, requests_per_second, burst_capacity))
        };
        Self {
            source: wrap(self.source),
            pendulum: wrap(self.pendulum),
            stellar: wrap(self.stellar),
            nabla: self.nabla,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors() {
        assert!(ClientError::Network("reset".into()).is_transient());
        assert!(ClientError::RateLimited.is_transient());
        assert!(!ClientError::Rejected("slippage".into()).is_transient());
        assert!(!ClientError::DuplicateSubmission("k".into()).is_transient());
    }

    #[test]
    fn test_request_serializes_with_call_tag() {
        let request = TransactionRequest::new(
            "wf:stellar-cleanup-merge".to_string(),
            Chain::Stellar,
            Signer::Ephemeral,
            ChainCall::AccountMerge {
                account: "GEPHEMERAL".to_string(),
                destination: "GFUNDING".to_string(),
            },
        );
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["call"]["type"], "accountMerge");
        assert_eq!(json["idempotencyKey"], "wf:stellar-cleanup-merge");
        assert_eq!(request.call.origin(), "GEPHEMERAL");
        assert_eq!(request.describe(), "merge GEPHEMERAL into GFUNDING");
    }
}
