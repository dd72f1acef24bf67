use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Jitter, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::{ChainClient, ClientError, TransactionRequest, TxHash, TxStatus};
use crate::amount::RawAmount;
use crate::ephemeral::EphemeralSecret;
use crate::tokens::{AssetId, Chain};

/// Chain client wrapper that keeps outbound RPC traffic under a fixed quota
pub struct RateLimitedChainClient {
    inner: Arc<dyn ChainClient>,
    rate_limiter: Arc<DefaultDirectRateLimiter>,
}

impl RateLimitedChainClient {
    pub fn new(inner: Arc<dyn ChainClient>, requests_per_second: u32, burst_capacity: u32) -> Self {
        let per_second = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(burst_capacity).unwrap_or(per_second);
        let quota = Quota::per_second(per_second).allow_burst(burst);
        Self {
            inner,
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
        }
    }

    async fn wait_for_permit(&self) {
        self.rate_limiter
            .until_ready_with_jitter(Jitter::up_to(Duration::from_millis(50)))
            .await;
        debug!(chain = %self.inner.chain(), "Rate limit permit acquired");
    }
}

#[async_trait]
impl ChainClient for RateLimitedChainClient {
    fn chain(&self) -> Chain {
        self.inner.chain()
    }

    fn derive_address(&self, secret: &EphemeralSecret) -> Result<String, ClientError> {
        self.inner.derive_address(secret)
    }

    async fn account_exists(&self, account: &str) -> Result<bool, ClientError> {
        self.wait_for_permit().await;
        self.inner.account_exists(account).await
    }

    async fn balance(&self, account: &str, asset: &AssetId) -> Result<RawAmount, ClientError> {
        self.wait_for_permit().await;
        self.inner.balance(account, asset).await
    }

    async fn find_transaction(
        &self,
        request: &TransactionRequest,
    ) -> Result<Option<TxHash>, ClientError> {
        self.wait_for_permit().await;
        self.inner.find_transaction(request).await
    }

    async fn submit(
        &self,
        request: &TransactionRequest,
        signing_key: Option<&EphemeralSecret>,
    ) -> Result<TxHash, ClientError> {
        self.wait_for_permit().await;
        self.inner.submit(request, signing_key).await
    }

    async fn query_status(&self, hash: &TxHash) -> Result<TxStatus, ClientError> {
        self.wait_for_permit().await;
        self.inner.query_status(hash).await
    }
}
