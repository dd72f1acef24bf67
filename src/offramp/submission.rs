//! Query-before-submit
//!
//! A crash can happen between sending a transaction and persisting the phase that sent it. Every
//! submission therefore carries an idempotency key derived from the workflow id and the step, and
//! goes through three checks before anything is broadcast:
//!
//! 1. a write-ahead record with a known hash means the transaction exists; only its status is
//!    queried
//! 2. otherwise the chain is asked for a transaction with the same key, which is adopted if found
//! 3. otherwise the write-ahead record is stored, the transaction is sent and its hash recorded
//!
//! The result is then polled until it confirms.

use chrono::Utc;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::persistence::{PendingSubmission, StateStore};
use super::polling::poll_until;
use super::recovery::FlowError;
use super::state::OfframpingPhase;
use crate::clients::{ChainClient, RetryHandler, TransactionRequest, TxHash, TxStatus};
use crate::config::PollingConfig;
use crate::ephemeral::EphemeralSecret;
use crate::observability::FlowMetrics;

pub struct Submitter {
    store: Arc<dyn StateStore>,
    retry: RetryHandler,
    polling: PollingConfig,
    metrics: Arc<FlowMetrics>,
}

impl Submitter {
    pub fn new(
        store: Arc<dyn StateStore>,
        retry: RetryHandler,
        polling: PollingConfig,
        metrics: Arc<FlowMetrics>,
    ) -> Self {
        Self {
            store,
            retry,
            polling,
            metrics,
        }
    }

    pub fn retry(&self) -> &RetryHandler {
        &self.retry
    }

    pub fn polling(&self) -> &PollingConfig {
        &self.polling
    }

    /// Whether a submission with this idempotency key was ever attempted
    pub async fn is_recorded(&self, key: &str) -> Result<bool, FlowError> {
        Ok(self.store.read_submission(key).await?.is_some())
    }

    /// Get `request` onto the chain exactly once and wait for it to confirm
    pub async fn submit_once(
        &self,
        client: &dyn ChainClient,
        workflow_id: &str,
        phase: OfframpingPhase,
        request: &TransactionRequest,
        signing_key: Option<&EphemeralSecret>,
        cancel: &CancellationToken,
    ) -> Result<TxHash, FlowError> {
        let chain = client.chain();
        let key = request.idempotency_key.as_str();

        let record = self.store.read_submission(key).await?;
        let known_hash = record.as_ref().and_then(|r| r.tx_hash.clone());

        let hash = match known_hash {
            Some(hash) => {
                info!(key, hash = %hash, "Resuming recorded submission");
                self.metrics.record_reused_submission();
                hash
            }
            None => {
                let found = self
                    .retry
                    .execute_with_retry("find_transaction", || client.find_transaction(request))
                    .await
                    .map_err(FlowError::client(chain))?;

                let now = Utc::now();
                let mut record = record.unwrap_or_else(|| PendingSubmission {
                    key: key.to_string(),
                    workflow_id: workflow_id.to_string(),
                    phase,
                    chain,
                    description: request.describe(),
                    tx_hash: None,
                    created_at: now,
                    updated_at: now,
                });

                let hash = match found {
                    Some(hash) => {
                        info!(key, hash = %hash, "Adopting transaction already on chain");
                        self.metrics.record_reused_submission();
                        hash
                    }
                    None => {
                        self.store.write_submission(&record).await?;
                        if cancel.is_cancelled() {
                            return Err(FlowError::Cancelled);
                        }
                        // Not retried: a lost response must go back through the lookup above
                        let hash = client
                            .submit(request, signing_key)
                            .await
                            .map_err(FlowError::client(chain))?;
                        self.metrics.record_submission();
                        info!(
                            key,
                            chain = %chain,
                            hash = %hash,
                            description = %record.description,
                            "Transaction submitted"
                        );
                        hash
                    }
                };

                record.tx_hash = Some(hash.clone());
                record.updated_at = Utc::now();
                self.store.write_submission(&record).await?;
                hash
            }
        };

        self.wait_for_confirmation(client, &hash, cancel).await?;
        Ok(hash)
    }

    pub async fn wait_for_confirmation(
        &self,
        client: &dyn ChainClient,
        hash: &TxHash,
        cancel: &CancellationToken,
    ) -> Result<(), FlowError> {
        let chain = client.chain();
        let condition = format!("confirmation of {hash} on {chain}");
        poll_until(
            &condition,
            self.polling.confirmation_interval(),
            self.polling.confirmation_max_wait(),
            cancel,
            || async move {
                let status = self
                    .retry
                    .execute_with_retry("query_status", || client.query_status(hash))
                    .await
                    .map_err(FlowError::client(chain))?;
                match status {
                    TxStatus::Confirmed => Ok(Some(())),
                    TxStatus::Pending => Ok(None),
                    TxStatus::Failed => {
                        warn!(hash = %hash, chain = %chain, "Transaction failed on chain");
                        Err(FlowError::TransactionFailed {
                            chain,
                            hash: hash.clone(),
                        })
                    }
                }
            },
        )
        .await?;
        debug!(hash = %hash, chain = %chain, "Transaction confirmed");
        Ok(())
    }
}
