use std::sync::Arc;

use crate::config::AuctionConfig;
use crate::retry::RetryPolicy;
use crate::submit::SubmissionPolicy;

/// Everything a protocol driver needs from its environment: chain handles,
/// chain id, and the retry and submission policies. Passed explicitly into
/// every driver constructor.
pub struct SettlementContext<S, K> {
    pub settlement: Arc<S>,
    pub custody: Arc<K>,
    pub chain_id: u64,
    pub retry: RetryPolicy,
    pub submission: SubmissionPolicy,
}

impl<S, K> Clone for SettlementContext<S, K> {
    fn clone(&self) -> Self {
        Self {
            settlement: self.settlement.clone(),
            custody: self.custody.clone(),
            chain_id: self.chain_id,
            retry: self.retry.clone(),
            submission: self.submission.clone(),
        }
    }
}

impl<S, K> SettlementContext<S, K> {
    pub fn new(settlement: S, custody: K, chain_id: u64) -> Self {
        Self {
            settlement: Arc::new(settlement),
            custody: Arc::new(custody),
            chain_id,
            retry: RetryPolicy::default(),
            submission: SubmissionPolicy::default(),
        }
    }

    pub fn from_config(config: &AuctionConfig, settlement: S, custody: K) -> Self {
        Self::new(settlement, custody, config.settlement.chain_id)
            .with_retry(config.retry.clone())
            .with_submission(config.submission.policy())
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_submission(mut self, submission: SubmissionPolicy) -> Self {
        self.submission = submission;
        self
    }

    /// Same policies and custody, different settlement handle (another signer).
    pub fn with_settlement<T>(&self, settlement: T) -> SettlementContext<T, K> {
        SettlementContext {
            settlement: Arc::new(settlement),
            custody: self.custody.clone(),
            chain_id: self.chain_id,
            retry: self.retry.clone(),
            submission: self.submission.clone(),
        }
    }
}
