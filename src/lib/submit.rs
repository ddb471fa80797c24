//! Settlement-chain transaction submission with bounded repricing and
//! bounded inclusion polling.

use std::time::Duration;

use alloy::primitives::{Address, Bytes, B256};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::domain::bidder::DepositAmount;
use crate::ports::settlement::{SettlementChain, SettlementError, TransferRequest};
use crate::ports::InclusionReceipt;

/// Gas used by a plain value transfer.
pub const TRANSFER_GAS: u64 = 21_000;

/// Exponential inclusion polling with an overall deadline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollPolicy {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub max_wait: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(200),
            max_interval: Duration::from_secs(5),
            max_wait: Duration::from_secs(120),
        }
    }
}

impl PollPolicy {
    fn next_interval(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max_interval)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionPolicy {
    pub max_attempts: u32,
    /// Percentage added to both fee caps after an underpriced or stale-nonce rejection
    pub fee_bump_percent: u64,
    pub gas_limit: u64,
    pub poll: PollPolicy,
}

impl Default for SubmissionPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            fee_bump_percent: 10,
            gas_limit: TRANSFER_GAS,
            poll: PollPolicy::default(),
        }
    }
}

/// Transfer value from the chain's own account to `to` and wait for inclusion.
///
/// The nonce is re-read before every attempt. `Underpriced` and `NonceTooLow`
/// rejections bump fees and retry up to `max_attempts`; an `AlreadyKnown`
/// rejection means an earlier attempt is in the pool, so its hash is awaited.
pub async fn submit_and_await_inclusion<S: SettlementChain>(
    chain: &S,
    policy: &SubmissionPolicy,
    to: Address,
    amount: DepositAmount,
) -> Result<InclusionReceipt, SettlementError> {
    let from = chain.account();
    let mut fees = chain.suggest_fees().await?;
    let mut attempt = 1;

    loop {
        let nonce = chain.pending_nonce(from).await?;
        let value = match amount {
            DepositAmount::Exact(value) => value,
            DepositAmount::Sweep => {
                let balance = chain.balance(from).await?;
                let fee = fees.max_cost(policy.gas_limit);
                if balance <= fee {
                    return Err(SettlementError::InsufficientFunds(format!(
                        "{from} holds {balance}, transfer fee is {fee}"
                    )));
                }
                balance - fee
            }
        };

        let request = TransferRequest {
            to,
            value,
            nonce,
            gas_limit: policy.gas_limit,
            fees,
        };

        match chain.send_transfer(&request).await {
            Ok(tx_hash) | Err(SettlementError::AlreadyKnown(tx_hash)) => {
                info!(%from, %to, %value, nonce, %tx_hash, "transfer submitted");
                return await_inclusion(chain, tx_hash, &policy.poll).await;
            }
            Err(e) if e.needs_repricing() && attempt < policy.max_attempts => {
                let suggested = chain.suggest_fees().await?;
                fees = fees.bumped(policy.fee_bump_percent).max(suggested);
                warn!(
                    %from,
                    nonce,
                    attempt,
                    max_fee_per_gas = fees.max_fee_per_gas,
                    error = %e,
                    "transfer rejected, repricing"
                );
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Broadcast a pre-signed transaction and wait for inclusion.
pub async fn relay_raw_and_await<S: SettlementChain>(
    chain: &S,
    raw: &Bytes,
    poll: &PollPolicy,
) -> Result<InclusionReceipt, SettlementError> {
    let tx_hash = match chain.send_raw(raw).await {
        Ok(hash) => hash,
        Err(SettlementError::AlreadyKnown(hash)) => {
            debug!(%hash, "signed transaction already known, awaiting it");
            hash
        }
        Err(e) => return Err(e),
    };
    await_inclusion(chain, tx_hash, poll).await
}

/// Poll for inclusion with exponentially growing intervals until `max_wait`.
pub async fn await_inclusion<S: SettlementChain>(
    chain: &S,
    tx_hash: B256,
    poll: &PollPolicy,
) -> Result<InclusionReceipt, SettlementError> {
    let started = Instant::now();
    let mut interval = poll.initial_interval;

    loop {
        if let Some(receipt) = chain.inclusion(tx_hash).await? {
            if !receipt.success {
                return Err(SettlementError::Reverted(tx_hash));
            }
            debug!(%tx_hash, block = receipt.block_number, "transaction included");
            return Ok(receipt);
        }

        let waited = started.elapsed();
        if waited >= poll.max_wait {
            return Err(SettlementError::Timeout { tx_hash, waited });
        }
        tokio::time::sleep(interval.min(poll.max_wait - waited)).await;
        interval = poll.next_interval(interval);
    }
}
