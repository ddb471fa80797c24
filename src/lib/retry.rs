//! Budget-escalating retry for confidential requests.
//!
//! The resource cost of a confidential state transition is not known ahead of
//! execution (ending an auction iterates over every bidder), so each failed
//! attempt multiplies the gas budget by `budget_growth`. After `max_attempts`
//! failures one last-chance attempt runs at `budget_seed * budget_growth^max_attempts`.

use std::future::Future;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::ports::gateway::GatewayError;
use crate::ports::{ConfidentialReceipt, GasBudget};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub budget_seed: u64,
    pub budget_growth: u64,
    /// Pause between attempts
    #[serde(with = "humantime_serde")]
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            budget_seed: 2_000_000,
            budget_growth: 2,
            delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn immediate(max_attempts: u32, budget_seed: u64, budget_growth: u64) -> Self {
        Self {
            max_attempts,
            budget_seed,
            budget_growth,
            delay: Duration::ZERO,
        }
    }

    /// Highest budget any attempt may use.
    pub fn ceiling(&self) -> GasBudget {
        (0..self.max_attempts).fold(GasBudget(self.budget_seed), |b, _| b.scaled(self.budget_growth))
    }
}

/// Progress of one retried operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryState {
    /// 1-based index of the attempt about to run
    pub attempt: u32,
    pub budget: GasBudget,
    pub max_attempts: u32,
}

impl RetryState {
    pub fn new(policy: &RetryPolicy) -> Self {
        Self {
            attempt: 1,
            budget: GasBudget(policy.budget_seed),
            max_attempts: policy.max_attempts,
        }
    }

    /// The unconditional attempt that runs once the bound is exhausted.
    pub fn is_last_chance(&self) -> bool {
        self.attempt > self.max_attempts
    }

    /// Move to the next attempt with a grown budget. `false` once the
    /// last-chance attempt has been used.
    pub fn escalate(&mut self, growth: u64) -> bool {
        if self.is_last_chance() {
            return false;
        }
        self.attempt += 1;
        self.budget = self.budget.scaled(growth);
        true
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetryError {
    #[error("{operation} failed after {attempts} attempts (last budget {budget}): {source}")]
    OperationFailed {
        operation: &'static str,
        attempts: u32,
        budget: GasBudget,
        #[source]
        source: GatewayError,
    },

    #[error("{source}")]
    Rejected {
        operation: &'static str,
        #[source]
        source: GatewayError,
    },
}

impl RetryError {
    pub fn operation(&self) -> &'static str {
        match self {
            RetryError::OperationFailed { operation, .. } | RetryError::Rejected { operation, .. } => {
                operation
            }
        }
    }
}

/// Run `attempt` with escalating budgets until it yields a successful receipt.
///
/// Semantic rejections (an explicit `Rejected` error, or a failed receipt that
/// did not use up its budget) are returned immediately and never retried.
/// Only use on operations whose effect on the executor is idempotent or
/// absent on failure.
pub async fn with_retry<F, Fut>(
    policy: &RetryPolicy,
    operation: &'static str,
    mut attempt: F,
) -> Result<ConfidentialReceipt, RetryError>
where
    F: FnMut(GasBudget) -> Fut,
    Fut: Future<Output = Result<ConfidentialReceipt, GatewayError>>,
{
    let mut state = RetryState::new(policy);

    loop {
        let failure = match attempt(state.budget).await {
            Ok(receipt) if receipt.is_success() => {
                debug!(
                    operation,
                    attempt = state.attempt,
                    budget = state.budget.get(),
                    resource_used = receipt.resource_used,
                    "confidential request succeeded"
                );
                return Ok(receipt);
            }
            Ok(receipt) if receipt.exhausted(state.budget) => GatewayError::ResourceEstimation {
                operation,
                budget: state.budget,
            },
            Ok(receipt) => {
                return Err(RetryError::Rejected {
                    operation,
                    source: GatewayError::Rejected {
                        operation,
                        reason: format!("execution failed in tx {}", receipt.tx_hash),
                    },
                });
            }
            Err(e) if !e.is_retryable() => {
                return Err(RetryError::Rejected { operation, source: e });
            }
            Err(e) => e,
        };

        let failed = state;
        if !state.escalate(policy.budget_growth) {
            return Err(RetryError::OperationFailed {
                operation,
                attempts: failed.attempt,
                budget: failed.budget,
                source: failure,
            });
        }

        warn!(
            operation,
            attempt = failed.attempt,
            budget = failed.budget.get(),
            next_budget = state.budget.get(),
            last_chance = state.is_last_chance(),
            error = %failure,
            "confidential request failed, retrying"
        );
        if !policy.delay.is_zero() {
            tokio::time::sleep(policy.delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::ReceiptStatus;
    use alloy::primitives::B256;
    use proptest::prelude::*;
    use std::sync::{Arc, Mutex};

    fn receipt(status: ReceiptStatus, resource_used: u64) -> ConfidentialReceipt {
        ConfidentialReceipt {
            tx_hash: B256::ZERO,
            status,
            logs: vec![],
            resource_used,
        }
    }

    /// Runs `with_retry` against an executor that needs `required` gas and
    /// records every budget it was offered.
    async fn run(
        policy: &RetryPolicy,
        required: u64,
    ) -> (Result<ConfidentialReceipt, RetryError>, Vec<u64>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        let result = with_retry(policy, "endAuction", move |budget| {
            let log = log.clone();
            async move {
                log.lock().unwrap().push(budget.get());
                if budget.get() >= required {
                    Ok(receipt(ReceiptStatus::Success, required))
                } else {
                    Ok(receipt(ReceiptStatus::Failed, budget.get()))
                }
            }
        })
        .await;
        let budgets = seen.lock().unwrap().clone();
        (result, budgets)
    }

    #[tokio::test]
    async fn test_budget_escalates_until_success() {
        let policy = RetryPolicy::immediate(3, 100, 2);
        let (result, budgets) = run(&policy, 350).await;
        assert!(result.is_ok());
        assert_eq!(budgets, vec![100, 200, 400]);
    }

    #[tokio::test]
    async fn test_last_chance_attempt_runs_at_ceiling() {
        let policy = RetryPolicy::immediate(3, 100, 2);
        let (result, budgets) = run(&policy, 800).await;
        assert!(result.is_ok());
        assert_eq!(budgets, vec![100, 200, 400, 800]);
    }

    #[tokio::test]
    async fn test_exhaustion_reports_operation_failed() {
        let policy = RetryPolicy::immediate(2, 10, 3);
        let (result, budgets) = run(&policy, 1_000).await;
        assert_eq!(budgets, vec![10, 30, 90]);
        match result {
            Err(RetryError::OperationFailed {
                operation,
                attempts,
                budget,
                ..
            }) => {
                assert_eq!(operation, "endAuction");
                assert_eq!(attempts, 3);
                assert_eq!(budget, GasBudget(90));
            }
            other => panic!("expected OperationFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_rejection_is_not_retried() {
        let calls = Arc::new(Mutex::new(0u32));
        let counter = calls.clone();
        let result = with_retry(&RetryPolicy::immediate(5, 10, 2), "claim", move |_| {
            let counter = counter.clone();
            async move {
                *counter.lock().unwrap() += 1;
                Err(GatewayError::Rejected {
                    operation: "claim",
                    reason: "already claimed".into(),
                })
            }
        })
        .await;
        let err = result.unwrap_err();
        assert!(matches!(err, RetryError::Rejected { .. }));
        assert_eq!(err.to_string(), "claim rejected: already claimed");
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_failed_receipt_under_budget_is_rejection() {
        let result = with_retry(&RetryPolicy::immediate(5, 100, 2), "startAuction", |_| async {
            Ok(receipt(ReceiptStatus::Failed, 40))
        })
        .await;
        assert!(matches!(result, Err(RetryError::Rejected { operation: "startAuction", .. })));
    }

    #[tokio::test]
    async fn test_transport_errors_are_retried() {
        let calls = Arc::new(Mutex::new(0u32));
        let counter = calls.clone();
        let result = with_retry(&RetryPolicy::immediate(2, 10, 2), "revealBidders", move |_| {
            let counter = counter.clone();
            async move {
                let mut n = counter.lock().unwrap();
                *n += 1;
                if *n < 3 {
                    Err(GatewayError::Transport("connection reset".into()))
                } else {
                    Ok(receipt(ReceiptStatus::Success, 1))
                }
            }
        })
        .await;
        assert!(result.is_ok());
        assert_eq!(*calls.lock().unwrap(), 3);
    }

    #[test]
    fn test_ceiling() {
        assert_eq!(RetryPolicy::immediate(3, 100, 2).ceiling(), GasBudget(800));
        assert_eq!(RetryPolicy::immediate(0, 100, 2).ceiling(), GasBudget(100));
    }

    proptest! {
        #[test]
        fn prop_attempts_and_budget_are_bounded(
            max_attempts in 0u32..6,
            seed in 1u64..1_000,
            growth in 1u64..5,
        ) {
            let policy = RetryPolicy::immediate(max_attempts, seed, growth);
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let (result, budgets) = rt.block_on(run(&policy, u64::MAX));

            let is_operation_failed = matches!(result, Err(RetryError::OperationFailed { .. }));
            prop_assert!(is_operation_failed);
            prop_assert_eq!(budgets.len() as u32, max_attempts + 1);
            prop_assert!(budgets.iter().all(|b| *b <= policy.ceiling().get()));
            prop_assert_eq!(*budgets.last().unwrap(), policy.ceiling().get());
        }
    }
}
