pub mod custody;
pub mod events;
pub mod gateway;
pub mod settlement;

use alloy::primitives::{Log, B256};
use serde::{Deserialize, Serialize};

/// Resource budget (gas limit) attached to a single confidential request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GasBudget(pub u64);

impl GasBudget {
    pub fn get(self) -> u64 {
        self.0
    }

    /// Multiply by `factor`, saturating at `u64::MAX`.
    pub fn scaled(self, factor: u64) -> Self {
        Self(self.0.saturating_mul(factor))
    }
}

impl std::fmt::Display for GasBudget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Execution status reported by the confidential executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiptStatus {
    Success,
    Failed,
}

/// Receipt returned by the confidential request gateway.
///
/// Shaped like a settlement-chain receipt: the emitted logs are raw and are
/// decoded into typed events by [`events::decode_events`].
#[derive(Debug, Clone)]
pub struct ConfidentialReceipt {
    pub tx_hash: B256,
    pub status: ReceiptStatus,
    pub logs: Vec<Log>,
    /// Resource units consumed by the execution
    pub resource_used: u64,
}

impl ConfidentialReceipt {
    pub fn is_success(&self) -> bool {
        self.status == ReceiptStatus::Success
    }

    /// A failed execution that consumed its whole budget ran out of gas
    /// rather than being rejected by the program.
    pub fn exhausted(&self, budget: GasBudget) -> bool {
        self.status == ReceiptStatus::Failed && self.resource_used >= budget.get()
    }
}

/// Inclusion confirmation for a settlement-chain transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InclusionReceipt {
    pub tx_hash: B256,
    pub block_number: u64,
    pub success: bool,
}
