use std::future::Future;
use std::time::Duration;

use alloy::primitives::{Address, Bytes, B256, U256};

use super::InclusionReceipt;

/// EIP-1559 fee parameters for a settlement transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeQuote {
    pub max_fee_per_gas: u128,
    pub max_priority_fee_per_gas: u128,
}

impl FeeQuote {
    /// Raise both fee caps by `percent`, always by at least one unit.
    pub fn bumped(&self, percent: u64) -> Self {
        let bump = |v: u128| {
            let raised = v.saturating_mul(100 + percent as u128) / 100;
            raised.max(v.saturating_add(1))
        };
        Self {
            max_fee_per_gas: bump(self.max_fee_per_gas),
            max_priority_fee_per_gas: bump(self.max_priority_fee_per_gas),
        }
    }

    /// Component-wise maximum of two quotes.
    pub fn max(self, other: Self) -> Self {
        Self {
            max_fee_per_gas: self.max_fee_per_gas.max(other.max_fee_per_gas),
            max_priority_fee_per_gas: self
                .max_priority_fee_per_gas
                .max(other.max_priority_fee_per_gas),
        }
    }

    /// Upper bound on the fee paid for `gas_limit` units.
    pub fn max_cost(&self, gas_limit: u64) -> U256 {
        U256::from(self.max_fee_per_gas) * U256::from(gas_limit)
    }
}

/// A plain value transfer from the adapter's own account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub to: Address,
    pub value: U256,
    pub nonce: u64,
    pub gas_limit: u64,
    pub fees: FeeQuote,
}

/// Port for the public settlement chain.
///
/// Implementations:
/// - `EthereumSettlement` (alloy)
/// - `MockSettlementChain` (in-memory ledger)
pub trait SettlementChain: Send + Sync {
    /// Account that signs `send_transfer` requests.
    fn account(&self) -> Address;

    fn latest_block(&self) -> impl Future<Output = Result<u64, SettlementError>> + Send;

    /// Balance as of a specific block height.
    fn balance_at(
        &self,
        address: Address,
        block: u64,
    ) -> impl Future<Output = Result<U256, SettlementError>> + Send;

    /// Balance at the latest block.
    fn balance(&self, address: Address)
        -> impl Future<Output = Result<U256, SettlementError>> + Send;

    /// Next nonce including pending transactions.
    fn pending_nonce(
        &self,
        address: Address,
    ) -> impl Future<Output = Result<u64, SettlementError>> + Send;

    fn suggest_fees(&self) -> impl Future<Output = Result<FeeQuote, SettlementError>> + Send;

    /// Sign and broadcast a transfer. Returns the transaction hash.
    fn send_transfer(
        &self,
        request: &TransferRequest,
    ) -> impl Future<Output = Result<B256, SettlementError>> + Send;

    /// Broadcast an already signed transaction.
    fn send_raw(&self, raw: &Bytes) -> impl Future<Output = Result<B256, SettlementError>> + Send;

    /// `None` while the transaction is not yet included.
    fn inclusion(
        &self,
        tx_hash: B256,
    ) -> impl Future<Output = Result<Option<InclusionReceipt>, SettlementError>> + Send;
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum SettlementError {
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("transaction underpriced")]
    Underpriced,

    #[error("nonce too low")]
    NonceTooLow,

    #[error("transaction already known: {0}")]
    AlreadyKnown(B256),

    #[error("unknown block: {0}")]
    UnknownBlock(u64),

    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("transaction {tx_hash} not included after {waited:?}")]
    Timeout { tx_hash: B256, waited: Duration },

    #[error("transaction reverted: {0}")]
    Reverted(B256),
}

impl SettlementError {
    /// Errors fixed by re-reading the nonce and raising fees.
    pub fn needs_repricing(&self) -> bool {
        matches!(self, SettlementError::Underpriced | SettlementError::NonceTooLow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bump_raises_fees_by_percent() {
        let quote = FeeQuote {
            max_fee_per_gas: 1_000,
            max_priority_fee_per_gas: 100,
        };
        let bumped = quote.bumped(10);
        assert_eq!(bumped.max_fee_per_gas, 1_100);
        assert_eq!(bumped.max_priority_fee_per_gas, 110);
    }

    #[test]
    fn test_bump_always_moves_small_fees() {
        let quote = FeeQuote {
            max_fee_per_gas: 0,
            max_priority_fee_per_gas: 1,
        };
        let bumped = quote.bumped(10);
        assert_eq!(bumped.max_fee_per_gas, 1);
        assert_eq!(bumped.max_priority_fee_per_gas, 2);
    }

    #[test]
    fn test_max_cost() {
        let quote = FeeQuote {
            max_fee_per_gas: 2,
            max_priority_fee_per_gas: 1,
        };
        assert_eq!(quote.max_cost(21_000), U256::from(42_000));
    }
}
