use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use alloy::primitives::{keccak256, Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::ports::settlement::{FeeQuote, SettlementChain, SettlementError, TransferRequest};
use crate::ports::InclusionReceipt;
use crate::submit::TRANSFER_GAS;

/// Default base fee: 1 gwei.
pub const DEFAULT_BASE_FEE: u128 = 1_000_000_000;

/// Transfer pre-signed by the mock executor on behalf of an address it controls.
///
/// Stands in for an RLP-encoded signed transaction; the mock ledger trusts `from`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MockRawTransfer {
    pub from: Address,
    pub to: Address,
    pub value: U256,
    pub nonce: u64,
    pub max_fee_per_gas: u128,
}

impl MockRawTransfer {
    pub fn encode(&self) -> Result<Bytes, SettlementError> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(|e| SettlementError::Rpc(format!("cannot encode raw transfer: {e}")))
    }

    pub fn decode(raw: &[u8]) -> Result<Self, SettlementError> {
        serde_json::from_slice(raw)
            .map_err(|e| SettlementError::Rpc(format!("invalid raw transaction: {e}")))
    }
}

/// In-memory settlement chain. Every accepted transaction is mined into its own
/// block, stamped with the mock clock, and per-block balance history is kept so
/// that historical balance reads are exact.
///
/// Cloning (or [`for_account`](Self::for_account)) shares the same ledger.
#[derive(Clone)]
pub struct MockSettlementChain {
    ledger: Arc<Mutex<Ledger>>,
    clock: Arc<AtomicU64>,
    account: Address,
}

struct Ledger {
    /// Block timestamps, indexed by block number
    blocks: Vec<u64>,
    balances: HashMap<Address, U256>,
    history: HashMap<Address, BTreeMap<u64, U256>>,
    nonces: HashMap<Address, u64>,
    receipts: HashMap<B256, InclusionReceipt>,
    base_fee: u128,
    underpriced_rejections: u32,
    stall_inclusion: bool,
}

impl Ledger {
    fn mine(&mut self, timestamp: u64) -> u64 {
        self.blocks.push(timestamp);
        (self.blocks.len() - 1) as u64
    }

    fn latest(&self) -> u64 {
        (self.blocks.len() - 1) as u64
    }

    fn balance(&self, address: Address) -> U256 {
        self.balances.get(&address).copied().unwrap_or_default()
    }

    fn set_balance(&mut self, address: Address, balance: U256, block: u64) {
        self.balances.insert(address, balance);
        self.history.entry(address).or_default().insert(block, balance);
    }

    fn transfer_fee(&self) -> U256 {
        U256::from(self.base_fee) * U256::from(TRANSFER_GAS)
    }

    #[allow(clippy::too_many_arguments)]
    fn execute(
        &mut self,
        timestamp: u64,
        tx_hash: B256,
        from: Address,
        to: Address,
        value: U256,
        nonce: u64,
        max_fee_per_gas: u128,
        gas_limit: u64,
    ) -> Result<B256, SettlementError> {
        if self.receipts.contains_key(&tx_hash) {
            return Err(SettlementError::AlreadyKnown(tx_hash));
        }
        if self.underpriced_rejections > 0 {
            self.underpriced_rejections -= 1;
            return Err(SettlementError::Underpriced);
        }
        if max_fee_per_gas < self.base_fee {
            return Err(SettlementError::Underpriced);
        }
        if gas_limit < TRANSFER_GAS {
            return Err(SettlementError::Rpc("intrinsic gas too low".into()));
        }

        let expected = self.nonces.get(&from).copied().unwrap_or_default();
        if nonce < expected {
            return Err(SettlementError::NonceTooLow);
        }
        if nonce > expected {
            return Err(SettlementError::Rpc(format!(
                "nonce gap for {from}: expected {expected}, got {nonce}"
            )));
        }

        let available = self.balance(from);
        let total = value.saturating_add(self.transfer_fee());
        if available < total {
            return Err(SettlementError::InsufficientFunds(format!(
                "{from} holds {available}, needs {total}"
            )));
        }

        let block = self.mine(timestamp);
        self.set_balance(from, available - total, block);
        let credited = self.balance(to).saturating_add(value);
        self.set_balance(to, credited, block);
        self.nonces.insert(from, expected + 1);
        self.receipts.insert(
            tx_hash,
            InclusionReceipt {
                tx_hash,
                block_number: block,
                success: true,
            },
        );
        Ok(tx_hash)
    }
}

impl MockSettlementChain {
    pub fn new() -> Self {
        Self::with_base_fee(DEFAULT_BASE_FEE)
    }

    pub fn with_base_fee(base_fee: u128) -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        Self {
            ledger: Arc::new(Mutex::new(Ledger {
                blocks: vec![now],
                balances: HashMap::new(),
                history: HashMap::new(),
                nonces: HashMap::new(),
                receipts: HashMap::new(),
                base_fee,
                underpriced_rejections: 0,
                stall_inclusion: false,
            })),
            clock: Arc::new(AtomicU64::new(now)),
            account: Address::ZERO,
        }
    }

    /// A handle on the same ledger that signs as `account`.
    pub fn for_account(&self, account: Address) -> Self {
        Self {
            ledger: self.ledger.clone(),
            clock: self.clock.clone(),
            account,
        }
    }

    /// Current mock time (unix seconds).
    pub fn now(&self) -> u64 {
        self.clock.load(Ordering::SeqCst)
    }

    pub fn advance_time(&self, secs: u64) {
        self.clock.fetch_add(secs, Ordering::SeqCst);
    }

    /// Credit `amount` to `address` in a new block (faucet).
    pub async fn fund(&self, address: Address, amount: U256) -> u64 {
        let mut ledger = self.ledger.lock().await;
        let block = ledger.mine(self.now());
        let balance = ledger.balance(address).saturating_add(amount);
        ledger.set_balance(address, balance, block);
        block
    }

    /// Mine an empty block at the current mock time.
    pub async fn mine_block(&self) -> u64 {
        self.ledger.lock().await.mine(self.now())
    }

    pub async fn first_block_at_or_after(&self, timestamp: u64) -> Option<u64> {
        self.ledger
            .lock()
            .await
            .blocks
            .iter()
            .position(|t| *t >= timestamp)
            .map(|n| n as u64)
    }

    /// Fee charged for one plain transfer at the current base fee.
    pub async fn transfer_fee(&self) -> U256 {
        self.ledger.lock().await.transfer_fee()
    }

    /// Reject the next `count` submissions as underpriced.
    pub async fn reject_next_as_underpriced(&self, count: u32) {
        self.ledger.lock().await.underpriced_rejections = count;
    }

    /// While stalled, accepted transactions never report inclusion.
    pub async fn stall_inclusion(&self, stalled: bool) {
        self.ledger.lock().await.stall_inclusion = stalled;
    }
}

impl Default for MockSettlementChain {
    fn default() -> Self {
        Self::new()
    }
}

impl SettlementChain for MockSettlementChain {
    fn account(&self) -> Address {
        self.account
    }

    async fn latest_block(&self) -> Result<u64, SettlementError> {
        Ok(self.ledger.lock().await.latest())
    }

    async fn balance_at(&self, address: Address, block: u64) -> Result<U256, SettlementError> {
        let ledger = self.ledger.lock().await;
        if block > ledger.latest() {
            return Err(SettlementError::UnknownBlock(block));
        }
        Ok(ledger
            .history
            .get(&address)
            .and_then(|h| h.range(..=block).next_back())
            .map(|(_, balance)| *balance)
            .unwrap_or_default())
    }

    async fn balance(&self, address: Address) -> Result<U256, SettlementError> {
        Ok(self.ledger.lock().await.balance(address))
    }

    async fn pending_nonce(&self, address: Address) -> Result<u64, SettlementError> {
        Ok(self
            .ledger
            .lock()
            .await
            .nonces
            .get(&address)
            .copied()
            .unwrap_or_default())
    }

    async fn suggest_fees(&self) -> Result<FeeQuote, SettlementError> {
        let base_fee = self.ledger.lock().await.base_fee;
        Ok(FeeQuote {
            max_fee_per_gas: base_fee,
            max_priority_fee_per_gas: 0,
        })
    }

    async fn send_transfer(&self, request: &TransferRequest) -> Result<B256, SettlementError> {
        let mut preimage = Vec::with_capacity(20 + 20 + 32 + 8 + 16);
        preimage.extend_from_slice(self.account.as_slice());
        preimage.extend_from_slice(request.to.as_slice());
        preimage.extend_from_slice(&request.value.to_be_bytes::<32>());
        preimage.extend_from_slice(&request.nonce.to_be_bytes());
        preimage.extend_from_slice(&request.fees.max_fee_per_gas.to_be_bytes());
        let tx_hash = keccak256(&preimage);

        self.ledger.lock().await.execute(
            self.now(),
            tx_hash,
            self.account,
            request.to,
            request.value,
            request.nonce,
            request.fees.max_fee_per_gas,
            request.gas_limit,
        )
    }

    async fn send_raw(&self, raw: &Bytes) -> Result<B256, SettlementError> {
        let transfer = MockRawTransfer::decode(raw)?;
        let tx_hash = keccak256(raw);
        self.ledger.lock().await.execute(
            self.now(),
            tx_hash,
            transfer.from,
            transfer.to,
            transfer.value,
            transfer.nonce,
            transfer.max_fee_per_gas,
            TRANSFER_GAS,
        )
    }

    async fn inclusion(&self, tx_hash: B256) -> Result<Option<InclusionReceipt>, SettlementError> {
        let ledger = self.ledger.lock().await;
        if ledger.stall_inclusion {
            return Ok(None);
        }
        Ok(ledger.receipts.get(&tx_hash).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::settlement::FeeQuote;

    const ALICE: Address = Address::repeat_byte(0xA1);
    const BOB: Address = Address::repeat_byte(0xB0);

    fn transfer(nonce: u64, value: u64, fees: FeeQuote) -> TransferRequest {
        TransferRequest {
            to: BOB,
            value: U256::from(value),
            nonce,
            gas_limit: TRANSFER_GAS,
            fees,
        }
    }

    #[tokio::test]
    async fn test_balance_history_is_per_block() {
        let chain = MockSettlementChain::with_base_fee(0);
        let b1 = chain.fund(ALICE, U256::from(10)).await;
        let b2 = chain.fund(ALICE, U256::from(5)).await;

        assert_eq!(chain.balance_at(ALICE, 0).await.unwrap(), U256::ZERO);
        assert_eq!(chain.balance_at(ALICE, b1).await.unwrap(), U256::from(10));
        assert_eq!(chain.balance_at(ALICE, b2).await.unwrap(), U256::from(15));
        assert!(matches!(
            chain.balance_at(ALICE, b2 + 1).await,
            Err(SettlementError::UnknownBlock(_))
        ));
    }

    #[tokio::test]
    async fn test_transfer_checks_nonce_and_fee() {
        let chain = MockSettlementChain::new().for_account(ALICE);
        chain.fund(ALICE, U256::from(10u64.pow(18))).await;
        let fees = chain.suggest_fees().await.unwrap();

        let low = FeeQuote {
            max_fee_per_gas: fees.max_fee_per_gas - 1,
            ..fees
        };
        assert!(matches!(
            chain.send_transfer(&transfer(0, 1, low)).await,
            Err(SettlementError::Underpriced)
        ));

        chain.send_transfer(&transfer(0, 1, fees)).await.unwrap();
        assert!(matches!(
            chain.send_transfer(&transfer(0, 2, fees)).await,
            Err(SettlementError::NonceTooLow)
        ));
        assert_eq!(chain.pending_nonce(ALICE).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_resending_same_transaction_is_already_known() {
        let chain = MockSettlementChain::new().for_account(ALICE);
        chain.fund(ALICE, U256::from(10u64.pow(18))).await;
        let fees = chain.suggest_fees().await.unwrap();

        let hash = chain.send_transfer(&transfer(0, 1, fees)).await.unwrap();
        match chain.send_transfer(&transfer(0, 1, fees)).await {
            Err(SettlementError::AlreadyKnown(h)) => assert_eq!(h, hash),
            other => panic!("expected AlreadyKnown, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_raw_transfer_from_controlled_address() {
        let chain = MockSettlementChain::new();
        chain.fund(ALICE, U256::from(10u64.pow(18))).await;
        let raw = MockRawTransfer {
            from: ALICE,
            to: BOB,
            value: U256::from(77),
            nonce: 0,
            max_fee_per_gas: DEFAULT_BASE_FEE,
        }
        .encode()
        .unwrap();

        let hash = chain.send_raw(&raw).await.unwrap();
        assert!(chain.inclusion(hash).await.unwrap().unwrap().success);
        assert_eq!(chain.balance(BOB).await.unwrap(), U256::from(77));
        assert!(matches!(
            chain.send_raw(&raw).await,
            Err(SettlementError::AlreadyKnown(_))
        ));
    }

    #[tokio::test]
    async fn test_first_block_at_or_after() {
        let chain = MockSettlementChain::new();
        let start = chain.now();
        chain.advance_time(10);
        let later = chain.mine_block().await;
        assert_eq!(chain.first_block_at_or_after(start + 5).await, Some(later));
        assert_eq!(chain.first_block_at_or_after(start + 11).await, None);
    }

    #[tokio::test]
    async fn test_insufficient_funds() {
        let chain = MockSettlementChain::new().for_account(ALICE);
        let fees = chain.suggest_fees().await.unwrap();
        assert!(matches!(
            chain.send_transfer(&transfer(0, 1, fees)).await,
            Err(SettlementError::InsufficientFunds(_))
        ));
    }
}
