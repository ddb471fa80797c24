use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use alloy::dyn_abi::DynSolValue;
use alloy::primitives::{keccak256, Address, Bytes, U256};
use rand::RngCore;
use tokio::sync::Mutex;
use tracing::debug;

use super::mock_settlement::{MockRawTransfer, MockSettlementChain};
use crate::crypto::envelope;
use crate::domain::auction::{AuctionParams, AuctionState, WinnerRecord};
use crate::domain::bidder::EphemeralKey;
use crate::ports::events::{
    AuctionEnded, AuctionEvent, AuctionOpened, AuctionSetUp, BiddersRevealed,
    BiddingAddressIssued, CustodyReleased, EncodedTransfer, WinnerRegistered,
};
use crate::ports::gateway::{
    ConfidentialGateway, ConfidentialRequest, GatewayError, Operation, StateField,
};
use crate::ports::settlement::SettlementChain;
use crate::ports::{ConfidentialReceipt, GasBudget, ReceiptStatus};

/// Resource cost model of the mock program.
///
/// Ending and revealing iterate over every bidder, everything else is flat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasSchedule {
    pub base: u64,
    pub per_bidder: u64,
}

impl Default for GasSchedule {
    fn default() -> Self {
        Self {
            base: 50_000,
            per_bidder: 30_000,
        }
    }
}

impl GasSchedule {
    pub fn cost(&self, operation: &Operation, bidders: usize) -> u64 {
        match operation {
            Operation::EndAuction | Operation::RevealBidders => self
                .base
                .saturating_add(self.per_bidder.saturating_mul(bidders as u64)),
            _ => self.base,
        }
    }
}

/// Faults the mock executor can be told to exhibit on the next matching request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectedFault {
    /// The request never reaches the executor.
    Transport,
    /// Flip one byte of the issued ciphertext.
    CorruptCiphertext,
    /// Encrypt the issued address under a key the bidder does not hold.
    WrongKey,
}

struct BidderEntry {
    identity: Address,
    deposit: Address,
}

struct AuctionRecord {
    auctioneer: Address,
    params: AuctionParams,
    phase: AuctionState,
    holding: Option<Address>,
    bidders: Vec<BidderEntry>,
    final_block: Option<u64>,
    winner: Option<WinnerRecord>,
    entitled: HashSet<Address>,
    claimed: HashSet<Address>,
}

impl AuctionRecord {
    fn require_phase(&self, phase: AuctionState) -> Result<(), String> {
        if self.phase != phase {
            return Err(format!("auction is {}, expected {phase}", self.phase));
        }
        Ok(())
    }

    fn require_auctioneer(&self, sender: Address) -> Result<(), String> {
        if sender != self.auctioneer {
            return Err(format!("{sender} is not the auctioneer"));
        }
        Ok(())
    }

    fn final_block(&self) -> Result<u64, String> {
        self.final_block.ok_or_else(|| "auction has not ended".to_string())
    }

    fn deposit_owner(&self, deposit: Address) -> Option<Address> {
        self.bidders
            .iter()
            .find(|b| b.deposit == deposit)
            .map(|b| b.identity)
    }

    fn outstanding_claims(&self) -> usize {
        self.entitled.difference(&self.claimed).count()
    }
}

#[derive(Default)]
struct ExecutorState {
    auctions: HashMap<Address, AuctionRecord>,
    faults: HashMap<&'static str, VecDeque<InjectedFault>>,
    sequence: u64,
}

/// In-process stand-in for the confidential auction program.
///
/// Holds every secret the real program would (holding address, deposit
/// addresses) and reads the shared [`MockSettlementChain`] for final-block
/// balances and to pre-sign claim transfers.
pub struct MockConfidentialExecutor {
    settlement: MockSettlementChain,
    gas: GasSchedule,
    state: Mutex<ExecutorState>,
}

fn random_address() -> Address {
    let mut bytes = [0u8; 20];
    rand::thread_rng().fill_bytes(&mut bytes);
    Address::from(bytes)
}

impl MockConfidentialExecutor {
    pub fn new(settlement: MockSettlementChain) -> Self {
        Self::with_gas_schedule(settlement, GasSchedule::default())
    }

    pub fn with_gas_schedule(settlement: MockSettlementChain, gas: GasSchedule) -> Self {
        Self {
            settlement,
            gas,
            state: Mutex::new(ExecutorState::default()),
        }
    }

    pub fn gas_schedule(&self) -> GasSchedule {
        self.gas
    }

    /// Deploy a new auction instance and return its address.
    pub async fn deploy_auction(&self, auctioneer: Address, params: AuctionParams) -> Address {
        let id = random_address();
        self.state.lock().await.auctions.insert(
            id,
            AuctionRecord {
                auctioneer,
                params,
                phase: AuctionState::Setup,
                holding: None,
                bidders: Vec::new(),
                final_block: None,
                winner: None,
                entitled: HashSet::new(),
                claimed: HashSet::new(),
            },
        );
        id
    }

    /// A gateway that sends to `auction` as `identity`.
    pub fn connect(self: &Arc<Self>, auction: Address, identity: Address) -> MockGateway {
        MockGateway {
            executor: self.clone(),
            auction,
            identity,
        }
    }

    /// Queue a fault for the next request of `operation` (by name).
    pub async fn inject(&self, operation: &'static str, fault: InjectedFault) {
        self.state
            .lock()
            .await
            .faults
            .entry(operation)
            .or_default()
            .push_back(fault);
    }

    pub async fn bidder_count(&self, auction: Address) -> usize {
        self.state
            .lock()
            .await
            .auctions
            .get(&auction)
            .map(|a| a.bidders.len())
            .unwrap_or_default()
    }

    async fn execute(
        &self,
        auction: Address,
        sender: Address,
        request: &ConfidentialRequest,
        budget: GasBudget,
    ) -> Result<ConfidentialReceipt, GatewayError> {
        let operation = request.operation.name();
        let mut state = self.state.lock().await;
        let fault = state
            .faults
            .get_mut(operation)
            .and_then(|queue| queue.pop_front());
        if fault == Some(InjectedFault::Transport) {
            return Err(GatewayError::Transport(format!(
                "injected transport failure for {operation}"
            )));
        }

        state.sequence += 1;
        let tx_hash = keccak256(state.sequence.to_be_bytes());
        let record = state
            .auctions
            .get_mut(&auction)
            .ok_or_else(|| GatewayError::Rejected {
                operation,
                reason: format!("no auction at {auction}"),
            })?;

        let cost = self.gas.cost(&request.operation, record.bidders.len());
        if cost > budget.get() {
            debug!(operation, cost, budget = budget.get(), "mock executor out of gas");
            return Ok(ConfidentialReceipt {
                tx_hash,
                status: ReceiptStatus::Failed,
                logs: vec![],
                resource_used: budget.get(),
            });
        }

        let events = self
            .apply(record, sender, request, fault)
            .await
            .map_err(|reason| GatewayError::Rejected { operation, reason })?;

        Ok(ConfidentialReceipt {
            tx_hash,
            status: ReceiptStatus::Success,
            logs: events.into_iter().map(|e| e.into_log(auction)).collect(),
            resource_used: cost,
        })
    }

    async fn apply(
        &self,
        record: &mut AuctionRecord,
        sender: Address,
        request: &ConfidentialRequest,
        fault: Option<InjectedFault>,
    ) -> Result<Vec<AuctionEvent>, String> {
        match &request.operation {
            Operation::SetUpAuction => {
                record.require_auctioneer(sender)?;
                record.require_phase(AuctionState::Setup)?;
                if record.holding.is_some() {
                    return Err("auction already set up".into());
                }
                let holding = random_address();
                record.holding = Some(holding);
                Ok(vec![AuctionEvent::SetUp(AuctionSetUp {
                    holdingAddress: holding,
                })])
            }

            Operation::StartAuction => {
                record.require_auctioneer(sender)?;
                record.require_phase(AuctionState::Setup)?;
                if record.holding.is_none() {
                    return Err("auction not set up".into());
                }
                if self.settlement.now() >= record.params.end_time {
                    return Err("end time already passed".into());
                }
                record.phase = AuctionState::Open;
                Ok(vec![AuctionEvent::Opened(AuctionOpened {
                    nftContract: record.params.nft.contract,
                    nftTokenId: record.params.nft.token_id,
                    endTimestamp: U256::from(record.params.end_time),
                    minimalBid: record.params.minimal_bid,
                })])
            }

            Operation::GetBiddingAddress => {
                record.require_phase(AuctionState::Open)?;
                if self.settlement.now() >= record.params.end_time {
                    return Err("bidding has ended".into());
                }
                let key = EphemeralKey::from_slice(&request.confidential_payload)
                    .ok_or("confidential payload must be a 32-byte key")?;

                let deposit = match record.bidders.iter().find(|b| b.identity == sender) {
                    Some(entry) => entry.deposit,
                    None => {
                        let deposit = random_address();
                        record.bidders.push(BidderEntry {
                            identity: sender,
                            deposit,
                        });
                        deposit
                    }
                };

                let sealed = match fault {
                    Some(InjectedFault::WrongKey) => {
                        let other = EphemeralKey::generate(&mut rand::thread_rng());
                        envelope::seal(&other, deposit.as_slice(), &mut rand::thread_rng())
                    }
                    _ => envelope::seal(&key, deposit.as_slice(), &mut rand::thread_rng()),
                };
                let mut sealed = sealed.map_err(|e| e.to_string())?;
                if fault == Some(InjectedFault::CorruptCiphertext) {
                    if let Some(last) = sealed.last_mut() {
                        *last ^= 0x01;
                    }
                }

                Ok(vec![AuctionEvent::AddressIssued(BiddingAddressIssued {
                    owner: sender,
                    encryptedAddress: Bytes::from(sealed),
                })])
            }

            Operation::EndAuction => {
                record.require_auctioneer(sender)?;
                record.require_phase(AuctionState::Open)?;
                let end_time = record.params.end_time;
                if self.settlement.now() < end_time {
                    return Err(format!("auction runs until {end_time}"));
                }
                let final_block = match self.settlement.first_block_at_or_after(end_time).await {
                    Some(block) => block,
                    None => self.settlement.mine_block().await,
                };
                record.final_block = Some(final_block);
                record.phase = AuctionState::Closed;
                Ok(vec![AuctionEvent::Ended(AuctionEnded {
                    finalBlockNumber: U256::from(final_block),
                })])
            }

            Operation::RevealBidders => {
                if record.phase < AuctionState::Closed {
                    return Err("auction still open".into());
                }
                Ok(vec![AuctionEvent::Revealed(BiddersRevealed {
                    bidders: record.bidders.iter().map(|b| b.identity).collect(),
                    depositAddresses: record.bidders.iter().map(|b| b.deposit).collect(),
                })])
            }

            Operation::RegisterWinner { deposit, amount } => {
                let final_block = record.final_block()?;
                let identity = if deposit.is_zero() {
                    if !amount.is_zero() {
                        return Err("no-bid registration must carry a zero amount".into());
                    }
                    Address::ZERO
                } else {
                    let identity = record
                        .deposit_owner(*deposit)
                        .ok_or_else(|| format!("{deposit} is not a revealed deposit"))?;
                    let balance = self.balance_at(*deposit, final_block).await?;
                    if balance != *amount {
                        return Err(format!(
                            "deposit {deposit} held {balance} at block {final_block}, not {amount}"
                        ));
                    }
                    identity
                };
                let winner = WinnerRecord {
                    identity,
                    deposit_address: *deposit,
                    winning_bid: *amount,
                };

                match record.phase {
                    AuctionState::Closed => {}
                    AuctionState::Resolved
                        if record.winner.unwrap_or(ZERO_WINNER) == winner => {}
                    AuctionState::Resolved => return Err("winner already registered".into()),
                    other => return Err(format!("cannot register a winner while {other}")),
                }

                let mut entitled = HashSet::from([record.auctioneer]);
                for bidder in &record.bidders {
                    if !self.balance_at(bidder.deposit, final_block).await?.is_zero() {
                        entitled.insert(bidder.identity);
                    }
                }
                record.entitled = entitled;
                record.winner = Some(winner);
                record.phase = AuctionState::Resolved;

                Ok(vec![AuctionEvent::WinnerRegistered(WinnerRegistered {
                    winner: identity,
                    depositAddress: *deposit,
                    amount: *amount,
                })])
            }

            Operation::RefuteWinner { deposit } => {
                record.require_phase(AuctionState::Resolved)?;
                let final_block = record.final_block()?;
                let identity = record
                    .deposit_owner(*deposit)
                    .ok_or_else(|| format!("{deposit} is not a revealed deposit"))?;
                let balance = self.balance_at(*deposit, final_block).await?;
                let current = record.winner.map(|w| w.winning_bid).unwrap_or_default();
                if balance <= current {
                    return Err(format!("current winner stands with {current}"));
                }
                record.winner = Some(WinnerRecord {
                    identity,
                    deposit_address: *deposit,
                    winning_bid: balance,
                });
                record.entitled.insert(identity);
                Ok(vec![AuctionEvent::WinnerRegistered(WinnerRegistered {
                    winner: identity,
                    depositAddress: *deposit,
                    amount: balance,
                })])
            }

            Operation::Claim { recipient } => {
                if record.phase < AuctionState::Resolved {
                    return Err(format!("auction is {}, expected {}", record.phase, AuctionState::Resolved));
                }
                if record.claimed.contains(&sender) {
                    return Err(format!("{sender} already claimed"));
                }
                // Deposits that landed after the final block are refunded too.
                let holds_deposit = match record.bidders.iter().find(|b| b.identity == sender) {
                    Some(entry) => !self
                        .settlement
                        .balance(entry.deposit)
                        .await
                        .map_err(|e| e.to_string())?
                        .is_zero(),
                    None => false,
                };
                if !record.entitled.contains(&sender) && !holds_deposit {
                    return Err(format!("{sender} has nothing to claim"));
                }
                let holding = record.holding.ok_or("auction not set up")?;
                let winner = record.winner.filter(|w| !w.identity.is_zero());

                let release_custody = || {
                    AuctionEvent::CustodyReleased(CustodyReleased {
                        nftContract: record.params.nft.contract,
                        tokenId: record.params.nft.token_id,
                        from: holding,
                        to: *recipient,
                    })
                };

                let mut events = Vec::new();
                if sender == record.auctioneer {
                    match winner {
                        Some(w) => {
                            if let Some(event) =
                                self.sign_payout(w.deposit_address, *recipient, Some(w.winning_bid)).await?
                            {
                                events.push(event);
                            }
                        }
                        None => events.push(release_custody()),
                    }
                } else if let Some(w) = winner.filter(|w| w.identity == sender) {
                    events.push(release_custody());
                    let reserved = if record.claimed.contains(&record.auctioneer) {
                        U256::ZERO
                    } else {
                        w.winning_bid
                    };
                    let balance = self
                        .settlement
                        .balance(w.deposit_address)
                        .await
                        .map_err(|e| e.to_string())?;
                    let excess = balance.saturating_sub(reserved);
                    if let Some(event) =
                        self.sign_payout(w.deposit_address, *recipient, Some(excess)).await?
                    {
                        events.push(event);
                    }
                } else if let Some(entry) = record.bidders.iter().find(|b| b.identity == sender) {
                    if let Some(event) = self.sign_payout(entry.deposit, *recipient, None).await? {
                        events.push(event);
                    }
                }

                record.claimed.insert(sender);
                if record.outstanding_claims() == 0 {
                    record.phase = AuctionState::Claimed;
                }
                Ok(events)
            }
        }
    }

    async fn balance_at(&self, address: Address, block: u64) -> Result<U256, String> {
        self.settlement
            .balance_at(address, block)
            .await
            .map_err(|e| e.to_string())
    }

    /// Pre-sign a transfer out of a deposit address. Pays `amount` (or the
    /// whole balance) minus the transfer fee; `None` when nothing is left.
    async fn sign_payout(
        &self,
        deposit: Address,
        recipient: Address,
        amount: Option<U256>,
    ) -> Result<Option<AuctionEvent>, String> {
        let fee = self.settlement.transfer_fee().await;
        let balance = self.settlement.balance(deposit).await.map_err(|e| e.to_string())?;
        let gross = amount.map_or(balance, |a| a.min(balance));
        if gross <= fee {
            return Ok(None);
        }
        let nonce = self
            .settlement
            .pending_nonce(deposit)
            .await
            .map_err(|e| e.to_string())?;
        let fees = self.settlement.suggest_fees().await.map_err(|e| e.to_string())?;
        let raw = MockRawTransfer {
            from: deposit,
            to: recipient,
            value: gross - fee,
            nonce,
            max_fee_per_gas: fees.max_fee_per_gas,
        }
        .encode()
        .map_err(|e| e.to_string())?;
        Ok(Some(AuctionEvent::EncodedTransfer(EncodedTransfer { signedTx: raw })))
    }

    async fn read(&self, auction: Address, field: StateField) -> Result<Vec<DynSolValue>, GatewayError> {
        let state = self.state.lock().await;
        let record = state
            .auctions
            .get(&auction)
            .ok_or_else(|| GatewayError::Transport(format!("no auction at {auction}")))?;
        let uint = |v: U256| DynSolValue::Uint(v, 256);

        Ok(match field {
            StateField::Phase => vec![DynSolValue::Uint(U256::from(record.phase.as_phase()), 8)],
            StateField::EndTime => vec![uint(U256::from(record.params.end_time))],
            StateField::FinalBlockNumber => {
                vec![uint(U256::from(record.final_block.unwrap_or_default()))]
            }
            StateField::Winner => {
                let w = record.winner.unwrap_or(ZERO_WINNER);
                vec![
                    DynSolValue::Address(w.identity),
                    DynSolValue::Address(w.deposit_address),
                ]
            }
            StateField::WinningBid => {
                vec![uint(record.winner.map(|w| w.winning_bid).unwrap_or_default())]
            }
            StateField::ClaimsOutstanding => vec![uint(U256::from(record.outstanding_claims()))],
        })
    }
}

const ZERO_WINNER: WinnerRecord = WinnerRecord {
    identity: Address::ZERO,
    deposit_address: Address::ZERO,
    winning_bid: U256::ZERO,
};

/// Gateway into [`MockConfidentialExecutor`] for one auction and one identity.
#[derive(Clone)]
pub struct MockGateway {
    executor: Arc<MockConfidentialExecutor>,
    auction: Address,
    identity: Address,
}

impl MockGateway {
    /// The same auction, sending as another identity.
    pub fn as_identity(&self, identity: Address) -> Self {
        Self {
            executor: self.executor.clone(),
            auction: self.auction,
            identity,
        }
    }
}

impl ConfidentialGateway for MockGateway {
    fn auction(&self) -> Address {
        self.auction
    }

    fn identity(&self) -> Address {
        self.identity
    }

    async fn send(
        &self,
        request: &ConfidentialRequest,
        budget: GasBudget,
    ) -> Result<ConfidentialReceipt, GatewayError> {
        self.executor
            .execute(self.auction, self.identity, request, budget)
            .await
    }

    async fn call(&self, field: StateField) -> Result<Vec<DynSolValue>, GatewayError> {
        self.executor.read(self.auction, field).await
    }
}
