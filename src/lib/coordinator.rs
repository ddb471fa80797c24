//! Auctioneer-side driver of the settlement state machine.
//!
//! Every state-changing step goes through [`with_retry`] and is only applied
//! to the local [`Auction`] after the receipt carries the expected event.
//! Resolution happens in the resolver's process; the coordinator catches up
//! with it through [`AuctionCoordinator::sync`].

use alloy::primitives::{Address, U256};
use tracing::{debug, info};

use crate::claim::{self, ClaimError, ClaimOutcome};
use crate::context::SettlementContext;
use crate::domain::auction::{Auction, AuctionParams, AuctionState, StateError, WinnerRecord};
use crate::ports::custody::{CustodyError, CustodyPort};
use crate::ports::events::{decode_events, expect_single, AuctionEvent, ProtocolViolation};
use crate::ports::gateway::{
    decode_address_pair, decode_u64, decode_uint, ConfidentialGateway, ConfidentialRequest,
    GatewayError, Operation, StateField,
};
use crate::ports::settlement::SettlementChain;
use crate::retry::{with_retry, RetryError};

#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Retry(#[from] RetryError),

    #[error(transparent)]
    Protocol(#[from] ProtocolViolation),

    #[error("state query failed: {0}")]
    Gateway(#[from] GatewayError),

    #[error("custody error: {0}")]
    Custody(#[from] CustodyError),

    #[error(transparent)]
    Claim(#[from] ClaimError),
}

pub struct AuctionCoordinator<G, S, K> {
    gateway: G,
    ctx: SettlementContext<S, K>,
    auction: Auction,
}

impl<G, S, K> AuctionCoordinator<G, S, K>
where
    G: ConfidentialGateway,
    S: SettlementChain,
    K: CustodyPort,
{
    /// Drive the auction behind `gateway`, whose identity is the auctioneer.
    pub fn new(gateway: G, ctx: SettlementContext<S, K>, params: AuctionParams) -> Self {
        let auction = Auction::new(gateway.auction(), gateway.identity(), params);
        Self {
            gateway,
            ctx,
            auction,
        }
    }

    pub fn auction(&self) -> &Auction {
        &self.auction
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    /// Obtain the holding address and move the asset there.
    ///
    /// Safe to call again after a partial failure: an existing holding
    /// address is reused and an asset already in escrow is left alone.
    pub async fn set_up(&mut self) -> Result<Address, CoordinatorError> {
        self.auction.require("setUpAuction", AuctionState::Setup)?;

        let holding = match self.auction.holding_address() {
            Some(holding) => holding,
            None => {
                let events = self.request(Operation::SetUpAuction).await?;
                let holding = expect_single(&events, "setUpAuction", "AuctionSetUp", |e| match e {
                    AuctionEvent::SetUp(ev) => Some(ev.holdingAddress),
                    _ => None,
                })?;
                self.auction.record_holding_address(holding)?;
                holding
            }
        };

        let nft = self.auction.params.nft;
        if self.ctx.custody.owner_of(&nft).await? == holding {
            debug!(%nft, %holding, "asset already in escrow");
        } else {
            self.ctx
                .custody
                .transfer_custody(&nft, self.ctx.settlement.account(), holding)
                .await?;
            info!(auction = %self.auction.id, %nft, %holding, "asset escrowed");
        }
        Ok(holding)
    }

    /// Open the auction for deposits.
    pub async fn start(&mut self) -> Result<(), CoordinatorError> {
        self.auction.require("startAuction", AuctionState::Setup)?;
        if self.auction.holding_address().is_none() {
            return Err(StateError::NotSetUp.into());
        }

        let events = self.request(Operation::StartAuction).await?;
        let opened = expect_single(&events, "startAuction", "AuctionOpened", |e| match e {
            AuctionEvent::Opened(ev) => Some(ev.clone()),
            _ => None,
        })?;

        let params = &self.auction.params;
        if opened.endTimestamp != U256::from(params.end_time)
            || opened.minimalBid != params.minimal_bid
            || opened.nftContract != params.nft.contract
            || opened.nftTokenId != params.nft.token_id
        {
            return Err(ProtocolViolation::UnexpectedState {
                field: "AuctionOpened",
                reason: format!(
                    "opened with end {} and minimal bid {}, expected {} and {}",
                    opened.endTimestamp, opened.minimalBid, params.end_time, params.minimal_bid
                ),
            }
            .into());
        }

        let end_time = params.end_time;
        self.auction.transition(AuctionState::Open)?;
        info!(auction = %self.auction.id, end_time, "auction opened");
        Ok(())
    }

    /// Close the auction and fix the final settlement block.
    pub async fn end(&mut self) -> Result<u64, CoordinatorError> {
        self.auction.require("endAuction", AuctionState::Open)?;

        let events = self.request(Operation::EndAuction).await?;
        let reported = expect_single(&events, "endAuction", "AuctionEnded", |e| match e {
            AuctionEvent::Ended(ev) => Some(ev.finalBlockNumber),
            _ => None,
        })?;
        let final_block = u64::try_from(reported).map_err(|_| ProtocolViolation::Malformed {
            event: "AuctionEnded",
            reason: format!("final block {reported} does not fit in 64 bits"),
        })?;

        self.auction.fix_final_block(final_block)?;
        self.auction.transition(AuctionState::Closed)?;
        info!(auction = %self.auction.id, final_block, "auction closed");
        Ok(final_block)
    }

    /// Refresh the local view from the executor's state fields.
    pub async fn sync(&mut self) -> Result<AuctionState, CoordinatorError> {
        let raw = decode_uint(StateField::Phase, &self.gateway.call(StateField::Phase).await?)?;
        let observed = u8::try_from(raw)
            .ok()
            .and_then(AuctionState::from_phase)
            .ok_or_else(|| ProtocolViolation::UnexpectedState {
                field: StateField::Phase.name(),
                reason: format!("unknown phase {raw}"),
            })?;

        if observed >= AuctionState::Closed {
            let values = self.gateway.call(StateField::FinalBlockNumber).await?;
            let final_block = decode_u64(StateField::FinalBlockNumber, &values)?;
            if final_block != 0 {
                self.auction.fix_final_block(final_block)?;
            }
        }

        if observed >= AuctionState::Resolved {
            let values = self.gateway.call(StateField::Winner).await?;
            let (identity, deposit_address) = decode_address_pair(StateField::Winner, &values)?;
            let values = self.gateway.call(StateField::WinningBid).await?;
            let winning_bid = decode_uint(StateField::WinningBid, &values)?;
            self.auction.record_winner(WinnerRecord {
                identity,
                deposit_address,
                winning_bid,
            })?;
        }

        if observed != self.auction.state() {
            self.auction.advance_to(observed)?;
            info!(auction = %self.auction.id, state = %observed, "auction state synced");
        }
        Ok(observed)
    }

    /// Collect the winning bid, or the asset back when nobody bid.
    pub async fn claim(&mut self, recipient: Address) -> Result<ClaimOutcome, CoordinatorError> {
        if self.auction.state() < AuctionState::Resolved {
            self.sync().await?;
        }
        if self.auction.state() < AuctionState::Resolved {
            return Err(StateError::WrongState {
                operation: "claim",
                required: AuctionState::Resolved,
                actual: self.auction.state(),
            }
            .into());
        }
        Ok(claim::claim(&self.gateway, &self.ctx, recipient).await?)
    }

    /// Number of parties that have not claimed yet. Moves the local view to
    /// `Claimed` once that reaches zero.
    pub async fn refresh_claims(&mut self) -> Result<u64, CoordinatorError> {
        let values = self.gateway.call(StateField::ClaimsOutstanding).await?;
        let outstanding = decode_u64(StateField::ClaimsOutstanding, &values)?;
        if outstanding == 0 && self.auction.state() == AuctionState::Resolved {
            self.auction.transition(AuctionState::Claimed)?;
            info!(auction = %self.auction.id, "all entitlements claimed");
        }
        Ok(outstanding)
    }

    async fn request(&self, operation: Operation) -> Result<Vec<AuctionEvent>, CoordinatorError> {
        let request = ConfidentialRequest::public(operation);
        let name = request.operation.name();
        let receipt = with_retry(&self.ctx.retry, name, |budget| {
            self.gateway.send(&request, budget)
        })
        .await?;
        info!(
            auction = %self.auction.id,
            operation = name,
            tx_hash = %receipt.tx_hash,
            resource_used = receipt.resource_used,
            "confidential request executed"
        );
        Ok(decode_events(&receipt.logs)?)
    }
}
