//! Resolver: reveal the bidders, scan deposit balances at the final block and
//! register the winner with the confidential program.

use std::sync::Arc;

use alloy::primitives::{Address, U256};
use serde::Serialize;
use tracing::{info, warn};

use crate::domain::resolution::{Resolution, ResolutionRecord, RevealedBidder, TiePolicy};
use crate::ports::events::{decode_events, expect_single, AuctionEvent, ProtocolViolation};
use crate::ports::gateway::{
    decode_u64, ConfidentialGateway, ConfidentialRequest, GatewayError, Operation, StateField,
};
use crate::ports::settlement::{SettlementChain, SettlementError};
use crate::retry::{with_retry, RetryError, RetryPolicy};

#[derive(Debug, thiserror::Error)]
pub enum ResolverError {
    #[error("state query failed: {0}")]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Retry(#[from] RetryError),

    #[error(transparent)]
    Protocol(#[from] ProtocolViolation),

    #[error("balance query failed: {0}")]
    Settlement(#[from] SettlementError),

    #[error("auction {0} has not been closed")]
    NotClosed(Address),

    #[error("winner registration failed after {rounds} rounds: {last}")]
    RegistrationFailed { rounds: u32, last: String },
}

/// Outcome of one successful resolution pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolutionReport {
    pub auction: Address,
    pub final_block: u64,
    pub record: ResolutionRecord,
    pub resolution: Resolution,
}

/// Pick the winner among `revealed`, reading every balance at `final_block`.
///
/// Deposits that arrive after the final block never count.
pub async fn resolve<S: SettlementChain>(
    chain: &S,
    revealed: &[RevealedBidder],
    final_block: u64,
    policy: TiePolicy,
) -> Result<(ResolutionRecord, Resolution), SettlementError> {
    let record = observe(chain, revealed, final_block).await?;
    let resolution = record.declare(policy);
    Ok((record, resolution))
}

async fn observe<S: SettlementChain>(
    chain: &S,
    revealed: &[RevealedBidder],
    final_block: u64,
) -> Result<ResolutionRecord, SettlementError> {
    let mut record = ResolutionRecord::new(final_block);
    for bidder in revealed {
        let balance = chain.balance_at(bidder.deposit_address, final_block).await?;
        record.record(*bidder, balance);
    }
    Ok(record)
}

pub struct Resolver<G, S> {
    gateway: G,
    settlement: Arc<S>,
    retry: RetryPolicy,
    tie_policy: TiePolicy,
    register_rounds: u32,
}

impl<G: ConfidentialGateway, S: SettlementChain> Resolver<G, S> {
    pub fn new(gateway: G, settlement: Arc<S>, retry: RetryPolicy, tie_policy: TiePolicy) -> Self {
        Self {
            gateway,
            settlement,
            retry,
            tie_policy,
            register_rounds: 3,
        }
    }

    pub fn with_register_rounds(mut self, rounds: u32) -> Self {
        self.register_rounds = rounds.max(1);
        self
    }

    pub fn auction(&self) -> Address {
        self.gateway.auction()
    }

    /// End time recorded by the confidential program.
    pub async fn end_time(&self) -> Result<u64, ResolverError> {
        let values = self.gateway.call(StateField::EndTime).await?;
        Ok(decode_u64(StateField::EndTime, &values)?)
    }

    /// Run one full resolution pass.
    ///
    /// A failed reveal aborts the pass. A failed registration is retried
    /// from balances re-read at the same final block, which yields the same
    /// winner unless the settlement chain disagrees with itself.
    pub async fn run(&self) -> Result<ResolutionReport, ResolverError> {
        let auction = self.gateway.auction();
        let values = self.gateway.call(StateField::FinalBlockNumber).await?;
        let final_block = decode_u64(StateField::FinalBlockNumber, &values)?;
        if final_block == 0 {
            return Err(ResolverError::NotClosed(auction));
        }

        let revealed = self.reveal().await?;
        info!(%auction, final_block, bidders = revealed.len(), "bidders revealed");

        let mut last_error = String::new();
        for round in 1..=self.register_rounds {
            let (record, resolution) =
                resolve(&*self.settlement, &revealed, final_block, self.tie_policy).await?;
            if let Some(winner) = resolution.winner() {
                if !winner.tied_with.is_empty() {
                    warn!(
                        %auction,
                        winner = %winner.identity,
                        tied = winner.tied_with.len(),
                        policy = ?self.tie_policy,
                        "tie at the maximum balance"
                    );
                }
            }

            match self.register(&resolution).await {
                Ok(()) => {
                    match resolution.winner() {
                        Some(w) => info!(
                            %auction,
                            winner = %w.identity,
                            winning_bid = %w.winning_bid,
                            "winner registered"
                        ),
                        None => info!(%auction, "no bids, registered empty outcome"),
                    }
                    return Ok(ResolutionReport {
                        auction,
                        final_block,
                        record,
                        resolution,
                    });
                }
                Err(ResolverError::Retry(e @ RetryError::OperationFailed { .. })) => {
                    warn!(%auction, round, error = %e, "winner registration failed");
                    last_error = e.to_string();
                }
                Err(e) => return Err(e),
            }
        }

        Err(ResolverError::RegistrationFailed {
            rounds: self.register_rounds,
            last: last_error,
        })
    }

    /// Replace the registered winner with `deposit` if it held more at the
    /// final block. Returns the new `(winner, amount)`.
    pub async fn refute(&self, deposit: Address) -> Result<(Address, U256), ResolverError> {
        let request = ConfidentialRequest::public(Operation::RefuteWinner { deposit });
        let operation = request.operation.name();
        let receipt = with_retry(&self.retry, operation, |budget| {
            self.gateway.send(&request, budget)
        })
        .await?;
        let events = decode_events(&receipt.logs)?;
        let registered = expect_single(&events, operation, "WinnerRegistered", |e| match e {
            AuctionEvent::WinnerRegistered(ev) => Some(ev.clone()),
            _ => None,
        })?;
        if registered.depositAddress != deposit {
            return Err(ProtocolViolation::RefuteMismatch {
                requested: deposit,
                registered: registered.depositAddress,
            }
            .into());
        }
        info!(
            auction = %self.gateway.auction(),
            winner = %registered.winner,
            amount = %registered.amount,
            "winner refuted"
        );
        Ok((registered.winner, registered.amount))
    }

    async fn reveal(&self) -> Result<Vec<RevealedBidder>, ResolverError> {
        let request = ConfidentialRequest::public(Operation::RevealBidders);
        let operation = request.operation.name();
        let receipt = with_retry(&self.retry, operation, |budget| {
            self.gateway.send(&request, budget)
        })
        .await?;
        let events = decode_events(&receipt.logs)?;
        let revealed = expect_single(&events, operation, "BiddersRevealed", |e| match e {
            AuctionEvent::Revealed(ev) => Some(ev.clone()),
            _ => None,
        })?;
        if revealed.bidders.len() != revealed.depositAddresses.len() {
            return Err(ProtocolViolation::RevealMismatch {
                bidders: revealed.bidders.len(),
                deposits: revealed.depositAddresses.len(),
            }
            .into());
        }
        Ok(revealed
            .bidders
            .into_iter()
            .zip(revealed.depositAddresses)
            .map(|(identity, deposit_address)| RevealedBidder {
                identity,
                deposit_address,
            })
            .collect())
    }

    async fn register(&self, resolution: &Resolution) -> Result<(), ResolverError> {
        let (deposit, amount) = resolution.registration();
        let request = ConfidentialRequest::public(Operation::RegisterWinner { deposit, amount });
        let operation = request.operation.name();
        let receipt = with_retry(&self.retry, operation, |budget| {
            self.gateway.send(&request, budget)
        })
        .await?;
        let events = decode_events(&receipt.logs)?;
        let registered = expect_single(&events, operation, "WinnerRegistered", |e| match e {
            AuctionEvent::WinnerRegistered(ev) => Some(ev.clone()),
            _ => None,
        })?;
        if registered.depositAddress != deposit || registered.amount != amount {
            return Err(ProtocolViolation::WinnerMismatch {
                expected_deposit: deposit,
                expected_amount: amount,
                actual_deposit: registered.depositAddress,
                actual_amount: registered.amount,
            }
            .into());
        }
        Ok(())
    }
}
