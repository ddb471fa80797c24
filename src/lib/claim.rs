//! Idempotent claim protocol shared by winner, losers and auctioneer.
//!
//! A claim releases an entitlement that resolution already fixed. The
//! executor answers with pre-signed settlement transfers (refund, payout)
//! and/or custody releases, which the claimant relays. Because the boundary
//! systems may have completed a transfer whose confirmation was lost, any
//! failure to claim or relay is logged and treated as already satisfied.
//! Only a receipt that contradicts the protocol is an error.

use alloy::primitives::{Address, B256};
use tracing::{info, warn};

use crate::context::SettlementContext;
use crate::domain::auction::NftRef;
use crate::ports::custody::{CustodyError, CustodyPort};
use crate::ports::events::{decode_events, AuctionEvent, ProtocolViolation};
use crate::ports::gateway::{ConfidentialGateway, ConfidentialRequest, Operation};
use crate::ports::settlement::SettlementChain;
use crate::ports::InclusionReceipt;
use crate::retry::with_retry;
use crate::submit::relay_raw_and_await;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// The executor released entitlements and they were relayed.
    Settled {
        claim_tx: B256,
        transfers: Vec<InclusionReceipt>,
        custody_moves: Vec<NftRef>,
        /// Relays that failed and were downgraded to warnings
        relay_failures: usize,
    },
    /// The claim was refused or could not be sent; treated as done.
    AlreadySatisfied { reason: String },
}

impl ClaimOutcome {
    pub fn is_settled(&self) -> bool {
        matches!(self, ClaimOutcome::Settled { .. })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ClaimError {
    #[error(transparent)]
    Protocol(#[from] ProtocolViolation),
}

/// Claim the gateway identity's entitlement, paying out to `recipient`.
pub async fn claim<G, S, K>(
    gateway: &G,
    ctx: &SettlementContext<S, K>,
    recipient: Address,
) -> Result<ClaimOutcome, ClaimError>
where
    G: ConfidentialGateway,
    S: SettlementChain,
    K: CustodyPort,
{
    let request = ConfidentialRequest::public(Operation::Claim { recipient });
    let operation = request.operation.name();

    let receipt = match with_retry(&ctx.retry, operation, |budget| gateway.send(&request, budget)).await {
        Ok(receipt) => receipt,
        Err(e) => {
            warn!(
                auction = %gateway.auction(),
                claimant = %gateway.identity(),
                error = %e,
                "claim failed, continuing as already satisfied"
            );
            return Ok(ClaimOutcome::AlreadySatisfied {
                reason: e.to_string(),
            });
        }
    };

    let events = decode_events(&receipt.logs)?;
    let mut transfers = Vec::new();
    let mut custody_moves = Vec::new();
    let mut relay_failures = 0;

    for event in &events {
        match event {
            AuctionEvent::EncodedTransfer(transfer) => {
                match relay_raw_and_await(&*ctx.settlement, &transfer.signedTx, &ctx.submission.poll)
                    .await
                {
                    Ok(included) => transfers.push(included),
                    Err(e) => {
                        warn!(claimant = %gateway.identity(), error = %e, "relaying claim transfer failed");
                        relay_failures += 1;
                    }
                }
            }
            AuctionEvent::CustodyReleased(release) => {
                let nft = NftRef {
                    contract: release.nftContract,
                    token_id: release.tokenId,
                };
                match move_custody(&*ctx.custody, &nft, release.from, release.to).await {
                    Ok(()) => custody_moves.push(nft),
                    Err(e) => {
                        warn!(claimant = %gateway.identity(), %nft, error = %e, "custody release failed");
                        relay_failures += 1;
                    }
                }
            }
            _ => {}
        }
    }

    info!(
        auction = %gateway.auction(),
        claimant = %gateway.identity(),
        %recipient,
        transfers = transfers.len(),
        custody_moves = custody_moves.len(),
        relay_failures,
        "claim settled"
    );
    Ok(ClaimOutcome::Settled {
        claim_tx: receipt.tx_hash,
        transfers,
        custody_moves,
        relay_failures,
    })
}

/// Transfer custody, accepting an asset that already sits with `to`.
async fn move_custody<K: CustodyPort>(
    custody: &K,
    nft: &NftRef,
    from: Address,
    to: Address,
) -> Result<(), CustodyError> {
    match custody.transfer_custody(nft, from, to).await {
        Ok(()) => Ok(()),
        Err(e) => match custody.owner_of(nft).await {
            Ok(owner) if owner == to => Ok(()),
            _ => Err(e),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::mock_custody::MockCustody;
    use alloy::primitives::U256;

    #[tokio::test]
    async fn test_move_custody_is_idempotent() {
        let custody = MockCustody::new();
        let nft = NftRef {
            contract: Address::repeat_byte(0x0F),
            token_id: U256::from(3),
        };
        let holding = Address::repeat_byte(1);
        let winner = Address::repeat_byte(2);
        custody.mint(nft, holding).await;

        move_custody(&custody, &nft, holding, winner).await.unwrap();
        move_custody(&custody, &nft, holding, winner).await.unwrap();
        assert_eq!(custody.owner_of(&nft).await.unwrap(), winner);
    }

    #[tokio::test]
    async fn test_move_custody_from_wrong_owner_fails() {
        let custody = MockCustody::new();
        let nft = NftRef {
            contract: Address::repeat_byte(0x0F),
            token_id: U256::from(3),
        };
        custody.mint(nft, Address::repeat_byte(9)).await;
        let err = move_custody(&custody, &nft, Address::repeat_byte(1), Address::repeat_byte(2))
            .await
            .unwrap_err();
        assert!(matches!(err, CustodyError::NotOwner { .. }));
    }
}
