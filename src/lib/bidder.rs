//! Bidder side of the protocol: obtain a private deposit address, then bid by
//! transferring value to it on the settlement chain.

use std::sync::Arc;

use alloy::primitives::Address;
use tracing::info;

use crate::context::SettlementContext;
use crate::crypto::envelope::{self, IntegrityError};
use crate::domain::bidder::{BiddingAddress, DepositAmount, EphemeralKey};
use crate::ports::events::{decode_events, expect_single, AuctionEvent, ProtocolViolation};
use crate::ports::gateway::{ConfidentialGateway, ConfidentialRequest, Operation};
use crate::ports::settlement::{SettlementChain, SettlementError};
use crate::ports::InclusionReceipt;
use crate::retry::{with_retry, RetryError, RetryPolicy};
use crate::submit::{submit_and_await_inclusion, SubmissionPolicy};

#[derive(Debug, thiserror::Error)]
pub enum BiddingError {
    #[error("bidding address failed authentication: {0}")]
    Integrity(#[from] IntegrityError),

    #[error("decrypted bidding address has {0} bytes, expected 20")]
    MalformedAddress(usize),

    #[error(transparent)]
    Retry(#[from] RetryError),

    #[error(transparent)]
    Protocol(#[from] ProtocolViolation),

    #[error("settlement error: {0}")]
    Settlement(#[from] SettlementError),
}

pub struct BidderClient<G, S> {
    gateway: G,
    settlement: Arc<S>,
    retry: RetryPolicy,
    submission: SubmissionPolicy,
}

impl<G: ConfidentialGateway, S: SettlementChain> BidderClient<G, S> {
    pub fn new<K>(gateway: G, ctx: &SettlementContext<S, K>) -> Self {
        Self {
            gateway,
            settlement: ctx.settlement.clone(),
            retry: ctx.retry.clone(),
            submission: ctx.submission.clone(),
        }
    }

    pub fn identity(&self) -> Address {
        self.gateway.identity()
    }

    /// Settlement account the bid is paid from.
    pub fn settlement_account(&self) -> Address {
        self.settlement.account()
    }

    /// Ask the executor for a deposit address, encrypted to a fresh one-time key.
    ///
    /// Fails with `Integrity` when the envelope does not authenticate under
    /// that key; the address is then untrustworthy and nothing is returned.
    pub async fn request_bidding_address(&self) -> Result<BiddingAddress, BiddingError> {
        let key = EphemeralKey::generate(&mut rand::rngs::OsRng);
        let request = ConfidentialRequest::with_payload(Operation::GetBiddingAddress, key.to_payload());
        let operation = request.operation.name();

        let receipt = with_retry(&self.retry, operation, |budget| {
            self.gateway.send(&request, budget)
        })
        .await?;

        let events = decode_events(&receipt.logs)?;
        let issued = expect_single(&events, operation, "BiddingAddressIssued", |e| match e {
            AuctionEvent::AddressIssued(ev) => Some(ev.clone()),
            _ => None,
        })?;

        let identity = self.gateway.identity();
        if issued.owner != identity {
            return Err(ProtocolViolation::UnexpectedOwner {
                expected: identity,
                actual: issued.owner,
            }
            .into());
        }

        let plaintext = envelope::open(&key, &issued.encryptedAddress)?;
        let deposit_address = <[u8; 20]>::try_from(plaintext.as_slice())
            .map(Address::from)
            .map_err(|_| BiddingError::MalformedAddress(plaintext.len()))?;

        info!(
            auction = %self.gateway.auction(),
            bidder = %identity,
            "bidding address issued"
        );
        Ok(BiddingAddress {
            owner: identity,
            deposit_address,
            encrypted_deposit_address: issued.encryptedAddress,
        })
    }

    /// Deposit the bid at a previously issued address and wait for inclusion.
    pub async fn place_bid(
        &self,
        address: &BiddingAddress,
        amount: DepositAmount,
    ) -> Result<InclusionReceipt, BiddingError> {
        let receipt = submit_and_await_inclusion(
            &*self.settlement,
            &self.submission,
            address.deposit_address,
            amount,
        )
        .await?;
        info!(
            auction = %self.gateway.auction(),
            bidder = %self.gateway.identity(),
            block = receipt.block_number,
            "bid deposited"
        );
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::mock_custody::MockCustody;
    use crate::adapters::mock_executor::{InjectedFault, MockConfidentialExecutor, MockGateway};
    use crate::adapters::mock_settlement::MockSettlementChain;
    use crate::domain::auction::{AuctionParams, NftRef};
    use crate::ports::gateway::GatewayError;
    use crate::ports::GasBudget;
    use alloy::primitives::U256;

    const AUCTIONEER: Address = Address::repeat_byte(0xA0);
    const BIDDER: Address = Address::repeat_byte(0xB1);
    const BIDDER_ACCOUNT: Address = Address::repeat_byte(0xC1);

    struct Fixture {
        chain: MockSettlementChain,
        executor: Arc<MockConfidentialExecutor>,
        client: BidderClient<MockGateway, MockSettlementChain>,
    }

    async fn fixture() -> Fixture {
        let chain = MockSettlementChain::new();
        let executor = Arc::new(MockConfidentialExecutor::new(chain.clone()));
        let auction = executor
            .deploy_auction(
                AUCTIONEER,
                AuctionParams {
                    end_time: chain.now() + 60,
                    minimal_bid: U256::from(1),
                    nft: NftRef {
                        contract: Address::repeat_byte(0x0F),
                        token_id: U256::from(1),
                    },
                },
            )
            .await;
        let auctioneer = executor.connect(auction, AUCTIONEER);
        for op in [Operation::SetUpAuction, Operation::StartAuction] {
            auctioneer
                .send(&ConfidentialRequest::public(op), GasBudget(1_000_000))
                .await
                .unwrap();
        }

        let ctx = SettlementContext::new(chain.for_account(BIDDER_ACCOUNT), MockCustody::new(), 1)
            .with_retry(RetryPolicy::immediate(2, 100_000, 2));
        let client = BidderClient::new(executor.connect(auction, BIDDER), &ctx);
        Fixture {
            chain,
            executor,
            client,
        }
    }

    #[tokio::test]
    async fn test_request_and_bid() {
        let f = fixture().await;
        f.chain.fund(BIDDER_ACCOUNT, U256::from(10u64.pow(18))).await;

        let address = f.client.request_bidding_address().await.unwrap();
        assert_eq!(address.owner, BIDDER);
        assert_ne!(address.deposit_address, Address::ZERO);

        let amount = U256::from(4_000_000_000_000_000u64);
        f.client
            .place_bid(&address, DepositAmount::Exact(amount))
            .await
            .unwrap();
        assert_eq!(f.chain.balance(address.deposit_address).await.unwrap(), amount);
    }

    #[tokio::test]
    async fn test_repeat_request_returns_same_deposit_under_new_ciphertext() {
        let f = fixture().await;
        let first = f.client.request_bidding_address().await.unwrap();
        let second = f.client.request_bidding_address().await.unwrap();
        assert_eq!(first.deposit_address, second.deposit_address);
        assert_ne!(first.encrypted_deposit_address, second.encrypted_deposit_address);
    }

    #[tokio::test]
    async fn test_corrupted_ciphertext_is_integrity_error() {
        let f = fixture().await;
        f.executor
            .inject("getBiddingAddress", InjectedFault::CorruptCiphertext)
            .await;
        let err = f.client.request_bidding_address().await.unwrap_err();
        assert!(matches!(err, BiddingError::Integrity(IntegrityError::Authentication)));
    }

    #[tokio::test]
    async fn test_wrong_key_is_integrity_error() {
        let f = fixture().await;
        f.executor
            .inject("getBiddingAddress", InjectedFault::WrongKey)
            .await;
        let err = f.client.request_bidding_address().await.unwrap_err();
        assert!(matches!(err, BiddingError::Integrity(_)));
    }

    #[tokio::test]
    async fn test_transport_failure_is_retried() {
        let f = fixture().await;
        f.executor
            .inject("getBiddingAddress", InjectedFault::Transport)
            .await;
        assert!(f.client.request_bidding_address().await.is_ok());
    }

    #[tokio::test]
    async fn test_request_after_end_is_rejected() {
        let f = fixture().await;
        f.chain.advance_time(61);
        let err = f.client.request_bidding_address().await.unwrap_err();
        assert!(matches!(
            err,
            BiddingError::Retry(RetryError::Rejected {
                source: GatewayError::Rejected { .. },
                ..
            })
        ));
    }
}
