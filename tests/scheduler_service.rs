//! HTTP tests for the resolver scheduling service.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, U256};
use reqwest::StatusCode;

use sealed_auction::adapters::mock_directory::MockAuctionDirectory;
use sealed_auction::adapters::mock_executor::MockConfidentialExecutor;
use sealed_auction::adapters::mock_settlement::MockSettlementChain;
use sealed_auction::crypto::envelope;
use sealed_auction::domain::auction::{AuctionParams, NftRef};
use sealed_auction::domain::bidder::EphemeralKey;
use sealed_auction::domain::resolution::TiePolicy;
use sealed_auction::ports::events::{decode_events, AuctionEvent};
use sealed_auction::ports::gateway::{ConfidentialGateway, ConfidentialRequest, Operation};
use sealed_auction::ports::GasBudget;
use sealed_auction::retry::RetryPolicy;
use sealed_auction::scheduler::{AuctionStatus, ResolverScheduler, RunStatus, SchedulePolicy};
use sealed_auction::server::routes::RegisterAuction;
use sealed_auction::server::start_server;

const AUCTIONEER: Address = Address::repeat_byte(0xA0);
const BUDGET: GasBudget = GasBudget(10_000_000);

struct Service {
    chain: MockSettlementChain,
    executor: Arc<MockConfidentialExecutor>,
    base: String,
    http: reqwest::Client,
}

async fn service() -> Service {
    let chain = MockSettlementChain::new();
    let executor = Arc::new(MockConfidentialExecutor::new(chain.clone()));
    let directory = MockAuctionDirectory::new(
        executor.clone(),
        chain.clone(),
        Address::repeat_byte(0xEE),
        RetryPolicy::immediate(2, 1_000_000, 2),
        TiePolicy::FirstSeen,
    );
    let scheduler = Arc::new(ResolverScheduler::new(
        directory,
        SchedulePolicy {
            grace: Duration::ZERO,
            rerun_delay: Duration::from_millis(20),
            max_runs: 2,
        },
    ));
    let (_handle, bound) = start_server(scheduler, SocketAddr::from(([127, 0, 0, 1], 0)))
        .await
        .unwrap();
    Service {
        chain,
        executor,
        base: format!("http://{bound}"),
        http: reqwest::Client::new(),
    }
}

impl Service {
    /// An auction with one deposit of `amount`, already closed.
    async fn closed_auction(&self, amount: u64) -> (Address, u64) {
        let end_time = self.chain.now() + 30;
        let auction = self
            .executor
            .deploy_auction(
                AUCTIONEER,
                AuctionParams {
                    end_time,
                    minimal_bid: U256::from(1),
                    nft: NftRef {
                        contract: Address::repeat_byte(0x0F),
                        token_id: U256::from(1),
                    },
                },
            )
            .await;
        let auctioneer = self.executor.connect(auction, AUCTIONEER);
        for op in [Operation::SetUpAuction, Operation::StartAuction] {
            auctioneer.send(&ConfidentialRequest::public(op), BUDGET).await.unwrap();
        }

        let key = EphemeralKey::generate(&mut rand::thread_rng());
        let receipt = auctioneer
            .as_identity(Address::repeat_byte(0xB1))
            .send(
                &ConfidentialRequest::with_payload(Operation::GetBiddingAddress, key.to_payload()),
                BUDGET,
            )
            .await
            .unwrap();
        let events = decode_events(&receipt.logs).unwrap();
        let Some(AuctionEvent::AddressIssued(issued)) = events.first() else {
            panic!("expected BiddingAddressIssued, got {events:?}");
        };
        let deposit = Address::from_slice(&envelope::open(&key, &issued.encryptedAddress).unwrap());
        self.chain.fund(deposit, U256::from(amount)).await;

        self.chain.advance_time(31);
        auctioneer
            .send(&ConfidentialRequest::public(Operation::EndAuction), BUDGET)
            .await
            .unwrap();
        (auction, end_time)
    }

    async fn register(&self, address: Address, end_timestamp: u64) -> reqwest::Response {
        self.http
            .post(format!("{}/register-auction", self.base))
            .json(&RegisterAuction {
                address,
                end_timestamp,
            })
            .send()
            .await
            .unwrap()
    }

    async fn status(&self, address: &str) -> reqwest::Response {
        self.http
            .get(format!("{}/status/{address}", self.base))
            .send()
            .await
            .unwrap()
    }

    async fn wait_final(&self, auction: Address) -> AuctionStatus {
        for _ in 0..200 {
            let status: AuctionStatus = self.status(&auction.to_string()).await.json().await.unwrap();
            if status.status.is_final() {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("auction {auction} never reached a final status");
    }
}

#[tokio::test]
async fn test_register_then_poll_until_resolved() {
    let svc = service().await;
    let (auction, end_time) = svc.closed_auction(777).await;

    let response = svc.register(auction, end_time).await;
    assert_eq!(response.status(), StatusCode::OK);

    let status = svc.wait_final(auction).await;
    assert_eq!(status.status, RunStatus::Resolved);
    assert_eq!(status.winner, Some(Address::repeat_byte(0xB1)));
    assert_eq!(status.winning_bid, Some(U256::from(777)));
    assert_eq!(status.end_timestamp, end_time);
}

#[tokio::test]
async fn test_duplicate_registration_conflicts() {
    let svc = service().await;
    let auction = Address::repeat_byte(0x42);
    let far = svc.chain.now() + 3_600;
    assert_eq!(svc.register(auction, far).await.status(), StatusCode::OK);

    let response = svc.register(auction, far).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body: serde_json::Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("already scheduled"));

    let status: AuctionStatus = svc.status(&auction.to_string()).await.json().await.unwrap();
    assert_eq!(status.status, RunStatus::Scheduled);
}

#[tokio::test]
async fn test_unknown_and_malformed_status_requests() {
    let svc = service().await;
    let unknown = svc.status(&Address::repeat_byte(0x99).to_string()).await;
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);

    let malformed = svc.status("not-an-address").await;
    assert_eq!(malformed.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unreachable_auction_fails_after_max_runs() {
    let svc = service().await;
    let missing = Address::repeat_byte(0x55);
    svc.register(missing, svc.chain.now()).await;

    let status = svc.wait_final(missing).await;
    assert_eq!(status.status, RunStatus::Failed);
    assert_eq!(status.runs, 2);
    assert!(status.last_error.is_some());
}
