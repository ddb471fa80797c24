//! Sealed-bid auction demo
//!
//! Runs the whole settlement protocol in-process against the mock executor,
//! mock settlement ledger and mock custody: set-up and escrow, bidding,
//! close, resolution through the HTTP scheduling service, claims.
//!
//! Run with: `cargo run --bin demo -- --bidders 3`

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, U256};
use clap::Parser;
use rand::Rng;
use tracing_subscriber::EnvFilter;

use sealed_auction::adapters::mock_custody::MockCustody;
use sealed_auction::adapters::mock_directory::MockAuctionDirectory;
use sealed_auction::adapters::mock_executor::MockConfidentialExecutor;
use sealed_auction::adapters::mock_settlement::MockSettlementChain;
use sealed_auction::bidder::BidderClient;
use sealed_auction::claim::{self, ClaimOutcome};
use sealed_auction::config::AuctionConfig;
use sealed_auction::context::SettlementContext;
use sealed_auction::coordinator::AuctionCoordinator;
use sealed_auction::domain::auction::{AuctionParams, NftRef};
use sealed_auction::domain::bidder::DepositAmount;
use sealed_auction::ports::custody::CustodyPort;
use sealed_auction::ports::settlement::SettlementChain;
use sealed_auction::scheduler::{AuctionStatus, ResolverScheduler, SchedulePolicy};
use sealed_auction::server::{self, routes::RegisterAuction};

const DEMO_CONFIG: &str = r#"
[settlement]
rpc_url = "http://localhost:8555"
chain_id = 1337

[retry]
max_attempts = 3
budget_seed = 60000
budget_growth = 2
delay = "0s"

[submission]
poll_initial = "10ms"
poll_max = "100ms"
max_wait = "5s"

[auction]
duration = "10s"
minimal_bid = 4000000000000000

[resolver]
listen = "127.0.0.1:0"
grace = "0s"
rerun_delay = "200ms"
max_runs = 3
"#;

const BASE_BID: u64 = 4_000_000_000_000_000;
const ONE_ETHER: u64 = 1_000_000_000_000_000_000;

#[derive(Parser)]
#[command(about = "Run a sealed-bid auction end to end against in-process mocks")]
struct Args {
    /// Number of bidders
    #[arg(long, default_value_t = 2, value_parser = clap::value_parser!(u8).range(0..=16))]
    bidders: u8,

    /// TOML config; the built-in demo config is used when absent
    #[arg(long)]
    config: Option<PathBuf>,
}

fn short(address: Address) -> String {
    format!("0x{}..", &hex::encode(address.as_slice())[..8])
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => AuctionConfig::load(path)?,
        None => DEMO_CONFIG.parse::<AuctionConfig>()?,
    };

    println!("=== Sealed-Bid Auction over a Confidential Executor ===\n");

    // ── Environment ──
    let chain = MockSettlementChain::new();
    let custody = MockCustody::new();
    let executor = Arc::new(MockConfidentialExecutor::new(chain.clone()));

    let auctioneer = Address::repeat_byte(0xA0);
    let auctioneer_account = Address::repeat_byte(0xA1);
    let nft = NftRef {
        contract: config
            .auction
            .nft_contract
            .unwrap_or(Address::repeat_byte(0x0F)),
        token_id: U256::from(config.auction.nft_token_id),
    };
    custody.mint(nft, auctioneer_account).await;

    let params = AuctionParams {
        end_time: chain.now() + config.auction.duration.as_secs(),
        minimal_bid: U256::from(config.auction.minimal_bid),
        nft,
    };
    let auction = executor.deploy_auction(auctioneer, params.clone()).await;
    let ctx = SettlementContext::from_config(
        &config,
        chain.for_account(auctioneer_account),
        custody.clone(),
    );

    // ── Set-up and open ──
    println!("[Setup] auction {} for {nft}", short(auction));
    let mut coordinator =
        AuctionCoordinator::new(executor.connect(auction, auctioneer), ctx.clone(), params);
    let holding = coordinator.set_up().await?;
    println!("  asset escrowed at holding address {}", short(holding));
    coordinator.start().await?;
    println!("  auction open until {}", coordinator.auction().params.end_time);

    // ── Bidding ──
    println!("\n[Bidding] {} bidders", args.bidders);
    let mut bidders = Vec::new();
    for n in 0..args.bidders {
        let identity = Address::repeat_byte(0xB0 + n);
        let account = Address::repeat_byte(0xC0 + n);
        chain.fund(account, U256::from(ONE_ETHER)).await;

        let bidder_ctx = ctx.with_settlement(chain.for_account(account));
        let client = BidderClient::new(executor.connect(auction, identity), &bidder_ctx);
        let address = client.request_bidding_address().await?;
        let amount = U256::from(BASE_BID + rand::thread_rng().gen_range(0..1_000_000_000_000_000u64));
        client
            .place_bid(&address, DepositAmount::Exact(amount))
            .await?;
        println!(
            "  bidder {} deposited {amount} at {}",
            short(identity),
            short(address.deposit_address)
        );
        bidders.push((identity, account, bidder_ctx));
    }

    // ── Close ──
    chain.advance_time(config.auction.duration.as_secs() + 1);
    let final_block = coordinator.end().await?;
    println!("\n[Close] final block fixed at {final_block}");

    // ── Resolution via the scheduling service ──
    let directory = MockAuctionDirectory::new(
        executor.clone(),
        chain.clone(),
        Address::repeat_byte(0xEE),
        config.retry.clone(),
        config.resolver.tie_policy,
    )
    .with_register_rounds(config.resolver.register_rounds);
    let scheduler = Arc::new(ResolverScheduler::new(
        directory,
        SchedulePolicy::from(&config.resolver),
    ));
    let (_server, bound) = server::start_server(scheduler, config.resolver.listen).await?;
    println!("\n[Resolve] scheduling service on {bound}");

    let http = reqwest::Client::new();
    http.post(format!("http://{bound}/register-auction"))
        .json(&RegisterAuction {
            address: auction,
            end_timestamp: coordinator.auction().params.end_time,
        })
        .send()
        .await?
        .error_for_status()?;

    let status = loop {
        let status: AuctionStatus = http
            .get(format!("http://{bound}/status/{auction}"))
            .send()
            .await?
            .json()
            .await?;
        if status.status.is_final() {
            break status;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    };
    println!("  status {:?} after {} run(s)", status.status, status.runs);

    coordinator.sync().await?;
    match coordinator.auction().winner() {
        Some(w) => println!(
            "  winner {} with {} (deposit {})",
            short(w.identity),
            w.winning_bid,
            short(w.deposit_address)
        ),
        None => println!("  no bids"),
    }

    // ── Claims ──
    println!("\n[Claims]");
    for (identity, account, bidder_ctx) in &bidders {
        let outcome = claim::claim(&executor.connect(auction, *identity), bidder_ctx, *account).await?;
        report(*identity, &outcome);
    }
    let outcome = coordinator.claim(auctioneer_account).await?;
    report(auctioneer, &outcome);
    let outstanding = coordinator.refresh_claims().await?;
    println!("  outstanding claims: {outstanding}, auction {}", coordinator.auction().state());

    // ── Final balances ──
    println!("\n[Balances]");
    println!(
        "  auctioneer {}: {}",
        short(auctioneer_account),
        chain.balance(auctioneer_account).await?
    );
    for (identity, account, _) in &bidders {
        println!(
            "  bidder {} account {}: {}",
            short(*identity),
            short(*account),
            chain.balance(*account).await?
        );
    }
    println!("  {nft} owned by {}", short(custody.owner_of(&nft).await?));

    println!("\n=== Demo complete ===");
    Ok(())
}

fn report(identity: Address, outcome: &ClaimOutcome) {
    match outcome {
        ClaimOutcome::Settled {
            transfers,
            custody_moves,
            relay_failures,
            ..
        } => println!(
            "  {} claimed: {} transfer(s), {} custody move(s), {} relay failure(s)",
            short(identity),
            transfers.len(),
            custody_moves.len(),
            relay_failures
        ),
        ClaimOutcome::AlreadySatisfied { reason } => {
            println!("  {} already satisfied: {reason}", short(identity))
        }
    }
}
