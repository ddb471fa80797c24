use std::sync::Arc;

use alloy::primitives::Address;

use super::mock_executor::{MockConfidentialExecutor, MockGateway};
use super::mock_settlement::MockSettlementChain;
use crate::domain::resolution::TiePolicy;
use crate::resolver::Resolver;
use crate::retry::RetryPolicy;
use crate::scheduler::{AuctionDirectory, ScheduleError};

/// Resolves every auction hosted by one [`MockConfidentialExecutor`] as a
/// fixed resolver identity, reading balances from the shared mock ledger.
pub struct MockAuctionDirectory {
    executor: Arc<MockConfidentialExecutor>,
    settlement: Arc<MockSettlementChain>,
    identity: Address,
    retry: RetryPolicy,
    tie_policy: TiePolicy,
    register_rounds: u32,
}

impl MockAuctionDirectory {
    pub fn new(
        executor: Arc<MockConfidentialExecutor>,
        settlement: MockSettlementChain,
        identity: Address,
        retry: RetryPolicy,
        tie_policy: TiePolicy,
    ) -> Self {
        Self {
            executor,
            settlement: Arc::new(settlement),
            identity,
            retry,
            tie_policy,
            register_rounds: 3,
        }
    }

    pub fn with_register_rounds(mut self, rounds: u32) -> Self {
        self.register_rounds = rounds;
        self
    }
}

impl AuctionDirectory for MockAuctionDirectory {
    type Gateway = MockGateway;
    type Settlement = MockSettlementChain;

    fn resolver_for(
        &self,
        auction: Address,
    ) -> Result<Resolver<MockGateway, MockSettlementChain>, ScheduleError> {
        Ok(Resolver::new(
            self.executor.connect(auction, self.identity),
            self.settlement.clone(),
            self.retry.clone(),
            self.tie_policy,
        )
        .with_register_rounds(self.register_rounds))
    }

    fn now(&self) -> u64 {
        self.settlement.now()
    }
}
