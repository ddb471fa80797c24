use alloy::primitives::{Address, U256};
use serde::{Deserialize, Serialize};

/// A bidder de-anonymized by `revealBidders`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RevealedBidder {
    pub identity: Address,
    pub deposit_address: Address,
}

/// A revealed bidder annotated with its balance at the final block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedBid {
    pub bidder: RevealedBidder,
    pub balance: U256,
}

/// How to pick among deposits that share the maximum balance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TiePolicy {
    /// The first maximal deposit in reveal order wins.
    #[default]
    FirstSeen,
    /// The numerically lowest deposit address wins, independent of order.
    LowestDepositAddress,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WinnerDeclaration {
    pub identity: Address,
    pub deposit_address: Address,
    pub winning_bid: U256,
    /// Other bidders holding the same maximum balance
    pub tied_with: Vec<RevealedBidder>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution {
    Winner(WinnerDeclaration),
    /// No revealed deposit holds a positive balance.
    NoBids,
}

impl Resolution {
    pub fn winner(&self) -> Option<&WinnerDeclaration> {
        match self {
            Resolution::Winner(w) => Some(w),
            Resolution::NoBids => None,
        }
    }

    /// `(deposit, amount)` arguments for `registerWinner`.
    pub fn registration(&self) -> (Address, U256) {
        match self {
            Resolution::Winner(w) => (w.deposit_address, w.winning_bid),
            Resolution::NoBids => (Address::ZERO, U256::ZERO),
        }
    }
}

/// Balances of every revealed deposit, all read at one final block.
///
/// Transient: built by one resolution pass and dropped afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionRecord {
    final_block: u64,
    observations: Vec<ObservedBid>,
}

impl ResolutionRecord {
    pub fn new(final_block: u64) -> Self {
        Self {
            final_block,
            observations: Vec::new(),
        }
    }

    pub fn record(&mut self, bidder: RevealedBidder, balance: U256) {
        self.observations.push(ObservedBid { bidder, balance });
    }

    pub fn final_block(&self) -> u64 {
        self.final_block
    }

    pub fn observations(&self) -> &[ObservedBid] {
        &self.observations
    }

    /// Scan observations in reveal order, keeping the strictly greatest
    /// balance. Zero balances never win.
    pub fn declare(&self, policy: TiePolicy) -> Resolution {
        let mut max = U256::ZERO;
        let mut leader: Option<RevealedBidder> = None;
        let mut tied: Vec<RevealedBidder> = Vec::new();

        for obs in &self.observations {
            if obs.balance > max {
                max = obs.balance;
                leader = Some(obs.bidder);
                tied.clear();
            } else if obs.balance == max && !max.is_zero() {
                tied.push(obs.bidder);
            }
        }

        let Some(first) = leader else {
            return Resolution::NoBids;
        };

        let (chosen, tied_with) = match policy {
            TiePolicy::FirstSeen => (first, tied),
            TiePolicy::LowestDepositAddress => {
                let mut all = tied;
                all.push(first);
                all.sort_by_key(|b| b.deposit_address);
                let chosen = all.remove(0);
                (chosen, all)
            }
        };

        Resolution::Winner(WinnerDeclaration {
            identity: chosen.identity,
            deposit_address: chosen.deposit_address,
            winning_bid: max,
            tied_with,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn bidder(n: u8) -> RevealedBidder {
        RevealedBidder {
            identity: Address::repeat_byte(n),
            deposit_address: Address::repeat_byte(0x80 | n),
        }
    }

    fn record(balances: &[(u8, u64)]) -> ResolutionRecord {
        let mut r = ResolutionRecord::new(10);
        for &(n, balance) in balances {
            r.record(bidder(n), U256::from(balance));
        }
        r
    }

    #[test]
    fn test_highest_balance_wins() {
        let resolution = record(&[(1, 4_000), (2, 4_500), (3, 100)]).declare(TiePolicy::FirstSeen);
        let winner = resolution.winner().unwrap();
        assert_eq!(winner.identity, bidder(2).identity);
        assert_eq!(winner.deposit_address, bidder(2).deposit_address);
        assert_eq!(winner.winning_bid, U256::from(4_500));
        assert!(winner.tied_with.is_empty());
    }

    #[test]
    fn test_tie_first_seen_wins_and_is_reported() {
        let resolution = record(&[(1, 500), (2, 500)]).declare(TiePolicy::FirstSeen);
        let winner = resolution.winner().unwrap();
        assert_eq!(winner.identity, bidder(1).identity);
        assert_eq!(winner.tied_with, vec![bidder(2)]);
    }

    #[test]
    fn test_tie_lowest_deposit_is_order_independent() {
        let a = record(&[(2, 500), (1, 500)]).declare(TiePolicy::LowestDepositAddress);
        let b = record(&[(1, 500), (2, 500)]).declare(TiePolicy::LowestDepositAddress);
        assert_eq!(a.winner().unwrap().identity, bidder(1).identity);
        assert_eq!(b.winner().unwrap().identity, bidder(1).identity);
        assert_eq!(a.winner().unwrap().tied_with, vec![bidder(2)]);
    }

    #[test]
    fn test_later_higher_bid_clears_tie() {
        let resolution = record(&[(1, 500), (2, 500), (3, 600)]).declare(TiePolicy::FirstSeen);
        let winner = resolution.winner().unwrap();
        assert_eq!(winner.identity, bidder(3).identity);
        assert!(winner.tied_with.is_empty());
    }

    #[test]
    fn test_no_positive_balance_is_no_bids() {
        assert_eq!(record(&[]).declare(TiePolicy::FirstSeen), Resolution::NoBids);
        assert_eq!(
            record(&[(1, 0), (2, 0)]).declare(TiePolicy::FirstSeen),
            Resolution::NoBids
        );
        assert_eq!(
            Resolution::NoBids.registration(),
            (Address::ZERO, U256::ZERO)
        );
    }

    proptest! {
        #[test]
        fn prop_distinct_balances_resolve_order_independently(
            (first, second) in prop::collection::hash_set(1u64..u64::MAX, 1..8).prop_flat_map(|set| {
                let entries: Vec<(u8, u64)> = set
                    .into_iter()
                    .enumerate()
                    .map(|(i, b)| (i as u8 + 1, b))
                    .collect();
                (Just(entries.clone()).prop_shuffle(), Just(entries).prop_shuffle())
            })
        ) {
            let a = record(&first).declare(TiePolicy::FirstSeen);
            let b = record(&second).declare(TiePolicy::FirstSeen);
            prop_assert_eq!(a, b);
        }

        #[test]
        fn prop_strict_maximum_always_wins(
            others in prop::collection::vec(0u64..1_000_000, 0..8),
            lead in 1u64..1_000,
            position in any::<prop::sample::Index>(),
        ) {
            let top = others.iter().copied().max().unwrap_or(0) + lead;
            let mut entries: Vec<(u8, u64)> = others.iter().enumerate().map(|(i, b)| (i as u8 + 1, *b)).collect();
            let at = position.index(entries.len() + 1);
            entries.insert(at, (0x7F, top));

            let resolution = record(&entries).declare(TiePolicy::FirstSeen);
            let winner = resolution.winner().unwrap();
            prop_assert_eq!(winner.identity, bidder(0x7F).identity);
            prop_assert_eq!(winner.winning_bid, U256::from(top));
        }
    }
}
