use alloy::primitives::{Address, U256};
use serde::{Deserialize, Serialize};

/// Lifecycle of one auction instance. `Setup` is initial, `Claimed` terminal.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum AuctionState {
    Setup,
    Open,
    Closed,
    Resolved,
    Claimed,
}

impl AuctionState {
    pub fn next(self) -> Option<Self> {
        match self {
            AuctionState::Setup => Some(AuctionState::Open),
            AuctionState::Open => Some(AuctionState::Closed),
            AuctionState::Closed => Some(AuctionState::Resolved),
            AuctionState::Resolved => Some(AuctionState::Claimed),
            AuctionState::Claimed => None,
        }
    }

    pub fn can_transition_to(self, to: Self) -> bool {
        self.next() == Some(to)
    }

    /// Decode the `uint8` phase reported by the confidential program.
    pub fn from_phase(phase: u8) -> Option<Self> {
        match phase {
            0 => Some(AuctionState::Setup),
            1 => Some(AuctionState::Open),
            2 => Some(AuctionState::Closed),
            3 => Some(AuctionState::Resolved),
            4 => Some(AuctionState::Claimed),
            _ => None,
        }
    }

    pub fn as_phase(self) -> u8 {
        self as u8
    }
}

impl std::fmt::Display for AuctionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AuctionState::Setup => "setup",
            AuctionState::Open => "open",
            AuctionState::Closed => "closed",
            AuctionState::Resolved => "resolved",
            AuctionState::Claimed => "claimed",
        };
        f.write_str(s)
    }
}

/// The auctioned asset: an ERC-721 token on the settlement chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NftRef {
    pub contract: Address,
    pub token_id: U256,
}

impl std::fmt::Display for NftRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.contract, self.token_id)
    }
}

/// Parameters fixed when the auction instance is deployed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuctionParams {
    /// Unix timestamp after which deposits no longer count
    pub end_time: u64,
    /// Advisory lower bound, enforced by the program
    pub minimal_bid: U256,
    pub nft: NftRef,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WinnerRecord {
    pub identity: Address,
    pub deposit_address: Address,
    pub winning_bid: U256,
}

/// Auctioneer-side view of one auction instance.
#[derive(Debug, Clone)]
pub struct Auction {
    pub id: Address,
    pub auctioneer: Address,
    pub params: AuctionParams,
    state: AuctionState,
    holding_address: Option<Address>,
    final_block: Option<u64>,
    winner: Option<WinnerRecord>,
}

impl Auction {
    pub fn new(id: Address, auctioneer: Address, params: AuctionParams) -> Self {
        Self {
            id,
            auctioneer,
            params,
            state: AuctionState::Setup,
            holding_address: None,
            final_block: None,
            winner: None,
        }
    }

    pub fn state(&self) -> AuctionState {
        self.state
    }

    pub fn holding_address(&self) -> Option<Address> {
        self.holding_address
    }

    pub fn final_block(&self) -> Option<u64> {
        self.final_block
    }

    /// `None` before resolution and when nobody bid.
    pub fn winner(&self) -> Option<&WinnerRecord> {
        self.winner.as_ref()
    }

    /// Fail unless the auction is currently in `required`.
    pub fn require(&self, operation: &'static str, required: AuctionState) -> Result<(), StateError> {
        if self.state != required {
            return Err(StateError::WrongState {
                operation,
                required,
                actual: self.state,
            });
        }
        Ok(())
    }

    /// Move exactly one step along the lifecycle.
    pub fn transition(&mut self, to: AuctionState) -> Result<(), StateError> {
        if !self.state.can_transition_to(to) {
            return Err(StateError::IllegalTransition {
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }

    /// Catch up with a state observed elsewhere. Never moves backwards.
    pub fn advance_to(&mut self, observed: AuctionState) -> Result<(), StateError> {
        if observed < self.state {
            return Err(StateError::IllegalTransition {
                from: self.state,
                to: observed,
            });
        }
        self.state = observed;
        Ok(())
    }

    pub fn record_holding_address(&mut self, holding: Address) -> Result<(), StateError> {
        match self.holding_address {
            Some(existing) if existing != holding => Err(StateError::HoldingAddressChanged {
                existing,
                reported: holding,
            }),
            _ => {
                self.holding_address = Some(holding);
                Ok(())
            }
        }
    }

    /// Record the settlement block used for every balance read. Set once;
    /// re-reporting the same height is accepted.
    pub fn fix_final_block(&mut self, block: u64) -> Result<(), StateError> {
        match self.final_block {
            Some(fixed) if fixed != block => Err(StateError::FinalBlockAlreadyFixed {
                fixed,
                attempted: block,
            }),
            _ => {
                self.final_block = Some(block);
                Ok(())
            }
        }
    }

    /// Record the registered outcome. A zero identity means no bids.
    pub fn record_winner(&mut self, winner: WinnerRecord) -> Result<(), StateError> {
        if self.final_block.is_none() {
            return Err(StateError::FinalBlockNotFixed);
        }
        self.winner = (winner.identity != Address::ZERO).then_some(winner);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    #[error("illegal transition {from} -> {to}")]
    IllegalTransition { from: AuctionState, to: AuctionState },

    #[error("{operation} requires state {required}, auction is {actual}")]
    WrongState {
        operation: &'static str,
        required: AuctionState,
        actual: AuctionState,
    },

    #[error("auction has not been set up")]
    NotSetUp,

    #[error("holding address changed from {existing} to {reported}")]
    HoldingAddressChanged { existing: Address, reported: Address },

    #[error("final block already fixed at {fixed}, refusing {attempted}")]
    FinalBlockAlreadyFixed { fixed: u64, attempted: u64 },

    #[error("final block not fixed")]
    FinalBlockNotFixed,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auction() -> Auction {
        Auction::new(
            Address::repeat_byte(0xAA),
            Address::repeat_byte(0x01),
            AuctionParams {
                end_time: 1_000,
                minimal_bid: U256::from(1),
                nft: NftRef {
                    contract: Address::repeat_byte(0x0F),
                    token_id: U256::from(7),
                },
            },
        )
    }

    #[test]
    fn test_lifecycle_steps_forward_only() {
        let mut a = auction();
        assert_eq!(a.state(), AuctionState::Setup);
        for to in [
            AuctionState::Open,
            AuctionState::Closed,
            AuctionState::Resolved,
            AuctionState::Claimed,
        ] {
            a.transition(to).unwrap();
        }
        assert!(a.transition(AuctionState::Setup).is_err());
        assert_eq!(AuctionState::Claimed.next(), None);
    }

    #[test]
    fn test_cannot_skip_states() {
        let mut a = auction();
        assert_eq!(
            a.transition(AuctionState::Closed),
            Err(StateError::IllegalTransition {
                from: AuctionState::Setup,
                to: AuctionState::Closed
            })
        );
    }

    #[test]
    fn test_advance_to_is_monotonic() {
        let mut a = auction();
        a.advance_to(AuctionState::Resolved).unwrap();
        a.advance_to(AuctionState::Resolved).unwrap();
        assert!(a.advance_to(AuctionState::Open).is_err());
    }

    #[test]
    fn test_final_block_fixed_once() {
        let mut a = auction();
        a.fix_final_block(42).unwrap();
        a.fix_final_block(42).unwrap();
        assert_eq!(
            a.fix_final_block(43),
            Err(StateError::FinalBlockAlreadyFixed {
                fixed: 42,
                attempted: 43
            })
        );
        assert_eq!(a.final_block(), Some(42));
    }

    #[test]
    fn test_winner_needs_final_block() {
        let mut a = auction();
        let winner = WinnerRecord {
            identity: Address::repeat_byte(2),
            deposit_address: Address::repeat_byte(3),
            winning_bid: U256::from(10),
        };
        assert_eq!(a.record_winner(winner), Err(StateError::FinalBlockNotFixed));

        a.fix_final_block(5).unwrap();
        a.record_winner(winner).unwrap();
        assert_eq!(a.winner(), Some(&winner));
    }

    #[test]
    fn test_zero_winner_means_no_bids() {
        let mut a = auction();
        a.fix_final_block(5).unwrap();
        a.record_winner(WinnerRecord {
            identity: Address::ZERO,
            deposit_address: Address::ZERO,
            winning_bid: U256::ZERO,
        })
        .unwrap();
        assert!(a.winner().is_none());
    }

    #[test]
    fn test_phase_codes_roundtrip() {
        for phase in 0u8..5 {
            assert_eq!(AuctionState::from_phase(phase).unwrap().as_phase(), phase);
        }
        assert_eq!(AuctionState::from_phase(5), None);
    }
}
