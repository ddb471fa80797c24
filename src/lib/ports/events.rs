//! Events emitted by the confidential auction program.
//!
//! Receipts are decoded once into the closed [`AuctionEvent`] set and then
//! pattern-matched by the protocol drivers.

use alloy::primitives::{Address, Log, U256};
use alloy::sol;
use alloy::sol_types::SolEvent;

sol! {
    #[sol(all_derives)]
    interface ISealedAuction {
        event AuctionSetUp(address holdingAddress);

        event AuctionOpened(
            address nftContract,
            uint256 nftTokenId,
            uint256 endTimestamp,
            uint256 minimalBid
        );

        event BiddingAddressIssued(address indexed owner, bytes encryptedAddress);

        event AuctionEnded(uint256 finalBlockNumber);

        event BiddersRevealed(address[] bidders, address[] depositAddresses);

        event WinnerRegistered(address winner, address depositAddress, uint256 amount);

        /// Pre-signed settlement-chain transfer released by a claim.
        event EncodedTransfer(bytes signedTx);

        event CustodyReleased(address nftContract, uint256 tokenId, address from, address to);
    }
}

pub use ISealedAuction::{
    AuctionEnded, AuctionOpened, AuctionSetUp, BiddersRevealed, BiddingAddressIssued,
    CustodyReleased, EncodedTransfer, WinnerRegistered,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuctionEvent {
    SetUp(AuctionSetUp),
    Opened(AuctionOpened),
    AddressIssued(BiddingAddressIssued),
    Ended(AuctionEnded),
    Revealed(BiddersRevealed),
    WinnerRegistered(WinnerRegistered),
    EncodedTransfer(EncodedTransfer),
    CustodyReleased(CustodyReleased),
}

impl AuctionEvent {
    /// Decode a single log. Logs outside the auction ABI yield `Ok(None)`.
    pub fn decode(log: &Log) -> Result<Option<Self>, ProtocolViolation> {
        let Some(&topic) = log.data.topics().first() else {
            return Ok(None);
        };

        let event = if topic == AuctionSetUp::SIGNATURE_HASH {
            AuctionEvent::SetUp(decode_as(log)?)
        } else if topic == AuctionOpened::SIGNATURE_HASH {
            AuctionEvent::Opened(decode_as(log)?)
        } else if topic == BiddingAddressIssued::SIGNATURE_HASH {
            AuctionEvent::AddressIssued(decode_as(log)?)
        } else if topic == AuctionEnded::SIGNATURE_HASH {
            AuctionEvent::Ended(decode_as(log)?)
        } else if topic == BiddersRevealed::SIGNATURE_HASH {
            AuctionEvent::Revealed(decode_as(log)?)
        } else if topic == WinnerRegistered::SIGNATURE_HASH {
            AuctionEvent::WinnerRegistered(decode_as(log)?)
        } else if topic == EncodedTransfer::SIGNATURE_HASH {
            AuctionEvent::EncodedTransfer(decode_as(log)?)
        } else if topic == CustodyReleased::SIGNATURE_HASH {
            AuctionEvent::CustodyReleased(decode_as(log)?)
        } else {
            return Ok(None);
        };
        Ok(Some(event))
    }

    /// Encode as a log emitted by `emitter`.
    pub fn into_log(self, emitter: Address) -> Log {
        let data = match &self {
            AuctionEvent::SetUp(e) => e.encode_log_data(),
            AuctionEvent::Opened(e) => e.encode_log_data(),
            AuctionEvent::AddressIssued(e) => e.encode_log_data(),
            AuctionEvent::Ended(e) => e.encode_log_data(),
            AuctionEvent::Revealed(e) => e.encode_log_data(),
            AuctionEvent::WinnerRegistered(e) => e.encode_log_data(),
            AuctionEvent::EncodedTransfer(e) => e.encode_log_data(),
            AuctionEvent::CustodyReleased(e) => e.encode_log_data(),
        };
        Log {
            address: emitter,
            data,
        }
    }
}

fn decode_as<E: SolEvent>(log: &Log) -> Result<E, ProtocolViolation> {
    E::decode_log_data(&log.data).map_err(|e| ProtocolViolation::Malformed {
        event: E::SIGNATURE,
        reason: e.to_string(),
    })
}

/// Decode every log of a receipt, skipping foreign logs.
pub fn decode_events(logs: &[Log]) -> Result<Vec<AuctionEvent>, ProtocolViolation> {
    let mut events = Vec::with_capacity(logs.len());
    for log in logs {
        if let Some(event) = AuctionEvent::decode(log)? {
            events.push(event);
        }
    }
    Ok(events)
}

/// Extract the one event `pick` selects. Zero or several matches mean the
/// program and the coordinator disagree about the protocol.
pub fn expect_single<T>(
    events: &[AuctionEvent],
    operation: &'static str,
    expected: &'static str,
    pick: impl Fn(&AuctionEvent) -> Option<T>,
) -> Result<T, ProtocolViolation> {
    let mut found = events.iter().filter_map(pick);
    let first = found
        .next()
        .ok_or(ProtocolViolation::MissingEvent { operation, expected })?;
    if found.next().is_some() {
        return Err(ProtocolViolation::DuplicateEvent { operation, expected });
    }
    Ok(first)
}

/// The coordinator and the confidential program are out of sync.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProtocolViolation {
    #[error("{operation} receipt carries no {expected} event")]
    MissingEvent {
        operation: &'static str,
        expected: &'static str,
    },

    #[error("{operation} receipt carries more than one {expected} event")]
    DuplicateEvent {
        operation: &'static str,
        expected: &'static str,
    },

    #[error("malformed {event} log: {reason}")]
    Malformed { event: &'static str, reason: String },

    #[error("address issued to {actual}, expected {expected}")]
    UnexpectedOwner { expected: Address, actual: Address },

    #[error("reveal lists {bidders} bidders but {deposits} deposit addresses")]
    RevealMismatch { bidders: usize, deposits: usize },

    #[error("registered winner {actual_deposit} with {actual_amount}, expected {expected_deposit} with {expected_amount}")]
    WinnerMismatch {
        expected_deposit: Address,
        expected_amount: U256,
        actual_deposit: Address,
        actual_amount: U256,
    },

    #[error("refuted with deposit {requested}, but {registered} was registered")]
    RefuteMismatch { requested: Address, registered: Address },

    #[error("unexpected value for {field}: {reason}")]
    UnexpectedState { field: &'static str, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{Bytes, LogData, B256};

    const AUCTION: Address = Address::repeat_byte(0xAA);

    #[test]
    fn test_decode_roundtrips_known_events() {
        let issued = AuctionEvent::AddressIssued(BiddingAddressIssued {
            owner: Address::repeat_byte(1),
            encryptedAddress: Bytes::from(vec![9u8; 48]),
        });
        let ended = AuctionEvent::Ended(AuctionEnded {
            finalBlockNumber: U256::from(17),
        });
        let logs = vec![issued.clone().into_log(AUCTION), ended.clone().into_log(AUCTION)];

        let decoded = decode_events(&logs).unwrap();
        assert_eq!(decoded, vec![issued, ended]);
    }

    #[test]
    fn test_foreign_logs_are_skipped() {
        let foreign = Log {
            address: AUCTION,
            data: LogData::new_unchecked(vec![B256::repeat_byte(0x42)], Bytes::new()),
        };
        let anonymous = Log {
            address: AUCTION,
            data: LogData::new_unchecked(vec![], Bytes::new()),
        };
        assert!(decode_events(&[foreign, anonymous]).unwrap().is_empty());
    }

    #[test]
    fn test_truncated_log_is_malformed() {
        let mut log = AuctionEvent::Ended(AuctionEnded {
            finalBlockNumber: U256::from(3),
        })
        .into_log(AUCTION);
        log.data = LogData::new_unchecked(log.data.topics().to_vec(), Bytes::from(vec![0u8; 4]));

        let err = decode_events(&[log]).unwrap_err();
        assert!(matches!(err, ProtocolViolation::Malformed { .. }));
    }

    #[test]
    fn test_expect_single() {
        let ended = |n: u64| {
            AuctionEvent::Ended(AuctionEnded {
                finalBlockNumber: U256::from(n),
            })
        };
        let pick = |e: &AuctionEvent| match e {
            AuctionEvent::Ended(ev) => Some(ev.finalBlockNumber),
            _ => None,
        };

        let one = vec![ended(5)];
        assert_eq!(
            expect_single(&one, "endAuction", "AuctionEnded", pick).unwrap(),
            U256::from(5)
        );

        let none: Vec<AuctionEvent> = vec![];
        assert!(matches!(
            expect_single(&none, "endAuction", "AuctionEnded", pick),
            Err(ProtocolViolation::MissingEvent { .. })
        ));

        let two = vec![ended(5), ended(6)];
        assert!(matches!(
            expect_single(&two, "endAuction", "AuctionEnded", pick),
            Err(ProtocolViolation::DuplicateEvent { .. })
        ));
    }
}
