use std::future::Future;

use alloy::dyn_abi::DynSolValue;
use alloy::primitives::{Address, Bytes, U256};

use super::events::ProtocolViolation;
use super::{ConfidentialReceipt, GasBudget};

/// Named state transitions the confidential auction program accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    SetUpAuction,
    StartAuction,
    EndAuction,
    GetBiddingAddress,
    RevealBidders,
    /// Record the deposit with the highest balance at the final block.
    /// A zero deposit address with a zero amount registers "no bids".
    RegisterWinner { deposit: Address, amount: U256 },
    RefuteWinner { deposit: Address },
    /// Release the caller's entitlement to `recipient` on the settlement chain.
    Claim { recipient: Address },
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::SetUpAuction => "setUpAuction",
            Operation::StartAuction => "startAuction",
            Operation::EndAuction => "endAuction",
            Operation::GetBiddingAddress => "getBiddingAddress",
            Operation::RevealBidders => "revealBidders",
            Operation::RegisterWinner { .. } => "registerWinner",
            Operation::RefuteWinner { .. } => "refuteWinner",
            Operation::Claim { .. } => "claim",
        }
    }

    /// Ordered public (non-confidential) arguments.
    pub fn public_args(&self) -> Vec<DynSolValue> {
        match self {
            Operation::RegisterWinner { deposit, amount } => vec![
                DynSolValue::Address(*deposit),
                DynSolValue::Uint(*amount, 256),
            ],
            Operation::RefuteWinner { deposit } => vec![DynSolValue::Address(*deposit)],
            Operation::Claim { recipient } => vec![DynSolValue::Address(*recipient)],
            _ => vec![],
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// An operation plus its opaque confidential payload.
#[derive(Debug, Clone)]
pub struct ConfidentialRequest {
    pub operation: Operation,
    pub confidential_payload: Bytes,
}

impl ConfidentialRequest {
    pub fn public(operation: Operation) -> Self {
        Self {
            operation,
            confidential_payload: Bytes::new(),
        }
    }

    pub fn with_payload(operation: Operation, payload: Bytes) -> Self {
        Self {
            operation,
            confidential_payload: payload,
        }
    }
}

/// Read-only state fields exposed by the confidential auction program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateField {
    /// `uint8` lifecycle phase, see `AuctionState::from_phase`
    Phase,
    EndTime,
    /// Zero until the auction has been ended
    FinalBlockNumber,
    /// `(address identity, address deposit)`
    Winner,
    WinningBid,
    ClaimsOutstanding,
}

impl StateField {
    pub fn name(&self) -> &'static str {
        match self {
            StateField::Phase => "phase",
            StateField::EndTime => "endTime",
            StateField::FinalBlockNumber => "finalBlockNumber",
            StateField::Winner => "winner",
            StateField::WinningBid => "winningBid",
            StateField::ClaimsOutstanding => "claimsOutstanding",
        }
    }
}

/// Port for sending requests to one auction instance hosted by the
/// confidential executor, on behalf of one confidential identity.
///
/// Implementations:
/// - `MockGateway` (in-process executor for tests and the demo)
pub trait ConfidentialGateway: Send + Sync {
    /// Address of the auction instance this gateway talks to.
    fn auction(&self) -> Address;

    /// Confidential-chain identity requests are sent as.
    fn identity(&self) -> Address;

    /// Execute a state transition under the given resource budget.
    fn send(
        &self,
        request: &ConfidentialRequest,
        budget: GasBudget,
    ) -> impl Future<Output = Result<ConfidentialReceipt, GatewayError>> + Send;

    /// Read a state field. No confidentiality, no receipt.
    fn call(
        &self,
        field: StateField,
    ) -> impl Future<Output = Result<Vec<DynSolValue>, GatewayError>> + Send;
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    #[error("{operation} ran out of resources at budget {budget}")]
    ResourceEstimation {
        operation: &'static str,
        budget: GasBudget,
    },

    #[error("gateway transport error: {0}")]
    Transport(String),

    #[error("{operation} rejected: {reason}")]
    Rejected {
        operation: &'static str,
        reason: String,
    },
}

impl GatewayError {
    /// Resource and transport failures may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, GatewayError::Rejected { .. })
    }
}

/// Decode a single-`uint` state read.
pub fn decode_uint(field: StateField, values: &[DynSolValue]) -> Result<U256, ProtocolViolation> {
    match values {
        [DynSolValue::Uint(value, _)] => Ok(*value),
        other => Err(ProtocolViolation::UnexpectedState {
            field: field.name(),
            reason: format!("expected one uint, got {other:?}"),
        }),
    }
}

/// Decode a single-`uint` state read that must fit in a `u64`.
pub fn decode_u64(field: StateField, values: &[DynSolValue]) -> Result<u64, ProtocolViolation> {
    let value = decode_uint(field, values)?;
    u64::try_from(value).map_err(|_| ProtocolViolation::UnexpectedState {
        field: field.name(),
        reason: format!("{value} does not fit in 64 bits"),
    })
}

/// Decode an `(address, address)` state read.
pub fn decode_address_pair(
    field: StateField,
    values: &[DynSolValue],
) -> Result<(Address, Address), ProtocolViolation> {
    match values {
        [DynSolValue::Address(a), DynSolValue::Address(b)] => Ok((*a, *b)),
        other => Err(ProtocolViolation::UnexpectedState {
            field: field.name(),
            reason: format!("expected two addresses, got {other:?}"),
        }),
    }
}
