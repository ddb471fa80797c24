use std::future::Future;

use alloy::primitives::Address;

use crate::domain::auction::NftRef;

/// Port for moving the auctioned asset between settlement-chain accounts.
///
/// Implementations:
/// - `EthereumCustody` (ERC-721 via alloy)
/// - `MockCustody` (in-memory owner table)
pub trait CustodyPort: Send + Sync {
    fn owner_of(&self, nft: &NftRef) -> impl Future<Output = Result<Address, CustodyError>> + Send;

    fn transfer_custody(
        &self,
        nft: &NftRef,
        from: Address,
        to: Address,
    ) -> impl Future<Output = Result<(), CustodyError>> + Send;
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum CustodyError {
    #[error("{nft} is owned by {owner}, not {from}")]
    NotOwner {
        nft: NftRef,
        owner: Address,
        from: Address,
    },

    #[error("unknown asset: {0}")]
    UnknownAsset(NftRef),

    #[error("custody transfer failed: {0}")]
    TransferFailed(String),

    #[error("RPC error: {0}")]
    Rpc(String),
}
