use std::collections::HashMap;
use std::sync::Arc;

use alloy::primitives::Address;
use tokio::sync::Mutex;

use crate::domain::auction::NftRef;
use crate::ports::custody::{CustodyError, CustodyPort};

/// In-memory ERC-721 owner table. Clones share the table.
#[derive(Clone, Default)]
pub struct MockCustody {
    owners: Arc<Mutex<HashMap<NftRef, Address>>>,
}

impl MockCustody {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn mint(&self, nft: NftRef, owner: Address) {
        self.owners.lock().await.insert(nft, owner);
    }
}

impl CustodyPort for MockCustody {
    async fn owner_of(&self, nft: &NftRef) -> Result<Address, CustodyError> {
        self.owners
            .lock()
            .await
            .get(nft)
            .copied()
            .ok_or(CustodyError::UnknownAsset(*nft))
    }

    async fn transfer_custody(
        &self,
        nft: &NftRef,
        from: Address,
        to: Address,
    ) -> Result<(), CustodyError> {
        let mut owners = self.owners.lock().await;
        let owner = owners.get_mut(nft).ok_or(CustodyError::UnknownAsset(*nft))?;
        if *owner != from {
            return Err(CustodyError::NotOwner {
                nft: *nft,
                owner: *owner,
                from,
            });
        }
        *owner = to;
        Ok(())
    }
}
