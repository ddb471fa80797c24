use alloy::{
    eips::{eip2718::Encodable2718, BlockId},
    network::{EthereumWallet, TransactionBuilder},
    primitives::{Address, Bytes, B256, U256},
    providers::{DynProvider, Provider, ProviderBuilder},
    rpc::types::TransactionRequest,
    signers::local::PrivateKeySigner,
    sol,
};

use crate::{
    config::SettlementConfig,
    domain::auction::NftRef,
    ports::{
        custody::{CustodyError, CustodyPort},
        settlement::{FeeQuote, SettlementChain, SettlementError, TransferRequest},
        InclusionReceipt,
    },
};

sol! {
    #[sol(rpc)]
    interface IERC721 {
        function ownerOf(uint256 tokenId) external view returns (address);
        function transferFrom(address from, address to, uint256 tokenId) external;
    }
}

fn connect(rpc_url: &str, wallet: Option<EthereumWallet>) -> Result<DynProvider, String> {
    let url = rpc_url
        .parse()
        .map_err(|e| format!("Invalid RPC URL: {e}"))?;
    Ok(match wallet {
        Some(wallet) => DynProvider::new(ProviderBuilder::new().wallet(wallet).connect_http(url)),
        None => DynProvider::new(ProviderBuilder::new().connect_http(url)),
    })
}

fn parse_signer(private_key: &str) -> Result<PrivateKeySigner, String> {
    private_key
        .parse()
        .map_err(|e| format!("Invalid private key: {e}"))
}

/// Map node error text onto the submission errors the repricing loop
/// understands. Clients word these differently, so match loosely.
fn classify(message: String, tx_hash: B256) -> SettlementError {
    let lower = message.to_lowercase();
    if lower.contains("already known") || lower.contains("known transaction") {
        SettlementError::AlreadyKnown(tx_hash)
    } else if lower.contains("underpriced") || lower.contains("fee too low") {
        SettlementError::Underpriced
    } else if lower.contains("nonce too low") {
        SettlementError::NonceTooLow
    } else if lower.contains("insufficient funds") {
        SettlementError::InsufficientFunds(message)
    } else {
        SettlementError::Rpc(message)
    }
}

/// Settlement chain over JSON-RPC.
///
/// Without a private key the adapter is read-only (resolver) and
/// `send_transfer` fails.
#[derive(Clone)]
pub struct EthereumSettlement {
    provider: DynProvider,
    wallet: Option<EthereumWallet>,
    account: Address,
    chain_id: u64,
}

impl EthereumSettlement {
    pub fn new(rpc_url: &str, private_key: Option<&str>, chain_id: u64) -> Result<Self, SettlementError> {
        let signer = private_key
            .map(parse_signer)
            .transpose()
            .map_err(SettlementError::Rpc)?;
        let account = signer.as_ref().map(|s| s.address()).unwrap_or_default();
        let wallet = signer.map(EthereumWallet::from);
        let provider = connect(rpc_url, wallet.clone()).map_err(SettlementError::Rpc)?;
        Ok(Self {
            provider,
            wallet,
            account,
            chain_id,
        })
    }

    pub fn from_config(config: &SettlementConfig) -> Result<Self, SettlementError> {
        Self::new(&config.rpc_url, config.private_key.as_deref(), config.chain_id)
    }

    pub fn provider(&self) -> &DynProvider {
        &self.provider
    }
}

impl SettlementChain for EthereumSettlement {
    fn account(&self) -> Address {
        self.account
    }

    async fn latest_block(&self) -> Result<u64, SettlementError> {
        self.provider
            .get_block_number()
            .await
            .map_err(|e| SettlementError::Rpc(e.to_string()))
    }

    async fn balance_at(&self, address: Address, block: u64) -> Result<U256, SettlementError> {
        self.provider
            .get_balance(address)
            .block_id(BlockId::number(block))
            .await
            .map_err(|e| {
                let message = e.to_string();
                if message.to_lowercase().contains("header not found") {
                    SettlementError::UnknownBlock(block)
                } else {
                    SettlementError::Rpc(message)
                }
            })
    }

    async fn balance(&self, address: Address) -> Result<U256, SettlementError> {
        self.provider
            .get_balance(address)
            .await
            .map_err(|e| SettlementError::Rpc(e.to_string()))
    }

    async fn pending_nonce(&self, address: Address) -> Result<u64, SettlementError> {
        self.provider
            .get_transaction_count(address)
            .pending()
            .await
            .map_err(|e| SettlementError::Rpc(e.to_string()))
    }

    async fn suggest_fees(&self) -> Result<FeeQuote, SettlementError> {
        let estimate = self
            .provider
            .estimate_eip1559_fees()
            .await
            .map_err(|e| SettlementError::Rpc(e.to_string()))?;
        Ok(FeeQuote {
            max_fee_per_gas: estimate.max_fee_per_gas,
            max_priority_fee_per_gas: estimate.max_priority_fee_per_gas,
        })
    }

    async fn send_transfer(&self, request: &TransferRequest) -> Result<B256, SettlementError> {
        let wallet = self
            .wallet
            .as_ref()
            .ok_or_else(|| SettlementError::Rpc("no signing key configured".into()))?;

        let tx = TransactionRequest::default()
            .with_from(self.account)
            .with_to(request.to)
            .with_value(request.value)
            .with_nonce(request.nonce)
            .with_gas_limit(request.gas_limit)
            .with_max_fee_per_gas(request.fees.max_fee_per_gas)
            .with_max_priority_fee_per_gas(request.fees.max_priority_fee_per_gas)
            .with_chain_id(self.chain_id);
        let envelope = tx
            .build(wallet)
            .await
            .map_err(|e| SettlementError::Rpc(format!("signing failed: {e}")))?;
        let tx_hash = *envelope.tx_hash();

        self.provider
            .send_raw_transaction(&envelope.encoded_2718())
            .await
            .map(|pending| *pending.tx_hash())
            .map_err(|e| classify(e.to_string(), tx_hash))
    }

    async fn send_raw(&self, raw: &Bytes) -> Result<B256, SettlementError> {
        let tx_hash = alloy::primitives::keccak256(raw);
        self.provider
            .send_raw_transaction(raw)
            .await
            .map(|pending| *pending.tx_hash())
            .map_err(|e| classify(e.to_string(), tx_hash))
    }

    async fn inclusion(&self, tx_hash: B256) -> Result<Option<InclusionReceipt>, SettlementError> {
        let receipt = self
            .provider
            .get_transaction_receipt(tx_hash)
            .await
            .map_err(|e| SettlementError::Rpc(e.to_string()))?;
        Ok(receipt.and_then(|r| {
            r.block_number.map(|block_number| InclusionReceipt {
                tx_hash,
                block_number,
                success: r.status(),
            })
        }))
    }
}

/// ERC-721 custody over JSON-RPC. Transfers are signed by the configured
/// key, which must own (or be approved for) the token.
#[derive(Clone)]
pub struct EthereumCustody {
    provider: DynProvider,
}

impl EthereumCustody {
    pub fn new(rpc_url: &str, private_key: &str) -> Result<Self, CustodyError> {
        let signer = parse_signer(private_key).map_err(CustodyError::Rpc)?;
        let provider =
            connect(rpc_url, Some(EthereumWallet::from(signer))).map_err(CustodyError::Rpc)?;
        Ok(Self { provider })
    }
}

impl CustodyPort for EthereumCustody {
    async fn owner_of(&self, nft: &NftRef) -> Result<Address, CustodyError> {
        IERC721::new(nft.contract, &self.provider)
            .ownerOf(nft.token_id)
            .call()
            .await
            .map_err(|e| CustodyError::Rpc(e.to_string()))
    }

    async fn transfer_custody(
        &self,
        nft: &NftRef,
        from: Address,
        to: Address,
    ) -> Result<(), CustodyError> {
        let owner = self.owner_of(nft).await?;
        if owner != from {
            return Err(CustodyError::NotOwner {
                nft: *nft,
                owner,
                from,
            });
        }

        let receipt = IERC721::new(nft.contract, &self.provider)
            .transferFrom(from, to, nft.token_id)
            .send()
            .await
            .map_err(|e| CustodyError::TransferFailed(e.to_string()))?
            .get_receipt()
            .await
            .map_err(|e| CustodyError::TransferFailed(e.to_string()))?;

        if !receipt.status() {
            return Err(CustodyError::TransferFailed(format!(
                "transferFrom reverted in {}",
                receipt.transaction_hash
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_node_errors() {
        let hash = B256::repeat_byte(7);
        assert!(matches!(
            classify("replacement transaction underpriced".into(), hash),
            SettlementError::Underpriced
        ));
        assert!(matches!(
            classify("max fee per gas less than block base fee: fee too low".into(), hash),
            SettlementError::Underpriced
        ));
        assert!(matches!(
            classify("nonce too low: next nonce 5, tx nonce 4".into(), hash),
            SettlementError::NonceTooLow
        ));
        assert!(matches!(
            classify("ALREADY KNOWN".into(), hash),
            SettlementError::AlreadyKnown(h) if h == hash
        ));
        assert!(matches!(
            classify("insufficient funds for gas * price + value".into(), hash),
            SettlementError::InsufficientFunds(_)
        ));
        assert!(matches!(classify("boom".into(), hash), SettlementError::Rpc(_)));
    }

    #[test]
    fn test_read_only_adapter_has_no_account() {
        let chain = EthereumSettlement::new("http://localhost:8545", None, 1).unwrap();
        assert_eq!(chain.account(), Address::ZERO);
    }

    #[test]
    fn test_invalid_key_is_rejected() {
        assert!(EthereumSettlement::new("http://localhost:8545", Some("nope"), 1).is_err());
        assert!(EthereumCustody::new("http://localhost:8545", "nope").is_err());
    }

    #[test]
    fn test_signed_account_matches_key() {
        let key = "0x0000000000000000000000000000000000000000000000000000000000000001";
        let chain = EthereumSettlement::new("http://localhost:8545", Some(key), 1).unwrap();
        let expected: PrivateKeySigner = key.parse().unwrap();
        assert_eq!(chain.account(), expected.address());
    }
}
