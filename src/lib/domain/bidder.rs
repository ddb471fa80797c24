use alloy::primitives::{Address, Bytes};
use rand::{CryptoRng, RngCore};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Length of an ephemeral envelope key in bytes (AES-256).
pub const EPHEMERAL_KEY_LEN: usize = 32;

/// One-time symmetric key a bidder hands to the confidential executor so that
/// the issued deposit address comes back encrypted to the bidder alone.
///
/// Generated fresh for every `getBiddingAddress` request and wiped on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EphemeralKey([u8; EPHEMERAL_KEY_LEN]);

impl EphemeralKey {
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut key = [0u8; EPHEMERAL_KEY_LEN];
        rng.fill_bytes(&mut key);
        Self(key)
    }

    pub fn from_bytes(bytes: [u8; EPHEMERAL_KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Parse a key received as a confidential payload.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let key: [u8; EPHEMERAL_KEY_LEN] = bytes.try_into().ok()?;
        Some(Self(key))
    }

    pub fn as_bytes(&self) -> &[u8; EPHEMERAL_KEY_LEN] {
        &self.0
    }

    /// Confidential payload carrying this key to the executor.
    pub fn to_payload(&self) -> Bytes {
        Bytes::copy_from_slice(&self.0)
    }
}

impl std::fmt::Debug for EphemeralKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EphemeralKey(..)")
    }
}

/// A deposit address issued to one bidder, as seen by that bidder after
/// decrypting the `BiddingAddressIssued` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BiddingAddress {
    /// Confidential-chain identity that requested the address
    pub owner: Address,
    /// Settlement-chain address to deposit the bid into
    pub deposit_address: Address,
    /// The ciphertext as published in the receipt (nonce ‖ ciphertext ‖ tag)
    pub encrypted_deposit_address: Bytes,
}

/// How much value a bid deposits at its bidding address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepositAmount {
    /// Transfer exactly this many minimal value units.
    Exact(alloy::primitives::U256),
    /// Transfer the whole account balance minus the transfer fee.
    Sweep,
}
