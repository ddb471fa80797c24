//! Authenticated envelope for bidding addresses.
//!
//! Layout: `nonce (12 bytes) ‖ ciphertext ‖ tag (16 bytes)`, AES-256-GCM under
//! the bidder's one-time [`EphemeralKey`]. Clients only ever call [`open`];
//! [`seal`] is what the confidential executor does on its side.

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use rand::{CryptoRng, RngCore};

use crate::domain::bidder::EphemeralKey;

pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IntegrityError {
    #[error("sealed envelope too short: {len} bytes, nonce alone is {NONCE_LEN}")]
    TooShort { len: usize },

    #[error("envelope authentication failed")]
    Authentication,

    #[error("envelope encryption failed")]
    Seal,
}

fn cipher(key: &EphemeralKey) -> Result<Aes256Gcm, IntegrityError> {
    Aes256Gcm::new_from_slice(key.as_bytes()).map_err(|_| IntegrityError::Authentication)
}

/// Decrypt and authenticate a sealed envelope.
///
/// Never returns partial plaintext: any tampering, truncation or key mismatch
/// yields an [`IntegrityError`].
pub fn open(key: &EphemeralKey, sealed: &[u8]) -> Result<Vec<u8>, IntegrityError> {
    if sealed.len() < NONCE_LEN {
        return Err(IntegrityError::TooShort { len: sealed.len() });
    }
    let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
    cipher(key)?
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| IntegrityError::Authentication)
}

/// Encrypt `plaintext` under `key` with a fresh random nonce.
pub fn seal<R: RngCore + CryptoRng>(
    key: &EphemeralKey,
    plaintext: &[u8],
    rng: &mut R,
) -> Result<Vec<u8>, IntegrityError> {
    let mut nonce = [0u8; NONCE_LEN];
    rng.fill_bytes(&mut nonce);
    let ciphertext = cipher(key)?
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| IntegrityError::Seal)?;

    let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}
