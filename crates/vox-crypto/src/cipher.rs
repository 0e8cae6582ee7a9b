//! ChaCha20-Poly1305 sealing of destination account numbers (RFC 8439).
//!
//! Sealed values are stored as base64 of `nonce || ciphertext || tag`. A fresh
//! random nonce is drawn for every encryption.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Key, Nonce,
};
use rand::RngCore;
use zeroize::Zeroizing;

use crate::{CryptoError, Result};

/// Nonce size for ChaCha20-Poly1305 (96 bits = 12 bytes).
pub const NONCE_SIZE: usize = 12;

/// Key size for ChaCha20-Poly1305 (256 bits = 32 bytes).
pub const KEY_SIZE: usize = 32;

/// Authentication tag size (128 bits = 16 bytes).
pub const TAG_SIZE: usize = 16;

/// Associated data binding sealed values to their purpose.
const ACCOUNT_AAD: &[u8] = b"vox v1 destination-account";

/// Number of trailing characters left visible by [`mask`].
pub const MASK_VISIBLE: usize = 4;

/// Encryption provider for destination account numbers.
pub struct AccountCipher {
    key: Zeroizing<[u8; KEY_SIZE]>,
}

impl AccountCipher {
    /// Create a cipher from a raw 32-byte key.
    pub fn new(key: [u8; KEY_SIZE]) -> Self {
        Self {
            key: Zeroizing::new(key),
        }
    }

    /// Create a cipher from a hex-encoded 32-byte key.
    pub fn from_hex(key_hex: &str) -> Result<Self> {
        let bytes = Zeroizing::new(
            hex::decode(key_hex.trim()).map_err(|e| CryptoError::InvalidInput(e.to_string()))?,
        );
        let key: [u8; KEY_SIZE] =
            bytes
                .as_slice()
                .try_into()
                .map_err(|_| CryptoError::InvalidKeyLength {
                    expected: KEY_SIZE,
                    actual: bytes.len(),
                })?;
        Ok(Self::new(key))
    }

    /// Seal `plaintext`.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let mut nonce = [0u8; NONCE_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut nonce);

        let cipher = ChaCha20Poly1305::new(Key::from_slice(self.key.as_slice()));
        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext.as_bytes(),
                    aad: ACCOUNT_AAD,
                },
            )
            .map_err(|_| CryptoError::AeadEncryption)?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(sealed))
    }

    /// Open a value produced by [`AccountCipher::encrypt`].
    pub fn decrypt(&self, sealed: &str) -> Result<String> {
        let sealed = STANDARD
            .decode(sealed)
            .map_err(|e| CryptoError::InvalidInput(e.to_string()))?;
        if sealed.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CryptoError::InvalidInput(format!(
                "sealed value too short: {} bytes",
                sealed.len()
            )));
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_SIZE);

        let cipher = ChaCha20Poly1305::new(Key::from_slice(self.key.as_slice()));
        let plaintext = Zeroizing::new(
            cipher
                .decrypt(
                    Nonce::from_slice(nonce),
                    Payload {
                        msg: ciphertext,
                        aad: ACCOUNT_AAD,
                    },
                )
                .map_err(|_| CryptoError::AeadDecryption)?,
        );

        String::from_utf8(plaintext.to_vec()).map_err(|e| CryptoError::InvalidInput(e.to_string()))
    }
}

impl std::fmt::Debug for AccountCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountCipher").finish_non_exhaustive()
    }
}

/// Display-safe form of a sensitive value: every character but the last
/// [`MASK_VISIBLE`] replaced with `*`.
pub fn mask(value: &str) -> String {
    let len = value.chars().count();
    if len <= MASK_VISIBLE {
        return "*".repeat(len);
    }
    let hidden = len - MASK_VISIBLE;
    value
        .chars()
        .enumerate()
        .map(|(i, c)| if i < hidden { '*' } else { c })
        .collect()
}
