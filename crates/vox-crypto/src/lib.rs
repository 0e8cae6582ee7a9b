//! # vox-crypto
//!
//! Cryptographic helpers for the settlement engine.
//!
//! ## Modules
//!
//! - [`cipher`] - ChaCha20-Poly1305 sealing of destination account numbers, and masking
//! - [`blake3`] - Domain-separated BLAKE3 derivation (transfer references)
//! - [`hmac`] - HMAC-SHA512 signatures for transfer provider webhooks

pub mod blake3;
pub mod cipher;
pub mod hmac;

pub use cipher::{mask, AccountCipher};

/// Error types for cryptographic operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// AEAD encryption failed.
    #[error("AEAD encryption failed")]
    AeadEncryption,

    /// AEAD decryption failed (authentication tag mismatch).
    #[error("AEAD decryption failed")]
    AeadDecryption,

    /// Invalid key length.
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    /// Webhook or message signature did not verify.
    #[error("signature verification failed")]
    SignatureVerification,

    /// Invalid input data.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, CryptoError>;
