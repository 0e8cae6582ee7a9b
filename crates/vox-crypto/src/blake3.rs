//! Domain-separated BLAKE3 hashing.
//!
//! Every derivation uses a registered context string so outputs for
//! different purposes never collide.

/// Registered BLAKE3 context strings.
pub mod contexts {
    pub const TRANSFER_REFERENCE: &str = "vox v1 transfer-reference";

    /// All registered context strings. Used for validation.
    pub const ALL_CONTEXTS: &[&str] = &[TRANSFER_REFERENCE];
}

/// Prefix of every transfer reference sent to the provider.
pub const TRANSFER_REFERENCE_PREFIX: &str = "wd_";

/// Bytes of derived material kept in a transfer reference.
const REFERENCE_BYTES: usize = 12;

/// Compute BLAKE3 hash of the input data.
pub fn hash(data: &[u8]) -> [u8; 32] {
    *::blake3::hash(data).as_bytes()
}

/// Derive a key using BLAKE3's built-in key derivation mode.
pub fn derive_key(context: &str, material: &[u8]) -> [u8; 32] {
    ::blake3::derive_key(context, material)
}

/// Provider transfer reference for a withdrawal idempotency key.
///
/// Deterministic, so a client retry always maps to the same reference.
pub fn transfer_reference(idempotency_key: &str) -> String {
    let derived = derive_key(contexts::TRANSFER_REFERENCE, idempotency_key.as_bytes());
    format!(
        "{TRANSFER_REFERENCE_PREFIX}{}",
        hex::encode(&derived[..REFERENCE_BYTES])
    )
}
