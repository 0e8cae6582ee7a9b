//! HMAC-SHA512 signatures over raw webhook bodies.
//!
//! The transfer provider signs each webhook body with the account secret and
//! sends the lowercase hex digest in a header.

use hmac::{Hmac, Mac};
use sha2::Sha512;

use crate::{CryptoError, Result};

type HmacSha512 = Hmac<Sha512>;

fn keyed(secret: &[u8]) -> Result<HmacSha512> {
    HmacSha512::new_from_slice(secret).map_err(|e| CryptoError::InvalidInput(e.to_string()))
}

/// Hex HMAC-SHA512 of `body` under `secret`.
pub fn sign_sha512(secret: &[u8], body: &[u8]) -> Result<String> {
    let mut mac = keyed(secret)?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Verify a hex HMAC-SHA512 signature in constant time.
pub fn verify_sha512(secret: &[u8], body: &[u8], signature_hex: &str) -> Result<()> {
    let signature =
        hex::decode(signature_hex.trim()).map_err(|_| CryptoError::SignatureVerification)?;
    let mut mac = keyed(secret)?;
    mac.update(body);
    mac.verify_slice(&signature)
        .map_err(|_| CryptoError::SignatureVerification)
}
