//! URL-safe base64 (no padding) encode/decode and CSPRNG byte generation.
//!
//! Every wire-visible binary field (ciphertext, IVs, salts, keys, tokens)
//! passes through here. Padding is restored before decoding so callers never
//! have to think about it, and only the URL-safe alphabet is accepted.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use thiserror::Error;

/// Salt length used throughout the KDF (§4.1, §4.3).
pub const SALT_LEN: usize = 16;
/// GCM nonce length (§4.2).
pub const IV_LEN: usize = 12;
/// AES-256 key / PBKDF2 output length.
pub const KEY_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("input contains characters outside the URL-safe base64 alphabet")]
    InvalidAlphabet,
    #[error("base64 decode failed: {0}")]
    Decode(#[from] base64::DecodeError),
}

/// Encode bytes as URL-safe base64 without padding.
pub fn encode(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Decode a URL-safe, unpadded base64 string.
///
/// Restores the padding the no-pad alphabet strips before handing off to the
/// base64 decoder, and rejects any character outside `[A-Za-z0-9_-]`.
pub fn decode(input: &str) -> Result<Vec<u8>, CodecError> {
    if !input
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
    {
        return Err(CodecError::InvalidAlphabet);
    }
    Ok(URL_SAFE_NO_PAD.decode(input)?)
}

/// Fill a freshly allocated `n`-byte buffer using the platform CSPRNG.
pub fn random(n: usize) -> Vec<u8> {
    let mut buf = vec![0u8; n];
    rand::rng().fill_bytes(&mut buf);
    buf
}

/// Generate a fresh random salt (§3: 16 bytes).
pub fn random_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    rand::rng().fill_bytes(&mut salt);
    salt
}

/// Generate a fresh random IV (§4.2: 12 bytes, GCM standard).
pub fn random_iv() -> [u8; IV_LEN] {
    let mut iv = [0u8; IV_LEN];
    rand::rng().fill_bytes(&mut iv);
    iv
}
