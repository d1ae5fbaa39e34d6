//! Passphrase key derivation (§4.3). PBKDF2-HMAC-SHA-256 producing two
//! independent 256-bit outputs from one passphrase: an encryption key that
//! never leaves the client, and a validation hash the server can compare
//! without learning anything about the encryption key.
//!
//! §9 "Two salts": do not be tempted to reuse one salt with a domain
//! separator. Two independently-drawn 16-byte salts make the "the server
//! learns nothing useful" argument trivial — the validation hash is a
//! function of inputs that never touch the encryption key's input space.

use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::codec::{KEY_LEN, SALT_LEN};
use crate::crypto::EncryptionKey;

/// Minimum and default PBKDF2 iteration count (§3, §4.3).
pub const DEFAULT_ITERATIONS: u32 = 210_000;

/// Derive the 32-byte encryption key from (passphrase, encryption_salt,
/// iterations).
pub fn derive_encryption_key(
    passphrase: &str,
    encryption_salt: &[u8; SALT_LEN],
    iterations: u32,
) -> EncryptionKey {
    let mut out = [0u8; KEY_LEN];
    pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), encryption_salt, iterations, &mut out);
    EncryptionKey::from_bytes(out)
}

/// Derive the 32-byte validation hash from (passphrase, validation_salt,
/// iterations). This is the "validation derivation" path of §4.3: the
/// client runs this against the server-returned `validation_salt` and
/// `iterations` and posts the result for an exact-match compare.
pub fn derive_validation_hash(
    passphrase: &str,
    validation_salt: &[u8; SALT_LEN],
    iterations: u32,
) -> [u8; KEY_LEN] {
    let mut out = [0u8; KEY_LEN];
    pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), validation_salt, iterations, &mut out);
    out
}

/// A fresh pair of independently-drawn salts for passphrase mode (§3).
pub struct PassphraseSalts {
    pub encryption_salt: [u8; SALT_LEN],
    pub validation_salt: [u8; SALT_LEN],
}

impl PassphraseSalts {
    pub fn generate() -> Self {
        let encryption_salt = crate::codec::random_salt();
        let mut validation_salt = crate::codec::random_salt();
        // Independently drawn already makes collision astronomically
        // unlikely, but the invariant (§3) is absolute: re-roll on the
        // vanishing chance of equality rather than assert and panic.
        while validation_salt == encryption_salt {
            validation_salt = crate::codec::random_salt();
        }
        Self {
            encryption_salt,
            validation_salt,
        }
    }
}

/// Derive both outputs for a freshly-chosen passphrase, generating new
/// independent salts. Used by the client at creation time.
pub fn derive_both(
    passphrase: &str,
    iterations: u32,
) -> (EncryptionKey, [u8; KEY_LEN], PassphraseSalts) {
    let salts = PassphraseSalts::generate();
    let key = derive_encryption_key(passphrase, &salts.encryption_salt, iterations);
    let validation_hash = derive_validation_hash(passphrase, &salts.validation_salt, iterations);
    (key, validation_hash, salts)
}

/// Constant-time comparison of two base64url-encoded validation hashes, to
/// avoid a timing oracle on passphrase guesses (§4.3).
pub fn hashes_match(provided: &[u8; KEY_LEN], stored: &[u8; KEY_LEN]) -> bool {
    provided.ct_eq(stored).into()
}
