//! Client-side authenticated encryption (§4.2). AES-256-GCM over short
//! plaintexts, whole binary files, and streamed chunked binary files with
//! per-chunk AAD binding chunk order.
//!
//! Nothing in this module ever runs with knowledge of server state — it is
//! the library a browser-side (WASM) client or a test harness acting as one
//! would call. The HTTP layer in `server` only ever touches the ciphertext
//! this module produces; it never calls `encrypt_*`/`decrypt_*` itself.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use zeroize::Zeroize;

use crate::codec::{IV_LEN, KEY_LEN};
use crate::error::{CoreError, CoreResult};

/// A 256-bit AES-GCM key. Locked in memory (best-effort, Unix only) and
/// zeroized on drop so a swapped-out page or a leaked stack frame doesn't
/// outlive the key's useful lifetime.
#[derive(Clone)]
pub struct EncryptionKey(pub [u8; KEY_LEN]);

impl Zeroize for EncryptionKey {
    fn zeroize(&mut self) {
        self.0.zeroize();
    }
}

impl Drop for EncryptionKey {
    fn drop(&mut self) {
        #[cfg(unix)]
        unsafe {
            libc::munlock(self.0.as_ptr() as *const libc::c_void, self.0.len());
        }
        self.zeroize();
    }
}

impl EncryptionKey {
    /// Generate a fresh random key (link-with-key mode).
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_LEN];
        rand::RngCore::fill_bytes(&mut rand::rng(), &mut key);
        let k = Self(key);
        k.lock_memory();
        k
    }

    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        let k = Self(bytes);
        k.lock_memory();
        k
    }

    /// Best-effort `mlock` of the key's backing memory. Not fatal if it
    /// fails (missing `CAP_IPC_LOCK`, ulimit too low) — the key is still
    /// zeroized on drop either way.
    fn lock_memory(&self) {
        #[cfg(unix)]
        unsafe {
            let ret = libc::mlock(self.0.as_ptr() as *const libc::c_void, self.0.len());
            if ret != 0 {
                tracing::debug!("mlock failed — key may be swapped to disk");
            }
        }
    }

    pub fn to_url_safe(&self) -> String {
        crate::codec::encode(&self.0)
    }

    pub fn from_url_safe(encoded: &str) -> CoreResult<Self> {
        let bytes = crate::codec::decode(encoded)
            .map_err(|e| CoreError::Validation(format!("invalid key encoding: {e}")))?;
        if bytes.len() != KEY_LEN {
            return Err(CoreError::Validation(format!(
                "invalid key length: expected {KEY_LEN}, got {}",
                bytes.len()
            )));
        }
        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(&bytes);
        Ok(Self::from_bytes(key))
    }
}

fn cipher_for(key: &EncryptionKey) -> Aes256Gcm {
    Aes256Gcm::new_from_slice(&key.0).expect("key is exactly 32 bytes")
}

/// `encrypt_bytes(key, plaintext) -> (iv, ciphertext_with_tag)`. Fresh IV,
/// no additional data.
pub fn encrypt_bytes(key: &EncryptionKey, plaintext: &[u8]) -> ([u8; IV_LEN], Vec<u8>) {
    let iv = crate::codec::random_iv();
    let cipher = cipher_for(key);
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&iv), plaintext)
        .expect("GCM encryption is infallible for valid key/nonce lengths");
    (iv, ciphertext)
}

/// `decrypt_bytes(key, iv, ciphertext_with_tag) -> plaintext or AuthFailure`.
pub fn decrypt_bytes(
    key: &EncryptionKey,
    iv: &[u8; IV_LEN],
    ciphertext: &[u8],
) -> CoreResult<Vec<u8>> {
    let cipher = cipher_for(key);
    cipher
        .decrypt(Nonce::from_slice(iv), ciphertext)
        .map_err(|_| CoreError::AuthFailure)
}

/// `encrypt_file_whole` has an identical contract to `encrypt_bytes`; kept
/// as a distinct name because `iv_base` is semantically the file's base
/// nonce, not just "an IV".
pub fn encrypt_file_whole(key: &EncryptionKey, plaintext: &[u8]) -> ([u8; IV_LEN], Vec<u8>) {
    encrypt_bytes(key, plaintext)
}

pub fn decrypt_file_whole(
    key: &EncryptionKey,
    iv_base: &[u8; IV_LEN],
    ciphertext: &[u8],
) -> CoreResult<Vec<u8>> {
    decrypt_bytes(key, iv_base, ciphertext)
}

/// Derive the per-chunk IV: `iv_base` with its trailing 32 bits (bytes 8..12)
/// replaced by the big-endian chunk index (§4.2).
pub fn derive_chunk_iv(iv_base: &[u8; IV_LEN], index: u32) -> [u8; IV_LEN] {
    let mut iv = *iv_base;
    iv[8..12].copy_from_slice(&index.to_be_bytes());
    iv
}

/// AAD binding a chunk to its position within a specific total chunk count,
/// e.g. `chunk:3/5`. This is what makes reordering, duplication, dropping,
/// or cross-file splicing of chunks fail authentication instead of silently
/// corrupting the plaintext (§9 "Chunk AAD").
pub fn chunk_aad(index: u32, total: u32) -> Vec<u8> {
    format!("chunk:{index}/{total}").into_bytes()
}

/// Encrypt one chunk of a streamed chunked upload. Callers drive the stream
/// themselves (reading `chunk_size` bytes at a time, the final chunk
/// possibly short) and call this once per chunk.
pub fn encrypt_chunk(
    key: &EncryptionKey,
    iv_base: &[u8; IV_LEN],
    index: u32,
    total: u32,
    plaintext: &[u8],
) -> Vec<u8> {
    let iv = derive_chunk_iv(iv_base, index);
    let aad = chunk_aad(index, total);
    let cipher = cipher_for(key);
    cipher
        .encrypt(
            Nonce::from_slice(&iv),
            Payload {
                msg: plaintext,
                aad: &aad,
            },
        )
        .expect("GCM encryption is infallible for valid key/nonce lengths")
}

/// Decrypt one chunk; fails with `AuthFailure` if the tag, ciphertext, IV,
/// or `(index, total)` binding don't match what was encrypted.
pub fn decrypt_chunk(
    key: &EncryptionKey,
    iv_base: &[u8; IV_LEN],
    index: u32,
    total: u32,
    ciphertext: &[u8],
) -> CoreResult<Vec<u8>> {
    let iv = derive_chunk_iv(iv_base, index);
    let aad = chunk_aad(index, total);
    let cipher = cipher_for(key);
    cipher
        .decrypt(
            Nonce::from_slice(&iv),
            Payload {
                msg: ciphertext,
                aad: &aad,
            },
        )
        .map_err(|_| CoreError::AuthFailure)
}

/// Encrypt a full in-memory plaintext as a sequence of chunks, invoking
/// `on_chunk(index, ciphertext_with_tag)` for each one. Returns the fresh
/// `iv_base` generated for this file. Mirrors
/// `encrypt_file_chunked(key, plaintext_stream, chunk_size, on_chunk)` from
/// §4.2, specialized to an in-memory slice — the HTTP layer drives the same
/// contract chunk-by-chunk over a multipart upload instead.
pub fn encrypt_file_chunked(
    key: &EncryptionKey,
    plaintext: &[u8],
    chunk_size: usize,
    mut on_chunk: impl FnMut(u32, Vec<u8>),
) -> [u8; IV_LEN] {
    let iv_base = crate::codec::random_iv();
    let total = plaintext.chunks(chunk_size).count().max(1) as u32;
    for (index, chunk) in plaintext.chunks(chunk_size).enumerate() {
        let ciphertext = encrypt_chunk(key, &iv_base, index as u32, total, chunk);
        on_chunk(index as u32, ciphertext);
    }
    iv_base
}

/// Inverse of `encrypt_file_chunked`: `fetch_chunk(index)` must return the
/// ciphertext for that index; any authentication failure aborts the whole
/// decryption.
pub fn decrypt_file_chunked(
    key: &EncryptionKey,
    iv_base: &[u8; IV_LEN],
    total: u32,
    mut fetch_chunk: impl FnMut(u32) -> CoreResult<Vec<u8>>,
) -> CoreResult<Vec<u8>> {
    let mut plaintext = Vec::new();
    for index in 0..total {
        let ciphertext = fetch_chunk(index)?;
        let chunk = decrypt_chunk(key, iv_base, index, total, &ciphertext)?;
        plaintext.extend_from_slice(&chunk);
    }
    Ok(plaintext)
}
