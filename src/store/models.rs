//! Row shapes for the four tables the `BurnStore` owns (§3).

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::codec::{IV_LEN, KEY_LEN, SALT_LEN};

/// Server-visible passphrase material. Either fully present or fully absent
/// on a record (§3 invariant) — modeled as `Option<PassphraseFields>` rather
/// than four separate `Option<T>` fields so that invariant is structural,
/// not just documented.
#[derive(Debug, Clone)]
pub struct PassphraseFields {
    pub encryption_salt: [u8; SALT_LEN],
    pub validation_salt: [u8; SALT_LEN],
    pub kdf_iterations: u32,
    pub passphrase_hash: [u8; KEY_LEN],
}

#[derive(Debug, Clone)]
pub struct NoteRecord {
    pub id: Uuid,
    pub ciphertext: Vec<u8>,
    pub iv: [u8; IV_LEN],
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub views_left: u32,
    pub initial_views: u32,
    pub passphrase: Option<PassphraseFields>,
}

impl NoteRecord {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        now <= self.expires_at && self.views_left > 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileMode {
    Whole,
    Chunked,
}

#[derive(Debug, Clone)]
pub struct FileRecord {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub passphrase: Option<PassphraseFields>,
    pub file_name: String,
    pub size_bytes: u64,
    pub chunk_bytes: u32,
    pub total_chunks: u32,
    /// `None` until the first chunk (index 0) of a chunked upload lands;
    /// always `Some` for whole-file records from creation.
    pub iv_base: Option<[u8; IV_LEN]>,
    pub storage_path: String,
    pub encrypted_filename: Option<Vec<u8>>,
    pub filename_iv: Option<[u8; IV_LEN]>,
    /// Chunk indices successfully written so far. Only meaningful in
    /// chunked mode; `upload_chunk` is the only writer.
    pub uploaded_chunks: std::collections::BTreeSet<u32>,
}

impl FileRecord {
    pub fn mode(&self) -> FileMode {
        if self.total_chunks > 1 {
            FileMode::Chunked
        } else {
            FileMode::Whole
        }
    }

    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        now <= self.expires_at
    }

    pub fn fully_uploaded(&self) -> bool {
        self.uploaded_chunks.len() as u32 == self.total_chunks
    }
}

#[derive(Debug, Clone)]
pub struct DownloadToken {
    pub token: String,
    pub file_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
    pub is_multi_use: bool,
}

impl DownloadToken {
    /// §3: "a token is valid iff `now <= expires_at AND now <= file.expires_at AND used = false`".
    /// The file-level expiry check happens at the call site, where the file
    /// record is available.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        !self.used && now <= self.expires_at
    }
}

/// Validate a UUID against the canonical lowercase/uppercase hyphenated
/// form (§6.1): `^[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$`
/// case-insensitive. Rejects braced, urn:, or simple (no-hyphen) forms that
/// `Uuid::parse_str` would otherwise accept.
pub fn parse_canonical_uuid(s: &str) -> Option<Uuid> {
    let bytes = s.as_bytes();
    if bytes.len() != 36 {
        return None;
    }
    for (i, b) in bytes.iter().enumerate() {
        let is_hyphen_pos = matches!(i, 8 | 13 | 18 | 23);
        if is_hyphen_pos {
            if *b != b'-' {
                return None;
            }
        } else if !b.is_ascii_hexdigit() {
            return None;
        }
    }
    Uuid::parse_str(s).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_canonical_uuid() {
        let id = Uuid::new_v4();
        assert_eq!(parse_canonical_uuid(&id.to_string()), Some(id));
    }

    #[test]
    fn accepts_uppercase() {
        let id = Uuid::new_v4();
        let upper = id.to_string().to_uppercase();
        assert_eq!(parse_canonical_uuid(&upper), Some(id));
    }

    #[test]
    fn rejects_non_canonical_forms() {
        let id = Uuid::new_v4();
        assert_eq!(parse_canonical_uuid(&id.simple().to_string()), None);
        assert_eq!(parse_canonical_uuid(&format!("{{{id}}}")), None);
        assert_eq!(parse_canonical_uuid(&format!("urn:uuid:{id}")), None);
        assert_eq!(parse_canonical_uuid("not-a-uuid-at-all-nope-nope"), None);
    }
}
