//! BurnStore (§4.4): metadata tables for notes/files/download_tokens plus the
//! blob store namespace they address into. The server is request-parallel
//! with no shared mutable state of its own — all coordination funnels
//! through this module's locking, mirroring the teacher's `Drop` row (one
//! `Mutex`-guarded mutable field per record, touched under a single lock
//! acquisition) generalized from one global record to a concurrent table of
//! them.

pub mod blob;
pub mod models;

use std::collections::BTreeSet;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use crate::codec::{IV_LEN, SALT_LEN};
use crate::error::{CoreError, CoreResult};
pub use models::{DownloadToken, FileMode, FileRecord, NoteRecord, PassphraseFields};

const SINGLE_USE_TOKEN_TTL_SECS: i64 = 5 * 60;
const MULTI_USE_TOKEN_TTL_SECS: i64 = 10 * 60;

/// A note row plus the single mutex guarding its mutable field, so
/// `burn_and_fetch_note` can check-and-decrement under one lock.
struct NoteRow {
    record: NoteRecord,
    views_left: Mutex<u32>,
}

/// A file row plus a mutex guarding `iv_base` and `uploaded_chunks`, which
/// are the only fields mutated after creation.
struct FileRow {
    record: Mutex<FileRecord>,
}

struct TokenRow {
    token: Mutex<DownloadToken>,
}

pub struct BurnStore {
    notes: DashMap<Uuid, NoteRow>,
    files: DashMap<Uuid, FileRow>,
    tokens: DashMap<String, TokenRow>,
    blobs: Box<dyn blob::BlobStore>,
}

/// Result of `get_note_meta` / `get_file_meta` when passphrase fields exist.
pub struct PassphraseMeta {
    pub validation_salt: [u8; SALT_LEN],
    pub encryption_salt: [u8; SALT_LEN],
    pub kdf_iterations: u32,
}

pub struct FileMeta {
    pub file_name: String,
    pub iv_base: [u8; IV_LEN],
    pub total_chunks: u32,
    pub passphrase: Option<PassphraseMeta>,
    pub download_token: String,
    pub token_expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkUploadOutcome {
    Ok,
    AlreadyExists,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeOutcome {
    Ok { total_chunks: u32 },
    AlreadyFinalized,
}

#[derive(Debug, Default)]
pub struct SweepReport {
    pub notes_reclaimed: u64,
    pub files_reclaimed: u64,
    /// `(storage_path, mode)` for each reclaimed file, so the caller knows
    /// whether to `delete` a single object or `delete_prefix` a directory.
    pub file_storage_paths: Vec<(String, FileMode)>,
    pub tokens_reclaimed: u64,
}

impl BurnStore {
    pub fn new(blobs: Box<dyn blob::BlobStore>) -> Self {
        Self {
            notes: DashMap::new(),
            files: DashMap::new(),
            tokens: DashMap::new(),
            blobs,
        }
    }

    // ---- Notes ----------------------------------------------------------

    /// §4.4 `create_note`. Validates `1 <= views <= 100` and the expiry
    /// horizon; the caller (HTTP layer) supplies `max_expiry` from config.
    #[allow(clippy::too_many_arguments)]
    pub fn create_note(
        &self,
        ciphertext: Vec<u8>,
        iv: [u8; IV_LEN],
        expires_at: DateTime<Utc>,
        views: u32,
        passphrase: Option<PassphraseFields>,
        now: DateTime<Utc>,
        max_expiry: Duration,
    ) -> CoreResult<Uuid> {
        if !(1..=100).contains(&views) {
            return Err(CoreError::Validation(
                "views must be between 1 and 100".into(),
            ));
        }
        if expires_at < now {
            return Err(CoreError::Validation("expires_at is in the past".into()));
        }
        if expires_at > now + max_expiry {
            return Err(CoreError::Validation(
                "expires_at exceeds the configured horizon".into(),
            ));
        }
        let id = Uuid::new_v4();
        let record = NoteRecord {
            id,
            ciphertext,
            iv,
            created_at: now,
            expires_at,
            views_left: views,
            initial_views: views,
            passphrase,
        };
        self.notes.insert(
            id,
            NoteRow {
                views_left: Mutex::new(record.views_left),
                record,
            },
        );
        Ok(id)
    }

    /// §4.4 `get_note_meta`. Returns passphrase metadata only for live,
    /// passphrase-mode notes; never consumes a view.
    pub fn get_note_meta(&self, id: Uuid, now: DateTime<Utc>) -> CoreResult<PassphraseMeta> {
        let row = self.notes.get(&id).ok_or(CoreError::Gone)?;
        let views_left = *row.views_left.lock().unwrap();
        if now > row.record.expires_at || views_left == 0 {
            return Err(CoreError::Gone);
        }
        let fields = row.record.passphrase.as_ref().ok_or(CoreError::Gone)?;
        Ok(PassphraseMeta {
            validation_salt: fields.validation_salt,
            encryption_salt: fields.encryption_salt,
            kdf_iterations: fields.kdf_iterations,
        })
    }

    /// §4.4 `validate_note_passphrase`. True iff live and hash matches;
    /// never differentiates *why* it returned false (§7).
    pub fn validate_note_passphrase(&self, id: Uuid, provided_hash: &[u8; 32], now: DateTime<Utc>) -> bool {
        let Some(row) = self.notes.get(&id) else {
            return false;
        };
        let views_left = *row.views_left.lock().unwrap();
        if now > row.record.expires_at || views_left == 0 {
            return false;
        }
        match &row.record.passphrase {
            Some(fields) => crate::kdf::hashes_match(provided_hash, &fields.passphrase_hash),
            None => false,
        }
    }

    /// §4.4 `burn_and_fetch_note`. Atomic decrement-and-fetch under the
    /// row's mutex: exactly one of two concurrent callers on a 1-view note
    /// observes `views_left > 0` before decrementing.
    pub fn burn_and_fetch_note(&self, id: Uuid, now: DateTime<Utc>) -> CoreResult<(Vec<u8>, [u8; IV_LEN])> {
        let row = self.notes.get(&id).ok_or(CoreError::Gone)?;
        let mut views_left = row.views_left.lock().unwrap();
        if now > row.record.expires_at || *views_left == 0 {
            return Err(CoreError::Gone);
        }
        *views_left -= 1;
        let result = (row.record.ciphertext.clone(), row.record.iv);
        let exhausted = *views_left == 0;
        drop(views_left);
        drop(row);
        if exhausted {
            self.notes.remove(&id);
        }
        Ok(result)
    }

    // ---- Files: whole-file create ---------------------------------------

    /// §4.4 `create_file_whole`. Writes the blob under a fresh path first;
    /// on metadata-row failure (none of our in-process failure modes can
    /// actually trigger this, but the shape matches the spec's compensating
    /// action) the blob is removed.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_file_whole(
        &self,
        file_name: String,
        size_bytes: u64,
        iv_base: [u8; IV_LEN],
        ciphertext: Vec<u8>,
        passphrase: Option<PassphraseFields>,
        encrypted_filename: Option<Vec<u8>>,
        filename_iv: Option<[u8; IV_LEN]>,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> CoreResult<Uuid> {
        let id = Uuid::new_v4();
        let storage_path = format!("{id}.bin");
        self.blobs
            .put(&storage_path, ciphertext)
            .await
            .map_err(|e| CoreError::Infrastructure(e.to_string()))?;

        let record = FileRecord {
            id,
            created_at: now,
            expires_at,
            passphrase,
            file_name,
            size_bytes,
            chunk_bytes: 0,
            total_chunks: 1,
            iv_base: Some(iv_base),
            storage_path: storage_path.clone(),
            encrypted_filename,
            filename_iv,
            uploaded_chunks: BTreeSet::new(),
        };
        self.files.insert(
            id,
            FileRow {
                record: Mutex::new(record),
            },
        );
        Ok(id)
    }

    // ---- Files: chunked upload -------------------------------------------

    /// §4.4 `init_chunked_upload`. `storage_path` is the file id itself
    /// (directory prefix); `iv_base` is unset until chunk 0 lands.
    #[allow(clippy::too_many_arguments)]
    pub fn init_chunked_upload(
        &self,
        file_name: String,
        size_bytes: u64,
        chunk_bytes: u32,
        total_chunks: u32,
        passphrase: Option<PassphraseFields>,
        encrypted_filename: Option<Vec<u8>>,
        filename_iv: Option<[u8; IV_LEN]>,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> CoreResult<Uuid> {
        if total_chunks < 2 {
            return Err(CoreError::Validation(
                "chunked upload requires total_chunks > 1".into(),
            ));
        }
        let id = Uuid::new_v4();
        let record = FileRecord {
            id,
            created_at: now,
            expires_at,
            passphrase,
            file_name,
            size_bytes,
            chunk_bytes,
            total_chunks,
            iv_base: None,
            storage_path: id.to_string(),
            encrypted_filename,
            filename_iv,
            uploaded_chunks: BTreeSet::new(),
        };
        self.files.insert(
            id,
            FileRow {
                record: Mutex::new(record),
            },
        );
        Ok(id)
    }

    /// §4.4 `upload_chunk`. Validates bounds and expiry; sets `iv_base`
    /// atomically on index 0; idempotent on re-upload of an existing chunk.
    pub async fn upload_chunk(
        &self,
        file_id: Uuid,
        index: u32,
        total: u32,
        bytes: Vec<u8>,
        iv_base_if_first: Option<[u8; IV_LEN]>,
        now: DateTime<Utc>,
    ) -> CoreResult<ChunkUploadOutcome> {
        let storage_path = {
            let row = self.files.get(&file_id).ok_or(CoreError::Gone)?;
            let mut record = row.record.lock().unwrap();
            if now > record.expires_at {
                return Err(CoreError::Gone);
            }
            if total != record.total_chunks || index >= total {
                return Err(CoreError::Validation(
                    "chunk index/total out of bounds".into(),
                ));
            }
            if index == 0 {
                if let Some(iv_base) = iv_base_if_first {
                    record.iv_base.get_or_insert(iv_base);
                }
            }
            record.storage_path.clone()
            // `row` (the DashMap shard read-guard) drops here, before the
            // blob I/O suspension point below — holding it across an await
            // would block a writer (init_chunked_upload/sweep_expired) on
            // the same shard for the duration of the I/O (§5).
        };
        let part_path = format!("{storage_path}/part-{index:05}");
        let wrote = self
            .blobs
            .put_if_absent(&part_path, bytes)
            .await
            .map_err(|e| CoreError::Infrastructure(e.to_string()))?;
        {
            let row = self.files.get(&file_id).ok_or(CoreError::Gone)?;
            let mut record = row.record.lock().unwrap();
            record.uploaded_chunks.insert(index);
        }
        Ok(if wrote {
            ChunkUploadOutcome::Ok
        } else {
            ChunkUploadOutcome::AlreadyExists
        })
    }

    // ---- Files: metadata + tokens -----------------------------------------

    /// §4.4 `get_file_meta`. Mints a fresh download token: single-use
    /// (5 min) for whole files, multi-use (10 min) for chunked ones.
    pub fn get_file_meta(&self, id: Uuid, now: DateTime<Utc>) -> CoreResult<FileMeta> {
        let row = self.files.get(&id).ok_or(CoreError::Gone)?;
        let record = row.record.lock().unwrap();
        if now > record.expires_at {
            return Err(CoreError::Gone);
        }
        let iv_base = record.iv_base.ok_or(CoreError::Gone)?;
        let is_multi_use = record.mode() == FileMode::Chunked;
        let ttl = if is_multi_use {
            Duration::seconds(MULTI_USE_TOKEN_TTL_SECS)
        } else {
            Duration::seconds(SINGLE_USE_TOKEN_TTL_SECS)
        };
        let token_expires_at = now + ttl;
        let token = crate::codec::encode(&crate::codec::random(32));
        self.tokens.insert(
            token.clone(),
            TokenRow {
                token: Mutex::new(DownloadToken {
                    token: token.clone(),
                    file_id: id,
                    created_at: now,
                    expires_at: token_expires_at,
                    used: false,
                    is_multi_use,
                }),
            },
        );
        Ok(FileMeta {
            file_name: record.file_name.clone(),
            iv_base,
            total_chunks: record.total_chunks,
            passphrase: record.passphrase.as_ref().map(|f| PassphraseMeta {
                validation_salt: f.validation_salt,
                encryption_salt: f.encryption_salt,
                kdf_iterations: f.kdf_iterations,
            }),
            download_token: token,
            token_expires_at,
        })
    }

    /// §4.4 `validate_file_passphrase`.
    pub fn validate_file_passphrase(&self, id: Uuid, provided_hash: &[u8; 32], now: DateTime<Utc>) -> bool {
        let Some(row) = self.files.get(&id) else {
            return false;
        };
        let record = row.record.lock().unwrap();
        if now > record.expires_at {
            return false;
        }
        match &record.passphrase {
            Some(fields) => crate::kdf::hashes_match(provided_hash, &fields.passphrase_hash),
            None => false,
        }
    }

    fn validate_and_consume_token(
        &self,
        token: &str,
        file_id: Uuid,
        consume: bool,
        now: DateTime<Utc>,
    ) -> CoreResult<()> {
        let token_row = self.tokens.get(token).ok_or(CoreError::Unauthorized)?;
        let mut token_rec = token_row.token.lock().unwrap();
        if token_rec.file_id != file_id || !token_rec.is_live(now) {
            return Err(CoreError::Unauthorized);
        }
        if consume {
            token_rec.used = true;
        }
        Ok(())
    }

    /// §4.4 `download_whole`. Atomically consumes a single-use token, then
    /// removes the blob, then deletes the metadata row. Also returns the
    /// sender-chosen display name (real or placeholder — never the
    /// encrypted original filename) for the `Content-Disposition` header.
    pub async fn download_whole(&self, id: Uuid, token: &str, now: DateTime<Utc>) -> CoreResult<(Vec<u8>, String)> {
        let row = self.files.get(&id).ok_or(CoreError::Gone)?;
        let expires_at = row.record.lock().unwrap().expires_at;
        if now > expires_at {
            return Err(CoreError::Gone);
        }
        self.validate_and_consume_token(token, id, true, now)?;
        let (storage_path, file_name) = {
            let record = row.record.lock().unwrap();
            (record.storage_path.clone(), record.file_name.clone())
        };
        drop(row);

        let bytes = self
            .blobs
            .get(&storage_path)
            .await
            .map_err(|e| CoreError::Infrastructure(e.to_string()))?;
        // §7: blob-delete failures after a successful return are swallowed —
        // the sweeper reclaims the orphan later.
        let _ = self.blobs.delete(&storage_path).await;
        self.files.remove(&id);
        Ok((bytes, file_name))
    }

    /// §4.4 `download_chunk`. Validates the multi-use token without
    /// consuming it; deletes nothing.
    pub async fn download_chunk(
        &self,
        file_id: Uuid,
        index: u32,
        token: &str,
        now: DateTime<Utc>,
    ) -> CoreResult<Vec<u8>> {
        let row = self.files.get(&file_id).ok_or(CoreError::Gone)?;
        let (expires_at, storage_path) = {
            let record = row.record.lock().unwrap();
            (record.expires_at, record.storage_path.clone())
        };
        if now > expires_at {
            return Err(CoreError::Gone);
        }
        self.validate_and_consume_token(token, file_id, false, now)?;
        drop(row);
        let part_path = format!("{storage_path}/part-{index:05}");
        self.blobs
            .get(&part_path)
            .await
            .map_err(|_| CoreError::Gone)
    }

    /// §4.4 `finalize_chunked`. Under the token lock: verify live, mark
    /// used, drop the metadata row and all token rows for this file, and
    /// report `total_chunks` so the caller removes the blob directory.
    /// Re-invocation (or a race with the expiry sweeper) is harmless and
    /// reported as `AlreadyFinalized`, never an error (§9 open question).
    pub async fn finalize_chunked(&self, file_id: Uuid, token: &str, now: DateTime<Utc>) -> FinalizeOutcome {
        let Some(token_row) = self.tokens.get(token) else {
            return FinalizeOutcome::AlreadyFinalized;
        };
        let mut token_rec = token_row.token.lock().unwrap();
        if token_rec.file_id != file_id || !token_rec.is_live(now) {
            return FinalizeOutcome::AlreadyFinalized;
        }
        token_rec.used = true;
        drop(token_rec);
        drop(token_row);

        let Some((_, row)) = self.files.remove(&file_id) else {
            return FinalizeOutcome::AlreadyFinalized;
        };
        let total_chunks = row.record.lock().unwrap().total_chunks;
        self.tokens.retain(|_, row| row.token.lock().unwrap().file_id != file_id);
        FinalizeOutcome::Ok { total_chunks }
    }

    /// §4.4 `sweep_expired`. Deletes expired note/file/token rows; blob
    /// removal for the reported file storage paths is the caller's job
    /// (this keeps the store free of any assumption about the blob
    /// backend's latency).
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();

        let expired_notes: Vec<Uuid> = self
            .notes
            .iter()
            .filter(|row| now > row.record.expires_at || *row.views_left.lock().unwrap() == 0)
            .map(|row| row.record.id)
            .collect();
        for id in expired_notes {
            if self.notes.remove(&id).is_some() {
                report.notes_reclaimed += 1;
            }
        }

        let expired_files: Vec<(Uuid, String, FileMode)> = self
            .files
            .iter()
            .filter(|row| now > row.record.lock().unwrap().expires_at)
            .map(|row| {
                let record = row.record.lock().unwrap();
                (record.id, record.storage_path.clone(), record.mode())
            })
            .collect();
        for (id, storage_path, mode) in expired_files {
            if self.files.remove(&id).is_some() {
                report.files_reclaimed += 1;
                report.file_storage_paths.push((storage_path, mode));
            }
        }

        let expired_tokens: Vec<String> = self
            .tokens
            .iter()
            .filter(|row| now > row.token.lock().unwrap().expires_at)
            .map(|row| row.token.lock().unwrap().token.clone())
            .collect();
        for token in expired_tokens {
            if self.tokens.remove(&token).is_some() {
                report.tokens_reclaimed += 1;
            }
        }

        report
    }

    pub fn blobs(&self) -> &dyn blob::BlobStore {
        self.blobs.as_ref()
    }
}
