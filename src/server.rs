//! HTTP surface (§6.1). Thin request handling composing C2–C5 into the
//! endpoints below; this module never calls `crypto::encrypt_*` /
//! `decrypt_*` itself — it only ever moves ciphertext and public parameters
//! between the client and the `BurnStore`.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Multipart, Path, Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::{Router, extract::Request};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Notify;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::codec::{self, IV_LEN};
use crate::config::ServiceConfig;
use crate::error::{CoreError, CoreResult};
use crate::kdf;
use crate::ratelimiter::{self, RateLimiter};
use crate::store::models::{PassphraseFields, parse_canonical_uuid};
use crate::store::{BurnStore, FinalizeOutcome};

pub struct AppState {
    pub store: Arc<BurnStore>,
    pub limiter: Arc<RateLimiter>,
    pub config: Arc<ServiceConfig>,
    pub shutdown: Arc<Notify>,
}

pub fn router(state: Arc<AppState>) -> Router {
    // Defense in depth alongside the explicit `max_file_bytes` checks in
    // `try_files_upload`/`try_files_init_chunked`: reject an oversized body
    // before it is even buffered into multipart fields. The margin covers
    // the handful of small metadata fields (file_name, iv_base, ...) that
    // ride alongside the ciphertext in the same multipart body.
    let body_limit = state.config.max_file_bytes as usize + 64 * 1024;

    Router::new()
        .route("/api/notes", post(create_note))
        .route("/api/notes/{id}/meta", get(note_meta))
        .route(
            "/api/notes/{id}/validate-passphrase",
            post(note_validate_passphrase),
        )
        .route("/api/notes/{id}/fetch", post(note_fetch))
        .route("/api/files/upload", post(files_upload))
        .route("/api/files/init-chunked", post(files_init_chunked))
        .route("/api/files/chunk", post(files_chunk_upload).get(files_chunk_download))
        .route("/api/files/{id}/meta", get(file_meta))
        .route(
            "/api/files/{id}/validate-passphrase",
            post(file_validate_passphrase),
        )
        .route("/api/files/{id}/download", post(file_download))
        .route("/api/files/{id}/finalize", post(file_finalize))
        .layer(middleware::from_fn(same_origin_guard))
        .layer(middleware::from_fn(security_headers))
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─── Middleware ──────────────────────────────────────────────────────────

/// Generalization of the teacher's `security_headers` middleware: drop the
/// WASM-specific CSP directive (no embedded browser bundle in this build)
/// but keep the same defensive header set.
async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert("X-Frame-Options", HeaderValue::from_static("DENY"));
    headers.insert("X-Content-Type-Options", HeaderValue::from_static("nosniff"));
    headers.insert("Referrer-Policy", HeaderValue::from_static("no-referrer"));
    headers.insert(
        "Permissions-Policy",
        HeaderValue::from_static("camera=(), microphone=(), geolocation=()"),
    );
    headers.insert(
        "Content-Security-Policy",
        HeaderValue::from_static("default-src 'none'; frame-ancestors 'none';"),
    );
    response
}

/// §6.1: "All state-changing endpoints require a same-origin request
/// (verified by `Origin` / `Referer` / `Sec-Fetch-Site`); cross-origin POSTs
/// are refused with 403."
async fn same_origin_guard(request: Request, next: Next) -> Response {
    if request.method() == axum::http::Method::POST && !is_same_origin(request.headers()) {
        return (StatusCode::FORBIDDEN, "cross-origin request refused").into_response();
    }
    next.run(request).await
}

fn is_same_origin(headers: &HeaderMap) -> bool {
    if let Some(site) = headers.get("Sec-Fetch-Site").and_then(|v| v.to_str().ok()) {
        return site == "same-origin" || site == "none";
    }
    let host = headers.get(header::HOST).and_then(|v| v.to_str().ok());
    let Some(host) = host else { return true };
    let origin_host = headers
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.rsplit('/').next());
    match origin_host {
        Some(origin_host) => origin_host == host,
        // No Origin header at all (e.g. a same-origin plain form POST in
        // older browsers) — nothing to contradict same-origin with.
        None => true,
    }
}

/// Endpoint rate limits, §6.1's "Rate limit (per IP/min)" column. Endpoints
/// marked `n/a` there (chunk download, file meta, finalize) are token-gated
/// instead and have no `Endpoint` variant — they never call
/// `enforce_rate_limit`.
enum Endpoint {
    NotesCreate,
    NotesMeta,
    NotesValidatePassphrase,
    NotesFetch,
    FilesUpload,
    FilesInitChunked,
    FilesChunkUpload,
    FilesValidatePassphrase,
    FilesDownload,
}

impl Endpoint {
    fn key(&self) -> &'static str {
        match self {
            Endpoint::NotesCreate => "notes:create",
            Endpoint::NotesMeta => "notes:meta",
            Endpoint::NotesValidatePassphrase => "notes:validate",
            Endpoint::NotesFetch => "notes:fetch",
            Endpoint::FilesUpload => "files:upload",
            Endpoint::FilesInitChunked => "files:init-chunked",
            Endpoint::FilesChunkUpload => "files:chunk-upload",
            Endpoint::FilesValidatePassphrase => "files:validate",
            Endpoint::FilesDownload => "files:download",
        }
    }

    fn max_per_minute(&self) -> u32 {
        match self {
            Endpoint::NotesCreate => 10,
            Endpoint::NotesMeta => 30,
            Endpoint::NotesValidatePassphrase => 30,
            Endpoint::NotesFetch => 30,
            Endpoint::FilesUpload => 20,
            Endpoint::FilesInitChunked => 50,
            Endpoint::FilesChunkUpload => 100,
            Endpoint::FilesValidatePassphrase => 200,
            Endpoint::FilesDownload => 200,
        }
    }
}

fn enforce_rate_limit(state: &AppState, endpoint: Endpoint, headers: &HeaderMap) -> Result<(), Response> {
    let ip = ratelimiter::client_ip(headers);
    let key = format!("{}:{ip}", endpoint.key());
    let decision = state
        .limiter
        .check(&key, Duration::minutes(1), endpoint.max_per_minute(), Utc::now());
    if decision.admitted {
        return Ok(());
    }
    Err(CoreError::RateLimited {
        retry_after_secs: decision.retry_after_secs,
    }
    .into_response())
}

fn no_store(mut response: Response) -> Response {
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

fn require_uuid(id: &str) -> CoreResult<Uuid> {
    parse_canonical_uuid(id).ok_or_else(|| CoreError::Validation("malformed id".into()))
}

fn decode_b64u(field: &str, value: &str) -> CoreResult<Vec<u8>> {
    codec::decode(value).map_err(|e| CoreError::Validation(format!("invalid {field}: {e}")))
}

fn decode_fixed<const N: usize>(field: &str, value: &str) -> CoreResult<[u8; N]> {
    let bytes = decode_b64u(field, value)?;
    if bytes.len() != N {
        return Err(CoreError::Validation(format!(
            "{field} must decode to {N} bytes, got {}",
            bytes.len()
        )));
    }
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes);
    Ok(out)
}

// ─── DTOs ────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct PassphraseFieldsDto {
    encryption_salt: String,
    validation_salt: String,
    kdf_iterations: u32,
    passphrase_hash: String,
}

impl PassphraseFieldsDto {
    fn into_fields(self) -> CoreResult<PassphraseFields> {
        let encryption_salt = decode_fixed("encryption_salt", &self.encryption_salt)?;
        let validation_salt = decode_fixed("validation_salt", &self.validation_salt)?;
        if encryption_salt == validation_salt {
            return Err(CoreError::Validation(
                "encryption_salt and validation_salt must differ".into(),
            ));
        }
        if self.kdf_iterations < kdf::DEFAULT_ITERATIONS {
            return Err(CoreError::Validation(format!(
                "kdf_iterations must be at least {}",
                kdf::DEFAULT_ITERATIONS
            )));
        }
        Ok(PassphraseFields {
            encryption_salt,
            validation_salt,
            kdf_iterations: self.kdf_iterations,
            passphrase_hash: decode_fixed("passphrase_hash", &self.passphrase_hash)?,
        })
    }
}

#[derive(Serialize)]
struct PassphraseMetaDto {
    validation_salt: String,
    encryption_salt: String,
    kdf_iterations: u32,
}

impl From<crate::store::PassphraseMeta> for PassphraseMetaDto {
    fn from(meta: crate::store::PassphraseMeta) -> Self {
        Self {
            validation_salt: codec::encode(&meta.validation_salt),
            encryption_salt: codec::encode(&meta.encryption_salt),
            kdf_iterations: meta.kdf_iterations,
        }
    }
}

#[derive(Deserialize)]
struct CreateNoteRequest {
    ciphertext: String,
    iv: String,
    expires_in: String,
    views: u32,
    passphrase: Option<PassphraseFieldsDto>,
}

#[derive(Deserialize)]
struct ValidatePassphraseRequest {
    passphrase_hash: String,
}

#[derive(Deserialize)]
struct FileDownloadRequest {
    download_token: String,
}

#[derive(Deserialize)]
struct FinalizeRequest {
    download_token: String,
}

// ─── Note handlers ────────────────────────────────────────────────────────

async fn create_note(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreateNoteRequest>,
) -> Response {
    if let Err(resp) = enforce_rate_limit(&state, Endpoint::NotesCreate, &headers) {
        return resp;
    }
    match try_create_note(&state, req) {
        Ok(id) => no_store(Json(json!({ "id": id })).into_response()),
        Err(e) => no_store(e.into_response()),
    }
}

fn try_create_note(state: &AppState, req: CreateNoteRequest) -> CoreResult<Uuid> {
    let ciphertext = decode_b64u("ciphertext", &req.ciphertext)?;
    let iv = decode_fixed("iv", &req.iv)?;
    let expiry = crate::config::parse_duration(&req.expires_in)
        .map_err(|e| CoreError::Validation(e.to_string()))?;
    let passphrase = req.passphrase.map(PassphraseFieldsDto::into_fields).transpose()?;
    let now = Utc::now();
    state.store.create_note(
        ciphertext,
        iv,
        now + expiry,
        req.views,
        passphrase,
        now,
        state.config.max_expiry,
    )
}

async fn note_meta(State(state): State<Arc<AppState>>, Path(id): Path<String>, headers: HeaderMap) -> Response {
    if let Err(resp) = enforce_rate_limit(&state, Endpoint::NotesMeta, &headers) {
        return resp;
    }
    let result = (|| -> CoreResult<PassphraseMetaDto> {
        let id = require_uuid(&id)?;
        Ok(state.store.get_note_meta(id, Utc::now())?.into())
    })();
    match result {
        Ok(meta) => no_store(Json(meta).into_response()),
        Err(e) => no_store(e.into_response()),
    }
}

async fn note_validate_passphrase(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<ValidatePassphraseRequest>,
) -> Response {
    if let Err(resp) = enforce_rate_limit(&state, Endpoint::NotesValidatePassphrase, &headers) {
        return resp;
    }
    let result = (|| -> CoreResult<bool> {
        let id = require_uuid(&id)?;
        let hash = decode_fixed("passphrase_hash", &req.passphrase_hash)?;
        Ok(state.store.validate_note_passphrase(id, &hash, Utc::now()))
    })();
    match result {
        Ok(valid) => no_store(Json(json!({ "valid": valid })).into_response()),
        Err(e) => no_store(e.into_response()),
    }
}

async fn note_fetch(State(state): State<Arc<AppState>>, Path(id): Path<String>, headers: HeaderMap) -> Response {
    if let Err(resp) = enforce_rate_limit(&state, Endpoint::NotesFetch, &headers) {
        return resp;
    }
    let result = (|| -> CoreResult<(Vec<u8>, [u8; IV_LEN])> {
        let id = require_uuid(&id)?;
        state.store.burn_and_fetch_note(id, Utc::now())
    })();
    match result {
        Ok((ciphertext, iv)) => no_store(
            Json(json!({
                "ciphertext": codec::encode(&ciphertext),
                "iv": codec::encode(&iv),
            }))
            .into_response(),
        ),
        Err(e) => no_store(e.into_response()),
    }
}

// ─── Multipart helpers ─────────────────────────────────────────────────────

async fn collect_multipart(mut multipart: Multipart) -> CoreResult<HashMap<String, Vec<u8>>> {
    let mut fields = HashMap::new();
    loop {
        let next = multipart
            .next_field()
            .await
            .map_err(|e| CoreError::Validation(format!("malformed multipart body: {e}")))?;
        let Some(field) = next else { break };
        let Some(name) = field.name().map(|s| s.to_string()) else {
            continue;
        };
        let bytes = field
            .bytes()
            .await
            .map_err(|e| CoreError::Validation(format!("malformed multipart field {name}: {e}")))?;
        fields.insert(name, bytes.to_vec());
    }
    Ok(fields)
}

fn required_field<'a>(fields: &'a HashMap<String, Vec<u8>>, name: &str) -> CoreResult<&'a [u8]> {
    fields
        .get(name)
        .map(|v| v.as_slice())
        .ok_or_else(|| CoreError::Validation(format!("missing field: {name}")))
}

fn required_str<'a>(fields: &'a HashMap<String, Vec<u8>>, name: &str) -> CoreResult<&'a str> {
    std::str::from_utf8(required_field(fields, name)?)
        .map_err(|_| CoreError::Validation(format!("field {name} is not valid utf-8")))
}

fn required_u32(fields: &HashMap<String, Vec<u8>>, name: &str) -> CoreResult<u32> {
    required_str(fields, name)?
        .parse()
        .map_err(|_| CoreError::Validation(format!("field {name} must be an integer")))
}

fn required_u64(fields: &HashMap<String, Vec<u8>>, name: &str) -> CoreResult<u64> {
    required_str(fields, name)?
        .parse()
        .map_err(|_| CoreError::Validation(format!("field {name} must be an integer")))
}

// ─── File handlers ──────────────────────────────────────────────────────────

async fn files_upload(State(state): State<Arc<AppState>>, headers: HeaderMap, multipart: Multipart) -> Response {
    if let Err(resp) = enforce_rate_limit(&state, Endpoint::FilesUpload, &headers) {
        return resp;
    }
    let result = try_files_upload(&state, multipart).await;
    match result {
        Ok(response) => no_store(response),
        Err(e) => no_store(e.into_response()),
    }
}

async fn try_files_upload(state: &AppState, multipart: Multipart) -> CoreResult<Response> {
    let fields = collect_multipart(multipart).await?;
    let ciphertext = required_field(&fields, "ciphertext")?.to_vec();
    if ciphertext.len() as u64 > state.config.max_file_bytes {
        return Err(CoreError::Validation("file exceeds the configured size ceiling".into()));
    }
    let iv_base = decode_fixed("iv_base", required_str(&fields, "iv_base")?)?;
    let file_name = required_str(&fields, "file_name")?.to_string();
    let size_bytes = required_u64(&fields, "size_bytes")?;
    let expiry = crate::config::parse_duration(required_str(&fields, "expires_in")?)
        .map_err(|e| CoreError::Validation(e.to_string()))?;
    let passphrase = optional_passphrase_fields(&fields)?;
    let encrypted_filename = fields.get("encrypted_filename").map(|b| b.clone());
    let filename_iv = fields
        .get("filename_iv")
        .map(|b| decode_fixed::<IV_LEN>("filename_iv", std::str::from_utf8(b).unwrap_or_default()))
        .transpose()?;

    let now = Utc::now();
    let id = state
        .store
        .create_file_whole(
            file_name,
            size_bytes,
            iv_base,
            ciphertext,
            passphrase,
            encrypted_filename,
            filename_iv,
            now + expiry,
            now,
        )
        .await?;
    let storage_path = format!("{id}.bin");
    Ok(Json(json!({ "id": id, "storage_path": storage_path })).into_response())
}

fn optional_passphrase_fields(fields: &HashMap<String, Vec<u8>>) -> CoreResult<Option<PassphraseFields>> {
    if !fields.contains_key("passphrase_hash") {
        return Ok(None);
    }
    let encryption_salt = decode_fixed("encryption_salt", required_str(fields, "encryption_salt")?)?;
    let validation_salt = decode_fixed("validation_salt", required_str(fields, "validation_salt")?)?;
    if encryption_salt == validation_salt {
        return Err(CoreError::Validation(
            "encryption_salt and validation_salt must differ".into(),
        ));
    }
    let kdf_iterations = required_u32(fields, "kdf_iterations")?;
    if kdf_iterations < kdf::DEFAULT_ITERATIONS {
        return Err(CoreError::Validation(format!(
            "kdf_iterations must be at least {}",
            kdf::DEFAULT_ITERATIONS
        )));
    }
    let passphrase_hash = decode_fixed("passphrase_hash", required_str(fields, "passphrase_hash")?)?;
    Ok(Some(PassphraseFields {
        encryption_salt,
        validation_salt,
        kdf_iterations,
        passphrase_hash,
    }))
}

async fn files_init_chunked(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Response {
    if let Err(resp) = enforce_rate_limit(&state, Endpoint::FilesInitChunked, &headers) {
        return resp;
    }
    let result = try_files_init_chunked(&state, multipart).await;
    match result {
        Ok(response) => no_store(response),
        Err(e) => no_store(e.into_response()),
    }
}

async fn try_files_init_chunked(state: &AppState, multipart: Multipart) -> CoreResult<Response> {
    let fields = collect_multipart(multipart).await?;
    let file_name = required_str(&fields, "file_name")?.to_string();
    let size_bytes = required_u64(&fields, "size_bytes")?;
    if size_bytes > state.config.max_file_bytes {
        return Err(CoreError::Validation("file exceeds the configured size ceiling".into()));
    }
    let chunk_bytes = required_u32(&fields, "chunk_bytes")?;
    const MIN_CHUNK: u32 = 1024 * 1024;
    const MAX_CHUNK: u32 = 4 * 1024 * 1024;
    if !(MIN_CHUNK..=MAX_CHUNK).contains(&chunk_bytes) {
        return Err(CoreError::Validation(
            "chunk_bytes must be between 1 MiB and 4 MiB".into(),
        ));
    }
    let total_chunks = size_bytes.div_ceil(chunk_bytes as u64) as u32;
    let expiry = crate::config::parse_duration(required_str(&fields, "expires_in")?)
        .map_err(|e| CoreError::Validation(e.to_string()))?;
    let passphrase = optional_passphrase_fields(&fields)?;
    let encrypted_filename = fields.get("encrypted_filename").cloned();
    let filename_iv = fields
        .get("filename_iv")
        .map(|b| decode_fixed::<IV_LEN>("filename_iv", std::str::from_utf8(b).unwrap_or_default()))
        .transpose()?;

    let now = Utc::now();
    let id = state.store.init_chunked_upload(
        file_name,
        size_bytes,
        chunk_bytes,
        total_chunks,
        passphrase,
        encrypted_filename,
        filename_iv,
        now + expiry,
        now,
    )?;
    Ok(Json(json!({ "id": id })).into_response())
}

async fn files_chunk_upload(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Response {
    if let Err(resp) = enforce_rate_limit(&state, Endpoint::FilesChunkUpload, &headers) {
        return resp;
    }
    let result = try_files_chunk_upload(&state, multipart).await;
    match result {
        Ok(response) => no_store(response),
        Err(e) => no_store(e.into_response()),
    }
}

async fn try_files_chunk_upload(state: &AppState, multipart: Multipart) -> CoreResult<Response> {
    let fields = collect_multipart(multipart).await?;
    let file_id = require_uuid(required_str(&fields, "fileId")?)?;
    let index = required_u32(&fields, "index")?;
    let total = required_u32(&fields, "total")?;
    let chunk = required_field(&fields, "chunk")?.to_vec();
    const MAX_CHUNK: usize = 4 * 1024 * 1024;
    if chunk.len() > MAX_CHUNK {
        return Err(CoreError::Validation("chunk body exceeds 4 MiB".into()));
    }
    let iv_base = fields
        .get("iv_base_b64u")
        .map(|b| decode_fixed::<IV_LEN>("iv_base_b64u", std::str::from_utf8(b).unwrap_or_default()))
        .transpose()?;

    // Idempotent create-or-fail (§5): both outcomes report success to the
    // caller, which is free to retry a chunk without checking which it got.
    state
        .store
        .upload_chunk(file_id, index, total, chunk, iv_base, Utc::now())
        .await?;
    Ok(Json(json!({ "ok": true })).into_response())
}

#[derive(Deserialize)]
struct ChunkDownloadParams {
    #[serde(rename = "fileId")]
    file_id: String,
    index: u32,
    #[serde(rename = "downloadToken")]
    download_token: String,
}

async fn files_chunk_download(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ChunkDownloadParams>,
) -> Response {
    let result = (|| async {
        let file_id = require_uuid(&params.file_id)?;
        state
            .store
            .download_chunk(file_id, params.index, &params.download_token, Utc::now())
            .await
    })()
    .await;
    match result {
        Ok(bytes) => no_store(
            (
                StatusCode::OK,
                [(header::CONTENT_TYPE, "application/octet-stream")],
                bytes,
            )
                .into_response(),
        ),
        Err(e) => no_store(e.into_response()),
    }
}

#[derive(Serialize)]
struct FileMetaDto {
    file_name: String,
    iv_base: String,
    total_chunks: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    passphrase: Option<PassphraseMetaDto>,
    #[serde(rename = "downloadToken")]
    download_token: String,
    #[serde(rename = "tokenExpiresAt")]
    token_expires_at: String,
}

async fn file_meta(State(state): State<Arc<AppState>>, Path(id): Path<String>, headers: HeaderMap) -> Response {
    let _ = headers; // §6.1: file meta is n/a for IP rate limiting
    let result = (|| -> CoreResult<FileMetaDto> {
        let id = require_uuid(&id)?;
        let meta = state.store.get_file_meta(id, Utc::now())?;
        Ok(FileMetaDto {
            file_name: meta.file_name,
            iv_base: codec::encode(&meta.iv_base),
            total_chunks: meta.total_chunks,
            passphrase: meta.passphrase.map(Into::into),
            download_token: meta.download_token,
            token_expires_at: meta.token_expires_at.to_rfc3339(),
        })
    })();
    match result {
        Ok(meta) => no_store(Json(meta).into_response()),
        Err(e) => no_store(e.into_response()),
    }
}

async fn file_validate_passphrase(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<ValidatePassphraseRequest>,
) -> Response {
    if let Err(resp) = enforce_rate_limit(&state, Endpoint::FilesValidatePassphrase, &headers) {
        return resp;
    }
    let result = (|| -> CoreResult<bool> {
        let id = require_uuid(&id)?;
        let hash = decode_fixed("passphrase_hash", &req.passphrase_hash)?;
        Ok(state.store.validate_file_passphrase(id, &hash, Utc::now()))
    })();
    match result {
        Ok(valid) => no_store(Json(json!({ "valid": valid })).into_response()),
        Err(e) => no_store(e.into_response()),
    }
}

async fn file_download(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<FileDownloadRequest>,
) -> Response {
    if let Err(resp) = enforce_rate_limit(&state, Endpoint::FilesDownload, &headers) {
        return resp;
    }
    let result = (|| async {
        let id = require_uuid(&id)?;
        state
            .store
            .download_whole(id, &req.download_token, Utc::now())
            .await
    })()
    .await;
    match result {
        Ok((bytes, file_name)) => {
            // `file_name` is the sender-chosen display name — the real name
            // or a generic placeholder they opted for — never the
            // server-never-decrypted `encrypted_filename` (§4.2).
            let disposition = format!(
                "attachment; filename*=UTF-8''{}",
                urlencoding::encode(&file_name)
            );
            no_store(
                (
                    StatusCode::OK,
                    [
                        (header::CONTENT_TYPE, "application/octet-stream".to_string()),
                        (header::CONTENT_DISPOSITION, disposition),
                    ],
                    bytes,
                )
                    .into_response(),
            )
        }
        Err(e) => no_store(e.into_response()),
    }
}

async fn file_finalize(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<FinalizeRequest>,
) -> Response {
    let _ = headers; // finalize is token-gated, not IP rate-limited (§6.1: n/a)
    let result = (|| async {
        let id = require_uuid(&id)?;
        let outcome = state
            .store
            .finalize_chunked(id, &req.download_token, Utc::now())
            .await;
        Ok::<_, CoreError>((id, outcome))
    })()
    .await;
    match result {
        Ok((id, FinalizeOutcome::Ok { total_chunks })) => {
            // `storage_path` for a chunked file is the canonical UUID string
            // itself (§6.3) — re-derive it from the parsed id rather than
            // the raw path segment, which `require_uuid` accepts case
            // insensitively but the store always wrote in canonical form.
            let storage_path = id.to_string();
            let _ = state.store.blobs().delete_prefix(&storage_path).await;
            no_store(Json(json!({ "success": true, "chunksDeleted": total_chunks })).into_response())
        }
        // §9 open question: idempotent success even if the sweeper already
        // reclaimed this file out from under a racing finalize call.
        Ok((_, FinalizeOutcome::AlreadyFinalized)) => {
            no_store(Json(json!({ "success": true, "chunksDeleted": 0 })).into_response())
        }
        Err(e) => no_store(e.into_response()),
    }
}
