//! Handler-level HTTP tests driving `cinder::server::router` with
//! `tower::ServiceExt::oneshot`, complementing the store-level tests in
//! `integrations.rs` with the HTTP dimension of §8's boundary scenarios:
//! routing, middleware, multipart parsing, and DTO validation.

use std::sync::Arc;

use axum::Router;
use axum::body::{Body, Bytes};
use axum::http::{Request, StatusCode, header};
use chrono::Duration;
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use cinder::config::ServiceConfig;
use cinder::crypto::{self, EncryptionKey};
use cinder::kdf;
use cinder::ratelimiter::RateLimiter;
use cinder::server::{self, AppState};
use cinder::store::BurnStore;
use cinder::store::blob::LocalFsBlobStore;

fn test_config() -> ServiceConfig {
    ServiceConfig {
        bind: "127.0.0.1".to_string(),
        port: 0,
        data_dir: std::path::PathBuf::from("."),
        max_file_bytes: 500 * 1024 * 1024,
        chunk_threshold_bytes: 100 * 1024 * 1024,
        max_expiry: Duration::days(60),
        kdf_iterations: kdf::DEFAULT_ITERATIONS,
    }
}

fn build_app() -> (Router, Arc<AppState>) {
    let dir = tempfile::tempdir().unwrap();
    let blobs = LocalFsBlobStore::new(dir.keep()).unwrap();
    let state = Arc::new(AppState {
        store: Arc::new(BurnStore::new(Box::new(blobs))),
        limiter: Arc::new(RateLimiter::new()),
        config: Arc::new(test_config()),
        shutdown: Arc::new(tokio::sync::Notify::new()),
    });
    let app = server::router(state.clone());
    (app, state)
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

async fn send_json(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let value = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, value)
}

async fn send_raw(app: &Router, req: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Bytes) {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, headers, bytes)
}

/// Builds a `multipart/form-data` body by hand (no client-side multipart
/// crate in the dependency tree) with a fixed boundary.
fn multipart_body(fields: &[(&str, &[u8])]) -> (String, Vec<u8>) {
    let boundary = "cinder-test-boundary".to_string();
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        body.extend_from_slice(format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes());
        body.extend_from_slice(value);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
    (boundary, body)
}

fn multipart_request(uri: &str, fields: &[(&str, &[u8])]) -> Request<Body> {
    let (boundary, body) = multipart_body(fields);
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={boundary}"))
        .body(Body::from(body))
        .unwrap()
}

// §8 boundary scenario 1: link-with-key note round trip, driven end to end
// over HTTP rather than directly against `BurnStore`.
#[tokio::test]
async fn note_round_trip_over_http_then_second_fetch_is_404() {
    let (app, _state) = build_app();
    let key = EncryptionKey::generate();
    let (iv, ciphertext) = crypto::encrypt_bytes(&key, b"over the wire");

    let create = json_request(
        "POST",
        "/api/notes",
        json!({
            "ciphertext": cinder::codec::encode(&ciphertext),
            "iv": cinder::codec::encode(&iv),
            "expires_in": "1h",
            "views": 1,
            "passphrase": null,
        }),
    );
    let (status, body) = send_json(&app, create).await;
    assert_eq!(status, StatusCode::OK);
    let id = body["id"].as_str().unwrap().to_string();

    let fetch = Request::builder()
        .method("POST")
        .uri(format!("/api/notes/{id}/fetch"))
        .body(Body::empty())
        .unwrap();
    let (status, body) = send_json(&app, fetch).await;
    assert_eq!(status, StatusCode::OK);
    let fetched_ct = cinder::codec::decode(body["ciphertext"].as_str().unwrap()).unwrap();
    let fetched_iv_raw = cinder::codec::decode(body["iv"].as_str().unwrap()).unwrap();
    let mut fetched_iv = [0u8; 12];
    fetched_iv.copy_from_slice(&fetched_iv_raw);
    let plaintext = crypto::decrypt_bytes(&key, &fetched_iv, &fetched_ct).unwrap();
    assert_eq!(plaintext, b"over the wire");

    let second_fetch = Request::builder()
        .method("POST")
        .uri(format!("/api/notes/{id}/fetch"))
        .body(Body::empty())
        .unwrap();
    let (status, _) = send_json(&app, second_fetch).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// §8 boundary scenario 2, HTTP dimension: meta -> wrong guess -> correct
// guess -> fetch, all through the passphrase endpoints.
#[tokio::test]
async fn note_passphrase_wrong_then_correct_over_http() {
    let (app, _state) = build_app();
    let iterations = kdf::DEFAULT_ITERATIONS;
    let (key, validation_hash, salts) = kdf::derive_both("correct horse", iterations);
    let (iv, ciphertext) = crypto::encrypt_bytes(&key, b"secret plans");

    let create = json_request(
        "POST",
        "/api/notes",
        json!({
            "ciphertext": cinder::codec::encode(&ciphertext),
            "iv": cinder::codec::encode(&iv),
            "expires_in": "1h",
            "views": 1,
            "passphrase": {
                "encryption_salt": cinder::codec::encode(&salts.encryption_salt),
                "validation_salt": cinder::codec::encode(&salts.validation_salt),
                "kdf_iterations": iterations,
                "passphrase_hash": cinder::codec::encode(&validation_hash),
            },
        }),
    );
    let (status, body) = send_json(&app, create).await;
    assert_eq!(status, StatusCode::OK);
    let id = body["id"].as_str().unwrap().to_string();

    let meta = Request::builder()
        .method("GET")
        .uri(format!("/api/notes/{id}/meta"))
        .body(Body::empty())
        .unwrap();
    let (status, meta_body) = send_json(&app, meta).await;
    assert_eq!(status, StatusCode::OK);
    let validation_salt_b64 = meta_body["validation_salt"].as_str().unwrap();
    let returned_iterations = meta_body["kdf_iterations"].as_u64().unwrap() as u32;
    let validation_salt_raw = cinder::codec::decode(validation_salt_b64).unwrap();
    let mut validation_salt = [0u8; 16];
    validation_salt.copy_from_slice(&validation_salt_raw);

    let wrong_hash = kdf::derive_validation_hash("wrong guess", &validation_salt, returned_iterations);
    let validate_wrong = json_request(
        "POST",
        &format!("/api/notes/{id}/validate-passphrase"),
        json!({ "passphrase_hash": cinder::codec::encode(&wrong_hash) }),
    );
    let (status, body) = send_json(&app, validate_wrong).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], false);

    let correct_hash = kdf::derive_validation_hash("correct horse", &validation_salt, returned_iterations);
    let validate_correct = json_request(
        "POST",
        &format!("/api/notes/{id}/validate-passphrase"),
        json!({ "passphrase_hash": cinder::codec::encode(&correct_hash) }),
    );
    let (status, body) = send_json(&app, validate_correct).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], true);

    let fetch = Request::builder()
        .method("POST")
        .uri(format!("/api/notes/{id}/fetch"))
        .body(Body::empty())
        .unwrap();
    let (status, body) = send_json(&app, fetch).await;
    assert_eq!(status, StatusCode::OK);
    let fetched_ct = cinder::codec::decode(body["ciphertext"].as_str().unwrap()).unwrap();
    let plaintext = crypto::decrypt_bytes(&key, &iv, &fetched_ct).unwrap();
    assert_eq!(plaintext, b"secret plans");
}

// `optional_passphrase_fields`/`PassphraseFieldsDto::into_fields` validation,
// at the HTTP layer: equal salts are rejected with 400.
#[tokio::test]
async fn create_note_rejects_equal_salts_with_400() {
    let (app, _state) = build_app();
    let salt = [9u8; 16];
    let req = json_request(
        "POST",
        "/api/notes",
        json!({
            "ciphertext": cinder::codec::encode(b"x"),
            "iv": cinder::codec::encode(&[0u8; 12]),
            "expires_in": "1h",
            "views": 1,
            "passphrase": {
                "encryption_salt": cinder::codec::encode(&salt),
                "validation_salt": cinder::codec::encode(&salt),
                "kdf_iterations": kdf::DEFAULT_ITERATIONS,
                "passphrase_hash": cinder::codec::encode(&[0u8; 32]),
            },
        }),
    );
    let (status, _) = send_json(&app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// Same DTO, HTTP layer: below-floor iteration counts are rejected with 400.
#[tokio::test]
async fn create_note_rejects_low_iterations_with_400() {
    let (app, _state) = build_app();
    let req = json_request(
        "POST",
        "/api/notes",
        json!({
            "ciphertext": cinder::codec::encode(b"x"),
            "iv": cinder::codec::encode(&[0u8; 12]),
            "expires_in": "1h",
            "views": 1,
            "passphrase": {
                "encryption_salt": cinder::codec::encode(&[1u8; 16]),
                "validation_salt": cinder::codec::encode(&[2u8; 16]),
                "kdf_iterations": 1000,
                "passphrase_hash": cinder::codec::encode(&[0u8; 32]),
            },
        }),
    );
    let (status, _) = send_json(&app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// §6.1: cross-origin POSTs are refused with 403 by `same_origin_guard`.
#[tokio::test]
async fn cross_origin_post_is_rejected_with_403() {
    let (app, _state) = build_app();
    let req = Request::builder()
        .method("POST")
        .uri("/api/notes")
        .header(header::HOST, "cinder.example")
        .header(header::ORIGIN, "https://evil.example")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            serde_json::to_vec(&json!({
                "ciphertext": cinder::codec::encode(b"x"),
                "iv": cinder::codec::encode(&[0u8; 12]),
                "expires_in": "1h",
                "views": 1,
                "passphrase": null,
            }))
            .unwrap(),
        ))
        .unwrap();
    let (status, _, _) = send_raw(&app, req).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

// `security_headers` middleware applies to every response, success or error.
#[tokio::test]
async fn security_headers_are_present_on_every_response() {
    let (app, _state) = build_app();
    let req = Request::builder()
        .method("GET")
        .uri("/api/notes/not-a-uuid/meta")
        .body(Body::empty())
        .unwrap();
    let (status, headers, _) = send_raw(&app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(headers.get("X-Frame-Options").unwrap(), "DENY");
    assert_eq!(headers.get("X-Content-Type-Options").unwrap(), "nosniff");
    assert_eq!(headers.get(header::CACHE_CONTROL).unwrap(), "no-store");
}

// §8 boundary scenario 5, HTTP dimension: whole-file upload, then two
// independently minted download tokens, where only the first can redeem.
#[tokio::test]
async fn whole_file_upload_and_token_reuse_over_http() {
    let (app, _state) = build_app();
    let key = EncryptionKey::generate();
    let (iv_base, ciphertext) = crypto::encrypt_file_whole(&key, b"the whole file, over http");

    let upload = multipart_request(
        "/api/files/upload",
        &[
            ("ciphertext", &ciphertext),
            ("iv_base", cinder::codec::encode(&iv_base).as_bytes()),
            ("file_name", b"report.pdf"),
            ("size_bytes", ciphertext.len().to_string().as_bytes()),
            ("expires_in", b"1h"),
        ],
    );
    let (status, body) = send_json(&app, upload).await;
    assert_eq!(status, StatusCode::OK);
    let id = body["id"].as_str().unwrap().to_string();

    let meta_req = |id: &str| {
        Request::builder()
            .method("GET")
            .uri(format!("/api/files/{id}/meta"))
            .body(Body::empty())
            .unwrap()
    };
    let (status, meta_a) = send_json(&app, meta_req(&id)).await;
    assert_eq!(status, StatusCode::OK);
    let (status, meta_b) = send_json(&app, meta_req(&id)).await;
    assert_eq!(status, StatusCode::OK);
    let token_a = meta_a["downloadToken"].as_str().unwrap().to_string();
    let token_b = meta_b["downloadToken"].as_str().unwrap().to_string();
    assert_ne!(token_a, token_b);

    let download_a = json_request(
        "POST",
        &format!("/api/files/{id}/download"),
        json!({ "download_token": token_a }),
    );
    let (status, headers, bytes) = send_raw(&app, download_a).await;
    assert_eq!(status, StatusCode::OK);
    assert!(
        headers
            .get(header::CONTENT_DISPOSITION)
            .unwrap()
            .to_str()
            .unwrap()
            .contains("report.pdf")
    );
    let plaintext = crypto::decrypt_file_whole(&key, &iv_base, &bytes).unwrap();
    assert_eq!(plaintext, b"the whole file, over http");

    // The file row was deleted by the first download; the second, still
    // independently-valid-looking token can no longer redeem anything.
    let download_b = json_request(
        "POST",
        &format!("/api/files/{id}/download"),
        json!({ "download_token": token_b }),
    );
    let (status, _) = send_json(&app, download_b).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// §8 boundary scenario 6, HTTP dimension: the eleventh note-create call from
// one IP within the window is refused with 429 and a `Retry-After` header.
#[tokio::test]
async fn rate_limit_fires_429_on_eleventh_note_create_over_http() {
    let (app, _state) = build_app();
    let body = || {
        json!({
            "ciphertext": cinder::codec::encode(b"x"),
            "iv": cinder::codec::encode(&[0u8; 12]),
            "expires_in": "1h",
            "views": 1,
            "passphrase": null,
        })
    };
    let with_ip = |value: Value| {
        Request::builder()
            .method("POST")
            .uri("/api/notes")
            .header(header::CONTENT_TYPE, "application/json")
            .header("X-Forwarded-For", "203.0.113.9")
            .body(Body::from(serde_json::to_vec(&value).unwrap()))
            .unwrap()
    };

    for _ in 0..10 {
        let (status, _) = send_json(&app, with_ip(body())).await;
        assert_eq!(status, StatusCode::OK);
    }
    let (status, headers, _) = send_raw(&app, with_ip(body())).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert!(headers.get("Retry-After").is_some());
}
