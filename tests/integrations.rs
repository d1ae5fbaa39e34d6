use chrono::{Duration, Utc};

use cinder::crypto::EncryptionKey;
use cinder::error::CoreError;
use cinder::kdf;
use cinder::store::blob::LocalFsBlobStore;
use cinder::store::{BurnStore, FinalizeOutcome};

fn store() -> BurnStore {
    let dir = tempfile::tempdir().unwrap();
    BurnStore::new(Box::new(LocalFsBlobStore::new(dir.keep()).unwrap()))
}

// §8 boundary scenario 1: link-with-key note round-trip.
#[test]
fn link_with_key_note_round_trip_then_second_fetch_is_gone() {
    let store = store();
    let key = EncryptionKey::generate();
    let (iv, ciphertext) = cinder::crypto::encrypt_bytes(&key, b"hello");
    let now = Utc::now();

    let id = store
        .create_note(ciphertext, iv, now + Duration::hours(1), 1, None, now, Duration::days(60))
        .unwrap();

    let (fetched_ct, fetched_iv) = store.burn_and_fetch_note(id, now).unwrap();
    let plaintext = cinder::crypto::decrypt_bytes(&key, &fetched_iv, &fetched_ct).unwrap();
    assert_eq!(plaintext, b"hello");

    assert!(matches!(store.burn_and_fetch_note(id, now), Err(CoreError::Gone)));
}

// §8 boundary scenario 2: passphrase note, wrong guess then correct guess.
#[test]
fn passphrase_note_wrong_guess_does_not_burn_then_correct_guess_burns() {
    let store = store();
    let iterations = kdf::DEFAULT_ITERATIONS;
    let (key, validation_hash, salts) = kdf::derive_both("correct horse", iterations);
    let (iv, ciphertext) = cinder::crypto::encrypt_bytes(&key, b"plans");
    let now = Utc::now();

    let passphrase = cinder::store::PassphraseFields {
        encryption_salt: salts.encryption_salt,
        validation_salt: salts.validation_salt,
        kdf_iterations: iterations,
        passphrase_hash: validation_hash,
    };
    let id = store
        .create_note(ciphertext, iv, now + Duration::hours(1), 1, Some(passphrase), now, Duration::days(60))
        .unwrap();

    let wrong_hash = kdf::derive_validation_hash("wrong guess", &salts.validation_salt, iterations);
    assert!(!store.validate_note_passphrase(id, &wrong_hash, now));

    // views_left is unaffected by a wrong guess: the note is still fetchable.
    let correct_hash = kdf::derive_validation_hash("correct horse", &salts.validation_salt, iterations);
    assert!(store.validate_note_passphrase(id, &correct_hash, now));

    let (fetched_ct, fetched_iv) = store.burn_and_fetch_note(id, now).unwrap();
    let plaintext = cinder::crypto::decrypt_bytes(&key, &fetched_iv, &fetched_ct).unwrap();
    assert_eq!(plaintext, b"plans");
}

// §8 boundary scenario 3 (integrity half) + scenario 4 (reorder attack).
#[tokio::test]
async fn chunked_file_round_trips_and_detects_corruption_and_reorder() {
    let store = store();
    let key = EncryptionKey::generate();
    let plaintext: Vec<u8> = (0..10 * 1024 * 1024u32).map(|n| (n % 251) as u8).collect();
    let chunk_size = 2 * 1024 * 1024usize;
    let now = Utc::now();

    let mut ciphertexts: Vec<Vec<u8>> = Vec::new();
    let iv_base = cinder::crypto::encrypt_file_chunked(&key, &plaintext, chunk_size, |_, ct| {
        ciphertexts.push(ct);
    });
    let total = ciphertexts.len() as u32;
    assert_eq!(total, 5);

    let id = store
        .init_chunked_upload(
            "plans.bin".to_string(),
            plaintext.len() as u64,
            chunk_size as u32,
            total,
            None,
            None,
            None,
            now + Duration::hours(1),
            now,
        )
        .unwrap();

    for (index, ct) in ciphertexts.iter().enumerate() {
        let iv_base_if_first = if index == 0 { Some(iv_base) } else { None };
        store
            .upload_chunk(id, index as u32, total, ct.clone(), iv_base_if_first, now)
            .await
            .unwrap();
    }

    let meta = store.get_file_meta(id, now).unwrap();
    assert_eq!(meta.total_chunks, total);
    assert_eq!(meta.iv_base, iv_base);

    let mut fetched = Vec::new();
    for index in 0..total {
        let bytes = store
            .download_chunk(id, index, &meta.download_token, now)
            .await
            .unwrap();
        fetched.push(bytes);
    }
    let decrypted = cinder::crypto::decrypt_file_chunked(&key, &iv_base, total, |i| {
        Ok(fetched[i as usize].clone())
    })
    .unwrap();
    assert_eq!(decrypted, plaintext);

    // Corrupt a single byte of chunk 2's ciphertext: decryption must fail.
    let mut corrupted = fetched.clone();
    corrupted[2][0] ^= 0xff;
    let result = cinder::crypto::decrypt_file_chunked(&key, &iv_base, total, |i| {
        Ok(corrupted[i as usize].clone())
    });
    assert!(matches!(result, Err(CoreError::AuthFailure)));

    // Reorder attack: swap chunk 0 and chunk 2's bytes. The AAD embeds the
    // true index, so decryption of position 0 with chunk 2's ciphertext
    // fails authentication rather than silently splicing content.
    let mut reordered = fetched.clone();
    reordered.swap(0, 2);
    let result = cinder::crypto::decrypt_file_chunked(&key, &iv_base, total, |i| {
        Ok(reordered[i as usize].clone())
    });
    assert!(matches!(result, Err(CoreError::AuthFailure)));
}

// §8 boundary scenario 5: token reuse — two meta calls mint two distinct
// tokens; the first download consumes its token, the second token is then
// unusable because the file row (and its tokens) are already gone.
#[tokio::test]
async fn whole_file_token_reuse_second_token_fails_after_first_download() {
    let store = store();
    let key = EncryptionKey::generate();
    let (iv_base, ciphertext) = cinder::crypto::encrypt_file_whole(&key, b"the whole file");
    let now = Utc::now();

    let id = store
        .create_file_whole(
            "report.pdf".to_string(),
            ciphertext.len() as u64,
            iv_base,
            ciphertext,
            None,
            None,
            None,
            now + Duration::hours(1),
            now,
        )
        .await
        .unwrap();

    let meta_a = store.get_file_meta(id, now).unwrap();
    let meta_b = store.get_file_meta(id, now).unwrap();
    assert_ne!(meta_a.download_token, meta_b.download_token);

    let (bytes, file_name) = store.download_whole(id, &meta_a.download_token, now).await.unwrap();
    assert_eq!(file_name, "report.pdf");
    let plaintext = cinder::crypto::decrypt_file_whole(&key, &iv_base, &bytes).unwrap();
    assert_eq!(plaintext, b"the whole file");

    // The file row is gone now; token B (minted for the same, now-deleted
    // file) can no longer succeed.
    assert!(matches!(
        store.download_whole(id, &meta_b.download_token, now).await,
        Err(CoreError::Gone)
    ));
}

// §8 invariant: exactly one of N concurrent single-view burns succeeds.
#[test]
fn concurrent_burns_on_one_view_note_yield_exactly_one_success() {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    let store = Arc::new(store());
    let key = EncryptionKey::generate();
    let (iv, ciphertext) = cinder::crypto::encrypt_bytes(&key, b"race");
    let now = Utc::now();
    let id = store
        .create_note(ciphertext, iv, now + Duration::hours(1), 1, None, now, Duration::days(60))
        .unwrap();

    let successes = Arc::new(AtomicU32::new(0));
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let store = store.clone();
            let successes = successes.clone();
            std::thread::spawn(move || {
                if store.burn_and_fetch_note(id, now).is_ok() {
                    successes.fetch_add(1, Ordering::SeqCst);
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(successes.load(Ordering::SeqCst), 1);
}

// §9: finalize is idempotent, including the race against the sweeper
// already having reclaimed the file.
#[tokio::test]
async fn finalize_chunked_is_idempotent_across_repeated_calls() {
    let store = store();
    let now = Utc::now();
    let id = store
        .init_chunked_upload(
            "big.bin".to_string(),
            4 * 1024 * 1024,
            2 * 1024 * 1024,
            2,
            None,
            None,
            None,
            now + Duration::hours(1),
            now,
        )
        .unwrap();
    store
        .upload_chunk(id, 0, 2, vec![1u8; 10], Some([0u8; 12]), now)
        .await
        .unwrap();
    store.upload_chunk(id, 1, 2, vec![2u8; 10], None, now).await.unwrap();
    let meta = store.get_file_meta(id, now).unwrap();

    match store.finalize_chunked(id, &meta.download_token, now).await {
        FinalizeOutcome::Ok { total_chunks } => assert_eq!(total_chunks, 2),
        FinalizeOutcome::AlreadyFinalized => panic!("expected first finalize to succeed"),
    }

    // A second finalize with the same (now-used) token is reported as
    // idempotent success, not an error — covers both "called twice" and
    // "the sweeper already reclaimed it" from the caller's point of view.
    assert!(matches!(
        store.finalize_chunked(id, &meta.download_token, now).await,
        FinalizeOutcome::AlreadyFinalized
    ));
}

// §8 invariant: KDF determinism for fixed (passphrase, salt, iterations)
// across independently-constructed calls.
#[test]
fn kdf_derivation_is_bit_identical_across_independent_calls() {
    let salt = [3u8; 16];
    let a = kdf::derive_validation_hash("hunter2", &salt, 50_000);
    let b = kdf::derive_validation_hash("hunter2", &salt, 50_000);
    assert_eq!(a, b);

    let key_a = kdf::derive_encryption_key("hunter2", &salt, 50_000);
    let key_b = kdf::derive_encryption_key("hunter2", &salt, 50_000);
    assert_eq!(key_a.0, key_b.0);
}

// §8 boundary scenario 6: rate limit fires then recovers after the window.
#[test]
fn rate_limiter_fires_429_then_recovers_after_window() {
    use cinder::ratelimiter::RateLimiter;

    let limiter = RateLimiter::new();
    let now = Utc::now();
    for _ in 0..10 {
        assert!(limiter.check("notes:create:1.2.3.4", Duration::minutes(1), 10, now).admitted);
    }
    let decision = limiter.check("notes:create:1.2.3.4", Duration::minutes(1), 10, now);
    assert!(!decision.admitted);
    assert!(decision.retry_after_secs > 0);

    let later = now + Duration::minutes(1) + Duration::seconds(1);
    assert!(limiter.check("notes:create:1.2.3.4", Duration::minutes(1), 10, later).admitted);
}

// §3 invariant: expiry sweep reclaims notes/files and reports their mode
// so the caller knows whether to delete a single blob or a whole prefix.
#[tokio::test]
async fn expiry_sweep_reclaims_whole_and_chunked_files_with_their_mode() {
    let store = store();
    let now = Utc::now();

    let whole_id = store
        .create_file_whole(
            "a.bin".to_string(),
            3,
            [0u8; 12],
            vec![1, 2, 3],
            None,
            None,
            None,
            now - Duration::seconds(1),
            now - Duration::hours(1),
        )
        .await
        .unwrap();

    let chunked_id = store
        .init_chunked_upload(
            "b.bin".to_string(),
            4 * 1024 * 1024,
            2 * 1024 * 1024,
            2,
            None,
            None,
            None,
            now - Duration::seconds(1),
            now - Duration::hours(1),
        )
        .unwrap();

    let report = store.sweep_expired(now);
    assert_eq!(report.files_reclaimed, 2);
    let paths: std::collections::HashMap<_, _> = report.file_storage_paths.into_iter().collect();
    assert_eq!(paths.get(&format!("{whole_id}.bin")), Some(&cinder::store::FileMode::Whole));
    assert_eq!(paths.get(&chunked_id.to_string()), Some(&cinder::store::FileMode::Chunked));
}
