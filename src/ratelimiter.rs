//! C5 RateLimiter (§4.5). Per-IP, per-endpoint sliding-window request
//! counting. Fails open on any internal error, since its purpose is noise
//! reduction rather than primary access control (§9).

use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

pub struct RateLimitDecision {
    pub admitted: bool,
    pub retry_after_secs: u64,
}

/// Append-only per-key timestamp log, pruned opportunistically on each
/// check (§3 "Rate-limit entry").
pub struct RateLimiter {
    entries: DashMap<String, Mutex<Vec<DateTime<Utc>>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Count entries within the window, admit or reject, and record the
    /// request if admitted. `window` and `max` are fixed per endpoint
    /// (§6.1's rate-limit column); `key` is `"<endpoint>:<ip>"`.
    pub fn check(&self, key: &str, window: Duration, max: u32, now: DateTime<Utc>) -> RateLimitDecision {
        let row = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Mutex::new(Vec::new()));
        let mut timestamps = row.lock().unwrap();
        let cutoff = now - window;
        timestamps.retain(|ts| *ts >= cutoff);

        if timestamps.len() as u32 >= max {
            let oldest = timestamps.first().copied().unwrap_or(now);
            let retry_after = (oldest + window - now).num_seconds().max(1) as u64;
            return RateLimitDecision {
                admitted: false,
                retry_after_secs: retry_after,
            };
        }

        timestamps.push(now);
        RateLimitDecision {
            admitted: true,
            retry_after_secs: 0,
        }
    }

    /// Drop every in-window entry older than one hour across all keys.
    /// Called by the background sweeper alongside the store's expiry sweep
    /// (§3: "Purged when older than one hour").
    pub fn gc(&self, now: DateTime<Utc>) {
        let cutoff = now - Duration::hours(1);
        self.entries.retain(|_, row| {
            let mut timestamps = row.lock().unwrap();
            timestamps.retain(|ts| *ts >= cutoff);
            !timestamps.is_empty()
        });
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

/// Extract the caller's IP per §4.5: first `X-Forwarded-For` entry, then
/// `X-Real-IP`, then `CF-Connecting-IP`, else `"unknown"`.
pub fn client_ip(headers: &axum::http::HeaderMap) -> String {
    if let Some(xff) = headers.get("X-Forwarded-For").and_then(|v| v.to_str().ok()) {
        if let Some(first) = xff.split(',').next() {
            let ip = first.trim();
            if !ip.is_empty() {
                return ip.to_string();
            }
        }
    }
    if let Some(real_ip) = headers.get("X-Real-IP").and_then(|v| v.to_str().ok()) {
        return real_ip.trim().to_string();
    }
    if let Some(cf) = headers.get("CF-Connecting-IP").and_then(|v| v.to_str().ok()) {
        return cf.trim().to_string();
    }
    "unknown".to_string()
}
