//! Service configuration (§6.4, SPEC_FULL §10). Environment variables carry
//! the deployment-wide limits; `clap` overrides the bind address for local
//! runs, mirroring the teacher's own CLI-first configuration style.

use anyhow::{Context, Result, anyhow};
use chrono::Duration;
use clap::Parser;

/// Minimum PBKDF2 iteration floor (§3, §4.3). Config can raise this, never
/// lower it.
const MIN_KDF_ITERATIONS: u32 = 210_000;

#[derive(Parser, Debug)]
#[command(
    name = "cinder",
    bin_name = "cinder",
    about = "Zero-knowledge burn-after-read secret sharing service",
    version
)]
pub struct Cli {
    /// Address to bind the HTTP listener on
    #[arg(short = 'b', long, default_value = "0.0.0.0")]
    pub bind: String,

    /// Port to listen on
    #[arg(short = 'p', long, default_value_t = 8080)]
    pub port: u16,

    /// Root directory for the local filesystem blob store
    #[arg(long, default_value = "./cinder-data")]
    pub data_dir: std::path::PathBuf,
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub bind: String,
    pub port: u16,
    pub data_dir: std::path::PathBuf,
    /// Absolute per-file ceiling, default 500 MiB (§6.4).
    pub max_file_bytes: u64,
    /// Plaintext size above which uploads switch to chunked mode, default
    /// 100 MiB (§6.4).
    pub chunk_threshold_bytes: u64,
    /// Upper bound on `expires_at - created_at`, default 60 days (§3).
    pub max_expiry: Duration,
    /// PBKDF2 iteration count, floor and default 210 000 (§3, §4.3).
    pub kdf_iterations: u32,
}

impl ServiceConfig {
    /// Build configuration from environment variables, then apply the CLI's
    /// bind/port/data-dir overrides.
    pub fn from_env(cli: Cli) -> Result<Self> {
        let max_file_bytes = env_bytes("CINDER_MAX_FILE_BYTES", 500 * 1024 * 1024)?;
        let chunk_threshold_bytes = env_bytes("CINDER_CHUNK_THRESHOLD_BYTES", 100 * 1024 * 1024)?;
        let max_expiry_days = env_u32("CINDER_MAX_EXPIRY_DAYS", 60)?;
        let kdf_iterations = env_u32("CINDER_KDF_ITERATIONS", MIN_KDF_ITERATIONS)?;

        if kdf_iterations < MIN_KDF_ITERATIONS {
            return Err(anyhow!(
                "CINDER_KDF_ITERATIONS must be at least {MIN_KDF_ITERATIONS}, got {kdf_iterations}"
            ));
        }

        Ok(Self {
            bind: cli.bind,
            port: cli.port,
            data_dir: cli.data_dir,
            max_file_bytes,
            chunk_threshold_bytes,
            max_expiry: Duration::days(max_expiry_days as i64),
            kdf_iterations,
        })
    }
}

fn env_u32(key: &str, default: u32) -> Result<u32> {
    match std::env::var(key) {
        Ok(val) => val
            .parse()
            .with_context(|| format!("{key} must be a non-negative integer, got '{val}'")),
        Err(std::env::VarError::NotPresent) => Ok(default),
        Err(e) => Err(e.into()),
    }
}

fn env_bytes(key: &str, default: u64) -> Result<u64> {
    match std::env::var(key) {
        Ok(val) => val
            .parse::<bytesize::ByteSize>()
            .map(|b| b.as_u64())
            .map_err(|e| anyhow!("{key}: {e}")),
        Err(std::env::VarError::NotPresent) => Ok(default),
        Err(e) => Err(e.into()),
    }
}

/// Suffix-aware duration parser retained from the original CLI config
/// (`30s`, `10m`, `1h`, `7d`); used for the `expire` field on note/file
/// creation requests where clients send a human string instead of an
/// absolute timestamp.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim().to_lowercase();

    if let Some(num) = s.strip_suffix('s') {
        let n: i64 = num.parse().map_err(|_| anyhow!("invalid duration: {s}"))?;
        return Ok(Duration::seconds(n));
    }
    if let Some(num) = s.strip_suffix('m') {
        let n: i64 = num.parse().map_err(|_| anyhow!("invalid duration: {s}"))?;
        return Ok(Duration::minutes(n));
    }
    if let Some(num) = s.strip_suffix('h') {
        let n: i64 = num.parse().map_err(|_| anyhow!("invalid duration: {s}"))?;
        return Ok(Duration::hours(n));
    }
    if let Some(num) = s.strip_suffix('d') {
        let n: i64 = num.parse().map_err(|_| anyhow!("invalid duration: {s}"))?;
        return Ok(Duration::days(n));
    }

    Err(anyhow!(
        "invalid duration '{s}'. Use a suffix: 30s, 10m, 1h, 7d"
    ))
}
