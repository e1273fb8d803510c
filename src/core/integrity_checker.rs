//! File Integrity Checker Module
//!
//! Verifies completed downloads against the checksum published with a resource.
//! The algorithm is inferred from the digest length (an optional `algo:` prefix is
//! ignored) and defaults to SHA-256. Comparison is case-insensitive.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use tokio::task;
use tracing::{info, warn};

// Hash algorithm imports from RustCrypto
use blake2::{Blake2b512, Digest};
use digest::DynDigest;
use md5::Md5;
use sha1::Sha1;
use sha2::{Sha256, Sha512};

use crate::core::models::{AppError, AppResult, Integrity};

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Supported hash algorithms for file integrity checking
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    Sha256,
    Sha512,
    Blake2b512,
    /// Legacy
    Md5,
    /// Legacy
    Sha1,
}

impl HashAlgorithm {
    pub fn name(&self) -> &'static str {
        match self {
            HashAlgorithm::Sha256 => "SHA-256",
            HashAlgorithm::Sha512 => "SHA-512",
            HashAlgorithm::Blake2b512 => "BLAKE2b-512",
            HashAlgorithm::Md5 => "MD5",
            HashAlgorithm::Sha1 => "SHA-1",
        }
    }

    /// Create a new hasher instance
    pub fn create_hasher(&self) -> Box<dyn DynDigest + Send> {
        match self {
            HashAlgorithm::Sha256 => Box::new(Sha256::new()),
            HashAlgorithm::Sha512 => Box::new(Sha512::new()),
            HashAlgorithm::Blake2b512 => Box::new(Blake2b512::new()),
            HashAlgorithm::Md5 => Box::new(Md5::new()),
            HashAlgorithm::Sha1 => Box::new(Sha1::new()),
        }
    }
}

/// Outcome of verifying one file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrityResult {
    pub file_path: PathBuf,
    pub algorithm: HashAlgorithm,
    pub expected_hash: String,
    pub computed_hash: String,
    pub integrity: Integrity,
}

/// Strip an optional `algo:` prefix and surrounding whitespace.
fn normalize_hash(hash: &str) -> (Option<HashAlgorithm>, String) {
    let trimmed = hash.trim();
    if let Some((prefix, rest)) = trimmed.split_once(':') {
        let algorithm = match prefix.to_ascii_lowercase().as_str() {
            "md5" => Some(HashAlgorithm::Md5),
            "sha1" => Some(HashAlgorithm::Sha1),
            "sha256" => Some(HashAlgorithm::Sha256),
            "sha512" => Some(HashAlgorithm::Sha512),
            "blake2b" => Some(HashAlgorithm::Blake2b512),
            _ => None,
        };
        if algorithm.is_some() {
            return (algorithm, rest.trim().to_string());
        }
    }
    (None, trimmed.to_string())
}

/// Guess the algorithm from the length of a hex digest
pub fn detect_algorithm_from_hash(hash: &str) -> Option<HashAlgorithm> {
    let (explicit, digest) = normalize_hash(hash);
    if explicit.is_some() {
        return explicit;
    }
    match digest.len() {
        32 => Some(HashAlgorithm::Md5),
        40 => Some(HashAlgorithm::Sha1),
        64 => Some(HashAlgorithm::Sha256),
        128 => Some(HashAlgorithm::Sha512),
        _ => None,
    }
}

/// Case-insensitive digest comparison
pub fn checksums_match(expected: &str, computed: &str) -> bool {
    let (_, expected) = normalize_hash(expected);
    let (_, computed) = normalize_hash(computed);
    expected.eq_ignore_ascii_case(&computed)
}

/// Hash a file on the blocking pool
pub async fn compute_file_hash(path: &Path, algorithm: HashAlgorithm) -> AppResult<String> {
    let path = path.to_path_buf();
    task::spawn_blocking(move || hash_file_blocking(&path, algorithm))
        .await
        .map_err(|e| AppError::System(format!("Hash task failed: {}", e)))?
}

fn hash_file_blocking(path: &Path, algorithm: HashAlgorithm) -> AppResult<String> {
    let file = File::open(path)?;
    let mut reader = BufReader::with_capacity(READ_BUFFER_SIZE, file);
    let mut hasher = algorithm.create_hasher();
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize_reset()))
}

/// Verify `path` against `expected`, returning `Verified` or `Mismatch`.
pub async fn verify_file(path: &Path, expected: &str) -> AppResult<IntegrityResult> {
    let algorithm = detect_algorithm_from_hash(expected).unwrap_or(HashAlgorithm::Sha256);
    let computed = compute_file_hash(path, algorithm).await?;

    let integrity = if checksums_match(expected, &computed) {
        info!("✅ File integrity verified: {:?} ({})", path, algorithm.name());
        Integrity::Verified
    } else {
        warn!(
            "❌ File integrity check failed: {:?} ({}) expected {} computed {}",
            path,
            algorithm.name(),
            expected,
            computed
        );
        Integrity::Mismatch
    };

    Ok(IntegrityResult {
        file_path: path.to_path_buf(),
        algorithm,
        expected_hash: expected.to_string(),
        computed_hash: computed,
        integrity,
    })
}
