//! Source-file fingerprinting
//!
//! The import ledger records a SHA-256 fingerprint for every fully imported
//! Parquet file so a renamed or re-published source can be told apart from
//! the file that was actually loaded.

use crate::error::{Result, TaxiError};
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;

/// Compute the SHA-256 fingerprint of a file, hex-encoded.
pub fn file_fingerprint(path: impl AsRef<Path>) -> Result<String> {
    let mut file = std::fs::File::open(path)?;
    fingerprint(&mut file)
}

/// Compute the SHA-256 fingerprint of any readable source, hex-encoded.
pub fn fingerprint<R: Read>(reader: &mut R) -> Result<String> {
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Verify that a file matches an expected fingerprint.
pub fn verify_fingerprint(path: impl AsRef<Path>, expected: &str) -> Result<bool> {
    let actual = file_fingerprint(path)?;
    if actual == expected {
        Ok(true)
    } else {
        Err(TaxiError::ChecksumMismatch {
            expected: expected.to_string(),
            actual,
        })
    }
}
