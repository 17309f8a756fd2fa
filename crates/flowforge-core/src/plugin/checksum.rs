//! SHA-256 package checksums.

use sha2::{Digest, Sha256};

use super::PluginError;

/// Lowercase hex SHA-256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Recompute the checksum of a downloaded package and compare it with the
/// expected value (hex, case-insensitive, optional `sha256:` prefix).
pub fn verify_checksum(plugin: &str, bytes: &[u8], expected: &str) -> Result<(), PluginError> {
    let expected = expected.trim();
    let expected = expected.strip_prefix("sha256:").unwrap_or(expected);
    let actual = sha256_hex(bytes);

    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(PluginError::ChecksumMismatch {
            plugin: plugin.to_string(),
            expected: expected.to_lowercase(),
            actual,
        })
    }
}
