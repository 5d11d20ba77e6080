//! Content fingerprints for material dedup and change detection

use blake3::Hasher;

/// Hex BLAKE3 digest of a material body
pub fn fingerprint(content: &str) -> String {
    let mut hasher = Hasher::new();
    hasher.update(content.as_bytes());
    hasher.finalize().to_hex().to_string()
}
