/// Compute the BLAKE3 hash of a byte slice, returning the hex-encoded digest.
#[must_use]
pub fn blake3_bytes(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}

/// Compute the BLAKE3 hash over several byte slices as one stream.
///
/// Each part is length-prefixed, so `["ab", "c"]` and `["a", "bc"]` differ.
#[must_use]
pub fn blake3_parts(parts: &[&[u8]]) -> String {
    let mut hasher = blake3::Hasher::new();
    for part in parts {
        hasher.update(&(part.len() as u64).to_le_bytes());
        hasher.update(part);
    }
    hasher.finalize().to_hex().to_string()
}

/// Truncate a hex digest to `len` characters (clamped to the digest length).
#[must_use]
pub fn short(digest: &str, len: usize) -> &str {
    &digest[..len.min(digest.len())]
}
