//! Canonical form of a code snippet.
//!
//! Both exact-match strategies compare the *normalized* text: every
//! whitespace character (spaces, tabs, newlines, and the rest of the Unicode
//! whitespace class) is removed and nothing is substituted in its place.
//! The same function runs at ingestion and at query time, so a stored
//! `format_code` / `hash_code` and a freshly computed one always agree.
//!
//! ```rust
//! use malcode_search::normalize::{hash_hex, normalize};
//!
//! assert_eq!(normalize("import os\nprint('x')"), "importosprint('x')");
//! assert_eq!(hash_hex("import os"), hash_hex("import\tos"));
//! ```

use sha2::{Digest, Sha256};

/// Width in bytes of a content hash (SHA-256).
pub const HASH_LEN: usize = 32;

/// Remove all whitespace from `code`, preserving every other character in order.
pub fn normalize(code: &str) -> String {
    code.chars().filter(|c| !c.is_whitespace()).collect()
}

/// SHA-256 digest of an already-normalized string.
pub fn content_hash(normalized: &str) -> [u8; HASH_LEN] {
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hasher.finalize().into()
}

/// Digest of the normalized form of `raw`.
pub fn hash_code(raw: &str) -> [u8; HASH_LEN] {
    content_hash(&normalize(raw))
}

/// Lowercase hex of [`hash_code`], as stored in `hash_str`.
pub fn hash_hex(raw: &str) -> String {
    hex::encode(hash_code(raw))
}
