use sha2::{Digest, Sha256};

/// Generate a platform session token. Returns `(raw_token, sha256_hash)`.
/// Only the hash is ever stored; the raw value is handed to the browser once,
/// as a cookie. Format: `plat_` + 32 random bytes as hex (69 chars total).
pub fn generate_session_token() -> (String, String) {
    let raw = generate_raw("plat_");
    let hash = hash_token(&raw);
    (raw, hash)
}

/// SHA-256 hash of a token string, returned as lowercase hex.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

fn generate_raw(prefix: &str) -> String {
    let mut bytes = [0u8; 32];
    rand::fill(&mut bytes);
    format!("{prefix}{}", hex::encode(bytes))
}
