use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use sha2::{Digest, Sha256};

/// Generate an authorization code: 32 random bytes, URL-safe base64-encoded
/// as the plaintext code handed to the client; SHA-256 (standard
/// base64-encoded) of that plaintext is what gets stored (spec §4.5
/// "Issue code").
pub fn generate() -> (String, String) {
    let mut bytes = [0u8; 32];
    rand::fill(&mut bytes);
    let plaintext = URL_SAFE_NO_PAD.encode(bytes);
    let hash = hash(&plaintext);
    (plaintext, hash)
}

/// SHA-256 of a submitted code, base64-encoded, for comparison against the
/// stored hash.
pub fn hash(plaintext: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(plaintext.as_bytes());
    STANDARD.encode(hasher.finalize())
}
