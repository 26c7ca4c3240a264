use rand::distr::{Alphanumeric, SampleString};

use crate::auth::password;

/// Generate a new client secret: 32 random bytes rendered as an
/// alphanumeric string (plaintext, shown to the owner once) plus its
/// argon2 verifier (what gets stored — spec §4.5 "Client secret").
pub fn generate() -> anyhow::Result<(String, String)> {
    let plaintext = Alphanumeric.sample_string(&mut rand::rng(), 43); // ~256 bits
    let verifier = password::hash_password(&plaintext)?;
    Ok((plaintext, verifier))
}

/// Verify a presented secret against the stored verifier.
pub fn verify(plaintext: &str, verifier: &str) -> anyhow::Result<bool> {
    password::verify_password(plaintext, verifier)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_and_verify_roundtrip() {
        let (plaintext, verifier) = generate().unwrap();
        assert!(verify(&plaintext, &verifier).unwrap());
        assert!(!verify("wrong-secret", &verifier).unwrap());
    }

    #[test]
    fn rotation_produces_different_secrets() {
        let (a, _) = generate().unwrap();
        let (b, _) = generate().unwrap();
        assert_ne!(a, b);
    }
}
