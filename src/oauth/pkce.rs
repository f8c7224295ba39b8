//! PKCE (RFC 7636) verifier/challenge and anti-CSRF state generation

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::Rng;
use sha2::{Digest, Sha256};

/// PKCE verifier with its S256 challenge
#[derive(Clone)]
pub struct PkcePair {
    /// Secret kept by the client until the code exchange
    pub verifier: String,
    /// `BASE64URL(SHA256(verifier))`, sent with the authorize request
    pub challenge: String,
}

impl PkcePair {
    /// Generate a fresh pair from 32 random bytes
    pub fn generate() -> Self {
        let verifier_bytes: [u8; 32] = rand::rng().random();
        let verifier = URL_SAFE_NO_PAD.encode(verifier_bytes);
        let challenge = code_challenge_s256(&verifier);
        Self {
            verifier,
            challenge,
        }
    }
}

impl std::fmt::Debug for PkcePair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PkcePair")
            .field("verifier", &"<redacted>")
            .field("challenge", &self.challenge)
            .finish()
    }
}

/// S256 code challenge for a verifier
pub fn code_challenge_s256(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// Random state parameter
pub fn generate_state() -> String {
    let state_bytes: [u8; 16] = rand::rng().random();
    URL_SAFE_NO_PAD.encode(state_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pkce_verifier_is_base64url_safe() {
        for _ in 0..10 {
            let pair = PkcePair::generate();
            assert!(pair.verifier.len() >= 43);
            assert!(pair.verifier.len() <= 128);
            for s in [&pair.verifier, &pair.challenge] {
                assert!(!s.contains('+'));
                assert!(!s.contains('/'));
                assert!(!s.contains('='));
            }
        }
    }

    #[test]
    fn pkce_challenge_is_sha256_of_verifier() {
        let pair = PkcePair::generate();
        assert_eq!(pair.challenge, code_challenge_s256(&pair.verifier));
        assert_ne!(pair.verifier, pair.challenge);
    }

    #[test]
    fn pkce_known_vector() {
        // RFC 7636 appendix B
        assert_eq!(
            code_challenge_s256("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk"),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn pkce_generates_unique_values() {
        let a = PkcePair::generate();
        let b = PkcePair::generate();
        assert_ne!(a.verifier, b.verifier);
        assert_ne!(a.challenge, b.challenge);
    }

    #[test]
    fn state_is_unique_and_long_enough() {
        let s1 = generate_state();
        let s2 = generate_state();
        assert_ne!(s1, s2);
        // 16 random bytes -> 22 base64url chars
        assert_eq!(s1.len(), 22);
    }

    #[test]
    fn debug_hides_verifier() {
        let pair = PkcePair::generate();
        let rendered = format!("{pair:?}");
        assert!(!rendered.contains(&pair.verifier));
    }
}
