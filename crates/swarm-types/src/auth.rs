//! Optional shared-secret HMAC-SHA256 signing for gossip messages.
//!
//! Disabled by default; a node only signs/verifies when a shared secret is
//! configured. Tokens older than 60s are rejected (see [`MAX_TOKEN_AGE_MS`]).

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::SwarmError;

type HmacSha256 = Hmac<Sha256>;

pub const MAX_TOKEN_AGE_MS: i64 = 60_000;

/// A signature attached to a gossip payload alongside the timestamp it
/// was computed over, so a verifier can enforce [`MAX_TOKEN_AGE_MS`]
/// without trusting the sender's clock claims about anything else.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedEnvelope {
    pub payload: Vec<u8>,
    pub timestamp_ms: i64,
    pub signature: Vec<u8>,
}

pub struct HmacSigner {
    secret: Vec<u8>,
}

impl HmacSigner {
    #[must_use]
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    pub fn sign(&self, payload: &[u8], timestamp_ms: i64) -> SignedEnvelope {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("HMAC accepts keys of any length");
        mac.update(payload);
        mac.update(&timestamp_ms.to_be_bytes());
        let signature = mac.finalize().into_bytes().to_vec();
        SignedEnvelope {
            payload: payload.to_vec(),
            timestamp_ms,
            signature,
        }
    }

    pub fn verify(&self, envelope: &SignedEnvelope, now_ms: i64) -> Result<(), SwarmError> {
        if now_ms - envelope.timestamp_ms > MAX_TOKEN_AGE_MS {
            return Err(SwarmError::AuthenticationFailed);
        }
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("HMAC accepts keys of any length");
        mac.update(&envelope.payload);
        mac.update(&envelope.timestamp_ms.to_be_bytes());
        mac.verify_slice(&envelope.signature)
            .map_err(|_| SwarmError::InvalidSignature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_signature_verifies() {
        let signer = HmacSigner::new(b"shared-secret".to_vec());
        let envelope = signer.sign(b"hello", 1_000);
        assert!(signer.verify(&envelope, 1_500).is_ok());
    }

    #[test]
    fn tampered_payload_fails() {
        let signer = HmacSigner::new(b"shared-secret".to_vec());
        let mut envelope = signer.sign(b"hello", 1_000);
        envelope.payload = b"tampered".to_vec();
        assert!(matches!(
            signer.verify(&envelope, 1_500),
            Err(SwarmError::InvalidSignature)
        ));
    }

    #[test]
    fn stale_token_is_rejected() {
        let signer = HmacSigner::new(b"shared-secret".to_vec());
        let envelope = signer.sign(b"hello", 0);
        assert!(matches!(
            signer.verify(&envelope, MAX_TOKEN_AGE_MS + 1),
            Err(SwarmError::AuthenticationFailed)
        ));
    }
}
