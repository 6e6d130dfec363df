//! ed25519 key handling for transaction owners and validators.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey, SECRET_KEY_LENGTH};
use rand_core::OsRng;
use sha2::{Digest, Sha512};
use thiserror::Error;

/// Errors reported while decoding key material.
#[derive(Debug, Clone, Error)]
pub enum KeyError {
    /// Base64 or ed25519 parsing failure.
    #[error("key decode error: {0}")]
    Decode(String),
    /// Buffer did not match the expected key length.
    #[error("unexpected key length: {0}")]
    InvalidLength(usize),
}

/// Derives a deterministic signing key from a seed string.
pub fn derive_signing_key(seed: &str) -> SigningKey {
    let mut hasher = Sha512::new();
    hasher.update(seed.as_bytes());
    let digest = hasher.finalize();
    let mut secret = [0u8; SECRET_KEY_LENGTH];
    secret.copy_from_slice(&digest[..SECRET_KEY_LENGTH]);
    SigningKey::from_bytes(&secret)
}

/// Generates a fresh random signing key.
pub fn generate_signing_key() -> SigningKey {
    let mut rng = OsRng;
    SigningKey::generate(&mut rng)
}

/// Encodes a public key as base64.
pub fn encode_public_key_base64(verifying: &VerifyingKey) -> String {
    BASE64.encode(verifying.to_bytes())
}

/// Decodes a base64 public key.
pub fn decode_public_key_base64(input: &str) -> Result<VerifyingKey, KeyError> {
    let bytes = BASE64
        .decode(input)
        .map_err(|err| KeyError::Decode(err.to_string()))?;
    if bytes.len() != 32 {
        return Err(KeyError::InvalidLength(bytes.len()));
    }
    VerifyingKey::try_from(bytes.as_slice()).map_err(|err| KeyError::Decode(err.to_string()))
}

/// Encodes a signature as base64.
pub fn encode_signature_base64(sig: &Signature) -> String {
    BASE64.encode(sig.to_bytes())
}

/// Decodes a base64 signature.
pub fn decode_signature_base64(input: &str) -> Result<Signature, KeyError> {
    let bytes = BASE64
        .decode(input)
        .map_err(|err| KeyError::Decode(err.to_string()))?;
    Signature::from_slice(&bytes).map_err(|err| KeyError::Decode(err.to_string()))
}

/// Signs a payload with the provided signing key.
pub fn sign_payload(signing: &SigningKey, payload: &[u8]) -> Signature {
    signing.sign(payload)
}

/// Verifies a signature against the payload using the given verifying key.
pub fn verify_signature(
    verifying: &VerifyingKey,
    payload: &[u8],
    signature: &Signature,
) -> Result<(), KeyError> {
    verifying
        .verify(payload, signature)
        .map_err(|err| KeyError::Decode(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_derivation_is_deterministic() {
        let a = derive_signing_key("alpha");
        let b = derive_signing_key("alpha");
        let c = derive_signing_key("beta");
        assert_eq!(a.to_bytes(), b.to_bytes());
        assert_ne!(a.to_bytes(), c.to_bytes());
    }

    #[test]
    fn generated_keys_are_distinct_and_sign() {
        let a = generate_signing_key();
        let b = generate_signing_key();
        assert_ne!(a.to_bytes(), b.to_bytes());
        let signature = sign_payload(&a, b"fresh key");
        assert!(verify_signature(&a.verifying_key(), b"fresh key", &signature).is_ok());
        assert!(verify_signature(&b.verifying_key(), b"fresh key", &signature).is_err());
    }

    #[test]
    fn base64_roundtrip() {
        let signing = derive_signing_key("roundtrip");
        let verifying = signing.verifying_key();
        let text = encode_public_key_base64(&verifying);
        assert_eq!(decode_public_key_base64(&text).unwrap(), verifying);

        let signature = sign_payload(&signing, b"payload");
        let text = encode_signature_base64(&signature);
        assert_eq!(decode_signature_base64(&text).unwrap(), signature);
    }

    #[test]
    fn verify_rejects_tampered_payload() {
        let signing = derive_signing_key("tamper");
        let verifying = signing.verifying_key();
        let signature = sign_payload(&signing, b"payload");
        assert!(verify_signature(&verifying, b"payload", &signature).is_ok());
        assert!(verify_signature(&verifying, b"payloae", &signature).is_err());
    }

    #[test]
    fn truncated_public_key_is_rejected() {
        let text = BASE64.encode([0u8; 16]);
        assert!(matches!(
            decode_public_key_base64(&text),
            Err(KeyError::InvalidLength(16))
        ));
    }
}
