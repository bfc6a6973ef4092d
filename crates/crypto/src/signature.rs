//! Answer signatures: RSASSA-PKCS1-v1_5 over SHA-256.
//!
//! Verification always runs over the exact message bytes the client signed.
//! Public keys are accepted as SPKI PEM, PKCS#1 PEM, or base64 DER.

use base64::{engine::general_purpose::STANDARD, Engine};
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey, LineEnding};
use rsa::{Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};

use crate::error::CryptoError;

/// Parse a transmitted public key.
pub fn parse_public_key(encoded: &str) -> Result<RsaPublicKey, CryptoError> {
    let encoded = encoded.trim();

    if encoded.starts_with("-----BEGIN PUBLIC KEY-----") {
        return RsaPublicKey::from_public_key_pem(encoded)
            .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()));
    }
    if encoded.starts_with("-----BEGIN RSA PUBLIC KEY-----") {
        return RsaPublicKey::from_pkcs1_pem(encoded)
            .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()));
    }

    let der = STANDARD
        .decode(encoded)
        .map_err(|e| CryptoError::InvalidPublicKey(format!("not PEM or base64: {}", e)))?;
    RsaPublicKey::from_public_key_der(&der)
        .or_else(|_| RsaPublicKey::from_pkcs1_der(&der))
        .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))
}

/// Verify a base64 signature over `message` against an encoded public key.
pub fn verify_signature(
    message: &[u8],
    signature_b64: &str,
    public_key: &str,
) -> Result<(), CryptoError> {
    let key = parse_public_key(public_key)?;
    let signature = STANDARD
        .decode(signature_b64.trim())
        .map_err(|e| CryptoError::InvalidSignatureEncoding(e.to_string()))?;

    let digest = Sha256::digest(message);
    key.verify(Pkcs1v15Sign::new::<Sha256>(), &digest, &signature)
        .map_err(|_| CryptoError::SignatureVerificationFailed)
}

/// Sign `message`, returning a base64 signature.
pub fn sign_message(private_key: &RsaPrivateKey, message: &[u8]) -> Result<String, CryptoError> {
    let digest = Sha256::digest(message);
    let signature = private_key
        .sign(Pkcs1v15Sign::new::<Sha256>(), &digest)
        .map_err(|e| CryptoError::SigningFailed(e.to_string()))?;
    Ok(STANDARD.encode(signature))
}

/// Encode a public key as SPKI PEM.
pub fn public_key_pem(public_key: &RsaPublicKey) -> Result<String, CryptoError> {
    public_key
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;
    use std::sync::OnceLock;

    fn test_key() -> &'static RsaPrivateKey {
        static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
        KEY.get_or_init(|| RsaPrivateKey::new(&mut OsRng, 1024).expect("keygen"))
    }

    #[test]
    fn test_sign_and_verify_pem() {
        let key = test_key();
        let pem = public_key_pem(&key.to_public_key()).unwrap();
        let message = br#"{"questionId":"q1","answer":"a","examId":"e1","studentId":"s1"}"#;

        let signature = sign_message(key, message).unwrap();
        assert!(verify_signature(message, &signature, &pem).is_ok());
    }

    #[test]
    fn test_verify_base64_der_key() {
        let key = test_key();
        let der = key.to_public_key().to_public_key_der().unwrap();
        let b64 = STANDARD.encode(der.as_bytes());

        let signature = sign_message(key, b"payload").unwrap();
        assert!(verify_signature(b"payload", &signature, &b64).is_ok());
    }

    #[test]
    fn test_reserialized_message_fails() {
        let key = test_key();
        let pem = public_key_pem(&key.to_public_key()).unwrap();
        let signed = br#"{"questionId":"q1","answer":"a"}"#;
        let reordered = br#"{"answer":"a","questionId":"q1"}"#;

        let signature = sign_message(key, signed).unwrap();
        assert_eq!(
            verify_signature(reordered, &signature, &pem),
            Err(CryptoError::SignatureVerificationFailed)
        );
    }

    #[test]
    fn test_garbage_inputs() {
        let key = test_key();
        let pem = public_key_pem(&key.to_public_key()).unwrap();

        assert!(matches!(
            verify_signature(b"m", "%%%not base64%%%", &pem),
            Err(CryptoError::InvalidSignatureEncoding(_))
        ));
        assert!(matches!(
            verify_signature(b"m", "AAAA", "not a key"),
            Err(CryptoError::InvalidPublicKey(_))
        ));
    }
}
