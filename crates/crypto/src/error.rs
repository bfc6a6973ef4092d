//! Error types for cryptographic operations.

use thiserror::Error;

/// Errors that can occur during cryptographic operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    #[error("Invalid key length: expected {expected} bytes, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },

    /// Wrong key, bad padding or a corrupted blob. The cipher has no MAC, so
    /// these causes cannot be told apart.
    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Threshold must be at least 1")]
    ThresholdTooSmall,

    #[error("Threshold ({threshold}) cannot exceed total shares ({total})")]
    ThresholdExceedsTotal { threshold: u8, total: u8 },

    #[error("Secret cannot be empty")]
    EmptySecret,

    #[error("No shares supplied")]
    NoShares,

    #[error("Malformed share: {0}")]
    MalformedShare(String),

    #[error("Share index 0 is reserved")]
    ReservedShareIndex,

    #[error("Duplicate share index: {0}")]
    DuplicateShareIndex(u8),

    #[error("Share lengths do not match")]
    MismatchedShareLengths,

    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("Invalid signature encoding: {0}")]
    InvalidSignatureEncoding(String),

    #[error("Signature verification failed")]
    SignatureVerificationFailed,

    #[error("Signing failed: {0}")]
    SigningFailed(String),
}
