//! Cryptographic primitives for threshold-protected exams.
//!
//! # Overview
//!
//! 1. **Content cipher**: exam content is encrypted with AES-256-CBC under a
//!    random 32-byte master key. Output is `nonce || ciphertext`.
//!
//! 2. **Threshold splitting**: the master key is split with Shamir's scheme
//!    over GF(2^8) into one share per custodian organization. Any k shares
//!    reconstruct it; fewer reveal nothing.
//!
//! 3. **Question cipher**: questions are encrypted field by field under
//!    `SHA-256(passphrase)`, independent of the master key.
//!
//! 4. **Answer signatures**: students sign each answer message with
//!    RSASSA-PKCS1-v1_5 / SHA-256; the server verifies the exact bytes.
//!
//! All operations are synchronous and free of I/O.

pub mod cipher;
pub mod error;
pub mod question;
pub mod shamir;
pub mod signature;

pub use cipher::{decrypt, decrypt_to_string, encrypt, generate_key, KEY_LEN, NONCE_LEN};
pub use error::CryptoError;
pub use question::{derive_question_key, open_question, protect_question};
pub use shamir::{combine_shares, split_secret, validate_share, MAX_SHARES};
pub use signature::{parse_public_key, public_key_pem, sign_message, verify_signature};

pub use rsa::{RsaPrivateKey, RsaPublicKey};
