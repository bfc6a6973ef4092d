//! Symmetric content encryption.
//!
//! AES-256 in CBC mode with PKCS#7 padding and a fresh 16-byte nonce per
//! encryption. The output blob is `nonce || ciphertext`.
//!
//! There is no MAC. An invalid padding after decryption is the only integrity
//! signal, and it is reported as [`CryptoError::DecryptionFailed`].

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};

use exam_types::EncryptedBlob;

use crate::error::CryptoError;

/// Master key length (AES-256).
pub const KEY_LEN: usize = 32;

/// Nonce (IV) length, one AES block.
pub const NONCE_LEN: usize = 16;

const BLOCK_LEN: usize = 16;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Encrypt `plaintext` under `key` with a nonce drawn from the OS RNG.
pub fn encrypt(plaintext: &[u8], key: &[u8; KEY_LEN]) -> EncryptedBlob {
    encrypt_with_rng(plaintext, key, &mut OsRng)
}

/// Encrypt using a caller-provided RNG for the nonce.
pub fn encrypt_with_rng<R: RngCore + CryptoRng>(
    plaintext: &[u8],
    key: &[u8; KEY_LEN],
    rng: &mut R,
) -> EncryptedBlob {
    let mut nonce = [0u8; NONCE_LEN];
    rng.fill_bytes(&mut nonce);

    let ciphertext =
        Aes256CbcEnc::new(key.into(), &nonce.into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    blob.extend_from_slice(&nonce);
    blob.extend_from_slice(&ciphertext);
    EncryptedBlob(blob)
}

/// Decrypt a `nonce || ciphertext` blob.
///
/// # Errors
/// * [`CryptoError::InvalidKeyLength`] if `key` is not exactly 32 bytes
/// * [`CryptoError::DecryptionFailed`] if the blob is malformed or the
///   padding is invalid after decryption
pub fn decrypt(blob: &EncryptedBlob, key: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if key.len() != KEY_LEN {
        return Err(CryptoError::InvalidKeyLength {
            expected: KEY_LEN,
            got: key.len(),
        });
    }

    let bytes = blob.as_bytes();
    if bytes.len() < NONCE_LEN + BLOCK_LEN || (bytes.len() - NONCE_LEN) % BLOCK_LEN != 0 {
        return Err(CryptoError::DecryptionFailed(format!(
            "blob length {} is not nonce plus whole blocks",
            bytes.len()
        )));
    }

    let (nonce, ciphertext) = bytes.split_at(NONCE_LEN);
    let decryptor = Aes256CbcDec::new_from_slices(key, nonce)
        .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))?;

    decryptor
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed("invalid padding".into()))
}

/// Decrypt and require the plaintext to be UTF-8 text.
///
/// A wrong key yields valid padding roughly once in 256 tries; the text check
/// narrows that window further for textual content.
pub fn decrypt_to_string(blob: &EncryptedBlob, key: &[u8]) -> Result<String, CryptoError> {
    let plaintext = decrypt(blob, key)?;
    String::from_utf8(plaintext)
        .map_err(|_| CryptoError::DecryptionFailed("plaintext is not valid UTF-8".into()))
}

/// Generate a fresh random master key.
pub fn generate_key<R: RngCore + CryptoRng>(rng: &mut R) -> zeroize::Zeroizing<[u8; KEY_LEN]> {
    let mut key = zeroize::Zeroizing::new([0u8; KEY_LEN]);
    rng.fill_bytes(&mut key[..]);
    key
}
