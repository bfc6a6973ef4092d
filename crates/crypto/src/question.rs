//! Per-question encryption keyed by an organization passphrase.
//!
//! Questions are protected independently of the exam's threshold key:
//! `key = SHA-256(passphrase)`, and the content plus each of the four options
//! is encrypted with the content cipher under that key. The answer key is
//! never encrypted.

use rand::{CryptoRng, RngCore};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use exam_types::{AnswerChoice, QuestionBody, QuestionOptions};

use crate::cipher::{decrypt_to_string, encrypt_with_rng, KEY_LEN};
use crate::error::CryptoError;

/// Derive the question key from an organization passphrase.
pub fn derive_question_key(passphrase: &str) -> Zeroizing<[u8; KEY_LEN]> {
    Zeroizing::new(Sha256::digest(passphrase.as_bytes()).into())
}

/// Encrypt the content and options of a question.
pub fn protect_question<R: RngCore + CryptoRng>(
    content: &str,
    options: &QuestionOptions<String>,
    answer: AnswerChoice,
    passphrase: &str,
    rng: &mut R,
) -> QuestionBody {
    let key = derive_question_key(passphrase);
    let mut seal = |text: &str| encrypt_with_rng(text.as_bytes(), &key, rng);

    QuestionBody::Protected {
        content: seal(content),
        options: QuestionOptions {
            a: seal(&options.a),
            b: seal(&options.b),
            c: seal(&options.c),
            d: seal(&options.d),
        },
        answer,
    }
}

/// Decrypt a protected question body into its open form.
///
/// Every field is decrypted before anything is returned, so a failure on any
/// field yields an error and no partial plaintext. An already open body is
/// returned unchanged.
pub fn open_question(body: &QuestionBody, passphrase: &str) -> Result<QuestionBody, CryptoError> {
    match body {
        QuestionBody::Open { .. } => Ok(body.clone()),
        QuestionBody::Protected {
            content,
            options,
            answer,
        } => {
            let key = derive_question_key(passphrase);
            let content = decrypt_to_string(content, key.as_slice())?;
            let options = options.try_map(|blob| decrypt_to_string(blob, key.as_slice()))?;

            Ok(QuestionBody::Open {
                content,
                options,
                answer: *answer,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    fn options() -> QuestionOptions<String> {
        QuestionOptions {
            a: "Mercury".into(),
            b: "Venus".into(),
            c: "Earth".into(),
            d: "Mars".into(),
        }
    }

    #[test]
    fn test_key_is_sha256_of_passphrase() {
        let key = derive_question_key("abc");
        assert_eq!(
            hex::encode(key.as_slice()),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_protect_and_open() {
        let body = protect_question(
            "Which planet is closest to the sun?",
            &options(),
            AnswerChoice::A,
            "org passphrase",
            &mut OsRng,
        );
        assert!(matches!(body, QuestionBody::Protected { answer: AnswerChoice::A, .. }));

        let opened = open_question(&body, "org passphrase").unwrap();
        assert_eq!(
            opened,
            QuestionBody::Open {
                content: "Which planet is closest to the sun?".into(),
                options: options(),
                answer: AnswerChoice::A,
            }
        );
    }

    #[test]
    fn test_wrong_passphrase_fails() {
        let body = protect_question("Q?", &options(), AnswerChoice::C, "right", &mut OsRng);
        assert!(matches!(
            open_question(&body, "wrong"),
            Err(CryptoError::DecryptionFailed(_))
        ));
    }

    #[test]
    fn test_open_body_passes_through() {
        let body = QuestionBody::Open {
            content: "plain".into(),
            options: options(),
            answer: AnswerChoice::D,
        };
        assert_eq!(open_question(&body, "anything").unwrap(), body);
    }
}
