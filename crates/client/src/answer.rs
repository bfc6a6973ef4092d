//! Signed answer creation.
//!
//! The canonical message is serialized exactly once here and the resulting
//! string is both signed and transmitted. The server verifies those bytes
//! as received.

use thiserror::Error;

use exam_crypto::{public_key_pem, sign_message, CryptoError, RsaPrivateKey};
use exam_types::{AnswerChoice, AnswerMessage, ExamId, QuestionId, SignedAnswer, StudentId};

/// Errors that can occur during answer creation.
#[derive(Debug, Error)]
pub enum AnswerError {
    #[error("Could not serialize answer message: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("Key error: {0}")]
    Key(String),

    #[error("No answers to sign")]
    Empty,
}

/// Serialize the canonical message for one answer.
///
/// Field order is `questionId, answer, examId, studentId` with no whitespace.
pub fn canonical_message(message: &AnswerMessage) -> Result<String, AnswerError> {
    Ok(serde_json::to_string(message)?)
}

/// Sign one answer.
pub fn sign_answer(
    private_key: &RsaPrivateKey,
    message: &AnswerMessage,
) -> Result<SignedAnswer, AnswerError> {
    let public_key = public_key_pem(&private_key.to_public_key())?;
    sign_with(private_key, message, public_key)
}

fn sign_with(
    private_key: &RsaPrivateKey,
    message: &AnswerMessage,
    public_key: String,
) -> Result<SignedAnswer, AnswerError> {
    let message = canonical_message(message)?;
    let signature = sign_message(private_key, message.as_bytes())?;
    Ok(SignedAnswer {
        message,
        signature,
        public_key,
    })
}

/// Builder for a student's batch of answers to one exam.
pub struct AnswerBuilder {
    exam_id: ExamId,
    student_id: StudentId,
    answers: Vec<(QuestionId, AnswerChoice)>,
}

impl AnswerBuilder {
    /// Create a new answer builder.
    pub fn new(exam_id: ExamId, student_id: StudentId) -> Self {
        Self {
            exam_id,
            student_id,
            answers: Vec::new(),
        }
    }

    /// Add an answer.
    pub fn answer(mut self, question_id: QuestionId, choice: AnswerChoice) -> Self {
        self.answers.push((question_id, choice));
        self
    }

    pub fn len(&self) -> usize {
        self.answers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.answers.is_empty()
    }

    /// Sign every answer, producing a batch ready for submission.
    pub fn sign(self, private_key: &RsaPrivateKey) -> Result<Vec<SignedAnswer>, AnswerError> {
        if self.answers.is_empty() {
            return Err(AnswerError::Empty);
        }

        let public_key = public_key_pem(&private_key.to_public_key())?;
        self.answers
            .into_iter()
            .map(|(question_id, answer)| {
                let message = AnswerMessage {
                    question_id,
                    answer,
                    exam_id: self.exam_id.clone(),
                    student_id: self.student_id.clone(),
                };
                sign_with(private_key, &message, public_key.clone())
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exam_crypto::verify_signature;
    use rand::rngs::OsRng;
    use std::sync::OnceLock;

    fn test_key() -> &'static RsaPrivateKey {
        static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
        KEY.get_or_init(|| RsaPrivateKey::new(&mut OsRng, 1024).expect("keygen"))
    }

    #[test]
    fn test_canonical_message_layout() {
        let message = AnswerMessage {
            question_id: "q1".into(),
            answer: AnswerChoice::C,
            exam_id: "e1".into(),
            student_id: "s1".into(),
        };
        assert_eq!(
            canonical_message(&message).unwrap(),
            r#"{"questionId":"q1","answer":"c","examId":"e1","studentId":"s1"}"#
        );
    }

    #[test]
    fn test_signed_answer_verifies() {
        let message = AnswerMessage {
            question_id: "q1".into(),
            answer: AnswerChoice::A,
            exam_id: "e1".into(),
            student_id: "s1".into(),
        };
        let signed = sign_answer(test_key(), &message).unwrap();
        assert!(signed.public_key.starts_with("-----BEGIN PUBLIC KEY-----"));
        assert!(verify_signature(signed.message.as_bytes(), &signed.signature, &signed.public_key).is_ok());
    }

    #[test]
    fn test_answer_builder() {
        let batch = AnswerBuilder::new("e1".into(), "s1".into())
            .answer("q1".into(), AnswerChoice::A)
            .answer("q2".into(), AnswerChoice::D)
            .sign(test_key())
            .unwrap();

        assert_eq!(batch.len(), 2);
        let second: AnswerMessage = serde_json::from_str(&batch[1].message).unwrap();
        assert_eq!(second.question_id, QuestionId::from("q2"));
        assert_eq!(second.answer, AnswerChoice::D);
        assert_eq!(second.student_id, StudentId::from("s1"));
    }

    #[test]
    fn test_empty_builder() {
        let builder = AnswerBuilder::new("e1".into(), "s1".into());
        assert!(builder.is_empty());
        assert!(matches!(builder.sign(test_key()), Err(AnswerError::Empty)));
    }
}
