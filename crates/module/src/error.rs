//! Exam module error types.

use thiserror::Error;

use exam_crypto::CryptoError;
use exam_decryption_coordinator::CoordinatorError;
use exam_types::{ExamId, OrganizationId, QuestionId, StudentId};

/// Errors that can occur in the exam module.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExamError {
    // === Share protocol ===
    #[error("Organization {organization_id} is not assigned to exam {exam_id}")]
    NotAssignedOrganization {
        exam_id: ExamId,
        organization_id: OrganizationId,
    },

    #[error("Organization {organization_id} already submitted a share for exam {exam_id}")]
    DuplicateShareSubmission {
        exam_id: ExamId,
        organization_id: OrganizationId,
    },

    #[error("Organization {organization_id} has no submitted share for exam {exam_id}")]
    ShareNotSubmitted {
        exam_id: ExamId,
        organization_id: OrganizationId,
    },

    #[error("Exam {0} is already decrypted")]
    AlreadyDecrypted(ExamId),

    #[error("Invalid share: {0}")]
    InvalidShare(String),

    #[error("Invalid threshold: {0}")]
    InvalidThreshold(String),

    // === Cryptography ===
    #[error("Invalid key length: expected {expected} bytes, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },

    #[error("Decryption failed for {context}: {reason}")]
    DecryptionFailed { context: String, reason: String },

    #[error("Signature verification failed for batch entry {index}: {reason}")]
    SignatureVerificationFailed { index: usize, reason: String },

    #[error("Passphrase must not be empty")]
    EmptyPassphrase,

    // === Records ===
    #[error("Exam not found: {0}")]
    ExamNotFound(ExamId),

    #[error("Exam already exists: {0}")]
    ExamAlreadyExists(ExamId),

    #[error("Organization not found: {0}")]
    OrganizationNotFound(OrganizationId),

    #[error("Organization already exists: {0}")]
    OrganizationAlreadyExists(OrganizationId),

    #[error("Question not found: {0}")]
    QuestionNotFound(QuestionId),

    #[error("Question already exists: {0}")]
    QuestionAlreadyExists(QuestionId),

    // === Answer batches ===
    #[error("Batch entry {index} has an unreadable answer message: {reason}")]
    InvalidAnswerMessage { index: usize, reason: String },

    #[error("Batch entry {index}: question {question_id} does not belong to exam {exam_id}")]
    AnswerExamMismatch {
        index: usize,
        question_id: QuestionId,
        exam_id: ExamId,
    },

    #[error("Student {student_id} already answered question {question_id}")]
    DuplicateAnswer {
        question_id: QuestionId,
        student_id: StudentId,
    },

    #[error("Answer batch is empty")]
    EmptyBatch,

    #[error("Answer batch of {size} exceeds the limit of {max}")]
    BatchTooLarge { size: usize, max: usize },
}

impl ExamError {
    /// Lift a share accumulator error into the context of one exam.
    pub fn from_coordinator(exam_id: &ExamId, err: CoordinatorError) -> Self {
        match err {
            CoordinatorError::NotAssignedOrganization(organization_id) => {
                Self::NotAssignedOrganization {
                    exam_id: exam_id.clone(),
                    organization_id,
                }
            }
            CoordinatorError::DuplicateShareSubmission(organization_id) => {
                Self::DuplicateShareSubmission {
                    exam_id: exam_id.clone(),
                    organization_id,
                }
            }
            CoordinatorError::ShareNotSubmitted(organization_id) => Self::ShareNotSubmitted {
                exam_id: exam_id.clone(),
                organization_id,
            },
            CoordinatorError::AlreadyDecrypted => Self::AlreadyDecrypted(exam_id.clone()),
            CoordinatorError::InvalidShare(reason) => Self::InvalidShare(reason),
            CoordinatorError::InvalidThreshold(reason) => Self::InvalidThreshold(reason),
            CoordinatorError::DecryptionFailed(reason) => Self::DecryptionFailed {
                context: format!("exam {}", exam_id),
                reason,
            },
        }
    }

    /// Lift a question cipher error into the context of one question.
    pub fn from_question_crypto(question_id: &QuestionId, err: CryptoError) -> Self {
        match err {
            CryptoError::InvalidKeyLength { expected, got } => {
                Self::InvalidKeyLength { expected, got }
            }
            other => Self::DecryptionFailed {
                context: format!("question {}", question_id),
                reason: other.to_string(),
            },
        }
    }
}
