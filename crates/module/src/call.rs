//! Call message types for the exam module.

use serde::{Deserialize, Serialize};

use exam_decryption_coordinator::SubmitOutcome;
use exam_types::{
    AnswerChoice, Exam, ExamId, ExamResult, Organization, OrganizationId, PlainQuestion, Question,
    QuestionId, QuestionOptions, ShareBytes, SignedAnswer,
};

use crate::handlers::{BatchReceipt, DecryptAllReport};

/// Call messages for the exam module.
///
/// No `Debug` impl: some variants carry passphrases.
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "call", rename_all = "snake_case")]
pub enum ExamCall {
    // === Setup ===
    /// Register a custodian organization.
    RegisterOrganization {
        organization_id: OrganizationId,
        name: String,
    },

    /// Create an exam, encrypt its content and issue one share per organization.
    CreateExam {
        exam_id: ExamId,
        title: String,
        content: String,
        organization_ids: Vec<OrganizationId>,
        threshold: u32,
    },

    /// Delete an exam and clear the shares issued for it.
    DeleteExam { exam_id: ExamId },

    // === Share protocol ===
    /// Hand an organization's share back for reconstruction.
    SubmitShare {
        exam_id: ExamId,
        organization_id: OrganizationId,
        share: ShareBytes,
    },

    /// Withdraw a submitted share before decryption.
    RetractShare {
        exam_id: ExamId,
        organization_id: OrganizationId,
    },

    /// Clear the share an organization holds for one exam.
    ClearOrganizationShare {
        organization_id: OrganizationId,
        exam_id: ExamId,
    },

    // === Questions ===
    /// Add a question encrypted under a passphrase.
    CreateQuestion {
        question_id: QuestionId,
        exam_id: ExamId,
        organization_id: OrganizationId,
        content: String,
        options: QuestionOptions<String>,
        answer: AnswerChoice,
        passphrase: String,
    },

    /// Decrypt one question in place.
    DecryptQuestion {
        question_id: QuestionId,
        passphrase: String,
    },

    /// Delete a question and the answers given to it.
    DeleteQuestion { question_id: QuestionId },

    /// Decrypt every protected question an organization authored for an exam.
    DecryptAllQuestions {
        exam_id: ExamId,
        organization_id: OrganizationId,
        passphrase: String,
    },

    // === Answers ===
    /// Verify and store a batch of signed answers (all or nothing).
    SubmitAnswers { batch: Vec<SignedAnswer> },

    /// Recompute and store results for an exam.
    CalculateResults { exam_id: ExamId },
}

impl ExamCall {
    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::RegisterOrganization { .. } => "register_organization",
            Self::CreateExam { .. } => "create_exam",
            Self::DeleteExam { .. } => "delete_exam",
            Self::SubmitShare { .. } => "submit_share",
            Self::RetractShare { .. } => "retract_share",
            Self::ClearOrganizationShare { .. } => "clear_organization_share",
            Self::CreateQuestion { .. } => "create_question",
            Self::DecryptQuestion { .. } => "decrypt_question",
            Self::DeleteQuestion { .. } => "delete_question",
            Self::DecryptAllQuestions { .. } => "decrypt_all_questions",
            Self::SubmitAnswers { .. } => "submit_answers",
            Self::CalculateResults { .. } => "calculate_results",
        }
    }
}

/// What a dispatched call produced.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "value", rename_all = "snake_case")]
pub enum CallOutcome {
    Organization(Organization),
    Exam(Exam),
    ExamDeleted(ExamId),
    Share(SubmitOutcome),
    ShareRetracted,
    ShareCleared(bool),
    Question(Question),
    PlainQuestion(PlainQuestion),
    QuestionDeleted(QuestionId),
    DecryptReport(DecryptAllReport),
    Answers(BatchReceipt),
    Results(Vec<ExamResult>),
}
