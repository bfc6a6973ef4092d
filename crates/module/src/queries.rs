//! Query handlers for the exam module.
//!
//! These functions provide read-only access to exam state.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use exam_decryption_coordinator::AccumulatorState;
use exam_types::{Exam, ExamId, ExamResult, OrganizationId, Question, ShareBytes};

use crate::state::ModuleState;
use crate::store::ExamStore;

/// Query request types.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "query", rename_all = "snake_case")]
pub enum ExamQuery {
    /// Get exam details by ID.
    GetExam { exam_id: ExamId },

    /// Get exam summaries (paginated).
    ListExams { offset: usize, limit: usize },

    /// Get share collection progress for an exam.
    ShareProgress { exam_id: ExamId },

    /// Get the share an organization holds for an exam.
    OrganizationShare {
        organization_id: OrganizationId,
        exam_id: ExamId,
    },

    /// Get every share an organization holds, by exam.
    OrganizationShares { organization_id: OrganizationId },

    /// Get all questions of an exam.
    ExamQuestions { exam_id: ExamId },

    /// Get all questions an organization authored.
    OrganizationQuestions { organization_id: OrganizationId },

    /// Get stored results of an exam.
    Results { exam_id: ExamId },

    /// Get decryption statistics across all exams.
    Stats,
}

/// Query response types.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "response", content = "value", rename_all = "snake_case")]
pub enum ExamQueryResponse {
    Exam(Option<Exam>),
    ExamList(Vec<ExamSummary>),
    Progress(Option<ShareProgress>),
    Share(Option<ShareBytes>),
    /// `None` when the organization does not exist
    Shares(Option<BTreeMap<ExamId, ShareBytes>>),
    Questions(Vec<Question>),
    Results(Vec<ExamResult>),
    Stats(ExamStats),
}

/// Summary of an exam for listing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExamSummary {
    pub exam_id: ExamId,
    pub title: String,
    pub threshold: u32,
    pub organizations: usize,
    pub shares_collected: usize,
    pub is_decrypted: bool,
    pub created_at: u64,
}

impl ExamSummary {
    pub fn from_exam(exam: &Exam) -> Self {
        Self {
            exam_id: exam.id.clone(),
            title: exam.title.clone(),
            threshold: exam.threshold,
            organizations: exam.assigned_organizations.len(),
            shares_collected: exam.shares_collected(),
            is_decrypted: exam.is_decrypted,
            created_at: exam.created_at,
        }
    }
}

/// Where an exam stands in the share protocol.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareProgress {
    pub exam_id: ExamId,
    pub state: AccumulatorState,
    pub threshold: u32,
    pub shares_collected: usize,
    pub remaining: usize,
    pub submitted_by: Vec<OrganizationId>,
    pub pending: Vec<OrganizationId>,
    pub reconstruction_failures: u32,
}

impl ShareProgress {
    pub fn from_exam(exam: &Exam) -> Self {
        Self {
            exam_id: exam.id.clone(),
            state: AccumulatorState::of(exam),
            threshold: exam.threshold,
            shares_collected: exam.shares_collected(),
            remaining: exam.remaining_shares(),
            submitted_by: exam.shares_submitted.keys().cloned().collect(),
            pending: exam
                .assigned_organizations
                .iter()
                .filter(|id| !exam.has_submitted(id))
                .cloned()
                .collect(),
            reconstruction_failures: exam.reconstruction_failures,
        }
    }
}

/// Exam counts by decryption status.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExamStats {
    pub total: usize,
    pub decrypted: usize,
    pub encrypted: usize,
}

/// Handle a query.
pub fn handle_query<S: ExamStore>(state: &ModuleState<S>, query: ExamQuery) -> ExamQueryResponse {
    match query {
        ExamQuery::GetExam { exam_id } => ExamQueryResponse::Exam(state.store.get_exam(&exam_id)),

        ExamQuery::ListExams { offset, limit } => {
            let exams = get_exam_summaries(state, offset, limit);
            ExamQueryResponse::ExamList(exams)
        }

        ExamQuery::ShareProgress { exam_id } => ExamQueryResponse::Progress(
            state
                .store
                .get_exam(&exam_id)
                .map(|exam| ShareProgress::from_exam(&exam)),
        ),

        ExamQuery::OrganizationShare {
            organization_id,
            exam_id,
        } => {
            let share = state
                .store
                .get_organization(&organization_id)
                .and_then(|org| org.share_for(&exam_id).cloned());
            ExamQueryResponse::Share(share)
        }

        ExamQuery::OrganizationShares { organization_id } => ExamQueryResponse::Shares(
            state
                .store
                .get_organization(&organization_id)
                .map(|org| org.shares_by_exam),
        ),

        ExamQuery::ExamQuestions { exam_id } => {
            ExamQueryResponse::Questions(state.store.questions_for_exam(&exam_id))
        }

        ExamQuery::OrganizationQuestions { organization_id } => {
            ExamQueryResponse::Questions(state.store.questions_for_organization(&organization_id))
        }

        ExamQuery::Results { exam_id } => {
            ExamQueryResponse::Results(state.store.results_for_exam(&exam_id))
        }

        ExamQuery::Stats => ExamQueryResponse::Stats(get_exam_stats(state)),
    }
}

/// Get exam summaries for listing.
pub fn get_exam_summaries<S: ExamStore>(
    state: &ModuleState<S>,
    offset: usize,
    limit: usize,
) -> Vec<ExamSummary> {
    state
        .store
        .list_exams()
        .iter()
        .skip(offset)
        .take(limit)
        .map(ExamSummary::from_exam)
        .collect()
}

/// Count exams by decryption status.
pub fn get_exam_stats<S: ExamStore>(state: &ModuleState<S>) -> ExamStats {
    let exams = state.store.list_exams();
    let decrypted = exams.iter().filter(|e| e.is_decrypted).count();
    ExamStats {
        total: exams.len(),
        decrypted,
        encrypted: exams.len() - decrypted,
    }
}

/// Exams that have met their threshold but are still not decrypted.
pub fn get_stalled_exams<S: ExamStore>(state: &ModuleState<S>) -> Vec<ExamId> {
    state
        .store
        .list_exams()
        .into_iter()
        .filter(|exam| AccumulatorState::of(exam) == AccumulatorState::DecryptFailed)
        .map(|exam| exam.id)
        .collect()
}
