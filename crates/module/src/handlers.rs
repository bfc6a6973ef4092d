//! Call handlers for the exam module.
//!
//! These functions implement the business logic for each call type. They take
//! the module state by shared reference; every load-modify-store sequence on
//! an exam (and on its questions) runs under that exam's lock.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use rand::rngs::OsRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use exam_crypto::{open_question, protect_question, verify_signature};
use exam_decryption_coordinator::{
    create_exam_secret, CoordinatorError, ShareAccumulator, SubmitOutcome,
};
use exam_types::{
    Answer, AnswerChoice, AnswerMessage, Exam, ExamId, ExamResult, Organization, OrganizationId,
    PlainQuestion, Question, QuestionId, QuestionOptions, ShareBytes, SignedAnswer,
};

use crate::call::{CallOutcome, ExamCall};
use crate::error::ExamError;
use crate::results::aggregate_results;
use crate::state::ModuleState;
use crate::store::{ExamStore, StoreError};

/// Context provided by the outer surface for each call.
#[derive(Clone, Debug)]
pub struct CallContext {
    /// Who issued the call (for logs only; authentication happens upstream)
    pub caller: String,
    /// Current timestamp
    pub timestamp: u64,
}

/// Result type for handlers.
pub type HandlerResult<T> = Result<T, ExamError>;

/// Outcome of decrypting every matching question of an exam.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecryptAllReport {
    pub succeeded: Vec<QuestionId>,
    pub failed: Vec<QuestionFailure>,
}

/// A question that could not be decrypted and was left unchanged.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionFailure {
    pub question_id: QuestionId,
    pub reason: String,
}

/// Receipt for an accepted answer batch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReceipt {
    pub accepted: usize,
}

/// Handle RegisterOrganization call.
pub fn handle_register_organization<S: ExamStore>(
    state: &ModuleState<S>,
    ctx: &CallContext,
    organization_id: OrganizationId,
    name: String,
) -> HandlerResult<Organization> {
    let organization = Organization::new(organization_id.clone(), name);
    if !state.store.insert_organization(organization.clone()) {
        return Err(ExamError::OrganizationAlreadyExists(organization_id));
    }

    info!(
        caller = %ctx.caller,
        organization_id = %organization_id,
        "Registered organization"
    );
    Ok(organization)
}

/// Handle CreateExam call.
///
/// Generates a fresh master key, encrypts `content` under it and stores one
/// share with each assigned organization. The key itself is dropped.
pub fn handle_create_exam<S: ExamStore>(
    state: &ModuleState<S>,
    ctx: &CallContext,
    exam_id: ExamId,
    title: String,
    content: String,
    organization_ids: Vec<OrganizationId>,
    threshold: u32,
) -> HandlerResult<Exam> {
    if organization_ids.len() > state.config.max_organizations {
        return Err(ExamError::InvalidThreshold(format!(
            "{} organizations exceeds the configured limit of {}",
            organization_ids.len(),
            state.config.max_organizations
        )));
    }

    for organization_id in &organization_ids {
        if state.store.get_organization(organization_id).is_none() {
            return Err(ExamError::OrganizationNotFound(organization_id.clone()));
        }
    }

    let lock = state.locks.for_exam(&exam_id);
    let _guard = lock.lock();

    if state.store.get_exam(&exam_id).is_some() {
        return Err(ExamError::ExamAlreadyExists(exam_id));
    }

    let secret = create_exam_secret(&content, &organization_ids, threshold)
        .map_err(|e| ExamError::from_coordinator(&exam_id, e))?;

    let exam = Exam {
        id: exam_id.clone(),
        title,
        encrypted_content: secret.encrypted_content,
        threshold,
        assigned_organizations: organization_ids.iter().cloned().collect(),
        shares_submitted: BTreeMap::new(),
        is_decrypted: false,
        decrypted_content: None,
        reconstruction_failures: 0,
        created_at: ctx.timestamp,
    };
    state.store.put_exam(exam.clone());

    for (organization_id, share) in secret.shares {
        if !state
            .store
            .set_organization_share(&organization_id, &exam_id, share)
        {
            // Undo the partial issue
            for assigned in &organization_ids {
                state.store.clear_organization_share(assigned, &exam_id);
            }
            state.store.remove_exam(&exam_id);
            return Err(ExamError::OrganizationNotFound(organization_id));
        }
    }

    info!(
        caller = %ctx.caller,
        exam_id = %exam_id,
        organizations = organization_ids.len(),
        threshold,
        "Created exam"
    );
    Ok(exam)
}

/// Handle SubmitShare call.
///
/// Load, append, count and maybe reconstruct all happen under the exam lock.
/// A failed reconstruction still persists the share and the failure count.
pub fn handle_submit_share<S: ExamStore>(
    state: &ModuleState<S>,
    ctx: &CallContext,
    exam_id: ExamId,
    organization_id: OrganizationId,
    share: ShareBytes,
) -> HandlerResult<SubmitOutcome> {
    let lock = state.locks.for_exam(&exam_id);
    let _guard = lock.lock();

    let mut exam = state
        .store
        .get_exam(&exam_id)
        .ok_or_else(|| ExamError::ExamNotFound(exam_id.clone()))?;

    let result = ShareAccumulator::new(&mut exam).submit(&organization_id, share);

    match result {
        Ok(outcome) => {
            state.store.put_exam(exam);
            debug!(
                caller = %ctx.caller,
                exam_id = %exam_id,
                organization_id = %organization_id,
                remaining = outcome.remaining,
                decrypted = outcome.decrypted,
                "Share submission stored"
            );
            Ok(outcome)
        }
        Err(err @ CoordinatorError::DecryptionFailed(_)) => {
            state.store.put_exam(exam);
            Err(ExamError::from_coordinator(&exam_id, err))
        }
        Err(err) => {
            debug!(
                caller = %ctx.caller,
                exam_id = %exam_id,
                organization_id = %organization_id,
                error = %err,
                "Share submission rejected"
            );
            Err(ExamError::from_coordinator(&exam_id, err))
        }
    }
}

/// Handle RetractShare call.
pub fn handle_retract_share<S: ExamStore>(
    state: &ModuleState<S>,
    ctx: &CallContext,
    exam_id: ExamId,
    organization_id: OrganizationId,
) -> HandlerResult<()> {
    let lock = state.locks.for_exam(&exam_id);
    let _guard = lock.lock();

    let mut exam = state
        .store
        .get_exam(&exam_id)
        .ok_or_else(|| ExamError::ExamNotFound(exam_id.clone()))?;

    ShareAccumulator::new(&mut exam)
        .retract(&organization_id)
        .map_err(|e| ExamError::from_coordinator(&exam_id, e))?;
    state.store.put_exam(exam);

    debug!(caller = %ctx.caller, exam_id = %exam_id, "Retract recorded");
    Ok(())
}

/// Handle ClearOrganizationShare call.
///
/// Only the (organization, exam) pair is touched. Returns whether a share
/// was present.
pub fn handle_clear_organization_share<S: ExamStore>(
    state: &ModuleState<S>,
    ctx: &CallContext,
    organization_id: OrganizationId,
    exam_id: ExamId,
) -> HandlerResult<bool> {
    if state.store.get_organization(&organization_id).is_none() {
        return Err(ExamError::OrganizationNotFound(organization_id));
    }

    let cleared = state
        .store
        .clear_organization_share(&organization_id, &exam_id)
        .is_some();

    info!(
        caller = %ctx.caller,
        organization_id = %organization_id,
        exam_id = %exam_id,
        cleared,
        "Cleared organization share"
    );
    Ok(cleared)
}

/// Handle DeleteExam call.
///
/// Shares are cleared only for the organizations assigned to this exam.
pub fn handle_delete_exam<S: ExamStore>(
    state: &ModuleState<S>,
    ctx: &CallContext,
    exam_id: ExamId,
) -> HandlerResult<Exam> {
    let lock = state.locks.for_exam(&exam_id);
    let _guard = lock.lock();

    let exam = state
        .store
        .remove_exam(&exam_id)
        .ok_or_else(|| ExamError::ExamNotFound(exam_id.clone()))?;

    for organization_id in &exam.assigned_organizations {
        state
            .store
            .clear_organization_share(organization_id, &exam_id);
    }

    info!(
        caller = %ctx.caller,
        exam_id = %exam_id,
        organizations = exam.assigned_organizations.len(),
        "Deleted exam"
    );
    Ok(exam)
}

/// Handle CreateQuestion call.
#[allow(clippy::too_many_arguments)]
pub fn handle_create_question<S: ExamStore>(
    state: &ModuleState<S>,
    ctx: &CallContext,
    question_id: QuestionId,
    exam_id: ExamId,
    organization_id: OrganizationId,
    content: String,
    options: QuestionOptions<String>,
    answer: AnswerChoice,
    passphrase: &str,
) -> HandlerResult<Question> {
    if passphrase.is_empty() {
        return Err(ExamError::EmptyPassphrase);
    }

    let lock = state.locks.for_exam(&exam_id);
    let _guard = lock.lock();

    let exam = state
        .store
        .get_exam(&exam_id)
        .ok_or_else(|| ExamError::ExamNotFound(exam_id.clone()))?;
    if state.store.get_organization(&organization_id).is_none() {
        return Err(ExamError::OrganizationNotFound(organization_id));
    }
    if !exam.is_assigned(&organization_id) {
        return Err(ExamError::NotAssignedOrganization {
            exam_id,
            organization_id,
        });
    }
    if state.store.get_question(&question_id).is_some() {
        return Err(ExamError::QuestionAlreadyExists(question_id));
    }

    let question = Question {
        id: question_id,
        exam_id,
        organization_id,
        body: protect_question(&content, &options, answer, passphrase, &mut OsRng),
    };
    state.store.put_question(question.clone());

    info!(
        caller = %ctx.caller,
        question_id = %question.id,
        exam_id = %question.exam_id,
        organization_id = %question.organization_id,
        "Created protected question"
    );
    Ok(question)
}

/// Handle DecryptQuestion call.
///
/// On failure the stored question is left exactly as it was.
pub fn handle_decrypt_question<S: ExamStore>(
    state: &ModuleState<S>,
    ctx: &CallContext,
    question_id: QuestionId,
    passphrase: &str,
) -> HandlerResult<PlainQuestion> {
    let exam_id = state
        .store
        .get_question(&question_id)
        .map(|q| q.exam_id)
        .ok_or_else(|| ExamError::QuestionNotFound(question_id.clone()))?;

    let lock = state.locks.for_exam(&exam_id);
    let _guard = lock.lock();

    // Reload under the lock; the exam may have been deleted meanwhile
    let question = state
        .store
        .get_question(&question_id)
        .ok_or_else(|| ExamError::QuestionNotFound(question_id.clone()))?;

    let plain = open_and_store(&state.store, question, passphrase);
    match &plain {
        Ok(_) => info!(caller = %ctx.caller, question_id = %question_id, "Question decrypted"),
        Err(e) => warn!(
            caller = %ctx.caller,
            question_id = %question_id,
            error = %e,
            "Question decryption failed"
        ),
    }
    plain
}

/// Handle DeleteQuestion call.
///
/// Answers to the question go with it.
pub fn handle_delete_question<S: ExamStore>(
    state: &ModuleState<S>,
    ctx: &CallContext,
    question_id: QuestionId,
) -> HandlerResult<Question> {
    let exam_id = state
        .store
        .get_question(&question_id)
        .map(|q| q.exam_id)
        .ok_or_else(|| ExamError::QuestionNotFound(question_id.clone()))?;

    let lock = state.locks.for_exam(&exam_id);
    let _guard = lock.lock();

    let question = state
        .store
        .remove_question(&question_id)
        .ok_or_else(|| ExamError::QuestionNotFound(question_id.clone()))?;

    info!(
        caller = %ctx.caller,
        question_id = %question_id,
        exam_id = %exam_id,
        "Deleted question"
    );
    Ok(question)
}

/// Handle DecryptAllQuestions call.
///
/// Each question is decrypted and written independently; failures are
/// collected and leave their question untouched.
pub fn handle_decrypt_all_questions<S: ExamStore>(
    state: &ModuleState<S>,
    ctx: &CallContext,
    exam_id: ExamId,
    organization_id: OrganizationId,
    passphrase: &str,
) -> HandlerResult<DecryptAllReport> {
    let lock = state.locks.for_exam(&exam_id);
    let _guard = lock.lock();

    if state.store.get_exam(&exam_id).is_none() {
        return Err(ExamError::ExamNotFound(exam_id));
    }

    let pending: Vec<Question> = state
        .store
        .questions_for_exam(&exam_id)
        .into_iter()
        .filter(|q| q.organization_id == organization_id && q.is_encrypted())
        .collect();

    let attempt = |question: Question| {
        let question_id = question.id.clone();
        (question_id, open_and_store(&state.store, question, passphrase))
    };
    let outcomes: Vec<(QuestionId, HandlerResult<PlainQuestion>)> = if state.config.parallel {
        pending.into_par_iter().map(attempt).collect()
    } else {
        pending.into_iter().map(attempt).collect()
    };

    let mut report = DecryptAllReport::default();
    for (question_id, outcome) in outcomes {
        match outcome {
            Ok(_) => report.succeeded.push(question_id),
            Err(e) => report.failed.push(QuestionFailure {
                question_id,
                reason: e.to_string(),
            }),
        }
    }

    if report.failed.is_empty() {
        info!(
            caller = %ctx.caller,
            exam_id = %exam_id,
            organization_id = %organization_id,
            decrypted = report.succeeded.len(),
            "Decrypted questions"
        );
    } else {
        warn!(
            caller = %ctx.caller,
            exam_id = %exam_id,
            organization_id = %organization_id,
            decrypted = report.succeeded.len(),
            failed = report.failed.len(),
            "Some questions could not be decrypted"
        );
    }
    Ok(report)
}

/// Decrypt a question and persist the open form. Nothing is written on error.
fn open_and_store<S: ExamStore>(
    store: &S,
    question: Question,
    passphrase: &str,
) -> HandlerResult<PlainQuestion> {
    let body = open_question(&question.body, passphrase)
        .map_err(|e| ExamError::from_question_crypto(&question.id, e))?;
    let was_encrypted = question.is_encrypted();
    let opened = Question { body, ..question };

    let plain = opened.to_plain().ok_or_else(|| ExamError::DecryptionFailed {
        context: format!("question {}", opened.id),
        reason: "question is still protected".into(),
    })?;

    if was_encrypted {
        store.put_question(opened);
    }
    Ok(plain)
}

/// Handle SubmitAnswers call.
///
/// Phase one checks every entry (signatures in parallel, then message,
/// question and uniqueness checks). Phase two commits the whole batch in one
/// store write. Any failure rejects the batch and nothing is stored.
pub fn handle_submit_answers<S: ExamStore>(
    state: &ModuleState<S>,
    ctx: &CallContext,
    batch: Vec<SignedAnswer>,
) -> HandlerResult<BatchReceipt> {
    let result =
        stage_answers(state, ctx, &batch).and_then(|answers| commit_answers(state, answers));

    match &result {
        Ok(receipt) => info!(
            caller = %ctx.caller,
            accepted = receipt.accepted,
            "Answer batch stored"
        ),
        Err(e) => warn!(
            caller = %ctx.caller,
            batch_size = batch.len(),
            error = %e,
            "Answer batch rejected"
        ),
    }
    result
}

/// Store a staged batch while holding the lock of every exam it touches.
///
/// Locks are taken in exam id order. Questions are re-checked under the
/// locks so a batch never lands on an exam deleted after staging.
fn commit_answers<S: ExamStore>(
    state: &ModuleState<S>,
    answers: Vec<Answer>,
) -> HandlerResult<BatchReceipt> {
    let exam_ids: BTreeSet<ExamId> = answers.iter().map(|a| a.exam_id.clone()).collect();
    let locks: Vec<_> = exam_ids.iter().map(|id| state.locks.for_exam(id)).collect();
    let _guards: Vec<_> = locks.iter().map(|lock| lock.lock()).collect();

    for exam_id in &exam_ids {
        if state.store.get_exam(exam_id).is_none() {
            return Err(ExamError::ExamNotFound(exam_id.clone()));
        }
    }
    for answer in &answers {
        if state.store.get_question(&answer.question_id).is_none() {
            return Err(ExamError::QuestionNotFound(answer.question_id.clone()));
        }
    }

    let accepted = answers.len();
    state
        .store
        .put_answers(answers)
        .map_err(|e| match e {
            StoreError::AnswerExists {
                question_id,
                student_id,
            } => ExamError::DuplicateAnswer {
                question_id,
                student_id,
            },
        })?;
    Ok(BatchReceipt { accepted })
}

fn stage_answers<S: ExamStore>(
    state: &ModuleState<S>,
    ctx: &CallContext,
    batch: &[SignedAnswer],
) -> HandlerResult<Vec<Answer>> {
    if batch.is_empty() {
        return Err(ExamError::EmptyBatch);
    }
    if batch.len() > state.config.max_answer_batch {
        return Err(ExamError::BatchTooLarge {
            size: batch.len(),
            max: state.config.max_answer_batch,
        });
    }

    let check = |(index, signed): (usize, &SignedAnswer)| -> HandlerResult<AnswerMessage> {
        verify_signature(signed.message.as_bytes(), &signed.signature, &signed.public_key)
            .map_err(|e| ExamError::SignatureVerificationFailed {
                index,
                reason: e.to_string(),
            })?;
        serde_json::from_str(&signed.message).map_err(|e| ExamError::InvalidAnswerMessage {
            index,
            reason: e.to_string(),
        })
    };
    let checked: Vec<HandlerResult<AnswerMessage>> = if state.config.parallel {
        batch.par_iter().enumerate().map(check).collect()
    } else {
        batch.iter().enumerate().map(check).collect()
    };
    let messages = checked.into_iter().collect::<HandlerResult<Vec<_>>>()?;

    let mut seen = HashSet::new();
    let mut answers = Vec::with_capacity(messages.len());
    for (index, (message, signed)) in messages.into_iter().zip(batch).enumerate() {
        let question = state
            .store
            .get_question(&message.question_id)
            .ok_or_else(|| ExamError::QuestionNotFound(message.question_id.clone()))?;

        if question.exam_id != message.exam_id {
            return Err(ExamError::AnswerExamMismatch {
                index,
                question_id: message.question_id,
                exam_id: message.exam_id,
            });
        }

        let key = (message.question_id.clone(), message.student_id.clone());
        if !seen.insert(key) || state.store.has_answer(&message.question_id, &message.student_id)
        {
            return Err(ExamError::DuplicateAnswer {
                question_id: message.question_id,
                student_id: message.student_id,
            });
        }

        answers.push(Answer {
            question_id: message.question_id,
            student_id: message.student_id,
            exam_id: message.exam_id,
            answer_choice: message.answer,
            message: signed.message.clone(),
            signature: signed.signature.clone(),
            public_key: signed.public_key.clone(),
            timestamp: ctx.timestamp,
        });
    }

    Ok(answers)
}

/// Handle CalculateResults call.
///
/// Recomputes every student's score from stored answers and upserts it.
pub fn handle_calculate_results<S: ExamStore>(
    state: &ModuleState<S>,
    ctx: &CallContext,
    exam_id: ExamId,
) -> HandlerResult<Vec<ExamResult>> {
    let lock = state.locks.for_exam(&exam_id);
    let _guard = lock.lock();

    if state.store.get_exam(&exam_id).is_none() {
        return Err(ExamError::ExamNotFound(exam_id));
    }

    let questions = state.store.questions_for_exam(&exam_id);
    let answers = state.store.answers_for_exam(&exam_id);
    let results = aggregate_results(&exam_id, &questions, &answers);

    for result in &results {
        state.store.upsert_result(result.clone());
    }

    info!(
        caller = %ctx.caller,
        exam_id = %exam_id,
        questions = questions.len(),
        students = results.len(),
        "Computed results"
    );
    Ok(results)
}

/// Route a call to its handler.
pub fn dispatch<S: ExamStore>(
    state: &ModuleState<S>,
    ctx: &CallContext,
    call: ExamCall,
) -> HandlerResult<CallOutcome> {
    debug!(caller = %ctx.caller, call = call.name(), "Dispatching call");

    match call {
        ExamCall::RegisterOrganization {
            organization_id,
            name,
        } => handle_register_organization(state, ctx, organization_id, name)
            .map(CallOutcome::Organization),

        ExamCall::CreateExam {
            exam_id,
            title,
            content,
            organization_ids,
            threshold,
        } => handle_create_exam(state, ctx, exam_id, title, content, organization_ids, threshold)
            .map(CallOutcome::Exam),

        ExamCall::DeleteExam { exam_id } => {
            handle_delete_exam(state, ctx, exam_id).map(|exam| CallOutcome::ExamDeleted(exam.id))
        }

        ExamCall::SubmitShare {
            exam_id,
            organization_id,
            share,
        } => handle_submit_share(state, ctx, exam_id, organization_id, share)
            .map(CallOutcome::Share),

        ExamCall::RetractShare {
            exam_id,
            organization_id,
        } => handle_retract_share(state, ctx, exam_id, organization_id)
            .map(|()| CallOutcome::ShareRetracted),

        ExamCall::ClearOrganizationShare {
            organization_id,
            exam_id,
        } => handle_clear_organization_share(state, ctx, organization_id, exam_id)
            .map(CallOutcome::ShareCleared),

        ExamCall::CreateQuestion {
            question_id,
            exam_id,
            organization_id,
            content,
            options,
            answer,
            passphrase,
        } => handle_create_question(
            state,
            ctx,
            question_id,
            exam_id,
            organization_id,
            content,
            options,
            answer,
            &passphrase,
        )
        .map(CallOutcome::Question),

        ExamCall::DecryptQuestion {
            question_id,
            passphrase,
        } => handle_decrypt_question(state, ctx, question_id, &passphrase)
            .map(CallOutcome::PlainQuestion),

        ExamCall::DeleteQuestion { question_id } => handle_delete_question(state, ctx, question_id)
            .map(|question| CallOutcome::QuestionDeleted(question.id)),

        ExamCall::DecryptAllQuestions {
            exam_id,
            organization_id,
            passphrase,
        } => handle_decrypt_all_questions(state, ctx, exam_id, organization_id, &passphrase)
            .map(CallOutcome::DecryptReport),

        ExamCall::SubmitAnswers { batch } => {
            handle_submit_answers(state, ctx, batch).map(CallOutcome::Answers)
        }

        ExamCall::CalculateResults { exam_id } => {
            handle_calculate_results(state, ctx, exam_id).map(CallOutcome::Results)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exam_crypto::{public_key_pem, sign_message, RsaPrivateKey};
    use exam_types::{QuestionBody, StudentId};
    use std::sync::OnceLock;

    fn test_context() -> CallContext {
        CallContext {
            caller: "tester".into(),
            timestamp: 1000,
        }
    }

    fn student_key() -> &'static RsaPrivateKey {
        static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
        KEY.get_or_init(|| RsaPrivateKey::new(&mut OsRng, 1024).expect("keygen"))
    }

    fn options() -> QuestionOptions<String> {
        QuestionOptions {
            a: "2".into(),
            b: "3".into(),
            c: "4".into(),
            d: "5".into(),
        }
    }

    /// Three organizations, one 2-of-3 exam, one protected question by org-a.
    fn setup_state() -> ModuleState {
        let state = ModuleState::new();
        let ctx = test_context();
        for id in ["org-a", "org-b", "org-c"] {
            handle_register_organization(&state, &ctx, id.into(), id.to_uppercase()).unwrap();
        }
        handle_create_exam(
            &state,
            &ctx,
            "exam-1".into(),
            "Arithmetic".into(),
            "Sealed paper".into(),
            vec!["org-a".into(), "org-b".into(), "org-c".into()],
            2,
        )
        .unwrap();
        handle_create_question(
            &state,
            &ctx,
            "q1".into(),
            "exam-1".into(),
            "org-a".into(),
            "1 + 1 = ?".into(),
            options(),
            AnswerChoice::A,
            "secret words",
        )
        .unwrap();
        state
    }

    fn issued_share(state: &ModuleState, org: &str) -> ShareBytes {
        state
            .store
            .get_organization(&org.into())
            .unwrap()
            .share_for(&"exam-1".into())
            .unwrap()
            .clone()
    }

    fn signed(question: &str, student: &str, answer: AnswerChoice) -> SignedAnswer {
        let message = serde_json::to_string(&AnswerMessage {
            question_id: question.into(),
            answer,
            exam_id: "exam-1".into(),
            student_id: student.into(),
        })
        .unwrap();
        let key = student_key();
        SignedAnswer {
            signature: sign_message(key, message.as_bytes()).unwrap(),
            public_key: public_key_pem(&key.to_public_key()).unwrap(),
            message,
        }
    }

    #[test]
    fn test_create_exam_issues_shares() {
        let state = setup_state();
        for org in ["org-a", "org-b", "org-c"] {
            assert_eq!(issued_share(&state, org).as_bytes().len(), 33);
        }
        let exam = state.store.get_exam(&"exam-1".into()).unwrap();
        assert_eq!(exam.threshold, 2);
        assert!(!exam.is_decrypted);
        assert_eq!(exam.created_at, 1000);
    }

    #[test]
    fn test_create_exam_validation() {
        let state = setup_state();
        let ctx = test_context();

        let duplicate = handle_create_exam(
            &state,
            &ctx,
            "exam-1".into(),
            "Again".into(),
            "x".into(),
            vec!["org-a".into()],
            1,
        );
        assert_eq!(duplicate.unwrap_err(), ExamError::ExamAlreadyExists("exam-1".into()));

        let unknown = handle_create_exam(
            &state,
            &ctx,
            "exam-2".into(),
            "T".into(),
            "x".into(),
            vec!["org-z".into()],
            1,
        );
        assert_eq!(unknown.unwrap_err(), ExamError::OrganizationNotFound("org-z".into()));

        let too_high = handle_create_exam(
            &state,
            &ctx,
            "exam-2".into(),
            "T".into(),
            "x".into(),
            vec!["org-a".into(), "org-b".into()],
            3,
        );
        assert!(matches!(too_high, Err(ExamError::InvalidThreshold(_))));
        assert!(state.store.get_exam(&"exam-2".into()).is_none());
    }

    #[test]
    fn test_submit_share_flow() {
        let state = setup_state();
        let ctx = test_context();

        let first = handle_submit_share(
            &state,
            &ctx,
            "exam-1".into(),
            "org-a".into(),
            issued_share(&state, "org-a"),
        )
        .unwrap();
        assert_eq!(first.remaining, 1);
        assert!(!first.decrypted);

        let again = handle_submit_share(
            &state,
            &ctx,
            "exam-1".into(),
            "org-a".into(),
            issued_share(&state, "org-a"),
        );
        assert!(matches!(again, Err(ExamError::DuplicateShareSubmission { .. })));

        let second = handle_submit_share(
            &state,
            &ctx,
            "exam-1".into(),
            "org-c".into(),
            issued_share(&state, "org-c"),
        )
        .unwrap();
        assert!(second.decrypted);
        assert_eq!(second.decrypted_content.as_deref(), Some("Sealed paper"));

        let exam = state.store.get_exam(&"exam-1".into()).unwrap();
        assert!(exam.is_decrypted);
        assert_eq!(exam.decrypted_content.as_deref(), Some("Sealed paper"));
    }

    #[test]
    fn test_submit_share_unknown_exam() {
        let state = setup_state();
        let result = handle_submit_share(
            &state,
            &test_context(),
            "nope".into(),
            "org-a".into(),
            ShareBytes(vec![1; 33]),
        );
        assert_eq!(result.unwrap_err(), ExamError::ExamNotFound("nope".into()));
    }

    #[test]
    fn test_failed_reconstruction_is_persisted() {
        let state = setup_state();
        let ctx = test_context();

        handle_submit_share(&state, &ctx, "exam-1".into(), "org-a".into(), issued_share(&state, "org-a"))
            .unwrap();
        // org-b hands back org-a's share: same index, reconstruction cannot work
        let err = handle_submit_share(
            &state,
            &ctx,
            "exam-1".into(),
            "org-b".into(),
            issued_share(&state, "org-a"),
        )
        .unwrap_err();
        assert!(matches!(err, ExamError::DecryptionFailed { .. }));

        let exam = state.store.get_exam(&"exam-1".into()).unwrap();
        assert_eq!(exam.shares_collected(), 2);
        assert_eq!(exam.reconstruction_failures, 1);
        assert!(!exam.is_decrypted);

        handle_retract_share(&state, &ctx, "exam-1".into(), "org-b".into()).unwrap();
        let outcome = handle_submit_share(
            &state,
            &ctx,
            "exam-1".into(),
            "org-b".into(),
            issued_share(&state, "org-b"),
        )
        .unwrap();
        assert!(outcome.decrypted);
    }

    #[test]
    fn test_decrypt_question_wrong_passphrase_leaves_record() {
        let state = setup_state();
        let before = state.store.get_question(&"q1".into()).unwrap();

        let result = handle_decrypt_question(&state, &test_context(), "q1".into(), "guess");
        assert!(matches!(result, Err(ExamError::DecryptionFailed { .. })));
        assert_eq!(state.store.get_question(&"q1".into()).unwrap(), before);
    }

    #[test]
    fn test_decrypt_question() {
        let state = setup_state();
        let plain =
            handle_decrypt_question(&state, &test_context(), "q1".into(), "secret words").unwrap();
        assert_eq!(plain.content, "1 + 1 = ?");
        assert_eq!(plain.options, options());
        assert_eq!(plain.answer, AnswerChoice::A);

        let stored = state.store.get_question(&"q1".into()).unwrap();
        assert!(!stored.is_encrypted());
        assert!(matches!(stored.body, QuestionBody::Open { .. }));
    }

    #[test]
    fn test_decrypt_all_collects_failures() {
        let state = setup_state();
        let ctx = test_context();
        handle_create_question(
            &state,
            &ctx,
            "q2".into(),
            "exam-1".into(),
            "org-a".into(),
            "2 + 2 = ?".into(),
            options(),
            AnswerChoice::C,
            "other words",
        )
        .unwrap();

        let report =
            handle_decrypt_all_questions(&state, &ctx, "exam-1".into(), "org-a".into(), "secret words")
                .unwrap();
        assert_eq!(report.succeeded, vec![QuestionId::from("q1")]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].question_id, QuestionId::from("q2"));
        assert!(state.store.get_question(&"q2".into()).unwrap().is_encrypted());
    }

    #[test]
    fn test_create_question_requires_assignment() {
        let state = setup_state();
        let ctx = test_context();
        handle_register_organization(&state, &ctx, "org-x".into(), "X".into()).unwrap();

        let result = handle_create_question(
            &state,
            &ctx,
            "q9".into(),
            "exam-1".into(),
            "org-x".into(),
            "?".into(),
            options(),
            AnswerChoice::B,
            "pw",
        );
        assert!(matches!(result, Err(ExamError::NotAssignedOrganization { .. })));

        let empty = handle_create_question(
            &state,
            &ctx,
            "q9".into(),
            "exam-1".into(),
            "org-a".into(),
            "?".into(),
            options(),
            AnswerChoice::B,
            "",
        );
        assert_eq!(empty.unwrap_err(), ExamError::EmptyPassphrase);
    }

    #[test]
    fn test_submit_answers_and_results() {
        let state = setup_state();
        let ctx = test_context();

        let receipt = handle_submit_answers(
            &state,
            &ctx,
            vec![
                signed("q1", "alice", AnswerChoice::A),
                signed("q1", "bob", AnswerChoice::D),
            ],
        )
        .unwrap();
        assert_eq!(receipt.accepted, 2);

        let results = handle_calculate_results(&state, &ctx, "exam-1".into()).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].student_id, StudentId::from("alice"));
        assert_eq!(results[0].percentage, 100.0);
        assert_eq!(results[1].percentage, 0.0);
        assert_eq!(state.store.results_for_exam(&"exam-1".into()).len(), 2);
    }

    #[test]
    fn test_tampered_batch_stores_nothing() {
        let state = setup_state();
        let mut tampered = signed("q1", "carol", AnswerChoice::B);
        tampered.message = tampered.message.replace("\"b\"", "\"a\"");

        let result = handle_submit_answers(
            &state,
            &test_context(),
            vec![signed("q1", "alice", AnswerChoice::A), tampered],
        );
        assert!(matches!(
            result,
            Err(ExamError::SignatureVerificationFailed { index: 1, .. })
        ));
        assert!(!state.store.has_answer(&"q1".into(), &"alice".into()));
    }

    #[test]
    fn test_duplicate_answers_rejected() {
        let state = setup_state();
        let ctx = test_context();

        let within = handle_submit_answers(
            &state,
            &ctx,
            vec![
                signed("q1", "alice", AnswerChoice::A),
                signed("q1", "alice", AnswerChoice::B),
            ],
        );
        assert!(matches!(within, Err(ExamError::DuplicateAnswer { .. })));

        handle_submit_answers(&state, &ctx, vec![signed("q1", "alice", AnswerChoice::A)]).unwrap();
        let later =
            handle_submit_answers(&state, &ctx, vec![signed("q1", "alice", AnswerChoice::C)]);
        assert!(matches!(later, Err(ExamError::DuplicateAnswer { .. })));
    }

    #[test]
    fn test_batch_limits() {
        let mut state = setup_state();
        let ctx = test_context();
        assert_eq!(
            handle_submit_answers(&state, &ctx, vec![]).unwrap_err(),
            ExamError::EmptyBatch
        );

        state.config.max_answer_batch = 1;
        let result = handle_submit_answers(
            &state,
            &ctx,
            vec![
                signed("q1", "alice", AnswerChoice::A),
                signed("q1", "bob", AnswerChoice::A),
            ],
        );
        assert_eq!(result.unwrap_err(), ExamError::BatchTooLarge { size: 2, max: 1 });
    }

    #[test]
    fn test_answer_to_unknown_question() {
        let state = setup_state();
        let result =
            handle_submit_answers(&state, &test_context(), vec![signed("q404", "alice", AnswerChoice::A)]);
        assert_eq!(result.unwrap_err(), ExamError::QuestionNotFound("q404".into()));
    }

    #[test]
    fn test_delete_exam_clears_only_its_shares() {
        let state = setup_state();
        let ctx = test_context();
        handle_create_exam(
            &state,
            &ctx,
            "exam-2".into(),
            "Other".into(),
            "Other paper".into(),
            vec!["org-a".into()],
            1,
        )
        .unwrap();

        handle_delete_exam(&state, &ctx, "exam-1".into()).unwrap();

        let org_a = state.store.get_organization(&"org-a".into()).unwrap();
        assert!(org_a.share_for(&"exam-1".into()).is_none());
        assert!(org_a.share_for(&"exam-2".into()).is_some());
        assert!(state.store.get_question(&"q1".into()).is_none());
        assert_eq!(
            handle_delete_exam(&state, &ctx, "exam-1".into()).unwrap_err(),
            ExamError::ExamNotFound("exam-1".into())
        );
    }

    #[test]
    fn test_clear_organization_share() {
        let state = setup_state();
        let ctx = test_context();
        assert!(handle_clear_organization_share(&state, &ctx, "org-b".into(), "exam-1".into()).unwrap());
        assert!(!handle_clear_organization_share(&state, &ctx, "org-b".into(), "exam-1".into()).unwrap());
        assert!(issued_share(&state, "org-a").as_bytes().len() == 33);
    }

    #[test]
    fn test_answers_do_not_outlive_concurrent_exam_delete() {
        let state = setup_state();
        let lock = state.locks.for_exam(&"exam-1".into());

        std::thread::scope(|s| {
            let guard = lock.lock();
            let submitter = s.spawn(|| {
                handle_submit_answers(
                    &state,
                    &test_context(),
                    vec![signed("q1", "alice", AnswerChoice::A)],
                )
            });
            // Stand-in for a delete holding the exam lock
            std::thread::sleep(std::time::Duration::from_millis(50));
            state.store.remove_exam(&"exam-1".into());
            drop(guard);

            assert!(submitter.join().unwrap().is_err());
        });

        assert!(state.store.answers_for_exam(&"exam-1".into()).is_empty());
        assert!(!state.store.has_answer(&"q1".into(), &"alice".into()));
    }

    #[test]
    fn test_results_not_written_for_deleted_exam() {
        let state = setup_state();
        handle_submit_answers(&state, &test_context(), vec![signed("q1", "bob", AnswerChoice::A)])
            .unwrap();
        let lock = state.locks.for_exam(&"exam-1".into());

        std::thread::scope(|s| {
            let guard = lock.lock();
            let calculator =
                s.spawn(|| handle_calculate_results(&state, &test_context(), "exam-1".into()));
            std::thread::sleep(std::time::Duration::from_millis(50));
            state.store.remove_exam(&"exam-1".into());
            drop(guard);

            assert_eq!(
                calculator.join().unwrap().unwrap_err(),
                ExamError::ExamNotFound("exam-1".into())
            );
        });

        assert!(state.store.results_for_exam(&"exam-1".into()).is_empty());
    }

    #[test]
    fn test_delete_question_drops_answers() {
        let state = setup_state();
        let ctx = test_context();
        handle_submit_answers(&state, &ctx, vec![signed("q1", "alice", AnswerChoice::A)]).unwrap();

        let deleted = handle_delete_question(&state, &ctx, "q1".into()).unwrap();
        assert_eq!(deleted.id, QuestionId::from("q1"));
        assert!(state.store.get_question(&"q1".into()).is_none());
        assert!(state.store.answers_for_exam(&"exam-1".into()).is_empty());
        assert_eq!(
            handle_delete_question(&state, &ctx, "q1".into()).unwrap_err(),
            ExamError::QuestionNotFound("q1".into())
        );

        let outcome = dispatch(&state, &ctx, ExamCall::DeleteQuestion { question_id: "q1".into() });
        assert!(outcome.is_err());
    }

    #[test]
    fn test_retract_then_resubmit() {
        let state = setup_state();
        let ctx = test_context();
        let share = issued_share(&state, "org-a");
        handle_submit_share(&state, &ctx, "exam-1".into(), "org-a".into(), share.clone()).unwrap();

        handle_retract_share(&state, &ctx, "exam-1".into(), "org-a".into()).unwrap();
        assert_eq!(state.store.get_exam(&"exam-1".into()).unwrap().shares_collected(), 0);
        assert!(matches!(
            handle_retract_share(&state, &ctx, "exam-1".into(), "org-a".into()),
            Err(ExamError::ShareNotSubmitted { .. })
        ));

        let outcome =
            handle_submit_share(&state, &ctx, "exam-1".into(), "org-a".into(), share).unwrap();
        assert_eq!(outcome.shares_collected, 1);
    }

    #[test]
    fn test_dispatch_routes_calls() {
        let state = ModuleState::new();
        let ctx = test_context();

        let outcome = dispatch(
            &state,
            &ctx,
            ExamCall::RegisterOrganization {
                organization_id: "org-a".into(),
                name: "A".into(),
            },
        )
        .unwrap();
        assert!(matches!(outcome, CallOutcome::Organization(_)));

        let outcome = dispatch(
            &state,
            &ctx,
            ExamCall::CreateExam {
                exam_id: "e".into(),
                title: "T".into(),
                content: "C".into(),
                organization_ids: vec!["org-a".into()],
                threshold: 1,
            },
        )
        .unwrap();
        assert!(matches!(outcome, CallOutcome::Exam(_)));

        let err = dispatch(&state, &ctx, ExamCall::DeleteExam { exam_id: "zz".into() }).unwrap_err();
        assert_eq!(err, ExamError::ExamNotFound("zz".into()));
    }
}
