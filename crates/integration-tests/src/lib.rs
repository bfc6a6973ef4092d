//! End-to-end integration tests for the threshold-protected exam system.
//!
//! These tests exercise the full exam lifecycle:
//! 1. Organization registration and exam creation
//! 2. Protected question authoring and decryption
//! 3. Share hand-back and exactly-once reconstruction
//! 4. Signed answer batches
//! 5. Result aggregation

use std::sync::{Mutex, OnceLock};
use std::thread;

use exam_client::{generate_keypair, AnswerBuilder};
use exam_crypto::{combine_shares, decrypt, encrypt, split_secret, RsaPrivateKey};
use exam_decryption_coordinator::AccumulatorState;
use exam_module::handlers::{
    handle_calculate_results, handle_create_exam, handle_create_question,
    handle_decrypt_all_questions, handle_decrypt_question, handle_register_organization,
    handle_submit_answers, handle_submit_share,
};
use exam_module::queries::{handle_query, ExamQuery, ExamQueryResponse};
use exam_module::{CallContext, ExamError, ExamStore, MemoryStore, ModuleState, ProtocolConfig};
use exam_types::{AnswerChoice, ExamId, QuestionOptions, ShareBytes, SignedAnswer, StudentId};

use rand::rngs::OsRng;
use rand::RngCore;

const EXAM_CONTENT: &str = "Section A: answer all questions.\nSection B: answer two of three.";

/// Test the complete exam flow.
#[test]
fn test_full_exam_flow() {
    let state = ModuleState::new();
    let ctx = ctx();

    // ========================================
    // Phase 1: Setup - organizations and exam
    // ========================================

    register_orgs(&state, &["org-a", "org-b", "org-c"]);
    let exam = handle_create_exam(
        &state,
        &ctx,
        "final".into(),
        "Final exam".into(),
        EXAM_CONTENT.into(),
        vec!["org-a".into(), "org-b".into(), "org-c".into()],
        2,
    )
    .unwrap();
    assert_ne!(exam.encrypted_content.as_bytes(), EXAM_CONTENT.as_bytes());

    println!("Exam {} created, 2-of-3", exam.id);

    // ========================================
    // Phase 2: Organizations author questions
    // ========================================

    add_question(&state, "q1", "org-a", "Capital of France?", AnswerChoice::B, "alpha");
    add_question(&state, "q2", "org-a", "2 + 2?", AnswerChoice::C, "alpha");
    add_question(&state, "q3", "org-b", "Largest planet?", AnswerChoice::D, "bravo");

    // ========================================
    // Phase 3: Shares handed back
    // ========================================

    let first = handle_submit_share(&state, &ctx, "final".into(), "org-a".into(), share_of(&state, "org-a", "final"))
        .unwrap();
    assert_eq!(first.remaining, 1);
    assert!(!first.decrypted);

    let second = handle_submit_share(&state, &ctx, "final".into(), "org-b".into(), share_of(&state, "org-b", "final"))
        .unwrap();
    assert!(second.decrypted);
    assert_eq!(second.decrypted_content.as_deref(), Some(EXAM_CONTENT));

    println!("Exam content reconstructed from 2 shares");

    // ========================================
    // Phase 4: Questions decrypted
    // ========================================

    let report =
        handle_decrypt_all_questions(&state, &ctx, "final".into(), "org-a".into(), "alpha").unwrap();
    assert_eq!(report.succeeded.len(), 2);
    assert!(report.failed.is_empty());

    let q3 = handle_decrypt_question(&state, &ctx, "q3".into(), "bravo").unwrap();
    assert_eq!(q3.content, "Largest planet?");

    // ========================================
    // Phase 5: Students answer
    // ========================================

    let alice = AnswerBuilder::new("final".into(), "alice".into())
        .answer("q1".into(), AnswerChoice::B)
        .answer("q2".into(), AnswerChoice::C)
        .answer("q3".into(), AnswerChoice::A)
        .sign(student_key())
        .unwrap();
    let bob = AnswerBuilder::new("final".into(), "bob".into())
        .answer("q1".into(), AnswerChoice::B)
        .sign(student_key())
        .unwrap();

    assert_eq!(handle_submit_answers(&state, &ctx, alice).unwrap().accepted, 3);
    assert_eq!(handle_submit_answers(&state, &ctx, bob).unwrap().accepted, 1);

    // ========================================
    // Phase 6: Results
    // ========================================

    let results = handle_calculate_results(&state, &ctx, "final".into()).unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].student_id, StudentId::from("alice"));
    assert_eq!((results[0].correct, results[0].total), (2, 3));
    assert_eq!(results[1].student_id, StudentId::from("bob"));
    assert_eq!(results[1].percentage, 100.0);

    // Recomputation is idempotent
    let again = handle_calculate_results(&state, &ctx, "final".into()).unwrap();
    assert_eq!(results, again);

    println!("Results computed for {} students", results.len());
}

/// Resubmitting a share is rejected before and after the threshold.
#[test]
fn test_duplicate_share_leaves_exam_unchanged() {
    let state = exam_state(2);
    let ctx = ctx();
    let share_a = share_of(&state, "org-a", "exam");

    handle_submit_share(&state, &ctx, "exam".into(), "org-a".into(), share_a.clone()).unwrap();
    let before = state.store.get_exam(&"exam".into()).unwrap();

    let err = handle_submit_share(&state, &ctx, "exam".into(), "org-a".into(), share_a.clone())
        .unwrap_err();
    assert!(matches!(err, ExamError::DuplicateShareSubmission { .. }));
    assert_eq!(state.store.get_exam(&"exam".into()).unwrap(), before);

    handle_submit_share(&state, &ctx, "exam".into(), "org-c".into(), share_of(&state, "org-c", "exam"))
        .unwrap();
    let decrypted = state.store.get_exam(&"exam".into()).unwrap();
    assert!(decrypted.is_decrypted);

    let err = handle_submit_share(&state, &ctx, "exam".into(), "org-a".into(), share_a).unwrap_err();
    assert!(matches!(err, ExamError::DuplicateShareSubmission { .. }));
    assert_eq!(state.store.get_exam(&"exam".into()).unwrap(), decrypted);
}

/// An organization outside the exam cannot contribute.
#[test]
fn test_unassigned_organization_rejected() {
    let state = exam_state(2);
    register_orgs(&state, &["outsider"]);

    let err = handle_submit_share(
        &state,
        &ctx(),
        "exam".into(),
        "outsider".into(),
        share_of(&state, "org-a", "exam"),
    )
    .unwrap_err();
    assert!(matches!(err, ExamError::NotAssignedOrganization { .. }));
    assert_eq!(state.store.get_exam(&"exam".into()).unwrap().shares_collected(), 0);
}

/// A wrong passphrase leaves the stored question exactly as it was.
#[test]
fn test_wrong_passphrase_leaves_question_unchanged() {
    let state = exam_state(2);
    add_question(&state, "q1", "org-a", "Boiling point of water?", AnswerChoice::A, "correct horse");
    let before = state.store.get_question(&"q1".into()).unwrap();

    let err = handle_decrypt_question(&state, &ctx(), "q1".into(), "battery staple").unwrap_err();
    assert!(matches!(err, ExamError::DecryptionFailed { .. }));

    let after = state.store.get_question(&"q1".into()).unwrap();
    assert_eq!(after, before);
    assert!(after.is_encrypted());
}

/// One bad signature rejects the whole batch.
#[test]
fn test_batch_with_one_bad_signature_persists_nothing() {
    let state = exam_state(2);
    add_question(&state, "q1", "org-a", "A?", AnswerChoice::A, "pw");
    add_question(&state, "q2", "org-a", "B?", AnswerChoice::B, "pw");
    add_question(&state, "q3", "org-a", "C?", AnswerChoice::C, "pw");

    let mut batch = AnswerBuilder::new("exam".into(), "alice".into())
        .answer("q1".into(), AnswerChoice::A)
        .answer("q2".into(), AnswerChoice::B)
        .answer("q3".into(), AnswerChoice::C)
        .sign(student_key())
        .unwrap();

    // Signed by someone else but claiming alice's key
    let forged = AnswerBuilder::new("exam".into(), "alice".into())
        .answer("q3".into(), AnswerChoice::C)
        .sign(other_key())
        .unwrap();
    batch[2].signature = forged[0].signature.clone();

    let err = handle_submit_answers(&state, &ctx(), batch).unwrap_err();
    assert!(matches!(err, ExamError::SignatureVerificationFailed { index: 2, .. }));

    assert!(state.store.answers_for_exam(&"exam".into()).is_empty());
}

/// The signed bytes are verified as sent, not re-serialized.
#[test]
fn test_reformatted_message_rejected() {
    let state = exam_state(2);
    add_question(&state, "q1", "org-a", "A?", AnswerChoice::A, "pw");

    let mut batch: Vec<SignedAnswer> = AnswerBuilder::new("exam".into(), "alice".into())
        .answer("q1".into(), AnswerChoice::A)
        .sign(student_key())
        .unwrap();

    // Same JSON content, different bytes
    let value: serde_json::Value = serde_json::from_str(&batch[0].message).unwrap();
    batch[0].message = serde_json::to_string_pretty(&value).unwrap();

    let err = handle_submit_answers(&state, &ctx(), batch).unwrap_err();
    assert!(matches!(err, ExamError::SignatureVerificationFailed { index: 0, .. }));
}

/// A student with no answers gets no result row.
#[test]
fn test_student_without_answers_excluded() {
    let state = exam_state(2);
    let ctx = ctx();
    add_question(&state, "q1", "org-a", "A?", AnswerChoice::A, "pw");

    let results = handle_calculate_results(&state, &ctx, "exam".into()).unwrap();
    assert!(results.is_empty());

    let batch = AnswerBuilder::new("exam".into(), "carol".into())
        .answer("q1".into(), AnswerChoice::B)
        .sign(student_key())
        .unwrap();
    handle_submit_answers(&state, &ctx, batch).unwrap();

    let results = handle_calculate_results(&state, &ctx, "exam".into()).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].student_id, StudentId::from("carol"));
    assert_eq!(results[0].percentage, 0.0);
    assert!(results.iter().all(|r| r.percentage.is_finite()));
}

/// Five organizations submit at once; reconstruction runs exactly once.
#[test]
fn test_concurrent_share_submission() {
    let state = ModuleState::new();
    let orgs = ["o1", "o2", "o3", "o4", "o5"];
    register_orgs(&state, &orgs);
    handle_create_exam(
        &state,
        &ctx(),
        "race".into(),
        "Race".into(),
        EXAM_CONTENT.into(),
        orgs.iter().map(|o| (*o).into()).collect(),
        3,
    )
    .unwrap();

    let outcomes = Mutex::new(Vec::new());
    thread::scope(|s| {
        for org in orgs {
            let share = share_of(&state, org, "race");
            let state = &state;
            let outcomes = &outcomes;
            s.spawn(move || {
                let outcome = handle_submit_share(state, &ctx(), "race".into(), org.into(), share);
                outcomes.lock().unwrap().push(outcome);
            });
        }
    });

    let outcomes: Vec<_> = outcomes
        .into_inner()
        .unwrap()
        .into_iter()
        .map(|o| o.unwrap())
        .collect();
    assert_eq!(outcomes.len(), 5);
    assert_eq!(outcomes.iter().filter(|o| o.reconstructed).count(), 1);

    let mut collected: Vec<usize> = outcomes.iter().map(|o| o.shares_collected).collect();
    collected.sort_unstable();
    assert_eq!(collected, vec![1, 2, 3, 4, 5]);

    let exam = state.store.get_exam(&"race".into()).unwrap();
    assert!(exam.is_decrypted);
    assert_eq!(exam.decrypted_content.as_deref(), Some(EXAM_CONTENT));
    assert_eq!(exam.shares_collected(), 5);
}

/// Two threads race the same organization's share: one wins.
#[test]
fn test_concurrent_duplicate_submission() {
    let state = exam_state(3);
    let share = share_of(&state, "org-a", "exam");

    let outcomes = Mutex::new(Vec::new());
    thread::scope(|s| {
        for _ in 0..2 {
            let share = share.clone();
            let state = &state;
            let outcomes = &outcomes;
            s.spawn(move || {
                let outcome = handle_submit_share(state, &ctx(), "exam".into(), "org-a".into(), share);
                outcomes.lock().unwrap().push(outcome);
            });
        }
    });

    let outcomes = outcomes.into_inner().unwrap();
    assert_eq!(outcomes.iter().filter(|o| o.is_ok()).count(), 1);
    assert!(outcomes
        .iter()
        .any(|o| matches!(o, Err(ExamError::DuplicateShareSubmission { .. }))));
    assert_eq!(state.store.get_exam(&"exam".into()).unwrap().shares_collected(), 1);
}

/// Any threshold-sized subset reconstructs the key.
#[test]
fn test_every_threshold_subset_reconstructs() {
    let mut key = [0u8; 32];
    OsRng.fill_bytes(&mut key);
    let blob = encrypt(b"payload", &key);

    let shares = split_secret(&key, 5, 3).unwrap();
    for i in 0..5 {
        for j in (i + 1)..5 {
            for k in (j + 1)..5 {
                let subset: Vec<ShareBytes> =
                    vec![shares[i].clone(), shares[j].clone(), shares[k].clone()];
                let recovered = combine_shares(&subset).unwrap();
                assert_eq!(recovered.as_slice(), &key[..]);
                assert_eq!(decrypt(&blob, &recovered).unwrap(), b"payload");
            }
        }
    }

    // Below threshold the key comes out wrong and the cipher says so
    let short = combine_shares(&shares[..2]).unwrap();
    assert_ne!(short.as_slice(), &key[..]);
}

/// State survives a snapshot round trip mid-protocol.
#[test]
fn test_snapshot_resume() {
    let state = exam_state(2);
    let ctx = ctx();
    handle_submit_share(&state, &ctx, "exam".into(), "org-b".into(), share_of(&state, "org-b", "exam"))
        .unwrap();

    let json = serde_json::to_string(&state.store.snapshot()).unwrap();
    let resumed = ModuleState::with_store(
        MemoryStore::from_snapshot(serde_json::from_str(&json).unwrap()),
        ProtocolConfig::default(),
    );

    let progress = match handle_query(&resumed, ExamQuery::ShareProgress { exam_id: "exam".into() }) {
        ExamQueryResponse::Progress(Some(progress)) => progress,
        other => panic!("unexpected response: {:?}", other),
    };
    assert_eq!(progress.state, AccumulatorState::Collecting);
    assert_eq!(progress.remaining, 1);

    let outcome = handle_submit_share(
        &resumed,
        &ctx,
        "exam".into(),
        "org-c".into(),
        share_of(&resumed, "org-c", "exam"),
    )
    .unwrap();
    assert!(outcome.decrypted);
}

// Helper functions

fn ctx() -> CallContext {
    CallContext {
        caller: "integration".into(),
        timestamp: 1_700_000_000,
    }
}

fn student_key() -> &'static RsaPrivateKey {
    static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
    KEY.get_or_init(|| generate_keypair(1024, &mut OsRng).expect("keygen"))
}

fn other_key() -> &'static RsaPrivateKey {
    static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
    KEY.get_or_init(|| generate_keypair(1024, &mut OsRng).expect("keygen"))
}

fn register_orgs(state: &ModuleState, ids: &[&str]) {
    for id in ids {
        handle_register_organization(state, &ctx(), (*id).into(), id.to_uppercase()).unwrap();
    }
}

/// Three organizations and one exam `exam` with the given threshold.
fn exam_state(threshold: u32) -> ModuleState {
    let state = ModuleState::new();
    register_orgs(&state, &["org-a", "org-b", "org-c"]);
    handle_create_exam(
        &state,
        &ctx(),
        "exam".into(),
        "Exam".into(),
        EXAM_CONTENT.into(),
        vec!["org-a".into(), "org-b".into(), "org-c".into()],
        threshold,
    )
    .unwrap();
    state
}

fn share_of(state: &ModuleState, org: &str, exam: &str) -> ShareBytes {
    state
        .store
        .get_organization(&org.into())
        .and_then(|o| o.share_for(&ExamId::from(exam)).cloned())
        .expect("share issued at exam creation")
}

fn add_question(
    state: &ModuleState,
    id: &str,
    org: &str,
    content: &str,
    answer: AnswerChoice,
    passphrase: &str,
) {
    let exam_id = state
        .store
        .list_exams()
        .into_iter()
        .find(|e| e.is_assigned(&org.into()))
        .map(|e| e.id)
        .expect("exam for organization");
    handle_create_question(
        state,
        &ctx(),
        id.into(),
        exam_id,
        org.into(),
        content.into(),
        QuestionOptions {
            a: "first".into(),
            b: "second".into(),
            c: "third".into(),
            d: "fourth".into(),
        },
        answer,
        passphrase,
    )
    .unwrap();
}
