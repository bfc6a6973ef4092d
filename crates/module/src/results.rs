//! Score aggregation over verified answers.

use std::collections::{BTreeMap, HashMap};

use exam_types::{Answer, AnswerChoice, ExamId, ExamResult, Question, QuestionId, StudentId};

/// Compute one result per student who answered at least one question of `exam_id`.
///
/// Answers are joined to questions by question id; answers whose question
/// is not among `questions` are ignored. Output is ordered by student id.
pub fn aggregate_results(
    exam_id: &ExamId,
    questions: &[Question],
    answers: &[Answer],
) -> Vec<ExamResult> {
    let key: HashMap<&QuestionId, AnswerChoice> = questions
        .iter()
        .filter(|q| &q.exam_id == exam_id)
        .map(|q| (&q.id, q.answer()))
        .collect();

    let mut tally: BTreeMap<&StudentId, (u32, u32)> = BTreeMap::new();
    for answer in answers {
        let Some(expected) = key.get(&answer.question_id) else {
            continue;
        };
        let (correct, total) = tally.entry(&answer.student_id).or_default();
        *total += 1;
        if answer.answer_choice == *expected {
            *correct += 1;
        }
    }

    tally
        .into_iter()
        .filter(|(_, (_, total))| *total > 0)
        .map(|(student_id, (correct, total))| ExamResult {
            student_id: student_id.clone(),
            exam_id: exam_id.clone(),
            correct,
            total,
            percentage: 100.0 * f64::from(correct) / f64::from(total),
        })
        .collect()
}
