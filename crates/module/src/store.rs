//! Record store for the exam module.
//!
//! [`ExamStore`] is the get/put contract the handlers are written against.
//! [`MemoryStore`] keeps everything in `parking_lot` guarded maps and can be
//! converted to and from a serde [`StoreSnapshot`].

use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use exam_types::{
    Answer, Exam, ExamId, ExamResult, Organization, OrganizationId, Question, QuestionId,
    ShareBytes, StudentId,
};

/// Failures reported by a store on write.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("Answer already stored for question {question_id} and student {student_id}")]
    AnswerExists {
        question_id: QuestionId,
        student_id: StudentId,
    },
}

/// Persistence contract consumed by the handlers.
///
/// Single-record reads and writes are atomic. Multi-step sequences over one
/// exam are serialized by the caller through [`crate::state::ExamLocks`].
pub trait ExamStore: Send + Sync {
    // === Exams ===
    fn get_exam(&self, exam_id: &ExamId) -> Option<Exam>;
    fn put_exam(&self, exam: Exam);
    fn list_exams(&self) -> Vec<Exam>;
    /// Remove an exam together with its questions, answers and results.
    fn remove_exam(&self, exam_id: &ExamId) -> Option<Exam>;

    // === Organizations ===
    fn get_organization(&self, organization_id: &OrganizationId) -> Option<Organization>;
    /// Insert a new organization. Returns false if the id is taken.
    fn insert_organization(&self, organization: Organization) -> bool;
    /// Record the share issued to an organization. Returns false if the
    /// organization does not exist.
    fn set_organization_share(
        &self,
        organization_id: &OrganizationId,
        exam_id: &ExamId,
        share: ShareBytes,
    ) -> bool;
    /// Clear one (organization, exam) share. Returns the removed share.
    fn clear_organization_share(
        &self,
        organization_id: &OrganizationId,
        exam_id: &ExamId,
    ) -> Option<ShareBytes>;

    // === Questions ===
    fn get_question(&self, question_id: &QuestionId) -> Option<Question>;
    fn put_question(&self, question: Question);
    fn questions_for_exam(&self, exam_id: &ExamId) -> Vec<Question>;
    fn questions_for_organization(&self, organization_id: &OrganizationId) -> Vec<Question>;
    /// Remove a question together with its answers.
    fn remove_question(&self, question_id: &QuestionId) -> Option<Question>;

    // === Answers ===
    fn has_answer(&self, question_id: &QuestionId, student_id: &StudentId) -> bool;
    /// Commit a batch of answers. Either every answer is stored or none is.
    fn put_answers(&self, answers: Vec<Answer>) -> Result<(), StoreError>;
    fn answers_for_exam(&self, exam_id: &ExamId) -> Vec<Answer>;

    // === Results ===
    /// Insert or replace the result for `(student_id, exam_id)`.
    fn upsert_result(&self, result: ExamResult);
    fn results_for_exam(&self, exam_id: &ExamId) -> Vec<ExamResult>;
}

/// Serializable image of a [`MemoryStore`].
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StoreSnapshot {
    #[serde(default)]
    pub exams: Vec<Exam>,
    #[serde(default)]
    pub organizations: Vec<Organization>,
    #[serde(default)]
    pub questions: Vec<Question>,
    #[serde(default)]
    pub answers: Vec<Answer>,
    #[serde(default)]
    pub results: Vec<ExamResult>,
}

/// In-process store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    exams: RwLock<BTreeMap<ExamId, Exam>>,
    organizations: RwLock<BTreeMap<OrganizationId, Organization>>,
    questions: RwLock<BTreeMap<QuestionId, Question>>,
    /// Answers keyed by (question, student)
    answers: RwLock<HashMap<(QuestionId, StudentId), Answer>>,
    /// Results keyed by (exam, student)
    results: RwLock<BTreeMap<(ExamId, StudentId), ExamResult>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        let store = Self::new();
        {
            let mut exams = store.exams.write();
            for exam in snapshot.exams {
                exams.insert(exam.id.clone(), exam);
            }
            let mut organizations = store.organizations.write();
            for organization in snapshot.organizations {
                organizations.insert(organization.id.clone(), organization);
            }
            let mut questions = store.questions.write();
            for question in snapshot.questions {
                questions.insert(question.id.clone(), question);
            }
            let mut answers = store.answers.write();
            for answer in snapshot.answers {
                answers.insert(
                    (answer.question_id.clone(), answer.student_id.clone()),
                    answer,
                );
            }
            let mut results = store.results.write();
            for result in snapshot.results {
                results.insert((result.exam_id.clone(), result.student_id.clone()), result);
            }
        }
        store
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        let mut answers: Vec<Answer> = self.answers.read().values().cloned().collect();
        answers.sort_by(|a, b| {
            (&a.exam_id, &a.question_id, &a.student_id).cmp(&(&b.exam_id, &b.question_id, &b.student_id))
        });

        StoreSnapshot {
            exams: self.exams.read().values().cloned().collect(),
            organizations: self.organizations.read().values().cloned().collect(),
            questions: self.questions.read().values().cloned().collect(),
            answers,
            results: self.results.read().values().cloned().collect(),
        }
    }
}

impl ExamStore for MemoryStore {
    fn get_exam(&self, exam_id: &ExamId) -> Option<Exam> {
        self.exams.read().get(exam_id).cloned()
    }

    fn put_exam(&self, exam: Exam) {
        self.exams.write().insert(exam.id.clone(), exam);
    }

    fn list_exams(&self) -> Vec<Exam> {
        self.exams.read().values().cloned().collect()
    }

    fn remove_exam(&self, exam_id: &ExamId) -> Option<Exam> {
        let exam = self.exams.write().remove(exam_id)?;

        let removed: Vec<QuestionId> = {
            let mut questions = self.questions.write();
            let ids: Vec<QuestionId> = questions
                .values()
                .filter(|q| &q.exam_id == exam_id)
                .map(|q| q.id.clone())
                .collect();
            for id in &ids {
                questions.remove(id);
            }
            ids
        };
        self.answers
            .write()
            .retain(|(question_id, _), answer| {
                &answer.exam_id != exam_id && !removed.contains(question_id)
            });
        self.results.write().retain(|(id, _), _| id != exam_id);

        Some(exam)
    }

    fn get_organization(&self, organization_id: &OrganizationId) -> Option<Organization> {
        self.organizations.read().get(organization_id).cloned()
    }

    fn insert_organization(&self, organization: Organization) -> bool {
        let mut organizations = self.organizations.write();
        if organizations.contains_key(&organization.id) {
            return false;
        }
        organizations.insert(organization.id.clone(), organization);
        true
    }

    fn set_organization_share(
        &self,
        organization_id: &OrganizationId,
        exam_id: &ExamId,
        share: ShareBytes,
    ) -> bool {
        match self.organizations.write().get_mut(organization_id) {
            Some(organization) => {
                organization.shares_by_exam.insert(exam_id.clone(), share);
                true
            }
            None => false,
        }
    }

    fn clear_organization_share(
        &self,
        organization_id: &OrganizationId,
        exam_id: &ExamId,
    ) -> Option<ShareBytes> {
        self.organizations
            .write()
            .get_mut(organization_id)
            .and_then(|organization| organization.shares_by_exam.remove(exam_id))
    }

    fn get_question(&self, question_id: &QuestionId) -> Option<Question> {
        self.questions.read().get(question_id).cloned()
    }

    fn put_question(&self, question: Question) {
        self.questions.write().insert(question.id.clone(), question);
    }

    fn questions_for_exam(&self, exam_id: &ExamId) -> Vec<Question> {
        self.questions
            .read()
            .values()
            .filter(|q| &q.exam_id == exam_id)
            .cloned()
            .collect()
    }

    fn questions_for_organization(&self, organization_id: &OrganizationId) -> Vec<Question> {
        self.questions
            .read()
            .values()
            .filter(|q| &q.organization_id == organization_id)
            .cloned()
            .collect()
    }

    fn remove_question(&self, question_id: &QuestionId) -> Option<Question> {
        let question = self.questions.write().remove(question_id)?;
        self.answers.write().retain(|(id, _), _| id != question_id);
        Some(question)
    }

    fn has_answer(&self, question_id: &QuestionId, student_id: &StudentId) -> bool {
        self.answers
            .read()
            .contains_key(&(question_id.clone(), student_id.clone()))
    }

    fn put_answers(&self, answers: Vec<Answer>) -> Result<(), StoreError> {
        let mut stored = self.answers.write();

        // Check the whole batch before writing any of it
        for answer in &answers {
            let key = (answer.question_id.clone(), answer.student_id.clone());
            if stored.contains_key(&key) {
                return Err(StoreError::AnswerExists {
                    question_id: key.0,
                    student_id: key.1,
                });
            }
        }

        for answer in answers {
            stored.insert(
                (answer.question_id.clone(), answer.student_id.clone()),
                answer,
            );
        }
        Ok(())
    }

    fn answers_for_exam(&self, exam_id: &ExamId) -> Vec<Answer> {
        let mut answers: Vec<Answer> = self
            .answers
            .read()
            .values()
            .filter(|a| &a.exam_id == exam_id)
            .cloned()
            .collect();
        answers.sort_by(|a, b| (&a.question_id, &a.student_id).cmp(&(&b.question_id, &b.student_id)));
        answers
    }

    fn upsert_result(&self, result: ExamResult) {
        self.results
            .write()
            .insert((result.exam_id.clone(), result.student_id.clone()), result);
    }

    fn results_for_exam(&self, exam_id: &ExamId) -> Vec<ExamResult> {
        self.results
            .read()
            .values()
            .filter(|r| &r.exam_id == exam_id)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exam_types::{AnswerChoice, EncryptedBlob, QuestionBody, QuestionOptions};

    fn exam(id: &str) -> Exam {
        Exam {
            id: ExamId::from(id),
            title: "t".into(),
            encrypted_content: EncryptedBlob(vec![0u8; 32]),
            threshold: 1,
            assigned_organizations: Default::default(),
            shares_submitted: Default::default(),
            is_decrypted: false,
            decrypted_content: None,
            reconstruction_failures: 0,
            created_at: 0,
        }
    }

    fn question(id: &str, exam_id: &str) -> Question {
        Question {
            id: QuestionId::from(id),
            exam_id: ExamId::from(exam_id),
            organization_id: OrganizationId::from("org"),
            body: QuestionBody::Open {
                content: "q".into(),
                options: QuestionOptions {
                    a: "1".into(),
                    b: "2".into(),
                    c: "3".into(),
                    d: "4".into(),
                },
                answer: AnswerChoice::B,
            },
        }
    }

    fn answer(question: &str, student: &str, exam_id: &str) -> Answer {
        Answer {
            question_id: QuestionId::from(question),
            student_id: StudentId::from(student),
            exam_id: ExamId::from(exam_id),
            answer_choice: AnswerChoice::B,
            message: String::new(),
            signature: String::new(),
            public_key: String::new(),
            timestamp: 0,
        }
    }

    #[test]
    fn test_put_answers_all_or_nothing() {
        let store = MemoryStore::new();
        store.put_answers(vec![answer("q1", "s1", "e")]).unwrap();

        let err = store
            .put_answers(vec![answer("q2", "s1", "e"), answer("q1", "s1", "e")])
            .unwrap_err();
        assert!(matches!(err, StoreError::AnswerExists { .. }));
        assert!(!store.has_answer(&QuestionId::from("q2"), &StudentId::from("s1")));
    }

    #[test]
    fn test_share_clear_is_scoped() {
        let store = MemoryStore::new();
        let org = OrganizationId::from("org");
        assert!(store.insert_organization(Organization::new(org.clone(), "Org")));
        assert!(!store.insert_organization(Organization::new(org.clone(), "Again")));
        assert!(store.set_organization_share(&org, &ExamId::from("e1"), ShareBytes(vec![1, 2])));
        assert!(store.set_organization_share(&org, &ExamId::from("e2"), ShareBytes(vec![2, 3])));

        assert!(store.clear_organization_share(&org, &ExamId::from("e1")).is_some());
        let organization = store.get_organization(&org).unwrap();
        assert!(organization.share_for(&ExamId::from("e1")).is_none());
        assert!(organization.share_for(&ExamId::from("e2")).is_some());

        assert!(!store.set_organization_share(
            &OrganizationId::from("ghost"),
            &ExamId::from("e1"),
            ShareBytes(vec![1])
        ));
    }

    #[test]
    fn test_remove_exam_cascades() {
        let store = MemoryStore::new();
        store.put_exam(exam("e1"));
        store.put_exam(exam("e2"));
        store.put_question(question("q1", "e1"));
        store.put_question(question("q2", "e2"));
        store
            .put_answers(vec![answer("q1", "s1", "e1"), answer("q2", "s1", "e2")])
            .unwrap();

        assert!(store.remove_exam(&ExamId::from("e1")).is_some());
        assert!(store.get_question(&QuestionId::from("q1")).is_none());
        assert!(store.get_question(&QuestionId::from("q2")).is_some());
        assert!(store.answers_for_exam(&ExamId::from("e1")).is_empty());
        assert_eq!(store.answers_for_exam(&ExamId::from("e2")).len(), 1);
        assert!(store.remove_exam(&ExamId::from("e1")).is_none());
    }

    #[test]
    fn test_remove_question_drops_its_answers() {
        let store = MemoryStore::new();
        store.put_question(question("q1", "e1"));
        store.put_question(question("q2", "e1"));
        store
            .put_answers(vec![answer("q1", "s1", "e1"), answer("q2", "s1", "e1")])
            .unwrap();

        assert!(store.remove_question(&QuestionId::from("q1")).is_some());
        assert!(!store.has_answer(&QuestionId::from("q1"), &StudentId::from("s1")));
        assert!(store.has_answer(&QuestionId::from("q2"), &StudentId::from("s1")));
        assert!(store.remove_question(&QuestionId::from("q1")).is_none());

        assert_eq!(store.questions_for_organization(&OrganizationId::from("org")).len(), 1);
        assert!(store
            .questions_for_organization(&OrganizationId::from("other"))
            .is_empty());
    }

    #[test]
    fn test_snapshot_restores_records() {
        let store = MemoryStore::new();
        store.put_exam(exam("e1"));
        store.put_question(question("q1", "e1"));
        store.put_answers(vec![answer("q1", "s1", "e1")]).unwrap();

        let json = serde_json::to_string(&store.snapshot()).unwrap();
        let restored = MemoryStore::from_snapshot(serde_json::from_str(&json).unwrap());

        assert_eq!(restored.get_exam(&ExamId::from("e1")), store.get_exam(&ExamId::from("e1")));
        assert!(restored.has_answer(&QuestionId::from("q1"), &StudentId::from("s1")));
    }
}
