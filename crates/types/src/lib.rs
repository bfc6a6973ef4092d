//! Core type definitions for threshold-protected exams.
//!
//! This crate provides the shared data structures used across the exam system:
//! identifiers, the exam/organization/question/answer records, and the wire
//! newtypes that fix how shares and ciphertexts are encoded at rest (hex).

use serde::{Deserialize, Serialize};
use serde_with::{hex::Hex, serde_as};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// =========================
// IDENTIFIERS
// =========================

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_id!(
    /// Exam identifier
    ExamId
);
string_id!(
    /// Custodian organization identifier
    OrganizationId
);
string_id!(
    /// Question identifier
    QuestionId
);
string_id!(
    /// Student identifier (as carried in the signed answer message)
    StudentId
);

// =========================
// WIRE ENCODINGS
// =========================

/// One threshold share held by one organization, hex-encoded at rest.
///
/// Layout is `index || y-values`: the first byte is the x-coordinate of the
/// share, the remaining bytes are one polynomial evaluation per secret byte.
#[serde_as]
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShareBytes(#[serde_as(as = "Hex")] pub Vec<u8>);

impl ShareBytes {
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        hex::decode(s.trim()).map(Self)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for ShareBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShareBytes")
            .field("index", &self.0.first())
            .field("len", &self.0.len())
            .field("data", &"[redacted]")
            .finish()
    }
}

/// Symmetric ciphertext in `nonce || ciphertext` layout, hex-encoded at rest.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EncryptedBlob(#[serde_as(as = "Hex")] pub Vec<u8>);

impl EncryptedBlob {
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        hex::decode(s.trim()).map(Self)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

// =========================
// EXAMS & ORGANIZATIONS
// =========================

/// An exam whose content is protected by a threshold-shared master key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exam {
    pub id: ExamId,
    pub title: String,

    /// Content encrypted under the master key
    pub encrypted_content: EncryptedBlob,

    /// Shares required to reconstruct the master key (k)
    pub threshold: u32,

    /// Organizations holding a share of this exam's key
    pub assigned_organizations: BTreeSet<OrganizationId>,

    /// Shares handed back so far, keyed by submitting organization
    pub shares_submitted: BTreeMap<OrganizationId, ShareBytes>,

    /// Flips to true exactly once, after a successful reconstruction
    pub is_decrypted: bool,

    /// Populated only after a successful reconstruction
    pub decrypted_content: Option<String>,

    /// Reconstruction attempts that ended in a decryption failure
    pub reconstruction_failures: u32,

    pub created_at: u64,
}

impl Exam {
    pub fn shares_collected(&self) -> usize {
        self.shares_submitted.len()
    }

    /// Shares still needed before reconstruction is attempted.
    pub fn remaining_shares(&self) -> usize {
        (self.threshold as usize).saturating_sub(self.shares_collected())
    }

    pub fn threshold_met(&self) -> bool {
        self.shares_collected() >= self.threshold as usize
    }

    pub fn is_assigned(&self, organization_id: &OrganizationId) -> bool {
        self.assigned_organizations.contains(organization_id)
    }

    pub fn has_submitted(&self, organization_id: &OrganizationId) -> bool {
        self.shares_submitted.contains_key(organization_id)
    }
}

/// A custodian organization.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub id: OrganizationId,
    pub name: String,

    /// One share per exam, issued at exam creation and never regenerated
    #[serde(default)]
    pub shares_by_exam: BTreeMap<ExamId, ShareBytes>,
}

impl Organization {
    pub fn new(id: OrganizationId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            shares_by_exam: BTreeMap::new(),
        }
    }

    pub fn share_for(&self, exam_id: &ExamId) -> Option<&ShareBytes> {
        self.shares_by_exam.get(exam_id)
    }
}

// =========================
// QUESTIONS
// =========================

/// A multiple choice answer key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnswerChoice {
    A,
    B,
    C,
    D,
}

impl AnswerChoice {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::A => "a",
            Self::B => "b",
            Self::C => "c",
            Self::D => "d",
        }
    }
}

impl fmt::Display for AnswerChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing something other than `a`..`d`.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("answer must be one of a, b, c, d (got {0:?})")]
pub struct InvalidAnswerChoice(pub String);

impl FromStr for AnswerChoice {
    type Err = InvalidAnswerChoice;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "a" => Ok(Self::A),
            "b" => Ok(Self::B),
            "c" => Ok(Self::C),
            "d" => Ok(Self::D),
            _ => Err(InvalidAnswerChoice(s.to_string())),
        }
    }
}

/// The four options of a question.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionOptions<T> {
    pub a: T,
    pub b: T,
    pub c: T,
    pub d: T,
}

impl<T> QuestionOptions<T> {
    pub fn try_map<U, E>(&self, mut f: impl FnMut(&T) -> Result<U, E>) -> Result<QuestionOptions<U>, E> {
        Ok(QuestionOptions {
            a: f(&self.a)?,
            b: f(&self.b)?,
            c: f(&self.c)?,
            d: f(&self.d)?,
        })
    }
}

/// Protection status of a question.
///
/// The answer key is plaintext in both variants: only the content and the
/// options are ever encrypted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum QuestionBody {
    Protected {
        content: EncryptedBlob,
        options: QuestionOptions<EncryptedBlob>,
        answer: AnswerChoice,
    },
    Open {
        content: String,
        options: QuestionOptions<String>,
        answer: AnswerChoice,
    },
}

/// A question belonging to an exam, authored by one organization.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub id: QuestionId,
    pub exam_id: ExamId,
    pub organization_id: OrganizationId,
    pub body: QuestionBody,
}

impl Question {
    pub fn is_encrypted(&self) -> bool {
        matches!(self.body, QuestionBody::Protected { .. })
    }

    pub fn answer(&self) -> AnswerChoice {
        match &self.body {
            QuestionBody::Protected { answer, .. } | QuestionBody::Open { answer, .. } => *answer,
        }
    }

    /// Plaintext view, or `None` while the question is still protected.
    pub fn to_plain(&self) -> Option<PlainQuestion> {
        match &self.body {
            QuestionBody::Open {
                content,
                options,
                answer,
            } => Some(PlainQuestion {
                id: self.id.clone(),
                exam_id: self.exam_id.clone(),
                organization_id: self.organization_id.clone(),
                content: content.clone(),
                options: options.clone(),
                answer: *answer,
            }),
            QuestionBody::Protected { .. } => None,
        }
    }
}

/// Plaintext view of a question after decryption.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlainQuestion {
    pub id: QuestionId,
    pub exam_id: ExamId,
    pub organization_id: OrganizationId,
    pub content: String,
    pub options: QuestionOptions<String>,
    pub answer: AnswerChoice,
}

// =========================
// ANSWERS & RESULTS
// =========================

/// The message a student signs for one answer.
///
/// Field order is part of the format: the client serializes this once and
/// the server verifies the transmitted bytes, never a re-serialization.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerMessage {
    pub question_id: QuestionId,
    pub answer: AnswerChoice,
    pub exam_id: ExamId,
    pub student_id: StudentId,
}

/// An answer as submitted by a client.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedAnswer {
    /// The exact signed bytes (a JSON-encoded [`AnswerMessage`])
    pub message: String,
    /// Base64 PKCS#1 v1.5 / SHA-256 signature over `message`
    pub signature: String,
    /// PEM or base64 DER public key sent alongside the signature
    pub public_key: String,
}

/// A verified, stored answer. Immutable once written.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    pub question_id: QuestionId,
    pub student_id: StudentId,
    pub exam_id: ExamId,
    pub answer_choice: AnswerChoice,
    pub message: String,
    pub signature: String,
    pub public_key: String,
    pub timestamp: u64,
}

/// Score of one student on one exam. Derived, never hand-edited.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExamResult {
    pub student_id: StudentId,
    pub exam_id: ExamId,
    pub correct: u32,
    pub total: u32,
    pub percentage: f64,
}
