//! Threshold Decryption Coordinator
//!
//! This crate drives the per-exam threshold protocol:
//! 1. At exam creation, generate a master key, encrypt the content and split
//!    the key into one share per assigned organization
//! 2. Collect shares back from organizations, one per organization
//! 3. Once the threshold is met, reconstruct the key and decrypt the content
//!    exactly once
//!
//! The accumulator works on an [`Exam`] record in place. Callers own
//! persistence and must run each submission under a per-exam lock.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use exam_crypto::{combine_shares, decrypt_to_string, validate_share, CryptoError, KEY_LEN};
use exam_types::{Exam, OrganizationId, ShareBytes};

pub mod secret;

pub use secret::{create_exam_secret, create_exam_secret_with_rng, ExamSecret};

/// Errors that can occur during share accumulation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorError {
    #[error("Organization {0} is not assigned to this exam")]
    NotAssignedOrganization(OrganizationId),

    #[error("Organization {0} has already submitted a share for this exam")]
    DuplicateShareSubmission(OrganizationId),

    #[error("Organization {0} has no share on record for this exam")]
    ShareNotSubmitted(OrganizationId),

    #[error("Exam is already decrypted")]
    AlreadyDecrypted,

    #[error("Invalid share: {0}")]
    InvalidShare(String),

    #[error("Invalid threshold: {0}")]
    InvalidThreshold(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),
}

/// Protocol state of an exam's share collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccumulatorState {
    /// Fewer shares than the threshold
    Collecting,
    /// Threshold reached, reconstruction pending
    ThresholdMet,
    /// Content decrypted (terminal)
    Decrypted,
    /// Last reconstruction failed; collection continues
    DecryptFailed,
}

impl AccumulatorState {
    /// Derive the state from a persisted exam record.
    pub fn of(exam: &Exam) -> Self {
        if exam.is_decrypted {
            Self::Decrypted
        } else if !exam.threshold_met() {
            Self::Collecting
        } else if exam.reconstruction_failures > 0 {
            Self::DecryptFailed
        } else {
            Self::ThresholdMet
        }
    }
}

/// Result of an accepted share submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitOutcome {
    pub accepted: bool,
    pub shares_collected: usize,
    pub threshold: u32,
    pub remaining: usize,
    pub decrypted: bool,
    pub decrypted_content: Option<String>,
    /// True only for the submission that performed the reconstruction
    pub reconstructed: bool,
    pub state: AccumulatorState,
}

/// Upper bound on threshold-sized subsets tried after a failed reconstruction.
pub const MAX_SUBSET_ATTEMPTS: usize = 4096;

/// Share accumulator over a single exam record.
pub struct ShareAccumulator<'a> {
    exam: &'a mut Exam,
}

impl<'a> ShareAccumulator<'a> {
    pub fn new(exam: &'a mut Exam) -> Self {
        Self { exam }
    }

    pub fn state(&self) -> AccumulatorState {
        AccumulatorState::of(&*self.exam)
    }

    /// Submit an organization's share.
    ///
    /// On [`CoordinatorError::DecryptionFailed`] the share has still been
    /// recorded and the failure counted: the caller must persist the exam so
    /// a later submission can retry reconstruction. Every other error leaves
    /// the exam untouched.
    pub fn submit(
        &mut self,
        organization_id: &OrganizationId,
        share: ShareBytes,
    ) -> Result<SubmitOutcome, CoordinatorError> {
        let exam_id = self.exam.id.clone();

        if !self.exam.is_assigned(organization_id) {
            return Err(CoordinatorError::NotAssignedOrganization(organization_id.clone()));
        }

        if self.exam.has_submitted(organization_id) {
            return Err(CoordinatorError::DuplicateShareSubmission(organization_id.clone()));
        }

        validate_share(&share).map_err(|e| CoordinatorError::InvalidShare(e.to_string()))?;
        if share.as_bytes().len() != KEY_LEN + 1 {
            return Err(CoordinatorError::InvalidShare(format!(
                "expected {} bytes, got {}",
                KEY_LEN + 1,
                share.as_bytes().len()
            )));
        }

        self.exam
            .shares_submitted
            .insert(organization_id.clone(), share);

        debug!(
            exam_id = %exam_id,
            organization_id = %organization_id,
            shares_collected = self.exam.shares_collected(),
            threshold = self.exam.threshold,
            "Accepted share"
        );

        let mut reconstructed = false;
        if self.exam.threshold_met() && !self.exam.is_decrypted {
            info!(exam_id = %exam_id, "Threshold met, reconstructing master key");

            match self.reconstruct() {
                Ok(content) => {
                    self.exam.is_decrypted = true;
                    self.exam.decrypted_content = Some(content);
                    reconstructed = true;
                    info!(
                        exam_id = %exam_id,
                        shares_used = self.exam.shares_collected(),
                        "Exam content decrypted"
                    );
                }
                Err(e) => {
                    self.exam.reconstruction_failures += 1;
                    warn!(
                        exam_id = %exam_id,
                        shares_collected = self.exam.shares_collected(),
                        failures = self.exam.reconstruction_failures,
                        error = %e,
                        "Reconstruction failed, shares retained"
                    );
                    return Err(e);
                }
            }
        }

        Ok(self.outcome(reconstructed))
    }

    /// Withdraw an organization's share so it can submit a corrected one.
    ///
    /// Only allowed before the exam is decrypted.
    pub fn retract(&mut self, organization_id: &OrganizationId) -> Result<(), CoordinatorError> {
        if self.exam.is_decrypted {
            return Err(CoordinatorError::AlreadyDecrypted);
        }
        self.exam
            .shares_submitted
            .remove(organization_id)
            .map(|_| {
                info!(
                    exam_id = %self.exam.id,
                    organization_id = %organization_id,
                    "Share retracted"
                );
            })
            .ok_or_else(|| CoordinatorError::ShareNotSubmitted(organization_id.clone()))
    }

    /// Recover the exam content from the submitted shares.
    ///
    /// All shares are combined first. When that fails and more than the
    /// threshold are on record, threshold-sized subsets are tried so one bad
    /// share cannot block honest ones. The first error is reported if nothing
    /// decrypts.
    fn reconstruct(&self) -> Result<String, CoordinatorError> {
        let shares: Vec<ShareBytes> = self.exam.shares_submitted.values().cloned().collect();

        let first_err = match try_decrypt(&*self.exam, &shares) {
            Ok(content) => return Ok(content),
            Err(e) => e,
        };

        let k = self.exam.threshold as usize;
        if k == 0 || shares.len() <= k {
            return Err(first_err);
        }

        let mut subset = Vec::with_capacity(k);
        for (attempt, indices) in Combinations::new(shares.len(), k).enumerate() {
            if attempt >= MAX_SUBSET_ATTEMPTS {
                warn!(
                    exam_id = %self.exam.id,
                    attempts = attempt,
                    "Gave up searching share subsets"
                );
                break;
            }
            subset.clear();
            subset.extend(indices.iter().map(|&i| shares[i].clone()));
            if let Ok(content) = try_decrypt(&*self.exam, &subset) {
                debug!(exam_id = %self.exam.id, attempt, "Recovered from a share subset");
                return Ok(content);
            }
        }

        Err(first_err)
    }

    fn outcome(&self, reconstructed: bool) -> SubmitOutcome {
        SubmitOutcome {
            accepted: true,
            shares_collected: self.exam.shares_collected(),
            threshold: self.exam.threshold,
            remaining: self.exam.remaining_shares(),
            decrypted: self.exam.is_decrypted,
            decrypted_content: self.exam.decrypted_content.clone(),
            reconstructed,
            state: self.state(),
        }
    }
}

fn try_decrypt(exam: &Exam, shares: &[ShareBytes]) -> Result<String, CoordinatorError> {
    let key = combine_shares(shares).map_err(|e| match e {
        CryptoError::DuplicateShareIndex(index) => CoordinatorError::DecryptionFailed(format!(
            "two organizations submitted shares with index {}",
            index
        )),
        other => CoordinatorError::DecryptionFailed(other.to_string()),
    })?;

    decrypt_to_string(&exam.encrypted_content, &key)
        .map_err(|e| CoordinatorError::DecryptionFailed(e.to_string()))
}

/// k-element index combinations of `0..n` in lexicographic order.
struct Combinations {
    n: usize,
    indices: Vec<usize>,
    done: bool,
}

impl Combinations {
    fn new(n: usize, k: usize) -> Self {
        Self {
            n,
            indices: (0..k).collect(),
            done: k > n,
        }
    }
}

impl Iterator for Combinations {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Vec<usize>> {
        if self.done {
            return None;
        }
        let current = self.indices.clone();

        let k = self.indices.len();
        match (0..k).rev().find(|&i| self.indices[i] != i + self.n - k) {
            Some(i) => {
                self.indices[i] += 1;
                for j in i + 1..k {
                    self.indices[j] = self.indices[j - 1] + 1;
                }
            }
            None => self.done = true,
        }

        Some(current)
    }
}
