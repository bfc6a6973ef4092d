//! Exam secret creation: master key, encrypted content, one share per organization.

use std::collections::BTreeSet;

use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};
use tracing::debug;

use exam_crypto::cipher::encrypt_with_rng;
use exam_crypto::shamir::split_secret_with_rng;
use exam_crypto::{generate_key, MAX_SHARES};
use exam_types::{EncryptedBlob, OrganizationId, ShareBytes};

use crate::CoordinatorError;

/// Output of [`create_exam_secret`]. The master key itself is not retained.
#[derive(Debug, Clone)]
pub struct ExamSecret {
    pub encrypted_content: EncryptedBlob,
    /// Shares in the same order as the organizations passed in
    pub shares: Vec<(OrganizationId, ShareBytes)>,
}

/// Encrypt `content` under a fresh master key and split the key across
/// `organizations` with reconstruction threshold `threshold`.
pub fn create_exam_secret(
    content: &str,
    organizations: &[OrganizationId],
    threshold: u32,
) -> Result<ExamSecret, CoordinatorError> {
    create_exam_secret_with_rng(content, organizations, threshold, &mut OsRng)
}

pub fn create_exam_secret_with_rng<R: RngCore + CryptoRng>(
    content: &str,
    organizations: &[OrganizationId],
    threshold: u32,
    rng: &mut R,
) -> Result<ExamSecret, CoordinatorError> {
    let total = organizations.len();
    if total == 0 {
        return Err(CoordinatorError::InvalidThreshold(
            "at least one organization is required".into(),
        ));
    }
    if total > MAX_SHARES as usize {
        return Err(CoordinatorError::InvalidThreshold(format!(
            "{} organizations exceeds the maximum of {}",
            total, MAX_SHARES
        )));
    }
    let distinct: BTreeSet<&OrganizationId> = organizations.iter().collect();
    if distinct.len() != total {
        return Err(CoordinatorError::InvalidThreshold(
            "organizations must be distinct".into(),
        ));
    }
    if threshold == 0 || threshold as usize > total {
        return Err(CoordinatorError::InvalidThreshold(format!(
            "threshold {} must be between 1 and {}",
            threshold, total
        )));
    }

    let key = generate_key(rng);
    let encrypted_content = encrypt_with_rng(content.as_bytes(), &key, rng);

    // Bounds checked above
    let shares = split_secret_with_rng(key.as_slice(), total as u8, threshold as u8, rng)
        .map_err(|e| CoordinatorError::InvalidThreshold(e.to_string()))?;

    debug!(
        organizations = total,
        threshold,
        ciphertext_len = encrypted_content.as_bytes().len(),
        "Created exam secret"
    );

    Ok(ExamSecret {
        encrypted_content,
        shares: organizations.iter().cloned().zip(shares).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use exam_crypto::{combine_shares, decrypt_to_string};

    fn orgs(n: usize) -> Vec<OrganizationId> {
        (0..n).map(|i| OrganizationId::new(format!("org-{}", i))).collect()
    }

    #[test]
    fn test_any_threshold_subset_decrypts() {
        let secret = create_exam_secret("content", &orgs(4), 3).unwrap();
        assert_eq!(secret.shares.len(), 4);

        let subset: Vec<ShareBytes> = secret.shares[1..].iter().map(|(_, s)| s.clone()).collect();
        let key = combine_shares(&subset).unwrap();
        assert_eq!(
            decrypt_to_string(&secret.encrypted_content, &key).unwrap(),
            "content"
        );
    }

    #[test]
    fn test_shares_follow_organization_order() {
        let organizations = orgs(3);
        let secret = create_exam_secret("x", &organizations, 2).unwrap();
        let ids: Vec<_> = secret.shares.iter().map(|(id, _)| id.clone()).collect();
        assert_eq!(ids, organizations);
    }

    #[test]
    fn test_invalid_thresholds() {
        assert!(matches!(
            create_exam_secret("x", &orgs(3), 0),
            Err(CoordinatorError::InvalidThreshold(_))
        ));
        assert!(matches!(
            create_exam_secret("x", &orgs(3), 4),
            Err(CoordinatorError::InvalidThreshold(_))
        ));
        assert!(matches!(
            create_exam_secret("x", &[], 1),
            Err(CoordinatorError::InvalidThreshold(_))
        ));

        let mut duplicated = orgs(2);
        duplicated.push(duplicated[0].clone());
        assert!(matches!(
            create_exam_secret("x", &duplicated, 2),
            Err(CoordinatorError::InvalidThreshold(_))
        ));
    }

    #[test]
    fn test_threshold_one_any_single_share_works() {
        let secret = create_exam_secret("solo", &orgs(3), 1).unwrap();
        for (_, share) in &secret.shares {
            let key = combine_shares(std::slice::from_ref(share)).unwrap();
            assert_eq!(decrypt_to_string(&secret.encrypted_content, &key).unwrap(), "solo");
        }
    }
}
