//! Shamir secret sharing over GF(2^8).
//!
//! The master key is split byte by byte: each secret byte is the constant
//! term of a random polynomial of degree k-1, and share `i` holds the
//! evaluation of every polynomial at x = i.
//!
//! Share layout: `[x, y_0, y_1, ..., y_{len-1}]`.
//!
//! Combining never checks the threshold. Fewer than k shares interpolate to a
//! deterministic but wrong value; callers detect that one layer up, when the
//! reconstructed key fails to decrypt.

use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};
use std::collections::HashSet;
use zeroize::Zeroizing;

use exam_types::ShareBytes;

use crate::error::CryptoError;

/// Largest number of shares (x-coordinates 1..=255).
pub const MAX_SHARES: u8 = 255;

/// Element of GF(2^8) reduced by the AES polynomial x^8 + x^4 + x^3 + x + 1.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct Gf256(u8);

impl Gf256 {
    const MODULUS: u16 = 0x11B;

    const ZERO: Self = Self(0);
    const ONE: Self = Self(1);

    fn add(self, other: Self) -> Self {
        Self(self.0 ^ other.0)
    }

    /// Shift-and-add multiplication; runs all eight rounds regardless of input.
    fn mul(self, other: Self) -> Self {
        let mut a = u16::from(self.0);
        let mut b = u16::from(other.0);
        let mut acc: u16 = 0;

        for _ in 0..8 {
            acc ^= a & 0u16.wrapping_sub(b & 1);
            let carry = (a >> 7) & 1;
            a = (a << 1) ^ (Self::MODULUS & 0u16.wrapping_sub(carry));
            b >>= 1;
        }

        Self((acc & 0xff) as u8)
    }

    /// a^254 = a^-1 for a != 0.
    fn inv(self) -> Self {
        let mut result = Self::ONE;
        let mut base = self;
        let mut exp = 254u8;
        while exp > 0 {
            if exp & 1 == 1 {
                result = result.mul(base);
            }
            base = base.mul(base);
            exp >>= 1;
        }
        result
    }

    fn div(self, other: Self) -> Self {
        self.mul(other.inv())
    }
}

/// Generate a random polynomial of degree `threshold - 1` with the given constant term.
fn generate_polynomial<R: RngCore + CryptoRng>(
    secret: u8,
    threshold: u8,
    rng: &mut R,
) -> Zeroizing<Vec<u8>> {
    let mut coefficients = Zeroizing::new(vec![0u8; threshold as usize]);
    coefficients[0] = secret;
    rng.fill_bytes(&mut coefficients[1..]);
    coefficients
}

/// Evaluate polynomial at a point using Horner's method.
fn evaluate_polynomial(coefficients: &[u8], x: u8) -> u8 {
    let x = Gf256(x);
    coefficients
        .iter()
        .rev()
        .fold(Gf256::ZERO, |acc, coeff| acc.mul(x).add(Gf256(*coeff)))
        .0
}

/// Lagrange basis values at x = 0 for the given x-coordinates.
///
/// λ_i = Π_{j≠i} x_j / (x_i - x_j), where subtraction is XOR.
fn lagrange_at_zero(xs: &[u8]) -> Vec<Gf256> {
    xs.iter()
        .enumerate()
        .map(|(i, &x_i)| {
            xs.iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .fold(Gf256::ONE, |basis, (_, &x_j)| {
                    basis.mul(Gf256(x_j).div(Gf256(x_i).add(Gf256(x_j))))
                })
        })
        .collect()
}

/// Split `secret` into `n` shares, any `k` of which reconstruct it.
pub fn split_secret(secret: &[u8], n: u8, k: u8) -> Result<Vec<ShareBytes>, CryptoError> {
    split_secret_with_rng(secret, n, k, &mut OsRng)
}

/// Split using a caller-provided RNG.
///
/// # Errors
/// * [`CryptoError::ThresholdTooSmall`] if `k == 0`
/// * [`CryptoError::ThresholdExceedsTotal`] if `k > n`
/// * [`CryptoError::EmptySecret`] if `secret` is empty
pub fn split_secret_with_rng<R: RngCore + CryptoRng>(
    secret: &[u8],
    n: u8,
    k: u8,
    rng: &mut R,
) -> Result<Vec<ShareBytes>, CryptoError> {
    if k == 0 {
        return Err(CryptoError::ThresholdTooSmall);
    }
    if k > n {
        return Err(CryptoError::ThresholdExceedsTotal { threshold: k, total: n });
    }
    if secret.is_empty() {
        return Err(CryptoError::EmptySecret);
    }

    let mut shares: Vec<Vec<u8>> = (1..=n)
        .map(|x| {
            let mut share = Vec::with_capacity(1 + secret.len());
            share.push(x);
            share
        })
        .collect();

    for &byte in secret {
        let coefficients = generate_polynomial(byte, k, rng);
        for share in shares.iter_mut() {
            let x = share[0];
            share.push(evaluate_polynomial(&coefficients, x));
        }
    }

    Ok(shares.into_iter().map(ShareBytes).collect())
}

/// Check that a share is structurally usable: an index byte plus data.
pub fn validate_share(share: &ShareBytes) -> Result<u8, CryptoError> {
    match share.as_bytes() {
        [] | [_] => Err(CryptoError::MalformedShare(format!(
            "share is {} bytes, need an index and at least one data byte",
            share.as_bytes().len()
        ))),
        [0, ..] => Err(CryptoError::ReservedShareIndex),
        [index, ..] => Ok(*index),
    }
}

/// Reconstruct the secret from a set of shares by interpolating at x = 0.
///
/// No threshold check is made: too few shares produce a wrong value, not an
/// error.
///
/// # Errors
/// * [`CryptoError::NoShares`] if `shares` is empty
/// * [`CryptoError::MalformedShare`] / [`CryptoError::ReservedShareIndex`] for a bad share
/// * [`CryptoError::DuplicateShareIndex`] if two shares share an x-coordinate
/// * [`CryptoError::MismatchedShareLengths`] if share lengths differ
pub fn combine_shares(shares: &[ShareBytes]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let first = shares.first().ok_or(CryptoError::NoShares)?;
    let len = first.as_bytes().len();

    let mut seen = HashSet::with_capacity(shares.len());
    let mut xs = Vec::with_capacity(shares.len());
    for share in shares {
        let index = validate_share(share)?;
        if share.as_bytes().len() != len {
            return Err(CryptoError::MismatchedShareLengths);
        }
        if !seen.insert(index) {
            return Err(CryptoError::DuplicateShareIndex(index));
        }
        xs.push(index);
    }

    let basis = lagrange_at_zero(&xs);

    let mut secret = Zeroizing::new(Vec::with_capacity(len - 1));
    for pos in 1..len {
        let byte = shares
            .iter()
            .zip(&basis)
            .fold(Gf256::ZERO, |acc, (share, lambda)| {
                acc.add(Gf256(share.as_bytes()[pos]).mul(*lambda))
            });
        secret.push(byte.0);
    }

    Ok(secret)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_field_inverse() {
        for a in 1..=255u8 {
            assert_eq!(Gf256(a).mul(Gf256(a).inv()), Gf256::ONE, "a = {}", a);
        }
    }

    #[test]
    fn test_polynomial_evaluation() {
        // f(x) = 5 + 3x in GF(2^8): f(1) = 5 ^ 3 = 6
        assert_eq!(evaluate_polynomial(&[5, 3], 0), 5);
        assert_eq!(evaluate_polynomial(&[5, 3], 1), 6);
    }

    #[test]
    fn test_share_layout() {
        let secret = [9u8; 32];
        let shares = split_secret(&secret, 5, 3).unwrap();
        assert_eq!(shares.len(), 5);
        for (i, share) in shares.iter().enumerate() {
            assert_eq!(share.as_bytes().len(), 33);
            assert_eq!(share.as_bytes()[0], i as u8 + 1);
        }
    }

    #[test]
    fn test_threshold_one_shares_are_the_secret() {
        let secret = [42u8; 32];
        let shares = split_secret(&secret, 3, 1).unwrap();
        for share in &shares {
            assert_eq!(&share.as_bytes()[1..], &secret[..]);
        }
    }

    #[test]
    fn test_reconstruction_from_any_subset() {
        let mut secret = [0u8; 32];
        OsRng.fill_bytes(&mut secret);
        let shares = split_secret(&secret, 5, 3).unwrap();

        assert_eq!(&combine_shares(&shares[..3]).unwrap()[..], &secret[..]);
        assert_eq!(&combine_shares(&shares[2..]).unwrap()[..], &secret[..]);
        // More than k shares also interpolate to the secret
        assert_eq!(&combine_shares(&shares).unwrap()[..], &secret[..]);
    }

    #[test]
    fn test_insufficient_shares_give_wrong_value() {
        let secret = [0x5au8; 32];
        let shares = split_secret(&secret, 5, 3).unwrap();

        let reconstructed = combine_shares(&shares[..2]).unwrap();
        assert_eq!(reconstructed.len(), 32);
        assert_ne!(&reconstructed[..], &secret[..]);
    }

    #[test]
    fn test_invalid_parameters() {
        assert_eq!(split_secret(&[1], 3, 0), Err(CryptoError::ThresholdTooSmall));
        assert_eq!(
            split_secret(&[1], 2, 3),
            Err(CryptoError::ThresholdExceedsTotal { threshold: 3, total: 2 })
        );
        assert_eq!(split_secret(&[], 3, 2), Err(CryptoError::EmptySecret));
    }

    #[test]
    fn test_combine_rejects_bad_share_sets() {
        let shares = split_secret(&[1, 2, 3], 3, 2).unwrap();

        assert_eq!(combine_shares(&[]).unwrap_err(), CryptoError::NoShares);
        assert_eq!(
            combine_shares(&[shares[0].clone(), shares[0].clone()]).unwrap_err(),
            CryptoError::DuplicateShareIndex(1)
        );
        assert_eq!(
            combine_shares(&[shares[0].clone(), ShareBytes(vec![2, 1])]).unwrap_err(),
            CryptoError::MismatchedShareLengths
        );
        assert_eq!(
            combine_shares(&[ShareBytes(vec![0, 1, 2, 3])]).unwrap_err(),
            CryptoError::ReservedShareIndex
        );
        assert!(matches!(
            combine_shares(&[ShareBytes(vec![4])]),
            Err(CryptoError::MalformedShare(_))
        ));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_any_k_subset_reconstructs(
            secret in prop::array::uniform32(any::<u8>()),
            n in 1u8..=10,
            k_seed in any::<u8>(),
            pick_seed in any::<u64>(),
        ) {
            let k = k_seed % n + 1;
            let shares = split_secret(&secret, n, k).unwrap();

            // Pick a k-subset by rotating through the share list.
            let start = (pick_seed % u64::from(n)) as usize;
            let subset: Vec<ShareBytes> = shares
                .iter()
                .cycle()
                .skip(start)
                .take(k as usize)
                .cloned()
                .collect();

            let reconstructed = combine_shares(&subset).unwrap();
            prop_assert_eq!(&reconstructed[..], &secret[..]);
        }
    }
}
