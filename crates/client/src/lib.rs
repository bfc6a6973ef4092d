//! Client SDK for students and organizations taking part in threshold-protected exams.
//!
//! This crate provides a high-level API for:
//! - Building the canonical answer message and signing it
//! - Generating and storing student signing keys

pub mod answer;
pub mod keys;

pub use answer::{canonical_message, sign_answer, AnswerBuilder, AnswerError};
pub use keys::{generate_keypair, private_key_from_pem, private_key_to_pem, DEFAULT_KEY_BITS};
