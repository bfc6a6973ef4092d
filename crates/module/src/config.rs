//! Protocol configuration for the exam module.
//!
//! Loaded from JSON by outer surfaces; every field has a default so an empty
//! object is a valid configuration.

use serde::{Deserialize, Serialize};

use exam_crypto::MAX_SHARES;

/// Tunables for the exam protocol.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Upper bound on organizations per exam (share indices are one byte)
    pub max_organizations: usize,

    /// Upper bound on answers per submitted batch
    pub max_answer_batch: usize,

    /// Run question decryption and signature checks on the rayon pool
    pub parallel: bool,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            max_organizations: MAX_SHARES as usize,
            max_answer_batch: 512,
            parallel: true,
        }
    }
}

impl ProtocolConfig {
    /// Parse and validate a JSON configuration.
    pub fn from_json(json: &str) -> Result<Self, ConfigValidationError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| ConfigValidationError::Malformed(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.max_organizations == 0 {
            return Err(ConfigValidationError::InvalidOrganizationLimit(
                "Organization limit cannot be zero".into(),
            ));
        }
        if self.max_organizations > MAX_SHARES as usize {
            return Err(ConfigValidationError::InvalidOrganizationLimit(format!(
                "Organization limit cannot exceed {}",
                MAX_SHARES
            )));
        }
        if self.max_answer_batch == 0 {
            return Err(ConfigValidationError::InvalidBatchLimit);
        }
        Ok(())
    }
}

/// Errors that can occur during configuration validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Invalid organization limit: {0}")]
    InvalidOrganizationLimit(String),

    #[error("Answer batch limit cannot be zero")]
    InvalidBatchLimit,

    #[error("Malformed configuration: {0}")]
    Malformed(String),
}
