use crate::error::GateError;
use std::sync::Arc;
use zeroize::Zeroizing;

/// Runtime configuration for a [`crate::StageGate`] instance.
#[derive(Debug, Clone)]
pub struct GateConfig {
    /// Rows sampled from a proposal payload for the open-time validation run.
    pub validation_sample_rows: usize,
    /// Payloads with more rows than this fail validation with a fatal finding.
    pub max_staged_rows: usize,
    /// Optimistic-concurrency retries per call before surfacing `Conflict`.
    pub max_cas_retries: usize,
    /// Age after which an abandoned merge claim can be taken over by a retry.
    pub merge_claim_timeout_ms: u64,
    pub allow_self_review: bool,
    pub max_reviewers: usize,
    /// Location tag recorded in dataset metadata. `None` uses the store's own tag.
    pub location_tag: Option<String>,
    /// HMAC key for the file store manifest. Wrapped in Arc<Zeroizing<>> so
    /// the key bytes are zeroed when the last reference is dropped.
    pub manifest_hmac_key: Option<Arc<Zeroizing<Vec<u8>>>>,
    pub chunk_compression_level: i32,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            validation_sample_rows: 1_000,
            max_staged_rows: 1_000_000,
            max_cas_retries: 16,
            merge_claim_timeout_ms: 30_000,
            allow_self_review: false,
            max_reviewers: 32,
            location_tag: None,
            manifest_hmac_key: None,
            chunk_compression_level: 3,
        }
    }
}

impl GateConfig {
    /// Validates every staged row at open time and signs the store manifest.
    pub fn strict(hmac_key: [u8; 32]) -> Self {
        Self {
            validation_sample_rows: usize::MAX,
            manifest_hmac_key: Some(Arc::new(Zeroizing::new(hmac_key.to_vec()))),
            ..Self::default()
        }
    }

    pub fn development() -> Self {
        Self {
            allow_self_review: true,
            merge_claim_timeout_ms: 1_000,
            chunk_compression_level: 1,
            ..Self::default()
        }
    }

    pub fn hmac_key(&self) -> Option<&[u8]> {
        self.manifest_hmac_key.as_ref().map(|arc| &***arc as &[u8])
    }

    pub fn with_hmac_key(mut self, key: Vec<u8>) -> Self {
        self.manifest_hmac_key = Some(Arc::new(Zeroizing::new(key)));
        self
    }

    pub fn with_location_tag(mut self, tag: impl Into<String>) -> Self {
        self.location_tag = Some(tag.into());
        self
    }

    pub fn with_sample_rows(mut self, rows: usize) -> Self {
        self.validation_sample_rows = rows;
        self
    }
}

pub fn validate_config(config: &GateConfig) -> Result<(), GateError> {
    if config.validation_sample_rows == 0 {
        return Err(GateError::InvalidConfig {
            message: "validation_sample_rows must be > 0".into(),
        });
    }
    if config.max_staged_rows == 0 {
        return Err(GateError::InvalidConfig {
            message: "max_staged_rows must be > 0".into(),
        });
    }
    if config.max_reviewers == 0 {
        return Err(GateError::InvalidConfig {
            message: "max_reviewers must be > 0".into(),
        });
    }
    if !(1..=22).contains(&config.chunk_compression_level) {
        return Err(GateError::InvalidConfig {
            message: "chunk_compression_level must be within 1..=22".into(),
        });
    }
    if config.hmac_key().is_some_and(<[u8]>::is_empty) {
        return Err(GateError::InvalidConfig {
            message: "manifest hmac key cannot be empty".into(),
        });
    }
    Ok(())
}
