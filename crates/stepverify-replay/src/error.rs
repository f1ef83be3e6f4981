use stepverify_authority::AuthorityError;
use thiserror::Error;

/// Failures that stop a unit of replay, or the whole run.
///
/// Rejections by the authority are not errors; they are recorded as
/// [`stepverify_core::Outcome::Reverted`].
#[derive(Debug, Error)]
pub enum ReplayError {
    #[error(transparent)]
    Authority(#[from] AuthorityError),

    #[error(transparent)]
    Core(#[from] stepverify_core::Error),

    #[error("Instance error: {0}")]
    Instance(String),

    #[error("{what} still failing after {attempts} attempts: {last}")]
    RetriesExhausted {
        what: String,
        attempts: u32,
        last: AuthorityError,
    },

    #[error("No halt after {limit} cycles")]
    CycleLimit { limit: u64 },

    #[error("Bulk load failed: {0}")]
    Load(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl ReplayError {
    /// Whether the error came from a call that never completed.
    pub fn is_transport(&self) -> bool {
        match self {
            ReplayError::Authority(e) => e.is_transport(),
            ReplayError::RetriesExhausted { .. } => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, ReplayError>;
