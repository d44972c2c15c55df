//! Error type for the ASP service.

use galeon_pool::PoolError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AspError {
    #[error("association set provider is not initialized - run initialize first")]
    NotInitialized,

    #[error("label {0} is not in the association set")]
    LabelNotFound(String),

    #[error("store io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store record error: {0}")]
    Record(#[from] serde_json::Error),

    #[error(transparent)]
    Pool(#[from] PoolError),
}

impl AspError {
    /// Transient failures worth retrying with backoff; everything else is
    /// fatal for the current poll cycle.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AspError::Pool(PoolError::ChainUnavailable(_))
                | AspError::Pool(PoolError::RootPublishFailed(_))
        )
    }
}
