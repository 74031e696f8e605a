use std::error::Error as StdError;

/// Failure reported by a [`crate::RecordStore`] implementation.
///
/// Variants are kept distinct so callers can tell a missing configuration
/// from an unreachable backend or a denied operation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store is not configured: {0}")]
    Configuration(String),
    #[error("store unavailable: {0}")]
    Transport(String),
    #[error("store denied the operation: {0}")]
    Permission(String),
    #[error("invalid stored record: {0}")]
    InvalidData(String),
    #[error(transparent)]
    Other(Box<dyn StdError + Send + Sync>),
}

impl StoreError {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "store.configuration",
            Self::Transport(_) => "store.transport",
            Self::Permission(_) => "store.permission",
            Self::InvalidData(_) => "store.invalid_data",
            Self::Other(_) => "store.other",
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum MissionError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error(
        "monthly limit exceeded for {mission_id}: {current_total} already counted this month, limit is {limit}"
    )]
    MonthlyLimitExceeded {
        mission_id: String,
        current_total: u32,
        limit: u32,
    },
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl MissionError {
    /// Stable machine-readable code used in error envelopes.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "mission.validation",
            Self::MonthlyLimitExceeded { .. } => "mission.monthly_limit",
            Self::Configuration(_) => "mission.configuration",
            Self::Store(err) => err.code(),
        }
    }

    /// Returns `true` for rejections raised before any store mutation.
    #[must_use]
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::MonthlyLimitExceeded { .. }
        )
    }
}
