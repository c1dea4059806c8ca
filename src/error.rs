use thiserror::Error;

use crate::ai::{AiError, Rejection};
use crate::config::ConfigError;
use crate::state::interchange::ImportError;
use crate::state::store::StorageError;

#[derive(Debug, Error)]
pub enum StudioError {
    #[error("another AI request is still running")]
    Busy,
    #[error("rate limited, try again in {remaining}s")]
    CoolingDown { remaining: u32 },
    #[error("please wait {remaining}s between AI requests")]
    Throttled { remaining: u32 },
    #[error("no API key is configured")]
    MissingApiKey,
    #[error("the API key was rejected, set a new one")]
    InvalidApiKey,

    #[error("project not found: {0}")]
    ProjectNotFound(String),
    #[error("shot not found: {0}")]
    ShotNotFound(String),
    #[error("shot {0} has no selected image")]
    NoSelectedVariation(String),

    #[error("image generation failed: {0}")]
    GenerationFailed(String),
    #[error(transparent)]
    Ai(#[from] AiError),

    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Import(#[from] ImportError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to export project: {0}")]
    Export(#[from] serde_json::Error),
}

impl From<Rejection> for StudioError {
    fn from(rejection: Rejection) -> Self {
        match rejection {
            Rejection::Busy => StudioError::Busy,
            Rejection::CoolingDown { remaining } => StudioError::CoolingDown { remaining },
            Rejection::Throttled { remaining } => StudioError::Throttled { remaining },
            Rejection::MissingApiKey => StudioError::MissingApiKey,
            Rejection::InvalidApiKey => StudioError::InvalidApiKey,
        }
    }
}

impl StudioError {
    /// True for admission rejections: the call never reached the service
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            StudioError::Busy
                | StudioError::CoolingDown { .. }
                | StudioError::Throttled { .. }
                | StudioError::MissingApiKey
                | StudioError::InvalidApiKey
        )
    }
}

pub type StudioResult<T> = Result<T, StudioError>;
