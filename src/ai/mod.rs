/// Generative AI collaborator
///
/// The image and text models are an external service. This module holds
/// the contract the studio calls, the error every call may fail with, and
/// the admission/throttle controller that gates the calls.

pub mod throttle;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::state::settings::ShotSettings;

pub use throttle::{classify, FailureKind, Rejection, ThrottleController, ThrottleStatus};

/// A failed call, carrying the service's message for classification
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct AiError {
    pub message: String,
}

impl AiError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// One shot of a script breakdown
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ShotOutline {
    pub shot_number: u32,
    pub description: String,
    pub visual_prompt: String,
}

/// The generative AI service
///
/// Image payloads in and out are base64 data URLs.
#[async_trait]
pub trait StoryboardAi: Send + Sync {
    /// Called with the current key at startup and whenever it changes
    fn configure(&self, _api_key: Option<&str>) {}

    /// Split a film idea into ordered shots
    async fn breakdown(&self, idea: &str) -> Result<Vec<ShotOutline>, AiError>;

    async fn generate_image(
        &self,
        visual_prompt: &str,
        settings: &ShotSettings,
        reference: Option<&str>,
    ) -> Result<String, AiError>;

    async fn edit_image(&self, original: &str, instruction: &str) -> Result<String, AiError>;

    /// A new visual prompt for an edited description
    async fn regenerate_prompt(&self, description: &str) -> Result<String, AiError>;

    /// Alternative descriptions for a shot
    async fn suggestions(&self, project_idea: &str, description: &str) -> Result<Vec<String>, AiError>;
}

/// Stand-in when no AI service is wired up; every call fails
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineAi;

impl OfflineAi {
    fn unavailable<T>() -> Result<T, AiError> {
        Err(AiError::new("no AI service is configured"))
    }
}

#[async_trait]
impl StoryboardAi for OfflineAi {
    async fn breakdown(&self, _idea: &str) -> Result<Vec<ShotOutline>, AiError> {
        Self::unavailable()
    }

    async fn generate_image(
        &self,
        _visual_prompt: &str,
        _settings: &ShotSettings,
        _reference: Option<&str>,
    ) -> Result<String, AiError> {
        Self::unavailable()
    }

    async fn edit_image(&self, _original: &str, _instruction: &str) -> Result<String, AiError> {
        Self::unavailable()
    }

    async fn regenerate_prompt(&self, _description: &str) -> Result<String, AiError> {
        Self::unavailable()
    }

    async fn suggestions(&self, _project_idea: &str, _description: &str) -> Result<Vec<String>, AiError> {
        Self::unavailable()
    }
}
