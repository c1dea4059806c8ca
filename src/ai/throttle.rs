/// Admission control for AI calls
///
/// Three independent gates:
/// - busy: one AI call in flight at a time, app-wide
/// - cooldown: seconds left after the service reported a rate limit
/// - throttle: a short pause after every finished call, success or not
///
/// Both counters go down by one on every `tick`, which the studio drives
/// once per second.

use thiserror::Error;
use tracing::{debug, info, warn};

use super::AiError;
use crate::config::{ApiKeyConfig, AppConfig, KeyStatus};

/// How a failed call affects the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Quota or rate limit; recovers after the cooldown
    RateLimited,
    /// Key missing, invalid or lacking permission; needs a new key
    Credential,
    Other,
}

const RATE_LIMIT_MARKERS: &[&str] = &[
    "429",
    "quota",
    "rate limit",
    "rate-limit",
    "ratelimit",
    "resource_exhausted",
    "resource exhausted",
    "too many requests",
];

const CREDENTIAL_MARKERS: &[&str] = &[
    "401",
    "403",
    "api key",
    "api_key",
    "permission",
    "unauthenticated",
    "unauthorized",
    "forbidden",
];

/// Classify a failure from the service's message
pub fn classify(message: &str) -> FailureKind {
    let message = message.to_lowercase();
    if RATE_LIMIT_MARKERS.iter().any(|m| message.contains(m)) {
        FailureKind::RateLimited
    } else if CREDENTIAL_MARKERS.iter().any(|m| message.contains(m)) {
        FailureKind::Credential
    } else {
        FailureKind::Other
    }
}

/// Why a call was not admitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Rejection {
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
}

/// Point-in-time view of the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleStatus {
    pub busy: bool,
    pub cooldown_remaining: u32,
    pub throttle_remaining: u32,
    pub key_status: KeyStatus,
}

#[derive(Debug, Clone)]
pub struct ThrottleController {
    busy: bool,
    cooldown_remaining: u32,
    throttle_remaining: u32,
    cooldown_secs: u32,
    throttle_secs: u32,
    key: ApiKeyConfig,
}

impl ThrottleController {
    pub fn new(config: &AppConfig, key: ApiKeyConfig) -> Self {
        Self {
            busy: false,
            cooldown_remaining: 0,
            throttle_remaining: 0,
            cooldown_secs: config.cooldown_secs,
            throttle_secs: config.throttle_secs,
            key,
        }
    }

    /// Would a call be admitted right now
    pub fn check(&self) -> Result<(), Rejection> {
        if self.busy {
            return Err(Rejection::Busy);
        }
        if self.cooldown_remaining > 0 {
            return Err(Rejection::CoolingDown {
                remaining: self.cooldown_remaining,
            });
        }
        if self.throttle_remaining > 0 {
            return Err(Rejection::Throttled {
                remaining: self.throttle_remaining,
            });
        }
        match self.key.status() {
            KeyStatus::Missing => Err(Rejection::MissingApiKey),
            KeyStatus::Error => Err(Rejection::InvalidApiKey),
            KeyStatus::Active | KeyStatus::Warning => Ok(()),
        }
    }

    /// Admit a call and mark the controller busy
    pub fn begin(&mut self) -> Result<(), Rejection> {
        self.check()?;
        self.busy = true;
        Ok(())
    }

    /// Record the end of an admitted call
    ///
    /// Returns the message to surface to the user, if any.
    pub fn finish(&mut self, outcome: Result<(), &AiError>) -> Option<String> {
        self.busy = false;
        self.throttle_remaining = self.throttle_secs;

        match outcome {
            Ok(()) => {
                if self.key.status() == KeyStatus::Warning {
                    self.key.set_status(KeyStatus::Active);
                    info!("AI service recovered from rate limiting");
                }
                None
            }
            Err(e) => match classify(&e.message) {
                FailureKind::RateLimited => {
                    self.cooldown_remaining = self.cooldown_secs;
                    self.key.set_status(KeyStatus::Warning);
                    warn!(cooldown_secs = self.cooldown_secs, error = %e, "AI service rate limited");
                    Some(format!(
                        "Rate limit reached. Please wait {}s before trying again.",
                        self.cooldown_secs
                    ))
                }
                FailureKind::Credential => {
                    self.key.set_status(KeyStatus::Error);
                    warn!(error = %e, "AI service rejected the API key");
                    Some(format!("API key error: {}", e.message))
                }
                FailureKind::Other => {
                    debug!(error = %e, "AI call failed");
                    Some(e.message.clone())
                }
            },
        }
    }

    /// Release an admitted call that never completed
    pub fn abandon(&mut self) {
        if self.busy {
            self.busy = false;
            self.throttle_remaining = self.throttle_secs;
        }
    }

    /// One second has passed
    pub fn tick(&mut self) {
        self.cooldown_remaining = self.cooldown_remaining.saturating_sub(1);
        self.throttle_remaining = self.throttle_remaining.saturating_sub(1);
    }

    pub fn status(&self) -> ThrottleStatus {
        ThrottleStatus {
            busy: self.busy,
            cooldown_remaining: self.cooldown_remaining,
            throttle_remaining: self.throttle_remaining,
            key_status: self.key.status(),
        }
    }

    pub fn api_key(&self) -> Option<&str> {
        self.key.key()
    }

    /// Install a new key; clears a previous error or warning
    pub fn reset_key(&mut self, key: impl Into<String>) {
        self.key.reset(key);
    }

    pub fn clear_key(&mut self) {
        self.key.clear();
    }
}
