//! Session error taxonomy
//!
//! Every failure in the engine is one of these variants. The controller turns
//! them into a short human-readable message before publishing them.

use std::time::Duration;
use thiserror::Error;

/// Errors raised while acquiring, running, or finishing a tracking session
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SessionError {
    #[error("Microphone access denied: {0}")]
    PermissionDenied(String),

    #[error("Microphone unavailable: {0}")]
    MicrophoneUnavailable(String),

    #[error("Pitch detector not ready within {0:?}")]
    ModelLoadTimeout(Duration),

    #[error("Pitch detector polled before initialization")]
    DetectorNotReady,

    #[error("A session is already running")]
    AlreadyRunning,

    #[error("No active session")]
    NoActiveSession,

    #[error("Failed to encode recording: {0}")]
    EncodingFailure(String),

    #[error("Diagnosis submission failed: {0}")]
    SubmissionFailure(String),

    #[error("Audio graph error: {0}")]
    AudioGraph(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SessionError {
    /// Short message suitable for showing to the person singing
    pub fn user_message(&self) -> &'static str {
        match self {
            SessionError::PermissionDenied(_) => "Microphone access was denied.",
            SessionError::MicrophoneUnavailable(_) => "Could not start the microphone.",
            SessionError::ModelLoadTimeout(_) => "The pitch detector took too long to load.",
            SessionError::DetectorNotReady => "The pitch detector is not ready yet.",
            SessionError::AlreadyRunning => "A session is already running.",
            SessionError::NoActiveSession => "There is no session to stop.",
            SessionError::EncodingFailure(_) => "The recording could not be prepared.",
            SessionError::SubmissionFailure(_) => "Analysis failed. Please try again.",
            SessionError::AudioGraph(_) | SessionError::Internal(_) => {
                "Something went wrong. Please try again."
            }
        }
    }

    /// Whether the error happened while the session was being set up
    pub fn is_startup_failure(&self) -> bool {
        matches!(
            self,
            SessionError::PermissionDenied(_)
                | SessionError::MicrophoneUnavailable(_)
                | SessionError::ModelLoadTimeout(_)
                | SessionError::AudioGraph(_)
        )
    }
}
