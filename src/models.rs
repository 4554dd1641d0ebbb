use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Placeholder note name used whenever there is no pitch to name
pub const NO_NOTE: &str = "--";

/// A smoothed pitch estimate for one loop tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PitchReading {
    /// Smoothed frequency in Hz
    pub pitch: f32,
    /// Note name with octave, e.g. "A4"
    pub note: String,
    /// Trust in the smoothed pitch (0.0 - 1.0)
    pub confidence: f32,
}

impl PitchReading {
    /// Reading shown while nothing is being tracked
    pub fn neutral() -> Self {
        Self {
            pitch: 0.0,
            note: NO_NOTE.to_string(),
            confidence: 0.0,
        }
    }
}

/// Score summary returned by the diagnosis service
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DiagnosisResult {
    pub score: f64,
    /// Average pitch in Hz
    pub pitch: f64,
    /// Stability fraction (0.0 - 1.0)
    pub stability: f64,
}

/// Captured session audio, encoded for submission
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedPayload {
    /// Base64 text of the encoded audio container
    pub data: String,
    pub mime_type: String,
    pub sample_rate: u32,
    pub duration_seconds: f64,
    pub captured_at: DateTime<Utc>,
}

/// Opaque identifiers supplied by whoever launched the session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionIdentity {
    pub user_id: String,
    pub session_id: String,
}

impl Default for SessionIdentity {
    fn default() -> Self {
        Self {
            user_id: "guest_user".to_string(),
            session_id: "direct_access".to_string(),
        }
    }
}

/// User-facing lifecycle state of a session
#[derive(Debug, Clone, PartialEq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    CountingDown(u32),
    Running,
    Analyzing,
    Error(String),
}

impl SessionState {
    /// Idle and Error both accept a new start
    pub fn accepts_start(&self) -> bool {
        matches!(self, SessionState::Idle | SessionState::Error(_))
    }

    pub fn short_name(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::CountingDown(_) => "counting-down",
            SessionState::Running => "running",
            SessionState::Analyzing => "analyzing",
            SessionState::Error(_) => "error",
        }
    }
}

/// Read-only view of a session published to the presentation layer
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub reading: Option<PitchReading>,
    pub diagnosis: Option<DiagnosisResult>,
}

impl SessionSnapshot {
    /// True from the moment tracking goes live until analysis finishes
    pub fn is_running(&self) -> bool {
        matches!(self.state, SessionState::Running | SessionState::Analyzing)
    }

    pub fn is_analyzing(&self) -> bool {
        self.state == SessionState::Analyzing
    }

    pub fn is_counting_down(&self) -> bool {
        matches!(self.state, SessionState::CountingDown(_))
    }

    pub fn countdown(&self) -> u32 {
        match self.state {
            SessionState::CountingDown(n) => n,
            _ => 0,
        }
    }

    pub fn pitch(&self) -> f32 {
        self.reading.as_ref().map_or(0.0, |r| r.pitch)
    }

    pub fn note(&self) -> &str {
        self.reading.as_ref().map_or(NO_NOTE, |r| r.note.as_str())
    }

    pub fn confidence(&self) -> f32 {
        self.reading.as_ref().map_or(0.0, |r| r.confidence)
    }

    pub fn error(&self) -> Option<&str> {
        match &self.state {
            SessionState::Error(message) => Some(message),
            _ => None,
        }
    }
}
