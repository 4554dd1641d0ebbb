//! Pitch detection and smoothing
//!
//! `PitchSource` is the capability the engine polls for raw frequency
//! estimates. `YinPitchDetector` implements it on top of a live stream;
//! `PitchSmoother` turns the raw estimates into readings.

mod detector;
pub mod smoother;
pub mod yin;

use crate::audio::{AudioContext, MediaStream};
use crate::error::SessionError;
use async_trait::async_trait;

pub use detector::{YinPitchDetector, DEFAULT_AMPLITUDE_THRESHOLD, DEFAULT_FRAME_SIZE};
pub use smoother::{freq_to_note, PitchSmoother, SmoothingParams};

/// Asynchronous source of raw pitch estimates
#[async_trait]
pub trait PitchSource: Send + Sync {
    /// Prepare the detector against `stream`; resolves once it can be polled
    async fn initialize(&self, context: &AudioContext, stream: &MediaStream) -> Result<(), SessionError>;

    /// One estimate in Hz, or `None` when nothing is audible
    async fn poll_once(&self) -> Result<Option<f32>, SessionError>;

    /// Detach from the stream; safe to call repeatedly
    fn release(&self);
}
