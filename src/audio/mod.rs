//! Audio capture, routing and recording
//!
//! This module provides:
//! - Live media streams with stoppable tracks
//! - An audio context that taps streams into consumers
//! - Microphone capture via PipeWire, or a WAV file replayed in real time
//! - Session recording to base64 WAV via hound

mod capture;
mod context;
mod file_input;
mod recorder;
mod stream;

use crate::error::SessionError;
use async_trait::async_trait;

pub use capture::PipeWireMicrophone;
pub use context::{AudioContext, MediaStreamSource};
pub use file_input::WavFileMicrophone;
pub use recorder::{encode_wav_base64, SessionRecorder, WavSessionRecorder, WAV_MIME_TYPE};
pub use stream::{MediaStream, MediaTrack, SampleSink};

/// Something that can hand out a live microphone stream
#[async_trait]
pub trait Microphone: Send + Sync {
    /// Acquire the device and return its stream
    ///
    /// The caller owns the stream and must stop it when done.
    async fn acquire(&self) -> Result<MediaStream, SessionError>;

    fn describe(&self) -> String;
}
