//! Session recording
//!
//! Records everything a capture source delivers during a session and, when
//! the session stops, encodes it as a 32-bit float mono WAV wrapped in base64
//! for submission.

use super::context::MediaStreamSource;
use super::stream::SampleSink;
use crate::error::SessionError;
use crate::models::EncodedPayload;
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use hound::{WavSpec, WavWriter};
use log::{debug, info};
use std::io::Cursor;
use std::sync::{Arc, Mutex};

/// MIME type of the payload produced by `WavSessionRecorder`
pub const WAV_MIME_TYPE: &str = "audio/wav";

/// Captures session audio and yields it encoded at the end
#[async_trait]
pub trait SessionRecorder: Send + Sync {
    /// Begin recording everything `source` delivers
    fn start(&self, source: &MediaStreamSource) -> Result<(), SessionError>;

    /// Stop recording and encode what was captured
    async fn finish(&self) -> Result<EncodedPayload, SessionError>;

    /// Drop any captured audio without encoding it; idempotent
    fn clear(&self);

    fn is_recording(&self) -> bool;
}

/// Buffer the stream writes into while a recording is live
#[derive(Default)]
struct CaptureBuffer {
    inner: Mutex<CaptureBufferInner>,
}

#[derive(Default)]
struct CaptureBufferInner {
    samples: Vec<f32>,
    sample_rate: u32,
    sealed: bool,
}

impl SampleSink for CaptureBuffer {
    fn write(&self, samples: &[f32], sample_rate: u32) {
        let mut inner = self.inner.lock().unwrap();
        if inner.sealed {
            return;
        }
        inner.sample_rate = sample_rate;
        inner.samples.extend_from_slice(samples);
    }
}

impl CaptureBuffer {
    /// Stop accepting samples and hand over what was captured
    fn seal(&self) -> (Vec<f32>, u32) {
        let mut inner = self.inner.lock().unwrap();
        inner.sealed = true;
        (std::mem::take(&mut inner.samples), inner.sample_rate)
    }
}

/// WAV recorder that encodes in memory
pub struct WavSessionRecorder {
    active: Mutex<Option<Arc<CaptureBuffer>>>,
}

impl WavSessionRecorder {
    pub fn new() -> Self {
        Self {
            active: Mutex::new(None),
        }
    }
}

impl Default for WavSessionRecorder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionRecorder for WavSessionRecorder {
    fn start(&self, source: &MediaStreamSource) -> Result<(), SessionError> {
        let mut active = self.active.lock().unwrap();
        if active.is_some() {
            return Err(SessionError::AlreadyRunning);
        }

        let buffer = Arc::new(CaptureBuffer::default());
        buffer.inner.lock().unwrap().sample_rate = source.stream().sample_rate();
        source.connect(buffer.clone())?;
        *active = Some(buffer);

        debug!("Recording started on stream {}", source.stream().id());
        Ok(())
    }

    async fn finish(&self) -> Result<EncodedPayload, SessionError> {
        let buffer = self
            .active
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| SessionError::EncodingFailure("recorder was not started".to_string()))?;

        let (samples, sample_rate) = buffer.seal();
        if samples.is_empty() {
            return Err(SessionError::EncodingFailure("no audio was captured".to_string()));
        }

        let captured_at = chrono::Utc::now();
        let duration_seconds = duration_seconds(samples.len(), sample_rate);

        let data = tokio::task::spawn_blocking(move || encode_wav_base64(&samples, sample_rate))
            .await
            .map_err(|e| SessionError::Internal(format!("Encoding task failed: {}", e)))??;

        info!(
            "Encoded {:.1}s of audio at {}Hz ({} base64 bytes)",
            duration_seconds,
            sample_rate,
            data.len()
        );

        Ok(EncodedPayload {
            data,
            mime_type: WAV_MIME_TYPE.to_string(),
            sample_rate,
            duration_seconds,
            captured_at,
        })
    }

    fn clear(&self) {
        if let Some(buffer) = self.active.lock().unwrap().take() {
            buffer.seal();
        }
    }

    fn is_recording(&self) -> bool {
        self.active.lock().unwrap().is_some()
    }
}

/// Encode mono f32 samples as a WAV file and return it as base64 text
pub fn encode_wav_base64(samples: &[f32], sample_rate: u32) -> Result<String, SessionError> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut cursor, spec)
            .map_err(|e| SessionError::EncodingFailure(format!("Failed to create WAV writer: {}", e)))?;

        for &sample in samples {
            writer
                .write_sample(sample)
                .map_err(|e| SessionError::EncodingFailure(format!("Failed to write sample: {}", e)))?;
        }

        writer
            .finalize()
            .map_err(|e| SessionError::EncodingFailure(format!("Failed to finalize WAV data: {}", e)))?;
    }

    Ok(general_purpose::STANDARD.encode(cursor.into_inner()))
}

/// Get duration of samples in seconds
pub fn duration_seconds(sample_count: usize, sample_rate: u32) -> f64 {
    if sample_rate == 0 {
        return 0.0;
    }
    sample_count as f64 / sample_rate as f64
}
