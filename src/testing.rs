//! In-memory stand-ins for the engine's collaborators

use crate::audio::{AudioContext, MediaStream, MediaStreamSource, MediaTrack, Microphone, SessionRecorder};
use crate::diagnosis::DiagnosisService;
use crate::engine::{EngineConfig, TrackingEngine};
use crate::error::SessionError;
use crate::models::{DiagnosisResult, EncodedPayload};
use crate::pitch::PitchSource;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn sample_result() -> DiagnosisResult {
    DiagnosisResult {
        score: 82.0,
        pitch: 231.4,
        stability: 0.87,
    }
}

pub fn engine_with(
    microphone: Arc<dyn Microphone>,
    pitch_source: Arc<dyn PitchSource>,
    recorder: Arc<dyn SessionRecorder>,
    diagnosis: Arc<dyn DiagnosisService>,
) -> TrackingEngine {
    TrackingEngine::new(microphone, pitch_source, recorder, diagnosis, EngineConfig::default())
}

/// Microphone handing out silent streams with counted track stops
#[derive(Default)]
pub struct FakeMicrophone {
    deny: AtomicBool,
    acquisitions: AtomicUsize,
    track_stops: Arc<AtomicUsize>,
    streams: Mutex<Vec<MediaStream>>,
}

struct CountingTrack(Arc<AtomicUsize>);

impl MediaTrack for CountingTrack {
    fn stop(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

impl FakeMicrophone {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_deny(&self, deny: bool) {
        self.deny.store(deny, Ordering::SeqCst);
    }

    pub fn acquisitions(&self) -> usize {
        self.acquisitions.load(Ordering::SeqCst)
    }

    pub fn track_stops(&self) -> usize {
        self.track_stops.load(Ordering::SeqCst)
    }

    pub fn last_stream(&self) -> Option<MediaStream> {
        self.streams.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl Microphone for FakeMicrophone {
    async fn acquire(&self) -> Result<MediaStream, SessionError> {
        if self.deny.load(Ordering::SeqCst) {
            return Err(SessionError::PermissionDenied("denied by test".to_string()));
        }
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        let stream = MediaStream::new(16000);
        stream.add_track(Box::new(CountingTrack(self.track_stops.clone())));
        self.streams.lock().unwrap().push(stream.clone());
        Ok(stream)
    }

    fn describe(&self) -> String {
        "fake microphone".to_string()
    }
}

/// Pitch source replaying a fixed list of estimates
#[derive(Default)]
pub struct ScriptedPitchSource {
    init_delay: Duration,
    script: Mutex<VecDeque<Option<f32>>>,
    fallback: Mutex<Option<f32>>,
    polls: AtomicUsize,
    releases: AtomicUsize,
}

impl ScriptedPitchSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_init_delay(mut self, delay: Duration) -> Self {
        self.init_delay = delay;
        self
    }

    pub fn with_script(self, script: Vec<Option<f32>>) -> Self {
        *self.script.lock().unwrap() = script.into();
        self
    }

    /// Estimate returned once the script runs out
    pub fn with_fallback(self, fallback: Option<f32>) -> Self {
        self.set_fallback(fallback);
        self
    }

    pub fn set_fallback(&self, fallback: Option<f32>) {
        *self.fallback.lock().unwrap() = fallback;
    }

    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PitchSource for ScriptedPitchSource {
    async fn initialize(&self, _context: &AudioContext, _stream: &MediaStream) -> Result<(), SessionError> {
        tokio::time::sleep(self.init_delay).await;
        Ok(())
    }

    async fn poll_once(&self) -> Result<Option<f32>, SessionError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        Ok(next.unwrap_or_else(|| *self.fallback.lock().unwrap()))
    }

    fn release(&self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

/// Recorder producing a fixed payload
#[derive(Default)]
pub struct FakeRecorder {
    fail: bool,
    recording: AtomicBool,
    starts: AtomicUsize,
}

impl FakeRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionRecorder for FakeRecorder {
    fn start(&self, _source: &MediaStreamSource) -> Result<(), SessionError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.recording.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn finish(&self) -> Result<EncodedPayload, SessionError> {
        if !self.recording.swap(false, Ordering::SeqCst) {
            return Err(SessionError::EncodingFailure("not recording".to_string()));
        }
        if self.fail {
            return Err(SessionError::EncodingFailure("encoder broke".to_string()));
        }
        Ok(EncodedPayload {
            data: "ZmFrZQ==".to_string(),
            mime_type: "audio/wav".to_string(),
            sample_rate: 16000,
            duration_seconds: 1.0,
            captured_at: Utc::now(),
        })
    }

    fn clear(&self) {
        self.recording.store(false, Ordering::SeqCst);
    }

    fn is_recording(&self) -> bool {
        self.recording.load(Ordering::SeqCst)
    }
}

/// Diagnosis service answering with `sample_result()` or a failure
#[derive(Default)]
pub struct FakeDiagnosis {
    fail: bool,
    delay: Duration,
    submissions: AtomicUsize,
}

impl FakeDiagnosis {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn submissions(&self) -> usize {
        self.submissions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DiagnosisService for FakeDiagnosis {
    async fn submit(&self, payload: EncodedPayload) -> Result<DiagnosisResult, SessionError> {
        assert!(!payload.data.is_empty());
        self.submissions.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        if self.fail {
            return Err(SessionError::SubmissionFailure("rejected by test".to_string()));
        }
        Ok(sample_result())
    }
}
