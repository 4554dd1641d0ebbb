//! Tracking engine
//!
//! Owns the microphone stream, the recording and the pitch source of one
//! session at a time. Raw estimates are polled on a fixed tick, smoothed and
//! handed to the session's reading callback. Stopping finalizes the recording
//! and submits it for diagnosis.
//!
//! The `active` flag is the only cancellation signal for the poll loop. It is
//! cleared before any teardown step, and the loop re-checks it under the
//! smoother lock before applying a finished poll, so a poll that lands after
//! a stop is discarded.

use crate::audio::{AudioContext, MediaStream, MediaStreamSource, Microphone, SessionRecorder};
use crate::diagnosis::DiagnosisService;
use crate::error::SessionError;
use crate::models::{DiagnosisResult, PitchReading};
use crate::pitch::{PitchSmoother, PitchSource, SmoothingParams};
use log::{debug, info, trace, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::MutexGuard;
use tokio::task::JoinHandle;

/// Receives every reading produced while a session is active
pub type ReadingCallback = Arc<dyn Fn(PitchReading) + Send + Sync>;

/// Engine tuning
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Deadline for the pitch source to become ready
    pub model_load_timeout: Duration,
    /// Delay between the end of one poll and the start of the next
    pub poll_interval: Duration,
    pub smoothing: SmoothingParams,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model_load_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(16),
            smoothing: SmoothingParams::default(),
        }
    }
}

/// Resources held for the current session
#[derive(Default)]
struct SessionResources {
    stream: Option<MediaStream>,
    capture_source: Option<MediaStreamSource>,
    poll_task: Option<JoinHandle<()>>,
}

/// Drives one pitch-tracking session at a time
pub struct TrackingEngine {
    microphone: Arc<dyn Microphone>,
    pitch_source: Arc<dyn PitchSource>,
    recorder: Arc<dyn SessionRecorder>,
    diagnosis: Arc<dyn DiagnosisService>,
    config: EngineConfig,
    active: Arc<AtomicBool>,
    smoother: Arc<Mutex<PitchSmoother>>,
    resources: tokio::sync::Mutex<SessionResources>,
}

/// Releases the session when dropped, unless disarmed
struct ReleaseGuard<'a> {
    engine: &'a TrackingEngine,
    resources: MutexGuard<'a, SessionResources>,
    armed: bool,
}

impl Drop for ReleaseGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.engine.release(&mut self.resources);
        }
    }
}

impl TrackingEngine {
    pub fn new(
        microphone: Arc<dyn Microphone>,
        pitch_source: Arc<dyn PitchSource>,
        recorder: Arc<dyn SessionRecorder>,
        diagnosis: Arc<dyn DiagnosisService>,
        config: EngineConfig,
    ) -> Self {
        let smoother = PitchSmoother::with_params(config.smoothing);
        Self {
            microphone,
            pitch_source,
            recorder,
            diagnosis,
            config,
            active: Arc::new(AtomicBool::new(false)),
            smoother: Arc::new(Mutex::new(smoother)),
            resources: tokio::sync::Mutex::new(SessionResources::default()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Acquire everything a session needs and start polling
    ///
    /// Fails with `AlreadyRunning` if a session is active or another start or
    /// stop is in progress. On any failure all partially acquired resources
    /// are released before the error is returned.
    pub async fn start(&self, context: &AudioContext, on_reading: ReadingCallback) -> Result<(), SessionError> {
        let resources = self
            .resources
            .try_lock()
            .map_err(|_| SessionError::AlreadyRunning)?;
        if self.is_active() {
            return Err(SessionError::AlreadyRunning);
        }

        let mut guard = ReleaseGuard {
            engine: self,
            resources,
            armed: true,
        };

        // Leftovers from a session that never stopped cleanly
        self.release(&mut guard.resources);

        if let Err(e) = self.acquire(context, &mut guard.resources).await {
            warn!("Session start failed, releasing resources: {}", e);
            return Err(e);
        }

        self.active.store(true, Ordering::SeqCst);
        guard.resources.poll_task = Some(tokio::spawn(run_poll_loop(
            self.active.clone(),
            self.pitch_source.clone(),
            self.smoother.clone(),
            on_reading,
            self.config.poll_interval,
        )));
        guard.armed = false;

        info!("Tracking session started");
        Ok(())
    }

    async fn acquire(&self, context: &AudioContext, resources: &mut SessionResources) -> Result<(), SessionError> {
        let stream = self.microphone.acquire().await?;
        debug!("Acquired {} as stream {}", self.microphone.describe(), stream.id());
        resources.stream = Some(stream.clone());

        let source = context.create_media_stream_source(&stream)?;
        resources.capture_source = Some(source.clone());
        self.recorder.start(&source)?;

        let deadline = self.config.model_load_timeout;
        match tokio::time::timeout(deadline, self.pitch_source.initialize(context, &stream)).await {
            Ok(result) => result,
            Err(_) => Err(SessionError::ModelLoadTimeout(deadline)),
        }
    }

    /// End the session, encode the take and submit it for diagnosis
    ///
    /// The diagnosis result is returned unchanged. Resources are released on
    /// every path, including when this future is dropped midway.
    pub async fn stop(&self) -> Result<DiagnosisResult, SessionError> {
        let mut guard = ReleaseGuard {
            engine: self,
            resources: self.resources.lock().await,
            armed: true,
        };

        if !self.active.swap(false, Ordering::SeqCst) {
            debug!("Stop requested without an active session");
            return Err(SessionError::NoActiveSession);
        }

        info!("Stopping tracking session");
        if let Some(task) = guard.resources.poll_task.take() {
            task.abort();
        }

        let payload = self.recorder.finish().await?;
        self.diagnosis.submit(payload).await
    }

    /// Tear down the session; every step is idempotent
    fn release(&self, resources: &mut SessionResources) {
        self.active.store(false, Ordering::SeqCst);

        if let Some(task) = resources.poll_task.take() {
            task.abort();
        }
        self.pitch_source.release();
        if let Some(source) = resources.capture_source.take() {
            source.disconnect();
        }
        self.recorder.clear();
        if let Some(stream) = resources.stream.take() {
            stream.stop();
            debug!("Released stream {}", stream.id());
        }
        self.smoother.lock().unwrap().reset();
    }
}

impl Drop for TrackingEngine {
    fn drop(&mut self) {
        let mut resources = std::mem::take(self.resources.get_mut());
        if resources.stream.is_some() {
            warn!("Tracking engine dropped with a live session; releasing");
        }
        self.release(&mut resources);
    }
}

/// Poll the pitch source until the session is no longer active
async fn run_poll_loop(
    active: Arc<AtomicBool>,
    source: Arc<dyn PitchSource>,
    smoother: Arc<Mutex<PitchSmoother>>,
    on_reading: ReadingCallback,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut polls: u64 = 0;

    while active.load(Ordering::SeqCst) {
        ticker.tick().await;
        if !active.load(Ordering::SeqCst) {
            break;
        }

        let raw = match source.poll_once().await {
            Ok(raw) => raw,
            Err(e) => {
                trace!("Pitch poll failed: {}", e);
                continue;
            }
        };
        polls += 1;

        {
            let mut smoother = smoother.lock().unwrap();
            if !active.load(Ordering::SeqCst) {
                trace!("Discarding poll that completed after stop");
                break;
            }
            if let Some(reading) = smoother.update(raw) {
                trace!(
                    "{:.1}Hz {} ({:.0}%)",
                    reading.pitch,
                    reading.note,
                    reading.confidence * 100.0
                );
                on_reading(reading);
            }
        }
    }

    debug!("Poll loop finished after {} polls", polls);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;

    fn collector() -> (ReadingCallback, Arc<Mutex<Vec<PitchReading>>>) {
        let readings: Arc<Mutex<Vec<PitchReading>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = readings.clone();
        let callback: ReadingCallback = Arc::new(move |reading: PitchReading| sink.lock().unwrap().push(reading));
        (callback, readings)
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_polls_and_delivers_readings() {
        let mic = Arc::new(FakeMicrophone::new());
        let source = Arc::new(
            ScriptedPitchSource::new().with_script(vec![Some(440.0), None, Some(440.0)]),
        );
        let recorder = Arc::new(FakeRecorder::new());
        let engine = engine_with(mic.clone(), source.clone(), recorder.clone(), Arc::new(FakeDiagnosis::new()));
        let (callback, readings) = collector();

        engine.start(&AudioContext::new(), callback).await.unwrap();
        assert!(engine.is_active());
        assert!(recorder.is_recording());
        assert_eq!(mic.acquisitions(), 1);

        tokio::time::sleep(Duration::from_millis(200)).await;
        let readings = readings.lock().unwrap().clone();
        assert_eq!(readings.len(), 2);
        assert_eq!(readings[0].note, "A4");
        assert!((readings[1].confidence - 1.0).abs() < 1e-4);
        assert!(source.polls() > 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_start_is_rejected() {
        let mic = Arc::new(FakeMicrophone::new());
        let engine = engine_with(
            mic.clone(),
            Arc::new(ScriptedPitchSource::new()),
            Arc::new(FakeRecorder::new()),
            Arc::new(FakeDiagnosis::new()),
        );
        let context = AudioContext::new();
        let (callback, _) = collector();

        engine.start(&context, callback.clone()).await.unwrap();
        assert_eq!(engine.start(&context, callback).await, Err(SessionError::AlreadyRunning));
        assert_eq!(mic.acquisitions(), 1);
        assert!(mic.last_stream().unwrap().is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_during_slow_start_fails_fast() {
        let engine = Arc::new(engine_with(
            Arc::new(FakeMicrophone::new()),
            Arc::new(ScriptedPitchSource::new().with_init_delay(Duration::from_secs(2))),
            Arc::new(FakeRecorder::new()),
            Arc::new(FakeDiagnosis::new()),
        ));
        let first = {
            let engine = engine.clone();
            tokio::spawn(async move {
                let (callback, _) = collector();
                engine.start(&AudioContext::new(), callback).await
            })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        let (callback, _) = collector();
        let started = tokio::time::Instant::now();
        let second = engine.start(&AudioContext::new(), callback).await;
        assert_eq!(second, Err(SessionError::AlreadyRunning));
        assert!(started.elapsed() < Duration::from_millis(10));

        first.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_init_timeout_releases_everything() {
        let mic = Arc::new(FakeMicrophone::new());
        let source = Arc::new(ScriptedPitchSource::new().with_init_delay(Duration::from_secs(15)));
        let recorder = Arc::new(FakeRecorder::new());
        let engine = engine_with(mic.clone(), source.clone(), recorder.clone(), Arc::new(FakeDiagnosis::new()));
        let (callback, _) = collector();

        let err = engine.start(&AudioContext::new(), callback).await.unwrap_err();
        assert_eq!(err, SessionError::ModelLoadTimeout(Duration::from_secs(10)));
        assert!(!engine.is_active());
        assert!(!mic.last_stream().unwrap().is_active());
        assert_eq!(mic.track_stops(), 1);
        assert!(!recorder.is_recording());
        assert!(source.releases() >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_denied_microphone_never_records() {
        let mic = Arc::new(FakeMicrophone::new());
        mic.set_deny(true);
        let recorder = Arc::new(FakeRecorder::new());
        let engine = engine_with(
            mic.clone(),
            Arc::new(ScriptedPitchSource::new()),
            recorder.clone(),
            Arc::new(FakeDiagnosis::new()),
        );
        let (callback, _) = collector();

        let err = engine.start(&AudioContext::new(), callback).await.unwrap_err();
        assert!(matches!(err, SessionError::PermissionDenied(_)));
        assert_eq!(recorder.starts(), 0);
        assert!(!engine.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_without_session() {
        let engine = engine_with(
            Arc::new(FakeMicrophone::new()),
            Arc::new(ScriptedPitchSource::new()),
            Arc::new(FakeRecorder::new()),
            Arc::new(FakeDiagnosis::new()),
        );
        assert_eq!(engine.stop().await, Err(SessionError::NoActiveSession));
        assert_eq!(engine.stop().await, Err(SessionError::NoActiveSession));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_passes_result_through_and_releases() {
        let mic = Arc::new(FakeMicrophone::new());
        let source = Arc::new(ScriptedPitchSource::new().with_fallback(Some(330.0)));
        let diagnosis = Arc::new(FakeDiagnosis::new());
        let engine = engine_with(mic.clone(), source.clone(), Arc::new(FakeRecorder::new()), diagnosis.clone());
        let (callback, readings) = collector();

        engine.start(&AudioContext::new(), callback).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let result = engine.stop().await.unwrap();
        assert_eq!(result, sample_result());
        assert_eq!(diagnosis.submissions(), 1);
        assert!(!engine.is_active());
        assert!(!mic.last_stream().unwrap().is_active());
        assert!(source.releases() >= 1);

        let delivered = readings.lock().unwrap().len();
        assert!(delivered > 0);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(readings.lock().unwrap().len(), delivered);

        assert_eq!(engine.stop().await, Err(SessionError::NoActiveSession));
    }

    #[tokio::test(start_paused = true)]
    async fn test_submission_failure_still_releases() {
        let mic = Arc::new(FakeMicrophone::new());
        let recorder = Arc::new(FakeRecorder::new());
        let engine = engine_with(
            mic.clone(),
            Arc::new(ScriptedPitchSource::new()),
            recorder.clone(),
            Arc::new(FakeDiagnosis::failing()),
        );
        let (callback, _) = collector();

        engine.start(&AudioContext::new(), callback).await.unwrap();
        let err = engine.stop().await.unwrap_err();
        assert!(matches!(err, SessionError::SubmissionFailure(_)));
        assert!(!mic.last_stream().unwrap().is_active());
        assert!(!recorder.is_recording());
        assert!(!engine.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_encoding_failure_skips_submission() {
        let mic = Arc::new(FakeMicrophone::new());
        let diagnosis = Arc::new(FakeDiagnosis::new());
        let engine = engine_with(
            mic.clone(),
            Arc::new(ScriptedPitchSource::new()),
            Arc::new(FakeRecorder::failing()),
            diagnosis.clone(),
        );
        let (callback, _) = collector();

        engine.start(&AudioContext::new(), callback).await.unwrap();
        let err = engine.stop().await.unwrap_err();
        assert!(matches!(err, SessionError::EncodingFailure(_)));
        assert_eq!(diagnosis.submissions(), 0);
        assert!(!mic.last_stream().unwrap().is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_history_does_not_leak_between_sessions() {
        let source = Arc::new(ScriptedPitchSource::new().with_fallback(Some(440.0)));
        let engine = engine_with(
            Arc::new(FakeMicrophone::new()),
            source.clone(),
            Arc::new(FakeRecorder::new()),
            Arc::new(FakeDiagnosis::new()),
        );

        let (callback, _) = collector();
        engine.start(&AudioContext::new(), callback).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        engine.stop().await.unwrap();

        source.set_fallback(Some(220.0));
        let (callback, readings) = collector();
        engine.start(&AudioContext::new(), callback).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let first = readings.lock().unwrap()[0].clone();
        assert!((first.pitch - 220.0).abs() < 1e-3);
        assert_eq!(first.note, "A3");
        assert!((first.confidence - 1.0).abs() < 1e-4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_releases_live_session() {
        let mic = Arc::new(FakeMicrophone::new());
        let engine = engine_with(
            mic.clone(),
            Arc::new(ScriptedPitchSource::new()),
            Arc::new(FakeRecorder::new()),
            Arc::new(FakeDiagnosis::new()),
        );
        let (callback, _) = collector();
        engine.start(&AudioContext::new(), callback).await.unwrap();

        drop(engine);
        assert!(!mic.last_stream().unwrap().is_active());
        assert_eq!(mic.track_stops(), 1);
    }
}
