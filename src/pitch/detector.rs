//! YIN-based pitch source
//!
//! Taps the session stream into a sliding analysis window. The detector is
//! ready as soon as the window holds one full frame; every poll analyzes the
//! most recent frame.

use super::yin::detect_pitch;
use super::PitchSource;
use crate::audio::{AudioContext, MediaStream, MediaStreamSource, SampleSink};
use crate::error::SessionError;
use async_trait::async_trait;
use log::{debug, trace};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// Default analysis frame length in samples
pub const DEFAULT_FRAME_SIZE: usize = 2048;

/// Default RMS below which a frame counts as silence
pub const DEFAULT_AMPLITUDE_THRESHOLD: f32 = 0.01;

/// Most recent `frame_size` samples of the stream
struct AnalysisWindow {
    frame_size: usize,
    state: Mutex<WindowState>,
    filled: Notify,
}

#[derive(Default)]
struct WindowState {
    samples: VecDeque<f32>,
    sample_rate: u32,
}

impl AnalysisWindow {
    fn new(frame_size: usize) -> Self {
        Self {
            frame_size,
            state: Mutex::new(WindowState::default()),
            filled: Notify::new(),
        }
    }

    fn is_full(&self) -> bool {
        self.state.lock().unwrap().samples.len() >= self.frame_size
    }

    fn frame(&self) -> Option<(Vec<f32>, u32)> {
        let state = self.state.lock().unwrap();
        if state.samples.len() < self.frame_size {
            return None;
        }
        Some((state.samples.iter().copied().collect(), state.sample_rate))
    }
}

impl SampleSink for AnalysisWindow {
    fn write(&self, samples: &[f32], sample_rate: u32) {
        let full = {
            let mut state = self.state.lock().unwrap();
            state.sample_rate = sample_rate;
            state.samples.extend(samples.iter().copied());
            let excess = state.samples.len().saturating_sub(self.frame_size);
            state.samples.drain(..excess);
            state.samples.len() >= self.frame_size
        };
        if full {
            self.filled.notify_one();
        }
    }
}

/// Pitch source running YIN over the live stream
pub struct YinPitchDetector {
    frame_size: usize,
    amplitude_threshold: f32,
    session: Mutex<Option<DetectorSession>>,
}

struct DetectorSession {
    window: Arc<AnalysisWindow>,
    source: MediaStreamSource,
}

impl YinPitchDetector {
    pub fn new() -> Self {
        Self {
            frame_size: DEFAULT_FRAME_SIZE,
            amplitude_threshold: DEFAULT_AMPLITUDE_THRESHOLD,
            session: Mutex::new(None),
        }
    }

    pub fn with_frame_size(mut self, frame_size: usize) -> Self {
        self.frame_size = frame_size.max(8);
        self
    }

    pub fn with_amplitude_threshold(mut self, threshold: f32) -> Self {
        self.amplitude_threshold = threshold.max(0.0);
        self
    }

    fn window(&self) -> Option<Arc<AnalysisWindow>> {
        self.session.lock().unwrap().as_ref().map(|s| s.window.clone())
    }
}

impl Default for YinPitchDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PitchSource for YinPitchDetector {
    async fn initialize(&self, context: &AudioContext, stream: &MediaStream) -> Result<(), SessionError> {
        // Re-initializing replaces any previous tap
        self.release();

        let window = Arc::new(AnalysisWindow::new(self.frame_size));
        let source = context.create_media_stream_source(stream)?;
        source.connect(window.clone())?;
        *self.session.lock().unwrap() = Some(DetectorSession {
            window: window.clone(),
            source,
        });

        while !window.is_full() {
            window.filled.notified().await;
        }

        debug!(
            "YIN detector ready on stream {} ({} sample frames)",
            stream.id(),
            self.frame_size
        );
        Ok(())
    }

    async fn poll_once(&self) -> Result<Option<f32>, SessionError> {
        let window = self.window().ok_or(SessionError::DetectorNotReady)?;
        let Some((frame, sample_rate)) = window.frame() else {
            return Err(SessionError::DetectorNotReady);
        };

        let estimate = detect_pitch(&frame, sample_rate, self.amplitude_threshold);
        trace!("YIN estimate: {:?}", estimate);
        Ok(estimate)
    }

    fn release(&self) {
        if let Some(session) = self.session.lock().unwrap().take() {
            session.source.disconnect();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;
    use std::time::Duration;

    fn tone(freq: f32, sample_rate: u32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| 0.4 * (2.0 * PI * freq * i as f32 / sample_rate as f32).sin())
            .collect()
    }

    #[tokio::test]
    async fn test_poll_before_initialize() {
        let detector = YinPitchDetector::new();
        assert_eq!(detector.poll_once().await, Err(SessionError::DetectorNotReady));
    }

    #[tokio::test]
    async fn test_ready_after_full_frame() {
        let context = AudioContext::new();
        let stream = MediaStream::new(44100);
        let detector = Arc::new(YinPitchDetector::new().with_frame_size(1024));

        let init = {
            let detector = detector.clone();
            let context = Arc::new(context);
            let stream = stream.clone();
            tokio::spawn(async move { detector.initialize(&context, &stream).await })
        };

        // Half a frame is not enough
        tokio::time::sleep(Duration::from_millis(10)).await;
        stream.push_samples(&tone(440.0, 44100, 512), 44100);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!init.is_finished());

        stream.push_samples(&tone(440.0, 44100, 4096), 44100);
        init.await.unwrap().unwrap();

        let freq = detector.poll_once().await.unwrap().expect("pitch");
        assert!((freq - 440.0).abs() < 3.0, "got {}", freq);
    }

    #[tokio::test]
    async fn test_silence_yields_no_estimate() {
        let context = AudioContext::new();
        let stream = MediaStream::new(16000);
        let detector = YinPitchDetector::new().with_frame_size(512);
        stream.push_samples(&[0.0; 256], 16000);

        let pending = detector.initialize(&context, &stream);
        tokio::pin!(pending);
        tokio::select! {
            _ = &mut pending => panic!("ready without audio"),
            _ = tokio::time::sleep(Duration::from_millis(20)) => {}
        }
        stream.push_samples(&[0.0; 512], 16000);
        pending.await.unwrap();

        assert_eq!(detector.poll_once().await, Ok(None));
    }

    #[tokio::test]
    async fn test_release_detaches_tap() {
        let context = AudioContext::new();
        let stream = MediaStream::new(16000);
        let detector = YinPitchDetector::new().with_frame_size(64);

        let init = detector.initialize(&context, &stream);
        let feed = async {
            tokio::task::yield_now().await;
            stream.push_samples(&[0.1; 64], 16000);
        };
        let (result, _) = tokio::join!(init, feed);
        result.unwrap();
        assert_eq!(stream.sink_count(), 1);

        detector.release();
        detector.release();
        assert_eq!(stream.sink_count(), 0);
        assert_eq!(detector.poll_once().await, Err(SessionError::DetectorNotReady));
    }
}
