//! WAV file replayed as a live microphone
//!
//! Streams the file into a `MediaStream` in real time, one short chunk per
//! tick, so the rest of the engine cannot tell it from a real device.

use super::stream::{MediaStream, MediaTrack};
use super::Microphone;
use crate::error::SessionError;
use async_trait::async_trait;
use log::{debug, info};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Length of audio delivered per tick
const CHUNK_DURATION: Duration = Duration::from_millis(10);

/// Microphone stand-in backed by a WAV file
pub struct WavFileMicrophone {
    path: PathBuf,
    looping: bool,
}

impl WavFileMicrophone {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            looping: false,
        }
    }

    /// Start over from the beginning when the file runs out
    pub fn with_looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }
}

#[async_trait]
impl Microphone for WavFileMicrophone {
    async fn acquire(&self) -> Result<MediaStream, SessionError> {
        let path = self.path.clone();
        let (samples, sample_rate) = tokio::task::spawn_blocking(move || load_mono(&path))
            .await
            .map_err(|e| SessionError::Internal(format!("WAV loading task failed: {}", e)))??;

        let stream = MediaStream::new(sample_rate);
        let chunk_len = ((sample_rate as u128 * CHUNK_DURATION.as_millis()) / 1000).max(1) as usize;
        let looping = self.looping;
        let producer = stream.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(CHUNK_DURATION);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let mut position = 0;

            while producer.is_active() {
                ticker.tick().await;
                if position >= samples.len() {
                    if !looping {
                        debug!("WAV input exhausted after {} samples", samples.len());
                        break;
                    }
                    position = 0;
                }
                let end = (position + chunk_len).min(samples.len());
                producer.push_samples(&samples[position..end], sample_rate);
                position = end;
            }
        });

        stream.add_track(Box::new(TaskTrack {
            task: Mutex::new(Some(task)),
        }));

        info!(
            "Replaying {} as microphone stream {} ({}Hz)",
            self.path.display(),
            stream.id(),
            sample_rate
        );
        Ok(stream)
    }

    fn describe(&self) -> String {
        format!("WAV file {}", self.path.display())
    }
}

/// Aborts the replay task when the stream stops
struct TaskTrack {
    task: Mutex<Option<JoinHandle<()>>>,
}

impl MediaTrack for TaskTrack {
    fn stop(&self) {
        if let Some(task) = self.task.lock().unwrap().take() {
            task.abort();
        }
    }

    fn label(&self) -> &str {
        "wav-file"
    }
}

/// Load a WAV file as mono f32 samples, averaging channels
pub fn load_mono(path: &Path) -> Result<(Vec<f32>, u32), SessionError> {
    let reader = hound::WavReader::open(path).map_err(|e| map_open_error(path, e))?;

    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<Result<Vec<_>, _>>(),
        hound::SampleFormat::Int => {
            let max_value = (1u32 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max_value))
                .collect::<Result<Vec<_>, _>>()
        }
    }
    .map_err(|e| {
        SessionError::MicrophoneUnavailable(format!("Failed to read samples from {}: {}", path.display(), e))
    })?;

    let mono = if channels > 1 {
        samples
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    } else {
        samples
    };

    Ok((mono, spec.sample_rate))
}

fn map_open_error(path: &Path, error: hound::Error) -> SessionError {
    match error {
        hound::Error::IoError(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            SessionError::PermissionDenied(format!("{}: {}", path.display(), e))
        }
        other => SessionError::MicrophoneUnavailable(format!(
            "Failed to open WAV file {}: {}",
            path.display(),
            other
        )),
    }
}
