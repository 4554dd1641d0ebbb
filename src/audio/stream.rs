//! Live media streams
//!
//! A `MediaStream` is the handle to an acquired microphone. Producers push
//! mono f32 samples into it; consumers attach sinks and get every sample
//! pushed after they attached. Stopping the stream stops its tracks (the
//! hardware side) exactly once.

use log::debug;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Receives samples from a stream
pub trait SampleSink: Send + Sync {
    fn write(&self, samples: &[f32], sample_rate: u32);
}

/// Hardware (or simulated) producer behind a stream
pub trait MediaTrack: Send + Sync {
    /// Release the underlying device. Called at most once per track.
    fn stop(&self);

    fn label(&self) -> &str {
        "audio"
    }
}

/// Identifies an attached sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SinkId(u64);

/// Shared handle to a live audio stream
#[derive(Clone)]
pub struct MediaStream {
    inner: Arc<StreamInner>,
}

struct StreamInner {
    id: Uuid,
    active: AtomicBool,
    sample_rate: AtomicU32,
    next_sink: AtomicU64,
    sinks: Mutex<Vec<(SinkId, Arc<dyn SampleSink>)>>,
    tracks: Mutex<Vec<Box<dyn MediaTrack>>>,
}

impl MediaStream {
    /// Create an active stream with no tracks yet
    pub fn new(sample_rate: u32) -> Self {
        Self {
            inner: Arc::new(StreamInner {
                id: Uuid::new_v4(),
                active: AtomicBool::new(true),
                sample_rate: AtomicU32::new(sample_rate),
                next_sink: AtomicU64::new(0),
                sinks: Mutex::new(Vec::new()),
                tracks: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    pub fn sample_rate(&self) -> u32 {
        self.inner.sample_rate.load(Ordering::SeqCst)
    }

    /// Register the producer that must be stopped with this stream
    ///
    /// Adding a track to an already stopped stream stops it right away.
    pub fn add_track(&self, track: Box<dyn MediaTrack>) {
        if !self.is_active() {
            track.stop();
            return;
        }
        self.inner.tracks.lock().unwrap().push(track);
    }

    pub fn track_count(&self) -> usize {
        self.inner.tracks.lock().unwrap().len()
    }

    /// Deliver freshly captured samples to every attached sink
    pub fn push_samples(&self, samples: &[f32], sample_rate: u32) {
        if samples.is_empty() || !self.is_active() {
            return;
        }
        self.inner.sample_rate.store(sample_rate, Ordering::SeqCst);

        // Clone the sink list so sinks never run under our lock
        let sinks: Vec<Arc<dyn SampleSink>> = self
            .inner
            .sinks
            .lock()
            .unwrap()
            .iter()
            .map(|(_, sink)| sink.clone())
            .collect();

        for sink in sinks {
            sink.write(samples, sample_rate);
        }
    }

    pub(crate) fn attach(&self, sink: Arc<dyn SampleSink>) -> SinkId {
        let id = SinkId(self.inner.next_sink.fetch_add(1, Ordering::SeqCst));
        self.inner.sinks.lock().unwrap().push((id, sink));
        id
    }

    pub(crate) fn detach(&self, id: SinkId) {
        self.inner.sinks.lock().unwrap().retain(|(sink_id, _)| *sink_id != id);
    }

    pub fn sink_count(&self) -> usize {
        self.inner.sinks.lock().unwrap().len()
    }

    /// Stop all tracks and drop all sinks; safe to call repeatedly
    pub fn stop(&self) {
        if !self.inner.active.swap(false, Ordering::SeqCst) {
            return;
        }

        let tracks: Vec<Box<dyn MediaTrack>> =
            self.inner.tracks.lock().unwrap().drain(..).collect();
        for track in &tracks {
            debug!("Stopping {} track of stream {}", track.label(), self.inner.id);
            track.stop();
        }

        self.inner.sinks.lock().unwrap().clear();
    }
}

impl std::fmt::Debug for MediaStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaStream")
            .field("id", &self.inner.id)
            .field("active", &self.is_active())
            .field("sample_rate", &self.sample_rate())
            .finish()
    }
}
