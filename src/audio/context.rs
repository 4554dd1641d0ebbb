//! Audio processing graph
//!
//! An `AudioContext` owns the taps (`MediaStreamSource`) that route a stream
//! into consumers such as the recorder or the pitch detector. Closing the
//! context disconnects every source it created.

use super::stream::{MediaStream, SampleSink, SinkId};
use crate::error::SessionError;
use log::debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Processing graph for one session
pub struct AudioContext {
    id: Uuid,
    closed: AtomicBool,
    sources: Mutex<Vec<MediaStreamSource>>,
}

impl AudioContext {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            closed: AtomicBool::new(false),
            sources: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Create a tap on `stream` that belongs to this context
    pub fn create_media_stream_source(
        &self,
        stream: &MediaStream,
    ) -> Result<MediaStreamSource, SessionError> {
        if self.is_closed() {
            return Err(SessionError::AudioGraph("audio context is closed".to_string()));
        }
        if !stream.is_active() {
            return Err(SessionError::AudioGraph(format!(
                "stream {} is no longer active",
                stream.id()
            )));
        }

        let source = MediaStreamSource {
            inner: Arc::new(SourceInner {
                stream: stream.clone(),
                sinks: Mutex::new(Vec::new()),
            }),
        };
        self.sources.lock().unwrap().push(source.clone());
        Ok(source)
    }

    /// Disconnect all sources; safe to call repeatedly
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let sources: Vec<MediaStreamSource> = self.sources.lock().unwrap().drain(..).collect();
        for source in &sources {
            source.disconnect();
        }
        debug!("Closed audio context {}", self.id);
    }
}

impl Default for AudioContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Tap routing one stream into any number of sinks
#[derive(Clone)]
pub struct MediaStreamSource {
    inner: Arc<SourceInner>,
}

struct SourceInner {
    stream: MediaStream,
    sinks: Mutex<Vec<SinkId>>,
}

impl MediaStreamSource {
    pub fn stream(&self) -> &MediaStream {
        &self.inner.stream
    }

    /// Start forwarding stream samples to `sink`
    pub fn connect(&self, sink: Arc<dyn SampleSink>) -> Result<(), SessionError> {
        if !self.inner.stream.is_active() {
            return Err(SessionError::AudioGraph(
                "cannot connect to a stopped stream".to_string(),
            ));
        }
        let id = self.inner.stream.attach(sink);
        self.inner.sinks.lock().unwrap().push(id);
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        !self.inner.sinks.lock().unwrap().is_empty()
    }

    /// Detach every sink connected through this source; idempotent
    pub fn disconnect(&self) {
        let ids: Vec<SinkId> = self.inner.sinks.lock().unwrap().drain(..).collect();
        for id in ids {
            self.inner.stream.detach(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullSink;

    impl SampleSink for NullSink {
        fn write(&self, _samples: &[f32], _sample_rate: u32) {}
    }

    #[test]
    fn test_close_disconnects_sources() {
        let context = AudioContext::new();
        let stream = MediaStream::new(44100);
        let source = context.create_media_stream_source(&stream).unwrap();
        source.connect(Arc::new(NullSink)).unwrap();
        source.connect(Arc::new(NullSink)).unwrap();
        assert_eq!(stream.sink_count(), 2);

        context.close();
        context.close();
        assert!(context.is_closed());
        assert!(!source.is_connected());
        assert_eq!(stream.sink_count(), 0);
    }

    #[test]
    fn test_closed_context_rejects_sources() {
        let context = AudioContext::new();
        context.close();
        let stream = MediaStream::new(44100);
        assert!(matches!(
            context.create_media_stream_source(&stream),
            Err(SessionError::AudioGraph(_))
        ));
    }

    #[test]
    fn test_stopped_stream_rejects_sources() {
        let context = AudioContext::new();
        let stream = MediaStream::new(44100);
        let source = context.create_media_stream_source(&stream).unwrap();
        stream.stop();
        assert!(source.connect(Arc::new(NullSink)).is_err());
        assert!(context.create_media_stream_source(&stream).is_err());
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let context = AudioContext::new();
        let stream = MediaStream::new(44100);
        let source = context.create_media_stream_source(&stream).unwrap();
        source.connect(Arc::new(NullSink)).unwrap();
        source.disconnect();
        source.disconnect();
        assert_eq!(stream.sink_count(), 0);
    }
}
