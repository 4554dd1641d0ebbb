//! Microphone capture using PipeWire
//!
//! Each acquisition runs its own PipeWire main loop on a dedicated thread and
//! pushes the first channel of every F32LE buffer into a `MediaStream`.
//! Stopping the stream quits the loop and joins the thread.

use super::stream::{MediaStream, MediaTrack};
use super::Microphone;
use crate::error::SessionError;
use async_trait::async_trait;
use log::{debug, error, info};
use pipewire as pw;
use pw::spa;
use pw::spa::param::format::{MediaSubtype, MediaType};
use pw::spa::param::format_utils;
use pw::spa::pod::Pod;
use std::sync::Mutex;
use std::thread::{self, JoinHandle};
use tokio::sync::oneshot;

/// Rate assumed until PipeWire negotiates the real one
const DEFAULT_SAMPLE_RATE: u32 = 48000;

enum CaptureCommand {
    Stop,
}

type ReadySender = oneshot::Sender<Result<(), SessionError>>;

/// Default PipeWire input device
pub struct PipeWireMicrophone {
    app_name: String,
}

impl PipeWireMicrophone {
    pub fn new() -> Self {
        Self {
            app_name: "VocaScan".to_string(),
        }
    }

    pub fn with_app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }
}

impl Default for PipeWireMicrophone {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Microphone for PipeWireMicrophone {
    async fn acquire(&self) -> Result<MediaStream, SessionError> {
        let stream = MediaStream::new(DEFAULT_SAMPLE_RATE);
        let (ready_tx, ready_rx) = oneshot::channel();
        let (sender, receiver) = pw::channel::channel::<CaptureCommand>();

        let capture_stream = stream.clone();
        let app_name = self.app_name.clone();
        let handle = thread::Builder::new()
            .name("vocascan-capture".to_string())
            .spawn(move || {
                let mut ready = Some(ready_tx);
                let result = run_capture_loop(capture_stream, receiver, &app_name, &mut ready);
                if let Err(e) = &result {
                    error!("PipeWire capture loop failed: {}", e);
                }
                // Only reached before readiness if setup failed
                if let Some(ready) = ready.take() {
                    let _ = ready.send(result);
                }
            })
            .map_err(|e| {
                SessionError::MicrophoneUnavailable(format!("Failed to spawn capture thread: {}", e))
            })?;

        stream.add_track(Box::new(PipeWireTrack {
            sender: Mutex::new(Some(sender)),
            thread: Mutex::new(Some(handle)),
        }));

        match ready_rx.await {
            Ok(Ok(())) => {
                info!("Microphone stream {} acquired via PipeWire", stream.id());
                Ok(stream)
            }
            Ok(Err(e)) => {
                stream.stop();
                Err(e)
            }
            Err(_) => {
                stream.stop();
                Err(SessionError::MicrophoneUnavailable(
                    "capture thread exited before the stream was ready".to_string(),
                ))
            }
        }
    }

    fn describe(&self) -> String {
        "default PipeWire input".to_string()
    }
}

/// Stops the PipeWire loop thread behind a stream
struct PipeWireTrack {
    sender: Mutex<Option<pw::channel::Sender<CaptureCommand>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl MediaTrack for PipeWireTrack {
    fn stop(&self) {
        if let Some(sender) = self.sender.lock().unwrap().take() {
            let _ = sender.send(CaptureCommand::Stop);
        }
        if let Some(handle) = self.thread.lock().unwrap().take() {
            let _ = handle.join();
        }
        debug!("PipeWire capture thread joined");
    }

    fn label(&self) -> &str {
        "pipewire"
    }
}

/// Run the PipeWire capture loop until a stop command arrives
fn run_capture_loop(
    stream: MediaStream,
    receiver: pw::channel::Receiver<CaptureCommand>,
    app_name: &str,
    ready: &mut Option<ReadySender>,
) -> Result<(), SessionError> {
    let unavailable = |what: &str, e: &dyn std::fmt::Display| {
        SessionError::MicrophoneUnavailable(format!("{}: {}", what, e))
    };

    pw::init();

    let mainloop = pw::main_loop::MainLoopRc::new(None)
        .map_err(|e| unavailable("Failed to create PipeWire main loop", &e))?;

    let context = pw::context::ContextRc::new(&mainloop, None)
        .map_err(|e| unavailable("Failed to create PipeWire context", &e))?;

    let core = context
        .connect_rc(None)
        .map_err(|e| SessionError::PermissionDenied(format!("PipeWire refused the connection: {}", e)))?;

    let mainloop_weak = mainloop.downgrade();
    let _receiver = receiver.attach(mainloop.loop_(), move |cmd| match cmd {
        CaptureCommand::Stop => {
            if let Some(mainloop) = mainloop_weak.upgrade() {
                mainloop.quit();
            }
        }
    });

    struct UserData {
        format: spa::param::audio::AudioInfoRaw,
        stream: MediaStream,
    }

    let user_data = UserData {
        format: Default::default(),
        stream,
    };

    let props = pw::properties::properties! {
        *pw::keys::MEDIA_TYPE => "Audio",
        *pw::keys::MEDIA_CATEGORY => "Capture",
        *pw::keys::MEDIA_ROLE => "Production",
        *pw::keys::APP_NAME => app_name,
    };

    let pw_stream = pw::stream::StreamBox::new(&core, "vocascan-capture", props)
        .map_err(|e| unavailable("Failed to create PipeWire stream", &e))?;

    let _listener = pw_stream
        .add_local_listener_with_user_data(user_data)
        .param_changed(|_, user_data, id, param| {
            let Some(param) = param else { return };
            if id != spa::param::ParamType::Format.as_raw() {
                return;
            }

            let Ok((media_type, media_subtype)) = format_utils::parse_format(param) else {
                return;
            };
            if media_type != MediaType::Audio || media_subtype != MediaSubtype::Raw {
                return;
            }

            if let Err(e) = user_data.format.parse(param) {
                error!("Failed to parse negotiated audio format: {:?}", e);
            }
        })
        .process(|stream, user_data| {
            let Some(mut buffer) = stream.dequeue_buffer() else {
                return;
            };

            let datas = buffer.datas_mut();
            if datas.is_empty() {
                return;
            }

            let sample_rate = user_data.format.rate();
            if sample_rate == 0 {
                return;
            }

            let data = &mut datas[0];
            let n_channels = user_data.format.channels().max(1) as usize;
            let n_samples = data.chunk().size() as usize / std::mem::size_of::<f32>();

            if let Some(raw) = data.data() {
                // First channel only; the detector and the recording are mono
                let mono: Vec<f32> = raw[..(n_samples * 4).min(raw.len())]
                    .chunks_exact(4 * n_channels)
                    .map(|frame| f32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]))
                    .collect();

                user_data.stream.push_samples(&mono, sample_rate);
            }
        })
        .register()
        .map_err(|e| unavailable("Failed to register stream listener", &e))?;

    let mut audio_info = spa::param::audio::AudioInfoRaw::new();
    audio_info.set_format(spa::param::audio::AudioFormat::F32LE);

    let obj = spa::pod::Object {
        type_: spa::utils::SpaTypes::ObjectParamFormat.as_raw(),
        id: spa::param::ParamType::EnumFormat.as_raw(),
        properties: audio_info.into(),
    };

    let values: Vec<u8> = spa::pod::serialize::PodSerializer::serialize(
        std::io::Cursor::new(Vec::new()),
        &spa::pod::Value::Object(obj),
    )
    .map_err(|e| SessionError::MicrophoneUnavailable(format!("Failed to serialize audio format: {:?}", e)))?
    .0
    .into_inner();

    let format_pod = Pod::from_bytes(&values).ok_or_else(|| {
        SessionError::MicrophoneUnavailable("Serialized audio format is not a valid pod".to_string())
    })?;
    let mut params = [format_pod];

    pw_stream
        .connect(
            spa::utils::Direction::Input,
            None,
            pw::stream::StreamFlags::AUTOCONNECT
                | pw::stream::StreamFlags::MAP_BUFFERS
                | pw::stream::StreamFlags::RT_PROCESS,
            &mut params,
        )
        .map_err(|e| unavailable("Failed to connect stream", &e))?;

    if let Some(ready) = ready.take() {
        let _ = ready.send(Ok(()));
    }

    mainloop.run();
    debug!("PipeWire main loop exited");

    Ok(())
}
