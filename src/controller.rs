//! Session controller
//!
//! Runs the user-facing lifecycle around a `TrackingEngine`: a countdown
//! before tracking, a throttled stream of readings while it runs, and the
//! analysis step once the take is stopped. Presentation code reads the
//! current `SessionSnapshot` or subscribes to changes.
//!
//! The engine is started as soon as the countdown begins so that microphone
//! and detector setup overlap with it. The countdown and the analysis run on
//! a task owned by the controller, so a caller that stops waiting on `start`
//! or `stop` never strands the session midway.

use crate::audio::AudioContext;
use crate::engine::{ReadingCallback, TrackingEngine};
use crate::error::SessionError;
use crate::models::{PitchReading, SessionSnapshot, SessionState};
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq)]
pub struct ControllerConfig {
    /// First countdown value shown
    pub countdown_from: u32,
    pub countdown_tick: Duration,
    /// Minimum spacing between published readings
    pub reading_throttle: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            countdown_from: 3,
            countdown_tick: Duration::from_secs(1),
            reading_throttle: Duration::from_millis(33),
        }
    }
}

type StartHandle = JoinHandle<Result<(), SessionError>>;

/// State shared between the controller and its session task
struct Shared {
    engine: Arc<TrackingEngine>,
    config: ControllerConfig,
    snapshot: Arc<watch::Sender<SessionSnapshot>>,
    context: Mutex<Option<Arc<AudioContext>>>,
    disposed: AtomicBool,
    /// Cuts the countdown short on dispose
    cancel: Notify,
}

pub struct SessionController {
    shared: Arc<Shared>,
    /// Countdown or analysis task of the current session
    session_task: Mutex<Option<JoinHandle<()>>>,
}

impl SessionController {
    pub fn new(engine: Arc<TrackingEngine>, config: ControllerConfig) -> Self {
        let (snapshot, _) = watch::channel(SessionSnapshot::default());
        Self {
            shared: Arc::new(Shared {
                engine,
                config,
                snapshot: Arc::new(snapshot),
                context: Mutex::new(None),
                disposed: AtomicBool::new(false),
                cancel: Notify::new(),
            }),
            session_task: Mutex::new(None),
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.shared.snapshot.borrow().clone()
    }

    /// Receiver that sees every published snapshot change
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.shared.snapshot.subscribe()
    }

    /// Count down, then track
    ///
    /// Ignored unless the session is idle or showing an error. Resolves once
    /// the session is running or has failed to start; dropping the returned
    /// future does not interrupt the countdown.
    pub async fn start(&self) {
        let mut updates = self.shared.snapshot.subscribe();
        let countdown_from = self.shared.config.countdown_from.max(1);

        // The session task is launched under the snapshot lock, so dispose
        // either rejects this start or finds the task to wait on.
        let accepted = self.shared.snapshot.send_if_modified(|snap| {
            if self.shared.is_disposed() || !snap.state.accepts_start() {
                return false;
            }
            *snap = SessionSnapshot {
                state: SessionState::CountingDown(countdown_from),
                reading: None,
                diagnosis: None,
            };
            let task = self.launch_countdown(countdown_from);
            *self.session_task.lock().unwrap() = Some(task);
            true
        });
        if !accepted {
            debug!("Start ignored while {}", self.shared.snapshot.borrow().state.short_name());
            return;
        }
        info!("Session countdown started from {}", countdown_from);

        let _ = updates.wait_for(|snap| !snap.is_counting_down()).await;
    }

    fn launch_countdown(&self, countdown_from: u32) -> JoinHandle<()> {
        let context = self.shared.fresh_context();
        let engine = self.shared.engine.clone();
        let on_reading = self.shared.reading_publisher();
        let engine_start: StartHandle = tokio::spawn(async move { engine.start(&context, on_reading).await });
        tokio::spawn(run_countdown(self.shared.clone(), countdown_from, engine_start))
    }

    /// Stop tracking and wait for the diagnosis
    ///
    /// Ignored unless the session is running. Dropping the returned future
    /// does not abandon the analysis.
    pub async fn stop(&self) {
        let mut updates = self.shared.snapshot.subscribe();

        let accepted = self.shared.snapshot.send_if_modified(|snap| {
            if self.shared.is_disposed() || snap.state != SessionState::Running {
                return false;
            }
            snap.state = SessionState::Analyzing;
            snap.reading = Some(PitchReading::neutral());
            let task = tokio::spawn(run_analysis(self.shared.clone()));
            *self.session_task.lock().unwrap() = Some(task);
            true
        });
        if !accepted {
            debug!("Stop ignored while {}", self.shared.snapshot.borrow().state.short_name());
            return;
        }
        info!("Session stopped, analyzing take");

        let _ = updates.wait_for(|snap| !snap.is_analyzing()).await;
    }

    /// Tear everything down; later calls to `start` and `stop` are ignored
    pub async fn dispose(&self) {
        let mut first = false;
        self.shared.snapshot.send_if_modified(|_| {
            first = !self.shared.disposed.swap(true, Ordering::SeqCst);
            false
        });
        if !first {
            return;
        }
        info!("Disposing session controller");

        self.shared.cancel.notify_one();
        let task = self.session_task.lock().unwrap().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                debug!("Session task ended abnormally: {}", e);
            }
        }

        match self.shared.engine.stop().await {
            Ok(result) => debug!("Discarding diagnosis {:?} on dispose", result),
            Err(SessionError::NoActiveSession) => {}
            Err(e) => debug!("Engine stop during dispose: {}", e),
        }
        self.shared.close_context();

        self.shared.snapshot.send_modify(|snap| {
            snap.state = SessionState::Idle;
            snap.reading = None;
        });
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if !self.shared.is_disposed() {
            warn!("Session controller dropped without dispose");
        }
        if let Some(task) = self.session_task.get_mut().ok().and_then(|t| t.take()) {
            task.abort();
        }
        self.shared.close_context();
    }
}

/// Count down, then join the engine start
async fn run_countdown(shared: Arc<Shared>, countdown_from: u32, engine_start: StartHandle) {
    for remaining in (1..=countdown_from).rev() {
        if shared.is_disposed() {
            break;
        }
        shared.transition(
            |state| matches!(state, SessionState::CountingDown(_)),
            SessionState::CountingDown(remaining),
        );
        tokio::select! {
            _ = tokio::time::sleep(shared.config.countdown_tick) => {}
            _ = shared.cancel.notified() => break,
        }
    }

    let outcome = engine_start
        .await
        .unwrap_or_else(|e| Err(SessionError::Internal(format!("Engine start task failed: {}", e))));

    if shared.is_disposed() {
        debug!("Countdown ended by dispose");
        return;
    }
    match outcome {
        Ok(()) => {
            shared.transition(
                |state| matches!(state, SessionState::CountingDown(_)),
                SessionState::Running,
            );
            info!("Session running");
        }
        Err(e) => {
            if e.is_startup_failure() {
                warn!("Session failed to start: {}", e);
            } else {
                error!("Session failed to start: {}", e);
            }
            shared.close_context();
            shared.transition(|_| true, SessionState::Error(e.user_message().to_string()));
        }
    }
}

/// Stop the engine and publish the diagnosis
async fn run_analysis(shared: Arc<Shared>) {
    let outcome = shared.engine.stop().await;
    shared.close_context();
    if shared.is_disposed() {
        return;
    }

    match outcome {
        Ok(result) => {
            shared.snapshot.send_modify(|snap| {
                snap.state = SessionState::Idle;
                snap.diagnosis = Some(result);
            });
            info!("Analysis complete, score {}", result.score);
        }
        Err(e) => {
            error!("Analysis failed: {}", e);
            shared.transition(|_| true, SessionState::Error(e.user_message().to_string()));
        }
    }
}

impl Shared {
    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    fn transition(&self, allowed: impl FnOnce(&SessionState) -> bool, next: SessionState) -> bool {
        self.snapshot.send_if_modified(|snap| {
            if !allowed(&snap.state) || snap.state == next {
                return false;
            }
            debug!("Session {} -> {}", snap.state.short_name(), next.short_name());
            snap.state = next;
            true
        })
    }

    /// Replace the audio context, closing the previous one
    fn fresh_context(&self) -> Arc<AudioContext> {
        let context = Arc::new(AudioContext::new());
        let previous = self.context.lock().unwrap().replace(context.clone());
        if let Some(previous) = previous {
            previous.close();
        }
        context
    }

    fn close_context(&self) {
        let context = self.context.lock().unwrap().take();
        if let Some(context) = context {
            context.close();
        }
    }

    /// Callback publishing readings, at most one per throttle interval
    fn reading_publisher(&self) -> ReadingCallback {
        let snapshot = self.snapshot.clone();
        let throttle = self.config.reading_throttle;
        let last_published: Mutex<Option<Instant>> = Mutex::new(None);

        Arc::new(move |reading: PitchReading| {
            let now = Instant::now();
            let mut last = last_published.lock().unwrap();
            if matches!(*last, Some(previous) if now.duration_since(previous) < throttle) {
                return;
            }
            let published = snapshot.send_if_modified(|snap| {
                if !matches!(snap.state, SessionState::CountingDown(_) | SessionState::Running) {
                    return false;
                }
                snap.reading = Some(reading);
                true
            });
            if published {
                *last = Some(now);
            }
        })
    }
}
