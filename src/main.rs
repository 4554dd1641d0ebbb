//! VocaScan - live pitch tracking with remote voice diagnosis
//!
//! Terminal front end: counts down, prints the tracked note while you sing,
//! and prints the diagnosis once the take is stopped.

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::info;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use vocascan::audio::{Microphone, PipeWireMicrophone, WavFileMicrophone, WavSessionRecorder};
use vocascan::cli::{self, Args};
use vocascan::diagnosis::HttpDiagnosisClient;
use vocascan::models::{SessionSnapshot, SessionState};
use vocascan::pitch::YinPitchDetector;
use vocascan::{settings, SessionController, TrackingEngine};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    cli::init_logging(&args);

    info!("Starting VocaScan");

    let settings_path = match &args.settings {
        Some(path) => path.clone(),
        None => settings::default_path().context("No config directory available")?,
    };
    let mut settings = settings::load(&settings_path)?;
    args.apply_overrides(&mut settings);
    if args.write_settings {
        settings::save(&settings, &settings_path)?;
    }

    let microphone: Arc<dyn Microphone> = match &args.input {
        Some(path) => Arc::new(WavFileMicrophone::new(path)),
        None => Arc::new(PipeWireMicrophone::new()),
    };
    let detector = YinPitchDetector::new()
        .with_frame_size(settings.frame_size)
        .with_amplitude_threshold(settings.amplitude_threshold);
    let diagnosis = HttpDiagnosisClient::new(settings.diagnosis_endpoint.clone(), args.identity())?;

    let engine = TrackingEngine::new(
        microphone,
        Arc::new(detector),
        Arc::new(WavSessionRecorder::new()),
        Arc::new(diagnosis),
        settings.engine_config(),
    );
    let controller = SessionController::new(Arc::new(engine), settings.controller_config());

    let mut updates = controller.subscribe();
    let printer = tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            let snapshot = updates.borrow_and_update().clone();
            print_snapshot(&snapshot);
        }
    });

    controller.start().await;
    if let Some(message) = controller.snapshot().error() {
        let message = message.to_string();
        controller.dispose().await;
        printer.abort();
        bail!("{}", message);
    }

    match args.duration {
        Some(secs) => {
            let secs = secs.max(0.0);
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs_f64(secs)) => {}
                _ = tokio::signal::ctrl_c() => {}
            }
        }
        None => {
            tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl+C")?;
        }
    }

    controller.stop().await;
    let outcome = controller.snapshot();
    controller.dispose().await;
    printer.abort();

    println!();
    if let Some(message) = outcome.error() {
        bail!("{}", message);
    }
    if let Some(result) = outcome.diagnosis {
        println!("Score:     {}", result.score);
        println!("Pitch:     {:.1} Hz", result.pitch);
        println!("Stability: {:.0}%", result.stability * 100.0);
    }
    Ok(())
}

fn print_snapshot(snapshot: &SessionSnapshot) {
    match &snapshot.state {
        SessionState::CountingDown(n) => print!("\rStarting in {}...            ", n),
        SessionState::Running => print!(
            "\r{:>4} {:7.1} Hz  {:3.0}%   ",
            snapshot.note(),
            snapshot.pitch(),
            snapshot.confidence() * 100.0
        ),
        SessionState::Analyzing => print!("\rAnalyzing take...             "),
        SessionState::Idle | SessionState::Error(_) => return,
    }
    let _ = std::io::stdout().flush();
}
