//! Command-line interface for VocaScan
//!
//! Handles argument parsing, settings overrides and logging configuration.

use crate::models::SessionIdentity;
use crate::settings::Settings;
use clap::Parser;
use log::LevelFilter;
use std::path::PathBuf;

/// VocaScan - live pitch tracking with remote voice diagnosis
#[derive(Parser, Debug)]
#[command(name = "vocascan")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Diagnosis endpoint the finished take is posted to
    #[arg(long, env = "VOCASCAN_ENDPOINT")]
    pub endpoint: Option<String>,

    /// User identifier sent with the diagnosis request
    #[arg(long, env = "VOCASCAN_USER_ID")]
    pub user_id: Option<String>,

    /// Session identifier sent with the diagnosis request
    #[arg(long, env = "VOCASCAN_SESSION_ID")]
    pub session_id: Option<String>,

    /// Replay a WAV file instead of capturing from the microphone
    #[arg(short, long, value_name = "WAV")]
    pub input: Option<PathBuf>,

    /// Stop automatically after this many seconds of tracking
    #[arg(short, long, value_name = "SECS")]
    pub duration: Option<f64>,

    /// Settings file (defaults to the user config directory)
    #[arg(long, value_name = "PATH")]
    pub settings: Option<PathBuf>,

    /// Persist the effective settings, including overrides
    #[arg(long)]
    pub write_settings: bool,

    /// Increase logging verbosity
    /// -v = info, -vv = debug, -vvv = trace, -vvvv = HTTP internals too
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long)]
    pub quiet: bool,
}

impl Args {
    /// Get the log level filter based on verbosity flags
    pub fn log_level(&self) -> LevelFilter {
        if self.quiet {
            LevelFilter::Error
        } else {
            match self.verbose {
                0 => LevelFilter::Warn,
                1 => LevelFilter::Info,
                2 => LevelFilter::Debug,
                _ => LevelFilter::Trace,
            }
        }
    }

    /// Fold command-line overrides into the loaded settings
    pub fn apply_overrides(&self, settings: &mut Settings) {
        if let Some(endpoint) = &self.endpoint {
            settings.diagnosis_endpoint = endpoint.clone();
        }
    }

    pub fn identity(&self) -> SessionIdentity {
        let defaults = SessionIdentity::default();
        SessionIdentity {
            user_id: self.user_id.clone().unwrap_or(defaults.user_id),
            session_id: self.session_id.clone().unwrap_or(defaults.session_id),
        }
    }
}

/// Initialize the logging system based on CLI arguments
pub fn init_logging(args: &Args) {
    let mut builder = env_logger::Builder::new();

    // Dependencies stay at warn unless asked for
    builder.filter_level(LevelFilter::Warn);
    builder.filter_module("vocascan", args.log_level());

    if args.verbose >= 4 {
        builder.filter_module("reqwest", args.log_level());
        builder.filter_module("hyper", args.log_level());
    }

    builder.format_timestamp_millis().init();
}
