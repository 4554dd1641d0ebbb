//! VocaScan - live pitch tracking with remote voice diagnosis
//!
//! A session counts down, tracks the singer's pitch from the microphone while
//! recording the take, then submits the recording for diagnosis.

pub mod audio;
pub mod cli;
pub mod controller;
pub mod diagnosis;
pub mod engine;
pub mod error;
pub mod models;
pub mod pitch;
pub mod settings;

#[cfg(test)]
mod testing;

pub use controller::{ControllerConfig, SessionController};
pub use engine::{EngineConfig, TrackingEngine};
pub use error::SessionError;
