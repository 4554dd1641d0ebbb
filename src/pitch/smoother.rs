//! Streaming pitch smoothing
//!
//! Turns jittery per-tick frequency estimates into a stable pitch, a note name
//! and a confidence score. No I/O, no async.

use crate::models::{PitchReading, NO_NOTE};
use serde::{Deserialize, Serialize};

/// Weight kept from the previous smoothed pitch on every update.
///
/// 0.80 reacts quickly but shivers, 0.90 and above glides and lags behind
/// fast vibrato. 0.85 follows a singing voice closely without visible jitter.
pub const SMOOTHING_RETENTION: f32 = 0.85;

/// Lowest confidence reported for any emitted reading
pub const CONFIDENCE_FLOOR: f32 = 0.3;

/// How sharply confidence falls with the relative pitch jump between ticks
pub const CONFIDENCE_DECAY: f32 = 5.0;

const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Tunable smoothing parameters; the defaults are the constants above
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmoothingParams {
    pub retention: f32,
    pub confidence_floor: f32,
    pub confidence_decay: f32,
}

impl Default for SmoothingParams {
    fn default() -> Self {
        Self {
            retention: SMOOTHING_RETENTION,
            confidence_floor: CONFIDENCE_FLOOR,
            confidence_decay: CONFIDENCE_DECAY,
        }
    }
}

/// Highest retention accepted; at 1.0 the smoothed pitch would never move
const MAX_RETENTION: f32 = 0.99;

impl SmoothingParams {
    /// Clamp into the ranges that keep the pitch positive and confidence in [0, 1]
    ///
    /// Non-finite values fall back to the defaults.
    pub fn sanitized(self) -> Self {
        let defaults = Self::default();
        let finite_or = |value: f32, fallback: f32| if value.is_finite() { value } else { fallback };
        Self {
            retention: finite_or(self.retention, defaults.retention).clamp(0.0, MAX_RETENTION),
            confidence_floor: finite_or(self.confidence_floor, defaults.confidence_floor).clamp(0.0, 1.0),
            confidence_decay: finite_or(self.confidence_decay, defaults.confidence_decay).max(0.0),
        }
    }
}

/// Exponential moving average over raw pitch estimates
#[derive(Debug, Clone, Default)]
pub struct PitchSmoother {
    params: SmoothingParams,
    /// Current smoothed pitch
    smoothed: Option<f32>,
    /// Smoothed pitch emitted on the previous tick, the basis for confidence
    previous: Option<f32>,
}

impl PitchSmoother {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_params(params: SmoothingParams) -> Self {
        Self {
            params: params.sanitized(),
            ..Self::default()
        }
    }

    pub fn params(&self) -> SmoothingParams {
        self.params
    }

    /// Feed one raw sample; returns a reading unless the sample carries no pitch
    pub fn update(&mut self, raw: Option<f32>) -> Option<PitchReading> {
        let raw = raw.filter(|f| f.is_finite() && *f > 0.0)?;

        let retention = self.params.retention;
        let smoothed = match self.smoothed {
            Some(prev) => prev * retention + raw * (1.0 - retention),
            None => raw,
        };
        self.smoothed = Some(smoothed);

        let stability = match self.previous {
            Some(prev) => {
                let delta_ratio = (smoothed - prev).abs() / prev;
                (1.0 - delta_ratio * self.params.confidence_decay).clamp(0.0, 1.0)
            }
            None => 1.0,
        };
        self.previous = Some(smoothed);

        let floor = self.params.confidence_floor;
        let confidence = (floor + stability * (1.0 - floor)).clamp(0.0, 1.0);

        Some(PitchReading {
            pitch: smoothed,
            note: freq_to_note(smoothed),
            confidence,
        })
    }

    /// Forget all history so the next sample is treated as the first
    pub fn reset(&mut self) {
        self.smoothed = None;
        self.previous = None;
    }

    pub fn has_history(&self) -> bool {
        self.smoothed.is_some()
    }
}

/// Map a frequency to its nearest equal-tempered note name, e.g. 440.0 -> "A4"
pub fn freq_to_note(freq: f32) -> String {
    if !freq.is_finite() || freq <= 0.0 {
        return NO_NOTE.to_string();
    }
    let midi = (12.0 * (freq / 440.0).log2() + 69.0).round() as i32;
    let name = NOTE_NAMES[midi.rem_euclid(12) as usize];
    let octave = midi.div_euclid(12) - 1;
    format!("{}{}", name, octave)
}
