//! YIN fundamental frequency estimation
//!
//! Works on one analysis frame at a time. The estimator gates out silence by
//! RMS, rejects unclear periods as noise and refines the period with
//! parabolic interpolation.

/// Maximum normalized difference accepted as a clear period
const CLARITY_THRESHOLD: f32 = 0.1;

/// Slack above the global minimum when looking for the first dip
const DIP_TOLERANCE: f32 = 0.05;

/// Lowest frequency ever reported
const MIN_FREQUENCY: f32 = 20.0;

/// Estimate the fundamental frequency of `frame`
///
/// Returns `None` for silence (RMS below `amplitude_threshold`), noise, or
/// frames too short to hold a full period.
pub fn detect_pitch(frame: &[f32], sample_rate: u32, amplitude_threshold: f32) -> Option<f32> {
    let half = frame.len() / 2;
    if half < 3 || sample_rate == 0 {
        return None;
    }

    let rms = (frame.iter().map(|s| s * s).sum::<f32>() / frame.len() as f32).sqrt();
    if rms < amplitude_threshold {
        return None;
    }

    let cmnd = normalized_difference(frame, half);

    // First dip close to the global minimum, to avoid octave errors
    let floor = cmnd[1..].iter().copied().fold(f32::INFINITY, f32::min);
    let threshold = floor + DIP_TOLERANCE;
    let mut period = (2..half).find(|&tau| cmnd[tau] < threshold && cmnd[tau] < cmnd[tau - 1])?;

    // Walk down to the bottom of that dip
    while period + 1 < half && cmnd[period + 1] < cmnd[period] {
        period += 1;
    }

    if cmnd[period] > CLARITY_THRESHOLD || period + 1 >= half {
        return None;
    }

    let refined = parabolic_peak(cmnd[period - 1], cmnd[period], cmnd[period + 1]);
    let frequency = sample_rate as f32 / (period as f32 + refined);

    (frequency.is_finite() && frequency > MIN_FREQUENCY).then_some(frequency)
}

/// Cumulative mean normalized difference function for lags `0..half`
fn normalized_difference(frame: &[f32], half: usize) -> Vec<f32> {
    let mut buffer = vec![0.0f32; half];

    for (tau, slot) in buffer.iter_mut().enumerate().skip(1) {
        *slot = (0..half)
            .map(|i| {
                let delta = frame[i] - frame[i + tau];
                delta * delta
            })
            .sum();
    }

    buffer[0] = 1.0;
    let mut running_sum = 0.0;
    for (tau, slot) in buffer.iter_mut().enumerate().skip(1) {
        running_sum += *slot;
        *slot = if running_sum != 0.0 {
            *slot * tau as f32 / running_sum
        } else {
            1.0
        };
    }

    buffer
}

/// Offset of the vertex of the parabola through three points around `y2`
fn parabolic_peak(y1: f32, y2: f32, y3: f32) -> f32 {
    let curvature = y1 - 2.0 * y2 + y3;
    if curvature == 0.0 {
        0.0
    } else {
        (y1 - y3) / (2.0 * curvature)
    }
}
