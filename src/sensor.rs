use std::collections::VecDeque;
use std::f64::consts::PI;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::{SleepTrackerError, TrackerResult};

/// Resting accelerometer magnitude in m/s^2
pub const GRAVITY_MS2: f64 = 9.81;

/// Raw 3-axis reading from the motion source
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RawReading {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub timestamp_ms: i64,
}

impl RawReading {
    pub fn new(x: f64, y: f64, z: f64, timestamp_ms: i64) -> Self {
        Self {
            x,
            y,
            z,
            timestamp_ms,
        }
    }

    pub fn magnitude(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

/// Periodic raw reading provider. The sampler owns interval control;
/// implementations only answer one reading per call.
pub trait MotionSource: Send + 'static {
    fn sample(&mut self) -> TrackerResult<RawReading>;
}

/// Synthetic sleeper: near-gravity readings with a slow wobble and
/// periodic restlessness bursts every `burst_every` readings.
pub struct MockMotionSource {
    tick: u64,
    burst_every: u64,
    burst_amplitude: f64,
}

impl MockMotionSource {
    pub fn new() -> Self {
        Self {
            tick: 0,
            burst_every: 20,
            burst_amplitude: 3.0,
        }
    }

    /// Quiet sleeper with no restlessness bursts
    pub fn steady() -> Self {
        Self {
            tick: 0,
            burst_every: 0,
            burst_amplitude: 0.0,
        }
    }

    pub fn with_burst(burst_every: u64, burst_amplitude: f64) -> Self {
        Self {
            tick: 0,
            burst_every,
            burst_amplitude,
        }
    }
}

impl Default for MockMotionSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MotionSource for MockMotionSource {
    fn sample(&mut self) -> TrackerResult<RawReading> {
        let t = self.tick as f64;
        self.tick += 1;

        let wobble = (t * 0.7).sin() * 0.05;
        let burst = if self.burst_every > 0 && self.tick % self.burst_every == 0 {
            self.burst_amplitude
        } else {
            0.0
        };

        Ok(RawReading::new(
            (t * 2.0 * PI * 0.01).sin() * 0.02,
            (t * 2.0 * PI * 0.01).cos() * 0.02,
            GRAVITY_MS2 + wobble + burst,
            Utc::now().timestamp_millis(),
        ))
    }
}

/// Replays a fixed list of readings, then reports the source gone
pub struct ScriptedMotionSource {
    readings: VecDeque<RawReading>,
}

impl ScriptedMotionSource {
    pub fn new(readings: Vec<RawReading>) -> Self {
        Self {
            readings: readings.into(),
        }
    }
}

impl MotionSource for ScriptedMotionSource {
    fn sample(&mut self) -> TrackerResult<RawReading> {
        self.readings.pop_front().ok_or_else(|| {
            SleepTrackerError::SamplerUnavailable("scripted readings exhausted".to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reading_magnitude() {
        let reading = RawReading::new(3.0, 4.0, 0.0, 0);
        assert_eq!(reading.magnitude(), 5.0);
    }

    #[test]
    fn test_mock_source_rests_near_gravity() {
        let mut source = MockMotionSource::steady();
        for _ in 0..50 {
            let reading = source.sample().unwrap();
            assert!((reading.magnitude() - GRAVITY_MS2).abs() < 0.2);
        }
    }

    #[test]
    fn test_scripted_source_exhausts() {
        let mut source = ScriptedMotionSource::new(vec![RawReading::new(0.0, 0.0, GRAVITY_MS2, 0)]);
        assert!(source.sample().is_ok());
        assert!(matches!(
            source.sample(),
            Err(SleepTrackerError::SamplerUnavailable(_))
        ));
    }
}
