use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::channel::{
    ChannelPublisher, ChartSync, ChartUpdate, SamplerCommand, SessionMeta, SyncChannel,
};
use crate::error::{SleepTrackerError, TrackerResult};
use crate::sensor::{MotionSource, RawReading, GRAVITY_MS2};
use crate::series::{MovementSample, MovementSeries};

/// Gain applied to the gravity-relative deviation before clamping.
/// Chosen so a ~1 m/s^2 twitch lands mid-scale on the 0-100 range.
const RESTLESSNESS_GAIN: f64 = 10.0;

/// Sampling interval plus the normalization range for one sampler run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplerConfig {
    pub interval: Duration,
    pub range_lo: i32,
    pub range_hi: i32,
}

impl SamplerConfig {
    pub fn new(interval: Duration, range_lo: i32, range_hi: i32) -> Self {
        Self {
            interval,
            range_lo,
            range_hi,
        }
    }
}

/// Scalar restlessness for one reading, clamped into the run's range
pub fn normalize(reading: &RawReading, range_lo: i32, range_hi: i32) -> f64 {
    let restlessness = (reading.magnitude() - GRAVITY_MS2).abs() * RESTLESSNESS_GAIN;
    restlessness.clamp(range_lo as f64, range_hi as f64)
}

/// Long-lived background sampler. Owns the series for one run; outlives
/// any observer and keeps appending while nobody is attached.
pub struct MotionSampler;

impl MotionSampler {
    /// Probe the source once, then spawn the sampling task with a fresh
    /// series. Restarting with a new config never carries samples over.
    pub fn start(
        mut source: Box<dyn MotionSource>,
        config: SamplerConfig,
        meta: SessionMeta,
    ) -> TrackerResult<SamplerHandle> {
        if config.range_lo > config.range_hi {
            return Err(SleepTrackerError::InvalidThresholds(format!(
                "normalization range out of order: {}..{}",
                config.range_lo, config.range_hi
            )));
        }
        source.sample().map_err(|err| match err {
            unavailable @ SleepTrackerError::SamplerUnavailable(_) => unavailable,
            other => SleepTrackerError::SamplerUnavailable(other.to_string()),
        })?;

        let (channel, publisher, command_rx) = SyncChannel::new();
        let task = tokio::spawn(run_sampler(source, config, meta, publisher, command_rx));
        Ok(SamplerHandle { channel, task })
    }
}

/// Handle to a running sampler task
pub struct SamplerHandle {
    channel: SyncChannel,
    task: JoinHandle<MovementSeries>,
}

impl SamplerHandle {
    pub fn channel(&self) -> &SyncChannel {
        &self.channel
    }

    /// Signal the task and wait until it has fully stopped, returning
    /// the final series. Safe when the task already exited.
    pub async fn stop(self) -> TrackerResult<MovementSeries> {
        self.channel.send_stop().await;
        self.task
            .await
            .map_err(|err| SleepTrackerError::Internal(format!("sampler task failed: {err}")))
    }
}

async fn run_sampler(
    mut source: Box<dyn MotionSource>,
    config: SamplerConfig,
    meta: SessionMeta,
    publisher: ChannelPublisher,
    mut command_rx: mpsc::Receiver<SamplerCommand>,
) -> MovementSeries {
    let mut series = MovementSeries::new();
    let mut ticker = tokio::time::interval(config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            command = command_rx.recv() => match command {
                Some(SamplerCommand::Resync(reply)) => {
                    let _ = reply.send(ChartSync {
                        series: series.clone(),
                        meta,
                    });
                }
                Some(SamplerCommand::Stop) | None => break,
            },
            _ = ticker.tick() => {
                match source.sample() {
                    Ok(reading) => {
                        let sample = MovementSample::new(
                            reading.timestamp_ms,
                            normalize(&reading, config.range_lo, config.range_hi),
                        );
                        series.push(sample);
                        publisher.publish(ChartUpdate {
                            seq: (series.len() - 1) as u64,
                            sample,
                            meta,
                        });
                    }
                    // a failed tick is dropped, never appended as garbage
                    Err(err) => log::warn!("dropping failed sampler tick: {err}"),
                }
            }
        }
    }

    series
}
