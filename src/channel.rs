use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::error::{SleepTrackerError, TrackerResult};
use crate::series::{MovementSample, MovementSeries};

/// Updates buffered per observer before it is considered lagged
const UPDATE_CHANNEL_CAPACITY: usize = 512;

/// Session metadata broadcast with every tick and every resync
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMeta {
    pub calibration_level: i32,
    pub use_alarm: bool,
    pub force_screen_on: bool,
    pub alarm_window_minutes: i32,
}

/// One incremental chart update. `seq` is the sample's index in the
/// series, so a resynced observer can discard updates its snapshot
/// already covers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChartUpdate {
    pub seq: u64,
    pub sample: MovementSample,
    pub meta: SessionMeta,
}

/// Full-state handoff for a newly or re-attached observer
#[derive(Debug, Clone)]
pub struct ChartSync {
    pub series: MovementSeries,
    pub meta: SessionMeta,
}

pub(crate) enum SamplerCommand {
    Resync(oneshot::Sender<ChartSync>),
    Stop,
}

/// Publishing half, owned by the sampler task alone. Dropping it lets
/// every subscribed receiver drain buffered updates and then end, which
/// is how observers learn the sampler is gone.
pub(crate) struct ChannelPublisher {
    updates: broadcast::Sender<ChartUpdate>,
}

impl ChannelPublisher {
    pub(crate) fn publish(&self, update: ChartUpdate) {
        // send only fails with zero subscribers, which is fine
        let _ = self.updates.send(update);
    }
}

/// Observer side of the broadcast boundary. Zero subscribers is valid:
/// updates are dropped, never queued for absent observers, since the
/// authoritative series lives in the sampler task.
pub struct SyncChannel {
    updates: broadcast::Receiver<ChartUpdate>,
    commands: mpsc::Sender<SamplerCommand>,
}

impl Clone for SyncChannel {
    fn clone(&self) -> Self {
        Self {
            updates: self.updates.resubscribe(),
            commands: self.commands.clone(),
        }
    }
}

impl SyncChannel {
    pub(crate) fn new() -> (Self, ChannelPublisher, mpsc::Receiver<SamplerCommand>) {
        let (updates_tx, updates_rx) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        let (commands, command_rx) = mpsc::channel(8);
        (
            Self {
                updates: updates_rx,
                commands,
            },
            ChannelPublisher {
                updates: updates_tx,
            },
            command_rx,
        )
    }

    /// New receiver starting at the stream tail
    pub fn subscribe(&self) -> broadcast::Receiver<ChartUpdate> {
        self.updates.resubscribe()
    }

    /// Request the entire current series plus metadata from the sampler
    pub async fn resync(&self) -> TrackerResult<ChartSync> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(SamplerCommand::Resync(reply))
            .await
            .map_err(|_| SleepTrackerError::InvalidState("sampler is not running".to_string()))?;
        response.await.map_err(|_| {
            SleepTrackerError::InvalidState("sampler stopped before resync reply".to_string())
        })
    }

    /// Subscribe first, then resync, so no update between the two is
    /// lost. The snapshot plus `seq`-filtered updates reconstruct the
    /// exact series a continuously attached observer would hold.
    pub async fn attach(&self) -> TrackerResult<(broadcast::Receiver<ChartUpdate>, ChartSync)> {
        let updates = self.subscribe();
        let sync = self.resync().await?;
        Ok((updates, sync))
    }

    pub(crate) async fn send_stop(&self) {
        let _ = self.commands.send(SamplerCommand::Stop).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_without_observers_is_dropped() {
        let (channel, publisher, _command_rx) = SyncChannel::new();
        publisher.publish(ChartUpdate {
            seq: 0,
            sample: MovementSample::new(0, 1.0),
            meta: SessionMeta::default(),
        });

        // a later subscriber starts at the tail, nothing was queued
        let mut rx = channel.subscribe();
        publisher.publish(ChartUpdate {
            seq: 1,
            sample: MovementSample::new(1_000, 2.0),
            meta: SessionMeta::default(),
        });
        assert_eq!(rx.recv().await.unwrap().seq, 1);
    }

    #[tokio::test]
    async fn test_updates_arrive_in_publish_order() {
        let (channel, publisher, _command_rx) = SyncChannel::new();
        let mut rx = channel.subscribe();

        for seq in 0..5u64 {
            publisher.publish(ChartUpdate {
                seq,
                sample: MovementSample::new(seq as i64 * 1_000, seq as f64),
                meta: SessionMeta::default(),
            });
        }

        for expected in 0..5u64 {
            let update = rx.recv().await.unwrap();
            assert_eq!(update.seq, expected);
        }
    }

    #[tokio::test]
    async fn test_subscribers_end_after_publisher_drops() {
        let (channel, publisher, _command_rx) = SyncChannel::new();
        let mut rx = channel.subscribe();

        publisher.publish(ChartUpdate {
            seq: 0,
            sample: MovementSample::new(0, 1.0),
            meta: SessionMeta::default(),
        });
        drop(publisher);

        // buffered updates still drain before the stream closes
        assert_eq!(rx.recv().await.unwrap().seq, 0);
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_resync_fails_once_sampler_is_gone() {
        let (channel, _publisher, command_rx) = SyncChannel::new();
        drop(command_rx);
        assert!(matches!(
            channel.resync().await,
            Err(SleepTrackerError::InvalidState(_))
        ));
    }
}
