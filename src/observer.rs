use std::time::Duration;

use chrono::Duration as ChronoDuration;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::channel::{ChartUpdate, SessionMeta, SyncChannel};
use crate::error::TrackerResult;
use crate::scheduler::AlarmDecision;
use crate::series::{MovementSample, MovementSeries};

/// Delay before the sleep display dims itself
pub const DIM_SCREEN_AFTER_MS: u64 = 15_000;

/// Observer-side reconstruction of the movement chart. Attach at any
/// point in the session: the resync snapshot plus seq-filtered updates
/// rebuild the same series a continuously attached observer holds.
pub struct ChartView {
    channel: SyncChannel,
    updates: broadcast::Receiver<ChartUpdate>,
    series: MovementSeries,
    meta: SessionMeta,
    next_seq: u64,
}

impl ChartView {
    pub async fn attach(channel: &SyncChannel) -> TrackerResult<Self> {
        let (updates, sync) = channel.attach().await?;
        let next_seq = sync.series.len() as u64;
        Ok(Self {
            channel: channel.clone(),
            updates,
            series: sync.series,
            meta: sync.meta,
            next_seq,
        })
    }

    pub fn series(&self) -> &MovementSeries {
        &self.series
    }

    pub fn meta(&self) -> SessionMeta {
        self.meta
    }

    /// Next chart point. Updates already covered by the snapshot are
    /// skipped; a lagged receiver resyncs instead of replaying backlog.
    /// Returns `None` once the sampler has stopped.
    pub async fn next_update(&mut self) -> TrackerResult<Option<MovementSample>> {
        loop {
            match self.updates.recv().await {
                Ok(update) => {
                    if update.seq < self.next_seq {
                        continue;
                    }
                    self.series.push(update.sample);
                    self.next_seq = update.seq + 1;
                    self.meta = update.meta;
                    return Ok(Some(update.sample));
                }
                Err(RecvError::Lagged(skipped)) => {
                    log::debug!("chart observer lagged {skipped} updates, resyncing");
                    let sync = self.channel.resync().await?;
                    self.next_seq = sync.series.len() as u64;
                    self.series = sync.series;
                    self.meta = sync.meta;
                }
                Err(RecvError::Closed) => return Ok(None),
            }
        }
    }
}

/// Status line for the alarm indicator
pub fn alarm_status_line(decision: &AlarmDecision, window_minutes: i32) -> String {
    match decision {
        AlarmDecision::NoAlarm => "no alarm scheduled".to_string(),
        AlarmDecision::Deferred(fire_time) => {
            let window_start = *fire_time - ChronoDuration::minutes(window_minutes.max(0) as i64);
            format!(
                "waking between {} and {}",
                window_start.format("%H:%M"),
                fire_time.format("%H:%M")
            )
        }
        AlarmDecision::FireNow => "waking now".to_string(),
    }
}

/// Cancellable delayed dim notification. Cancellation must happen
/// before the delay elapses if the display loses focus; losing that
/// race is tolerated since the dim transition is best-effort.
pub struct DimScreenTimer {
    task: JoinHandle<()>,
}

impl DimScreenTimer {
    pub fn start<F>(delay: Duration, on_dim: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            on_dim();
        });
        Self { task }
    }

    pub fn cancel(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChartSync;
    use crate::scheduler::AlarmDecision;
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tokio::sync::mpsc;

    use crate::channel::SamplerCommand;

    /// Minimal stand-in for the sampler task: answers resyncs with the
    /// given series and otherwise leaves the channel open.
    fn spawn_resync_responder(
        series: MovementSeries,
        meta: SessionMeta,
        mut command_rx: mpsc::Receiver<SamplerCommand>,
    ) {
        tokio::spawn(async move {
            while let Some(command) = command_rx.recv().await {
                if let SamplerCommand::Resync(reply) = command {
                    let _ = reply.send(ChartSync {
                        series: series.clone(),
                        meta,
                    });
                }
            }
        });
    }

    #[tokio::test]
    async fn test_view_skips_updates_covered_by_snapshot() {
        let (channel, publisher, command_rx) = SyncChannel::new();
        let snapshot = MovementSeries::from(vec![
            MovementSample::new(1_000, 10.0),
            MovementSample::new(2_000, 20.0),
        ]);
        spawn_resync_responder(snapshot.clone(), SessionMeta::default(), command_rx);

        let mut view = ChartView::attach(&channel).await.unwrap();
        assert_eq!(view.series().len(), 2);

        // replays of the snapshot's samples arrive alongside fresh ones
        publisher.publish(ChartUpdate {
            seq: 1,
            sample: MovementSample::new(2_000, 20.0),
            meta: SessionMeta::default(),
        });
        publisher.publish(ChartUpdate {
            seq: 2,
            sample: MovementSample::new(3_000, 30.0),
            meta: SessionMeta::default(),
        });

        let sample = view.next_update().await.unwrap().unwrap();
        assert_eq!(sample.timestamp_ms, 3_000);
        assert_eq!(view.series().len(), 3);
    }

    #[tokio::test]
    async fn test_view_ends_when_sampler_is_gone() {
        let (channel, publisher, command_rx) = SyncChannel::new();
        spawn_resync_responder(MovementSeries::new(), SessionMeta::default(), command_rx);

        let mut view = ChartView::attach(&channel).await.unwrap();
        drop(publisher);
        assert!(view.next_update().await.unwrap().is_none());
    }

    #[test]
    fn test_alarm_status_lines() {
        let fire_time = Utc.with_ymd_and_hms(2026, 8, 6, 6, 50, 0).unwrap();
        assert_eq!(
            alarm_status_line(&AlarmDecision::NoAlarm, 30),
            "no alarm scheduled"
        );
        assert_eq!(
            alarm_status_line(&AlarmDecision::Deferred(fire_time), 30),
            "waking between 06:20 and 06:50"
        );
        assert_eq!(alarm_status_line(&AlarmDecision::FireNow, 30), "waking now");
    }

    #[tokio::test(start_paused = true)]
    async fn test_dim_timer_fires_after_delay() {
        let dimmed = Arc::new(AtomicBool::new(false));
        let flag = dimmed.clone();
        let timer = DimScreenTimer::start(Duration::from_millis(DIM_SCREEN_AFTER_MS), move || {
            flag.store(true, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(DIM_SCREEN_AFTER_MS + 100)).await;
        assert!(dimmed.load(Ordering::SeqCst));
        assert!(timer.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dim_timer_cancel_prevents_fire() {
        let dimmed = Arc::new(AtomicBool::new(false));
        let flag = dimmed.clone();
        let timer = DimScreenTimer::start(Duration::from_millis(DIM_SCREEN_AFTER_MS), move || {
            flag.store(true, Ordering::SeqCst);
        });

        timer.cancel();
        tokio::time::sleep(Duration::from_millis(DIM_SCREEN_AFTER_MS + 100)).await;
        assert!(!dimmed.load(Ordering::SeqCst));
    }
}
