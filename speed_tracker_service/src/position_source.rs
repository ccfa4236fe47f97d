use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use chrono::{DateTime, Utc};
use futures::{stream::BoxStream, StreamExt};
use speed_tracker_lib::PositionSample;
use tokio::sync::broadcast;

/// Where position fixes come from. The tracker subscribes on start and drops the
/// stream on stop, so a source must be able to hand out a fresh stream every time.
pub trait PositionSource: Send + 'static {
    fn subscribe(&mut self) -> BoxStream<'static, PositionSample>;

    /// Called once for every fix of the current subscription the tracker actually processed,
    /// in stream order. Fixes that were yielded but dropped as stale are never acknowledged.
    fn processed(&mut self) {}
}

/// Replays a recorded drive, keeping the recorded spacing between fixes divided by `replay_speed`.
///
/// Playback position survives unsubscribing, so stop/start resumes after the last fix
/// the tracker processed.
pub struct ReplaySource {
    samples: Arc<Vec<PositionSample>>,
    cursor: Arc<AtomicUsize>,
    replay_speed: f64,
}

impl ReplaySource {
    pub fn new(samples: Vec<PositionSample>, replay_speed: f64) -> Self {
        let replay_speed = if replay_speed.is_finite() && replay_speed > 0. {
            replay_speed
        } else {
            tracing::warn!("Invalid replay speed {}, replaying in real time", replay_speed);
            1.
        };

        Self {
            samples: Arc::new(samples),
            cursor: Arc::new(AtomicUsize::new(0)),
            replay_speed,
        }
    }

    pub fn remaining(&self) -> usize {
        self.samples.len().saturating_sub(self.cursor.load(Ordering::SeqCst))
    }
}

impl PositionSource for ReplaySource {
    fn subscribe(&mut self) -> BoxStream<'static, PositionSample> {
        let samples = self.samples.clone();
        let replay_speed = self.replay_speed;
        let start = self.cursor.load(Ordering::SeqCst);

        futures::stream::unfold((start, None::<DateTime<Utc>>), move |(index, previous)| {
            let samples = samples.clone();
            async move {
                let sample = samples.get(index)?.clone();

                if let Some(previous) = previous {
                    let gap = (sample.timestamp - previous).to_std().unwrap_or_default();
                    tokio::time::sleep(gap.div_f64(replay_speed)).await;
                }

                let timestamp = sample.timestamp;
                Some((sample, (index + 1, Some(timestamp))))
            }
        })
        .boxed()
    }

    fn processed(&mut self) {
        let len = self.samples.len();
        let _ = self
            .cursor
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |cursor| (cursor < len).then_some(cursor + 1));
    }
}

/// A live feed. Fixes pushed through [`ChannelSource::sender`] reach whoever is subscribed
/// at that moment and are dropped otherwise.
#[derive(Clone)]
pub struct ChannelSource {
    sender: broadcast::Sender<PositionSample>,
}

impl ChannelSource {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn sender(&self) -> broadcast::Sender<PositionSample> {
        self.sender.clone()
    }
}

impl PositionSource for ChannelSource {
    fn subscribe(&mut self) -> BoxStream<'static, PositionSample> {
        let receiver = self.sender.subscribe();

        futures::stream::unfold(receiver, |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok(sample) => return Some((sample, receiver)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("Position feed lagged, skipped {} fixes", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .boxed()
    }
}
