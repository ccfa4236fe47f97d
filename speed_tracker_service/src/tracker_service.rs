use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::{stream::BoxStream, StreamExt};
use serde::Serialize;
use speed_tracker_lib::{
    AlertSink, Clock, PositionSample, SampleOutcome, SpeedUnit, SystemClock, TripSession, TripSnapshot,
};
use tokio::{
    sync::{broadcast, mpsc, oneshot, watch},
    time::MissedTickBehavior,
};

use crate::{validate_speed_limit, PositionSource, Subscription, TrackerConfig, TrackerError};

const INBOX_CAPACITY: usize = 256;
const EVENT_CAPACITY: usize = 64;

/// Things observers may want to react to besides the snapshot itself.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TrackerEvent {
    /// The speed-limit warning switched on. Sent once per activation.
    SpeedLimitExceeded {
        speed_kmh: f64,
        limit_kmh: f64,
        timestamp: DateTime<Utc>,
    },
    /// The position source ran dry while tracking.
    FeedEnded,
}

enum Command {
    Start,
    Stop,
    Reset,
    SetSpeedLimit(f64),
    SetSpeedUnit(SpeedUnit),
    Shutdown,
}

enum Message {
    Command {
        command: Command,
        reply: oneshot::Sender<bool>,
    },
    // `epoch` identifies the subscription that produced the message.
    Sample {
        epoch: u64,
        sample: PositionSample,
    },
    Tick {
        epoch: u64,
    },
    FeedEnded {
        epoch: u64,
    },
}

/// Cloneable front of a running tracker. All mutations are serialized through the actor.
#[derive(Clone)]
pub struct TrackerHandle {
    inbox: mpsc::Sender<Message>,
    snapshots: watch::Receiver<TripSnapshot>,
    events: broadcast::Sender<TrackerEvent>,
}

impl TrackerHandle {
    /// Returns false if the tracker was already tracking.
    pub async fn start(&self) -> Result<bool, TrackerError> {
        self.send(Command::Start).await
    }

    /// Returns false if the tracker was not tracking.
    pub async fn stop(&self) -> Result<bool, TrackerError> {
        self.send(Command::Stop).await
    }

    pub async fn reset(&self) -> Result<(), TrackerError> {
        self.send(Command::Reset).await.map(|_| ())
    }

    /// Returns true if the new limit switched the warning on.
    /// A non-positive or non-finite limit is refused and the current one kept.
    pub async fn set_speed_limit(&self, limit_kmh: f64) -> Result<bool, TrackerError> {
        validate_speed_limit(limit_kmh)?;
        self.send(Command::SetSpeedLimit(limit_kmh)).await
    }

    pub async fn set_speed_unit(&self, unit: SpeedUnit) -> Result<(), TrackerError> {
        self.send(Command::SetSpeedUnit(unit)).await.map(|_| ())
    }

    /// Stops the actor. Any tracking is stopped first so the final snapshot is frozen.
    pub async fn shutdown(&self) -> Result<(), TrackerError> {
        self.send(Command::Shutdown).await.map(|_| ())
    }

    pub fn snapshot(&self) -> TripSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe_snapshots(&self) -> watch::Receiver<TripSnapshot> {
        self.snapshots.clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<TrackerEvent> {
        self.events.subscribe()
    }

    async fn send(&self, command: Command) -> Result<bool, TrackerError> {
        let (reply, response) = oneshot::channel();
        self.inbox
            .send(Message::Command { command, reply })
            .await
            .map_err(|_| TrackerError::ServiceStopped)?;
        response.await.map_err(|_| TrackerError::ServiceStopped)
    }
}

/// Forwards warning activations onto the event channel.
struct EventAlertSink {
    events: broadcast::Sender<TrackerEvent>,
}

impl AlertSink for EventAlertSink {
    fn speed_limit_exceeded(&mut self, speed_kmh: f64, limit_kmh: f64, at: DateTime<Utc>) {
        // No receivers is fine, the alert is fire-and-forget
        let _ = self.events.send(TrackerEvent::SpeedLimitExceeded {
            speed_kmh,
            limit_kmh,
            timestamp: at,
        });
    }
}

pub struct TrackerService;

impl TrackerService {
    pub fn spawn(config: &TrackerConfig, source: impl PositionSource) -> TrackerHandle {
        Self::spawn_with_clock(config, source, SystemClock)
    }

    /// Spawns the actor owning the trip session on the current tokio runtime.
    pub fn spawn_with_clock<C>(config: &TrackerConfig, source: impl PositionSource, clock: C) -> TrackerHandle
    where
        C: Clock + Send + 'static,
    {
        let (inbox, messages) = mpsc::channel(INBOX_CAPACITY);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let mut session = TripSession::with_clock(clock).with_alert_sink(EventAlertSink { events: events.clone() });
        session.set_speed_limit_kmh(config.speed_limit_kmh);
        session.set_speed_unit(config.speed_unit);

        let (snapshot_tx, snapshots) = watch::channel(session.snapshot());

        let actor = TrackerActor {
            session,
            source: Box::new(source),
            inbox: inbox.downgrade(),
            epoch: 0,
            position_feed: Subscription::new(),
            ticker: Subscription::new(),
            tick_interval: config.tick_interval,
            snapshots: snapshot_tx,
            events: events.clone(),
        };

        tokio::spawn(actor.run(messages));
        tracing::info!("Tracker service started");

        TrackerHandle {
            inbox,
            snapshots,
            events,
        }
    }
}

struct TrackerActor<C: Clock> {
    session: TripSession<C>,
    source: Box<dyn PositionSource>,
    // Weak so the actor and its feeds do not keep themselves alive once every handle is gone
    inbox: mpsc::WeakSender<Message>,
    epoch: u64,
    position_feed: Subscription,
    ticker: Subscription,
    tick_interval: Duration,
    snapshots: watch::Sender<TripSnapshot>,
    events: broadcast::Sender<TrackerEvent>,
}

impl<C: Clock> TrackerActor<C> {
    async fn run(mut self, mut messages: mpsc::Receiver<Message>) {
        while let Some(message) = messages.recv().await {
            match message {
                Message::Command { command, reply } => {
                    let shutdown = matches!(command, Command::Shutdown);
                    let result = self.handle_command(command);
                    let _ = reply.send(result);
                    if shutdown {
                        break;
                    }
                }
                Message::Sample { epoch, sample } => self.handle_sample(epoch, sample),
                Message::Tick { epoch } => {
                    if self.is_current(epoch) {
                        tracing::trace!("Tick");
                        self.publish();
                    }
                }
                Message::FeedEnded { epoch } => {
                    if self.is_current(epoch) {
                        tracing::info!("Position feed ended");
                        let _ = self.events.send(TrackerEvent::FeedEnded);
                    }
                }
            }
        }

        self.release_subscriptions();
        tracing::info!("Tracker service stopped");
    }

    fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Start => self.start(),
            Command::Stop => self.stop(),
            Command::Reset => {
                self.session.reset();
                self.release_subscriptions();
                self.publish();
                true
            }
            Command::SetSpeedLimit(limit_kmh) => {
                let raised = self.session.set_speed_limit_kmh(limit_kmh);
                self.publish();
                raised
            }
            Command::SetSpeedUnit(unit) => {
                self.session.set_speed_unit(unit);
                self.publish();
                true
            }
            Command::Shutdown => {
                self.stop();
                true
            }
        }
    }

    fn start(&mut self) -> bool {
        if !self.session.start() {
            return false;
        }

        // Anything still in the inbox from an earlier subscription is now stale
        self.epoch += 1;
        let epoch = self.epoch;

        let stream = self.source.subscribe();
        self.position_feed
            .replace(tokio::spawn(forward_positions(stream, self.inbox.clone(), epoch)));
        self.ticker
            .replace(tokio::spawn(tick(self.tick_interval, self.inbox.clone(), epoch)));

        self.publish();
        true
    }

    fn stop(&mut self) -> bool {
        if !self.session.stop() {
            return false;
        }
        self.release_subscriptions();
        self.publish();
        true
    }

    fn release_subscriptions(&mut self) {
        self.epoch += 1;
        self.position_feed.cancel();
        self.ticker.cancel();
    }

    fn is_current(&self, epoch: u64) -> bool {
        epoch == self.epoch && self.session.is_tracking()
    }

    fn handle_sample(&mut self, epoch: u64, sample: PositionSample) {
        if !self.is_current(epoch) {
            tracing::debug!("Dropped late sample from {}", sample.timestamp);
            return;
        }

        self.source.processed();
        if let SampleOutcome::Accepted { .. } = self.session.on_sample(&sample) {
            self.publish();
        }
    }

    fn publish(&self) {
        self.snapshots.send_replace(self.session.snapshot());
    }
}

async fn forward_positions(
    mut stream: BoxStream<'static, PositionSample>,
    inbox: mpsc::WeakSender<Message>,
    epoch: u64,
) {
    while let Some(sample) = stream.next().await {
        let Some(inbox) = inbox.upgrade() else {
            return;
        };
        if inbox.send(Message::Sample { epoch, sample }).await.is_err() {
            return;
        }
    }

    if let Some(inbox) = inbox.upgrade() {
        let _ = inbox.send(Message::FeedEnded { epoch }).await;
    }
}

async fn tick(period: Duration, inbox: mpsc::WeakSender<Message>, epoch: u64) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick completes immediately
    interval.tick().await;

    loop {
        interval.tick().await;
        let Some(inbox) = inbox.upgrade() else {
            return;
        };
        if inbox.send(Message::Tick { epoch }).await.is_err() {
            return;
        }
    }
}
