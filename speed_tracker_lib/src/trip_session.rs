use chrono::{DateTime, TimeDelta, Utc};
use geo_types::Point;
use serde::{Deserialize, Serialize};

use crate::{
    alert::{AlertSink, NoAlert},
    clock::{Clock, SystemClock},
    position_sample::PositionSample,
    sample_filter::{distance_km, filter_sample, FilterOutcome},
    snapshot::TripSnapshot,
    speed_unit::SpeedUnit,
};

pub const DEFAULT_SPEED_LIMIT_KMH: f64 = 80.;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackingState {
    #[default]
    Idle,
    Tracking,
    Stopped,
}

/// The latest accepted fix. Overwritten on every accepted sample.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LiveReading {
    pub current_speed_kmh: f64,
    pub altitude_m: f64,
    pub heading_deg: f64,
    pub last_position: Option<Point>,
}

/// What `on_sample` did with a fix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SampleOutcome {
    /// The session was not tracking. Nothing changed.
    Ignored,
    /// Implausible speed. Nothing changed.
    Rejected { speed_kmh: f64 },
    Accepted {
        speed_kmh: f64,
        meaningful: bool,
        distance_km: f64,
        /// The speed-limit warning switched on with this sample.
        warning_raised: bool,
    },
}

/// Accumulates trip statistics from a stream of position fixes.
///
/// The session owns its statistics exclusively; consumers only ever get a [`TripSnapshot`].
/// Duration is always derived from the start/stop timestamps and the clock, never counted.
pub struct TripSession<C: Clock = SystemClock> {
    state: TrackingState,

    max_speed_kmh: f64,
    total_distance_km: f64,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    speed_samples: Vec<f64>,

    live: LiveReading,
    warning_active: bool,

    speed_limit_kmh: f64,
    speed_unit: SpeedUnit,

    alert_sink: Box<dyn AlertSink + Send>,
    clock: C,
}

impl TripSession<SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl Default for TripSession<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> TripSession<C> {
    pub fn with_clock(clock: C) -> Self {
        Self {
            state: TrackingState::Idle,
            max_speed_kmh: 0.,
            total_distance_km: 0.,
            start_time: None,
            end_time: None,
            speed_samples: Vec::new(),
            live: LiveReading::default(),
            warning_active: false,
            speed_limit_kmh: DEFAULT_SPEED_LIMIT_KMH,
            speed_unit: SpeedUnit::default(),
            alert_sink: Box::new(NoAlert),
            clock,
        }
    }

    pub fn with_alert_sink(mut self, sink: impl AlertSink + Send + 'static) -> Self {
        self.set_alert_sink(sink);
        self
    }

    pub fn set_alert_sink(&mut self, sink: impl AlertSink + Send + 'static) {
        self.alert_sink = Box::new(sink);
    }

    /// Begins accepting samples. Returns false if already tracking.
    pub fn start(&mut self) -> bool {
        if self.state == TrackingState::Tracking {
            tracing::debug!("start ignored, already tracking");
            return false;
        }

        let now = self.clock.now();
        self.state = TrackingState::Tracking;
        self.start_time = Some(now);
        self.end_time = None;
        // Never bridge distance across a pause
        self.live.last_position = None;

        tracing::info!("Tracking started at {}", now);
        true
    }

    /// Stops accepting samples and freezes the duration. Statistics are kept.
    /// Returns false if not tracking.
    pub fn stop(&mut self) -> bool {
        if self.state != TrackingState::Tracking {
            tracing::debug!("stop ignored, not tracking");
            return false;
        }

        let now = self.clock.now();
        self.state = TrackingState::Stopped;
        self.end_time = Some(now);
        self.live.current_speed_kmh = 0.;
        self.warning_active = false;

        tracing::info!(
            "Tracking stopped at {}: {:.3} km, max {:.1} km/h, avg {:.1} km/h",
            now,
            self.total_distance_km,
            self.max_speed_kmh,
            self.average_speed_kmh()
        );
        true
    }

    /// Discards all statistics and returns to idle, stopping first if needed.
    pub fn reset(&mut self) {
        self.stop();

        self.state = TrackingState::Idle;
        self.max_speed_kmh = 0.;
        self.total_distance_km = 0.;
        self.start_time = None;
        self.end_time = None;
        self.speed_samples.clear();
        self.live = LiveReading::default();
        self.warning_active = false;

        tracing::info!("Trip reset");
    }

    pub fn on_sample(&mut self, sample: &PositionSample) -> SampleOutcome {
        if self.state != TrackingState::Tracking {
            return SampleOutcome::Ignored;
        }

        let (speed_kmh, meaningful) = match filter_sample(sample) {
            FilterOutcome::Rejected { speed_kmh } => {
                tracing::warn!("Rejected implausible speed {:.1} km/h at {}", speed_kmh, sample.timestamp);
                return SampleOutcome::Rejected { speed_kmh };
            }
            FilterOutcome::Accepted { speed_kmh, meaningful } => (speed_kmh, meaningful),
        };

        self.max_speed_kmh = self.max_speed_kmh.max(speed_kmh);

        let position = sample.position();
        let mut distance = 0.;
        if meaningful {
            self.speed_samples.push(speed_kmh);

            if let Some(previous) = self.live.last_position {
                distance = distance_km(previous, position);
                self.total_distance_km += distance;
            }
        }

        self.live = LiveReading {
            current_speed_kmh: speed_kmh,
            altitude_m: sample.altitude_m,
            heading_deg: sample.heading_deg,
            last_position: Some(position),
        };

        let warning_raised = self.evaluate_warning();

        tracing::debug!(
            "Accepted {:.1} km/h (meaningful: {}), +{:.4} km",
            speed_kmh,
            meaningful,
            distance
        );

        SampleOutcome::Accepted {
            speed_kmh,
            meaningful,
            distance_km: distance,
            warning_raised,
        }
    }

    /// Returns true if the new limit turned the warning on.
    pub fn set_speed_limit_kmh(&mut self, limit_kmh: f64) -> bool {
        self.speed_limit_kmh = limit_kmh;
        tracing::info!("Speed limit set to {:.1} km/h", limit_kmh);

        if self.state != TrackingState::Tracking {
            return false;
        }
        self.evaluate_warning()
    }

    pub fn set_speed_unit(&mut self, unit: SpeedUnit) {
        self.speed_unit = unit;
    }

    /// Recomputes the warning from the current speed, alerting on the off -> on edge.
    fn evaluate_warning(&mut self) -> bool {
        let active = self.live.current_speed_kmh > self.speed_limit_kmh;
        let raised = active && !self.warning_active;
        self.warning_active = active;

        if raised {
            tracing::info!(
                "Speed limit exceeded: {:.1} > {:.1} km/h",
                self.live.current_speed_kmh,
                self.speed_limit_kmh
            );
            let now = self.clock.now();
            self.alert_sink
                .speed_limit_exceeded(self.live.current_speed_kmh, self.speed_limit_kmh, now);
        }

        raised
    }

    pub fn state(&self) -> TrackingState {
        self.state
    }

    pub fn is_tracking(&self) -> bool {
        self.state == TrackingState::Tracking
    }

    pub fn max_speed_kmh(&self) -> f64 {
        self.max_speed_kmh
    }

    pub fn total_distance_km(&self) -> f64 {
        self.total_distance_km
    }

    pub fn speed_samples(&self) -> &[f64] {
        &self.speed_samples
    }

    pub fn average_speed_kmh(&self) -> f64 {
        if self.speed_samples.is_empty() {
            return 0.;
        }
        self.speed_samples.iter().sum::<f64>() / self.speed_samples.len() as f64
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.start_time
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }

    /// Elapsed time since start, up to now while tracking or frozen at the stop time.
    pub fn duration(&self) -> TimeDelta {
        let Some(start) = self.start_time else {
            return TimeDelta::zero();
        };
        let end = self.end_time.unwrap_or_else(|| self.clock.now());
        (end - start).max(TimeDelta::zero())
    }

    pub fn live(&self) -> &LiveReading {
        &self.live
    }

    pub fn warning_active(&self) -> bool {
        self.warning_active
    }

    pub fn speed_limit_kmh(&self) -> f64 {
        self.speed_limit_kmh
    }

    pub fn speed_unit(&self) -> SpeedUnit {
        self.speed_unit
    }

    pub fn snapshot(&self) -> TripSnapshot {
        TripSnapshot {
            state: self.state,
            is_tracking: self.is_tracking(),
            current_speed_kmh: self.live.current_speed_kmh,
            altitude_m: self.live.altitude_m,
            heading_deg: self.live.heading_deg,
            max_speed_kmh: self.max_speed_kmh,
            average_speed_kmh: self.average_speed_kmh(),
            total_distance_km: self.total_distance_km,
            duration: self.duration(),
            start_time: self.start_time,
            end_time: self.end_time,
            sample_count: self.speed_samples.len(),
            speed_limit_kmh: self.speed_limit_kmh,
            warning_active: self.warning_active,
            speed_unit: self.speed_unit,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use super::*;
    use crate::clock::ManualClock;

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_747_915_754, 0).unwrap()
    }

    fn session() -> (TripSession<ManualClock>, ManualClock) {
        let clock = ManualClock::new(t0());
        (TripSession::with_clock(clock.clone()), clock)
    }

    fn fix(lat: f64, lon: f64, speed_mps: f64) -> PositionSample {
        PositionSample::new(lat, lon, speed_mps, t0())
    }

    fn counting_sink() -> (impl AlertSink + Send + 'static, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let sink_count = count.clone();
        let sink = move |_speed: f64, _limit: f64, _at: DateTime<Utc>| {
            sink_count.fetch_add(1, Ordering::SeqCst);
        };
        (sink, count)
    }

    #[test]
    fn starts_at_rest() {
        let (session, _) = session();
        assert_eq!(session.state(), TrackingState::Idle);
        assert_eq!(session.max_speed_kmh(), 0.);
        assert_eq!(session.total_distance_km(), 0.);
        assert_eq!(session.average_speed_kmh(), 0.);
        assert_eq!(session.duration(), TimeDelta::zero());
        assert!(session.start_time().is_none());
        assert!(session.end_time().is_none());
        assert_eq!(session.speed_limit_kmh(), DEFAULT_SPEED_LIMIT_KMH);
    }

    #[test]
    fn samples_ignored_unless_tracking() {
        let (mut session, _) = session();
        assert_eq!(session.on_sample(&fix(56.0, 10.0, 10.)), SampleOutcome::Ignored);
        assert_eq!(session.max_speed_kmh(), 0.);

        session.start();
        session.stop();
        assert_eq!(session.on_sample(&fix(56.0, 10.0, 10.)), SampleOutcome::Ignored);
        assert!(session.speed_samples().is_empty());
    }

    // Scenario A
    #[test]
    fn average_excludes_standstill() {
        let (mut session, clock) = session();
        session.start();

        session.on_sample(&fix(56.0000, 10.0, 5.));
        clock.advance(TimeDelta::seconds(1));
        session.on_sample(&fix(56.0001, 10.0, 10.));
        clock.advance(TimeDelta::seconds(1));
        session.on_sample(&fix(56.0002, 10.0, 0.));

        assert_eq!(session.speed_samples(), &[18., 36.]);
        assert_eq!(session.max_speed_kmh(), 36.);
        assert_eq!(session.average_speed_kmh(), 27.);
        assert_eq!(session.live().current_speed_kmh, 0.);
        assert_eq!(session.duration(), TimeDelta::seconds(2));
    }

    // Scenario B
    #[test]
    fn glitch_is_rejected_without_side_effects() {
        let (mut session, _) = session();
        session.start();
        session.on_sample(&fix(56.0, 10.0, 10.));
        let before = session.live().last_position;

        let outcome = session.on_sample(&fix(57.0, 11.0, 150.));

        assert_eq!(outcome, SampleOutcome::Rejected { speed_kmh: 540. });
        assert_eq!(session.max_speed_kmh(), 36.);
        assert_eq!(session.live().last_position, before);
        assert_eq!(session.live().current_speed_kmh, 36.);
        assert_eq!(session.speed_samples(), &[36.]);
    }

    // Scenario C
    #[test]
    fn warning_toggles_and_alerts_once_per_activation() {
        let (sink, alerts) = counting_sink();
        let (session, _) = session();
        let mut session = session.with_alert_sink(sink);
        session.start();

        let outcome = session.on_sample(&fix(56.0, 10.0, 25.)); // 90 km/h
        assert!(matches!(outcome, SampleOutcome::Accepted { warning_raised: true, .. }));
        assert!(session.warning_active());

        // still above, no new alert
        session.on_sample(&fix(56.001, 10.0, 26.));
        assert!(session.warning_active());
        assert_eq!(alerts.load(Ordering::SeqCst), 1);

        session.on_sample(&fix(56.002, 10.0, 70. / 3.6));
        assert!(!session.warning_active());

        session.on_sample(&fix(56.003, 10.0, 25.));
        assert_eq!(alerts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn alert_is_stamped_with_session_clock() {
        let stamps = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink_stamps = stamps.clone();
        let (session, clock) = session();
        let mut session = session.with_alert_sink(move |_speed: f64, _limit: f64, at: DateTime<Utc>| {
            sink_stamps.lock().unwrap().push(at);
        });
        session.start();
        clock.advance(TimeDelta::seconds(90));

        session.on_sample(&fix(56.0, 10.0, 25.));

        assert_eq!(*stamps.lock().unwrap(), vec![t0() + TimeDelta::seconds(90)]);
    }

    #[test]
    fn warning_clears_on_standstill_sample() {
        let (mut session, _) = session();
        session.start();
        session.on_sample(&fix(56.0, 10.0, 30.));
        assert!(session.warning_active());
        session.on_sample(&fix(56.0, 10.0, -1.));
        assert!(!session.warning_active());
    }

    #[test]
    fn lowering_limit_raises_warning() {
        let (sink, alerts) = counting_sink();
        let (session, _) = session();
        let mut session = session.with_alert_sink(sink);
        session.start();
        session.on_sample(&fix(56.0, 10.0, 20.)); // 72 km/h
        assert!(!session.warning_active());

        assert!(session.set_speed_limit_kmh(50.));
        assert!(session.warning_active());
        assert_eq!(alerts.load(Ordering::SeqCst), 1);

        assert!(!session.set_speed_limit_kmh(100.));
        assert!(!session.warning_active());
    }

    // Scenario D
    #[test]
    fn stop_freezes_duration_and_reset_clears_it() {
        let (mut session, clock) = session();
        session.start();
        session.on_sample(&fix(56.0, 10.0, 10.));
        clock.advance(TimeDelta::seconds(30));

        assert!(session.stop());
        assert!(!session.is_tracking());
        assert_eq!(session.live().current_speed_kmh, 0.);

        clock.advance(TimeDelta::seconds(100));
        assert_eq!(session.duration(), TimeDelta::seconds(30));
        assert_eq!(session.max_speed_kmh(), 36.);

        session.reset();
        assert!(!session.is_tracking());
        assert_eq!(session.duration(), TimeDelta::zero());
    }

    #[test]
    fn reset_returns_to_rest_from_any_state() {
        let (mut session, clock) = session();

        session.reset();
        assert_eq!(session.state(), TrackingState::Idle);

        for stop_first in [false, true] {
            session.start();
            session.on_sample(&fix(56.0, 10.0, 10.));
            session.on_sample(&fix(56.01, 10.0, 12.));
            clock.advance(TimeDelta::seconds(5));
            if stop_first {
                session.stop();
            }

            session.reset();

            assert_eq!(session.state(), TrackingState::Idle);
            assert_eq!(session.max_speed_kmh(), 0.);
            assert_eq!(session.total_distance_km(), 0.);
            assert!(session.start_time().is_none());
            assert!(session.end_time().is_none());
            assert!(session.speed_samples().is_empty());
            assert_eq!(session.live(), &LiveReading::default());
            assert!(!session.warning_active());
        }
    }

    #[test]
    fn redundant_transitions_are_no_ops() {
        let (mut session, clock) = session();
        assert!(!session.stop());
        assert_eq!(session.state(), TrackingState::Idle);
        assert!(session.end_time().is_none());

        assert!(session.start());
        clock.advance(TimeDelta::seconds(3));
        assert!(!session.start());
        assert_eq!(session.start_time(), Some(t0()));
        assert!(session.stop());
        assert!(!session.stop());
        assert_eq!(session.end_time(), Some(t0() + TimeDelta::seconds(3)));
    }

    #[test]
    fn first_sample_contributes_no_distance() {
        let (mut session, _) = session();
        session.start();

        let outcome = session.on_sample(&fix(56.0, 10.0, 30.));
        assert!(matches!(outcome, SampleOutcome::Accepted { distance_km: d, .. } if d == 0.));
        assert_eq!(session.total_distance_km(), 0.);
    }

    #[test]
    fn distance_accumulates_between_meaningful_samples() {
        let (mut session, _) = session();
        session.start();

        session.on_sample(&fix(56.0, 10.0, 10.));
        session.on_sample(&fix(56.01, 10.0, 10.));
        session.on_sample(&fix(56.02, 10.0, 10.));

        let expected = distance_km(Point::new(10.0, 56.0), Point::new(10.0, 56.01))
            + distance_km(Point::new(10.0, 56.01), Point::new(10.0, 56.02));
        assert!((session.total_distance_km() - expected).abs() < 1e-9);
        assert!((session.total_distance_km() - 2.224).abs() < 0.01);
    }

    #[test]
    fn standstill_sample_moves_position_without_distance() {
        let (mut session, _) = session();
        session.start();

        session.on_sample(&fix(56.0, 10.0, 10.));
        // Drift while "stopped" must not count
        session.on_sample(&fix(56.5, 10.0, 0.1));
        assert_eq!(session.total_distance_km(), 0.);

        session.on_sample(&fix(56.51, 10.0, 10.));
        let expected = distance_km(Point::new(10.0, 56.5), Point::new(10.0, 56.51));
        assert!((session.total_distance_km() - expected).abs() < 1e-9);
    }

    #[test]
    fn exactly_one_kmh_is_still_standstill() {
        let (mut session, _) = session();
        session.start();

        session.on_sample(&fix(56.0, 10.0, 10.));
        let outcome = session.on_sample(&fix(56.01, 10.0, 1. / 3.6));

        assert_eq!(
            outcome,
            SampleOutcome::Accepted { speed_kmh: 1., meaningful: false, distance_km: 0., warning_raised: false }
        );
        assert_eq!(session.total_distance_km(), 0.);
        assert_eq!(session.speed_samples(), &[36.]);
        assert_eq!(session.live().current_speed_kmh, 1.);
    }

    #[test]
    fn rejected_sample_keeps_previous_position_for_distance() {
        let (mut session, _) = session();
        session.start();

        session.on_sample(&fix(56.0, 10.0, 10.));
        session.on_sample(&fix(10.0, 10.0, 500.));
        session.on_sample(&fix(56.01, 10.0, 10.));

        let expected = distance_km(Point::new(10.0, 56.0), Point::new(10.0, 56.01));
        assert!((session.total_distance_km() - expected).abs() < 1e-9);
    }

    #[test]
    fn restart_after_stop_does_not_bridge_gap() {
        let (mut session, _) = session();
        session.start();
        session.on_sample(&fix(56.0, 10.0, 10.));
        session.on_sample(&fix(56.01, 10.0, 10.));
        session.stop();
        let before = session.total_distance_km();

        session.start();
        assert!(session.end_time().is_none());
        session.on_sample(&fix(57.0, 10.0, 10.));
        assert_eq!(session.total_distance_km(), before);
        assert_eq!(session.speed_samples().len(), 3);
    }

    #[test]
    fn max_tracks_every_accepted_sample() {
        let (mut session, _) = session();
        session.start();

        // Sub-threshold speeds still count towards the max
        session.on_sample(&fix(56.0, 10.0, 0.2));
        assert_eq!(session.max_speed_kmh(), 0.2 * 3.6);
        assert!(session.speed_samples().is_empty());

        let mut previous_max = session.max_speed_kmh();
        let mut highest = previous_max;
        for (i, speed) in [3., 12., 7., 0., 30., 29.9, 111.1, 2.].into_iter().enumerate() {
            session.on_sample(&fix(56.0 + i as f64 * 0.001, 10.0, speed));
            highest = highest.max(speed * 3.6);
            assert!(session.max_speed_kmh() >= previous_max);
            assert_eq!(session.max_speed_kmh(), highest);
            previous_max = session.max_speed_kmh();
        }

        for sample in session.speed_samples() {
            assert!(*sample > 1.);
            assert!(session.max_speed_kmh() >= *sample);
        }
    }

    #[test]
    fn snapshot_reflects_session() {
        let (mut session, clock) = session();
        session.set_speed_unit(SpeedUnit::Mph);
        session.start();
        session.on_sample(&fix(56.0, 10.0, 10.).with_altitude(42.).with_heading(270.));
        clock.advance(TimeDelta::seconds(12));

        let snapshot = session.snapshot();
        assert!(snapshot.is_tracking);
        assert_eq!(snapshot.state, TrackingState::Tracking);
        assert_eq!(snapshot.current_speed_kmh, 36.);
        assert_eq!(snapshot.altitude_m, 42.);
        assert_eq!(snapshot.heading_deg, 270.);
        assert_eq!(snapshot.duration, TimeDelta::seconds(12));
        assert_eq!(snapshot.sample_count, 1);

        let display = snapshot.display_in_configured_unit();
        assert_eq!(display.unit, SpeedUnit::Mph);
        assert_eq!(display.gauge_max, 150.);
        assert!((display.current_speed - 36. * 0.621371).abs() < 1e-9);

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["duration_secs"], 12.0);
        assert_eq!(json["state"], "tracking");
        assert_eq!(json["speed_unit"], "mph");
    }
}
