use chrono::{DateTime, Utc};

/// Receives a notification every time the speed-limit warning turns on.
/// Fire-and-forget: nothing is expected back and failures are the sink's own business.
///
/// `at` is the session clock's time of the activation.
pub trait AlertSink {
    fn speed_limit_exceeded(&mut self, speed_kmh: f64, limit_kmh: f64, at: DateTime<Utc>);
}

#[derive(Debug, Default)]
pub struct NoAlert;

impl AlertSink for NoAlert {
    fn speed_limit_exceeded(&mut self, _speed_kmh: f64, _limit_kmh: f64, _at: DateTime<Utc>) {}
}

impl<F> AlertSink for F
where
    F: FnMut(f64, f64, DateTime<Utc>),
{
    fn speed_limit_exceeded(&mut self, speed_kmh: f64, limit_kmh: f64, at: DateTime<Utc>) {
        self(speed_kmh, limit_kmh, at)
    }
}
