use std::{
    path::Path,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use speed_tracker_lib::{Clock, DisplayReading, ManualClock, PositionSample, SampleOutcome, TripSession, TripSnapshot};

use crate::{TrackerConfig, TrackerError};

/// Reads a recorded drive, one JSON encoded [`PositionSample`] per line.
pub fn read_recording(path: impl AsRef<Path>) -> Result<Vec<PositionSample>, TrackerError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .map_err(|err| TrackerError::Recording(format!("Failed to read recording {:?}: {}", path, err)))?;

    let samples = parse_recording(&text)?;
    tracing::info!("Loaded {} samples from {:?}", samples.len(), path);
    Ok(samples)
}

pub fn parse_recording(text: &str) -> Result<Vec<PositionSample>, TrackerError> {
    let mut samples = Vec::new();

    for (number, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let sample = serde_json::from_str::<PositionSample>(line)
            .map_err(|err| TrackerError::Recording(format!("Line {}: {}", number + 1, err)))?;
        samples.push(sample);
    }

    Ok(samples)
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordingSummary {
    pub snapshot: TripSnapshot,
    pub display: DisplayReading,
    pub samples: usize,
    pub rejected_samples: usize,
    pub speed_limit_alerts: usize,
}

/// Runs a whole recording through a trip session in one go, with time taken from the fixes.
pub fn summarize_recording(samples: &[PositionSample], config: &TrackerConfig) -> RecordingSummary {
    let start = samples.first().map(|sample| sample.timestamp).unwrap_or_else(Utc::now);
    let clock = ManualClock::new(start);

    let alerts = Arc::new(AtomicUsize::new(0));
    let sink_alerts = alerts.clone();
    let mut session = TripSession::with_clock(clock.clone()).with_alert_sink(move |_speed: f64, _limit: f64, _at: DateTime<Utc>| {
        sink_alerts.fetch_add(1, Ordering::Relaxed);
    });
    session.set_speed_limit_kmh(config.speed_limit_kmh);
    session.set_speed_unit(config.speed_unit);

    session.start();
    let mut rejected_samples = 0;
    for sample in samples {
        // Recorded time never runs backwards for the session
        if sample.timestamp > clock.now() {
            clock.set(sample.timestamp);
        }
        if let SampleOutcome::Rejected { .. } = session.on_sample(sample) {
            rejected_samples += 1;
        }
    }
    session.stop();

    let snapshot = session.snapshot();
    RecordingSummary {
        display: snapshot.display_in_configured_unit(),
        snapshot,
        samples: samples.len(),
        rejected_samples,
        speed_limit_alerts: alerts.load(Ordering::Relaxed),
    }
}
