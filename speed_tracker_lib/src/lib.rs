pub mod alert;
pub mod clock;
pub mod position_sample;
pub mod sample_filter;
pub mod snapshot;
pub mod speed_unit;
pub mod trip_session;

pub use alert::AlertSink;
pub use clock::{Clock, ManualClock, SystemClock};
pub use position_sample::PositionSample;
pub use snapshot::{DisplayReading, TripSnapshot};
pub use speed_unit::{convert, SpeedUnit};
pub use trip_session::{SampleOutcome, TrackingState, TripSession};
