mod configuration;
mod position_source;
mod recording;
mod subscription;
mod tracker_service;

pub use configuration::*;
pub use position_source::*;
pub use recording::*;
pub use subscription::*;
pub use tracker_service::*;

#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("recording error: {0}")]
    Recording(String),
    #[error("tracker service is no longer running")]
    ServiceStopped,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
