// Bass Timing Trainer Core - Rust timing-practice engine
// Low-latency capture, onset detection and hit scoring against a rhythm schedule

// Module declarations
pub mod analysis;
pub mod audio;
pub mod config;
pub mod engine;
pub mod error;
#[cfg(feature = "http_api")]
pub mod http;
pub mod telemetry;
pub mod timing;

// Re-exports for convenience
pub use analysis::{CalibrationState, HitQuality, OnsetDetector, OnsetEvent};
pub use audio::{AudioFrame, CaptureEngine};
pub use config::AppConfig;
pub use engine::{SessionReport, TimingEngine};
pub use error::{AudioError, CalibrationError, ErrorCode, SessionError};
pub use timing::{Difficulty, GameMode, HitRecord, Schedule, ScheduleConfig, SessionStats};

use tracing::Level;

/// Install the fmt subscriber. Safe to call more than once.
///
/// Also bridges `log` records from the error helpers.
pub fn init_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let installed = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok();
    if installed {
        tracing::debug!(?level, "logging initialized");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_logging_is_idempotent() {
        init_logging(false);
        init_logging(true);
    }
}
