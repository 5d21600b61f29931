// Analysis module - onset detection, calibration and hit classification
//
// Pipeline: CaptureEngine frames → OnsetDetector → TimingSession, where each
// onset is matched to a scheduled slot and classified against the
// difficulty's hit windows.

pub mod calibration;
pub mod classifier;
pub mod onset;

pub use calibration::{LatencyCalibration, ThresholdCalibration};
pub use classifier::{classify, HitOutcome, HitQuality, HitWindows};
pub use onset::{CalibrationState, DetectorStatistics, OnsetDetector, OnsetEvent};
