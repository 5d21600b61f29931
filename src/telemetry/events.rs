//! Telemetry event types exposed to CLI/HTTP surfaces.

use serde::{Deserialize, Serialize};

use crate::analysis::classifier::HitQuality;

/// Diagnostic error codes surfaced via telemetry metrics.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticError {
    StreamFailure,
    CalibrationSkipped,
    Unknown,
}

/// Metric events covering detection, scoring and capture health.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum MetricEvent {
    Onset {
        trigger_time_ms: f64,
        level: f32,
    },
    Hit {
        note_index: usize,
        quality: HitQuality,
        offset_ms: Option<f64>,
    },
    /// Rolling mean/max of absolute hit offsets
    TimingDrift {
        avg_ms: f64,
        max_ms: f64,
        sample_count: usize,
    },
    FramesDropped {
        dropped: u64,
        total: u64,
    },
    SessionCompleted {
        total_notes: u32,
        total_score: u64,
        accuracy_percentage: f64,
        timestamp_ms: u64,
    },
    Error {
        code: DiagnosticError,
        context: String,
    },
}
