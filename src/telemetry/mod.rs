//! Telemetry collector and helpers.
//!
//! The collector multiplexes onset, hit, drift, dropped-frame and session
//! events into a bounded history plus async broadcast stream.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use once_cell::sync::Lazy;
use tokio::sync::broadcast;

use crate::analysis::onset::OnsetEvent;
use crate::timing::scorer::SessionStats;
use crate::timing::session::HitRecord;

pub mod events;

pub use events::{DiagnosticError, MetricEvent};

/// Global telemetry hub shared across the crate.
static HUB: Lazy<TelemetryHub> = Lazy::new(TelemetryHub::default);

/// Access the global telemetry hub.
pub fn hub() -> &'static TelemetryHub {
    &HUB
}

/// Snapshot of collector state for HTTP/CLI reporting.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TelemetrySnapshot {
    pub recent: Vec<MetricEvent>,
    pub total_events: u64,
    pub dropped_events: u64,
}

/// Broadcast-based collector retaining a bounded history of metrics.
pub struct TelemetryCollector {
    tx: broadcast::Sender<MetricEvent>,
    history: Mutex<VecDeque<MetricEvent>>,
    history_capacity: usize,
    total_events: AtomicU64,
    dropped_history: AtomicU64,
}

impl TelemetryCollector {
    pub fn new(buffer: usize, history_capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer.max(1));
        Self {
            tx,
            history: Mutex::new(VecDeque::with_capacity(history_capacity)),
            history_capacity: history_capacity.max(1),
            total_events: AtomicU64::new(0),
            dropped_history: AtomicU64::new(0),
        }
    }

    pub fn publish(&self, event: MetricEvent) {
        self.total_events.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut history) = self.history.lock() {
            if history.len() == self.history_capacity {
                history.pop_front();
                self.dropped_history.fetch_add(1, Ordering::Relaxed);
            }
            history.push_back(event.clone());
        }

        // No subscribers is fine.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MetricEvent> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        let recent = self
            .history
            .lock()
            .map(|history| history.iter().cloned().collect())
            .unwrap_or_default();
        TelemetrySnapshot {
            recent,
            total_events: self.total_events.load(Ordering::Relaxed),
            dropped_events: self.dropped_history.load(Ordering::Relaxed),
        }
    }
}

impl Default for TelemetryCollector {
    fn default() -> Self {
        Self::new(256, 64)
    }
}

/// Rolling window over absolute hit offsets.
struct DriftTracker {
    samples: VecDeque<f64>,
    max_samples: usize,
}

impl DriftTracker {
    fn new(max_samples: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(max_samples),
            max_samples: max_samples.max(1),
        }
    }

    fn observe(&mut self, value: f64) -> (f64, f64, usize) {
        if self.samples.len() == self.max_samples {
            self.samples.pop_front();
        }
        self.samples.push_back(value.abs());

        let count = self.samples.len();
        let sum: f64 = self.samples.iter().sum();
        let max = self.samples.iter().copied().fold(0.0_f64, f64::max);
        (sum / count as f64, max, count)
    }
}

/// Top-level hub wrapping collector state plus derived gauges.
pub struct TelemetryHub {
    collector: TelemetryCollector,
    drift: Mutex<DriftTracker>,
}

impl TelemetryHub {
    pub fn new(channel_capacity: usize, history_capacity: usize, drift_window: usize) -> Self {
        Self {
            collector: TelemetryCollector::new(channel_capacity, history_capacity),
            drift: Mutex::new(DriftTracker::new(drift_window)),
        }
    }

    pub fn collector(&self) -> &TelemetryCollector {
        &self.collector
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MetricEvent> {
        self.collector.subscribe()
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        self.collector.snapshot()
    }

    pub fn record_onset(&self, onset: &OnsetEvent) {
        self.collector.publish(MetricEvent::Onset {
            trigger_time_ms: onset.trigger_time_ms,
            level: onset.level,
        });
    }

    /// Publish a resolved hit; timed hits also update the drift gauge.
    pub fn record_hit(&self, hit: &HitRecord) {
        self.collector.publish(MetricEvent::Hit {
            note_index: hit.note_index,
            quality: hit.quality,
            offset_ms: hit.offset_ms,
        });

        let Some(offset) = hit.offset_ms else {
            return;
        };
        let drift = self.drift.lock().map(|mut tracker| tracker.observe(offset));
        if let Ok((avg_ms, max_ms, sample_count)) = drift {
            self.collector.publish(MetricEvent::TimingDrift {
                avg_ms,
                max_ms,
                sample_count,
            });
        }
    }

    pub fn record_dropped_frames(&self, dropped: u64, total: u64) {
        self.collector
            .publish(MetricEvent::FramesDropped { dropped, total });
    }

    pub fn record_session(&self, stats: &SessionStats) {
        self.collector.publish(MetricEvent::SessionCompleted {
            total_notes: stats.total_notes,
            total_score: stats.total_score,
            accuracy_percentage: stats.accuracy_percentage,
            timestamp_ms: now_timestamp_ms(),
        });
    }

    pub fn record_error(&self, code: DiagnosticError, context: impl Into<String>) {
        self.collector.publish(MetricEvent::Error {
            code,
            context: context.into(),
        });
    }
}

impl Default for TelemetryHub {
    fn default() -> Self {
        Self::new(256, 64, 32)
    }
}

fn now_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::classifier::HitQuality;

    fn hit(index: usize, offset_ms: Option<f64>, quality: HitQuality) -> HitRecord {
        HitRecord {
            note_index: index,
            expected_time_ms: index as f64 * 500.0,
            actual_time_ms: offset_ms.map(|o| index as f64 * 500.0 + o),
            offset_ms,
            quality,
            base_score: quality.base_score(),
        }
    }

    #[test]
    fn collector_preserves_order_within_history() {
        let collector = TelemetryCollector::new(8, 3);
        collector.publish(MetricEvent::FramesDropped { dropped: 1, total: 1 });
        collector.publish(MetricEvent::FramesDropped { dropped: 2, total: 3 });
        collector.publish(MetricEvent::Onset {
            trigger_time_ms: 10.0,
            level: 0.2,
        });

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.recent.len(), 3);
        assert!(matches!(
            snapshot.recent[0],
            MetricEvent::FramesDropped { dropped: 1, .. }
        ));
        assert!(matches!(snapshot.recent[2], MetricEvent::Onset { .. }));
    }

    #[test]
    fn collector_drops_history_when_full() {
        let collector = TelemetryCollector::new(8, 2);
        for total in 1..=3 {
            collector.publish(MetricEvent::FramesDropped { dropped: 1, total });
        }

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.recent.len(), 2);
        assert_eq!(snapshot.dropped_events, 1);
        assert!(matches!(
            snapshot.recent[0],
            MetricEvent::FramesDropped { total: 2, .. }
        ));
    }

    #[test]
    fn timed_hits_update_drift() {
        let hub = TelemetryHub::new(8, 16, 4);
        hub.record_hit(&hit(0, Some(-10.0), HitQuality::Perfect));
        hub.record_hit(&hit(1, Some(30.0), HitQuality::Good));
        hub.record_hit(&hit(2, None, HitQuality::Miss));

        let snapshot = hub.snapshot();
        let hits = snapshot
            .recent
            .iter()
            .filter(|event| matches!(event, MetricEvent::Hit { .. }))
            .count();
        assert_eq!(hits, 3);
        let last_drift = snapshot.recent.iter().rev().find_map(|event| match event {
            MetricEvent::TimingDrift {
                avg_ms,
                max_ms,
                sample_count,
            } => Some((*avg_ms, *max_ms, *sample_count)),
            _ => None,
        });
        assert_eq!(last_drift, Some((20.0, 30.0, 2)));
    }

    #[test]
    fn subscribers_receive_events() {
        let hub = TelemetryHub::new(8, 8, 4);
        let mut rx = hub.subscribe();
        hub.record_dropped_frames(4, 10);
        assert_eq!(
            rx.try_recv().unwrap(),
            MetricEvent::FramesDropped { dropped: 4, total: 10 }
        );
    }

    #[test]
    fn events_serialize_tagged() {
        let json = serde_json::to_value(MetricEvent::FramesDropped { dropped: 2, total: 5 }).unwrap();
        assert_eq!(json["type"], "frames_dropped");
        assert_eq!(json["payload"]["total"], 5);
    }
}
