use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bass_timing_trainer::analysis::HitQuality;
use bass_timing_trainer::audio::{SyntheticBackend, SyntheticFeed, SyntheticSignal};
use bass_timing_trainer::telemetry::{self, MetricEvent};
use bass_timing_trainer::timing::schedule;
use bass_timing_trainer::{AppConfig, Difficulty, GameMode, ScheduleConfig, SessionReport, TimingEngine};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::broadcast::error::TryRecvError;

const SAMPLE_RATE: u32 = 48_000;
const FIRST_NOTE_MS: f64 = 100.0;

fn quarter_grid(bars: u32) -> bass_timing_trainer::Schedule {
    let config = ScheduleConfig::new(GameMode::Precision, Difficulty::new(1), Some(120), bars);
    schedule::generate(&config, &mut StdRng::seed_from_u64(0))
}

fn pluck_times(count: usize, shift_ms: f64) -> Vec<f64> {
    (0..count)
        .map(|slot| FIRST_NOTE_MS + shift_ms + slot as f64 * 500.0)
        .collect()
}

fn play(config: AppConfig, feed: SyntheticFeed, bars: u32) -> SessionReport {
    let backend = Arc::new(SyntheticBackend::new(feed));
    let engine = TimingEngine::new(config, backend.clone());
    engine
        .start_schedule(quarter_grid(bars), FIRST_NOTE_MS)
        .expect("session starts");

    let deadline = Instant::now() + Duration::from_secs(10);
    while !backend.is_finished() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(2));
    }
    assert!(backend.is_finished(), "synthetic feed did not finish");
    engine.finish().expect("session finishes")
}

fn temp_wav(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("{name}-{}.wav", std::process::id()))
}

#[test]
fn wav_recording_replays_through_the_pipeline() {
    let feed = SyntheticSignal::silence(2500.0, SAMPLE_RATE)
        .with_noise(0.002, 21)
        .with_plucks(&pluck_times(4, 0.0), 0.6, 10.0)
        .into_feed(256);

    let path = temp_wav("pipeline-replay");
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&path, spec).expect("create wav");
    for sample in feed.samples.iter() {
        writer
            .write_sample((sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
            .expect("write sample");
    }
    writer.finalize().expect("finalize wav");

    let replayed = SyntheticFeed::from_wav(&path, 256).expect("read wav");
    let _ = std::fs::remove_file(&path);
    assert_eq!(replayed.sample_rate, SAMPLE_RATE);

    let report = play(AppConfig::default(), replayed, 1);
    assert_eq!(report.total_notes, 4);
    assert_eq!(report.stats.perfect_hits, 4);
    assert_eq!(report.stats.accuracy_percentage, 100.0);
    assert_eq!(report.stray_onsets, 0);
}

#[test]
fn latency_offset_moves_onsets_back_onto_the_grid() {
    let feed = SyntheticSignal::silence(4500.0, SAMPLE_RATE)
        .with_plucks(&pluck_times(8, 40.0), 0.5, 10.0)
        .into_feed(256);
    let mut config = AppConfig::default();
    config.detection.latency_offset_ms = 40.0;

    let report = play(config, feed, 2);
    assert_eq!(report.stats.perfect_hits, 8);
    let offsets: Vec<f64> = report.hits.iter().filter_map(|hit| hit.offset_ms).collect();
    assert_eq!(offsets.len(), 8);
    assert!(offsets.iter().all(|offset| offset.abs() < 6.0), "offsets {offsets:?}");
}

#[test]
fn notes_below_threshold_are_missed() {
    let feed = SyntheticSignal::silence(2500.0, SAMPLE_RATE)
        .with_plucks(&pluck_times(4, 0.0), 0.5, 10.0)
        .into_feed(256);
    let mut config = AppConfig::default();
    config.detection.threshold = 0.9;

    let report = play(config, feed, 1);
    assert_eq!(report.stats.missed_notes, 4);
    assert_eq!(report.stats.total_score, 0);
    assert!(report.hits.iter().all(|hit| hit.quality == HitQuality::Miss));
    assert_eq!(report.stats.accuracy_percentage, 0.0);
}

#[test]
fn completed_sessions_reach_telemetry() {
    let mut events = telemetry::hub().subscribe();
    let feed = SyntheticSignal::silence(2500.0, SAMPLE_RATE)
        .with_plucks(&pluck_times(2, 0.0), 0.5, 10.0)
        .into_feed(256);

    let report = play(AppConfig::default(), feed, 1);
    assert_eq!(report.stats.perfect_hits, 2);

    let mut saw_hit = false;
    let mut saw_completion = false;
    loop {
        match events.try_recv() {
            Ok(MetricEvent::Hit { .. }) => saw_hit = true,
            Ok(MetricEvent::SessionCompleted { total_notes: 4, .. }) => saw_completion = true,
            Ok(_) | Err(TryRecvError::Lagged(_)) => {}
            Err(_) => break,
        }
    }
    assert!(saw_hit);
    assert!(saw_completion);
}
