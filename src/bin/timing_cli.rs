use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use bass_timing_trainer::analysis::calibration::estimate_latency;
use bass_timing_trainer::audio::device::select_preferred;
use bass_timing_trainer::audio::{CaptureEngine, SyntheticBackend, SyntheticFeed};
use bass_timing_trainer::engine::{SessionReport, TimingEngine};
use bass_timing_trainer::timing::scorer::score_with;
use bass_timing_trainer::timing::{
    practice_tips, schedule, Difficulty, GameMode, HitRecord, ScheduleConfig, SessionStats,
};
use bass_timing_trainer::{init_logging, AppConfig, ErrorCode};
use clap::{Args, Parser, Subcommand};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;

const POLL_INTERVAL: Duration = Duration::from_millis(5);

#[derive(Parser, Debug)]
#[command(
    name = "timing_cli",
    about = "Bass timing practice: schedules, scoring, calibration and live sessions"
)]
struct Cli {
    /// Configuration file (defaults to assets/timing_config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Debug logging on stderr
    #[arg(long, short, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Clone)]
struct SessionArgs {
    #[arg(long, default_value = "groove")]
    mode: String,
    #[arg(long, default_value_t = 1)]
    difficulty: i64,
    /// Fixed tempo; drawn from the difficulty's range when omitted
    #[arg(long)]
    tempo: Option<u32>,
    #[arg(long)]
    bars: Option<u32>,
    /// Seed for pattern and tempo draws
    #[arg(long)]
    seed: Option<u64>,
}

impl SessionArgs {
    fn schedule_config(&self, config: &AppConfig) -> ScheduleConfig {
        ScheduleConfig::new(
            GameMode::parse_or_default(&self.mode),
            Difficulty::new(self.difficulty),
            self.tempo,
            self.bars.unwrap_or(config.session.default_bars),
        )
    }

    fn rng(&self) -> StdRng {
        self.seed
            .map(StdRng::seed_from_u64)
            .unwrap_or_else(StdRng::from_entropy)
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a schedule and print it as JSON
    Schedule {
        #[command(flatten)]
        session: SessionArgs,
    },
    /// Score a JSON array of hit records
    Score {
        #[arg(long)]
        hits: PathBuf,
        /// Disable streak multipliers
        #[arg(long)]
        no_streak_bonus: bool,
    },
    /// Coaching tips for a JSON session-stats file
    Tips {
        #[arg(long)]
        stats: PathBuf,
    },
    /// Estimate input latency from click and trigger times
    CalibrateLatency {
        #[arg(long, value_delimiter = ',', required = true)]
        reference: Vec<f64>,
        #[arg(long, value_delimiter = ',', required = true)]
        triggers: Vec<f64>,
    },
    /// List input devices
    Devices,
    /// Measure the ambient noise floor and suggest a threshold
    NoiseFloor {
        #[arg(long)]
        duration_ms: Option<u64>,
        #[arg(long)]
        device: Option<usize>,
    },
    /// Play a live session against the input device
    Listen {
        #[command(flatten)]
        session: SessionArgs,
        #[arg(long)]
        device: Option<usize>,
        /// Silence before the first note
        #[arg(long)]
        count_in_ms: Option<f64>,
    },
    /// Score a WAV recording against a generated schedule
    Replay {
        #[arg(long)]
        wav: PathBuf,
        #[command(flatten)]
        session: SessionArgs,
        /// Time of the first note in the recording
        #[arg(long, default_value_t = 0.0)]
        offset_ms: f64,
        /// Pace blocks at the recording's sample rate
        #[arg(long)]
        realtime: bool,
    },
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::from(1)
        }
    }
}

fn run() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let config = AppConfig::load(cli.config.as_deref());

    match cli.command {
        Commands::Schedule { session } => run_schedule(&config, &session),
        Commands::Score {
            hits,
            no_streak_bonus,
        } => run_score(&hits, !no_streak_bonus),
        Commands::Tips { stats } => run_tips(&stats),
        Commands::CalibrateLatency {
            reference,
            triggers,
        } => run_calibrate_latency(&config, &reference, &triggers),
        Commands::Devices => run_devices(&config),
        Commands::NoiseFloor {
            duration_ms,
            device,
        } => run_noise_floor(config, duration_ms, device),
        Commands::Listen {
            session,
            device,
            count_in_ms,
        } => run_listen(config, &session, device, count_in_ms),
        Commands::Replay {
            wav,
            session,
            offset_ms,
            realtime,
        } => run_replay(config, &wav, &session, offset_ms, realtime),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let data = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))
}

fn run_schedule(config: &AppConfig, session: &SessionArgs) -> Result<ExitCode> {
    let generated = schedule::generate(&session.schedule_config(config), &mut session.rng());
    print_json(&generated)?;
    Ok(ExitCode::SUCCESS)
}

#[derive(Serialize)]
struct ScorePayload {
    stats: SessionStats,
    tips: Vec<String>,
}

fn run_score(path: &Path, streak_bonus: bool) -> Result<ExitCode> {
    let hits: Vec<HitRecord> = read_json(path)?;
    let stats = score_with(&hits, streak_bonus);
    let tips = practice_tips(&stats);
    print_json(&ScorePayload { stats, tips })?;
    Ok(ExitCode::SUCCESS)
}

fn run_tips(path: &Path) -> Result<ExitCode> {
    let stats: SessionStats = read_json(path)?;
    for tip in practice_tips(&stats) {
        println!("{tip}");
    }
    Ok(ExitCode::SUCCESS)
}

fn run_calibrate_latency(config: &AppConfig, reference: &[f64], triggers: &[f64]) -> Result<ExitCode> {
    match estimate_latency(reference, triggers, &config.calibration) {
        Ok(result) => {
            print_json(&result)?;
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            eprintln!("{err}");
            Ok(ExitCode::from(2))
        }
    }
}

#[derive(Serialize)]
struct DevicesPayload {
    devices: Vec<bass_timing_trainer::audio::InputDevice>,
    preferred: Option<usize>,
}

fn run_devices(config: &AppConfig) -> Result<ExitCode> {
    let capture = CaptureEngine::with_cpal(config.audio.clone());
    let devices = capture.input_devices().context("enumerating input devices")?;
    let preferred = select_preferred(&devices).map(|device| device.index);
    print_json(&DevicesPayload { devices, preferred })?;
    Ok(ExitCode::SUCCESS)
}

fn run_noise_floor(mut config: AppConfig, duration_ms: Option<u64>, device: Option<usize>) -> Result<ExitCode> {
    if device.is_some() {
        config.audio.input_device = device;
    }
    let duration_ms = duration_ms.unwrap_or(config.calibration.noise_window_ms);
    let engine = TimingEngine::with_cpal(config);
    let result = engine
        .detector()
        .calibrate_threshold(duration_ms)
        .context("measuring noise floor")?;
    print_json(&result)?;
    Ok(ExitCode::SUCCESS)
}

fn run_listen(
    mut config: AppConfig,
    session: &SessionArgs,
    device: Option<usize>,
    count_in_ms: Option<f64>,
) -> Result<ExitCode> {
    if device.is_some() {
        config.audio.input_device = device;
    }
    let count_in_ms = count_in_ms.unwrap_or(config.session.count_in_ms);
    let schedule_config = session.schedule_config(&config);
    let engine = match session.seed {
        Some(seed) => TimingEngine::with_seed(config, Arc::new(bass_timing_trainer::audio::CpalBackend::new()), seed),
        None => TimingEngine::with_cpal(config),
    };

    let mut hits = engine.subscribe_hits();
    let start = engine
        .start_session(&schedule_config, count_in_ms)
        .context("starting session")?;
    eprintln!(
        "{} @ {} bpm, {} notes, first note at {:.0} ms",
        start.schedule.game_mode.display_name(),
        start.schedule.tempo_bpm,
        start.schedule.total_notes(),
        start.start_time_ms
    );
    let latency = engine.capture().latency_info();
    eprintln!(
        "buffer {} @ {} Hz, estimated round trip {:.1} ms",
        latency.buffer_size, latency.sample_rate, latency.estimated_round_trip_ms
    );

    loop {
        let status = engine.poll()?;
        while let Ok(hit) = hits.try_recv() {
            println!("{}", serde_json::to_string(&hit)?);
        }
        if let Some(err) = status.device_error {
            eprintln!("Input device failed (code {}): {}", err.code(), err.message());
            break;
        }
        if status.exhausted {
            break;
        }
        thread::sleep(POLL_INTERVAL);
    }

    let report = engine.finish()?;
    while let Ok(hit) = hits.try_recv() {
        println!("{}", serde_json::to_string(&hit)?);
    }
    print_report(&report)
}

fn run_replay(
    config: AppConfig,
    wav: &Path,
    session: &SessionArgs,
    offset_ms: f64,
    realtime: bool,
) -> Result<ExitCode> {
    let feed = SyntheticFeed::from_wav(wav, config.audio.buffer_size as usize)
        .with_context(|| format!("loading {}", wav.display()))?
        .realtime(realtime);
    if feed.samples.is_empty() {
        bail!("{} contains no audio", wav.display());
    }

    let backend = Arc::new(SyntheticBackend::new(feed));
    let schedule = schedule::generate(&session.schedule_config(&config), &mut session.rng());
    let engine = TimingEngine::new(config, backend.clone());

    engine
        .start_schedule(schedule, offset_ms)
        .context("starting replay session")?;
    while !backend.is_finished() {
        thread::sleep(POLL_INTERVAL);
    }

    let report = engine.finish()?;
    print_report(&report)
}

fn print_report(report: &SessionReport) -> Result<ExitCode> {
    print_json(report)?;
    if report.device_error.is_some() {
        return Ok(ExitCode::from(3));
    }
    Ok(ExitCode::SUCCESS)
}
