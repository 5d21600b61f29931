//! In-memory session store behind the start/complete request contract.
//!
//! A client asks for a session, plays it, then posts back the hit times it
//! observed. The store keeps each started session's schedule until it is
//! completed or evicted, scores the submission and tracks high scores.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::modes::{catalogue, Difficulty, GameMode, ModeInfo};
use super::schedule::{self, Schedule, ScheduleConfig};
use super::scorer::{practice_tips, recommend_difficulty, SessionStats};
use super::session::{HitSubmission, SessionSettings, TimingSession};
use crate::config::SessionConfig;
use crate::error::{log_session_error, SessionError};

/// Entries returned by [`SessionStore::leaderboard`].
pub const LEADERBOARD_SIZE: usize = 10;

/// Completed sessions kept for [`SessionStore::history`].
pub const HISTORY_CAPACITY: usize = 200;

fn default_mode() -> String {
    GameMode::Groove.key().to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartRequest {
    #[serde(default = "default_mode")]
    pub game_mode: String,
    #[serde(default)]
    pub difficulty: Difficulty,
    #[serde(default)]
    pub tempo: Option<u32>,
    #[serde(default)]
    pub duration_bars: Option<u32>,
}

impl Default for StartRequest {
    fn default() -> Self {
        Self {
            game_mode: default_mode(),
            difficulty: Difficulty::default(),
            tempo: None,
            duration_bars: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartResponse {
    pub session_id: String,
    pub game_mode: GameMode,
    pub mode_name: String,
    pub mode_description: String,
    pub difficulty: Difficulty,
    pub difficulty_name: String,
    pub tempo: u32,
    pub perfect_window_ms: f64,
    pub good_window_ms: f64,
    pub total_notes: usize,
    pub duration_ms: f64,
    pub beat_times: Vec<f64>,
}

impl StartResponse {
    fn new(session_id: String, schedule: &Schedule) -> Self {
        Self {
            session_id,
            game_mode: schedule.game_mode,
            mode_name: schedule.game_mode.display_name().to_string(),
            mode_description: schedule.game_mode.description().to_string(),
            difficulty: schedule.difficulty,
            difficulty_name: schedule.difficulty.profile().name.to_string(),
            tempo: schedule.tempo_bpm,
            perfect_window_ms: schedule.perfect_window_ms,
            good_window_ms: schedule.good_window_ms,
            total_notes: schedule.total_notes(),
            duration_ms: schedule.duration_ms,
            beat_times: schedule.expected_times(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompleteRequest {
    pub session_id: String,
    #[serde(default)]
    pub duration_seconds: u64,
    #[serde(default)]
    pub hits: Vec<HitSubmission>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompleteResponse {
    pub session_id: String,
    pub stats: SessionStats,
    pub tips: Vec<String>,
    pub is_new_high_score: bool,
    pub high_score: u64,
    pub previous_high_score: Option<u64>,
    pub recommended_difficulty: Difficulty,
}

/// Best result for one (mode, tempo, difficulty) combination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HighScoreEntry {
    pub game_mode: GameMode,
    pub tempo: u32,
    pub difficulty: Difficulty,
    pub high_score: u64,
    pub best_accuracy: f64,
    pub best_streak: u32,
    pub achieved_at_ms: u64,
}

/// Outcome of offering a score to the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HighScoreUpdate {
    pub is_new_high_score: bool,
    pub high_score: u64,
    pub previous_high_score: Option<u64>,
}

#[derive(Debug, Default)]
pub struct HighScoreTable {
    entries: HashMap<(GameMode, u32, Difficulty), HighScoreEntry>,
}

impl HighScoreTable {
    /// Record `stats` for a combination. The first score for a combination
    /// is always a new high score; later ones must beat it strictly.
    pub fn submit(
        &mut self,
        game_mode: GameMode,
        tempo: u32,
        difficulty: Difficulty,
        stats: &SessionStats,
    ) -> HighScoreUpdate {
        let candidate = HighScoreEntry {
            game_mode,
            tempo,
            difficulty,
            high_score: stats.total_score,
            best_accuracy: stats.accuracy_percentage,
            best_streak: stats.best_streak,
            achieved_at_ms: now_timestamp_ms(),
        };

        match self.entries.get_mut(&(game_mode, tempo, difficulty)) {
            Some(entry) => {
                let previous = entry.high_score;
                let improved = stats.total_score > previous;
                if improved {
                    *entry = candidate;
                }
                HighScoreUpdate {
                    is_new_high_score: improved,
                    high_score: entry.high_score,
                    previous_high_score: Some(previous),
                }
            }
            None => {
                self.entries
                    .insert((game_mode, tempo, difficulty), candidate);
                HighScoreUpdate {
                    is_new_high_score: true,
                    high_score: stats.total_score,
                    previous_high_score: None,
                }
            }
        }
    }

    /// Highest scores first, optionally for one mode.
    pub fn leaderboard(&self, game_mode: Option<GameMode>, limit: usize) -> Vec<HighScoreEntry> {
        let mut entries: Vec<_> = self
            .entries
            .values()
            .filter(|entry| game_mode.map_or(true, |mode| entry.game_mode == mode))
            .cloned()
            .collect();
        entries.sort_by(|a, b| {
            b.high_score
                .cmp(&a.high_score)
                .then(a.achieved_at_ms.cmp(&b.achieved_at_ms))
        });
        entries.truncate(limit);
        entries
    }

    /// Best score per mode.
    pub fn best_by_mode(&self) -> HashMap<GameMode, HighScoreEntry> {
        let mut best: HashMap<GameMode, HighScoreEntry> = HashMap::new();
        for entry in self.entries.values() {
            let replace = best
                .get(&entry.game_mode)
                .map_or(true, |current| entry.high_score > current.high_score);
            if replace {
                best.insert(entry.game_mode, entry.clone());
            }
        }
        best
    }
}

/// Summary of one completed session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub game_mode: GameMode,
    pub tempo: u32,
    pub difficulty: Difficulty,
    pub score: u64,
    pub accuracy: f64,
    pub perfect_percentage: f64,
    pub total_notes: u32,
    pub duration_seconds: u64,
    pub completed_at_ms: u64,
}

struct StoreState {
    sessions: VecDeque<(String, Schedule)>,
    high_scores: HighScoreTable,
    history: VecDeque<SessionSummary>,
    rng: StdRng,
}

/// Bounded store of started sessions, oldest evicted first.
pub struct SessionStore {
    state: Mutex<StoreState>,
    config: SessionConfig,
}

impl SessionStore {
    pub fn new(config: SessionConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Store with a fixed seed, for reproducible schedules and ids.
    pub fn with_seed(config: SessionConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: SessionConfig, rng: StdRng) -> Self {
        Self {
            state: Mutex::new(StoreState {
                sessions: VecDeque::new(),
                high_scores: HighScoreTable::default(),
                history: VecDeque::new(),
                rng,
            }),
            config,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreState>, SessionError> {
        self.state.lock().map_err(|_| SessionError::StatePoisoned)
    }

    /// Generate and remember a schedule.
    pub fn start(&self, request: &StartRequest) -> Result<StartResponse, SessionError> {
        let config = ScheduleConfig::new(
            GameMode::parse_or_default(&request.game_mode),
            request.difficulty,
            request.tempo,
            request.duration_bars.unwrap_or(self.config.default_bars),
        );

        let mut state = self.lock()?;
        let generated = schedule::generate(&config, &mut state.rng);
        let session_id = format!("{:032x}", state.rng.gen::<u128>());
        let response = StartResponse::new(session_id.clone(), &generated);

        state.sessions.push_back((session_id, generated));
        let capacity = self.config.store_capacity.max(1);
        while state.sessions.len() > capacity {
            if let Some((evicted, _)) = state.sessions.pop_front() {
                tracing::debug!(session_id = %evicted, "evicted oldest session");
            }
        }

        tracing::info!(
            session_id = %response.session_id,
            mode = %response.game_mode,
            tempo = response.tempo,
            notes = response.total_notes,
            "session started"
        );
        Ok(response)
    }

    /// Score a submission and forget the session.
    pub fn complete(&self, request: &CompleteRequest) -> Result<CompleteResponse, SessionError> {
        let mut state = self.lock()?;
        let Some(position) = state
            .sessions
            .iter()
            .position(|(id, _)| *id == request.session_id)
        else {
            let err = SessionError::NotFound {
                session_id: request.session_id.clone(),
            };
            log_session_error(&err, "complete");
            return Err(err);
        };
        let Some((session_id, schedule)) = state.sessions.remove(position) else {
            return Err(SessionError::NotFound {
                session_id: request.session_id.clone(),
            });
        };

        let (game_mode, tempo, difficulty) = (schedule.game_mode, schedule.tempo_bpm, schedule.difficulty);
        let mut session = TimingSession::from_schedule(schedule, SessionSettings::from(&self.config));
        session.begin(0.0)?;
        session.apply_submissions(&request.hits)?;
        let stats = session.complete()?;

        let update = state.high_scores.submit(game_mode, tempo, difficulty, &stats);
        state.history.push_front(SessionSummary {
            session_id: session_id.clone(),
            game_mode,
            tempo,
            difficulty,
            score: stats.total_score,
            accuracy: stats.accuracy_percentage,
            perfect_percentage: stats.perfect_percentage,
            total_notes: stats.total_notes,
            duration_seconds: request.duration_seconds,
            completed_at_ms: now_timestamp_ms(),
        });
        state.history.truncate(HISTORY_CAPACITY);

        Ok(CompleteResponse {
            session_id,
            tips: practice_tips(&stats),
            recommended_difficulty: recommend_difficulty(stats.accuracy_percentage, difficulty),
            is_new_high_score: update.is_new_high_score,
            high_score: update.high_score,
            previous_high_score: update.previous_high_score,
            stats,
        })
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.lock()
            .map(|state| state.sessions.iter().any(|(id, _)| id == session_id))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.lock().map(|state| state.sessions.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn modes(&self) -> Vec<ModeInfo> {
        catalogue()
    }

    pub fn leaderboard(&self, game_mode: Option<GameMode>) -> Result<Vec<HighScoreEntry>, SessionError> {
        Ok(self.lock()?.high_scores.leaderboard(game_mode, LEADERBOARD_SIZE))
    }

    pub fn best_by_mode(&self) -> Result<HashMap<GameMode, HighScoreEntry>, SessionError> {
        Ok(self.lock()?.high_scores.best_by_mode())
    }

    /// Most recent completed sessions first.
    pub fn history(&self, limit: usize, game_mode: Option<GameMode>) -> Result<Vec<SessionSummary>, SessionError> {
        Ok(self
            .lock()?
            .history
            .iter()
            .filter(|summary| game_mode.map_or(true, |mode| summary.game_mode == mode))
            .take(limit)
            .cloned()
            .collect())
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(SessionConfig::default())
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

    fn store() -> SessionStore {
        SessionStore::with_seed(SessionConfig::default(), 7)
    }

    fn precision_request(bars: u32) -> StartRequest {
        StartRequest {
            game_mode: "precision".to_string(),
            difficulty: Difficulty::new(3),
            tempo: Some(120),
            duration_bars: Some(bars),
        }
    }

    fn all_on_time(start: &StartResponse) -> Vec<HitSubmission> {
        start
            .beat_times
            .iter()
            .enumerate()
            .map(|(note_index, &time)| HitSubmission {
                note_index,
                hit_time_ms: Some(time),
            })
            .collect()
    }

    #[test]
    fn start_returns_schedule_metadata() {
        let store = store();
        let response = store.start(&precision_request(2)).unwrap();
        assert_eq!(response.game_mode, GameMode::Precision);
        assert_eq!(response.mode_name, "Precision Strike");
        assert_eq!(response.difficulty_name, "Medium");
        assert_eq!(response.perfect_window_ms, 45.0);
        assert_eq!(response.good_window_ms, 90.0);
        assert_eq!(response.total_notes, 8);
        assert_eq!(response.beat_times[..3], [0.0, 500.0, 1000.0]);
        assert_eq!(response.session_id.len(), 32);
        assert!(store.contains(&response.session_id));
    }

    #[test]
    fn unknown_mode_and_missing_bars_fall_back() {
        let store = store();
        let response = store
            .start(&StartRequest {
                game_mode: "polka".to_string(),
                ..StartRequest::default()
            })
            .unwrap();
        assert_eq!(response.game_mode, GameMode::Groove);
        assert!((60..=90).contains(&response.tempo));
        assert!(response.total_notes >= 8);
    }

    #[test]
    fn complete_scores_and_removes_session() {
        let store = store();
        let start = store.start(&precision_request(2)).unwrap();
        let response = store
            .complete(&CompleteRequest {
                session_id: start.session_id.clone(),
                duration_seconds: 4,
                hits: all_on_time(&start),
            })
            .unwrap();

        assert_eq!(response.stats.perfect_hits, 8);
        assert_eq!(response.stats.accuracy_percentage, 100.0);
        assert!(response.is_new_high_score);
        assert_eq!(response.previous_high_score, None);
        assert_eq!(response.high_score, response.stats.total_score);
        assert_eq!(response.recommended_difficulty, Difficulty::new(4));
        assert!(!store.contains(&start.session_id));

        let again = store.complete(&CompleteRequest {
            session_id: start.session_id,
            ..CompleteRequest::default()
        });
        assert!(matches!(again, Err(SessionError::NotFound { .. })));
    }

    #[test]
    fn missing_and_duplicate_submissions() {
        let store = store();
        let start = store.start(&precision_request(1)).unwrap();
        let hits = vec![
            HitSubmission { note_index: 0, hit_time_ms: Some(0.0) },
            HitSubmission { note_index: 0, hit_time_ms: Some(300.0) },
            HitSubmission { note_index: 2, hit_time_ms: Some(1070.0) },
            HitSubmission { note_index: 99, hit_time_ms: Some(5.0) },
        ];
        let response = store
            .complete(&CompleteRequest {
                session_id: start.session_id,
                duration_seconds: 2,
                hits,
            })
            .unwrap();
        assert_eq!(response.stats.total_notes, 4);
        assert_eq!(response.stats.perfect_hits, 1);
        assert_eq!(response.stats.good_hits, 1);
        assert_eq!(response.stats.missed_notes, 2);
    }

    #[test]
    fn high_score_must_strictly_improve() {
        let store = store();
        let first = store.start(&precision_request(1)).unwrap();
        let best = store
            .complete(&CompleteRequest {
                hits: all_on_time(&first),
                session_id: first.session_id,
                duration_seconds: 2,
            })
            .unwrap();

        let second = store.start(&precision_request(1)).unwrap();
        let worse = store
            .complete(&CompleteRequest {
                session_id: second.session_id,
                ..CompleteRequest::default()
            })
            .unwrap();
        assert!(!worse.is_new_high_score);
        assert_eq!(worse.high_score, best.stats.total_score);
        assert_eq!(worse.previous_high_score, Some(best.stats.total_score));

        let board = store.leaderboard(Some(GameMode::Precision)).unwrap();
        assert_eq!(board.len(), 1);
        assert_eq!(board[0].high_score, best.stats.total_score);
        assert!(store.leaderboard(Some(GameMode::Groove)).unwrap().is_empty());

        let history = store.history(10, None).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].score, 0);
    }

    #[test]
    fn oldest_sessions_are_evicted() {
        let config = SessionConfig {
            store_capacity: 3,
            ..SessionConfig::default()
        };
        let store = SessionStore::with_seed(config, 1);
        let ids: Vec<_> = (0..5)
            .map(|_| store.start(&precision_request(1)).unwrap().session_id)
            .collect();
        assert_eq!(store.len(), 3);
        assert!(!store.contains(&ids[0]));
        assert!(!store.contains(&ids[1]));
        assert!(store.contains(&ids[4]));
    }

    #[test]
    fn start_request_defaults_from_json() {
        let request: StartRequest = serde_json::from_str(r#"{"difficulty": 9}"#).unwrap();
        assert_eq!(request.game_mode, "groove");
        assert_eq!(request.difficulty, Difficulty::MAX);
        assert_eq!(request.tempo, None);
    }
}
