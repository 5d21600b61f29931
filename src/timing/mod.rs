// Timing module - schedules, session lifecycle and scoring

pub mod modes;
pub mod patterns;
pub mod schedule;
pub mod scorer;
pub mod session;
pub mod store;

pub use modes::{Difficulty, DifficultyProfile, GameMode};
pub use schedule::{ExpectedEvent, Schedule, ScheduleConfig};
pub use scorer::{practice_tips, recommend_difficulty, score, SessionStats};
pub use session::{HitRecord, HitSubmission, SessionSettings, SessionState, TimingSession};
pub use store::{CompleteRequest, CompleteResponse, SessionStore, StartRequest, StartResponse};
