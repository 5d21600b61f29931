//! HTTP surface for practice sessions, built only with the `http_api` feature.
//!
//! Exposes the start/complete session contract, the mode catalogue, the
//! leaderboard and session history, plus health, metrics and an SSE stream of
//! telemetry events.

mod routes;
mod sse;

pub use routes::{build_router, run_http_server, HttpServerError, HttpState};
