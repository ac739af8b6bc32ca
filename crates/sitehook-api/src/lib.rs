//! HTTP server for sitehook.
//!
//! Receives push webhooks, exposes per-target status and operator actions,
//! and owns the startup/shutdown sequence of runners and schedules.

pub mod auth;
pub mod error;
pub mod routes;
pub mod state;

pub use state::AppState;
