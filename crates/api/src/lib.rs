//! LearnHub Support API Library
//!
//! Support chat between students and support managers: HTTP routes,
//! WebSocket fan-out and the support domain core.

pub mod auth;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;
pub mod support;
pub mod websocket;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use state::AppState;
