pub mod config;
pub mod hospitals;
pub mod models;
pub mod pdf;
pub mod providers;
pub mod service;
pub mod telemetry;

pub use config::{Config, ConfigError};
pub use models::*;
pub use service::{AppState, build_router, create_app, create_app_state, spawn_session_sweeper};
