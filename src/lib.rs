//! Room Stager: virtual staging backend.
//!
//! A photo and a room-size tier go in; a staged rendering, the detected room
//! type and a renovation cost table come out. The pipeline enforces a daily
//! per-user quota, degrades to placeholder content when the AI providers are
//! absent or failing, and records cost and outcome analytics.

pub mod analytics;
pub mod classifier;
pub mod config;
pub mod cost;
pub mod deadline;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod prompts;
pub mod quota;
pub mod routes;
pub mod store;
pub mod transformer;

pub use config::AppConfig;
pub use routes::{router, AppState};
