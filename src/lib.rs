//! butler: configuration synchronization daemon library

pub mod config;
pub mod engine;
pub mod lifecycle;
pub mod manager;
pub mod observability;
pub mod reloader;
pub mod render;
pub mod resilience;
pub mod retrieval;
pub mod status;
pub mod validate;

pub use config::schema::ButlerConfig;
pub use engine::{Engine, PassOutcome};
pub use lifecycle::Shutdown;
pub use manager::Manager;
