//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ButlerConfig (validated, immutable)
//!     → manager::Manager::from_config (runtime form, backends built)
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → daemon stops the old scheduler set and starts a new one
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - Credentials may be indirected through the environment (`env:NAME`)

pub mod env;
pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::ConfigError;
pub use schema::ButlerConfig;
pub use schema::GlobalsConfig;
pub use schema::ManagerConfig;
pub use schema::RepoConfig;
pub use schema::ReloaderConfig;
pub use schema::TransportConfig;
