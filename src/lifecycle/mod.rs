//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Validate → Logging/metrics → Engine + managers → Schedulers
//!
//! Reload (startup.rs):
//!     Watcher update or SIGHUP → Build new managers → Stop old schedulers → Start new ones
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Schedulers finish their pass → Exit
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then observability, then schedulers
//! - Shutdown has a grace period: stuck passes are aborted after it

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::{run, StartupError, StartupOptions};
