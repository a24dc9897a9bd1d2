//! Configuration synchronization engine.
//!
//! # Data Flow
//! ```text
//! ManagerScheduler tick
//!     → Engine::reconcile (manager state lock held)
//!     → fetch.rs   (download → render → validate, concurrently, into ConfigChanEvent)
//!     → event.rs   (commit gate: every fragment succeeded?)
//!     → merge.rs   (primary concat + additional copy, only on change)
//!     → cache.rs   (snapshot on success; restore / clean / leave on failure)
//!     → reloader   (only when merge reported a change)
//!     → status     (manager health persisted)
//! ```
//!
//! # Design Decisions
//! - Failures never escape a pass; they become a `PassOutcome`, logs and metrics
//! - Managers share nothing but the cache map and the status store

pub mod cache;
pub mod event;
pub mod fetch;
pub mod merge;
pub mod pass;
pub mod scheduler;

pub use cache::{FallbackAction, KnownGoodCache};
pub use event::{ConfigChanEvent, FetchStep, RepoFileEvent, TmpFile};
pub use pass::{Engine, PassOutcome};
pub use scheduler::ManagerScheduler;
