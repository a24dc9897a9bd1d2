//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Remote call (fragment fetch or reload):
//!     → per-request timeout (reqwest client)
//!     → On failure: retries.rs (check if retryable under the caller's policy)
//!     → backoff.rs (jittered exponential delay before next attempt)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every network call has a deadline
//! - Fetch and reload policies are configured and applied independently
//! - Jittered backoff prevents synchronized retries across managers

pub mod backoff;
pub mod retries;

pub use retries::RetryPolicy;
