//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Every reconciliation decision point produces:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → Log aggregation (stdout, JSON lines)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured logging with manager/repo/file fields
//! - Metrics are cheap (atomic updates behind the `metrics` facade)

pub mod logging;
pub mod metrics;
