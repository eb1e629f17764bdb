//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! admin client, sequencer, coordinator:
//!     → logging.rs (structured log events on stderr)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → Log aggregation (container stderr)
//!     → Metrics endpoint (Prometheus scrape)
//! ```

pub mod logging;
pub mod metrics;
