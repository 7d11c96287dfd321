//! Per-process storage and ingress configuration.
//!
//! Holds the local adjacency store each process fills during ingress, the
//! options threaded into the ingress constructor, and the metrics hooks.

mod local;
mod metrics;
mod options;

/// Local graph storage contract and the default CSR implementation.
pub use local::{CsrGraph, LocalGraph};

/// Metrics and profiling.
pub use metrics::{default_metrics, CounterMetrics, IngressMetrics, NoopMetrics};

/// Ingress configuration options.
pub use options::{IngressConfig, IngressOptions, DEFAULT_BATCH_SIZE};
