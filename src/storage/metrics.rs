use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Trait for tracking ingress activity on one process.
///
/// Implementations receive callbacks from the ingestion entry points, the
/// batched exchanges, the remote gather/scatter handlers and the finalize
/// phases. Callbacks may arrive concurrently from several threads.
pub trait IngressMetrics: Send + Sync {
    /// Records an edge accepted by `add_edge`.
    fn edge_buffered(&self);

    /// Records a vertex accepted by `add_vertex`.
    fn vertex_buffered(&self);

    /// Records a batch handed to the communicator.
    ///
    /// # Parameters
    /// * `records` - Number of records in the batch.
    fn batch_shipped(&self, records: usize);

    /// Records a mirror channel merged into an owner channel.
    fn channel_gathered(&self);

    /// Records an owner channel copied onto a mirror.
    fn channel_scattered(&self);

    /// Records the completion of a finalize phase.
    ///
    /// # Parameters
    /// * `phase` - Phase name, e.g. `"reconcile"`.
    /// * `millis` - Wall-clock duration of the phase on this process.
    fn phase_completed(&self, phase: &'static str, millis: u64);
}

/// A no-op implementation of [`IngressMetrics`] that discards everything.
#[derive(Default)]
pub struct NoopMetrics;

impl IngressMetrics for NoopMetrics {
    fn edge_buffered(&self) {}
    fn vertex_buffered(&self) {}
    fn batch_shipped(&self, _records: usize) {}
    fn channel_gathered(&self) {}
    fn channel_scattered(&self) {}
    fn phase_completed(&self, _phase: &'static str, _millis: u64) {}
}

/// A thread-safe counter-based implementation of [`IngressMetrics`].
#[derive(Default)]
pub struct CounterMetrics {
    /// Edges accepted by `add_edge`.
    pub edges_buffered: AtomicU64,

    /// Vertices accepted by `add_vertex`.
    pub vertices_buffered: AtomicU64,

    /// Batches handed to the communicator.
    pub batches_shipped: AtomicU64,

    /// Records carried by those batches.
    pub records_shipped: AtomicU64,

    /// Mirror channels merged on this process as owner.
    pub channels_gathered: AtomicU64,

    /// Owner channels copied onto this process as mirror.
    pub channels_scattered: AtomicU64,

    /// Finalize phases completed.
    pub phases_completed: AtomicU64,

    /// Total milliseconds spent in finalize phases.
    pub phase_millis: AtomicU64,
}

impl IngressMetrics for CounterMetrics {
    fn edge_buffered(&self) {
        self.edges_buffered.fetch_add(1, Ordering::Relaxed);
    }

    fn vertex_buffered(&self) {
        self.vertices_buffered.fetch_add(1, Ordering::Relaxed);
    }

    fn batch_shipped(&self, records: usize) {
        self.batches_shipped.fetch_add(1, Ordering::Relaxed);
        self.records_shipped
            .fetch_add(records as u64, Ordering::Relaxed);
    }

    fn channel_gathered(&self) {
        self.channels_gathered.fetch_add(1, Ordering::Relaxed);
    }

    fn channel_scattered(&self) {
        self.channels_scattered.fetch_add(1, Ordering::Relaxed);
    }

    fn phase_completed(&self, _phase: &'static str, millis: u64) {
        self.phases_completed.fetch_add(1, Ordering::Relaxed);
        self.phase_millis.fetch_add(millis, Ordering::Relaxed);
    }
}

/// Returns the metrics sink used when none is configured.
pub fn default_metrics() -> Arc<dyn IngressMetrics> {
    Arc::new(NoopMetrics)
}
