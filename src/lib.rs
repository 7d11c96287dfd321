//! Graft: distributed graph ingress.
//!
//! Cooperating processes insert vertices and edges in any order, then run a
//! collective finalize that assigns every vertex an owner, records its
//! mirrors, reconciles degrees and payloads, and computes global statistics.
//! The result is an immutable, vertex-cut partitioned [`DistributedGraph`].
//!
//! ```no_run
//! use std::sync::Arc;
//! use graft::{Communicator, DistributedIngress, IngressOptions, LocalCluster, Vid};
//!
//! # fn main() -> graft::Result<()> {
//! let cluster = LocalCluster::new(2)?;
//! let graphs = cluster.try_run(|comm| {
//!     let procid = comm.procid() as u64;
//!     let ingress = DistributedIngress::<u32, f32, _>::new(Arc::new(comm), IngressOptions::new())?;
//!     ingress.add_edge(Vid(procid), Vid(procid + 1), 1.0)?;
//!     ingress.finalize()
//! })?;
//! assert_eq!(graphs[0].num_edges(), 2);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod graph;
pub mod ingress;
pub mod logging;
pub mod primitives;
pub mod storage;
pub mod types;

pub use graph::{DistributedGraph, FinalizeStats, GlobalStats, VertexRecord};
pub use ingress::{
    CombineFn, DistributedIngress, HashPartitioner, MirrorSet, ModuloPartitioner, PartitionKind,
    Partitioner, RangePartitioner,
};
pub use logging::init_logging;
pub use primitives::comm::{Communicator, LocalCluster, LocalClusterOptions, LocalComm};
pub use storage::{
    CounterMetrics, CsrGraph, IngressConfig, IngressMetrics, IngressOptions, LocalGraph,
    NoopMetrics,
};
pub use types::{GraphError, Lvid, ProcId, Result, Tag, Vid};
