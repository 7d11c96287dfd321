//! Distributed ingress: buffered insertion followed by the collective
//! finalize protocol that turns it into a [`DistributedGraph`].
//!
//! Every process constructs a [`DistributedIngress`] over its own
//! [`Communicator`], inserts any subset of vertices and edges in any order,
//! and then all processes call [`DistributedIngress::finalize`] together.
//!
//! [`DistributedGraph`]: crate::graph::DistributedGraph

mod channel;
mod exchange;
mod finalize;
mod partition;
mod records;


use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::debug;

pub use channel::{ChannelTable, CombineFn, MirrorSet, VertexChannel};
pub use exchange::BufferedExchange;
pub use partition::{HashPartitioner, ModuloPartitioner, PartitionKind, Partitioner, RangePartitioner};
pub use records::{EdgeRecord, VertexDataRecord};

use crate::primitives::comm::Communicator;
use crate::storage::{default_metrics, CsrGraph, IngressMetrics, IngressOptions, LocalGraph};
use crate::types::{Lvid, Result, Tag, Vid};

/// Per-process ingress state.
///
/// Insertions are buffered and shipped to the process that will hold them:
/// edges to [`Partitioner::edge_destination`], vertex payloads to
/// [`Partitioner::vertex_owner`]. Nothing is visible until every process has
/// called [`DistributedIngress::finalize`], which consumes the ingress.
///
/// Processes must construct their ingress objects in the same order, since
/// construction allocates communicator lanes.
pub struct DistributedIngress<V, E, C, G = CsrGraph<V, E>>
where
    C: Communicator,
{
    comm: Arc<C>,
    options: IngressOptions,
    partitioner: Arc<dyn Partitioner>,
    metrics: Arc<dyn IngressMetrics>,
    edge_exchange: BufferedExchange<EdgeRecord<E>, C>,
    vertex_exchange: BufferedExchange<VertexDataRecord<V>, C>,
    gather_tag: Tag,
    scatter_tag: Tag,
    combine: Option<CombineFn<V>>,
    local_graph: G,
    vid2lvid: FxHashMap<Vid, Lvid>,
}

impl<V, E, C> DistributedIngress<V, E, C, CsrGraph<V, E>>
where
    V: Default + Clone + Send + 'static,
    E: Send + 'static,
    C: Communicator,
{
    /// Creates an ingress backed by an empty [`CsrGraph`].
    ///
    /// Collective: every process must call it, in the same order relative to
    /// other lane-allocating constructors.
    pub fn new(comm: Arc<C>, options: IngressOptions) -> Result<Self> {
        Self::with_local_graph(comm, options, CsrGraph::new())
    }
}

impl<V, E, C, G> DistributedIngress<V, E, C, G>
where
    V: Clone + Send + 'static,
    E: Send + 'static,
    C: Communicator,
    G: LocalGraph<V, E>,
{
    /// Creates an ingress that fills the supplied local graph.
    pub fn with_local_graph(comm: Arc<C>, options: IngressOptions, local_graph: G) -> Result<Self> {
        options.config.validate()?;
        let partitioner = options.resolve_partitioner();
        let metrics = options.metrics.clone().unwrap_or_else(default_metrics);
        let batch_size = options.config.batch_size;

        let edge_exchange = BufferedExchange::new(Arc::clone(&comm), batch_size, Arc::clone(&metrics))?;
        let vertex_exchange =
            BufferedExchange::new(Arc::clone(&comm), batch_size, Arc::clone(&metrics))?;
        let gather_tag = comm.allocate_tag();
        let scatter_tag = comm.allocate_tag();

        comm.barrier()?;
        debug!(
            procid = comm.procid(),
            numprocs = comm.numprocs(),
            partitioner = ?partitioner,
            batch_size,
            "ingress.created"
        );

        Ok(Self {
            comm,
            options,
            partitioner,
            metrics,
            edge_exchange,
            vertex_exchange,
            gather_tag,
            scatter_tag,
            combine: None,
            local_graph,
            vid2lvid: FxHashMap::default(),
        })
    }

    /// Buffers a vertex payload for the vertex's owner.
    ///
    /// Inserting the same vid more than once, on one or several processes, is
    /// allowed. Without a duplicate strategy the surviving payload is
    /// whichever one the owner drains last, which is not deterministic.
    pub fn add_vertex(&self, vid: Vid, data: V) -> Result<()> {
        let owner = self.partitioner.vertex_owner(vid, self.comm.numprocs());
        self.vertex_exchange.send(owner, VertexDataRecord::new(vid, data))?;
        self.metrics.vertex_buffered();
        Ok(())
    }

    /// Buffers an edge for the process chosen to store it.
    pub fn add_edge(&self, source: Vid, target: Vid, data: E) -> Result<()> {
        let dest = self
            .partitioner
            .edge_destination(source, target, self.comm.numprocs());
        self.edge_exchange.send(dest, EdgeRecord::new(source, target, data))?;
        self.metrics.edge_buffered();
        Ok(())
    }

    /// Installs the reducer applied when a vertex payload arrives for a vid
    /// that already has one: `combine(&mut existing, &incoming)`.
    ///
    /// It should be associative and commutative; arrival order across
    /// processes is unspecified. Every process must install the same reducer.
    pub fn set_duplicate_vertex_strategy<F>(&mut self, combine: F)
    where
        F: Fn(&mut V, &V) + Send + Sync + 'static,
    {
        self.combine = Some(Arc::new(combine));
    }

    /// Rank of this process.
    pub fn procid(&self) -> usize {
        self.comm.procid()
    }

    /// Edges and vertex payloads buffered locally and not yet shipped.
    pub fn buffered(&self) -> usize {
        self.edge_exchange.buffered() + self.vertex_exchange.buffered()
    }
}

impl<V, E, C, G> fmt::Debug for DistributedIngress<V, E, C, G>
where
    C: Communicator,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DistributedIngress")
            .field("procid", &self.comm.procid())
            .field("numprocs", &self.comm.numprocs())
            .field("partitioner", &self.partitioner)
            .field("options", &self.options)
            .field("combine", &self.combine.is_some())
            .finish_non_exhaustive()
    }
}
