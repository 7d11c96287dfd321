//! The finalized, partitioned graph as seen by one process.

use std::marker::PhantomData;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::ingress::MirrorSet;
use crate::storage::{CsrGraph, LocalGraph};
use crate::types::{Lvid, ProcId, Vid};

/// Permanent replica bookkeeping for one local vertex.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VertexRecord {
    /// Global id.
    pub gvid: Vid,
    /// Owning process.
    pub owner: ProcId,
    /// Processes holding a non-owning replica.
    pub mirrors: MirrorSet,
    /// Global in-degree.
    pub num_in_edges: usize,
    /// Global out-degree.
    pub num_out_edges: usize,
}

impl VertexRecord {
    /// Processes holding a non-owning replica.
    pub fn mirrors(&self) -> &MirrorSet {
        &self.mirrors
    }

    /// Number of replicas of this vertex across the cluster, owner included.
    pub fn num_replicas(&self) -> usize {
        self.mirrors.len() + 1
    }
}

/// Cluster-wide counters computed once during finalize.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalStats {
    /// Distinct vertices (each counted once, at its owner).
    pub nverts: u64,
    /// Edges across all processes.
    pub nedges: u64,
    /// Vertex replicas across all processes (owners plus mirrors).
    pub nreplicas: u64,
    /// First global edge id of this process's edges.
    pub begin_eid: u64,
    /// Vertices owned by this process.
    pub local_own_nverts: u64,
}

/// Wall-clock time spent in each finalize phase on this process.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizeStats {
    /// Flush and local graph construction.
    pub drain_millis: u64,
    /// Vertex payload ingestion.
    pub vertex_data_millis: u64,
    /// Ownership gather/scatter and record population.
    pub reconcile_millis: u64,
    /// Global statistics exchange.
    pub stats_millis: u64,
    /// Teardown.
    pub teardown_millis: u64,
}

impl FinalizeStats {
    /// Sum of all phases.
    pub fn total_millis(&self) -> u64 {
        self.drain_millis
            + self.vertex_data_millis
            + self.reconcile_millis
            + self.stats_millis
            + self.teardown_millis
    }
}

/// One process's share of a finalized distributed graph.
///
/// Immutable: produced by [`crate::ingress::DistributedIngress::finalize`]
/// and only queried afterwards.
pub struct DistributedGraph<V, E, G = CsrGraph<V, E>> {
    procid: ProcId,
    numprocs: usize,
    local_graph: G,
    vid2lvid: FxHashMap<Vid, Lvid>,
    lvid2record: Vec<VertexRecord>,
    stats: GlobalStats,
    finalize_stats: FinalizeStats,
    _payload: PhantomData<fn() -> (V, E)>,
}

impl<V, E, G> DistributedGraph<V, E, G>
where
    G: LocalGraph<V, E>,
{
    pub(crate) fn from_parts(
        procid: ProcId,
        numprocs: usize,
        local_graph: G,
        vid2lvid: FxHashMap<Vid, Lvid>,
        lvid2record: Vec<VertexRecord>,
        stats: GlobalStats,
        finalize_stats: FinalizeStats,
    ) -> Self {
        Self {
            procid,
            numprocs,
            local_graph,
            vid2lvid,
            lvid2record,
            stats,
            finalize_stats,
            _payload: PhantomData,
        }
    }

    /// Rank of this process.
    pub fn procid(&self) -> ProcId {
        self.procid
    }

    /// Number of processes sharing the graph.
    pub fn numprocs(&self) -> usize {
        self.numprocs
    }

    /// Distinct vertices in the whole graph.
    pub fn num_vertices(&self) -> u64 {
        self.stats.nverts
    }

    /// Edges in the whole graph.
    pub fn num_edges(&self) -> u64 {
        self.stats.nedges
    }

    /// Vertex replicas in the whole graph, owners included.
    pub fn num_replicas(&self) -> u64 {
        self.stats.nreplicas
    }

    /// Replicas per distinct vertex; zero for an empty graph.
    pub fn replication_factor(&self) -> f64 {
        if self.stats.nverts == 0 {
            0.0
        } else {
            self.stats.nreplicas as f64 / self.stats.nverts as f64
        }
    }

    /// First global edge id assigned to this process's edges.
    pub fn begin_edge_id(&self) -> u64 {
        self.stats.begin_eid
    }

    /// Cluster-wide counters.
    pub fn stats(&self) -> &GlobalStats {
        &self.stats
    }

    /// Per-phase finalize timings on this process.
    pub fn finalize_stats(&self) -> &FinalizeStats {
        &self.finalize_stats
    }

    /// Replicas held by this process, owned or mirrored.
    pub fn num_local_vertices(&self) -> usize {
        self.local_graph.num_vertices()
    }

    /// Edges stored on this process.
    pub fn num_local_edges(&self) -> usize {
        self.local_graph.num_edges()
    }

    /// Vertices owned by this process.
    pub fn num_local_own_vertices(&self) -> u64 {
        self.stats.local_own_nverts
    }

    /// Local id of `vid`, if this process holds a replica.
    pub fn local_vid(&self, vid: Vid) -> Option<Lvid> {
        self.vid2lvid.get(&vid).copied()
    }

    /// Global id of a local vertex.
    pub fn global_vid(&self, lvid: Lvid) -> Option<Vid> {
        self.vertex_record(lvid).map(|record| record.gvid)
    }

    /// Replica bookkeeping of a local vertex.
    pub fn vertex_record(&self, lvid: Lvid) -> Option<&VertexRecord> {
        self.lvid2record.get(lvid.index())
    }

    /// Replica bookkeeping looked up by global id.
    pub fn record_of(&self, vid: Vid) -> Option<&VertexRecord> {
        self.local_vid(vid).and_then(|lvid| self.vertex_record(lvid))
    }

    /// Whether this process owns the local vertex.
    pub fn is_owned(&self, lvid: Lvid) -> bool {
        self.vertex_record(lvid)
            .is_some_and(|record| record.owner == self.procid)
    }

    /// Every local vertex record, indexed by local id.
    pub fn records(&self) -> &[VertexRecord] {
        &self.lvid2record
    }

    /// Underlying local adjacency store.
    pub fn local_graph(&self) -> &G {
        &self.local_graph
    }
}

impl<V, E> DistributedGraph<V, E, CsrGraph<V, E>>
where
    V: Default + Clone + Send,
    E: Send,
{
    /// Vertex payload of `vid`, if this process holds a replica.
    pub fn vertex_data(&self, vid: Vid) -> Option<&V> {
        self.local_vid(vid)
            .and_then(|lvid| self.local_graph.vertex_data(lvid))
    }
}
