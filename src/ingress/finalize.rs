use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::{debug, error, info};

use super::channel::{ChannelTable, VertexChannel};
use super::DistributedIngress;
use crate::graph::{DistributedGraph, FinalizeStats, GlobalStats, VertexRecord};
use crate::primitives::comm::Communicator;
use crate::storage::LocalGraph;
use crate::types::{GraphError, Lvid, ProcId, Result, Vid};

type SharedTable<V> = Arc<RwLock<ChannelTable<V>>>;

impl<V, E, C, G> DistributedIngress<V, E, C, G>
where
    V: Clone + Send + 'static,
    E: Send + 'static,
    C: Communicator,
    G: LocalGraph<V, E>,
{
    /// Runs the collective finalize protocol and returns this process's share
    /// of the graph.
    ///
    /// Every process must call `finalize` exactly once; it returns only after
    /// all of them agree on ownership, mirror sets, degrees and global counts.
    ///
    /// Any failure is fatal for the whole job: the failing process logs it,
    /// aborts the communicator so every peer fails at its next collective
    /// instead of hanging, and returns the error. There is no partial result.
    pub fn finalize(self) -> Result<DistributedGraph<V, E, G>> {
        let comm = Arc::clone(&self.comm);
        let endpoints = [self.gather_tag, self.scatter_tag];
        let outcome = self.run_finalize();
        if let Err(err) = &outcome {
            for tag in endpoints {
                comm.unregister_handler(tag);
            }
            if !err.is_abort() {
                error!(procid = comm.procid(), error = %err, "ingress.finalize.failed");
                comm.abort(&format!("rank {}: {err}", comm.procid()));
            }
        }
        outcome
    }

    fn run_finalize(mut self) -> Result<DistributedGraph<V, E, G>> {
        let started = Instant::now();
        let procid = self.comm.procid();
        let table: SharedTable<V> = Arc::new(RwLock::new(ChannelTable::new()));
        self.register_endpoints(&table);
        let mut stats = FinalizeStats::default();

        self.comm.full_barrier()?;
        if procid == 0 && self.options.config.log_progress {
            info!(numprocs = self.comm.numprocs(), "ingress.finalize.started");
        }

        let phase = Instant::now();
        self.drain_edges(&table)?;
        stats.drain_millis = self.phase_completed("drain", phase);

        let phase = Instant::now();
        self.ingest_vertex_data(&table)?;
        stats.vertex_data_millis = self.phase_completed("vertex_data", phase);

        let phase = Instant::now();
        self.announce_replicas(&table)?;
        self.gather_channels(&table)?;
        self.scatter_channels(&table)?;
        let records = self.populate_records(&table)?;
        stats.reconcile_millis = self.phase_completed("reconcile", phase);

        let phase = Instant::now();
        let global = self.exchange_global_info(&records)?;
        stats.stats_millis = self.phase_completed("stats", phase);

        let phase = Instant::now();
        self.comm.unregister_handler(self.gather_tag);
        self.comm.unregister_handler(self.scatter_tag);
        table.write().clear();
        drop(table);
        self.edge_exchange.clear()?;
        self.vertex_exchange.clear()?;
        self.comm.full_barrier()?;
        stats.teardown_millis = self.phase_completed("teardown", phase);

        let Self {
            comm,
            options,
            local_graph,
            vid2lvid,
            ..
        } = self;

        let graph = DistributedGraph::from_parts(
            procid,
            comm.numprocs(),
            local_graph,
            vid2lvid,
            records,
            global,
            stats,
        );
        if procid == 0 && options.config.log_progress {
            info!(
                nverts = graph.num_vertices(),
                nedges = graph.num_edges(),
                nreplicas = graph.num_replicas(),
                replication_factor = graph.replication_factor(),
                elapsed_ms = millis_since(started),
                "ingress.finalize.completed"
            );
        }
        Ok(graph)
    }

    /// Installs the owner-side gather and mirror-side scatter endpoints.
    fn register_endpoints(&self, table: &SharedTable<V>) {
        let procid = self.comm.procid();

        let gather_table = Arc::clone(table);
        let combine = self.combine.clone();
        let metrics = Arc::clone(&self.metrics);
        self.comm.register_handler(
            self.gather_tag,
            move |source: ProcId, (vid, channel): (Vid, VertexChannel<V>)| {
                gather_table
                    .read()
                    .gather(procid, source, vid, channel, combine.as_ref())?;
                metrics.channel_gathered();
                Ok(())
            },
        );

        let scatter_table = Arc::clone(table);
        let metrics = Arc::clone(&self.metrics);
        self.comm.register_handler(
            self.scatter_tag,
            move |source: ProcId, (vid, channel): (Vid, VertexChannel<V>)| {
                scatter_table.read().scatter(procid, source, vid, channel)?;
                metrics.channel_scattered();
                Ok(())
            },
        );
    }

    /// Phase 1: ship everything still buffered, then build the local graph
    /// from the edges routed here.
    fn drain_edges(&mut self, table: &SharedTable<V>) -> Result<()> {
        self.edge_exchange.flush()?;
        self.vertex_exchange.flush()?;
        self.comm.barrier()?;

        let mut batches = Vec::new();
        let mut incoming = 0;
        while let Some((_, batch)) = self.edge_exchange.recv()? {
            incoming += batch.len();
            batches.push(batch);
        }
        self.local_graph
            .reserve_edge_space(incoming + self.options.config.edge_space_hint);

        let procid = self.comm.procid();
        let mut table = table.write();
        for record in batches.into_iter().flatten() {
            let source = assign_lvid(&mut self.vid2lvid, record.source)?;
            let target = assign_lvid(&mut self.vid2lvid, record.target)?;
            self.local_graph.add_edge(source, target, record.data);
            for vid in [record.source, record.target] {
                table.register(vid, self.owner_of(vid)?, procid);
            }
        }
        drop(table);

        if self.vid2lvid.len() != self.local_graph.num_vertices() {
            return Err(GraphError::invariant(format!(
                "rank {procid}: {} vids mapped but the local graph holds {} vertices after draining edges",
                self.vid2lvid.len(),
                self.local_graph.num_vertices()
            )));
        }
        self.local_graph.finalize();
        debug!(
            procid,
            nverts = self.local_graph.num_vertices(),
            nedges = self.local_graph.num_edges(),
            "ingress.finalize.local_graph"
        );
        Ok(())
    }

    /// Phase 2: fold the vertex payloads routed to this owner into channels.
    fn ingest_vertex_data(&mut self, table: &SharedTable<V>) -> Result<()> {
        let procid = self.comm.procid();
        let mut table = table.write();
        let mut received = 0usize;
        while let Some((source, batch)) = self.vertex_exchange.recv()? {
            for record in batch {
                let owner = self.owner_of(record.vid)?;
                if owner != procid {
                    return Err(GraphError::invariant(format!(
                        "rank {source} routed the payload of vid {} to rank {procid}, but its owner is rank {owner}",
                        record.vid
                    )));
                }
                assign_lvid(&mut self.vid2lvid, record.vid)?;
                table.register(record.vid, owner, procid);
                if let Some(channel) = table.get_mut(record.vid) {
                    channel.set_data(record.data, self.combine.as_ref());
                }
                received += 1;
            }
        }
        debug!(procid, received, channels = table.len(), "ingress.finalize.vertex_data");
        Ok(())
    }

    /// Phase 3a/3b: tell each owner which of its vertices are replicated here,
    /// create owner-side entries for vertices never touched locally, then fix
    /// every channel's local degree before any gather can arrive.
    fn announce_replicas(&mut self, table: &SharedTable<V>) -> Result<()> {
        let procid = self.comm.procid();
        let numprocs = self.comm.numprocs();
        self.comm.barrier()?;

        let mut outgoing: Vec<Vec<Vid>> = vec![Vec::new(); numprocs];
        for (vid, entry) in table.read().iter() {
            let owner = entry.lock().owner;
            if owner != procid {
                let lane = outgoing.get_mut(owner).ok_or_else(|| {
                    GraphError::invariant(format!(
                        "rank {procid}: channel for vid {vid} names rank {owner} of {numprocs} as owner"
                    ))
                })?;
                lane.push(vid);
            }
        }
        let incoming = self.comm.all_to_all(outgoing)?;

        let mut table = table.write();
        let mut created = 0usize;
        for (source, vids) in incoming.into_iter().enumerate() {
            for vid in vids {
                let owner = self.owner_of(vid)?;
                if owner != procid {
                    return Err(GraphError::invariant(format!(
                        "rank {source} reported vid {vid} to rank {procid}, but its owner is rank {owner}"
                    )));
                }
                if table.register(vid, owner, procid) {
                    assign_lvid(&mut self.vid2lvid, vid)?;
                    created += 1;
                }
            }
        }

        for (vid, channel) in table.iter_mut() {
            let lvid = lookup_lvid(&self.vid2lvid, procid, vid)?;
            channel.num_in_edges = self.local_graph.num_in_edges(lvid);
            channel.num_out_edges = self.local_graph.num_out_edges(lvid);
        }
        drop(table);
        debug!(procid, created, "ingress.finalize.owners_created");

        self.comm.barrier()
    }

    /// Phase 3c: every mirror pushes its channel to the owner, which merges
    /// them under the per-vid lock.
    fn gather_channels(&self, table: &SharedTable<V>) -> Result<()> {
        let procid = self.comm.procid();
        let mut sent = 0usize;
        {
            let table = table.read();
            for (vid, entry) in table.iter() {
                let channel = entry.lock().clone();
                if channel.owner != procid {
                    self.comm.remote_call(channel.owner, self.gather_tag, (vid, channel))?;
                    sent += 1;
                }
            }
        }
        debug!(procid, sent, "ingress.finalize.gathered");
        self.comm.full_barrier()
    }

    /// Phase 3d: every owner overwrites each mirror's channel with its
    /// canonical state.
    fn scatter_channels(&self, table: &SharedTable<V>) -> Result<()> {
        let procid = self.comm.procid();
        let mut sent = 0usize;
        {
            let table = table.read();
            for (vid, entry) in table.iter() {
                let channel = entry.lock().clone();
                if channel.owner != procid {
                    continue;
                }
                for mirror in channel.mirrors.iter() {
                    self.comm
                        .remote_call(mirror, self.scatter_tag, (vid, channel.clone()))?;
                    sent += 1;
                }
            }
        }
        debug!(procid, sent, "ingress.finalize.scattered");
        self.comm.full_barrier()
    }

    /// Phase 3e: size the local structures to the vid map and turn every
    /// channel into a permanent record, committing pending payloads.
    fn populate_records(&mut self, table: &SharedTable<V>) -> Result<Vec<VertexRecord>> {
        let procid = self.comm.procid();
        let vsize = self.vid2lvid.len();
        let mut records = vec![VertexRecord::default(); vsize];
        if vsize > self.local_graph.num_vertices() {
            self.local_graph.reserve(vsize);
            self.local_graph.resize(vsize);
        }

        let mut table = table.write();
        if table.len() != vsize {
            return Err(GraphError::invariant(format!(
                "rank {procid}: {} channels for {vsize} mapped vids",
                table.len()
            )));
        }
        for (vid, channel) in table.iter_mut() {
            let lvid = lookup_lvid(&self.vid2lvid, procid, vid)?;
            let record = records.get_mut(lvid.index()).ok_or_else(|| {
                GraphError::invariant(format!(
                    "rank {procid}: lvid {lvid} of vid {vid} exceeds the record table ({vsize})"
                ))
            })?;
            *record = VertexRecord {
                gvid: vid,
                owner: channel.owner,
                mirrors: channel.mirrors.clone(),
                num_in_edges: channel.num_in_edges,
                num_out_edges: channel.num_out_edges,
            };
            if let Some(data) = channel.data.take() {
                self.local_graph.add_vertex(lvid, data);
            }
        }
        drop(table);

        self.comm.full_barrier()?;

        let nverts = self.local_graph.num_vertices();
        if self.vid2lvid.len() != nverts || records.len() != nverts {
            return Err(GraphError::invariant(format!(
                "rank {procid}: {} mapped vids and {} records for {nverts} local vertices",
                self.vid2lvid.len(),
                records.len()
            )));
        }
        Ok(records)
    }

    /// Phase 4: all-gather local counts and reduce them to global totals.
    fn exchange_global_info(&self, records: &[VertexRecord]) -> Result<GlobalStats> {
        let procid = self.comm.procid();
        let local_own_nverts = records.iter().filter(|r| r.owner == procid).count() as u64;

        let edge_counts = self.comm.all_gather(self.local_graph.num_edges() as u64)?;
        let nedges: u64 = edge_counts.iter().sum();
        let begin_eid: u64 = edge_counts.iter().take(procid).sum();

        let own_counts = self.comm.all_gather(local_own_nverts)?;
        let nverts: u64 = own_counts.iter().sum();

        let replica_counts = self.comm.all_gather(self.local_graph.num_vertices() as u64)?;
        let nreplicas: u64 = replica_counts.iter().sum();

        debug!(procid, local_own_nverts, begin_eid, "ingress.finalize.stats");
        Ok(GlobalStats {
            nverts,
            nedges,
            nreplicas,
            begin_eid,
            local_own_nverts,
        })
    }

    /// Owner of `vid` under the local partitioner, which must name a rank of
    /// this cluster.
    fn owner_of(&self, vid: Vid) -> Result<ProcId> {
        let numprocs = self.comm.numprocs();
        let owner = self.partitioner.vertex_owner(vid, numprocs);
        if owner >= numprocs {
            return Err(GraphError::invariant(format!(
                "rank {}: partitioner placed vid {vid} on rank {owner} of {numprocs}",
                self.comm.procid()
            )));
        }
        Ok(owner)
    }

    fn phase_completed(&self, phase: &'static str, started: Instant) -> u64 {
        let millis = millis_since(started);
        self.metrics.phase_completed(phase, millis);
        if self.comm.procid() == 0 && self.options.config.log_progress {
            info!(phase, elapsed_ms = millis, "ingress.finalize.phase");
        }
        debug!(
            procid = self.comm.procid(),
            phase,
            nverts = self.vid2lvid.len(),
            nedges = self.local_graph.num_edges(),
            elapsed_ms = millis,
            "ingress.finalize.phase_local"
        );
        millis
    }
}

/// Returns the local id of `vid`, assigning the next dense one on first sight.
fn assign_lvid(vid2lvid: &mut FxHashMap<Vid, Lvid>, vid: Vid) -> Result<Lvid> {
    let next = vid2lvid.len();
    match vid2lvid.entry(vid) {
        Entry::Occupied(entry) => Ok(*entry.get()),
        Entry::Vacant(entry) => Ok(*entry.insert(Lvid::from_index(next)?)),
    }
}

fn lookup_lvid(vid2lvid: &FxHashMap<Vid, Lvid>, procid: ProcId, vid: Vid) -> Result<Lvid> {
    vid2lvid.get(&vid).copied().ok_or_else(|| {
        GraphError::invariant(format!("rank {procid}: channel for vid {vid} has no local id"))
    })
}

fn millis_since(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
