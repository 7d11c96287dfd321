use std::sync::Arc;

use graft::{
    Communicator, CsrGraph, DistributedIngress, GraphError, IngressOptions, LocalCluster,
    LocalGraph, Lvid, PartitionKind, Partitioner, ProcId, Vid,
};

/// Ownership that depends on which rank evaluates it, which the protocol
/// must detect instead of building an inconsistent graph.
#[derive(Debug)]
struct SkewedPartitioner {
    rank: usize,
}

impl Partitioner for SkewedPartitioner {
    fn vertex_owner(&self, vid: Vid, numprocs: usize) -> ProcId {
        ((vid.0 as usize) + self.rank) % numprocs
    }

    fn edge_destination(&self, _source: Vid, _target: Vid, _numprocs: usize) -> ProcId {
        0
    }
}

/// Places every vertex one rank past the end of the cluster.
#[derive(Debug)]
struct OverflowPartitioner;

impl Partitioner for OverflowPartitioner {
    fn vertex_owner(&self, _vid: Vid, numprocs: usize) -> ProcId {
        numprocs
    }

    fn edge_destination(&self, _source: Vid, _target: Vid, _numprocs: usize) -> ProcId {
        0
    }
}

/// Local storage that cannot grow once edges are loaded.
struct FixedSizeGraph(CsrGraph<u64, u32>);

impl LocalGraph<u64, u32> for FixedSizeGraph {
    fn reserve_edge_space(&mut self, n: usize) {
        self.0.reserve_edge_space(n);
    }

    fn add_edge(&mut self, source: Lvid, target: Lvid, data: u32) {
        self.0.add_edge(source, target, data);
    }

    fn add_vertex(&mut self, lvid: Lvid, data: u64) {
        self.0.add_vertex(lvid, data);
    }

    fn finalize(&mut self) {
        self.0.finalize();
    }

    fn reserve(&mut self, _n: usize) {}

    fn resize(&mut self, _n: usize) {}

    fn num_vertices(&self) -> usize {
        self.0.num_vertices()
    }

    fn num_edges(&self) -> usize {
        self.0.num_edges()
    }

    fn num_in_edges(&self, lvid: Lvid) -> usize {
        self.0.num_in_edges(lvid)
    }

    fn num_out_edges(&self, lvid: Lvid) -> usize {
        self.0.num_out_edges(lvid)
    }
}

#[test]
fn disagreeing_owners_abort_every_rank() {
    let cluster = LocalCluster::new(2).unwrap();
    let outcomes = cluster.run(|comm| {
        let procid = comm.procid();
        let options = IngressOptions::new()
            .partitioner(Arc::new(SkewedPartitioner { rank: procid }))
            .log_progress(false);
        let ingress = DistributedIngress::<u32, u32, _>::new(Arc::new(comm), options)?;
        if procid == 0 {
            ingress.add_edge(Vid(0), Vid(1), 1)?;
        }
        ingress.finalize().map(|_| ())
    });

    assert!(outcomes.iter().all(|outcome| outcome.is_err()));
    assert!(outcomes
        .iter()
        .any(|outcome| matches!(outcome, Err(GraphError::Invariant(_)))));
    let reason = cluster.abort_reason().expect("cluster should be aborted");
    assert!(reason.contains("owner"), "unexpected abort reason: {reason}");
}

#[test]
fn root_cause_wins_over_secondary_aborts() {
    let cluster = LocalCluster::new(3).unwrap();
    let outcome = cluster.try_run(|comm| {
        let procid = comm.procid();
        let options = IngressOptions::new()
            .partitioner(Arc::new(SkewedPartitioner { rank: procid }))
            .log_progress(false);
        let ingress = DistributedIngress::<u32, u32, _>::new(Arc::new(comm), options)?;
        ingress.add_edge(Vid(procid as u64), Vid(procid as u64 + 1), 0)?;
        ingress.finalize().map(|_| ())
    });
    assert!(matches!(outcome, Err(GraphError::Invariant(_))));
}

#[test]
fn rank_failing_before_finalize_releases_its_peers() {
    let cluster = LocalCluster::new(3).unwrap();
    let outcomes = cluster.run(|comm| {
        let procid = comm.procid();
        let ingress =
            DistributedIngress::<u32, u32, _>::new(Arc::new(comm), IngressOptions::new())?;
        ingress.add_edge(Vid(procid as u64), Vid(7), 0)?;
        if procid == 2 {
            return Err(GraphError::Invalid("input file truncated"));
        }
        ingress.finalize().map(|_| ())
    });

    assert!(matches!(outcomes[2], Err(GraphError::Invalid(_))));
    for outcome in &outcomes[..2] {
        assert!(matches!(outcome, Err(GraphError::Aborted(_))), "{outcome:?}");
    }
}

#[test]
fn panicking_rank_releases_its_peers() {
    let cluster = LocalCluster::new(2).unwrap();
    let outcomes = cluster.run(|comm| {
        let procid = comm.procid();
        let ingress =
            DistributedIngress::<u32, u32, _>::new(Arc::new(comm), IngressOptions::new())?;
        if procid == 1 {
            panic!("loader crashed");
        }
        ingress.finalize().map(|_| ())
    });

    assert!(outcomes.iter().all(|outcome| outcome.as_ref().is_err_and(GraphError::is_abort)));
    assert!(cluster.abort_reason().unwrap().contains("rank 1 panicked"));
}

#[test]
fn aborted_cluster_rejects_further_ingestion() {
    let cluster = LocalCluster::new(1).unwrap();
    let outcome = cluster.try_run(|comm| {
        let comm = Arc::new(comm);
        let options = IngressOptions::new().batch_size(1);
        let ingress = DistributedIngress::<u32, u32, _>::new(Arc::clone(&comm), options)?;
        comm.abort("operator cancelled");
        let rejected = ingress.add_edge(Vid(1), Vid(2), 0);
        assert!(matches!(rejected, Err(GraphError::Aborted(_))));
        ingress.finalize().map(|_| ())
    });
    match outcome {
        Err(GraphError::Aborted(reason)) => assert!(reason.contains("operator cancelled")),
        other => panic!("expected abort, got {other:?}"),
    }
}

#[test]
fn out_of_range_owner_aborts_with_its_reason() {
    let cluster = LocalCluster::new(2).unwrap();
    let outcomes = cluster.run(|comm| {
        let procid = comm.procid();
        let options = IngressOptions::new()
            .partitioner(Arc::new(OverflowPartitioner))
            .log_progress(false);
        let ingress = DistributedIngress::<u32, u32, _>::new(Arc::new(comm), options)?;
        if procid == 0 {
            ingress.add_edge(Vid(0), Vid(1), 1)?;
        }
        ingress.finalize().map(|_| ())
    });

    assert!(matches!(outcomes[0], Err(GraphError::Invariant(_))), "{:?}", outcomes[0]);
    assert!(matches!(outcomes[1], Err(GraphError::Aborted(_))), "{:?}", outcomes[1]);
    let reason = cluster.abort_reason().expect("cluster should be aborted");
    assert!(reason.contains("placed vid 0 on rank 2 of 2"), "unexpected abort reason: {reason}");
}

#[test]
fn prepopulated_local_graph_breaks_the_vid_map() {
    let cluster = LocalCluster::new(2).unwrap();
    let outcomes = cluster.run(|comm| {
        let mut local = CsrGraph::<u64, u32>::new();
        if comm.procid() == 1 {
            local.add_vertex(Lvid(3), 9);
        }
        let options = IngressOptions::new().log_progress(false);
        let ingress =
            DistributedIngress::<u64, u32, _, _>::with_local_graph(Arc::new(comm), options, local)?;
        ingress.finalize().map(|_| ())
    });

    assert!(matches!(outcomes[1], Err(GraphError::Invariant(_))), "{:?}", outcomes[1]);
    assert!(matches!(outcomes[0], Err(GraphError::Aborted(_))), "{:?}", outcomes[0]);
    let reason = cluster.abort_reason().expect("cluster should be aborted");
    assert!(reason.contains("0 vids mapped but the local graph holds 4 vertices"), "{reason}");
}

#[test]
fn local_graph_that_cannot_grow_fails_the_record_check() {
    let cluster = LocalCluster::new(2).unwrap();
    let outcomes = cluster.run(|comm| {
        let procid = comm.procid();
        let options = IngressOptions::new()
            .partition(PartitionKind::Modulo)
            .log_progress(false);
        let local = FixedSizeGraph(CsrGraph::new());
        let ingress =
            DistributedIngress::<u64, u32, _, _>::with_local_graph(Arc::new(comm), options, local)?;
        // Vid 1 is owned by rank 1, which stores no edge and must grow to hold it.
        if procid == 0 {
            ingress.add_edge(Vid(0), Vid(1), 1)?;
        }
        ingress.finalize().map(|_| ())
    });

    assert!(matches!(outcomes[1], Err(GraphError::Invariant(_))), "{:?}", outcomes[1]);
    assert!(matches!(outcomes[0], Err(GraphError::Aborted(_))), "{:?}", outcomes[0]);
    let reason = cluster.abort_reason().expect("cluster should be aborted");
    assert!(reason.contains("for 0 local vertices"), "{reason}");
}
