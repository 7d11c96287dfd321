use std::io::Write;
use std::sync::Arc;

use graft::{
    Communicator, DistributedGraph, DistributedIngress, IngressOptions, LocalCluster, MirrorSet,
    Partitioner, ProcId, Result, Vid,
};

/// Owners by `vid mod n`; edges land on `(source / 2) mod n`, so the edge
/// `0 -> 1` stays on rank 0 and `2 -> 3` goes to rank 1.
#[derive(Debug)]
struct PairPartitioner;

impl Partitioner for PairPartitioner {
    fn vertex_owner(&self, vid: Vid, numprocs: usize) -> ProcId {
        (vid.0 % numprocs as u64) as ProcId
    }

    fn edge_destination(&self, source: Vid, _target: Vid, numprocs: usize) -> ProcId {
        ((source.0 / 2) % numprocs as u64) as ProcId
    }
}

fn pair_options() -> IngressOptions {
    IngressOptions::new()
        .partitioner(Arc::new(PairPartitioner))
        .log_progress(false)
}

#[test]
fn two_process_edge_scenario() -> Result<()> {
    let cluster = LocalCluster::new(2)?;
    let graphs = cluster.try_run(|comm| {
        let procid = comm.procid();
        let ingress = DistributedIngress::<(), u32, _>::new(Arc::new(comm), pair_options())?;
        if procid == 0 {
            ingress.add_edge(Vid(0), Vid(1), 5)?;
        } else {
            ingress.add_edge(Vid(2), Vid(3), 7)?;
        }
        ingress.finalize()
    })?;

    for graph in &graphs {
        assert_eq!(graph.num_edges(), 2);
        assert_eq!(graph.num_vertices(), 4);
        assert_eq!(graph.num_replicas(), 6);
        assert_eq!(graph.num_local_own_vertices(), 2);
        assert_eq!(graph.num_local_vertices(), 3);
        assert!((graph.replication_factor() - 1.5).abs() < 1e-9);
    }

    let (p0, p1) = (&graphs[0], &graphs[1]);
    assert_eq!(p0.num_local_edges(), 1);
    assert_eq!(p1.num_local_edges(), 1);
    assert_eq!(p0.begin_edge_id(), 0);
    assert_eq!(p1.begin_edge_id(), 1);

    let src = p0.local_vid(Vid(0)).unwrap();
    let edges: Vec<_> = p0
        .local_graph()
        .out_edges(src)
        .map(|(target, weight)| (p0.global_vid(target).unwrap(), *weight))
        .collect();
    assert_eq!(edges, vec![(Vid(1), 5)]);

    let mirror_of_1 = p0.record_of(Vid(1)).unwrap();
    assert_eq!(mirror_of_1.owner, 1);
    assert_eq!(mirror_of_1.mirrors, MirrorSet::from_iter([0]));
    assert_eq!((mirror_of_1.num_in_edges, mirror_of_1.num_out_edges), (1, 0));
    assert!(!p0.is_owned(p0.local_vid(Vid(1)).unwrap()));

    let mirror_of_2 = p1.record_of(Vid(2)).unwrap();
    assert_eq!(mirror_of_2.owner, 0);
    assert_eq!(mirror_of_2.mirrors, MirrorSet::from_iter([1]));
    assert_eq!((mirror_of_2.num_in_edges, mirror_of_2.num_out_edges), (0, 1));

    // Owned-but-untouched replicas appear at their owners.
    assert_eq!(p0.record_of(Vid(2)), Some(mirror_of_2));
    assert_eq!(p1.record_of(Vid(1)), Some(mirror_of_1));
    assert!(p0.record_of(Vid(3)).is_none());
    assert!(p1.record_of(Vid(0)).is_none());

    for vid in 0..4u64 {
        let owner = (vid % 2) as usize;
        let record = graphs[owner].record_of(Vid(vid)).unwrap();
        assert_eq!(record.owner, owner);
    }
    Ok(())
}

fn duplicate_vertex_run(combine: bool) -> Result<Vec<DistributedGraph<u64, ()>>> {
    let cluster = LocalCluster::new(2)?;
    cluster.try_run(|comm| {
        let procid = comm.procid();
        let mut ingress = DistributedIngress::<u64, (), _>::new(Arc::new(comm), pair_options())?;
        if combine {
            ingress.set_duplicate_vertex_strategy(|existing: &mut u64, incoming: &u64| {
                *existing += *incoming
            });
        }
        ingress.add_vertex(Vid(5), if procid == 0 { 30 } else { 12 })?;
        ingress.finalize()
    })
}

#[test]
fn duplicate_vertex_with_sum_combine() -> Result<()> {
    for _ in 0..20 {
        let graphs = duplicate_vertex_run(true)?;
        assert_eq!(graphs[1].vertex_data(Vid(5)), Some(&42));
        assert_eq!(graphs[0].vertex_data(Vid(5)), None);
        assert_eq!(graphs[0].num_vertices(), 1);
        assert_eq!(graphs[0].num_replicas(), 1);
    }
    Ok(())
}

#[test]
fn duplicate_vertex_without_strategy_keeps_one_payload() -> Result<()> {
    for _ in 0..20 {
        let graphs = duplicate_vertex_run(false)?;
        let kept = *graphs[1].vertex_data(Vid(5)).unwrap();
        assert!(kept == 30 || kept == 12, "unexpected payload {kept}");
    }
    Ok(())
}

#[test]
fn mirrors_receive_the_owner_payload() -> Result<()> {
    let cluster = LocalCluster::new(2)?;
    let graphs = cluster.try_run(|comm| {
        let procid = comm.procid();
        let ingress = DistributedIngress::<u64, u32, _>::new(Arc::new(comm), pair_options())?;
        if procid == 0 {
            ingress.add_edge(Vid(0), Vid(1), 1)?;
        } else {
            ingress.add_vertex(Vid(1), 99)?;
        }
        ingress.finalize()
    })?;
    assert_eq!(graphs[1].vertex_data(Vid(1)), Some(&99));
    assert_eq!(graphs[0].vertex_data(Vid(1)), Some(&99));
    // Vid 0 never received a payload and keeps the default.
    assert_eq!(graphs[0].vertex_data(Vid(0)), Some(&0));
    Ok(())
}

#[test]
fn empty_finalize_completes_with_zero_counts() -> Result<()> {
    for numprocs in 1..=4 {
        let cluster = LocalCluster::new(numprocs)?;
        let graphs = cluster.try_run(|comm| {
            DistributedIngress::<u8, u8, _>::new(Arc::new(comm), IngressOptions::new())?.finalize()
        })?;
        assert_eq!(graphs.len(), numprocs);
        for graph in graphs {
            assert_eq!(graph.num_vertices(), 0);
            assert_eq!(graph.num_edges(), 0);
            assert_eq!(graph.num_replicas(), 0);
            assert_eq!(graph.replication_factor(), 0.0);
            assert!(graph.records().is_empty());
        }
    }
    Ok(())
}

#[test]
fn options_loaded_from_toml_drive_placement() -> Result<()> {
    let mut file = tempfile::NamedTempFile::new()?;
    writeln!(
        file,
        "batch_size = 3\nlog_progress = false\n\n[partition]\nkind = \"range\"\nmax_vid = 99"
    )?;
    let options = IngressOptions::load(file.path())?;

    let cluster = LocalCluster::new(2)?;
    let graphs = cluster.try_run(|comm| {
        let procid = comm.procid() as u64;
        let ingress = DistributedIngress::<u64, u64, _>::new(Arc::new(comm), options.clone())?;
        for vid in (procid..100).step_by(2) {
            ingress.add_edge(Vid(vid), Vid((vid + 1) % 100), vid)?;
        }
        ingress.finalize()
    })?;

    // Edges follow their source: rank 0 holds 0..50, rank 1 holds 50..100.
    assert_eq!(graphs[0].num_local_edges(), 50);
    assert_eq!(graphs[1].num_local_edges(), 50);
    assert_eq!(graphs[0].num_local_own_vertices(), 50);
    assert_eq!(graphs[0].num_vertices(), 100);
    // Only the block boundaries are replicated: 49 -> 50 and 99 -> 0.
    assert_eq!(graphs[0].num_replicas(), 102);
    Ok(())
}
