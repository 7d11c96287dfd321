use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use graft::{
    Communicator, DistributedGraph, DistributedIngress, IngressOptions, LocalCluster,
    LocalClusterOptions, PartitionKind, Partitioner, Result, Vid,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

const NUMPROCS: usize = 4;

fn random_edges(seed: u64, vertices: u64, edges: usize) -> Vec<(u64, u64)> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..edges)
        .map(|_| (rng.gen_range(0..vertices), rng.gen_range(0..vertices)))
        .collect()
}

/// Rank `i` inserts every edge whose index is `i` modulo the rank count.
fn build(edges: &[(u64, u64)], options: IngressOptions) -> Result<Vec<DistributedGraph<u64, u64>>> {
    let cluster = LocalCluster::with_options(NUMPROCS, LocalClusterOptions::default().rpc_threads(4))?;
    cluster.try_run(|comm| {
        let procid = comm.procid();
        let mut ingress = DistributedIngress::<u64, u64, _>::new(Arc::new(comm), options.clone())?;
        ingress.set_duplicate_vertex_strategy(|existing: &mut u64, incoming: &u64| *existing += *incoming);
        for (index, &(source, target)) in edges.iter().enumerate() {
            if index % NUMPROCS == procid {
                ingress.add_edge(Vid(source), Vid(target), index as u64)?;
                ingress.add_vertex(Vid(source), 1)?;
            }
        }
        ingress.finalize()
    })
}

fn hash_options(seed: u64) -> IngressOptions {
    IngressOptions::new()
        .partition(PartitionKind::Hash { seed })
        .batch_size(16)
        .log_progress(false)
}

#[test]
fn owner_mirror_sets_match_actual_replicas() -> Result<()> {
    let edges = random_edges(7, 300, 2_000);
    let graphs = build(&edges, hash_options(11))?;

    let mut holders: BTreeMap<Vid, BTreeSet<usize>> = BTreeMap::new();
    for graph in &graphs {
        for record in graph.records() {
            holders.entry(record.gvid).or_default().insert(graph.procid());
        }
    }

    let partitioner = PartitionKind::Hash { seed: 11 }.build();
    for (vid, ranks) in &holders {
        let owner = partitioner.vertex_owner(*vid, NUMPROCS);
        assert!(ranks.contains(&owner), "owner {owner} of {vid} holds no replica");
        let record = graphs[owner].record_of(*vid).expect("owner record");
        let mirrors: BTreeSet<usize> = record.mirrors.iter().collect();
        let expected: BTreeSet<usize> = ranks.iter().copied().filter(|&r| r != owner).collect();
        assert_eq!(mirrors, expected, "mirror set of {vid}");
        for &rank in ranks {
            assert_eq!(graphs[rank].record_of(*vid), Some(record), "replica of {vid} on {rank}");
        }
    }
    Ok(())
}

#[test]
fn replicated_degrees_and_payloads_are_global() -> Result<()> {
    let edges = random_edges(21, 150, 1_200);
    let graphs = build(&edges, hash_options(5))?;

    let mut out_degree: BTreeMap<u64, usize> = BTreeMap::new();
    let mut in_degree: BTreeMap<u64, usize> = BTreeMap::new();
    for &(source, target) in &edges {
        *out_degree.entry(source).or_default() += 1;
        *in_degree.entry(target).or_default() += 1;
    }

    for graph in &graphs {
        for record in graph.records() {
            let vid = record.gvid.0;
            let outs = out_degree.get(&vid).copied().unwrap_or(0);
            assert_eq!(record.num_out_edges, outs, "out-degree of {vid}");
            assert_eq!(record.num_in_edges, in_degree.get(&vid).copied().unwrap_or(0));
            // Each insertion of a source contributed one unit to its payload.
            assert_eq!(graph.vertex_data(record.gvid), Some(&(outs as u64)));
        }
    }
    Ok(())
}

#[test]
fn global_counts_match_local_sums() -> Result<()> {
    let edges = random_edges(99, 500, 3_000);
    let graphs = build(&edges, hash_options(0))?;

    let distinct: BTreeSet<u64> = edges.iter().flat_map(|&(s, t)| [s, t]).collect();
    let local_edges: usize = graphs.iter().map(|g| g.num_local_edges()).sum();
    let local_replicas: usize = graphs.iter().map(|g| g.num_local_vertices()).sum();
    let owned: u64 = graphs.iter().map(|g| g.num_local_own_vertices()).sum();

    for graph in &graphs {
        assert_eq!(graph.num_edges(), edges.len() as u64);
        assert_eq!(graph.num_edges(), local_edges as u64);
        assert_eq!(graph.num_vertices(), distinct.len() as u64);
        assert_eq!(graph.num_vertices(), owned);
        assert_eq!(graph.num_replicas(), local_replicas as u64);
        assert!(graph.replication_factor() >= 1.0);
        assert!(graph.replication_factor() <= NUMPROCS as f64);
    }

    let mut next_eid = 0;
    for graph in &graphs {
        assert_eq!(graph.begin_edge_id(), next_eid);
        next_eid += graph.num_local_edges() as u64;
    }
    Ok(())
}

#[test]
fn every_local_edge_is_reachable_from_both_endpoints() -> Result<()> {
    let edges = random_edges(3, 60, 400);
    let graphs = build(&edges, hash_options(2))?;

    let mut seen: Vec<u64> = Vec::new();
    for graph in &graphs {
        let local = graph.local_graph();
        for (index, _) in graph.records().iter().enumerate() {
            let lvid = graft::Lvid(index as u32);
            for (target, eid) in local.out_edges(lvid) {
                seen.push(*eid);
                let (source, expected_target) = edges[*eid as usize];
                assert_eq!(graph.global_vid(lvid), Some(Vid(source)));
                assert_eq!(graph.global_vid(target), Some(Vid(expected_target)));
                assert!(local.in_edges(target).any(|(from, e)| from == lvid && e == eid));
            }
        }
    }
    seen.sort_unstable();
    assert_eq!(seen, (0..edges.len() as u64).collect::<Vec<_>>());
    Ok(())
}
