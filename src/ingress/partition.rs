use std::fmt;

use serde::{Deserialize, Serialize};
use xxhash_rust::xxh64::xxh64;

use crate::types::{ProcId, Vid};

/// Placement policy for vertices and edges.
///
/// Both functions must be pure: every process evaluates them independently and
/// the protocol relies on all of them reaching the same answer. Vertex
/// ownership and edge storage are decided separately, so an edge may land on a
/// process that owns neither endpoint; those endpoints become mirrors there.
pub trait Partitioner: Send + Sync + fmt::Debug {
    /// Process holding the canonical record of `vid`.
    fn vertex_owner(&self, vid: Vid, numprocs: usize) -> ProcId;

    /// Process that physically stores the edge `source -> target`.
    fn edge_destination(&self, source: Vid, target: Vid, numprocs: usize) -> ProcId;
}

/// Hash placement: owners by a seeded hash of the vid, edges by a seeded hash
/// of the ordered endpoint pair (a randomized vertex cut).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HashPartitioner {
    seed: u64,
}

impl HashPartitioner {
    /// Creates a hash partitioner; every process must use the same seed.
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    /// Hash of a vertex id under this partitioner's seed.
    #[inline]
    pub fn hash_vertex(&self, vid: Vid) -> u64 {
        xxh64(&vid.0.to_le_bytes(), self.seed)
    }

    #[inline]
    fn hash_edge(&self, source: Vid, target: Vid) -> u64 {
        let mut key = [0u8; 16];
        key[..8].copy_from_slice(&source.0.to_le_bytes());
        key[8..].copy_from_slice(&target.0.to_le_bytes());
        xxh64(&key, self.seed ^ EDGE_SALT)
    }
}

const EDGE_SALT: u64 = 0x9e37_79b9_7f4a_7c15;

impl Partitioner for HashPartitioner {
    fn vertex_owner(&self, vid: Vid, numprocs: usize) -> ProcId {
        (self.hash_vertex(vid) % numprocs as u64) as ProcId
    }

    fn edge_destination(&self, source: Vid, target: Vid, numprocs: usize) -> ProcId {
        (self.hash_edge(source, target) % numprocs as u64) as ProcId
    }
}

/// Identity placement: `owner = vid mod numprocs`; edges follow their source.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ModuloPartitioner;

impl Partitioner for ModuloPartitioner {
    fn vertex_owner(&self, vid: Vid, numprocs: usize) -> ProcId {
        (vid.0 % numprocs as u64) as ProcId
    }

    fn edge_destination(&self, source: Vid, _target: Vid, numprocs: usize) -> ProcId {
        self.vertex_owner(source, numprocs)
    }
}

/// Range placement over `0..=max_vid`: each process owns one contiguous
/// block of ids; edges follow their source. Ids past `max_vid` fold onto the
/// last process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RangePartitioner {
    max_vid: u64,
}

impl RangePartitioner {
    /// Creates a range partitioner covering `0..=max_vid`.
    pub fn new(max_vid: u64) -> Self {
        Self { max_vid }
    }
}

impl Partitioner for RangePartitioner {
    fn vertex_owner(&self, vid: Vid, numprocs: usize) -> ProcId {
        let span = u128::from(self.max_vid) + 1;
        let clamped = u128::from(vid.0.min(self.max_vid));
        (clamped * numprocs as u128 / span) as ProcId
    }

    fn edge_destination(&self, source: Vid, _target: Vid, numprocs: usize) -> ProcId {
        self.vertex_owner(source, numprocs)
    }
}

/// Serializable choice of a built-in partitioner.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PartitionKind {
    /// [`HashPartitioner`] with the given seed.
    Hash {
        /// Hash seed shared by every process.
        #[serde(default)]
        seed: u64,
    },
    /// [`ModuloPartitioner`].
    Modulo,
    /// [`RangePartitioner`] over `0..=max_vid`.
    Range {
        /// Largest expected vertex id.
        max_vid: u64,
    },
}

impl Default for PartitionKind {
    fn default() -> Self {
        PartitionKind::Hash { seed: 0 }
    }
}

impl PartitionKind {
    /// Instantiates the selected partitioner.
    pub fn build(self) -> Box<dyn Partitioner> {
        match self {
            PartitionKind::Hash { seed } => Box::new(HashPartitioner::new(seed)),
            PartitionKind::Modulo => Box::new(ModuloPartitioner),
            PartitionKind::Range { max_vid } => Box::new(RangePartitioner::new(max_vid)),
        }
    }
}
