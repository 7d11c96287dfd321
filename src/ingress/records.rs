use serde::{Deserialize, Serialize};

use crate::types::Vid;

/// Edge in transit from the inserting process to its storage process.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EdgeRecord<E> {
    /// Global id of the source vertex.
    pub source: Vid,
    /// Global id of the target vertex.
    pub target: Vid,
    /// Edge payload.
    pub data: E,
}

/// Vertex payload in transit from the inserting process to the owner.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VertexDataRecord<V> {
    /// Global id of the vertex.
    pub vid: Vid,
    /// Vertex payload.
    pub data: V,
}

impl<E> EdgeRecord<E> {
    /// Bundles an edge for transport.
    pub fn new(source: Vid, target: Vid, data: E) -> Self {
        Self {
            source,
            target,
            data,
        }
    }
}

impl<V> VertexDataRecord<V> {
    /// Bundles a vertex payload for transport.
    pub fn new(vid: Vid, data: V) -> Self {
        Self { vid, data }
    }
}
