use crate::types::Lvid;

/// Per-process adjacency store populated during ingress.
///
/// Vertices are addressed by dense local ids. Inserting an edge grows the
/// vertex space to cover both endpoints; [`LocalGraph::finalize`] turns the
/// buffered edges into a query-ready structure.
pub trait LocalGraph<V, E>: Send {
    /// Hints that roughly `n` edges are about to be inserted.
    fn reserve_edge_space(&mut self, n: usize);
    /// Buffers a directed edge.
    fn add_edge(&mut self, source: Lvid, target: Lvid, data: E);
    /// Stores vertex data, growing the vertex space if needed.
    fn add_vertex(&mut self, lvid: Lvid, data: V);
    /// Builds the queryable edge structure from buffered edges.
    fn finalize(&mut self);
    /// Hints that the vertex space will reach `n`.
    fn reserve(&mut self, n: usize);
    /// Grows (or shrinks) the vertex space to exactly `n` vertices.
    fn resize(&mut self, n: usize);
    /// Number of local vertices.
    fn num_vertices(&self) -> usize;
    /// Number of local edges.
    fn num_edges(&self) -> usize;
    /// In-degree of `lvid` within this process; zero for unknown ids.
    fn num_in_edges(&self, lvid: Lvid) -> usize;
    /// Out-degree of `lvid` within this process; zero for unknown ids.
    fn num_out_edges(&self, lvid: Lvid) -> usize;
}

/// In-memory compressed sparse row graph.
///
/// Edges are appended unsorted; `finalize` sorts them by source into a
/// forward CSR and builds a reverse index of edge positions per target.
/// Degrees are tracked on insertion, so they are valid before finalize.
#[derive(Clone, Debug)]
pub struct CsrGraph<V, E> {
    vertex_data: Vec<V>,
    in_degree: Vec<usize>,
    out_degree: Vec<usize>,
    pending: Vec<(Lvid, Lvid, E)>,
    out_offsets: Vec<usize>,
    targets: Vec<Lvid>,
    edge_data: Vec<E>,
    in_offsets: Vec<usize>,
    in_positions: Vec<usize>,
    sources: Vec<Lvid>,
    finalized: bool,
}

impl<V, E> Default for CsrGraph<V, E> {
    fn default() -> Self {
        Self {
            vertex_data: Vec::new(),
            in_degree: Vec::new(),
            out_degree: Vec::new(),
            pending: Vec::new(),
            out_offsets: vec![0],
            targets: Vec::new(),
            edge_data: Vec::new(),
            in_offsets: vec![0],
            in_positions: Vec::new(),
            sources: Vec::new(),
            finalized: false,
        }
    }
}

impl<V: Default + Clone, E> CsrGraph<V, E> {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `finalize` ran after the last edge insertion.
    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Data attached to `lvid`, if the vertex exists.
    pub fn vertex_data(&self, lvid: Lvid) -> Option<&V> {
        self.vertex_data.get(lvid.index())
    }

    /// Out-edges of `lvid` as `(target, data)` pairs. Empty before finalize.
    pub fn out_edges(&self, lvid: Lvid) -> impl Iterator<Item = (Lvid, &E)> + '_ {
        let range = self.out_range(lvid);
        self.targets[range.clone()]
            .iter()
            .copied()
            .zip(self.edge_data[range].iter())
    }

    /// In-edges of `lvid` as `(source, data)` pairs. Empty before finalize.
    pub fn in_edges(&self, lvid: Lvid) -> impl Iterator<Item = (Lvid, &E)> + '_ {
        let index = lvid.index();
        let positions = if self.finalized && index + 1 < self.in_offsets.len() {
            &self.in_positions[self.in_offsets[index]..self.in_offsets[index + 1]]
        } else {
            &[][..]
        };
        positions
            .iter()
            .map(move |&pos| (self.sources[pos], &self.edge_data[pos]))
    }

    fn out_range(&self, lvid: Lvid) -> std::ops::Range<usize> {
        let index = lvid.index();
        if self.finalized && index + 1 < self.out_offsets.len() {
            self.out_offsets[index]..self.out_offsets[index + 1]
        } else {
            0..0
        }
    }

    fn ensure_vertex(&mut self, lvid: Lvid) {
        let needed = lvid.index() + 1;
        if needed > self.vertex_data.len() {
            self.resize_vertices(needed);
        }
    }

    fn resize_vertices(&mut self, n: usize) {
        self.vertex_data.resize(n, V::default());
        self.in_degree.resize(n, 0);
        self.out_degree.resize(n, 0);
        if self.finalized {
            // New vertices have no edges; extend the offset tables with the tail value.
            let out_tail = *self.out_offsets.last().unwrap_or(&0);
            let in_tail = *self.in_offsets.last().unwrap_or(&0);
            self.out_offsets.resize(n + 1, out_tail);
            self.in_offsets.resize(n + 1, in_tail);
        }
    }
}

impl<V, E> LocalGraph<V, E> for CsrGraph<V, E>
where
    V: Default + Clone + Send,
    E: Send,
{
    fn reserve_edge_space(&mut self, n: usize) {
        self.pending.reserve(n);
    }

    fn add_edge(&mut self, source: Lvid, target: Lvid, data: E) {
        self.ensure_vertex(source);
        self.ensure_vertex(target);
        self.out_degree[source.index()] += 1;
        self.in_degree[target.index()] += 1;
        self.pending.push((source, target, data));
        self.finalized = false;
    }

    fn add_vertex(&mut self, lvid: Lvid, data: V) {
        self.ensure_vertex(lvid);
        self.vertex_data[lvid.index()] = data;
    }

    fn finalize(&mut self) {
        if self.finalized && self.pending.is_empty() {
            return;
        }
        let nverts = self.vertex_data.len();
        let mut edges: Vec<(Lvid, Lvid, E)> = self
            .sources
            .drain(..)
            .zip(self.targets.drain(..))
            .zip(self.edge_data.drain(..))
            .map(|((source, target), data)| (source, target, data))
            .collect();
        edges.append(&mut self.pending);
        edges.sort_by_key(|&(source, target, _)| (source, target));

        self.out_offsets.clear();
        self.out_offsets.resize(nverts + 1, 0);
        self.in_offsets.clear();
        self.in_offsets.resize(nverts + 1, 0);
        for &(source, target, _) in &edges {
            self.out_offsets[source.index() + 1] += 1;
            self.in_offsets[target.index() + 1] += 1;
        }
        for i in 0..nverts {
            self.out_offsets[i + 1] += self.out_offsets[i];
            self.in_offsets[i + 1] += self.in_offsets[i];
        }

        self.sources.reserve(edges.len());
        self.targets.reserve(edges.len());
        self.edge_data.reserve(edges.len());
        let mut cursor = self.in_offsets.clone();
        self.in_positions.clear();
        self.in_positions.resize(edges.len(), 0);
        for (pos, (source, target, data)) in edges.into_iter().enumerate() {
            let slot = &mut cursor[target.index()];
            self.in_positions[*slot] = pos;
            *slot += 1;
            self.sources.push(source);
            self.targets.push(target);
            self.edge_data.push(data);
        }
        self.finalized = true;
    }

    fn reserve(&mut self, n: usize) {
        let extra = n.saturating_sub(self.vertex_data.len());
        self.vertex_data.reserve(extra);
        self.in_degree.reserve(extra);
        self.out_degree.reserve(extra);
    }

    fn resize(&mut self, n: usize) {
        self.resize_vertices(n);
    }

    fn num_vertices(&self) -> usize {
        self.vertex_data.len()
    }

    fn num_edges(&self) -> usize {
        self.targets.len() + self.pending.len()
    }

    fn num_in_edges(&self, lvid: Lvid) -> usize {
        self.in_degree.get(lvid.index()).copied().unwrap_or(0)
    }

    fn num_out_edges(&self, lvid: Lvid) -> usize {
        self.out_degree.get(lvid.index()).copied().unwrap_or(0)
    }
}
