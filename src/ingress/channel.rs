use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::types::{GraphError, ProcId, Result, Vid};

/// Combines a duplicate vertex payload into the one already held.
///
/// Called as `combine(existing, incoming)`. Arrival order across processes
/// is unspecified, so the function should be associative and commutative
/// for the outcome to be deterministic.
pub type CombineFn<V> = Arc<dyn Fn(&mut V, &V) + Send + Sync>;

const WORD_BITS: usize = 64;

/// Bitset over process ranks.
///
/// Equality, hashing and emptiness ignore trailing zero words, so a set
/// decoded from a padded encoding matches the same set built in memory.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct MirrorSet {
    words: SmallVec<[u64; 2]>,
}

impl MirrorSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `procid`; returns `true` if it was absent.
    pub fn insert(&mut self, procid: ProcId) -> bool {
        let (word, bit) = (procid / WORD_BITS, procid % WORD_BITS);
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        let mask = 1u64 << bit;
        let absent = self.words[word] & mask == 0;
        self.words[word] |= mask;
        absent
    }

    /// Removes `procid`; returns `true` if it was present.
    pub fn remove(&mut self, procid: ProcId) -> bool {
        let (word, bit) = (procid / WORD_BITS, procid % WORD_BITS);
        let Some(slot) = self.words.get_mut(word) else {
            return false;
        };
        let mask = 1u64 << bit;
        let present = *slot & mask != 0;
        *slot &= !mask;
        while self.words.last() == Some(&0) {
            self.words.pop();
        }
        present
    }

    /// Whether `procid` is in the set.
    pub fn contains(&self, procid: ProcId) -> bool {
        self.words
            .get(procid / WORD_BITS)
            .is_some_and(|word| word & (1u64 << (procid % WORD_BITS)) != 0)
    }

    /// Adds every member of `other`.
    pub fn union_with(&mut self, other: &MirrorSet) {
        if other.words.len() > self.words.len() {
            self.words.resize(other.words.len(), 0);
        }
        for (word, theirs) in self.words.iter_mut().zip(other.words.iter()) {
            *word |= theirs;
        }
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.words.iter().map(|word| word.count_ones() as usize).sum()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.significant().is_empty()
    }

    /// Members in ascending rank order.
    pub fn iter(&self) -> impl Iterator<Item = ProcId> + '_ {
        self.words.iter().enumerate().flat_map(|(index, &word)| {
            let mut rest = word;
            std::iter::from_fn(move || {
                if rest == 0 {
                    return None;
                }
                let bit = rest.trailing_zeros() as usize;
                rest &= rest - 1;
                Some(index * WORD_BITS + bit)
            })
        })
    }

    fn significant(&self) -> &[u64] {
        let len = self
            .words
            .iter()
            .rposition(|&word| word != 0)
            .map_or(0, |last| last + 1);
        &self.words[..len]
    }
}

impl PartialEq for MirrorSet {
    fn eq(&self, other: &Self) -> bool {
        self.significant() == other.significant()
    }
}

impl Eq for MirrorSet {}

impl Hash for MirrorSet {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.significant().hash(state);
    }
}

impl fmt::Debug for MirrorSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl FromIterator<ProcId> for MirrorSet {
    fn from_iter<I: IntoIterator<Item = ProcId>>(iter: I) -> Self {
        let mut set = MirrorSet::new();
        for procid in iter {
            set.insert(procid);
        }
        set
    }
}

/// Transient per-vid replica bookkeeping used while finalizing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VertexChannel<V> {
    /// Owning process.
    pub owner: ProcId,
    /// Processes holding a non-owning replica.
    pub mirrors: MirrorSet,
    /// Pending vertex payload; `None` until some process supplies one.
    pub data: Option<V>,
    /// In-edge count (local before the gather, global after).
    pub num_in_edges: usize,
    /// Out-edge count (local before the gather, global after).
    pub num_out_edges: usize,
}

impl<V> VertexChannel<V> {
    /// Creates an empty channel for a vertex owned by `owner`.
    pub fn new(owner: ProcId) -> Self {
        Self {
            owner,
            mirrors: MirrorSet::new(),
            data: None,
            num_in_edges: 0,
            num_out_edges: 0,
        }
    }

    /// Whether a payload has been supplied.
    pub fn data_is_set(&self) -> bool {
        self.data.is_some()
    }

    /// Folds `incoming` into the pending payload.
    ///
    /// With a combine strategy and a payload already set, the two are
    /// combined. Otherwise `incoming` replaces whatever was there: with no
    /// strategy, concurrent duplicates resolve to whichever record happened to
    /// be applied last, which is intentionally non-deterministic.
    pub fn set_data(&mut self, incoming: V, combine: Option<&CombineFn<V>>) {
        if let (Some(existing), Some(combine)) = (self.data.as_mut(), combine) {
            combine(existing, &incoming);
            return;
        }
        self.data = Some(incoming);
    }

    /// Merges a mirror's channel into this one (the owner-side `+=`).
    ///
    /// Mirror sets union and edge counts sum; the payload follows
    /// [`VertexChannel::set_data`] when the incoming side carries one.
    pub fn merge(&mut self, incoming: VertexChannel<V>, combine: Option<&CombineFn<V>>) {
        self.mirrors.union_with(&incoming.mirrors);
        self.num_in_edges += incoming.num_in_edges;
        self.num_out_edges += incoming.num_out_edges;
        if let Some(data) = incoming.data {
            self.set_data(data, combine);
        }
    }
}

/// Vid-keyed table of vertex channels with one lock per entry.
///
/// The key set only changes through `&mut self`; remote gather and scatter
/// calls go through `&self` and lock just the entry they touch, so merges for
/// different vids never contend.
pub struct ChannelTable<V> {
    entries: FxHashMap<Vid, Mutex<VertexChannel<V>>>,
}

impl<V> Default for ChannelTable<V> {
    fn default() -> Self {
        Self {
            entries: FxHashMap::default(),
        }
    }
}

impl<V> ChannelTable<V> {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of channels.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registers a channel for `vid` unless one exists; returns `true` when created.
    ///
    /// The new channel records `owner`, and lists `local` as a mirror when
    /// `local` is not the owner.
    pub fn register(&mut self, vid: Vid, owner: ProcId, local: ProcId) -> bool {
        if self.entries.contains_key(&vid) {
            return false;
        }
        let mut channel = VertexChannel::new(owner);
        if owner != local {
            channel.mirrors.insert(local);
        }
        self.entries.insert(vid, Mutex::new(channel));
        true
    }

    /// Exclusive access to the channel of `vid`.
    pub fn get_mut(&mut self, vid: Vid) -> Option<&mut VertexChannel<V>> {
        self.entries.get_mut(&vid).map(Mutex::get_mut)
    }

    /// Locked snapshot of the channel of `vid`.
    pub fn get(&self, vid: Vid) -> Option<VertexChannel<V>>
    where
        V: Clone,
    {
        self.entries.get(&vid).map(|entry| entry.lock().clone())
    }

    /// Iterates entries with their locks.
    pub fn iter(&self) -> impl Iterator<Item = (Vid, &Mutex<VertexChannel<V>>)> + '_ {
        self.entries.iter().map(|(&vid, entry)| (vid, entry))
    }

    /// Iterates entries mutably without locking.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Vid, &mut VertexChannel<V>)> + '_ {
        self.entries
            .iter_mut()
            .map(|(&vid, entry)| (vid, entry.get_mut()))
    }

    /// Drops every channel and releases the table's memory.
    pub fn clear(&mut self) {
        self.entries = FxHashMap::default();
    }

    /// Owner-side merge of a mirror's channel, invoked remotely by `source`.
    pub fn gather(
        &self,
        local: ProcId,
        source: ProcId,
        vid: Vid,
        incoming: VertexChannel<V>,
        combine: Option<&CombineFn<V>>,
    ) -> Result<()> {
        let entry = self.entries.get(&vid).ok_or_else(|| {
            GraphError::invariant(format!(
                "rank {source} gathered vid {vid} into rank {local}, which has no channel for it"
            ))
        })?;
        let mut channel = entry.lock();
        if channel.owner != local {
            return Err(GraphError::invariant(format!(
                "rank {source} gathered vid {vid} into rank {local}, but its owner is rank {}",
                channel.owner
            )));
        }
        if !incoming.mirrors.contains(source) {
            return Err(GraphError::invariant(format!(
                "rank {source} gathered vid {vid} without listing itself as a mirror"
            )));
        }
        channel.merge(incoming, combine);
        Ok(())
    }

    /// Mirror-side overwrite with the owner's canonical channel, invoked
    /// remotely by `source`.
    pub fn scatter(
        &self,
        local: ProcId,
        source: ProcId,
        vid: Vid,
        incoming: VertexChannel<V>,
    ) -> Result<()> {
        let entry = self.entries.get(&vid).ok_or_else(|| {
            GraphError::invariant(format!(
                "rank {source} scattered vid {vid} to rank {local}, which has no channel for it"
            ))
        })?;
        let mut channel = entry.lock();
        if channel.owner == local || channel.owner != source {
            return Err(GraphError::invariant(format!(
                "rank {source} scattered vid {vid} to rank {local}, but its owner is rank {}",
                channel.owner
            )));
        }
        if !incoming.mirrors.contains(local) {
            return Err(GraphError::invariant(format!(
                "rank {source} scattered vid {vid} to rank {local}, which is not in its mirror set {:?}",
                incoming.mirrors
            )));
        }
        *channel = incoming;
        Ok(())
    }
}
