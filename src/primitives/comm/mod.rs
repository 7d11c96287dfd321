//! Communication substrate consumed by the ingress protocol.
//!
//! The protocol only relies on the operations of [`Communicator`]: batched
//! point-to-point delivery on tagged lanes, collective synchronization,
//! collective data exchange, and one-way remote invocation. [`LocalCluster`]
//! implements them in-process with one thread per rank.

mod local;

pub use local::{LocalCluster, LocalClusterOptions, LocalComm};

use crate::types::{ProcId, Result, Tag};

/// Operations a process uses to cooperate with its peers.
///
/// Every collective (`barrier`, `full_barrier`, `all_to_all`, `all_gather`,
/// `allocate_tag`) must be entered by all processes in the same order. Once
/// any process calls [`Communicator::abort`], every collective and remote call
/// on every process fails with [`crate::types::GraphError::Aborted`].
pub trait Communicator: Send + Sync + 'static {
    /// Rank of the calling process.
    fn procid(&self) -> ProcId;

    /// Number of cooperating processes.
    fn numprocs(&self) -> usize;

    /// Allocates the next lane/endpoint tag. Processes allocate identical
    /// sequences as long as they construct protocol objects in the same order.
    fn allocate_tag(&self) -> Tag;

    /// Blocks until every process arrives.
    fn barrier(&self) -> Result<()>;

    /// Barrier that additionally waits for every in-flight remote call,
    /// issued by any process before the barrier, to complete.
    fn full_barrier(&self) -> Result<()>;

    /// Delivers a batch of records to `dest` on lane `tag`.
    fn send_batch<T: Send + 'static>(&self, dest: ProcId, tag: Tag, batch: Vec<T>) -> Result<()>;

    /// Pops one arrived batch on lane `tag`, or `None` when nothing is queued.
    ///
    /// Never waits for in-transit batches; pair a sender-side flush with a
    /// barrier before draining.
    fn recv_batch<T: Send + 'static>(&self, tag: Tag) -> Result<Option<(ProcId, Vec<T>)>>;

    /// Sends `outgoing[p]` to every process `p` and returns, at index `q`,
    /// what process `q` sent to the caller.
    fn all_to_all<T: Send + 'static>(&self, outgoing: Vec<Vec<T>>) -> Result<Vec<Vec<T>>>;

    /// Returns every process's `value`, indexed by rank.
    fn all_gather<T: Clone + Send + Sync + 'static>(&self, value: T) -> Result<Vec<T>>;

    /// Installs the handler invoked when a peer calls endpoint `tag` on this process.
    fn register_handler<T, F>(&self, tag: Tag, handler: F)
    where
        T: Send + 'static,
        F: Fn(ProcId, T) -> Result<()> + Send + Sync + 'static;

    /// Removes the handler for endpoint `tag` on this process.
    fn unregister_handler(&self, tag: Tag);

    /// Asynchronously invokes endpoint `tag` on `dest` with `payload`.
    ///
    /// Completion is only guaranteed after the next [`Communicator::full_barrier`].
    fn remote_call<T: Send + 'static>(&self, dest: ProcId, tag: Tag, payload: T) -> Result<()>;

    /// Aborts the whole cluster; peers fail at their next collective.
    fn abort(&self, reason: &str);

    /// Reason of an abort raised by any process, if any.
    fn abort_reason(&self) -> Option<String>;
}
