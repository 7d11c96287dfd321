use std::any::Any;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex, RwLock};
use rustc_hash::FxHashMap;
use tracing::{debug, error};

use super::Communicator;
use crate::primitives::concurrency::Rendezvous;
use crate::types::{GraphError, ProcId, Result, Tag};

type Payload = Box<dyn Any + Send>;
type SharedPayload = Box<dyn Any + Send + Sync>;
type Handler = Arc<dyn Fn(ProcId, Payload) -> Result<()> + Send + Sync>;

/// Tuning knobs for [`LocalCluster`].
#[derive(Clone, Debug)]
pub struct LocalClusterOptions {
    /// Worker threads per rank servicing incoming remote calls.
    pub rpc_threads: usize,
}

impl Default for LocalClusterOptions {
    fn default() -> Self {
        Self { rpc_threads: 2 }
    }
}

impl LocalClusterOptions {
    /// Sets the number of remote-call worker threads per rank.
    pub fn rpc_threads(mut self, threads: usize) -> Self {
        self.rpc_threads = threads;
        self
    }
}

/// In-process cluster where every rank is a thread.
///
/// Hands out one [`LocalComm`] per rank. Remote calls are serviced by
/// dedicated worker threads per rank, so calls from different senders to the
/// same rank execute concurrently, like RPC handlers on a real node.
pub struct LocalCluster {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

/// Handle through which a single rank talks to the rest of a [`LocalCluster`].
pub struct LocalComm {
    shared: Arc<Shared>,
    procid: ProcId,
    next_tag: AtomicU32,
}

struct Shared {
    numprocs: usize,
    rendezvous: Rendezvous,
    mailboxes: Vec<Mutex<FxHashMap<Tag, VecDeque<(ProcId, Payload)>>>>,
    gather_slots: Mutex<Vec<Option<SharedPayload>>>,
    exchange_slots: Mutex<Vec<Vec<Option<Payload>>>>,
    handlers: Vec<RwLock<FxHashMap<Tag, Handler>>>,
    inboxes: Vec<RpcInbox>,
    shutdown: AtomicBool,
}

#[derive(Default)]
struct RpcInbox {
    queue: Mutex<VecDeque<RpcCall>>,
    ready: Condvar,
}

struct RpcCall {
    source: ProcId,
    tag: Tag,
    payload: Payload,
}

struct AbortOnPanic {
    shared: Arc<Shared>,
    procid: ProcId,
}

impl Drop for AbortOnPanic {
    fn drop(&mut self) {
        if thread::panicking() {
            self.shared
                .rendezvous
                .abort(format!("rank {} panicked", self.procid));
        }
    }
}

impl LocalCluster {
    /// Creates a cluster of `numprocs` ranks with default options.
    pub fn new(numprocs: usize) -> Result<Self> {
        Self::with_options(numprocs, LocalClusterOptions::default())
    }

    /// Creates a cluster of `numprocs` ranks.
    pub fn with_options(numprocs: usize, options: LocalClusterOptions) -> Result<Self> {
        if numprocs == 0 {
            return Err(GraphError::Invalid("cluster needs at least one process"));
        }
        if options.rpc_threads == 0 {
            return Err(GraphError::Invalid("cluster needs at least one rpc thread"));
        }
        let shared = Arc::new(Shared {
            numprocs,
            rendezvous: Rendezvous::new(numprocs),
            mailboxes: (0..numprocs).map(|_| Mutex::new(FxHashMap::default())).collect(),
            gather_slots: Mutex::new((0..numprocs).map(|_| None).collect()),
            exchange_slots: Mutex::new(
                (0..numprocs)
                    .map(|_| (0..numprocs).map(|_| None).collect())
                    .collect(),
            ),
            handlers: (0..numprocs).map(|_| RwLock::new(FxHashMap::default())).collect(),
            inboxes: (0..numprocs).map(|_| RpcInbox::default()).collect(),
            shutdown: AtomicBool::new(false),
        });
        let mut cluster = LocalCluster {
            shared,
            workers: Vec::with_capacity(numprocs * options.rpc_threads),
        };
        for procid in 0..numprocs {
            for worker in 0..options.rpc_threads {
                let shared = Arc::clone(&cluster.shared);
                let handle = thread::Builder::new()
                    .name(format!("graft-rpc-{procid}-{worker}"))
                    .spawn(move || rpc_worker(shared, procid))?;
                cluster.workers.push(handle);
            }
        }
        debug!(numprocs, rpc_threads = options.rpc_threads, "comm.local.started");
        Ok(cluster)
    }

    /// Number of ranks.
    pub fn numprocs(&self) -> usize {
        self.shared.numprocs
    }

    /// Returns one communicator per rank, indexed by rank.
    ///
    /// Each rank must use exactly one handle; call this once per run.
    pub fn comms(&self) -> Vec<LocalComm> {
        (0..self.shared.numprocs)
            .map(|procid| LocalComm {
                shared: Arc::clone(&self.shared),
                procid,
                next_tag: AtomicU32::new(0),
            })
            .collect()
    }

    /// Reason of an abort raised by any rank, if any.
    pub fn abort_reason(&self) -> Option<String> {
        self.shared.rendezvous.abort_reason()
    }

    /// Runs `f` on every rank concurrently and returns each rank's outcome.
    ///
    /// A rank that fails or panics aborts the cluster, so its peers leave
    /// their next collective with [`GraphError::Aborted`] instead of hanging.
    pub fn run<T, F>(&self, f: F) -> Vec<Result<T>>
    where
        T: Send,
        F: Fn(LocalComm) -> Result<T> + Sync,
    {
        let f = &f;
        thread::scope(|scope| {
            let handles: Vec<_> = self
                .comms()
                .into_iter()
                .map(|comm| {
                    scope.spawn(move || {
                        let _guard = AbortOnPanic {
                            shared: Arc::clone(&comm.shared),
                            procid: comm.procid,
                        };
                        let shared = Arc::clone(&comm.shared);
                        let outcome = f(comm);
                        if let Err(err) = &outcome {
                            if !err.is_abort() {
                                shared.rendezvous.abort(err.to_string());
                            }
                        }
                        outcome
                    })
                })
                .collect();
            handles
                .into_iter()
                .enumerate()
                .map(|(procid, handle)| {
                    handle
                        .join()
                        .unwrap_or_else(|_| Err(GraphError::Aborted(format!("rank {procid} panicked"))))
                })
                .collect()
        })
    }

    /// Like [`LocalCluster::run`], but collapses the outcomes into one result.
    ///
    /// On failure the root cause is preferred over the secondary
    /// [`GraphError::Aborted`] errors it triggered on other ranks.
    pub fn try_run<T, F>(&self, f: F) -> Result<Vec<T>>
    where
        T: Send,
        F: Fn(LocalComm) -> Result<T> + Sync,
    {
        let outcomes = self.run(f);
        let mut values = Vec::with_capacity(outcomes.len());
        let mut first_abort = None;
        let mut root_cause = None;
        for outcome in outcomes {
            match outcome {
                Ok(value) => values.push(value),
                Err(err) if err.is_abort() => {
                    first_abort.get_or_insert(err);
                }
                Err(err) => {
                    root_cause.get_or_insert(err);
                }
            }
        }
        match root_cause.or(first_abort) {
            Some(err) => Err(err),
            None => Ok(values),
        }
    }
}

impl Drop for LocalCluster {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        for inbox in &self.shared.inboxes {
            let _queue = inbox.queue.lock();
            inbox.ready.notify_all();
        }
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

fn rpc_worker(shared: Arc<Shared>, procid: ProcId) {
    let inbox = &shared.inboxes[procid];
    loop {
        let call = {
            let mut queue = inbox.queue.lock();
            loop {
                if let Some(call) = queue.pop_front() {
                    break call;
                }
                if shared.shutdown.load(Ordering::Acquire) {
                    return;
                }
                inbox.ready.wait(&mut queue);
            }
        };
        shared.dispatch(procid, call);
        shared.rendezvous.end_call();
    }
}

impl Shared {
    fn dispatch(&self, procid: ProcId, call: RpcCall) {
        if self.rendezvous.abort_reason().is_some() {
            return;
        }
        let handler = self.handlers[procid].read().get(&call.tag).cloned();
        let outcome = match handler {
            Some(handler) => handler(call.source, call.payload),
            None => Err(GraphError::comm(format!(
                "no handler for endpoint {} on rank {procid}",
                call.tag
            ))),
        };
        if let Err(err) = outcome {
            if !err.is_abort() {
                error!(
                    rank = procid,
                    source = call.source,
                    endpoint = %call.tag,
                    error = %err,
                    "comm.rpc.failed"
                );
            }
            self.rendezvous.abort(err.to_string());
        }
    }

    fn check_rank(&self, dest: ProcId) -> Result<()> {
        if dest >= self.numprocs {
            return Err(GraphError::comm(format!(
                "rank {dest} out of range for {} processes",
                self.numprocs
            )));
        }
        Ok(())
    }

    fn check_live(&self) -> Result<()> {
        match self.rendezvous.abort_reason() {
            Some(reason) => Err(GraphError::Aborted(reason)),
            None => Ok(()),
        }
    }
}

impl Communicator for LocalComm {
    fn procid(&self) -> ProcId {
        self.procid
    }

    fn numprocs(&self) -> usize {
        self.shared.numprocs
    }

    fn allocate_tag(&self) -> Tag {
        Tag(self.next_tag.fetch_add(1, Ordering::Relaxed))
    }

    fn barrier(&self) -> Result<()> {
        self.shared.rendezvous.wait()
    }

    fn full_barrier(&self) -> Result<()> {
        self.shared.rendezvous.wait()?;
        self.shared.rendezvous.drain()?;
        self.shared.rendezvous.wait()
    }

    fn send_batch<T: Send + 'static>(&self, dest: ProcId, tag: Tag, batch: Vec<T>) -> Result<()> {
        self.shared.check_rank(dest)?;
        self.shared.check_live()?;
        self.shared.mailboxes[dest]
            .lock()
            .entry(tag)
            .or_default()
            .push_back((self.procid, Box::new(batch)));
        Ok(())
    }

    fn recv_batch<T: Send + 'static>(&self, tag: Tag) -> Result<Option<(ProcId, Vec<T>)>> {
        self.shared.check_live()?;
        let popped = self.shared.mailboxes[self.procid]
            .lock()
            .get_mut(&tag)
            .and_then(VecDeque::pop_front);
        let Some((source, payload)) = popped else {
            return Ok(None);
        };
        let batch = payload.downcast::<Vec<T>>().map_err(|_| {
            GraphError::comm(format!("lane {tag}: batch from rank {source} has unexpected type"))
        })?;
        Ok(Some((source, *batch)))
    }

    fn all_to_all<T: Send + 'static>(&self, outgoing: Vec<Vec<T>>) -> Result<Vec<Vec<T>>> {
        let numprocs = self.shared.numprocs;
        if outgoing.len() != numprocs {
            let reason = format!(
                "all_to_all on rank {} got {} vectors for {numprocs} processes",
                self.procid,
                outgoing.len()
            );
            self.abort(&reason);
            return Err(GraphError::comm(reason));
        }
        {
            let mut slots = self.shared.exchange_slots.lock();
            for (dest, items) in outgoing.into_iter().enumerate() {
                slots[self.procid][dest] = Some(Box::new(items));
            }
        }
        self.barrier()?;
        let incoming = {
            let mut slots = self.shared.exchange_slots.lock();
            (0..numprocs)
                .map(|source| {
                    slots[source][self.procid]
                        .take()
                        .and_then(|payload| payload.downcast::<Vec<T>>().ok())
                        .map(|items| *items)
                        .ok_or_else(|| {
                            GraphError::comm(format!(
                                "all_to_all: rank {source} contributed an unexpected type"
                            ))
                        })
                })
                .collect::<Result<Vec<_>>>()
        };
        self.barrier()?;
        incoming
    }

    fn all_gather<T: Clone + Send + Sync + 'static>(&self, value: T) -> Result<Vec<T>> {
        self.shared.gather_slots.lock()[self.procid] = Some(Box::new(value));
        self.barrier()?;
        let gathered = {
            let slots = self.shared.gather_slots.lock();
            slots
                .iter()
                .enumerate()
                .map(|(source, slot)| {
                    slot.as_ref()
                        .and_then(|payload| payload.downcast_ref::<T>())
                        .cloned()
                        .ok_or_else(|| {
                            GraphError::comm(format!(
                                "all_gather: rank {source} contributed an unexpected type"
                            ))
                        })
                })
                .collect::<Result<Vec<_>>>()
        };
        self.barrier()?;
        gathered
    }

    fn register_handler<T, F>(&self, tag: Tag, handler: F)
    where
        T: Send + 'static,
        F: Fn(ProcId, T) -> Result<()> + Send + Sync + 'static,
    {
        let erased: Handler = Arc::new(move |source, payload: Payload| {
            let payload = payload.downcast::<T>().map_err(|_| {
                GraphError::comm(format!("endpoint {tag}: call from rank {source} has unexpected type"))
            })?;
            handler(source, *payload)
        });
        self.shared.handlers[self.procid].write().insert(tag, erased);
    }

    fn unregister_handler(&self, tag: Tag) {
        self.shared.handlers[self.procid].write().remove(&tag);
    }

    fn remote_call<T: Send + 'static>(&self, dest: ProcId, tag: Tag, payload: T) -> Result<()> {
        self.shared.check_rank(dest)?;
        if self.shared.shutdown.load(Ordering::Acquire) {
            return Err(GraphError::comm("cluster shut down"));
        }
        self.shared.rendezvous.begin_call()?;
        let inbox = &self.shared.inboxes[dest];
        inbox.queue.lock().push_back(RpcCall {
            source: self.procid,
            tag,
            payload: Box::new(payload),
        });
        inbox.ready.notify_one();
        Ok(())
    }

    fn abort(&self, reason: &str) {
        self.shared.rendezvous.abort(reason);
    }

    fn abort_reason(&self) -> Option<String> {
        self.shared.rendezvous.abort_reason()
    }
}
