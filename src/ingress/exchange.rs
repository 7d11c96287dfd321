use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::primitives::comm::Communicator;
use crate::storage::IngressMetrics;
use crate::types::{GraphError, ProcId, Result, Tag};

/// Per-destination record buffers over one communicator lane.
///
/// [`BufferedExchange::send`] never blocks on the network: records accumulate
/// per destination and ship as one batch once `batch_size` is reached.
/// Records sent before [`BufferedExchange::flush`] are observable through
/// [`BufferedExchange::recv`] on their destination only after the flush is
/// followed by a barrier. Batches from different senders drain in no
/// particular order.
pub struct BufferedExchange<T, C> {
    comm: Arc<C>,
    tag: Tag,
    batch_size: usize,
    outgoing: Vec<Mutex<Vec<T>>>,
    shipped: AtomicU64,
    metrics: Arc<dyn IngressMetrics>,
}

impl<T, C> BufferedExchange<T, C>
where
    T: Send + 'static,
    C: Communicator,
{
    /// Creates an exchange on a freshly allocated lane.
    ///
    /// Must be called collectively, in the same order on every process.
    pub fn new(comm: Arc<C>, batch_size: usize, metrics: Arc<dyn IngressMetrics>) -> Result<Self> {
        if batch_size == 0 {
            return Err(GraphError::Invalid("exchange batch size must be positive"));
        }
        let tag = comm.allocate_tag();
        let outgoing = (0..comm.numprocs()).map(|_| Mutex::new(Vec::new())).collect();
        Ok(Self {
            comm,
            tag,
            batch_size,
            outgoing,
            shipped: AtomicU64::new(0),
            metrics,
        })
    }

    /// Buffers `record` for `dest`, shipping the buffer when it fills up.
    pub fn send(&self, dest: ProcId, record: T) -> Result<()> {
        let buffer = self
            .outgoing
            .get(dest)
            .ok_or(GraphError::Invalid("exchange destination out of range"))?;
        let full = {
            let mut buffer = buffer.lock();
            buffer.push(record);
            if buffer.len() >= self.batch_size {
                Some(mem::replace(&mut *buffer, Vec::with_capacity(self.batch_size)))
            } else {
                None
            }
        };
        match full {
            Some(batch) => self.ship(dest, batch),
            None => Ok(()),
        }
    }

    /// Ships every non-empty buffer.
    pub fn flush(&self) -> Result<()> {
        for (dest, buffer) in self.outgoing.iter().enumerate() {
            let batch = mem::take(&mut *buffer.lock());
            if !batch.is_empty() {
                self.ship(dest, batch)?;
            }
        }
        Ok(())
    }

    /// Pops one arrived batch together with its sender.
    pub fn recv(&self) -> Result<Option<(ProcId, Vec<T>)>> {
        self.comm.recv_batch(self.tag)
    }

    /// Drops unsent records and discards anything still queued for this process.
    pub fn clear(&self) -> Result<()> {
        for buffer in &self.outgoing {
            let mut buffer = buffer.lock();
            buffer.clear();
            buffer.shrink_to_fit();
        }
        while self.recv()?.is_some() {}
        Ok(())
    }

    /// Records currently buffered and not yet shipped.
    pub fn buffered(&self) -> usize {
        self.outgoing.iter().map(|buffer| buffer.lock().len()).sum()
    }

    /// Records shipped by this process so far.
    pub fn shipped(&self) -> u64 {
        self.shipped.load(Ordering::Relaxed)
    }

    fn ship(&self, dest: ProcId, batch: Vec<T>) -> Result<()> {
        let records = batch.len();
        self.comm.send_batch(dest, self.tag, batch)?;
        self.shipped.fetch_add(records as u64, Ordering::Relaxed);
        self.metrics.batch_shipped(records);
        Ok(())
    }
}
