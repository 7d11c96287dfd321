use parking_lot::{Condvar, Mutex};

use crate::types::{GraphError, Result};

/// Generation barrier shared by a fixed set of participants, with cluster-wide
/// abort and an in-flight counter for asynchronous calls.
///
/// Every blocking wait observes the abort flag, so once one participant calls
/// [`Rendezvous::abort`] all current and future waiters return
/// [`GraphError::Aborted`] instead of blocking forever.
pub struct Rendezvous {
    parties: usize,
    state: Mutex<State>,
    cond: Condvar,
}

#[derive(Default, Debug)]
struct State {
    arrived: usize,
    generation: u64,
    in_flight: u64,
    aborted: Option<String>,
}

/// Snapshot of rendezvous state for observability.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct RendezvousSnapshot {
    /// Participants currently parked in the barrier.
    pub arrived: usize,
    /// Number of completed barrier rounds.
    pub generation: u64,
    /// Asynchronous calls accepted but not yet completed.
    pub in_flight: u64,
    /// Abort reason, when raised.
    pub aborted: Option<String>,
}

impl Rendezvous {
    /// Creates a rendezvous for `parties` participants.
    pub fn new(parties: usize) -> Self {
        Self {
            parties,
            state: Mutex::new(State::default()),
            cond: Condvar::new(),
        }
    }

    /// Blocks until every participant has arrived for the current generation.
    pub fn wait(&self) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(reason) = state.aborted.as_ref() {
            return Err(GraphError::Aborted(reason.clone()));
        }
        let generation = state.generation;
        state.arrived += 1;
        if state.arrived == self.parties {
            state.arrived = 0;
            state.generation = state.generation.wrapping_add(1);
            self.cond.notify_all();
            return Ok(());
        }
        loop {
            self.cond.wait(&mut state);
            if state.generation != generation {
                return Ok(());
            }
            if let Some(reason) = state.aborted.as_ref() {
                return Err(GraphError::Aborted(reason.clone()));
            }
        }
    }

    /// Records one more outstanding asynchronous call.
    pub fn begin_call(&self) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(reason) = state.aborted.as_ref() {
            return Err(GraphError::Aborted(reason.clone()));
        }
        state.in_flight += 1;
        Ok(())
    }

    /// Marks an asynchronous call as complete, waking drainers at zero.
    pub fn end_call(&self) {
        let mut state = self.state.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
        if state.in_flight == 0 {
            self.cond.notify_all();
        }
    }

    /// Blocks until no asynchronous call is outstanding.
    pub fn drain(&self) -> Result<()> {
        let mut state = self.state.lock();
        loop {
            if let Some(reason) = state.aborted.as_ref() {
                return Err(GraphError::Aborted(reason.clone()));
            }
            if state.in_flight == 0 {
                return Ok(());
            }
            self.cond.wait(&mut state);
        }
    }

    /// Raises the abort flag. The first reason wins; later calls are ignored.
    pub fn abort(&self, reason: impl Into<String>) {
        let mut state = self.state.lock();
        if state.aborted.is_none() {
            state.aborted = Some(reason.into());
        }
        self.cond.notify_all();
    }

    /// Returns the abort reason, if any participant aborted.
    pub fn abort_reason(&self) -> Option<String> {
        self.state.lock().aborted.clone()
    }

    /// Returns a snapshot of the current state.
    pub fn snapshot(&self) -> RendezvousSnapshot {
        let state = self.state.lock();
        RendezvousSnapshot {
            arrived: state.arrived,
            generation: state.generation,
            in_flight: state.in_flight,
            aborted: state.aborted.clone(),
        }
    }
}
