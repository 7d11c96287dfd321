//! Identifier newtypes and the crate-wide error type.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Global vertex identifier, unique across the whole distributed graph.
#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default, Serialize, Deserialize,
)]
pub struct Vid(pub u64);

/// Dense process-local vertex identifier assigned during ingress.
#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default, Serialize, Deserialize,
)]
pub struct Lvid(pub u32);

/// Rank of a cooperating process, in `0..numprocs`.
pub type ProcId = usize;

/// Identifies an exchange lane or a remote-call endpoint on a communicator.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct Tag(pub u32);

impl Lvid {
    /// Returns the local id as a slice index.
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Builds a local id from a slice index.
    ///
    /// Fails once a process holds more than `u32::MAX` replicas.
    pub fn from_index(index: usize) -> Result<Self> {
        u32::try_from(index)
            .map(Lvid)
            .map_err(|_| GraphError::Invalid("local vertex id space exhausted"))
    }
}

impl fmt::Display for Vid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for Lvid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<u64> for Vid {
    fn from(value: u64) -> Self {
        Vid(value)
    }
}

impl From<Vid> for u64 {
    fn from(value: Vid) -> Self {
        value.0
    }
}

impl From<u32> for Lvid {
    fn from(value: u32) -> Self {
        Lvid(value)
    }
}

/// Errors raised while building or querying a distributed graph.
#[derive(thiserror::Error, Debug)]
pub enum GraphError {
    /// A cross-process protocol invariant does not hold; the graph cannot be trusted.
    #[error("invariant violated: {0}")]
    Invariant(String),
    /// Some process aborted the cluster; carries the first reason raised.
    #[error("cluster aborted: {0}")]
    Aborted(String),
    /// The communication substrate failed underneath the protocol.
    #[error("communication: {0}")]
    Comm(String),
    /// An argument was rejected.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    /// Configuration could not be parsed or validated.
    #[error("config: {0}")]
    Config(String),
    /// I/O failure while loading configuration.
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, GraphError>;

impl GraphError {
    pub(crate) fn invariant(msg: impl Into<String>) -> Self {
        GraphError::Invariant(msg.into())
    }

    pub(crate) fn comm(msg: impl Into<String>) -> Self {
        GraphError::Comm(msg.into())
    }

    /// Returns `true` when the error only reflects an abort raised elsewhere.
    pub fn is_abort(&self) -> bool {
        matches!(self, GraphError::Aborted(_))
    }
}
