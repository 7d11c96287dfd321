//! Low-level building blocks for the ingress protocol.
//!
//! Includes the communication substrate and the synchronization primitives
//! it is built from.

/// Communication between cooperating processes.
///
/// The [`comm::Communicator`] contract and its in-process implementation.
pub mod comm;

/// Concurrency primitives and synchronization.
///
/// Abortable collective barrier with in-flight call tracking.
pub mod concurrency;
