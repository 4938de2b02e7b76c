//! Dependency Graph
//!
//! This module implements the dependency graph that tracks relationships
//! between observable sources and the computations reading them.
//!
//! Edges point from what was read to what read it: a memo that reads a
//! signal gets an edge `signal -> memo`. Every node keeps both edge sets,
//! so a computation can drop its old inputs before re-tracking and a write
//! can walk straight to its readers.
//!
//! [`UpdateScheduler::mark_changed`] returns the readers of a changed source
//! in topological order. The runtime marks derived nodes stale and queues
//! reaction nodes; nothing recomputes here.
//!
//! Edge sets are insertion ordered, so reactions subscribed to the same
//! source are queued in subscription order.

mod node;
mod scheduler;

pub use node::{Node, NodeId, NodeKind};
pub use scheduler::UpdateScheduler;
