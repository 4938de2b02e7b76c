//! Graph Nodes
//!
//! A node is one observable or one computation. It records the nodes it
//! reads (`inputs`) and the nodes that read it (`readers`); the scheduler
//! keeps the two sides consistent.

use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexSet;

/// Identity of a graph node. Ids are never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

impl NodeId {
    pub fn new() -> Self {
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

/// What a node stands for, which decides what a change does to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Atoms, signals and prop containers. Never has inputs.
    Source,
    /// A memo: marked stale on change, recomputed on the next read.
    Derived,
    /// A reaction: queued on change. Nothing reads a reaction.
    Reaction,
}

#[derive(Debug)]
pub struct Node {
    id: NodeId,
    kind: NodeKind,
    inputs: IndexSet<NodeId>,
    readers: IndexSet<NodeId>,
}

impl Node {
    pub fn new(id: NodeId, kind: NodeKind) -> Self {
        Self {
            id,
            kind,
            inputs: IndexSet::new(),
            readers: IndexSet::new(),
        }
    }

    /// A node of `kind` under a fresh id.
    pub fn fresh(kind: NodeKind) -> Self {
        Self::new(NodeId::new(), kind)
    }

    pub fn source() -> Self {
        Self::fresh(NodeKind::Source)
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn inputs(&self) -> &IndexSet<NodeId> {
        &self.inputs
    }

    pub fn readers(&self) -> &IndexSet<NodeId> {
        &self.readers
    }

    pub(crate) fn link_input(&mut self, input: NodeId) {
        self.inputs.insert(input);
    }

    pub(crate) fn unlink_input(&mut self, input: NodeId) {
        self.inputs.shift_remove(&input);
    }

    pub(crate) fn link_reader(&mut self, reader: NodeId) {
        self.readers.insert(reader);
    }

    pub(crate) fn unlink_reader(&mut self, reader: NodeId) {
        self.readers.shift_remove(&reader);
    }

    /// Empty the input set and hand back what it held.
    pub(crate) fn take_inputs(&mut self) -> IndexSet<NodeId> {
        std::mem::take(&mut self.inputs)
    }
}
