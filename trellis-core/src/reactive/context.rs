//! Tracking Context
//!
//! Each thread keeps a stack of frames, one per computation that is
//! currently evaluating. A read goes to the top frame only, so a memo read
//! from inside a reaction is recorded against the memo, and the memo itself
//! is recorded against the reaction.
//!
//! An untracked frame has no owner. Reads that land on it are dropped, which
//! is how [`untracked`](super::untracked) hides reads from the frames below.

use std::cell::RefCell;

use smallvec::SmallVec;

use crate::graph::NodeId;

/// Reads recorded by one frame, in first-read order.
pub type Reads = SmallVec<[NodeId; 8]>;

struct Frame {
    owner: Option<NodeId>,
    reads: Reads,
}

thread_local! {
    static FRAMES: RefCell<Vec<Frame>> = const { RefCell::new(Vec::new()) };
}

/// A pushed frame. Dropping it pops the frame, also during unwinding.
pub struct ReactiveContext {
    owner: Option<NodeId>,
}

impl ReactiveContext {
    /// Start recording reads for `owner`.
    pub fn enter(owner: NodeId) -> Self {
        Self::push(Some(owner))
    }

    pub fn enter_untracked() -> Self {
        Self::push(None)
    }

    fn push(owner: Option<NodeId>) -> Self {
        FRAMES.with(|frames| {
            frames.borrow_mut().push(Frame {
                owner,
                reads: Reads::new(),
            })
        });
        Self { owner }
    }

    /// The computation reads are currently recorded for.
    pub fn current() -> Option<NodeId> {
        FRAMES.with(|frames| frames.borrow().last().and_then(|frame| frame.owner))
    }

    pub fn is_active() -> bool {
        Self::current().is_some()
    }

    /// Record a read of `source` on the top frame. Repeated reads and a
    /// computation reading itself are ignored.
    pub fn record_read(source: NodeId) {
        FRAMES.with(|frames| {
            let mut frames = frames.borrow_mut();
            let Some(frame) = frames.last_mut() else {
                return;
            };
            match frame.owner {
                Some(owner) if owner != source && !frame.reads.contains(&source) => {
                    frame.reads.push(source)
                }
                _ => {}
            }
        });
    }

    /// What the top frame has read so far.
    pub fn reads() -> Reads {
        FRAMES.with(|frames| {
            frames
                .borrow()
                .last()
                .map(|frame| frame.reads.clone())
                .unwrap_or_default()
        })
    }
}

impl Drop for ReactiveContext {
    fn drop(&mut self) {
        let popped = FRAMES.with(|frames| frames.borrow_mut().pop());
        debug_assert_eq!(
            popped.map(|frame| frame.owner),
            Some(self.owner),
            "tracking frames dropped out of order"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_nest_and_unwind() {
        let (outer, inner) = (NodeId::new(), NodeId::new());
        assert_eq!(ReactiveContext::current(), None);

        let _outer = ReactiveContext::enter(outer);
        {
            let _inner = ReactiveContext::enter(inner);
            assert_eq!(ReactiveContext::current(), Some(inner));
        }
        assert_eq!(ReactiveContext::current(), Some(outer));
    }

    #[test]
    fn reads_are_deduplicated_in_order() {
        let owner = NodeId::new();
        let (a, b) = (NodeId::new(), NodeId::new());
        let _frame = ReactiveContext::enter(owner);

        for source in [a, b, a, owner] {
            ReactiveContext::record_read(source);
        }
        assert_eq!(ReactiveContext::reads().as_slice(), &[a, b]);
    }

    #[test]
    fn untracked_frame_swallows_reads() {
        let owner = NodeId::new();
        let _frame = ReactiveContext::enter(owner);

        {
            let _untracked = ReactiveContext::enter_untracked();
            assert!(!ReactiveContext::is_active());
            ReactiveContext::record_read(NodeId::new());
        }

        assert!(ReactiveContext::is_active());
        assert!(ReactiveContext::reads().is_empty());
    }

    #[test]
    fn reads_outside_any_frame_are_dropped() {
        ReactiveContext::record_read(NodeId::new());
        assert!(ReactiveContext::reads().is_empty());
    }
}
