//! Reactive Primitives
//!
//! This module implements the reactive engine the state layer is built on:
//! atoms, signals, memos, reactions, and transactions.
//!
//! # Concepts
//!
//! ## Atoms and Signals
//!
//! An [`Atom`] is an observable node without a value. A [`Signal`] pairs an
//! atom with a value. Reading either inside a tracking context registers the
//! read; writing notifies every computation that depends on it.
//!
//! ## Memos
//!
//! A [`Memo`] is a derived value that caches its result and re-evaluates only
//! when one of its dependencies changed.
//!
//! ## Reactions
//!
//! A [`Reaction`] records what some code read and is invalidated when any of
//! it changes. [`Effect`] re-runs a function on invalidation; [`reaction`]
//! compares an expression's value and runs an effect on change, optionally
//! debounced.
//!
//! ## Transactions
//!
//! [`transaction`] batches writes: reactions scheduled inside it run once,
//! when the outermost transaction closes. Outside a transaction each write
//! flushes immediately.
//!
//! # Implementation Notes
//!
//! Dependency tracking uses a thread-local context stack; when an observable
//! is read, the read is recorded against the innermost tracking frame. The
//! graph itself lives in [`crate::graph`].

mod atom;
mod context;
mod effect;
mod memo;
mod runtime;
mod signal;
mod watcher;

pub use atom::Atom;
pub use context::ReactiveContext;
pub use effect::{Effect, Reaction, WeakReaction};
pub use memo::{Memo, MemoState};
pub use runtime::{Reactive, Runtime, MAX_FLUSH_PASSES};
pub use signal::{Equality, Signal};
pub use watcher::{reaction, Disposer, ReactionOptions};

/// Run `f` as a single transaction.
///
/// Reactions invalidated by writes inside `f` run once, after the outermost
/// transaction returns.
pub fn transaction<R>(f: impl FnOnce() -> R) -> R {
    Runtime::batch(f)
}

/// Run `f` without recording any reads against the current computation.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    let _ctx = ReactiveContext::enter_untracked();
    f()
}
