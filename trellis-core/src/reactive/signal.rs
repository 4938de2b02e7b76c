//! Signal Implementation
//!
//! A Signal is the mutable reactive cell. It holds a value and an [`Atom`]
//! that tracks which computations depend on it.
//!
//! # How Signals Work
//!
//! 1. When a signal is read within a reactive context (memo/reaction), the
//!    read is recorded against that context.
//!
//! 2. When a signal's value changes, all dependents are notified through the
//!    runtime.
//!
//! 3. An optional equality function suppresses notifications for writes
//!    that do not change the value.

use std::fmt::Debug;
use std::sync::Arc;

use parking_lot::RwLock;

use super::atom::Atom;
use crate::graph::NodeId;

/// Equality test deciding whether a write is a change.
pub type Equality<T> = fn(&T, &T) -> bool;

/// A reactive signal holding a value of type T.
///
/// # Example
///
/// ```rust,ignore
/// let count = Signal::new(0);
///
/// let value = count.get();
///
/// // Update the value (notifies dependents)
/// count.set(5);
/// ```
pub struct Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    atom: Atom,
    value: Arc<RwLock<T>>,
    equals: Option<Equality<T>>,
}

impl<T> Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a new signal that notifies on every write.
    pub fn new(value: T) -> Self {
        Self {
            atom: Atom::new(),
            value: Arc::new(RwLock::new(value)),
            equals: None,
        }
    }

    /// Create a new signal that skips writes `equals` considers unchanged.
    pub fn with_equality(value: T, equals: Equality<T>) -> Self {
        Self {
            equals: Some(equals),
            ..Self::new(value)
        }
    }

    /// Get the signal's graph node.
    pub fn id(&self) -> NodeId {
        self.atom.id()
    }

    /// Get the current value, recording the read in the current context.
    pub fn get(&self) -> T {
        self.atom.report_observed();
        self.value.read().clone()
    }

    /// Borrow the current value, recording the read.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.atom.report_observed();
        f(&self.value.read())
    }

    /// Get the current value without tracking dependencies.
    pub fn get_untracked(&self) -> T {
        self.value.read().clone()
    }

    /// Set a new value and notify dependents.
    ///
    /// Returns `false` when the equality function rejected the write.
    pub fn set(&self, value: T) -> bool {
        {
            let mut guard = self.value.write();
            if let Some(equals) = self.equals {
                if equals(&guard, &value) {
                    return false;
                }
            }
            *guard = value;
        }
        self.atom.report_changed();
        true
    }

    /// Run `f` on a copy of the value. No lock is held while `f` runs, so it
    /// may read this signal.
    fn modified<F>(&self, f: F) -> T
    where
        F: FnOnce(&mut T),
    {
        let mut value = self.value.read().clone();
        f(&mut value);
        value
    }

    /// Mutate the value and notify dependents unconditionally.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut T),
    {
        let value = self.modified(f);
        *self.value.write() = value;
        self.atom.report_changed();
    }

    /// Mutate the value without notifying anyone.
    pub fn update_silent<F>(&self, f: F)
    where
        F: FnOnce(&mut T),
    {
        let value = self.modified(f);
        *self.value.write() = value;
    }

    /// Mutate the value, notifying only if `equals` says it differs from
    /// its state before the mutation.
    pub fn update_if_changed<F>(&self, f: F) -> bool
    where
        F: FnOnce(&mut T),
    {
        let before = self.value.read().clone();
        let mut after = before.clone();
        f(&mut after);
        let changed = match self.equals {
            Some(equals) => !equals(&before, &after),
            None => true,
        };
        *self.value.write() = after;
        if changed {
            self.atom.report_changed();
        }
        changed
    }

    /// Get the number of computations observing this signal.
    pub fn observer_count(&self) -> usize {
        self.atom.observer_count()
    }
}

impl<T> Clone for Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            atom: self.atom.clone(),
            value: Arc::clone(&self.value),
            equals: self.equals,
        }
    }
}

impl<T> Debug for Signal<T>
where
    T: Clone + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.id())
            .field("value", &self.get_untracked())
            .field("observers", &self.observer_count())
            .finish()
    }
}
