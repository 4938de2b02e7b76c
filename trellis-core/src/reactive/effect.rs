//! Reaction and Effect Implementation
//!
//! A [`Reaction`] is the eager node of the graph: it records what a piece of
//! code read through [`Reaction::track`], and when any of that changes the
//! runtime calls its invalidation handler during the next flush. What the
//! handler does is up to the owner; the render loop re-renders, a watch
//! re-evaluates its expression.
//!
//! An [`Effect`] is the common case: a reaction whose invalidation handler
//! simply re-tracks the same function.
//!
//! # Differences from Memo
//!
//! - Memos return a value; reactions do not.
//! - Memos are lazy (compute on access); reactions are eager (run on flush).
//! - Memos cache results; reactions just run their side effect.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use super::context::ReactiveContext;
use super::runtime::{Reactive, Runtime};
use super::untracked;
use crate::graph::NodeId;

struct ReactionInner {
    id: NodeId,
    name: String,
    on_invalidate: Box<dyn Fn() + Send + Sync>,
    disposed: AtomicBool,
    run_count: AtomicUsize,
}

impl Reactive for ReactionInner {
    fn node_id(&self) -> NodeId {
        self.id
    }

    fn mark_stale(&self) {}

    fn schedule(&self) {
        if !self.disposed.load(Ordering::SeqCst) {
            (self.on_invalidate)();
        }
    }

    fn is_eager(&self) -> bool {
        true
    }
}

impl Drop for ReactionInner {
    fn drop(&mut self) {
        Runtime::unregister(self.id);
    }
}

/// A dependency tracker with an invalidation handler.
#[derive(Clone)]
pub struct Reaction {
    inner: Arc<ReactionInner>,
}

/// Non-owning handle to a [`Reaction`].
#[derive(Clone)]
pub struct WeakReaction {
    inner: Weak<ReactionInner>,
}

impl WeakReaction {
    pub fn upgrade(&self) -> Option<Reaction> {
        self.inner.upgrade().map(|inner| Reaction { inner })
    }
}

impl Reaction {
    /// Create a reaction that calls `on_invalidate` whenever something it
    /// tracked changes. Nothing is tracked until [`Reaction::track`] runs.
    pub fn new<F>(name: impl Into<String>, on_invalidate: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self::new_cyclic(name, move |_| on_invalidate)
    }

    /// Like [`Reaction::new`], but the handler is built with a weak handle
    /// to the reaction itself.
    pub fn new_cyclic<B, F>(name: impl Into<String>, build: B) -> Self
    where
        B: FnOnce(WeakReaction) -> F,
        F: Fn() + Send + Sync + 'static,
    {
        let name = name.into();
        let inner = Arc::new_cyclic(|weak: &Weak<ReactionInner>| {
            let handler = build(WeakReaction {
                inner: weak.clone(),
            });
            ReactionInner {
                id: NodeId::new(),
                name,
                on_invalidate: Box::new(handler),
                disposed: AtomicBool::new(false),
                run_count: AtomicUsize::new(0),
            }
        });
        let reactive: Arc<dyn Reactive> = inner.clone();
        Runtime::register(&reactive);
        Self { inner }
    }

    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn downgrade(&self) -> WeakReaction {
        WeakReaction {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Run `f`, replacing this reaction's dependencies with what it reads.
    ///
    /// After disposal `f` still runs, untracked.
    pub fn track<R>(&self, f: impl FnOnce() -> R) -> R {
        if self.is_disposed() {
            return untracked(f);
        }

        let (result, deps) = {
            let _ctx = ReactiveContext::enter(self.inner.id);
            let result = f();
            (result, ReactiveContext::reads())
        };

        if !self.is_disposed() {
            Runtime::commit_dependencies(self.inner.id, &deps);
        }
        self.inner.run_count.fetch_add(1, Ordering::SeqCst);
        result
    }

    /// Stop reacting and leave the graph. Idempotent.
    pub fn dispose(&self) {
        if !self.inner.disposed.swap(true, Ordering::SeqCst) {
            Runtime::unregister(self.inner.id);
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    /// Number of completed [`Reaction::track`] calls.
    pub fn run_count(&self) -> usize {
        self.inner.run_count.load(Ordering::SeqCst)
    }

    /// Number of observables this reaction currently depends on.
    pub fn dependency_count(&self) -> usize {
        Runtime::dependency_count(self.inner.id)
    }
}

impl std::fmt::Debug for Reaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reaction")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("run_count", &self.run_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// A side-effecting computation that re-runs when its dependencies change.
///
/// # Example
///
/// ```rust,ignore
/// let count = Signal::new(0);
///
/// let effect = Effect::new(move || {
///     println!("Count is: {}", count.get());
/// });
///
/// count.set(5);  // Prints: "Count is: 5"
/// ```
#[derive(Clone, Debug)]
pub struct Effect {
    reaction: Reaction,
}

impl Effect {
    /// Create a new effect. The function runs immediately to establish
    /// initial dependencies.
    pub fn new<F>(run: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let effect = Self::new_lazy(run);
        effect.execute();
        effect
    }

    /// Create a new effect without running it.
    pub fn new_lazy<F>(run: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let reaction = Reaction::new_cyclic("effect", move |weak| {
            move || {
                if let Some(reaction) = weak.upgrade() {
                    reaction.track(&run);
                }
            }
        });
        Self { reaction }
    }

    pub fn id(&self) -> NodeId {
        self.reaction.id()
    }

    /// Run the effect function now, re-tracking its dependencies.
    pub fn execute(&self) {
        if !self.reaction.is_disposed() {
            self.reaction.inner.schedule();
        }
    }

    /// Dispose of the effect. After disposal it never runs again.
    pub fn dispose(&self) {
        self.reaction.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        self.reaction.is_disposed()
    }

    /// Get the number of times the effect has run.
    pub fn run_count(&self) -> usize {
        self.reaction.run_count()
    }

    /// Get the number of dependencies.
    pub fn dependency_count(&self) -> usize {
        self.reaction.dependency_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{transaction, Signal};
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicI32;

    #[test]
    fn effect_runs_on_creation() {
        let run_count = Arc::new(AtomicI32::new(0));
        let run_count_clone = run_count.clone();

        let _effect = Effect::new(move || {
            run_count_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(run_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn effect_lazy_does_not_run_on_creation() {
        let effect = Effect::new_lazy(|| {});
        assert_eq!(effect.run_count(), 0);

        effect.execute();
        assert_eq!(effect.run_count(), 1);
    }

    #[test]
    fn effect_reruns_when_dependency_changes() {
        let signal = Signal::new(0);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let effect = {
            let signal = signal.clone();
            let seen = seen.clone();
            Effect::new(move || seen.lock().push(signal.get()))
        };
        assert_eq!(effect.dependency_count(), 1);

        signal.set(1);
        signal.set(2);
        assert_eq!(*seen.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn transaction_coalesces_writes() {
        let a = Signal::new(0);
        let b = Signal::new(0);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let _effect = {
            let (a, b) = (a.clone(), b.clone());
            let seen = seen.clone();
            Effect::new(move || seen.lock().push(a.get() + b.get()))
        };

        transaction(|| {
            a.set(1);
            b.set(2);
        });

        assert_eq!(*seen.lock(), vec![0, 3]);
    }

    #[test]
    fn dynamic_dependencies_drop_stale_branches() {
        let flag = Signal::new(true);
        let left = Signal::new(1);
        let right = Signal::new(2);
        let run_count = Arc::new(AtomicI32::new(0));

        let _effect = {
            let (flag, left, right) = (flag.clone(), left.clone(), right.clone());
            let run_count = run_count.clone();
            Effect::new(move || {
                run_count.fetch_add(1, Ordering::SeqCst);
                if flag.get() {
                    left.get();
                } else {
                    right.get();
                }
            })
        };

        flag.set(false);
        assert_eq!(run_count.load(Ordering::SeqCst), 2);

        // `left` is no longer read
        left.set(10);
        assert_eq!(run_count.load(Ordering::SeqCst), 2);

        right.set(20);
        assert_eq!(run_count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn effect_does_not_run_after_disposal() {
        let signal = Signal::new(0);
        let run_count = Arc::new(AtomicI32::new(0));

        let effect = {
            let signal = signal.clone();
            let run_count = run_count.clone();
            Effect::new(move || {
                signal.get();
                run_count.fetch_add(1, Ordering::SeqCst);
            })
        };

        effect.dispose();
        assert!(effect.is_disposed());
        assert_eq!(signal.observer_count(), 0);

        signal.set(1);
        effect.execute();
        assert_eq!(run_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn reaction_invalidation_handler_runs_on_change() {
        let signal = Signal::new(0);
        let invalidations = Arc::new(AtomicI32::new(0));

        let reaction = {
            let invalidations = invalidations.clone();
            Reaction::new("sampler", move || {
                invalidations.fetch_add(1, Ordering::SeqCst);
            })
        };

        // Nothing tracked yet
        signal.set(1);
        assert_eq!(invalidations.load(Ordering::SeqCst), 0);

        reaction.track(|| signal.get());
        signal.set(2);
        assert_eq!(invalidations.load(Ordering::SeqCst), 1);
        assert_eq!(reaction.name(), "sampler");
    }
}
