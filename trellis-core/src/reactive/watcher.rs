//! Expression Reactions
//!
//! [`reaction`] splits a reaction into a tracked *expression* and an
//! untracked *effect*. The effect only runs when the expression produces a
//! different value, and it receives both the new and the previous value.
//!
//! With a delay, invalidations start a timer on the ambient tokio runtime
//! instead of re-evaluating right away; further invalidations while the
//! timer is pending are absorbed, and the expression is evaluated once when
//! it fires. Disposing aborts a pending timer, and the timer task re-checks
//! the disposed flag before touching the reaction.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use super::effect::{Reaction, WeakReaction};
use super::{transaction, untracked};
use crate::error::ConfigError;

/// Scheduling options for [`reaction`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReactionOptions {
    /// Debounce window between an invalidation and re-evaluation.
    pub delay: Option<Duration>,
    /// Invoke the effect once, synchronously, with the initial value.
    pub fire_immediately: bool,
}

impl ReactionOptions {
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn fire_immediately(mut self, fire: bool) -> Self {
        self.fire_immediately = fire;
        self
    }
}

type Timer = Arc<Mutex<Option<JoinHandle<()>>>>;

struct Watcher<T, E, F> {
    expr: E,
    effect: F,
    last: Mutex<Option<T>>,
    delay: Option<(Duration, Handle)>,
    timer: Timer,
    disposed: Arc<AtomicBool>,
}

impl<T, E, F> Watcher<T, E, F>
where
    T: Clone + PartialEq + Send + Sync + 'static,
    E: Fn() -> T + Send + Sync + 'static,
    F: Fn(&T, Option<&T>) + Send + Sync + 'static,
{
    fn invalidate(self: &Arc<Self>, reaction: &Reaction) {
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }
        let Some((delay, handle)) = &self.delay else {
            self.run(reaction);
            return;
        };

        let mut timer = self.timer.lock();
        if timer.as_ref().is_some_and(|pending| !pending.is_finished()) {
            return;
        }

        let watcher = Arc::downgrade(self);
        let reaction = reaction.downgrade();
        let delay = *delay;
        *timer = Some(handle.spawn(async move {
            tokio::time::sleep(delay).await;
            Self::fire(watcher, reaction);
        }));
    }

    fn fire(watcher: Weak<Self>, reaction: WeakReaction) {
        let (Some(watcher), Some(reaction)) = (watcher.upgrade(), reaction.upgrade()) else {
            return;
        };
        if watcher.disposed.load(Ordering::SeqCst) || reaction.is_disposed() {
            return;
        }
        watcher.timer.lock().take();
        watcher.run(&reaction);
    }

    /// Re-evaluate the expression and run the effect if the value changed.
    fn run(&self, reaction: &Reaction) {
        let value = reaction.track(|| (self.expr)());
        let previous = {
            let mut last = self.last.lock();
            if last.as_ref() == Some(&value) {
                return;
            }
            last.replace(value.clone())
        };
        transaction(|| untracked(|| (self.effect)(&value, previous.as_ref())));
    }
}

/// Handle that stops a [`reaction`].
///
/// Disposal is idempotent. Dropping every clone without disposing also
/// stops the reaction.
#[derive(Clone)]
pub struct Disposer {
    reaction: Reaction,
    timer: Timer,
    disposed: Arc<AtomicBool>,
}

impl Disposer {
    /// Stop the reaction and cancel any pending delayed run.
    ///
    /// Returns `false` if it was already disposed.
    pub fn dispose(&self) -> bool {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.reaction.dispose();
        if let Some(pending) = self.timer.lock().take() {
            pending.abort();
        }
        true
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Whether a delayed run is waiting on its timer.
    pub fn has_pending_run(&self) -> bool {
        self.timer
            .lock()
            .as_ref()
            .is_some_and(|pending| !pending.is_finished())
    }

    pub fn reaction(&self) -> &Reaction {
        &self.reaction
    }
}

impl std::fmt::Debug for Disposer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Disposer")
            .field("reaction", &self.reaction)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Run `effect` whenever the value produced by `expr` changes.
///
/// `expr` is tracked; `effect` runs untracked inside a transaction and gets
/// `(new, previous)`. A delay needs a tokio runtime on the calling thread.
///
/// # Example
///
/// ```rust,ignore
/// let count = Signal::new(0);
/// let disposer = reaction(
///     "log-count",
///     move || count.get(),
///     |now, before| println!("{before:?} -> {now}"),
///     ReactionOptions::default(),
/// )?;
/// ```
pub fn reaction<T, E, F>(
    name: impl Into<String>,
    expr: E,
    effect: F,
    options: ReactionOptions,
) -> Result<Disposer, ConfigError>
where
    T: Clone + PartialEq + Send + Sync + 'static,
    E: Fn() -> T + Send + Sync + 'static,
    F: Fn(&T, Option<&T>) + Send + Sync + 'static,
{
    let delay = match options.delay {
        Some(delay) => {
            let handle = Handle::try_current().map_err(|_| ConfigError::NoTimerRuntime)?;
            Some((delay, handle))
        }
        None => None,
    };

    let timer: Timer = Arc::new(Mutex::new(None));
    let disposed = Arc::new(AtomicBool::new(false));
    let watcher = Arc::new(Watcher {
        expr,
        effect,
        last: Mutex::new(None),
        delay,
        timer: Arc::clone(&timer),
        disposed: Arc::clone(&disposed),
    });

    let reaction = Reaction::new_cyclic(name, {
        let watcher = Arc::clone(&watcher);
        move |weak| {
            move || {
                if let Some(reaction) = weak.upgrade() {
                    watcher.invalidate(&reaction);
                }
            }
        }
    });

    let initial = reaction.track(|| (watcher.expr)());
    *watcher.last.lock() = Some(initial.clone());
    if options.fire_immediately {
        transaction(|| untracked(|| (watcher.effect)(&initial, None)));
    }

    Ok(Disposer {
        reaction,
        timer,
        disposed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::Signal;

    #[test]
    fn effect_runs_only_on_value_change() {
        let count = Signal::new(1);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let _disposer = {
            let count = count.clone();
            let seen = seen.clone();
            reaction(
                "parity",
                move || count.get() % 2,
                move |now, before| seen.lock().push((*now, before.copied())),
                ReactionOptions::default(),
            )
            .unwrap()
        };

        count.set(3); // parity unchanged
        count.set(4);
        assert_eq!(*seen.lock(), vec![(0, Some(1))]);
    }

    #[test]
    fn fire_immediately_runs_once_synchronously() {
        let count = Signal::new(7);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let _disposer = {
            let count = count.clone();
            let seen = seen.clone();
            reaction(
                "count",
                move || count.get(),
                move |now, before| seen.lock().push((*now, before.copied())),
                ReactionOptions::default().fire_immediately(true),
            )
            .unwrap()
        };
        assert_eq!(*seen.lock(), vec![(7, None)]);

        count.set(8);
        assert_eq!(*seen.lock(), vec![(7, None), (8, Some(7))]);
    }

    #[test]
    fn delay_without_runtime_is_a_config_error() {
        let result = reaction(
            "no-runtime",
            || 0,
            |_, _| {},
            ReactionOptions::default().delay(Duration::from_millis(10)),
        );
        assert!(matches!(result, Err(ConfigError::NoTimerRuntime)));
    }

    #[test]
    fn dispose_is_idempotent() {
        let count = Signal::new(0);
        let disposer = {
            let count = count.clone();
            reaction("count", move || count.get(), |_, _| {}, ReactionOptions::default())
                .unwrap()
        };
        assert_eq!(count.observer_count(), 1);

        assert!(disposer.dispose());
        assert!(!disposer.dispose());
        assert_eq!(count.observer_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_reaction_coalesces_writes() {
        let count = Signal::new(0);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let _disposer = {
            let count = count.clone();
            let seen = seen.clone();
            reaction(
                "debounced",
                move || count.get(),
                move |now, _| seen.lock().push(*now),
                ReactionOptions::default().delay(Duration::from_millis(50)),
            )
            .unwrap()
        };

        count.set(1);
        count.set(2);
        count.set(3);
        assert!(seen.lock().is_empty());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(*seen.lock(), vec![3]);
    }

    #[tokio::test(start_paused = true)]
    async fn dispose_cancels_pending_timer() {
        let count = Signal::new(0);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let disposer = {
            let count = count.clone();
            let seen = seen.clone();
            reaction(
                "debounced",
                move || count.get(),
                move |now, _| seen.lock().push(*now),
                ReactionOptions::default().delay(Duration::from_millis(50)),
            )
            .unwrap()
        };

        count.set(1);
        assert!(disposer.has_pending_run());
        disposer.dispose();
        assert!(!disposer.has_pending_run());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(seen.lock().is_empty());
    }
}
