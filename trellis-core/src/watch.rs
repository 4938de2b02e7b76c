//! Watch Facility
//!
//! [`Instance::watch`] subscribes a callback to an expression over the
//! instance. The subscription belongs to the instance: it is kept in the
//! instance's watch list until its handle disposes it, and whatever is left
//! is disposed when the instance unmounts.
//!
//! Callback failures are routed with [`Phase::Watch`] and leave the
//! subscription running.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::error::{guarded, ConfigError, ErrorContext, HookError, Phase};
use crate::instance::{Instance, WeakInstance};
use crate::reactive::{reaction, Disposer, ReactionOptions};
use crate::value::Value;

/// Options for [`Instance::watch`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchOptions {
    /// Debounce window. Changes inside it collapse into one callback that
    /// sees the last value.
    pub delay: Option<Duration>,
    /// Call back once, synchronously, with the current value.
    pub fire_immediately: bool,
}

impl WatchOptions {
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn delay_ms(self, millis: u64) -> Self {
        self.delay(Duration::from_millis(millis))
    }

    pub fn fire_immediately(mut self) -> Self {
        self.fire_immediately = true;
        self
    }
}

impl From<WatchOptions> for ReactionOptions {
    fn from(options: WatchOptions) -> Self {
        ReactionOptions {
            delay: options.delay,
            fire_immediately: options.fire_immediately,
        }
    }
}

#[derive(Default)]
pub(crate) struct WatchList {
    next_id: AtomicU64,
    entries: Mutex<IndexMap<u64, Disposer>>,
}

impl WatchList {
    fn insert(&self, disposer: Disposer) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().insert(id, disposer);
        id
    }

    fn remove(&self, id: u64) {
        self.entries.lock().shift_remove(&id);
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Dispose every remaining subscription.
    pub(crate) fn dispose_all(&self) {
        let entries = std::mem::take(&mut *self.entries.lock());
        if !entries.is_empty() {
            tracing::debug!(count = entries.len(), "disposing watches");
        }
        for disposer in entries.into_values() {
            disposer.dispose();
        }
    }
}

/// Handle to one watch subscription.
#[derive(Debug, Clone)]
pub struct WatchHandle {
    id: u64,
    owner: WeakInstance,
    disposer: Disposer,
}

impl WatchHandle {
    /// Stop the subscription, cancel a pending delayed callback and drop it
    /// from its instance. Later calls do nothing.
    pub fn dispose(&self) {
        if self.disposer.dispose() {
            if let Some(owner) = self.owner.upgrade() {
                owner.inner().watches.remove(self.id);
            }
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposer.is_disposed()
    }

    /// Whether a delayed callback is waiting on its timer.
    pub fn has_pending_run(&self) -> bool {
        self.disposer.has_pending_run()
    }
}

impl Instance {
    /// Call `callback(instance, new, old)` whenever `expression` yields a
    /// different value.
    ///
    /// `old` is [`Value::Undefined`] for the immediate call. A delay needs a
    /// tokio runtime on the calling thread.
    ///
    /// ```rust,ignore
    /// instance.watch(
    ///     |s| s.get("query").unwrap_or_default(),
    ///     |s, query, _| s.call("search", &[query.clone()]).map(drop).map_err(Into::into),
    ///     WatchOptions::default().delay_ms(300),
    /// )?;
    /// ```
    pub fn watch<E, C>(
        &self,
        expression: E,
        callback: C,
        options: WatchOptions,
    ) -> Result<WatchHandle, ConfigError>
    where
        E: Fn(&Instance) -> Value + Send + Sync + 'static,
        C: Fn(&Instance, &Value, &Value) -> Result<(), HookError> + Send + Sync + 'static,
    {
        let name = self.name().to_owned();
        let is_behavior = self.is_behavior();
        let reader = self.downgrade();
        let owner = self.downgrade();

        let disposer = reaction(
            format!("{name}.watch"),
            move || reader.upgrade().map(|this| expression(&this)).unwrap_or_default(),
            move |now: &Value, before: Option<&Value>| {
                let Some(this) = owner.upgrade() else {
                    return;
                };
                let before = before.cloned().unwrap_or_default();
                guarded(
                    || ErrorContext::new(Phase::Watch, name.clone(), is_behavior),
                    || callback(&this, now, &before),
                );
            },
            options.into(),
        )?;

        let id = self.inner().watches.insert(disposer.clone());
        Ok(WatchHandle {
            id,
            owner: self.downgrade(),
            disposer,
        })
    }

    /// Number of live watch subscriptions.
    pub fn watch_count(&self) -> usize {
        self.inner().watches.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::Class;
    use crate::config::{self, Options};
    use serial_test::serial;
    use std::sync::Arc;

    type Seen = Arc<Mutex<Vec<(Value, Value)>>>;

    fn counter() -> Instance {
        let class = Class::builder("Counter").field("count", 0).build().unwrap();
        let instance = Instance::new(&class, Value::Undefined);
        instance.instrument();
        instance
    }

    fn record(seen: &Seen) -> impl Fn(&Instance, &Value, &Value) -> Result<(), HookError> {
        let seen = seen.clone();
        move |_, now, before| {
            seen.lock().push((now.clone(), before.clone()));
            Ok(())
        }
    }

    #[test]
    fn callback_sees_new_and_old_values() {
        let instance = counter();
        let seen = Seen::default();
        let _handle = instance
            .watch(|s| s.get("count").unwrap(), record(&seen), WatchOptions::default())
            .unwrap();

        instance.set("count", 1).unwrap();
        instance.set("count", 2).unwrap();
        assert_eq!(
            *seen.lock(),
            vec![
                (Value::from(1), Value::from(0)),
                (Value::from(2), Value::from(1))
            ]
        );
    }

    #[test]
    fn fire_immediately_calls_back_once_up_front() {
        let instance = counter();
        let seen = Seen::default();
        let _handle = instance
            .watch(
                |s| s.get("count").unwrap(),
                record(&seen),
                WatchOptions::default().fire_immediately(),
            )
            .unwrap();
        assert_eq!(*seen.lock(), vec![(Value::from(0), Value::Undefined)]);

        instance.set("count", 5).unwrap();
        assert_eq!(seen.lock().len(), 2);
        assert_eq!(seen.lock()[1], (Value::from(5), Value::from(0)));
    }

    #[test]
    fn double_dispose_is_a_no_op() {
        let instance = counter();
        let seen = Seen::default();
        let handle = instance
            .watch(|s| s.get("count").unwrap(), record(&seen), WatchOptions::default())
            .unwrap();
        let other = instance
            .watch(|s| s.get("count").unwrap(), record(&seen), WatchOptions::default())
            .unwrap();
        assert_eq!(instance.watch_count(), 2);

        handle.dispose();
        handle.dispose();
        assert!(handle.is_disposed());
        assert_eq!(instance.watch_count(), 1);
        assert!(!other.is_disposed());

        instance.set("count", 1).unwrap();
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn dispose_all_stops_every_watch() {
        let instance = counter();
        let seen = Seen::default();
        let handle = instance
            .watch(|s| s.get("count").unwrap(), record(&seen), WatchOptions::default())
            .unwrap();

        instance.inner().watches.dispose_all();
        assert!(handle.is_disposed());
        assert_eq!(instance.watch_count(), 0);
        assert_eq!(instance.observer_count("count"), 0);

        handle.dispose();
        instance.set("count", 1).unwrap();
        assert!(seen.lock().is_empty());
    }

    #[test]
    #[serial]
    fn failing_callbacks_are_routed_and_keep_watching() {
        let routed = Arc::new(Mutex::new(Vec::new()));
        {
            let routed = routed.clone();
            config::configure(Options::default().on_error(move |error, context| {
                routed.lock().push((context.clone(), error.to_string()));
            }));
        }
        let instance = counter();
        let calls = Arc::new(AtomicU64::new(0));
        let _handle = {
            let calls = calls.clone();
            instance
                .watch(
                    |s| s.get("count").unwrap(),
                    move |_, _, _| {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Err("callback failed".into())
                    },
                    WatchOptions::default(),
                )
                .unwrap()
        };

        instance.set("count", 1).unwrap();
        instance.set("count", 2).unwrap();
        config::reset();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let routed = routed.lock();
        assert_eq!(routed.len(), 2);
        assert_eq!(routed[0].0, ErrorContext::new(Phase::Watch, "Counter", false));
        assert_eq!(routed[0].1, "callback failed");
    }

    #[test]
    fn delay_without_runtime_is_a_config_error() {
        let instance = counter();
        let result = instance.watch(
            |s| s.get("count").unwrap(),
            |_, _, _| Ok(()),
            WatchOptions::default().delay_ms(10),
        );
        assert!(matches!(result, Err(ConfigError::NoTimerRuntime)));
        assert_eq!(instance.watch_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_watch_sees_the_last_write() {
        let instance = counter();
        let seen = Seen::default();
        let handle = instance
            .watch(
                |s| s.get("count").unwrap(),
                record(&seen),
                WatchOptions::default().delay_ms(50),
            )
            .unwrap();

        for n in 1..=5 {
            instance.set("count", n).unwrap();
        }
        assert!(handle.has_pending_run());
        assert!(seen.lock().is_empty());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(*seen.lock(), vec![(Value::from(5), Value::from(0))]);
    }

    #[tokio::test(start_paused = true)]
    async fn dispose_cancels_a_pending_callback() {
        let instance = counter();
        let seen = Seen::default();
        let handle = instance
            .watch(
                |s| s.get("count").unwrap(),
                record(&seen),
                WatchOptions::default().delay_ms(50),
            )
            .unwrap();

        instance.set("count", 1).unwrap();
        handle.dispose();
        handle.dispose();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(seen.lock().is_empty());
    }
}
