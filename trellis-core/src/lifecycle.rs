//! Lifecycle Orchestrator
//!
//! A [`Host`] ties one state instance to the connect/disconnect signals of
//! the component that displays it.
//!
//! # Connect
//!
//! 1. Instrument the instance (first connect only).
//! 2. Run the create hook inside a transaction.
//! 3. Set up the render reaction. It does not render yet.
//! 4. Mount behaviors.
//! 5. Run the mount hook and keep its teardown, if it returned one.
//! 6. Render once. From now on the render reaction re-renders on change.
//!
//! # Disconnect
//!
//! 1. Stop the render reaction.
//! 2. Run the teardown.
//! 3. Run the unmount hook.
//! 4. Dispose the remaining watches.
//! 5. Unmount behaviors.
//!
//! Every hook runs behind its own error boundary, so a failing step never
//! skips the ones after it. Instrumentation is not undone: a later connect
//! reuses the live bindings and runs create and mount again.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::runtime::Handle;

use crate::behavior;
use crate::class::{Class, MountOutcome, Teardown};
use crate::config;
use crate::error::{guarded, ConfigError, ErrorContext, Phase};
use crate::instance::Instance;
use crate::reactive::{transaction, untracked, Reaction};
use crate::render::Renderer;
use crate::value::Value;

/// Where an instance is in its lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    #[default]
    Unmounted,
    Instrumenting,
    Mounted,
}

/// Per-instance lifecycle bookkeeping.
#[derive(Default)]
pub(crate) struct LifecycleSlots {
    state: Mutex<LifecycleState>,
    teardown: Mutex<Option<Teardown>>,
    render: Mutex<Option<Reaction>>,
}

impl Instance {
    pub fn lifecycle_state(&self) -> LifecycleState {
        *self.inner().lifecycle.state.lock()
    }
}

fn context(instance: &Instance, phase: Phase) -> ErrorContext {
    ErrorContext::new(phase, instance.name(), instance.is_behavior())
}

fn set_state(instance: &Instance, state: LifecycleState) {
    *instance.inner().lifecycle.state.lock() = state;
}

/// Move an unmounted instance into `Instrumenting`. `false` if it was not
/// unmounted.
fn begin(instance: &Instance) -> bool {
    let mut state = instance.inner().lifecycle.state.lock();
    if *state != LifecycleState::Unmounted {
        tracing::debug!(class = instance.name(), state = ?*state, "already connected");
        return false;
    }
    *state = LifecycleState::Instrumenting;
    true
}

fn run_create(instance: &Instance) {
    if let Some(hook) = instance.class().create_hook().cloned() {
        guarded(
            || context(instance, Phase::Create),
            || transaction(|| untracked(|| hook(instance))),
        );
    }
}

fn run_mount(instance: &Instance) {
    let Some(hook) = instance.class().mount_hook().cloned() else {
        return;
    };
    match guarded(|| context(instance, Phase::Mount), || hook(instance)) {
        Some(MountOutcome::Teardown(teardown)) => {
            *instance.inner().lifecycle.teardown.lock() = Some(teardown);
        }
        Some(MountOutcome::Pending(future)) => {
            tracing::warn!(
                class = instance.name(),
                is_behavior = instance.is_behavior(),
                "mount hook returned a future; lifecycle hooks must be synchronous and the result is not used as a teardown"
            );
            match Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(future);
                }
                Err(_) => tracing::debug!(class = instance.name(), "no tokio runtime, dropping mount future"),
            }
        }
        Some(MountOutcome::Done) | None => {}
    }
}

/// Teardown, unmount hook, watches, behaviors. Leaves the instance unmounted.
fn unwind(instance: &Instance) {
    let slots = &instance.inner().lifecycle;

    let teardown = slots.teardown.lock().take();
    if let Some(teardown) = teardown {
        guarded(|| context(instance, Phase::Unmount), teardown);
    }

    if let Some(hook) = instance.class().unmount_hook().cloned() {
        guarded(|| context(instance, Phase::Unmount), || hook(instance));
    }

    instance.inner().watches.dispose_all();
    behavior::unmount_all(instance);
    set_state(instance, LifecycleState::Unmounted);
}

pub(crate) fn mount_behavior(behavior: &Instance) {
    if !begin(behavior) {
        return;
    }
    behavior.instrument();
    run_create(behavior);
    behavior::mount_all(behavior);
    run_mount(behavior);
    set_state(behavior, LifecycleState::Mounted);
    tracing::debug!(class = behavior.name(), "behavior mounted");
}

pub(crate) fn unmount_behavior(behavior: &Instance) {
    if behavior.lifecycle_state() == LifecycleState::Unmounted {
        return;
    }
    unwind(behavior);
    tracing::debug!(class = behavior.name(), "behavior unmounted");
}

struct HostInner {
    instance: Instance,
    renderer: Arc<dyn Renderer>,
    target: String,
    renders: AtomicUsize,
}

/// The component shell side of a state instance.
///
/// # Example
///
/// ```rust,ignore
/// let host = Host::builder(&counter)
///     .renderer(Arc::new(|output: RenderOutput, target: &str| println!("{target}: {output:?}")))
///     .build()?;
///
/// host.connect();                          // create, mount, first render
/// host.instance().call("increment", &[])?; // re-renders
/// host.disconnect();
/// ```
#[derive(Clone)]
pub struct Host {
    inner: Arc<HostInner>,
}

impl Host {
    pub fn builder(class: &Arc<Class>) -> HostBuilder {
        HostBuilder {
            class: Arc::clone(class),
            args: Value::Undefined,
            renderer: None,
            target: None,
        }
    }

    pub fn instance(&self) -> &Instance {
        &self.inner.instance
    }

    pub fn target(&self) -> &str {
        &self.inner.target
    }

    pub fn state(&self) -> LifecycleState {
        self.inner.instance.lifecycle_state()
    }

    /// Number of render passes handed to the renderer.
    pub fn render_count(&self) -> usize {
        self.inner.renders.load(Ordering::SeqCst)
    }

    pub fn prop(&self, name: &str) -> Value {
        self.inner.instance.prop(name)
    }

    pub fn set_prop(&self, name: &str, value: impl Into<Value>) {
        self.inner.instance.set_prop(name, value);
    }

    /// Bring the instance up. Does nothing if it is already connected.
    pub fn connect(&self) {
        let instance = &self.inner.instance;
        if !begin(instance) {
            return;
        }
        tracing::debug!(class = instance.name(), target = %self.inner.target, "connecting");

        instance.instrument();
        run_create(instance);

        let host = Arc::downgrade(&self.inner);
        let reaction = Reaction::new(format!("{}.render", instance.name()), move || {
            if let Some(inner) = host.upgrade() {
                Host { inner }.update();
            }
        });
        *instance.inner().lifecycle.render.lock() = Some(reaction);

        behavior::mount_all(instance);
        run_mount(instance);
        set_state(instance, LifecycleState::Mounted);

        self.update();
        tracing::debug!(class = instance.name(), target = %self.inner.target, "connected");
    }

    /// Tear the instance down. Does nothing if it is not connected.
    pub fn disconnect(&self) {
        let instance = &self.inner.instance;
        if instance.lifecycle_state() == LifecycleState::Unmounted {
            tracing::debug!(class = instance.name(), "already disconnected");
            return;
        }

        let reaction = instance.inner().lifecycle.render.lock().take();
        if let Some(reaction) = reaction {
            reaction.dispose();
        }
        unwind(instance);
        tracing::debug!(class = instance.name(), target = %self.inner.target, "disconnected");
    }

    /// Render now and hand the output to the renderer.
    ///
    /// Render failures and panics are not caught.
    pub fn update(&self) {
        let instance = &self.inner.instance;
        let reaction = instance.inner().lifecycle.render.lock().clone();
        let Some(reaction) = reaction else {
            return;
        };

        let output = reaction.track(|| match instance.class().render_fn() {
            Some(render) => render(instance),
            None => Ok(None),
        });
        untracked(|| self.inner.renderer.render_into(output, &self.inner.target));
        self.inner.renders.fetch_add(1, Ordering::SeqCst);
    }
}

impl fmt::Debug for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Host")
            .field("instance", &self.inner.instance)
            .field("target", &self.inner.target)
            .field("state", &self.state())
            .field("renders", &self.render_count())
            .finish()
    }
}

/// Builder for [`Host`].
pub struct HostBuilder {
    class: Arc<Class>,
    args: Value,
    renderer: Option<Arc<dyn Renderer>>,
    target: Option<String>,
}

impl HostBuilder {
    /// Constructor arguments for the state instance.
    pub fn args(mut self, args: impl Into<Value>) -> Self {
        self.args = args.into();
        self
    }

    pub fn renderer(mut self, renderer: Arc<dyn Renderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    /// Name passed to the renderer. Defaults to the class name.
    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Construct the state instance and the host around it.
    ///
    /// Fails if neither the builder nor the global options supply a
    /// renderer.
    pub fn build(self) -> Result<Host, ConfigError> {
        let renderer = self
            .renderer
            .or_else(|| config::current().renderer)
            .ok_or_else(|| ConfigError::NoRenderer(self.class.name().to_owned()))?;

        Ok(Host {
            inner: Arc::new(HostInner {
                instance: Instance::new(&self.class, self.args),
                renderer,
                target: self.target.unwrap_or_else(|| self.class.name().to_owned()),
                renders: AtomicUsize::new(0),
            }),
        })
    }
}

// ---- Tests ----
