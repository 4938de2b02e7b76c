//! State Instances
//!
//! An [`Instance`] is one live object of a [`Class`]. Construction is cheap:
//! fields are filled from their initializers and props go to a plain
//! container. Nothing is reactive yet.
//!
//! # How Instrumentation Works
//!
//! [`Instance::instrument`] runs once per instance and, in order:
//!
//! 1. materializes the prop container into its observable form,
//! 2. discovers embedded behaviors among the enumerable fields and
//!    instruments them,
//! 3. applies the class plan: state fields become signals, computed getters
//!    become memos, actions become cached [`BoundAction`]s.
//!
//! Reads through [`Instance::get`] are tracked once the member is live;
//! writes notify the computations that read it. Members that stay inert
//! behave like plain fields, getters and methods.

use std::fmt;
use std::sync::{Arc, OnceLock, Weak};

use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;

use crate::behavior;
use crate::class::{Class, Method};
use crate::config;
use crate::error::StateError;
use crate::lifecycle::LifecycleSlots;
use crate::plan::{Plan, Role};
use crate::props::PropBridge;
use crate::reactive::{transaction, untracked, Memo, Runtime, Signal};
use crate::value::{Function, Value};
use crate::watch::WatchList;

enum Slot {
    Plain(Value),
    Observable(Signal<Value>, Role),
}

fn observable(value: Value, role: Role) -> Slot {
    let equals = match role {
        Role::StructuralState => Value::structurally_equal,
        _ => Value::same_reference,
    };
    Slot::Observable(Signal::with_equality(value, equals), role)
}

pub(crate) struct InstanceInner {
    class: Arc<Class>,
    behavior: bool,
    fields: RwLock<IndexMap<String, Slot>>,
    props: PropBridge,
    plan: OnceLock<Arc<Plan>>,
    promoted: RwLock<IndexMap<String, Role>>,
    computed: RwLock<IndexMap<String, Memo<Value>>>,
    actions: RwLock<IndexMap<String, BoundAction>>,
    methods: RwLock<IndexMap<String, Function>>,
    behaviors: RwLock<Vec<Instance>>,
    pub(crate) lifecycle: LifecycleSlots,
    pub(crate) watches: WatchList,
}

/// Handle to a state instance. Clones share the same instance.
#[derive(Clone)]
pub struct Instance {
    inner: Arc<InstanceInner>,
}

/// Non-owning handle to an [`Instance`].
#[derive(Clone)]
pub struct WeakInstance {
    inner: Weak<InstanceInner>,
}

impl WeakInstance {
    pub fn upgrade(&self) -> Option<Instance> {
        self.inner.upgrade().map(|inner| Instance { inner })
    }
}

impl fmt::Debug for WeakInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.upgrade() {
            Some(instance) => write!(f, "WeakInstance({})", instance.name()),
            None => f.write_str("WeakInstance(dropped)"),
        }
    }
}

impl Instance {
    /// Construct an instance of `class`. Field initializers receive `args`.
    pub fn new(class: &Arc<Class>, args: impl Into<Value>) -> Self {
        Self::with_kind(class, args.into(), class.is_behavior())
    }

    pub(crate) fn with_kind(class: &Arc<Class>, args: Value, behavior: bool) -> Self {
        let props = PropBridge::new();
        let mut fields = IndexMap::new();
        for field in class.instance_fields() {
            let value = field.init().produce(&args);
            if class.is_prop(field.name()) {
                props.set(field.name(), value);
            } else {
                fields.insert(field.name().to_owned(), Slot::Plain(value));
            }
        }

        Self {
            inner: Arc::new(InstanceInner {
                class: Arc::clone(class),
                behavior,
                fields: RwLock::new(fields),
                props,
                plan: OnceLock::new(),
                promoted: RwLock::new(IndexMap::new()),
                computed: RwLock::new(IndexMap::new()),
                actions: RwLock::new(IndexMap::new()),
                methods: RwLock::new(IndexMap::new()),
                behaviors: RwLock::new(Vec::new()),
                lifecycle: LifecycleSlots::default(),
                watches: WatchList::default(),
            }),
        }
    }

    pub(crate) fn inner(&self) -> &InstanceInner {
        &self.inner
    }

    pub fn class(&self) -> &Arc<Class> {
        &self.inner.class
    }

    pub fn name(&self) -> &str {
        self.inner.class.name()
    }

    pub fn is_behavior(&self) -> bool {
        self.inner.behavior
    }

    pub fn ptr_eq(&self, other: &Instance) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn downgrade(&self) -> WeakInstance {
        WeakInstance {
            inner: Arc::downgrade(&self.inner),
        }
    }

    // ---- Instrumentation ----

    /// Make the instance reactive. Later calls return the same plan.
    pub fn instrument(&self) -> Arc<Plan> {
        Arc::clone(self.inner.plan.get_or_init(|| self.apply_plan()))
    }

    pub fn is_instrumented(&self) -> bool {
        self.inner.plan.get().is_some()
    }

    /// The applied plan, once instrumented.
    pub fn plan(&self) -> Option<Arc<Plan>> {
        self.inner.plan.get().cloned()
    }

    /// Role `member` was bound with. This is the plan's role unless an
    /// inferred state field turned out to hold a behavior.
    pub fn role(&self, member: &str) -> Option<Role> {
        if let Some(role) = self.inner.promoted.read().get(member) {
            return Some(*role);
        }
        self.inner.plan.get().and_then(|plan| plan.role(member))
    }

    /// Behaviors discovered at instrumentation.
    pub fn behaviors(&self) -> Vec<Instance> {
        self.inner.behaviors.read().clone()
    }

    fn apply_plan(&self) -> Arc<Plan> {
        let class = &self.inner.class;
        let mode = class.mode().unwrap_or_else(|| config::current().mode);
        let plan = class.plan(mode);

        self.inner.props.materialize();

        let behaviors = behavior::discover(self);
        for behavior in &behaviors {
            behavior.instrument();
        }
        *self.inner.behaviors.write() = behaviors;

        for (member, role) in plan.iter() {
            self.bind(&plan, member, role);
        }

        tracing::debug!(
            class = class.name(),
            ?mode,
            members = plan.len(),
            behaviors = self.inner.behaviors.read().len(),
            "instrumented instance"
        );
        plan
    }

    fn bind(&self, plan: &Plan, member: &str, role: Role) {
        let class = &self.inner.class;
        match role {
            Role::Computed => {
                if let Some(getter) = class.getter(member).cloned() {
                    let weak = self.downgrade();
                    let memo = Memo::new(move || {
                        weak.upgrade().map(|this| getter(&this)).unwrap_or_default()
                    });
                    self.inner.computed.write().insert(member.to_owned(), memo);
                }
            }
            Role::Action => {
                if let Some(method) = class.method(member).cloned() {
                    let action = BoundAction::new(self, member, method);
                    self.inner.actions.write().insert(member.to_owned(), action);
                }
            }
            Role::Inert => {}
            _ => {
                let mut fields = self.inner.fields.write();
                if let Some(slot) = fields.get_mut(member) {
                    if let Slot::Plain(value) = slot {
                        let value = std::mem::take(value);
                        let holds_behavior =
                            matches!(&value, Value::Instance(inner) if inner.is_behavior());
                        let role = if holds_behavior && !plan.is_annotated(member) {
                            self.inner
                                .promoted
                                .write()
                                .insert(member.to_owned(), Role::ReferenceState);
                            Role::ReferenceState
                        } else {
                            role
                        };
                        *slot = observable(value, role);
                    }
                }
            }
        }
    }

    /// Current value of every enumerable field, read untracked.
    pub(crate) fn enumerable_fields(&self) -> Vec<(String, Value)> {
        let hidden: Vec<&str> = self
            .inner
            .class
            .instance_fields()
            .into_iter()
            .filter(|field| !field.is_enumerable())
            .map(|field| field.name())
            .collect();
        self.inner
            .fields
            .read()
            .iter()
            .filter(|(name, _)| !hidden.contains(&name.as_str()))
            .map(|(name, slot)| {
                let value = match slot {
                    Slot::Plain(value) => value.clone(),
                    Slot::Observable(signal, _) => signal.get_untracked(),
                };
                (name.clone(), value)
            })
            .collect()
    }

    // ---- Member access ----

    fn unknown(&self, member: &str) -> StateError {
        StateError::UnknownMember {
            class: self.name().to_owned(),
            member: member.to_owned(),
        }
    }

    fn read_only(&self, member: &str) -> StateError {
        StateError::ReadOnly {
            class: self.name().to_owned(),
            member: member.to_owned(),
        }
    }

    fn is_prop(&self, member: &str) -> bool {
        self.inner.class.is_prop(member) || self.inner.props.contains(member)
    }

    fn is_derived(&self, member: &str) -> bool {
        self.inner.class.getter(member).is_some() || self.inner.class.method(member).is_some()
    }

    /// Read a member. Live state and computed members record the read.
    pub fn get(&self, member: &str) -> Result<Value, StateError> {
        let signal = match self.inner.fields.read().get(member) {
            Some(Slot::Plain(value)) => return Ok(value.clone()),
            Some(Slot::Observable(signal, _)) => Some(signal.clone()),
            None => None,
        };
        if let Some(signal) = signal {
            return Ok(signal.get());
        }
        if self.is_prop(member) {
            return Ok(self.inner.props.get(member));
        }

        let memo = self.inner.computed.read().get(member).cloned();
        if let Some(memo) = memo {
            return Ok(memo.get());
        }
        if let Some(getter) = self.inner.class.getter(member) {
            return Ok(getter(self));
        }

        if let Some(action) = self.action(member) {
            return Ok(action.into());
        }
        if let Some(function) = self.method_handle(member) {
            return Ok(function.into());
        }
        Err(self.unknown(member))
    }

    /// Callable for a method that is not an action. Built once per member,
    /// so repeated reads return the same function.
    fn method_handle(&self, member: &str) -> Option<Function> {
        if let Some(function) = self.inner.methods.read().get(member) {
            return Some(function.clone());
        }
        let method = self.inner.class.method(member)?.clone();
        let weak = self.downgrade();
        let function = self
            .inner
            .methods
            .write()
            .entry(member.to_owned())
            .or_insert_with(|| {
                Function::new(move |args| {
                    weak.upgrade().map(|this| method(&this, args)).unwrap_or_default()
                })
            })
            .clone();
        Some(function)
    }

    /// Read a member and deserialize it.
    pub fn get_as<T: DeserializeOwned>(&self, member: &str) -> Result<T, StateError> {
        self.get(member)?
            .deserialize()
            .map_err(|source| StateError::Deserialize {
                member: member.to_owned(),
                source,
            })
    }

    /// Replace a member's value.
    pub fn set(&self, member: &str, value: impl Into<Value>) -> Result<(), StateError> {
        let value = value.into();
        let signal = match self.inner.fields.write().get_mut(member) {
            Some(Slot::Plain(slot)) => {
                *slot = value;
                return Ok(());
            }
            Some(Slot::Observable(signal, _)) => Some(signal.clone()),
            None => None,
        };
        if let Some(signal) = signal {
            signal.set(value);
            return Ok(());
        }
        if self.is_prop(member) {
            self.inner.props.set(member, value);
            return Ok(());
        }
        if self.is_derived(member) {
            return Err(self.read_only(member));
        }
        Err(self.unknown(member))
    }

    /// Mutate a member. `f` works on a copy and may read the instance.
    ///
    /// Reference state is mutated silently and structural state only
    /// notifies when the value actually changed.
    pub fn update<F>(&self, member: &str, f: F) -> Result<(), StateError>
    where
        F: FnOnce(&mut Value),
    {
        let (plain, observed) = match self.inner.fields.read().get(member) {
            Some(Slot::Plain(value)) => (Some(value.clone()), None),
            Some(Slot::Observable(signal, role)) => (None, Some((signal.clone(), *role))),
            None => (None, None),
        };
        if let Some(mut value) = plain {
            f(&mut value);
            return self.set(member, value);
        }
        if let Some((signal, role)) = observed {
            match role {
                Role::ReferenceState => signal.update_silent(f),
                Role::StructuralState => {
                    signal.update_if_changed(f);
                }
                _ => signal.update(f),
            }
            return Ok(());
        }
        if self.is_prop(member) {
            self.inner.props.update(member, f);
            return Ok(());
        }
        if self.is_derived(member) {
            return Err(self.read_only(member));
        }
        Err(self.unknown(member))
    }

    /// Call a method or a function-valued field.
    pub fn call(&self, member: &str, args: &[Value]) -> Result<Value, StateError> {
        let not_callable = || StateError::NotCallable {
            class: self.name().to_owned(),
            member: member.to_owned(),
        };
        if self.inner.fields.read().contains_key(member) {
            return match self.get(member)? {
                Value::Function(function) => Ok(function.call(args)),
                _ => Err(not_callable()),
            };
        }
        if let Some(action) = self.action(member) {
            return Ok(action.call(args));
        }
        if let Some(method) = self.inner.class.method(member) {
            return Ok(method(self, args));
        }
        if self.is_prop(member) || self.inner.class.getter(member).is_some() {
            return Err(not_callable());
        }
        Err(self.unknown(member))
    }

    /// The bound action for `member`, if it was instrumented as one.
    ///
    /// Every call returns a handle to the same function.
    pub fn action(&self, member: &str) -> Option<BoundAction> {
        self.inner.actions.read().get(member).cloned()
    }

    // ---- Props ----

    /// Read a prop. Unset props read as [`Value::Undefined`].
    pub fn prop(&self, name: &str) -> Value {
        self.inner.props.get(name)
    }

    pub fn prop_as<T: DeserializeOwned>(&self, name: &str) -> Result<T, StateError> {
        self.prop(name)
            .deserialize()
            .map_err(|source| StateError::Deserialize {
                member: name.to_owned(),
                source,
            })
    }

    /// Write a prop. Any name is accepted.
    pub fn set_prop(&self, name: &str, value: impl Into<Value>) {
        self.inner.props.set(name, value.into());
    }

    /// Write several props with at most one notification.
    pub fn set_props<I, K, V>(&self, props: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        self.inner
            .props
            .set_many(props.into_iter().map(|(k, v)| (k.into(), v.into())));
    }

    /// Snapshot of every prop written so far.
    pub fn props(&self) -> IndexMap<String, Value> {
        self.inner.props.entries()
    }

    // ---- Introspection ----

    /// Number of computations observing `member`.
    pub fn observer_count(&self, member: &str) -> usize {
        if let Some(Slot::Observable(signal, _)) = self.inner.fields.read().get(member) {
            return signal.observer_count();
        }
        if let Some(memo) = self.inner.computed.read().get(member) {
            return Runtime::observer_count(memo.id());
        }
        if self.is_prop(member) {
            return self.inner.props.observer_count();
        }
        0
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("class", &self.name())
            .field("behavior", &self.inner.behavior)
            .field("instrumented", &self.is_instrumented())
            .finish()
    }
}

/// A method bound to its instance once, at instrumentation.
///
/// Calls run inside a transaction and do not record reads, so an action
/// invoked from a render or a watch expression never subscribes it.
#[derive(Clone)]
pub struct BoundAction {
    name: Arc<str>,
    function: Function,
}

impl BoundAction {
    fn new(instance: &Instance, name: &str, method: Method) -> Self {
        let weak = instance.downgrade();
        let function = Function::new(move |args| match weak.upgrade() {
            Some(this) => transaction(|| untracked(|| method(&this, args))),
            None => Value::Undefined,
        });
        Self {
            name: name.into(),
            function,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(&self, args: &[Value]) -> Value {
        self.function.call(args)
    }

    pub fn function(&self) -> &Function {
        &self.function
    }

    pub fn ptr_eq(&self, other: &BoundAction) -> bool {
        self.function.ptr_eq(&other.function)
    }
}

impl From<BoundAction> for Value {
    fn from(action: BoundAction) -> Self {
        Value::Function(action.function)
    }
}

impl fmt::Debug for BoundAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("BoundAction").field(&self.name).finish()
    }
}

// ---- Tests ----
