//! Class descriptors.
//!
//! A [`Class`] is the runtime description of a state type: its instance
//! fields, getters, methods and props, its explicit annotations, and its
//! lifecycle hook slots. Classes form inheritance chains through
//! [`ClassBuilder::extends`]; lookups walk from the most-derived class to the
//! base, so a subclass overrides what it redefines.
//!
//! ```rust,ignore
//! let counter = Class::builder("Counter")
//!     .field("count", 0)
//!     .getter("double", |s| Value::from(s.get_as::<i64>("count").unwrap_or(0) * 2))
//!     .method("increment", |s, _| {
//!         s.update("count", |v| *v = Value::from(v.as_i64().unwrap_or(0) + 1)).ok();
//!         Value::Undefined
//!     })
//!     .render(|s| Ok(Some(json!({ "text": s.get("count")?.as_i64() }))))
//!     .build()?;
//! ```

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use futures_util::future::BoxFuture;
use indexmap::{IndexMap, IndexSet};

use crate::error::{ClassError, HookError};
use crate::instance::Instance;
use crate::plan::{self, Mode, Plan, Role};
use crate::render::RenderOutput;
use crate::value::{Function, Value};

pub type Getter = Arc<dyn Fn(&Instance) -> Value + Send + Sync>;
pub type Method = Arc<dyn Fn(&Instance, &[Value]) -> Value + Send + Sync>;
pub type Hook = Arc<dyn Fn(&Instance) -> Result<(), HookError> + Send + Sync>;
pub type MountHook = Arc<dyn Fn(&Instance) -> Result<MountOutcome, HookError> + Send + Sync>;
pub type RenderFn = Arc<dyn Fn(&Instance) -> RenderOutput + Send + Sync>;

/// Cleanup returned by a mount hook, run first thing on unmount.
pub type Teardown = Box<dyn FnOnce() -> Result<(), HookError> + Send>;

/// What a mount hook hands back.
pub enum MountOutcome {
    /// Nothing to clean up.
    Done,
    /// Run this on unmount.
    Teardown(Teardown),
    /// The hook went asynchronous. Hooks must be synchronous, so this is
    /// reported as a contract violation and never used as a teardown.
    Pending(BoxFuture<'static, ()>),
}

impl MountOutcome {
    pub fn teardown<F>(f: F) -> Self
    where
        F: FnOnce() -> Result<(), HookError> + Send + 'static,
    {
        MountOutcome::Teardown(Box::new(f))
    }

    pub fn pending<F>(future: F) -> Self
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        MountOutcome::Pending(Box::pin(future))
    }
}

impl fmt::Debug for MountOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MountOutcome::Done => "Done",
            MountOutcome::Teardown(_) => "Teardown",
            MountOutcome::Pending(_) => "Pending",
        })
    }
}

/// How an instance field gets its initial value.
#[derive(Clone)]
pub enum FieldInit {
    /// The same value for every instance.
    Value(Value),
    /// Derived from the constructor arguments.
    FromArgs(Arc<dyn Fn(&Value) -> Value + Send + Sync>),
    /// An embedded behavior built by a factory from the constructor arguments.
    Behavior(Arc<dyn Fn(&Value) -> Instance + Send + Sync>),
}

impl FieldInit {
    pub(crate) fn produce(&self, args: &Value) -> Value {
        match self {
            FieldInit::Value(value) => value.clone(),
            FieldInit::FromArgs(init) => init(args),
            FieldInit::Behavior(factory) => Value::Instance(factory(args)),
        }
    }
}

/// Declared shape of a field's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Data,
    Function,
    Behavior,
}

/// An instance field declaration.
#[derive(Clone)]
pub struct FieldDef {
    name: String,
    init: FieldInit,
    enumerable: bool,
}

impl FieldDef {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn init(&self) -> &FieldInit {
        &self.init
    }

    pub fn is_enumerable(&self) -> bool {
        self.enumerable
    }

    pub fn kind(&self) -> FieldKind {
        match &self.init {
            FieldInit::Value(Value::Function(_)) => FieldKind::Function,
            FieldInit::Value(Value::Instance(_)) | FieldInit::Behavior(_) => FieldKind::Behavior,
            FieldInit::Value(_) | FieldInit::FromArgs(_) => FieldKind::Data,
        }
    }
}

/// What a member name refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKind {
    Field,
    Getter,
    Method,
}

impl MemberKind {
    fn describe(self) -> &'static str {
        match self {
            MemberKind::Field => "field",
            MemberKind::Getter => "getter",
            MemberKind::Method => "method",
        }
    }
}

#[derive(Clone, Default)]
struct Hooks {
    create: Option<Hook>,
    mount: Option<MountHook>,
    unmount: Option<Hook>,
    render: Option<RenderFn>,
}

/// An immutable class descriptor.
pub struct Class {
    name: String,
    parent: Option<Arc<Class>>,
    fields: Vec<FieldDef>,
    getters: IndexMap<String, Getter>,
    methods: IndexMap<String, Method>,
    props: IndexSet<String>,
    annotations: IndexMap<String, Role>,
    hooks: Hooks,
    behavior: bool,
    mode: Option<Mode>,
    plans: DashMap<Mode, Arc<Plan>>,
}

impl Class {
    pub fn builder(name: impl Into<String>) -> ClassBuilder {
        ClassBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<&Arc<Class>> {
        self.parent.as_ref()
    }

    /// This class followed by its ancestors, most-derived first.
    pub fn chain(&self) -> impl Iterator<Item = &Class> {
        std::iter::successors(Some(self), |class| class.parent.as_deref())
    }

    /// Whether instances of this class are behaviors.
    pub fn is_behavior(&self) -> bool {
        self.chain().any(|class| class.behavior)
    }

    /// The mode this class asks to be instrumented with, if any.
    pub fn mode(&self) -> Option<Mode> {
        self.chain().find_map(|class| class.mode)
    }

    /// Instance fields in initialization order (base first). A subclass
    /// redeclaring a field replaces its initializer in place.
    pub fn instance_fields(&self) -> Vec<&FieldDef> {
        let levels: Vec<&Class> = self.chain().collect();
        let mut fields: IndexMap<&str, &FieldDef> = IndexMap::new();
        for class in levels.into_iter().rev() {
            for field in &class.fields {
                fields.insert(field.name.as_str(), field);
            }
        }
        fields.into_values().collect()
    }

    pub fn own_getters(&self) -> impl Iterator<Item = (&str, &Getter)> {
        self.getters.iter().map(|(name, getter)| (name.as_str(), getter))
    }

    pub fn own_methods(&self) -> impl Iterator<Item = (&str, &Method)> {
        self.methods.iter().map(|(name, method)| (name.as_str(), method))
    }

    pub fn own_annotations(&self) -> impl Iterator<Item = (&str, Role)> {
        self.annotations.iter().map(|(name, role)| (name.as_str(), *role))
    }

    /// The most-derived level declaring `name` as a getter or a method.
    fn accessor_level(&self, name: &str) -> Option<&Class> {
        self.chain()
            .find(|class| class.getters.contains_key(name) || class.methods.contains_key(name))
    }

    /// The getter `name` resolves to. `None` if a more-derived method of the
    /// same name shadows it.
    pub fn getter(&self, name: &str) -> Option<&Getter> {
        self.accessor_level(name).and_then(|class| class.getters.get(name))
    }

    /// The method `name` resolves to. `None` if a more-derived getter of the
    /// same name shadows it.
    pub fn method(&self, name: &str) -> Option<&Method> {
        self.accessor_level(name).and_then(|class| class.methods.get(name))
    }

    pub fn is_prop(&self, name: &str) -> bool {
        self.chain().any(|class| class.props.contains(name))
    }

    /// Declared props, base first.
    pub fn props(&self) -> IndexSet<&str> {
        let levels: Vec<&Class> = self.chain().collect();
        levels
            .into_iter()
            .rev()
            .flat_map(|class| class.props.iter().map(String::as_str))
            .collect()
    }

    /// What `name` resolves to on an instance. Instance fields shadow
    /// getters and methods anywhere on the chain.
    pub fn member_kind(&self, name: &str) -> Option<MemberKind> {
        if self.chain().any(|c| c.fields.iter().any(|f| f.name == name)) {
            return Some(MemberKind::Field);
        }
        self.accessor_level(name).map(|class| {
            if class.getters.contains_key(name) {
                MemberKind::Getter
            } else {
                MemberKind::Method
            }
        })
    }

    pub fn create_hook(&self) -> Option<&Hook> {
        self.chain().find_map(|class| class.hooks.create.as_ref())
    }

    pub fn mount_hook(&self) -> Option<&MountHook> {
        self.chain().find_map(|class| class.hooks.mount.as_ref())
    }

    pub fn unmount_hook(&self) -> Option<&Hook> {
        self.chain().find_map(|class| class.hooks.unmount.as_ref())
    }

    pub fn render_fn(&self) -> Option<&RenderFn> {
        self.chain().find_map(|class| class.hooks.render.as_ref())
    }

    /// The instrumentation plan for `mode`, resolved once and cached.
    pub fn plan(&self, mode: Mode) -> Arc<Plan> {
        if let Some(plan) = self.plans.get(&mode) {
            return Arc::clone(plan.value());
        }
        let plan = Arc::new(plan::resolve(self, mode));
        Arc::clone(self.plans.entry(mode).or_insert(plan).value())
    }

    fn validate(&self) -> Result<(), ClassError> {
        let mut seen: IndexSet<&str> = IndexSet::new();
        let own = self
            .fields
            .iter()
            .map(|f| f.name.as_str())
            .chain(self.getters.keys().map(String::as_str))
            .chain(self.methods.keys().map(String::as_str));
        for name in own {
            if !seen.insert(name) {
                return Err(ClassError::DuplicateMember {
                    class: self.name.clone(),
                    member: name.to_owned(),
                });
            }
        }

        for (member, role) in &self.annotations {
            let err_member = || (self.name.clone(), member.clone());
            if plan::is_infrastructure(member) {
                let (class, member) = err_member();
                return Err(ClassError::Reserved { class, member });
            }
            if self.is_prop(member) {
                let (class, member) = err_member();
                return Err(ClassError::AnnotatedProp { class, member });
            }
            let Some(kind) = self.member_kind(member) else {
                let (class, member) = err_member();
                return Err(ClassError::UnknownMember { class, member });
            };
            let compatible = match role {
                Role::Inert => true,
                Role::Computed => kind == MemberKind::Getter,
                Role::Action => kind == MemberKind::Method,
                _ => kind == MemberKind::Field,
            };
            if !compatible {
                let (class, member) = err_member();
                return Err(ClassError::IncompatibleRole {
                    class,
                    member,
                    kind: kind.describe(),
                    role: *role,
                });
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Class")
            .field("name", &self.name)
            .field("parent", &self.parent.as_ref().map(|p| p.name()))
            .field("fields", &self.fields.iter().map(FieldDef::name).collect::<Vec<_>>())
            .field("getters", &self.getters.keys().collect::<Vec<_>>())
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .field("props", &self.props)
            .field("behavior", &self.behavior)
            .finish()
    }
}

/// Builder for [`Class`].
pub struct ClassBuilder {
    class: Class,
}

impl ClassBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            class: Class {
                name: name.into(),
                parent: None,
                fields: Vec::new(),
                getters: IndexMap::new(),
                methods: IndexMap::new(),
                props: IndexSet::new(),
                annotations: IndexMap::new(),
                hooks: Hooks::default(),
                behavior: false,
                mode: None,
                plans: DashMap::new(),
            },
        }
    }

    pub fn extends(mut self, parent: &Arc<Class>) -> Self {
        self.class.parent = Some(Arc::clone(parent));
        self
    }

    fn push_field(mut self, name: impl Into<String>, init: FieldInit, enumerable: bool) -> Self {
        self.class.fields.push(FieldDef {
            name: name.into(),
            init,
            enumerable,
        });
        self
    }

    /// An enumerable field with the same initial value for every instance.
    pub fn field(self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push_field(name, FieldInit::Value(value.into()), true)
    }

    /// An enumerable field initialized from the constructor arguments.
    pub fn field_with<F>(self, name: impl Into<String>, init: F) -> Self
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        self.push_field(name, FieldInit::FromArgs(Arc::new(init)), true)
    }

    /// A non-enumerable field: never inferred, never scanned for behaviors.
    pub fn hidden_field(self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push_field(name, FieldInit::Value(value.into()), false)
    }

    /// A function-valued field.
    pub fn function_field<F>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&[Value]) -> Value + Send + Sync + 'static,
    {
        self.push_field(name, FieldInit::Value(Value::Function(Function::new(f))), true)
    }

    /// A field holding an embedded behavior, built per instance.
    pub fn behavior_field<F>(self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&Value) -> Instance + Send + Sync + 'static,
    {
        self.push_field(name, FieldInit::Behavior(Arc::new(factory)), true)
    }

    pub fn getter<F>(mut self, name: impl Into<String>, getter: F) -> Self
    where
        F: Fn(&Instance) -> Value + Send + Sync + 'static,
    {
        self.class.getters.insert(name.into(), Arc::new(getter));
        self
    }

    pub fn method<F>(mut self, name: impl Into<String>, method: F) -> Self
    where
        F: Fn(&Instance, &[Value]) -> Value + Send + Sync + 'static,
    {
        self.class.methods.insert(name.into(), Arc::new(method));
        self
    }

    /// Declare an externally supplied input. A field of the same name
    /// becomes its initial value.
    pub fn prop(mut self, name: impl Into<String>) -> Self {
        self.class.props.insert(name.into());
        self
    }

    /// Give `member` an explicit role. Explicit roles always win.
    pub fn annotate(mut self, member: impl Into<String>, role: Role) -> Self {
        self.class.annotations.insert(member.into(), role);
        self
    }

    pub fn on_create<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Instance) -> Result<(), HookError> + Send + Sync + 'static,
    {
        self.class.hooks.create = Some(Arc::new(hook));
        self
    }

    pub fn on_mount<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Instance) -> Result<MountOutcome, HookError> + Send + Sync + 'static,
    {
        self.class.hooks.mount = Some(Arc::new(hook));
        self
    }

    pub fn on_unmount<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Instance) -> Result<(), HookError> + Send + Sync + 'static,
    {
        self.class.hooks.unmount = Some(Arc::new(hook));
        self
    }

    pub fn render<F>(mut self, render: F) -> Self
    where
        F: Fn(&Instance) -> RenderOutput + Send + Sync + 'static,
    {
        self.class.hooks.render = Some(Arc::new(render));
        self
    }

    /// Mark instances of this class as behaviors.
    pub fn behavior(mut self) -> Self {
        self.class.behavior = true;
        self
    }

    /// Instrument instances with `mode` instead of the global default.
    pub fn mode(mut self, mode: Mode) -> Self {
        self.class.mode = Some(mode);
        self
    }

    pub fn build(self) -> Result<Arc<Class>, ClassError> {
        self.class.validate()?;
        Ok(Arc::new(self.class))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StateError;

    fn base() -> Arc<Class> {
        Class::builder("Base")
            .field("a", 1)
            .field("b", 2)
            .getter("g", |_| Value::from("base"))
            .method("m", |_, _| Value::from("base"))
            .build()
            .unwrap()
    }

    #[test]
    fn instance_fields_are_base_first_with_overrides_in_place() {
        let derived = Class::builder("Derived")
            .extends(&base())
            .field("c", 3)
            .field("a", 10)
            .build()
            .unwrap();

        let fields = derived.instance_fields();
        let names: Vec<_> = fields.iter().map(|f| f.name()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(fields[0].init().produce(&Value::Undefined), Value::from(10));
    }

    #[test]
    fn lookups_prefer_the_most_derived_class() {
        let derived = Class::builder("Derived")
            .extends(&base())
            .getter("g", |_| Value::from("derived"))
            .build()
            .unwrap();
        let instance = Instance::new(&derived, Value::Undefined);

        assert_eq!(derived.getter("g").unwrap()(&instance), Value::from("derived"));
        assert_eq!(derived.method("m").unwrap()(&instance, &[]), Value::from("base"));
    }

    #[test]
    fn derived_method_shadows_base_getter() {
        let parent = Class::builder("Base")
            .getter("label", |_| Value::from("base getter"))
            .build()
            .unwrap();
        let derived = Class::builder("Derived")
            .extends(&parent)
            .method("label", |_, _| Value::from("derived method"))
            .build()
            .unwrap();

        assert!(derived.getter("label").is_none());
        assert!(derived.method("label").is_some());
        assert_eq!(derived.member_kind("label"), Some(MemberKind::Method));

        let instance = Instance::new(&derived, Value::Undefined);
        instance.instrument();
        let action = instance.action("label").unwrap();
        assert_eq!(instance.get("label").unwrap(), Value::from(action));
        assert_eq!(instance.call("label", &[]).unwrap(), Value::from("derived method"));
    }

    #[test]
    fn derived_getter_shadows_base_method() {
        let parent = Class::builder("Base")
            .method("label", |_, _| Value::from("base method"))
            .build()
            .unwrap();
        let derived = Class::builder("Derived")
            .extends(&parent)
            .getter("label", |_| Value::from("derived getter"))
            .build()
            .unwrap();

        assert!(derived.method("label").is_none());
        assert_eq!(derived.member_kind("label"), Some(MemberKind::Getter));

        let instance = Instance::new(&derived, Value::Undefined);
        instance.instrument();
        assert_eq!(instance.get("label").unwrap(), Value::from("derived getter"));
        assert!(matches!(
            instance.call("label", &[]),
            Err(StateError::NotCallable { .. })
        ));
    }

    #[test]
    fn field_kinds_follow_initializers() {
        let class = Class::builder("Kinds")
            .field("data", 1)
            .function_field("f", |_| Value::Undefined)
            .behavior_field("b", |_| {
                let inner = Class::builder("Inner").behavior().build().unwrap();
                Instance::new(&inner, Value::Undefined)
            })
            .build()
            .unwrap();

        let kinds: Vec<_> = class.instance_fields().iter().map(|f| f.kind()).collect();
        assert_eq!(kinds, vec![FieldKind::Data, FieldKind::Function, FieldKind::Behavior]);
    }

    #[test]
    fn duplicate_members_are_rejected() {
        let result = Class::builder("Dup")
            .field("x", 1)
            .method("x", |_, _| Value::Undefined)
            .build();
        assert!(matches!(result, Err(ClassError::DuplicateMember { .. })));
    }

    #[test]
    fn annotations_are_validated_against_the_chain() {
        let unknown = Class::builder("A").annotate("nope", Role::Computed).build();
        assert!(matches!(unknown, Err(ClassError::UnknownMember { .. })));

        let mismatched = Class::builder("B")
            .extends(&base())
            .annotate("a", Role::Computed)
            .build();
        assert!(matches!(mismatched, Err(ClassError::IncompatibleRole { .. })));

        let inherited = Class::builder("C")
            .extends(&base())
            .annotate("g", Role::Computed)
            .annotate("m", Role::Inert)
            .build();
        assert!(inherited.is_ok());

        let reserved = Class::builder("D")
            .method("mount", |_, _| Value::Undefined)
            .annotate("mount", Role::Action)
            .build();
        assert!(matches!(reserved, Err(ClassError::Reserved { .. })));

        let prop = Class::builder("E")
            .prop("label")
            .field("label", "x")
            .annotate("label", Role::MutableState)
            .build();
        assert!(matches!(prop, Err(ClassError::AnnotatedProp { .. })));
    }

    #[test]
    fn behavior_flag_and_mode_are_inherited() {
        let parent = Class::builder("P").behavior().mode(Mode::Explicit).build().unwrap();
        let child = Class::builder("C").extends(&parent).build().unwrap();
        assert!(child.is_behavior());
        assert_eq!(child.mode(), Some(Mode::Explicit));
    }

    #[test]
    fn plan_is_cached_per_mode() {
        let class = base();
        let first = class.plan(Mode::Inferred);
        let second = class.plan(Mode::Inferred);
        assert!(Arc::ptr_eq(&first, &second));

        let explicit = class.plan(Mode::Explicit);
        assert!(!Arc::ptr_eq(&first, &explicit));
    }
}
