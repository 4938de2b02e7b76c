//! Annotation Resolver
//!
//! Classification happens once per class and mode. The result is a [`Plan`]:
//! an ordered map from member name to [`Role`], which the instrumentor then
//! applies mechanically to every instance.
//!
//! # How Resolution Works
//!
//! 1. Explicit annotations are collected first, most-derived class first.
//!    A name claimed by a subclass is never reassigned by its parent.
//!
//! 2. Depending on the [`Mode`], the remaining members are classified:
//!    - `Inferred`: enumerable data fields become mutable state (embedded
//!      instances become reference state), getters become computed, methods
//!      become actions. Function-valued fields stay inert. A field computed
//!      from the constructor arguments is only known to hold a behavior
//!      once an instance exists; the instrumentor promotes it then.
//!    - `Explicit`: methods are still bound as actions; every other member
//!      is inert.
//!    - `Passthrough`: nothing beyond the explicit annotations.
//!
//! 3. Props, non-enumerable fields, infrastructure names and internal names
//!    are skipped.

use std::fmt;

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

use crate::class::{Class, FieldKind};

/// Member names owned by the host infrastructure.
pub const INFRASTRUCTURE: &[&str] = &["create", "mount", "unmount", "render", "watch", "constructor"];

/// Whether `name` is reserved for the infrastructure or is internal.
pub fn is_infrastructure(name: &str) -> bool {
    INFRASTRUCTURE.contains(&name) || name.starts_with("__")
}

/// How a member participates in the reactive graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    MutableState,
    DeepState,
    ShallowState,
    ReferenceState,
    StructuralState,
    Computed,
    Action,
    Inert,
}

impl Role {
    /// Whether the role turns a field into an observable cell.
    pub fn is_state(self) -> bool {
        matches!(
            self,
            Role::MutableState
                | Role::DeepState
                | Role::ShallowState
                | Role::ReferenceState
                | Role::StructuralState
        )
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::MutableState => "mutable-state",
            Role::DeepState => "deep-state",
            Role::ShallowState => "shallow-state",
            Role::ReferenceState => "reference-state",
            Role::StructuralState => "structural-state",
            Role::Computed => "computed",
            Role::Action => "action",
            Role::Inert => "inert",
        })
    }
}

/// Instrumentation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Explicit,
    Inferred,
    Passthrough,
}

/// A resolved instrumentation plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Plan {
    class: String,
    mode: Mode,
    roles: IndexMap<String, Role>,
    #[serde(skip)]
    annotated: IndexSet<String>,
}

impl Plan {
    pub fn class(&self) -> &str {
        &self.class
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn role(&self, member: &str) -> Option<Role> {
        self.roles.get(member).copied()
    }

    /// Whether the role of `member` comes from an explicit annotation.
    pub fn is_annotated(&self, member: &str) -> bool {
        self.annotated.contains(member)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Role)> {
        self.roles.iter().map(|(name, role)| (name.as_str(), *role))
    }

    pub fn len(&self) -> usize {
        self.roles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }
}

/// Classify the members of `class` under `mode`.
///
/// Prefer [`Class::plan`], which caches the result on the class.
pub fn resolve(class: &Class, mode: Mode) -> Plan {
    let mut roles: IndexMap<String, Role> = IndexMap::new();

    for level in class.chain() {
        for (member, role) in level.own_annotations() {
            roles.entry(member.to_owned()).or_insert(role);
        }
    }
    let annotated: IndexSet<String> = roles.keys().cloned().collect();

    if mode != Mode::Passthrough {
        let classify = |name: &str| !is_infrastructure(name) && !class.is_prop(name);

        for field in class.instance_fields() {
            if !field.is_enumerable() || !classify(field.name()) {
                continue;
            }
            let role = match (mode, field.kind()) {
                (Mode::Inferred, FieldKind::Data) => Role::MutableState,
                (Mode::Inferred, FieldKind::Behavior) => Role::ReferenceState,
                _ => Role::Inert,
            };
            roles.entry(field.name().to_owned()).or_insert(role);
        }

        for level in class.chain() {
            for (name, _) in level.own_getters() {
                if classify(name) {
                    let role = if mode == Mode::Inferred { Role::Computed } else { Role::Inert };
                    roles.entry(name.to_owned()).or_insert(role);
                }
            }
            for (name, _) in level.own_methods() {
                if classify(name) {
                    roles.entry(name.to_owned()).or_insert(Role::Action);
                }
            }
        }
    }

    tracing::debug!(class = class.name(), ?mode, members = roles.len(), "resolved plan");

    Plan {
        class: class.name().to_owned(),
        mode,
        roles,
        annotated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::Instance;
    use crate::value::Value;
    use std::sync::Arc;

    fn store() -> Arc<Class> {
        Class::builder("Store")
            .field("count", 0)
            .field("items", serde_json::json!([]))
            .hidden_field("cache", 0)
            .function_field("format", |_| Value::Undefined)
            .field("__internal", 1)
            .prop("label")
            .field("label", "default")
            .getter("total", |_| Value::from(0))
            .method("increment", |_, _| Value::Undefined)
            .method("mount", |_, _| Value::Undefined)
            .build()
            .unwrap()
    }

    #[test]
    fn inferred_mode_classifies_by_member_kind() {
        let plan = resolve(&store(), Mode::Inferred);

        assert_eq!(plan.role("count"), Some(Role::MutableState));
        assert_eq!(plan.role("items"), Some(Role::MutableState));
        assert_eq!(plan.role("format"), Some(Role::Inert));
        assert_eq!(plan.role("total"), Some(Role::Computed));
        assert_eq!(plan.role("increment"), Some(Role::Action));
    }

    #[test]
    fn skipped_members_never_get_a_role() {
        let plan = resolve(&store(), Mode::Inferred);

        assert_eq!(plan.role("cache"), None);
        assert_eq!(plan.role("__internal"), None);
        assert_eq!(plan.role("label"), None);
        assert_eq!(plan.role("mount"), None);
    }

    #[test]
    fn embedded_behaviors_are_reference_state() {
        let timer = Class::builder("Timer").behavior().build().unwrap();
        let host = Class::builder("Host")
            .behavior_field("timer", move |_| Instance::new(&timer, Value::Undefined))
            .build()
            .unwrap();

        assert_eq!(resolve(&host, Mode::Inferred).role("timer"), Some(Role::ReferenceState));
    }

    #[test]
    fn explicit_annotations_win() {
        let class = Class::builder("Annotated")
            .extends(&store())
            .annotate("count", Role::StructuralState)
            .annotate("total", Role::Inert)
            .annotate("increment", Role::Inert)
            .build()
            .unwrap();
        let plan = resolve(&class, Mode::Inferred);

        assert_eq!(plan.role("count"), Some(Role::StructuralState));
        assert_eq!(plan.role("total"), Some(Role::Inert));
        assert_eq!(plan.role("increment"), Some(Role::Inert));
        assert_eq!(plan.role("items"), Some(Role::MutableState));
        assert!(plan.is_annotated("count"));
        assert!(!plan.is_annotated("items"));
    }

    #[test]
    fn derived_annotations_beat_base_annotations() {
        let base = Class::builder("Base")
            .field("x", 1)
            .annotate("x", Role::ShallowState)
            .build()
            .unwrap();
        let derived = Class::builder("Derived")
            .extends(&base)
            .annotate("x", Role::ReferenceState)
            .build()
            .unwrap();

        assert_eq!(resolve(&derived, Mode::Passthrough).role("x"), Some(Role::ReferenceState));
    }

    #[test]
    fn explicit_mode_binds_methods_and_leaves_the_rest_inert() {
        let class = Class::builder("Explicit")
            .extends(&store())
            .annotate("count", Role::MutableState)
            .build()
            .unwrap();
        let plan = resolve(&class, Mode::Explicit);

        assert_eq!(plan.role("count"), Some(Role::MutableState));
        assert_eq!(plan.role("items"), Some(Role::Inert));
        assert_eq!(plan.role("total"), Some(Role::Inert));
        assert_eq!(plan.role("increment"), Some(Role::Action));
    }

    #[test]
    fn passthrough_mode_only_keeps_annotations() {
        let class = Class::builder("Passthrough")
            .extends(&store())
            .annotate("total", Role::Computed)
            .build()
            .unwrap();
        let plan = resolve(&class, Mode::Passthrough);

        assert_eq!(plan.len(), 1);
        assert_eq!(plan.role("total"), Some(Role::Computed));
    }

    #[test]
    fn resolution_is_deterministic() {
        let class = store();
        let first = resolve(&class, Mode::Inferred);
        let second = resolve(&class, Mode::Inferred);

        assert_eq!(first, second);
        assert_eq!(
            first.iter().collect::<Vec<_>>(),
            second.iter().collect::<Vec<_>>()
        );
    }

    #[test]
    fn plan_serializes_roles_in_kebab_case() {
        let json = serde_json::to_value(resolve(&store(), Mode::Inferred)).unwrap();
        assert_eq!(json["mode"], "inferred");
        assert_eq!(json["roles"]["count"], "mutable-state");
        assert_eq!(json["roles"]["total"], "computed");
    }
}
