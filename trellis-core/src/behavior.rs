//! Behavior Composition
//!
//! A behavior is an instance of behavior kind embedded in a field of a host.
//! The host finds its behaviors when it is instrumented and then carries them
//! through its own lifecycle: they mount after the host's create hook and
//! before its mount hook, and unmount last, in reverse order. A behavior
//! never learns which host owns it.
//!
//! Each behavior is its own failure domain. Its hook failures are routed with
//! `is_behavior: true` and never stop a sibling or the host.

use std::sync::Arc;

use crate::class::Class;
use crate::instance::Instance;
use crate::lifecycle;
use crate::plan;
use crate::value::Value;

/// Construct a behavior instance of `class`.
///
/// Usually called from a [`ClassBuilder::behavior_field`] factory:
///
/// ```rust,ignore
/// let host = Class::builder("Dashboard")
///     .behavior_field("clock", move |_| create_behavior(&clock, json!({ "interval": 1000 })))
///     .build()?;
/// ```
///
/// [`ClassBuilder::behavior_field`]: crate::class::ClassBuilder::behavior_field
pub fn create_behavior(class: &Arc<Class>, args: impl Into<Value>) -> Instance {
    Instance::with_kind(class, args.into(), true)
}

/// Behaviors held by the enumerable, non-internal fields of `host`.
pub(crate) fn discover(host: &Instance) -> Vec<Instance> {
    host.enumerable_fields()
        .into_iter()
        .filter(|(name, _)| !plan::is_infrastructure(name))
        .filter_map(|(_, value)| match value {
            Value::Instance(instance) if instance.is_behavior() && !instance.ptr_eq(host) => {
                Some(instance)
            }
            _ => None,
        })
        .collect()
}

/// Mount every behavior of `host`, in field order.
pub(crate) fn mount_all(host: &Instance) {
    for behavior in host.behaviors() {
        lifecycle::mount_behavior(&behavior);
    }
}

/// Unmount every behavior of `host`, last mounted first.
pub(crate) fn unmount_all(host: &Instance) {
    for behavior in host.behaviors().iter().rev() {
        lifecycle::unmount_behavior(behavior);
    }
}
