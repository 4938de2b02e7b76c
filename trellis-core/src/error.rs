//! Errors and the lifecycle error router.
//!
//! Configuration mistakes ([`ClassError`], [`ConfigError`]) surface as
//! `Err` at setup time. Failures inside lifecycle hooks and watch callbacks
//! never propagate: they are caught at the boundary of the single hook that
//! failed and handed, with an [`ErrorContext`], to the process-wide error
//! handler (see [`crate::config`]).

use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config;
use crate::plan::Role;
use crate::reactive::Runtime;

/// Error type returned by user hooks, callbacks and teardowns.
pub type HookError = Box<dyn std::error::Error + Send + Sync>;

/// A class descriptor that cannot be instrumented.
#[derive(Debug, Error)]
pub enum ClassError {
    #[error("class `{class}` annotates unknown member `{member}`")]
    UnknownMember { class: String, member: String },

    #[error("class `{class}` cannot annotate {kind} `{member}` as {role}")]
    IncompatibleRole {
        class: String,
        member: String,
        kind: &'static str,
        role: Role,
    },

    #[error("class `{class}` uses reserved name `{member}`")]
    Reserved { class: String, member: String },

    #[error("class `{class}` annotates prop `{member}`; props are stored separately")]
    AnnotatedProp { class: String, member: String },

    #[error("class `{class}` declares `{member}` more than once")]
    DuplicateMember { class: String, member: String },
}

/// Fatal setup errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no render strategy for `{0}`: give the host a renderer or configure a default one")]
    NoRenderer(String),

    #[error("delayed reactions need a tokio runtime on the current thread")]
    NoTimerRuntime,
}

/// Errors from reading or writing instance members.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("`{class}` has no member `{member}`")]
    UnknownMember { class: String, member: String },

    #[error("`{class}.{member}` is read-only")]
    ReadOnly { class: String, member: String },

    #[error("`{class}.{member}` is not callable")]
    NotCallable { class: String, member: String },

    #[error("`{member}` does not hold the requested type")]
    Deserialize {
        member: String,
        #[source]
        source: serde_json::Error,
    },
}

/// A failure caught at a lifecycle boundary.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("{0}")]
    Failed(#[source] HookError),

    #[error("panicked: {0}")]
    Panicked(String),
}

/// Lifecycle phase a routed failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Create,
    Mount,
    Unmount,
    Watch,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Create => "create",
            Phase::Mount => "mount",
            Phase::Unmount => "unmount",
            Phase::Watch => "watch",
        })
    }
}

/// Where a routed failure happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorContext {
    pub phase: Phase,
    /// Class name of the host or behavior whose hook failed.
    pub name: String,
    pub is_behavior: bool,
}

impl ErrorContext {
    pub fn new(phase: Phase, name: impl Into<String>, is_behavior: bool) -> Self {
        Self {
            phase,
            name: name.into(),
            is_behavior,
        }
    }
}

/// Send a failure to the configured error handler.
pub fn report(error: LifecycleError, context: ErrorContext) {
    let handler = config::current().on_error;
    handler(&error, &context);
}

/// The handler used when none is configured.
pub(crate) fn log_error(error: &LifecycleError, context: &ErrorContext) {
    tracing::error!(
        phase = %context.phase,
        name = %context.name,
        is_behavior = context.is_behavior,
        %error,
        "lifecycle hook failed"
    );
}

/// Run one hook invocation, routing an `Err` or a panic instead of
/// propagating it.
pub(crate) fn guarded<T>(
    context: impl FnOnce() -> ErrorContext,
    hook: impl FnOnce() -> Result<T, HookError>,
) -> Option<T> {
    match catch_unwind(AssertUnwindSafe(hook)) {
        Ok(Ok(value)) => Some(value),
        Ok(Err(error)) => {
            report(LifecycleError::Failed(error), context());
            None
        }
        Err(payload) => {
            // Unwinding skipped the flush of any transaction the hook had open.
            if !Runtime::in_batch() {
                Runtime::flush();
            }
            report(LifecycleError::Panicked(panic_message(payload)), context());
            None
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{self, Options};
    use parking_lot::Mutex;
    use serial_test::serial;
    use std::sync::Arc;

    fn capture() -> Arc<Mutex<Vec<(String, ErrorContext)>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        config::configure(Options::default().on_error(move |error, context| {
            sink.lock().push((error.to_string(), context.clone()));
        }));
        seen
    }

    #[test]
    #[serial]
    fn guarded_routes_err_with_context() {
        let seen = capture();

        let result: Option<()> = guarded(
            || ErrorContext::new(Phase::Mount, "Clock", true),
            || Err("tick failed".into()),
        );

        assert!(result.is_none());
        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, "tick failed");
        assert_eq!(seen[0].1, ErrorContext::new(Phase::Mount, "Clock", true));
        config::reset();
    }

    #[test]
    #[serial]
    fn guarded_catches_panics() {
        let seen = capture();

        let result: Option<()> = guarded(
            || ErrorContext::new(Phase::Unmount, "Clock", false),
            || -> Result<(), HookError> { panic!("boom") },
        );

        assert!(result.is_none());
        assert_eq!(seen.lock()[0].0, "panicked: boom");
        config::reset();
    }

    #[test]
    fn guarded_passes_values_through() {
        let result = guarded(|| ErrorContext::new(Phase::Create, "x", false), || Ok(5));
        assert_eq!(result, Some(5));
    }

    #[test]
    fn error_context_serializes_camel_case() {
        let context = ErrorContext::new(Phase::Watch, "Search", false);
        let json = serde_json::to_value(&context).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "phase": "watch", "name": "Search", "isBehavior": false })
        );
    }
}
