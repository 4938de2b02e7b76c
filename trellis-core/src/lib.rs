//! Trellis Core
//!
//! This crate turns plain state classes into reactive state containers and
//! ties them to the connect/disconnect lifecycle of a UI component.
//! It implements:
//!
//! - An annotation resolver that classifies class members into roles
//! - An instrumentor that makes instances live (signals, memos, actions)
//! - Prop storage for externally supplied inputs
//! - Composable behaviors with isolated failure domains
//! - A lifecycle orchestrator with a render reaction
//! - Watches with debounce and immediate fire
//! - A process-wide error router
//!
//! Turning render output into pixels is left to a [`Renderer`].
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: reactive primitives and dependency tracking
//! - `graph`: the dependency graph the primitives are scheduled on
//! - `class` / `plan`: class descriptors and their instrumentation plans
//! - `instance` / `props`: live state instances and their prop storage
//! - `behavior` / `lifecycle` / `watch`: composition, lifecycle, watches
//! - `config` / `error`: global options and the error router
//!
//! # Example
//!
//! ```rust,ignore
//! use trellis_core::{Class, Host, Value};
//!
//! let counter = Class::builder("Counter")
//!     .field("count", 0)
//!     .method("increment", |this, _| {
//!         this.update("count", |v| *v = Value::from(v.as_i64().unwrap_or(0) + 1)).ok();
//!         Value::Undefined
//!     })
//!     .render(|this| Ok(Some(serde_json::json!({ "count": this.get("count")?.as_i64() }))))
//!     .build()?;
//!
//! let host = Host::builder(&counter).renderer(renderer).build()?;
//! host.connect();                          // renders { "count": 0 }
//! host.instance().call("increment", &[])?; // renders { "count": 1 }
//! host.disconnect();
//! ```

pub mod behavior;
pub mod class;
pub mod config;
pub mod error;
pub mod graph;
pub mod instance;
pub mod lifecycle;
pub mod plan;
mod props;
pub mod reactive;
pub mod render;
pub mod value;
pub mod watch;

pub use behavior::create_behavior;
pub use class::{Class, ClassBuilder, FieldKind, MemberKind, MountOutcome, Teardown};
pub use config::{configure, Options, Settings};
pub use error::{ClassError, ConfigError, ErrorContext, HookError, LifecycleError, Phase, StateError};
pub use instance::{BoundAction, Instance, WeakInstance};
pub use lifecycle::{Host, HostBuilder, LifecycleState};
pub use plan::{Mode, Plan, Role};
pub use reactive::{transaction, untracked};
pub use render::{RenderError, RenderOutput, Renderable, Renderer};
pub use value::{Function, Value};
pub use watch::{WatchHandle, WatchOptions};
