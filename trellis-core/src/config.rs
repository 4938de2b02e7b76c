//! Process-wide options.
//!
//! Lifecycle code deep inside hooks needs to reach the error handler without
//! a context object being threaded through every call, so the options live
//! in one global. [`configure`] merges: keys left as `None` keep their
//! current value. [`reset`] restores the defaults.
//!
//! | key        | default                                   |
//! |------------|-------------------------------------------|
//! | `on_error` | log through `tracing::error!`             |
//! | `renderer` | none (hosts must bring their own)         |
//! | `mode`     | [`Mode::Inferred`]                        |

use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;

use crate::error::{self, ErrorContext, LifecycleError};
use crate::plan::Mode;
use crate::render::Renderer;

/// Sink for lifecycle failures.
pub type ErrorHandler = Arc<dyn Fn(&LifecycleError, &ErrorContext) + Send + Sync>;

/// A partial update of the global settings.
#[derive(Clone, Default)]
pub struct Options {
    pub on_error: Option<ErrorHandler>,
    pub renderer: Option<Arc<dyn Renderer>>,
    pub mode: Option<Mode>,
}

impl Options {
    pub fn on_error<F>(mut self, handler: F) -> Self
    where
        F: Fn(&LifecycleError, &ErrorContext) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(handler));
        self
    }

    pub fn renderer(mut self, renderer: Arc<dyn Renderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = Some(mode);
        self
    }
}

/// The resolved global settings.
#[derive(Clone)]
pub struct Settings {
    pub on_error: ErrorHandler,
    pub renderer: Option<Arc<dyn Renderer>>,
    pub mode: Mode,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            on_error: Arc::new(error::log_error),
            renderer: None,
            mode: Mode::Inferred,
        }
    }
}

impl Settings {
    fn merge(&mut self, options: Options) {
        if let Some(on_error) = options.on_error {
            self.on_error = on_error;
        }
        if let Some(renderer) = options.renderer {
            self.renderer = Some(renderer);
        }
        if let Some(mode) = options.mode {
            self.mode = mode;
        }
    }
}

static SETTINGS: OnceLock<RwLock<Settings>> = OnceLock::new();

fn settings() -> &'static RwLock<Settings> {
    SETTINGS.get_or_init(|| RwLock::new(Settings::default()))
}

/// Merge `options` into the global settings.
pub fn configure(options: Options) {
    settings().write().merge(options);
}

/// Restore the default settings.
pub fn reset() {
    *settings().write() = Settings::default();
}

/// Snapshot of the current settings.
pub fn current() -> Settings {
    settings().read().clone()
}
