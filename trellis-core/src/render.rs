//! The seam to the rendering collaborator.
//!
//! Render functions produce a [`Renderable`] view description; turning it
//! into real output (DOM, terminal cells, HTML) is the [`Renderer`]'s job.
//! Render failures are not this crate's to handle: the `Err` is handed to the
//! renderer as-is.

use std::error::Error;

/// A view description produced by a render function.
pub type Renderable = serde_json::Value;

/// Error type of render functions.
pub type RenderError = Box<dyn Error + Send + Sync>;

/// What one render pass produced. `Ok(None)` renders nothing.
pub type RenderOutput = Result<Option<Renderable>, RenderError>;

/// Sink for render output.
pub trait Renderer: Send + Sync {
    /// Commit `output` into the host identified by `target`.
    fn render_into(&self, output: RenderOutput, target: &str);
}

impl<F> Renderer for F
where
    F: Fn(RenderOutput, &str) + Send + Sync,
{
    fn render_into(&self, output: RenderOutput, target: &str) {
        self(output, target)
    }
}
