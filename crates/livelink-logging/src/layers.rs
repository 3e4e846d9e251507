//! Custom tracing layers
//!
//! [`ViewContextLayer`] copies the active [`ViewContextGuard`] data onto every
//! new span, so JSON output of spans opened while handling a view carries
//! its id.

use tracing::{Subscriber, span};
use tracing_subscriber::{
    layer::{Context, Layer},
    registry::LookupSpan,
};

use crate::context::{ViewContextData, ViewContextGuard};

/// Layer that injects view context into spans
pub struct ViewContextLayer;

impl ViewContextLayer {
    /// Create a new view context layer
    pub fn new() -> Self {
        Self
    }
}

impl Default for ViewContextLayer {
    fn default() -> Self {
        Self::new()
    }
}

/// Extension data stored on spans
#[derive(Debug, Clone)]
pub struct ViewContextExtension {
    pub data: ViewContextData,
}

impl<S> Layer<S> for ViewContextLayer
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
{
    fn on_new_span(&self, _attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        if let Some(span) = ctx.span(id) {
            if let Some(view_ctx) = ViewContextGuard::current() {
                span.extensions_mut()
                    .insert(ViewContextExtension { data: view_ctx });
            }
        }
    }
}
