//! Custom tracing layers

use tracing::span::{Attributes, Id};
use tracing::Subscriber;
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;

use crate::context::{RequestContextData, RequestContextGuard};

/// Layer that attaches the active request context to every new span
///
/// Reads the thread-local context from [`RequestContextGuard`] at span
/// creation time and stores it in the span extensions, so later events on
/// other threads still see which request and artifact they belong to.
pub struct RequestContextLayer;

impl RequestContextLayer {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RequestContextLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> Layer<S> for RequestContextLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, _attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        if let Some(span) = ctx.span(id)
            && let Some(context) = RequestContextGuard::current()
        {
            span.extensions_mut().insert(RequestContextExtension(context));
        }
    }
}

/// Span extension holding the request context captured at creation
#[derive(Debug, Clone)]
pub struct RequestContextExtension(pub RequestContextData);
