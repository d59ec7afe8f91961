//! Request context injection
//!
//! Thread-local storage for the context of the request being served, so
//! every span opened while handling it carries the request id, owner and
//! the artifact being worked on.

use std::cell::RefCell;

use uuid::Uuid;

/// Request context data stored in thread-local storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContextData {
    /// Unique id of the request
    pub request_id: Uuid,
    /// Owner (tenant) the request acts for
    pub owner: Option<String>,
    /// Artifact currently being operated on
    pub artifact_id: Option<String>,
}

thread_local! {
    static REQUEST_CONTEXT: RefCell<Option<RequestContextData>> = const { RefCell::new(None) };
}

/// RAII guard for request context
///
/// When this guard is created, it sets the request context for the current
/// thread. When it's dropped, it restores the previous context (if any).
///
/// ```ignore
/// use tessera_logging::context::RequestContextGuard;
///
/// let _guard = RequestContextGuard::new(Some("tenant-a"));
/// tracing::info!("publishing artifact");
/// ```
pub struct RequestContextGuard {
    previous: Option<RequestContextData>,
}

impl RequestContextGuard {
    /// Start a new request scope with a fresh request id
    pub fn new(owner: Option<&str>) -> Self {
        Self::with_request_id(Uuid::new_v4(), owner)
    }

    /// Start a request scope with a caller-supplied request id
    pub fn with_request_id(request_id: Uuid, owner: Option<&str>) -> Self {
        Self::replace(RequestContextData {
            request_id,
            owner: owner.map(str::to_string),
            artifact_id: None,
        })
    }

    /// Narrow the current scope to one artifact
    ///
    /// Keeps the surrounding request id and owner; outside any request scope
    /// a fresh request id is generated.
    pub fn for_artifact(artifact_id: &str) -> Self {
        let data = match Self::current() {
            Some(current) => RequestContextData {
                artifact_id: Some(artifact_id.to_string()),
                ..current
            },
            None => RequestContextData {
                request_id: Uuid::new_v4(),
                owner: None,
                artifact_id: Some(artifact_id.to_string()),
            },
        };
        Self::replace(data)
    }

    fn replace(data: RequestContextData) -> Self {
        let previous = REQUEST_CONTEXT.with(|ctx| ctx.borrow_mut().replace(data));
        Self { previous }
    }

    /// Get the current request context (if any)
    pub fn current() -> Option<RequestContextData> {
        REQUEST_CONTEXT.with(|ctx| ctx.borrow().clone())
    }

    /// Get the current request id (if set)
    pub fn current_request_id() -> Option<Uuid> {
        Self::current().map(|ctx| ctx.request_id)
    }

    /// Get the current artifact id (if set)
    pub fn current_artifact_id() -> Option<String> {
        Self::current().and_then(|ctx| ctx.artifact_id)
    }
}

impl Drop for RequestContextGuard {
    fn drop(&mut self) {
        REQUEST_CONTEXT.with(|ctx| *ctx.borrow_mut() = self.previous.take());
    }
}

/// Convenience macro to run a block inside a request scope
///
/// ```ignore
/// with_request_context!(Some("tenant-a"), {
///     tracing::info!("listing artifacts");
/// });
/// ```
#[macro_export]
macro_rules! with_request_context {
    ($owner:expr, $body:block) => {{
        let _guard = $crate::context::RequestContextGuard::new($owner);
        $body
    }};
}
