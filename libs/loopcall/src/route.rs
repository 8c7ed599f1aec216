//! Type-safe route builder with compile-time guarantees.
//!
//! The builder uses a type-state marker for the handler slot so a definition
//! cannot be registered until a handler is set. Hooks are an explicit field
//! of the definition; there is no positional-argument sniffing to decide
//! whether the third argument is "the options or the handler".

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use futures::future::BoxFuture;
use http::Method;
use serde_json::Value;

use crate::context::{ApiRequest, ApiResponse};
use crate::hooks::Hooks;
use crate::template;
use crate::Reply;

/// Path parameters as seen by handlers: a JSON object keyed by segment name.
pub type PathParams = serde_json::Map<String, Value>;

/// Boxed route handler: `(params, request, reply)`.
pub type HandlerFn = Arc<
    dyn Fn(PathParams, Arc<ApiRequest>, Reply) -> BoxFuture<'static, anyhow::Result<()>>
        + Send
        + Sync,
>;

/// Registered handler plus its hooks; shared by both call surfaces.
pub(crate) struct RouteTarget {
    pub(crate) handler: HandlerFn,
    pub(crate) hooks: Hooks,
}

/// Type-state markers for the handler slot.
pub mod state {
    /// Marker for a missing handler.
    #[derive(Debug, Clone, Copy)]
    pub struct Missing;

    /// Marker for a present handler.
    #[derive(Debug, Clone, Copy)]
    pub struct Present;
}

pub use state::{Missing, Present};

mod sealed {
    pub trait Sealed {}
}

/// Maps the handler state to the concrete slot type: no slot while missing,
/// a boxed handler once present.
pub trait HandlerSlot: sealed::Sealed {
    type Slot;
}

impl sealed::Sealed for Missing {}
impl sealed::Sealed for Present {}

impl HandlerSlot for Missing {
    type Slot = ();
}
impl HandlerSlot for Present {
    type Slot = HandlerFn;
}

/// Finished route definition (handler present).
pub(crate) struct RouteSpec {
    pub(crate) method: Method,
    pub(crate) path: String,
    pub(crate) name: Option<String>,
    pub(crate) expose_as: Option<String>,
    pub(crate) hooks: Hooks,
    pub(crate) handler: HandlerFn,
}

#[derive(Clone)]
struct RouteParts {
    method: Method,
    path: String,
    name: Option<String>,
    expose_as: Option<String>,
    hooks: Hooks,
}

/// Declarative route definition builder.
///
/// ```rust,ignore
/// let route = Route::get("/echo/{id}")
///     .name("echo")
///     .post_response(|req, _resp| async move {
///         tracing::info!(url = %req.url, "served");
///         Ok(())
///     })
///     .handler(|params, req, mut reply| async move {
///         reply.code(201);
///         reply.send_json(&serde_json::json!({
///             "id": params.get("id"),
///             "url": req.url,
///         })).await?;
///         Ok(())
///     });
/// api.register(route)?;
/// ```
pub struct Route<H = Missing>
where
    H: HandlerSlot,
{
    parts: RouteParts,
    handler: H::Slot,
    _marker: PhantomData<H>,
}

impl Route<Missing> {
    /// Create a builder for an HTTP method and path template. Legacy
    /// `:name` segments are normalized to `{name}`.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            parts: RouteParts {
                method,
                path: template::normalize_path(&path.into()),
                name: None,
                expose_as: None,
                hooks: Hooks::new(),
            },
            handler: (),
            _marker: PhantomData,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Alias for [`Route::delete`], matching the builder surface exposed to
    /// registration closures.
    pub fn del(path: impl Into<String>) -> Self {
        Self::delete(path)
    }

    /// Set the handler, transitioning the builder to the registrable state.
    pub fn handler<F, Fut>(self, f: F) -> Route<Present>
    where
        F: Fn(PathParams, Arc<ApiRequest>, Reply) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Route {
            parts: self.parts,
            handler: Arc::new(move |params, req, reply| Box::pin(f(params, req, reply))),
            _marker: PhantomData,
        }
    }
}

// Descriptive methods, available at any stage.
impl<H> Route<H>
where
    H: HandlerSlot,
{
    /// Callable key for this route. Required: Rust has no function-name
    /// reflection, so the key is always caller-supplied.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.parts.name = Some(name.into());
        self
    }

    /// Mount the callable at a dotted path (arbitrary depth) instead of its
    /// plain name.
    pub fn expose_as(mut self, path: impl Into<String>) -> Self {
        self.parts.expose_as = Some(path.into());
        self
    }

    /// Replace the whole hook set.
    pub fn hooks(mut self, hooks: Hooks) -> Self {
        self.parts.hooks = hooks;
        self
    }

    /// Append a pre-routing hook.
    pub fn pre_routing<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(ApiRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<ApiRequest>> + Send + 'static,
    {
        self.parts.hooks = self.parts.hooks.pre_routing(f);
        self
    }

    /// Append a pre-handler hook.
    pub fn pre_handler<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(ApiRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<ApiRequest>> + Send + 'static,
    {
        self.parts.hooks = self.parts.hooks.pre_handler(f);
        self
    }

    /// Append a pre-send hook.
    pub fn pre_send<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Arc<ApiRequest>, ApiResponse) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<ApiResponse>> + Send + 'static,
    {
        self.parts.hooks = self.parts.hooks.pre_send(f);
        self
    }

    /// Append a post-response hook.
    pub fn post_response<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Arc<ApiRequest>, Arc<ApiResponse>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.parts.hooks = self.parts.hooks.post_response(f);
        self
    }

    pub fn method(&self) -> &Method {
        &self.parts.method
    }

    pub fn path(&self) -> &str {
        &self.parts.path
    }
}

impl Route<Present> {
    pub(crate) fn into_spec(self) -> RouteSpec {
        RouteSpec {
            method: self.parts.method,
            path: self.parts.path,
            name: self.parts.name,
            expose_as: self.parts.expose_as,
            hooks: self.parts.hooks,
            handler: self.handler,
        }
    }
}
